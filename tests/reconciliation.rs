//! Reconciliation-loop tests against a scripted device.
//!
//! The scripted link answers like real hardware — positions evolve
//! between status queries — and records every line sent, so these tests
//! can assert the exact wire traffic of multi-tick sequences.

use astrolink::{
    AstroLink, AstroLinkError, DeviceConfig, LineExchange, PropertyState, Result,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

const SETTINGS_RECORD: &str = "1:1:80:120:30:50:200:800:200:800:0:2:10000:80000:0:0:50:18:30:15:\
                               5:10:10:0:1:0:0:0:0:0:0:0:40:90:10:1100:14000:10000:100:0";

/// Status line for one channel at `position` with `steps_to_go` left.
/// Sensors absent, power block zeroed.
fn status_line(position: i32, steps_to_go: i32) -> String {
    let mut fields = vec!["q".to_string(), "AL4MII".to_string()];
    fields.push(position.to_string());
    fields.push(steps_to_go.to_string());
    while fields.len() < 23 {
        fields.push("0".to_string());
    }
    fields.join(":")
}

/// Scripted device: canned answers per command code, a queue of status
/// responses, and a log of every line received.
struct ScriptedLink {
    sent: Mutex<Vec<String>>,
    status: Mutex<VecDeque<String>>,
    settings_record: String,
}

impl ScriptedLink {
    fn new(status: Vec<String>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            status: Mutex::new(status.into()),
            settings_record: SETTINGS_RECORD.to_string(),
        }
    }

    fn with_settings(mut self, record: &str) -> Self {
        self.settings_record = record.to_string();
        self
    }

    async fn sent(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }

    async fn sent_count(&self, command: &str) -> usize {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|line| line.as_str() == command)
            .count()
    }
}

#[async_trait]
impl LineExchange for ScriptedLink {
    async fn exchange(&self, command: &str) -> Result<String> {
        self.sent.lock().await.push(command.to_string());
        match command.as_bytes().first() {
            Some(b'#') => Ok("#:AstroLink4mini".to_string()),
            Some(b'A') => Ok("A:4.5.0 mini II".to_string()),
            Some(b'q') => {
                let mut queue = self.status.lock().await;
                // Repeat the last status once the script runs dry.
                if queue.len() > 1 {
                    Ok(queue.pop_front().unwrap())
                } else {
                    queue
                        .front()
                        .cloned()
                        .ok_or_else(|| AstroLinkError::Timeout {
                            command: command.to_string(),
                        })
                }
            }
            Some(b'u') => Ok(format!("u:{}", self.settings_record)),
            Some(b'U') => Ok("U:".to_string()),
            Some(b'f') => Ok("f:0".to_string()),
            Some(b'R') => Ok("R:".to_string()),
            Some(b'P') => Ok("P:".to_string()),
            Some(b'H') => Ok("H:".to_string()),
            Some(b'S') => Ok("S:".to_string()),
            Some(b'F') => Ok("F:".to_string()),
            _ => Err(AstroLinkError::Timeout {
                command: command.to_string(),
            }),
        }
    }
}

async fn connect(link: Arc<ScriptedLink>) -> AstroLink {
    AstroLink::with_link(link, DeviceConfig::new("/dev/null"))
        .await
        .unwrap()
}

#[tokio::test]
async fn backlash_move_runs_both_phases_across_ticks() {
    // Channel 0 bounded at 2000 ticks.
    let mut record: Vec<String> = SETTINGS_RECORD.split(':').map(str::to_string).collect();
    record[12] = "2000".to_string();
    let record = record.join(":");

    let link = Arc::new(
        ScriptedLink::new(vec![
            status_line(500, 0),
            status_line(1050, 0),
            status_line(1000, 0),
        ])
        .with_settings(&record),
    );
    let device = connect(link.clone()).await;

    device.set_backlash(0, 50).await.unwrap();
    device.set_backlash_enabled(0, true).await.unwrap();
    device.poll_once().await.unwrap();
    assert_eq!(device.snapshot().await.channels[0].position, 500);

    // Phase 1: outward move is biased by the offset.
    device.move_abs(0, 1000).await.unwrap();
    assert!(link.sent().await.contains(&"R:0:1050".to_string()));
    assert!(device.snapshot().await.channels[0].awaiting_backlash_return);

    // The device settles at the biased target; the tick that observes
    // zero steps to go issues the corrective move.
    device.poll_once().await.unwrap();
    let state = device.snapshot().await;
    assert!(!state.channels[0].awaiting_backlash_return);
    assert_eq!(state.channels[0].motion, PropertyState::Busy);
    assert_eq!(state.channels[0].target, 1000);

    // Settled at the true target.
    device.poll_once().await.unwrap();
    let state = device.snapshot().await;
    assert_eq!(state.channels[0].position, 1000);
    assert_eq!(state.channels[0].motion, PropertyState::Ok);

    let moves: Vec<String> = link
        .sent()
        .await
        .into_iter()
        .filter(|line| line.starts_with("R:"))
        .collect();
    assert_eq!(moves, ["R:0:1050", "R:0:1000"]);
}

#[tokio::test]
async fn bias_that_would_exceed_max_position_is_suppressed() {
    // Settings record with a 2000-tick bound on channel 0.
    let mut record: Vec<String> = SETTINGS_RECORD.split(':').map(str::to_string).collect();
    record[12] = "2000".to_string();
    let record = record.join(":");

    let link = Arc::new(
        ScriptedLink::new(vec![status_line(500, 0), status_line(1980, 0)])
            .with_settings(&record),
    );
    let device = connect(link.clone()).await;

    device.set_backlash(0, 50).await.unwrap();
    device.set_backlash_enabled(0, true).await.unwrap();
    device.poll_once().await.unwrap();

    device.move_abs(0, 1980).await.unwrap();
    assert!(!device.snapshot().await.channels[0].awaiting_backlash_return);

    device.poll_once().await.unwrap();
    assert_eq!(
        device.snapshot().await.channels[0].motion,
        PropertyState::Ok
    );

    let moves: Vec<String> = link
        .sent()
        .await
        .into_iter()
        .filter(|line| line.starts_with("R:"))
        .collect();
    assert_eq!(moves, ["R:0:1980"]);
}

#[tokio::test]
async fn busy_channel_stays_busy_until_steps_run_out() {
    let link = Arc::new(ScriptedLink::new(vec![
        status_line(1100, 400),
        status_line(1400, 100),
        status_line(1500, 0),
    ]));
    let device = connect(link.clone()).await;

    device.poll_once().await.unwrap();
    assert_eq!(
        device.snapshot().await.channels[0].motion,
        PropertyState::Busy
    );

    device.poll_once().await.unwrap();
    let state = device.snapshot().await;
    assert_eq!(state.channels[0].motion, PropertyState::Busy);
    assert_eq!(state.channels[0].position, 1400);

    device.poll_once().await.unwrap();
    assert_eq!(
        device.snapshot().await.channels[0].motion,
        PropertyState::Ok
    );
}

#[tokio::test]
async fn settings_and_manual_reads_happen_only_while_stale() {
    let link = Arc::new(ScriptedLink::new(vec![status_line(1000, 0)]));
    let device = connect(link.clone()).await;

    device.poll_once().await.unwrap();
    device.poll_once().await.unwrap();
    device.poll_once().await.unwrap();

    // Confirmed fresh after the first tick; no re-reads afterwards.
    assert_eq!(link.sent_count("u").await, 1);
    assert_eq!(link.sent_count("f").await, 1);

    // A settings write invalidates the cache; exactly one more read.
    device.set_reverse(0, true).await.unwrap();
    device.poll_once().await.unwrap();
    device.poll_once().await.unwrap();
    assert_eq!(link.sent_count("u").await, 3); // patch read + one refresh
    assert_eq!(link.sent_count("f").await, 1);
}

#[tokio::test]
async fn settings_patch_rewrites_the_scripted_record() {
    let link = Arc::new(ScriptedLink::new(vec![status_line(1000, 0)]));
    let device = connect(link.clone()).await;

    device.set_reverse(0, true).await.unwrap();

    let mut expected: Vec<String> = SETTINGS_RECORD.split(':').map(str::to_string).collect();
    expected[14] = "1".to_string();
    let expected = format!("U:{}:", expected.join(":"));
    assert!(link.sent().await.contains(&expected));
}

#[tokio::test]
async fn failed_tick_skips_reconciliation_and_recovers_next_tick() {
    // Empty status script: the first queries time out.
    let link = Arc::new(ScriptedLink::new(Vec::new()));
    let device = connect(link.clone()).await;

    let err = device.poll_once().await.unwrap_err();
    assert!(matches!(err, AstroLinkError::Timeout { .. }));
    // The settings and manual reads never ran.
    assert_eq!(link.sent_count("u").await, 0);
    assert_eq!(link.sent_count("f").await, 0);

    // Device comes back; the next tick reconciles normally.
    link.status.lock().await.push_back(status_line(1200, 0));
    device.poll_once().await.unwrap();
    let state = device.snapshot().await;
    assert_eq!(state.channels[0].position, 1200);
    assert_eq!(state.channels[0].settings_state, PropertyState::Ok);
}

#[tokio::test]
async fn sync_and_abort_drop_a_pending_corrective_move() {
    let link = Arc::new(ScriptedLink::new(vec![
        status_line(1000, 0),
        status_line(2050, 0),
    ]));
    let device = connect(link.clone()).await;

    device.set_backlash(0, 50).await.unwrap();
    device.set_backlash_enabled(0, true).await.unwrap();
    device.poll_once().await.unwrap();

    device.move_abs(0, 2000).await.unwrap();
    assert!(device.snapshot().await.channels[0].awaiting_backlash_return);

    device.abort(None).await.unwrap();
    assert!(!device.snapshot().await.channels[0].awaiting_backlash_return);

    // With the flag dropped, the settle tick issues no corrective move.
    device.poll_once().await.unwrap();
    let moves: Vec<String> = link
        .sent()
        .await
        .into_iter()
        .filter(|line| line.starts_with("R:"))
        .collect();
    assert_eq!(moves, ["R:0:2050"]);
}

/// Answers every command with a status record for the wrong code.
struct WrongEchoLink;

#[async_trait]
impl LineExchange for WrongEchoLink {
    async fn exchange(&self, command: &str) -> Result<String> {
        match command.as_bytes().first() {
            Some(b'#') => Ok("#:AstroLink4mini".to_string()),
            Some(b'A') => Ok("A:1.0".to_string()),
            _ => Ok("p:1234".to_string()),
        }
    }
}

#[tokio::test]
async fn wrong_echo_fails_the_tick_even_though_transport_succeeded() {
    let device = AstroLink::with_link(Arc::new(WrongEchoLink), DeviceConfig::new("/dev/null"))
        .await
        .unwrap();

    let err = device.poll_once().await.unwrap_err();
    assert!(matches!(
        err,
        AstroLinkError::ProtocolMismatch { ref sent, ref got } if sent == "q" && got == "p"
    ));
}

/// A device that identifies as something else entirely.
struct ImpostorLink;

#[async_trait]
impl LineExchange for ImpostorLink {
    async fn exchange(&self, _command: &str) -> Result<String> {
        Ok("#:SomeOtherBox".to_string())
    }
}

#[tokio::test]
async fn connection_is_rejected_without_the_model_prefix() {
    let err = AstroLink::with_link(Arc::new(ImpostorLink), DeviceConfig::new("/dev/null"))
        .await
        .unwrap_err();
    assert!(matches!(err, AstroLinkError::IdentityRejected { .. }));
}
