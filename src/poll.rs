//! Periodic reconciliation against the device.
//!
//! The poll task is the only place cached state gets confirmed: it reads
//! the status snapshot every tick, detects move completion (steps-to-go
//! of exactly zero, the device's own "done" signal), continues pending
//! two-phase backlash moves, and re-reads the settings record or the
//! manual-control flag only while their caches are stale.

use crate::device::{AstroLink, PowerTelemetry, SensorState};
use crate::error::Result;
use crate::focuser::PropertyState;
use crate::protocol::{self, cmd, flag_field};
use crate::settings::{self, ChannelSettings};
use crate::status::StatusSnapshot;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::instrument;

/// Handle to a running poll task.
pub struct PollHandle {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl PollHandle {
    /// Stop the poll task and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

impl AstroLink {
    /// One reconciliation tick.
    ///
    /// A failure anywhere skips the rest of the tick; nothing is retried
    /// until the next tick, so a silent device costs one exchange per
    /// period instead of a retry storm.
    #[instrument(skip(self), err)]
    pub async fn poll_once(&self) -> Result<()> {
        let payload = protocol::command(&*self.link, cmd::STATUS, &[]).await?;
        let snapshot = StatusSnapshot::parse(&payload, self.config.channels)?;

        // Corrective phase-2 moves owed after this snapshot; issued once
        // the state lock is released.
        let mut correctives: Vec<(u8, i32)> = Vec::new();

        {
            let mut state = self.state.write().await;
            state.device_code = Some(snapshot.device_code.clone());

            for (index, reading) in snapshot.channels.iter().enumerate() {
                let ch = &mut state.channels[index];
                ch.position = reading.position;
                ch.position_mm = reading.position as f64 * ch.settings.step_size_um / 1000.0;
                ch.steps_to_go = reading.steps_to_go;

                if reading.steps_to_go == 0 {
                    if ch.awaiting_backlash_return {
                        ch.awaiting_backlash_return = false;
                        correctives.push((index as u8, reading.position - ch.backlash_steps));
                    } else {
                        ch.motion = PropertyState::Ok;
                    }
                } else {
                    ch.motion = PropertyState::Busy;
                }

                if let Some(comp) = reading.comp_steps {
                    ch.comp_steps = comp;
                    ch.comp_state = if comp != 0.0 {
                        PropertyState::Ok
                    } else {
                        PropertyState::Idle
                    };
                }
            }

            for (index, reading) in snapshot.sensors.iter().enumerate() {
                state.sensors[index] = match reading {
                    Some(r) => SensorState {
                        present: true,
                        temperature: r.temperature,
                        humidity: r.humidity.unwrap_or_default(),
                        dew_point: r.dew_point.unwrap_or_default(),
                        state: PropertyState::Ok,
                    },
                    None => SensorState {
                        state: PropertyState::Idle,
                        ..SensorState::default()
                    },
                };
            }

            if let Some(power) = snapshot.power {
                state.power = PowerTelemetry {
                    total_current: power.total_current,
                    vin: power.vin,
                    vreg: power.vreg,
                    amp_hours: power.amp_hours,
                    watt_hours: power.watt_hours,
                    state: PropertyState::Ok,
                };
            }
        }

        for (channel, target) in correctives {
            self.corrective_move(channel, target).await;
        }

        self.refresh_settings_if_stale().await?;
        self.refresh_manual_if_stale().await?;

        Ok(())
    }

    /// Phase 2 of a backlash move: a direct move to the true target,
    /// never re-entering the planner.
    async fn corrective_move(&self, channel: u8, target: i32) {
        tracing::debug!(channel, target, "issuing backlash corrective move");

        let result = protocol::command(
            &*self.link,
            cmd::MOVE_ABS,
            &[&channel.to_string(), &target.to_string()],
        )
        .await;

        let mut state = self.state.write().await;
        let ch = &mut state.channels[channel as usize];
        match result {
            Ok(_) => {
                ch.target = target;
                ch.motion = PropertyState::Busy;
            }
            Err(e) => {
                tracing::warn!(channel, error = %e, "backlash corrective move failed");
                ch.motion = PropertyState::Alert;
            }
        }
    }

    /// Re-read the settings record when any channel's settings cache is
    /// not confirmed fresh. Once every cache is `Ok` this is a no-op, so
    /// steady-state polling costs a single status query per tick.
    async fn refresh_settings_if_stale(&self) -> Result<()> {
        let stale = {
            let state = self.state.read().await;
            state
                .channels
                .iter()
                .any(|ch| ch.settings_state != PropertyState::Ok)
        };
        if !stale {
            return Ok(());
        }

        let record = settings::read_settings(&*self.link).await?;

        let mut state = self.state.write().await;
        for (index, ch) in state.channels.iter_mut().enumerate() {
            ch.settings = ChannelSettings::from_record(&record, index as u8)?;
            ch.position_mm = ch.position as f64 * ch.settings.step_size_um / 1000.0;
            ch.settings_state = PropertyState::Ok;
        }
        tracing::debug!("settings cache refreshed");
        Ok(())
    }

    /// Re-read the manual-control flag via its lightweight query when
    /// the cached value is not confirmed fresh.
    async fn refresh_manual_if_stale(&self) -> Result<()> {
        let stale = {
            let state = self.state.read().await;
            state.manual_state != PropertyState::Ok
        };
        if !stale {
            return Ok(());
        }

        let payload = protocol::command(&*self.link, cmd::MANUAL_READ, &[]).await?;
        let enabled = flag_field(&payload, 0)?;

        let mut state = self.state.write().await;
        state.manual_control = enabled;
        state.manual_state = PropertyState::Ok;
        Ok(())
    }

    /// Spawn the poll task at the configured period.
    ///
    /// Tick failures are logged and swallowed; the task only exits
    /// through [`PollHandle::stop`].
    pub fn spawn_poll_task(&self) -> PollHandle {
        let device = self.clone();
        let period = self.config.poll_interval();
        let (shutdown, mut shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            tracing::info!(period_ms = period.as_millis() as u64, "poll task started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = device.poll_once().await {
                            tracing::warn!(error = %e, "poll tick failed");
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::info!("poll task shutting down");
                        break;
                    }
                }
            }
        });

        PollHandle { shutdown, handle }
    }
}
