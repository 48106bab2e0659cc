//! Device context and host-facing operations.
//!
//! [`AstroLink`] owns the line-exchange seam plus the cached state the
//! poll loop reconciles. Operations mutate the cache optimistically
//! (marking the affected group `Busy` or `Alert`); the poll loop is what
//! flips groups back to `Ok` once the device confirms.

use crate::config::DeviceConfig;
use crate::error::{AstroLinkError, Result};
use crate::focuser::{plan_absolute_move, ChannelState, PropertyState};
use crate::protocol::{self, cmd};
use crate::serial;
use crate::settings::{self, pos};
use crate::transport::{LineExchange, SerialLink, SimulatedLink};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::instrument;

/// One environment sensor as exposed to the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SensorState {
    pub present: bool,
    pub temperature: f64,
    pub humidity: f64,
    pub dew_point: f64,
    /// `Ok` while the sensor reports, `Idle` when absent.
    pub state: PropertyState,
}

/// Power telemetry as exposed to the host (read-only).
#[derive(Debug, Clone, Copy, Default)]
pub struct PowerTelemetry {
    pub total_current: f64,
    pub vin: f64,
    pub vreg: f64,
    pub amp_hours: f64,
    pub watt_hours: f64,
    pub state: PropertyState,
}

/// Everything the host collaborator can see, as one cloneable record.
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    /// Model string from the identify handshake.
    pub model: String,
    /// Firmware version, when the device answers the version query.
    pub firmware: Option<String>,
    /// Identity code repeated in every status snapshot.
    pub device_code: Option<String>,
    pub channels: Vec<ChannelState>,
    pub sensors: [SensorState; 2],
    pub power: PowerTelemetry,
    /// Hand-controller mode as last confirmed by the device.
    pub manual_control: bool,
    /// Freshness of `manual_control`.
    pub manual_state: PropertyState,
}

impl DeviceState {
    fn new(model: String, firmware: Option<String>, channel_count: u8) -> Self {
        Self {
            model,
            firmware,
            channels: vec![ChannelState::default(); channel_count as usize],
            ..Self::default()
        }
    }
}

/// Requested focuser settings, written through the settings record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocuserSettingsUpdate {
    /// Step size [µm].
    pub step_size_um: f64,
    /// Temperature compensation rate [steps/°C].
    pub comp_steps_per_c: f64,
    /// Compensation trigger threshold [steps].
    pub comp_threshold: f64,
}

/// Compensation cycle period written alongside focuser settings [s].
const COMP_CYCLE_SECONDS: &str = "30";

/// Connected AstroLink device.
///
/// Cheap to clone; clones share the link and the cached state. All
/// exchanges serialize on the link's internal lock, so user operations
/// and the poll task never interleave on the wire.
#[derive(Clone)]
pub struct AstroLink {
    pub(crate) link: Arc<dyn LineExchange>,
    pub(crate) config: DeviceConfig,
    pub(crate) state: Arc<RwLock<DeviceState>>,
}

impl std::fmt::Debug for AstroLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AstroLink")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AstroLink {
    /// Open the configured serial port and run the identify handshake.
    pub async fn open(config: DeviceConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let port = serial::open_serial_async(&config.port, config.baud).await?;
        let shared = serial::wrap_shared(Box::new(port));
        let link: Arc<dyn LineExchange> = Arc::new(SerialLink::new(shared, config.timeout()));
        Ok(Self::connect(link, config).await?)
    }

    /// Connect to the offline simulator instead of a real port.
    pub async fn simulated(config: DeviceConfig) -> Result<Self> {
        Self::connect(Arc::new(SimulatedLink::new()), config).await
    }

    /// Connect over an arbitrary line exchange.
    ///
    /// This is the seam test doubles plug into; `open` and `simulated`
    /// both end up here.
    pub async fn with_link(link: Arc<dyn LineExchange>, config: DeviceConfig) -> Result<Self> {
        Self::connect(link, config).await
    }

    async fn connect(link: Arc<dyn LineExchange>, config: DeviceConfig) -> Result<Self> {
        let model = protocol::identify(&*link).await?;
        tracing::info!(model = %model, "device identified");

        // Older firmware may not answer the version query; not fatal.
        let firmware = match protocol::firmware_version(&*link).await {
            Ok(version) => {
                tracing::info!(version = %version, "firmware version");
                Some(version)
            }
            Err(e) => {
                tracing::debug!(error = %e, "firmware version query unanswered");
                None
            }
        };

        let state = DeviceState::new(model, firmware, config.channels);
        Ok(Self {
            link,
            config,
            state: Arc::new(RwLock::new(state)),
        })
    }

    /// Clone of the current host-visible state.
    pub async fn snapshot(&self) -> DeviceState {
        self.state.read().await.clone()
    }

    /// Configured channel count.
    pub fn channel_count(&self) -> u8 {
        self.config.channels
    }

    fn ensure_channel(&self, channel: u8) -> Result<()> {
        if channel >= self.config.channels {
            return Err(AstroLinkError::InvalidChannel {
                channel,
                count: self.config.channels,
            });
        }
        Ok(())
    }

    /// Absolute move, with backlash biasing when it applies.
    #[instrument(skip(self), err)]
    pub async fn move_abs(&self, channel: u8, target: i32) -> Result<()> {
        self.ensure_channel(channel)?;

        let plan = {
            let state = self.state.read().await;
            let ch = &state.channels[channel as usize];
            plan_absolute_move(
                target,
                ch.position,
                ch.backlash_steps,
                ch.backlash_enabled,
                ch.settings.max_position,
            )
        };

        let result = protocol::command(
            &*self.link,
            cmd::MOVE_ABS,
            &[&channel.to_string(), &plan.command_target.to_string()],
        )
        .await;

        let mut state = self.state.write().await;
        let ch = &mut state.channels[channel as usize];
        match result {
            Ok(_) => {
                ch.target = target;
                ch.awaiting_backlash_return = plan.awaiting_return;
                ch.motion = PropertyState::Busy;
                Ok(())
            }
            Err(e) => {
                ch.motion = PropertyState::Alert;
                Err(e)
            }
        }
    }

    /// Relative move from the cached current position.
    #[instrument(skip(self), err)]
    pub async fn move_rel(&self, channel: u8, delta: i32) -> Result<()> {
        self.ensure_channel(channel)?;
        let target = {
            let state = self.state.read().await;
            (state.channels[channel as usize].position + delta).max(0)
        };
        self.move_abs(channel, target).await
    }

    /// Abort motion on one channel, or on all of them.
    ///
    /// Bypasses the backlash sequencer: any pending corrective move is
    /// dropped along with the motion it belonged to.
    #[instrument(skip(self), err)]
    pub async fn abort(&self, channel: Option<u8>) -> Result<()> {
        if let Some(ch) = channel {
            self.ensure_channel(ch)?;
        }

        match channel {
            Some(ch) => {
                protocol::command(&*self.link, cmd::ABORT, &[&ch.to_string()]).await?;
            }
            None => {
                protocol::command(&*self.link, cmd::ABORT, &[]).await?;
            }
        }

        let mut state = self.state.write().await;
        for (index, ch) in state.channels.iter_mut().enumerate() {
            if channel.is_none() || channel == Some(index as u8) {
                ch.awaiting_backlash_return = false;
            }
        }
        Ok(())
    }

    /// Sync (zero-calibrate) the channel to `ticks` without moving.
    ///
    /// Bypasses the backlash sequencer and drops any pending corrective
    /// move, since the position scale just changed under it.
    #[instrument(skip(self), err)]
    pub async fn sync_position(&self, channel: u8, ticks: i32) -> Result<()> {
        self.ensure_channel(channel)?;
        protocol::command(
            &*self.link,
            cmd::SYNC,
            &[&channel.to_string(), &ticks.to_string()],
        )
        .await?;

        let mut state = self.state.write().await;
        state.channels[channel as usize].awaiting_backlash_return = false;
        Ok(())
    }

    /// Set the direction reversal flag on the device.
    #[instrument(skip(self), err)]
    pub async fn set_reverse(&self, channel: u8, enabled: bool) -> Result<()> {
        self.ensure_channel(channel)?;
        let mut updates = BTreeMap::new();
        updates.insert(pos::reverse(channel), flag(enabled));
        self.patch_and_mark(channel, updates).await
    }

    /// Set the maximum position bound on the device.
    #[instrument(skip(self), err)]
    pub async fn set_max_position(&self, channel: u8, ticks: i32) -> Result<()> {
        self.ensure_channel(channel)?;
        let mut updates = BTreeMap::new();
        updates.insert(pos::max_position(channel), ticks.to_string());
        self.patch_and_mark(channel, updates).await
    }

    /// Set the backlash offset [ticks]. Host-side only.
    pub async fn set_backlash(&self, channel: u8, steps: i32) -> Result<()> {
        self.ensure_channel(channel)?;
        self.state.write().await.channels[channel as usize].backlash_steps = steps;
        Ok(())
    }

    /// Enable or disable backlash compensation. Host-side only.
    pub async fn set_backlash_enabled(&self, channel: u8, enabled: bool) -> Result<()> {
        self.ensure_channel(channel)?;
        self.state.write().await.channels[channel as usize].backlash_enabled = enabled;
        Ok(())
    }

    /// Write step size, compensation rate and threshold to the device.
    #[instrument(skip(self), err)]
    pub async fn apply_focuser_settings(
        &self,
        channel: u8,
        update: FocuserSettingsUpdate,
    ) -> Result<()> {
        self.ensure_channel(channel)?;
        let mut updates = BTreeMap::new();
        updates.insert(
            pos::step_size(channel),
            scaled_int(update.step_size_um * 100.0),
        );
        updates.insert(pos::COMP_CYCLE, COMP_CYCLE_SECONDS.to_string());
        updates.insert(
            pos::comp_steps(channel),
            scaled_int(update.comp_steps_per_c * 100.0),
        );
        updates.insert(
            pos::comp_trigger(channel),
            scaled_int(update.comp_threshold),
        );
        self.patch_and_mark(channel, updates).await?;

        if update.comp_steps_per_c != 0.0 {
            tracing::info!(channel, "temperature compensation enabled");
        } else {
            tracing::info!(channel, "temperature compensation disabled");
        }
        Ok(())
    }

    /// Switch between automatic and manual temperature compensation.
    #[instrument(skip(self), err)]
    pub async fn set_compensation_mode(&self, channel: u8, auto: bool) -> Result<()> {
        self.ensure_channel(channel)?;
        let mut updates = BTreeMap::new();
        updates.insert(pos::comp_auto(channel), flag(auto));
        self.patch_and_mark(channel, updates).await
    }

    /// Trigger a compensation cycle now, using the cached threshold.
    #[instrument(skip(self), err)]
    pub async fn compensate_now(&self, channel: u8) -> Result<()> {
        self.ensure_channel(channel)?;
        let threshold = {
            let state = self.state.read().await;
            state.channels[channel as usize].settings.comp_threshold
        };

        let result =
            protocol::command(&*self.link, cmd::COMPENSATE, &[&scaled_int(threshold)]).await;

        let mut state = self.state.write().await;
        let ch = &mut state.channels[channel as usize];
        match result {
            Ok(_) => {
                ch.comp_state = PropertyState::Busy;
                Ok(())
            }
            Err(e) => {
                ch.comp_state = PropertyState::Alert;
                Err(e)
            }
        }
    }

    /// Enable or disable the hand controller.
    #[instrument(skip(self), err)]
    pub async fn set_manual_control(&self, enabled: bool) -> Result<()> {
        let result = protocol::command(&*self.link, cmd::MANUAL_SET, &[flag(enabled).as_str()]).await;

        let mut state = self.state.write().await;
        match result {
            Ok(_) => {
                state.manual_control = enabled;
                state.manual_state = PropertyState::Busy;
                Ok(())
            }
            Err(e) => {
                state.manual_state = PropertyState::Alert;
                Err(e)
            }
        }
    }

    /// Patch the settings record and mark the channel's settings cache
    /// stale (`Busy`) until the poll loop re-reads and confirms it.
    async fn patch_and_mark(&self, channel: u8, updates: BTreeMap<usize, String>) -> Result<()> {
        let result = settings::patch_settings(&*self.link, &updates).await;

        let mut state = self.state.write().await;
        let ch = &mut state.channels[channel as usize];
        match result {
            Ok(()) => {
                ch.settings_state = PropertyState::Busy;
                Ok(())
            }
            Err(e) => {
                ch.settings_state = PropertyState::Alert;
                Err(e)
            }
        }
    }
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

fn scaled_int(value: f64) -> String {
    format!("{:.0}", value)
}
