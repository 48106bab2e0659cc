//! Serial driver for the AstroLink 4 mini II focuser / power controller.
//!
//! The device speaks a newline-terminated, colon-delimited ASCII
//! protocol over one serial port: single-letter commands, responses that
//! echo the command code in their first field, one monolithic settings
//! record patched by read-modify-write, and a status snapshot the driver
//! polls every 500 ms to reconcile cached actuator and sensor state.
//!
//! # Layers
//!
//! - [`transport`]: line framing over the port, plus the offline
//!   simulator ([`SimulatedLink`]).
//! - [`protocol`]: command vocabulary, echo validation, the identify
//!   gate.
//! - [`settings`] / [`status`]: codecs for the two wire records.
//! - [`device`]: the [`AstroLink`] context with host-facing operations.
//! - [`poll`]: the reconciliation loop, including phase 2 of two-phase
//!   backlash moves.
//!
//! # Example
//!
//! ```rust,ignore
//! use astrolink::{AstroLink, DeviceConfig};
//!
//! let config = DeviceConfig::new("/dev/ttyUSB0");
//! let device = AstroLink::open(config).await?;
//! let poll = device.spawn_poll_task();
//!
//! device.move_abs(0, 12_000).await?;
//! let state = device.snapshot().await;
//! println!("position: {} ticks", state.channels[0].position);
//!
//! poll.stop().await;
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod focuser;
pub mod poll;
pub mod protocol;
pub mod serial;
pub mod settings;
pub mod status;
pub mod transport;

pub use config::DeviceConfig;
pub use device::{AstroLink, DeviceState, FocuserSettingsUpdate, PowerTelemetry, SensorState};
pub use error::{AstroLinkError, Result};
pub use focuser::{plan_absolute_move, ChannelState, MovePlan, PropertyState};
pub use poll::PollHandle;
pub use settings::ChannelSettings;
pub use status::StatusSnapshot;
pub use transport::{LineExchange, SerialLink, SimulatedLink};
