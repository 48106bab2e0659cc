//! Settings record codec.
//!
//! The device keeps all persisted configuration in one wide
//! colon-delimited record. There is no partial-write command: changing
//! any field means reading the whole record, overwriting the wanted
//! positions, and writing the whole record back. The record is
//! re-fetched immediately before every rewrite so a patch never pushes
//! stale values over fields someone else changed.
//!
//! Positions are zero-based indices into the payload (echo code
//! stripped); wire field `k` is payload index `k - 1`. The rewrite
//! prepends the write code as a new wire field 0.

use crate::error::{AstroLinkError, Result};
use crate::protocol::{self, cmd, flag_field, float_field, int_field};
use crate::transport::LineExchange;
use std::collections::BTreeMap;

/// Payload positions of the settings record.
pub mod pos {
    /// Buzzer enable.
    pub const BUZZER: usize = 0;
    /// Manual-control (hand controller) enable.
    pub const MANUAL: usize = 1;
    /// Compensation cycle period [s].
    pub const COMP_CYCLE: usize = 20;
    /// PWM prescaler.
    pub const PWM_PRESCALE: usize = 25;
    /// Humidity sensor type.
    pub const HUM_SENSOR: usize = 31;
    /// Dew heater ramp start [% humidity].
    pub const HUM_START: usize = 32;
    /// Dew heater full power [% humidity].
    pub const HUM_FULL: usize = 33;
    /// Temperature preset.
    pub const TEMP_PRESET: usize = 34;
    /// Sensor reference voltage [mV].
    pub const VREF: usize = 35;
    /// Overvoltage cutoff [mV].
    pub const OVERVOLTAGE: usize = 36;
    /// Overcurrent cutoff [mA].
    pub const OVERCURRENT: usize = 37;
    /// Overload grace time [ms].
    pub const OVERTIME: usize = 38;
    /// Compensation sensor selector.
    pub const COMP_SENSOR: usize = 39;

    /// Drive current for channel `ch`.
    pub const fn drive_current(ch: u8) -> usize {
        2 + ch as usize
    }

    /// Hold current for channel `ch`.
    pub const fn hold_current(ch: u8) -> usize {
        4 + ch as usize
    }

    /// Speed for channel `ch`.
    pub const fn speed(ch: u8) -> usize {
        6 + ch as usize
    }

    /// Acceleration for channel `ch`.
    pub const fn acceleration(ch: u8) -> usize {
        8 + ch as usize
    }

    /// Step mode for channel `ch`.
    pub const fn step_mode(ch: u8) -> usize {
        10 + ch as usize
    }

    /// Maximum position bound for channel `ch`.
    pub const fn max_position(ch: u8) -> usize {
        12 + ch as usize
    }

    /// Direction reversal flag for channel `ch`.
    pub const fn reverse(ch: u8) -> usize {
        14 + ch as usize
    }

    /// Step size for channel `ch` [µm × 100].
    pub const fn step_size(ch: u8) -> usize {
        16 + ch as usize
    }

    /// Compensation rate for channel `ch` [steps/°C × 100].
    pub const fn comp_steps(ch: u8) -> usize {
        18 + ch as usize
    }

    /// Compensation trigger threshold for channel `ch` [steps].
    pub const fn comp_trigger(ch: u8) -> usize {
        21 + ch as usize
    }

    /// Automatic compensation flag for channel `ch`.
    pub const fn comp_auto(ch: u8) -> usize {
        23 + ch as usize
    }

    /// Power-up default for switched output `out` (0-based).
    pub const fn out_default(out: u8) -> usize {
        26 + out as usize
    }

    /// Power-up default for PWM output `out` (0-based).
    pub const fn pwm_default(out: u8) -> usize {
        29 + out as usize
    }
}

/// Read the full settings record.
pub async fn read_settings(link: &dyn LineExchange) -> Result<Vec<String>> {
    protocol::command(link, cmd::SETTINGS_READ, &[]).await
}

/// Patch a subset of settings positions.
///
/// Reads the current record, overwrites exactly the requested positions,
/// and writes the whole record back with the write code restored at wire
/// position 0. Fails before writing anything if the record is shorter
/// than the highest requested position.
///
/// The read and the write are two separate exchanges; an external change
/// landing between them is overwritten. The driver assumes it is the
/// record's only writer.
pub async fn patch_settings(
    link: &dyn LineExchange,
    updates: &BTreeMap<usize, String>,
) -> Result<()> {
    let mut record = read_settings(link).await?;

    if let Some((&highest, _)) = updates.iter().next_back() {
        if record.len() <= highest {
            return Err(AstroLinkError::RecordTruncated {
                len: record.len(),
                index: highest,
            });
        }
    }

    for (&index, value) in updates {
        record[index] = value.clone();
    }

    // The device expects the rewrite to end with a trailing delimiter.
    let mut line = String::from(cmd::SETTINGS_WRITE);
    for value in &record {
        line.push(protocol::DELIMITER);
        line.push_str(value);
    }
    line.push(protocol::DELIMITER);

    protocol::send_line(link, cmd::SETTINGS_WRITE, &line).await?;
    Ok(())
}

/// Settings-derived values cached per focuser channel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChannelSettings {
    /// Step size [µm].
    pub step_size_um: f64,
    /// Temperature compensation rate [steps/°C].
    pub comp_steps_per_c: f64,
    /// Compensation trigger threshold [steps].
    pub comp_threshold: f64,
    /// Maximum position bound [ticks].
    pub max_position: i32,
    /// Direction reversal.
    pub reverse: bool,
    /// Automatic compensation enabled.
    pub comp_auto: bool,
}

impl ChannelSettings {
    /// Decode channel `ch`'s slice of a settings record.
    pub fn from_record(record: &[String], ch: u8) -> Result<Self> {
        Ok(Self {
            step_size_um: float_field(record, pos::step_size(ch))? / 100.0,
            comp_steps_per_c: float_field(record, pos::comp_steps(ch))? / 100.0,
            comp_threshold: float_field(record, pos::comp_trigger(ch))?,
            max_position: int_field(record, pos::max_position(ch))?,
            reverse: flag_field(record, pos::reverse(ch))?,
            comp_auto: flag_field(record, pos::comp_auto(ch))?,
        })
    }
}
