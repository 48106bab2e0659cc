//! Typed decode of the status snapshot (`q` response).
//!
//! Field positions are zero-based indices into the response payload, the
//! field list left after the echoed command code is stripped. The wire
//! field numbered `k` (with the echo code as 0) is payload index `k - 1`.

use crate::error::Result;
use crate::protocol::{flag_field, float_field, int_field};

/// Payload positions of the status snapshot.
pub mod field {
    /// Device identity code (e.g. `AL4MII`).
    pub const DEVICE_CODE: usize = 0;
    /// Total drive current [A].
    pub const TOTAL_CURRENT: usize = 5;
    /// Sensor 1 presence flag.
    pub const SENS1_PRESENT: usize = 6;
    /// Sensor 1 temperature [°C].
    pub const SENS1_TEMP: usize = 7;
    /// Sensor 1 relative humidity [%].
    pub const SENS1_HUM: usize = 8;
    /// Sensor 1 dew point [°C].
    pub const SENS1_DEW: usize = 9;
    /// Sensor 2 presence flag.
    pub const SENS2_PRESENT: usize = 10;
    /// Sensor 2 temperature [°C].
    pub const SENS2_TEMP: usize = 11;
    /// PWM output 1 duty [%].
    pub const PWM1: usize = 12;
    /// PWM output 2 duty [%].
    pub const PWM2: usize = 13;
    /// Switched output 1 state.
    pub const OUT1: usize = 14;
    /// Switched output 2 state.
    pub const OUT2: usize = 15;
    /// Switched output 3 state.
    pub const OUT3: usize = 16;
    /// Input voltage [V].
    pub const VIN: usize = 17;
    /// Regulated voltage [V].
    pub const VREG: usize = 18;
    /// Accumulated charge [Ah].
    pub const AH: usize = 19;
    /// Accumulated energy [Wh].
    pub const WH: usize = 20;
    /// Sensor 2 relative humidity [%] (longer records only).
    pub const SENS2_HUM: usize = 30;
    /// Sensor 2 dew point [°C] (longer records only).
    pub const SENS2_DEW: usize = 31;
    /// Sky brightness module presence flag.
    pub const SBM_PRESENT: usize = 32;
    /// Sky brightness reading.
    pub const SBM: usize = 33;

    /// Position of channel `ch`'s current position.
    pub const fn position(ch: u8) -> usize {
        1 + 2 * ch as usize
    }

    /// Position of channel `ch`'s steps-to-go.
    pub const fn steps_to_go(ch: u8) -> usize {
        2 + 2 * ch as usize
    }

    /// Position of channel `ch`'s accumulated compensation steps.
    pub const fn comp_steps(ch: u8) -> usize {
        21 + ch as usize
    }
}

/// Per-channel slice of one snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelReading {
    pub position: i32,
    /// Device-reported remaining travel; zero is the completion signal.
    pub steps_to_go: i32,
    /// Accumulated compensation steps, when the record carries them.
    pub comp_steps: Option<f64>,
}

/// One environment sensor's readings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub temperature: f64,
    pub humidity: Option<f64>,
    pub dew_point: Option<f64>,
}

/// Power telemetry block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerReading {
    pub total_current: f64,
    pub vin: f64,
    pub vreg: f64,
    pub amp_hours: f64,
    pub watt_hours: f64,
}

/// One decoded status snapshot.
///
/// Recomputed from scratch every poll tick and superseded wholesale;
/// nothing here is merged incrementally.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub device_code: String,
    pub channels: Vec<ChannelReading>,
    pub sensors: [Option<SensorReading>; 2],
    pub power: Option<PowerReading>,
    pub pwm: Option<[f64; 2]>,
    pub outputs: Option<[bool; 3]>,
}

impl StatusSnapshot {
    /// Decode a status payload for `channel_count` focuser channels.
    ///
    /// Positions and steps-to-go are mandatory for every configured
    /// channel; everything past the per-channel block is decoded only
    /// when the record is long enough to carry it, matching shorter
    /// firmware variants.
    pub fn parse(payload: &[String], channel_count: u8) -> Result<Self> {
        let device_code = payload
            .get(field::DEVICE_CODE)
            .cloned()
            .unwrap_or_default();

        let mut channels = Vec::with_capacity(channel_count as usize);
        for ch in 0..channel_count {
            channels.push(ChannelReading {
                position: int_field(payload, field::position(ch))?,
                steps_to_go: int_field(payload, field::steps_to_go(ch))?,
                comp_steps: float_field(payload, field::comp_steps(ch)).ok(),
            });
        }

        let sensors = [
            Self::parse_sensor(
                payload,
                field::SENS1_PRESENT,
                field::SENS1_TEMP,
                field::SENS1_HUM,
                field::SENS1_DEW,
            ),
            Self::parse_sensor(
                payload,
                field::SENS2_PRESENT,
                field::SENS2_TEMP,
                field::SENS2_HUM,
                field::SENS2_DEW,
            ),
        ];

        Ok(Self {
            device_code,
            channels,
            sensors,
            power: Self::parse_power(payload),
            pwm: Self::parse_pwm(payload),
            outputs: Self::parse_outputs(payload),
        })
    }

    fn parse_power(payload: &[String]) -> Option<PowerReading> {
        Some(PowerReading {
            total_current: float_field(payload, field::TOTAL_CURRENT).ok()?,
            vin: float_field(payload, field::VIN).ok()?,
            vreg: float_field(payload, field::VREG).ok()?,
            amp_hours: float_field(payload, field::AH).ok()?,
            watt_hours: float_field(payload, field::WH).ok()?,
        })
    }

    fn parse_pwm(payload: &[String]) -> Option<[f64; 2]> {
        Some([
            float_field(payload, field::PWM1).ok()?,
            float_field(payload, field::PWM2).ok()?,
        ])
    }

    fn parse_outputs(payload: &[String]) -> Option<[bool; 3]> {
        Some([
            flag_field(payload, field::OUT1).ok()?,
            flag_field(payload, field::OUT2).ok()?,
            flag_field(payload, field::OUT3).ok()?,
        ])
    }

    fn parse_sensor(
        payload: &[String],
        present: usize,
        temp: usize,
        hum: usize,
        dew: usize,
    ) -> Option<SensorReading> {
        if !flag_field(payload, present).ok()? {
            return None;
        }
        Some(SensorReading {
            temperature: float_field(payload, temp).ok()?,
            humidity: float_field(payload, hum).ok(),
            dew_point: float_field(payload, dew).ok(),
        })
    }
}
