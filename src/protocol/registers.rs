//! Translation between [DeviceSettings] and the Modbus register layout.
//!
//! | Register | Contents | Encoding |
//! |----------|----------|----------|
//! | 0  | Power demand (peer -> bridge) | 0 = OFF, 1 = ON |
//! | 1  | Timeout counter | always 0 |
//! | 2  | Set temperature | °C × 10, signed |
//! | 3  | Power | [POWER_TABLE] index |
//! | 4  | Mode | [MODE_TABLE] index |
//! | 5  | Fan | [FAN_TABLE] index |
//! | 6  | Vane | [VANE_TABLE] index |
//! | 7  | Wide vane | [WIDE_VANE_TABLE] index |
//! | 8  | Connected | 0/1 |
//! | 9  | Room temperature | °C × 10, signed |
//! | 10 | Operating | 0/1 |
//! | 11 | Milliseconds since last device contact | saturating |

use std::time::Duration;

use thiserror::Error;

use super::addresses::*;
use super::settings::*;


#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectedWrite {
    #[error("register is read-only")]
    ReadOnly,
    #[error("unknown register address")]
    UnknownAddress
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("unknown register address {0}")]
pub struct RejectedRead(pub u16);


/// A command decoded from a write to a writable register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedCommand {
    Power(Power)
}


pub fn encode_temperature(celsius: f32) -> u16 {
    (celsius * 10.0).round() as i16 as u16
}

pub fn decode_temperature(raw: u16) -> f32 {
    raw as i16 as f32 / 10.0
}

fn encode_index<T>(table: &Table<T>, value: Option<T>) -> u16 where
    T: Copy + PartialEq + Into<&'static str>
{
    value
        .and_then(|value| table.index_of(value))
        .unwrap_or(INVALID_REGISTER)
}

fn encode_optional_temperature(celsius: Option<f32>) -> u16 {
    celsius.map(encode_temperature).unwrap_or(INVALID_REGISTER)
}

fn encode_bool(value: bool) -> u16 {
    if value { 1 } else { 0 }
}

fn encode_elapsed(since_contact: Option<Duration>) -> u16 {
    since_contact
        .map(|elapsed| elapsed.as_millis().min(u16::MAX as u128) as u16)
        .unwrap_or(u16::MAX)
}

/// Value of one bridge-written status register.
///
/// `since_contact` is the time since the last confirmed device contact, `None` if never.
pub fn holding_register(address: u16, settings: &DeviceSettings, since_contact: Option<Duration>) -> Result<u16, RejectedRead> {
    let value = match address {
        HOLDING_TIMEOUT_COUNTER => 0,
        HOLDING_TEMPERATURE => encode_optional_temperature(settings.temperature),
        HOLDING_POWER => encode_index(&POWER_TABLE, settings.power),
        HOLDING_MODE => encode_index(&MODE_TABLE, settings.mode),
        HOLDING_FAN => encode_index(&FAN_TABLE, settings.fan),
        HOLDING_VANE => encode_index(&VANE_TABLE, settings.vane),
        HOLDING_WIDE_VANE => encode_index(&WIDE_VANE_TABLE, settings.wide_vane),
        HOLDING_CONNECTED => encode_bool(settings.connected),
        HOLDING_ROOM_TEMPERATURE => encode_optional_temperature(settings.room_temperature),
        HOLDING_OPERATING => encode_bool(settings.operating),
        HOLDING_MILLIS_SINCE_LAST_COMMS => encode_elapsed(since_contact),
        other => return Err(RejectedRead(other))
    };

    Ok(value)
}

/// All status registers, in address order starting at [HOLDING_READ_COUNT].
pub fn encode(settings: &DeviceSettings, since_contact: Option<Duration>) -> [u16; HOLDING_WRITE_COUNT] {
    let mut values = [0; HOLDING_WRITE_COUNT];

    for (offset, value) in values.iter_mut().enumerate() {
        let address = HOLDING_READ_COUNT + offset as u16;
        // every address in the status range is mapped
        *value = holding_register(address, settings, since_contact).unwrap_or(INVALID_REGISTER);
    }

    values
}

pub fn encode_power_demand(power: Power) -> u16 {
    encode_bool(power.is_on())
}

/// Decode a write of `value` to holding register `address`.
///
/// Only the power demand register is writable; any non-zero demand means ON.
pub fn decode(address: u16, value: u16) -> Result<DecodedCommand, RejectedWrite> {
    match address {
        HOLDING_POWER_DEMAND => Ok(DecodedCommand::Power(Power::from(value != 0))),
        HOLDING_READ_COUNT..=HOLDING_MILLIS_SINCE_LAST_COMMS => Err(RejectedWrite::ReadOnly),
        _ => Err(RejectedWrite::UnknownAddress)
    }
}
