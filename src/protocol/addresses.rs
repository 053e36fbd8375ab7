
pub const COIL_RESET: u16 = 0;
pub const COIL_REBOOT: u16 = 1;
pub const COILS_LEN: u16 = 2;

pub const HOLDING_LEN: u16 = 12;

/// Power demand, written by the remote peer (0 = OFF, 1 = ON). Never written by the bridge.
pub const HOLDING_POWER_DEMAND: u16 = 0;

// status registers, written by the bridge
pub const HOLDING_TIMEOUT_COUNTER: u16 = 1;
pub const HOLDING_TEMPERATURE: u16 = 2;
pub const HOLDING_POWER: u16 = 3;
pub const HOLDING_MODE: u16 = 4;
pub const HOLDING_FAN: u16 = 5;
pub const HOLDING_VANE: u16 = 6;
pub const HOLDING_WIDE_VANE: u16 = 7;
pub const HOLDING_CONNECTED: u16 = 8;
pub const HOLDING_ROOM_TEMPERATURE: u16 = 9;
pub const HOLDING_OPERATING: u16 = 10;
pub const HOLDING_MILLIS_SINCE_LAST_COMMS: u16 = 11;

/// Number of leading registers owned by the peer.
pub const HOLDING_READ_COUNT: u16 = 1;
pub const HOLDING_WRITE_COUNT: usize = (HOLDING_LEN - HOLDING_READ_COUNT) as usize;

const _: () = assert!(HOLDING_READ_COUNT == HOLDING_TIMEOUT_COUNTER, "index mismatch");
const _: () = assert!(HOLDING_MILLIS_SINCE_LAST_COMMS == HOLDING_LEN - 1, "index mismatch");

/// Value reported for a register whose source value is not in its lookup table (`-1` as `u16`).
pub const INVALID_REGISTER: u16 = u16::MAX;
