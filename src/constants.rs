pub const SYNC_BYTE: u8 = 0xFF;
pub const DEFAULT_ADDRESS: u8 = 0x01;
pub const FRAME_LEN: usize = 7;

// Pelco-D command2 bits for manual motion
pub const CMD_PAN_RIGHT: u8 = 0x02;
pub const CMD_PAN_LEFT: u8 = 0x04;
pub const CMD_TILT_UP: u8 = 0x08;
pub const CMD_TILT_DOWN: u8 = 0x10;

// Pelco-D extended command2 values for absolute positioning
pub const CMD_SET_PAN_POSITION: u8 = 0x4B;
pub const CMD_SET_TILT_POSITION: u8 = 0x4D;
pub const CMD_QUERY_PAN: u8 = 0x51;
pub const CMD_QUERY_TILT: u8 = 0x53;
pub const CMD_PAN_RESPONSE: u8 = 0x59;
pub const CMD_TILT_RESPONSE: u8 = 0x5B;

pub const MAX_SPEED: u8 = 0x3F;
pub const DEFAULT_SPEED: u8 = 0x20;

// Angles
pub const DEGREES_PER_TURN: f64 = 360.0;
pub const HUNDREDTHS_PER_TURN: u32 = 36_000;
pub const MIN_ELEVATION_FIELD: u32 = 0;
pub const MAX_ELEVATION_FIELD: u32 = 180;

// GS-232 field widths
pub const ANGLE_FIELD_WIDTH: usize = 3;
pub const SPEED_FIELD_WIDTH: usize = 2;
pub const LIMIT_FIELD_WIDTH: usize = 4;
pub const MAX_LINE_LEN: usize = 64;

/// Slack used when comparing tracked rotation against a limit.
pub const LIMIT_EPSILON: f64 = 1e-6;

/// Longest pan displacement a set-position frame executes unambiguously.
pub const SET_POSITION_REACH: f64 = 180.0;
/// Distance short of a sweep target where the jog hands over to a
/// set-position frame.
pub const SWEEP_HANDOFF: f64 = 90.0;
