//! Pelco-D framing.
//!
//! Every frame is seven bytes: sync `0xFF`, address, command1, command2,
//! data1, data2 and a checksum that is the 8-bit sum of bytes 2..6.

use thiserror::Error;

use crate::config::{AngleCorrection, MountConfig, MountProtocol};
use crate::constants::*;
use crate::types::{Axis, MountCommand, MountReply};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: {0} of 7 bytes")]
    Short(usize),
    #[error("bad sync byte {0:#04x}")]
    BadSync(u8),
    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    Checksum { expected: u8, actual: u8 },
    #[error("discarded {0} bytes of line noise")]
    Noise(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PelcoFrame {
    pub address: u8,
    pub command1: u8,
    pub command2: u8,
    pub data1: u8,
    pub data2: u8,
}

impl PelcoFrame {
    pub fn new(address: u8, command1: u8, command2: u8, data1: u8, data2: u8) -> Self {
        PelcoFrame {
            address,
            command1,
            command2,
            data1,
            data2,
        }
    }

    /// Frame carrying a 16-bit big-endian value in data1:data2.
    pub fn with_value(address: u8, command2: u8, value: u16) -> Self {
        let [data1, data2] = value.to_be_bytes();
        PelcoFrame::new(address, 0x00, command2, data1, data2)
    }

    pub fn value(&self) -> u16 {
        u16::from_be_bytes([self.data1, self.data2])
    }

    pub fn checksum(&self) -> u8 {
        self.address
            .wrapping_add(self.command1)
            .wrapping_add(self.command2)
            .wrapping_add(self.data1)
            .wrapping_add(self.data2)
    }

    pub fn to_bytes(&self) -> [u8; FRAME_LEN] {
        [
            SYNC_BYTE,
            self.address,
            self.command1,
            self.command2,
            self.data1,
            self.data2,
            self.checksum(),
        ]
    }

    /// Validates and decodes the first seven bytes of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < FRAME_LEN {
            return Err(FrameError::Short(bytes.len()));
        }
        if bytes[0] != SYNC_BYTE {
            return Err(FrameError::BadSync(bytes[0]));
        }

        let frame = PelcoFrame::new(bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]);
        let expected = frame.checksum();
        if bytes[6] != expected {
            return Err(FrameError::Checksum {
                expected,
                actual: bytes[6],
            });
        }
        Ok(frame)
    }
}

/// Protocol spoken to the mount. Selected once from configuration.
pub trait MountCodec: Send {
    fn name(&self) -> &'static str;

    fn encode(&self, command: &MountCommand) -> Vec<u8>;

    /// Feeds received bytes; returns every frame completed by them.
    fn decode(&mut self, bytes: &[u8]) -> Vec<Result<MountReply, FrameError>>;
}

pub fn codec_for(mount: &MountConfig, angles: &AngleCorrection) -> Box<dyn MountCodec> {
    match mount.protocol {
        MountProtocol::PelcoD => Box::new(PelcoCodec::new(mount.address, *angles)),
    }
}

pub struct PelcoCodec {
    address: u8,
    angles: AngleCorrection,
    pending: Vec<u8>,
}

impl PelcoCodec {
    pub fn new(address: u8, angles: AngleCorrection) -> Self {
        PelcoCodec {
            address,
            angles,
            pending: Vec::with_capacity(FRAME_LEN * 4),
        }
    }

    pub fn frame(&self, command: &MountCommand) -> PelcoFrame {
        let address = self.address;
        match *command {
            MountCommand::PanTo(bearing) => {
                let raw = bearing - self.angles.azimuth_offset - self.angles.initial_azimuth;
                PelcoFrame::with_value(address, CMD_SET_PAN_POSITION, hundredths(raw))
            }
            MountCommand::TiltTo(elevation) => {
                let raw = elevation - self.angles.elevation_offset;
                PelcoFrame::with_value(address, CMD_SET_TILT_POSITION, hundredths(raw))
            }
            MountCommand::Jog { pan, tilt } => {
                let mut command2 = 0x00;
                if pan > 0 {
                    command2 |= CMD_PAN_RIGHT;
                } else if pan < 0 {
                    command2 |= CMD_PAN_LEFT;
                }
                if tilt > 0 {
                    command2 |= CMD_TILT_UP;
                } else if tilt < 0 {
                    command2 |= CMD_TILT_DOWN;
                }
                PelcoFrame::new(address, 0x00, command2, speed_byte(pan), speed_byte(tilt))
            }
            MountCommand::Stop => PelcoFrame::new(address, 0x00, 0x00, 0x00, 0x00),
            MountCommand::Query(Axis::Pan) => PelcoFrame::new(address, 0x00, CMD_QUERY_PAN, 0, 0),
            MountCommand::Query(Axis::Tilt) => {
                PelcoFrame::new(address, 0x00, CMD_QUERY_TILT, 0, 0)
            }
        }
    }

    fn reply(&self, frame: &PelcoFrame) -> MountReply {
        let degrees = frame.value() as f64 / 100.0;
        match frame.command2 {
            CMD_PAN_RESPONSE => MountReply::Position {
                axis: Axis::Pan,
                degrees: (degrees + self.angles.azimuth_offset + self.angles.initial_azimuth)
                    .rem_euclid(DEGREES_PER_TURN),
            },
            CMD_TILT_RESPONSE => {
                let mut elevation =
                    (degrees + self.angles.elevation_offset).rem_euclid(DEGREES_PER_TURN);
                if elevation > DEGREES_PER_TURN / 2.0 {
                    elevation -= DEGREES_PER_TURN;
                }
                MountReply::Position {
                    axis: Axis::Tilt,
                    degrees: elevation,
                }
            }
            command => MountReply::Other { command },
        }
    }
}

impl MountCodec for PelcoCodec {
    fn name(&self) -> &'static str {
        "pelco-d"
    }

    fn encode(&self, command: &MountCommand) -> Vec<u8> {
        self.frame(command).to_bytes().to_vec()
    }

    fn decode(&mut self, bytes: &[u8]) -> Vec<Result<MountReply, FrameError>> {
        self.pending.extend_from_slice(bytes);
        let mut out = Vec::new();

        loop {
            let noise = self
                .pending
                .iter()
                .position(|&b| b == SYNC_BYTE)
                .unwrap_or(self.pending.len());
            if noise > 0 {
                self.pending.drain(..noise);
                out.push(Err(FrameError::Noise(noise)));
            }
            if self.pending.len() < FRAME_LEN {
                break;
            }

            let decoded = PelcoFrame::decode(&self.pending[..FRAME_LEN]);
            self.pending.drain(..FRAME_LEN);
            out.push(decoded.map(|frame| self.reply(&frame)));
        }
        out
    }
}

fn hundredths(degrees: f64) -> u16 {
    ((degrees.rem_euclid(DEGREES_PER_TURN) * 100.0).round() as u32 % HUNDREDTHS_PER_TURN) as u16
}

fn speed_byte(rate: i16) -> u8 {
    rate.unsigned_abs().min(MAX_SPEED as u16) as u8
}
