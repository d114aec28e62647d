use std::fmt;

use strum_macros::{Display, EnumIter};

use crate::calibration::TurnLimit;

#[derive(Debug, EnumIter, Display, Clone, Copy, Eq, PartialEq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum Axis {
    Pan,  // azimuth, continuous rotation
    Tilt, // elevation, mechanically bounded
}

#[derive(Debug, EnumIter, Display, Clone, Copy, Eq, PartialEq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    Positive, // clockwise / up
    Negative, // counter-clockwise / down
}

impl Direction {
    pub fn of(value: f64) -> Option<Direction> {
        if value > 0.0 {
            Some(Direction::Positive)
        } else if value < 0.0 {
            Some(Direction::Negative)
        } else {
            None
        }
    }

    pub fn sign(self) -> f64 {
        match self {
            Direction::Positive => 1.0,
            Direction::Negative => -1.0,
        }
    }
}

/// A parsed GS-232 command.
///
/// `azimuth` in `MoveTo` is the bearing exactly as written on the wire; the
/// wrap guard resolves it against the tracked rotation. Continuous rates are
/// signed Pelco speed units (positive = right/up).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Request {
    MoveTo {
        azimuth: Option<f64>,
        elevation: Option<f64>,
        speed: u8,
    },
    MoveContinuous {
        azimuth_rate: i16,
        elevation_rate: i16,
    },
    Stop,
    QueryPosition,
    SetLimits(TurnLimit),
}

/// Motion the guard has agreed to, expressed in tracked coordinates.
///
/// `Slew::azimuth` is a cumulative target in degrees from the power-on
/// reference, not a bearing, and is always less than half a turn away so a
/// set-position frame reaches it. Longer moves are a `Sweep`: a pan jog at
/// `pan` speed units that the guard hands over to a `Slew` near `target`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Motion {
    Slew {
        azimuth: Option<f64>,
        elevation: Option<f64>,
        speed: u8,
    },
    Sweep {
        target: f64,
        pan: i16,
        elevation: Option<f64>,
    },
    Jog {
        pan: i16,
        tilt: i16,
    },
    Stop,
    Hold,
}

impl fmt::Display for Motion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Motion::Slew {
                azimuth, elevation, ..
            } => {
                write!(f, "slew")?;
                if let Some(azimuth) = azimuth {
                    write!(f, " az {:.1}°", azimuth)?;
                }
                if let Some(elevation) = elevation {
                    write!(f, " el {:.1}°", elevation)?;
                }
                if azimuth.is_none() && elevation.is_none() {
                    write!(f, " (nothing)")?;
                }
                Ok(())
            }
            Motion::Sweep {
                target, elevation, ..
            } => {
                write!(f, "sweep az {:.1}°", target)?;
                if let Some(elevation) = elevation {
                    write!(f, " el {:.1}°", elevation)?;
                }
                Ok(())
            }
            Motion::Jog { pan, tilt } => write!(f, "jog pan {:+} tilt {:+}", pan, tilt),
            Motion::Stop => write!(f, "stop"),
            Motion::Hold => write!(f, "hold"),
        }
    }
}

/// Protocol-neutral instruction handed to a mount codec.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MountCommand {
    PanTo(f64),
    TiltTo(f64),
    Jog { pan: i16, tilt: i16 },
    Stop,
    Query(Axis),
}

impl Motion {
    /// Expands an accepted motion into the mount commands that execute it.
    pub fn mount_commands(&self) -> Vec<MountCommand> {
        match *self {
            Motion::Slew {
                azimuth, elevation, ..
            } => {
                let mut commands = Vec::with_capacity(2);
                if let Some(target) = azimuth {
                    commands.push(MountCommand::PanTo(bearing(target)));
                }
                if let Some(elevation) = elevation {
                    commands.push(MountCommand::TiltTo(elevation));
                }
                commands
            }
            // elevation follows at the handover
            Motion::Sweep { pan, .. } => vec![MountCommand::Jog { pan, tilt: 0 }],
            Motion::Jog { pan, tilt } => vec![MountCommand::Jog { pan, tilt }],
            Motion::Stop => vec![MountCommand::Stop],
            Motion::Hold => Vec::new(),
        }
    }
}

/// Decoded inbound mount frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MountReply {
    Position { axis: Axis, degrees: f64 },
    Other { command: u8 },
}

/// Folds a cumulative angle into a 0..360 bearing.
pub(crate) fn bearing(cumulative: f64) -> f64 {
    use crate::constants::DEGREES_PER_TURN;
    cumulative.rem_euclid(DEGREES_PER_TURN)
}
