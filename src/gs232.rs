//! GS-232 command line parsing.
//!
//! Lines look like `AZ180`, `EL 45`, `W090 030`, `RT 20`, `ST` or `C2`.
//! Verbs are case-insensitive; numeric fields are plain decimal digits no
//! wider than the field allows. Anything else is a [`ParseError`], never a
//! silent zero.

use thiserror::Error;

use crate::calibration::TurnLimit;
use crate::constants::{
    ANGLE_FIELD_WIDTH, DEFAULT_SPEED, LIMIT_FIELD_WIDTH, MAX_ELEVATION_FIELD, MAX_LINE_LEN,
    MAX_SPEED, MIN_ELEVATION_FIELD, SPEED_FIELD_WIDTH,
};
use crate::types::Request;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command line")]
    Empty,
    #[error("unknown verb in {0:?}")]
    UnknownVerb(String),
    #[error("{verb}: missing {field} field")]
    MissingField { verb: &'static str, field: &'static str },
    #[error("{verb}: malformed {field} field {text:?}")]
    MalformedField {
        verb: &'static str,
        field: &'static str,
        text: String,
    },
    #[error("{verb}: {field} field {text:?} is wider than {width} digits")]
    FieldWidth {
        verb: &'static str,
        field: &'static str,
        text: String,
        width: usize,
    },
    #[error("{verb}: {field} {value} outside {min}..={max}")]
    OutOfRange {
        verb: &'static str,
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
    #[error("{verb}: unexpected trailing input {text:?}")]
    Trailing { verb: &'static str, text: String },
}

/// Speeds used when a continuous-motion verb carries no speed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeedDefaults {
    pub pan: u8,
    pub tilt: u8,
}

impl Default for SpeedDefaults {
    fn default() -> Self {
        SpeedDefaults {
            pan: DEFAULT_SPEED,
            tilt: DEFAULT_SPEED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Azimuth,
    Elevation,
    Both,
    Left,
    Right,
    Up,
    Down,
    Stop,
    Query,
    Limits,
}

// Longest first so that `ST` wins over `S`.
const VERBS: &[(&str, Verb)] = &[
    ("AZ", Verb::Azimuth),
    ("EL", Verb::Elevation),
    ("LT", Verb::Left),
    ("RT", Verb::Right),
    ("UP", Verb::Up),
    ("DN", Verb::Down),
    ("ST", Verb::Stop),
    ("C2", Verb::Query),
    ("LM", Verb::Limits),
    ("W", Verb::Both),
    ("S", Verb::Stop),
];

struct Fields<'a> {
    verb: &'static str,
    tokens: std::str::SplitWhitespace<'a>,
}

impl<'a> Fields<'a> {
    fn required(
        &mut self,
        field: &'static str,
        width: usize,
        min: u32,
        max: u32,
    ) -> Result<u32, ParseError> {
        let text = self.tokens.next().ok_or(ParseError::MissingField {
            verb: self.verb,
            field,
        })?;
        self.number(text, field, width, min, max)
    }

    fn optional(
        &mut self,
        field: &'static str,
        width: usize,
        min: u32,
        max: u32,
    ) -> Result<Option<u32>, ParseError> {
        match self.tokens.next() {
            Some(text) => self.number(text, field, width, min, max).map(Some),
            None => Ok(None),
        }
    }

    fn number(
        &self,
        text: &str,
        field: &'static str,
        width: usize,
        min: u32,
        max: u32,
    ) -> Result<u32, ParseError> {
        if !text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::MalformedField {
                verb: self.verb,
                field,
                text: text.to_string(),
            });
        }
        if text.len() > width {
            return Err(ParseError::FieldWidth {
                verb: self.verb,
                field,
                text: text.to_string(),
                width,
            });
        }
        let value: u32 = text.parse().map_err(|_| ParseError::MalformedField {
            verb: self.verb,
            field,
            text: text.to_string(),
        })?;
        if !(min..=max).contains(&value) {
            return Err(ParseError::OutOfRange {
                verb: self.verb,
                field,
                value,
                min,
                max,
            });
        }
        Ok(value)
    }

    fn finish(mut self) -> Result<(), ParseError> {
        match self.tokens.next() {
            Some(text) => Err(ParseError::Trailing {
                verb: self.verb,
                text: text.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Parses one command line (without its delimiter) into a [`Request`].
pub fn parse_line(line: &str, defaults: &SpeedDefaults) -> Result<Request, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    let upper = line.to_ascii_uppercase();
    let (name, verb) = VERBS
        .iter()
        .find(|(name, _)| upper.starts_with(name))
        .copied()
        .ok_or_else(|| ParseError::UnknownVerb(line.to_string()))?;

    let rest = &upper[name.len()..];
    let mut fields = Fields {
        verb: name,
        tokens: rest.split_whitespace(),
    };
    let max_angle = 10u32.pow(ANGLE_FIELD_WIDTH as u32) - 1;
    let max_limit = 10u32.pow(LIMIT_FIELD_WIDTH as u32) - 1;
    let speed_max = MAX_SPEED as u32;

    let request = match verb {
        Verb::Azimuth => {
            let azimuth = fields.required("azimuth", ANGLE_FIELD_WIDTH, 0, max_angle)?;
            Request::MoveTo {
                azimuth: Some(azimuth as f64),
                elevation: None,
                speed: defaults.pan,
            }
        }
        Verb::Elevation => {
            let elevation = fields.required(
                "elevation",
                ANGLE_FIELD_WIDTH,
                MIN_ELEVATION_FIELD,
                MAX_ELEVATION_FIELD,
            )?;
            Request::MoveTo {
                azimuth: None,
                elevation: Some(elevation as f64),
                speed: defaults.tilt,
            }
        }
        Verb::Both => {
            let azimuth = fields.required("azimuth", ANGLE_FIELD_WIDTH, 0, max_angle)?;
            let elevation = fields.required(
                "elevation",
                ANGLE_FIELD_WIDTH,
                MIN_ELEVATION_FIELD,
                MAX_ELEVATION_FIELD,
            )?;
            Request::MoveTo {
                azimuth: Some(azimuth as f64),
                elevation: Some(elevation as f64),
                speed: defaults.pan,
            }
        }
        Verb::Left | Verb::Right => {
            let speed = fields
                .optional("speed", SPEED_FIELD_WIDTH, 0, speed_max)?
                .unwrap_or(defaults.pan as u32) as i16;
            Request::MoveContinuous {
                azimuth_rate: if verb == Verb::Right { speed } else { -speed },
                elevation_rate: 0,
            }
        }
        Verb::Up | Verb::Down => {
            let speed = fields
                .optional("speed", SPEED_FIELD_WIDTH, 0, speed_max)?
                .unwrap_or(defaults.tilt as u32) as i16;
            Request::MoveContinuous {
                azimuth_rate: 0,
                elevation_rate: if verb == Verb::Up { speed } else { -speed },
            }
        }
        Verb::Stop => Request::Stop,
        Verb::Query => Request::QueryPosition,
        Verb::Limits => {
            let negative = fields.required("negative limit", LIMIT_FIELD_WIDTH, 0, max_limit)?;
            let positive = fields.required("positive limit", LIMIT_FIELD_WIDTH, 0, max_limit)?;
            Request::SetLimits(TurnLimit::from_degrees(negative as f64, positive as f64))
        }
    };

    fields.finish()?;
    Ok(request)
}

/// C2 reply, e.g. `AZ=045 EL=030\r\n`.
pub fn format_position(azimuth: f64, elevation: f64) -> String {
    format!(
        "AZ={:03} EL={:03}\r\n",
        azimuth.floor() as i32,
        elevation.floor() as i32
    )
}

/// Splits a byte stream into command lines on CR and/or LF.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buffer: Vec<u8>,
    overflowed: bool,
}

/// One item produced by [`LineAssembler::push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Complete(String),
    /// A line longer than the maximum was dropped; holds its first bytes.
    Overlong(String),
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<Line> {
        let mut lines = Vec::new();
        for &byte in bytes {
            match byte {
                b'\r' | b'\n' => {
                    if self.overflowed {
                        lines.push(Line::Overlong(self.take()));
                    } else if !self.buffer.is_empty() {
                        lines.push(Line::Complete(self.take()));
                    }
                    self.overflowed = false;
                }
                _ if self.buffer.len() >= MAX_LINE_LEN => self.overflowed = true,
                _ => self.buffer.push(byte),
            }
        }
        lines
    }

    fn take(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        line
    }
}
