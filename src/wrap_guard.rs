//! Anti-cable-wrap guard.
//!
//! The guard owns the tracked azimuth rotation and is the only writer of it.
//! Every motion request is evaluated against the configured [`TurnLimit`]
//! before it reaches the mount, and the tracked state is advanced by what was
//! actually commanded, never by what was asked for.
//!
//! Continuous (jog) motion has no end point, so it is integrated over time
//! from the configured degrees-per-second of each speed unit. The controller
//! asks [`WrapGuard::time_to_settle`] when the running jog needs attention
//! and settles it at that moment.
//!
//! A set-position frame only moves the mount the short way round, so a
//! target half a turn or more away is swept with a pan jog and handed over
//! to a set-position frame once it is [`SWEEP_HANDOFF`] degrees short.

use std::fmt;

use thiserror::Error;
use tokio::time::{Duration, Instant};

use crate::calibration::{Recalibration, TurnLimit, WrapState};
use crate::constants::{DEGREES_PER_TURN, LIMIT_EPSILON, SET_POSITION_REACH, SWEEP_HANDOFF};
use crate::types::{bearing, Direction, Motion, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    LimitReached(Direction),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::LimitReached(direction) => {
                write!(f, "{} azimuth limit reached", direction)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Allow(Motion),
    Clamp { requested: Motion, adjusted: Motion },
    Reject(RejectReason),
}

impl Decision {
    /// The motion to execute, if any.
    pub fn motion(&self) -> Option<Motion> {
        match *self {
            Decision::Allow(motion) => Some(motion),
            Decision::Clamp { adjusted, .. } => Some(adjusted),
            Decision::Reject(_) => None,
        }
    }
}

/// Why a running jog ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JogEnd {
    /// The jog hit a turn limit; the mount must be stopped.
    Limit(Direction),
    /// A sweep got close to its target; the mount must be stopped and sent
    /// this slew, which is already within set-position reach.
    Handoff(Motion),
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum GuardError {
    #[error("invalid turn limits {0:?}")]
    InvalidLimits(TurnLimit),
    #[error("invalid recalibration {0:?}")]
    InvalidRecalibration(Recalibration),
}

/// Degrees per second travelled for each Pelco speed unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JogRates {
    pub pan_deg_per_sec: f64,
    pub tilt_deg_per_sec: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElevationRange {
    pub min: f64,
    pub max: f64,
}

impl ElevationRange {
    fn clamp(&self, elevation: f64) -> f64 {
        elevation.max(self.min).min(self.max)
    }
}

#[derive(Debug, Clone, Copy)]
struct SweepTarget {
    target: f64,
    elevation: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
struct ActiveJog {
    pan: i16,
    tilt: i16,
    since: Instant,
    sweep: Option<SweepTarget>,
}

enum PanCheck {
    Within,
    Clamped(f64),
    Blocked(Direction),
}

pub struct WrapGuard {
    limits: TurnLimit,
    state: WrapState,
    elevation: f64,
    elevation_range: ElevationRange,
    rates: JogRates,
    jog: Option<ActiveJog>,
}

impl WrapGuard {
    pub fn new(limits: TurnLimit, elevation_range: ElevationRange, rates: JogRates) -> Self {
        WrapGuard {
            limits,
            state: WrapState::default(),
            elevation: elevation_range.clamp(0.0),
            elevation_range,
            rates,
            jog: None,
        }
    }

    pub fn state(&self) -> WrapState {
        self.state
    }

    pub fn elevation(&self) -> f64 {
        self.elevation
    }

    pub fn limits(&self) -> TurnLimit {
        self.limits
    }

    pub fn is_jogging(&self) -> bool {
        self.jog.is_some()
    }

    /// Decides whether `request` may run from the current tracked state.
    ///
    /// The caller is expected to [`advance`](Self::advance) the guard to the
    /// present first so a running jog is accounted for.
    pub fn evaluate(&self, request: &Request) -> Decision {
        match *request {
            Request::MoveTo {
                azimuth,
                elevation,
                speed,
            } => self.evaluate_slew(azimuth, elevation, speed),
            Request::MoveContinuous {
                azimuth_rate,
                elevation_rate,
            } => self.evaluate_jog(azimuth_rate, elevation_rate),
            Request::Stop => Decision::Allow(Motion::Stop),
            Request::QueryPosition | Request::SetLimits(_) => Decision::Allow(Motion::Hold),
        }
    }

    /// Records a motion that has been sent to the mount.
    pub fn commit(&mut self, motion: &Motion, now: Instant) {
        self.integrate(now);
        match *motion {
            Motion::Slew {
                azimuth, elevation, ..
            } => {
                self.jog = None;
                if let Some(target) = azimuth {
                    self.state = WrapState::from_degrees(target);
                }
                if let Some(elevation) = elevation {
                    self.elevation = elevation;
                }
            }
            Motion::Sweep {
                target,
                pan,
                elevation,
            } => {
                self.jog = Some(ActiveJog {
                    pan,
                    tilt: 0,
                    since: now,
                    sweep: Some(SweepTarget { target, elevation }),
                });
            }
            Motion::Jog { pan, tilt } => {
                self.jog = (pan != 0 || tilt != 0).then_some(ActiveJog {
                    pan,
                    tilt,
                    since: now,
                    sweep: None,
                });
            }
            Motion::Stop => self.jog = None,
            Motion::Hold => {}
        }
    }

    /// Integrates a running jog up to `now`.
    ///
    /// Returns why the jog ended, if it did; the caller must stop the mount
    /// and, for a handoff, send and commit the returned slew.
    pub fn advance(&mut self, now: Instant) -> Option<JogEnd> {
        self.integrate(now)
    }

    /// Time left before the running jog must be settled, either at a turn
    /// limit or at a sweep handoff.
    pub fn time_to_settle(&self, now: Instant) -> Option<Duration> {
        let jog = self.jog?;
        let direction = Direction::of(jog.pan as f64)?;
        let rate = jog.pan.unsigned_abs() as f64 * self.rates.pan_deg_per_sec;
        if rate <= 0.0 {
            return None;
        }

        let travelled = rate * now.saturating_duration_since(jog.since).as_secs_f64();
        let (room, _, _) = self.room(&jog, direction);
        Duration::try_from_secs_f64((room - travelled).max(0.0) / rate).ok()
    }

    /// Overwrites the tracked state. Non-finite headings are refused and the
    /// current state is kept.
    pub fn recalibrate(&mut self, recalibration: Recalibration) -> Result<(), GuardError> {
        if !recalibration.is_valid() {
            return Err(GuardError::InvalidRecalibration(recalibration));
        }
        self.state = recalibration.into_state();
        Ok(())
    }

    pub fn set_limits(&mut self, limits: TurnLimit) -> Result<(), GuardError> {
        if !limits.is_valid() {
            return Err(GuardError::InvalidLimits(limits));
        }
        self.limits = limits;
        Ok(())
    }

    fn evaluate_slew(&self, azimuth: Option<f64>, elevation: Option<f64>, speed: u8) -> Decision {
        let requested_azimuth = azimuth.map(|value| self.resolve_target(value));

        let mut blocked = None;
        let adjusted_azimuth = match requested_azimuth {
            Some(target) => match self.check_pan(target) {
                PanCheck::Within => Some(target),
                PanCheck::Clamped(bound) => Some(bound),
                PanCheck::Blocked(direction) => {
                    blocked = Some(direction);
                    None
                }
            },
            None => None,
        };
        let adjusted_elevation = elevation.map(|value| self.elevation_range.clamp(value));

        if let (Some(direction), None) = (blocked, adjusted_elevation) {
            return Decision::Reject(RejectReason::LimitReached(direction));
        }

        let adjusted = self.plan(adjusted_azimuth, adjusted_elevation, speed);
        if adjusted_azimuth == requested_azimuth && adjusted_elevation == elevation {
            Decision::Allow(adjusted)
        } else {
            Decision::Clamp {
                requested: self.plan(requested_azimuth, elevation, speed),
                adjusted,
            }
        }
    }

    /// Chooses between a set-position slew and a sweep for a cumulative
    /// azimuth target.
    fn plan(&self, azimuth: Option<f64>, elevation: Option<f64>, speed: u8) -> Motion {
        let Some(target) = azimuth else {
            return Motion::Slew {
                azimuth: None,
                elevation,
                speed,
            };
        };

        let delta = target - self.state.cumulative_degrees();
        if delta.abs() < SET_POSITION_REACH - LIMIT_EPSILON {
            return Motion::Slew {
                azimuth: Some(target),
                elevation,
                speed,
            };
        }

        let pan = speed.max(1) as i16;
        Motion::Sweep {
            target,
            pan: if delta > 0.0 { pan } else { -pan },
            elevation,
        }
    }

    fn evaluate_jog(&self, pan: i16, tilt: i16) -> Decision {
        let requested = Motion::Jog { pan, tilt };
        let blocked = Direction::of(pan as f64)
            .filter(|direction| self.headroom(*direction) <= LIMIT_EPSILON);

        match blocked {
            None => Decision::Allow(requested),
            Some(direction) if tilt == 0 => {
                Decision::Reject(RejectReason::LimitReached(direction))
            }
            Some(_) => Decision::Clamp {
                requested,
                adjusted: Motion::Jog { pan: 0, tilt },
            },
        }
    }

    /// Turns a wire bearing into a cumulative target.
    ///
    /// Values of 360 and above are GS-232 overlap positions and are taken as
    /// absolute cumulative degrees. Smaller bearings take the shortest way
    /// from the current heading; a half-turn tie unwinds toward zero.
    fn resolve_target(&self, value: f64) -> f64 {
        if value >= DEGREES_PER_TURN {
            return value;
        }

        let current = self.state.cumulative_degrees();
        let heading = self.state.heading();
        let half = DEGREES_PER_TURN / 2.0;
        let mut delta = bearing(value - heading);
        if delta > half {
            delta -= DEGREES_PER_TURN;
        }
        if (delta.abs() - half).abs() < LIMIT_EPSILON {
            delta = if current > 0.0 { -half } else { half };
        }
        current + delta
    }

    fn check_pan(&self, target: f64) -> PanCheck {
        let delta = target - self.state.cumulative_degrees();
        let Some(direction) = Direction::of(delta) else {
            return PanCheck::Within;
        };

        let headroom = self.headroom(direction);
        if headroom <= LIMIT_EPSILON {
            PanCheck::Blocked(direction)
        } else if delta.abs() > headroom {
            PanCheck::Clamped(self.limits.bound(direction))
        } else {
            PanCheck::Within
        }
    }

    /// Degrees left before the limit in `direction`; negative after a
    /// recalibration placed the mount beyond it.
    fn headroom(&self, direction: Direction) -> f64 {
        (self.limits.bound(direction) - self.state.cumulative_degrees()) * direction.sign()
    }

    /// Distance the jog may still travel, where it ends and why.
    fn room(&self, jog: &ActiveJog, direction: Direction) -> (f64, f64, JogEnd) {
        let limit = (
            self.headroom(direction),
            self.limits.bound(direction),
            JogEnd::Limit(direction),
        );
        let Some(sweep) = jog.sweep else {
            return limit;
        };

        let handoff = sweep.target - direction.sign() * SWEEP_HANDOFF;
        let to_handoff = (handoff - self.state.cumulative_degrees()) * direction.sign();
        if to_handoff >= limit.0 {
            return limit;
        }
        let slew = Motion::Slew {
            azimuth: Some(sweep.target),
            elevation: sweep.elevation,
            speed: jog.pan.unsigned_abs().min(u8::MAX as u16) as u8,
        };
        (to_handoff, handoff, JogEnd::Handoff(slew))
    }

    fn integrate(&mut self, now: Instant) -> Option<JogEnd> {
        let jog = self.jog?;
        let elapsed = now.saturating_duration_since(jog.since).as_secs_f64();
        let mut end = None;

        if let Some(direction) = Direction::of(jog.pan as f64) {
            let travel = jog.pan.unsigned_abs() as f64 * self.rates.pan_deg_per_sec * elapsed;
            let (room, stop_at, reason) = self.room(&jog, direction);
            if travel >= room - LIMIT_EPSILON {
                if room > 0.0 {
                    self.state = WrapState::from_degrees(stop_at);
                }
                end = Some(reason);
            } else {
                let cumulative = self.state.cumulative_degrees() + direction.sign() * travel;
                self.state = WrapState::from_degrees(cumulative);
            }
        }

        if jog.tilt != 0 {
            let travel = jog.tilt as f64 * self.rates.tilt_deg_per_sec * elapsed;
            self.elevation = self.elevation_range.clamp(self.elevation + travel);
        }

        self.jog = match end {
            Some(_) => None,
            None => Some(ActiveJog { since: now, ..jog }),
        };
        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MountCommand;

    fn guard(turns: u32) -> WrapGuard {
        WrapGuard::new(
            TurnLimit::symmetric(turns),
            ElevationRange { min: 0.0, max: 90.0 },
            JogRates {
                pan_deg_per_sec: 1.0,
                tilt_deg_per_sec: 1.0,
            },
        )
    }

    fn move_az(azimuth: f64) -> Request {
        Request::MoveTo {
            azimuth: Some(azimuth),
            elevation: None,
            speed: 0x20,
        }
    }

    /// Evaluates and commits `request`, letting any sweep run to its handoff.
    fn apply(guard: &mut WrapGuard, request: Request) -> Decision {
        let now = Instant::now();
        let decision = guard.evaluate(&request);
        if let Some(motion) = decision.motion() {
            guard.commit(&motion, now);
            if let Motion::Sweep { .. } = motion {
                let later = now + Duration::from_secs(3600);
                match guard.advance(later) {
                    Some(JogEnd::Handoff(slew)) => guard.commit(&slew, later),
                    other => panic!("sweep ended with {:?}", other),
                }
            }
        }
        decision
    }

    fn target(decision: &Decision) -> Option<f64> {
        match decision.motion() {
            Some(Motion::Slew { azimuth, .. }) => azimuth,
            Some(Motion::Sweep { target, .. }) => Some(target),
            _ => None,
        }
    }

    #[test]
    fn exact_limit_is_allowed() {
        let mut guard = guard(2);
        let decision = apply(&mut guard, move_az(720.0));
        assert!(matches!(decision, Decision::Allow(_)));
        assert_eq!(guard.state().cumulative_degrees(), 720.0);
    }

    #[test]
    fn one_degree_past_the_limit_is_clamped() {
        let mut guard = guard(2);
        let decision = apply(&mut guard, move_az(721.0));
        assert!(matches!(decision, Decision::Clamp { .. }));
        assert_eq!(target(&decision), Some(720.0));
        assert_eq!(guard.state().cumulative_degrees(), 720.0);
    }

    #[test]
    fn further_motion_at_the_limit_is_rejected() {
        let mut guard = guard(2);
        apply(&mut guard, move_az(800.0));
        let decision = apply(&mut guard, move_az(10.0));
        assert_eq!(
            decision,
            Decision::Reject(RejectReason::LimitReached(Direction::Positive))
        );
        assert_eq!(guard.state().cumulative_degrees(), 720.0);
    }

    #[test]
    fn motion_back_from_the_limit_is_allowed() {
        let mut guard = guard(2);
        apply(&mut guard, move_az(720.0));
        let decision = apply(&mut guard, move_az(350.0));
        assert!(matches!(decision, Decision::Allow(Motion::Slew { .. })));
        assert_eq!(guard.state().cumulative_degrees(), 710.0);
    }

    #[test]
    fn short_bearings_take_the_shortest_path() {
        let mut guard = guard(2);
        apply(&mut guard, move_az(350.0));
        assert_eq!(guard.state().cumulative_degrees(), -10.0);

        apply(&mut guard, move_az(20.0));
        assert_eq!(guard.state().cumulative_degrees(), 20.0);
    }

    #[test]
    fn half_turn_tie_unwinds() {
        let mut guard = guard(2);
        apply(&mut guard, move_az(90.0));
        let decision = apply(&mut guard, move_az(270.0));
        assert!(matches!(
            decision.motion(),
            Some(Motion::Sweep { pan, .. }) if pan < 0
        ));
        assert_eq!(guard.state().cumulative_degrees(), -90.0);
    }

    #[test]
    fn repeated_overlap_position_stays_put() {
        let mut guard = guard(3);
        apply(&mut guard, move_az(450.0));
        assert_eq!(guard.state().cumulative_degrees(), 450.0);

        for _ in 0..2 {
            let decision = apply(&mut guard, move_az(450.0));
            let motion = decision.motion().expect("allowed");
            assert_eq!(motion.mount_commands(), vec![MountCommand::PanTo(90.0)]);
            assert_eq!(guard.state().cumulative_degrees(), 450.0);
        }
    }

    #[test]
    fn long_moves_sweep_then_hand_off() {
        let mut guard = guard(2);
        let start = Instant::now();

        let motion = guard.evaluate(&move_az(720.0)).motion().expect("allowed");
        assert_eq!(
            motion,
            Motion::Sweep {
                target: 720.0,
                pan: 0x20,
                elevation: None
            }
        );
        assert_eq!(
            motion.mount_commands(),
            vec![MountCommand::Jog { pan: 0x20, tilt: 0 }]
        );
        guard.commit(&motion, start);

        // 630° at 32°/s before the handoff point
        let due = guard.time_to_settle(start).expect("deadline");
        assert!((due.as_secs_f64() - 630.0 / 32.0).abs() < 1e-6);
        assert_eq!(guard.advance(start + Duration::from_secs(10)), None);
        assert_eq!(guard.state().cumulative_degrees(), 320.0);

        let end = guard.advance(start + Duration::from_secs(30));
        assert_eq!(
            end,
            Some(JogEnd::Handoff(Motion::Slew {
                azimuth: Some(720.0),
                elevation: None,
                speed: 0x20
            }))
        );
        assert_eq!(guard.state().cumulative_degrees(), 630.0);
        assert!(!guard.is_jogging());
    }

    #[test]
    fn blocked_azimuth_keeps_elevation() {
        let mut guard = guard(1);
        apply(&mut guard, move_az(360.0));

        let decision = apply(
            &mut guard,
            Request::MoveTo {
                azimuth: Some(30.0),
                elevation: Some(45.0),
                speed: 0x20,
            },
        );
        match decision {
            Decision::Clamp { adjusted, .. } => assert_eq!(
                adjusted,
                Motion::Slew {
                    azimuth: None,
                    elevation: Some(45.0),
                    speed: 0x20
                }
            ),
            other => panic!("expected clamp, got {:?}", other),
        }
        assert_eq!(guard.elevation(), 45.0);
        assert_eq!(guard.state().cumulative_degrees(), 360.0);
    }

    #[test]
    fn elevation_is_clamped_to_range() {
        let guard = guard(1);
        let decision = guard.evaluate(&Request::MoveTo {
            azimuth: None,
            elevation: Some(120.0),
            speed: 0x20,
        });
        assert!(matches!(
            decision.motion(),
            Some(Motion::Slew {
                elevation: Some(e),
                ..
            }) if e == 90.0
        ));
    }

    #[test]
    fn recalibration_overrides_drift() {
        let mut guard = guard(2);
        apply(&mut guard, move_az(500.0));
        apply(&mut guard, move_az(100.0));
        assert_eq!(guard.state().cumulative_degrees(), 460.0);
        guard.recalibrate(Recalibration::new(15.0, -1)).unwrap();
        assert_eq!(guard.state(), WrapState { turns: -1, offset_deg: 15.0 });
        assert_eq!(guard.state().cumulative_degrees(), -345.0);
    }

    #[test]
    fn recalibrated_beyond_limit_only_moves_back() {
        let mut guard = guard(1);
        guard.recalibrate(Recalibration::new(90.0, 1)).unwrap();

        let decision = apply(&mut guard, move_az(100.0));
        assert!(matches!(
            decision,
            Decision::Reject(RejectReason::LimitReached(Direction::Positive))
        ));

        let decision = apply(&mut guard, move_az(80.0));
        assert!(matches!(decision, Decision::Allow(_)));
        assert_eq!(guard.state().cumulative_degrees(), 440.0);
    }

    #[test]
    fn non_finite_limits_are_refused() {
        let mut guard = guard(1);
        let bad = TurnLimit::from_degrees(f64::NAN, f64::NAN);
        assert!(matches!(
            guard.set_limits(bad),
            Err(GuardError::InvalidLimits(_))
        ));
        assert!(guard.set_limits(TurnLimit::from_degrees(1e30, 10.0)).is_err());
        assert_eq!(guard.limits(), TurnLimit::symmetric(1));

        for _ in 0..5 {
            apply(&mut guard, move_az(449.0));
        }
        assert_eq!(guard.state().cumulative_degrees(), 360.0);
    }

    #[test]
    fn non_finite_recalibration_is_refused() {
        let mut guard = guard(1);
        apply(&mut guard, move_az(40.0));
        assert!(guard.recalibrate(Recalibration::new(f64::NAN, 0)).is_err());
        assert_eq!(guard.state().cumulative_degrees(), 40.0);
    }

    #[test]
    fn jog_integrates_and_stops_at_the_limit() {
        let mut guard = guard(1);
        let start = Instant::now();

        let decision = guard.evaluate(&Request::MoveContinuous {
            azimuth_rate: 10,
            elevation_rate: 0,
        });
        let motion = decision.motion().expect("jog allowed");
        guard.commit(&motion, start);

        assert_eq!(guard.time_to_settle(start), Some(Duration::from_secs(36)));
        assert_eq!(guard.advance(start + Duration::from_secs(6)), None);
        assert_eq!(guard.state().cumulative_degrees(), 60.0);
        assert_eq!(
            guard.time_to_settle(start + Duration::from_secs(6)),
            Some(Duration::from_secs(30))
        );

        let end = guard.advance(start + Duration::from_secs(100));
        assert_eq!(end, Some(JogEnd::Limit(Direction::Positive)));
        assert_eq!(guard.state().cumulative_degrees(), 360.0);
        assert!(!guard.is_jogging());
    }

    #[test]
    fn jog_into_a_reached_limit() {
        let mut guard = guard(1);
        guard.recalibrate(Recalibration::new(0.0, -1)).unwrap();

        let pan_only = guard.evaluate(&Request::MoveContinuous {
            azimuth_rate: -5,
            elevation_rate: 0,
        });
        assert_eq!(
            pan_only,
            Decision::Reject(RejectReason::LimitReached(Direction::Negative))
        );

        let with_tilt = guard.evaluate(&Request::MoveContinuous {
            azimuth_rate: -5,
            elevation_rate: 3,
        });
        assert_eq!(with_tilt.motion(), Some(Motion::Jog { pan: 0, tilt: 3 }));
    }

    #[test]
    fn stop_settles_the_jog() {
        let mut guard = guard(1);
        let start = Instant::now();
        guard.commit(&Motion::Jog { pan: -2, tilt: 5 }, start);
        guard.commit(&Motion::Stop, start + Duration::from_secs(10));

        assert!(!guard.is_jogging());
        assert_eq!(guard.state().cumulative_degrees(), -20.0);
        assert_eq!(guard.elevation(), 50.0);
        assert_eq!(guard.time_to_settle(start + Duration::from_secs(20)), None);
    }
}
