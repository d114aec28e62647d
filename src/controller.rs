use std::sync::Arc;

use futures::future::OptionFuture;
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::debug;

use crate::calibration::{Recalibration, TurnLimit};
use crate::config::AppConfig;
use crate::error::ControllerError;
use crate::events::{ControllerState, EventSink};
use crate::gs232::{format_position, parse_line, Line, LineAssembler, SpeedDefaults};
use crate::pelco::{codec_for, MountCodec};
use crate::transport::{Received, Transport, TransportError};
use crate::types::{Axis, Direction, Motion, MountCommand, MountReply, Request};
use crate::wrap_guard::{Decision, JogEnd, WrapGuard};

/// Copy of the tracked position for readers outside the worker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSnapshot {
    pub turns: i32,
    pub heading_deg: f64,
    pub cumulative_deg: f64,
    pub elevation_deg: f64,
    pub jogging: bool,
    pub limits: TurnLimit,
}

impl PositionSnapshot {
    fn of(guard: &WrapGuard) -> Self {
        let state = guard.state();
        PositionSnapshot {
            turns: state.turns,
            heading_deg: state.heading(),
            cumulative_deg: state.cumulative_degrees(),
            elevation_deg: guard.elevation(),
            jogging: guard.is_jogging(),
            limits: guard.limits(),
        }
    }
}

struct Shared {
    state: ControllerState,
    position: PositionSnapshot,
}

#[derive(Debug)]
enum ControlMessage {
    Command(String),
    Recalibrate(Recalibration),
    SetLimits(TurnLimit),
}

enum Wake {
    Stop,
    Control(Option<ControlMessage>),
    Command(Result<Received, TransportError>),
    Mount(Result<Received, TransportError>),
    JogDue,
}

/// The worker that owns both links and the wrap guard.
struct Controller {
    command_link: Transport,
    mount_link: Transport,
    codec: Box<dyn MountCodec>,
    guard: WrapGuard,
    lines: LineAssembler,
    speeds: SpeedDefaults,
    receive_timeout: Duration,
    response_timeout: Duration,
    query_mount: bool,
    inbox: mpsc::Receiver<ControlMessage>,
    stop: watch::Receiver<bool>,
    events: EventSink,
    shared: Arc<RwLock<Shared>>,
}

impl Controller {
    async fn run(mut self) {
        self.events.info(format!(
            "bridging {} commands to {} mount via {}",
            self.command_link.kind(),
            self.mount_link.kind(),
            self.codec.name()
        ));

        if let Err(e) = self.serve().await {
            self.events.connection_lost(e.to_string());
        }
        self.shutdown().await;
        self.set_state(ControllerState::Disconnected);
    }

    async fn serve(&mut self) -> Result<(), TransportError> {
        loop {
            let due = OptionFuture::from(
                self.guard
                    .time_to_settle(Instant::now())
                    .map(tokio::time::sleep),
            );

            let wake = tokio::select! {
                biased;
                _ = self.stop.changed() => Wake::Stop,
                Some(()) = due => Wake::JogDue,
                message = self.inbox.recv() => Wake::Control(message),
                received = self.command_link.receive(self.receive_timeout) => {
                    Wake::Command(received)
                }
                received = self.mount_link.receive(self.receive_timeout) => Wake::Mount(received),
            };

            match wake {
                Wake::Stop | Wake::Control(None) => return Ok(()),
                Wake::Control(Some(message)) => self.handle_control(message).await?,
                Wake::Command(received) => {
                    if let Received::Data(bytes) = received? {
                        for line in self.lines.push(&bytes) {
                            match line {
                                Line::Complete(line) => self.handle_line(&line).await?,
                                Line::Overlong(start) => self.events.warn(format!(
                                    "discarded overlong command line starting {:?}",
                                    start
                                )),
                            }
                        }
                    }
                }
                Wake::Mount(received) => {
                    if let Received::Data(bytes) = received? {
                        self.handle_mount_bytes(&bytes);
                    }
                }
                Wake::JogDue => self.settle().await?,
            }
        }
    }

    async fn handle_control(&mut self, message: ControlMessage) -> Result<(), TransportError> {
        match message {
            ControlMessage::Command(line) => self.handle_line(&line).await,
            ControlMessage::Recalibrate(recalibration) => {
                self.settle().await?;
                match self.guard.recalibrate(recalibration) {
                    Ok(()) => {
                        self.events.info(format!(
                            "recalibrated to heading {:.1}° turn {}",
                            recalibration.heading_deg, recalibration.turns
                        ));
                        self.publish();
                    }
                    Err(e) => self.events.warn(format!("kept tracked position: {}", e)),
                }
                Ok(())
            }
            ControlMessage::SetLimits(limits) => {
                self.settle().await?;
                self.apply_limits(limits);
                Ok(())
            }
        }
    }

    async fn handle_line(&mut self, line: &str) -> Result<(), TransportError> {
        self.events.info(format!("command {:?}", line));
        match parse_line(line, &self.speeds) {
            Ok(request) => self.execute(request).await,
            Err(e) => {
                self.events.warn(format!("discarded {:?}: {}", line, e));
                Ok(())
            }
        }
    }

    async fn execute(&mut self, request: Request) -> Result<(), TransportError> {
        self.settle().await?;

        match request {
            Request::QueryPosition => self.report_position().await,
            Request::SetLimits(limits) => {
                self.apply_limits(limits);
                Ok(())
            }
            _ => {
                let decision = self.guard.evaluate(&request);
                self.report_decision(&decision);
                if let Some(motion) = decision.motion() {
                    self.send_motion(&motion).await?;
                    self.guard.commit(&motion, Instant::now());
                    self.publish();
                }
                Ok(())
            }
        }
    }

    fn report_decision(&self, decision: &Decision) {
        match decision {
            Decision::Allow(motion) => self.events.info(format!("allowed {}", motion)),
            Decision::Clamp {
                requested,
                adjusted,
            } => self
                .events
                .warn(format!("clamped {} to {}", requested, adjusted)),
            Decision::Reject(reason) => self.events.warn(format!("rejected: {}", reason)),
        }
    }

    fn apply_limits(&mut self, limits: TurnLimit) {
        if let Err(e) = self.guard.set_limits(limits) {
            self.events.warn(format!("kept azimuth limits: {}", e));
            return;
        }
        self.events.info(format!(
            "azimuth limits set to {:.1}°..{:.1}°",
            limits.bound(Direction::Negative),
            limits.bound(Direction::Positive)
        ));
        self.publish();
    }

    async fn send_motion(&mut self, motion: &Motion) -> Result<(), TransportError> {
        for command in motion.mount_commands() {
            let frame = self.codec.encode(&command);
            self.mount_link.send(&frame).await?;
            debug!("sent {:?} as {:02X?}", command, frame);
        }
        Ok(())
    }

    /// Brings a running jog up to date. A jog that reached a turn limit is
    /// stopped; a sweep that reached its handoff point is stopped and sent
    /// the final set-position slew.
    async fn settle(&mut self) -> Result<(), TransportError> {
        let now = Instant::now();
        let Some(end) = self.guard.advance(now) else {
            return Ok(());
        };

        let frame = self.codec.encode(&MountCommand::Stop);
        self.mount_link.send(&frame).await?;
        match end {
            JogEnd::Limit(direction) => {
                self.publish();
                self.events.warn(format!(
                    "{} azimuth limit reached while jogging, stopped at {:.1}°",
                    direction,
                    self.guard.state().cumulative_degrees()
                ));
            }
            JogEnd::Handoff(slew) => {
                self.send_motion(&slew).await?;
                self.guard.commit(&slew, now);
                self.publish();
                self.events.info(format!("sweep handed over to {}", slew));
            }
        }
        Ok(())
    }

    async fn report_position(&mut self) -> Result<(), TransportError> {
        let tracked = (self.guard.state().heading(), self.guard.elevation());
        let (azimuth, elevation) = if self.query_mount {
            match self.query_mount_position().await? {
                Some(position) => position,
                None => {
                    self.events.warn(
                        "mount did not answer the position query, reporting tracked position",
                    );
                    tracked
                }
            }
        } else {
            tracked
        };

        let reply = format_position(azimuth, elevation);
        self.command_link.send(reply.as_bytes()).await?;
        self.events.info(format!("position {}", reply.trim_end()));
        Ok(())
    }

    async fn query_mount_position(&mut self) -> Result<Option<(f64, f64)>, TransportError> {
        let azimuth = self.query_axis(Axis::Pan).await?;
        let elevation = self.query_axis(Axis::Tilt).await?;
        Ok(azimuth.zip(elevation))
    }

    /// Waits for the mount's answer, settling a running jog whenever it
    /// falls due in the meantime.
    async fn query_axis(&mut self, axis: Axis) -> Result<Option<f64>, TransportError> {
        self.settle().await?;
        let frame = self.codec.encode(&MountCommand::Query(axis));
        self.mount_link.send(&frame).await?;

        let deadline = Instant::now() + self.response_timeout;
        loop {
            let now = Instant::now();
            let remaining = deadline.saturating_duration_since(now);
            if remaining.is_zero() {
                return Ok(None);
            }
            let wait = match self.guard.time_to_settle(now) {
                Some(due) => remaining.min(due),
                None => remaining,
            };

            let Received::Data(bytes) = self.mount_link.receive(wait).await? else {
                self.settle().await?;
                continue;
            };
            for reply in self.codec.decode(&bytes) {
                match reply {
                    Ok(MountReply::Position {
                        axis: answered,
                        degrees,
                    }) if answered == axis => return Ok(Some(degrees)),
                    Ok(other) => debug!("skipping {:?} while waiting for {} position", other, axis),
                    Err(e) => self.events.error(format!("discarded mount frame: {}", e)),
                }
            }
        }
    }

    fn handle_mount_bytes(&mut self, bytes: &[u8]) {
        for reply in self.codec.decode(bytes) {
            match reply {
                Ok(reply) => debug!("mount says {:?}", reply),
                Err(e) => self.events.error(format!("discarded mount frame: {}", e)),
            }
        }
    }

    async fn shutdown(&mut self) {
        self.inbox.close();
        let mut discarded = 0usize;
        while self.inbox.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            self.events
                .info(format!("discarded {} queued commands", discarded));
        }

        if self.guard.is_jogging() {
            let frame = self.codec.encode(&MountCommand::Stop);
            match self.mount_link.send(&frame).await {
                Ok(_) => {
                    self.guard.commit(&Motion::Stop, Instant::now());
                    self.events.info("stopped jogging mount before disconnect");
                }
                Err(e) => self
                    .events
                    .warn(format!("could not stop mount before disconnect: {}", e)),
            }
        }

        for link in [&mut self.command_link, &mut self.mount_link] {
            if let Err(e) = link.close().await {
                debug!("closing {} link: {}", link.kind(), e);
            }
        }
        self.publish();
    }

    fn publish(&self) {
        self.shared.write().position = PositionSnapshot::of(&self.guard);
    }

    fn set_state(&self, state: ControllerState) {
        self.shared.write().state = state;
        self.events.state(state);
    }
}

/// Operator-side handle to a running controller.
///
/// Commands go through a bounded FIFO queue; the worker is the only thing
/// that ever touches the wrap state.
pub struct ControllerHandle {
    inbox: mpsc::Sender<ControlMessage>,
    stop: watch::Sender<bool>,
    shared: Arc<RwLock<Shared>>,
    task: JoinHandle<()>,
}

impl ControllerHandle {
    /// Opens both links from `config` and starts the worker.
    pub async fn start(config: &AppConfig, events: EventSink) -> Result<Self, ControllerError> {
        config.validate()?;
        events.state(ControllerState::Connecting);

        let command_link = match Transport::open(&config.command_link).await {
            Ok(link) => link,
            Err(e) => return Err(Self::abort(&events, "command", e)),
        };
        let mount_link = match Transport::open(&config.mount_link).await {
            Ok(link) => link,
            Err(e) => return Err(Self::abort(&events, "mount", e)),
        };

        Ok(Self::spawn(config, command_link, mount_link, events))
    }

    fn abort(events: &EventSink, which: &str, error: TransportError) -> ControllerError {
        events.error(format!("{} link: {}", which, error));
        events.state(ControllerState::Disconnected);
        error.into()
    }

    /// Starts the worker on links that are already open.
    pub fn spawn(
        config: &AppConfig,
        command_link: Transport,
        mount_link: Transport,
        events: EventSink,
    ) -> Self {
        let guard = WrapGuard::new(config.limits, config.elevation_range(), config.jog_rates());
        let shared = Arc::new(RwLock::new(Shared {
            state: ControllerState::Connected,
            position: PositionSnapshot::of(&guard),
        }));
        let (inbox_tx, inbox) = mpsc::channel(config.runtime.queue_capacity);
        let (stop_tx, stop) = watch::channel(false);

        events.state(ControllerState::Connected);
        let controller = Controller {
            command_link,
            mount_link,
            codec: codec_for(&config.mount, &config.angles),
            guard,
            lines: LineAssembler::new(),
            speeds: config.speed_defaults(),
            receive_timeout: config.receive_timeout(),
            response_timeout: config.response_timeout(),
            query_mount: config.mount.query_position,
            inbox,
            stop,
            events,
            shared: Arc::clone(&shared),
        };

        ControllerHandle {
            inbox: inbox_tx,
            stop: stop_tx,
            shared,
            task: tokio::spawn(controller.run()),
        }
    }

    /// Queues one GS-232 command line.
    pub async fn submit(&self, line: impl Into<String>) -> Result<(), ControllerError> {
        self.send(ControlMessage::Command(line.into())).await
    }

    pub async fn recalibrate(&self, recalibration: Recalibration) -> Result<(), ControllerError> {
        self.send(ControlMessage::Recalibrate(recalibration)).await
    }

    pub async fn set_limits(&self, limits: TurnLimit) -> Result<(), ControllerError> {
        self.send(ControlMessage::SetLimits(limits)).await
    }

    pub fn snapshot(&self) -> PositionSnapshot {
        self.shared.read().position
    }

    pub fn state(&self) -> ControllerState {
        self.shared.read().state
    }

    /// Stops the worker, dropping whatever is still queued, and waits for
    /// both links to close.
    pub async fn shutdown(self) -> Result<(), ControllerError> {
        // The worker may already be gone after a fatal error.
        let _ = self.stop.send(true);
        self.task.await?;
        Ok(())
    }

    async fn send(&self, message: ControlMessage) -> Result<(), ControllerError> {
        self.inbox
            .send(message)
            .await
            .map_err(|_| ControllerError::NotRunning)
    }
}
