//! Operator-facing event stream.
//!
//! Everything the controller reports goes out as a [`ControllerEvent`] on an
//! unbounded channel and is mirrored to `tracing` at the matching level, so a
//! headless run still leaves a log.

use strum_macros::{AsRefStr, Display};
use tokio::sync::mpsc;

#[derive(Debug, Display, AsRefStr, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    Log(LogEvent),
    StateChanged(ControllerState),
    /// The controller gave up on a link and is now disconnected.
    ConnectionLost(String),
}

pub type EventStream = mpsc::UnboundedReceiver<ControllerEvent>;

#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ControllerEvent>,
}

impl EventSink {
    pub fn channel() -> (EventSink, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink { tx }, rx)
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{}", message);
        self.log(LogLevel::Error, message);
    }

    pub fn state(&self, state: ControllerState) {
        tracing::debug!("controller {}", state);
        self.emit(ControllerEvent::StateChanged(state));
    }

    pub fn connection_lost(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::error!("connection lost: {}", reason);
        self.emit(ControllerEvent::ConnectionLost(reason));
    }

    fn log(&self, level: LogLevel, message: String) {
        self.emit(ControllerEvent::Log(LogEvent { level, message }));
    }

    fn emit(&self, event: ControllerEvent) {
        // Nobody listening is fine; the tracing copy already went out.
        let _ = self.tx.send(event);
    }
}
