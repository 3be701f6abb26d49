//! Sorting mechanism control over a serial link.
//!
//! `HardwareActuator` owns at most one open link to the sorting device and
//! tracks whether it is connected. The device speaks a single-character
//! protocol with no acknowledgment: `'1'` routes to the biodegradable bin,
//! `'2'` to the non-biodegradable bin.
//!
//! Hardware is often absent during development, so every operation degrades
//! to a logged failure:
//! - `connect` logs and returns `false` instead of erroring
//! - `send` returns `ActuatorError::NotConnected` without touching state
//! - `close` is a no-op when already closed
//!
//! Links are produced by a `LinkOpener`. Device addresses starting with
//! `stub://` select the in-memory recording backend.

mod serial;
mod stub;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

pub use serial::{SerialLink, SerialOpener};
pub use stub::{CommandLog, StubOpener};

const DEFAULT_PORT: &str = "/dev/ttyUSB0";
const DEFAULT_BAUD_RATE: u32 = 9600;
const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Configuration for the serial actuator.
#[derive(Clone, Debug)]
pub struct ActuatorConfig {
    /// Device path (e.g. "/dev/ttyUSB0", "COM3") or "stub://<name>".
    pub port: String,
    pub baud_rate: u32,
    /// Read/write timeout on the serial link.
    pub timeout: Duration,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

/// Command understood by the sorting device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SortCommand {
    Biodegradable,
    NonBiodegradable,
}

impl SortCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            SortCommand::Biodegradable => "1",
            SortCommand::NonBiodegradable => "2",
        }
    }

    pub fn as_bytes(self) -> &'static [u8] {
        self.as_str().as_bytes()
    }
}

impl fmt::Display for SortCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("actuator not connected")]
    NotConnected,
    #[error("failed to open actuator link {target}: {reason}")]
    Open { target: String, reason: String },
    #[error("actuator write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// An open, byte-oriented channel to the device.
pub trait ActuatorLink: Send {
    /// Write one command and flush it to the wire.
    fn write_command(&mut self, bytes: &[u8]) -> std::io::Result<()>;
}

/// Opens links on demand so the actuator can (re)connect.
pub trait LinkOpener: Send {
    /// Human-readable target, used in logs.
    fn target(&self) -> String;

    fn open(&self) -> Result<Box<dyn ActuatorLink>, ActuatorError>;
}

/// Actuator shared between the workers and the lifecycle controller.
pub type SharedActuator = Arc<Mutex<HardwareActuator>>;

/// Lock a shared actuator, recovering the guard if a holder panicked.
///
/// The actuator holds no invariant a panic could break halfway, so the
/// poisoned state is safe to reuse.
pub fn lock(actuator: &SharedActuator) -> MutexGuard<'_, HardwareActuator> {
    actuator.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct HardwareActuator {
    opener: Box<dyn LinkOpener>,
    link: Option<Box<dyn ActuatorLink>>,
}

impl HardwareActuator {
    /// Build an actuator for the configured device. Does not connect.
    pub fn new(config: &ActuatorConfig) -> Self {
        if config.port.starts_with("stub://") {
            Self::with_opener(StubOpener::new(config.port.clone()))
        } else {
            Self::with_opener(SerialOpener::new(
                config.port.clone(),
                config.baud_rate,
                config.timeout,
            ))
        }
    }

    pub fn with_opener<O: LinkOpener + 'static>(opener: O) -> Self {
        Self {
            opener: Box::new(opener),
            link: None,
        }
    }

    pub fn into_shared(self) -> SharedActuator {
        Arc::new(Mutex::new(self))
    }

    pub fn target(&self) -> String {
        self.opener.target()
    }

    pub fn state(&self) -> ConnectionState {
        if self.link.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Open the link if it is not already open.
    ///
    /// Failure is logged and leaves the actuator disconnected.
    pub fn connect(&mut self) -> bool {
        if self.link.is_some() {
            return true;
        }
        match self.opener.open() {
            Ok(link) => {
                log::info!("actuator connected on {}", self.opener.target());
                self.link = Some(link);
                true
            }
            Err(err) => {
                log::error!("actuator unavailable: {}", err);
                false
            }
        }
    }

    /// Write a command. Does not reconnect on its own.
    pub fn send(&mut self, command: SortCommand) -> Result<(), ActuatorError> {
        let link = self.link.as_mut().ok_or(ActuatorError::NotConnected)?;
        link.write_command(command.as_bytes())?;
        Ok(())
    }

    pub fn close(&mut self) {
        if self.link.take().is_some() {
            log::info!("actuator link {} closed", self.opener.target());
        }
    }
}

impl Drop for HardwareActuator {
    fn drop(&mut self) {
        self.close();
    }
}
