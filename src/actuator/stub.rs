use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::{ActuatorError, ActuatorLink, LinkOpener, SortCommand};

/// Commands written through a stub link, in wire order.
#[derive(Clone, Debug, Default)]
pub struct CommandLog {
    commands: Arc<Mutex<Vec<SortCommand>>>,
}

impl CommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<SortCommand> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Commands as the characters the device would have received.
    pub fn wire(&self) -> Vec<&'static str> {
        self.commands().into_iter().map(SortCommand::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Poll until at least `count` commands were recorded.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.len() >= count {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn record(&self, command: SortCommand) {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command);
    }
}

/// In-memory opener used for `stub://` addresses and tests.
pub struct StubOpener {
    target: String,
    log: CommandLog,
    available: bool,
    fail_writes: bool,
}

impl StubOpener {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            log: CommandLog::new(),
            available: true,
            fail_writes: false,
        }
    }

    /// Opener plus a handle to inspect what reached the "device".
    pub fn recording(target: impl Into<String>) -> (Self, CommandLog) {
        let opener = Self::new(target);
        let log = opener.log.clone();
        (opener, log)
    }

    /// Opener whose device is never present.
    pub fn unavailable(target: impl Into<String>) -> Self {
        Self {
            available: false,
            ..Self::new(target)
        }
    }

    /// Links accept the open but every write fails.
    pub fn with_failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }
}

impl LinkOpener for StubOpener {
    fn target(&self) -> String {
        self.target.clone()
    }

    fn open(&self) -> Result<Box<dyn ActuatorLink>, ActuatorError> {
        if !self.available {
            return Err(ActuatorError::Open {
                target: self.target.clone(),
                reason: "no such device".to_string(),
            });
        }
        Ok(Box::new(StubLink {
            log: self.log.clone(),
            fail_writes: self.fail_writes,
        }))
    }
}

struct StubLink {
    log: CommandLog,
    fail_writes: bool,
}

impl ActuatorLink for StubLink {
    fn write_command(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stub link write failure"));
        }
        let command = match bytes {
            b"1" => SortCommand::Biodegradable,
            b"2" => SortCommand::NonBiodegradable,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unknown command bytes {:?}", other),
                ))
            }
        };
        self.log.record(command);
        Ok(())
    }
}
