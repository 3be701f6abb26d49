use std::io::{self, Write};
use std::time::Duration;

use serialport::SerialPort;

use super::{ActuatorError, ActuatorLink, LinkOpener};

/// Opens the sorting device's serial port.
#[derive(Clone, Debug)]
pub struct SerialOpener {
    port: String,
    baud_rate: u32,
    timeout: Duration,
}

impl SerialOpener {
    pub fn new(port: impl Into<String>, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            timeout,
        }
    }
}

impl LinkOpener for SerialOpener {
    fn target(&self) -> String {
        format!("{}@{}", self.port, self.baud_rate)
    }

    fn open(&self) -> Result<Box<dyn ActuatorLink>, ActuatorError> {
        let port = serialport::new(&self.port, self.baud_rate)
            .timeout(self.timeout)
            .open()
            .map_err(|e| ActuatorError::Open {
                target: self.target(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(SerialLink { port }))
    }
}

pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl ActuatorLink for SerialLink {
    fn write_command(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_fails_to_open() {
        let opener = SerialOpener::new(
            "/dev/waste-sorter-does-not-exist",
            9600,
            Duration::from_millis(100),
        );
        let err = opener.open().err().expect("open must fail");
        assert!(matches!(err, ActuatorError::Open { .. }));
        assert_eq!(opener.target(), "/dev/waste-sorter-does-not-exist@9600");
    }
}
