//! Native serial port implementation using the `serialport` crate.

use {
    crate::{
        error::{Error, Result},
        port::{Port, SerialConfig},
    },
    log::{debug, trace},
    serialport::ClearBuffer,
    std::io::{Read, Write},
};

/// Native serial port implementation.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    baud_rate: u32,
}

impl NativePort {
    /// Open a serial port (8N1, no flow control) with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        debug!(
            "Opening {} at {} baud",
            config.port_name, config.baud_rate
        );
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()?;

        let mut native = Self {
            port: Some(port),
            name: config.port_name.clone(),
            baud_rate: config.baud_rate,
        };
        native.clear_input()?;
        native.clear_output()?;
        Ok(native)
    }

    fn closed_error() -> Error {
        Error::Serial(serialport::Error::new(
            serialport::ErrorKind::NoDevice,
            "Port is closed",
        ))
    }

    fn inner(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port.as_mut().ok_or_else(Self::closed_error)
    }
}

impl Port for NativePort {
    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn bytes_available(&mut self) -> Result<usize> {
        let n = self.inner()?.bytes_to_read()?;
        Ok(n as usize)
    }

    fn clear_input(&mut self) -> Result<()> {
        trace!("Discarding input buffer");
        self.inner()?.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn clear_output(&mut self) -> Result<()> {
        trace!("Discarding output buffer");
        self.inner()?.clear(ClearBuffer::Output)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the handle closes the device
        self.port.take();
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(|p| p.read(buf))
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(|p| p.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(std::io::Write::flush)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_nonexistent_port_fails() {
        let config = SerialConfig::new("/dev/this-port-does-not-exist-bl602");
        assert!(NativePort::open(&config).is_err());
    }
}
