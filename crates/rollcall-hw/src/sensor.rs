//! Serial thermometer.
//!
//! The device answers a single `T` byte with one ASCII line holding a decimal
//! temperature in °C. The port is opened per reading and closed on drop.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Longest line accepted before giving up on a terminator.
const MAX_LINE: usize = 64;

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("unsupported baud rate: {0}")]
    UnsupportedBaud(u32),
    #[error("failed to configure port: {0}")]
    Configure(std::io::Error),
    #[error("serial I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("empty reading")]
    Empty,
    #[error("unparseable reading: {0:?}")]
    Parse(String),
}

/// A source of body-temperature readings.
pub trait TemperatureSensor: Send {
    fn read_temperature(&mut self) -> Result<f32, SensorError>;
}

/// Thermometer on a serial port, e.g. an Arduino with an IR probe.
#[derive(Debug, Clone)]
pub struct SerialThermometer {
    pub port: String,
    pub baud: u32,
    /// Wait after opening, for boards that reset when the port opens.
    pub settle: Duration,
    /// Maximum wait for the reply line.
    pub timeout: Duration,
}

impl SerialThermometer {
    pub fn new(port: impl Into<String>, baud: u32) -> Self {
        Self {
            port: port.into(),
            baud,
            settle: Duration::from_secs(2),
            timeout: Duration::from_secs(2),
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn open(&self) -> Result<File, SensorError> {
        let speed = baud_constant(self.baud).ok_or(SensorError::UnsupportedBaud(self.baud))?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&self.port)
            .map_err(|source| SensorError::Open {
                path: self.port.clone(),
                source,
            })?;
        configure_raw(&file, speed).map_err(SensorError::Configure)?;
        Ok(file)
    }
}

impl TemperatureSensor for SerialThermometer {
    fn read_temperature(&mut self) -> Result<f32, SensorError> {
        let mut port = self.open()?;
        std::thread::sleep(self.settle);

        // Drop anything the board printed while booting.
        // SAFETY: fd is valid for the lifetime of `port`.
        unsafe {
            libc::tcflush(port.as_raw_fd(), libc::TCIFLUSH);
        }

        port.write_all(b"T")?;
        let line = read_line(&mut port, self.timeout)?;
        let value = parse_reading(&line)?;
        tracing::debug!(port = %self.port, temperature = value, "temperature read");
        Ok(value)
    }
}

/// Parse one reply line into °C.
pub fn parse_reading(line: &str) -> Result<f32, SensorError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(SensorError::Empty);
    }
    match trimmed.parse::<f32>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(SensorError::Parse(trimmed.to_string())),
    }
}

fn baud_constant(baud: u32) -> Option<libc::speed_t> {
    Some(match baud {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        _ => return None,
    })
}

/// 8N1, raw, no flow control.
fn configure_raw(file: &File, speed: libc::speed_t) -> std::io::Result<()> {
    let fd = file.as_raw_fd();
    // SAFETY: termios is plain data and fd is an open descriptor owned by `file`.
    unsafe {
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        libc::cfmakeraw(&mut tio);
        tio.c_cflag |= libc::CLOCAL | libc::CREAD;
        tio.c_cflag &= !(libc::CSTOPB | libc::PARENB | libc::CRTSCTS);
        tio.c_iflag &= !(libc::IXON | libc::IXOFF | libc::IXANY);
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Read bytes until `\n` or the deadline passes.
fn read_line<R: Read + AsRawFd>(port: &mut R, timeout: Duration) -> Result<String, SensorError> {
    let deadline = Instant::now() + timeout;
    let mut line = Vec::with_capacity(16);
    let mut byte = [0u8; 1];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(SensorError::Timeout(timeout));
        }

        let mut pfd = libc::pollfd {
            fd: port.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let ms = remaining.as_millis().min(i32::MAX as u128) as libc::c_int;
        // SAFETY: pfd is a single valid pollfd.
        let ready = unsafe { libc::poll(&mut pfd, 1, ms) };
        if ready < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err.into());
        }
        if ready == 0 {
            return Err(SensorError::Timeout(timeout));
        }

        match port.read(&mut byte) {
            Ok(0) => return Err(SensorError::Empty),
            Ok(_) if byte[0] == b'\n' => break,
            Ok(_) => {
                line.push(byte[0]);
                if line.len() > MAX_LINE {
                    return Err(SensorError::Parse(String::from_utf8_lossy(&line).into_owned()));
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(String::from_utf8_lossy(&line).into_owned())
}
