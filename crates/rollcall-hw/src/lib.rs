//! rollcall-hw: Hardware access for the attendance station.
//!
//! V4L2 camera capture into RGB frames, frame drawing and JPEG encoding, and
//! the serial thermometer.

pub mod camera;
pub mod frame;
pub mod overlay;
pub mod sensor;

pub use camera::{Camera, CameraError, DeviceInfo, FrameSource, LazyCamera, PixelFormat};
pub use frame::{Frame, FrameError};
pub use overlay::Color;
pub use sensor::{SensorError, SerialThermometer, TemperatureSensor};
