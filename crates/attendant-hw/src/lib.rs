//! attendant-hw: Camera capture for the attendance kiosk.
//!
//! Provides V4L2-based camera access and a latest-frame stream that hands
//! RGB frames from a capture thread to the async detection loop.

pub mod camera;
pub mod frame;
pub mod stream;

pub use camera::{CameraError, CameraSource, CaptureSettings, DeviceInfo, PixelFormat, V4lCamera};
pub use frame::Frame;
pub use stream::{FrameProvider, FramePublisher, FrameStream};
