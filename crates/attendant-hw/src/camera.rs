//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::stream::{FramePublisher, FrameProvider, FrameStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Fraction of near-black luma samples above which a frame counts as dark.
const DARK_FRAME_THRESHOLD: f32 = 0.95;
const MMAP_BUFFERS: u32 = 4;
/// Upper bound on a single dequeue wait, and therefore on how long
/// `release()` can block on a camera that has stopped delivering buffers.
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// A camera that can be switched on and off.
///
/// `release` must be idempotent and safe to call whether or not `acquire`
/// ever succeeded.
pub trait CameraSource {
    type Stream: FrameProvider + 'static;

    fn acquire(&mut self) -> Result<Self::Stream, CameraError>;
    fn release(&mut self);
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// 8-bit grayscale (1 byte/pixel).
    Grey,
}

/// What to ask the driver for.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// V4L2 device path. Point this at the user-facing camera.
    pub device_path: String,
    /// Requested width; the driver may pick the closest it supports.
    pub width: u32,
    /// Requested height; the driver may pick the closest it supports.
    pub height: u32,
    /// Frames discarded after stream start while auto-exposure settles.
    pub warmup_frames: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device_path: "/dev/video0".to_string(),
            width: 1280,
            height: 720,
            warmup_frames: 4,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Negotiated {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

struct CaptureThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// V4L2 camera publishing RGB frames from a dedicated capture thread.
pub struct V4lCamera {
    settings: CaptureSettings,
    capture: Option<CaptureThread>,
}

impl V4lCamera {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            settings,
            capture: None,
        }
    }

    pub fn is_acquired(&self) -> bool {
        self.capture.is_some()
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl CameraSource for V4lCamera {
    type Stream = FrameStream;

    fn acquire(&mut self) -> Result<FrameStream, CameraError> {
        self.release();

        let (device, negotiated) = open_device(&self.settings)?;
        let (publisher, stream) = FrameStream::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let warmup = self.settings.warmup_frames;

        let handle = std::thread::Builder::new()
            .name("attendant-capture".into())
            .spawn({
                let stop = Arc::clone(&stop);
                move || capture_loop(device, negotiated, warmup, publisher, stop)
            })
            .map_err(|e| CameraError::CaptureFailed(format!("failed to spawn capture thread: {e}")))?;

        self.capture = Some(CaptureThread { stop, handle });
        Ok(stream)
    }

    fn release(&mut self) {
        let Some(capture) = self.capture.take() else {
            return;
        };
        capture.stop.store(true, Ordering::Release);
        if capture.handle.join().is_err() {
            tracing::warn!(device = %self.settings.device_path, "capture thread panicked");
        }
        tracing::info!(device = %self.settings.device_path, "camera released");
    }
}

impl Drop for V4lCamera {
    fn drop(&mut self) {
        self.release();
    }
}

/// Open the device and negotiate a format close to the requested size.
fn open_device(settings: &CaptureSettings) -> Result<(Device, Negotiated), CameraError> {
    let device_path = settings.device_path.as_str();
    if !Path::new(device_path).exists() {
        return Err(CameraError::DeviceNotFound(device_path.to_string()));
    }

    let device = Device::with_path(device_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            CameraError::PermissionDenied(device_path.to_string())
        } else if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
            CameraError::DeviceBusy
        } else {
            CameraError::DeviceNotFound(format!("{device_path}: {e}"))
        }
    })?;

    let caps = device.query_caps().map_err(|e| {
        CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
    })?;

    tracing::info!(
        device = device_path,
        driver = %caps.driver,
        card = %caps.card,
        "opened camera"
    );

    if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
        return Err(CameraError::StreamingNotSupported);
    }

    let mut fmt = device.format().map_err(|e| {
        CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
    })?;

    fmt.fourcc = FourCC::new(b"YUYV");
    fmt.width = settings.width;
    fmt.height = settings.height;

    let negotiated = device.set_format(&fmt).map_err(|e| {
        CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
    })?;

    let fourcc = negotiated.fourcc;
    let pixel_format = if fourcc == FourCC::new(b"YUYV") {
        PixelFormat::Yuyv
    } else if fourcc == FourCC::new(b"GREY") {
        PixelFormat::Grey
    } else {
        return Err(CameraError::FormatNegotiationFailed(format!(
            "unsupported pixel format: {fourcc:?} (need YUYV or GREY)"
        )));
    };

    if negotiated.width != settings.width || negotiated.height != settings.height {
        tracing::warn!(
            requested_width = settings.width,
            requested_height = settings.height,
            width = negotiated.width,
            height = negotiated.height,
            "driver chose a different resolution"
        );
    }
    tracing::info!(
        width = negotiated.width,
        height = negotiated.height,
        fourcc = ?fourcc,
        "negotiated format"
    );

    Ok((
        device,
        Negotiated {
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
        },
    ))
}

/// Body of the capture thread. Exits on stop, on a dequeue error, or once
/// the consumer has dropped its stream; the publisher is dropped on exit,
/// which ends the stream.
fn capture_loop(
    device: Device,
    format: Negotiated,
    warmup_frames: usize,
    publisher: FramePublisher,
    stop: Arc<AtomicBool>,
) {
    let mut stream = match MmapStream::with_buffers(&device, BufType::VideoCapture, MMAP_BUFFERS) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(error = %e, "failed to create mmap stream");
            return;
        }
    };

    stream.set_timeout(DEQUEUE_TIMEOUT);

    let mut discarded = 0usize;
    while !stop.load(Ordering::Acquire) {
        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) => match dequeue_failure(&e) {
                DequeueFailure::Idle if publisher.is_closed() => break,
                DequeueFailure::Idle => {
                    tracing::trace!("no buffer within dequeue timeout");
                    continue;
                }
                DequeueFailure::Fatal => {
                    tracing::error!(error = %e, "failed to dequeue buffer; stopping capture");
                    break;
                }
            },
        };

        if discarded < warmup_frames {
            discarded += 1;
            continue;
        }

        match convert(buf, &format) {
            Ok((data, is_dark)) => {
                let frame = Frame {
                    data,
                    width: format.width,
                    height: format.height,
                    timestamp: std::time::Instant::now(),
                    sequence: meta.sequence,
                    is_dark,
                };
                if !publisher.publish(frame) {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(seq = meta.sequence, error = %e, "dropping malformed frame");
            }
        }
    }

    tracing::debug!("capture thread exiting");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DequeueFailure {
    /// Nothing arrived in time; recheck the stop flag and wait again.
    Idle,
    Fatal,
}

fn dequeue_failure(e: &std::io::Error) -> DequeueFailure {
    match e.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted => {
            DequeueFailure::Idle
        }
        _ => DequeueFailure::Fatal,
    }
}

/// Convert a raw buffer to RGB24 and report whether it is dark.
fn convert(buf: &[u8], format: &Negotiated) -> Result<(Vec<u8>, bool), CameraError> {
    match format.pixel_format {
        PixelFormat::Yuyv => {
            let (rgb, luma) = frame::yuyv_to_rgb(buf, format.width, format.height)
                .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}")))?;
            Ok((rgb, frame::is_dark_frame(&luma, DARK_FRAME_THRESHOLD)))
        }
        PixelFormat::Grey => {
            let rgb = frame::grey_to_rgb(buf, format.width, format.height)
                .map_err(|e| CameraError::CaptureFailed(format!("GREY conversion failed: {e}")))?;
            let pixels = (format.width * format.height) as usize;
            Ok((rgb, frame::is_dark_frame(&buf[..pixels], DARK_FRAME_THRESHOLD)))
        }
    }
}
