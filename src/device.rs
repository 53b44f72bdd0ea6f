//! V4L2 capture source using the v4l crate.

use std::io;
use std::time::Duration;

use tracing::{debug, info};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::{CaptureStream as V4lCaptureStream, Stream as V4lStream};
use v4l::video::Capture;
use v4l::Device;

use crate::config::CameraConfig;
use crate::traits::{
    CaptureError, CaptureRequest, CaptureSession, CaptureSource, DeviceCapabilities, Facing,
    Format, FourCC, Frame, FrameMetadata, Result,
};

/// Opens V4L2 devices, mapping the facing preference to a device index.
#[derive(Debug, Clone)]
pub struct V4L2Source {
    user_device: u32,
    environment_device: u32,
    buffer_count: u32,
}

impl V4L2Source {
    /// Create a source from the camera section of the configuration.
    #[must_use]
    pub const fn new(config: &CameraConfig) -> Self {
        Self {
            user_device: config.user_device,
            environment_device: config.environment_device,
            buffer_count: config.buffer_count,
        }
    }

    /// Device index for a facing preference (e.g. 0 for /dev/video0).
    #[must_use]
    pub const fn device_index(&self, facing: Facing) -> u32 {
        match facing {
            Facing::User => self.user_device,
            Facing::Environment => self.environment_device,
        }
    }
}

impl CaptureSource for V4L2Source {
    type Session = V4L2Session;

    async fn acquire(&mut self, request: &CaptureRequest) -> Result<V4L2Session> {
        let index = self.device_index(request.facing);

        // Opening the node can block on slow USB cameras.
        let (device, capabilities) = tokio::task::spawn_blocking(move || open_device(index))
            .await
            .map_err(|err| CaptureError::DeviceOpenFailed(err.to_string()))??;

        let format = negotiate_format(&device, request)?;
        let stream = Stream::with_buffers(&device, Type::VideoCapture, self.buffer_count)
            .map_err(|err| CaptureError::Stream(err.to_string()))?;

        info!(
            device = index,
            card = %capabilities.card,
            width = format.width,
            height = format.height,
            fourcc = %format.fourcc,
            "camera acquired"
        );

        Ok(V4L2Session {
            index,
            capabilities,
            format,
            stream,
            device,
        })
    }

    fn release(&mut self, mut session: V4L2Session) -> Result<()> {
        debug!(device = session.index, "releasing camera");
        session
            .stream
            .stop()
            .map_err(|err| CaptureError::Stream(err.to_string()))
    }
}

fn open_device(index: u32) -> Result<(Device, DeviceCapabilities)> {
    let device = Device::new(index as usize).map_err(|err| map_open_error(index, &err))?;

    let caps = device
        .query_caps()
        .map_err(|err| CaptureError::DeviceOpenFailed(err.to_string()))?;

    let capabilities = DeviceCapabilities {
        driver: caps.driver,
        card: caps.card,
        bus_info: caps.bus,
        can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
        can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
    };

    if !capabilities.can_capture || !capabilities.can_stream {
        return Err(CaptureError::DeviceOpenFailed(format!(
            "{} cannot stream video",
            capabilities.card
        )));
    }

    Ok((device, capabilities))
}

fn map_open_error(index: u32, err: &io::Error) -> CaptureError {
    match err.kind() {
        io::ErrorKind::NotFound => CaptureError::DeviceNotFound(index),
        io::ErrorKind::PermissionDenied => {
            CaptureError::PermissionDenied(format!("/dev/video{index}: {err}"))
        }
        _ => CaptureError::DeviceOpenFailed(err.to_string()),
    }
}

/// Ask for YUYV at the hinted size and accept whatever packed format the
/// driver settles on.
fn negotiate_format(device: &Device, request: &CaptureRequest) -> Result<Format> {
    let mut fmt = device
        .format()
        .map_err(|err| CaptureError::Stream(err.to_string()))?;

    fmt.width = request.resolution.width;
    fmt.height = request.resolution.height;
    fmt.fourcc = FourCC::YUYV.into();

    let fmt = device
        .set_format(&fmt)
        .map_err(|err| CaptureError::Stream(err.to_string()))?;

    let format = Format {
        width: fmt.width,
        height: fmt.height,
        fourcc: FourCC::from(fmt.fourcc),
        stride: fmt.stride,
        size: fmt.size,
    };

    if format.fourcc.bytes_per_pixel().is_none() {
        return Err(CaptureError::FormatNotSupported(format));
    }

    Ok(format)
}

/// An open V4L2 device with an mmap-based stream.
pub struct V4L2Session {
    index: u32,
    capabilities: DeviceCapabilities,
    format: Format,
    // Declared before `device` so the stream is torn down first.
    stream: Stream<'static>,
    #[allow(dead_code)]
    device: Device,
}

impl V4L2Session {
    /// Capabilities reported by the driver.
    #[must_use]
    pub const fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    /// Device index this session was opened on.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }
}

impl CaptureSession for V4L2Session {
    fn geometry(&self) -> Option<Format> {
        self.format.has_geometry().then(|| self.format.clone())
    }

    fn read_frame(&mut self) -> Result<Frame> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|err| CaptureError::Stream(err.to_string()))?;

        // V4L2 timestamps are always non-negative in practice
        #[allow(clippy::cast_sign_loss)]
        let secs = meta.timestamp.sec.max(0) as u64;
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let nanos = (meta.timestamp.usec.max(0) as u32).saturating_mul(1000);

        Ok(Frame {
            data: used_bytes(buf, meta.bytesused).to_vec(),
            metadata: FrameMetadata {
                sequence: meta.sequence,
                timestamp: Duration::new(secs, nanos),
                bytes_used: meta.bytesused,
            },
        })
    }
}

/// The filled part of an mmap buffer. Drivers that leave `bytesused` at zero
/// get the whole buffer.
fn used_bytes(buf: &[u8], bytes_used: u32) -> &[u8] {
    match bytes_used as usize {
        0 => buf,
        used => buf.get(..used).unwrap_or(buf),
    }
}

impl std::fmt::Debug for V4L2Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V4L2Session")
            .field("index", &self.index)
            .field("card", &self.capabilities.card)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}
