//! Mock capture source for testing without hardware.

use std::time::Duration;

use crate::traits::{
    CaptureError, CaptureRequest, CaptureSession, CaptureSource, Format, FourCC, Frame,
    FrameMetadata, Result,
};

/// Mock source that hands out numbered sessions and counts acquire/release.
pub struct MockSource {
    format: Format,
    pattern: TestPattern,
    failure: Option<CaptureError>,
    release_failure: Option<CaptureError>,
    frame_failures: u32,
    acquired: u32,
    released: Vec<u32>,
    last_request: Option<CaptureRequest>,
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSource {
    /// Create a mock source producing 640x480 YUYV color bars.
    #[must_use]
    pub fn new() -> Self {
        Self {
            format: Format::new(640, 480, FourCC::YUYV),
            pattern: TestPattern::ColorBars,
            failure: None,
            release_failure: None,
            frame_failures: 0,
            acquired: 0,
            released: Vec::new(),
            last_request: None,
        }
    }

    /// Set the format sessions report. A zero size models a stream that has
    /// not produced its first frame yet.
    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Set the pattern sessions produce.
    #[must_use]
    pub const fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Fail the next `acquire` with `error`.
    #[must_use]
    pub fn failing_with(mut self, error: CaptureError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Fail the next `release` with `error`.
    #[must_use]
    pub fn failing_release_with(mut self, error: CaptureError) -> Self {
        self.release_failure = Some(error);
        self
    }

    /// Fail the first `count` frame reads of each session.
    #[must_use]
    pub const fn with_frame_failures(mut self, count: u32) -> Self {
        self.frame_failures = count;
        self
    }

    /// Number of successful acquisitions.
    #[must_use]
    pub const fn acquired(&self) -> u32 {
        self.acquired
    }

    /// Ids of released sessions, in release order.
    #[must_use]
    pub fn released(&self) -> &[u32] {
        &self.released
    }

    /// The request passed to the last `acquire`.
    #[must_use]
    pub const fn last_request(&self) -> Option<CaptureRequest> {
        self.last_request
    }
}

impl CaptureSource for MockSource {
    type Session = MockSession;

    async fn acquire(&mut self, request: &CaptureRequest) -> Result<MockSession> {
        self.last_request = Some(*request);
        if let Some(error) = self.failure.take() {
            return Err(error);
        }
        self.acquired += 1;
        Ok(MockSession {
            id: self.acquired,
            format: self.format.clone(),
            pattern: self.pattern,
            frame_failures: self.frame_failures,
            frame_count: 0,
        })
    }

    fn release(&mut self, session: MockSession) -> Result<()> {
        self.released.push(session.id);
        match self.release_failure.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// Session handed out by [`MockSource`].
#[derive(Debug)]
pub struct MockSession {
    id: u32,
    format: Format,
    pattern: TestPattern,
    frame_failures: u32,
    frame_count: u32,
}

impl MockSession {
    /// Identity of this session, starting at 1.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Number of frames read so far.
    #[must_use]
    pub const fn frame_count(&self) -> u32 {
        self.frame_count
    }
}

impl CaptureSession for MockSession {
    fn geometry(&self) -> Option<Format> {
        self.format.has_geometry().then(|| self.format.clone())
    }

    fn read_frame(&mut self) -> Result<Frame> {
        if self.frame_failures > 0 {
            self.frame_failures -= 1;
            return Err(CaptureError::Stream("mock frame dropped".to_owned()));
        }
        let frame = generate_test_frame(&self.format, self.pattern, self.frame_count);
        self.frame_count += 1;
        Ok(frame)
    }
}

/// Generate a YUYV test frame.
pub fn generate_test_frame(format: &Format, pattern: TestPattern, sequence: u32) -> Frame {
    let size = (format.width * format.height * 2) as usize; // YUYV = 2 bytes/pixel
    let mut data = vec![0u8; size];

    match pattern {
        TestPattern::ColorBars => {
            generate_color_bars(&mut data, format.width, format.height);
        }
        TestPattern::Gradient => {
            generate_gradient(&mut data, format.width, format.height);
        }
        TestPattern::Solid(y, u, v) => {
            generate_solid(&mut data, y, u, v);
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    let bytes_used = data.len() as u32;

    Frame {
        data,
        metadata: FrameMetadata {
            sequence,
            timestamp: Duration::from_millis(u64::from(sequence) * 33), // ~30fps
            bytes_used,
        },
    }
}

/// Generate YUYV color bars pattern.
fn generate_color_bars(data: &mut [u8], width: u32, height: u32) {
    // White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    let bars: [(u8, u8, u8); 8] = [
        (235, 128, 128),
        (210, 16, 146),
        (170, 166, 16),
        (145, 54, 34),
        (106, 202, 222),
        (81, 90, 240),
        (41, 240, 110),
        (16, 128, 128),
    ];

    let bar_width = (width / 8).max(1);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let bar_idx = (x / bar_width).min(7) as usize;
            let (y_val, u_val, v_val) = bars[bar_idx];

            let offset = ((y * width + x) * 2) as usize;
            if offset + 3 < data.len() {
                data[offset] = y_val;
                data[offset + 1] = u_val;
                data[offset + 2] = y_val;
                data[offset + 3] = v_val;
            }
        }
    }
}

/// Generate YUYV horizontal gradient pattern.
fn generate_gradient(data: &mut [u8], width: u32, height: u32) {
    for y in 0..height {
        for x in (0..width).step_by(2) {
            #[allow(clippy::cast_possible_truncation)]
            let y_val = ((x * 255) / width) as u8;
            let offset = ((y * width + x) * 2) as usize;

            if offset + 3 < data.len() {
                data[offset] = y_val;
                data[offset + 1] = 128;
                data[offset + 2] = y_val;
                data[offset + 3] = 128;
            }
        }
    }
}

/// Generate solid color YUYV frame.
fn generate_solid(data: &mut [u8], y: u8, u: u8, v: u8) {
    for chunk in data.chunks_exact_mut(4) {
        chunk.copy_from_slice(&[y, u, y, v]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{Facing, Resolution};

    #[tokio::test]
    async fn test_mock_source_counts_sessions() {
        let mut source = MockSource::new();
        let request = CaptureRequest {
            facing: Facing::User,
            resolution: Resolution::new(640, 480),
        };

        let first = source.acquire(&request).await.expect("acquire should succeed");
        let second = source.acquire(&request).await.expect("acquire should succeed");
        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);

        source.release(second).expect("release should succeed");
        assert_eq!(source.released(), &[2]);
        assert_eq!(source.last_request(), Some(request));
    }

    #[tokio::test]
    async fn test_mock_failure_is_reported_once() {
        let mut source =
            MockSource::new().failing_with(CaptureError::PermissionDenied("mock".to_owned()));
        let request = CaptureRequest::default();

        let err = source.acquire(&request).await.expect_err("first acquire should fail");
        assert!(matches!(err, CaptureError::PermissionDenied(_)));
        assert_eq!(source.acquired(), 0);

        source.acquire(&request).await.expect("retry should succeed");
        assert_eq!(source.acquired(), 1);
    }

    #[tokio::test]
    async fn test_mock_session_frames() {
        let mut source = MockSource::new().with_frame_failures(1);
        let mut session = source
            .acquire(&CaptureRequest::default())
            .await
            .expect("acquire should succeed");

        assert!(session.read_frame().is_err());
        let frame = session.read_frame().expect("second read should succeed");
        assert_eq!(frame.metadata.sequence, 0);
        assert_eq!(frame.data.len(), 640 * 480 * 2);
        assert_eq!(session.frame_count(), 1);
    }

    #[test]
    fn test_color_bars_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let frame = generate_test_frame(&format, TestPattern::ColorBars, 0);

        assert_eq!(frame.data.len(), (640 * 480 * 2) as usize);
        // First bar should be white (Y=235)
        assert_eq!(frame.data[0], 235);
    }

    #[test]
    fn test_gradient_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let frame = generate_test_frame(&format, TestPattern::Gradient, 0);

        assert!(frame.data[0] < 10);
        let last_row_start = (479 * 640 * 2) as usize;
        assert!(frame.data[last_row_start + 638 * 2] > 200);
    }

    #[test]
    fn test_solid_pattern() {
        let format = Format::new(64, 64, FourCC::YUYV);
        let frame = generate_test_frame(&format, TestPattern::Solid(128, 64, 192), 3);

        assert_eq!(&frame.data[..4], &[128, 64, 128, 192]);
        assert_eq!(frame.metadata.sequence, 3);
    }
}
