//! Integration tests using vivid virtual camera.
//!
//! These tests require:
//! - The `integration` feature flag: `cargo test --features integration`
//! - The vivid kernel module loaded, e.g. `modprobe vivid n_devs=1`
//! - Access to /dev/video* devices (may require sudo or video group membership)
//!
//! vivid produces test patterns, never QR codes, so a scan against it must
//! keep running without a success.
//!
//! Tests will fail if vivid is not available.

#![cfg(feature = "integration")]

use qr_cam_scanner::config::CameraConfig;
use qr_cam_scanner::controller::{EndReason, ScanObserver};
use qr_cam_scanner::{
    CaptureRequest, CaptureSession, CaptureSource, DecodeResult, Facing, LoopConfig,
    RefreshScheduler, Resolution, RqrrDecoder, ScanController, ScanState, V4L2Source,
};
use serial_test::serial;
use std::fs;
use std::path::Path;

/// Find all available vivid virtual camera devices.
///
/// Uses sysfs to check the device name before opening, avoiding
/// unnecessary device opens on real cameras.
fn find_vivid_devices() -> Vec<u32> {
    let video4linux = Path::new("/sys/class/video4linux");
    if !video4linux.exists() {
        return Vec::new();
    }

    let mut devices = Vec::new();
    for index in 0..10 {
        let name_path = video4linux.join(format!("video{index}")).join("name");
        let Ok(name) = fs::read_to_string(&name_path) else {
            continue;
        };

        if name.to_lowercase().contains("vivid") {
            devices.push(index);
        }
    }
    devices
}

/// Macro to fail test if vivid is not available.
///
/// Integration tests MUST have vivid loaded - they should fail, not silently skip.
macro_rules! require_vivid {
    () => {
        match find_vivid_devices().first().copied() {
            Some(idx) => idx,
            None => {
                panic!(
                    "vivid virtual camera not available.\n\
                     Load vivid with: sudo modprobe vivid\n\
                     Or run unit tests only: cargo test --lib"
                );
            }
        }
    };
}

fn source_for(index: u32) -> V4L2Source {
    V4L2Source::new(&CameraConfig {
        user_device: index,
        environment_device: index,
        ..CameraConfig::default()
    })
}

#[derive(Default)]
struct Counter {
    successes: usize,
    ended: Vec<EndReason>,
}

impl ScanObserver for Counter {
    fn on_success(&mut self, _result: &DecodeResult) {
        self.successes += 1;
    }

    fn on_session_ended(&mut self, reason: EndReason) {
        self.ended.push(reason);
    }
}

#[tokio::test]
#[serial]
async fn test_vivid_acquire_and_release() {
    let index = require_vivid!();
    let mut source = source_for(index);

    let session = source
        .acquire(&CaptureRequest {
            facing: Facing::Environment,
            resolution: Resolution::new(640, 480),
        })
        .await
        .expect("Failed to acquire vivid device");

    println!("Acquired {session:?}");
    assert!(session.capabilities().driver.contains("vivid"));
    assert_eq!(session.index(), index);

    let format = session.geometry().expect("vivid should report geometry");
    assert_eq!(format.width, 640, "Width mismatch");
    assert_eq!(format.height, 480, "Height mismatch");

    source.release(session).expect("Failed to release vivid device");
}

#[tokio::test]
#[serial]
async fn test_vivid_read_frames() {
    let index = require_vivid!();
    let mut source = source_for(index);

    let mut session = source
        .acquire(&CaptureRequest {
            facing: Facing::User,
            resolution: Resolution::new(640, 480),
        })
        .await
        .expect("Failed to acquire vivid device");
    let format = session.geometry().expect("vivid should report geometry");

    let mut last_sequence = None;
    for _ in 0..5 {
        let frame = session.read_frame().expect("Failed to capture frame");
        let expected_size = (format.width * format.height * 2) as usize;
        assert!(
            frame.data.len() >= expected_size,
            "Frame data too small: {} < {}",
            frame.data.len(),
            expected_size
        );
        if let Some(prev) = last_sequence {
            assert!(frame.metadata.sequence > prev, "sequence must increase");
        }
        last_sequence = Some(frame.metadata.sequence);
    }

    source.release(session).expect("Failed to release vivid device");
}

#[tokio::test]
#[serial]
async fn test_vivid_scan_without_symbol() {
    let index = require_vivid!();

    let mut controller = ScanController::new(
        source_for(index),
        RqrrDecoder::new(),
        RefreshScheduler::new(),
        Counter::default(),
        LoopConfig::default(),
    );
    controller
        .start(Facing::Environment, Resolution::new(640, 480))
        .await
        .expect("Failed to start scanning");

    for _ in 0..10 {
        controller.on_refresh();
    }
    assert_eq!(controller.state(), ScanState::Active);
    assert_eq!(controller.observer().successes, 0);
    assert_eq!(controller.frame_loop().buffer().width(), 640);

    controller.pause().expect("Failed to pause");
    controller.resume().expect("Failed to resume");
    controller.stop().expect("Failed to stop");

    assert_eq!(controller.state(), ScanState::Idle);
    assert_eq!(controller.observer().ended, vec![EndReason::Stopped]);
}
