//! QR-Cam-Scanner: continuous QR-code scanning from a V4L2 camera
//!
//! A [`ScanController`] acquires a camera through a [`CaptureSource`], samples
//! one frame per refresh tick into a reusable [`FrameBuffer`], and runs a
//! [`DecodePrimitive`] on it until a symbol is found or the caller stops it.
//! Camera, decoder, scheduler and observer are all traits, so the loop can be
//! driven deterministically in tests.

pub mod buffer;
pub mod config;
pub mod controller;
pub mod decode;
pub mod device;
pub mod history;
pub mod scanner;
pub mod store;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use buffer::FrameBuffer;
pub use config::Config;
pub use controller::{EndReason, ScanController, ScanError, ScanEvent, ScanObserver, ScanState};
pub use decode::{DecodePrimitive, DecodeResult, InversionMode, RqrrDecoder};
pub use device::V4L2Source;
pub use history::{AppState, HistoryEntry, Settings};
pub use scanner::{FrameLoop, LoopConfig, RefreshScheduler, Scheduler};
pub use store::{JsonFileStore, MemoryStore, Store};
pub use traits::{
    CaptureError, CaptureRequest, CaptureSession, CaptureSource, Facing, Format, FourCC, Frame,
    FrameMetadata, Resolution,
};
