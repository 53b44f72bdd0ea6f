//! Scanner lifecycle controller.
//!
//! Owns the capture session and the frame loop and moves them through
//! `Idle → Starting → Active ⇄ Paused → Stopping → Idle`. Every operation
//! takes `&mut self`, so at most one `start` can be outstanding and at most one
//! session is ever open.

use tracing::{debug, info, warn};

use crate::decode::{DecodeError, DecodePrimitive, DecodeResult};
use crate::scanner::{FrameLoop, LoopConfig, Scheduler, Tick};
use crate::traits::{CaptureError, CaptureRequest, CaptureSource, Facing, Resolution};

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// No session. Initial and terminal state.
    Idle,
    /// Waiting for camera acquisition.
    Starting,
    /// Session open, loop sampling.
    Active,
    /// Session open, loop suspended.
    Paused,
    /// Releasing the session.
    Stopping,
}

impl std::fmt::Display for ScanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the scanner.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// Camera acquisition or frame capture failed.
    #[error(transparent)]
    Capture(#[from] CaptureError),
    /// The decode primitive could not interpret the frame.
    #[error("decode primitive failure: {0}")]
    Decode(#[from] DecodeError),
    /// The operation is not valid in the current state.
    #[error("cannot {op} while {state}")]
    InvalidState {
        /// Requested operation.
        op: &'static str,
        /// State at the time of the request.
        state: ScanState,
    },
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The caller called `stop`.
    Stopped,
    /// A symbol was decoded.
    Decoded,
    /// Decode failures exhausted the retry budget.
    DecodeFailures,
}

/// Scan outcome delivered to the observer.
#[derive(Debug)]
pub enum ScanEvent {
    /// A symbol was decoded. Delivered at most once per session.
    Success(DecodeResult),
    /// Something worth telling the user that does not stop the scan.
    Warning(String),
    /// The primitive or the capture stream failed on a frame.
    Fatal(ScanError),
}

/// Receives scan outcomes.
///
/// Implement `on_event` to see every event, or the typed callbacks
/// individually.
pub trait ScanObserver {
    /// Route an event to the typed callback.
    fn on_event(&mut self, event: ScanEvent) {
        match event {
            ScanEvent::Success(result) => self.on_success(&result),
            ScanEvent::Warning(message) => self.on_warning(&message),
            ScanEvent::Fatal(error) => self.on_fatal(&error),
        }
    }

    /// A symbol was decoded.
    fn on_success(&mut self, _result: &DecodeResult) {}

    /// A non-fatal warning.
    fn on_warning(&mut self, _message: &str) {}

    /// A per-frame failure.
    fn on_fatal(&mut self, _error: &ScanError) {}

    /// The session was released.
    fn on_session_ended(&mut self, _reason: EndReason) {}
}

/// Drives a capture source, a decoder and a frame loop.
pub struct ScanController<S: CaptureSource, D, K, O> {
    source: S,
    decoder: D,
    observer: O,
    frame_loop: FrameLoop<K>,
    session: Option<S::Session>,
    request: Option<CaptureRequest>,
    state: ScanState,
}

impl<S, D, K, O> ScanController<S, D, K, O>
where
    S: CaptureSource,
    D: DecodePrimitive,
    K: Scheduler,
    O: ScanObserver,
{
    /// Create an idle controller.
    pub fn new(source: S, decoder: D, scheduler: K, observer: O, config: LoopConfig) -> Self {
        Self {
            source,
            decoder,
            observer,
            frame_loop: FrameLoop::new(scheduler, config),
            session: None,
            request: None,
            state: ScanState::Idle,
        }
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> ScanState {
        self.state
    }

    /// The capture source.
    pub const fn source(&self) -> &S {
        &self.source
    }

    /// The decode primitive.
    pub const fn decoder(&self) -> &D {
        &self.decoder
    }

    /// The observer.
    pub const fn observer(&self) -> &O {
        &self.observer
    }

    /// The observer, mutably.
    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// The frame loop.
    pub const fn frame_loop(&self) -> &FrameLoop<K> {
        &self.frame_loop
    }

    /// The open session, if any.
    pub const fn session(&self) -> Option<&S::Session> {
        self.session.as_ref()
    }

    /// The request the open session was acquired with.
    pub const fn request(&self) -> Option<CaptureRequest> {
        self.request
    }

    /// Acquire a camera and begin scanning.
    ///
    /// Only valid from `Idle`. On failure the controller stays `Idle` and the
    /// error is returned once; nothing is retried.
    pub async fn start(&mut self, facing: Facing, resolution: Resolution) -> Result<(), ScanError> {
        self.expect_state("start", &[ScanState::Idle])?;

        let request = CaptureRequest { facing, resolution };
        self.state = ScanState::Starting;
        debug!(%facing, width = resolution.width, height = resolution.height, "acquiring camera");

        match self.source.acquire(&request).await {
            Ok(session) => {
                self.session = Some(session);
                self.request = Some(request);
                self.state = ScanState::Active;
                self.frame_loop.start();
                info!(%facing, "scanning started");
                Ok(())
            }
            Err(err) => {
                self.state = ScanState::Idle;
                warn!(error = %err, %facing, "camera acquisition failed");
                Err(err.into())
            }
        }
    }

    /// Suspend sampling, keeping the session open.
    pub fn pause(&mut self) -> Result<(), ScanError> {
        self.expect_state("pause", &[ScanState::Active])?;
        self.frame_loop.halt();
        self.state = ScanState::Paused;
        debug!("scanning paused");
        Ok(())
    }

    /// Resume sampling on the session opened by `start`.
    pub fn resume(&mut self) -> Result<(), ScanError> {
        self.expect_state("resume", &[ScanState::Paused])?;
        self.state = ScanState::Active;
        self.frame_loop.start();
        debug!("scanning resumed");
        Ok(())
    }

    /// Release the session and return to `Idle`.
    ///
    /// Teardown errors are logged, never returned.
    pub fn stop(&mut self) -> Result<(), ScanError> {
        self.expect_state("stop", &[ScanState::Active, ScanState::Paused])?;
        self.teardown();
        info!("scanning stopped");
        self.observer.on_session_ended(EndReason::Stopped);
        Ok(())
    }

    /// Deliver one display-refresh tick.
    ///
    /// Runs a loop iteration only if one was scheduled and the session is
    /// active.
    pub fn on_refresh(&mut self) {
        if !self.frame_loop.take_tick() || self.state != ScanState::Active {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match self.frame_loop.run_once(session, &self.decoder) {
            Tick::Skipped | Tick::NotReady | Tick::CoolingDown => {}
            Tick::NoSymbol => {
                if self.frame_loop.config().warn_on_empty_frames {
                    self.observer
                        .on_event(ScanEvent::Warning("no symbol in frame".to_owned()));
                }
            }
            Tick::Found(result) => {
                self.teardown();
                info!(payload_len = result.payload.len(), "symbol decoded, session released");
                self.observer.on_event(ScanEvent::Success(result));
                self.observer.on_session_ended(EndReason::Decoded);
            }
            Tick::Failed(err) => {
                warn!(error = %err, failures = self.frame_loop.failures(), "frame decode failed");
                self.observer.on_event(ScanEvent::Fatal(err));
            }
            Tick::Exhausted(err) => {
                warn!(error = %err, "decode failures exhausted retry budget, stopping");
                self.teardown();
                self.observer.on_event(ScanEvent::Fatal(err));
                self.observer.on_session_ended(EndReason::DecodeFailures);
            }
        }
    }

    fn expect_state(&self, op: &'static str, allowed: &[ScanState]) -> Result<(), ScanError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ScanError::InvalidState {
                op,
                state: self.state,
            })
        }
    }

    fn teardown(&mut self) {
        self.state = ScanState::Stopping;
        self.frame_loop.reset();
        self.request = None;
        if let Some(session) = self.session.take() {
            if let Err(err) = self.source.release(session) {
                warn!(error = %err, "camera release failed");
            }
        }
        self.state = ScanState::Idle;
    }
}

impl<S, D, K, O> std::fmt::Debug for ScanController<S, D, K, O>
where
    S: CaptureSource,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanController")
            .field("state", &self.state)
            .field("request", &self.request)
            .field("has_session", &self.session.is_some())
            .finish_non_exhaustive()
    }
}
