//! Frame scanner loop.
//!
//! The loop samples at most one frame per refresh tick. It never schedules
//! itself directly: it arms a [`Scheduler`], and the host delivers the tick.

use tracing::{debug, trace};

use crate::buffer::FrameBuffer;
use crate::controller::ScanError;
use crate::decode::{DecodePrimitive, DecodeResult, InversionMode};
use crate::traits::CaptureSession;

/// Per-frame scheduling capability.
///
/// `schedule_next` arms one iteration for the next display refresh; the host
/// consumes it with `fire` when the refresh happens.
pub trait Scheduler {
    /// Arm one iteration for the next refresh.
    fn schedule_next(&mut self);

    /// Disarm a pending iteration, if any.
    fn cancel(&mut self);

    /// Consume the pending iteration. Returns `false` when none was armed.
    fn fire(&mut self) -> bool;
}

/// Scheduler holding a single pending-iteration flag.
#[derive(Debug, Default)]
pub struct RefreshScheduler {
    armed: bool,
    scheduled: u64,
}

impl RefreshScheduler {
    /// Create a disarmed scheduler.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            armed: false,
            scheduled: 0,
        }
    }

    /// Whether an iteration is waiting for the next refresh.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    /// Total number of `schedule_next` calls.
    #[must_use]
    pub const fn scheduled(&self) -> u64 {
        self.scheduled
    }
}

impl Scheduler for RefreshScheduler {
    fn schedule_next(&mut self) {
        self.armed = true;
        self.scheduled += 1;
    }

    fn cancel(&mut self) {
        self.armed = false;
    }

    fn fire(&mut self) -> bool {
        std::mem::take(&mut self.armed)
    }
}

/// Scanner loop tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    /// Inversion mode passed to the decoder.
    pub inversion: InversionMode,
    /// Consecutive failures after which the loop gives up.
    pub max_consecutive_failures: u32,
    /// Ticks skipped after a failure before sampling again.
    pub failure_cooldown_ticks: u32,
    /// Report frames without a symbol as warnings.
    pub warn_on_empty_frames: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            inversion: InversionMode::DontInvert,
            max_consecutive_failures: 10,
            failure_cooldown_ticks: 5,
            warn_on_empty_frames: false,
        }
    }
}

/// What one iteration did.
#[derive(Debug)]
pub enum Tick {
    /// The loop is not running.
    Skipped,
    /// The session has no frame geometry yet.
    NotReady,
    /// Sampling is suspended after a failure.
    CoolingDown,
    /// The frame held no symbol.
    NoSymbol,
    /// A symbol was decoded. The loop has stopped.
    Found(DecodeResult),
    /// Reading or decoding the frame failed. Sampling is suspended for the
    /// cooldown.
    Failed(ScanError),
    /// A failure exhausted the retry budget. The loop has stopped.
    Exhausted(ScanError),
}

/// Samples frames from a capture session and runs the decoder on them.
#[derive(Debug)]
pub struct FrameLoop<K> {
    scheduler: K,
    buffer: FrameBuffer,
    config: LoopConfig,
    running: bool,
    cooldown: u32,
    failures: u32,
}

impl<K: Scheduler> FrameLoop<K> {
    /// Create a stopped loop.
    pub const fn new(scheduler: K, config: LoopConfig) -> Self {
        Self {
            scheduler,
            buffer: FrameBuffer::new(),
            config,
            running: false,
            cooldown: 0,
            failures: 0,
        }
    }

    /// Loop tuning.
    pub const fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Whether the loop samples on the next tick.
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// The reused frame buffer.
    pub const fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    /// The injected scheduler.
    pub const fn scheduler(&self) -> &K {
        &self.scheduler
    }

    /// Consecutive failures since the last clean attempt.
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Begin sampling and schedule the first iteration.
    pub fn start(&mut self) {
        self.running = true;
        self.cooldown = 0;
        self.scheduler.schedule_next();
    }

    /// Stop sampling. Nothing further is scheduled.
    pub fn halt(&mut self) {
        self.running = false;
        self.scheduler.cancel();
    }

    /// Stop sampling and forget the frame buffer and failure history.
    pub fn reset(&mut self) {
        self.halt();
        self.buffer.clear();
        self.cooldown = 0;
        self.failures = 0;
    }

    /// Consume a pending tick from the scheduler.
    pub fn take_tick(&mut self) -> bool {
        self.scheduler.fire()
    }

    /// Run one iteration against `session`.
    pub fn run_once<S, D>(&mut self, session: &mut S, decoder: &D) -> Tick
    where
        S: CaptureSession,
        D: DecodePrimitive,
    {
        if !self.running {
            return Tick::Skipped;
        }

        if self.cooldown > 0 {
            self.cooldown -= 1;
            self.scheduler.schedule_next();
            return Tick::CoolingDown;
        }

        let outcome = self.sample(session, decoder);
        let tick = match outcome {
            Sample::NotReady => Tick::NotReady,
            Sample::Decoded(Some(result)) if !result.payload.is_empty() => {
                debug!(payload_len = result.payload.len(), "symbol decoded");
                self.failures = 0;
                self.halt();
                return Tick::Found(result);
            }
            Sample::Decoded(_) => {
                trace!("no symbol in frame");
                self.failures = 0;
                Tick::NoSymbol
            }
            Sample::Failed(err) => {
                self.failures += 1;
                if self.failures >= self.config.max_consecutive_failures {
                    self.halt();
                    return Tick::Exhausted(err);
                }
                self.cooldown = self.config.failure_cooldown_ticks;
                Tick::Failed(err)
            }
        };

        if self.running {
            self.scheduler.schedule_next();
        }
        tick
    }

    fn sample<S, D>(&mut self, session: &mut S, decoder: &D) -> Sample
    where
        S: CaptureSession,
        D: DecodePrimitive,
    {
        let Some(format) = session.geometry().filter(crate::traits::Format::has_geometry) else {
            return Sample::NotReady;
        };

        if self.buffer.resize(format.width, format.height) {
            debug!(
                width = format.width,
                height = format.height,
                "frame buffer resized"
            );
        }

        let frame = match session.read_frame() {
            Ok(frame) => frame,
            Err(err) => return Sample::Failed(err.into()),
        };
        if let Err(err) = self.buffer.fill(&frame, &format) {
            return Sample::Failed(err.into());
        }

        match decoder.decode(
            self.buffer.pixels(),
            self.buffer.width(),
            self.buffer.height(),
            self.config.inversion,
        ) {
            Ok(result) => Sample::Decoded(result),
            Err(err) => Sample::Failed(err.into()),
        }
    }
}

enum Sample {
    NotReady,
    Decoded(Option<DecodeResult>),
    Failed(ScanError),
}
