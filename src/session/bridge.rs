//! Real-time callback bridge
//!
//! The [`Renderer`] is what a hardware gateway calls on every tick, on its own
//! high-priority thread. It wraps the consumer's [`AudioProcessor`] and decides,
//! per tick, whether the processor may run at all.
//!
//! ## Real-time rules
//!
//! Nothing on the render path allocates, logs or takes a lock. Communication with
//! the control domain goes through:
//! - an atomic run gate plus an in-flight counter, so `stop()` can wait for the
//!   current tick to drain
//! - an `ArcSwapOption` holding the negotiated parameters, so a tick always sees
//!   one complete snapshot
//!
//! The buffer handed to the processor is shaped by that snapshot alone. A tick
//! whose frame count disagrees with it (the hardware was reconfigured and the new
//! parameters are not published yet, or the other way round) renders silence.
//! - relaxed atomic counters for statistics

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use arc_swap::ArcSwapOption;

use super::negotiator::NegotiatedParameters;

/// One tick's worth of planar sample storage.
///
/// Channel `c` occupies `frames` contiguous samples starting at `c * frames`.
/// For recording categories the buffers hold the captured input on entry and
/// the output is written in place. The view is only valid for the duration of
/// the callback it was passed to.
pub struct BufferView<'a> {
    samples: &'a mut [f32],
    channels: usize,
    frames: usize,
    sample_rate: u32,
    host_time: u64,
}

impl<'a> BufferView<'a> {
    pub(crate) fn new(
        samples: &'a mut [f32],
        channels: usize,
        frames: usize,
        sample_rate: u32,
        host_time: u64,
    ) -> Self {
        debug_assert!(samples.len() >= channels * frames);
        Self {
            samples,
            channels,
            frames,
            sample_rate,
            host_time,
        }
    }

    /// Number of output channels
    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of frames requested for this tick
    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Current sample rate in Hz
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Hardware timestamp (nanoseconds) at which this chunk reaches the output
    #[inline]
    pub fn host_time(&self) -> u64 {
        self.host_time
    }

    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        let start = index * self.frames;
        &self.samples[start..start + self.frames]
    }

    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        let start = index * self.frames;
        &mut self.samples[start..start + self.frames]
    }

    /// Iterate over all channel buffers mutably
    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
        let len = self.channels * self.frames;
        self.samples[..len].chunks_exact_mut(self.frames.max(1))
    }
}

/// The consumer's real-time processing callback.
///
/// Return `true` if the buffers contain audible output, `false` for silence.
/// On `false` the bridge zero-fills the output itself.
pub trait AudioProcessor: Send {
    fn process(&mut self, buffers: &mut BufferView<'_>) -> bool;
}

impl<F> AudioProcessor for F
where
    F: FnMut(&mut BufferView<'_>) -> bool + Send,
{
    fn process(&mut self, buffers: &mut BufferView<'_>) -> bool {
        self(buffers)
    }
}

/// Counters maintained by the render path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Every tick delivered by the hardware
    pub ticks: u64,
    /// Ticks on which the processor was invoked
    pub callbacks: u64,
    /// Invoked ticks where the processor reported silence
    pub silent_ticks: u64,
    /// Ticks that arrived while the session was not running
    pub skipped_ticks: u64,
    /// Ticks whose size did not match the negotiated parameters
    pub mismatched_ticks: u64,
}

/// State shared between the control domain and the render path
#[derive(Default)]
pub(crate) struct RenderShared {
    running: AtomicBool,
    in_flight: AtomicUsize,
    params: ArcSwapOption<NegotiatedParameters>,
    ticks: AtomicU64,
    callbacks: AtomicU64,
    silent_ticks: AtomicU64,
    skipped_ticks: AtomicU64,
    mismatched_ticks: AtomicU64,
}

impl RenderShared {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Let ticks reach the processor
    pub(crate) fn open(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    /// Stop ticks reaching the processor and wait out any tick in flight.
    ///
    /// After this returns the processor will not be invoked until the next `open()`.
    /// Must not be called from the render thread.
    pub(crate) fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
        while self.in_flight.load(Ordering::SeqCst) != 0 {
            thread::yield_now();
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn publish(&self, params: Arc<NegotiatedParameters>) {
        self.params.store(Some(params));
    }

    pub(crate) fn parameters(&self) -> Option<Arc<NegotiatedParameters>> {
        self.params.load_full()
    }

    pub(crate) fn stats(&self) -> RenderStats {
        RenderStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            callbacks: self.callbacks.load(Ordering::Relaxed),
            silent_ticks: self.silent_ticks.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
            mismatched_ticks: self.mismatched_ticks.load(Ordering::Relaxed),
        }
    }
}

/// Real-time side of a session, owned by the gateway's tick source.
pub struct Renderer {
    processor: Box<dyn AudioProcessor>,
    shared: Arc<RenderShared>,
}

impl Renderer {
    pub(crate) fn new(processor: Box<dyn AudioProcessor>, shared: Arc<RenderShared>) -> Self {
        Self { processor, shared }
    }

    /// Frames per tick of the published parameters, if any.
    ///
    /// Gateways with variable device buffers use this to size their passes.
    pub fn frames_per_tick(&self) -> Option<usize> {
        self.shared.params.load().as_deref().map(|p| p.frames_per_tick)
    }

    /// Render one tick into `buffer` (planar, `frames` per channel).
    ///
    /// Returns true if the buffer holds audible output. Everything else leaves
    /// the buffer zeroed.
    pub fn render(&mut self, buffer: &mut [f32], frames: usize, host_time: u64) -> bool {
        // in_flight must be raised before the gate is read so close() can't miss us
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
        self.shared.ticks.fetch_add(1, Ordering::Relaxed);

        let produced = self.render_gated(buffer, frames, host_time);

        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        produced
    }

    #[inline]
    fn render_gated(&mut self, buffer: &mut [f32], frames: usize, host_time: u64) -> bool {
        if !self.shared.running.load(Ordering::SeqCst) {
            self.shared.skipped_ticks.fetch_add(1, Ordering::Relaxed);
            buffer.fill(0.0);
            return false;
        }

        // Copy out of the guard; the snapshot is never observed half-updated
        let params = match self.shared.params.load().as_deref() {
            Some(params) => *params,
            None => {
                self.shared.skipped_ticks.fetch_add(1, Ordering::Relaxed);
                buffer.fill(0.0);
                return false;
            }
        };

        let channels = params.channels;
        let frames_per_tick = params.frames_per_tick;
        if frames != frames_per_tick || buffer.len() < channels * frames_per_tick {
            self.shared.mismatched_ticks.fetch_add(1, Ordering::Relaxed);
            buffer.fill(0.0);
            return false;
        }

        self.shared.callbacks.fetch_add(1, Ordering::Relaxed);
        let mut view = BufferView::new(
            &mut buffer[..channels * frames_per_tick],
            channels,
            frames_per_tick,
            params.sample_rate,
            host_time,
        );
        if self.processor.process(&mut view) {
            return true;
        }

        self.shared.silent_ticks.fetch_add(1, Ordering::Relaxed);
        buffer.fill(0.0);
        false
    }
}
