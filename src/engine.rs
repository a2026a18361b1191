//! Real-time mix cycle
//!
//! [`MixEngine`] is the callback half of the mixer: it owns the scratch
//! buffer and (through a briefly-held lock) the active-source list, and
//! runs one mix cycle per device callback. [`MixerState`] is the control
//! half: the knobs and completion signal shared between application
//! threads and the real-time thread.
//!
//! ## Why the split matters
//!
//! The device callback runs on a real-time thread with strict timing
//! requirements. Everything it touches is either thread-confined (the
//! scratch buffer, the consumer half of the submission queue), atomic
//! (volume, abrupt-stop flag), or guarded by a lock whose other holders
//! only ever keep it for a handful of instructions (the active list, the
//! silence flag). Newly submitted sources arrive through a lock-free
//! SPSC ring buffer, so steady-state list mutation happens only here.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use ringbuf::traits::{Consumer, Observer};

use crate::source::Source;

/// Control and completion state shared between the mixer's control-plane
/// methods and the real-time callback.
pub(crate) struct MixerState {
    /// Master volume as f32 bits; applied during the mix loop.
    volume: AtomicU32,

    /// Abrupt-stop request; consumed by the next mix cycle.
    drain_all: AtomicBool,

    /// Whether the device stream has been started. Only the control
    /// plane flips this, so start/stop decisions are race-free.
    started: AtomicBool,

    /// Aggregate silence flag: true iff the active list is empty.
    /// Same lost-wakeup guard as the per-source completion signal.
    silent: Mutex<bool>,
    cv_finished: Condvar,
}

impl MixerState {
    pub(crate) fn new() -> Self {
        Self {
            volume: AtomicU32::new(1.0f32.to_bits()),
            drain_all: AtomicBool::new(false),
            started: AtomicBool::new(false),
            silent: Mutex::new(true),
            cv_finished: Condvar::new(),
        }
    }

    pub(crate) fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub(crate) fn set_volume(&self, volume: f32) {
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn request_drain(&self) {
        self.drain_all.store(true, Ordering::Release);
    }

    fn take_drain_request(&self) -> bool {
        self.drain_all.swap(false, Ordering::AcqRel)
    }

    /// Flip the started flag; returns true if this call won the
    /// transition and should actually start the device.
    pub(crate) fn try_start(&self) -> bool {
        self.started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn mark_stopped(&self) {
        self.started.store(false, Ordering::Release);
    }

    pub(crate) fn is_silent(&self) -> bool {
        *self.silent.lock().unwrap()
    }

    /// Update the silence flag, waking waiters on the transition into
    /// silence. No-op (and no notification) if the flag already matches.
    pub(crate) fn set_silent(&self, value: bool) {
        let mut silent = self.silent.lock().unwrap();
        if *silent != value {
            *silent = value;
            drop(silent);
            if value {
                self.cv_finished.notify_all();
            }
        }
    }

    /// Block until nothing is playing. Returns immediately if already
    /// silent.
    pub(crate) fn wait(&self) {
        let mut silent = self.silent.lock().unwrap();
        while !*silent {
            silent = self.cv_finished.wait(silent).unwrap();
        }
    }
}

/// The callback half of the mixer; owned by the real-time thread.
pub(crate) struct MixEngine {
    state: Arc<MixerState>,
    incoming: ringbuf::HeapCons<Source>,

    /// Shared with the mixer only so teardown can silence sources after
    /// the device has stopped; while the stream runs, this thread is the
    /// sole mutator.
    active: Arc<Mutex<Vec<Source>>>,

    /// Reused mixing buffer; grows to the largest requested cycle and
    /// never shrinks.
    scratch: Vec<f32>,

    channels: usize,
}

impl MixEngine {
    pub(crate) fn new(
        state: Arc<MixerState>,
        active: Arc<Mutex<Vec<Source>>>,
        incoming: ringbuf::HeapCons<Source>,
        channels: usize,
    ) -> Self {
        Self {
            state,
            incoming,
            active,
            scratch: Vec::new(),
            channels,
        }
    }

    /// One mix cycle: fill `output` with the volume-scaled sum of every
    /// active source and drop the ones that fell silent.
    ///
    /// Invoked by the device callback with the buffer for this period.
    /// Sources are summed, not averaged; dense concurrent playback may
    /// clip, which is the accepted tradeoff.
    pub(crate) fn process(&mut self, output: &mut [f32]) {
        output.fill(0.0);

        let mut active = self.active.lock().unwrap();

        // An abrupt stop clears whatever was active before this cycle;
        // waiters are woken but user finish callbacks are skipped.
        if self.state.take_drain_request() {
            for source in active.drain(..) {
                source.force_silence();
            }
        }

        // Adopt newly submitted sources.
        while let Some(source) = self.incoming.try_pop() {
            active.push(source);
        }
        if !active.is_empty() {
            self.state.set_silent(false);
        }

        let frame_count = output.len() / self.channels;
        let wanted = frame_count * self.channels;
        if self.scratch.len() < wanted {
            self.scratch.resize(wanted, 0.0);
        }

        let volume = self.state.volume();
        for source in active.iter() {
            let produced = source.pull(&mut self.scratch[..wanted], frame_count);
            for i in 0..produced * self.channels {
                output[i] += volume * self.scratch[i];
            }
        }

        active.retain(|source| source.is_playing());

        if active.is_empty() && self.incoming.is_empty() {
            self.state.set_silent(true);
        }
    }
}
