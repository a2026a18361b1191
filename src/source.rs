//! Playback sources
//!
//! A [`Source`] pairs one decoder with its playback state: whether it is
//! currently audible, whether a stop has been requested, and a completion
//! signal that threads can block on. The mixer pulls frames from sources
//! on the real-time audio thread; everything else (waiting, polling,
//! requesting a stop) may happen from any thread.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::config::MixerConfig;
use crate::decoder::{DecodeError, Decoder};
use crate::mixer::MixerError;

type FinishCallback = Box<dyn FnMut() + Send>;

/// One playable audio stream.
///
/// `Source` is a cheap handle; clones share the same decoder and
/// playback state. The mixer keeps a clone in its active list while the
/// source is audible, so dropping the application's handle mid-playback
/// is safe.
///
/// State machine: idle -> playing (via [`crate::Mixer::play`]) -> silent
/// (natural exhaustion or [`Source::request_stop`]), re-enterable by
/// submitting again, which rewinds to frame zero.
pub struct Source {
    shared: Arc<Shared>,
}

struct Shared {
    /// Uncontended in steady state: the real-time thread pulls while the
    /// source is active, control threads rewind only while it is silent.
    decoder: Mutex<Decoder>,

    /// Set from any thread, observed by the next pull on the real-time
    /// thread; cleared on resubmission.
    stop_requested: AtomicBool,

    /// Lock-free complement of the silence flag, for casual polling.
    playing: AtomicBool,

    /// Authoritative silence flag. The mutex + condvar pair is the
    /// lost-wakeup guard: a waiter arriving after the completion
    /// notification observes the flag and returns immediately.
    finished: Mutex<bool>,
    cv_finished: Condvar,

    on_finish: Mutex<Option<FinishCallback>>,
}

impl Source {
    /// Create a source that decodes an audio file from disk.
    pub fn from_path(path: impl AsRef<Path>, config: &MixerConfig) -> Result<Self, DecodeError> {
        let decoder = Decoder::from_path(path, config.channels as usize)?;
        Ok(Self::from_decoder(decoder, config))
    }

    /// Create a source that decodes an encoded audio buffer held in memory.
    pub fn from_bytes(
        bytes: impl AsRef<[u8]> + Send + Sync + 'static,
        config: &MixerConfig,
    ) -> Result<Self, DecodeError> {
        let decoder = Decoder::from_bytes(bytes, config.channels as usize)?;
        Ok(Self::from_decoder(decoder, config))
    }

    fn from_decoder(decoder: Decoder, config: &MixerConfig) -> Self {
        if decoder.sample_rate() != config.sample_rate {
            log::warn!(
                "Source sample rate {} Hz does not match device rate {} Hz; \
                 playback speed will be off (no resampling is performed)",
                decoder.sample_rate(),
                config.sample_rate
            );
        }

        Self {
            shared: Arc::new(Shared {
                decoder: Mutex::new(decoder),
                stop_requested: AtomicBool::new(false),
                playing: AtomicBool::new(false),
                finished: Mutex::new(true),
                cv_finished: Condvar::new(),
                on_finish: Mutex::new(None),
            }),
        }
    }

    /// Register a callback invoked once per playback cycle when the
    /// source falls silent.
    ///
    /// The callback runs on the real-time audio thread: it must not
    /// block, allocate, or call back into the mixer. It is not invoked
    /// when playback is cut short by [`crate::Mixer::stop_audios`] or
    /// [`crate::Mixer::stop_stream`].
    pub fn set_on_finish(&self, callback: impl FnMut() + Send + 'static) {
        *self.shared.on_finish.lock().unwrap() = Some(Box::new(callback));
    }

    /// Whether the source is currently audible.
    ///
    /// Lock-free and may be momentarily stale; use [`Source::wait`] for
    /// an authoritative completion signal.
    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    /// Request that playback stop at the next mix cycle.
    ///
    /// Fire-and-forget: the stop takes effect (and the completion signal
    /// fires) on the real-time thread's next pull, never synchronously.
    pub fn request_stop(&self) {
        self.shared.stop_requested.store(true, Ordering::Release);
    }

    /// Block until the source is silent. Returns immediately if it
    /// already is. Safe to call from any number of threads concurrently.
    pub fn wait(&self) {
        let mut finished = self.shared.finished.lock().unwrap();
        while !*finished {
            finished = self.shared.cv_finished.wait(finished).unwrap();
        }
    }

    /// Rewind to frame zero and mark the source as playing.
    ///
    /// Called by the mixer exactly once per submission, before the source
    /// becomes visible to the mix cycle. Fails if the source is already
    /// active in a mixer.
    pub(crate) fn begin_playback(&self) -> Result<(), MixerError> {
        if self
            .shared
            .playing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(MixerError::SourceBusy);
        }

        // Not yet in any active list, so the decoder lock is uncontended.
        if let Err(e) = self.shared.decoder.lock().unwrap().seek_to_start() {
            self.shared.playing.store(false, Ordering::Release);
            return Err(e.into());
        }

        self.shared.stop_requested.store(false, Ordering::Release);
        *self.shared.finished.lock().unwrap() = false;
        Ok(())
    }

    /// Pull up to `max_frames` interleaved frames into `out`.
    ///
    /// Runs on the real-time thread. On the transition to silence
    /// (exhaustion or a pending stop request) this fires the completion
    /// signal exactly once and invokes the finish callback; afterwards it
    /// returns 0 without re-notifying.
    pub(crate) fn pull(&self, out: &mut [f32], max_frames: usize) -> usize {
        if !self.shared.playing.load(Ordering::Acquire) {
            return 0;
        }

        let stopping = self.shared.stop_requested.load(Ordering::Acquire);
        let produced = if stopping {
            0
        } else {
            self.shared.decoder.lock().unwrap().read_frames(out, max_frames)
        };

        if produced == 0 {
            self.finish(true);
        }
        produced
    }

    /// Silence the source without invoking the user finish callback.
    ///
    /// Used for abrupt stops; waiters are still woken.
    pub(crate) fn force_silence(&self) {
        self.finish(false);
    }

    fn finish(&self, invoke_callback: bool) {
        // At-most-once: only the thread that wins this swap notifies.
        if !self.shared.playing.swap(false, Ordering::AcqRel) {
            return;
        }

        {
            let mut finished = self.shared.finished.lock().unwrap();
            *finished = true;
        }

        // Outside the lock, so a callback that inspects this source
        // cannot deadlock against it.
        if invoke_callback {
            if let Some(callback) = self.shared.on_finish.lock().unwrap().as_mut() {
                callback();
            }
        }

        self.shared.cv_finished.notify_all();
    }
}

impl Clone for Source {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{constant_wav, wav_bytes};
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn test_source(bytes: Vec<u8>) -> Source {
        Source::from_bytes(bytes, &MixerConfig::default()).unwrap()
    }

    fn pull_to_silence(source: &Source) -> Vec<f32> {
        let mut collected = Vec::new();
        let mut out = vec![0.0f32; 64 * 2];
        loop {
            let produced = source.pull(&mut out, 64);
            if produced == 0 {
                break;
            }
            collected.extend_from_slice(&out[..produced * 2]);
        }
        collected
    }

    #[test]
    fn plays_to_natural_exhaustion_with_one_notification() {
        let source = test_source(constant_wav(0.5, 200));
        let finishes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finishes);
        source.set_on_finish(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!source.is_playing());
        source.begin_playback().unwrap();
        assert!(source.is_playing());

        let output = pull_to_silence(&source);
        assert_eq!(output.len(), 200 * 2);
        assert!(output.iter().all(|&s| s == 0.5));
        assert!(!source.is_playing());
        assert_eq!(finishes.load(Ordering::SeqCst), 1);

        // Pulling after silence is idempotent and does not re-notify
        let mut out = vec![0.0f32; 64 * 2];
        assert_eq!(source.pull(&mut out, 64), 0);
        assert_eq!(finishes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wait_before_first_play_returns_immediately() {
        let source = test_source(constant_wav(0.1, 16));
        source.wait();
        source.wait();
    }

    #[test]
    fn request_stop_takes_effect_on_next_pull() {
        let source = test_source(constant_wav(0.2, 10_000));
        let finishes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finishes);
        source.set_on_finish(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        source.begin_playback().unwrap();
        let mut out = vec![0.0f32; 64 * 2];
        assert_eq!(source.pull(&mut out, 64), 64);

        source.request_stop();
        // Not synchronous: still nominally playing until the next pull
        assert!(source.is_playing());

        assert_eq!(source.pull(&mut out, 64), 0);
        assert!(!source.is_playing());
        assert_eq!(finishes.load(Ordering::SeqCst), 1);
        source.wait();
    }

    #[test]
    fn resubmission_replays_from_frame_zero() {
        let samples: Vec<f32> = (0..128 * 2).map(|i| i as f32 / 256.0).collect();
        let source = test_source(wav_bytes(&samples, 2, 44100));

        source.begin_playback().unwrap();
        let first = pull_to_silence(&source);
        assert_eq!(first, samples);

        source.begin_playback().unwrap();
        let second = pull_to_silence(&source);
        assert_eq!(second, samples);
    }

    #[test]
    fn double_submission_is_rejected() {
        let source = test_source(constant_wav(0.3, 1024));
        source.begin_playback().unwrap();
        assert!(matches!(
            source.begin_playback(),
            Err(MixerError::SourceBusy)
        ));
        // The first submission is unaffected
        assert!(source.is_playing());
    }

    #[test]
    fn resubmission_clears_pending_stop() {
        let source = test_source(constant_wav(0.3, 256));
        source.begin_playback().unwrap();
        source.request_stop();
        let mut out = vec![0.0f32; 64 * 2];
        assert_eq!(source.pull(&mut out, 64), 0);

        source.begin_playback().unwrap();
        assert_eq!(source.pull(&mut out, 64), 64);
    }

    #[test]
    fn sample_rate_mismatch_is_tolerated_with_a_warning() {
        crate::test_util::init_logging();
        let source = test_source(wav_bytes(&[0.1f32; 16], 2, 48000));
        source.begin_playback().unwrap();
        let mut out = vec![0.0f32; 8 * 2];
        assert_eq!(source.pull(&mut out, 8), 8);
    }

    #[test]
    fn concurrent_waiters_all_observe_completion() {
        let source = test_source(constant_wav(0.4, 2048));
        source.begin_playback().unwrap();

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let handle = source.clone();
                thread::spawn(move || {
                    handle.wait();
                    assert!(!handle.is_playing());
                })
            })
            .collect();

        // Simulated device callback drains the source
        pull_to_silence(&source);

        for waiter in waiters {
            waiter.join().unwrap();
        }

        // Late waiters return immediately
        source.wait();
    }

    #[test]
    fn force_silence_wakes_waiters_without_callback() {
        let source = test_source(constant_wav(0.4, 10_000));
        let finishes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finishes);
        source.set_on_finish(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        source.begin_playback().unwrap();
        source.force_silence();

        assert!(!source.is_playing());
        assert_eq!(finishes.load(Ordering::SeqCst), 0);
        source.wait();
    }
}
