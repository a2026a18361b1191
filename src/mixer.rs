//! Output mixer
//!
//! The [`Mixer`] owns the cpal output stream and the control plane:
//! submitting sources, master volume, abrupt stops, and the aggregate
//! "is anything playing" signal. The per-cycle mixing itself lives in
//! [`crate::engine::MixEngine`], which runs inside the device callback.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use ringbuf::traits::{Producer, Split};
use ringbuf::HeapRb;
use thiserror::Error;

use crate::config::MixerConfig;
use crate::decoder::DecodeError;
use crate::engine::{MixEngine, MixerState};
use crate::source::Source;

/// Capacity of the submission queue between `play()` and the callback.
const SUBMIT_QUEUE_CAPACITY: usize = 64;

/// Errors that can occur while opening or driving the output device
#[derive(Error, Debug)]
pub enum MixerError {
    #[error("No audio output device available")]
    NoDevice,

    #[error("Failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("Failed to start output stream: {0}")]
    StartStream(#[from] cpal::PlayStreamError),

    #[error("Failed to stop output stream: {0}")]
    StopStream(#[from] cpal::PauseStreamError),

    #[error("Source is already playing")]
    SourceBusy,

    #[error("Submission queue is full")]
    QueueFull,

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Real-time audio mixer bound to one output device.
///
/// Construction opens the default output device with the requested
/// configuration and registers the pull callback; the stream stays
/// paused until the first [`Mixer::play`]. Dropping the mixer stops the
/// stream and releases the device.
///
/// `Mixer` is bound to a live hardware callback and is not `Send`; keep
/// it on one thread and hand out [`Source`] clones for cross-thread
/// waiting and control.
pub struct Mixer {
    stream: cpal::Stream,
    state: Arc<MixerState>,
    active: Arc<Mutex<Vec<Source>>>,
    submit: Mutex<ringbuf::HeapProd<Source>>,
    config: MixerConfig,
}

impl Mixer {
    /// Open the default output device and register the mix callback.
    pub fn new(config: MixerConfig) -> Result<Self, MixerError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(MixerError::NoDevice)?;
        log::info!(
            "Using output device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: SampleRate(config.sample_rate),
            buffer_size: BufferSize::Fixed(config.frames_per_period()),
        };
        log::info!(
            "Output config: {} Hz, {} channels, {} frames/period",
            config.sample_rate,
            config.channels,
            config.frames_per_period()
        );

        let state = Arc::new(MixerState::new());
        let active = Arc::new(Mutex::new(Vec::new()));
        let (submit, incoming) = HeapRb::<Source>::new(SUBMIT_QUEUE_CAPACITY).split();
        let mut engine = MixEngine::new(
            Arc::clone(&state),
            Arc::clone(&active),
            incoming,
            config.channels as usize,
        );

        let stream = device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                engine.process(data);
            },
            |err| log::error!("Audio output error: {}", err),
            None,
        )?;
        // Some hosts deliver callbacks as soon as the stream is built;
        // keep the device idle until the first play()
        stream.pause()?;

        Ok(Self {
            stream,
            state,
            active,
            submit: Mutex::new(submit),
            config,
        })
    }

    /// Submit a source for playback and start the device if it is idle.
    ///
    /// Rewinds the source to frame zero, hands it to the real-time
    /// callback, and returns immediately; playback is asynchronous.
    /// Fails with [`MixerError::SourceBusy`] if the source is already
    /// active in a mixer.
    pub fn play(&self, source: &Source) -> Result<(), MixerError> {
        source.begin_playback()?;

        {
            let mut submit = self.submit.lock().unwrap();
            if submit.try_push(source.clone()).is_err() {
                source.force_silence();
                return Err(MixerError::QueueFull);
            }
        }

        self.state.set_silent(false);
        self.start()
    }

    /// Ensure the output stream is running.
    ///
    /// A no-op, not an error, if it already is.
    pub fn start(&self) -> Result<(), MixerError> {
        if self.state.try_start() {
            if let Err(e) = self.stream.play() {
                self.state.mark_stopped();
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Request that the next mix cycle drop every active source.
    ///
    /// Abrupt silence: sources are cleared regardless of their natural
    /// completion state and their finish callbacks are not invoked,
    /// though threads blocked in [`Source::wait`] are still woken.
    /// Fire-and-forget and idempotent.
    pub fn stop_audios(&self) {
        self.state.request_drain();
    }

    /// Stop everything: clear the active list and halt the device.
    ///
    /// Sources that were active are force-silenced so pending `wait()`
    /// calls return promptly; their finish callbacks are not invoked.
    /// A source submitted concurrently with this call may be left queued
    /// until the stream is started again.
    pub fn stop_stream(&self) -> Result<(), MixerError> {
        self.stop_audios();
        self.stream.pause()?;
        self.state.mark_stopped();

        // The device is halted, so no further cycles will run; silence
        // the remaining sources synchronously.
        let mut active = self.active.lock().unwrap();
        for source in active.drain(..) {
            source.force_silence();
        }
        drop(active);

        self.state.set_silent(true);
        Ok(())
    }

    /// Block until no sources are playing. Returns immediately if the
    /// mixer is already silent.
    pub fn wait(&self) {
        self.state.wait();
    }

    /// Whether nothing is currently playing. May be momentarily stale
    /// while submissions are in flight.
    pub fn is_silent(&self) -> bool {
        self.state.is_silent()
    }

    /// Set the master volume applied from the next mix cycle on.
    ///
    /// The nominal range is `0.0..=1.0`; larger values are accepted and
    /// may clip.
    pub fn set_volume(&self, volume: f32) {
        self.state.set_volume(volume);
    }

    /// Current master volume.
    pub fn volume(&self) -> f32 {
        self.state.volume()
    }

    /// The configuration this mixer was opened with.
    pub fn config(&self) -> &MixerConfig {
        &self.config
    }
}

impl Drop for Mixer {
    fn drop(&mut self) {
        if let Err(e) = self.stop_stream() {
            log::warn!("Failed to stop output stream on drop: {}", e);
        }
    }
}
