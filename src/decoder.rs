//! Pull-based audio decoding
//!
//! Wraps a symphonia format reader + codec decoder behind a simple
//! "read up to N interleaved f32 frames" interface. The mix cycle pulls
//! from this on the real-time thread, so after construction the decoder
//! only reuses buffers that grow and never shrink.

use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use thiserror::Error;

/// Errors that can occur while opening or rewinding a decoder
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to open file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to probe audio format: {0}")]
    ProbeError(String),

    #[error("No audio tracks found")]
    NoTracks,

    #[error("Decoder error: {0}")]
    DecoderError(String),

    #[error("Seek failed: {0}")]
    SeekError(String),
}

/// Pull decoder producing interleaved f32 frames at a fixed channel count.
pub struct Decoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    sample_rate: u32,
    out_channels: usize,

    /// Reused per-packet conversion buffer (source channel layout).
    sample_buf: Option<SampleBuffer<f32>>,

    /// Samples decoded but not yet handed out, already remapped to
    /// `out_channels`. Cleared (capacity kept) on each refill.
    pending: Vec<f32>,
    pending_pos: usize,

    exhausted: bool,

    /// Whether any packet has been consumed since the last rewind.
    dirty: bool,
}

impl Decoder {
    /// Open a decoder for an audio file on disk.
    pub fn from_path(path: impl AsRef<Path>, out_channels: usize) -> Result<Self, DecodeError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        // Create hint from file extension
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        Self::open(mss, hint, out_channels)
    }

    /// Open a decoder for an encoded audio buffer held in memory.
    pub fn from_bytes(
        bytes: impl AsRef<[u8]> + Send + Sync + 'static,
        out_channels: usize,
    ) -> Result<Self, DecodeError> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
        Self::open(mss, Hint::new(), out_channels)
    }

    fn open(mss: MediaSourceStream, hint: Hint, out_channels: usize) -> Result<Self, DecodeError> {
        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DecodeError::ProbeError(e.to_string()))?;

        let format = probed.format;

        // Get the first decodable track
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoTracks)?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::DecoderError(e.to_string()))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            out_channels,
            sample_buf: None,
            pending: Vec::new(),
            pending_pos: 0,
            exhausted: false,
            dirty: false,
        })
    }

    /// Native sample rate of the decoded track in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of interleaved channels produced per frame.
    pub fn channels(&self) -> usize {
        self.out_channels
    }

    /// Read up to `max_frames` interleaved frames into `out`.
    ///
    /// Returns the number of frames actually produced; 0 signals
    /// exhaustion. Subsequent calls after exhaustion keep returning 0
    /// until [`Decoder::seek_to_start`] is called.
    pub fn read_frames(&mut self, out: &mut [f32], max_frames: usize) -> usize {
        let wanted = (max_frames * self.out_channels).min(out.len());
        let mut written = 0;

        while written < wanted {
            if self.pending_pos < self.pending.len() {
                let take = (self.pending.len() - self.pending_pos).min(wanted - written);
                out[written..written + take]
                    .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + take]);
                self.pending_pos += take;
                written += take;
            } else if self.exhausted {
                break;
            } else {
                self.refill();
            }
        }

        written / self.out_channels
    }

    /// Decode packets until `pending` holds samples or the stream ends.
    fn refill(&mut self) {
        self.pending.clear();
        self.pending_pos = 0;
        self.dirty = true;

        while self.pending.is_empty() && !self.exhausted {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.exhausted = true;
                    return;
                }
                Err(_) => {
                    self.exhausted = true;
                    return;
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let src_channels = spec.channels.count().max(1);
                    let needed = decoded.capacity() * src_channels;

                    // Reused across packets; recreated only if a packet
                    // needs more room than any before it.
                    if self.sample_buf.as_ref().map_or(true, |b| b.capacity() < needed) {
                        self.sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                    }
                    if let Some(sample_buf) = &mut self.sample_buf {
                        sample_buf.copy_interleaved_ref(decoded);

                        let samples = sample_buf.samples();
                        let frames = samples.len() / src_channels;

                        // Remap to the output channel layout: mono fans out
                        // to every channel, extra source channels are
                        // dropped, extra output channels are silent.
                        for frame in 0..frames {
                            let base = frame * src_channels;
                            for ch in 0..self.out_channels {
                                let sample = if src_channels == 1 {
                                    samples[base]
                                } else if ch < src_channels {
                                    samples[base + ch]
                                } else {
                                    0.0
                                };
                                self.pending.push(sample);
                            }
                        }
                    }
                }
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(SymphoniaError::IoError(_)) => continue,
                Err(_) => {
                    self.exhausted = true;
                    return;
                }
            }
        }
    }

    /// Rewind to frame zero so the stream can be decoded again.
    pub fn seek_to_start(&mut self) -> Result<(), DecodeError> {
        if self.dirty {
            self.format
                .seek(
                    SeekMode::Accurate,
                    SeekTo::Time {
                        time: Time::from(0.0),
                        track_id: Some(self.track_id),
                    },
                )
                .map_err(|e| DecodeError::SeekError(e.to_string()))?;
            self.decoder.reset();
            self.dirty = false;
        }

        self.pending.clear();
        self.pending_pos = 0;
        self.exhausted = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::wav_bytes;

    fn ramp(frames: usize, channels: usize) -> Vec<f32> {
        (0..frames * channels).map(|i| i as f32 / 1000.0).collect()
    }

    #[test]
    fn decodes_stereo_wav_exactly() {
        let samples = ramp(512, 2);
        let mut decoder = Decoder::from_bytes(wav_bytes(&samples, 2, 44100), 2).unwrap();

        let mut out = vec![0.0f32; 512 * 2];
        let produced = decoder.read_frames(&mut out, 512);
        assert_eq!(produced, 512);
        assert_eq!(out, samples);

        // Stream is now exhausted
        assert_eq!(decoder.read_frames(&mut out, 512), 0);
        assert_eq!(decoder.read_frames(&mut out, 512), 0);
    }

    #[test]
    fn partial_reads_cross_packet_boundaries() {
        let samples = ramp(300, 2);
        let mut decoder = Decoder::from_bytes(wav_bytes(&samples, 2, 44100), 2).unwrap();

        let mut collected = Vec::new();
        let mut out = vec![0.0f32; 7 * 2];
        loop {
            let produced = decoder.read_frames(&mut out, 7);
            if produced == 0 {
                break;
            }
            collected.extend_from_slice(&out[..produced * 2]);
        }
        assert_eq!(collected, samples);
    }

    #[test]
    fn mono_fans_out_to_stereo() {
        let samples = ramp(64, 1);
        let mut decoder = Decoder::from_bytes(wav_bytes(&samples, 1, 44100), 2).unwrap();

        let mut out = vec![0.0f32; 64 * 2];
        let produced = decoder.read_frames(&mut out, 64);
        assert_eq!(produced, 64);
        for (frame, &value) in samples.iter().enumerate() {
            assert_eq!(out[frame * 2], value);
            assert_eq!(out[frame * 2 + 1], value);
        }
    }

    #[test]
    fn seek_to_start_replays_from_frame_zero() {
        let samples = ramp(256, 2);
        let mut decoder = Decoder::from_bytes(wav_bytes(&samples, 2, 44100), 2).unwrap();

        let mut out = vec![0.0f32; 100 * 2];
        assert_eq!(decoder.read_frames(&mut out, 100), 100);

        decoder.seek_to_start().unwrap();

        let mut replay = vec![0.0f32; 256 * 2];
        assert_eq!(decoder.read_frames(&mut replay, 256), 256);
        assert_eq!(replay, samples);
    }

    #[test]
    fn malformed_input_fails_to_open() {
        let result = Decoder::from_bytes(b"definitely not audio".to_vec(), 2);
        assert!(matches!(result, Err(DecodeError::ProbeError(_))));
    }

    #[test]
    fn reports_track_sample_rate() {
        let samples = ramp(32, 2);
        let decoder = Decoder::from_bytes(wav_bytes(&samples, 2, 48000), 2).unwrap();
        assert_eq!(decoder.sample_rate(), 48000);
        assert_eq!(decoder.channels(), 2);
    }
}
