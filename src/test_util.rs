//! Shared helpers for unit tests: in-memory WAV fixtures that exercise
//! the real symphonia decode path without touching the filesystem.

use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};

/// Encode interleaved f32 samples as WAV bytes.
pub fn wav_bytes(samples: &[f32], channels: u16, sample_rate: u32) -> Vec<u8> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut cursor = Cursor::new(Vec::new());
    let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
    for &sample in samples {
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();

    cursor.into_inner()
}

/// Route `log` output to the test harness.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Stereo WAV at 44.1 kHz holding `frames` frames of a constant value.
pub fn constant_wav(value: f32, frames: usize) -> Vec<u8> {
    let samples = vec![value; frames * 2];
    wav_bytes(&samples, 2, 44100)
}
