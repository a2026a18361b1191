//! polymix - Real-time audio mixing and playback engine
//!
//! Decodes any number of independent audio sources with symphonia and
//! mixes them into a single cpal output stream. Mixing happens on the
//! device's real-time callback thread: each cycle pulls frames from
//! every active source, sums them scaled by the master volume, and drops
//! sources that have fallen silent. Control calls (`play`, stop, volume)
//! and blocking waits are safe from ordinary application threads.
//!
//! ```no_run
//! use polymix::{Mixer, MixerConfig, Source};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MixerConfig::default();
//! let mixer = Mixer::new(config.clone())?;
//!
//! let chord = Source::from_path("chord.ogg", &config)?;
//! let melody = Source::from_path("melody.ogg", &config)?;
//!
//! mixer.play(&chord)?;
//! mixer.play(&melody)?; // mixed on top of the chord
//!
//! melody.wait();
//! mixer.wait(); // until everything is silent
//! # Ok(())
//! # }
//! ```

mod config;
mod decoder;
mod engine;
mod mixer;
mod source;

#[cfg(test)]
mod test_util;

pub use config::MixerConfig;
pub use decoder::{DecodeError, Decoder};
pub use mixer::{Mixer, MixerError};
pub use source::Source;
