//! Text file to MP3 conversion through remote text-to-speech APIs.
//!
//! The CLI in `main.rs` wires these pieces together: [`config::ConfigStore`]
//! supplies keys and defaults, [`conversion::plan_conversion`] reads the input
//! and resolves presets, and a [`provider::TtsProvider`] streams the audio to
//! disk while reporting progress through a [`progress::ProgressSink`].

pub mod config;
pub mod conversion;
pub mod download;
pub mod error;
pub mod fish;
pub mod input;
pub mod output;
pub mod presets;
pub mod progress;
pub mod provider;

pub use error::{Result, VoiceForgeError};
