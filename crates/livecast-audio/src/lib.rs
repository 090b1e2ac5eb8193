//! LiveCast Audio - Mix engine
//!
//! Sources queue time-aligned blocks; each window the [`Mixer`] sums them
//! into up to six buses, clamps, and hands the result to each bus's
//! consumers.

pub mod clamp;
pub mod mixer;
pub mod output;
pub mod source;

pub use clamp::{clamp_channel, clamp_channels, sanitize_sample};
pub use mixer::{BusStats, MixBus, MixReport, Mixer, MixerStats};
pub use output::{AudioOutput, AudioOutputStats};
pub use source::{AudioBlock, MixSource, SourceId, SourceStats};
