//! Integration test crate for LiveCast.
//!
//! This crate exists solely to hold cross-crate integration tests.
//! It depends on every livecast crate to verify they work together.

#[cfg(test)]
mod support;

#[cfg(test)]
mod dispatch;

#[cfg(test)]
mod video;

#[cfg(test)]
mod audio;

#[cfg(test)]
mod encoder;

#[cfg(test)]
mod properties;
