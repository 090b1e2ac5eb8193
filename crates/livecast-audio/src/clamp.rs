//! Sample sanitizing and clamping.

use rayon::prelude::*;

/// Replace non-finite samples with silence and clamp the rest to [-1, 1].
#[inline]
pub fn sanitize_sample(sample: f32) -> f32 {
    if sample.is_finite() {
        sample.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Sanitize and clamp one channel in place.
pub fn clamp_channel(samples: &mut [f32]) {
    for sample in samples.iter_mut() {
        *sample = sanitize_sample(*sample);
    }
}

/// Sanitize and clamp every channel, channels in parallel.
pub fn clamp_channels(channels: &mut [Vec<f32>]) {
    channels
        .par_iter_mut()
        .for_each(|channel| clamp_channel(channel));
}
