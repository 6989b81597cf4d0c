//! Interleaved frame layout: the `Sample` element contract and
//! planar ↔ interleaved conversions.
//!
//! A *frame* is `nchannels` samples stored contiguously; frame `i + 1`
//! follows frame `i`. The ring transports whole frames, so every length
//! that crosses the API is a multiple of the channel count.

/// Marker trait for sample types the rings may transport.
///
/// A sample must be bit-copyable with no destructor (`Copy`), movable
/// across threads (`Send`), and supply its silence value via `Default`
/// (used by the PAD underflow policy).
///
/// Automatically implemented for all qualifying types.
pub trait Sample: Copy + Default + Send + 'static {}
impl<T> Sample for T where T: Copy + Default + Send + 'static {}

/// Interleaves planar channel slices into `dst`.
///
/// `channels` holds one slice per channel, all of equal length. `dst` is
/// cleared and refilled with `channels[0].len()` frames.
pub fn interleave<T: Sample>(channels: &[&[T]], dst: &mut Vec<T>) {
    dst.clear();
    let nframes = channels.first().map_or(0, |ch| ch.len());
    dst.reserve(nframes * channels.len());
    for frame in 0..nframes {
        for ch in channels {
            dst.push(ch[frame]);
        }
    }
}

/// Splits interleaved `data` into one owned row per channel.
///
/// Trailing samples that do not form a whole frame are ignored, matching
/// the flat write overload's `len / nchannels` frame inference.
#[must_use]
pub fn deinterleave<T: Sample>(data: &[T], nchannels: usize) -> Vec<Vec<T>> {
    let nframes = data.len() / nchannels;
    let mut rows = vec![Vec::with_capacity(nframes); nchannels];
    for frame in data.chunks_exact(nchannels) {
        for (row, &sample) in rows.iter_mut().zip(frame) {
            row.push(sample);
        }
    }
    rows
}
