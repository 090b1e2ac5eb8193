//! CPU pixel format adapter.
//!
//! Handles what encoders attached to a canvas usually ask for: a smaller
//! frame in the same layout, NV12/I420 swaps, and 4:2:2 packed capture
//! input reduced to 4:2:0. Scaling is nearest-neighbour.

use livecast_core::{FramePlane, LiveCastError, MediaFormat, PixelFormat, Result, VideoFormat};
use livecast_engine::{BufferHandle, BufferMut, FormatAdapter};
use rayon::prelude::*;

/// Stateless CPU converter for video buffers.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuConverter;

impl CpuConverter {
    pub fn new() -> Self {
        Self
    }

    fn supports_video(from: &VideoFormat, to: &VideoFormat) -> bool {
        if !from.is_valid() || !to.is_valid() {
            return false;
        }
        let same_size = from.width == to.width && from.height == to.height;
        match (from.pixel_format, to.pixel_format) {
            (a, b) if a == b => same_size || is_scalable(a),
            (PixelFormat::Uyvy, PixelFormat::Nv12 | PixelFormat::I420) => same_size,
            (PixelFormat::Nv12, PixelFormat::I420) | (PixelFormat::I420, PixelFormat::Nv12) => true,
            _ => false,
        }
    }
}

/// Packed 4:2:2 formats cannot be resampled one pixel at a time.
fn is_scalable(format: PixelFormat) -> bool {
    !matches!(format, PixelFormat::Uyvy | PixelFormat::Yuy2)
}

impl FormatAdapter for CpuConverter {
    fn supports(&self, from: &MediaFormat, to: &MediaFormat) -> bool {
        match (from.as_video(), to.as_video()) {
            (Some(from), Some(to)) => Self::supports_video(from, to),
            _ => false,
        }
    }

    fn convert(&self, src: &BufferHandle, dst: &mut BufferMut) -> Result<()> {
        let (src_format, dst_format) = (*src.format(), *dst.format());
        let mismatch = move || LiveCastError::FormatMismatch {
            from: src_format.to_string(),
            to: dst_format.to_string(),
        };
        let (Some(from), Some(to)) = (src_format.as_video().copied(), dst_format.as_video().copied())
        else {
            return Err(mismatch());
        };
        if !Self::supports_video(&from, &to) {
            return Err(mismatch());
        }
        let input = src.video_planes().ok_or_else(mismatch)?;
        let output = dst.video_planes_mut().ok_or_else(mismatch)?;

        match (from.pixel_format, to.pixel_format) {
            (a, b) if a == b => {
                for (s, d) in input.iter().zip(output.iter_mut()) {
                    scale_plane(s, d);
                }
            }
            (PixelFormat::Uyvy, PixelFormat::Nv12) => {
                let (luma, chroma) = output.split_at_mut(1);
                uyvy_to_nv12(&input[0], &mut luma[0], &mut chroma[0]);
            }
            (PixelFormat::Uyvy, PixelFormat::I420) => {
                let (luma, chroma) = output.split_at_mut(1);
                let (u, v) = chroma.split_at_mut(1);
                uyvy_to_i420(&input[0], &mut luma[0], &mut u[0], &mut v[0]);
            }
            (PixelFormat::Nv12, PixelFormat::I420) => {
                scale_plane(&input[0], &mut output[0]);
                let (u, v) = output[1..].split_at_mut(1);
                split_chroma(&input[1], &mut u[0], &mut v[0]);
            }
            (PixelFormat::I420, PixelFormat::Nv12) => {
                scale_plane(&input[0], &mut output[0]);
                merge_chroma(&input[1], &input[2], &mut output[1]);
            }
            _ => return Err(mismatch()),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "cpu"
    }
}

/// Source index for destination index `i` under nearest-neighbour sampling.
#[inline]
fn nearest(i: usize, dst_len: u32, src_len: u32) -> usize {
    (i as u64 * src_len as u64 / dst_len.max(1) as u64) as usize
}

/// Copy or nearest-neighbour resample one plane into another of the same
/// pixel size.
pub fn scale_plane(src: &FramePlane, dst: &mut FramePlane) {
    let bpp = dst.bytes_per_pixel();
    let (dst_w, dst_h, dst_stride) = (dst.width, dst.height, dst.stride);
    let row_bytes = dst.row_bytes();
    let same_size = src.width == dst_w && src.height == dst_h;

    dst.data
        .par_chunks_mut(dst_stride)
        .take(dst_h as usize)
        .enumerate()
        .for_each(|(y, out)| {
            let src_row = src.row(nearest(y, dst_h, src.height) as u32);
            if same_size {
                out[..row_bytes].copy_from_slice(src_row);
                return;
            }
            for x in 0..dst_w as usize {
                let sx = nearest(x, dst_w, src.width) * bpp;
                out[x * bpp..(x + 1) * bpp].copy_from_slice(&src_row[sx..sx + bpp]);
            }
        });
}

/// Interleaved UV plane into separate U and V planes.
fn split_chroma(uv: &FramePlane, u: &mut FramePlane, v: &mut FramePlane) {
    for y in 0..u.height {
        let src = uv.row(nearest(y as usize, u.height, uv.height) as u32);
        let (u_row, v_row) = (u.row_mut(y), v.row_mut(y));
        for x in 0..u_row.len() {
            let sx = nearest(x, u_row.len() as u32, uv.width) * 2;
            u_row[x] = src[sx];
            v_row[x] = src[sx + 1];
        }
    }
}

/// Separate U and V planes into one interleaved UV plane.
fn merge_chroma(u: &FramePlane, v: &FramePlane, uv: &mut FramePlane) {
    let width = uv.width;
    for y in 0..uv.height {
        let sy = nearest(y as usize, uv.height, u.height) as u32;
        let (u_row, v_row) = (u.row(sy), v.row(sy));
        let out = uv.row_mut(y);
        for x in 0..width as usize {
            let sx = nearest(x, width, u.width);
            out[x * 2] = u_row[sx];
            out[x * 2 + 1] = v_row[sx];
        }
    }
}

/// Average the chroma of two UYVY rows.
#[inline]
fn average(a: u8, b: u8) -> u8 {
    ((a as u16 + b as u16) / 2) as u8
}

/// Walk UYVY input two rows and two pixels at a time, writing luma and
/// calling `chroma` with the vertically averaged (U, V) pair.
fn walk_uyvy(
    input: &FramePlane,
    luma: &mut FramePlane,
    mut chroma: impl FnMut(u32, usize, u8, u8),
) {
    for y in (0..input.height).step_by(2) {
        let (top, bottom) = (input.row(y), input.row(y + 1));
        for (pair, (a, b)) in top.chunks_exact(4).zip(bottom.chunks_exact(4)).enumerate() {
            // U Y0 V Y1
            let x = pair * 2;
            let out = luma.row_mut(y);
            out[x] = a[1];
            out[x + 1] = a[3];
            let out = luma.row_mut(y + 1);
            out[x] = b[1];
            out[x + 1] = b[3];
            chroma(y / 2, pair, average(a[0], b[0]), average(a[2], b[2]));
        }
    }
}

/// UYVY 4:2:2 to NV12 at the same size.
pub fn uyvy_to_nv12(input: &FramePlane, luma: &mut FramePlane, uv: &mut FramePlane) {
    walk_uyvy(input, luma, |row, pair, u, v| {
        let out = uv.row_mut(row);
        out[pair * 2] = u;
        out[pair * 2 + 1] = v;
    });
}

/// UYVY 4:2:2 to I420 at the same size.
pub fn uyvy_to_i420(input: &FramePlane, luma: &mut FramePlane, u: &mut FramePlane, v: &mut FramePlane) {
    walk_uyvy(input, luma, |row, pair, cb, cr| {
        u.row_mut(row)[pair] = cb;
        v.row_mut(row)[pair] = cr;
    });
}
