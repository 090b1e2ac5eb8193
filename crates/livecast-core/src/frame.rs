//! Backing storage for video frames and audio blocks.
//!
//! Storage is allocated once per pooled buffer and recycled; nothing in
//! here is reference counted. Sharing lives in the engine's buffer handles.

use crate::format::{AudioFormat, MediaFormat, VideoFormat};
use smallvec::SmallVec;

/// Row alignment for SIMD kernels and device surface mapping.
pub const STRIDE_ALIGNMENT: usize = 64;

/// A plane of pixel data with stride information.
#[derive(Debug, Clone)]
pub struct FramePlane {
    /// Raw pixel data
    pub data: Vec<u8>,
    /// Bytes per row (includes padding)
    pub stride: usize,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    bytes_per_pixel: usize,
}

impl FramePlane {
    /// Create a zeroed plane with a 64-byte aligned stride.
    pub fn new(width: u32, height: u32, bytes_per_pixel: usize) -> Self {
        let min_stride = (width as usize) * bytes_per_pixel;
        let stride = (min_stride + STRIDE_ALIGNMENT - 1) & !(STRIDE_ALIGNMENT - 1);
        Self {
            data: vec![0u8; stride * height as usize],
            stride,
            width,
            height,
            bytes_per_pixel,
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.bytes_per_pixel
    }

    /// Visible bytes of one row (stride padding excluded).
    #[inline]
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.bytes_per_pixel
    }

    #[inline]
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.row_bytes()]
    }

    #[inline]
    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.stride;
        let end = start + self.row_bytes();
        &mut self.data[start..end]
    }

    /// Copy tightly packed rows (`src_stride` bytes apart) into this plane.
    pub fn copy_from_packed(&mut self, src: &[u8], src_stride: usize) {
        let row_bytes = self.row_bytes().min(src_stride);
        for y in 0..self.height {
            let start = y as usize * src_stride;
            let Some(src_row) = src.get(start..start + row_bytes) else {
                break;
            };
            self.row_mut(y)[..row_bytes].copy_from_slice(src_row);
        }
    }
}

/// Planes of a video frame or channels of an audio block.
#[derive(Debug, Clone)]
pub enum MediaData {
    /// Pixel planes (1-3 depending on format).
    Video(SmallVec<[FramePlane; 3]>),
    /// Planar f32 channels, `frames` samples each.
    Audio(SmallVec<[Vec<f32>; 8]>),
}

impl MediaData {
    /// Allocate zeroed storage laid out for `format`.
    pub fn allocate(format: &MediaFormat) -> Self {
        match format {
            MediaFormat::Video(video) => Self::allocate_video(video),
            MediaFormat::Audio(audio) => Self::allocate_audio(audio),
        }
    }

    fn allocate_video(format: &VideoFormat) -> Self {
        Self::Video(
            format
                .pixel_format
                .planes(format.width, format.height)
                .iter()
                .map(|g| FramePlane::new(g.width, g.height, g.bytes_per_pixel))
                .collect(),
        )
    }

    fn allocate_audio(format: &AudioFormat) -> Self {
        Self::Audio(
            (0..format.channels())
                .map(|_| vec![0.0f32; format.frames])
                .collect(),
        )
    }

    /// Number of pixel planes or audio channels.
    pub fn plane_count(&self) -> usize {
        match self {
            Self::Video(planes) => planes.len(),
            Self::Audio(channels) => channels.len(),
        }
    }

    /// Byte view of plane (or channel) `index`, suitable for mapping.
    pub fn plane_bytes(&self, index: usize) -> Option<&[u8]> {
        match self {
            Self::Video(planes) => planes.get(index).map(|p| p.data.as_slice()),
            Self::Audio(channels) => channels
                .get(index)
                .map(|c| bytemuck::cast_slice::<f32, u8>(c.as_slice())),
        }
    }

    /// Total memory usage in bytes.
    pub fn memory_size(&self) -> usize {
        (0..self.plane_count())
            .filter_map(|i| self.plane_bytes(i))
            .map(<[u8]>::len)
            .sum()
    }

    pub fn video_planes(&self) -> Option<&[FramePlane]> {
        match self {
            Self::Video(planes) => Some(planes.as_slice()),
            Self::Audio(_) => None,
        }
    }

    pub fn video_planes_mut(&mut self) -> Option<&mut [FramePlane]> {
        match self {
            Self::Video(planes) => Some(planes.as_mut_slice()),
            Self::Audio(_) => None,
        }
    }

    pub fn audio_channels(&self) -> Option<&[Vec<f32>]> {
        match self {
            Self::Audio(channels) => Some(channels.as_slice()),
            Self::Video(_) => None,
        }
    }

    pub fn audio_channels_mut(&mut self) -> Option<&mut [Vec<f32>]> {
        match self {
            Self::Audio(channels) => Some(channels.as_mut_slice()),
            Self::Video(_) => None,
        }
    }
}
