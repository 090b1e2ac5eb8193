//! Media format descriptors for video frames and audio blocks.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Pixel layout of a video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Planar YUV 4:2:0
    I420,
    /// Semi-planar YUV 4:2:0 (Y plane, interleaved UV). Hardware encoder native.
    #[default]
    Nv12,
    /// Planar YUV 4:4:4
    I444,
    /// Packed YUV 4:2:2 (U Y V Y)
    Uyvy,
    /// Packed YUV 4:2:2 (Y U Y V)
    Yuy2,
    /// Packed 8-bit RGBA
    Rgba,
    /// Packed 8-bit BGRA
    Bgra,
    /// Packed 8-bit BGR with padding byte
    Bgrx,
    /// 8-bit grayscale
    Y800,
}

/// Width, height and bytes per pixel of one plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneGeometry {
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: usize,
}

impl PixelFormat {
    /// Number of planes for this format.
    pub fn plane_count(self) -> usize {
        match self {
            Self::I420 | Self::I444 => 3,
            Self::Nv12 => 2,
            _ => 1,
        }
    }

    /// Bytes per pixel for packed formats, or 0 for planar.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba | Self::Bgra | Self::Bgrx => 4,
            Self::Uyvy | Self::Yuy2 => 2,
            Self::Y800 => 1,
            Self::I420 | Self::Nv12 | Self::I444 => 0,
        }
    }

    pub fn is_planar(self) -> bool {
        self.plane_count() > 1
    }

    /// Formats with 2x2 chroma subsampling need even dimensions.
    pub fn requires_even_dimensions(self) -> bool {
        matches!(self, Self::I420 | Self::Nv12 | Self::Uyvy | Self::Yuy2)
    }

    /// Geometry of every plane for a frame of the given size.
    pub fn planes(self, width: u32, height: u32) -> SmallVec<[PlaneGeometry; 4]> {
        let plane = |width, height, bytes_per_pixel| PlaneGeometry {
            width,
            height,
            bytes_per_pixel,
        };
        match self {
            Self::I420 => smallvec::smallvec![
                plane(width, height, 1),
                plane(width / 2, height / 2, 1),
                plane(width / 2, height / 2, 1),
            ],
            Self::Nv12 => smallvec::smallvec![
                plane(width, height, 1),
                // UV interleaved at half resolution
                plane(width / 2, height / 2, 2),
            ],
            Self::I444 => smallvec::smallvec![
                plane(width, height, 1),
                plane(width, height, 1),
                plane(width, height, 1),
            ],
            packed => smallvec::smallvec![plane(width, height, packed.bytes_per_pixel())],
        }
    }

    /// Tightly packed frame size in bytes (no stride padding).
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        self.planes(width, height)
            .iter()
            .map(|p| p.width as usize * p.height as usize * p.bytes_per_pixel)
            .sum()
    }
}

/// Complete description of a video frame layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoFormat {
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

impl VideoFormat {
    pub const fn new(pixel_format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            pixel_format,
            width,
            height,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.pixel_format.frame_size(self.width, self.height)
    }

    pub fn is_valid(&self) -> bool {
        if self.width == 0 || self.height == 0 {
            return false;
        }
        !self.pixel_format.requires_even_dimensions()
            || (self.width % 2 == 0 && self.height % 2 == 0)
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}x{}", self.pixel_format, self.width, self.height)
    }
}

/// Speaker layout of an audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SpeakerLayout {
    Mono,
    #[default]
    Stereo,
    /// 2.1
    TwoOne,
    /// 4.0
    Quad,
    /// 4.1
    FourOne,
    /// 5.1
    FiveOne,
    /// 7.1
    SevenOne,
}

impl SpeakerLayout {
    pub fn channel_count(self) -> usize {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
            Self::TwoOne => 3,
            Self::Quad => 4,
            Self::FourOne => 5,
            Self::FiveOne => 6,
            Self::SevenOne => 8,
        }
    }
}

/// Layout of one audio processing block: planar 32-bit float samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub layout: SpeakerLayout,
    /// Frames (samples per channel) in one block.
    pub frames: usize,
}

impl AudioFormat {
    pub const fn new(sample_rate: u32, layout: SpeakerLayout, frames: usize) -> Self {
        Self {
            sample_rate,
            layout,
            frames,
        }
    }

    pub fn channels(&self) -> usize {
        self.layout.channel_count()
    }

    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0 && self.frames > 0
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(48_000, SpeakerLayout::Stereo, 1024)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {} Hz x{} frames",
            self.layout, self.sample_rate, self.frames
        )
    }
}

/// Format descriptor of any buffer handled by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaFormat {
    Video(VideoFormat),
    Audio(AudioFormat),
}

impl MediaFormat {
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Video(v) => v.is_valid(),
            Self::Audio(a) => a.is_valid(),
        }
    }

    pub fn as_video(&self) -> Option<&VideoFormat> {
        match self {
            Self::Video(v) => Some(v),
            Self::Audio(_) => None,
        }
    }

    pub fn as_audio(&self) -> Option<&AudioFormat> {
        match self {
            Self::Audio(a) => Some(a),
            Self::Video(_) => None,
        }
    }
}

impl From<VideoFormat> for MediaFormat {
    fn from(format: VideoFormat) -> Self {
        Self::Video(format)
    }
}

impl From<AudioFormat> for MediaFormat {
    fn from(format: AudioFormat) -> Self {
        Self::Audio(format)
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video(v) => v.fmt(f),
            Self::Audio(a) => a.fmt(f),
        }
    }
}
