//! Frame descriptors and pixel format contracts shared by every crate.
//!
//! # Pointer model
//!
//! [`FrameData`] carries raw plane pointers exactly as the decoder ABI does.
//! The pointers are only valid while the owning surface's memory is alive
//! and, for texture memory, while the staging texture is mapped.  Safe
//! access goes through `hwdec_accel::FrameView`, which ties the pointer
//! lifetime to a lock guard.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

// ─── FourCC ──────────────────────────────────────────────────────────────────

/// Four-character pixel format code, packed little-endian like `MAKEFOURCC`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FourCc(pub u32);

impl FourCc {
    /// Y plane followed by an interleaved half-height UV plane, same pitch.
    pub const NV12: Self = Self::from_bytes(*b"NV12");
    /// Y plane, then U and V planes at half width and half height.
    pub const I420: Self = Self::from_bytes(*b"I420");
    /// Packed 8-bit BGRA, one plane, 4 bytes per pixel.
    pub const RGB4: Self = Self::from_bytes(*b"RGB4");
    /// NV12 layout with 16-bit samples.
    pub const P010: Self = Self::from_bytes(*b"P010");

    pub const fn from_bytes(b: [u8; 4]) -> Self {
        Self((b[0] as u32) | ((b[1] as u32) << 8) | ((b[2] as u32) << 16) | ((b[3] as u32) << 24))
    }

    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Whether the pool and view code know how to lay this format out.
    pub fn is_supported(self) -> bool {
        matches!(self, Self::NV12 | Self::I420 | Self::RGB4 | Self::P010)
    }

    /// Number of plane pointers a mapped surface must expose.
    pub fn plane_count(self) -> Result<usize> {
        match self {
            Self::NV12 | Self::P010 => Ok(2),
            Self::I420 => Ok(3),
            Self::RGB4 => Ok(1),
            other => Err(EngineError::UnsupportedFormat(other)),
        }
    }

    /// Per-plane row stride for a surface with luma `pitch`.
    pub fn plane_strides(self, pitch: usize) -> Result<[usize; 4]> {
        match self {
            Self::NV12 | Self::P010 => Ok([pitch, pitch, 0, 0]),
            Self::I420 => Ok([pitch, pitch / 2, pitch / 2, 0]),
            Self::RGB4 => Ok([pitch, 0, 0, 0]),
            other => Err(EngineError::UnsupportedFormat(other)),
        }
    }

    /// Per-plane row count for a surface of the given height.
    pub fn plane_rows(self, height: u32) -> Result<[usize; 4]> {
        let h = height as usize;
        let ch = h.div_ceil(2);
        match self {
            Self::NV12 | Self::P010 => Ok([h, ch, 0, 0]),
            Self::I420 => Ok([h, ch, ch, 0]),
            Self::RGB4 => Ok([h, 0, 0, 0]),
            other => Err(EngineError::UnsupportedFormat(other)),
        }
    }

    /// Dense system-memory layout of one surface.
    ///
    /// | Format | pitch     | planes                                   |
    /// |--------|-----------|------------------------------------------|
    /// | RGB4   | `4 × w`   | BGRA packed                              |
    /// | NV12   | `w`       | Y, UV at `pitch × h`                     |
    /// | P010   | `2 × w`   | Y, UV at `pitch × h`                     |
    /// | I420   | `w`       | Y, U at `pitch × h`, V after U           |
    pub fn host_layout(self, width: u32, height: u32) -> Result<SurfaceLayout> {
        let w = width as usize;
        let h = height as usize;
        let ch = h.div_ceil(2);
        let layout = match self {
            Self::RGB4 => SurfaceLayout {
                pitch: 4 * w,
                offsets: [0, 0, 0, 0],
                size: 4 * w * h,
            },
            Self::NV12 => SurfaceLayout {
                pitch: w,
                offsets: [0, w * h, 0, 0],
                size: w * h + w * ch,
            },
            Self::P010 => SurfaceLayout {
                pitch: 2 * w,
                offsets: [0, 2 * w * h, 0, 0],
                size: 2 * w * h + 2 * w * ch,
            },
            Self::I420 => {
                let chroma = (w / 2) * ch;
                SurfaceLayout {
                    pitch: w,
                    offsets: [0, w * h, w * h + chroma, 0],
                    size: w * h + 2 * chroma,
                }
            }
            other => return Err(EngineError::UnsupportedFormat(other)),
        };
        Ok(layout)
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.to_bytes();
        if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            for b in bytes {
                write!(f, "{}", b as char)?;
            }
            Ok(())
        } else {
            write!(f, "{:#010x}", self.0)
        }
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({self})")
    }
}

/// Byte offsets of each plane inside one dense host surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceLayout {
    pub pitch: usize,
    pub offsets: [usize; 4],
    pub size: usize,
}

// ─── Codec identifiers ───────────────────────────────────────────────────────

/// Compressed stream codec, FourCC-packed like the decoder ABI.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodecId(pub u32);

impl CodecId {
    pub const AVC: Self = Self(FourCc::from_bytes(*b"AVC ").0);
    pub const HEVC: Self = Self(FourCc::from_bytes(*b"HEVC").0);
    pub const MPEG2: Self = Self(FourCc::from_bytes(*b"MPG2").0);
    pub const VC1: Self = Self(FourCc::from_bytes(*b"VC1 ").0);
    pub const VP9: Self = Self(FourCc::from_bytes(*b"VP90").0);
    pub const AV1: Self = Self(FourCc::from_bytes(*b"AV1 ").0);
    pub const JPEG: Self = Self(FourCc::from_bytes(*b"JPEG").0);
    /// Uncompressed YUV4MPEG2, served by the software backend.
    pub const Y4M: Self = Self(FourCc::from_bytes(*b"Y4M ").0);

    const NAMES: [(&'static str, Self); 8] = [
        ("MFX_CODEC_AVC", Self::AVC),
        ("MFX_CODEC_HEVC", Self::HEVC),
        ("MFX_CODEC_MPEG2", Self::MPEG2),
        ("MFX_CODEC_VC1", Self::VC1),
        ("MFX_CODEC_VP9", Self::VP9),
        ("MFX_CODEC_AV1", Self::AV1),
        ("MFX_CODEC_JPEG", Self::JPEG),
        ("MFX_CODEC_Y4M", Self::Y4M),
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, codec)| *codec)
    }

    pub fn name(self) -> Option<&'static str> {
        Self::NAMES
            .iter()
            .find(|(_, codec)| *codec == self)
            .map(|(n, _)| *n)
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", FourCc(self.0)),
        }
    }
}

impl fmt::Debug for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CodecId({self})")
    }
}

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// Opaque memory id handed to the decoder in an allocation response.
///
/// Resolved back to its allocation item through the allocator's id table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemId(pub u64);

impl fmt::Display for MemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mid#{}", self.0)
    }
}

/// Process-unique handle of a native surface descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

impl SurfaceId {
    pub fn next() -> Self {
        Self(NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

// ─── Frame descriptors ───────────────────────────────────────────────────────

/// Geometry and pixel layout of one decoded frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCc,
}

/// Plane pointers and pitch of a surface.
///
/// Plane slots by format: NV12/P010 `[Y, UV]`, I420 `[Y, U, V]`,
/// RGB4 `[BGRA]`.  `mem_id` is set for surfaces whose pixels live in
/// allocator-owned memory and must be locked before the pointers are valid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameData {
    pub planes: [*mut u8; 4],
    pub pitch: usize,
    pub mem_id: Option<MemId>,
}

// SAFETY: the pointers are plain addresses into memory owned elsewhere
// (a host buffer held by the surface, or a mapped staging texture guarded by
// the elastic barrier).  Dereferencing them is always done under those
// owners' synchronization, never through `FrameData` itself.
unsafe impl Send for FrameData {}
unsafe impl Sync for FrameData {}

impl Default for FrameData {
    fn default() -> Self {
        Self {
            planes: [std::ptr::null_mut(); 4],
            pitch: 0,
            mem_id: None,
        }
    }
}

impl FrameData {
    pub fn with_mem_id(mid: MemId) -> Self {
        Self {
            mem_id: Some(mid),
            ..Self::default()
        }
    }

    #[inline]
    pub fn y(&self) -> *mut u8 {
        self.planes[0]
    }

    #[inline]
    pub fn uv(&self) -> *mut u8 {
        self.planes[1]
    }

    /// Forget the plane pointers, keeping the memory id.
    pub fn clear_planes(&mut self) {
        self.planes = [std::ptr::null_mut(); 4];
        self.pitch = 0;
    }
}

// ─── Decoder parameters ──────────────────────────────────────────────────────

/// Where the decoder writes its output surfaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoPattern {
    SystemMemory,
    VideoMemory,
}

/// Decoder configuration negotiated through header parsing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoParam {
    pub codec: CodecId,
    pub io_pattern: IoPattern,
    pub frame_info: FrameInfo,
    pub async_depth: u16,
}

impl VideoParam {
    pub fn new(codec: CodecId, io_pattern: IoPattern) -> Self {
        Self {
            codec,
            io_pattern,
            frame_info: FrameInfo {
                width: 0,
                height: 0,
                fourcc: FourCc::NV12,
            },
            async_depth: 1,
        }
    }
}

/// Surface requirements reported by the decoder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameAllocRequest {
    pub alloc_id: u32,
    pub info: FrameInfo,
    pub num_frame_min: u16,
    pub num_frame_suggested: u16,
    pub memory: IoPattern,
}

/// Memory ids produced by a frame allocator for one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameAllocResponse {
    pub alloc_id: u32,
    pub mids: Vec<MemId>,
}

impl FrameAllocResponse {
    pub fn num_frame_actual(&self) -> usize {
        self.mids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_packs_little_endian() {
        assert_eq!(FourCc::NV12.0, 0x3231_564e);
        assert_eq!(FourCc::NV12.to_string(), "NV12");
        assert_eq!(FourCc(0x0000_0001).to_string(), "0x00000001");
    }

    #[test]
    fn host_layout_nv12() {
        let layout = FourCc::NV12.host_layout(64, 32).expect("nv12 layout");
        assert_eq!(layout.pitch, 64);
        assert_eq!(layout.offsets[1], 64 * 32);
        assert_eq!(layout.size, 64 * 32 * 3 / 2);
    }

    #[test]
    fn host_layout_i420_and_rgb4() {
        let i420 = FourCc::I420.host_layout(64, 32).expect("i420 layout");
        assert_eq!(i420.offsets[1], 2048);
        assert_eq!(i420.offsets[2], 2048 + 512);
        assert_eq!(i420.size, 3072);

        let rgb = FourCc::RGB4.host_layout(10, 10).expect("rgb4 layout");
        assert_eq!(rgb.pitch, 40);
        assert_eq!(rgb.size, 400);
    }

    #[test]
    fn p010_uses_wide_stride() {
        let p010 = FourCc::P010.host_layout(64, 32).expect("p010 layout");
        assert_eq!(p010.pitch, 128);
        assert_eq!(p010.size, 2 * 64 * 32 * 3 / 2);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let yuy2 = FourCc::from_bytes(*b"YUY2");
        assert!(matches!(
            yuy2.host_layout(16, 16),
            Err(EngineError::UnsupportedFormat(_))
        ));
        assert!(yuy2.plane_count().is_err());
    }

    #[test]
    fn codec_names_round_trip() {
        assert_eq!(CodecId::from_name("MFX_CODEC_HEVC"), Some(CodecId::HEVC));
        assert_eq!(CodecId::HEVC.to_string(), "MFX_CODEC_HEVC");
        assert_eq!(CodecId::from_name("MFX_CODEC_NOPE"), None);
    }
}
