//! GPU texture device contract used by the texture acceleration path.
//!
//! The calls mirror the handful of immediate-context operations the decode
//! path needs: create a texture array and CPU-readable staging textures,
//! copy one array slice into a staging texture, map/unmap it, and upload
//! pixels into a slice.  Map/unmap/copy are only ever issued from inside the
//! elastic barrier of an allocation item.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::types::FourCc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tex#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureUsage {
    /// GPU-resident decode target, bindable by the decoder.
    Default,
    /// CPU-readable copy target.
    Staging,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: FourCc,
    pub array_size: u32,
    pub usage: TextureUsage,
}

/// CPU view of a mapped staging texture.
#[derive(Clone, Copy, Debug)]
pub struct MappedSubresource {
    pub data: *mut u8,
    pub row_pitch: usize,
}

// SAFETY: the pointer is an address inside a mapped staging texture that
// stays valid until `unmap`; the elastic barrier serializes map and unmap.
unsafe impl Send for MappedSubresource {}
unsafe impl Sync for MappedSubresource {}

/// Outcome of a failed map attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapError {
    /// The GPU is still writing the resource; retry.
    StillDrawing,
    Failed(String),
}

/// Texture array slice addressed by the frame allocator's `get_handle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureSubresource {
    pub texture: TextureId,
    pub subresource: u32,
}

pub trait TextureDevice: Send + Sync {
    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureId>;

    fn copy_subresource(&self, dst: TextureId, src: TextureId, src_subresource: u32) -> Result<()>;

    fn map(&self, staging: TextureId) -> std::result::Result<MappedSubresource, MapError>;

    fn unmap(&self, staging: TextureId);

    /// Upload host pixels into one slice of a texture array.
    fn update_subresource(
        &self,
        dst: TextureId,
        subresource: u32,
        src: &[u8],
        src_pitch: usize,
    ) -> Result<()>;

    fn release(&self, texture: TextureId);

    /// Human-readable adapter name for logs.
    fn name(&self) -> &str {
        "texture-device"
    }
}

/// Owned texture reference, released on drop.
pub struct Texture {
    id: TextureId,
    device: Arc<dyn TextureDevice>,
}

impl Texture {
    pub fn create(device: &Arc<dyn TextureDevice>, desc: &TextureDesc) -> Result<Self> {
        let id = device.create_texture(desc)?;
        Ok(Self {
            id,
            device: Arc::clone(device),
        })
    }

    #[inline]
    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn device(&self) -> &Arc<dyn TextureDevice> {
        &self.device
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture").field("id", &self.id).finish()
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        debug!(texture = %self.id, "Releasing texture");
        self.device.release(self.id);
    }
}

/// Device binding handed to a decode session.
#[derive(Clone)]
pub enum DeviceHandle {
    Host,
    Texture(Arc<dyn TextureDevice>),
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("DeviceHandle::Host"),
            Self::Texture(dev) => write!(f, "DeviceHandle::Texture({})", dev.name()),
        }
    }
}
