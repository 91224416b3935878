//! Acceleration policy contract shared by the host and texture variants.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use hwdec_core::codec_traits::DecodeBackend;
use hwdec_core::error::Result;
use hwdec_core::surface::Surface;
use hwdec_core::types::{FrameAllocRequest, SurfaceId, VideoParam};

use crate::adapter::FrameAdapter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccelType {
    /// System memory, no device.
    Host,
    /// GPU texture arrays read back through staging textures.
    Texture,
}

impl fmt::Display for AccelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Host => "host",
            Self::Texture => "texture",
        })
    }
}

/// Opaque handle of one surface pool owned by a policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolKey(pub u64);

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

/// Pool sizing knobs.  Both multipliers are empirical; re-validate them
/// against the backend's real pipelining depth before changing defaults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyTunables {
    /// Factor applied to the decoder's suggested surface count on the
    /// texture path, so pipelined async decode does not starve.
    pub texture_surface_multiplier: u16,
    /// Factor applied to the suggested count on the host path.
    pub host_preallocation_multiplier: u16,
}

impl Default for PolicyTunables {
    fn default() -> Self {
        Self {
            texture_surface_multiplier: 5,
            host_preallocation_multiplier: 1,
        }
    }
}

/// Memory strategy bound into a decode session.
pub trait AccelerationPolicy: Send {
    fn accel_type(&self) -> AccelType;

    /// Install this policy's device and allocator into `session`.
    fn init(&mut self, session: &mut dyn DecodeBackend) -> Result<()>;

    fn deinit(&mut self, session: &mut dyn DecodeBackend) -> Result<()>;

    /// Allocate backing memory for `request` and build a pool over it.
    fn create_surface_pool(
        &mut self,
        request: &FrameAllocRequest,
        params: &mut VideoParam,
    ) -> Result<PoolKey>;

    /// A surface with no leases, or `NoFreeSurface`.
    fn get_free_surface(&self, key: PoolKey) -> Result<Arc<Surface>>;

    fn get_free_surface_count(&self, key: PoolKey) -> Result<usize>;

    fn get_surface_count(&self, key: PoolKey) -> Result<usize>;

    /// Wrap a backend-returned surface as a consumable frame.
    fn create_frame_adapter(&self, key: PoolKey, surface: SurfaceId) -> Result<FrameAdapter>;

    /// Forget the pool behind `key`.  Surfaces still leased by frames keep
    /// their backing memory alive until those frames drop.
    fn release_surface_pool(&mut self, key: PoolKey) -> Result<()>;
}
