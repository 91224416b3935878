//! Per-decoder session state.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use hwdec_accel::adapter::FrameAdapter;
use hwdec_accel::policy::PoolKey;
use hwdec_core::bitstream::Bitstream;
use hwdec_core::codec_traits::{DataProvider, DecodeBackend, SyncPoint};
use hwdec_core::status::Status;
use hwdec_core::surface::Surface;
use hwdec_core::types::{SurfaceId, VideoParam};

/// A decoded frame as handed to consumers.
pub type MediaFrame = FrameAdapter;

/// Metadata assigned when a frame completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FrameMeta {
    /// Monotonic per-engine sequence number, starting at 0.
    pub seq_id: u64,
    /// Wall-clock completion time, microseconds since the Unix epoch.
    pub timestamp_us: u64,
}

pub struct DecodeSession {
    pub(crate) backend: Box<dyn DecodeBackend>,
    pub(crate) provider: Option<Box<dyn DataProvider>>,
    pub(crate) bitstream: Bitstream,
    pub(crate) params: VideoParam,
    pub(crate) pool: PoolKey,
    /// Surface the next submission decodes into.
    pub(crate) work: Option<Arc<Surface>>,
    /// Status of the most recent read or submit; drives the dispatch stage.
    pub(crate) last_status: Status,
    /// Submitted operations, oldest first.
    pub(crate) pending: VecDeque<(SyncPoint, SurfaceId)>,
}

impl DecodeSession {
    pub fn params(&self) -> &VideoParam {
        &self.params
    }

    pub fn pool(&self) -> PoolKey {
        self.pool
    }

    pub fn last_status(&self) -> Status {
        self.last_status
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// True once the provider is closed or reports no more bytes.
    pub fn input_exhausted(&self) -> bool {
        self.provider.as_ref().is_none_or(|p| p.empty())
    }

    pub(crate) fn close_input(&mut self) {
        if self.provider.take().is_some() {
            debug!(session = self.backend.session_id(), "Input provider closed");
        }
    }
}

impl fmt::Debug for DecodeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeSession")
            .field("backend", &self.backend.session_id())
            .field("pool", &self.pool)
            .field("last_status", &self.last_status)
            .field("pending", &self.pending.len())
            .field("input_open", &self.provider.is_some())
            .finish()
    }
}

impl Drop for DecodeSession {
    fn drop(&mut self) {
        debug!(
            session = self.backend.session_id(),
            pending = self.pending.len(),
            "Closing decoder session"
        );
        self.work = None;
        self.backend.close();
    }
}
