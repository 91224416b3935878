//! Shared backend traits used across crate boundaries.
//!
//! These traits give the acceleration policies, the decode engine and the
//! concrete decoder backends a neutral home, so none of them depends on
//! another's implementation.

use std::sync::Arc;

use crate::bitstream::Bitstream;
use crate::config::CfgParams;
use crate::device::{DeviceHandle, TextureSubresource};
use crate::error::Result;
use crate::status::Status;
use crate::surface::Surface;
use crate::types::{FrameAllocRequest, FrameAllocResponse, FrameData, MemId, SurfaceId, VideoParam};

// ─── Data provider (bytes → bitstream) ───────────────────────────────────

/// Supplier of compressed bytes.
///
/// Implementations: file reader, in-memory buffer, network receiver, etc.
pub trait DataProvider: Send {
    /// Fill up to `out.len()` bytes; `Ok(0)` means nothing more right now.
    fn provide_data(&mut self, out: &mut [u8]) -> Result<usize>;
    /// True once the provider can never produce another byte.
    fn empty(&self) -> bool;
}

// ─── Frame allocator (policy → decoder) ──────────────────────────────────

/// Memory callbacks a decoder uses for surfaces it does not own.
///
/// A policy installs one into the session at init time.
pub trait FrameAllocator: Send + Sync {
    fn alloc(&self, request: &FrameAllocRequest) -> Result<FrameAllocResponse>;
    /// Make the pixels of `mid` CPU-visible and write their pointers into `data`.
    fn lock(&self, mid: MemId, data: &mut FrameData) -> Result<()>;
    /// Undo one `lock`; clears the pointers in `data`.
    fn unlock(&self, mid: MemId, data: &mut FrameData) -> Result<()>;
    fn get_handle(&self, mid: MemId) -> Result<TextureSubresource>;
    fn free(&self, response: &FrameAllocResponse) -> Result<()>;
}

// ─── Decode backend (engine → native SDK) ────────────────────────────────

/// Completion token returned by an async decode submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SyncPoint(pub u64);

/// Result of one `decode_frame_async` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub status: Status,
    /// Set when `status` is `NONE`: the pending operation and the surface
    /// that will hold its output.
    pub output: Option<(SyncPoint, SurfaceId)>,
}

impl SubmitOutcome {
    pub fn status(status: Status) -> Self {
        Self {
            status,
            output: None,
        }
    }

    pub fn ready(sync: SyncPoint, surface: SurfaceId) -> Self {
        Self {
            status: Status::NONE,
            output: Some((sync, surface)),
        }
    }
}

/// One native decoder session.
///
/// Calls are made from the thread driving the engine.  The backend takes a
/// lease on every surface it writes or keeps as a reference and releases it
/// when it is done with that surface.
pub trait DecodeBackend: Send {
    /// Short identifier used in logs.
    fn session_id(&self) -> u64;

    fn set_handle(&mut self, device: DeviceHandle) -> Status;

    fn set_frame_allocator(&mut self, allocator: Option<Arc<dyn FrameAllocator>>) -> Status;

    /// Parse the stream header and fill `params.frame_info`.
    fn decode_header(&mut self, bitstream: &mut Bitstream, params: &mut VideoParam) -> Status;

    fn query_io_surf(&mut self, params: &VideoParam) -> std::result::Result<FrameAllocRequest, Status>;

    fn init(&mut self, params: &VideoParam) -> Status;

    /// Submit one decode.  `None` bitstream drains buffered frames.
    fn decode_frame_async(
        &mut self,
        bitstream: Option<&mut Bitstream>,
        work: &Arc<Surface>,
    ) -> SubmitOutcome;

    /// Poll a pending operation, waiting at most `wait_ms`.
    fn sync_operation(&mut self, sync: SyncPoint, wait_ms: u32) -> Status;

    fn close(&mut self);
}

/// Creates decoder sessions matching a configuration.
pub trait DecoderFactory: Send + Sync {
    /// Open a session, applying every parameter as an implementation filter.
    fn create_session(&self, params: &CfgParams) -> Result<Box<dyn DecodeBackend>>;
}
