//! Software decoder session for YUV4MPEG2 input.
//!
//! "Decoding" is an I420 → NV12 repack, done synchronously at submission.
//! Completion is still reported through sync points so the engine sees the
//! same asynchronous contract a hardware session gives it; a configurable
//! number of sync polls report `WRN_IN_EXECUTION` before each frame is done.
//!
//! ```text
//!   system memory:  I420 ──repack──▸ surface planes (host pointers)
//!   video memory:   I420 ──repack──▸ scratch NV12 ──update_subresource──▸
//!                                    texture slice (from get_handle(mid))
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, trace, warn};

use hwdec_core::bitstream::Bitstream;
use hwdec_core::codec_traits::{DecodeBackend, FrameAllocator, SubmitOutcome, SyncPoint};
use hwdec_core::device::{DeviceHandle, TextureDevice};
use hwdec_core::status::Status;
use hwdec_core::surface::Surface;
use hwdec_core::types::{
    CodecId, FourCc, FrameAllocRequest, FrameInfo, IoPattern, VideoParam,
};

use crate::header::{HeaderError, StreamHeader, parse_frame_header, parse_stream_header};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// High half of the allocation ids reported from `query_io_surf`; the low
/// half is the session id, so concurrent sessions never alias.
const ALLOC_ID_TAG: u32 = 0x5934_0000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Y4mConfig {
    /// Sync polls answered with `WRN_IN_EXECUTION` before a frame completes.
    pub sync_latency: u32,
}

struct PendingFrame {
    surface: Arc<Surface>,
    polls_left: u32,
}

pub struct Y4mDecoder {
    id: u64,
    config: Y4mConfig,
    header: Option<StreamHeader>,
    params: Option<VideoParam>,
    /// Stream header still sits at the front of the bitstream.
    header_pending: bool,
    device: Option<Arc<dyn TextureDevice>>,
    allocator: Option<Arc<dyn FrameAllocator>>,
    pending: HashMap<SyncPoint, PendingFrame>,
    next_sync: u64,
    frames_decoded: u64,
    scratch: Vec<u8>,
}

impl Y4mDecoder {
    pub fn new(config: Y4mConfig) -> Self {
        Self {
            id: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
            config,
            header: None,
            params: None,
            header_pending: true,
            device: None,
            allocator: None,
            pending: HashMap::new(),
            next_sync: 0,
            frames_decoded: 0,
            scratch: Vec::new(),
        }
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn alloc_id(&self) -> u32 {
        ALLOC_ID_TAG | (self.id & 0xffff) as u32
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Skip the stream header once it is fully buffered.
    fn skip_stream_header(&mut self, bitstream: &mut Bitstream) -> Result<(), Status> {
        if !self.header_pending {
            return Ok(());
        }
        match parse_stream_header(bitstream.remaining()) {
            Ok((_, len)) => {
                bitstream.consume(len);
                self.header_pending = false;
                Ok(())
            }
            Err(err) => Err(header_status(&err)),
        }
    }

    fn write_host(&self, surface: &Surface, header: &StreamHeader, i420: &[u8]) -> Status {
        let data = *surface.data();
        let (y, uv) = (data.y(), data.uv());
        if y.is_null() || uv.is_null() || data.pitch < header.width as usize {
            warn!(surface = %surface.handle(), "Work surface has no host planes");
            return Status::NULL_PTR;
        }
        let h = header.height as usize;
        // SAFETY: host pools lay NV12 out as `pitch × h` luma rows followed by
        // `pitch × h/2` chroma rows, and the surface is free, so no view is
        // reading these bytes.
        let (y_dst, uv_dst) = unsafe {
            (
                std::slice::from_raw_parts_mut(y, data.pitch * h),
                std::slice::from_raw_parts_mut(uv, data.pitch * (h / 2)),
            )
        };
        i420_to_nv12(i420, header.width as usize, h, y_dst, uv_dst, data.pitch);
        Status::NONE
    }

    fn write_texture(&mut self, surface: &Surface, header: &StreamHeader, i420: &[u8]) -> Status {
        let (Some(allocator), Some(device)) = (&self.allocator, &self.device) else {
            warn!("Video-memory output without allocator or device");
            return Status::NOT_INITIALIZED;
        };
        let Some(mid) = surface.data().mem_id else {
            warn!(surface = %surface.handle(), "Video-memory surface without memory id");
            return Status::INVALID_HANDLE;
        };
        let handle = match allocator.get_handle(mid) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(mid = %mid, error = %err, "get_handle failed");
                return Status::INVALID_HANDLE;
            }
        };

        let (w, h) = (header.width as usize, header.height as usize);
        self.scratch.resize(w * h + w * (h / 2), 0);
        let (y_dst, uv_dst) = self.scratch.split_at_mut(w * h);
        i420_to_nv12(i420, w, h, y_dst, uv_dst, w);
        match device.update_subresource(handle.texture, handle.subresource, &self.scratch, w) {
            Ok(()) => Status::NONE,
            Err(err) => {
                warn!(texture = %handle.texture, error = %err, "Texture upload failed");
                Status::DEVICE_FAILED
            }
        }
    }
}

impl Default for Y4mDecoder {
    fn default() -> Self {
        Self::new(Y4mConfig::default())
    }
}

fn header_status(err: &HeaderError) -> Status {
    match err {
        HeaderError::Incomplete => Status::MORE_DATA,
        HeaderError::Invalid(_) => Status::UNDEFINED_BEHAVIOR,
        HeaderError::Unsupported(_) => Status::UNSUPPORTED,
    }
}

/// Repack planar I420 into NV12 with the given destination pitch.
fn i420_to_nv12(src: &[u8], w: usize, h: usize, y_dst: &mut [u8], uv_dst: &mut [u8], pitch: usize) {
    let (cw, ch) = (w / 2, h / 2);
    let (luma, chroma) = src.split_at(w * h);
    let (u, v) = chroma.split_at(cw * ch);

    for (row, src_row) in luma.chunks_exact(w).enumerate() {
        y_dst[row * pitch..row * pitch + w].copy_from_slice(src_row);
    }
    for row in 0..ch {
        let dst = &mut uv_dst[row * pitch..row * pitch + 2 * cw];
        let (u_row, v_row) = (&u[row * cw..(row + 1) * cw], &v[row * cw..(row + 1) * cw]);
        for (pair, (&cb, &cr)) in dst.chunks_exact_mut(2).zip(u_row.iter().zip(v_row)) {
            pair[0] = cb;
            pair[1] = cr;
        }
    }
}

impl DecodeBackend for Y4mDecoder {
    fn session_id(&self) -> u64 {
        self.id
    }

    fn set_handle(&mut self, device: DeviceHandle) -> Status {
        self.device = match device {
            DeviceHandle::Host => None,
            DeviceHandle::Texture(dev) => {
                debug!(session = self.id, device = dev.name(), "Texture device bound");
                Some(dev)
            }
        };
        Status::NONE
    }

    fn set_frame_allocator(&mut self, allocator: Option<Arc<dyn FrameAllocator>>) -> Status {
        self.allocator = allocator;
        Status::NONE
    }

    fn decode_header(&mut self, bitstream: &mut Bitstream, params: &mut VideoParam) -> Status {
        if params.codec != CodecId::Y4M {
            return Status::UNSUPPORTED;
        }
        let header = match parse_stream_header(bitstream.remaining()) {
            Ok((header, _)) => header,
            Err(err) => {
                warn!(session = self.id, error = %err, "Stream header rejected");
                return header_status(&err);
            }
        };
        params.frame_info = FrameInfo {
            width: header.width,
            height: header.height,
            fourcc: FourCc::NV12,
        };
        self.header = Some(header);
        Status::NONE
    }

    fn query_io_surf(
        &mut self,
        params: &VideoParam,
    ) -> std::result::Result<FrameAllocRequest, Status> {
        if self.header.is_none() {
            return Err(Status::NOT_INITIALIZED);
        }
        Ok(FrameAllocRequest {
            alloc_id: self.alloc_id(),
            info: params.frame_info,
            num_frame_min: 1,
            num_frame_suggested: params.async_depth.max(1),
            memory: params.io_pattern,
        })
    }

    fn init(&mut self, params: &VideoParam) -> Status {
        let Some(header) = self.header else {
            return Status::NOT_INITIALIZED;
        };
        if params.frame_info.width != header.width
            || params.frame_info.height != header.height
            || params.frame_info.fourcc != FourCc::NV12
        {
            return Status::INVALID_VIDEO_PARAM;
        }
        if params.io_pattern == IoPattern::VideoMemory
            && (self.allocator.is_none() || self.device.is_none())
        {
            return Status::INVALID_VIDEO_PARAM;
        }
        info!(
            session = self.id,
            width = header.width,
            height = header.height,
            io = ?params.io_pattern,
            sync_latency = self.config.sync_latency,
            "Y4M decoder initialized"
        );
        self.params = Some(params.clone());
        Status::NONE
    }

    fn decode_frame_async(
        &mut self,
        bitstream: Option<&mut Bitstream>,
        work: &Arc<Surface>,
    ) -> SubmitOutcome {
        let (Some(params), Some(header)) = (&self.params, self.header) else {
            return SubmitOutcome::status(Status::NOT_INITIALIZED);
        };
        let io_pattern = params.io_pattern;
        // Frames never stay buffered inside the decoder, so draining has
        // nothing to return.
        let Some(bitstream) = bitstream else {
            return SubmitOutcome::status(Status::MORE_DATA);
        };
        if !work.is_free() {
            return SubmitOutcome::status(Status::MORE_SURFACE);
        }
        if let Err(status) = self.skip_stream_header(bitstream) {
            return SubmitOutcome::status(status);
        }

        let frame_size = header.frame_size();
        let buffered = bitstream.remaining();
        let marker = match parse_frame_header(buffered) {
            Ok(len) => len,
            Err(HeaderError::Incomplete) => return incomplete(bitstream),
            Err(err) => {
                warn!(session = self.id, error = %err, "Corrupt frame header");
                return SubmitOutcome::status(header_status(&err));
            }
        };
        if buffered.len() < marker + frame_size {
            return incomplete(bitstream);
        }

        let i420 = buffered[marker..marker + frame_size].to_vec();
        let status = match io_pattern {
            IoPattern::SystemMemory => self.write_host(work, &header, &i420),
            IoPattern::VideoMemory => self.write_texture(work, &header, &i420),
        };
        if status != Status::NONE {
            return SubmitOutcome::status(status);
        }
        bitstream.consume(marker + frame_size);

        work.obtain_lock();
        let sync = SyncPoint(self.next_sync);
        self.next_sync += 1;
        self.pending.insert(
            sync,
            PendingFrame {
                surface: Arc::clone(work),
                polls_left: self.config.sync_latency,
            },
        );
        self.frames_decoded += 1;
        trace!(session = self.id, sync = sync.0, surface = %work.handle(), "Frame submitted");
        SubmitOutcome::ready(sync, work.handle())
    }

    fn sync_operation(&mut self, sync: SyncPoint, _wait_ms: u32) -> Status {
        let Some(frame) = self.pending.get_mut(&sync) else {
            return Status::INVALID_HANDLE;
        };
        if frame.polls_left > 0 {
            frame.polls_left -= 1;
            return Status::WRN_IN_EXECUTION;
        }
        if let Some(frame) = self.pending.remove(&sync) {
            frame.surface.release_lock();
        }
        Status::NONE
    }

    fn close(&mut self) {
        for (_, frame) in self.pending.drain() {
            frame.surface.release_lock();
        }
        self.allocator = None;
        self.device = None;
        self.params = None;
        debug!(session = self.id, frames = self.frames_decoded, "Y4M decoder closed");
    }
}

/// A partial frame: wait for more input unless the buffer can never hold it.
fn incomplete(bitstream: &Bitstream) -> SubmitOutcome {
    if bitstream.data_offset() == 0 && bitstream.data_length() == bitstream.capacity() {
        warn!(
            capacity = bitstream.capacity(),
            "Bitstream buffer smaller than one frame"
        );
        return SubmitOutcome::status(Status::NOT_ENOUGH_BUFFER);
    }
    SubmitOutcome::status(Status::MORE_DATA)
}

impl Drop for Y4mDecoder {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            self.close();
        }
    }
}
