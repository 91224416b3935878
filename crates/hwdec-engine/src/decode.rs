//! Decode state machine on top of [`ProcessingEngine`].
//!
//! ```text
//!   ┌──────┐    ┌────────┐    ┌──────┐    ┌──────────┐
//!   │ Read │───►│ Submit │───►│ Sync │───►│ Dispatch │──┐
//!   └──────┘    └────────┘    └──────┘    └──────────┘  │
//!      ▲                                                 │
//!      └─────────────────────────────────────────────────┘
//! ```
//!
//! * **Read** refills the session bitstream; a drained or failing provider
//!   is closed but the session keeps going so the decoder can flush.
//! * **Submit** decodes into the working surface, swapping it and retrying
//!   (bounded) while the backend wants another surface or is busy.
//! * **Sync** polls only the oldest pending operation, so frames reach the
//!   ready queue in submission order.
//! * **Dispatch** maps the last status to Continue / Processed / Failed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info, warn};

use hwdec_accel::policy::{AccelType, AccelerationPolicy, PoolKey};
use hwdec_core::bitstream::Bitstream;
use hwdec_core::codec_traits::{DataProvider, DecodeBackend};
use hwdec_core::error::{EngineError, Result};
use hwdec_core::status::Status;
use hwdec_core::types::{CodecId, FrameInfo, IoPattern, VideoParam};

use crate::config::EngineConfig;
use crate::engine::{ExecutionStatus, ProcessingEngine, SessionId, Stage};
use crate::metrics::DecodeMetrics;
use crate::session::{DecodeSession, FrameMeta, MediaFrame};

/// State shared by every session of one engine.
pub struct DecodeContext {
    pub(crate) accel: Box<dyn AccelerationPolicy>,
    pub(crate) ready: VecDeque<(MediaFrame, FrameMeta)>,
    pub(crate) metrics: Arc<DecodeMetrics>,
    pub(crate) config: EngineConfig,
    next_seq: u64,
}

impl DecodeContext {
    fn next_meta(&mut self) -> FrameMeta {
        let seq_id = self.next_seq;
        self.next_seq += 1;
        let timestamp_us = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_micros() as u64);
        FrameMeta {
            seq_id,
            timestamp_us,
        }
    }

    /// Replace the session's working surface; on exhaustion leave it empty.
    fn renew_work_surface(&mut self, session: &mut DecodeSession) {
        session.work = None;
        match self.accel.get_free_surface(session.pool) {
            Ok(surface) => {
                session.work = Some(surface);
                DecodeMetrics::bump(&self.metrics.surface_swaps);
            }
            Err(err) => {
                DecodeMetrics::bump(&self.metrics.no_free_surface);
                warn!(
                    pool = %session.pool,
                    error = %err,
                    free = self.accel.get_free_surface_count(session.pool).unwrap_or(0),
                    total = self.accel.get_surface_count(session.pool).unwrap_or(0),
                    "No working surface, retrying next tick"
                );
            }
        }
    }
}

pub struct DecodeEngine {
    engine: ProcessingEngine<DecodeContext, DecodeSession>,
}

impl DecodeEngine {
    pub fn new(accel: Box<dyn AccelerationPolicy>, config: EngineConfig) -> Self {
        let metrics = DecodeMetrics::new();
        let context = DecodeContext {
            accel,
            ready: VecDeque::new(),
            metrics,
            config,
            next_seq: 0,
        };
        let pipeline: Vec<Stage<DecodeContext, DecodeSession>> = vec![
            Box::new(read_stage),
            Box::new(submit_stage),
            Box::new(sync_stage),
            Box::new(dispatch_stage),
        ];
        Self {
            engine: ProcessingEngine::new(context, pipeline).with_finalizer(Box::new(finalize)),
        }
    }

    /// Bind `backend` to this engine's policy, parse the stream header,
    /// build the surface pool and register the session.
    ///
    /// On error the backend is unbound and closed.
    pub fn initialize_session(
        &mut self,
        mut backend: Box<dyn DecodeBackend>,
        codec: CodecId,
        provider: Box<dyn DataProvider>,
    ) -> Result<SessionId> {
        let ctx = self.engine.context_mut();
        ctx.accel.init(backend.as_mut())?;

        let mut provider = Some(provider);
        match negotiate(ctx, backend.as_mut(), codec, &mut provider) {
            Ok((bitstream, params, pool)) => {
                let work = match ctx.accel.get_free_surface(pool) {
                    Ok(surface) => Some(surface),
                    Err(err) => {
                        warn!(pool = %pool, error = %err, "No initial working surface");
                        None
                    }
                };
                info!(
                    session = backend.session_id(),
                    codec = %codec,
                    accel = %ctx.accel.accel_type(),
                    width = params.frame_info.width,
                    height = params.frame_info.height,
                    fourcc = %params.frame_info.fourcc,
                    surfaces = ctx.accel.get_surface_count(pool).unwrap_or(0),
                    "Decode session initialized"
                );
                let session = DecodeSession {
                    backend,
                    provider,
                    bitstream,
                    params,
                    pool,
                    work,
                    last_status: Status::NONE,
                    pending: VecDeque::new(),
                };
                Ok(self.engine.insert_session(session))
            }
            Err(err) => {
                error!(
                    session = backend.session_id(),
                    error = %err,
                    "Decode session setup failed"
                );
                if let Err(deinit_err) = ctx.accel.deinit(backend.as_mut()) {
                    warn!(error = %deinit_err, "Acceleration deinit after failed setup");
                }
                backend.close();
                Err(err)
            }
        }
    }

    /// Advance one session by one stage.
    pub fn process(&mut self, id: SessionId) -> ExecutionStatus {
        self.engine.process(id)
    }

    pub fn get_ready_frames_count(&self) -> usize {
        self.engine.context().ready.len()
    }

    /// Oldest ready frame.
    pub fn get_frame(&mut self) -> Option<(MediaFrame, FrameMeta)> {
        self.engine.context_mut().ready.pop_front()
    }

    pub fn frame_info(&self, id: SessionId) -> Option<FrameInfo> {
        self.engine.session(id).map(|s| s.params().frame_info)
    }

    pub fn session(&self, id: SessionId) -> Option<&DecodeSession> {
        self.engine.session(id)
    }

    pub fn session_count(&self) -> usize {
        self.engine.session_count()
    }

    pub fn accel_type(&self) -> AccelType {
        self.engine.context().accel.accel_type()
    }

    pub fn metrics(&self) -> Arc<DecodeMetrics> {
        Arc::clone(&self.engine.context().metrics)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.engine.context().config
    }
}

/// Header parse, surface query, pool creation and decoder init.
fn negotiate(
    ctx: &mut DecodeContext,
    backend: &mut dyn DecodeBackend,
    codec: CodecId,
    provider: &mut Option<Box<dyn DataProvider>>,
) -> Result<(Bitstream, VideoParam, PoolKey)> {
    let mut bitstream = Bitstream::new(ctx.config.bitstream_buffer_size, codec);
    let status = bitstream.refill(provider.as_deref_mut())?;
    if status != Status::NONE {
        return Err(EngineError::Config(format!(
            "no input data to parse a stream header from ({status})"
        )));
    }

    let io_pattern = match ctx.accel.accel_type() {
        AccelType::Host => IoPattern::SystemMemory,
        AccelType::Texture => IoPattern::VideoMemory,
    };
    let mut params = VideoParam::new(codec, io_pattern);
    params.async_depth = ctx.config.async_depth;

    // A header split across provider reads needs more bytes before it parses.
    loop {
        let status = backend.decode_header(&mut bitstream, &mut params);
        if status == Status::NONE {
            break;
        }
        let before = bitstream.data_length();
        if status != Status::MORE_DATA
            || bitstream.refill(provider.as_deref_mut())? != Status::NONE
            || bitstream.data_length() == before
        {
            return Err(EngineError::backend("decode_header", status));
        }
    }
    let request = backend
        .query_io_surf(&params)
        .map_err(|status| EngineError::backend("query_io_surf", status))?;
    let pool = ctx.accel.create_surface_pool(&request, &mut params)?;
    let status = backend.init(&params);
    if status != Status::NONE {
        if let Err(err) = ctx.accel.release_surface_pool(pool) {
            warn!(pool = %pool, error = %err, "Pool release after failed init");
        }
        return Err(EngineError::backend("init", status));
    }
    Ok((bitstream, params, pool))
}

// ─── Stages ──────────────────────────────────────────────────────────────────

fn read_stage(_ctx: &mut DecodeContext, s: &mut DecodeSession) -> ExecutionStatus {
    let read = match s.provider.as_deref_mut() {
        Some(provider) => s.bitstream.refill(Some(provider)),
        None => Ok(Status::MORE_DATA),
    };
    let buffered = s.bitstream.data_length() > 0;
    s.last_status = match &read {
        Ok(Status::MORE_DATA) | Err(_) if buffered => Status::NONE,
        Ok(status) => *status,
        Err(_) => Status::MORE_DATA,
    };
    match read {
        Err(err) => {
            warn!(
                session = s.backend.session_id(),
                error = %err,
                buffered = s.bitstream.data_length(),
                "Input read failed, draining decoder"
            );
            s.close_input();
        }
        Ok(Status::NOT_ENOUGH_BUFFER) => {
            warn!(session = s.backend.session_id(), "Bitstream buffer overflow");
        }
        Ok(_) => {}
    }
    // Closed input: leftovers keep feeding, then drain with no bitstream.
    if s.provider.as_ref().is_some_and(|p| p.empty()) {
        s.close_input();
    }
    ExecutionStatus::Continue
}

fn submit_stage(ctx: &mut DecodeContext, s: &mut DecodeSession) -> ExecutionStatus {
    if s.work.is_none() {
        ctx.renew_work_surface(s);
    }
    let Some(mut work) = s.work.clone() else {
        // Dropped this tick; dispatch will try for a surface again.
        s.last_status = Status::MORE_SURFACE;
        return ExecutionStatus::Continue;
    };

    let feed = s.last_status == Status::NONE;
    let mut retries = 0;
    loop {
        let bitstream = if feed { Some(&mut s.bitstream) } else { None };
        let outcome = s.backend.decode_frame_async(bitstream, &work);
        let transient = matches!(outcome.status, Status::MORE_SURFACE | Status::WRN_DEVICE_BUSY);
        if transient && retries < ctx.config.submit_retry_limit {
            retries += 1;
            DecodeMetrics::bump(&ctx.metrics.submit_retries);
            ctx.renew_work_surface(s);
            match s.work.clone() {
                Some(next) => {
                    work = next;
                    continue;
                }
                None => {
                    s.last_status = outcome.status;
                    return ExecutionStatus::Continue;
                }
            }
        }

        s.last_status = outcome.status;
        if let Some(output) = outcome.output {
            s.pending.push_back(output);
            DecodeMetrics::bump(&ctx.metrics.frames_submitted);
        } else if outcome.status != Status::MORE_DATA && outcome.status != Status::NONE {
            warn!(
                session = s.backend.session_id(),
                status = %outcome.status,
                retries,
                "Decode submission not accepted"
            );
        }
        return ExecutionStatus::Continue;
    }
}

fn sync_stage(ctx: &mut DecodeContext, s: &mut DecodeSession) -> ExecutionStatus {
    let Some(&(sync, surface)) = s.pending.front() else {
        return ExecutionStatus::Continue;
    };
    match s.backend.sync_operation(sync, 0) {
        Status::NONE => {
            s.pending.pop_front();
            match ctx.accel.create_frame_adapter(s.pool, surface) {
                Ok(frame) => {
                    let meta = ctx.next_meta();
                    debug!(seq = meta.seq_id, surface = %surface, "Frame ready");
                    ctx.ready.push_back((frame, meta));
                    DecodeMetrics::bump(&ctx.metrics.frames_ready);
                    ExecutionStatus::Continue
                }
                Err(err) => {
                    error!(surface = %surface, error = %err, "Cannot wrap decoded surface");
                    ExecutionStatus::Failed
                }
            }
        }
        Status::WRN_IN_EXECUTION | Status::WRN_DEVICE_BUSY => ExecutionStatus::Continue,
        other => {
            error!(
                session = s.backend.session_id(),
                status = %other,
                "Sync operation failed"
            );
            ExecutionStatus::Failed
        }
    }
}

fn dispatch_stage(ctx: &mut DecodeContext, s: &mut DecodeSession) -> ExecutionStatus {
    match s.last_status {
        Status::NONE => {
            ctx.renew_work_surface(s);
            ExecutionStatus::Continue
        }
        Status::MORE_DATA => {
            if s.input_exhausted() && s.pending.is_empty() {
                info!(session = s.backend.session_id(), "Decode finished");
                ExecutionStatus::Processed
            } else {
                ExecutionStatus::Continue
            }
        }
        Status::MORE_SURFACE => {
            ctx.renew_work_surface(s);
            ExecutionStatus::Continue
        }
        Status::WRN_DEVICE_BUSY => ExecutionStatus::Continue,
        other => {
            error!(
                session = s.backend.session_id(),
                status = %other,
                "Unhandled decode status, failing session"
            );
            ExecutionStatus::Failed
        }
    }
}

fn finalize(ctx: &mut DecodeContext, mut session: DecodeSession, status: ExecutionStatus) {
    let counter = match status {
        ExecutionStatus::Failed => &ctx.metrics.sessions_failed,
        _ => &ctx.metrics.sessions_processed,
    };
    DecodeMetrics::bump(counter);
    if let Err(err) = ctx.accel.deinit(session.backend.as_mut()) {
        warn!(error = %err, "Acceleration deinit failed");
    }
    session.work = None;
    if let Err(err) = ctx.accel.release_surface_pool(session.pool) {
        warn!(pool = %session.pool, error = %err, "Surface pool release failed");
    }
    drop(session);
}
