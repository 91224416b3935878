//! Pull-based frame source over one decode session.
//!
//! Construction does all the fallible work (device selection, policy,
//! backend session, header negotiation) and returns an error on any of it.
//! After that, [`DecodeSource::pull`] only ever yields frames or `None`;
//! end of stream and decode failure look the same to the caller and are
//! told apart through the logs and [`DecodeSource::finish_status`].

use std::sync::Arc;

use tracing::{error, info};

use hwdec_accel::adapter::FrameDesc;
use hwdec_accel::policy::AccelType;
use hwdec_accel::selector::{DeviceSelector, create_acceleration_policy};
use hwdec_core::codec_traits::{DataProvider, DecoderFactory};
use hwdec_core::config::CfgParams;
use hwdec_core::error::{EngineError, Result};

use crate::config::EngineConfig;
use crate::decode::DecodeEngine;
use crate::engine::{ExecutionStatus, SessionId};
use crate::metrics::DecodeMetrics;
use crate::session::{FrameMeta, MediaFrame};

pub struct DecodeSource {
    engine: DecodeEngine,
    session: SessionId,
    desc: FrameDesc,
    finished: Option<ExecutionStatus>,
    stall_tick_limit: u64,
}

impl DecodeSource {
    pub fn new(
        provider: Box<dyn DataProvider>,
        params: &CfgParams,
        selector: &dyn DeviceSelector,
        factory: &dyn DecoderFactory,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let codec = params.codec_id()?;
        let accel = create_acceleration_policy(selector, config.tunables)?;
        let backend = factory.create_session(params)?;
        let stall_tick_limit = config.stall_tick_limit;

        let mut engine = DecodeEngine::new(accel, config);
        let session = engine.initialize_session(backend, codec, provider)?;
        let info = engine.frame_info(session).ok_or_else(|| {
            EngineError::InvariantViolation("session vanished right after init".into())
        })?;
        let desc = FrameDesc {
            format: info.fourcc,
            width: info.width,
            height: info.height,
        };
        info!(
            codec = %codec,
            accel = %engine.accel_type(),
            width = desc.width,
            height = desc.height,
            "Decode source opened"
        );
        Ok(Self {
            engine,
            session,
            desc,
            finished: None,
            stall_tick_limit,
        })
    }

    /// Next decoded frame, driving the engine as needed.  `None` once the
    /// session has terminated and every ready frame was handed out.
    pub fn pull(&mut self) -> Option<(MediaFrame, FrameMeta)> {
        let mut idle_ticks = 0u64;
        loop {
            if let Some(frame) = self.engine.get_frame() {
                return Some(frame);
            }
            if self.finished.is_some() {
                return None;
            }
            let status = self.engine.process(self.session);
            if status.is_terminal() {
                self.finished = Some(status);
                continue;
            }
            idle_ticks += 1;
            if idle_ticks >= self.stall_tick_limit {
                error!(
                    ticks = idle_ticks,
                    pending = self.engine.session(self.session).map_or(0, |s| s.pending_count()),
                    "Decode stalled without producing a frame, giving up"
                );
                self.finished = Some(ExecutionStatus::Failed);
                return None;
            }
        }
    }

    /// Format and geometry of the decoded stream.
    pub fn descr_of(&self) -> FrameDesc {
        self.desc
    }

    pub fn accel_type(&self) -> AccelType {
        self.engine.accel_type()
    }

    /// Terminal status once the session has ended.
    pub fn finish_status(&self) -> Option<ExecutionStatus> {
        self.finished
    }

    pub fn metrics(&self) -> Arc<DecodeMetrics> {
        self.engine.metrics()
    }
}

impl Iterator for DecodeSource {
    type Item = (MediaFrame, FrameMeta);

    fn next(&mut self) -> Option<Self::Item> {
        self.pull()
    }
}

impl Drop for DecodeSource {
    fn drop(&mut self) {
        self.engine.metrics().report();
    }
}
