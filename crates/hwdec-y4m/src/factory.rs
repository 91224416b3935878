//! Session factory for the Y4M backend.

use tracing::debug;

use hwdec_core::codec_traits::{DecodeBackend, DecoderFactory};
use hwdec_core::config::{ACCEL_MODE_PARAM, CODEC_ID_PARAM, CfgParams};
use hwdec_core::error::{EngineError, Result};
use hwdec_core::types::CodecId;

use crate::backend::{Y4mConfig, Y4mDecoder};

/// Codecs this factory can open sessions for.
pub const SUPPORTED_CODECS: &[CodecId] = &[CodecId::Y4M];

#[derive(Clone, Copy, Debug, Default)]
pub struct Y4mDecoderFactory {
    config: Y4mConfig,
}

impl Y4mDecoderFactory {
    pub fn new(config: Y4mConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> Y4mConfig {
        self.config
    }
}

impl DecoderFactory for Y4mDecoderFactory {
    fn create_session(&self, params: &CfgParams) -> Result<Box<dyn DecodeBackend>> {
        let codec = params.codec_id()?;
        if !SUPPORTED_CODECS.contains(&codec) {
            return Err(EngineError::Config(format!(
                "No implementation decodes {codec}"
            )));
        }
        for param in params.iter() {
            if param.name != CODEC_ID_PARAM && param.name != ACCEL_MODE_PARAM {
                debug!(name = %param.name, value = %param.value, "Filter property ignored");
            }
        }
        Ok(Box::new(Y4mDecoder::new(self.config)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwdec_core::config::CfgParam;

    #[test]
    fn opens_y4m_sessions_only() {
        let factory = Y4mDecoderFactory::default();
        let y4m: CfgParams = [CfgParam::codec(CodecId::Y4M)].into_iter().collect();
        assert!(factory.create_session(&y4m).is_ok());

        let hevc: CfgParams = [CfgParam::codec(CodecId::HEVC)].into_iter().collect();
        let err = factory.create_session(&hevc).err().expect("hevc rejected");
        assert!(matches!(err, EngineError::Config(_)));

        assert!(factory.create_session(&CfgParams::new()).is_err());
    }

    #[test]
    fn sessions_get_distinct_ids() {
        let factory = Y4mDecoderFactory::new(Y4mConfig { sync_latency: 1 });
        let params: CfgParams = [CfgParam::codec(CodecId::Y4M)].into_iter().collect();
        let a = factory.create_session(&params).expect("a");
        let b = factory.create_session(&params).expect("b");
        assert_ne!(a.session_id(), b.session_id());
        assert_eq!(factory.config().sync_latency, 1);
    }
}
