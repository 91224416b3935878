//! Engine tunables, loadable from JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};

use hwdec_accel::policy::PolicyTunables;
use hwdec_core::error::{EngineError, Result};

/// Runtime configuration for a [`DecodeEngine`](crate::decode::DecodeEngine).
///
/// Every field has a default, so a partial JSON document is valid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of each session's compressed-input buffer.  Must hold at
    /// least one complete compressed frame.
    pub bitstream_buffer_size: usize,
    /// Synchronous resubmissions allowed per submit stage while the backend
    /// reports MORE_SURFACE or DEVICE_BUSY.
    pub submit_retry_limit: u32,
    /// Decoder pipelining depth passed to the backend.
    pub async_depth: u16,
    /// Consecutive ticks without a new ready frame after which a
    /// [`DecodeSource`](crate::source::DecodeSource) gives up.
    pub stall_tick_limit: u64,
    pub tunables: PolicyTunables,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bitstream_buffer_size: 2_000_000,
            submit_retry_limit: 16,
            async_depth: 4,
            stall_tick_limit: 100_000,
            tunables: PolicyTunables::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|err| {
            EngineError::Config(format!(
                "failed to read engine config {}: {err}",
                path.display()
            ))
        })?;
        Self::from_json_str(&data)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bitstream_buffer_size == 0 {
            return Err(EngineError::Config(
                "bitstream_buffer_size must be non-zero".into(),
            ));
        }
        if self.async_depth == 0 {
            return Err(EngineError::Config("async_depth must be non-zero".into()));
        }
        if self.stall_tick_limit == 0 {
            return Err(EngineError::Config(
                "stall_tick_limit must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
