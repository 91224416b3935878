//! Typed error hierarchy for the decode pipeline.
//!
//! Uses `thiserror` for library-grade errors.  Application code should wrap
//! these in `anyhow::Result` at call sites.
//!
//! # Error codes
//!
//! Each variant maps to a stable integer code via [`EngineError::error_code`]
//! for structured telemetry without string parsing.

use crate::status::Status;
use crate::types::{FourCc, MemId, SurfaceId};

/// All errors originating from the hwdec crates.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // ── Backend ──────────────────────────────────────────────────────
    #[error("Backend call {op} failed: {status}")]
    Backend { op: &'static str, status: Status },

    #[error("Device error: {0}")]
    Device(String),

    #[error("Lock failed for memory id {mid}: {reason}")]
    Lock { mid: MemId, reason: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("No free surface in pool: total {total}, scanned from slot {cursor}")]
    NoFreeSurface { total: usize, cursor: usize },

    #[error("Allocation id {alloc_id} already in use with conflicting request: {detail}")]
    AllocationConflict { alloc_id: u32, detail: String },

    #[error("Unknown surface handle: {0}")]
    UnknownSurface(SurfaceId),

    #[error("Unknown memory id: {0}")]
    UnknownMemId(MemId),

    #[error("Unknown surface pool key: {0}")]
    UnknownPool(u64),

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported pixel format: {0}")]
    UnsupportedFormat(FourCc),

    // ── Contracts ────────────────────────────────────────────────────
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    // ── IO ───────────────────────────────────────────────────────────
    #[error("Data provider error: {0}")]
    DataProvider(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Stable integer error code for structured telemetry.
    ///
    /// Codes are grouped by category:
    /// - 1xx: Backend/device
    /// - 2xx: Resources
    /// - 3xx: Configuration
    /// - 4xx: Contracts
    /// - 5xx: IO
    pub fn error_code(&self) -> u32 {
        match self {
            Self::Backend { .. } => 100,
            Self::Device(_) => 101,
            Self::Lock { .. } => 102,
            Self::NoFreeSurface { .. } => 200,
            Self::AllocationConflict { .. } => 201,
            Self::UnknownSurface(_) => 202,
            Self::UnknownMemId(_) => 203,
            Self::UnknownPool(_) => 204,
            Self::Config(_) => 300,
            Self::UnsupportedFormat(_) => 301,
            Self::InvariantViolation(_) => 400,
            Self::DataProvider(_) => 500,
            Self::Json(_) => 501,
        }
    }

    /// Whether the failing call can simply be retried on the next tick.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoFreeSurface { .. } | Self::AllocationConflict { .. }
        )
    }

    /// Shorthand for a failed backend call.
    pub fn backend(op: &'static str, status: Status) -> Self {
        Self::Backend { op, status }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_errors_are_recoverable() {
        let err = EngineError::NoFreeSurface { total: 4, cursor: 2 };
        assert!(err.is_recoverable());
        assert_eq!(err.error_code(), 200);

        let fatal = EngineError::backend("DecodeFrameAsync", Status::DEVICE_LOST);
        assert!(!fatal.is_recoverable());
        assert!(fatal.to_string().contains("MFX_ERR_DEVICE_LOST"));
    }
}
