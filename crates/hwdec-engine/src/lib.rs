//! Decode engine for the hwdec pipeline.
//!
//! [`engine::ProcessingEngine`] is a generic session table driven one stage
//! at a time.  [`decode::DecodeEngine`] binds it to a decoder backend's
//! read / submit / sync / dispatch cycle, and [`source::DecodeSource`] turns
//! that into a pull-based frame source.

pub mod config;
pub mod decode;
pub mod engine;
pub mod metrics;
pub mod provider;
pub mod session;
pub mod source;

pub use config::EngineConfig;
pub use decode::DecodeEngine;
pub use engine::{ExecutionStatus, ProcessingEngine, SessionId};
pub use session::{FrameMeta, MediaFrame};
pub use source::DecodeSource;
