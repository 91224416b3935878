//! Core contracts for the hwdec decode pipeline.
//!
//! Surfaces, their lease counters and pools, the reader/writer lock used by
//! frame views, the bitstream buffer, configuration parameters and the
//! traits that decoder backends, texture devices and frame allocators
//! implement.

pub mod bitstream;
pub mod codec_traits;
pub mod config;
pub mod device;
pub mod error;
pub mod pool;
pub mod shared_lock;
pub mod status;
pub mod surface;
pub mod types;

pub use error::{EngineError, Result};
pub use status::Status;
