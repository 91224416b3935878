//! Software YUV4MPEG2 backend.
//!
//! | Module    | Contents                                          |
//! |-----------|---------------------------------------------------|
//! | `header`  | stream / frame header parsing                     |
//! | `backend` | [`Y4mDecoder`], an I420 → NV12 decode session     |
//! | `factory` | [`Y4mDecoderFactory`] for `MFX_CODEC_Y4M` configs |
//! | `writer`  | [`Y4mWriter`] for producing test and demo streams |

pub mod backend;
pub mod factory;
pub mod header;
pub mod writer;

pub use backend::{Y4mConfig, Y4mDecoder};
pub use factory::{SUPPORTED_CODECS, Y4mDecoderFactory};
pub use header::StreamHeader;
pub use writer::Y4mWriter;
