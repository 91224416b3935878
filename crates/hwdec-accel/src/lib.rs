//! Acceleration policies for the hwdec pipeline.
//!
//! | Module       | Responsibility                                          |
//! |--------------|---------------------------------------------------------|
//! | `policy`     | `AccelerationPolicy` contract, pool keys, tunables      |
//! | `host`       | System-memory pools over one shared heap block          |
//! | `texture`    | Texture-array frame allocator and policy                |
//! | `allocation` | Allocation records/items owning texture slices          |
//! | `barrier`    | Elastic first-in-maps / last-out-unmaps barrier         |
//! | `adapter`    | Frame adapters and locked pixel views                   |
//! | `selector`   | Device/context selection from configuration parameters  |
//! | `emulated`   | Heap-backed texture device                              |

pub mod adapter;
pub mod allocation;
pub mod barrier;
pub mod emulated;
pub mod host;
pub mod policy;
pub mod selector;
pub mod texture;

pub use adapter::{AccessMode, FrameAdapter, FrameDesc, FrameView};
pub use policy::{AccelType, AccelerationPolicy, PolicyTunables, PoolKey};
