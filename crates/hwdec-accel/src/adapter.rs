//! Decoded surface exposed as a lockable pixel view.
//!
//! A [`FrameAdapter`] holds a lease on its surface for as long as it lives,
//! so the decoder cannot recycle the surface while a consumer still has the
//! frame.  [`FrameAdapter::access`] takes the reader or writer side of the
//! adapter's [`SharedLock`], asks the allocator for live plane pointers and
//! returns a [`FrameView`] that undoes all of it on drop.
//!
//! ```text
//!   access(Read)                       drop(FrameView)
//!     read_lock ──► allocator.lock       allocator.unlock
//!                   (elastic barrier)    unlock_read
//!                   validate planes      surface.release_lock
//! ```

use std::fmt;
use std::slice;
use std::sync::Arc;

use tracing::{error, trace};

use hwdec_core::codec_traits::FrameAllocator;
use hwdec_core::error::{EngineError, Result};
use hwdec_core::shared_lock::{Lockable, SharedLock};
use hwdec_core::surface::Surface;
use hwdec_core::types::{FourCc, FrameData, SurfaceId};

use crate::allocation::AllocationItem;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// Format and geometry of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameDesc {
    pub format: FourCc,
    pub width: u32,
    pub height: u32,
}

pub struct FrameAdapter {
    surface: Arc<Surface>,
    allocator: Option<Arc<dyn FrameAllocator>>,
    item: Option<Arc<AllocationItem>>,
    lock: Arc<SharedLock>,
    lockable: Arc<dyn Lockable>,
}

impl FrameAdapter {
    /// Take a lease on `surface`.  For texture-backed surfaces `item` is the
    /// allocation slice; the adapter's lock becomes the item's lock.
    pub fn new(
        surface: Arc<Surface>,
        allocator: Option<Arc<dyn FrameAllocator>>,
        item: Option<Arc<AllocationItem>>,
    ) -> Self {
        surface.obtain_lock();
        let lock = Arc::new(SharedLock::new());
        let lockable: Arc<dyn Lockable> = match &item {
            Some(item) => {
                item.set_adaptee(Some(Arc::clone(&lock) as Arc<dyn Lockable>));
                Arc::clone(item) as Arc<dyn Lockable>
            }
            None => Arc::clone(&lock) as Arc<dyn Lockable>,
        };
        trace!(surface = %surface.handle(), texture = item.is_some(), "Frame adapter created");
        Self {
            surface,
            allocator,
            item,
            lock,
            lockable,
        }
    }

    pub fn surface_id(&self) -> SurfaceId {
        self.surface.handle()
    }

    pub fn surface(&self) -> &Arc<Surface> {
        &self.surface
    }

    pub fn is_texture_backed(&self) -> bool {
        self.item.is_some()
    }

    /// Format and geometry; fails for formats the views cannot lay out.
    pub fn meta(&self) -> Result<FrameDesc> {
        let info = self.surface.info();
        if !info.fourcc.is_supported() {
            return Err(EngineError::UnsupportedFormat(info.fourcc));
        }
        Ok(FrameDesc {
            format: info.fourcc,
            width: info.width,
            height: info.height,
        })
    }

    /// Lock the frame for `mode` and return a view of its planes.
    pub fn access(&self, mode: AccessMode) -> Result<FrameView> {
        let desc = self.meta()?;
        match mode {
            AccessMode::Read => {
                self.lockable.read_lock();
            }
            AccessMode::Write => self.lockable.write_lock(),
        }
        let unlock_mode = {
            let lockable = Arc::clone(&self.lockable);
            move || match mode {
                AccessMode::Read => {
                    lockable.unlock_read();
                }
                AccessMode::Write => lockable.unlock_write(),
            }
        };

        let mut data = *self.surface.data();
        if let Some(mid) = data.mem_id {
            let Some(allocator) = &self.allocator else {
                unlock_mode();
                return Err(EngineError::InvariantViolation(format!(
                    "{} has memory id {mid} but no allocator",
                    self.surface.handle()
                )));
            };
            if let Err(err) = allocator.lock(mid, &mut data) {
                unlock_mode();
                return Err(EngineError::Lock {
                    mid,
                    reason: err.to_string(),
                });
            }
        }

        let allocator = self.allocator.clone();
        let surface = Arc::clone(&self.surface);
        surface.obtain_lock();
        let release = move || {
            if let (Some(allocator), Some(mid)) = (&allocator, data.mem_id) {
                let mut data = data;
                if let Err(err) = allocator.unlock(mid, &mut data) {
                    error!(%mid, %err, "Allocator unlock failed on view release");
                }
            }
            unlock_mode();
            surface.release_lock();
        };

        // From here on the release closure owns every acquired resource.
        match FrameView::layout(desc, &data) {
            Ok((planes, strides, rows, plane_count)) => Ok(FrameView {
                desc,
                mode,
                planes,
                strides,
                rows,
                plane_count,
                release: Some(Box::new(release)),
            }),
            Err(err) => {
                release();
                Err(err)
            }
        }
    }
}

impl fmt::Debug for FrameAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameAdapter")
            .field("surface", &self.surface.handle())
            .field("texture", &self.item.is_some())
            .field("exclusive", &self.lock.owns())
            .finish()
    }
}

impl Drop for FrameAdapter {
    fn drop(&mut self) {
        if let Some(item) = &self.item {
            item.set_adaptee(None);
        }
        self.surface.release_lock();
        trace!(surface = %self.surface.handle(), "Frame adapter dropped");
    }
}

// ─── View ────────────────────────────────────────────────────────────────────

/// Locked pixel planes of one frame.  Dropping the view unlocks.
pub struct FrameView {
    desc: FrameDesc,
    mode: AccessMode,
    planes: [*mut u8; 4],
    strides: [usize; 4],
    rows: [usize; 4],
    plane_count: usize,
    release: Option<Box<dyn FnOnce() + Send>>,
}

// SAFETY: the plane pointers stay valid until `release` runs, which only
// happens in `Drop`; moving the view to another thread moves that duty too.
unsafe impl Send for FrameView {}

type PlaneLayout = ([*mut u8; 4], [usize; 4], [usize; 4], usize);

impl FrameView {
    fn layout(desc: FrameDesc, data: &FrameData) -> Result<PlaneLayout> {
        let plane_count = desc.format.plane_count()?;
        if data.pitch == 0 {
            return Err(EngineError::InvariantViolation(format!(
                "{} frame locked with zero pitch",
                desc.format
            )));
        }
        if let Some(missing) = data.planes[..plane_count].iter().position(|p| p.is_null()) {
            return Err(EngineError::InvariantViolation(format!(
                "{} frame locked without plane {missing}",
                desc.format
            )));
        }
        let strides = desc.format.plane_strides(data.pitch)?;
        let rows = desc.format.plane_rows(desc.height)?;
        Ok((data.planes, strides, rows, plane_count))
    }

    pub fn desc(&self) -> FrameDesc {
        self.desc
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn plane_count(&self) -> usize {
        self.plane_count
    }

    pub fn stride(&self, plane: usize) -> usize {
        self.strides.get(plane).copied().unwrap_or(0)
    }

    pub fn rows(&self, plane: usize) -> usize {
        self.rows.get(plane).copied().unwrap_or(0)
    }

    /// Bytes of `plane`, `stride × rows` long.
    pub fn plane(&self, plane: usize) -> Option<&[u8]> {
        if plane >= self.plane_count {
            return None;
        }
        // SAFETY: the pointer was validated non-null at lock time and the
        // memory stays mapped until this view is dropped.
        Some(unsafe { slice::from_raw_parts(self.planes[plane], self.plane_len(plane)) })
    }

    /// Writable bytes of `plane`; `None` for read views.
    pub fn plane_mut(&mut self, plane: usize) -> Option<&mut [u8]> {
        if self.mode != AccessMode::Write || plane >= self.plane_count {
            return None;
        }
        // SAFETY: as in `plane`; the writer lock excludes every other view.
        Some(unsafe { slice::from_raw_parts_mut(self.planes[plane], self.plane_len(plane)) })
    }

    fn plane_len(&self, plane: usize) -> usize {
        self.strides[plane] * self.rows[plane]
    }
}

impl fmt::Debug for FrameView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameView")
            .field("desc", &self.desc)
            .field("mode", &self.mode)
            .field("strides", &&self.strides[..self.plane_count])
            .finish()
    }
}

impl Drop for FrameView {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}
