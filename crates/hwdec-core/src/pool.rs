//! Fixed-size arena of surfaces with round-robin free lookup.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::surface::Surface;
use crate::types::SurfaceId;

#[derive(Default)]
pub struct SurfacePool {
    surfaces: Vec<Arc<Surface>>,
    next_free: AtomicUsize,
    cache: HashMap<SurfaceId, Arc<Surface>>,
}

impl SurfacePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&mut self, additional: usize) {
        self.surfaces.reserve(additional);
        self.cache.reserve(additional);
    }

    pub fn push_back(&mut self, surface: Arc<Surface>) {
        self.cache.insert(surface.handle(), Arc::clone(&surface));
        self.surfaces.push(surface);
    }

    pub fn total_size(&self) -> usize {
        self.surfaces.len()
    }

    pub fn available_size(&self) -> usize {
        self.surfaces.iter().filter(|s| s.is_free()).count()
    }

    pub fn clear(&mut self) {
        debug!(surfaces = self.surfaces.len(), "Clearing surface pool");
        self.surfaces.clear();
        self.cache.clear();
        self.next_free.store(0, Ordering::Relaxed);
    }

    /// Next surface with no leases, scanning one full revolution from the cursor.
    ///
    /// Never blocks: an exhausted pool yields [`EngineError::NoFreeSurface`].
    /// The returned surface is not leased; the caller takes the lease.
    pub fn find_free(&self) -> Result<Arc<Surface>> {
        let total = self.surfaces.len();
        let start = if total == 0 {
            0
        } else {
            self.next_free.load(Ordering::Relaxed) % total
        };
        for step in 0..total {
            let idx = (start + step) % total;
            let surface = &self.surfaces[idx];
            if surface.is_free() {
                self.next_free.store((idx + 1) % total, Ordering::Relaxed);
                return Ok(Arc::clone(surface));
            }
        }
        warn!(total, cursor = start, "No free surface");
        Err(EngineError::NoFreeSurface {
            total,
            cursor: start,
        })
    }

    /// Resolve a backend-returned handle to its wrapper.
    pub fn find_by_handle(&self, handle: SurfaceId) -> Result<Arc<Surface>> {
        self.cache
            .get(&handle)
            .cloned()
            .ok_or(EngineError::UnknownSurface(handle))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Surface>> {
        self.surfaces.iter()
    }
}
