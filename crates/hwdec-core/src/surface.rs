//! One decode-target buffer plus its lease counter.
//!
//! A surface is *free* while its lock count is zero.  The decoder takes a
//! lease while it writes or references the surface, and every frame adapter
//! takes one for as long as it exists.  The pixel memory itself is owned by
//! a shared [`BackingMemory`] handle, so a pool can be dropped while frames
//! handed out earlier are still alive.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::error;

use crate::types::{FrameData, FrameInfo, SurfaceId};

/// Shared ownership of the memory block a surface points into.
pub type BackingMemory = Arc<dyn Any + Send + Sync>;

/// Native surface descriptor: format plus plane pointers.
#[derive(Debug)]
pub struct NativeSurface {
    pub info: FrameInfo,
    pub data: FrameData,
}

pub struct Surface {
    id: SurfaceId,
    info: FrameInfo,
    data: Mutex<FrameData>,
    locked: AtomicUsize,
    _backing: Option<BackingMemory>,
}

impl Surface {
    /// Wrap a native descriptor, keeping `backing` alive for the surface's lifetime.
    pub fn create_surface(native: NativeSurface, backing: Option<BackingMemory>) -> Arc<Self> {
        Arc::new(Self {
            id: SurfaceId::next(),
            info: native.info,
            data: Mutex::new(native.data),
            locked: AtomicUsize::new(0),
            _backing: backing,
        })
    }

    /// Opaque handle the backend uses to refer to this surface.
    #[inline]
    pub fn handle(&self) -> SurfaceId {
        self.id
    }

    #[inline]
    pub fn info(&self) -> &FrameInfo {
        &self.info
    }

    /// Plane pointers and pitch; the backend writes these during map.
    pub fn data(&self) -> MutexGuard<'_, FrameData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a lease, returning the previous count.
    pub fn obtain_lock(&self) -> usize {
        self.locked.fetch_add(1, Ordering::AcqRel)
    }

    /// Drop a lease, returning the previous count.
    ///
    /// Releasing a free surface is a caller bug; the count stays at zero.
    pub fn release_lock(&self) -> usize {
        match self
            .locked
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(prev) => prev,
            Err(_) => {
                error!(surface = %self.id, "release_lock on a surface with no lease");
                0
            }
        }
    }

    #[inline]
    pub fn get_locks_count(&self) -> usize {
        self.locked.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.get_locks_count() == 0
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("id", &self.id)
            .field("info", &self.info)
            .field("locked", &self.get_locks_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FourCc;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    fn native() -> NativeSurface {
        NativeSurface {
            info: FrameInfo {
                width: 16,
                height: 16,
                fourcc: FourCc::NV12,
            },
            data: FrameData::default(),
        }
    }

    #[test]
    fn init_surface() {
        let surf = Surface::create_surface(native(), None);
        assert_eq!(surf.get_locks_count(), 0);
        assert_eq!(surf.obtain_lock(), 0);
        assert_eq!(surf.get_locks_count(), 1);
        assert_eq!(surf.release_lock(), 1);
        assert!(surf.is_free());
    }

    #[test]
    fn release_never_goes_negative() {
        let surf = Surface::create_surface(native(), None);
        assert_eq!(surf.release_lock(), 0);
        assert_eq!(surf.get_locks_count(), 0);
    }

    #[test]
    fn concurrent_lock_conserves_count() {
        let surf = Surface::create_surface(native(), None);
        let lock_count = i16::MAX as usize - 1;

        let worker = {
            let surf = Arc::clone(&surf);
            thread::spawn(move || {
                for _ in 0..lock_count {
                    surf.obtain_lock();
                }
            })
        };
        for _ in 0..lock_count {
            surf.obtain_lock();
        }
        worker.join().expect("lock thread");
        assert_eq!(surf.get_locks_count(), lock_count * 2);

        let worker = {
            let surf = Arc::clone(&surf);
            thread::spawn(move || {
                for _ in 0..lock_count {
                    surf.release_lock();
                }
            })
        };
        for _ in 0..lock_count {
            surf.release_lock();
        }
        worker.join().expect("release thread");
        assert_eq!(surf.get_locks_count(), 0);
    }

    struct Tracked(Arc<AtomicBool>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn memory_lifetime() {
        let freed = Arc::new(AtomicBool::new(false));
        let backing: BackingMemory = Arc::new(Tracked(Arc::clone(&freed)));

        const COUNT: usize = 10_000;
        let mut surfaces: Vec<Arc<Surface>> = (0..COUNT)
            .map(|_| Surface::create_surface(native(), Some(Arc::clone(&backing))))
            .collect();

        let last = surfaces.pop().expect("at least one surface");
        surfaces.clear();
        assert!(!freed.load(Ordering::SeqCst));

        drop(backing);
        assert!(!freed.load(Ordering::SeqCst), "last surface still owns memory");

        drop(last);
        assert!(freed.load(Ordering::SeqCst));
    }
}
