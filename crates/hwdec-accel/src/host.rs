//! System-memory acceleration policy.
//!
//! Each pool is one contiguous, zeroed heap block of
//! `surface_count × surface_size` bytes.  Surfaces point at fixed offsets
//! inside it and share ownership of the block, so the memory is freed only
//! when the pool and every surface handed out from it are gone.

use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;

use tracing::{debug, info};

use hwdec_core::codec_traits::DecodeBackend;
use hwdec_core::error::{EngineError, Result};
use hwdec_core::pool::SurfacePool;
use hwdec_core::surface::{BackingMemory, NativeSurface, Surface};
use hwdec_core::types::{FrameAllocRequest, FrameData, SurfaceId, VideoParam};

use crate::adapter::FrameAdapter;
use crate::policy::{AccelType, AccelerationPolicy, PoolKey, PolicyTunables};

const HOST_ALIGNMENT: usize = 64;

// ─── Host buffer ─────────────────────────────────────────────────────────────

/// Zeroed, 64-byte aligned heap block.
pub struct HostBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the block is plain bytes owned exclusively by this struct; shared
// access to the pixels is coordinated by surface leases and view locks.
unsafe impl Send for HostBuffer {}
unsafe impl Sync for HostBuffer {}

impl HostBuffer {
    pub fn new(size: usize) -> Result<Arc<Self>> {
        if size == 0 {
            return Err(EngineError::Config("host buffer size must be non-zero".into()));
        }
        let layout = Layout::from_size_align(size, HOST_ALIGNMENT)
            .map_err(|e| EngineError::Config(format!("host buffer layout: {e}")))?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| {
            EngineError::Device(format!("host allocation of {size} bytes failed"))
        })?;
        debug!(bytes = size, "Host buffer allocated");
        Ok(Arc::new(Self { ptr, layout }))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Base address; stays fixed for the buffer's lifetime.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        debug!(bytes = self.layout.size(), "Host buffer freed");
        // SAFETY: ptr was returned by alloc_zeroed with this exact layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

// ─── Policy ──────────────────────────────────────────────────────────────────

pub struct HostAccelerationPolicy {
    pool_table: HashMap<PoolKey, SurfacePool>,
    next_key: u64,
    tunables: PolicyTunables,
}

impl HostAccelerationPolicy {
    pub fn new(tunables: PolicyTunables) -> Self {
        info!("Host acceleration policy created");
        Self {
            pool_table: HashMap::new(),
            next_key: 1,
            tunables,
        }
    }

    /// Build a pool of `pool_size` surfaces over one shared block.
    ///
    /// `creator` receives the block, the surface's byte offset and its size.
    pub fn create_pool_with<F>(
        &mut self,
        pool_size: usize,
        surface_size_bytes: usize,
        mut creator: F,
    ) -> Result<PoolKey>
    where
        F: FnMut(&Arc<HostBuffer>, usize, usize) -> Result<Arc<Surface>>,
    {
        let total = pool_size
            .checked_mul(surface_size_bytes)
            .ok_or_else(|| EngineError::Config("host pool size overflows".into()))?;
        let buffer = HostBuffer::new(total)?;

        let mut pool = SurfacePool::new();
        pool.reserve(pool_size);
        for i in 0..pool_size {
            pool.push_back(creator(&buffer, i * surface_size_bytes, surface_size_bytes)?);
        }

        let key = PoolKey(self.next_key);
        self.next_key += 1;
        info!(
            pool = %key,
            surfaces = pool_size,
            surface_bytes = surface_size_bytes,
            total_bytes = total,
            "Host surface pool created"
        );
        self.pool_table.insert(key, pool);
        Ok(key)
    }

    fn pool(&self, key: PoolKey) -> Result<&SurfacePool> {
        self.pool_table.get(&key).ok_or(EngineError::UnknownPool(key.0))
    }

    pub fn pool_count(&self) -> usize {
        self.pool_table.len()
    }
}

impl Default for HostAccelerationPolicy {
    fn default() -> Self {
        Self::new(PolicyTunables::default())
    }
}

impl AccelerationPolicy for HostAccelerationPolicy {
    fn accel_type(&self) -> AccelType {
        AccelType::Host
    }

    fn init(&mut self, session: &mut dyn DecodeBackend) -> Result<()> {
        info!(session = session.session_id(), "Host acceleration initialized");
        Ok(())
    }

    fn deinit(&mut self, session: &mut dyn DecodeBackend) -> Result<()> {
        info!(session = session.session_id(), "Host acceleration deinitialized");
        Ok(())
    }

    fn create_surface_pool(
        &mut self,
        request: &FrameAllocRequest,
        params: &mut VideoParam,
    ) -> Result<PoolKey> {
        let info = params.frame_info;
        let layout = info.fourcc.host_layout(info.width, info.height)?;
        let planes = info.fourcc.plane_count()?;
        let multiplier = usize::from(self.tunables.host_preallocation_multiplier.max(1));
        let count = usize::from(request.num_frame_suggested.max(request.num_frame_min)) * multiplier;
        debug!(
            alloc_id = request.alloc_id,
            suggested = request.num_frame_suggested,
            count,
            fourcc = %info.fourcc,
            "Host pool request"
        );

        self.create_pool_with(count, layout.size, |buffer, offset, _size| {
            let mut data = FrameData {
                pitch: layout.pitch,
                ..FrameData::default()
            };
            for (slot, plane_offset) in layout.offsets.iter().take(planes).enumerate() {
                // SAFETY: offset + plane_offset < pool_size * surface_size,
                // both computed from the same layout.
                data.planes[slot] = unsafe { buffer.as_ptr().add(offset + plane_offset) };
            }
            let backing: BackingMemory = Arc::clone(buffer) as BackingMemory;
            Ok(Surface::create_surface(NativeSurface { info, data }, Some(backing)))
        })
    }

    fn get_free_surface(&self, key: PoolKey) -> Result<Arc<Surface>> {
        self.pool(key)?.find_free()
    }

    fn get_free_surface_count(&self, key: PoolKey) -> Result<usize> {
        Ok(self.pool(key)?.available_size())
    }

    fn get_surface_count(&self, key: PoolKey) -> Result<usize> {
        Ok(self.pool(key)?.total_size())
    }

    fn create_frame_adapter(&self, key: PoolKey, surface: SurfaceId) -> Result<FrameAdapter> {
        let surface = self.pool(key)?.find_by_handle(surface)?;
        Ok(FrameAdapter::new(surface, None, None))
    }

    fn release_surface_pool(&mut self, key: PoolKey) -> Result<()> {
        let pool = self
            .pool_table
            .remove(&key)
            .ok_or(EngineError::UnknownPool(key.0))?;
        debug!(
            pool = %key,
            total = pool.total_size(),
            leased = pool.total_size() - pool.available_size(),
            "Host pool released"
        );
        Ok(())
    }
}

impl Drop for HostAccelerationPolicy {
    fn drop(&mut self) {
        for (key, pool) in &self.pool_table {
            debug!(
                pool = %key,
                total = pool.total_size(),
                free = pool.available_size(),
                "Dropping host pool"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwdec_core::types::{CodecId, FourCc, FrameInfo, IoPattern};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn plain_creator(
        buffer: &Arc<HostBuffer>,
        offset: usize,
        _size: usize,
    ) -> Result<Arc<Surface>> {
        let mut data = FrameData::default();
        // SAFETY: offset is inside the buffer by construction.
        data.planes[0] = unsafe { buffer.as_ptr().add(offset) };
        data.pitch = 32;
        Ok(Surface::create_surface(
            NativeSurface {
                info: FrameInfo {
                    width: 32,
                    height: 32,
                    fourcc: FourCc::NV12,
                },
                data,
            },
            Some(Arc::clone(buffer) as BackingMemory),
        ))
    }

    #[test]
    fn init_destroy_pools() {
        let mut policy = HostAccelerationPolicy::default();
        assert_eq!(policy.accel_type(), AccelType::Host);

        let sizes = [(10usize, 1024usize), (20, 512), (1, 4096)];
        let keys: Vec<_> = sizes
            .iter()
            .map(|&(n, sz)| policy.create_pool_with(n, sz, plain_creator).expect("pool"))
            .collect();

        assert_eq!(policy.pool_count(), 3);
        for (key, (n, _)) in keys.iter().zip(sizes) {
            assert_eq!(policy.get_surface_count(*key).expect("count"), n);
            assert_eq!(policy.get_free_surface_count(*key).expect("free"), n);
        }
    }

    #[test]
    fn pool_produce_consume() {
        const SURFACES: usize = 10;
        let mut policy = HostAccelerationPolicy::default();
        let key = policy
            .create_pool_with(SURFACES, 1024, plain_creator)
            .expect("pool");

        let mut held = Vec::new();
        for i in 0..SURFACES {
            let surf = policy.get_free_surface(key).expect("free surface");
            surf.obtain_lock();
            held.push(surf);
            assert_eq!(
                policy.get_free_surface_count(key).expect("free"),
                SURFACES - i - 1
            );
        }

        let err = policy.get_free_surface(key).expect_err("pool exhausted");
        assert!(matches!(err, EngineError::NoFreeSurface { total: 10, .. }));
        assert_eq!(policy.get_surface_count(key).expect("count"), SURFACES);

        held[3].release_lock();
        let again = policy.get_free_surface(key).expect("one released");
        again.obtain_lock();
        assert!(policy.get_free_surface(key).is_err(), "exactly one obtainable");
        assert_eq!(policy.get_surface_count(key).expect("count"), SURFACES);

        for surf in held.iter() {
            surf.release_lock();
        }
        again.release_lock();
        assert_eq!(policy.get_free_surface_count(key).expect("free"), SURFACES);
    }

    #[test]
    fn pool_produce_concurrent_consume() {
        const SURFACES: usize = 10;
        let mut policy = HostAccelerationPolicy::default();
        let key = policy
            .create_pool_with(SURFACES, 1024, plain_creator)
            .expect("pool");

        let held: Vec<_> = (0..SURFACES)
            .map(|_| {
                let s = policy.get_free_surface(key).expect("free");
                s.obtain_lock();
                s
            })
            .collect();
        assert!(policy.get_free_surface(key).is_err());

        let released = Arc::new(AtomicUsize::new(0));
        let consumer = {
            let held = held.clone();
            let released = Arc::clone(&released);
            thread::spawn(move || {
                for s in held {
                    s.release_lock();
                    released.fetch_add(1, Ordering::SeqCst);
                }
            })
        };
        consumer.join().expect("consumer thread");
        assert_eq!(released.load(Ordering::SeqCst), SURFACES);
        assert_eq!(policy.get_free_surface_count(key).expect("free"), SURFACES);
    }

    #[test]
    fn request_pool_lays_out_planes() {
        let mut policy = HostAccelerationPolicy::default();
        let mut params = VideoParam::new(CodecId::HEVC, IoPattern::SystemMemory);
        params.frame_info = FrameInfo {
            width: 64,
            height: 32,
            fourcc: FourCc::I420,
        };
        let request = FrameAllocRequest {
            alloc_id: 1,
            info: params.frame_info,
            num_frame_min: 2,
            num_frame_suggested: 4,
            memory: IoPattern::SystemMemory,
        };
        let key = policy
            .create_surface_pool(&request, &mut params)
            .expect("pool");
        assert_eq!(policy.get_surface_count(key).expect("count"), 4);

        let surf = policy.get_free_surface(key).expect("free");
        let data = *surf.data();
        let y = data.planes[0] as usize;
        assert_eq!(data.planes[1] as usize - y, 64 * 32);
        assert_eq!(data.planes[2] as usize - y, 64 * 32 + 32 * 16);
        assert_eq!(data.pitch, 64);
    }

    #[test]
    fn unknown_pool_key_is_error() {
        let policy = HostAccelerationPolicy::default();
        assert!(matches!(
            policy.get_surface_count(PoolKey(42)),
            Err(EngineError::UnknownPool(42))
        ));
    }

    #[test]
    fn released_pool_is_forgotten_but_frames_stay_readable() {
        let mut policy = HostAccelerationPolicy::default();
        let mut params = VideoParam::new(CodecId::HEVC, IoPattern::SystemMemory);
        params.frame_info = FrameInfo {
            width: 16,
            height: 8,
            fourcc: FourCc::NV12,
        };
        let request = FrameAllocRequest {
            alloc_id: 1,
            info: params.frame_info,
            num_frame_min: 1,
            num_frame_suggested: 2,
            memory: IoPattern::SystemMemory,
        };
        let key = policy
            .create_surface_pool(&request, &mut params)
            .expect("pool");
        let surf = policy.get_free_surface(key).expect("free");
        let frame = policy
            .create_frame_adapter(key, surf.handle())
            .expect("adapter");
        drop(surf);

        policy.release_surface_pool(key).expect("release");
        assert_eq!(policy.pool_count(), 0);
        assert!(matches!(
            policy.release_surface_pool(key),
            Err(EngineError::UnknownPool(_))
        ));

        let view = frame
            .access(crate::adapter::AccessMode::Read)
            .expect("frame outlives its pool");
        assert_eq!(view.plane_count(), 2);
    }
}
