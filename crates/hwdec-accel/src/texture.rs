//! GPU texture acceleration policy.
//!
//! ```text
//!   create_surface_pool(request)
//!     │  suggested × texture_surface_multiplier
//!     ▼
//!   TextureAllocator::alloc ──► AllocationRecord (texture array, N staging)
//!     │                           └─ AllocationItem × N  (MemId ↔ slice)
//!     ▼
//!   SurfacePool: one Surface per MemId, backing = the record
//! ```
//!
//! Pools are shared per allocation id: a second request that the allocator
//! answers with an existing allocation gets the same surfaces, so a slice
//! leased through one key is never free through another.
//!
//! The decoder writes into array slices it resolves through `get_handle`.
//! Consumers read pixels by locking a memory id, which runs the item's
//! elastic barrier (copy slice → staging, map) and publishes the mapped
//! plane pointers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, info, warn};

use hwdec_core::codec_traits::{DecodeBackend, FrameAllocator};
use hwdec_core::device::{DeviceHandle, TextureDevice, TextureSubresource};
use hwdec_core::error::{EngineError, Result};
use hwdec_core::pool::SurfacePool;
use hwdec_core::status::Status;
use hwdec_core::surface::{BackingMemory, NativeSurface, Surface};
use hwdec_core::types::{
    FourCc, FrameAllocRequest, FrameAllocResponse, FrameData, MemId, SurfaceId, VideoParam,
};

use crate::adapter::FrameAdapter;
use crate::allocation::{AllocationItem, AllocationRecord};
use crate::policy::{AccelType, AccelerationPolicy, PoolKey, PolicyTunables};

// ─── Allocator ───────────────────────────────────────────────────────────────

/// Frame allocator over texture arrays, keyed by the backend's allocation id.
pub struct TextureAllocator {
    device: Arc<dyn TextureDevice>,
    allocations: Mutex<HashMap<u32, Arc<AllocationRecord>>>,
    mids: Mutex<HashMap<MemId, Weak<AllocationItem>>>,
    next_mid: AtomicU64,
}

impl TextureAllocator {
    pub fn new(device: Arc<dyn TextureDevice>) -> Self {
        Self {
            device,
            allocations: Mutex::new(HashMap::new()),
            mids: Mutex::new(HashMap::new()),
            next_mid: AtomicU64::new(1),
        }
    }

    pub fn device(&self) -> &Arc<dyn TextureDevice> {
        &self.device
    }

    /// Resolve a memory id to its allocation item.
    pub fn item(&self, mid: MemId) -> Result<Arc<AllocationItem>> {
        lock_map(&self.mids)
            .get(&mid)
            .and_then(Weak::upgrade)
            .ok_or(EngineError::UnknownMemId(mid))
    }

    pub fn record(&self, alloc_id: u32) -> Option<Arc<AllocationRecord>> {
        lock_map(&self.allocations).get(&alloc_id).cloned()
    }

    pub fn allocation_count(&self) -> usize {
        lock_map(&self.allocations).len()
    }

    /// Drop the allocator's own reference to `alloc_id`.  Items stay
    /// resolvable while surfaces still hold their record.
    pub fn release(&self, alloc_id: u32) -> bool {
        let released = lock_map(&self.allocations).remove(&alloc_id).is_some();
        lock_map(&self.mids).retain(|_, item| item.strong_count() > 0);
        if released {
            debug!(alloc_id, "Texture allocation released");
        }
        released
    }

    fn response_for(record: &AllocationRecord) -> FrameAllocResponse {
        FrameAllocResponse {
            alloc_id: record.alloc_id(),
            mids: record.items().iter().map(|item| item.mem_id()).collect(),
        }
    }
}

fn lock_map<K, V>(m: &Mutex<HashMap<K, V>>) -> MutexGuard<'_, HashMap<K, V>> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FrameAllocator for TextureAllocator {
    /// Re-requesting an id already allocated with the same geometry and at
    /// least `num_frame_min` slices returns the existing allocation.
    fn alloc(&self, request: &FrameAllocRequest) -> Result<FrameAllocResponse> {
        if request.info.fourcc != FourCc::NV12 {
            return Err(EngineError::UnsupportedFormat(request.info.fourcc));
        }
        let mut allocations = lock_map(&self.allocations);
        if let Some(existing) = allocations.get(&request.alloc_id) {
            if existing.info() == &request.info && existing.len() >= usize::from(request.num_frame_min) {
                debug!(
                    alloc_id = request.alloc_id,
                    slices = existing.len(),
                    "Reusing existing allocation"
                );
                return Ok(Self::response_for(existing));
            }
            let detail = format!(
                "have {}x{} {} × {}, requested {}x{} {} × {}",
                existing.info().width,
                existing.info().height,
                existing.info().fourcc,
                existing.len(),
                request.info.width,
                request.info.height,
                request.info.fourcc,
                request.num_frame_min,
            );
            warn!(alloc_id = request.alloc_id, %detail, "Allocation conflict");
            return Err(EngineError::AllocationConflict {
                alloc_id: request.alloc_id,
                detail,
            });
        }

        let count = request.num_frame_suggested.max(request.num_frame_min).max(1);
        let mids: Vec<MemId> = (0..count)
            .map(|_| MemId(self.next_mid.fetch_add(1, Ordering::Relaxed)))
            .collect();
        let record = AllocationRecord::create(&self.device, request.alloc_id, request.info, &mids)?;

        let mut table = lock_map(&self.mids);
        for item in record.items() {
            table.insert(item.mem_id(), Arc::downgrade(item));
        }
        let response = Self::response_for(&record);
        allocations.insert(request.alloc_id, record);
        info!(
            alloc_id = request.alloc_id,
            surfaces = response.num_frame_actual(),
            device = self.device.name(),
            "Texture allocation created"
        );
        Ok(response)
    }

    fn lock(&self, mid: MemId, data: &mut FrameData) -> Result<()> {
        self.item(mid)?.lock(data)
    }

    fn unlock(&self, mid: MemId, data: &mut FrameData) -> Result<()> {
        self.item(mid)?.unlock(data);
        Ok(())
    }

    fn get_handle(&self, mid: MemId) -> Result<TextureSubresource> {
        Ok(self.item(mid)?.subresource())
    }

    fn free(&self, response: &FrameAllocResponse) -> Result<()> {
        let Some(record) = lock_map(&self.allocations).remove(&response.alloc_id) else {
            return Err(EngineError::Config(format!(
                "free of unknown allocation {}",
                response.alloc_id
            )));
        };
        let mut table = lock_map(&self.mids);
        for item in record.items() {
            table.remove(&item.mem_id());
        }
        debug!(alloc_id = response.alloc_id, "Texture allocation freed");
        Ok(())
    }
}

// ─── Policy ──────────────────────────────────────────────────────────────────

struct TexturePool {
    pool: Arc<SurfacePool>,
    response: FrameAllocResponse,
}

pub struct TextureAccelerationPolicy {
    device: Arc<dyn TextureDevice>,
    allocator: Arc<TextureAllocator>,
    pool_table: HashMap<PoolKey, TexturePool>,
    next_key: u64,
    tunables: PolicyTunables,
}

impl TextureAccelerationPolicy {
    pub fn new(device: Arc<dyn TextureDevice>, tunables: PolicyTunables) -> Self {
        info!(device = device.name(), "Texture acceleration policy created");
        Self {
            allocator: Arc::new(TextureAllocator::new(Arc::clone(&device))),
            device,
            pool_table: HashMap::new(),
            next_key: 1,
            tunables,
        }
    }

    pub fn allocator(&self) -> &Arc<TextureAllocator> {
        &self.allocator
    }

    fn pool(&self, key: PoolKey) -> Result<&SurfacePool> {
        self.pool_table
            .get(&key)
            .map(|p| &*p.pool)
            .ok_or(EngineError::UnknownPool(key.0))
    }
}

impl AccelerationPolicy for TextureAccelerationPolicy {
    fn accel_type(&self) -> AccelType {
        AccelType::Texture
    }

    fn init(&mut self, session: &mut dyn DecodeBackend) -> Result<()> {
        let status = session.set_handle(DeviceHandle::Texture(Arc::clone(&self.device)));
        if status != Status::NONE {
            return Err(EngineError::backend("set_handle", status));
        }
        let allocator: Arc<dyn FrameAllocator> = Arc::clone(&self.allocator) as Arc<dyn FrameAllocator>;
        let status = session.set_frame_allocator(Some(allocator));
        if status != Status::NONE {
            return Err(EngineError::backend("set_frame_allocator", status));
        }
        info!(
            session = session.session_id(),
            device = self.device.name(),
            "Texture acceleration initialized"
        );
        Ok(())
    }

    fn deinit(&mut self, session: &mut dyn DecodeBackend) -> Result<()> {
        let status = session.set_frame_allocator(None);
        if status != Status::NONE {
            return Err(EngineError::backend("set_frame_allocator", status));
        }
        info!(session = session.session_id(), "Texture acceleration deinitialized");
        Ok(())
    }

    fn create_surface_pool(
        &mut self,
        request: &FrameAllocRequest,
        params: &mut VideoParam,
    ) -> Result<PoolKey> {
        let multiplier = self.tunables.texture_surface_multiplier.max(1);
        let inflated = FrameAllocRequest {
            num_frame_suggested: request.num_frame_suggested.saturating_mul(multiplier),
            info: params.frame_info,
            ..request.clone()
        };
        debug!(
            alloc_id = request.alloc_id,
            suggested = request.num_frame_suggested,
            inflated = inflated.num_frame_suggested,
            "Texture pool request"
        );
        let response = self.allocator.alloc(&inflated)?;
        let key = PoolKey(self.next_key);
        if let Some(shared) = self
            .pool_table
            .values()
            .find(|p| p.response.alloc_id == response.alloc_id)
        {
            let pool = Arc::clone(&shared.pool);
            self.next_key += 1;
            info!(
                pool = %key,
                surfaces = pool.total_size(),
                alloc_id = response.alloc_id,
                "Texture surface pool shared"
            );
            self.pool_table.insert(key, TexturePool { pool, response });
            return Ok(key);
        }

        let record = self
            .allocator
            .record(response.alloc_id)
            .ok_or_else(|| EngineError::InvariantViolation("allocation vanished".into()))?;

        let mut pool = SurfacePool::new();
        pool.reserve(response.num_frame_actual());
        for mid in &response.mids {
            let backing: BackingMemory = Arc::clone(&record) as BackingMemory;
            pool.push_back(Surface::create_surface(
                NativeSurface {
                    info: params.frame_info,
                    data: FrameData::with_mem_id(*mid),
                },
                Some(backing),
            ));
        }

        self.next_key += 1;
        info!(
            pool = %key,
            surfaces = pool.total_size(),
            alloc_id = response.alloc_id,
            "Texture surface pool created"
        );
        self.pool_table.insert(
            key,
            TexturePool {
                pool: Arc::new(pool),
                response,
            },
        );
        Ok(key)
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
        let mid = surface
            .data()
            .mem_id
            .ok_or_else(|| EngineError::InvariantViolation(format!("{surface:?} has no memory id")))?;
        let item = self.allocator.item(mid)?;
        let allocator: Arc<dyn FrameAllocator> = Arc::clone(&self.allocator) as Arc<dyn FrameAllocator>;
        Ok(FrameAdapter::new(surface, Some(allocator), Some(item)))
    }

    fn release_surface_pool(&mut self, key: PoolKey) -> Result<()> {
        let entry = self
            .pool_table
            .remove(&key)
            .ok_or(EngineError::UnknownPool(key.0))?;
        let alloc_id = entry.response.alloc_id;
        let shared = self.pool_table.values().any(|p| p.response.alloc_id == alloc_id);
        debug!(
            pool = %key,
            alloc_id,
            leased = entry.pool.total_size() - entry.pool.available_size(),
            shared,
            "Texture pool released"
        );
        if !shared {
            drop(entry);
            self.allocator.release(alloc_id);
        }
        Ok(())
    }
}

impl Drop for TextureAccelerationPolicy {
    fn drop(&mut self) {
        for (key, entry) in &self.pool_table {
            debug!(
                pool = %key,
                alloc_id = entry.response.alloc_id,
                total = entry.pool.total_size(),
                free = entry.pool.available_size(),
                "Dropping texture pool"
            );
        }
    }
}
