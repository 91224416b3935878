//! Texture-backed allocation records.
//!
//! An [`AllocationRecord`] owns one texture array (one slice per decode
//! surface) and hands out one [`AllocationItem`] per slice.  Each item owns
//! a CPU-readable staging texture and runs the elastic barrier that decides
//! when the slice is copied into staging and mapped, and when it is unmapped.
//!
//! Items point back at their record through a `Weak`, the record owns the
//! items; the texture array is released when the record drops.

use std::hint;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{debug, trace};

use hwdec_core::device::{
    MapError, Texture, TextureDesc, TextureDevice, TextureId, TextureSubresource, TextureUsage,
};
use hwdec_core::error::{EngineError, Result};
use hwdec_core::shared_lock::Lockable;
use hwdec_core::types::{FourCc, FrameData, FrameInfo, MemId};

use crate::barrier::ElasticBarrier;

// ─── Lock adapter ────────────────────────────────────────────────────────────

/// Forwards the reader/writer discipline to whichever lock is installed.
///
/// With nothing installed, reads report zero holders and writes are
/// considered acquired.
#[derive(Default)]
pub struct LockAdapter {
    adaptee: Mutex<Option<Arc<dyn Lockable>>>,
}

impl LockAdapter {
    pub fn set_adaptee(&self, adaptee: Option<Arc<dyn Lockable>>) {
        *self.adaptee.lock().unwrap_or_else(PoisonError::into_inner) = adaptee;
    }

    fn current(&self) -> Option<Arc<dyn Lockable>> {
        self.adaptee
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Lockable for LockAdapter {
    fn read_lock(&self) -> usize {
        self.current().map_or(0, |l| l.read_lock())
    }

    fn unlock_read(&self) -> usize {
        self.current().map_or(0, |l| l.unlock_read())
    }

    fn write_lock(&self) {
        if let Some(l) = self.current() {
            l.write_lock();
        }
    }

    fn unlock_write(&self) {
        if let Some(l) = self.current() {
            l.unlock_write();
        }
    }

    fn is_write_acquired(&self) -> bool {
        self.current().is_none_or(|l| l.is_write_acquired())
    }
}

// ─── Allocation item ─────────────────────────────────────────────────────────

pub struct AllocationItem {
    parent: Weak<AllocationRecord>,
    mid: MemId,
    device: Arc<dyn TextureDevice>,
    texture: TextureId,
    subresource: u32,
    staging: Texture,
    info: FrameInfo,
    barrier: ElasticBarrier,
    mapped: AtomicPtr<u8>,
    mapped_pitch: AtomicUsize,
    lock: LockAdapter,
}

impl AllocationItem {
    pub fn mem_id(&self) -> MemId {
        self.mid
    }

    pub fn subresource(&self) -> TextureSubresource {
        TextureSubresource {
            texture: self.texture,
            subresource: self.subresource,
        }
    }

    /// Owning record, or a contract error if it is already gone.
    pub fn parent(&self) -> Result<Arc<AllocationRecord>> {
        self.parent.upgrade().ok_or_else(|| {
            EngineError::InvariantViolation(format!(
                "allocation item {} outlived its record",
                self.mid
            ))
        })
    }

    pub fn set_adaptee(&self, adaptee: Option<Arc<dyn Lockable>>) {
        self.lock.set_adaptee(adaptee);
    }

    pub fn barrier(&self) -> &ElasticBarrier {
        &self.barrier
    }

    /// Join the barrier and publish the mapped plane pointers into `data`.
    pub fn lock(&self, data: &mut FrameData) -> Result<()> {
        self.barrier.visit_in(|| self.on_first_in())?;

        let base = self.mapped.load(Ordering::SeqCst);
        let pitch = self.mapped_pitch.load(Ordering::SeqCst);
        if base.is_null() {
            self.unlock(data);
            return Err(EngineError::InvariantViolation(format!(
                "{} joined the barrier without a mapping",
                self.mid
            )));
        }
        data.pitch = pitch;
        data.planes = [ptr::null_mut(); 4];
        data.planes[0] = base;
        // SAFETY: the staging texture holds `height` luma rows of `pitch`
        // bytes followed by the chroma rows.
        data.planes[1] = unsafe { base.add(self.info.height as usize * pitch) };
        Ok(())
    }

    /// Leave the barrier and forget the plane pointers.
    pub fn unlock(&self, data: &mut FrameData) {
        self.barrier.visit_out(|| self.on_last_out());
        data.clear_planes();
    }

    fn on_first_in(&self) -> Result<()> {
        self.device
            .copy_subresource(self.staging.id(), self.texture, self.subresource)?;
        let mapped = loop {
            match self.device.map(self.staging.id()) {
                Ok(m) => break m,
                Err(MapError::StillDrawing) => hint::spin_loop(),
                Err(MapError::Failed(reason)) => {
                    return Err(EngineError::Lock {
                        mid: self.mid,
                        reason,
                    });
                }
            }
        };
        trace!(mid = %self.mid, pitch = mapped.row_pitch, "Staging mapped");
        self.mapped_pitch.store(mapped.row_pitch, Ordering::SeqCst);
        self.mapped.store(mapped.data, Ordering::SeqCst);
        Ok(())
    }

    fn on_last_out(&self) {
        self.mapped.store(ptr::null_mut(), Ordering::SeqCst);
        self.mapped_pitch.store(0, Ordering::SeqCst);
        self.device.unmap(self.staging.id());
        trace!(mid = %self.mid, "Staging unmapped");
    }
}

impl Lockable for AllocationItem {
    fn read_lock(&self) -> usize {
        self.lock.read_lock()
    }

    fn unlock_read(&self) -> usize {
        self.lock.unlock_read()
    }

    fn write_lock(&self) {
        self.lock.write_lock();
    }

    fn unlock_write(&self) {
        self.lock.unlock_write();
    }

    fn is_write_acquired(&self) -> bool {
        self.lock.is_write_acquired()
    }
}

// ─── Allocation record ───────────────────────────────────────────────────────

pub struct AllocationRecord {
    alloc_id: u32,
    info: FrameInfo,
    texture: Texture,
    items: Vec<Arc<AllocationItem>>,
}

impl AllocationRecord {
    /// Create the texture array, one staging texture per slice, and the items.
    ///
    /// `mids` supplies one memory id per slice.
    pub fn create(
        device: &Arc<dyn TextureDevice>,
        alloc_id: u32,
        info: FrameInfo,
        mids: &[MemId],
    ) -> Result<Arc<Self>> {
        if info.fourcc != FourCc::NV12 {
            return Err(EngineError::UnsupportedFormat(info.fourcc));
        }
        if mids.is_empty() {
            return Err(EngineError::Config(format!(
                "allocation {alloc_id} requests zero surfaces"
            )));
        }
        let array_size = u32::try_from(mids.len())
            .map_err(|_| EngineError::Config("texture array too large".into()))?;

        let texture = Texture::create(
            device,
            &TextureDesc {
                width: info.width,
                height: info.height,
                format: info.fourcc,
                array_size,
                usage: TextureUsage::Default,
            },
        )?;
        let staging_desc = TextureDesc {
            width: info.width,
            height: info.height,
            format: info.fourcc,
            array_size: 1,
            usage: TextureUsage::Staging,
        };
        let staging = mids
            .iter()
            .map(|_| Texture::create(device, &staging_desc))
            .collect::<Result<Vec<_>>>()?;

        let texture_id = texture.id();
        let record = Arc::new_cyclic(|weak: &Weak<AllocationRecord>| {
            let items = staging
                .into_iter()
                .zip(mids)
                .enumerate()
                .map(|(i, (staging, mid))| {
                    Arc::new(AllocationItem {
                        parent: weak.clone(),
                        mid: *mid,
                        device: Arc::clone(device),
                        texture: texture_id,
                        subresource: i as u32,
                        staging,
                        info,
                        barrier: ElasticBarrier::new(),
                        mapped: AtomicPtr::new(ptr::null_mut()),
                        mapped_pitch: AtomicUsize::new(0),
                        lock: LockAdapter::default(),
                    })
                })
                .collect();
            AllocationRecord {
                alloc_id,
                info,
                texture,
                items,
            }
        });
        debug!(
            alloc_id,
            texture = %texture_id,
            slices = array_size,
            width = info.width,
            height = info.height,
            "Allocation record created"
        );
        Ok(record)
    }

    pub fn alloc_id(&self) -> u32 {
        self.alloc_id
    }

    pub fn info(&self) -> &FrameInfo {
        &self.info
    }

    pub fn texture(&self) -> TextureId {
        self.texture.id()
    }

    pub fn items(&self) -> &[Arc<AllocationItem>] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Drop for AllocationRecord {
    fn drop(&mut self) {
        debug!(
            alloc_id = self.alloc_id,
            texture = %self.texture.id(),
            "Allocation record released"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulated::EmulatedTextureDevice;
    use hwdec_core::shared_lock::SharedLock;
    use std::thread;

    fn nv12(width: u32, height: u32) -> FrameInfo {
        FrameInfo {
            width,
            height,
            fourcc: FourCc::NV12,
        }
    }

    fn record_on(dev: &Arc<EmulatedTextureDevice>, slices: u64) -> Arc<AllocationRecord> {
        let device: Arc<dyn TextureDevice> = Arc::clone(dev) as Arc<dyn TextureDevice>;
        let mids: Vec<_> = (0..slices).map(MemId).collect();
        AllocationRecord::create(&device, 7, nv12(64, 32), &mids).expect("record")
    }

    #[test]
    fn items_point_back_at_record() {
        let dev = Arc::new(EmulatedTextureDevice::new());
        let record = record_on(&dev, 3);
        assert_eq!(record.len(), 3);
        for (i, item) in record.items().iter().enumerate() {
            let parent = item.parent().expect("parent alive");
            assert!(Arc::ptr_eq(&parent, &record));
            assert_eq!(item.subresource().subresource, i as u32);
        }
        // array + one staging texture per slice
        assert_eq!(dev.stats().live_textures, 4);
    }

    #[test]
    fn dropping_record_releases_textures() {
        let dev = Arc::new(EmulatedTextureDevice::new());
        let record = record_on(&dev, 2);
        let item = Arc::clone(&record.items()[0]);
        drop(record);
        assert!(item.parent().is_err());
        drop(item);
        assert_eq!(dev.stats().live_textures, 0);
    }

    #[test]
    fn lock_publishes_nv12_planes() {
        let dev = Arc::new(EmulatedTextureDevice::new());
        let record = record_on(&dev, 1);
        let item = &record.items()[0];

        let mut data = FrameData::with_mem_id(item.mem_id());
        item.lock(&mut data).expect("lock");
        assert!(!data.y().is_null());
        assert!(data.pitch >= 64);
        assert_eq!(data.uv() as usize - data.y() as usize, 32 * data.pitch);
        item.unlock(&mut data);
        assert!(data.y().is_null());
        assert_eq!(data.mem_id, Some(item.mem_id()));

        let stats = dev.stats();
        assert_eq!((stats.map_calls, stats.unmap_calls, stats.copy_calls), (1, 1, 1));
    }

    #[test]
    fn map_retries_while_still_drawing() {
        let dev = Arc::new(EmulatedTextureDevice::new());
        let record = record_on(&dev, 1);
        dev.simulate_still_drawing(3);
        let item = &record.items()[0];
        let mut data = FrameData::default();
        item.lock(&mut data).expect("lock after retries");
        item.unlock(&mut data);
        assert_eq!(dev.stats().map_calls, 1);
    }

    #[test]
    fn concurrent_readers_map_once_per_episode() {
        const THREADS: usize = 6;
        const ITERS: usize = 1_000;
        let dev = Arc::new(EmulatedTextureDevice::new());
        let record = record_on(&dev, 1);
        let item = Arc::clone(&record.items()[0]);

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let item = Arc::clone(&item);
                thread::spawn(move || {
                    let mut data = FrameData::default();
                    for _ in 0..ITERS {
                        item.lock(&mut data).expect("lock");
                        // SAFETY: the barrier keeps the staging texture mapped
                        // while this holder is registered.
                        let first = unsafe { *data.y() };
                        assert_eq!(first, 0);
                        item.unlock(&mut data);
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().expect("reader thread");
        }

        let stats = dev.stats();
        assert_eq!(stats.map_calls, stats.unmap_calls);
        assert_eq!(stats.map_calls, stats.copy_calls);
        assert_eq!(stats.map_errors, 0, "staging was never double-mapped");
        assert_eq!(item.barrier().counters(), (0, 0, 0));
    }

    #[test]
    fn lock_adapter_defaults_without_adaptee() {
        let adapter = LockAdapter::default();
        assert_eq!(adapter.read_lock(), 0);
        assert!(adapter.is_write_acquired());

        let shared = Arc::new(SharedLock::new());
        adapter.set_adaptee(Some(Arc::clone(&shared) as Arc<dyn Lockable>));
        assert_eq!(adapter.read_lock(), 0);
        assert_eq!(adapter.read_lock(), 1);
        assert!(!adapter.is_write_acquired());
        adapter.unlock_read();
        adapter.unlock_read();
        adapter.write_lock();
        assert!(shared.owns());
        adapter.unlock_write();
        assert!(!shared.owns());
    }
}
