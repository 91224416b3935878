//! In-process texture device backed by heap memory.
//!
//! Behaves like a GPU immediate context closely enough for the texture
//! policy: texture arrays and staging textures are separate objects,
//! copies go slice → staging, only staging textures can be mapped, and a
//! staging texture cannot be mapped twice.  Every call is counted so tests
//! can check how often the elastic barrier actually maps and unmaps.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use hwdec_core::device::{
    MapError, MappedSubresource, TextureDesc, TextureDevice, TextureId, TextureUsage,
};
use hwdec_core::error::{EngineError, Result};
use hwdec_core::types::FourCc;

const ROW_ALIGNMENT: usize = 64;

struct EmulatedTexture {
    desc: TextureDesc,
    row_pitch: usize,
    rows: usize,
    slices: Vec<Vec<u8>>,
    mapped: bool,
}

impl EmulatedTexture {
    fn slice_len(&self) -> usize {
        self.row_pitch * self.rows
    }
}

/// Call counters and live-object count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub map_calls: usize,
    pub unmap_calls: usize,
    pub copy_calls: usize,
    pub update_calls: usize,
    /// Rejected map attempts (not staging, or already mapped).
    pub map_errors: usize,
    pub live_textures: usize,
}

pub struct EmulatedTextureDevice {
    textures: Mutex<HashMap<TextureId, EmulatedTexture>>,
    next_id: AtomicU64,
    still_drawing: AtomicUsize,
    map_calls: AtomicUsize,
    unmap_calls: AtomicUsize,
    copy_calls: AtomicUsize,
    update_calls: AtomicUsize,
    map_errors: AtomicUsize,
}

impl Default for EmulatedTextureDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatedTextureDevice {
    pub fn new() -> Self {
        Self {
            textures: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            still_drawing: AtomicUsize::new(0),
            map_calls: AtomicUsize::new(0),
            unmap_calls: AtomicUsize::new(0),
            copy_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
            map_errors: AtomicUsize::new(0),
        }
    }

    /// Make the next `n` map attempts report `StillDrawing`.
    pub fn simulate_still_drawing(&self, n: usize) {
        self.still_drawing.store(n, Ordering::SeqCst);
    }

    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            map_calls: self.map_calls.load(Ordering::SeqCst),
            unmap_calls: self.unmap_calls.load(Ordering::SeqCst),
            copy_calls: self.copy_calls.load(Ordering::SeqCst),
            update_calls: self.update_calls.load(Ordering::SeqCst),
            map_errors: self.map_errors.load(Ordering::SeqCst),
            live_textures: self.table().len(),
        }
    }

    /// Copy of one slice's bytes, rows padded to the row pitch.
    pub fn read_subresource(&self, texture: TextureId, subresource: u32) -> Result<Vec<u8>> {
        let table = self.table();
        let tex = lookup(&table, texture)?;
        tex.slices
            .get(subresource as usize)
            .cloned()
            .ok_or_else(|| bad_subresource(texture, subresource))
    }

    fn table(&self) -> MutexGuard<'_, HashMap<TextureId, EmulatedTexture>> {
        self.textures.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn bytes_per_pixel(format: FourCc) -> Result<usize> {
    match format {
        FourCc::NV12 => Ok(1),
        FourCc::P010 => Ok(2),
        FourCc::RGB4 => Ok(4),
        other => Err(EngineError::UnsupportedFormat(other)),
    }
}

fn total_rows(format: FourCc, height: u32) -> usize {
    let h = height as usize;
    match format {
        FourCc::NV12 | FourCc::P010 => h + h.div_ceil(2),
        _ => h,
    }
}

fn lookup(
    table: &HashMap<TextureId, EmulatedTexture>,
    id: TextureId,
) -> Result<&EmulatedTexture> {
    table
        .get(&id)
        .ok_or_else(|| EngineError::Device(format!("unknown texture {id}")))
}

fn bad_subresource(texture: TextureId, subresource: u32) -> EngineError {
    EngineError::Device(format!("{texture} has no subresource {subresource}"))
}

impl TextureDevice for EmulatedTextureDevice {
    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureId> {
        if desc.width == 0 || desc.height == 0 || desc.array_size == 0 {
            return Err(EngineError::Device(format!(
                "degenerate texture {}x{}x{}",
                desc.width, desc.height, desc.array_size
            )));
        }
        let bpp = bytes_per_pixel(desc.format)?;
        let row_pitch = (desc.width as usize * bpp).next_multiple_of(ROW_ALIGNMENT);
        let rows = total_rows(desc.format, desc.height);
        let id = TextureId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let tex = EmulatedTexture {
            desc: *desc,
            row_pitch,
            rows,
            slices: vec![vec![0u8; row_pitch * rows]; desc.array_size as usize],
            mapped: false,
        };
        debug!(
            texture = %id,
            width = desc.width,
            height = desc.height,
            slices = desc.array_size,
            usage = ?desc.usage,
            row_pitch,
            "Emulated texture created"
        );
        self.table().insert(id, tex);
        Ok(id)
    }

    fn copy_subresource(&self, dst: TextureId, src: TextureId, src_subresource: u32) -> Result<()> {
        self.copy_calls.fetch_add(1, Ordering::SeqCst);
        let mut table = self.table();
        let bytes = {
            let src_tex = lookup(&table, src)?;
            src_tex
                .slices
                .get(src_subresource as usize)
                .cloned()
                .ok_or_else(|| bad_subresource(src, src_subresource))?
        };
        let dst_tex = table
            .get_mut(&dst)
            .ok_or_else(|| EngineError::Device(format!("unknown texture {dst}")))?;
        if dst_tex.mapped {
            return Err(EngineError::Device(format!("copy into mapped {dst}")));
        }
        if dst_tex.slice_len() != bytes.len() {
            return Err(EngineError::Device(format!(
                "copy {src}[{src_subresource}] → {dst}: size mismatch"
            )));
        }
        dst_tex.slices[0].copy_from_slice(&bytes);
        Ok(())
    }

    fn map(&self, staging: TextureId) -> std::result::Result<MappedSubresource, MapError> {
        if self
            .still_drawing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(MapError::StillDrawing);
        }
        let mut table = self.table();
        let Some(tex) = table.get_mut(&staging) else {
            self.map_errors.fetch_add(1, Ordering::SeqCst);
            return Err(MapError::Failed(format!("unknown texture {staging}")));
        };
        if tex.desc.usage != TextureUsage::Staging || tex.mapped {
            self.map_errors.fetch_add(1, Ordering::SeqCst);
            warn!(texture = %staging, mapped = tex.mapped, "Rejected map");
            return Err(MapError::Failed(format!("{staging} is not mappable")));
        }
        tex.mapped = true;
        self.map_calls.fetch_add(1, Ordering::SeqCst);
        Ok(MappedSubresource {
            data: tex.slices[0].as_mut_ptr(),
            row_pitch: tex.row_pitch,
        })
    }

    fn unmap(&self, staging: TextureId) {
        let mut table = self.table();
        match table.get_mut(&staging) {
            Some(tex) if tex.mapped => {
                tex.mapped = false;
                self.unmap_calls.fetch_add(1, Ordering::SeqCst);
            }
            _ => warn!(texture = %staging, "Unmap of a texture that is not mapped"),
        }
    }

    fn update_subresource(
        &self,
        dst: TextureId,
        subresource: u32,
        src: &[u8],
        src_pitch: usize,
    ) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut table = self.table();
        let tex = table
            .get_mut(&dst)
            .ok_or_else(|| EngineError::Device(format!("unknown texture {dst}")))?;
        let row_bytes = tex.desc.width as usize * bytes_per_pixel(tex.desc.format)?;
        let (rows, row_pitch) = (tex.rows, tex.row_pitch);
        if src_pitch < row_bytes || src.len() < (rows - 1) * src_pitch + row_bytes {
            return Err(EngineError::Device(format!(
                "upload into {dst}: {} bytes at pitch {src_pitch} is too small",
                src.len()
            )));
        }
        let slice = tex
            .slices
            .get_mut(subresource as usize)
            .ok_or_else(|| bad_subresource(dst, subresource))?;
        for row in 0..rows {
            let from = row * src_pitch;
            let to = row * row_pitch;
            slice[to..to + row_bytes].copy_from_slice(&src[from..from + row_bytes]);
        }
        Ok(())
    }

    fn release(&self, texture: TextureId) {
        match self.table().remove(&texture) {
            Some(tex) if tex.mapped => {
                warn!(texture = %texture, "Released while mapped");
            }
            Some(_) => {}
            None => warn!(texture = %texture, "Release of unknown texture"),
        }
    }

    fn name(&self) -> &str {
        "emulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(usage: TextureUsage, array_size: u32) -> TextureDesc {
        TextureDesc {
            width: 16,
            height: 4,
            format: FourCc::NV12,
            array_size,
            usage,
        }
    }

    #[test]
    fn nv12_rows_are_padded() {
        let dev = EmulatedTextureDevice::new();
        let id = dev.create_texture(&desc(TextureUsage::Default, 2)).expect("tex");
        let slice = dev.read_subresource(id, 1).expect("slice");
        assert_eq!(slice.len(), 64 * (4 + 2));
        assert!(dev.read_subresource(id, 2).is_err());
    }

    #[test]
    fn upload_copy_map_roundtrip() {
        let dev = EmulatedTextureDevice::new();
        let array = dev.create_texture(&desc(TextureUsage::Default, 2)).expect("array");
        let staging = dev.create_texture(&desc(TextureUsage::Staging, 1)).expect("staging");

        let pixels: Vec<u8> = (0..16 * 6).map(|i| i as u8).collect();
        dev.update_subresource(array, 1, &pixels, 16).expect("upload");
        dev.copy_subresource(staging, array, 1).expect("copy");

        let mapped = dev.map(staging).expect("map");
        assert_eq!(mapped.row_pitch, 64);
        // SAFETY: mapped until unmap below; row 1 starts at row_pitch.
        let row1 = unsafe { std::slice::from_raw_parts(mapped.data.add(64), 16) };
        assert_eq!(row1, &pixels[16..32]);
        dev.unmap(staging);

        let stats = dev.stats();
        assert_eq!(stats.map_calls, 1);
        assert_eq!(stats.unmap_calls, 1);
        assert_eq!(stats.copy_calls, 1);
        assert_eq!(stats.update_calls, 1);
    }

    #[test]
    fn only_unmapped_staging_can_be_mapped() {
        let dev = EmulatedTextureDevice::new();
        let array = dev.create_texture(&desc(TextureUsage::Default, 1)).expect("array");
        let staging = dev.create_texture(&desc(TextureUsage::Staging, 1)).expect("staging");

        assert!(matches!(dev.map(array), Err(MapError::Failed(_))));
        dev.map(staging).expect("first map");
        assert!(matches!(dev.map(staging), Err(MapError::Failed(_))));
        assert!(dev.copy_subresource(staging, array, 0).is_err());
        dev.unmap(staging);
        assert_eq!(dev.stats().map_errors, 2);
    }

    #[test]
    fn still_drawing_then_success() {
        let dev = EmulatedTextureDevice::new();
        let staging = dev.create_texture(&desc(TextureUsage::Staging, 1)).expect("staging");
        dev.simulate_still_drawing(2);
        assert_eq!(dev.map(staging).expect_err("busy"), MapError::StillDrawing);
        assert_eq!(dev.map(staging).expect_err("busy"), MapError::StillDrawing);
        dev.map(staging).expect("ready");
        dev.unmap(staging);
    }

    #[test]
    fn release_forgets_texture() {
        let dev = EmulatedTextureDevice::new();
        let id = dev.create_texture(&desc(TextureUsage::Staging, 1)).expect("tex");
        assert_eq!(dev.stats().live_textures, 1);
        dev.release(id);
        assert_eq!(dev.stats().live_textures, 0);
        assert!(dev.read_subresource(id, 0).is_err());
    }

    #[test]
    fn unsupported_format_rejected() {
        let dev = EmulatedTextureDevice::new();
        let err = dev
            .create_texture(&TextureDesc {
                format: FourCc::I420,
                ..desc(TextureUsage::Default, 1)
            })
            .expect_err("planar I420 textures are not supported");
        assert!(matches!(err, EngineError::UnsupportedFormat(FourCc::I420)));
    }
}
