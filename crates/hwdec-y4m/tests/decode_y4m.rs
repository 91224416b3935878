//! End-to-end decode of generated Y4M streams through `DecodeSource`.

use std::sync::Arc;

use hwdec_accel::adapter::AccessMode;
use hwdec_accel::emulated::EmulatedTextureDevice;
use hwdec_accel::policy::{AccelType, PolicyTunables};
use hwdec_accel::selector::CfgParamDeviceSelector;
use hwdec_accel::texture::TextureAccelerationPolicy;
use hwdec_core::config::{ACCEL_MODE_VIA_D3D11, CfgParam, CfgParams};
use hwdec_core::device::{DeviceHandle, TextureDevice};
use hwdec_core::types::{CodecId, FourCc};
use hwdec_engine::provider::MemoryDataProvider;
use hwdec_engine::{DecodeEngine, DecodeSource, EngineConfig, ExecutionStatus};
use hwdec_y4m::{StreamHeader, Y4mConfig, Y4mDecoder, Y4mDecoderFactory, Y4mWriter};

const W: u32 = 16;
const H: u32 = 8;

/// Frame `f`: luma `f*10 + row`, Cb `100 + f`, Cr `200 + f`.
fn frame(f: u8) -> Vec<u8> {
    let (w, h) = (W as usize, H as usize);
    let mut out = Vec::with_capacity(w * h * 3 / 2);
    for row in 0..h {
        out.extend(std::iter::repeat_n(f * 10 + row as u8, w));
    }
    out.extend(std::iter::repeat_n(100 + f, w * h / 4));
    out.extend(std::iter::repeat_n(200 + f, w * h / 4));
    out
}

fn y4m_stream(frames: u8) -> Vec<u8> {
    y4m_stream_from(0, frames)
}

/// Frames `first..first + frames`.
fn y4m_stream_from(first: u8, frames: u8) -> Vec<u8> {
    let header = StreamHeader {
        width: W,
        height: H,
        frame_rate: Some((25, 1)),
    };
    let mut writer = Y4mWriter::new(Vec::new(), header).expect("writer");
    for f in first..first + frames {
        writer.write_frame(&frame(f)).expect("frame");
    }
    writer.finish().expect("finish")
}

fn y4m_params() -> CfgParams {
    [CfgParam::codec(CodecId::Y4M)].into_iter().collect()
}

/// Check one decoded frame against `frame(f)`.
fn assert_frame(source_frame: &hwdec_engine::MediaFrame, f: u8) {
    let view = source_frame.access(AccessMode::Read).expect("read view");
    assert_eq!(view.desc().format, FourCc::NV12);
    assert_eq!(view.plane_count(), 2);

    let (y, pitch) = (view.plane(0).expect("luma"), view.stride(0));
    for row in 0..H as usize {
        let line = &y[row * pitch..row * pitch + W as usize];
        assert!(line.iter().all(|&b| b == f * 10 + row as u8), "frame {f} row {row}");
    }
    let uv = view.plane(1).expect("chroma");
    let uv_pitch = view.stride(1);
    for row in 0..H as usize / 2 {
        for pair in uv[row * uv_pitch..row * uv_pitch + W as usize].chunks_exact(2) {
            assert_eq!(pair, [100 + f, 200 + f]);
        }
    }
}

#[test]
fn host_decode_yields_every_frame() {
    let params = y4m_params();
    let selector = CfgParamDeviceSelector::new(&params).expect("selector");
    let factory = Y4mDecoderFactory::new(Y4mConfig { sync_latency: 2 });
    let mut source = DecodeSource::new(
        Box::new(MemoryDataProvider::new(y4m_stream(6)).with_chunk_size(100)),
        &params,
        &selector,
        &factory,
        EngineConfig::default(),
    )
    .expect("source");
    assert_eq!(source.accel_type(), AccelType::Host);
    let desc = source.descr_of();
    assert_eq!((desc.width, desc.height), (W, H));

    let mut count = 0u8;
    while let Some((frame, meta)) = source.pull() {
        assert_eq!(meta.seq_id, u64::from(count));
        assert_frame(&frame, count);
        count += 1;
    }
    assert_eq!(count, 6);
    assert_eq!(source.finish_status(), Some(ExecutionStatus::Processed));

    let m = source.metrics().snapshot();
    assert_eq!(m.frames_submitted, 6);
    assert_eq!(m.frames_ready, 6);
    assert_eq!(m.sessions_processed, 1);
}

#[test]
fn texture_decode_uploads_through_allocator() {
    let dev = Arc::new(EmulatedTextureDevice::new());
    let handle = DeviceHandle::Texture(Arc::clone(&dev) as Arc<dyn TextureDevice>);
    let mut params = y4m_params();
    params.push(CfgParam::accel_mode(ACCEL_MODE_VIA_D3D11));
    let selector =
        CfgParamDeviceSelector::with_device(handle.clone(), 0, handle, &params).expect("selector");
    let config = EngineConfig {
        tunables: PolicyTunables {
            texture_surface_multiplier: 2,
            ..PolicyTunables::default()
        },
        ..EngineConfig::default()
    };

    let mut source = DecodeSource::new(
        Box::new(MemoryDataProvider::new(y4m_stream(4))),
        &params,
        &selector,
        &Y4mDecoderFactory::default(),
        config,
    )
    .expect("source");
    assert_eq!(source.accel_type(), AccelType::Texture);

    // Keep every frame so the view checks run after decoding finished.
    let frames: Vec<_> = source.by_ref().collect();
    assert_eq!(frames.len(), 4);
    assert_eq!(source.finish_status(), Some(ExecutionStatus::Processed));
    for (f, (frame, _)) in frames.iter().enumerate() {
        assert!(frame.is_texture_backed());
        assert_frame(frame, f as u8);
    }

    let stats = dev.stats();
    assert_eq!(stats.update_calls, 4);
    assert_eq!(stats.map_calls, stats.unmap_calls);
    assert_eq!(stats.map_errors, 0);

    drop(frames);
    drop(source);
    assert_eq!(dev.stats().live_textures, 0);
}

#[test]
fn concurrent_texture_sessions_decode_into_their_own_slices() {
    let dev = Arc::new(EmulatedTextureDevice::new());
    let policy = TextureAccelerationPolicy::new(
        Arc::clone(&dev) as Arc<dyn TextureDevice>,
        PolicyTunables {
            texture_surface_multiplier: 2,
            ..PolicyTunables::default()
        },
    );
    let mut engine = DecodeEngine::new(Box::new(policy), EngineConfig::default());
    let mut live: Vec<_> = [0u8, 10]
        .into_iter()
        .map(|first| {
            engine
                .initialize_session(
                    Box::new(Y4mDecoder::new(Y4mConfig { sync_latency: 1 })),
                    CodecId::Y4M,
                    Box::new(MemoryDataProvider::new(y4m_stream_from(first, 4)).with_chunk_size(90)),
                )
                .expect("session")
        })
        .collect();

    let mut frames = Vec::new();
    for _ in 0..2_000 {
        live.retain(|&id| engine.process(id) == ExecutionStatus::Continue);
        while let Some((frame, _)) = engine.get_frame() {
            frames.push(frame);
        }
        if live.is_empty() {
            break;
        }
    }
    assert!(live.is_empty(), "sessions did not finish");
    assert_eq!(engine.metrics().snapshot().sessions_failed, 0);

    // Luma row 0 is `f * 10`, which tells the two streams apart.
    let mut seen: Vec<u8> = frames
        .iter()
        .map(|frame| {
            let view = frame.access(AccessMode::Read).expect("read view");
            let f = view.plane(0).expect("luma")[0] / 10;
            drop(view);
            assert_frame(frame, f);
            f
        })
        .collect();
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2, 3, 10, 11, 12, 13]);

    let slices: std::collections::HashSet<_> = frames
        .iter()
        .map(|frame| frame.surface().data().mem_id.expect("mem id"))
        .collect();
    assert_eq!(slices.len(), frames.len());

    drop(frames);
    drop(engine);
    assert_eq!(dev.stats().live_textures, 0);
}

#[test]
fn truncated_stream_ends_after_last_whole_frame() {
    let mut bytes = y4m_stream(3);
    bytes.truncate(bytes.len() - 10);
    let params = y4m_params();
    let selector = CfgParamDeviceSelector::new(&params).expect("selector");
    let source = DecodeSource::new(
        Box::new(MemoryDataProvider::new(bytes)),
        &params,
        &selector,
        &Y4mDecoderFactory::default(),
        EngineConfig::default(),
    )
    .expect("source");
    let seqs: Vec<u64> = source.map(|(_, meta)| meta.seq_id).collect();
    assert_eq!(seqs, vec![0, 1]);
}

#[test]
fn unsupported_chroma_fails_construction() {
    let params = y4m_params();
    let selector = CfgParamDeviceSelector::new(&params).expect("selector");
    let bytes = b"YUV4MPEG2 W16 H8 C444\nFRAME\n".to_vec();
    let result = DecodeSource::new(
        Box::new(MemoryDataProvider::new(bytes)),
        &params,
        &selector,
        &Y4mDecoderFactory::default(),
        EngineConfig::default(),
    );
    assert!(result.is_err());
}

#[test]
fn small_buffer_still_decodes_in_pieces() {
    let params = y4m_params();
    let selector = CfgParamDeviceSelector::new(&params).expect("selector");
    let frame_bytes = (W * H * 3 / 2) as usize + 6;
    let config = EngineConfig {
        bitstream_buffer_size: frame_bytes + 64,
        ..EngineConfig::default()
    };
    let source = DecodeSource::new(
        Box::new(MemoryDataProvider::new(y4m_stream(5)).with_chunk_size(37)),
        &params,
        &selector,
        &Y4mDecoderFactory::default(),
        config,
    )
    .expect("source");
    assert_eq!(source.count(), 5);
}
