//! hwdec CLI entrypoint.
//!
//! ```bash
//! hwdec decode --input clip.y4m
//! hwdec decode --input clip.y4m --accel texture --max-frames 30 --json
//! hwdec decode --input clip.y4m --config engine.json --param Custom.Filter:1
//! hwdec formats --json
//! ```

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;

use hwdec_accel::adapter::{AccessMode, FrameView};
use hwdec_accel::emulated::EmulatedTextureDevice;
use hwdec_accel::selector::CfgParamDeviceSelector;
use hwdec_core::config::{ACCEL_MODE_VIA_D3D11, CfgParam, CfgParams};
use hwdec_core::device::{DeviceHandle, TextureDevice};
use hwdec_core::error::EngineError;
use hwdec_core::types::{CodecId, FourCc};
use hwdec_engine::metrics::MetricsSnapshot;
use hwdec_engine::provider::FileDataProvider;
use hwdec_engine::{DecodeSource, EngineConfig, ExecutionStatus, MediaFrame};
use hwdec_y4m::{SUPPORTED_CODECS, Y4mConfig, Y4mDecoderFactory};

const JSON_SCHEMA_VERSION: u32 = 1;

#[derive(Parser, Debug)]
#[command(
    name = "hwdec",
    version,
    about = "Hardware-style video decode pipeline",
    arg_required_else_help = true,
    after_help = "Examples:\n  hwdec decode --input clip.y4m\n  hwdec decode --input clip.y4m --accel texture --json\n  hwdec formats"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode a file and report frame count, checksum and engine metrics.
    Decode(DecodeArgs),
    /// List codecs, output formats and acceleration modes.
    Formats(FormatsArgs),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum AccelArg {
    /// System-memory surfaces.
    Host,
    /// Texture-array surfaces on the emulated device.
    Texture,
}

#[derive(Args, Debug)]
struct DecodeArgs {
    /// Input stream.
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Surface memory used by the decoder.
    #[arg(long = "accel", value_enum, default_value_t = AccelArg::Host)]
    accel: AccelArg,

    /// Codec name (without the MFX_CODEC_ prefix).
    #[arg(long = "codec", default_value = "y4m")]
    codec: String,

    /// Stop after this many frames.
    #[arg(long = "max-frames")]
    max_frames: Option<u64>,

    /// Sync polls the software decoder reports as still executing.
    #[arg(long = "sync-latency", default_value_t = 0)]
    sync_latency: u32,

    /// JSON engine configuration file.
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Extra implementation filter, `name:value`.  Repeatable.
    #[arg(long = "param")]
    params: Vec<String>,

    /// Emit structured JSON output to stdout.
    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct FormatsArgs {
    /// Emit structured JSON output to stdout.
    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let json_error_command = match &cli.command {
        Commands::Decode(args) if args.json => Some("decode"),
        Commands::Formats(args) if args.json => Some("formats"),
        _ => None,
    };

    let result = match cli.command {
        Commands::Decode(args) => run_decode(args),
        Commands::Formats(args) => run_formats(args),
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            let code = err
                .downcast_ref::<EngineError>()
                .map_or(1, EngineError::error_code);
            if let Some(command) = json_error_command {
                println!("{}", command_error_json(command, &format!("{err:#}")));
            } else {
                tracing::error!(error = %format!("{err:#}"), code, "Command failed");
            }
            std::process::exit(code as i32);
        }
    }
}

fn init_tracing() {
    let ansi_enabled = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(ansi_enabled)
        .init();
}

// ─── decode ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct DecodeSummary {
    schema_version: u32,
    command: &'static str,
    ok: bool,
    input: String,
    codec: String,
    accel: String,
    width: u32,
    height: u32,
    format: String,
    frames: u64,
    /// `processed`, `failed`, or `stopped` when `--max-frames` cut decoding short.
    finish: &'static str,
    checksum: String,
    elapsed_ms: u128,
    fps: f64,
    metrics: MetricsSnapshot,
}

fn build_params(args: &DecodeArgs) -> anyhow::Result<CfgParams> {
    let name = format!("MFX_CODEC_{}", args.codec.to_ascii_uppercase());
    let codec = CodecId::from_name(&name)
        .with_context(|| format!("unknown codec '{}'", args.codec))?;

    let mut params = CfgParams::new();
    params.push(CfgParam::codec(codec));
    if args.accel == AccelArg::Texture {
        params.push(CfgParam::accel_mode(ACCEL_MODE_VIA_D3D11));
    }
    for param in CfgParams::parse_all(args.params.iter().map(String::as_str))?.iter() {
        params.push(param.clone());
    }
    Ok(params)
}

fn build_selector(
    accel: AccelArg,
    params: &CfgParams,
) -> anyhow::Result<CfgParamDeviceSelector> {
    let selector = match accel {
        AccelArg::Host => CfgParamDeviceSelector::new(params)?,
        AccelArg::Texture => {
            let device: Arc<dyn TextureDevice> = Arc::new(EmulatedTextureDevice::new());
            let handle = DeviceHandle::Texture(device);
            CfgParamDeviceSelector::with_device(handle.clone(), 0, handle, params)?
        }
    };
    Ok(selector)
}

fn run_decode(args: DecodeArgs) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let params = build_params(&args)?;
    let selector = build_selector(args.accel, &params)?;
    let factory = Y4mDecoderFactory::new(Y4mConfig {
        sync_latency: args.sync_latency,
    });
    let provider = FileDataProvider::new(&args.input)?;

    let started = Instant::now();
    let mut source = DecodeSource::new(Box::new(provider), &params, &selector, &factory, config)
        .with_context(|| format!("cannot decode {}", args.input.display()))?;
    let desc = source.descr_of();

    let mut frames = 0u64;
    let mut checksum = Fnv64::new();
    while args.max_frames.is_none_or(|max| frames < max) {
        let Some((frame, meta)) = source.pull() else {
            break;
        };
        fold_frame(&mut checksum, &frame)?;
        tracing::debug!(seq = meta.seq_id, timestamp_us = meta.timestamp_us, "Frame decoded");
        frames += 1;
    }
    let elapsed = started.elapsed();

    let finish = match source.finish_status() {
        Some(ExecutionStatus::Failed) => "failed",
        Some(_) => "processed",
        None => "stopped",
    };
    if finish == "failed" {
        bail!("decode failed after {frames} frames");
    }

    let summary = DecodeSummary {
        schema_version: JSON_SCHEMA_VERSION,
        command: "decode",
        ok: true,
        input: args.input.display().to_string(),
        codec: args.codec.to_ascii_lowercase(),
        accel: source.accel_type().to_string(),
        width: desc.width,
        height: desc.height,
        format: desc.format.to_string(),
        frames,
        finish,
        checksum: format!("{:016x}", checksum.finish()),
        elapsed_ms: elapsed.as_millis(),
        fps: if elapsed.as_secs_f64() > 0.0 {
            frames as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        },
        metrics: source.metrics().snapshot(),
    };

    if args.json {
        println!("{}", serde_json::to_string(&summary)?);
    } else {
        println!("decode: {finish}");
        println!("input={}", summary.input);
        println!("accel={}", summary.accel);
        println!(
            "frame={}x{} {}",
            summary.width, summary.height, summary.format
        );
        println!("frames={}", summary.frames);
        println!("checksum={}", summary.checksum);
        println!("elapsed_ms={} fps={:.1}", summary.elapsed_ms, summary.fps);
        println!(
            "submitted={} surface_swaps={} no_free_surface={} submit_retries={}",
            summary.metrics.frames_submitted,
            summary.metrics.surface_swaps,
            summary.metrics.no_free_surface,
            summary.metrics.submit_retries
        );
    }
    Ok(())
}

/// FNV-1a over the visible bytes of every plane.
struct Fnv64(u64);

impl Fnv64 {
    fn new() -> Self {
        Self(0xcbf2_9ce4_8422_2325)
    }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= u64::from(b);
            self.0 = self.0.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

fn fold_frame(hash: &mut Fnv64, frame: &MediaFrame) -> anyhow::Result<()> {
    let view = frame.access(AccessMode::Read)?;
    let row_bytes = visible_row_bytes(&view);
    for plane in 0..view.plane_count() {
        let Some(bytes) = view.plane(plane) else {
            continue;
        };
        let stride = view.stride(plane);
        for row in 0..view.rows(plane) {
            let start = row * stride;
            hash.write(&bytes[start..start + row_bytes.min(stride)]);
        }
    }
    Ok(())
}

fn visible_row_bytes(view: &FrameView) -> usize {
    let desc = view.desc();
    match desc.format {
        FourCc::P010 => 2 * desc.width as usize,
        FourCc::RGB4 => 4 * desc.width as usize,
        _ => desc.width as usize,
    }
}

// ─── formats ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct FormatsSummary {
    schema_version: u32,
    command: &'static str,
    ok: bool,
    codecs: Vec<&'static str>,
    output_formats: Vec<String>,
    accel: Vec<&'static str>,
}

fn run_formats(args: FormatsArgs) -> anyhow::Result<()> {
    let summary = FormatsSummary {
        schema_version: JSON_SCHEMA_VERSION,
        command: "formats",
        ok: true,
        codecs: SUPPORTED_CODECS.iter().filter_map(|c| c.name()).collect(),
        output_formats: vec![FourCc::NV12.to_string()],
        accel: vec!["host", "texture"],
    };
    if args.json {
        println!("{}", serde_json::to_string(&summary)?);
    } else {
        println!("codecs: {}", summary.codecs.join(", "));
        println!("output: {}", summary.output_formats.join(", "));
        println!("accel: {}", summary.accel.join(", "));
    }
    Ok(())
}

fn command_error_json(command: &str, error: &str) -> String {
    serde_json::json!({
        "schema_version": JSON_SCHEMA_VERSION,
        "command": command,
        "ok": false,
        "error": error,
    })
    .to_string()
}
