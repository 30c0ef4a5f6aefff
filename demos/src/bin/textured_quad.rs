//! # Textured Quad Demo
//!
//! Demonstrates:
//! - Renderer construction from a TOML config or command line options
//! - Texture, constant buffer and bind group creation with initial data
//! - A Clear + Forward render graph with a pipeline cache
//! - Per-frame constant staging through the graph's pre-record hook
//! - Capturing the last back buffer to PNG
//!
//! ```bash
//! cargo run --bin textured_quad -- --frames 8 --output quad.png
//! cargo run --bin textured_quad --features wgpu-backend -- --backend wgpu
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ember_demos::{DemoError, TexturedQuad, capture, save_png};
use ember_rhi::{BackendKind, Renderer, RendererConfig};

/// Backend selection for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliBackend {
    /// CPU rasterizer, always available.
    #[default]
    Software,
    /// wgpu on the first available adapter (feature `wgpu-backend`).
    Wgpu,
}

impl From<CliBackend> for BackendKind {
    fn from(cli: CliBackend) -> Self {
        match cli {
            CliBackend::Software => BackendKind::Software,
            CliBackend::Wgpu => BackendKind::Wgpu,
        }
    }
}

/// Render a textured quad headlessly and write the last frame to PNG.
#[derive(Debug, Parser)]
#[command(name = "textured_quad", version, about)]
struct Args {
    /// Graphics backend. Overrides the config file.
    #[arg(long, value_enum)]
    backend: Option<CliBackend>,

    /// Renderer configuration file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Back buffer width.
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Back buffer height.
    #[arg(long, default_value_t = 360)]
    height: u32,

    /// Number of frames to render before capturing.
    #[arg(long, default_value_t = 4)]
    frames: u32,

    /// Output PNG path.
    #[arg(long, short, default_value = "textured_quad.png")]
    output: String,
}

fn run(args: &Args) -> Result<(), DemoError> {
    let mut config = match &args.config {
        Some(path) => RendererConfig::load(path)?,
        None => RendererConfig::default(),
    };
    if let Some(backend) = args.backend {
        config = config.with_backend(backend.into());
    }

    let mut renderer = Renderer::new(config)?;
    log::info!("Using the {} backend", renderer.backend_name());

    let mut scene = TexturedQuad::new(&mut renderer, args.width, args.height)?;
    let mut target = None;
    for _ in 0..args.frames.max(1) {
        target = Some(scene.render_frame(&mut renderer)?);
    }

    if let Some(target) = target {
        let image = capture(&renderer, target)?;
        save_png(&image, &args.output)?;
        log::info!("Wrote {} frames, captured {}", scene.frames(), args.output);
    }

    scene.release(&mut renderer)?;
    renderer.shutdown()?;
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("textured_quad failed: {e}");
            ExitCode::FAILURE
        }
    }
}
