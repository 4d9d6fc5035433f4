use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{unbounded, Receiver};
use gpucontext::{ContextExecutor, ImageSurface, ReadbackError, SurfaceHandle};
use image::{Rgba, RgbaImage};
use pipeconfig::{CaptureSection, PipelineConfig, RendererSection, SourceKind, SourceSection};
use pipeline::{
    CaptureCallbacks, CaptureNode, EffectNode, ImageSource, PipelineNode, SurfaceRenderer,
};
use tracing_subscriber::EnvFilter;

use crate::cli::{ProbeArgs, RunArgs};

/// How long a renderer-only pipeline waits for its first presented frame.
const PRESENT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

pub fn probe(args: ProbeArgs) -> Result<()> {
    let profile = gpucontext::bringup::probe(args.backend)
        .with_context(|| format!("failed to bring up a {} device", args.backend))?;
    println!("adapter:        {}", profile.name);
    println!("backend:        {:?}", profile.backend);
    println!("device type:    {}", profile.device_type);
    if !profile.driver.is_empty() {
        println!("driver:         {}", profile.driver);
    }
    println!("feature level:  {:?}", profile.feature_level);
    println!("max texture:    {}", profile.max_texture_dimension);
    if profile.extensions.is_empty() {
        println!("extensions:     (none)");
    } else {
        println!("extensions:     {}", profile.extensions.join(", "));
    }
    Ok(())
}

pub fn run(args: RunArgs) -> Result<()> {
    let config = PipelineConfig::load(&args.config)
        .with_context(|| format!("failed to load pipeline config {}", args.config.display()))?;
    let executor_config = config.executor_config(args.backend)?;
    fs::create_dir_all(&args.output)
        .with_context(|| format!("failed to create output directory {}", args.output.display()))?;

    let executor =
        ContextExecutor::create(executor_config).context("failed to bring up graphics context")?;
    tracing::info!(executor = %executor.name(), "graphics context ready");

    let result = drive(&config, &executor, &args.output);
    executor.release();
    result
}

/// Nodes of one run, in chain order.
struct Chain {
    source: ImageSource,
    effects: Vec<EffectNode>,
    capture: Option<(CaptureNode, Receiver<Result<RgbaImage, ReadbackError>>)>,
    renderer: Option<(SurfaceRenderer, std::sync::Arc<ImageSurface>)>,
}

impl Chain {
    fn nodes(&self) -> Vec<&PipelineNode> {
        let mut nodes = vec![self.source.node()];
        nodes.extend(self.effects.iter().map(EffectNode::node));
        if let Some((capture, _)) = &self.capture {
            nodes.push(capture.node());
        }
        if let Some((renderer, _)) = &self.renderer {
            nodes.push(renderer.node());
        }
        nodes
    }

    fn dispose(&self) {
        for node in self.nodes() {
            if let Err(err) = node.dispose() {
                tracing::warn!(node = %node.label(), error = %err, "failed to dispose node");
            }
        }
    }
}

fn drive(config: &PipelineConfig, executor: &ContextExecutor, output: &Path) -> Result<()> {
    let chain = build_chain(config, executor)?;
    let result = execute(config, &chain, output);
    if let Err(err) = chain.source.stop() {
        tracing::warn!(error = %err, "failed to stop source");
    }
    chain.dispose();
    result
}

fn build_chain(config: &PipelineConfig, executor: &ContextExecutor) -> Result<Chain> {
    let image = load_source_image(&config.source)?;
    tracing::info!(
        width = image.width(),
        height = image.height(),
        fps = config.source.fps,
        "source image ready"
    );
    let source = ImageSource::named(executor, "source", image);
    source.set_fps(config.source.fps)?;

    let mut effects = Vec::with_capacity(config.effects.len());
    for (index, section) in config.effects.iter().enumerate() {
        let effect = EffectNode::named(executor, format!("effect-{index}"), section.effect()?);
        if !section.params.is_empty() {
            effect.set_params(section.params.clone())?;
        }
        effect.set_mirror(section.mirror()?)?;
        source
            .append(&effect)
            .with_context(|| format!("failed to append effect {index}"))?;
        effects.push(effect);
    }

    let capture = match &config.capture {
        Some(_) => {
            let (tx, rx) = unbounded();
            let errors = tx.clone();
            let capture = CaptureNode::named(
                executor,
                "capture",
                CaptureCallbacks::new(
                    move |image| {
                        let _ = tx.send(Ok(image));
                    },
                    move |err| {
                        let _ = errors.send(Err(err));
                    },
                ),
            );
            source.append(&capture).context("failed to append capture node")?;
            Some((capture, rx))
        }
        None => None,
    };

    let renderer = match &config.renderer {
        Some(section) => {
            let (renderer, surface) = build_renderer(executor, section)?;
            source.append(&renderer).context("failed to append renderer")?;
            Some((renderer, surface))
        }
        None => None,
    };

    Ok(Chain {
        source,
        effects,
        capture,
        renderer,
    })
}

fn build_renderer(
    executor: &ContextExecutor,
    section: &RendererSection,
) -> Result<(SurfaceRenderer, std::sync::Arc<ImageSurface>)> {
    let surface = ImageSurface::shared("texflow-output", section.width, section.height);
    let handle: SurfaceHandle = surface.clone();
    let renderer = SurfaceRenderer::named(executor, "renderer", Some(handle));
    if let Some(fps) = section.max_fps {
        renderer.set_max_fps(fps)?;
    }
    if let Some(slack) = section.slack {
        renderer.set_slack(slack)?;
    }
    renderer.set_mirror(section.mirror()?)?;
    Ok((renderer, surface))
}

fn load_source_image(section: &SourceSection) -> Result<RgbaImage> {
    match section.kind {
        SourceKind::Checkerboard => Ok(checkerboard(section.size, section.cell)),
        SourceKind::Image => {
            let path = section
                .path
                .as_ref()
                .ok_or_else(|| anyhow!("image source requires a path"))?;
            let image = image::open(path)
                .with_context(|| format!("failed to decode source image {}", path.display()))?;
            Ok(image.to_rgba8())
        }
    }
}

pub fn checkerboard(size: u32, cell: u32) -> RgbaImage {
    let cell = cell.max(1);
    RgbaImage::from_fn(size, size, |x, y| {
        if (x / cell + y / cell) % 2 == 0 {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([0, 0, 0, 255])
        }
    })
}

fn execute(config: &PipelineConfig, chain: &Chain, output: &Path) -> Result<()> {
    chain.source.start()?;

    if let (Some(section), Some((capture, results))) = (&config.capture, &chain.capture) {
        let written = collect_captures(section, capture, results, output)?;
        println!("captured {} frame(s) into {}", written.len(), output.display());
    }

    if let Some((renderer, surface)) = &chain.renderer {
        let deadline = Instant::now() + PRESENT_TIMEOUT;
        while surface.presented() == 0 {
            if Instant::now() >= deadline {
                bail!("renderer presented no frame within {PRESENT_TIMEOUT:?}");
            }
            thread::sleep(Duration::from_millis(10));
        }
        let frame = surface
            .last_frame()
            .ok_or_else(|| anyhow!("renderer surface holds no frame"))?;
        let path = output.join("rendered.png");
        frame
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        let stats = renderer.stats();
        tracing::info!(
            presented = stats.presented,
            dropped = stats.dropped,
            skipped = stats.skipped,
            "renderer finished"
        );
        println!("rendered frame written to {}", path.display());
    }
    Ok(())
}

fn collect_captures(
    section: &CaptureSection,
    capture: &CaptureNode,
    results: &Receiver<Result<RgbaImage, ReadbackError>>,
    output: &Path,
) -> Result<Vec<PathBuf>> {
    let mut remaining = section.count;
    if section.after_frames > 0 {
        capture.trigger_after_frames(section.after_frames)?;
    } else {
        capture.trigger_burst(remaining, section.interval)?;
    }

    let mut written = Vec::with_capacity(section.count as usize);
    while remaining > 0 {
        let image = results
            .recv_timeout(section.timeout)
            .map_err(|_| anyhow!("no capture arrived within {:?}", section.timeout))?
            .context("capture readback failed")?;
        let path = output.join(format!("capture-{:03}.png", written.len()));
        image
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "captured frame");
        written.push(path);
        remaining -= 1;

        // The delayed first capture is single-shot; the rest follow as a burst.
        if section.after_frames > 0 && written.len() == 1 && remaining > 0 {
            thread::sleep(section.interval);
            capture.trigger_burst(remaining, section.interval)?;
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkerboard_alternates_cells() {
        let board = checkerboard(8, 2);
        assert_eq!(board.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
        assert_eq!(board.get_pixel(2, 0), &Rgba([0, 0, 0, 255]));
        assert_eq!(board.get_pixel(2, 2), &Rgba([255, 255, 255, 255]));
        assert_eq!(checkerboard(4, 0).dimensions(), (4, 4));
    }
}
