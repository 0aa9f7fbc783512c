use std::io::Write;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::progress::{
    Progress, LOADING, PIPELINE_READY, SAMPLED, SAMPLING, SAVED, WEIGHTS_RESOLVED,
};
use crate::{GenerationRequest, Loader, ModelLike};

/// Owns the pipeline handle and the progress stream for one process.
///
/// The model is loaded lazily by [`GenerationRunner::ensure_loaded`] and kept
/// for the lifetime of the runner, so repeated generations reuse it.
pub struct GenerationRunner<L: Loader, W> {
    loader: L,
    model: Option<L::Model>,
    progress: Progress<W>,
}

impl<L: Loader, W: Write> GenerationRunner<L, W> {
    pub fn new(loader: L, out: W) -> Self {
        Self {
            loader,
            model: None,
            progress: Progress::new(out),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub async fn ensure_loaded(&mut self) -> Result<()> {
        if self.model.is_some() {
            debug!("Pipeline already loaded");
            return Ok(());
        }

        let start = Instant::now();
        self.progress.report(LOADING)?;
        let weights = self.loader.fetch().await?;
        self.progress.report(WEIGHTS_RESOLVED)?;
        let model = self.loader.build(weights)?;
        self.progress.report(PIPELINE_READY)?;
        info!("Pipeline loaded in {:.2}s", start.elapsed().as_secs_f64());

        self.model = Some(model);
        Ok(())
    }

    pub async fn generate(&mut self, request: &GenerationRequest, output: &Path) -> Result<()> {
        self.ensure_loaded().await?;
        let model = self
            .model
            .as_ref()
            .context("pipeline missing after load")?;
        let progress = &mut self.progress;

        info!(
            "Generating {}x{} image with {} steps, guidance scale {}",
            request.width, request.height, request.steps, request.guidance_scale
        );
        let start = Instant::now();
        progress.report(SAMPLING)?;
        let image = model.run(request, &mut |step| {
            progress.step(step).map_err(anyhow::Error::from)
        })?;
        progress.report(SAMPLED)?;
        info!("Sampling finished in {:.2}s", start.elapsed().as_secs_f64());

        image
            .save(output)
            .with_context(|| format!("failed to save image to {}", output.display()))?;
        info!("Saved image to {}", output.display());
        progress.report(SAVED)?;
        progress.generated()?;
        Ok(())
    }

    pub fn into_output(self) -> W {
        self.progress.into_inner()
    }
}
