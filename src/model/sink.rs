use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use burn::module::Module;
use burn::prelude::*;
use burn::record::CompactRecorder;
use log::warn;

use crate::model::architecture::Generate;
use crate::utils::{chw_vec_to_image, tile_images};

/// Periodic artifact emission, observing the global step counter.
///
/// The step counter is incremented after each completed step-pair and an
/// event with interval `n` fires whenever `step % n == 0`: first at step
/// `n`, never at step 0. A write failure is logged and swallowed; the
/// training state in memory is still valid, so the loop continues.
pub struct ArtifactSink<B: Backend> {
    preview_dir: PathBuf,
    checkpoint_dir: PathBuf,
    preview_interval: usize,
    checkpoint_interval: usize,
    /// Held-out photo batch captured once at startup; every preview renders
    /// the generator's current take on the same inputs.
    tracked: Tensor<B, 4>,
}

impl<B: Backend> ArtifactSink<B> {
    pub fn new(
        artifact_dir: &Path,
        preview_interval: usize,
        checkpoint_interval: usize,
        tracked: Tensor<B, 4>,
    ) -> Result<Self, std::io::Error> {
        let preview_dir = artifact_dir.join("previews");
        let checkpoint_dir = artifact_dir.join("checkpoints");
        std::fs::create_dir_all(&preview_dir)?;
        std::fs::create_dir_all(&checkpoint_dir)?;
        Ok(Self {
            preview_dir,
            checkpoint_dir,
            preview_interval,
            checkpoint_interval,
            tracked,
        })
    }

    fn due(step: usize, interval: usize) -> bool {
        interval != 0 && step > 0 && step % interval == 0
    }

    pub fn preview_due(&self, step: usize) -> bool {
        Self::due(step, self.preview_interval)
    }

    pub fn checkpoint_due(&self, step: usize) -> bool {
        Self::due(step, self.checkpoint_interval)
    }

    pub fn preview_dir(&self) -> &Path {
        &self.preview_dir
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    /// Render the tracked batch through an inference-mode generator and save
    /// one tiled PNG. Returns whether an artifact was written.
    pub fn preview<G: Generate<B>>(&self, generator: &G, epoch: usize, batch_idx: usize) -> bool {
        match self.write_preview(generator, epoch, batch_idx) {
            Ok(()) => true,
            Err(e) => {
                warn!("preview write failed: {e:#}");
                false
            }
        }
    }

    fn write_preview<G: Generate<B>>(
        &self,
        generator: &G,
        epoch: usize,
        batch_idx: usize,
    ) -> anyhow::Result<()> {
        let generated = generator.forward(self.tracked.clone());
        let [n, c, h, w] = generated.dims();
        let data: Vec<f32> = generated
            .into_data()
            .to_vec()
            .map_err(|e| anyhow!("tensor readback failed: {e:?}"))?;

        let tiles: Vec<_> = data
            .chunks(c * h * w)
            .filter_map(|chunk| chw_vec_to_image(chunk, h, w, true))
            .collect();
        if tiles.len() != n {
            return Err(anyhow!("converted {} of {} generated images", tiles.len(), n));
        }

        let grid =
            tile_images(&tiles, n.min(4), 2).ok_or_else(|| anyhow!("empty preview batch"))?;
        let path = self
            .preview_dir
            .join(format!("preview-e{epoch}-b{batch_idx}.png"));
        grid.save(&path)
            .with_context(|| format!("saving {}", path.display()))?;
        Ok(())
    }

    /// Record both models, filenames carrying epoch, step, and the current
    /// generator loss. Returns whether the pair was written.
    pub fn checkpoint<BB: Backend, G: Module<BB>, D: Module<BB>>(
        &self,
        generator: &G,
        discriminator: &D,
        epoch: usize,
        step: usize,
        err_g: f32,
    ) -> bool {
        let recorder = CompactRecorder::new();
        // The recorder sets the file extension itself; a dot in the loss
        // would be taken for one, so encode it with an underscore.
        let loss_tag = format!("{err_g:.4}").replace('.', "_");
        let gen_path = self
            .checkpoint_dir
            .join(format!("generator-e{epoch}-s{step}-l{loss_tag}"));
        let disc_path = self
            .checkpoint_dir
            .join(format!("discriminator-e{epoch}-s{step}-l{loss_tag}"));

        if let Err(e) = generator.clone().save_file(gen_path, &recorder) {
            warn!("generator checkpoint failed: {e}");
            return false;
        }
        if let Err(e) = discriminator.clone().save_file(disc_path, &recorder) {
            warn!("discriminator checkpoint failed: {e}");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::backend::ndarray::NdArrayDevice;

    type B = NdArray;

    fn sink(preview: usize, checkpoint: usize) -> ArtifactSink<B> {
        let device = NdArrayDevice::default();
        let dir = tempfile::tempdir().unwrap();
        ArtifactSink::new(
            dir.path(),
            preview,
            checkpoint,
            Tensor::<B, 4>::zeros([1, 3, 8, 8], &device),
        )
        .unwrap()
    }

    #[test]
    fn interval_two_fires_twice_in_five_steps() {
        let sink = sink(200, 2);
        let fired: Vec<usize> = (1..=5).filter(|&s| sink.checkpoint_due(s)).collect();
        assert_eq!(fired, vec![2, 4]);
    }

    #[test]
    fn step_zero_never_fires() {
        let sink = sink(1, 1);
        assert!(!sink.preview_due(0));
        assert!(!sink.checkpoint_due(0));
        assert!(sink.preview_due(1));
    }

    #[test]
    fn zero_interval_disables_trigger() {
        let sink = sink(0, 0);
        assert!((1..=100).all(|s| !sink.preview_due(s)));
    }
}
