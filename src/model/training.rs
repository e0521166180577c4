use std::path::Path;

use anyhow::Context;
use burn::data::dataloader::DataLoaderBuilder;
use burn::module::AutodiffModule;
use burn::optim::{AdamWConfig, Optimizer};
use burn::prelude::*;
use burn::record::CompactRecorder;
use burn::tensor::ElementConversion;
use burn::tensor::backend::AutodiffBackend;
use log::info;

use crate::model::architecture::{
    Discriminate, Discriminator, Generate, Generator, ModelConfig,
};
use crate::model::data::{CartoonBatch, ImageBatch, ImageBatcher, ImageFolderDataset};
use crate::model::error::TrainError;
use crate::model::loss::{CartoonLosses, generator_adversarial_loss};
use crate::model::scaler::GradScaler;
use crate::model::sink::ArtifactSink;

#[derive(Config)]
pub struct TrainingConfig {
    pub model: ModelConfig,
    pub optimizer_g: AdamWConfig,
    pub optimizer_d: AdamWConfig,
    pub pretrained_generator: String,
    pub photo_dir: String,
    pub cartoon_dir: String,

    #[config(default = 100)]
    pub num_epochs: usize,

    #[config(default = 16)]
    pub batch_size: usize,

    #[config(default = 256)]
    pub image_size: usize,

    #[config(default = 4)]
    pub num_workers: usize,

    #[config(default = 1337)]
    pub seed: u64,

    #[config(default = 1e-4)]
    pub learning_rate: f64,

    #[config(default = 10.0)]
    pub content_weight: f64,

    #[config(default = 200)]
    pub preview_interval: usize,

    #[config(default = 1000)]
    pub checkpoint_interval: usize,

    #[config(default = 125)]
    pub log_interval: usize,
}

/// Rolling training progress, owned by the loop rather than ambient.
#[derive(Debug, Default)]
pub struct TrainState {
    /// Global step-pair counter, incremented after each completed pair.
    pub iters: usize,
    pub d_losses: Vec<f32>,
    pub g_losses: Vec<f32>,
}

impl TrainState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Scalar diagnostics for one step-pair. Detached from the gradient graph.
#[derive(Debug, Clone, Copy)]
pub struct StepStats {
    pub err_d: f32,
    pub err_g: f32,
    /// Mean cartoon logit; drifts toward the "real" label as D learns.
    pub d_x: f32,
    /// Mean generated logit after the D update; the G objective pushes it up.
    pub d_g_z: f32,
}

/// The generator output for one step-pair.
///
/// Produced once per batch and consumed by exactly two discriminator passes:
/// a detached view for the discriminator update, then the live tensor (by
/// move) for the generator update. Regenerating between the two halves would
/// both waste a forward pass and let the updates disagree on the sample.
pub struct GeneratedSample<B: AutodiffBackend> {
    attached: Tensor<B, 4>,
}

impl<B: AutodiffBackend> GeneratedSample<B> {
    pub fn new(generated: Tensor<B, 4>) -> Self {
        Self { attached: generated }
    }

    /// View for the discriminator update; no gradient reaches the generator.
    pub fn detached(&self) -> Tensor<B, 4> {
        self.attached.clone().detach()
    }

    /// The live tensor for the generator update.
    pub fn into_inner(self) -> Tensor<B, 4> {
        self.attached
    }
}

/// One discriminator update followed by one generator update on the same
/// batch. The order is fixed: the generator's objective scores against the
/// discriminator that just moved.
#[allow(clippy::too_many_arguments)]
pub fn step_pair<B, G, D, OG, OD>(
    generator: G,
    discriminator: D,
    batch: &CartoonBatch<B>,
    losses: &CartoonLosses<B>,
    scaler: &mut GradScaler,
    optim_d: &mut OD,
    optim_g: &mut OG,
    lr: f64,
) -> Result<(G, D, StepStats), TrainError>
where
    B: AutodiffBackend,
    G: Generate<B> + AutodiffModule<B>,
    D: Discriminate<B> + AutodiffModule<B>,
    OG: Optimizer<G, B>,
    OD: Optimizer<D, B>,
{
    // --- 1. Update the discriminator --- //
    let generated = GeneratedSample::new(generator.forward(batch.real_photo.clone()));

    let cartoon_pred = discriminator.forward(batch.cartoon.clone());
    let edge_pred = discriminator.forward(batch.edge.clone());
    let generated_pred = discriminator.forward(generated.detached());

    let d_x: f32 = cartoon_pred.clone().detach().mean().into_scalar().elem();

    let err_d = losses
        .adversarial
        .forward(cartoon_pred, generated_pred, edge_pred)?;
    let grads_d = scaler.scale_loss(err_d.clone()).backward();
    let discriminator = scaler.step(lr, discriminator, grads_d, optim_d);

    // --- 2. Update the generator --- //
    // Rescore the same generated batch against the updated discriminator,
    // this time letting gradient flow back into the generator. Collecting
    // gradients for the generator's parameters alone is what freezes the
    // discriminator here.
    let generated = generated.into_inner();
    let generated_pred = discriminator.forward(generated.clone());
    let d_g_z: f32 = generated_pred.clone().detach().mean().into_scalar().elem();

    let err_g = generator_adversarial_loss(generated_pred, losses.adversarial.real_labels())?
        + losses.content.forward(generated, batch.real_photo.clone())?;
    let grads_g = scaler.scale_loss(err_g.clone()).backward();
    let generator = scaler.step(lr, generator, grads_g, optim_g);

    // One scale adjustment per step-pair, after both steps.
    scaler.update();

    let stats = StepStats {
        err_d: err_d.into_scalar().elem(),
        err_g: err_g.into_scalar().elem(),
        d_x,
        d_g_z,
    };
    Ok((generator, discriminator, stats))
}

/// Drive step-pairs over two zipped batch streams; the shorter stream bounds
/// the epoch. Console logging runs on the epoch-relative batch index while
/// artifacts run on the global step counter; the two are independent by
/// design and drift apart when epoch length and interval disagree.
#[allow(clippy::too_many_arguments)]
pub fn run_epoch<B, G, D, OG, OD>(
    mut generator: G,
    mut discriminator: D,
    pair_batches: impl Iterator<Item = ImageBatch<B>>,
    photo_batches: impl Iterator<Item = ImageBatch<B>>,
    losses: &CartoonLosses<B>,
    scaler: &mut GradScaler,
    optim_d: &mut OD,
    optim_g: &mut OG,
    sink: &ArtifactSink<B::InnerBackend>,
    state: &mut TrainState,
    config: &TrainingConfig,
    epoch: usize,
) -> Result<(G, D), TrainError>
where
    B: AutodiffBackend,
    G: Generate<B> + AutodiffModule<B>,
    D: Discriminate<B> + AutodiffModule<B>,
    G::InnerModule: Generate<B::InnerBackend>,
    OG: Optimizer<G, B>,
    OD: Optimizer<D, B>,
{
    for (batch_idx, (pair, photo)) in pair_batches.zip(photo_batches).enumerate() {
        let batch = CartoonBatch::from_parts(pair.images, photo.images, config.image_size)?;
        let (g, d, stats) = step_pair(
            generator,
            discriminator,
            &batch,
            losses,
            scaler,
            optim_d,
            optim_g,
            config.learning_rate,
        )?;
        generator = g;
        discriminator = d;

        state.d_losses.push(stats.err_d);
        state.g_losses.push(stats.err_g);

        if config.log_interval != 0 && batch_idx % config.log_interval == 0 {
            info!(
                "[{}/{}][{}] loss_d: {:.4}, loss_g: {:.4}, d_x: {:.4}, d_g_z: {:.4}, scale: {}",
                epoch,
                config.num_epochs,
                batch_idx,
                stats.err_d,
                stats.err_g,
                stats.d_x,
                stats.d_g_z,
                scaler.scale(),
            );
        }

        state.iters += 1;
        if sink.preview_due(state.iters) {
            sink.preview(&generator.valid(), epoch, batch_idx);
        }
        if sink.checkpoint_due(state.iters) {
            sink.checkpoint(&generator, &discriminator, epoch, state.iters, stats.err_g);
        }
    }
    Ok((generator, discriminator))
}

/// The generator starts from a pretrained initialization; a missing weights
/// file aborts the run before the first step.
pub fn load_pretrained<B: Backend>(
    generator: Generator<B>,
    path: &Path,
    device: &B::Device,
) -> Result<Generator<B>, TrainError> {
    let file = path.with_extension("mpk");
    if !file.exists() {
        return Err(TrainError::MissingPretrainedWeights { path: file });
    }
    generator
        .load_file(path, &CompactRecorder::new(), device)
        .map_err(|source| TrainError::WeightsLoad {
            path: path.to_path_buf(),
            source,
        })
}

fn create_artifact_dir(artifact_dir: &str) {
    // Remove existing artifacts before to get an accurate run summary
    std::fs::remove_dir_all(artifact_dir).ok();
    std::fs::create_dir_all(artifact_dir).ok();
}

pub fn train<B: AutodiffBackend>(
    artifact_dir: &str,
    config: TrainingConfig,
    device: B::Device,
) -> anyhow::Result<()> {
    create_artifact_dir(artifact_dir);
    config
        .save(format!("{artifact_dir}/config.json"))
        .context("saving training config")?;

    B::seed(config.seed);

    let pair_dataset = ImageFolderDataset::cartoon_pairs(&config.cartoon_dir, config.image_size)
        .context("scanning cartoon pair dataset")?;
    let photo_dataset = ImageFolderDataset::photos(&config.photo_dir, config.image_size)
        .context("scanning photo dataset")?;

    let pair_loader =
        DataLoaderBuilder::new(ImageBatcher::new(config.image_size * 2, config.image_size))
            .batch_size(config.batch_size)
            .shuffle(config.seed)
            .num_workers(config.num_workers)
            .build(pair_dataset);
    let photo_loader =
        DataLoaderBuilder::new(ImageBatcher::new(config.image_size, config.image_size))
            .batch_size(config.batch_size)
            .shuffle(config.seed)
            .num_workers(config.num_workers)
            .build(photo_dataset);

    let generator: Generator<B> = config.model.init_generator(&device);
    let mut generator =
        load_pretrained(generator, Path::new(&config.pretrained_generator), &device)?;
    let mut discriminator: Discriminator<B> = config.model.init_discriminator(&device);

    let mut optim_g = config.optimizer_g.init::<B, Generator<B>>();
    let mut optim_d = config.optimizer_d.init::<B, Discriminator<B>>();

    let losses = CartoonLosses::new(
        config.batch_size,
        config.image_size,
        config.content_weight,
        &device,
    );
    let mut scaler = GradScaler::new();

    // Fixed preview inputs for the whole run.
    let tracked = photo_loader
        .iter()
        .next()
        .ok_or(TrainError::EmptyDataSource)?
        .images
        .inner();
    let sink = ArtifactSink::new(
        Path::new(artifact_dir),
        config.preview_interval,
        config.checkpoint_interval,
        tracked,
    )?;

    let mut state = TrainState::new();
    info!("starting training loop");
    for epoch in 1..=config.num_epochs {
        let (g, d) = run_epoch(
            generator,
            discriminator,
            pair_loader.iter(),
            photo_loader.iter(),
            &losses,
            &mut scaler,
            &mut optim_d,
            &mut optim_g,
            &sink,
            &mut state,
            &config,
            epoch,
        )?;
        generator = g;
        discriminator = d;
    }

    // Final snapshot regardless of interval alignment.
    sink.checkpoint(
        &generator,
        &discriminator,
        config.num_epochs,
        state.iters,
        state.g_losses.last().copied().unwrap_or(0.0),
    );
    Ok(())
}
