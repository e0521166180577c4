use std::path::Path;

use burn::backend::{Autodiff, Cuda};
use burn::optim::AdamWConfig;

use cartoonizer::model::architecture::{DiscriminatorConfig, GeneratorConfig, ModelConfig};
use cartoonizer::model::edge::prepare_pairs;
use cartoonizer::model::training::{TrainingConfig, train};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("prepare") {
        let src = args.get(2).map(String::as_str).unwrap_or("datasets/cartoons");
        let dst = args
            .get(3)
            .map(String::as_str)
            .unwrap_or("datasets/cartoon_pairs");
        let written = prepare_pairs(Path::new(src), Path::new(dst), 256, 1.5)?;
        println!("{written} pairs written to {dst}");
        return Ok(());
    }

    type MyBackend = Cuda<f32, i32>;
    type MyAutodiffBackend = Autodiff<MyBackend>;

    let device = burn::backend::cuda::CudaDevice::default();

    let adamw = || {
        AdamWConfig::new()
            .with_beta_1(0.5)
            .with_beta_2(0.99)
            .with_weight_decay(1e-4)
    };
    let config = TrainingConfig::new(
        ModelConfig::new(GeneratorConfig::new(), DiscriminatorConfig::new()),
        adamw(),
        adamw(),
        "checkpoints/pretrained_generator".to_string(),
        "datasets/photos".to_string(),
        "datasets/cartoon_pairs".to_string(),
    );
    train::<MyAutodiffBackend>("artifacts", config, device)?;
    Ok(())
}
