use burn::{
    nn::{
        BatchNorm, BatchNormConfig, LeakyRelu, LeakyReluConfig, PaddingConfig2d, Relu, Tanh,
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
    },
    prelude::*,
};

use crate::model::constants::CHANNELS;

/// Photo -> cartoon mapping: `forward(images) -> images` of the same shape.
pub trait Generate<B: Backend> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4>;
}

/// Real/fake patch critic: `forward(images) -> patch logits` at 1/4 the
/// input resolution, one channel, no output activation.
pub trait Discriminate<B: Backend> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4>;
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    pub generator: GeneratorConfig,
    pub discriminator: DiscriminatorConfig,
}

impl ModelConfig {
    pub fn init_generator<B: Backend>(&self, device: &B::Device) -> Generator<B> {
        self.generator.init(device)
    }

    pub fn init_discriminator<B: Backend>(&self, device: &B::Device) -> Discriminator<B> {
        self.discriminator.init(device)
    }
}

#[derive(Module, Debug)]
pub struct Generator<B: Backend> {
    flat: Conv2d<B>,
    down1: Conv2d<B>,
    down2: Conv2d<B>,
    blocks: Vec<ResidualBlock<B>>,
    up1: ConvTranspose2d<B>,
    up2: ConvTranspose2d<B>,
    out: Conv2d<B>,
    bn_flat: BatchNorm<B, 2>,
    bn_down1: BatchNorm<B, 2>,
    bn_down2: BatchNorm<B, 2>,
    bn_up1: BatchNorm<B, 2>,
    bn_up2: BatchNorm<B, 2>,
    activation: Relu,
    activation_out: Tanh,
}

#[derive(Config, Debug)]
pub struct GeneratorConfig {
    #[config(default = 64)]
    pub base_channels: usize,
    #[config(default = 8)]
    pub residual_blocks: usize,
}

impl GeneratorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Generator<B> {
        let base = self.base_channels;
        Generator {
            flat: Conv2dConfig::new([CHANNELS, base], [7, 7])
                .with_padding(PaddingConfig2d::Explicit(3, 3))
                .init(device),
            down1: Conv2dConfig::new([base, base * 2], [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device), // h -> h/2
            down2: Conv2dConfig::new([base * 2, base * 4], [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device), // h/2 -> h/4
            blocks: (0..self.residual_blocks)
                .map(|_| ResidualBlockConfig::new(base * 4).init(device))
                .collect(),
            up1: ConvTranspose2dConfig::new([base * 4, base * 2], [3, 3])
                .with_stride([2, 2])
                .with_padding([1, 1])
                .with_padding_out([1, 1])
                .init(device), // h/4 -> h/2
            up2: ConvTranspose2dConfig::new([base * 2, base], [3, 3])
                .with_stride([2, 2])
                .with_padding([1, 1])
                .with_padding_out([1, 1])
                .init(device), // h/2 -> h
            out: Conv2dConfig::new([base, CHANNELS], [7, 7])
                .with_padding(PaddingConfig2d::Explicit(3, 3))
                .init(device),
            bn_flat: BatchNormConfig::new(base).init(device),
            bn_down1: BatchNormConfig::new(base * 2).init(device),
            bn_down2: BatchNormConfig::new(base * 4).init(device),
            bn_up1: BatchNormConfig::new(base * 2).init(device),
            bn_up2: BatchNormConfig::new(base).init(device),
            activation: Relu,
            activation_out: Tanh::new(),
        }
    }
}

impl<B: Backend> Generator<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.flat.forward(input);
        x = self.bn_flat.forward(x);
        x = self.activation.forward(x);

        x = self.down1.forward(x);
        x = self.bn_down1.forward(x);
        x = self.activation.forward(x);
        x = self.down2.forward(x);
        x = self.bn_down2.forward(x);
        x = self.activation.forward(x);

        for block in &self.blocks {
            x = block.forward(x);
        }

        x = self.up1.forward(x);
        x = self.bn_up1.forward(x);
        x = self.activation.forward(x);
        x = self.up2.forward(x);
        x = self.bn_up2.forward(x);
        x = self.activation.forward(x);

        self.activation_out.forward(self.out.forward(x))
    }
}

impl<B: Backend> Generate<B> for Generator<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        Generator::forward(self, images)
    }
}

#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    bn2: BatchNorm<B, 2>,
    activation: Relu,
}

#[derive(Config, Debug)]
pub struct ResidualBlockConfig {
    pub channels: usize,
}

impl ResidualBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResidualBlock<B> {
        ResidualBlock {
            conv1: Conv2dConfig::new([self.channels, self.channels], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            conv2: Conv2dConfig::new([self.channels, self.channels], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            bn1: BatchNormConfig::new(self.channels).init(device),
            bn2: BatchNormConfig::new(self.channels).init(device),
            activation: Relu,
        }
    }
}

impl<B: Backend> ResidualBlock<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.conv1.forward(input.clone());
        x = self.bn1.forward(x);
        x = self.activation.forward(x);
        x = self.conv2.forward(x);
        x = self.bn2.forward(x);
        x + input
    }
}

#[derive(Module, Debug)]
pub struct Discriminator<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    head: Conv2d<B>,
    bn3: BatchNorm<B, 2>,
    activation: LeakyRelu,
}

#[derive(Config, Debug)]
pub struct DiscriminatorConfig {
    #[config(default = 32)]
    pub base_channels: usize,
    #[config(default = 0.2)]
    pub leaky_relu_slope: f64,
}

impl DiscriminatorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Discriminator<B> {
        let base = self.base_channels;
        Discriminator {
            conv1: Conv2dConfig::new([CHANNELS, base], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            conv2: Conv2dConfig::new([base, base * 2], [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device), // h -> h/2
            conv3: Conv2dConfig::new([base * 2, base * 4], [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device), // h/2 -> h/4
            head: Conv2dConfig::new([base * 4, 1], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            bn3: BatchNormConfig::new(base * 4).init(device),
            activation: LeakyReluConfig::new()
                .with_negative_slope(self.leaky_relu_slope)
                .init(),
        }
    }
}

impl<B: Backend> Discriminator<B> {
    /// Patch logits, shape `[batch, 1, h/4, w/4]`.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.conv1.forward(input);
        x = self.activation.forward(x);
        x = self.conv2.forward(x);
        x = self.activation.forward(x);
        x = self.conv3.forward(x);
        x = self.bn3.forward(x);
        x = self.activation.forward(x);
        self.head.forward(x)
    }
}

impl<B: Backend> Discriminate<B> for Discriminator<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        Discriminator::forward(self, images)
    }
}
