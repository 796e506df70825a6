//! Convolutional image backbone
//!
//! Maps a normalized `[batch, 3, size, size]` image to a pooled feature
//! vector. The classification head of a typical CNN is left out on purpose:
//! the fusion model only consumes the penultimate features.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Conv2d, BatchNorm, ReLU and a 2x2 max-pool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
    pub relu: Relu,
    pub pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    /// Create a new convolutional block
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        Self {
            conv,
            bn: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }
}

/// Image encoder producing one embedding per image
///
/// Architecture:
/// - 4 convolutional blocks, filters `base, 2*base, 4*base, 8*base`
/// - Global average pooling, flattened to `[batch, 8*base]`
#[derive(Module, Debug)]
pub struct ImageBackbone<B: Backend> {
    pub block1: ConvBlock<B>,
    pub block2: ConvBlock<B>,
    pub block3: ConvBlock<B>,
    pub block4: ConvBlock<B>,
    pub global_pool: AdaptiveAvgPool2d,
    embedding_dim: usize,
}

impl<B: Backend> ImageBackbone<B> {
    pub fn new(in_channels: usize, base_filters: usize, device: &B::Device) -> Self {
        let base = base_filters;

        Self {
            block1: ConvBlock::new(in_channels, base, device),
            block2: ConvBlock::new(base, base * 2, device),
            block3: ConvBlock::new(base * 2, base * 4, device),
            block4: ConvBlock::new(base * 4, base * 8, device),
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            embedding_dim: base * 8,
        }
    }

    /// # Arguments
    /// * `images` - Tensor of shape [batch_size, 3, height, width]
    ///
    /// # Returns
    /// * Embedding tensor of shape [batch_size, embedding_dim]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.block1.forward(images);
        let x = self.block2.forward(x);
        let x = self.block3.forward(x);
        let x = self.block4.forward(x);

        // [B, C, H, W] -> [B, C, 1, 1] -> [B, C]
        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        x.reshape([batch_size, channels])
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }
}
