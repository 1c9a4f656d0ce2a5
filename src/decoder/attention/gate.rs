use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, Relu,
    },
    prelude::*,
    tensor::activation::sigmoid,
};

use crate::decoder::match_spatial;

/// 1x1 convolution followed by batch normalization.
#[derive(Module, Debug)]
pub struct Projection<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
}

impl<B: Backend> Projection<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.norm.forward(self.conv.forward(x))
    }
}

fn projection<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    device: &B::Device,
) -> Projection<B> {
    Projection {
        conv: Conv2dConfig::new([in_channels, out_channels], [1, 1]).init(device),
        norm: BatchNormConfig::new(out_channels).init(device),
    }
}

/// Attention gate.
///
/// Projects the decoder feature map `g` and the skip `x` to a shared width,
/// sums them, and turns the result into a single-channel mask in `[0, 1]`
/// that scales `x` spatially.
#[derive(Module, Debug)]
pub struct AttentionGate<B: Backend> {
    w_g: Projection<B>,
    w_x: Projection<B>,
    psi: Projection<B>,
    relu: Relu,
}

impl<B: Backend> AttentionGate<B> {
    pub fn forward(&self, g: Tensor<B, 4>, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mask = self.mask(g, &x);
        x * mask
    }

    /// The `[batch, 1, height, width]` mask applied to `x`.
    pub fn mask(&self, g: Tensor<B, 4>, x: &Tensor<B, 4>) -> Tensor<B, 4> {
        let g = match_spatial(g, x);

        let g = self.w_g.forward(g);
        let x = self.w_x.forward(x.clone());
        let psi = self.relu.forward(g + x);

        sigmoid(self.psi.forward(psi))
    }
}

#[derive(Config, Debug)]
pub struct AttentionGateConfig {
    /// Width of the decoder feature map.
    gate_channels: usize,
    /// Width of the skip feature map.
    skip_channels: usize,
    /// Shared width both inputs are projected to.
    inter_channels: usize,
}

impl AttentionGateConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> AttentionGate<B> {
        AttentionGate {
            w_g: projection(self.gate_channels, self.inter_channels, device),
            w_x: projection(self.skip_channels, self.inter_channels, device),
            psi: projection(self.inter_channels, 1, device),
            relu: Relu::new(),
        }
    }
}
