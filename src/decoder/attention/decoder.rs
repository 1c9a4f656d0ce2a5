use burn::{
    nn::conv::{Conv2d, Conv2dConfig},
    prelude::*,
};

use crate::{
    conv_block::{ConvBlock, ConvBlockConfig},
    decoder::{
        check_skip_count, match_spatial, upsample2x, Decoder, DecoderConfig, DecoderOutput,
    },
    encoder::SkipCache,
    error::{ShapeError, TopologyError},
    schedule::ChannelSchedule,
};

use super::gate::{AttentionGate, AttentionGateConfig};

/// One level of the attention-gated expanding path.
///
/// The upsampled map is refined by `block`, used as the gating signal for
/// the skip, and fused with the gated skip by a 1x1 projection.
#[derive(Module, Debug)]
pub struct GatedLevel<B: Backend> {
    block: ConvBlock<B>,
    gate: AttentionGate<B>,
    fuse: Conv2d<B>,
}

impl<B: Backend> GatedLevel<B> {
    pub fn forward(&self, x: Tensor<B, 4>, skip: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.block.forward(upsample2x(x));
        let x = match_spatial(x, &skip);

        let gated = self.gate.forward(x.clone(), skip);

        self.fuse.forward(Tensor::cat(vec![x, gated], 1))
    }
}

#[derive(Config, Debug)]
pub struct GatedLevelConfig {
    /// Width of the incoming (deeper) feature map.
    in_channels: usize,
    /// Width of the skip at this level.
    channels: usize,
    /// Width after fusion.
    out_channels: usize,
    #[config(default = true)]
    use_batchnorm: bool,
}

impl GatedLevelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> GatedLevel<B> {
        GatedLevel {
            block: ConvBlockConfig::new(self.in_channels, self.channels)
                .with_use_batchnorm(self.use_batchnorm)
                .init(device),
            gate: AttentionGateConfig::new(
                self.channels,
                self.channels,
                (self.channels / 2).max(1),
            )
            .init(device),
            fuse: Conv2dConfig::new([self.channels * 2, self.out_channels], [1, 1]).init(device),
        }
    }
}

/// Attention U-Net expanding path.
#[derive(Module, Debug)]
pub struct AttentionUnetDecoder<B: Backend> {
    /// Deepest level first.
    levels: Vec<GatedLevel<B>>,
}

impl<B: Backend> AttentionUnetDecoder<B> {
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }
}

impl<B: Backend> Decoder for AttentionUnetDecoder<B> {
    type Backend = B;
    fn forward(
        &self,
        deepest: Tensor<B, 4>,
        skips: SkipCache<B>,
    ) -> Result<DecoderOutput<B>, ShapeError> {
        check_skip_count(&skips, self.levels.len())?;

        let x = self
            .levels
            .iter()
            .zip(skips.into_deepest_first())
            .fold(deepest, |x, (level, skip)| level.forward(x, skip));

        Ok(DecoderOutput::single(x))
    }
}

#[derive(Config, Debug)]
pub struct AttentionUnetDecoderConfig {
    #[config(default = "ChannelSchedule::attention_unet()")]
    schedule: ChannelSchedule,

    /// Width the last fusion projects to, read by the output head.
    #[config(default = 32)]
    head_channels: usize,

    #[config(default = true)]
    use_batchnorm: bool,
}

impl<B: Backend> DecoderConfig<B> for AttentionUnetDecoderConfig {
    type Decoder = AttentionUnetDecoder<B>;
    fn init(&self, device: &B::Device) -> Result<AttentionUnetDecoder<B>, TopologyError> {
        if self.head_channels == 0 {
            return Err(TopologyError::ZeroChannels {
                name: "head_channels",
            });
        }

        let widths = self.schedule.widths();
        let levels = widths
            .windows(2)
            .enumerate()
            .rev()
            .map(|(level, pair)| {
                let &[channels, in_channels] = pair else {
                    unreachable!("windows(2) yields pairs")
                };
                let out_channels = if level == 0 {
                    self.head_channels
                } else {
                    channels
                };

                GatedLevelConfig::new(in_channels, channels, out_channels)
                    .with_use_batchnorm(self.use_batchnorm)
                    .init(device)
            })
            .collect();

        tracing::debug!(
            schedule = ?widths,
            head_channels = self.head_channels,
            "built attention decoder"
        );

        Ok(AttentionUnetDecoder { levels })
    }
    fn schedule(&self) -> &ChannelSchedule {
        &self.schedule
    }
    fn encoder_channels(&self) -> Vec<usize> {
        self.schedule.encoder_levels().to_vec()
    }
    fn bottleneck_channels(&self) -> usize {
        self.schedule.deepest()
    }
    fn out_channels(&self) -> usize {
        self.head_channels
    }
    fn use_batchnorm(&self) -> bool {
        self.use_batchnorm
    }
}
