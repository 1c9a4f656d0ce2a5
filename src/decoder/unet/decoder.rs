use burn::{
    nn::conv::{ConvTranspose2d, ConvTranspose2dConfig},
    prelude::*,
};

use crate::{
    conv_block::{ConvBlock, ConvBlockConfig},
    decoder::{check_skip_count, match_spatial, Decoder, DecoderConfig, DecoderOutput},
    encoder::SkipCache,
    error::{ShapeError, TopologyError},
    schedule::ChannelSchedule,
};

/// One level of the expanding path: learned 2x upsampling, then a
/// [`ConvBlock`] over `[skip, upsampled]`.
#[derive(Module, Debug)]
pub struct UpLevel<B: Backend> {
    upsample: ConvTranspose2d<B>,
    block: ConvBlock<B>,
}

impl<B: Backend> UpLevel<B> {
    pub fn forward(&self, x: Tensor<B, 4>, skip: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.upsample.forward(x);
        let x = match_spatial(x, &skip);

        self.block.forward(Tensor::cat(vec![skip, x], 1))
    }
}

#[derive(Config, Debug)]
pub struct UpLevelConfig {
    /// Width of the skip at this level; the incoming tensor is twice as wide.
    channels: usize,
    #[config(default = true)]
    use_batchnorm: bool,
}

impl UpLevelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> UpLevel<B> {
        UpLevel {
            upsample: ConvTranspose2dConfig::new([self.channels * 2, self.channels], [2, 2])
                .with_stride([2, 2])
                .init(device),
            block: ConvBlockConfig::new(self.channels * 2, self.channels)
                .with_use_batchnorm(self.use_batchnorm)
                .init(device),
        }
    }
}

/// Plain UNet expanding path, mirroring the encoder level by level.
#[derive(Module, Debug)]
pub struct UnetDecoder<B: Backend> {
    /// Deepest level first.
    levels: Vec<UpLevel<B>>,
}

impl<B: Backend> UnetDecoder<B> {
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }
}

impl<B: Backend> Decoder for UnetDecoder<B> {
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
pub struct UnetDecoderConfig {
    #[config(default = "ChannelSchedule::unet()")]
    schedule: ChannelSchedule,

    #[config(default = true)]
    use_batchnorm: bool,
}

impl<B: Backend> DecoderConfig<B> for UnetDecoderConfig {
    type Decoder = UnetDecoder<B>;
    fn init(&self, device: &B::Device) -> Result<UnetDecoder<B>, TopologyError> {
        let levels = self
            .schedule
            .widths()
            .iter()
            .rev()
            .map(|&channels| {
                UpLevelConfig::new(channels)
                    .with_use_batchnorm(self.use_batchnorm)
                    .init(device)
            })
            .collect();

        Ok(UnetDecoder { levels })
    }
    fn schedule(&self) -> &ChannelSchedule {
        &self.schedule
    }
    fn encoder_channels(&self) -> Vec<usize> {
        self.schedule.widths().to_vec()
    }
    fn bottleneck_channels(&self) -> usize {
        self.schedule.deepest() * 2
    }
    fn out_channels(&self) -> usize {
        self.schedule.shallowest()
    }
    fn use_batchnorm(&self) -> bool {
        self.use_batchnorm
    }
}
