mod skip_cache;

pub use skip_cache::SkipCache;

use burn::{
    nn::pool::{MaxPool2d, MaxPool2dConfig},
    prelude::*,
};

use crate::conv_block::{ConvBlock, ConvBlockConfig};

/// Contracting path: one [`ConvBlock`] per level, each followed by 2x max-pooling.
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    pool: MaxPool2d,
}

impl<B: Backend> Encoder<B> {
    /// Returns the pre-pooling output of every level and the pooled output
    /// of the last one.
    pub fn forward(&self, x: Tensor<B, 4>) -> (SkipCache<B>, Tensor<B, 4>) {
        let mut skips = SkipCache::with_capacity(self.blocks.len());

        let x = self.blocks.iter().fold(x, |x, block| {
            let x = block.forward(x);
            skips.push(x.clone());
            self.pool.forward(x)
        });

        (skips, x)
    }

    /// Number of levels, which is also the number of pooling steps.
    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    pub fn in_channels(&self) -> usize {
        self.blocks[0].in_channels()
    }

    pub fn out_channels(&self) -> Vec<usize> {
        self.blocks.iter().map(ConvBlock::out_channels).collect()
    }
}

#[derive(Config, Debug)]
pub struct EncoderConfig {
    in_channels: usize,
    widths: Vec<usize>,
    #[config(default = true)]
    use_batchnorm: bool,
}

impl EncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Encoder<B> {
        let in_channels = std::iter::once(self.in_channels).chain(self.widths.iter().copied());

        let blocks = in_channels
            .zip(&self.widths)
            .map(|(in_ch, &out_ch)| {
                ConvBlockConfig::new(in_ch, out_ch)
                    .with_use_batchnorm(self.use_batchnorm)
                    .init(device)
            })
            .collect();

        Encoder {
            blocks,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::Distribution;

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn skips_are_pre_pooling_and_halve_per_level() {
        let device = Default::default();
        let encoder: Encoder<TestBackend> = EncoderConfig::new(3, vec![4, 8, 16]).init(&device);

        let x = Tensor::<TestBackend, 4>::random([1, 3, 32, 24], Distribution::Default, &device);
        let (skips, pooled) = encoder.forward(x);

        let dims: Vec<_> = skips.iter().map(|s| s.dims()).collect();
        assert_eq!(dims, vec![[1, 4, 32, 24], [1, 8, 16, 12], [1, 16, 8, 6]]);
        assert_eq!(pooled.dims(), [1, 16, 4, 3]);
    }

    #[test]
    fn odd_sizes_floor_when_pooling() {
        let device = Default::default();
        let encoder: Encoder<TestBackend> = EncoderConfig::new(1, vec![2, 4]).init(&device);

        let x = Tensor::<TestBackend, 4>::random([1, 1, 11, 7], Distribution::Default, &device);
        let (skips, pooled) = encoder.forward(x);

        assert_eq!(skips.get(1).map(|s| s.dims()), Some([1, 4, 5, 3]));
        assert_eq!(pooled.dims(), [1, 4, 2, 1]);
    }

    #[test]
    fn reports_widths() {
        let device = Default::default();
        let encoder: Encoder<TestBackend> = EncoderConfig::new(2, vec![4, 8]).init(&device);

        assert_eq!(encoder.depth(), 2);
        assert_eq!(encoder.in_channels(), 2);
        assert_eq!(encoder.out_channels(), vec![4, 8]);
    }
}
