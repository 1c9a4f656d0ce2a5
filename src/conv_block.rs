use burn::prelude::*;

use crate::conv2drelu::{Conv2dReLU, Conv2dReLUConfig};

/// The two-stage feature extractor every topology is built from.
///
/// Both stages emit `out_channels`; height and width are preserved exactly.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv1: Conv2dReLU<B>,
    conv2: Conv2dReLU<B>,
}

impl<B: Backend> ConvBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv1.forward(x);
        self.conv2.forward(x)
    }

    /// Input width read back from the first convolution's weights.
    pub fn in_channels(&self) -> usize {
        self.conv1.in_channels()
    }

    pub fn out_channels(&self) -> usize {
        self.conv2.out_channels()
    }
}

#[derive(Config, Debug)]
pub struct ConvBlockConfig {
    in_channels: usize,
    out_channels: usize,
    #[config(default = true)]
    use_batchnorm: bool,
}

impl ConvBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvBlock<B> {
        ConvBlock {
            conv1: Conv2dReLUConfig::new(self.in_channels, self.out_channels)
                .with_use_batchnorm(self.use_batchnorm)
                .init(device),
            conv2: Conv2dReLUConfig::new(self.out_channels, self.out_channels)
                .with_use_batchnorm(self.use_batchnorm)
                .init(device),
        }
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::Distribution;

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn preserves_spatial_size_and_sets_width() {
        let device = Default::default();
        let block: ConvBlock<TestBackend> = ConvBlockConfig::new(3, 8).init(&device);

        let x = Tensor::<TestBackend, 4>::random([2, 3, 13, 9], Distribution::Default, &device);
        let y = block.forward(x);

        assert_eq!(y.dims(), [2, 8, 13, 9]);
    }

    #[test]
    fn reports_widths_from_parameters() {
        let device = Default::default();
        let block: ConvBlock<TestBackend> = ConvBlockConfig::new(5, 7)
            .with_use_batchnorm(false)
            .init(&device);

        assert_eq!(block.in_channels(), 5);
        assert_eq!(block.out_channels(), 7);
    }

    #[test]
    fn output_is_non_negative() {
        let device = Default::default();
        let block: ConvBlock<TestBackend> = ConvBlockConfig::new(2, 4).init(&device);

        let x = Tensor::<TestBackend, 4>::random(
            [1, 2, 8, 8],
            Distribution::Normal(0.0, 3.0),
            &device,
        );
        let min: f32 = block.forward(x).min().into_scalar();

        assert!(min >= 0.0);
    }
}
