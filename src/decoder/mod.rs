pub mod attention;
pub mod unet;
pub mod unetplusplus;

use burn::{
    module::Module,
    tensor::{
        backend::Backend,
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
        Tensor,
    },
};

use crate::{
    encoder::SkipCache,
    error::{ShapeError, TopologyError},
    schedule::ChannelSchedule,
};

/// Feature maps handed to the output heads.
#[derive(Debug, Clone)]
pub struct DecoderOutput<B: Backend> {
    /// Intermediate supervision signals, shallowest first. Empty unless the
    /// topology exposes deep supervision.
    pub auxiliary: Vec<Tensor<B, 4>>,
    /// The final feature map.
    pub output: Tensor<B, 4>,
}

impl<B: Backend> DecoderOutput<B> {
    pub fn single(output: Tensor<B, 4>) -> Self {
        Self {
            auxiliary: Vec::new(),
            output,
        }
    }

    pub fn num_outputs(&self) -> usize {
        self.auxiliary.len() + 1
    }
}

/// Expanding path of a topology.
///
/// `deepest` is the bottleneck output, `skips` the encoder cache. Every skip
/// is consumed exactly once; a cache with the wrong number of entries is
/// rejected with [`ShapeError::SkipCountMismatch`].
pub trait Decoder: Module<Self::Backend> {
    type Backend: Backend;
    fn forward(
        &self,
        deepest: Tensor<Self::Backend, 4>,
        skips: SkipCache<Self::Backend>,
    ) -> Result<DecoderOutput<Self::Backend>, ShapeError>;
}

pub trait DecoderConfig<B: Backend> {
    type Decoder: Decoder<Backend = B>;
    fn init(&self, device: &B::Device) -> Result<Self::Decoder, TopologyError>;
    fn schedule(&self) -> &ChannelSchedule;
    /// Widths of the encoder levels that feed the skip cache.
    fn encoder_channels(&self) -> Vec<usize>;
    /// Width of the bottleneck output handed to [`Decoder::forward`].
    fn bottleneck_channels(&self) -> usize;
    /// Width of [`DecoderOutput::output`].
    fn out_channels(&self) -> usize;
    /// Widths of [`DecoderOutput::auxiliary`].
    fn auxiliary_channels(&self) -> Vec<usize> {
        Vec::new()
    }
    /// Whether the encoder and bottleneck blocks built around this decoder
    /// normalize, like the decoder's own blocks.
    fn use_batchnorm(&self) -> bool;
}

/// Fails unless `skips` holds exactly `expected` entries.
pub fn check_skip_count<B: Backend>(
    skips: &SkipCache<B>,
    expected: usize,
) -> Result<(), ShapeError> {
    if skips.len() != expected {
        return Err(ShapeError::SkipCountMismatch {
            expected,
            actual: skips.len(),
        });
    }

    Ok(())
}

/// Resizes `x` to the spatial size of `reference` if the two differ.
///
/// Happens when the input side is not divisible by `2^depth`: pooling floors,
/// so the upsampled path comes back one pixel short of the skip.
pub fn match_spatial<B: Backend>(x: Tensor<B, 4>, reference: &Tensor<B, 4>) -> Tensor<B, 4> {
    let [_, _, height, width] = x.dims();
    let [_, _, ref_height, ref_width] = reference.dims();

    if (height, width) == (ref_height, ref_width) {
        return x;
    }

    tracing::trace!(
        from = ?[height, width],
        to = ?[ref_height, ref_width],
        "resizing decoder feature map to match skip"
    );

    interpolate(
        x,
        [ref_height, ref_width],
        InterpolateOptions::new(InterpolateMode::Bilinear),
    )
}

/// Parameter-free 2x bilinear upsampling.
pub fn upsample2x<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [_, _, height, width] = x.dims();
    interpolate(
        x,
        [height * 2, width * 2],
        InterpolateOptions::new(InterpolateMode::Bilinear),
    )
}

#[cfg(test)]
mod tests {
    use burn::tensor::Distribution;

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn matching_sizes_pass_through() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::random([1, 2, 8, 8], Distribution::Default, &device);
        let skip = Tensor::<TestBackend, 4>::zeros([1, 5, 8, 8], &device);

        let y = match_spatial(x.clone(), &skip);

        y.into_data().assert_eq(&x.into_data(), true);
    }

    #[test]
    fn mismatched_sizes_take_the_skip_size_and_keep_channels() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::random([2, 3, 80, 80], Distribution::Default, &device);
        let skip = Tensor::<TestBackend, 4>::zeros([2, 7, 81, 80], &device);

        assert_eq!(match_spatial(x, &skip).dims(), [2, 3, 81, 80]);
    }

    #[test]
    fn upsample_doubles_height_and_width() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::random([1, 4, 5, 3], Distribution::Default, &device);

        assert_eq!(upsample2x(x).dims(), [1, 4, 10, 6]);
    }

    #[test]
    fn skip_count_must_match_levels() {
        let device = Default::default();
        let skips = SkipCache::<TestBackend>::new(vec![
            Tensor::zeros([1, 2, 4, 4], &device),
            Tensor::zeros([1, 4, 2, 2], &device),
        ]);

        assert_eq!(check_skip_count(&skips, 2), Ok(()));
        assert_eq!(
            check_skip_count(&skips, 3),
            Err(ShapeError::SkipCountMismatch {
                expected: 3,
                actual: 2
            })
        );
    }
}
