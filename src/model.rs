use burn::{
    module::{AutodiffModule, Devices, ModuleMapper, ModuleVisitor},
    prelude::*,
    record::Record,
    tensor::backend::AutodiffBackend,
};

use crate::{
    conv_block::{ConvBlock, ConvBlockConfig},
    decoder::{
        attention::{AttentionUnetDecoder, AttentionUnetDecoderConfig},
        unet::{UnetDecoder, UnetDecoderConfig},
        unetplusplus::{UnetPlusPlusDecoder, UnetPlusPlusDecoderConfig},
        Decoder, DecoderConfig, DecoderOutput,
    },
    encoder::{Encoder, EncoderConfig},
    error::{ShapeError, TopologyError},
    schedule::min_input_side,
    segmentation_head::{SegmentationHead, SegmentationHeadConfig},
};

pub type Unet<B> = SegmentationModel<B, UnetDecoder<B>>;
pub type UnetPlusPlus<B> = SegmentationModel<B, UnetPlusPlusDecoder<B>>;
pub type AttentionUnet<B> = SegmentationModel<B, AttentionUnetDecoder<B>>;

/// Encoder, bottleneck, a decoder topology and its output heads.
#[derive(Debug, Clone)]
pub struct SegmentationModel<B: Backend, D> {
    pub encoder: Encoder<B>,
    pub bottleneck: ConvBlock<B>,
    pub decoder: D,
    /// One head per auxiliary decoder output, shallowest first.
    pub aux_heads: Vec<SegmentationHead<B>>,
    pub head: SegmentationHead<B>,
}

impl<B: Backend, D: Decoder<Backend = B>> SegmentationModel<B, D> {
    /// Runs every head. The auxiliary outputs come first (shallowest
    /// supervision signal first), the final output last.
    pub fn forward(&self, x: Tensor<B, 4>) -> Result<Vec<Tensor<B, 4>>, ShapeError> {
        let features = self.features(x)?;

        let mut outputs: Vec<_> = self
            .aux_heads
            .iter()
            .zip(features.auxiliary)
            .map(|(head, x)| head.forward(x))
            .collect();
        outputs.push(self.head.forward(features.output));

        Ok(outputs)
    }

    /// Runs only the final head.
    pub fn predict(&self, x: Tensor<B, 4>) -> Result<Tensor<B, 4>, ShapeError> {
        let features = self.features(x)?;
        Ok(self.head.forward(features.output))
    }

    /// Number of tensors [`Self::forward`] returns.
    pub fn num_outputs(&self) -> usize {
        self.aux_heads.len() + 1
    }

    /// Rejects inputs the encoder cannot process, before any stage runs.
    pub fn validate_input(&self, dims: [usize; 4]) -> Result<(), ShapeError> {
        let [_, channels, height, width] = dims;

        let expected = self.encoder.in_channels();
        if channels != expected {
            return Err(ShapeError::ChannelMismatch {
                expected,
                actual: channels,
            });
        }

        if height == 0 || width == 0 {
            return Err(ShapeError::EmptySpatial { height, width });
        }

        let pools = self.encoder.depth();
        let min = min_input_side(pools);
        if height < min || width < min {
            return Err(ShapeError::TooSmall {
                height,
                width,
                pools,
                min,
            });
        }

        Ok(())
    }

    fn features(&self, x: Tensor<B, 4>) -> Result<DecoderOutput<B>, ShapeError> {
        self.validate_input(x.dims())?;

        let (skips, x) = self.encoder.forward(x);
        let x = self.bottleneck.forward(x);

        self.decoder.forward(x, skips)
    }
}

// Written by hand: the derive would bound the plain `Module` impl on `D: AutodiffModule<B>`.
#[derive(Record)]
pub struct SegmentationModelRecord<B: Backend, D>
where
    D: burn::module::Module<B>,
{
    pub encoder: <Encoder<B> as burn::module::Module<B>>::Record,
    pub bottleneck: <ConvBlock<B> as burn::module::Module<B>>::Record,
    pub decoder: <D as burn::module::Module<B>>::Record,
    pub aux_heads: <Vec<SegmentationHead<B>> as burn::module::Module<B>>::Record,
    pub head: <SegmentationHead<B> as burn::module::Module<B>>::Record,
}

impl<B: Backend, D: Module<B>> Module<B> for SegmentationModel<B, D> {
    type Record = SegmentationModelRecord<B, D>;
    fn load_record(self, record: Self::Record) -> Self {
        Self {
            encoder: Module::<B>::load_record(self.encoder, record.encoder),
            bottleneck: Module::<B>::load_record(self.bottleneck, record.bottleneck),
            decoder: Module::<B>::load_record(self.decoder, record.decoder),
            aux_heads: Module::<B>::load_record(self.aux_heads, record.aux_heads),
            head: Module::<B>::load_record(self.head, record.head),
        }
    }
    fn into_record(self) -> Self::Record {
        Self::Record {
            encoder: Module::<B>::into_record(self.encoder),
            bottleneck: Module::<B>::into_record(self.bottleneck),
            decoder: Module::<B>::into_record(self.decoder),
            aux_heads: Module::<B>::into_record(self.aux_heads),
            head: Module::<B>::into_record(self.head),
        }
    }
    fn num_params(&self) -> usize {
        Module::<B>::num_params(&self.encoder)
            + Module::<B>::num_params(&self.bottleneck)
            + Module::<B>::num_params(&self.decoder)
            + Module::<B>::num_params(&self.aux_heads)
            + Module::<B>::num_params(&self.head)
    }
    fn visit<Visitor: ModuleVisitor<B>>(&self, visitor: &mut Visitor) {
        Module::visit(&self.encoder, visitor);
        Module::visit(&self.bottleneck, visitor);
        Module::visit(&self.decoder, visitor);
        Module::visit(&self.aux_heads, visitor);
        Module::visit(&self.head, visitor);
    }
    fn map<Mapper: ModuleMapper<B>>(self, mapper: &mut Mapper) -> Self {
        Self {
            encoder: Module::<B>::map(self.encoder, mapper),
            bottleneck: Module::<B>::map(self.bottleneck, mapper),
            decoder: Module::<B>::map(self.decoder, mapper),
            aux_heads: Module::<B>::map(self.aux_heads, mapper),
            head: Module::<B>::map(self.head, mapper),
        }
    }
    fn collect_devices(&self, devices: Devices<B>) -> Devices<B> {
        let devices = Module::<B>::collect_devices(&self.encoder, devices);
        let devices = Module::<B>::collect_devices(&self.bottleneck, devices);
        let devices = Module::<B>::collect_devices(&self.decoder, devices);
        let devices = Module::<B>::collect_devices(&self.aux_heads, devices);
        Module::<B>::collect_devices(&self.head, devices)
    }
    fn to_device(self, device: &B::Device) -> Self {
        Self {
            encoder: Module::<B>::to_device(self.encoder, device),
            bottleneck: Module::<B>::to_device(self.bottleneck, device),
            decoder: Module::<B>::to_device(self.decoder, device),
            aux_heads: Module::<B>::to_device(self.aux_heads, device),
            head: Module::<B>::to_device(self.head, device),
        }
    }
    fn fork(self, device: &B::Device) -> Self {
        Self {
            encoder: Module::<B>::fork(self.encoder, device),
            bottleneck: Module::<B>::fork(self.bottleneck, device),
            decoder: Module::<B>::fork(self.decoder, device),
            aux_heads: Module::<B>::fork(self.aux_heads, device),
            head: Module::<B>::fork(self.head, device),
        }
    }
}

impl<B: AutodiffBackend, D: AutodiffModule<B>> AutodiffModule<B> for SegmentationModel<B, D> {
    type InnerModule =
        SegmentationModel<B::InnerBackend, <D as AutodiffModule<B>>::InnerModule>;
    fn valid(&self) -> Self::InnerModule {
        SegmentationModel {
            encoder: AutodiffModule::<B>::valid(&self.encoder),
            bottleneck: AutodiffModule::<B>::valid(&self.bottleneck),
            decoder: AutodiffModule::<B>::valid(&self.decoder),
            aux_heads: AutodiffModule::<B>::valid(&self.aux_heads),
            head: AutodiffModule::<B>::valid(&self.head),
        }
    }
}

impl<B: Backend, D: Module<B>> core::fmt::Display for SegmentationModel<B, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!(
            "{0}[num_params={1}]",
            "SegmentationModel",
            self.num_params()
        ))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelConfig<DC> {
    in_channels: usize,
    out_channels: usize,
    decoder: DC,
}

impl<DC> ModelConfig<DC> {
    /// Three input channels, one output channel per head.
    pub fn new(decoder: DC) -> Self {
        Self {
            in_channels: 3,
            out_channels: 1,
            decoder,
        }
    }

    pub fn with_in_channels(mut self, in_channels: usize) -> Self {
        self.in_channels = in_channels;
        self
    }

    pub fn with_out_channels(mut self, out_channels: usize) -> Self {
        self.out_channels = out_channels;
        self
    }

    pub fn with_decoder(mut self, decoder: DC) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn decoder(&self) -> &DC {
        &self.decoder
    }

    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<SegmentationModel<B, DC::Decoder>, TopologyError>
    where
        DC: DecoderConfig<B>,
    {
        if self.in_channels == 0 {
            return Err(TopologyError::ZeroChannels {
                name: "in_channels",
            });
        }
        if self.out_channels == 0 {
            return Err(TopologyError::ZeroChannels {
                name: "out_channels",
            });
        }

        let use_batchnorm = self.decoder.use_batchnorm();
        let encoder_channels = self.decoder.encoder_channels();
        let bottleneck = ConvBlockConfig::new(
            encoder_channels[encoder_channels.len() - 1],
            self.decoder.bottleneck_channels(),
        )
        .with_use_batchnorm(use_batchnorm)
        .init(device);
        let encoder = EncoderConfig::new(self.in_channels, encoder_channels)
            .with_use_batchnorm(use_batchnorm)
            .init(device);
        let decoder = self.decoder.init(device)?;

        let aux_heads = self
            .decoder
            .auxiliary_channels()
            .into_iter()
            .map(|channels| SegmentationHeadConfig::new(channels, self.out_channels).init(device))
            .collect();
        let head =
            SegmentationHeadConfig::new(self.decoder.out_channels(), self.out_channels).init(device);

        let model = SegmentationModel {
            encoder,
            bottleneck,
            decoder,
            aux_heads,
            head,
        };

        tracing::debug!(
            decoder = core::any::type_name::<DC>(),
            schedule = ?self.decoder.schedule().widths(),
            in_channels = self.in_channels,
            out_channels = self.out_channels,
            use_batchnorm,
            outputs = model.num_outputs(),
            num_params = model.num_params(),
            "built segmentation model"
        );

        Ok(model)
    }
}

impl ModelConfig<UnetDecoderConfig> {
    pub fn unet() -> Self {
        Self::new(UnetDecoderConfig::new())
    }
}

impl ModelConfig<UnetPlusPlusDecoderConfig> {
    pub fn unet_plus_plus() -> Self {
        Self::new(UnetPlusPlusDecoderConfig::new())
    }
}

impl ModelConfig<AttentionUnetDecoderConfig> {
    pub fn attention_unet() -> Self {
        Self::new(AttentionUnetDecoderConfig::new())
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::Distribution;

    use super::*;
    use crate::{schedule::ChannelSchedule, tests::TestBackend};

    fn schedule(widths: &[usize]) -> ChannelSchedule {
        ChannelSchedule::new(widths.to_vec()).unwrap()
    }

    fn random(dims: [usize; 4]) -> Tensor<TestBackend, 4> {
        Tensor::random(dims, Distribution::Default, &Default::default())
    }

    fn small_unet() -> Unet<TestBackend> {
        ModelConfig::new(UnetDecoderConfig::new().with_schedule(schedule(&[4, 8, 16])))
            .with_in_channels(2)
            .with_out_channels(3)
            .init::<TestBackend>(&Default::default())
            .unwrap()
    }

    #[test]
    fn unet_output_matches_input_size() {
        let model = small_unet();

        let outputs = model.forward(random([2, 2, 32, 16])).unwrap();

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].dims(), [2, 3, 32, 16]);
    }

    #[test]
    fn unet_handles_sides_not_divisible_by_depth() {
        let model = small_unet();

        let output = model.predict(random([1, 2, 21, 19])).unwrap();

        assert_eq!(output.dims(), [1, 3, 21, 19]);
    }

    #[test]
    fn nested_deep_supervision_returns_one_output_per_column() {
        let model: UnetPlusPlus<TestBackend> = ModelConfig::new(
            UnetPlusPlusDecoderConfig::new()
                .with_schedule(schedule(&[2, 4, 8, 16]))
                .with_deep_supervision(true),
        )
        .init::<TestBackend>(&Default::default())
        .unwrap();

        let outputs = model.forward(random([2, 3, 16, 16])).unwrap();

        assert_eq!(model.num_outputs(), 3);
        assert_eq!(outputs.len(), 3);
        for output in outputs {
            assert_eq!(output.dims(), [2, 1, 16, 16]);
        }
    }

    #[test]
    fn nested_without_deep_supervision_returns_one_output() {
        let model: UnetPlusPlus<TestBackend> = ModelConfig::new(
            UnetPlusPlusDecoderConfig::new().with_schedule(schedule(&[2, 4, 8])),
        )
        .init::<TestBackend>(&Default::default())
        .unwrap();

        let outputs = model.forward(random([1, 3, 12, 12])).unwrap();

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].dims(), [1, 1, 12, 12]);
    }

    #[test]
    fn attention_output_matches_input_size() {
        let model: AttentionUnet<TestBackend> = ModelConfig::new(
            AttentionUnetDecoderConfig::new()
                .with_schedule(schedule(&[4, 8, 16]))
                .with_head_channels(2),
        )
        .with_in_channels(1)
        .with_out_channels(2)
        .init::<TestBackend>(&Default::default())
        .unwrap();

        let output = model.predict(random([1, 1, 20, 24])).unwrap();

        assert_eq!(output.dims(), [1, 2, 20, 24]);
    }

    #[test]
    fn rejects_wrong_channel_count() {
        let model = small_unet();

        let result = model.forward(random([1, 3, 16, 16]));

        assert_eq!(
            result.err(),
            Some(ShapeError::ChannelMismatch {
                expected: 2,
                actual: 3
            })
        );
    }

    #[test]
    fn rejects_inputs_smaller_than_pooling_depth() {
        let model = small_unet();

        assert_eq!(
            model.validate_input([1, 2, 7, 16]),
            Err(ShapeError::TooSmall {
                height: 7,
                width: 16,
                pools: 3,
                min: 8
            })
        );
        assert_eq!(
            model.validate_input([1, 2, 0, 16]),
            Err(ShapeError::EmptySpatial {
                height: 0,
                width: 16
            })
        );
        assert_eq!(model.validate_input([1, 2, 8, 8]), Ok(()));
    }

    #[test]
    fn rejects_zero_channel_configuration() {
        let result = ModelConfig::unet()
            .with_out_channels(0)
            .init::<TestBackend>(&Default::default());

        assert_eq!(
            result.err(),
            Some(TopologyError::ZeroChannels {
                name: "out_channels"
            })
        );
    }

    #[test]
    fn bottleneck_doubles_deepest_width_for_unet() {
        let model = small_unet();

        assert_eq!(model.encoder.out_channels(), vec![4, 8, 16]);
        assert_eq!(model.bottleneck.in_channels(), 16);
        assert_eq!(model.bottleneck.out_channels(), 32);
    }

    #[test]
    fn folded_variants_use_deepest_level_as_bottleneck() {
        let model: AttentionUnet<TestBackend> = ModelConfig::new(
            AttentionUnetDecoderConfig::new().with_schedule(schedule(&[4, 8, 16])),
        )
        .init::<TestBackend>(&Default::default())
        .unwrap();

        assert_eq!(model.encoder.out_channels(), vec![4, 8]);
        assert_eq!(model.bottleneck.in_channels(), 8);
        assert_eq!(model.bottleneck.out_channels(), 16);
    }

    #[test]
    fn repeated_forward_calls_agree() {
        let model = small_unet();
        let x = random([1, 2, 16, 16]);

        let first = model.predict(x.clone()).unwrap();
        let second = model.predict(x).unwrap();

        first.into_data().assert_eq(&second.into_data(), true);
    }

    #[test]
    fn defaults_match_presets() {
        let config = ModelConfig::attention_unet();

        assert_eq!(config.in_channels(), 3);
        assert_eq!(config.out_channels(), 1);
        assert_eq!(
            DecoderConfig::<TestBackend>::schedule(config.decoder()).widths(),
            &[64, 128, 256, 512, 1024]
        );
    }

    #[test]
    fn batchnorm_flag_reaches_every_stage() {
        let build = |use_batchnorm| {
            ModelConfig::new(
                UnetDecoderConfig::new()
                    .with_schedule(schedule(&[4, 8]))
                    .with_use_batchnorm(use_batchnorm),
            )
            .init::<TestBackend>(&Default::default())
            .unwrap()
        };
        let with_norm = build(true);
        let without_norm = build(false);

        assert!(with_norm.encoder.num_params() > without_norm.encoder.num_params());
        assert!(with_norm.bottleneck.num_params() > without_norm.bottleneck.num_params());
        assert!(with_norm.decoder.num_params() > without_norm.decoder.num_params());

        let output = without_norm.predict(random([1, 3, 8, 8])).unwrap();
        assert_eq!(output.dims(), [1, 1, 8, 8]);
    }
}
