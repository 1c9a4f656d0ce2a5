use burn::prelude::*;

use crate::{
    conv_block::{ConvBlock, ConvBlockConfig},
    decoder::{
        check_skip_count, match_spatial, upsample2x, Decoder, DecoderConfig, DecoderOutput,
    },
    encoder::SkipCache,
    error::{ShapeError, TopologyError},
    schedule::ChannelSchedule,
};

use super::widths::NodeWidthTable;

/// A nested decoder node `x[i][j]`.
#[derive(Module, Debug)]
pub struct NestedNode<B: Backend> {
    block: ConvBlock<B>,
}

impl<B: Backend> NestedNode<B> {
    /// `same_depth` holds `x[i][0..j]`, `deeper` is `x[i + 1][j - 1]`.
    pub fn forward(&self, same_depth: &[Tensor<B, 4>], deeper: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match_spatial(upsample2x(deeper), &same_depth[0]);

        let mut inputs = same_depth.to_vec();
        inputs.push(x);

        self.block.forward(Tensor::cat(inputs, 1))
    }

    pub fn in_channels(&self) -> usize {
        self.block.in_channels()
    }

    pub fn out_channels(&self) -> usize {
        self.block.out_channels()
    }
}

/// Recomputes the input width of every node from the maps that actually feed
/// it: the schedule for `x[i][0]`, the built blocks for everything else.
fn check_lattice<B: Backend>(
    schedule: &ChannelSchedule,
    columns: &[Vec<NestedNode<B>>],
) -> Result<(), TopologyError> {
    let width = |depth: usize, column: usize| match column {
        0 => schedule.level(depth),
        _ => columns[column - 1][depth].out_channels(),
    };

    for (column, nodes) in (1..).zip(columns) {
        for (depth, node) in nodes.iter().enumerate() {
            let same_depth: usize = (0..column).map(|k| width(depth, k)).sum();
            let expected = same_depth + width(depth + 1, column - 1);

            let actual = node.in_channels();
            if expected != actual {
                return Err(TopologyError::NodeWidthMismatch {
                    depth,
                    column,
                    expected,
                    actual,
                });
            }
        }
    }

    Ok(())
}

/// UNet++ expanding path: a triangular lattice where every node fuses all
/// previously computed nodes at its depth with the next-deeper node.
#[derive(Module, Debug)]
pub struct UnetPlusPlusDecoder<B: Backend> {
    /// `columns[j - 1][i]` is node `x[i][j]`.
    columns: Vec<Vec<NestedNode<B>>>,
    deep_supervision: bool,
}

impl<B: Backend> UnetPlusPlusDecoder<B> {
    pub fn num_nodes(&self) -> usize {
        self.columns.iter().map(Vec::len).sum()
    }
}

impl<B: Backend> Decoder for UnetPlusPlusDecoder<B> {
    type Backend = B;
    fn forward(
        &self,
        deepest: Tensor<B, 4>,
        skips: SkipCache<B>,
    ) -> Result<DecoderOutput<B>, ShapeError> {
        check_skip_count(&skips, self.columns.len())?;

        // grid[i][j] = x[i][j]; dropped as a whole once the outputs are taken.
        let mut grid: Vec<Vec<Tensor<B, 4>>> = skips
            .iter()
            .cloned()
            .chain(std::iter::once(deepest))
            .map(|x| vec![x])
            .collect();

        for (column, nodes) in (1..).zip(&self.columns) {
            for (depth, node) in nodes.iter().enumerate().rev() {
                let deeper = grid[depth + 1][column - 1].clone();
                let x = node.forward(&grid[depth], deeper);
                grid[depth].push(x);
            }
        }

        // x[0][0..L]: the encoder map, then one node per column.
        let mut top = grid.swap_remove(0);
        let output = top.remove(top.len() - 1);
        let auxiliary = if self.deep_supervision {
            top.split_off(1)
        } else {
            Vec::new()
        };

        Ok(DecoderOutput { auxiliary, output })
    }
}

#[derive(Config, Debug)]
pub struct UnetPlusPlusDecoderConfig {
    #[config(default = "ChannelSchedule::unet_plus_plus()")]
    schedule: ChannelSchedule,

    /// Also emit `x[0][1..L - 1]` as auxiliary outputs next to `x[0][L - 1]`.
    #[config(default = false)]
    deep_supervision: bool,

    #[config(default = true)]
    use_batchnorm: bool,
}

impl<B: Backend> DecoderConfig<B> for UnetPlusPlusDecoderConfig {
    type Decoder = UnetPlusPlusDecoder<B>;
    fn init(&self, device: &B::Device) -> Result<UnetPlusPlusDecoder<B>, TopologyError> {
        let table = NodeWidthTable::from_schedule(&self.schedule);

        let columns = (1..=table.columns())
            .map(|column| {
                let mut nodes: Vec<NestedNode<B>> = table
                    .column(column)
                    .map(|node| NestedNode {
                        block: ConvBlockConfig::new(node.in_channels, node.out_channels)
                            .with_use_batchnorm(self.use_batchnorm)
                            .init(device),
                    })
                    .collect();
                // The table lists each column deepest first.
                nodes.reverse();
                nodes
            })
            .collect::<Vec<_>>();

        check_lattice(&self.schedule, &columns)?;

        tracing::debug!(
            schedule = ?self.schedule.widths(),
            nodes = table.len(),
            deep_supervision = self.deep_supervision,
            "built nested decoder"
        );

        Ok(UnetPlusPlusDecoder {
            columns,
            deep_supervision: self.deep_supervision,
        })
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
        self.schedule.shallowest()
    }
    fn auxiliary_channels(&self) -> Vec<usize> {
        if self.deep_supervision {
            vec![self.schedule.shallowest(); self.schedule.len() - 2]
        } else {
            Vec::new()
        }
    }
    fn use_batchnorm(&self) -> bool {
        self.use_batchnorm
    }
}
