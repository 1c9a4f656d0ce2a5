use serde::{Deserialize, Serialize};

use crate::error::TopologyError;

/// Per-level feature widths, shallowest level first.
///
/// A schedule always has at least two levels and is strictly increasing, so
/// every decoder level can mirror an encoder level and the deepest stage is
/// always wider than the one above it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<usize>", into = "Vec<usize>")]
pub struct ChannelSchedule(Vec<usize>);

impl ChannelSchedule {
    pub const MIN_LEVELS: usize = 2;

    pub fn new(widths: Vec<usize>) -> Result<Self, TopologyError> {
        if widths.len() < Self::MIN_LEVELS {
            return Err(TopologyError::ScheduleTooShort {
                len: widths.len(),
                min: Self::MIN_LEVELS,
            });
        }

        for (level, &width) in widths.iter().enumerate() {
            if width == 0 {
                return Err(TopologyError::ZeroWidth { level });
            }
            if level > 0 && width <= widths[level - 1] {
                return Err(TopologyError::NotIncreasing {
                    level,
                    previous: widths[level - 1],
                    width,
                });
            }
        }

        Ok(Self(widths))
    }

    /// `[64, 128, 256, 512]`
    pub fn unet() -> Self {
        Self(vec![64, 128, 256, 512])
    }

    /// `[32, 64, 128, 256, 512]`
    pub fn unet_plus_plus() -> Self {
        Self(vec![32, 64, 128, 256, 512])
    }

    /// `[64, 128, 256, 512, 1024]`
    pub fn attention_unet() -> Self {
        Self(vec![64, 128, 256, 512, 1024])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn widths(&self) -> &[usize] {
        &self.0
    }

    pub fn level(&self, level: usize) -> usize {
        self.0[level]
    }

    pub fn shallowest(&self) -> usize {
        self.0[0]
    }

    pub fn deepest(&self) -> usize {
        self.0[self.0.len() - 1]
    }

    /// Every level except the deepest one, for topologies that fold the
    /// deepest level into the bottleneck.
    pub fn encoder_levels(&self) -> &[usize] {
        &self.0[..self.0.len() - 1]
    }
}

impl TryFrom<Vec<usize>> for ChannelSchedule {
    type Error = TopologyError;

    fn try_from(widths: Vec<usize>) -> Result<Self, Self::Error> {
        Self::new(widths)
    }
}

impl From<ChannelSchedule> for Vec<usize> {
    fn from(schedule: ChannelSchedule) -> Self {
        schedule.0
    }
}

/// Smallest height/width that still leaves at least one pixel after `pools`
/// rounds of 2x pooling.
pub fn min_input_side(pools: usize) -> usize {
    1 << pools
}
