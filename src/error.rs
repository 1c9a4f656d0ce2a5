use thiserror::Error;

/// Contract violations detected while building a topology.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("channel schedule needs at least {min} levels, got {len}")]
    ScheduleTooShort { len: usize, min: usize },

    #[error("channel schedule level {level} has zero width")]
    ZeroWidth { level: usize },

    #[error("channel schedule must be strictly increasing: level {level} has width {width} after {previous}")]
    NotIncreasing {
        level: usize,
        previous: usize,
        width: usize,
    },

    #[error("'{name}' must be positive")]
    ZeroChannels { name: &'static str },

    /// A nested decoder node was declared with a different input width than
    /// the one its concatenated inputs produce.
    #[error("node x[{depth}][{column}] expects {expected} input channels, but was declared with {actual}")]
    NodeWidthMismatch {
        depth: usize,
        column: usize,
        expected: usize,
        actual: usize,
    },
}

/// Malformed input handed to a forward pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("expected input with {expected} channels, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },

    #[error("input spatial size must be positive, got {height}x{width}")]
    EmptySpatial { height: usize, width: usize },

    #[error("input {height}x{width} does not survive {pools} pooling levels (minimum side {min})")]
    TooSmall {
        height: usize,
        width: usize,
        pools: usize,
        min: usize,
    },

    /// A decoder was handed a skip cache that does not have one entry per level.
    #[error("decoder expects {expected} skip connections, got {actual}")]
    SkipCountMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum SegmentationError {
    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Shape(#[from] ShapeError),
}
