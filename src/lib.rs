pub mod conv2drelu;
pub mod conv_block;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod schedule;
pub mod segmentation_head;

mod model;
pub use model::*;

pub use error::{SegmentationError, ShapeError, TopologyError};
pub use schedule::ChannelSchedule;
