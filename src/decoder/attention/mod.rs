mod decoder;
mod gate;

pub use decoder::*;
pub use gate::*;
