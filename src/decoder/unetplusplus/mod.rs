mod decoder;
mod widths;

pub use decoder::*;
pub use widths::*;
