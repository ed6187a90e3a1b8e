pub mod catalog;
pub mod plan;
pub mod sample;

pub use catalog::*;
pub use plan::*;
pub use sample::*;
