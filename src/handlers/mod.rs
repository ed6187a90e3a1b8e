pub mod plans;
pub mod public;
