pub mod frames;
pub mod gc;
pub mod monitor;
pub mod parse;
pub mod samplers;
