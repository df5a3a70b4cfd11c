pub mod buffer;
pub mod parse;
pub mod stream;
