pub mod dsp;
pub mod engine;
pub mod merge;
pub mod separator;
pub mod transcriber;
