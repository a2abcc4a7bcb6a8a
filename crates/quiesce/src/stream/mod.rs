//! Byte streams whose blocking reads and writes are visible to the bubble

mod line;
mod pipe;

pub use line::LineReader;
pub use pipe::{pipe, pipe_with_capacity, PipeReader, PipeWriter};
