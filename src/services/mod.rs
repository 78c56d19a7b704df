pub mod commands;
pub mod pipeline;

pub use pipeline::Pipeline;
