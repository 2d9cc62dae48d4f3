pub mod pipeline;
pub mod scanner;
