pub mod engine;
pub mod error;
pub mod execution;
pub mod tree;
