pub mod engine;
pub mod kernels;
