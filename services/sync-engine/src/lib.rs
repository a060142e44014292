pub mod bounded_contexts;
pub mod config;
pub mod shared;
