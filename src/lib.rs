// Library interface for infermate
#![allow(dead_code)]

pub mod cli;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod llm;

// Re-export commonly used types
pub use config::Config;
pub use error::{InferError, Result};
