pub mod cache;
pub mod config;
pub mod error;
pub mod form;
pub mod generation;
pub mod principal;
pub mod progress;
pub mod quota;
pub mod recommendation;

// Re-export common error type
pub use error::RecsError;
