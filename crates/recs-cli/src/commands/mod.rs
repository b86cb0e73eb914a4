pub mod config;
pub mod generate;
pub mod quota;
mod session;
