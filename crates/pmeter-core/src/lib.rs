pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod pattern;
pub mod results;

pub use error::PmeterError;
