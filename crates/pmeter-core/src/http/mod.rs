pub mod client;
pub mod request;

pub use client::HttpClientBuilder;
pub use request::{categorize, execute, TargetRequest};
