//! Backend module - synthesis provider trait and HTTP client

pub mod http_backend;
pub mod traits;

pub use http_backend::HttpSynthesizer;
pub use traits::{GenerationRequest, GenerationSettings, ImageSynthesizer};
