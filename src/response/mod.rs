//! Response handling module - base64 payloads and image files

pub mod base64;
pub mod file;

pub use file::{detect_image_format, FileHandler};
