//! Gateway module - request orchestration

pub mod generator;

pub use generator::{
    BatchItem, BatchOptions, BatchReport, CacheStatus, GenerateOptions, GenerationOutcome,
    GenerationOverrides, Generator, ItemFailure,
};
