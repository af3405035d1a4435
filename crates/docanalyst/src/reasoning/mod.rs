//! Adapter to an external reasoning service.
//!
//! The pipeline only depends on [`crate::pipeline::Stage`]; this module
//! provides the production stages backed by an OpenAI-compatible chat API.

pub mod client;
pub mod stages;

pub use client::{ChatClient, CompletionClient};
pub use stages::{AnalyzeStage, VerifyStage};
