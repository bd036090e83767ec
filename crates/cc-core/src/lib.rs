pub mod branch_patterns;
pub mod chunker;
pub mod codecrow;
pub mod collaborators;
pub mod commands;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod indexer;
pub mod lock;
pub mod pipeline;
pub mod provider;
pub mod quality_gate;
pub mod report;
pub mod retry;
pub mod store;
pub mod validation;
pub mod webhook;

pub mod analyses;
pub mod events;
pub mod gates;
pub mod jobs;
pub mod locks;
pub mod projects;
pub mod rag;
pub mod rate_limits;

pub mod types;

pub use crate::codecrow::{CodeCrow, RequestContext};
pub use crate::error::CodeCrowError;
pub use crate::pipeline::{Orchestrator, PipelineOutcome, RouteDecision};
pub use crate::provider::CoreProvider;
pub use crate::store::Store;
