pub mod analysis_repo;
pub mod event_repo;
pub mod gate_repo;
pub mod job_repo;
pub mod lock_repo;
pub mod project_repo;
pub mod rag_repo;
pub mod rate_limit_repo;
pub mod schema;
pub mod store;
pub mod util;

pub use crate::store::{DbProvider, DbStore};
