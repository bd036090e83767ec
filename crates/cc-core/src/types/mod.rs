pub mod analysis;
pub mod enums;
pub mod event;
pub mod gate;
pub mod ids;
pub mod io;
pub mod job;
pub mod project;
pub mod rag;
pub mod vcs;
pub mod webhook;

pub use analysis::*;
pub use enums::*;
pub use gate::*;
pub use ids::*;
pub use io::*;
pub use job::*;
pub use project::*;
pub use rag::*;
pub use vcs::*;
pub use webhook::*;
