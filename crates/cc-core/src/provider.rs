use crate::codecrow::CodeCrow;
use crate::error::CodeCrowError;
use crate::store::Store;

/// Opens a short-lived [`CodeCrow`] handle. Async code opens one per step
/// and drops it before the next await, so no storage handle is held across
/// a suspension point.
pub trait CoreProvider: Send + Sync + 'static {
    type Store: Store;

    fn open(&self) -> Result<CodeCrow<Self::Store>, CodeCrowError>;
}
