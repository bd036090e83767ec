use crate::error::GateError;
use crate::types::{ConditionId, CreateGateInput, GateId, ProjectId, QualityGate, WorkspaceId};

pub trait GateRepository {
    fn add(&self, input: CreateGateInput) -> Result<QualityGate, GateError>;
    fn get(&self, id: &GateId) -> Result<Option<QualityGate>, GateError>;
    fn list(&self, workspace_id: &WorkspaceId) -> Result<Vec<QualityGate>, GateError>;
    /// Gate bound to the project, else the workspace default.
    fn effective_for_project(
        &self,
        workspace_id: &WorkspaceId,
        project_id: &ProjectId,
    ) -> Result<Option<QualityGate>, GateError>;
    /// Marks the gate default and clears the flag on every other gate of the
    /// workspace.
    fn set_default(&self, id: &GateId) -> Result<QualityGate, GateError>;
    fn set_condition_enabled(
        &self,
        gate_id: &GateId,
        condition_id: &ConditionId,
        enabled: bool,
    ) -> Result<QualityGate, GateError>;
    fn remove(&self, id: &GateId) -> Result<(), GateError>;
}
