use crate::types::enums::{Comparator, GateMetric, IssueCategory, Severity};
use crate::types::ids::{ProjectId, WorkspaceId};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CreateGateInput {
    pub workspace_id: WorkspaceId,
    pub project_id: Option<ProjectId>,
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
    pub conditions: Vec<ConditionInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConditionInput {
    pub metric: GateMetric,
    pub severity: Option<Severity>,
    pub category: Option<IssueCategory>,
    pub comparator: Comparator,
    pub threshold: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}
