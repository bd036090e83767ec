use crate::types::enums::{AnalysisResult, Comparator, GateMetric, IssueCategory, Severity};
use crate::types::ids::{ConditionId, GateId, ProjectId, WorkspaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QualityGate {
    pub id: GateId,
    pub workspace_id: WorkspaceId,
    pub project_id: Option<ProjectId>,
    pub name: String,
    pub is_default: bool,
    pub conditions: Vec<QualityGateCondition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QualityGateCondition {
    pub id: ConditionId,
    pub metric: GateMetric,
    pub severity: Option<Severity>,
    pub category: Option<IssueCategory>,
    pub comparator: Comparator,
    pub threshold: i64,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConditionOutcome {
    pub condition_id: ConditionId,
    pub observed: i64,
    pub comparator: Comparator,
    pub threshold: i64,
    pub violated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GateEvaluation {
    pub result: AnalysisResult,
    pub outcomes: Vec<ConditionOutcome>,
}
