use crate::types::enums::{AnalysisResult, DeltaStatus, JobStatus};
use crate::types::gate::QualityGate;
use crate::types::ids::{AnalysisId, GateId, JobId, ProjectId};
use crate::types::job::Job;
use crate::types::project::ProjectBinding;
use crate::types::rag::RagDeltaIndex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", content = "payload")]
pub enum EventBody {
    ProjectRegistered {
        project: ProjectBinding,
    },
    ProjectActivationChanged {
        project_id: ProjectId,
        active: bool,
    },

    JobCreated {
        job: Job,
    },
    JobStatusChanged {
        job: Job,
        from: JobStatus,
        to: JobStatus,
    },

    AnalysisStored {
        analysis_id: AnalysisId,
        project_id: ProjectId,
        pr_number: Option<i64>,
        pr_version: Option<i64>,
        result: AnalysisResult,
    },
    AnalysisRejected {
        analysis_id: AnalysisId,
    },
    IssuesResolved {
        analysis_id: AnalysisId,
        count: u64,
    },
    AnalysisServedFromCache {
        job_id: JobId,
        analysis_id: AnalysisId,
    },

    GateAdded {
        gate: QualityGate,
    },
    GateUpdated {
        gate: QualityGate,
    },
    GateRemoved {
        gate_id: GateId,
    },

    BranchIndexUpdated {
        project_id: ProjectId,
        branch: String,
        commit_hash: String,
    },
    BranchIndexDeleted {
        project_id: ProjectId,
        branch: String,
    },
    DeltaCreated {
        delta: RagDeltaIndex,
    },
    DeltaStatusChanged {
        delta: RagDeltaIndex,
        from: DeltaStatus,
        to: DeltaStatus,
    },
    DeltasMarkedStale {
        project_id: ProjectId,
        base_branch: String,
        count: u64,
    },
    DeltasArchived {
        count: u64,
    },
    DeltasPurged {
        count: u64,
    },
}
