use crate::error::{AnalysisError, JobError, RagError};
use crate::types::{AnalysisStatus, DeltaStatus, JobStatus};

pub fn validate_job_transition(from: JobStatus, to: JobStatus) -> Result<(), JobError> {
    use JobStatus::{Cancelled, Completed, Failed, Pending, Queued, Running, Skipped, Waiting};

    if from.is_terminal() {
        return Err(JobError::InvalidTransition { from, to });
    }
    if from == to {
        return Ok(());
    }

    let valid = match (from, to) {
        (Pending, Queued | Running) => true,
        (Queued, Running) => true,
        (Running, Waiting) | (Waiting, Running) => true,
        (Running, Completed) => true,
        (Pending | Queued | Running | Waiting, Cancelled | Failed | Skipped) => true,
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(JobError::InvalidTransition { from, to })
    }
}

pub fn validate_delta_transition(from: DeltaStatus, to: DeltaStatus) -> Result<(), RagError> {
    use DeltaStatus::{Archived, Creating, Failed, Ready, Stale};

    let valid = match (from, to) {
        (Creating, Ready | Failed | Stale) => true,
        (Ready, Stale | Archived) => true,
        (Stale | Failed, Archived) => true,
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(RagError::InvalidTransition { from, to })
    }
}

pub fn validate_analysis_transition(
    from: AnalysisStatus,
    to: AnalysisStatus,
) -> Result<(), AnalysisError> {
    match (from, to) {
        (AnalysisStatus::Accepted, AnalysisStatus::Rejected) => Ok(()),
        _ => Err(AnalysisError::InvalidTransition { from, to }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_never_returns_to_queue() {
        assert!(validate_job_transition(JobStatus::Running, JobStatus::Pending).is_err());
        assert!(validate_job_transition(JobStatus::Running, JobStatus::Queued).is_err());
        assert!(validate_job_transition(JobStatus::Waiting, JobStatus::Queued).is_err());
    }

    #[test]
    fn test_terminal_states_are_immutable() {
        for terminal in [
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
            JobStatus::Skipped,
        ] {
            assert!(validate_job_transition(terminal, JobStatus::Running).is_err());
            assert!(validate_job_transition(terminal, terminal).is_err());
        }
    }

    #[test]
    fn test_lock_wait_round_trip() {
        assert!(validate_job_transition(JobStatus::Running, JobStatus::Waiting).is_ok());
        assert!(validate_job_transition(JobStatus::Waiting, JobStatus::Running).is_ok());
        assert!(validate_job_transition(JobStatus::Waiting, JobStatus::Completed).is_err());
    }

    #[test]
    fn test_delta_stale_is_dead_end() {
        assert!(validate_delta_transition(DeltaStatus::Stale, DeltaStatus::Ready).is_err());
        assert!(validate_delta_transition(DeltaStatus::Stale, DeltaStatus::Archived).is_ok());
        assert!(validate_delta_transition(DeltaStatus::Creating, DeltaStatus::Stale).is_ok());
        assert!(validate_delta_transition(DeltaStatus::Archived, DeltaStatus::Ready).is_err());
    }

    #[test]
    fn test_rejection_is_one_way() {
        assert!(
            validate_analysis_transition(AnalysisStatus::Accepted, AnalysisStatus::Rejected)
                .is_ok()
        );
        assert!(
            validate_analysis_transition(AnalysisStatus::Rejected, AnalysisStatus::Accepted)
                .is_err()
        );
    }
}
