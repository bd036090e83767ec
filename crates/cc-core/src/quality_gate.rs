//! Pure quality-gate evaluation.
//!
//! The verdict depends only on the issue set and the condition set, so the
//! same analysis can be re-judged after a gate edit without re-running AI.

use crate::types::{
    AnalysisResult, Comparator, ConditionId, ConditionInput, ConditionOutcome, GateEvaluation,
    GateMetric, IssueCategory, QualityGateCondition, Severity,
};

/// The slice of an issue the evaluator reads.
pub trait GateSubject {
    fn severity(&self) -> Severity;
    fn category(&self) -> IssueCategory;
}

impl GateSubject for crate::types::CodeAnalysisIssue {
    fn severity(&self) -> Severity {
        self.severity
    }

    fn category(&self) -> IssueCategory {
        self.category
    }
}

impl GateSubject for crate::types::AiIssue {
    fn severity(&self) -> Severity {
        self.severity
    }

    fn category(&self) -> IssueCategory {
        self.category
    }
}

/// `Skipped` when no enabled condition exists; otherwise `Failed` as soon as
/// any enabled condition is violated.
pub fn evaluate<I: GateSubject>(issues: &[I], conditions: &[QualityGateCondition]) -> GateEvaluation {
    let outcomes: Vec<ConditionOutcome> = conditions
        .iter()
        .filter(|condition| condition.enabled)
        .map(|condition| {
            let observed = observe(issues, condition);
            ConditionOutcome {
                condition_id: condition.id.clone(),
                observed,
                comparator: condition.comparator,
                threshold: condition.threshold,
                violated: condition.comparator.holds(observed, condition.threshold),
            }
        })
        .collect();

    let result = if outcomes.is_empty() {
        AnalysisResult::Skipped
    } else if outcomes.iter().any(|outcome| outcome.violated) {
        AnalysisResult::Failed
    } else {
        AnalysisResult::Passed
    };

    GateEvaluation { result, outcomes }
}

fn observe<I: GateSubject>(issues: &[I], condition: &QualityGateCondition) -> i64 {
    let (severity, category) = match condition.metric {
        GateMetric::TotalIssues => (None, None),
        GateMetric::IssuesBySeverity | GateMetric::IssuesByCategory => {
            (condition.severity, condition.category)
        }
    };
    let count = issues
        .iter()
        .filter(|issue| severity.is_none_or(|wanted| issue.severity() == wanted))
        .filter(|issue| category.is_none_or(|wanted| issue.category() == wanted))
        .count();
    i64::try_from(count).unwrap_or(i64::MAX)
}

/// Conditions of the gate auto-provisioned for a workspace with none:
/// fail on any HIGH or any MEDIUM issue.
pub fn default_conditions() -> Vec<ConditionInput> {
    [Severity::High, Severity::Medium]
        .into_iter()
        .map(|severity| ConditionInput {
            metric: GateMetric::IssuesBySeverity,
            severity: Some(severity),
            category: None,
            comparator: Comparator::Gt,
            threshold: 0,
            enabled: true,
        })
        .collect()
}

/// Materializes condition inputs for evaluation outside storage.
pub fn conditions_from_inputs(inputs: &[ConditionInput]) -> Vec<QualityGateCondition> {
    inputs
        .iter()
        .map(|input| QualityGateCondition {
            id: ConditionId::generate(),
            metric: input.metric,
            severity: input.severity,
            category: input.category,
            comparator: input.comparator,
            threshold: input.threshold,
            enabled: input.enabled,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AiIssue;

    fn issue(severity: Severity, category: IssueCategory) -> AiIssue {
        AiIssue {
            category,
            severity,
            file_path: "src/lib.rs".to_string(),
            line: Some(1),
            title: "finding".to_string(),
            suggested_fix: None,
            vcs_author: None,
        }
    }

    fn condition(
        metric: GateMetric,
        severity: Option<Severity>,
        category: Option<IssueCategory>,
        comparator: Comparator,
        threshold: i64,
    ) -> QualityGateCondition {
        QualityGateCondition {
            id: ConditionId::generate(),
            metric,
            severity,
            category,
            comparator,
            threshold,
            enabled: true,
        }
    }

    fn three_medium() -> Vec<AiIssue> {
        vec![
            issue(Severity::Medium, IssueCategory::Style),
            issue(Severity::Medium, IssueCategory::Performance),
            issue(Severity::Medium, IssueCategory::Security),
        ]
    }

    #[test]
    fn test_no_conditions_skips() {
        let evaluation = evaluate(&three_medium(), &[]);
        assert_eq!(evaluation.result, AnalysisResult::Skipped);
    }

    #[test]
    fn test_high_only_gate_passes_medium_issues() {
        let conditions = vec![condition(
            GateMetric::IssuesBySeverity,
            Some(Severity::High),
            None,
            Comparator::Gt,
            0,
        )];
        let evaluation = evaluate(&three_medium(), &conditions);
        assert_eq!(evaluation.result, AnalysisResult::Passed);
        assert_eq!(evaluation.outcomes[0].observed, 0);
    }

    #[test]
    fn test_default_gate_fails_medium_issues() {
        let conditions = conditions_from_inputs(&default_conditions());
        let evaluation = evaluate(&three_medium(), &conditions);
        assert_eq!(evaluation.result, AnalysisResult::Failed);
        assert!(!evaluation.outcomes[0].violated);
        assert!(evaluation.outcomes[1].violated);
        assert_eq!(evaluation.outcomes[1].observed, 3);
    }

    #[test]
    fn test_disabled_condition_never_counts() {
        let mut disabled = condition(
            GateMetric::TotalIssues,
            None,
            None,
            Comparator::Gte,
            1,
        );
        disabled.enabled = false;
        let active = condition(
            GateMetric::IssuesBySeverity,
            Some(Severity::High),
            None,
            Comparator::Gt,
            0,
        );

        let with_disabled = evaluate(&three_medium(), &[active.clone(), disabled.clone()]);
        disabled.threshold = 0;
        disabled.comparator = Comparator::Ne;
        let toggled = evaluate(&three_medium(), &[active, disabled]);

        assert_eq!(with_disabled.result, AnalysisResult::Passed);
        assert_eq!(with_disabled.result, toggled.result);
        assert_eq!(with_disabled.outcomes.len(), 1);
    }

    #[test]
    fn test_evaluation_is_repeatable() {
        let conditions = conditions_from_inputs(&default_conditions());
        let issues = three_medium();
        assert_eq!(evaluate(&issues, &conditions), evaluate(&issues, &conditions));
    }

    #[test]
    fn test_category_filter_with_severity() {
        let issues = vec![
            issue(Severity::High, IssueCategory::Security),
            issue(Severity::Low, IssueCategory::Security),
            issue(Severity::High, IssueCategory::Style),
        ];
        let conditions = vec![condition(
            GateMetric::IssuesByCategory,
            Some(Severity::High),
            Some(IssueCategory::Security),
            Comparator::Gte,
            2,
        )];
        let evaluation = evaluate(&issues, &conditions);
        assert_eq!(evaluation.outcomes[0].observed, 1);
        assert_eq!(evaluation.result, AnalysisResult::Passed);
    }
}
