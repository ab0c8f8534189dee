use thiserror::Error;

use crate::domain::employee::EmployeeId;
use crate::domain::request::{ApprovalPhase, RequestId, RequestKind};
use crate::domain::rule::RuleId;
use crate::domain::stage::StageId;

/// Failure surfaced by a store implementation. Kept free of any driver
/// type so core stays persistence-agnostic; `tripflow-db` maps
/// `sqlx::Error` into `Backend`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("stage `{stage_id}` already carries a decision")]
    Conflict { stage_id: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("no approval rule configured for {kind:?}/{phase:?} submissions by `{employee_id}`")]
    RuleNotConfigured { kind: RequestKind, phase: ApprovalPhase, employee_id: String },
    #[error("rule `{rule_id}` resolves to no eligible approver: {detail}")]
    ApproverNotFound { rule_id: String, detail: String },
    #[error("no approval chain exists for request `{request_id:?}` in phase {phase:?}")]
    ChainNotFound { request_id: RequestId, phase: ApprovalPhase },
    #[error("approval stage `{stage_id:?}` does not exist")]
    StageNotFound { stage_id: StageId },
    #[error("stage `{stage_id:?}` has no earlier stage to return to")]
    NoPriorStage { stage_id: StageId },
    #[error("employee `{employee_id:?}` is not in the directory")]
    EmployeeNotFound { employee_id: EmployeeId },
    #[error("rule `{rule_id:?}` is referenced by the chain but no longer configured")]
    RuleMissing { rule_id: RuleId },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Whether the operation failed before any write could happen,
    /// because the configuration or directory cannot produce a next
    /// approver.
    pub fn is_resolution_failure(&self) -> bool {
        matches!(
            self,
            Self::RuleNotConfigured { .. }
                | Self::ApproverNotFound { .. }
                | Self::EmployeeNotFound { .. }
                | Self::RuleMissing { .. }
        )
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::RuleNotConfigured { .. } => {
                "No approval route is configured for this request. Contact an administrator."
            }
            Self::ApproverNotFound { .. } | Self::EmployeeNotFound { .. } => {
                "No eligible approver could be determined for this request."
            }
            Self::ChainNotFound { .. } | Self::StageNotFound { .. } | Self::RuleMissing { .. } => {
                "The approval record could not be found. The request may have been reorganized."
            }
            Self::NoPriorStage { .. } => {
                "This request is already at its first step and cannot be sent further back."
            }
            Self::Store(StoreError::Conflict { .. }) => {
                "Another approver acted on this step first. Reload and review the latest state."
            }
            Self::Store(_) => "The service is temporarily unavailable. Please retry shortly.",
        }
    }
}
