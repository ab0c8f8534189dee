use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::employee::{ApprovalLineOrdinal, EmployeeId, RoleId, UnitId};
use crate::domain::request::{ApprovalPhase, RequestId, RequestKind};
use crate::domain::rule::RuleId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageId(pub String);

/// Remark stamped on the stage that records the submitter's own
/// submission. Decisions taken on a stage carrying it are treated as
/// having traveled back to the request's origin.
pub const ORIGIN_REMARK: &str = "submitter";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Approved,
    RevisionRequested,
    Rejected,
    Canceled,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::RevisionRequested => "revision_requested",
            Self::Rejected => "rejected",
            Self::Canceled => "canceled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::str::FromStr for StageStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "revision_requested" => Ok(Self::RevisionRequested),
            "rejected" => Ok(Self::Rejected),
            "canceled" => Ok(Self::Canceled),
            other => Err(format!(
                "unknown stage status `{other}` (expected pending|approved|revision_requested|rejected|canceled)"
            )),
        }
    }
}

/// Decision an approver can record on a pending stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionCode {
    Approved,
    RevisionRequested,
    Rejected,
    Canceled,
}

impl DecisionCode {
    pub fn stage_status(self) -> StageStatus {
        match self {
            Self::Approved => StageStatus::Approved,
            Self::RevisionRequested => StageStatus::RevisionRequested,
            Self::Rejected => StageStatus::Rejected,
            Self::Canceled => StageStatus::Canceled,
        }
    }
}

/// How a multi-assignee stage completes: first decision wins, or every
/// assignee must act.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupMode {
    Any,
    All,
}

impl GroupMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::All => "all",
        }
    }
}

impl std::str::FromStr for GroupMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "any" => Ok(Self::Any),
            "all" => Ok(Self::All),
            other => Err(format!("unknown group mode `{other}` (expected any|all)")),
        }
    }
}

/// One employee authorized to act on a stage. Written in bulk with the
/// stage, in the same transaction; never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageAssignee {
    pub id: String,
    pub stage_id: StageId,
    pub employee_id: EmployeeId,
    pub created_by: EmployeeId,
    pub created_at: DateTime<Utc>,
}

/// One recorded step in an approval chain. Immutable once created except
/// for the status and approval audit fields, which Approve sets exactly
/// once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStage {
    pub id: StageId,
    pub request_id: RequestId,
    pub kind: RequestKind,
    pub phase: ApprovalPhase,
    pub rule_id: Option<RuleId>,
    pub role_id: Option<RoleId>,
    pub unit_id: Option<UnitId>,
    pub note: Option<String>,
    pub remark: Option<String>,
    pub status: StageStatus,
    pub revises_stage_id: Option<StageId>,
    pub line_ordinal: Option<ApprovalLineOrdinal>,
    pub group_mode: Option<GroupMode>,
    pub created_by: EmployeeId,
    pub created_at: DateTime<Utc>,
    pub approved_by: Option<EmployeeId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub assignees: Vec<StageAssignee>,
}

impl ApprovalStage {
    /// Whether this stage is the submitter's own record of the
    /// submission.
    pub fn is_origin(&self) -> bool {
        self.remark.as_deref() == Some(ORIGIN_REMARK)
    }

    pub fn is_assigned_to(&self, employee_id: &EmployeeId) -> bool {
        self.assignees.iter().any(|assignee| &assignee.employee_id == employee_id)
    }
}

/// Decision payload persisted onto a stage by the chain engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDecision {
    pub code: DecisionCode,
    pub approver_id: EmployeeId,
    pub note: Option<String>,
    pub acted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::domain::employee::EmployeeId;
    use crate::domain::request::{ApprovalPhase, RequestId, RequestKind};

    use super::{
        ApprovalStage, DecisionCode, StageAssignee, StageId, StageStatus, ORIGIN_REMARK,
    };

    fn stage(remark: Option<&str>) -> ApprovalStage {
        ApprovalStage {
            id: StageId("stg-1".to_string()),
            request_id: RequestId("req-1".to_string()),
            kind: RequestKind::TravelPermit,
            phase: ApprovalPhase::Submission,
            rule_id: None,
            role_id: None,
            unit_id: None,
            note: None,
            remark: remark.map(str::to_string),
            status: StageStatus::Pending,
            revises_stage_id: None,
            line_ordinal: None,
            group_mode: None,
            created_by: EmployeeId("emp-1".to_string()),
            created_at: Utc::now(),
            approved_by: None,
            approved_at: None,
            assignees: vec![StageAssignee {
                id: "sa-1".to_string(),
                stage_id: StageId("stg-1".to_string()),
                employee_id: EmployeeId("emp-2".to_string()),
                created_by: EmployeeId("emp-1".to_string()),
                created_at: Utc::now(),
            }],
        }
    }

    #[test]
    fn origin_detection_matches_the_origin_remark_only() {
        assert!(stage(Some(ORIGIN_REMARK)).is_origin());
        assert!(!stage(Some("needs review")).is_origin());
        assert!(!stage(None).is_origin());
    }

    #[test]
    fn assignee_membership_checks_employee_ids() {
        let stage = stage(None);
        assert!(stage.is_assigned_to(&EmployeeId("emp-2".to_string())));
        assert!(!stage.is_assigned_to(&EmployeeId("emp-9".to_string())));
    }

    #[test]
    fn decision_codes_map_onto_terminal_stage_statuses() {
        assert_eq!(DecisionCode::Approved.stage_status(), StageStatus::Approved);
        assert_eq!(
            DecisionCode::RevisionRequested.stage_status(),
            StageStatus::RevisionRequested
        );
        assert!(DecisionCode::Rejected.stage_status().is_terminal());
        assert!(!StageStatus::Pending.is_terminal());
    }
}
