use serde::{Deserialize, Serialize};

use crate::domain::employee::{ApprovalLineOrdinal, EmployeeId, FieldId, RoleId, UnitId};
use crate::domain::request::{ApprovalPhase, RequestKind};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleId(pub String);

/// Match precedence for rule resolution. Tiers are tried in declaration
/// order; a direct employee rule always beats a role rule, which beats
/// the catch-all.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecedenceTier {
    DirectEmployee,
    FunctionalRole,
    CatchAll,
}

impl PrecedenceTier {
    pub const FALLBACK_ORDER: [Self; 3] =
        [Self::DirectEmployee, Self::FunctionalRole, Self::CatchAll];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DirectEmployee => "direct_employee",
            Self::FunctionalRole => "functional_role",
            Self::CatchAll => "catch_all",
        }
    }
}

impl std::str::FromStr for PrecedenceTier {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "direct_employee" => Ok(Self::DirectEmployee),
            "functional_role" => Ok(Self::FunctionalRole),
            "catch_all" => Ok(Self::CatchAll),
            other => Err(format!(
                "unknown precedence tier `{other}` (expected direct_employee|functional_role|catch_all)"
            )),
        }
    }
}

/// How a matched rule selects its approvers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    ByApprovalLine,
    ByEmployee,
    ByRoleAndUnit,
}

impl SelectionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ByApprovalLine => "by_approval_line",
            Self::ByEmployee => "by_employee",
            Self::ByRoleAndUnit => "by_role_and_unit",
        }
    }
}

impl std::str::FromStr for SelectionMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "by_approval_line" => Ok(Self::ByApprovalLine),
            "by_employee" => Ok(Self::ByEmployee),
            "by_role_and_unit" => Ok(Self::ByRoleAndUnit),
            other => Err(format!(
                "unknown selection mode `{other}` (expected by_approval_line|by_employee|by_role_and_unit)"
            )),
        }
    }
}

/// What happens when an approver asks for a revision: route the request
/// back to the participant it came from, or mark the owning request
/// directly and stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackMode {
    ReturnToSubmitter,
    DirectStatusUpdate,
}

impl FeedbackMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReturnToSubmitter => "return_to_submitter",
            Self::DirectStatusUpdate => "direct_status_update",
        }
    }
}

impl std::str::FromStr for FeedbackMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "return_to_submitter" => Ok(Self::ReturnToSubmitter),
            "direct_status_update" => Ok(Self::DirectStatusUpdate),
            other => Err(format!(
                "unknown feedback mode `{other}` (expected return_to_submitter|direct_status_update)"
            )),
        }
    }
}

/// One configured approval-policy entry. Rules are read-only to the
/// engine; configuration lives elsewhere.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub id: RuleId,
    pub kind: RequestKind,
    pub phase: ApprovalPhase,
    pub tier: PrecedenceTier,
    /// Ordinal position within the chain for (kind, phase); next-rule
    /// resolution walks this in ascending order.
    pub sequence: u32,
    pub selection: SelectionMode,
    pub line_ordinal: Option<ApprovalLineOrdinal>,
    pub employee_id: Option<EmployeeId>,
    pub role_id: Option<RoleId>,
    pub unit_override: Option<UnitId>,
    pub field_override: Option<FieldId>,
    pub head_of_unit: bool,
    pub feedback: Option<FeedbackMode>,
}

/// Classification attributes a submission is matched against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub kind: RequestKind,
    pub phase: ApprovalPhase,
    pub employee_id: EmployeeId,
    pub role_id: Option<RoleId>,
    pub unit_id: Option<UnitId>,
    pub field_id: Option<FieldId>,
}

impl Classification {
    pub fn for_submitter(
        kind: RequestKind,
        phase: ApprovalPhase,
        submitter: &crate::domain::employee::Employee,
    ) -> Self {
        Self {
            kind,
            phase,
            employee_id: submitter.id.clone(),
            role_id: submitter.role_id.clone(),
            unit_id: submitter.unit_id.clone(),
            field_id: submitter.field_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FeedbackMode, PrecedenceTier, SelectionMode};

    #[test]
    fn fallback_order_starts_with_the_most_specific_tier() {
        assert_eq!(
            PrecedenceTier::FALLBACK_ORDER,
            [
                PrecedenceTier::DirectEmployee,
                PrecedenceTier::FunctionalRole,
                PrecedenceTier::CatchAll
            ]
        );
    }

    #[test]
    fn enum_encodings_round_trip() {
        for tier in PrecedenceTier::FALLBACK_ORDER {
            assert_eq!(tier.as_str().parse::<PrecedenceTier>(), Ok(tier));
        }
        for mode in [
            SelectionMode::ByApprovalLine,
            SelectionMode::ByEmployee,
            SelectionMode::ByRoleAndUnit,
        ] {
            assert_eq!(mode.as_str().parse::<SelectionMode>(), Ok(mode));
        }
        for feedback in [FeedbackMode::ReturnToSubmitter, FeedbackMode::DirectStatusUpdate] {
            assert_eq!(feedback.as_str().parse::<FeedbackMode>(), Ok(feedback));
        }
        assert!("escalate".parse::<FeedbackMode>().is_err());
    }
}
