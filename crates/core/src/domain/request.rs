use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::employee::EmployeeId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

/// The two document types sharing the approval engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    TravelPermit,
    AssignmentLetter,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TravelPermit => "travel_permit",
            Self::AssignmentLetter => "assignment_letter",
        }
    }
}

impl std::str::FromStr for RequestKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "travel_permit" => Ok(Self::TravelPermit),
            "assignment_letter" => Ok(Self::AssignmentLetter),
            other => {
                Err(format!("unknown request kind `{other}` (expected travel_permit|assignment_letter)"))
            }
        }
    }
}

/// Whether a chain belongs to the initial request or to its expense
/// settlement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPhase {
    Submission,
    Settlement,
}

impl ApprovalPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submission => "submission",
            Self::Settlement => "settlement",
        }
    }
}

impl std::str::FromStr for ApprovalPhase {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "submission" => Ok(Self::Submission),
            "settlement" => Ok(Self::Settlement),
            other => Err(format!("unknown approval phase `{other}` (expected submission|settlement)")),
        }
    }
}

/// Coarse owning-request status. The numeric codes are shared with the
/// request schema downstream systems read and must not be renumbered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    InApproval,
    Approved,
    RevisionRequested,
    Canceled,
    SettlementInProgress,
    Rejected,
}

impl RequestStatus {
    pub fn code(self) -> i64 {
        match self {
            Self::InApproval => 1,
            Self::Approved => 2,
            Self::RevisionRequested => 3,
            Self::Canceled => 4,
            Self::SettlementInProgress => 5,
            Self::Rejected => 6,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::InApproval),
            2 => Some(Self::Approved),
            3 => Some(Self::RevisionRequested),
            4 => Some(Self::Canceled),
            5 => Some(Self::SettlementInProgress),
            6 => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Owning request record as the engine sees it. CRUD for the rest of the
/// record (itinerary, vehicles, documents) lives elsewhere.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelRequest {
    pub id: RequestId,
    pub kind: RequestKind,
    pub submitter_id: EmployeeId,
    pub purpose: Option<String>,
    pub status: RequestStatus,
    pub attachment_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-traveler row on an owning request; carries its own status code so
/// one traveler's rejection does not mask another's approval.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAssignee {
    pub id: String,
    pub request_id: RequestId,
    pub employee_id: EmployeeId,
    pub status: RequestStatus,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::{ApprovalPhase, RequestKind, RequestStatus};

    #[test]
    fn status_codes_match_the_integration_contract() {
        assert_eq!(RequestStatus::InApproval.code(), 1);
        assert_eq!(RequestStatus::Approved.code(), 2);
        assert_eq!(RequestStatus::RevisionRequested.code(), 3);
        assert_eq!(RequestStatus::Canceled.code(), 4);
        assert_eq!(RequestStatus::SettlementInProgress.code(), 5);
        assert_eq!(RequestStatus::Rejected.code(), 6);
    }

    #[test]
    fn status_codes_round_trip() {
        for code in 1..=6 {
            let status = RequestStatus::from_code(code).expect("known code");
            assert_eq!(status.code(), code);
        }
        assert_eq!(RequestStatus::from_code(0), None);
        assert_eq!(RequestStatus::from_code(7), None);
    }

    #[test]
    fn kind_and_phase_parse_their_canonical_names() {
        assert_eq!("travel_permit".parse::<RequestKind>(), Ok(RequestKind::TravelPermit));
        assert_eq!("assignment_letter".parse::<RequestKind>(), Ok(RequestKind::AssignmentLetter));
        assert!("sppd".parse::<RequestKind>().is_err());

        assert_eq!("submission".parse::<ApprovalPhase>(), Ok(ApprovalPhase::Submission));
        assert_eq!("settlement".parse::<ApprovalPhase>(), Ok(ApprovalPhase::Settlement));
        assert!("closing".parse::<ApprovalPhase>().is_err());
    }
}
