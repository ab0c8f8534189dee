use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmployeeId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldId(pub String);

/// Directory record for one employee, including the reporting links the
/// approval-line selection mode walks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub full_name: String,
    pub role_id: Option<RoleId>,
    pub unit_id: Option<UnitId>,
    pub field_id: Option<FieldId>,
    pub supervisor_id: Option<EmployeeId>,
    pub secondary_manager_id: Option<EmployeeId>,
}

impl Employee {
    pub fn approval_line(&self, ordinal: ApprovalLineOrdinal) -> Option<&EmployeeId> {
        match ordinal {
            ApprovalLineOrdinal::DirectSupervisor => self.supervisor_id.as_ref(),
            ApprovalLineOrdinal::SecondaryManager => self.secondary_manager_id.as_ref(),
        }
    }
}

/// Which reporting link an approval-line rule targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalLineOrdinal {
    DirectSupervisor,
    SecondaryManager,
}

impl ApprovalLineOrdinal {
    pub fn from_position(position: u8) -> Option<Self> {
        match position {
            1 => Some(Self::DirectSupervisor),
            2 => Some(Self::SecondaryManager),
            _ => None,
        }
    }

    pub fn position(self) -> u8 {
        match self {
            Self::DirectSupervisor => 1,
            Self::SecondaryManager => 2,
        }
    }
}
