pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::employee::{Employee, EmployeeId, FieldId, RoleId, UnitId};
use crate::domain::request::{ApprovalPhase, RequestId, RequestStatus};
use crate::domain::rule::{ApprovalRule, Classification, PrecedenceTier, RuleId};
use crate::domain::stage::{ApprovalStage, StageDecision, StageId};
use crate::errors::StoreError;

pub use memory::{
    InMemoryChainStore, InMemoryDirectoryStore, InMemoryRequestStore, InMemoryRuleStore,
};

/// Read-only access to configured approval rules.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// The rule directly matching `classification` at the given
    /// precedence tier, if one is configured. The configuration
    /// guarantees at most one direct match per tier.
    async fn lookup(
        &self,
        classification: &Classification,
        tier: PrecedenceTier,
    ) -> Result<Option<ApprovalRule>, StoreError>;

    async fn rule_by_id(&self, id: &RuleId) -> Result<Option<ApprovalRule>, StoreError>;

    /// The rule immediately following `current` in its chain's sequence
    /// for the given phase. `None` means the chain is exhausted.
    async fn next_in_sequence(
        &self,
        current: &RuleId,
        phase: ApprovalPhase,
    ) -> Result<Option<ApprovalRule>, StoreError>;
}

/// Read-only access to employee records and organizational attributes.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn employee_by_id(&self, id: &EmployeeId) -> Result<Option<Employee>, StoreError>;

    /// Every employee matching the functional role, optionally narrowed
    /// by organizational unit and field.
    async fn employees_matching(
        &self,
        role_id: &RoleId,
        unit_id: Option<&UnitId>,
        field_id: Option<&FieldId>,
    ) -> Result<Vec<Employee>, StoreError>;
}

/// Append-only persistence for approval stages and their assignees.
#[async_trait]
pub trait ChainStore: Send + Sync {
    /// Persist the given stages and all their assignee rows as one
    /// transaction. Either everything lands or nothing does.
    async fn create_stages(&self, stages: &[ApprovalStage]) -> Result<(), StoreError>;

    async fn stage_by_id(&self, id: &StageId) -> Result<Option<ApprovalStage>, StoreError>;

    /// Record a decision on a still-pending stage. Implementations must
    /// enforce at most one successful transition per stage and surface
    /// `StoreError::Conflict` when the stage already carries one.
    async fn update_decision(
        &self,
        stage_id: &StageId,
        decision: &StageDecision,
    ) -> Result<(), StoreError>;

    /// All stages for a request in a phase, ordered by creation time,
    /// optionally restricted to stages assigned to one employee.
    async fn stages_for(
        &self,
        request_id: &RequestId,
        assignee_id: Option<&EmployeeId>,
        phase: ApprovalPhase,
    ) -> Result<Vec<ApprovalStage>, StoreError>;

    /// The most recent stage for the request strictly earlier than
    /// `anchor`, optionally restricted to stages assigned to one
    /// employee.
    async fn most_recent_stage_before(
        &self,
        request_id: &RequestId,
        assignee_id: Option<&EmployeeId>,
        anchor: DateTime<Utc>,
    ) -> Result<Option<ApprovalStage>, StoreError>;
}

/// Writes the engine performs against the owning request record.
#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn set_status(
        &self,
        request_id: &RequestId,
        status: RequestStatus,
    ) -> Result<(), StoreError>;

    async fn set_assignee_status(
        &self,
        assignee_record_id: &str,
        status: RequestStatus,
    ) -> Result<(), StoreError>;

    async fn clear_attachment(&self, request_id: &RequestId) -> Result<(), StoreError>;
}
