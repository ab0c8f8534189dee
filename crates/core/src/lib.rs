pub mod audit;
pub mod chain;
pub mod config;
pub mod domain;
pub mod errors;
pub mod routing;
pub mod stores;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use chain::{
    AdvanceContext, AdvanceOutcome, ApproveOutcome, CancelContext, ChainEngine, Decision,
    KindProfile, SubmitContext, SubmitOutcome,
};
pub use domain::employee::{ApprovalLineOrdinal, Employee, EmployeeId, FieldId, RoleId, UnitId};
pub use domain::request::{
    ApprovalPhase, RequestAssignee, RequestId, RequestKind, RequestStatus, TravelRequest,
};
pub use domain::rule::{
    ApprovalRule, Classification, FeedbackMode, PrecedenceTier, RuleId, SelectionMode,
};
pub use domain::stage::{
    ApprovalStage, DecisionCode, GroupMode, StageAssignee, StageDecision, StageId, StageStatus,
};
pub use errors::{EngineError, StoreError};
pub use routing::{ApproverResolver, NextRule, RuleResolver};
