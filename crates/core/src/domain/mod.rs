pub mod employee;
pub mod request;
pub mod rule;
pub mod stage;

pub use employee::{ApprovalLineOrdinal, Employee, EmployeeId, FieldId, RoleId, UnitId};
pub use request::{
    ApprovalPhase, RequestAssignee, RequestId, RequestKind, RequestStatus, TravelRequest,
};
pub use rule::{
    ApprovalRule, Classification, FeedbackMode, PrecedenceTier, RuleId, SelectionMode,
};
pub use stage::{
    ApprovalStage, DecisionCode, GroupMode, StageAssignee, StageDecision, StageId, StageStatus,
    ORIGIN_REMARK,
};
