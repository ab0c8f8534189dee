//! In-memory store implementations backing engine tests and the CLI
//! smoke path. The rule and directory stores are plain snapshots; the
//! chain and request stores take a lock because the engine writes
//! through them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::employee::{Employee, EmployeeId, FieldId, RoleId, UnitId};
use crate::domain::request::{
    ApprovalPhase, RequestAssignee, RequestId, RequestStatus, TravelRequest,
};
use crate::domain::rule::{ApprovalRule, Classification, PrecedenceTier, RuleId};
use crate::domain::stage::{ApprovalStage, StageDecision, StageId, StageStatus};
use crate::errors::StoreError;
use crate::stores::{ChainStore, DirectoryStore, RequestStore, RuleStore};

#[derive(Clone, Debug, Default)]
pub struct InMemoryRuleStore {
    rules: Vec<ApprovalRule>,
}

impl InMemoryRuleStore {
    pub fn new(rules: Vec<ApprovalRule>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn lookup(
        &self,
        classification: &Classification,
        tier: PrecedenceTier,
    ) -> Result<Option<ApprovalRule>, StoreError> {
        let mut candidates: Vec<&ApprovalRule> = self
            .rules
            .iter()
            .filter(|rule| {
                rule.kind == classification.kind
                    && rule.phase == classification.phase
                    && rule.tier == tier
            })
            .filter(|rule| match tier {
                PrecedenceTier::DirectEmployee => {
                    rule.employee_id.as_ref() == Some(&classification.employee_id)
                }
                PrecedenceTier::FunctionalRole => {
                    rule.role_id.is_some() && rule.role_id == classification.role_id
                }
                PrecedenceTier::CatchAll => true,
            })
            .collect();
        candidates.sort_by_key(|rule| rule.sequence);
        Ok(candidates.first().map(|rule| (*rule).clone()))
    }

    async fn rule_by_id(&self, id: &RuleId) -> Result<Option<ApprovalRule>, StoreError> {
        Ok(self.rules.iter().find(|rule| &rule.id == id).cloned())
    }

    async fn next_in_sequence(
        &self,
        current: &RuleId,
        phase: ApprovalPhase,
    ) -> Result<Option<ApprovalRule>, StoreError> {
        let Some(current) = self.rules.iter().find(|rule| &rule.id == current) else {
            return Ok(None);
        };

        Ok(self
            .rules
            .iter()
            .filter(|rule| {
                rule.kind == current.kind
                    && rule.phase == phase
                    && rule.sequence > current.sequence
            })
            .min_by_key(|rule| rule.sequence)
            .cloned())
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryDirectoryStore {
    employees: HashMap<String, Employee>,
}

impl InMemoryDirectoryStore {
    pub fn new(employees: Vec<Employee>) -> Self {
        let employees =
            employees.into_iter().map(|employee| (employee.id.0.clone(), employee)).collect();
        Self { employees }
    }
}

#[async_trait]
impl DirectoryStore for InMemoryDirectoryStore {
    async fn employee_by_id(&self, id: &EmployeeId) -> Result<Option<Employee>, StoreError> {
        Ok(self.employees.get(&id.0).cloned())
    }

    async fn employees_matching(
        &self,
        role_id: &RoleId,
        unit_id: Option<&UnitId>,
        field_id: Option<&FieldId>,
    ) -> Result<Vec<Employee>, StoreError> {
        let mut matching: Vec<Employee> = self
            .employees
            .values()
            .filter(|employee| employee.role_id.as_ref() == Some(role_id))
            .filter(|employee| unit_id.is_none() || employee.unit_id.as_ref() == unit_id)
            .filter(|employee| field_id.is_none() || employee.field_id.as_ref() == field_id)
            .cloned()
            .collect();
        matching.sort_by(|left, right| left.id.0.cmp(&right.id.0));
        Ok(matching)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryChainStore {
    stages: Arc<Mutex<Vec<ApprovalStage>>>,
}

impl InMemoryChainStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ApprovalStage>> {
        match self.stages.lock() {
            Ok(stages) => stages,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn all_stages(&self) -> Vec<ApprovalStage> {
        self.lock().clone()
    }
}

#[async_trait]
impl ChainStore for InMemoryChainStore {
    async fn create_stages(&self, stages: &[ApprovalStage]) -> Result<(), StoreError> {
        let mut existing = self.lock();
        for stage in stages {
            if existing.iter().any(|other| other.id == stage.id) {
                return Err(StoreError::Backend(format!(
                    "stage id `{}` already exists",
                    stage.id.0
                )));
            }
        }
        existing.extend_from_slice(stages);
        Ok(())
    }

    async fn stage_by_id(&self, id: &StageId) -> Result<Option<ApprovalStage>, StoreError> {
        Ok(self.lock().iter().find(|stage| &stage.id == id).cloned())
    }

    async fn update_decision(
        &self,
        stage_id: &StageId,
        decision: &StageDecision,
    ) -> Result<(), StoreError> {
        let mut stages = self.lock();
        let Some(stage) = stages.iter_mut().find(|stage| &stage.id == stage_id) else {
            return Err(StoreError::Backend(format!("stage `{}` not found", stage_id.0)));
        };

        if stage.status != StageStatus::Pending {
            return Err(StoreError::Conflict { stage_id: stage_id.0.clone() });
        }

        stage.status = decision.code.stage_status();
        stage.approved_by = Some(decision.approver_id.clone());
        stage.approved_at = Some(decision.acted_at);
        if decision.note.is_some() {
            stage.note = decision.note.clone();
        }
        Ok(())
    }

    async fn stages_for(
        &self,
        request_id: &RequestId,
        assignee_id: Option<&EmployeeId>,
        phase: ApprovalPhase,
    ) -> Result<Vec<ApprovalStage>, StoreError> {
        let mut matching: Vec<ApprovalStage> = self
            .lock()
            .iter()
            .filter(|stage| &stage.request_id == request_id && stage.phase == phase)
            .filter(|stage| assignee_id.map_or(true, |id| stage.is_assigned_to(id)))
            .cloned()
            .collect();
        matching.sort_by_key(|stage| stage.created_at);
        Ok(matching)
    }

    async fn most_recent_stage_before(
        &self,
        request_id: &RequestId,
        assignee_id: Option<&EmployeeId>,
        anchor: DateTime<Utc>,
    ) -> Result<Option<ApprovalStage>, StoreError> {
        Ok(self
            .lock()
            .iter()
            .filter(|stage| &stage.request_id == request_id && stage.created_at < anchor)
            .filter(|stage| assignee_id.map_or(true, |id| stage.is_assigned_to(id)))
            .max_by_key(|stage| stage.created_at)
            .cloned())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryRequestStore {
    requests: Arc<Mutex<HashMap<String, TravelRequest>>>,
    assignees: Arc<Mutex<HashMap<String, RequestAssignee>>>,
}

impl InMemoryRequestStore {
    pub fn with_requests(requests: Vec<TravelRequest>) -> Self {
        let store = Self::default();
        {
            let mut map = store.lock_requests();
            for request in requests {
                map.insert(request.id.0.clone(), request);
            }
        }
        store
    }

    pub fn insert_assignee(&self, assignee: RequestAssignee) {
        self.lock_assignees().insert(assignee.id.clone(), assignee);
    }

    pub fn request(&self, id: &RequestId) -> Option<TravelRequest> {
        self.lock_requests().get(&id.0).cloned()
    }

    pub fn assignee(&self, id: &str) -> Option<RequestAssignee> {
        self.lock_assignees().get(id).cloned()
    }

    fn lock_requests(&self) -> std::sync::MutexGuard<'_, HashMap<String, TravelRequest>> {
        match self.requests.lock() {
            Ok(requests) => requests,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_assignees(&self) -> std::sync::MutexGuard<'_, HashMap<String, RequestAssignee>> {
        match self.assignees.lock() {
            Ok(assignees) => assignees,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn set_status(
        &self,
        request_id: &RequestId,
        status: RequestStatus,
    ) -> Result<(), StoreError> {
        let mut requests = self.lock_requests();
        let Some(request) = requests.get_mut(&request_id.0) else {
            return Err(StoreError::Backend(format!("request `{}` not found", request_id.0)));
        };
        request.status = status;
        request.updated_at = Utc::now();
        Ok(())
    }

    async fn set_assignee_status(
        &self,
        assignee_record_id: &str,
        status: RequestStatus,
    ) -> Result<(), StoreError> {
        let mut assignees = self.lock_assignees();
        let Some(assignee) = assignees.get_mut(assignee_record_id) else {
            return Err(StoreError::Backend(format!(
                "request assignee `{assignee_record_id}` not found"
            )));
        };
        assignee.status = status;
        assignee.updated_at = Utc::now();
        Ok(())
    }

    async fn clear_attachment(&self, request_id: &RequestId) -> Result<(), StoreError> {
        let mut requests = self.lock_requests();
        let Some(request) = requests.get_mut(&request_id.0) else {
            return Err(StoreError::Backend(format!("request `{}` not found", request_id.0)));
        };
        request.attachment_path = None;
        request.updated_at = Utc::now();
        Ok(())
    }
}
