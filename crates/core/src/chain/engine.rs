//! The approval chain state machine. One engine instance serves one
//! request kind; every operation runs against the four store contracts
//! and performs all rule/approver resolution before the first write, so
//! a failed operation never leaves a partially-written chain.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink};
use crate::domain::employee::{Employee, EmployeeId};
use crate::domain::request::{ApprovalPhase, RequestId, RequestKind, RequestStatus};
use crate::domain::rule::{ApprovalRule, Classification, RuleId};
use crate::domain::stage::{
    ApprovalStage, DecisionCode, GroupMode, StageAssignee, StageDecision, StageId, StageStatus,
    ORIGIN_REMARK,
};
use crate::errors::EngineError;
use crate::routing::{ApproverResolver, NextRule, RuleResolver};
use crate::stores::{ChainStore, DirectoryStore, RequestStore, RuleStore};

/// Kind-specific status-code bindings. Both kinds currently share one
/// code table; the profile keeps the mapping in one place so a kind can
/// diverge without touching the state machine.
#[derive(Clone, Debug)]
pub struct KindProfile {
    pub kind: RequestKind,
    pub in_approval: RequestStatus,
    pub approved: RequestStatus,
    pub revision_requested: RequestStatus,
    pub rejected: RequestStatus,
    pub canceled: RequestStatus,
    pub settlement_in_progress: RequestStatus,
}

impl KindProfile {
    pub fn travel_permit() -> Self {
        Self::for_kind(RequestKind::TravelPermit)
    }

    pub fn assignment_letter() -> Self {
        Self::for_kind(RequestKind::AssignmentLetter)
    }

    fn for_kind(kind: RequestKind) -> Self {
        Self {
            kind,
            in_approval: RequestStatus::InApproval,
            approved: RequestStatus::Approved,
            revision_requested: RequestStatus::RevisionRequested,
            rejected: RequestStatus::Rejected,
            canceled: RequestStatus::Canceled,
            settlement_in_progress: RequestStatus::SettlementInProgress,
        }
    }

    /// Owning-request status once a phase's chain runs out of rules.
    pub fn exhausted_status(&self, phase: ApprovalPhase) -> RequestStatus {
        match phase {
            ApprovalPhase::Submission => self.approved,
            ApprovalPhase::Settlement => self.settlement_in_progress,
        }
    }

    pub fn terminal_status(&self, code: DecisionCode) -> RequestStatus {
        match code {
            DecisionCode::Approved => self.approved,
            DecisionCode::RevisionRequested => self.revision_requested,
            DecisionCode::Rejected => self.rejected,
            DecisionCode::Canceled => self.canceled,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SubmitContext {
    pub request_id: RequestId,
    pub phase: ApprovalPhase,
    pub submitter_id: EmployeeId,
    pub note: Option<String>,
    pub group_mode: Option<GroupMode>,
}

#[derive(Clone, Debug)]
pub struct AdvanceContext {
    pub request_id: RequestId,
    pub phase: ApprovalPhase,
    /// Explicit forward target; falls back to the last stage's rule.
    pub rule_id: Option<RuleId>,
    pub actor_id: EmployeeId,
    pub note: Option<String>,
}

#[derive(Clone, Debug)]
pub struct CancelContext {
    pub request_id: RequestId,
    pub phase: ApprovalPhase,
    pub submitter_id: EmployeeId,
    pub note: Option<String>,
}

/// Decision an approver submits against a pending stage. The engine
/// fills `remark`/`rule_id` from the stage when it carries the origin
/// remark; callers normally leave them empty.
#[derive(Clone, Debug)]
pub struct Decision {
    pub code: DecisionCode,
    pub approver_id: EmployeeId,
    pub note: Option<String>,
    pub remark: Option<String>,
    pub rule_id: Option<RuleId>,
    pub request_assignee_id: Option<String>,
    pub sub_assignee_id: Option<EmployeeId>,
}

impl Decision {
    pub fn new(code: DecisionCode, approver_id: EmployeeId) -> Self {
        Self {
            code,
            approver_id,
            note: None,
            remark: None,
            rule_id: None,
            request_assignee_id: None,
            sub_assignee_id: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

#[derive(Clone, Debug)]
pub struct SubmitOutcome {
    pub origin: ApprovalStage,
    pub first: ApprovalStage,
}

#[derive(Clone, Debug)]
pub enum AdvanceOutcome {
    Advanced(ApprovalStage),
    /// No further rule is configured; the owning request received its
    /// phase terminal status. Calling again repeats only the status
    /// write.
    Exhausted(RequestStatus),
}

#[derive(Clone, Debug)]
pub enum ApproveOutcome {
    Advanced(ApprovalStage),
    Finalized(RequestStatus),
    ReturnedToPrior(ApprovalStage),
    RevisionRecorded,
    DecisionRecorded { owning_status: Option<RequestStatus> },
}

pub struct ChainEngine<R, D, C, Q> {
    rules: RuleResolver<R>,
    approvers: ApproverResolver<D>,
    chain: C,
    requests: Q,
    profile: KindProfile,
    sink: Arc<dyn AuditSink>,
}

impl<R, D, C, Q> ChainEngine<R, D, C, Q>
where
    R: RuleStore,
    D: DirectoryStore,
    C: ChainStore,
    Q: RequestStore,
{
    pub fn new(rules: R, directory: D, chain: C, requests: Q, profile: KindProfile) -> Self {
        Self {
            rules: RuleResolver::new(rules),
            approvers: ApproverResolver::new(directory),
            chain,
            requests,
            profile,
            sink: Arc::new(NoopAuditSink),
        }
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn kind(&self) -> RequestKind {
        self.profile.kind
    }

    /// All stages recorded for a request in a phase, oldest first.
    pub async fn history(
        &self,
        request_id: &RequestId,
        phase: ApprovalPhase,
    ) -> Result<Vec<ApprovalStage>, EngineError> {
        Ok(self.chain.stages_for(request_id, None, phase).await?)
    }

    /// Open a new chain: write the submitter's origin stage and the
    /// first actionable stage in one transaction, then mark the owning
    /// request as in approval. Resolution happens before persistence;
    /// a `RuleNotConfigured`/`ApproverNotFound` submit writes nothing.
    pub async fn submit(&self, ctx: SubmitContext) -> Result<SubmitOutcome, EngineError> {
        let submitter = self.employee(&ctx.submitter_id).await?;
        let classification =
            Classification::for_submitter(self.profile.kind, ctx.phase, &submitter);
        let rule = self.rules.resolve(&classification).await?;
        let approvers = self.approvers.resolve(&rule, &submitter).await?;

        let submitted_at = Utc::now();
        let mut origin = self.blank_stage(&ctx.request_id, ctx.phase, &submitter.id, submitted_at);
        origin.rule_id = Some(rule.id.clone());
        origin.role_id = submitter.role_id.clone();
        origin.unit_id = submitter.unit_id.clone();
        origin.note = ctx.note.clone();
        origin.remark = Some(ORIGIN_REMARK.to_string());
        origin.status = StageStatus::Approved;
        origin.group_mode = ctx.group_mode;
        origin.approved_by = Some(submitter.id.clone());
        origin.approved_at = Some(submitted_at);
        origin.assignees = assignee_rows(&origin.id, &[submitter.clone()], &submitter.id, submitted_at);

        // Strictly after the origin so the prior-stage lookup can see
        // the origin from the first actionable stage.
        let forwarded_at = strictly_after(submitted_at);
        let mut first = self.blank_stage(&ctx.request_id, ctx.phase, &submitter.id, forwarded_at);
        first.rule_id = Some(rule.id.clone());
        first.role_id = rule.role_id.clone();
        first.unit_id = rule.unit_override.clone().or_else(|| submitter.unit_id.clone());
        first.line_ordinal = rule.line_ordinal;
        first.group_mode = ctx.group_mode;
        first.assignees = assignee_rows(&first.id, &approvers, &submitter.id, forwarded_at);

        self.chain.create_stages(&[origin.clone(), first.clone()]).await?;
        self.requests.set_status(&ctx.request_id, self.profile.in_approval).await?;

        self.emit(
            AuditEvent::new(
                Some(ctx.request_id.clone()),
                "chain.submitted",
                AuditCategory::Chain,
                submitter.id.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("rule", rule.id.0.clone())
            .with_metadata("assignees", first.assignees.len().to_string()),
        );

        Ok(SubmitOutcome { origin, first })
    }

    /// Append the next stage, or finalize the chain when no further
    /// rule is configured. A missing successor rule is the normal end
    /// of a chain, not an error.
    pub async fn advance(&self, ctx: AdvanceContext) -> Result<AdvanceOutcome, EngineError> {
        let existing = self.chain.stages_for(&ctx.request_id, None, ctx.phase).await?;
        let Some(last) = existing.last() else {
            return Err(EngineError::ChainNotFound {
                request_id: ctx.request_id.clone(),
                phase: ctx.phase,
            });
        };

        let base_rule = ctx.rule_id.clone().or_else(|| last.rule_id.clone());
        let next = match base_rule {
            Some(rule_id) => self.rules.resolve_next(&rule_id, ctx.phase).await?,
            None => NextRule::Exhausted,
        };

        let rule = match next {
            NextRule::Rule(rule) => rule,
            NextRule::Exhausted => {
                let status = self.profile.exhausted_status(ctx.phase);
                self.requests.set_status(&ctx.request_id, status).await?;
                self.emit(
                    AuditEvent::new(
                        Some(ctx.request_id.clone()),
                        "chain.exhausted",
                        AuditCategory::Chain,
                        ctx.actor_id.0.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("status_code", status.code().to_string()),
                );
                return Ok(AdvanceOutcome::Exhausted(status));
            }
        };

        let submitter = self.submitter_of(&ctx.request_id, ctx.phase, &existing).await?;
        let approvers = self.approvers.resolve(&rule, &submitter).await?;
        let stage = self
            .append_stage(&ctx.request_id, ctx.phase, &rule, &approvers, &submitter, &ctx.actor_id, ctx.note)
            .await?;

        self.emit(
            AuditEvent::new(
                Some(ctx.request_id.clone()),
                "chain.stage_advanced",
                AuditCategory::Chain,
                ctx.actor_id.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("rule", rule.id.0.clone())
            .with_metadata("assignees", stage.assignees.len().to_string()),
        );

        Ok(AdvanceOutcome::Advanced(stage))
    }

    /// Record a decision on a pending stage and route the chain
    /// accordingly. The store enforces one decision per stage; a
    /// second attempt surfaces as a conflict.
    pub async fn approve(
        &self,
        stage_id: &StageId,
        decision: Decision,
    ) -> Result<ApproveOutcome, EngineError> {
        let stage = self
            .chain
            .stage_by_id(stage_id)
            .await?
            .ok_or_else(|| EngineError::StageNotFound { stage_id: stage_id.clone() })?;

        let mut decision = decision;
        if stage.is_origin() {
            // A decision on the submitter's own record keeps its remark
            // and rule so revision branches return to the right place.
            decision.remark = stage.remark.clone();
            decision.rule_id = stage.rule_id.clone();
        }

        let code = decision.code;
        let approver_id = decision.approver_id.clone();

        self.chain
            .update_decision(
                stage_id,
                &StageDecision {
                    code,
                    approver_id: approver_id.clone(),
                    note: decision.note.clone(),
                    acted_at: Utc::now(),
                },
            )
            .await?;

        self.emit(
            AuditEvent::new(
                Some(stage.request_id.clone()),
                "chain.decision_recorded",
                AuditCategory::Chain,
                approver_id.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("stage", stage.id.0.clone())
            .with_metadata("code", format!("{code:?}")),
        );

        match code {
            DecisionCode::Approved => {
                self.route_after_approval(&stage, &decision, &approver_id).await
            }
            DecisionCode::RevisionRequested => {
                self.route_after_revision(&stage, &decision, &approver_id).await
            }
            DecisionCode::Rejected | DecisionCode::Canceled => {
                // Terminal only once the decision has traveled back to
                // the submitter's own record.
                let at_origin = decision.remark.as_deref() == Some(ORIGIN_REMARK);
                let owning_status = if at_origin {
                    let status = self.profile.terminal_status(code);
                    self.requests.set_status(&stage.request_id, status).await?;
                    if let Some(record_id) = &decision.request_assignee_id {
                        self.requests.set_assignee_status(record_id, status).await?;
                    }
                    Some(status)
                } else {
                    None
                };
                Ok(ApproveOutcome::DecisionRecorded { owning_status })
            }
        }
    }

    /// Close a chain unilaterally: one synthetic terminal stage
    /// attributed to the submitter, owning request marked canceled.
    pub async fn cancel(&self, ctx: CancelContext) -> Result<ApprovalStage, EngineError> {
        let submitter = self.employee(&ctx.submitter_id).await?;

        let canceled_at = Utc::now();
        let mut stage = self.blank_stage(&ctx.request_id, ctx.phase, &submitter.id, canceled_at);
        stage.role_id = submitter.role_id.clone();
        stage.unit_id = submitter.unit_id.clone();
        stage.note = ctx.note;
        stage.remark = Some(ORIGIN_REMARK.to_string());
        stage.status = StageStatus::Canceled;
        stage.approved_by = Some(submitter.id.clone());
        stage.approved_at = Some(canceled_at);
        stage.assignees =
            assignee_rows(&stage.id, &[submitter.clone()], &submitter.id, canceled_at);

        self.chain.create_stages(&[stage.clone()]).await?;
        self.requests.set_status(&ctx.request_id, self.profile.canceled).await?;

        self.emit(
            AuditEvent::new(
                Some(ctx.request_id.clone()),
                "chain.canceled",
                AuditCategory::Chain,
                submitter.id.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("stage", stage.id.0.clone()),
        );

        Ok(stage)
    }

    /// Branch back to the participant that preceded `stage_id`'s
    /// anchor, copying the rule context that earlier stage was entered
    /// under. `NoPriorStage` means the chain is already at its origin.
    pub async fn create_previous(
        &self,
        stage_id: &StageId,
        sub_assignee_id: Option<&EmployeeId>,
        actor_id: &EmployeeId,
    ) -> Result<ApprovalStage, EngineError> {
        let stage = self
            .chain
            .stage_by_id(stage_id)
            .await?
            .ok_or_else(|| EngineError::StageNotFound { stage_id: stage_id.clone() })?;

        let anchor = match &stage.revises_stage_id {
            Some(anchor_id) if anchor_id != &stage.id => self
                .chain
                .stage_by_id(anchor_id)
                .await?
                .ok_or_else(|| EngineError::StageNotFound { stage_id: anchor_id.clone() })?,
            _ => stage.clone(),
        };

        let prior = self
            .chain
            .most_recent_stage_before(&stage.request_id, sub_assignee_id, anchor.created_at)
            .await?
            .ok_or_else(|| EngineError::NoPriorStage { stage_id: stage.id.clone() })?;

        let branched_at = Utc::now();
        let mut branch =
            self.blank_stage(&stage.request_id, stage.phase, actor_id, branched_at);
        branch.rule_id = prior.rule_id.clone();
        branch.role_id = prior.role_id.clone();
        branch.unit_id = prior.unit_id.clone();
        branch.remark = prior.remark.clone();
        branch.revises_stage_id = Some(anchor.id.clone());
        branch.line_ordinal = prior.line_ordinal;
        branch.group_mode = prior.group_mode;
        branch.assignees = prior
            .assignees
            .iter()
            .map(|assignee| StageAssignee {
                id: Uuid::new_v4().to_string(),
                stage_id: branch.id.clone(),
                employee_id: assignee.employee_id.clone(),
                created_by: actor_id.clone(),
                created_at: branched_at,
            })
            .collect();

        self.chain.create_stages(&[branch.clone()]).await?;

        self.emit(
            AuditEvent::new(
                Some(stage.request_id.clone()),
                "chain.returned_to_prior",
                AuditCategory::Chain,
                actor_id.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("anchor", anchor.id.0.clone())
            .with_metadata("prior", prior.id.0.clone()),
        );

        Ok(branch)
    }

    async fn route_after_approval(
        &self,
        stage: &ApprovalStage,
        decision: &Decision,
        approver_id: &EmployeeId,
    ) -> Result<ApproveOutcome, EngineError> {
        // A revision branch re-enters the chain at the rule its anchor
        // was flagged under, instead of walking past it.
        if let Some(anchor_id) = &stage.revises_stage_id {
            let anchor = self
                .chain
                .stage_by_id(anchor_id)
                .await?
                .ok_or_else(|| EngineError::StageNotFound { stage_id: anchor_id.clone() })?;
            if let Some(rule_id) = &anchor.rule_id {
                let rule = self.rules.rule_by_id(rule_id).await?;
                let existing =
                    self.chain.stages_for(&stage.request_id, None, stage.phase).await?;
                let submitter =
                    self.submitter_of(&stage.request_id, stage.phase, &existing).await?;
                let approvers = self.approvers.resolve(&rule, &submitter).await?;
                let reentry = self
                    .append_stage(
                        &stage.request_id,
                        stage.phase,
                        &rule,
                        &approvers,
                        &submitter,
                        approver_id,
                        None,
                    )
                    .await?;
                return Ok(ApproveOutcome::Advanced(reentry));
            }
        }

        let outcome = self
            .advance(AdvanceContext {
                request_id: stage.request_id.clone(),
                phase: stage.phase,
                rule_id: decision.rule_id.clone().or_else(|| stage.rule_id.clone()),
                actor_id: approver_id.clone(),
                note: None,
            })
            .await?;

        match outcome {
            AdvanceOutcome::Advanced(next) => Ok(ApproveOutcome::Advanced(next)),
            AdvanceOutcome::Exhausted(status) => {
                if let Some(record_id) = &decision.request_assignee_id {
                    self.requests.set_assignee_status(record_id, status).await?;
                }
                Ok(ApproveOutcome::Finalized(status))
            }
        }
    }

    async fn route_after_revision(
        &self,
        stage: &ApprovalStage,
        decision: &Decision,
        approver_id: &EmployeeId,
    ) -> Result<ApproveOutcome, EngineError> {
        let feedback = match &stage.rule_id {
            Some(rule_id) => self.rules.rule_by_id(rule_id).await?.feedback,
            None => None,
        };

        if feedback == Some(crate::domain::rule::FeedbackMode::ReturnToSubmitter) {
            let branch = self
                .create_previous(&stage.id, decision.sub_assignee_id.as_ref(), approver_id)
                .await?;
            return Ok(ApproveOutcome::ReturnedToPrior(branch));
        }

        self.requests.set_status(&stage.request_id, self.profile.revision_requested).await?;
        self.requests.clear_attachment(&stage.request_id).await?;
        if let Some(record_id) = &decision.request_assignee_id {
            self.requests
                .set_assignee_status(record_id, self.profile.revision_requested)
                .await?;
        }
        Ok(ApproveOutcome::RevisionRecorded)
    }

    async fn append_stage(
        &self,
        request_id: &RequestId,
        phase: ApprovalPhase,
        rule: &ApprovalRule,
        approvers: &[Employee],
        submitter: &Employee,
        actor_id: &EmployeeId,
        note: Option<String>,
    ) -> Result<ApprovalStage, EngineError> {
        let created_at = Utc::now();
        let mut stage = self.blank_stage(request_id, phase, actor_id, created_at);
        stage.rule_id = Some(rule.id.clone());
        stage.role_id = rule.role_id.clone();
        stage.unit_id = rule.unit_override.clone().or_else(|| submitter.unit_id.clone());
        stage.note = note;
        stage.line_ordinal = rule.line_ordinal;
        stage.assignees = assignee_rows(&stage.id, approvers, actor_id, created_at);

        self.chain.create_stages(&[stage.clone()]).await?;
        Ok(stage)
    }

    fn blank_stage(
        &self,
        request_id: &RequestId,
        phase: ApprovalPhase,
        created_by: &EmployeeId,
        created_at: DateTime<Utc>,
    ) -> ApprovalStage {
        ApprovalStage {
            id: StageId(Uuid::new_v4().to_string()),
            request_id: request_id.clone(),
            kind: self.profile.kind,
            phase,
            rule_id: None,
            role_id: None,
            unit_id: None,
            note: None,
            remark: None,
            status: StageStatus::Pending,
            revises_stage_id: None,
            line_ordinal: None,
            group_mode: None,
            created_by: created_by.clone(),
            created_at,
            approved_by: None,
            approved_at: None,
            assignees: Vec::new(),
        }
    }

    /// The chain's submitter is whoever created the origin stage; the
    /// earliest stage doubles as the origin for chains recorded without
    /// the remark.
    async fn submitter_of(
        &self,
        request_id: &RequestId,
        phase: ApprovalPhase,
        stages: &[ApprovalStage],
    ) -> Result<Employee, EngineError> {
        let origin = stages
            .iter()
            .find(|stage| stage.is_origin())
            .or_else(|| stages.first())
            .ok_or_else(|| EngineError::ChainNotFound {
                request_id: request_id.clone(),
                phase,
            })?;
        self.employee(&origin.created_by).await
    }

    async fn employee(&self, id: &EmployeeId) -> Result<Employee, EngineError> {
        self.approvers
            .directory()
            .employee_by_id(id)
            .await?
            .ok_or_else(|| EngineError::EmployeeNotFound { employee_id: id.clone() })
    }

    fn emit(&self, event: AuditEvent) {
        self.sink.emit(event);
    }
}

fn assignee_rows(
    stage_id: &StageId,
    approvers: &[Employee],
    created_by: &EmployeeId,
    created_at: DateTime<Utc>,
) -> Vec<StageAssignee> {
    approvers
        .iter()
        .map(|approver| StageAssignee {
            id: Uuid::new_v4().to_string(),
            stage_id: stage_id.clone(),
            employee_id: approver.id.clone(),
            created_by: created_by.clone(),
            created_at,
        })
        .collect()
}

/// Stage timestamps order the chain and feed the strict prior-stage
/// lookup; two stages written in one operation must not share one.
fn strictly_after(earlier: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > earlier {
        now
    } else {
        earlier + Duration::microseconds(1)
    }
}
