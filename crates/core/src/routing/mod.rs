//! Rule and approver resolution. The rule resolver turns a submission's
//! classification into one concrete policy entry using a fixed fallback
//! order; the approver resolver expands that entry into the employees
//! authorized to act on the next stage. Both are pure reads over their
//! stores and are safe to retry.

use crate::domain::employee::{Employee, FieldId, UnitId};
use crate::domain::request::ApprovalPhase;
use crate::domain::rule::{
    ApprovalRule, Classification, PrecedenceTier, RuleId, SelectionMode,
};
use crate::errors::EngineError;
use crate::stores::{DirectoryStore, RuleStore};

/// Outcome of next-rule resolution. Running out of configured rules is
/// the normal way a chain ends, so it is a value, not an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NextRule {
    Rule(ApprovalRule),
    Exhausted,
}

pub struct RuleResolver<R> {
    rules: R,
}

impl<R> RuleResolver<R>
where
    R: RuleStore,
{
    pub fn new(rules: R) -> Self {
        Self { rules }
    }

    /// Resolve the rule applying to a fresh submission. Tiers are tried
    /// most-specific first; the first hit wins.
    pub async fn resolve(
        &self,
        classification: &Classification,
    ) -> Result<ApprovalRule, EngineError> {
        for tier in PrecedenceTier::FALLBACK_ORDER {
            if let Some(rule) = self.rules.lookup(classification, tier).await? {
                return Ok(rule);
            }
        }

        Err(EngineError::RuleNotConfigured {
            kind: classification.kind,
            phase: classification.phase,
            employee_id: classification.employee_id.0.clone(),
        })
    }

    /// Resolve the rule that follows `current` in sequence. A missing
    /// successor means the chain is complete.
    pub async fn resolve_next(
        &self,
        current: &RuleId,
        phase: ApprovalPhase,
    ) -> Result<NextRule, EngineError> {
        match self.rules.next_in_sequence(current, phase).await? {
            Some(rule) => Ok(NextRule::Rule(rule)),
            None => Ok(NextRule::Exhausted),
        }
    }

    pub async fn rule_by_id(&self, id: &RuleId) -> Result<ApprovalRule, EngineError> {
        self.rules
            .rule_by_id(id)
            .await?
            .ok_or_else(|| EngineError::RuleMissing { rule_id: id.clone() })
    }
}

pub struct ApproverResolver<D> {
    directory: D,
}

impl<D> ApproverResolver<D>
where
    D: DirectoryStore,
{
    pub fn new(directory: D) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    /// Expand a resolved rule into the concrete employees authorized to
    /// act at its stage. An empty result aborts the operation: a stage
    /// with zero assignees is invalid.
    pub async fn resolve(
        &self,
        rule: &ApprovalRule,
        submitter: &Employee,
    ) -> Result<Vec<Employee>, EngineError> {
        let approvers = match rule.selection {
            SelectionMode::ByApprovalLine => self.resolve_approval_line(rule, submitter).await?,
            SelectionMode::ByEmployee => self.resolve_employee(rule).await?,
            SelectionMode::ByRoleAndUnit => self.resolve_role_and_unit(rule, submitter).await?,
        };

        if approvers.is_empty() {
            return Err(EngineError::ApproverNotFound {
                rule_id: rule.id.0.clone(),
                detail: "selection produced no employees".to_string(),
            });
        }

        Ok(approvers)
    }

    async fn resolve_approval_line(
        &self,
        rule: &ApprovalRule,
        submitter: &Employee,
    ) -> Result<Vec<Employee>, EngineError> {
        let ordinal = rule.line_ordinal.ok_or_else(|| EngineError::ApproverNotFound {
            rule_id: rule.id.0.clone(),
            detail: "approval-line rule has no line ordinal".to_string(),
        })?;

        let target = submitter.approval_line(ordinal).ok_or_else(|| {
            EngineError::ApproverNotFound {
                rule_id: rule.id.0.clone(),
                detail: format!(
                    "submitter `{}` has no approval-line link at position {}",
                    submitter.id.0,
                    ordinal.position()
                ),
            }
        })?;

        let approver = self.directory.employee_by_id(target).await?.ok_or_else(|| {
            EngineError::ApproverNotFound {
                rule_id: rule.id.0.clone(),
                detail: format!("approval-line target `{}` is not in the directory", target.0),
            }
        })?;

        Ok(vec![approver])
    }

    async fn resolve_employee(&self, rule: &ApprovalRule) -> Result<Vec<Employee>, EngineError> {
        let employee_id = rule.employee_id.as_ref().ok_or_else(|| {
            EngineError::ApproverNotFound {
                rule_id: rule.id.0.clone(),
                detail: "employee rule names no employee".to_string(),
            }
        })?;

        let approver = self.directory.employee_by_id(employee_id).await?.ok_or_else(|| {
            EngineError::ApproverNotFound {
                rule_id: rule.id.0.clone(),
                detail: format!("employee `{}` is not in the directory", employee_id.0),
            }
        })?;

        Ok(vec![approver])
    }

    async fn resolve_role_and_unit(
        &self,
        rule: &ApprovalRule,
        submitter: &Employee,
    ) -> Result<Vec<Employee>, EngineError> {
        let role_id = rule.role_id.as_ref().ok_or_else(|| EngineError::ApproverNotFound {
            rule_id: rule.id.0.clone(),
            detail: "role rule names no functional role".to_string(),
        })?;

        let (unit, field) = scope_for(rule, submitter);
        Ok(self.directory.employees_matching(role_id, unit, field).await?)
    }
}

/// Unit/field scope for a role-and-unit rule: the rule's explicit
/// override wins; otherwise the submitter's own unit and field. A
/// head-of-unit rule with no override matches the head of the
/// submitter's own unit across fields.
fn scope_for<'a>(
    rule: &'a ApprovalRule,
    submitter: &'a Employee,
) -> (Option<&'a UnitId>, Option<&'a FieldId>) {
    if rule.unit_override.is_some() || rule.field_override.is_some() {
        return (
            rule.unit_override.as_ref().or(submitter.unit_id.as_ref()),
            rule.field_override.as_ref(),
        );
    }

    if rule.head_of_unit {
        return (submitter.unit_id.as_ref(), None);
    }

    (submitter.unit_id.as_ref(), submitter.field_id.as_ref())
}

#[cfg(test)]
mod tests {
    use crate::domain::employee::{
        ApprovalLineOrdinal, Employee, EmployeeId, FieldId, RoleId, UnitId,
    };
    use crate::domain::request::{ApprovalPhase, RequestKind};
    use crate::domain::rule::{
        ApprovalRule, Classification, FeedbackMode, PrecedenceTier, RuleId, SelectionMode,
    };
    use crate::errors::EngineError;
    use crate::stores::{InMemoryDirectoryStore, InMemoryRuleStore};

    use super::{ApproverResolver, NextRule, RuleResolver};

    fn rule(id: &str, tier: PrecedenceTier, sequence: u32) -> ApprovalRule {
        ApprovalRule {
            id: RuleId(id.to_string()),
            kind: RequestKind::TravelPermit,
            phase: ApprovalPhase::Submission,
            tier,
            sequence,
            selection: SelectionMode::ByRoleAndUnit,
            line_ordinal: None,
            employee_id: None,
            role_id: Some(RoleId("reviewer".to_string())),
            unit_override: None,
            field_override: None,
            head_of_unit: false,
            feedback: Some(FeedbackMode::DirectStatusUpdate),
        }
    }

    fn employee(id: &str, role: &str, unit: &str, field: Option<&str>) -> Employee {
        Employee {
            id: EmployeeId(id.to_string()),
            full_name: format!("Employee {id}"),
            role_id: Some(RoleId(role.to_string())),
            unit_id: Some(UnitId(unit.to_string())),
            field_id: field.map(|field| FieldId(field.to_string())),
            supervisor_id: None,
            secondary_manager_id: None,
        }
    }

    fn classification(employee: &Employee) -> Classification {
        Classification::for_submitter(
            RequestKind::TravelPermit,
            ApprovalPhase::Submission,
            employee,
        )
    }

    #[tokio::test]
    async fn employee_specific_rule_beats_the_catch_all() {
        let submitter = employee("emp-1", "staff", "unit-a", None);
        let mut direct = rule("rule-direct", PrecedenceTier::DirectEmployee, 1);
        direct.employee_id = Some(submitter.id.clone());
        let catch_all = rule("rule-catch-all", PrecedenceTier::CatchAll, 1);

        let resolver = RuleResolver::new(InMemoryRuleStore::new(vec![catch_all, direct]));
        let resolved = resolver.resolve(&classification(&submitter)).await.expect("resolve");

        assert_eq!(resolved.id.0, "rule-direct");
    }

    #[tokio::test]
    async fn role_rule_beats_the_catch_all_but_not_a_direct_match() {
        let submitter = employee("emp-1", "staff", "unit-a", None);
        let mut role_rule = rule("rule-role", PrecedenceTier::FunctionalRole, 1);
        role_rule.role_id = Some(RoleId("staff".to_string()));
        let catch_all = rule("rule-catch-all", PrecedenceTier::CatchAll, 1);

        let resolver = RuleResolver::new(InMemoryRuleStore::new(vec![catch_all, role_rule]));
        let resolved = resolver.resolve(&classification(&submitter)).await.expect("resolve");

        assert_eq!(resolved.id.0, "rule-role");
    }

    #[tokio::test]
    async fn no_match_at_any_tier_is_rule_not_configured() {
        let submitter = employee("emp-1", "staff", "unit-a", None);
        let resolver = RuleResolver::new(InMemoryRuleStore::new(Vec::new()));

        let error = resolver
            .resolve(&classification(&submitter))
            .await
            .expect_err("nothing configured");
        assert!(matches!(error, EngineError::RuleNotConfigured { .. }));
        assert!(error.is_resolution_failure());
    }

    #[tokio::test]
    async fn last_rule_in_sequence_resolves_to_exhausted_not_an_error() {
        let first = rule("rule-1", PrecedenceTier::CatchAll, 1);
        let second = rule("rule-2", PrecedenceTier::CatchAll, 2);
        let resolver = RuleResolver::new(InMemoryRuleStore::new(vec![first, second]));

        let next = resolver
            .resolve_next(&RuleId("rule-1".to_string()), ApprovalPhase::Submission)
            .await
            .expect("next after rule-1");
        assert!(matches!(next, NextRule::Rule(ref rule) if rule.id.0 == "rule-2"));

        let exhausted = resolver
            .resolve_next(&RuleId("rule-2".to_string()), ApprovalPhase::Submission)
            .await
            .expect("next after the last rule");
        assert_eq!(exhausted, NextRule::Exhausted);
    }

    #[tokio::test]
    async fn approval_line_targets_the_configured_link() {
        let supervisor = employee("emp-sup", "manager", "unit-a", None);
        let mut submitter = employee("emp-1", "staff", "unit-a", None);
        submitter.supervisor_id = Some(supervisor.id.clone());

        let mut line_rule = rule("rule-line", PrecedenceTier::CatchAll, 2);
        line_rule.selection = SelectionMode::ByApprovalLine;
        line_rule.line_ordinal = Some(ApprovalLineOrdinal::DirectSupervisor);
        line_rule.role_id = None;

        let resolver = ApproverResolver::new(InMemoryDirectoryStore::new(vec![
            supervisor.clone(),
            submitter.clone(),
        ]));
        let approvers = resolver.resolve(&line_rule, &submitter).await.expect("resolve");

        assert_eq!(approvers, vec![supervisor]);
    }

    #[tokio::test]
    async fn missing_approval_line_link_aborts() {
        let submitter = employee("emp-1", "staff", "unit-a", None);
        let mut line_rule = rule("rule-line", PrecedenceTier::CatchAll, 2);
        line_rule.selection = SelectionMode::ByApprovalLine;
        line_rule.line_ordinal = Some(ApprovalLineOrdinal::SecondaryManager);

        let resolver =
            ApproverResolver::new(InMemoryDirectoryStore::new(vec![submitter.clone()]));
        let error = resolver.resolve(&line_rule, &submitter).await.expect_err("no link");

        assert!(matches!(error, EngineError::ApproverNotFound { .. }));
    }

    #[tokio::test]
    async fn role_and_unit_defaults_to_the_submitters_own_scope() {
        let submitter = employee("emp-1", "staff", "unit-a", Some("field-x"));
        let same_scope = employee("emp-2", "reviewer", "unit-a", Some("field-x"));
        let other_unit = employee("emp-3", "reviewer", "unit-b", Some("field-x"));
        let other_field = employee("emp-4", "reviewer", "unit-a", Some("field-y"));

        let resolver = ApproverResolver::new(InMemoryDirectoryStore::new(vec![
            submitter.clone(),
            same_scope.clone(),
            other_unit,
            other_field,
        ]));
        let approvers =
            resolver.resolve(&rule("rule-role", PrecedenceTier::CatchAll, 1), &submitter)
                .await
                .expect("resolve");

        assert_eq!(approvers, vec![same_scope]);
    }

    #[tokio::test]
    async fn explicit_unit_override_wins_over_the_submitters_unit() {
        let submitter = employee("emp-1", "staff", "unit-a", None);
        let in_override_unit = employee("emp-2", "reviewer", "unit-hq", None);
        let in_own_unit = employee("emp-3", "reviewer", "unit-a", None);

        let mut override_rule = rule("rule-role", PrecedenceTier::CatchAll, 1);
        override_rule.unit_override = Some(UnitId("unit-hq".to_string()));

        let resolver = ApproverResolver::new(InMemoryDirectoryStore::new(vec![
            submitter.clone(),
            in_override_unit.clone(),
            in_own_unit,
        ]));
        let approvers = resolver.resolve(&override_rule, &submitter).await.expect("resolve");

        assert_eq!(approvers, vec![in_override_unit]);
    }

    #[tokio::test]
    async fn head_of_unit_without_override_matches_across_fields() {
        let submitter = employee("emp-1", "staff", "unit-a", Some("field-x"));
        let head_other_field = employee("emp-2", "unit_head", "unit-a", Some("field-y"));

        let mut head_rule = rule("rule-head", PrecedenceTier::CatchAll, 1);
        head_rule.role_id = Some(RoleId("unit_head".to_string()));
        head_rule.head_of_unit = true;

        let resolver = ApproverResolver::new(InMemoryDirectoryStore::new(vec![
            submitter.clone(),
            head_other_field.clone(),
        ]));
        let approvers = resolver.resolve(&head_rule, &submitter).await.expect("resolve");

        assert_eq!(approvers, vec![head_other_field]);
    }

    #[tokio::test]
    async fn empty_role_match_aborts() {
        let submitter = employee("emp-1", "staff", "unit-a", None);
        let resolver =
            ApproverResolver::new(InMemoryDirectoryStore::new(vec![submitter.clone()]));

        let error = resolver
            .resolve(&rule("rule-role", PrecedenceTier::CatchAll, 1), &submitter)
            .await
            .expect_err("no reviewer exists");
        assert!(matches!(error, EngineError::ApproverNotFound { .. }));
    }
}
