use async_trait::async_trait;
use sqlx::Row;

use tripflow_core::domain::employee::{ApprovalLineOrdinal, EmployeeId, FieldId, RoleId, UnitId};
use tripflow_core::domain::request::ApprovalPhase;
use tripflow_core::domain::rule::{ApprovalRule, Classification, PrecedenceTier, RuleId};
use tripflow_core::errors::StoreError;
use tripflow_core::stores::RuleStore;

use super::{db_err, decode_err};
use crate::DbPool;

pub struct SqlRuleStore {
    pool: DbPool,
}

impl SqlRuleStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Number of configured rules; readiness probes use this to spot an
    /// unseeded installation.
    pub async fn count(&self) -> Result<i64, StoreError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM approval_rule")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }
}

const RULE_COLUMNS: &str = "id, request_kind, phase, tier, sequence, selection_mode, \
     line_ordinal, employee_id, role_id, unit_override, field_override, head_of_unit, \
     feedback_mode";

fn row_to_rule(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalRule, StoreError> {
    let id: String = row.try_get("id").map_err(|e| decode_err(e.to_string()))?;
    let kind: String = row.try_get("request_kind").map_err(|e| decode_err(e.to_string()))?;
    let phase: String = row.try_get("phase").map_err(|e| decode_err(e.to_string()))?;
    let tier: String = row.try_get("tier").map_err(|e| decode_err(e.to_string()))?;
    let sequence: i64 = row.try_get("sequence").map_err(|e| decode_err(e.to_string()))?;
    let selection: String =
        row.try_get("selection_mode").map_err(|e| decode_err(e.to_string()))?;
    let line_ordinal: Option<i64> =
        row.try_get("line_ordinal").map_err(|e| decode_err(e.to_string()))?;
    let employee_id: Option<String> =
        row.try_get("employee_id").map_err(|e| decode_err(e.to_string()))?;
    let role_id: Option<String> = row.try_get("role_id").map_err(|e| decode_err(e.to_string()))?;
    let unit_override: Option<String> =
        row.try_get("unit_override").map_err(|e| decode_err(e.to_string()))?;
    let field_override: Option<String> =
        row.try_get("field_override").map_err(|e| decode_err(e.to_string()))?;
    let head_of_unit: i64 =
        row.try_get("head_of_unit").map_err(|e| decode_err(e.to_string()))?;
    let feedback: Option<String> =
        row.try_get("feedback_mode").map_err(|e| decode_err(e.to_string()))?;

    let line_ordinal = match line_ordinal {
        Some(position) => Some(
            u8::try_from(position)
                .ok()
                .and_then(ApprovalLineOrdinal::from_position)
                .ok_or_else(|| decode_err(format!("line_ordinal `{position}` out of range")))?,
        ),
        None => None,
    };

    Ok(ApprovalRule {
        id: RuleId(id),
        kind: kind.parse().map_err(decode_err)?,
        phase: phase.parse().map_err(decode_err)?,
        tier: tier.parse().map_err(decode_err)?,
        sequence: u32::try_from(sequence)
            .map_err(|_| decode_err(format!("sequence `{sequence}` out of range")))?,
        selection: selection.parse().map_err(decode_err)?,
        line_ordinal,
        employee_id: employee_id.map(EmployeeId),
        role_id: role_id.map(RoleId),
        unit_override: unit_override.map(UnitId),
        field_override: field_override.map(FieldId),
        head_of_unit: head_of_unit != 0,
        feedback: feedback.map(|raw| raw.parse().map_err(decode_err)).transpose()?,
    })
}

#[async_trait]
impl RuleStore for SqlRuleStore {
    async fn lookup(
        &self,
        classification: &Classification,
        tier: PrecedenceTier,
    ) -> Result<Option<ApprovalRule>, StoreError> {
        let base = format!(
            "SELECT {RULE_COLUMNS} FROM approval_rule
             WHERE request_kind = ? AND phase = ? AND tier = ?"
        );

        let row = match tier {
            PrecedenceTier::DirectEmployee => {
                sqlx::query(&format!("{base} AND employee_id = ? ORDER BY sequence LIMIT 1"))
                    .bind(classification.kind.as_str())
                    .bind(classification.phase.as_str())
                    .bind(tier.as_str())
                    .bind(&classification.employee_id.0)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_err)?
            }
            PrecedenceTier::FunctionalRole => {
                let Some(role_id) = &classification.role_id else {
                    return Ok(None);
                };
                sqlx::query(&format!("{base} AND role_id = ? ORDER BY sequence LIMIT 1"))
                    .bind(classification.kind.as_str())
                    .bind(classification.phase.as_str())
                    .bind(tier.as_str())
                    .bind(&role_id.0)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_err)?
            }
            PrecedenceTier::CatchAll => {
                sqlx::query(&format!("{base} ORDER BY sequence LIMIT 1"))
                    .bind(classification.kind.as_str())
                    .bind(classification.phase.as_str())
                    .bind(tier.as_str())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_err)?
            }
        };

        row.as_ref().map(row_to_rule).transpose()
    }

    async fn rule_by_id(&self, id: &RuleId) -> Result<Option<ApprovalRule>, StoreError> {
        let row = sqlx::query(&format!("SELECT {RULE_COLUMNS} FROM approval_rule WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(row_to_rule).transpose()
    }

    async fn next_in_sequence(
        &self,
        current: &RuleId,
        phase: ApprovalPhase,
    ) -> Result<Option<ApprovalRule>, StoreError> {
        let Some(current) = self.rule_by_id(current).await? else {
            return Ok(None);
        };

        let row = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM approval_rule
             WHERE request_kind = ? AND phase = ? AND sequence > ?
             ORDER BY sequence
             LIMIT 1"
        ))
        .bind(current.kind.as_str())
        .bind(phase.as_str())
        .bind(i64::from(current.sequence))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(row_to_rule).transpose()
    }
}

#[cfg(test)]
pub(crate) async fn insert_rule(pool: &crate::DbPool, rule: &ApprovalRule) {
    use tripflow_core::domain::rule::FeedbackMode;

    sqlx::query(
        "INSERT INTO approval_rule (id, request_kind, phase, tier, sequence, selection_mode,
                                    line_ordinal, employee_id, role_id, unit_override,
                                    field_override, head_of_unit, feedback_mode, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&rule.id.0)
    .bind(rule.kind.as_str())
    .bind(rule.phase.as_str())
    .bind(rule.tier.as_str())
    .bind(i64::from(rule.sequence))
    .bind(rule.selection.as_str())
    .bind(rule.line_ordinal.map(|ordinal| i64::from(ordinal.position())))
    .bind(rule.employee_id.as_ref().map(|id| id.0.clone()))
    .bind(rule.role_id.as_ref().map(|id| id.0.clone()))
    .bind(rule.unit_override.as_ref().map(|id| id.0.clone()))
    .bind(rule.field_override.as_ref().map(|id| id.0.clone()))
    .bind(i64::from(rule.head_of_unit))
    .bind(rule.feedback.map(FeedbackMode::as_str))
    .bind(super::fmt_ts(chrono::Utc::now()))
    .execute(pool)
    .await
    .expect("insert rule fixture");
}
