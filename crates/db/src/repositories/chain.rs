use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use tripflow_core::domain::employee::{ApprovalLineOrdinal, EmployeeId, RoleId, UnitId};
use tripflow_core::domain::request::{ApprovalPhase, RequestId};
use tripflow_core::domain::rule::RuleId;
use tripflow_core::domain::stage::{
    ApprovalStage, StageAssignee, StageDecision, StageId, StageStatus,
};
use tripflow_core::errors::StoreError;
use tripflow_core::stores::ChainStore;

use super::{db_err, decode_err, fmt_ts, parse_opt_ts, parse_ts};
use crate::DbPool;

pub struct SqlChainStore {
    pool: DbPool,
}

impl SqlChainStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn assignees_for(&self, stage_id: &StageId) -> Result<Vec<StageAssignee>, StoreError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT id, stage_id, employee_id, created_by, created_at
             FROM stage_assignee WHERE stage_id = ? ORDER BY id",
        )
        .bind(&stage_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_assignee).collect()
    }

    async fn hydrate(&self, row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalStage, StoreError> {
        let mut stage = row_to_stage(row)?;
        stage.assignees = self.assignees_for(&stage.id).await?;
        Ok(stage)
    }
}

const STAGE_COLUMNS: &str = "id, request_id, request_kind, phase, rule_id, role_id, unit_id, \
     note, remark, status, revises_stage_id, line_ordinal, group_mode, created_by, created_at, \
     approved_by, approved_at";

fn row_to_stage(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalStage, StoreError> {
    let id: String = row.try_get("id").map_err(|e| decode_err(e.to_string()))?;
    let request_id: String = row.try_get("request_id").map_err(|e| decode_err(e.to_string()))?;
    let kind: String = row.try_get("request_kind").map_err(|e| decode_err(e.to_string()))?;
    let phase: String = row.try_get("phase").map_err(|e| decode_err(e.to_string()))?;
    let rule_id: Option<String> = row.try_get("rule_id").map_err(|e| decode_err(e.to_string()))?;
    let role_id: Option<String> = row.try_get("role_id").map_err(|e| decode_err(e.to_string()))?;
    let unit_id: Option<String> = row.try_get("unit_id").map_err(|e| decode_err(e.to_string()))?;
    let note: Option<String> = row.try_get("note").map_err(|e| decode_err(e.to_string()))?;
    let remark: Option<String> = row.try_get("remark").map_err(|e| decode_err(e.to_string()))?;
    let status: String = row.try_get("status").map_err(|e| decode_err(e.to_string()))?;
    let revises_stage_id: Option<String> =
        row.try_get("revises_stage_id").map_err(|e| decode_err(e.to_string()))?;
    let line_ordinal: Option<i64> =
        row.try_get("line_ordinal").map_err(|e| decode_err(e.to_string()))?;
    let group_mode: Option<String> =
        row.try_get("group_mode").map_err(|e| decode_err(e.to_string()))?;
    let created_by: String = row.try_get("created_by").map_err(|e| decode_err(e.to_string()))?;
    let created_at: String = row.try_get("created_at").map_err(|e| decode_err(e.to_string()))?;
    let approved_by: Option<String> =
        row.try_get("approved_by").map_err(|e| decode_err(e.to_string()))?;
    let approved_at: Option<String> =
        row.try_get("approved_at").map_err(|e| decode_err(e.to_string()))?;

    let line_ordinal = match line_ordinal {
        Some(position) => Some(
            u8::try_from(position)
                .ok()
                .and_then(ApprovalLineOrdinal::from_position)
                .ok_or_else(|| decode_err(format!("line_ordinal `{position}` out of range")))?,
        ),
        None => None,
    };

    Ok(ApprovalStage {
        id: StageId(id),
        request_id: RequestId(request_id),
        kind: kind.parse().map_err(decode_err)?,
        phase: phase.parse().map_err(decode_err)?,
        rule_id: rule_id.map(RuleId),
        role_id: role_id.map(RoleId),
        unit_id: unit_id.map(UnitId),
        note,
        remark,
        status: status.parse().map_err(decode_err)?,
        revises_stage_id: revises_stage_id.map(StageId),
        line_ordinal,
        group_mode: group_mode.map(|raw| raw.parse().map_err(decode_err)).transpose()?,
        created_by: EmployeeId(created_by),
        created_at: parse_ts(&created_at, "created_at")?,
        approved_by: approved_by.map(EmployeeId),
        approved_at: parse_opt_ts(approved_at, "approved_at")?,
        assignees: Vec::new(),
    })
}

fn row_to_assignee(row: &sqlx::sqlite::SqliteRow) -> Result<StageAssignee, StoreError> {
    let id: String = row.try_get("id").map_err(|e| decode_err(e.to_string()))?;
    let stage_id: String = row.try_get("stage_id").map_err(|e| decode_err(e.to_string()))?;
    let employee_id: String =
        row.try_get("employee_id").map_err(|e| decode_err(e.to_string()))?;
    let created_by: String = row.try_get("created_by").map_err(|e| decode_err(e.to_string()))?;
    let created_at: String = row.try_get("created_at").map_err(|e| decode_err(e.to_string()))?;

    Ok(StageAssignee {
        id,
        stage_id: StageId(stage_id),
        employee_id: EmployeeId(employee_id),
        created_by: EmployeeId(created_by),
        created_at: parse_ts(&created_at, "created_at")?,
    })
}

#[async_trait]
impl ChainStore for SqlChainStore {
    async fn create_stages(&self, stages: &[ApprovalStage]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        for stage in stages {
            sqlx::query(
                "INSERT INTO approval_stage (id, request_id, request_kind, phase, rule_id,
                                             role_id, unit_id, note, remark, status,
                                             revises_stage_id, line_ordinal, group_mode,
                                             created_by, created_at, approved_by, approved_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&stage.id.0)
            .bind(&stage.request_id.0)
            .bind(stage.kind.as_str())
            .bind(stage.phase.as_str())
            .bind(stage.rule_id.as_ref().map(|id| id.0.clone()))
            .bind(stage.role_id.as_ref().map(|id| id.0.clone()))
            .bind(stage.unit_id.as_ref().map(|id| id.0.clone()))
            .bind(&stage.note)
            .bind(&stage.remark)
            .bind(stage.status.as_str())
            .bind(stage.revises_stage_id.as_ref().map(|id| id.0.clone()))
            .bind(stage.line_ordinal.map(|ordinal| i64::from(ordinal.position())))
            .bind(stage.group_mode.map(|mode| mode.as_str()))
            .bind(&stage.created_by.0)
            .bind(fmt_ts(stage.created_at))
            .bind(stage.approved_by.as_ref().map(|id| id.0.clone()))
            .bind(stage.approved_at.map(fmt_ts))
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            for assignee in &stage.assignees {
                sqlx::query(
                    "INSERT INTO stage_assignee (id, stage_id, employee_id, created_by, created_at)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&assignee.id)
                .bind(&assignee.stage_id.0)
                .bind(&assignee.employee_id.0)
                .bind(&assignee.created_by.0)
                .bind(fmt_ts(assignee.created_at))
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            }
        }

        tx.commit().await.map_err(db_err)
    }

    async fn stage_by_id(&self, id: &StageId) -> Result<Option<ApprovalStage>, StoreError> {
        let row =
            sqlx::query(&format!("SELECT {STAGE_COLUMNS} FROM approval_stage WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        match row {
            Some(ref row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn update_decision(
        &self,
        stage_id: &StageId,
        decision: &StageDecision,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE approval_stage
             SET status = ?, approved_by = ?, approved_at = ?, note = COALESCE(?, note)
             WHERE id = ? AND status = ?",
        )
        .bind(decision.code.stage_status().as_str())
        .bind(&decision.approver_id.0)
        .bind(fmt_ts(decision.acted_at))
        .bind(&decision.note)
        .bind(&stage_id.0)
        .bind(StageStatus::Pending.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let exists: Option<sqlx::sqlite::SqliteRow> =
            sqlx::query("SELECT id FROM approval_stage WHERE id = ?")
                .bind(&stage_id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        if exists.is_some() {
            Err(StoreError::Conflict { stage_id: stage_id.0.clone() })
        } else {
            Err(StoreError::Backend(format!("stage `{}` not found", stage_id.0)))
        }
    }

    async fn stages_for(
        &self,
        request_id: &RequestId,
        assignee_id: Option<&EmployeeId>,
        phase: ApprovalPhase,
    ) -> Result<Vec<ApprovalStage>, StoreError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {STAGE_COLUMNS} FROM approval_stage
             WHERE request_id = ? AND phase = ?
               AND (? IS NULL OR EXISTS (
                       SELECT 1 FROM stage_assignee
                       WHERE stage_assignee.stage_id = approval_stage.id
                         AND stage_assignee.employee_id = ?))
             ORDER BY created_at, id"
        ))
        .bind(&request_id.0)
        .bind(phase.as_str())
        .bind(assignee_id.map(|id| id.0.clone()))
        .bind(assignee_id.map(|id| id.0.clone()))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut stages = Vec::with_capacity(rows.len());
        for row in &rows {
            stages.push(self.hydrate(row).await?);
        }
        Ok(stages)
    }

    async fn most_recent_stage_before(
        &self,
        request_id: &RequestId,
        assignee_id: Option<&EmployeeId>,
        anchor: DateTime<Utc>,
    ) -> Result<Option<ApprovalStage>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {STAGE_COLUMNS} FROM approval_stage
             WHERE request_id = ? AND created_at < ?
               AND (? IS NULL OR EXISTS (
                       SELECT 1 FROM stage_assignee
                       WHERE stage_assignee.stage_id = approval_stage.id
                         AND stage_assignee.employee_id = ?))
             ORDER BY created_at DESC, id DESC
             LIMIT 1"
        ))
        .bind(&request_id.0)
        .bind(fmt_ts(anchor))
        .bind(assignee_id.map(|id| id.0.clone()))
        .bind(assignee_id.map(|id| id.0.clone()))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(ref row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use tripflow_core::domain::employee::{Employee, EmployeeId, RoleId, UnitId};
    use tripflow_core::domain::request::{
        ApprovalPhase, RequestId, RequestKind, RequestStatus, TravelRequest,
    };
    use tripflow_core::domain::stage::{
        ApprovalStage, DecisionCode, StageAssignee, StageDecision, StageId, StageStatus,
    };
    use tripflow_core::errors::StoreError;
    use tripflow_core::stores::ChainStore;

    use super::SqlChainStore;
    use crate::repositories::directory::insert_employee;
    use crate::repositories::request::insert_request;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        insert_employee(
            &pool,
            &Employee {
                id: EmployeeId("emp-s".to_string()),
                full_name: "Submitter".to_string(),
                role_id: Some(RoleId("staff".to_string())),
                unit_id: Some(UnitId("unit-a".to_string())),
                field_id: None,
                supervisor_id: None,
                secondary_manager_id: None,
            },
        )
        .await;
        let now = Utc::now();
        insert_request(
            &pool,
            &TravelRequest {
                id: RequestId("req-1".to_string()),
                kind: RequestKind::TravelPermit,
                submitter_id: EmployeeId("emp-s".to_string()),
                purpose: Some("site survey".to_string()),
                status: RequestStatus::InApproval,
                attachment_path: None,
                created_at: now,
                updated_at: now,
            },
        )
        .await;
        pool
    }

    fn stage(id: &str, minutes_ago: i64, assignee: &str) -> ApprovalStage {
        let created_at = Utc::now() - Duration::minutes(minutes_ago);
        ApprovalStage {
            id: StageId(id.to_string()),
            request_id: RequestId("req-1".to_string()),
            kind: RequestKind::TravelPermit,
            phase: ApprovalPhase::Submission,
            rule_id: None,
            role_id: Some(RoleId("reviewer".to_string())),
            unit_id: Some(UnitId("unit-a".to_string())),
            note: None,
            remark: None,
            status: StageStatus::Pending,
            revises_stage_id: None,
            line_ordinal: None,
            group_mode: None,
            created_by: EmployeeId("emp-s".to_string()),
            created_at,
            approved_by: None,
            approved_at: None,
            assignees: vec![StageAssignee {
                id: format!("{id}-a"),
                stage_id: StageId(id.to_string()),
                employee_id: EmployeeId(assignee.to_string()),
                created_by: EmployeeId("emp-s".to_string()),
                created_at,
            }],
        }
    }

    #[tokio::test]
    async fn stage_and_assignees_round_trip() {
        let pool = setup().await;
        let store = SqlChainStore::new(pool);

        let original = stage("stg-1", 5, "emp-a");
        store.create_stages(&[original.clone()]).await.expect("create");

        let found = store
            .stage_by_id(&StageId("stg-1".to_string()))
            .await
            .expect("query")
            .expect("exists");
        assert_eq!(found.request_id.0, "req-1");
        assert_eq!(found.status, StageStatus::Pending);
        assert_eq!(found.assignees.len(), 1);
        assert_eq!(found.assignees[0].employee_id.0, "emp-a");
        assert_eq!(found.created_at, original.created_at);
    }

    #[tokio::test]
    async fn failed_batch_rolls_back_every_row() {
        let pool = setup().await;
        let store = SqlChainStore::new(pool.clone());

        // The second stage reuses the first assignee's primary key, so
        // the batch must fail after the first stage row was written.
        let good = stage("stg-1", 5, "emp-a");
        let mut bad = stage("stg-2", 1, "emp-b");
        bad.assignees[0].id = "stg-1-a".to_string();

        let error =
            store.create_stages(&[good, bad]).await.expect_err("duplicate assignee id");
        assert!(matches!(error, StoreError::Backend(_)));

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM approval_stage")
            .fetch_one(&pool)
            .await
            .expect("count stages");
        assert_eq!(count.0, 0, "partial writes must not survive the rollback");

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM stage_assignee")
            .fetch_one(&pool)
            .await
            .expect("count assignees");
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn decision_update_is_one_shot() {
        let pool = setup().await;
        let store = SqlChainStore::new(pool);
        store.create_stages(&[stage("stg-1", 5, "emp-a")]).await.expect("create");

        let decision = StageDecision {
            code: DecisionCode::Approved,
            approver_id: EmployeeId("emp-a".to_string()),
            note: Some("ok to proceed".to_string()),
            acted_at: Utc::now(),
        };
        store
            .update_decision(&StageId("stg-1".to_string()), &decision)
            .await
            .expect("first decision");

        let found = store
            .stage_by_id(&StageId("stg-1".to_string()))
            .await
            .expect("query")
            .expect("exists");
        assert_eq!(found.status, StageStatus::Approved);
        assert_eq!(found.approved_by, Some(EmployeeId("emp-a".to_string())));
        assert_eq!(found.note.as_deref(), Some("ok to proceed"));

        let error = store
            .update_decision(&StageId("stg-1".to_string()), &decision)
            .await
            .expect_err("second decision");
        assert!(matches!(error, StoreError::Conflict { .. }));

        let error = store
            .update_decision(&StageId("stg-ghost".to_string()), &decision)
            .await
            .expect_err("unknown stage");
        assert!(matches!(error, StoreError::Backend(_)));
    }

    #[tokio::test]
    async fn listing_is_time_ordered_and_assignee_scoped() {
        let pool = setup().await;
        let store = SqlChainStore::new(pool);
        store
            .create_stages(&[stage("stg-2", 5, "emp-b"), stage("stg-1", 10, "emp-a")])
            .await
            .expect("create");

        let all = store
            .stages_for(&RequestId("req-1".to_string()), None, ApprovalPhase::Submission)
            .await
            .expect("query");
        let ids: Vec<&str> = all.iter().map(|stage| stage.id.0.as_str()).collect();
        assert_eq!(ids, vec!["stg-1", "stg-2"]);
        assert!(all.windows(2).all(|pair| pair[0].created_at <= pair[1].created_at));

        let scoped = store
            .stages_for(
                &RequestId("req-1".to_string()),
                Some(&EmployeeId("emp-b".to_string())),
                ApprovalPhase::Submission,
            )
            .await
            .expect("query");
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].id.0, "stg-2");
    }

    #[tokio::test]
    async fn most_recent_before_is_strictly_earlier_than_the_anchor() {
        let pool = setup().await;
        let store = SqlChainStore::new(pool);
        let anchor_stage = stage("stg-3", 0, "emp-c");
        let anchor = anchor_stage.created_at;
        store
            .create_stages(&[
                stage("stg-1", 10, "emp-a"),
                stage("stg-2", 5, "emp-b"),
                anchor_stage,
            ])
            .await
            .expect("create");

        let prior = store
            .most_recent_stage_before(&RequestId("req-1".to_string()), None, anchor)
            .await
            .expect("query")
            .expect("exists");
        assert_eq!(prior.id.0, "stg-2");
        assert!(prior.created_at < anchor);

        let scoped = store
            .most_recent_stage_before(
                &RequestId("req-1".to_string()),
                Some(&EmployeeId("emp-a".to_string())),
                anchor,
            )
            .await
            .expect("query")
            .expect("exists");
        assert_eq!(scoped.id.0, "stg-1");

        let earliest = store
            .stage_by_id(&StageId("stg-1".to_string()))
            .await
            .expect("query")
            .expect("exists");
        let none = store
            .most_recent_stage_before(
                &RequestId("req-1".to_string()),
                None,
                earliest.created_at,
            )
            .await
            .expect("query");
        assert!(none.is_none(), "nothing precedes the first stage");
    }
}
