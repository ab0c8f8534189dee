use tripflow_core::errors::StoreError;

use crate::connection::DbPool;
use crate::repositories::db_err;

const SEED_EMPLOYEE_COUNT: i64 = 6;
const SEED_RULE_COUNT: i64 = 7;
const SEED_REQUEST_ID: &str = "req-demo-001";

/// Deterministic demo dataset: a small directory with a two-level
/// approval line, rule chains for both request kinds and both phases,
/// and one submitted travel permit. Safe to reload.
pub struct DemoSeedDataset;

#[derive(Clone, Debug)]
pub struct SeedResult {
    pub employees: i64,
    pub rules: i64,
    pub requests: i64,
}

#[derive(Clone, Debug)]
pub struct SeedVerification {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

impl DemoSeedDataset {
    pub const SQL: &'static str = include_str!("../../../config/fixtures/demo_seed.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, StoreError> {
        let mut tx = pool.begin().await.map_err(db_err)?;
        sqlx::raw_sql(Self::SQL).execute(&mut *tx).await.map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        let employees = count(pool, "SELECT COUNT(*) FROM employee WHERE id LIKE 'emp-demo-%'")
            .await?;
        let rules =
            count(pool, "SELECT COUNT(*) FROM approval_rule WHERE id LIKE 'rule-demo-%'").await?;
        let requests =
            count(pool, "SELECT COUNT(*) FROM travel_request WHERE id = 'req-demo-001'").await?;

        Ok(SeedResult { employees, rules, requests })
    }

    pub async fn verify(pool: &DbPool) -> Result<SeedVerification, StoreError> {
        let employees =
            count(pool, "SELECT COUNT(*) FROM employee WHERE id LIKE 'emp-demo-%'").await?;
        let rules =
            count(pool, "SELECT COUNT(*) FROM approval_rule WHERE id LIKE 'rule-demo-%'").await?;
        let request_status: Option<i64> = sqlx::query_scalar(
            "SELECT status FROM travel_request WHERE id = ?",
        )
        .bind(SEED_REQUEST_ID)
        .fetch_optional(pool)
        .await
        .map_err(db_err)?;
        let submitter_line: i64 = count(
            pool,
            "SELECT COUNT(*) FROM employee
             WHERE id = 'emp-demo-sub' AND supervisor_id IS NOT NULL
               AND secondary_manager_id IS NOT NULL",
        )
        .await?;

        let checks = vec![
            ("demo-employees", employees == SEED_EMPLOYEE_COUNT),
            ("demo-rules", rules == SEED_RULE_COUNT),
            ("demo-request-submitted", request_status == Some(1)),
            ("demo-approval-line", submitter_line == 1),
        ];
        let all_present = checks.iter().all(|(_, passed)| *passed);

        Ok(SeedVerification { all_present, checks })
    }
}

async fn count(pool: &DbPool, sql: &str) -> Result<i64, StoreError> {
    sqlx::query_scalar(sql).fetch_one(pool).await.map_err(db_err)
}
