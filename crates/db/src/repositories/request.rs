use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use tripflow_core::domain::employee::EmployeeId;
use tripflow_core::domain::request::{
    RequestAssignee, RequestId, RequestStatus, TravelRequest,
};
use tripflow_core::errors::StoreError;
use tripflow_core::stores::RequestStore;

use super::{db_err, decode_err, fmt_ts, parse_ts};
use crate::DbPool;

pub struct SqlRequestStore {
    pool: DbPool,
}

impl SqlRequestStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn request_by_id(
        &self,
        id: &RequestId,
    ) -> Result<Option<TravelRequest>, StoreError> {
        let row = sqlx::query(
            "SELECT id, request_kind, submitter_id, purpose, status, attachment_path,
                    created_at, updated_at
             FROM travel_request WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(row_to_request).transpose()
    }

    pub async fn assignee_by_id(
        &self,
        id: &str,
    ) -> Result<Option<RequestAssignee>, StoreError> {
        let row = sqlx::query(
            "SELECT id, request_id, employee_id, status, updated_at
             FROM request_assignee WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(row_to_assignee).transpose()
    }
}

fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> Result<TravelRequest, StoreError> {
    let id: String = row.try_get("id").map_err(|e| decode_err(e.to_string()))?;
    let kind: String = row.try_get("request_kind").map_err(|e| decode_err(e.to_string()))?;
    let submitter_id: String =
        row.try_get("submitter_id").map_err(|e| decode_err(e.to_string()))?;
    let purpose: Option<String> = row.try_get("purpose").map_err(|e| decode_err(e.to_string()))?;
    let status: i64 = row.try_get("status").map_err(|e| decode_err(e.to_string()))?;
    let attachment_path: Option<String> =
        row.try_get("attachment_path").map_err(|e| decode_err(e.to_string()))?;
    let created_at: String = row.try_get("created_at").map_err(|e| decode_err(e.to_string()))?;
    let updated_at: String = row.try_get("updated_at").map_err(|e| decode_err(e.to_string()))?;

    Ok(TravelRequest {
        id: RequestId(id),
        kind: kind.parse().map_err(decode_err)?,
        submitter_id: EmployeeId(submitter_id),
        purpose,
        status: RequestStatus::from_code(status)
            .ok_or_else(|| decode_err(format!("unknown request status code `{status}`")))?,
        attachment_path,
        created_at: parse_ts(&created_at, "created_at")?,
        updated_at: parse_ts(&updated_at, "updated_at")?,
    })
}

fn row_to_assignee(row: &sqlx::sqlite::SqliteRow) -> Result<RequestAssignee, StoreError> {
    let id: String = row.try_get("id").map_err(|e| decode_err(e.to_string()))?;
    let request_id: String =
        row.try_get("request_id").map_err(|e| decode_err(e.to_string()))?;
    let employee_id: String =
        row.try_get("employee_id").map_err(|e| decode_err(e.to_string()))?;
    let status: i64 = row.try_get("status").map_err(|e| decode_err(e.to_string()))?;
    let updated_at: String = row.try_get("updated_at").map_err(|e| decode_err(e.to_string()))?;

    Ok(RequestAssignee {
        id,
        request_id: RequestId(request_id),
        employee_id: EmployeeId(employee_id),
        status: RequestStatus::from_code(status)
            .ok_or_else(|| decode_err(format!("unknown request status code `{status}`")))?,
        updated_at: parse_ts(&updated_at, "updated_at")?,
    })
}

#[async_trait]
impl RequestStore for SqlRequestStore {
    async fn set_status(
        &self,
        request_id: &RequestId,
        status: RequestStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE travel_request SET status = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.code())
        .bind(fmt_ts(Utc::now()))
        .bind(&request_id.0)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Backend(format!("request `{}` not found", request_id.0)));
        }
        Ok(())
    }

    async fn set_assignee_status(
        &self,
        assignee_record_id: &str,
        status: RequestStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE request_assignee SET status = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.code())
        .bind(fmt_ts(Utc::now()))
        .bind(assignee_record_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Backend(format!(
                "request assignee `{assignee_record_id}` not found"
            )));
        }
        Ok(())
    }

    async fn clear_attachment(&self, request_id: &RequestId) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE travel_request SET attachment_path = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(fmt_ts(Utc::now()))
        .bind(&request_id.0)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Backend(format!("request `{}` not found", request_id.0)));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) async fn insert_request(pool: &crate::DbPool, request: &TravelRequest) {
    sqlx::query(
        "INSERT INTO travel_request (id, request_kind, submitter_id, purpose, status,
                                     attachment_path, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&request.id.0)
    .bind(request.kind.as_str())
    .bind(&request.submitter_id.0)
    .bind(&request.purpose)
    .bind(request.status.code())
    .bind(&request.attachment_path)
    .bind(fmt_ts(request.created_at))
    .bind(fmt_ts(request.updated_at))
    .execute(pool)
    .await
    .expect("insert request fixture");
}

#[cfg(test)]
pub(crate) async fn insert_request_assignee(
    pool: &crate::DbPool,
    assignee: &RequestAssignee,
) {
    sqlx::query(
        "INSERT INTO request_assignee (id, request_id, employee_id, status, updated_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&assignee.id)
    .bind(&assignee.request_id.0)
    .bind(&assignee.employee_id.0)
    .bind(assignee.status.code())
    .bind(fmt_ts(assignee.updated_at))
    .execute(pool)
    .await
    .expect("insert request assignee fixture");
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use tripflow_core::domain::employee::{Employee, EmployeeId, RoleId, UnitId};
    use tripflow_core::domain::request::{
        RequestAssignee, RequestId, RequestKind, RequestStatus, TravelRequest,
    };
    use tripflow_core::errors::StoreError;
    use tripflow_core::stores::RequestStore;

    use super::{insert_request, insert_request_assignee, SqlRequestStore};
    use crate::repositories::directory::insert_employee;
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
                kind: RequestKind::AssignmentLetter,
                submitter_id: EmployeeId("emp-s".to_string()),
                purpose: Some("regional audit".to_string()),
                status: RequestStatus::InApproval,
                attachment_path: Some("uploads/assignment.pdf".to_string()),
                created_at: now,
                updated_at: now,
            },
        )
        .await;
        insert_request_assignee(
            &pool,
            &RequestAssignee {
                id: "ra-1".to_string(),
                request_id: RequestId("req-1".to_string()),
                employee_id: EmployeeId("emp-s".to_string()),
                status: RequestStatus::InApproval,
                updated_at: now,
            },
        )
        .await;
        pool
    }

    #[tokio::test]
    async fn status_writes_preserve_the_numeric_codes() {
        let pool = setup().await;
        let store = SqlRequestStore::new(pool.clone());

        store
            .set_status(&RequestId("req-1".to_string()), RequestStatus::Approved)
            .await
            .expect("set status");

        let (code,): (i64,) = sqlx::query_as("SELECT status FROM travel_request WHERE id = ?")
            .bind("req-1")
            .fetch_one(&pool)
            .await
            .expect("read raw status");
        assert_eq!(code, 2);

        let found = store
            .request_by_id(&RequestId("req-1".to_string()))
            .await
            .expect("query")
            .expect("exists");
        assert_eq!(found.status, RequestStatus::Approved);
    }

    #[tokio::test]
    async fn assignee_status_updates_only_the_named_record() {
        let pool = setup().await;
        let store = SqlRequestStore::new(pool);

        store
            .set_assignee_status("ra-1", RequestStatus::RevisionRequested)
            .await
            .expect("set assignee status");

        let assignee = store.assignee_by_id("ra-1").await.expect("query").expect("exists");
        assert_eq!(assignee.status.code(), 3);

        let error = store
            .set_assignee_status("ra-ghost", RequestStatus::Canceled)
            .await
            .expect_err("unknown record");
        assert!(matches!(error, StoreError::Backend(_)));
    }

    #[tokio::test]
    async fn clearing_the_attachment_is_persistent() {
        let pool = setup().await;
        let store = SqlRequestStore::new(pool);

        store
            .clear_attachment(&RequestId("req-1".to_string()))
            .await
            .expect("clear attachment");

        let found = store
            .request_by_id(&RequestId("req-1".to_string()))
            .await
            .expect("query")
            .expect("exists");
        assert_eq!(found.attachment_path, None);
    }

    #[tokio::test]
    async fn unknown_request_surfaces_a_backend_error() {
        let pool = setup().await;
        let store = SqlRequestStore::new(pool);

        let error = store
            .set_status(&RequestId("req-ghost".to_string()), RequestStatus::Canceled)
            .await
            .expect_err("unknown request");
        assert!(matches!(error, StoreError::Backend(_)));
    }
}
