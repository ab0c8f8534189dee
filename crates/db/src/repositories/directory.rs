use async_trait::async_trait;
use sqlx::Row;

use tripflow_core::domain::employee::{Employee, EmployeeId, FieldId, RoleId, UnitId};
use tripflow_core::errors::StoreError;
use tripflow_core::stores::DirectoryStore;

use super::{db_err, decode_err};
use crate::DbPool;

pub struct SqlDirectoryStore {
    pool: DbPool,
}

impl SqlDirectoryStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const EMPLOYEE_COLUMNS: &str =
    "id, full_name, role_id, unit_id, field_id, supervisor_id, secondary_manager_id";

fn row_to_employee(row: &sqlx::sqlite::SqliteRow) -> Result<Employee, StoreError> {
    let id: String = row.try_get("id").map_err(|e| decode_err(e.to_string()))?;
    let full_name: String = row.try_get("full_name").map_err(|e| decode_err(e.to_string()))?;
    let role_id: Option<String> = row.try_get("role_id").map_err(|e| decode_err(e.to_string()))?;
    let unit_id: Option<String> = row.try_get("unit_id").map_err(|e| decode_err(e.to_string()))?;
    let field_id: Option<String> =
        row.try_get("field_id").map_err(|e| decode_err(e.to_string()))?;
    let supervisor_id: Option<String> =
        row.try_get("supervisor_id").map_err(|e| decode_err(e.to_string()))?;
    let secondary_manager_id: Option<String> =
        row.try_get("secondary_manager_id").map_err(|e| decode_err(e.to_string()))?;

    Ok(Employee {
        id: EmployeeId(id),
        full_name,
        role_id: role_id.map(RoleId),
        unit_id: unit_id.map(UnitId),
        field_id: field_id.map(FieldId),
        supervisor_id: supervisor_id.map(EmployeeId),
        secondary_manager_id: secondary_manager_id.map(EmployeeId),
    })
}

#[async_trait]
impl DirectoryStore for SqlDirectoryStore {
    async fn employee_by_id(&self, id: &EmployeeId) -> Result<Option<Employee>, StoreError> {
        let row =
            sqlx::query(&format!("SELECT {EMPLOYEE_COLUMNS} FROM employee WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        row.as_ref().map(row_to_employee).transpose()
    }

    async fn employees_matching(
        &self,
        role_id: &RoleId,
        unit_id: Option<&UnitId>,
        field_id: Option<&FieldId>,
    ) -> Result<Vec<Employee>, StoreError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employee
             WHERE role_id = ?
               AND (? IS NULL OR unit_id = ?)
               AND (? IS NULL OR field_id = ?)
             ORDER BY id"
        ))
        .bind(&role_id.0)
        .bind(unit_id.map(|id| id.0.clone()))
        .bind(unit_id.map(|id| id.0.clone()))
        .bind(field_id.map(|id| id.0.clone()))
        .bind(field_id.map(|id| id.0.clone()))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_employee).collect()
    }
}

#[cfg(test)]
pub(crate) async fn insert_employee(pool: &crate::DbPool, employee: &Employee) {
    let now = super::fmt_ts(chrono::Utc::now());
    sqlx::query(
        "INSERT INTO employee (id, full_name, role_id, unit_id, field_id, supervisor_id,
                               secondary_manager_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&employee.id.0)
    .bind(&employee.full_name)
    .bind(employee.role_id.as_ref().map(|id| id.0.clone()))
    .bind(employee.unit_id.as_ref().map(|id| id.0.clone()))
    .bind(employee.field_id.as_ref().map(|id| id.0.clone()))
    .bind(employee.supervisor_id.as_ref().map(|id| id.0.clone()))
    .bind(employee.secondary_manager_id.as_ref().map(|id| id.0.clone()))
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .expect("insert employee fixture");
}
