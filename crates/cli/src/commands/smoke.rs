use std::time::Instant;

use serde::Serialize;

use crate::commands::CommandResult;
use tripflow_core::chain::{ApproveOutcome, ChainEngine, Decision, KindProfile, SubmitContext};
use tripflow_core::config::{AppConfig, LoadOptions};
use tripflow_core::domain::employee::{
    ApprovalLineOrdinal, Employee, EmployeeId, RoleId, UnitId,
};
use tripflow_core::domain::request::{
    ApprovalPhase, RequestId, RequestKind, RequestStatus, TravelRequest,
};
use tripflow_core::domain::rule::{
    ApprovalRule, FeedbackMode, PrecedenceTier, RuleId, SelectionMode,
};
use tripflow_core::domain::stage::DecisionCode;
use tripflow_core::stores::{
    InMemoryChainStore, InMemoryDirectoryStore, InMemoryRequestStore, InMemoryRuleStore,
};
use tripflow_db::{connect_with_settings, migrations};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config = match timed_check(|| AppConfig::load(LoadOptions::default())) {
        Ok((elapsed_ms, config)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Pass,
                elapsed_ms,
                message: "configuration loaded and validated".to_string(),
            });
            config
        }
        Err((elapsed_ms, error)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Fail,
                elapsed_ms,
                message: error.to_string(),
            });
            checks.push(skipped("db_connectivity"));
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("chain_walkthrough"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: 0,
                message: format!("failed to initialize async runtime: {error}"),
            });
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("chain_walkthrough"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let db_started = Instant::now();
    let db_result = runtime.block_on(async {
        connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
    });

    let pool = match db_result {
        Ok(pool) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Pass,
                elapsed_ms: db_started.elapsed().as_millis() as u64,
                message: format!("connected using `{}`", config.database.url),
            });
            Some(pool)
        }
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: db_started.elapsed().as_millis() as u64,
                message: format!("failed to connect: {error}"),
            });
            None
        }
    };

    match pool {
        Some(pool) => {
            let migration_started = Instant::now();
            let migration_result =
                runtime.block_on(async { migrations::run_pending(&pool).await });
            runtime.block_on(async {
                pool.close().await;
            });

            match migration_result {
                Ok(()) => checks.push(SmokeCheck {
                    name: "migration_visibility",
                    status: SmokeStatus::Pass,
                    elapsed_ms: migration_started.elapsed().as_millis() as u64,
                    message: "migrations are visible and executable".to_string(),
                }),
                Err(error) => checks.push(SmokeCheck {
                    name: "migration_visibility",
                    status: SmokeStatus::Fail,
                    elapsed_ms: migration_started.elapsed().as_millis() as u64,
                    message: format!("migration execution failed: {error}"),
                }),
            }
        }
        None => checks.push(skipped("migration_visibility")),
    }

    let walkthrough_started = Instant::now();
    let walkthrough_result = runtime.block_on(chain_walkthrough());
    match walkthrough_result {
        Ok(message) => checks.push(SmokeCheck {
            name: "chain_walkthrough",
            status: SmokeStatus::Pass,
            elapsed_ms: walkthrough_started.elapsed().as_millis() as u64,
            message,
        }),
        Err(error) => checks.push(SmokeCheck {
            name: "chain_walkthrough",
            status: SmokeStatus::Fail,
            elapsed_ms: walkthrough_started.elapsed().as_millis() as u64,
            message: error,
        }),
    }

    finalize_report(checks, started.elapsed().as_millis() as u64)
}

/// Drives one full approval chain in memory: submit, a role-based
/// review, an approval-line stage, and terminal exhaustion.
async fn chain_walkthrough() -> Result<String, String> {
    let supervisor = Employee {
        id: EmployeeId("smoke-sup".to_string()),
        full_name: "Smoke Supervisor".to_string(),
        role_id: Some(RoleId("manager".to_string())),
        unit_id: Some(UnitId("unit-smoke".to_string())),
        field_id: None,
        supervisor_id: None,
        secondary_manager_id: None,
    };
    let mut submitter = Employee {
        id: EmployeeId("smoke-sub".to_string()),
        full_name: "Smoke Submitter".to_string(),
        role_id: Some(RoleId("staff".to_string())),
        unit_id: Some(UnitId("unit-smoke".to_string())),
        field_id: None,
        supervisor_id: None,
        secondary_manager_id: None,
    };
    submitter.supervisor_id = Some(supervisor.id.clone());
    let reviewer = Employee {
        id: EmployeeId("smoke-rev".to_string()),
        full_name: "Smoke Reviewer".to_string(),
        role_id: Some(RoleId("reviewer".to_string())),
        unit_id: Some(UnitId("unit-smoke".to_string())),
        field_id: None,
        supervisor_id: None,
        secondary_manager_id: None,
    };

    let review_rule = ApprovalRule {
        id: RuleId("smoke-rule-review".to_string()),
        kind: RequestKind::TravelPermit,
        phase: ApprovalPhase::Submission,
        tier: PrecedenceTier::CatchAll,
        sequence: 1,
        selection: SelectionMode::ByRoleAndUnit,
        line_ordinal: None,
        employee_id: None,
        role_id: Some(RoleId("reviewer".to_string())),
        unit_override: None,
        field_override: None,
        head_of_unit: false,
        feedback: Some(FeedbackMode::DirectStatusUpdate),
    };
    let line_rule = ApprovalRule {
        id: RuleId("smoke-rule-line".to_string()),
        kind: RequestKind::TravelPermit,
        phase: ApprovalPhase::Submission,
        tier: PrecedenceTier::CatchAll,
        sequence: 2,
        selection: SelectionMode::ByApprovalLine,
        line_ordinal: Some(ApprovalLineOrdinal::DirectSupervisor),
        employee_id: None,
        role_id: None,
        unit_override: None,
        field_override: None,
        head_of_unit: false,
        feedback: Some(FeedbackMode::DirectStatusUpdate),
    };

    let now = chrono::Utc::now();
    let request = TravelRequest {
        id: RequestId("smoke-req".to_string()),
        kind: RequestKind::TravelPermit,
        submitter_id: submitter.id.clone(),
        purpose: Some("smoke validation trip".to_string()),
        status: RequestStatus::InApproval,
        attachment_path: None,
        created_at: now,
        updated_at: now,
    };

    let requests = InMemoryRequestStore::with_requests(vec![request]);
    let engine = ChainEngine::new(
        InMemoryRuleStore::new(vec![review_rule, line_rule]),
        InMemoryDirectoryStore::new(vec![submitter.clone(), supervisor.clone(), reviewer.clone()]),
        InMemoryChainStore::default(),
        requests.clone(),
        KindProfile::travel_permit(),
    );

    let submitted = engine
        .submit(SubmitContext {
            request_id: RequestId("smoke-req".to_string()),
            phase: ApprovalPhase::Submission,
            submitter_id: submitter.id.clone(),
            note: None,
            group_mode: None,
        })
        .await
        .map_err(|error| format!("submit failed: {error}"))?;

    let outcome = engine
        .approve(&submitted.first.id, Decision::new(DecisionCode::Approved, reviewer.id.clone()))
        .await
        .map_err(|error| format!("review approval failed: {error}"))?;
    let ApproveOutcome::Advanced(line_stage) = outcome else {
        return Err("review approval did not advance to the approval line".to_string());
    };

    let outcome = engine
        .approve(&line_stage.id, Decision::new(DecisionCode::Approved, supervisor.id.clone()))
        .await
        .map_err(|error| format!("supervisor approval failed: {error}"))?;
    let ApproveOutcome::Finalized(status) = outcome else {
        return Err("supervisor approval did not finalize the chain".to_string());
    };

    let stored = requests
        .request(&RequestId("smoke-req".to_string()))
        .ok_or_else(|| "request record disappeared during walkthrough".to_string())?;
    if stored.status != status {
        return Err(format!(
            "owning request status diverged: engine reported {:?}, store holds {:?}",
            status, stored.status
        ));
    }

    Ok(format!(
        "submitted, advanced through 2 approvals, finalized with status code {}",
        status.code()
    ))
}

fn timed_check<T, E>(check: impl FnOnce() -> Result<T, E>) -> Result<(u64, T), (u64, E)> {
    let started = Instant::now();
    match check() {
        Ok(value) => Ok((started.elapsed().as_millis() as u64, value)),
        Err(error) => Err((started.elapsed().as_millis() as u64, error)),
    }
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });

    CommandResult { exit_code: if failed { 6 } else { 0 }, output: format!("{human}\n{machine}") }
}
