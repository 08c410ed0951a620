use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use omnidesk_db::{NewWorkflowRule, WorkflowRuleRow};

use crate::middleware::{CurrentUser, RequestId};
use crate::services::workflow::{evaluate_order as run_rules, validate_rule};

use super::{map_db_error, map_service_error, ApiError, ApiResponse, AppState};

#[derive(Debug, Deserialize)]
pub(super) struct RuleQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Deserialize)]
pub(super) struct RuleRequest {
    pub name: String,
    pub from_status: String,
    pub to_status: String,
    #[serde(default = "empty_list")]
    pub conditions: Value,
    #[serde(default = "empty_list")]
    pub actions: Value,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn empty_list() -> Value {
    Value::Array(Vec::new())
}

fn default_active() -> bool {
    true
}

impl From<RuleRequest> for NewWorkflowRule {
    fn from(req: RuleRequest) -> Self {
        Self {
            name: req.name.trim().to_owned(),
            from_status: req.from_status.trim().to_lowercase(),
            to_status: req.to_status.trim().to_lowercase(),
            conditions: req.conditions,
            actions: req.actions,
            priority: req.priority,
            is_active: req.is_active,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct Evaluation {
    applied: Option<WorkflowRuleRow>,
}

pub(super) async fn list_rules(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<RuleQuery>,
) -> Result<Json<ApiResponse<Vec<WorkflowRuleRow>>>, ApiError> {
    let rows = omnidesk_db::list_workflow_rules(&state.pool, query.include_inactive)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(rows, req_id.0))
}

pub(super) async fn create_rule(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<RuleRequest>,
) -> Result<(StatusCode, Json<ApiResponse<WorkflowRuleRow>>), ApiError> {
    let rule = NewWorkflowRule::from(body);
    validate_rule(&rule).map_err(|e| map_service_error(req_id.0.clone(), &e))?;
    let row = omnidesk_db::create_workflow_rule(&state.pool, &rule)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    tracing::info!(rule_id = row.id, name = %row.name, "workflow: rule created");
    Ok((StatusCode::CREATED, ApiResponse::new(row, req_id.0)))
}

pub(super) async fn update_rule(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
    Json(body): Json<RuleRequest>,
) -> Result<Json<ApiResponse<WorkflowRuleRow>>, ApiError> {
    let rule = NewWorkflowRule::from(body);
    validate_rule(&rule).map_err(|e| map_service_error(req_id.0.clone(), &e))?;
    let row = omnidesk_db::update_workflow_rule(&state.pool, id, &rule)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(row, req_id.0))
}

/// DELETE /api/workflow/rules/{id}: deactivates, keeping the rule for audit.
pub(super) async fn deactivate_rule(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<WorkflowRuleRow>>, ApiError> {
    let row = omnidesk_db::deactivate_workflow_rule(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    tracing::info!(rule_id = id, "workflow: rule deactivated");
    Ok(ApiResponse::new(row, req_id.0))
}

/// POST /api/orders/{id}/workflow
pub(super) async fn evaluate_order(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(claims)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Evaluation>>, ApiError> {
    let applied = run_rules(
        &state.pool,
        id,
        Some(claims.sub),
        state.config.queue.max_retries,
    )
    .await
    .map_err(|e| map_service_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(Evaluation { applied }, req_id.0))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_defaults_to_active_rule_without_conditions() {
        let req: RuleRequest = serde_json::from_value(json!({
            "name": " Auto-confirm ",
            "from_status": "PENDING",
            "to_status": "confirmed"
        }))
        .expect("valid body");
        let rule = NewWorkflowRule::from(req);
        assert_eq!(rule.name, "Auto-confirm");
        assert_eq!(rule.from_status, "pending");
        assert!(rule.is_active);
        assert_eq!(rule.priority, 0);
        assert_eq!(rule.conditions, json!([]));
        assert!(validate_rule(&rule).is_ok());
    }

    #[test]
    fn forbidden_transition_is_rejected() {
        let req: RuleRequest = serde_json::from_value(json!({
            "name": "Resurrect",
            "from_status": "cancelled",
            "to_status": "pending"
        }))
        .expect("valid body");
        assert!(validate_rule(&NewWorkflowRule::from(req)).is_err());
    }
}
