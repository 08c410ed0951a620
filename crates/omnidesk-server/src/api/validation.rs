//! Validation rules and the data quality monitor.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use omnidesk_core::Violation;
use omnidesk_db::{NewValidationRule, QualityIssueRow, ValidationRuleRow};

use crate::middleware::RequestId;
use crate::services::quality::{
    current_score, run_quality_check, validate_record, validate_rule_definition, QualityReport,
    QualityScore,
};

use super::{map_db_error, map_service_error, normalize_limit, ApiError, ApiResponse, AppState};

#[derive(Debug, Deserialize)]
pub(super) struct IssueQuery {
    pub severity: Option<String>,
    pub entity: Option<String>,
    #[serde(default)]
    pub include_resolved: bool,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ValidateRequest {
    pub entity: String,
    pub record: Value,
}

#[derive(Debug, Serialize)]
pub(super) struct ValidationOutcome {
    valid: bool,
    violations: Vec<Violation>,
}

fn normalized(mut rule: NewValidationRule) -> NewValidationRule {
    rule.name = rule.name.trim().to_owned();
    rule.entity = rule.entity.trim().to_lowercase();
    rule.field = rule.field.trim().to_owned();
    rule.rule_type = rule.rule_type.trim().to_lowercase();
    rule.severity = rule.severity.trim().to_lowercase();
    rule
}

pub(super) async fn list_rules(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<Vec<ValidationRuleRow>>>, ApiError> {
    let rows = omnidesk_db::list_validation_rules(&state.pool)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(rows, req_id.0))
}

pub(super) async fn create_rule(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<NewValidationRule>,
) -> Result<(StatusCode, Json<ApiResponse<ValidationRuleRow>>), ApiError> {
    let rule = normalized(body);
    validate_rule_definition(&rule).map_err(|e| map_service_error(req_id.0.clone(), &e))?;
    let row = omnidesk_db::create_validation_rule(&state.pool, &rule)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    tracing::info!(rule_id = row.id, name = %row.name, "validation: rule created");
    Ok((StatusCode::CREATED, ApiResponse::new(row, req_id.0)))
}

pub(super) async fn update_rule(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
    Json(body): Json<NewValidationRule>,
) -> Result<Json<ApiResponse<ValidationRuleRow>>, ApiError> {
    let rule = normalized(body);
    validate_rule_definition(&rule).map_err(|e| map_service_error(req_id.0.clone(), &e))?;
    let row = omnidesk_db::update_validation_rule(&state.pool, id, &rule)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(row, req_id.0))
}

/// POST /api/validation/validate: checks an ad-hoc record without storing
/// anything.
pub(super) async fn validate(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<ValidateRequest>,
) -> Result<Json<ApiResponse<ValidationOutcome>>, ApiError> {
    let entity = body.entity.trim().to_lowercase();
    let violations = validate_record(&state.pool, &entity, &body.record)
        .await
        .map_err(|e| map_service_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(
        ValidationOutcome {
            valid: violations.is_empty(),
            violations,
        },
        req_id.0,
    ))
}

/// POST /api/validation/run: replaces the open issue set.
pub(super) async fn run(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<QualityReport>>, ApiError> {
    let report = run_quality_check(&state.pool)
        .await
        .map_err(|e| map_service_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(report, req_id.0))
}

pub(super) async fn list_issues(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<IssueQuery>,
) -> Result<Json<ApiResponse<Vec<QualityIssueRow>>>, ApiError> {
    let rows = omnidesk_db::list_issues(
        &state.pool,
        query.severity.as_deref(),
        query.entity.as_deref(),
        query.include_resolved,
        normalize_limit(query.limit),
    )
    .await
    .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(rows, req_id.0))
}

pub(super) async fn resolve_issue(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<QualityIssueRow>>, ApiError> {
    let row = omnidesk_db::resolve_issue(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(row, req_id.0))
}

pub(super) async fn score(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<QualityScore>>, ApiError> {
    let score = current_score(&state.pool)
        .await
        .map_err(|e| map_service_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(score, req_id.0))
}
