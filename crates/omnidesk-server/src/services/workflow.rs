//! Workflow rule validation and evaluation against a live order.

use chrono::Utc;
use sqlx::PgPool;

use omnidesk_core::workflow::{
    all_match, validate_actions, validate_conditions, validate_rule_transition,
};
use omnidesk_core::{
    template_for_status, NotificationTemplate, OrderFacts, OrderStatus, WorkflowAction,
};
use omnidesk_db::{NewWorkflowRule, OrderRow, WorkflowRuleRow};

use super::notifications::{enqueue_for_order, ExtraVars};
use super::order_status::{transition_in_tx, StatusChange};
use super::ServiceError;

/// Rejects a rule whose transition, conditions, or actions could never run.
///
/// # Errors
///
/// Returns [`ServiceError::Validation`] describing the first problem found.
pub fn validate_rule(rule: &NewWorkflowRule) -> Result<(), ServiceError> {
    let invalid = |e: omnidesk_core::CoreError| ServiceError::Validation(e.to_string());

    if rule.name.trim().is_empty() {
        return Err(ServiceError::Validation("name must not be empty".to_string()));
    }
    validate_rule_transition(&rule.from_status, &rule.to_status).map_err(invalid)?;
    validate_conditions(&rule.conditions).map_err(invalid)?;
    for action in validate_actions(&rule.actions).map_err(invalid)? {
        if let WorkflowAction::Notify { template } = action {
            if NotificationTemplate::by_name(&template).is_none() {
                return Err(ServiceError::Validation(format!(
                    "unknown notification template '{template}'"
                )));
            }
        }
    }
    Ok(())
}

async fn order_facts(pool: &PgPool, order: &OrderRow) -> Result<OrderFacts, ServiceError> {
    let items = omnidesk_db::list_order_items(pool, order.id).await?;
    Ok(OrderFacts {
        total: order.total,
        subtotal: order.subtotal,
        channel: order.channel.parse()?,
        status: order.status.parse()?,
        currency: order.currency.clone(),
        item_count: items.iter().map(|item| i64::from(item.quantity)).sum(),
        customer_email: order.customer_email.clone(),
        age_hours: (Utc::now() - order.ordered_at).num_hours(),
    })
}

/// Evaluates the active rules for the order's current status, highest
/// priority first, and applies the first one whose conditions all match.
///
/// Returns the applied rule, or `None` when nothing matched.
///
/// # Errors
///
/// Returns [`ServiceError`] if the order cannot be loaded or the matched
/// rule's transition fails.
pub async fn evaluate_order(
    pool: &PgPool,
    order_id: i64,
    changed_by: Option<i64>,
    max_retries: i32,
) -> Result<Option<WorkflowRuleRow>, ServiceError> {
    let order = omnidesk_db::get_order(pool, order_id).await?;
    let facts = order_facts(pool, &order).await?;
    let rules = omnidesk_db::active_rules_from_status(pool, &order.status).await?;

    for rule in rules {
        let conditions = match validate_conditions(&rule.conditions) {
            Ok(conditions) => conditions,
            Err(e) => {
                tracing::warn!(rule_id = rule.id, error = %e, "workflow: skipping rule with invalid conditions");
                continue;
            }
        };
        if !all_match(&conditions, &facts) {
            continue;
        }

        apply_rule(pool, &order, &rule, changed_by, max_retries).await?;
        return Ok(Some(rule));
    }

    Ok(None)
}

/// Whether the status change itself already queued `template`.
fn queued_by_transition(template: &NotificationTemplate, to: OrderStatus) -> bool {
    template_for_status(to).is_some_and(|status_template| status_template.name == template.name)
}

async fn apply_rule(
    pool: &PgPool,
    order: &OrderRow,
    rule: &WorkflowRuleRow,
    changed_by: Option<i64>,
    max_retries: i32,
) -> Result<(), ServiceError> {
    let to: OrderStatus = rule.to_status.parse()?;
    let actions = validate_actions(&rule.actions)?;
    let reason = format!("workflow rule '{}'", rule.name);

    let mut tx = pool.begin().await?;
    let change = StatusChange {
        reason: Some(&reason),
        changed_by,
        extra: ExtraVars::default(),
    };
    let updated = transition_in_tx(&mut tx, order, to, &change, max_retries).await?;

    for action in &actions {
        match action {
            WorkflowAction::Tag { value } => {
                omnidesk_db::append_order_tag(&mut *tx, order.id, value).await?;
            }
            WorkflowAction::Note { value } => {
                omnidesk_db::append_order_note(&mut *tx, order.id, value).await?;
            }
            WorkflowAction::Notify { template } => match NotificationTemplate::by_name(template) {
                Some(template) if queued_by_transition(template, to) => {
                    tracing::debug!(
                        rule_id = rule.id,
                        template = template.name,
                        "workflow: notify action already covered by the status email"
                    );
                }
                Some(template) => {
                    enqueue_for_order(
                        &mut *tx,
                        &updated,
                        template,
                        &ExtraVars::default(),
                        max_retries,
                    )
                    .await?;
                }
                None => {
                    tracing::warn!(rule_id = rule.id, %template, "workflow: unknown template in notify action");
                }
            },
        }
    }

    tx.commit().await?;
    tracing::info!(
        order_id = order.id,
        rule_id = rule.id,
        to = to.as_str(),
        actions = actions.len(),
        "workflow: rule applied"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn rule(from: &str, to: &str, actions: serde_json::Value) -> NewWorkflowRule {
        NewWorkflowRule {
            name: "hold big orders".to_string(),
            from_status: from.to_string(),
            to_status: to.to_string(),
            conditions: json!([{ "field": "total", "operator": "gt", "value": 1000 }]),
            actions,
            priority: 10,
            is_active: true,
        }
    }

    #[test]
    fn accepts_well_formed_rule() {
        let rule = rule(
            "pending",
            "on_hold",
            json!([{ "type": "tag", "value": "review" }, { "type": "notify", "template": "order_processing" }]),
        );
        assert!(validate_rule(&rule).is_ok());
    }

    #[test]
    fn rejects_disallowed_transition() {
        let err = validate_rule(&rule("pending", "delivered", json!([]))).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn status_email_is_not_queued_twice() {
        let confirmed = NotificationTemplate::by_name("order_confirmed").expect("template");
        let processing = NotificationTemplate::by_name("order_processing").expect("template");
        assert!(queued_by_transition(confirmed, OrderStatus::Confirmed));
        assert!(!queued_by_transition(processing, OrderStatus::Confirmed));
        assert!(!queued_by_transition(confirmed, OrderStatus::OnHold));
    }

    #[test]
    fn rejects_unknown_notify_template() {
        let err = validate_rule(&rule(
            "pending",
            "confirmed",
            json!([{ "type": "notify", "template": "order_teleported" }]),
        ))
        .unwrap_err();
        assert!(err.to_string().contains("order_teleported"));
    }
}
