//! Condition evaluation for order workflow rules.
//!
//! A rule matches when every one of its [`Condition`]s holds for the order's
//! [`OrderFacts`]. Type mismatches (comparing a string field with `gt`, say)
//! are non-matches rather than errors; unknown fields and malformed values
//! are caught earlier by [`validate_conditions`] when a rule is saved.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Channel, CoreError, OrderStatus};

pub const CONDITION_FIELDS: [&str; 8] = [
    "total",
    "subtotal",
    "channel",
    "status",
    "currency",
    "item_count",
    "customer_email",
    "age_hours",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Contains,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowAction {
    /// Queue a customer notification rendered from `template`.
    Notify { template: String },
    /// Append `value` to the order's tags.
    Tag { value: String },
    /// Append `value` to the order's notes.
    Note { value: String },
}

/// The order attributes a condition can refer to.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFacts {
    pub total: Decimal,
    pub subtotal: Decimal,
    pub channel: Channel,
    pub status: OrderStatus,
    pub currency: String,
    pub item_count: i64,
    pub customer_email: Option<String>,
    pub age_hours: i64,
}

enum FieldValue<'a> {
    Number(Decimal),
    Text(&'a str),
    Missing,
}

impl OrderFacts {
    fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        let value = match name {
            "total" => FieldValue::Number(self.total),
            "subtotal" => FieldValue::Number(self.subtotal),
            "item_count" => FieldValue::Number(Decimal::from(self.item_count)),
            "age_hours" => FieldValue::Number(Decimal::from(self.age_hours)),
            "channel" => FieldValue::Text(self.channel.as_str()),
            "status" => FieldValue::Text(self.status.as_str()),
            "currency" => FieldValue::Text(&self.currency),
            "customer_email" => self
                .customer_email
                .as_deref()
                .map_or(FieldValue::Missing, FieldValue::Text),
            _ => return None,
        };
        Some(value)
    }
}

fn as_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn value_matches(field: &FieldValue<'_>, candidate: &Value) -> bool {
    match field {
        FieldValue::Number(n) => as_decimal(candidate).is_some_and(|c| c == *n),
        FieldValue::Text(t) => candidate
            .as_str()
            .is_some_and(|c| c.eq_ignore_ascii_case(t)),
        FieldValue::Missing => candidate.is_null(),
    }
}

impl Condition {
    /// Returns `true` if the condition holds for `facts`.
    #[must_use]
    pub fn matches(&self, facts: &OrderFacts) -> bool {
        let Some(field) = facts.field(&self.field) else {
            return false;
        };

        match self.operator {
            ConditionOperator::Eq => value_matches(&field, &self.value),
            ConditionOperator::Ne => !value_matches(&field, &self.value),
            ConditionOperator::Gt
            | ConditionOperator::Gte
            | ConditionOperator::Lt
            | ConditionOperator::Lte => {
                let (FieldValue::Number(actual), Some(expected)) = (&field, as_decimal(&self.value))
                else {
                    return false;
                };
                match self.operator {
                    ConditionOperator::Gt => *actual > expected,
                    ConditionOperator::Gte => *actual >= expected,
                    ConditionOperator::Lt => *actual < expected,
                    _ => *actual <= expected,
                }
            }
            ConditionOperator::In => self
                .value
                .as_array()
                .is_some_and(|list| list.iter().any(|c| value_matches(&field, c))),
            ConditionOperator::NotIn => self
                .value
                .as_array()
                .is_some_and(|list| !list.iter().any(|c| value_matches(&field, c))),
            ConditionOperator::Contains => match (&field, self.value.as_str()) {
                (FieldValue::Text(t), Some(needle)) => t
                    .to_ascii_lowercase()
                    .contains(&needle.to_ascii_lowercase()),
                _ => false,
            },
        }
    }
}

/// Returns `true` when every condition matches. An empty list always matches.
#[must_use]
pub fn all_match(conditions: &[Condition], facts: &OrderFacts) -> bool {
    conditions.iter().all(|c| c.matches(facts))
}

/// Parses and checks a rule's stored `conditions` JSON.
///
/// # Errors
///
/// Returns [`CoreError::InvalidRule`] if the JSON is not a list of
/// conditions, names an unknown field, or pairs a list operator with a
/// non-list value (or the reverse).
pub fn validate_conditions(raw: &Value) -> Result<Vec<Condition>, CoreError> {
    let conditions: Vec<Condition> = serde_json::from_value(raw.clone())
        .map_err(|e| CoreError::InvalidRule(format!("conditions: {e}")))?;

    for condition in &conditions {
        if !CONDITION_FIELDS.contains(&condition.field.as_str()) {
            return Err(CoreError::InvalidRule(format!(
                "unknown condition field '{}'",
                condition.field
            )));
        }
        let is_list_op = matches!(
            condition.operator,
            ConditionOperator::In | ConditionOperator::NotIn
        );
        if is_list_op != condition.value.is_array() {
            return Err(CoreError::InvalidRule(format!(
                "operator {:?} on '{}' has a mismatched value",
                condition.operator, condition.field
            )));
        }
    }

    Ok(conditions)
}

/// Parses a rule's stored `actions` JSON.
///
/// # Errors
///
/// Returns [`CoreError::InvalidRule`] if an action has an unknown `type` or
/// is missing its parameter.
pub fn validate_actions(raw: &Value) -> Result<Vec<WorkflowAction>, CoreError> {
    serde_json::from_value(raw.clone()).map_err(|e| CoreError::InvalidRule(format!("actions: {e}")))
}

/// Checks that a rule's `from → to` pair is itself a legal transition.
///
/// # Errors
///
/// Returns [`CoreError::InvalidTransition`] or [`CoreError::UnknownStatus`].
pub fn validate_rule_transition(from: &str, to: &str) -> Result<(OrderStatus, OrderStatus), CoreError> {
    let from = from.parse::<OrderStatus>()?;
    let to = to.parse::<OrderStatus>()?;
    from.transition_to(to)?;
    Ok((from, to))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn facts() -> OrderFacts {
        OrderFacts {
            total: Decimal::new(25_000, 2),
            subtotal: Decimal::new(22_000, 2),
            channel: Channel::BestBuy,
            status: OrderStatus::Pending,
            currency: "CAD".to_string(),
            item_count: 3,
            customer_email: Some("jane@example.com".to_string()),
            age_hours: 5,
        }
    }

    fn cond(field: &str, operator: ConditionOperator, value: Value) -> Condition {
        Condition {
            field: field.to_string(),
            operator,
            value,
        }
    }

    #[test]
    fn numeric_comparisons_accept_numbers_and_strings() {
        let f = facts();
        assert!(cond("total", ConditionOperator::Gt, json!(200)).matches(&f));
        assert!(cond("total", ConditionOperator::Gte, json!("250.00")).matches(&f));
        assert!(!cond("total", ConditionOperator::Lt, json!(250)).matches(&f));
        assert!(cond("item_count", ConditionOperator::Lte, json!(3)).matches(&f));
    }

    #[test]
    fn text_equality_is_case_insensitive() {
        let f = facts();
        assert!(cond("channel", ConditionOperator::Eq, json!("BestBuy")).matches(&f));
        assert!(cond("currency", ConditionOperator::Ne, json!("USD")).matches(&f));
    }

    #[test]
    fn type_mismatch_is_a_non_match() {
        let f = facts();
        assert!(!cond("channel", ConditionOperator::Gt, json!(1)).matches(&f));
        assert!(!cond("total", ConditionOperator::Gt, json!("lots")).matches(&f));
        assert!(!cond("total", ConditionOperator::Contains, json!("2")).matches(&f));
    }

    #[test]
    fn list_operators() {
        let f = facts();
        assert!(cond("channel", ConditionOperator::In, json!(["shopify", "bestbuy"])).matches(&f));
        assert!(cond("status", ConditionOperator::NotIn, json!(["shipped"])).matches(&f));
        assert!(!cond("status", ConditionOperator::In, json!("pending")).matches(&f));
    }

    #[test]
    fn contains_on_email() {
        let f = facts();
        assert!(cond("customer_email", ConditionOperator::Contains, json!("EXAMPLE.com")).matches(&f));
    }

    #[test]
    fn missing_email_only_equals_null() {
        let mut f = facts();
        f.customer_email = None;
        assert!(cond("customer_email", ConditionOperator::Eq, Value::Null).matches(&f));
        assert!(!cond("customer_email", ConditionOperator::Contains, json!("@")).matches(&f));
    }

    #[test]
    fn empty_condition_list_matches() {
        assert!(all_match(&[], &facts()));
    }

    #[test]
    fn all_conditions_must_hold() {
        let f = facts();
        let conditions = vec![
            cond("total", ConditionOperator::Gt, json!(100)),
            cond("channel", ConditionOperator::Eq, json!("shopify")),
        ];
        assert!(!all_match(&conditions, &f));
    }

    #[test]
    fn validate_conditions_rejects_unknown_field() {
        let raw = json!([{"field": "weight", "operator": "gt", "value": 1}]);
        assert!(matches!(
            validate_conditions(&raw),
            Err(CoreError::InvalidRule(msg)) if msg.contains("weight")
        ));
    }

    #[test]
    fn validate_conditions_rejects_scalar_for_in() {
        let raw = json!([{"field": "channel", "operator": "in", "value": "shopify"}]);
        assert!(validate_conditions(&raw).is_err());
    }

    #[test]
    fn validate_actions_parses_tagged_actions() {
        let raw = json!([
            {"type": "notify", "template": "order_confirmed"},
            {"type": "tag", "value": "vip"}
        ]);
        let actions = validate_actions(&raw).unwrap();
        assert_eq!(
            actions[0],
            WorkflowAction::Notify {
                template: "order_confirmed".to_string()
            }
        );
        assert!(validate_actions(&json!([{"type": "explode"}])).is_err());
    }

    #[test]
    fn rule_transition_must_be_allowed() {
        assert!(validate_rule_transition("pending", "confirmed").is_ok());
        assert!(matches!(
            validate_rule_transition("shipped", "pending"),
            Err(CoreError::InvalidTransition { .. })
        ));
        assert!(matches!(
            validate_rule_transition("pending", "teleported"),
            Err(CoreError::UnknownStatus(_))
        ));
    }
}
