//! Field-level validation rules applied to products and orders.

use std::str::FromStr;

use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Required,
    Min,
    Max,
    Regex,
    OneOf,
}

impl FromStr for RuleType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "required" => Ok(RuleType::Required),
            "min" => Ok(RuleType::Min),
            "max" => Ok(RuleType::Max),
            "regex" => Ok(RuleType::Regex),
            "one_of" => Ok(RuleType::OneOf),
            other => Err(CoreError::InvalidRule(format!("unknown rule type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }
}

impl FromStr for Severity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error" => Ok(Severity::Error),
            "warning" => Ok(Severity::Warning),
            other => Err(CoreError::InvalidRule(format!("unknown severity '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub name: String,
    pub field: String,
    pub rule_type: RuleType,
    #[serde(default)]
    pub params: Value,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub rule: String,
    pub field: String,
    pub severity: Severity,
    pub message: String,
}

impl ValidationRule {
    fn violation(&self, message: String) -> Violation {
        Violation {
            rule: self.name.clone(),
            field: self.field.clone(),
            severity: self.severity,
            message,
        }
    }

    /// Checks that `params` carries what `rule_type` needs.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRule`] for a missing bound, an invalid
    /// regex, or a `one_of` without a list.
    pub fn check_params(&self) -> Result<(), CoreError> {
        match self.rule_type {
            RuleType::Required => Ok(()),
            RuleType::Min | RuleType::Max => self
                .params
                .get("value")
                .and_then(as_decimal)
                .map(|_| ())
                .ok_or_else(|| CoreError::InvalidRule("params.value must be numeric".to_string())),
            RuleType::Regex => {
                let pattern = self
                    .params
                    .get("pattern")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CoreError::InvalidRule("params.pattern is required".to_string()))?;
                Regex::new(pattern)
                    .map(|_| ())
                    .map_err(|e| CoreError::InvalidRule(format!("invalid pattern: {e}")))
            }
            RuleType::OneOf => self
                .params
                .get("values")
                .and_then(Value::as_array)
                .map(|_| ())
                .ok_or_else(|| CoreError::InvalidRule("params.values must be a list".to_string())),
        }
    }
}

fn as_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// Applies `rule` to `record`, returning the violation if it fails.
///
/// Only `required` flags absent or blank values; the other rule types skip
/// them so a missing optional field is reported once, not per rule.
#[must_use]
pub fn evaluate_rule(rule: &ValidationRule, record: &Value) -> Option<Violation> {
    let value = record.get(&rule.field);

    if rule.rule_type == RuleType::Required {
        return is_blank(value).then(|| rule.violation(format!("{} is required", rule.field)));
    }

    let value = value.filter(|v| !is_blank(Some(v)))?;

    match rule.rule_type {
        RuleType::Required => None,
        RuleType::Min | RuleType::Max => {
            let bound = rule.params.get("value").and_then(as_decimal)?;
            let Some(actual) = as_decimal(value) else {
                return Some(rule.violation(format!("{} must be a number", rule.field)));
            };
            if rule.rule_type == RuleType::Min && actual < bound {
                Some(rule.violation(format!("{} must be at least {bound}", rule.field)))
            } else if rule.rule_type == RuleType::Max && actual > bound {
                Some(rule.violation(format!("{} must be at most {bound}", rule.field)))
            } else {
                None
            }
        }
        RuleType::Regex => {
            let pattern = rule.params.get("pattern").and_then(Value::as_str)?;
            let Ok(re) = Regex::new(pattern) else {
                return Some(rule.violation(format!("rule pattern '{pattern}' is invalid")));
            };
            let text = value.as_str().map_or_else(|| value.to_string(), str::to_owned);
            (!re.is_match(&text))
                .then(|| rule.violation(format!("{} has an invalid format", rule.field)))
        }
        RuleType::OneOf => {
            let allowed = rule.params.get("values").and_then(Value::as_array)?;
            (!allowed.contains(value)).then(|| {
                rule.violation(format!("{} is not one of the allowed values", rule.field))
            })
        }
    }
}

/// Runs every rule over `record` and collects the violations.
#[must_use]
pub fn evaluate_all(rules: &[ValidationRule], record: &Value) -> Vec<Violation> {
    rules
        .iter()
        .filter_map(|rule| evaluate_rule(rule, record))
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn rule(field: &str, rule_type: RuleType, params: Value) -> ValidationRule {
        ValidationRule {
            name: format!("{field}_rule"),
            field: field.to_string(),
            rule_type,
            params,
            severity: Severity::Error,
        }
    }

    #[test]
    fn required_flags_missing_null_and_blank() {
        let r = rule("sku", RuleType::Required, json!({}));
        assert!(evaluate_rule(&r, &json!({})).is_some());
        assert!(evaluate_rule(&r, &json!({"sku": null})).is_some());
        assert!(evaluate_rule(&r, &json!({"sku": "  "})).is_some());
        assert!(evaluate_rule(&r, &json!({"sku": "A-1"})).is_none());
    }

    #[test]
    fn min_and_max_compare_decimals() {
        let min = rule("price", RuleType::Min, json!({"value": 0}));
        assert!(evaluate_rule(&min, &json!({"price": "-0.01"})).is_some());
        assert!(evaluate_rule(&min, &json!({"price": 0})).is_none());

        let max = rule("quantity", RuleType::Max, json!({"value": "10"}));
        let v = evaluate_rule(&max, &json!({"quantity": 11})).expect("violation");
        assert_eq!(v.message, "quantity must be at most 10");
    }

    #[test]
    fn non_numeric_value_violates_min() {
        let min = rule("price", RuleType::Min, json!({"value": 0}));
        let v = evaluate_rule(&min, &json!({"price": "free"})).expect("violation");
        assert_eq!(v.message, "price must be a number");
    }

    #[test]
    fn missing_value_is_skipped_by_non_required_rules() {
        let min = rule("price", RuleType::Min, json!({"value": 0}));
        assert!(evaluate_rule(&min, &json!({})).is_none());
    }

    #[test]
    fn regex_rule_matches_email() {
        let r = rule(
            "customer_email",
            RuleType::Regex,
            json!({"pattern": "^[^@\\s]+@[^@\\s]+\\.[^@\\s]+$"}),
        );
        assert!(evaluate_rule(&r, &json!({"customer_email": "a@b.co"})).is_none());
        assert!(evaluate_rule(&r, &json!({"customer_email": "not-an-email"})).is_some());
    }

    #[test]
    fn one_of_checks_membership() {
        let r = rule("status", RuleType::OneOf, json!({"values": ["active", "draft"]}));
        assert!(evaluate_rule(&r, &json!({"status": "active"})).is_none());
        assert!(evaluate_rule(&r, &json!({"status": "deleted"})).is_some());
    }

    #[test]
    fn check_params_catches_bad_rules() {
        assert!(rule("price", RuleType::Min, json!({})).check_params().is_err());
        assert!(rule("sku", RuleType::Regex, json!({"pattern": "("}))
            .check_params()
            .is_err());
        assert!(rule("status", RuleType::OneOf, json!({"values": "x"}))
            .check_params()
            .is_err());
        assert!(rule("sku", RuleType::Required, Value::Null).check_params().is_ok());
    }

    #[test]
    fn evaluate_all_collects_every_violation() {
        let rules = vec![
            rule("sku", RuleType::Required, json!({})),
            rule("price", RuleType::Min, json!({"value": 0})),
        ];
        let violations = evaluate_all(&rules, &json!({"price": -5}));
        assert_eq!(violations.len(), 2);
    }
}
