//! Customer notification templates.

use std::collections::HashMap;

use crate::OrderStatus;

/// A built-in email template: subject and body with `{{placeholder}}` slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationTemplate {
    pub name: &'static str,
    pub subject: &'static str,
    pub body: &'static str,
}

const TEMPLATES: [NotificationTemplate; 6] = [
    NotificationTemplate {
        name: "order_confirmed",
        subject: "Order {{order_number}} confirmed",
        body: "Hi {{customer_name}},\n\nThanks for your order. Order {{order_number}} is confirmed and being prepared.",
    },
    NotificationTemplate {
        name: "order_processing",
        subject: "Order {{order_number}} is being processed",
        body: "Hi {{customer_name}},\n\nOrder {{order_number}} is now being processed.",
    },
    NotificationTemplate {
        name: "order_shipped",
        subject: "Order {{order_number}} has shipped",
        body: "Hi {{customer_name}},\n\nOrder {{order_number}} shipped with {{carrier}}. Tracking number: {{tracking_number}}.",
    },
    NotificationTemplate {
        name: "order_delivered",
        subject: "Order {{order_number}} was delivered",
        body: "Hi {{customer_name}},\n\nOrder {{order_number}} has been delivered. Enjoy!",
    },
    NotificationTemplate {
        name: "order_cancelled",
        subject: "Order {{order_number}} was cancelled",
        body: "Hi {{customer_name}},\n\nOrder {{order_number}} has been cancelled. Any payment will be returned.",
    },
    NotificationTemplate {
        name: "order_refunded",
        subject: "Refund issued for order {{order_number}}",
        body: "Hi {{customer_name}},\n\nA refund for order {{order_number}} has been issued.",
    },
];

impl NotificationTemplate {
    #[must_use]
    pub fn by_name(name: &str) -> Option<&'static NotificationTemplate> {
        TEMPLATES.iter().find(|t| t.name == name)
    }

    #[must_use]
    pub fn all() -> &'static [NotificationTemplate] {
        &TEMPLATES
    }
}

/// The template sent when an order enters `status`, if any.
#[must_use]
pub fn template_for_status(status: OrderStatus) -> Option<&'static NotificationTemplate> {
    let name = match status {
        OrderStatus::Confirmed => "order_confirmed",
        OrderStatus::Processing => "order_processing",
        OrderStatus::Shipped => "order_shipped",
        OrderStatus::Delivered => "order_delivered",
        OrderStatus::Cancelled => "order_cancelled",
        OrderStatus::Refunded => "order_refunded",
        OrderStatus::Pending
        | OrderStatus::OnHold
        | OrderStatus::Completed
        | OrderStatus::Returned => return None,
    };
    NotificationTemplate::by_name(name)
}

/// Substitutes `{{key}}` placeholders. Unknown placeholders are left as-is.
#[must_use]
pub fn render_template(text: &str, vars: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                match vars.get(key) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_with_templates() {
        assert_eq!(
            template_for_status(OrderStatus::Shipped).map(|t| t.name),
            Some("order_shipped")
        );
        assert!(template_for_status(OrderStatus::OnHold).is_none());
        assert!(template_for_status(OrderStatus::Pending).is_none());
    }

    #[test]
    fn render_substitutes_known_placeholders() {
        let mut vars = HashMap::new();
        vars.insert("order_number", "#1001".to_string());
        vars.insert("customer_name", "Jane".to_string());
        let rendered = render_template("Hi {{customer_name}}, order {{ order_number }}.", &vars);
        assert_eq!(rendered, "Hi Jane, order #1001.");
    }

    #[test]
    fn render_leaves_unknown_and_unclosed_placeholders() {
        let vars = HashMap::new();
        assert_eq!(
            render_template("Track {{tracking_number}} now", &vars),
            "Track {{tracking_number}} now"
        );
        assert_eq!(render_template("broken {{tail", &vars), "broken {{tail");
    }

    #[test]
    fn every_template_is_reachable_by_name() {
        for template in NotificationTemplate::all() {
            assert_eq!(
                NotificationTemplate::by_name(template.name),
                Some(template)
            );
        }
    }
}
