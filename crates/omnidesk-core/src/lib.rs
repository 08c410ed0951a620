pub mod app_config;
pub mod channels;
pub mod config;
pub mod notifications;
pub mod orders;
pub mod products;
pub mod queue;
pub mod validation;
pub mod workflow;

use thiserror::Error;

pub use app_config::{
    AppConfig, BestBuyCredentials, Environment, QueueSettings, ShopifyCredentials, SmtpSettings,
};
pub use channels::{Channel, DataType, SyncDirection};
pub use config::{load_app_config, load_app_config_from_env};
pub use notifications::{render_template, template_for_status, NotificationTemplate};
pub use orders::{NormalizedLineItem, NormalizedOrder, OrderStatus};
pub use products::NormalizedProduct;
pub use queue::{claim_cutoff, next_retry, RetryDecision};
pub use validation::{evaluate_all, evaluate_rule, RuleType, Severity, ValidationRule, Violation};
pub use workflow::{Condition, ConditionOperator, OrderFacts, WorkflowAction};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("unknown channel: {0}")]
    UnknownChannel(String),
    #[error("unknown order status: {0}")]
    UnknownStatus(String),
    #[error("unknown data type: {0}")]
    UnknownDataType(String),
    #[error("unknown sync direction: {0}")]
    UnknownDirection(String),
    #[error("cannot transition order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("invalid rule: {0}")]
    InvalidRule(String),
    #[error("{0} is out of range")]
    AmountOutOfRange(&'static str),
}
