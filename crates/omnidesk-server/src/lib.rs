pub mod api;
pub mod auth;
pub mod mailer;
pub mod middleware;
pub mod scheduler;
pub mod services;
