pub mod session_queries;
pub mod message_queries;
pub mod budget_queries;
pub mod analytics_queries;
