pub mod analytics_service;
pub mod budget_service;
pub mod chat_service;
pub mod cost_service;
pub mod job_scheduler_service;
pub mod usage_recorder;
