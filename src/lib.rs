//! chatmeter: streams chat completions from a hosted multi-model API while
//! recording token usage and cost per message and enforcing spend budgets.

pub mod app;
pub mod config;
pub mod db;
pub mod errors;
pub mod external;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod utils;

pub use app::create_app;
pub use state::AppState;
