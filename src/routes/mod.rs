pub(crate) mod analytics;
pub(crate) mod budgets;
pub(crate) mod health;
pub(crate) mod models;
pub(crate) mod sessions;
