mod session;
mod message;
mod budget;
mod usage_analytics;
mod chat;
pub mod pricing;

pub use session::{Session, CreateSession, SessionSummary, CreateSessionRequest};
pub use message::{Message, CreateMessage, CreateTurn, MessageType, truncate_content, MAX_CONTENT_CHARS};
pub use budget::{
    Budget, CreateBudget, BudgetType, BudgetCheck, BudgetHeadroom, BudgetState, BudgetStatus,
    BudgetAlert, CostProjection, Confidence, CreateBudgetRequest, UpdateBudgetLimitRequest,
    BudgetCheckRequest, WARNING_PERCENT,
};
pub use usage_analytics::{
    UsageAnalytics, CreateUsageAnalytics, HistoricalUsage, SpendingSummary, ModelEfficiency,
    EfficiencyReport,
};
pub use chat::{
    ChatMessage, Role, TokenUsage, MessageCost, ChatRequest, TurnOutcome, CostComparisonRow,
    PreflightCheck,
};
pub use pricing::{ModelCatalog, ModelInfo, ModelPricing};
