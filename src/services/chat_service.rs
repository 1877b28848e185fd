use std::sync::Arc;

use bigdecimal::Zero;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use sqlx::types::BigDecimal;
use tracing::{debug, error, info};

use crate::config::LlmConfig;
use crate::errors::{AppError, LlmError};
use crate::external::{CompletionProvider, CompletionRequest, CompletionStream};
use crate::models::{
    ChatMessage, MessageCost, ModelCatalog, PreflightCheck, Session, TokenUsage, TurnOutcome,
};
use crate::services::usage_recorder::{self, RecordTurn};
use crate::services::{budget_service, cost_service};
use crate::store::UsageStore;

/// Conversation state for one chat session, owned by the caller.
#[derive(Debug, Clone, Serialize)]
pub struct SessionContext {
    pub session_id: String,
    /// Catalogue key of the model
    pub model: String,
    /// Messages so far, without the system prompt
    pub history: Vec<ChatMessage>,
}

/// Worst-case cost of one admitted turn, counted against every budget until
/// the turn is recorded or abandoned.
pub struct Reservation {
    held: Arc<Mutex<BigDecimal>>,
    amount: BigDecimal,
}

impl Reservation {
    pub fn amount(&self) -> &BigDecimal {
        &self.amount
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut held = self.held.lock();
        *held = &*held - &self.amount;
    }
}

/// A turn whose request has been accepted and whose reply is streaming.
///
/// Keep `reservation` alive until [`ChatService::finish_turn`] returns.
pub struct PendingTurn {
    pub user_text: String,
    pub preflight: PreflightCheck,
    pub stream: CompletionStream,
    pub reservation: Reservation,
}

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl From<&LlmConfig> for ChatSettings {
    fn from(config: &LlmConfig) -> Self {
        Self {
            system_prompt: config.system_prompt.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

/// Drives chat turns: budget pre-check, streamed completion, then usage recording.
pub struct ChatService {
    store: Arc<dyn UsageStore>,
    provider: Option<Arc<dyn CompletionProvider>>,
    catalog: Arc<ModelCatalog>,
    settings: ChatSettings,
    /// Serializes budget check plus reservation
    admission: tokio::sync::Mutex<()>,
    reserved: Arc<Mutex<BigDecimal>>,
}

impl ChatService {
    /// `provider` is `None` when no API key is configured; turns then fail
    /// with `MissingApiKey` while the rest of the service keeps working.
    pub fn new(
        store: Arc<dyn UsageStore>,
        provider: Option<Arc<dyn CompletionProvider>>,
        catalog: Arc<ModelCatalog>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            store,
            provider,
            catalog,
            settings,
            admission: tokio::sync::Mutex::new(()),
            reserved: Arc::new(Mutex::new(BigDecimal::zero())),
        }
    }

    /// Worst-case cost of turns admitted but not yet recorded
    pub fn reserved(&self) -> BigDecimal {
        self.reserved.lock().clone()
    }

    fn reserve(&self, amount: BigDecimal) -> Reservation {
        let mut held = self.reserved.lock();
        *held = &*held + &amount;
        Reservation { held: self.reserved.clone(), amount }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub async fn open(&self, model: Option<&str>) -> Result<SessionContext, AppError> {
        let model = model.unwrap_or_else(|| self.catalog.default_model());
        let session = usage_recorder::start_session(self.store.as_ref(), &self.catalog, model).await?;

        Ok(SessionContext {
            session_id: session.session_id,
            model: session.model_used,
            history: Vec::new(),
        })
    }

    /// Rebuild a context for an existing open session from client-held history.
    pub async fn resume(&self, session_id: &str, history: Vec<ChatMessage>) -> Result<SessionContext, AppError> {
        let session = usage_recorder::get_session(self.store.as_ref(), session_id).await?;
        if session.is_closed {
            return Err(AppError::Validation(format!("Session {} is closed", session_id)));
        }

        Ok(SessionContext {
            session_id: session.session_id,
            model: session.model_used,
            history,
        })
    }

    fn request_messages(&self, ctx: &SessionContext, user_text: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(ctx.history.len() + 2);
        messages.push(ChatMessage::system(self.settings.system_prompt.clone()));
        messages.extend(ctx.history.iter().cloned());
        messages.push(ChatMessage::user(user_text));
        messages
    }

    fn estimate(&self, ctx: &SessionContext, messages: &[ChatMessage]) -> Result<MessageCost, AppError> {
        cost_service::estimate_prospective_cost(&self.catalog, &ctx.model, messages, self.settings.max_tokens)
            .ok_or_else(|| AppError::Validation(format!("Unknown model: {}", ctx.model)))
    }

    /// Estimate the worst-case cost of the next turn and check it against budgets.
    pub async fn preflight(&self, ctx: &SessionContext, user_text: &str) -> Result<PreflightCheck, AppError> {
        let messages = self.request_messages(ctx, user_text);
        let estimate = self.estimate(ctx, &messages)?;
        let budget = budget_service::check_with_reserved(
            self.store.as_ref(),
            &estimate.total_cost,
            &self.reserved(),
            Utc::now().date_naive(),
        )
        .await?;

        Ok(PreflightCheck {
            estimated_input_tokens: estimate.input_tokens,
            max_output_tokens: estimate.output_tokens,
            estimated_cost: estimate.total_cost,
            budget,
        })
    }

    /// Validate, enforce budgets and start streaming. Nothing is recorded yet.
    ///
    /// The worst-case cost is reserved before the request goes out, so turns
    /// running side by side cannot jointly overspend a budget.
    pub async fn begin_turn(&self, ctx: &SessionContext, user_text: &str) -> Result<PendingTurn, AppError> {
        let user_text = user_text.trim();
        if user_text.is_empty() {
            return Err(AppError::Validation("Message cannot be empty".to_string()));
        }

        let session = usage_recorder::get_session(self.store.as_ref(), &ctx.session_id).await?;
        if session.is_closed {
            return Err(AppError::Validation(format!("Session {} is closed", ctx.session_id)));
        }

        let info = self.catalog.resolve(&ctx.model)?;
        let provider = self.provider.as_ref().ok_or(LlmError::MissingApiKey)?;

        let messages = self.request_messages(ctx, user_text);
        let estimate = self.estimate(ctx, &messages)?;
        let (budget, reservation) = {
            let _admission = self.admission.lock().await;
            let budget = budget_service::enforce_with_reserved(
                self.store.as_ref(),
                &estimate.total_cost,
                &self.reserved(),
                Utc::now().date_naive(),
            )
            .await?;
            (budget, self.reserve(estimate.total_cost.clone()))
        };
        debug!("Reserved {} for turn in {}", reservation.amount(), ctx.session_id);

        let stream = provider
            .stream_completion(CompletionRequest {
                model: info.model.clone(),
                messages,
                max_tokens: self.settings.max_tokens,
                temperature: self.settings.temperature,
            })
            .await
            .map_err(|e| {
                error!("Completion request for {} failed: {}", ctx.session_id, e);
                e
            })?;

        Ok(PendingTurn {
            user_text: user_text.to_string(),
            preflight: PreflightCheck {
                estimated_input_tokens: estimate.input_tokens,
                max_output_tokens: estimate.output_tokens,
                estimated_cost: estimate.total_cost,
                budget,
            },
            stream,
            reservation,
        })
    }

    /// Record both sides of a finished turn and extend the history.
    ///
    /// Succeeds even if the session was closed while the reply streamed.
    pub async fn finish_turn(
        &self,
        ctx: &mut SessionContext,
        user_text: &str,
        reply: &str,
        mut usage: TokenUsage,
    ) -> Result<TurnOutcome, AppError> {
        if usage.estimated {
            usage.output_tokens = usage.output_tokens.min(self.settings.max_tokens);
        }

        let recorded = usage_recorder::record_turn(
            self.store.as_ref(),
            &self.catalog,
            &ctx.session_id,
            RecordTurn {
                model: ctx.model.clone(),
                usage,
                user_text: user_text.to_string(),
                reply: reply.to_string(),
            },
        )
        .await?;

        ctx.history.push(ChatMessage::user(user_text));
        ctx.history.push(ChatMessage::assistant(reply));

        let cost = recorded.cost();
        info!(
            "💬 Turn in {} cost {} ({} in / {} out tokens{})",
            ctx.session_id,
            cost,
            usage.input_tokens,
            usage.output_tokens,
            if usage.estimated { ", estimated" } else { "" }
        );

        Ok(TurnOutcome {
            reply: reply.to_string(),
            usage,
            user_message: recorded.user_message,
            assistant_message: recorded.assistant_message,
            session: recorded.session,
            cost,
        })
    }

    /// Run a whole turn without streaming to the caller.
    pub async fn complete_turn(&self, ctx: &mut SessionContext, user_text: &str) -> Result<TurnOutcome, AppError> {
        let PendingTurn { user_text, stream, reservation, .. } = self.begin_turn(ctx, user_text).await?;
        let (reply, usage) = stream.collect_reply().await?;
        let outcome = self.finish_turn(ctx, &user_text, &reply, usage).await;
        drop(reservation);
        outcome
    }

    pub async fn close(&self, ctx: SessionContext) -> Result<Session, AppError> {
        usage_recorder::end_session(self.store.as_ref(), &ctx.session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::external::StreamEvent;
    use crate::models::BudgetType;
    use crate::store::MemoryUsageStore;

    /// Replays a canned reply and remembers the last request.
    struct ScriptedProvider {
        reply: Vec<&'static str>,
        usage: TokenUsage,
        last_request: Mutex<Option<CompletionRequest>>,
        calls: Mutex<u32>,
    }

    impl ScriptedProvider {
        fn new(reply: Vec<&'static str>, input_tokens: u32, output_tokens: u32) -> Self {
            Self {
                reply,
                usage: TokenUsage { input_tokens, output_tokens, estimated: false },
                last_request: Mutex::new(None),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn stream_completion(&self, request: CompletionRequest) -> Result<CompletionStream, LlmError> {
            *self.calls.lock() += 1;
            *self.last_request.lock() = Some(request);

            let mut events: Vec<Result<StreamEvent, LlmError>> =
                self.reply.iter().map(|s| Ok(StreamEvent::Delta(s.to_string()))).collect();
            events.push(Ok(StreamEvent::Done(self.usage)));
            Ok(CompletionStream::from_events(events))
        }
    }

    fn settings() -> ChatSettings {
        ChatSettings {
            system_prompt: "You are terse.".to_string(),
            max_tokens: 400,
            temperature: 0.7,
        }
    }

    fn service(store: Arc<MemoryUsageStore>, provider: Option<Arc<ScriptedProvider>>) -> ChatService {
        ChatService::new(
            store,
            provider.map(|p| p as Arc<dyn CompletionProvider>),
            Arc::new(ModelCatalog::default()),
            settings(),
        )
    }

    #[tokio::test]
    async fn test_turn_records_both_sides_and_extends_history() {
        let store = Arc::new(MemoryUsageStore::new());
        let provider = Arc::new(ScriptedProvider::new(vec!["Hello", " there"], 800, 100));
        let chat = service(store.clone(), Some(provider.clone()));

        let mut ctx = chat.open(Some("gpt-4o")).await.unwrap();
        let outcome = chat.complete_turn(&mut ctx, "  hi  ").await.unwrap();

        assert_eq!(outcome.reply, "Hello there");
        // gpt-4o: 800 in at 2.50/M = 0.002, 100 out at 10/M = 0.001
        assert_eq!(outcome.user_message.cost, "0.002".parse::<BigDecimal>().unwrap());
        assert_eq!(outcome.assistant_message.cost, "0.001".parse::<BigDecimal>().unwrap());
        assert_eq!(outcome.session.total_cost, outcome.cost);
        assert_eq!(outcome.session.total_messages, 2);
        assert_eq!(ctx.history, vec![ChatMessage::user("hi"), ChatMessage::assistant("Hello there")]);

        let request = provider.last_request.lock().clone().unwrap();
        assert_eq!(request.model, "openai/gpt-4o");
        assert_eq!(request.messages[0], ChatMessage::system("You are terse."));
        assert_eq!(request.messages.last().unwrap(), &ChatMessage::user("hi"));
    }

    #[tokio::test]
    async fn test_budget_denial_happens_before_any_request() {
        let store = Arc::new(MemoryUsageStore::new());
        let provider = Arc::new(ScriptedProvider::new(vec!["never"], 1, 1));
        let chat = service(store.clone(), Some(provider.clone()));

        budget_service::create_budget(
            store.as_ref(),
            BudgetType::Daily,
            "0.000001".parse().unwrap(),
            Utc::now().date_naive(),
        )
        .await
        .unwrap();

        let mut ctx = chat.open(Some("claude-3-opus")).await.unwrap();
        let result = chat.complete_turn(&mut ctx, "plan me a trip").await;

        assert!(matches!(result, Err(AppError::BudgetExceeded { budget_type: BudgetType::Daily, .. })));
        assert_eq!(*provider.calls.lock(), 0);
        assert!(store.list_messages(&ctx.session_id).await.unwrap().is_empty());
        assert!(ctx.history.is_empty());
    }

    #[tokio::test]
    async fn test_missing_provider_reports_missing_key() {
        let store = Arc::new(MemoryUsageStore::new());
        let chat = service(store, None);

        let mut ctx = chat.open(None).await.unwrap();
        assert_eq!(ctx.model, "gpt-4o-mini");
        let result = chat.complete_turn(&mut ctx, "hi").await;
        assert!(matches!(result, Err(AppError::Llm(LlmError::MissingApiKey))));
    }

    #[tokio::test]
    async fn test_closed_session_and_empty_text_are_rejected() {
        let store = Arc::new(MemoryUsageStore::new());
        let provider = Arc::new(ScriptedProvider::new(vec!["ok"], 1, 1));
        let chat = service(store, Some(provider.clone()));

        let mut ctx = chat.open(None).await.unwrap();
        assert!(matches!(chat.complete_turn(&mut ctx, "   ").await, Err(AppError::Validation(_))));

        let session_id = ctx.session_id.clone();
        chat.close(ctx).await.unwrap();
        assert!(matches!(chat.resume(&session_id, Vec::new()).await, Err(AppError::Validation(_))));
        assert_eq!(*provider.calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_preflight_reports_upper_bound() {
        let store = Arc::new(MemoryUsageStore::new());
        let chat = service(store, None);
        let ctx = chat.open(Some("gpt-4o")).await.unwrap();

        let check = chat.preflight(&ctx, "abcde").await.unwrap();
        // 14 + 5 bytes, 4 framing tokens per message, 3 priming tokens
        assert_eq!(check.estimated_input_tokens, 30);
        assert_eq!(check.max_output_tokens, 400);
        assert!(check.budget.allowed);
        assert_eq!(check.estimated_cost, "0.004075".parse::<BigDecimal>().unwrap());
    }

    #[tokio::test]
    async fn test_turn_closed_mid_stream_is_still_recorded() {
        let store = Arc::new(MemoryUsageStore::new());
        let provider = Arc::new(ScriptedProvider::new(vec!["Hi"], 800, 100));
        let chat = service(store.clone(), Some(provider));
        budget_service::create_budget(store.as_ref(), BudgetType::Total, "1".parse().unwrap(), Utc::now().date_naive())
            .await
            .unwrap();

        let mut ctx = chat.open(Some("gpt-4o")).await.unwrap();
        let pending = chat.begin_turn(&ctx, "hello").await.unwrap();
        let (reply, usage) = pending.stream.collect_reply().await.unwrap();
        chat.close(ctx.clone()).await.unwrap();

        let outcome = chat.finish_turn(&mut ctx, &pending.user_text, &reply, usage).await.unwrap();

        assert_eq!(outcome.cost, "0.003".parse::<BigDecimal>().unwrap());
        assert!(outcome.session.is_closed);
        assert_eq!(outcome.session.total_messages, 2);
        assert_eq!(store.list_messages(&ctx.session_id).await.unwrap().len(), 2);
        let budget = store.list_active_budgets(None).await.unwrap().remove(0);
        assert_eq!(budget.current_spent, outcome.cost);
    }

    #[tokio::test]
    async fn test_in_flight_turn_holds_its_worst_case_cost() {
        let store = Arc::new(MemoryUsageStore::new());
        let provider = Arc::new(ScriptedProvider::new(vec!["ok"], 10, 10));
        let chat = service(store.clone(), Some(provider.clone()));
        let ctx = chat.open(Some("gpt-4o")).await.unwrap();

        // Room for one worst-case turn (0.004075) but not two
        budget_service::create_budget(store.as_ref(), BudgetType::Total, "0.006".parse().unwrap(), Utc::now().date_naive())
            .await
            .unwrap();

        let first = chat.begin_turn(&ctx, "abcde").await.unwrap();
        assert_eq!(chat.reserved(), "0.004075".parse::<BigDecimal>().unwrap());
        assert!(!chat.preflight(&ctx, "abcde").await.unwrap().budget.allowed);

        let second = chat.begin_turn(&ctx, "abcde").await;
        assert!(matches!(second, Err(AppError::BudgetExceeded { budget_type: BudgetType::Total, .. })));
        assert_eq!(*provider.calls.lock(), 1);

        drop(first);
        assert_eq!(chat.reserved(), BigDecimal::zero());
        assert!(chat.begin_turn(&ctx, "abcde").await.is_ok());
    }

    #[tokio::test]
    async fn test_estimated_reply_is_capped_at_max_tokens() {
        let store = Arc::new(MemoryUsageStore::new());
        let mut scripted = ScriptedProvider::new(vec!["long"], 20, 5_000);
        scripted.usage.estimated = true;
        let chat = service(store, Some(Arc::new(scripted)));

        let mut ctx = chat.open(Some("gpt-4o")).await.unwrap();
        let outcome = chat.complete_turn(&mut ctx, "go on").await.unwrap();

        assert_eq!(outcome.usage.output_tokens, 400);
        assert_eq!(outcome.assistant_message.output_tokens, 400);
        assert!(outcome.usage.estimated);
    }
}
