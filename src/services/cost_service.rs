use bigdecimal::Zero;
use sqlx::types::BigDecimal;

use crate::models::{ChatMessage, CostComparisonRow, MessageCost, ModelCatalog, ModelPricing};
use crate::utils::max_conversation_tokens;

/// Stored message costs carry this many decimal places.
pub const COST_SCALE: i64 = 6;

// Shape of the "standard session" used for model comparisons
const COMPARISON_MESSAGES: u32 = 5;
const COMPARISON_INPUT_TOKENS: u32 = 350;
const COMPARISON_OUTPUT_TOKENS: u32 = 500;

fn per_million(tokens: u32, price_per_million: &BigDecimal) -> BigDecimal {
    BigDecimal::from(tokens) * price_per_million / BigDecimal::from(1_000_000)
}

/// Cost of a token count at the given prices, rounded to `COST_SCALE`.
pub fn price_tokens(pricing: &ModelPricing, input_tokens: u32, output_tokens: u32) -> MessageCost {
    let input_cost = per_million(input_tokens, &pricing.input_tokens_per_million).round(COST_SCALE);
    let output_cost = per_million(output_tokens, &pricing.output_tokens_per_million).round(COST_SCALE);
    let total_cost = &input_cost + &output_cost;

    MessageCost {
        input_tokens,
        output_tokens,
        input_cost,
        output_cost,
        total_cost,
    }
}

/// `None` when the model is not in the catalogue.
pub fn calculate_message_cost(
    catalog: &ModelCatalog,
    model: &str,
    input_tokens: u32,
    output_tokens: u32,
) -> Option<MessageCost> {
    catalog
        .get(model)
        .map(|info| price_tokens(&info.pricing, input_tokens, output_tokens))
}

/// Effective blended price per million tokens; zero when there are no tokens.
pub fn cost_per_million_tokens(
    catalog: &ModelCatalog,
    model: &str,
    input_tokens: u32,
    output_tokens: u32,
) -> Option<BigDecimal> {
    let cost = calculate_message_cost(catalog, model, input_tokens, output_tokens)?;
    Some(blended_per_million(&cost.total_cost, u64::from(input_tokens) + u64::from(output_tokens)))
}

fn blended_per_million(total_cost: &BigDecimal, total_tokens: u64) -> BigDecimal {
    if total_tokens == 0 {
        return BigDecimal::zero();
    }
    (total_cost * BigDecimal::from(1_000_000) / BigDecimal::from(total_tokens)).round(COST_SCALE)
}

/// Per-session cost of every available model, cheapest first.
pub fn cost_comparison_table(catalog: &ModelCatalog) -> Vec<CostComparisonRow> {
    let mut rows: Vec<CostComparisonRow> = catalog
        .available()
        .map(|(key, info)| {
            let per_message = price_tokens(&info.pricing, COMPARISON_INPUT_TOKENS, COMPARISON_OUTPUT_TOKENS);
            let total_cost_per_session = &per_message.total_cost * BigDecimal::from(COMPARISON_MESSAGES);
            let session_tokens =
                u64::from(COMPARISON_MESSAGES) * u64::from(COMPARISON_INPUT_TOKENS + COMPARISON_OUTPUT_TOKENS);

            CostComparisonRow {
                model_id: key.clone(),
                model_name: info.name.clone(),
                provider: info.provider.clone(),
                emoji: info.emoji.clone(),
                input_cost_per_million: info.pricing.input_tokens_per_million.clone(),
                output_cost_per_million: info.pricing.output_tokens_per_million.clone(),
                messages_per_session: COMPARISON_MESSAGES,
                input_tokens_per_message: COMPARISON_INPUT_TOKENS,
                output_tokens_per_message: COMPARISON_OUTPUT_TOKENS,
                cost_per_million: blended_per_million(&total_cost_per_session, session_tokens),
                total_cost_per_session,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        a.total_cost_per_session
            .cmp(&b.total_cost_per_session)
            .then_with(|| a.model_id.cmp(&b.model_id))
    });
    rows
}

/// Upper-bound cost of sending `messages`: the most tokens the prompt can
/// encode to plus a reply that uses the full `max_tokens` allowance.
pub fn estimate_prospective_cost(
    catalog: &ModelCatalog,
    model: &str,
    messages: &[ChatMessage],
    max_tokens: u32,
) -> Option<MessageCost> {
    let input_tokens = max_conversation_tokens(messages);
    calculate_message_cost(catalog, model, input_tokens, max_tokens)
}
