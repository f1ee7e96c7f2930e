//! Usage meter — turns backend token reports into priced usage records.

use chatrelay_core::{ConversationId, TokenUsage, UsageRecord};
use tracing::debug;

use crate::pricing::PricingTable;

/// Prices token usage against a [`PricingTable`].
///
/// The meter is pure: it never touches storage. The pipeline hands its
/// output to the usage store.
pub struct UsageMeter {
    pricing: PricingTable,
}

impl UsageMeter {
    pub fn new(pricing: PricingTable) -> Self {
        Self { pricing }
    }

    /// Estimated cost for one call, rounded to 6 fractional digits.
    ///
    /// Rounding happens exactly once, here. Stored costs are never
    /// re-rounded downstream.
    pub fn cost(&self, model: &str, usage: &TokenUsage) -> f64 {
        let pricing = self.pricing.resolve(model);
        let raw = pricing.cost(
            usage.input_tokens,
            usage.output_tokens,
            usage.cached_input_tokens,
        );
        round6(raw)
    }

    /// Build the usage record for one completed assistant message.
    pub fn record(
        &self,
        user_id: &str,
        conversation_id: &ConversationId,
        message_id: &str,
        model: &str,
        usage: &TokenUsage,
    ) -> UsageRecord {
        let estimated_cost = self.cost(model, usage);
        debug!(
            model,
            input = usage.input_tokens,
            output = usage.output_tokens,
            cached = usage.cached_input_tokens,
            cost = estimated_cost,
            "priced usage"
        );
        UsageRecord {
            user_id: user_id.to_string(),
            conversation_id: conversation_id.clone(),
            message_id: message_id.to_string(),
            model: model.to_string(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens,
            cached_input_tokens: usage.cached_input_tokens,
            reasoning_tokens: usage.reasoning_tokens,
            estimated_cost,
        }
    }
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}
