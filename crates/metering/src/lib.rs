//! # chatrelay Metering
//!
//! Pricing tables and cost accounting. [`PricingTable`] maps model ids to
//! per-million-token rates; [`UsageMeter`] turns a [`TokenUsage`] report
//! into a [`UsageRecord`] with an estimated cost.
//!
//! [`TokenUsage`]: chatrelay_core::TokenUsage
//! [`UsageRecord`]: chatrelay_core::UsageRecord

pub mod meter;
pub mod pricing;

pub use meter::UsageMeter;
pub use pricing::{ModelPricing, PricingTable};
