use crate::types::LlmUsageRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    pub provider: String,
    pub model: String,
    pub requests: i64,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub days: i64,
    pub total_requests: i64,
    pub total_tokens_in: i64,
    pub total_tokens_out: i64,
    pub total_cost: f64,
    /// Most expensive first.
    pub by_model: Vec<ModelUsage>,
}

/// Rolls usage records up per provider and model.
pub fn summarize_usage(records: &[LlmUsageRecord], days: i64) -> UsageSummary {
    let mut groups: BTreeMap<(&str, &str), ModelUsage> = BTreeMap::new();

    for record in records {
        let entry = groups
            .entry((record.provider.as_str(), record.model.as_str()))
            .or_insert_with(|| ModelUsage {
                provider: record.provider.clone(),
                model: record.model.clone(),
                ..Default::default()
            });
        entry.requests += 1;
        entry.tokens_in += i64::from(record.tokens_in);
        entry.tokens_out += i64::from(record.tokens_out);
        entry.cost += record.cost;
    }

    let mut by_model: Vec<ModelUsage> = groups.into_values().collect();
    by_model.sort_by(|a, b| b.cost.total_cmp(&a.cost));

    UsageSummary {
        days,
        total_requests: by_model.iter().map(|m| m.requests).sum(),
        total_tokens_in: by_model.iter().map(|m| m.tokens_in).sum(),
        total_tokens_out: by_model.iter().map(|m| m.tokens_out).sum(),
        total_cost: by_model.iter().map(|m| m.cost).sum(),
        by_model,
    }
}
