//! Usage metering.
//!
//! Records one [`UsageRecord`] per model call and derives every aggregate
//! on read: totals, per-dimension breakdowns, daily trends and billing
//! exports. Records are append-only.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{
    BillingReport, DailyUsage, Dimension, MeteringAggregation, ModelPrice, UsageEvent, UsageFilter,
    UsageRecord, UsageStatus, UsageSummary,
};
use crate::storage::{Collection, Store};

/// Value used for records that carry no value for a dimension
pub const UNASSIGNED: &str = "unassigned";

/// Built-in prices in USD per 1000 input / output tokens
pub fn default_price_table() -> BTreeMap<String, ModelPrice> {
    [
        ("gpt-4o", ModelPrice::new(0.0025, 0.01)),
        ("gpt-4o-mini", ModelPrice::new(0.00015, 0.0006)),
        ("gpt-4-turbo", ModelPrice::new(0.01, 0.03)),
        ("gpt-4", ModelPrice::new(0.03, 0.06)),
        ("gpt-3.5-turbo", ModelPrice::new(0.0005, 0.0015)),
        ("o1", ModelPrice::new(0.015, 0.06)),
        ("o1-mini", ModelPrice::new(0.003, 0.012)),
        ("claude-3-5-sonnet", ModelPrice::new(0.003, 0.015)),
        ("claude-3-5-haiku", ModelPrice::new(0.0008, 0.004)),
        ("claude-3-opus", ModelPrice::new(0.015, 0.075)),
        ("claude-3-sonnet", ModelPrice::new(0.003, 0.015)),
        ("claude-3-haiku", ModelPrice::new(0.00025, 0.00125)),
        ("gemini-1.5-pro", ModelPrice::new(0.00125, 0.005)),
        ("gemini-1.5-flash", ModelPrice::new(0.000075, 0.0003)),
        ("text-embedding-3-small", ModelPrice::new(0.00002, 0.0)),
        ("text-embedding-3-large", ModelPrice::new(0.00013, 0.0)),
    ]
    .into_iter()
    .map(|(model, price)| (model.to_string(), price))
    .collect()
}

/// Attribution of a gateway call whose token counts come from the raw response
#[derive(Debug, Clone, Default)]
pub struct ProviderResponseContext {
    pub model_id: String,
    pub provider: Option<String>,
    pub group_id: Option<String>,
    pub lob_id: Option<String>,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub latency_ms: u64,
    pub status: UsageStatus,
}

/// Usage recorder and aggregator
pub struct UsageMeter {
    store: Arc<Store>,
    prices: BTreeMap<String, ModelPrice>,
}

impl UsageMeter {
    /// A meter using the built-in price table
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            prices: default_price_table(),
        }
    }

    /// A meter whose price table is the built-in one with `overrides` merged over it
    pub fn with_pricing(store: Arc<Store>, overrides: &HashMap<String, ModelPrice>) -> Self {
        let mut prices = default_price_table();
        for (model, price) in overrides {
            prices.insert(model.to_lowercase(), *price);
        }
        Self { store, prices }
    }

    pub fn prices(&self) -> &BTreeMap<String, ModelPrice> {
        &self.prices
    }

    /// Price of a call; the longest price-table key contained in the model id wins.
    ///
    /// Unknown models cost nothing.
    pub fn calculate_cost(&self, model_id: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let model = model_id.to_lowercase();

        self.prices
            .iter()
            .filter(|(key, _)| model.contains(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, price)| price.cost(input_tokens, output_tokens))
            .unwrap_or(0.0)
    }

    /// Record one call
    pub fn record(&self, event: UsageEvent) -> UsageRecord {
        let cost_usd = match (event.cost_usd, event.model_id.as_deref()) {
            (Some(cost), _) => cost,
            (None, Some(model)) => self.calculate_cost(model, event.input_tokens, event.output_tokens),
            (None, None) => 0.0,
        };

        let record = UsageRecord {
            id: Uuid::new_v4(),
            timestamp: event.timestamp.unwrap_or_else(Utc::now),
            group_id: event.group_id,
            lob_id: event.lob_id,
            user_id: event.user_id,
            agent_id: event.agent_id,
            model_id: event.model_id,
            provider: event.provider,
            input_tokens: event.input_tokens,
            output_tokens: event.output_tokens,
            total_tokens: event
                .total_tokens
                .unwrap_or(event.input_tokens + event.output_tokens),
            cost_usd,
            latency_ms: event.latency_ms,
            status: event.status,
        };

        self.store
            .put(Collection::Usage, &record.id.to_string(), &record);
        debug!(
            model = record.model_id.as_deref().unwrap_or(UNASSIGNED),
            tokens = record.total_tokens,
            cost = record.cost_usd,
            "Usage recorded"
        );
        record
    }

    /// Record a call from a raw provider response.
    ///
    /// Token counts are read from a `usage_metadata` map (`input_tokens` /
    /// `output_tokens`) or an OpenAI-style `usage` object (`prompt_tokens` /
    /// `completion_tokens`, also accepting `input_tokens` / `output_tokens`).
    pub fn record_from_response(&self, context: ProviderResponseContext, response: &Value) -> UsageRecord {
        let (input_tokens, output_tokens, total_tokens) = extract_token_counts(response);

        self.record(UsageEvent {
            timestamp: None,
            group_id: context.group_id,
            lob_id: context.lob_id,
            user_id: context.user_id,
            agent_id: context.agent_id,
            model_id: Some(context.model_id),
            provider: context.provider,
            input_tokens,
            output_tokens,
            total_tokens,
            cost_usd: None,
            latency_ms: context.latency_ms,
            status: context.status,
        })
    }

    /// Records inside the filter's window, oldest first
    fn records(&self, filter: &UsageFilter) -> Vec<UsageRecord> {
        // Windows reaching past chrono's range include everything
        let cutoff = Utc::now()
            .checked_sub_signed(Duration::days(i64::from(filter.period_days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut records: Vec<UsageRecord> = self
            .store
            .list::<UsageRecord>(Collection::Usage)
            .into_iter()
            .filter(|r| r.timestamp >= cutoff && filter.matches(r))
            .collect();
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        records
    }

    /// Totals over the filtered window
    pub fn summary(&self, filter: &UsageFilter) -> UsageSummary {
        let records = self.records(filter);
        let totals = Totals::of(&records);

        let distinct = |f: fn(&UsageRecord) -> Option<&str>| -> usize {
            records.iter().filter_map(f).collect::<HashSet<_>>().len()
        };

        UsageSummary {
            period_days: filter.period_days,
            total_requests: totals.requests,
            input_tokens: totals.input_tokens,
            output_tokens: totals.output_tokens,
            total_tokens: totals.total_tokens,
            total_cost_usd: totals.cost_usd,
            avg_latency_ms: totals.avg_latency_ms(),
            success_rate: totals.success_rate(),
            unique_agents: distinct(|r| r.agent_id.as_deref()),
            unique_models: distinct(|r| r.model_id.as_deref()),
            unique_users: distinct(|r| r.user_id.as_deref()),
        }
    }

    /// Per-value statistics for `dimension`, by total cost descending
    pub fn aggregate(&self, dimension: Dimension, filter: &UsageFilter) -> Vec<MeteringAggregation> {
        let mut groups: BTreeMap<String, Vec<UsageRecord>> = BTreeMap::new();
        for record in self.records(filter) {
            let value = dimension.value_of(&record).unwrap_or(UNASSIGNED).to_string();
            groups.entry(value).or_default().push(record);
        }

        let mut aggregations: Vec<MeteringAggregation> = groups
            .into_iter()
            .map(|(value, records)| {
                let totals = Totals::of(&records);
                MeteringAggregation {
                    dimension,
                    value,
                    total_requests: totals.requests,
                    input_tokens: totals.input_tokens,
                    output_tokens: totals.output_tokens,
                    total_tokens: totals.total_tokens,
                    total_cost_usd: totals.cost_usd,
                    avg_latency_ms: totals.avg_latency_ms(),
                    success_rate: totals.success_rate(),
                }
            })
            .collect();

        aggregations.sort_by(|a, b| {
            b.total_cost_usd
                .total_cmp(&a.total_cost_usd)
                .then_with(|| a.value.cmp(&b.value))
        });
        aggregations
    }

    pub fn by_group(&self, filter: &UsageFilter) -> Vec<MeteringAggregation> {
        self.aggregate(Dimension::Group, filter)
    }

    pub fn by_lob(&self, filter: &UsageFilter) -> Vec<MeteringAggregation> {
        self.aggregate(Dimension::Lob, filter)
    }

    pub fn by_agent(&self, filter: &UsageFilter) -> Vec<MeteringAggregation> {
        self.aggregate(Dimension::Agent, filter)
    }

    pub fn by_model(&self, filter: &UsageFilter) -> Vec<MeteringAggregation> {
        self.aggregate(Dimension::Model, filter)
    }

    pub fn by_user(&self, filter: &UsageFilter) -> Vec<MeteringAggregation> {
        self.aggregate(Dimension::User, filter)
    }

    /// Usage per UTC day, oldest first
    pub fn daily_trend(&self, filter: &UsageFilter) -> Vec<DailyUsage> {
        let mut days: BTreeMap<chrono::NaiveDate, DailyUsage> = BTreeMap::new();

        for record in self.records(filter) {
            let date = record.timestamp.date_naive();
            let day = days.entry(date).or_insert_with(|| DailyUsage {
                date,
                requests: 0,
                tokens: 0,
                cost_usd: 0.0,
            });
            day.requests += 1;
            day.tokens += record.total_tokens;
            day.cost_usd += record.cost_usd;
        }

        days.into_values().collect()
    }

    /// Chargeback report for the filtered window
    pub fn export_billing(&self, filter: &UsageFilter) -> BillingReport {
        let report = BillingReport {
            generated_at: Utc::now(),
            period_days: filter.period_days,
            summary: self.summary(filter),
            by_model: self.by_model(filter),
            by_agent: self.by_agent(filter),
        };

        info!(
            period_days = report.period_days,
            requests = report.summary.total_requests,
            cost = report.summary.total_cost_usd,
            "Billing report exported"
        );
        report
    }
}

/// Running totals over a set of records
#[derive(Default)]
struct Totals {
    requests: u64,
    successes: u64,
    input_tokens: u64,
    output_tokens: u64,
    total_tokens: u64,
    cost_usd: f64,
    latency_ms: u64,
}

impl Totals {
    fn of(records: &[UsageRecord]) -> Self {
        records.iter().fold(Self::default(), |mut t, r| {
            t.requests += 1;
            if r.status == UsageStatus::Success {
                t.successes += 1;
            }
            t.input_tokens += r.input_tokens;
            t.output_tokens += r.output_tokens;
            t.total_tokens += r.total_tokens;
            t.cost_usd += r.cost_usd;
            t.latency_ms += r.latency_ms;
            t
        })
    }

    fn avg_latency_ms(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        self.latency_ms as f64 / self.requests as f64
    }

    fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        self.successes as f64 / self.requests as f64
    }
}

/// (input, output, total) token counts from a provider response
fn extract_token_counts(response: &Value) -> (u64, u64, Option<u64>) {
    let field = |obj: &Value, key: &str| obj.get(key).and_then(Value::as_u64);

    if let Some(meta) = response.get("usage_metadata").filter(|v| v.is_object()) {
        let input = field(meta, "input_tokens").unwrap_or(0);
        let output = field(meta, "output_tokens").unwrap_or(0);
        return (input, output, field(meta, "total_tokens"));
    }

    if let Some(usage) = response.get("usage").filter(|v| v.is_object()) {
        let input = field(usage, "prompt_tokens")
            .or_else(|| field(usage, "input_tokens"))
            .unwrap_or(0);
        let output = field(usage, "completion_tokens")
            .or_else(|| field(usage, "output_tokens"))
            .unwrap_or(0);
        return (input, output, field(usage, "total_tokens"));
    }

    (0, 0, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meter() -> UsageMeter {
        UsageMeter::new(Arc::new(Store::in_memory()))
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_longest_match_wins() {
        let meter = meter();
        // gpt-4o-mini must not be priced as gpt-4o or gpt-4
        assert!(close(
            meter.calculate_cost("gpt-4o-mini-2024-07-18", 1000, 1000),
            0.00015 + 0.0006
        ));
        assert!(close(meter.calculate_cost("gpt-4o", 1000, 1000), 0.0025 + 0.01));
        assert!(close(meter.calculate_cost("GPT-4", 1000, 0), 0.03));
    }

    #[test]
    fn test_unknown_model_costs_nothing() {
        assert_eq!(meter().calculate_cost("llama-local", 5000, 5000), 0.0);
    }

    #[test]
    fn test_pricing_overrides() {
        let overrides = HashMap::from([
            ("llama-local".to_string(), ModelPrice::new(0.001, 0.002)),
            ("gpt-4o".to_string(), ModelPrice::new(0.005, 0.015)),
        ]);
        let meter = UsageMeter::with_pricing(Arc::new(Store::in_memory()), &overrides);

        assert!(close(meter.calculate_cost("llama-local", 1000, 1000), 0.003));
        assert!(close(meter.calculate_cost("gpt-4o", 1000, 0), 0.005));
        // Untouched entries survive the merge
        assert!(close(meter.calculate_cost("claude-3-opus", 1000, 0), 0.015));
    }

    #[test]
    fn test_record_derives_totals_and_cost() {
        let meter = meter();
        let record = meter.record(UsageEvent::for_model("gpt-4o", 2000, 1000));

        assert_eq!(record.total_tokens, 3000);
        assert!(close(record.cost_usd, 0.005 + 0.01));

        let explicit = meter.record(UsageEvent::for_model("gpt-4o", 10, 10).with_cost(1.5));
        assert_eq!(explicit.cost_usd, 1.5);
    }

    #[test]
    fn test_extract_usage_shapes() {
        assert_eq!(
            extract_token_counts(&json!({"usage_metadata": {"input_tokens": 5, "output_tokens": 7}})),
            (5, 7, None)
        );
        assert_eq!(
            extract_token_counts(&json!({"usage": {"prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7}})),
            (3, 4, Some(7))
        );
        assert_eq!(
            extract_token_counts(&json!({"usage": {"input_tokens": 1, "output_tokens": 2}})),
            (1, 2, None)
        );
        assert_eq!(extract_token_counts(&json!({"content": "hi"})), (0, 0, None));
    }

    #[test]
    fn test_record_from_response() {
        let meter = meter();
        let record = meter.record_from_response(
            ProviderResponseContext {
                model_id: "claude-3-haiku".to_string(),
                agent_id: Some("triage".to_string()),
                ..Default::default()
            },
            &json!({"usage": {"input_tokens": 1000, "output_tokens": 1000}}),
        );

        assert_eq!(record.total_tokens, 2000);
        assert!(close(record.cost_usd, 0.00025 + 0.00125));
        assert_eq!(record.agent_id.as_deref(), Some("triage"));
    }

    #[test]
    fn test_missing_dimension_groups_as_unassigned() {
        let meter = meter();
        meter.record(UsageEvent::for_model("gpt-4o", 10, 10).with_agent("a"));
        meter.record(UsageEvent::for_model("gpt-4o", 10, 10));

        let by_agent = meter.by_agent(&UsageFilter::default());
        let values: Vec<&str> = by_agent.iter().map(|a| a.value.as_str()).collect();
        assert!(values.contains(&"a"));
        assert!(values.contains(&UNASSIGNED));
    }

    #[test]
    fn test_old_records_fall_outside_window() {
        let meter = meter();
        meter.record(UsageEvent::for_model("gpt-4o", 10, 10).at(Utc::now() - Duration::days(40)));
        meter.record(UsageEvent::for_model("gpt-4o", 10, 10));

        assert_eq!(meter.summary(&UsageFilter::last_days(30)).total_requests, 1);
        assert_eq!(meter.summary(&UsageFilter::last_days(60)).total_requests, 2);
    }

    #[test]
    fn test_unbounded_window_includes_everything() {
        let meter = meter();
        meter.record(UsageEvent::for_model("gpt-4o", 10, 10).at(Utc::now() - Duration::days(4000)));
        meter.record(UsageEvent::for_model("gpt-4o", 10, 10));

        let filter = UsageFilter::last_days(u32::MAX);
        assert_eq!(meter.summary(&filter).total_requests, 2);
        assert_eq!(meter.by_model(&filter).len(), 1);
        assert_eq!(meter.daily_trend(&filter).len(), 2);
        assert_eq!(meter.export_billing(&filter).summary.total_requests, 2);
    }

    #[test]
    fn test_empty_summary() {
        let summary = meter().summary(&UsageFilter::default());
        assert_eq!(summary.total_requests, 0);
        assert_eq!(summary.avg_latency_ms, 0.0);
        assert_eq!(summary.success_rate, 0.0);
    }
}
