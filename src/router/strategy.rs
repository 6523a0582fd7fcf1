// ── Hivecore Router: Strategy Selection ────────────────────────────────────
// Turns a strategy + required capability into a concrete model name, using
// the static registry plus live per-model statistics from the call log.
// Resolution never fails: every branch bottoms out in a hard fallback.

use crate::atoms::error::CoreResult;
use crate::atoms::types::{Capability, ModelStats, Strategy};
use crate::interactions::InteractionStore;
use crate::registry;
use crate::router::normalize_model;
use serde::{Deserialize, Serialize};

/// Floor applied to cost and latency before the balanced score divides by
/// them.
const EPSILON: f64 = 1e-6;

/// Hard per-strategy fallbacks, used when neither statistics nor the
/// registry produce a candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyFallbacks {
    pub cheapest: String,
    pub fastest: String,
    pub best: String,
    pub balanced: String,
}

impl Default for StrategyFallbacks {
    fn default() -> Self {
        StrategyFallbacks {
            cheapest: "claude-haiku-4-5".into(),
            fastest: "claude-haiku-4-5".into(),
            best: "claude-opus-4-5".into(),
            balanced: "claude-sonnet-4-5".into(),
        }
    }
}

/// Routing thresholds. `Default` is the published defaults table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Candidates below this success rate are not trusted.
    pub min_success_rate: f64,
    /// The balanced strategy demands higher reliability.
    pub balanced_min_success_rate: f64,
    /// Models with fewer recent calls than this have no usable stats.
    pub min_sample_size: u64,
    /// Statistics window.
    pub stats_hours_back: i64,
    pub fallbacks: StrategyFallbacks,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            min_success_rate: 0.8,
            balanced_min_success_rate: 0.9,
            min_sample_size: 3,
            stats_hours_back: 24,
            fallbacks: StrategyFallbacks::default(),
        }
    }
}

/// Partial overrides for `Router::configure`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouterOverrides {
    pub min_success_rate: Option<f64>,
    pub balanced_min_success_rate: Option<f64>,
    pub min_sample_size: Option<u64>,
    pub stats_hours_back: Option<i64>,
    pub fallbacks: Option<StrategyFallbacks>,
}

impl RouterConfig {
    pub fn apply(&mut self, o: RouterOverrides) {
        if let Some(v) = o.min_success_rate {
            self.min_success_rate = v;
        }
        if let Some(v) = o.balanced_min_success_rate {
            self.balanced_min_success_rate = v;
        }
        if let Some(v) = o.min_sample_size {
            self.min_sample_size = v;
        }
        if let Some(v) = o.stats_hours_back {
            self.stats_hours_back = v;
        }
        if let Some(v) = o.fallbacks {
            self.fallbacks = v;
        }
    }
}

/// Resolve a strategy to a model name.
///
/// The explicit model short-circuits only for `Specific`, or when no
/// strategy was given at all; `cheapest`/`fastest`/`best`/`balanced` run
/// their selection even when the caller also named a model.
pub fn resolve(
    config: &RouterConfig,
    interactions: &InteractionStore,
    strategy: Option<Strategy>,
    capability: Option<Capability>,
    model: Option<&str>,
) -> CoreResult<String> {
    let strategy = match (strategy, model) {
        (Some(Strategy::Specific), m) => {
            return Ok(m
                .map(normalize_model)
                .unwrap_or_else(|| config.fallbacks.balanced.clone()))
        }
        (None, Some(m)) => return Ok(normalize_model(m)),
        (Some(s), _) => s,
        (None, None) => Strategy::Balanced,
    };

    // Candidate pool: capability-filtered, else every registered model.
    let pool: Vec<&'static str> = match capability {
        Some(cap) => registry::by_capability(cap),
        None => registry::all_names(),
    };

    // Live statistics, restricted to the pool. A stats query failure
    // degrades to static selection rather than failing resolution.
    let stats: Vec<ModelStats> = interactions
        .model_stats(config.stats_hours_back, config.min_sample_size)
        .unwrap_or_default()
        .into_iter()
        .filter(|s| pool.iter().any(|m| *m == s.model))
        .collect();

    let reliable = |floor: f64| -> Vec<&ModelStats> {
        stats.iter().filter(|s| s.success_rate >= floor).collect()
    };

    let choice = match strategy {
        Strategy::Cheapest => reliable(config.min_success_rate)
            .into_iter()
            .min_by(|a, b| {
                a.avg_cost
                    .partial_cmp(&b.avg_cost)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.model.cmp(&b.model))
            })
            .map(|s| s.model.clone())
            .or_else(|| registry::cheapest(Some(pool.as_slice())).map(String::from))
            .unwrap_or_else(|| config.fallbacks.cheapest.clone()),

        Strategy::Fastest => reliable(config.min_success_rate)
            .into_iter()
            .min_by(|a, b| {
                a.avg_latency_ms
                    .partial_cmp(&b.avg_latency_ms)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.model.cmp(&b.model))
            })
            .map(|s| s.model.clone())
            .or_else(|| registry::fastest(Some(pool.as_slice())).map(String::from))
            .unwrap_or_else(|| config.fallbacks.fastest.clone()),

        // `best` is deliberately static: quality ranking does not move with
        // recent latency or cost.
        Strategy::Best => registry::best(Some(pool.as_slice()))
            .map(String::from)
            .unwrap_or_else(|| config.fallbacks.best.clone()),

        Strategy::Balanced => reliable(config.balanced_min_success_rate)
            .into_iter()
            .max_by(|a, b| {
                balanced_score(a)
                    .partial_cmp(&balanced_score(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.model.cmp(&a.model))
            })
            .map(|s| s.model.clone())
            .unwrap_or_else(|| {
                // No reliable stats: sonnet when the pool allows it, else
                // the configured fallback.
                if pool.contains(&"claude-sonnet-4-5") {
                    "claude-sonnet-4-5".to_string()
                } else {
                    config.fallbacks.balanced.clone()
                }
            }),

        Strategy::Specific => unreachable!("handled above"),
    };
    Ok(choice)
}

/// Balanced objective: cheap and fast at once. Both factors floored so a
/// zero never divides.
fn balanced_score(s: &ModelStats) -> f64 {
    1.0 / (s.avg_cost.max(EPSILON) * s.avg_latency_ms.max(EPSILON))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::{now_rfc3339, CallRecord};

    fn store_with(records: &[(&str, bool, u64, f64)]) -> InteractionStore {
        let store = InteractionStore::open_in_memory().unwrap();
        for (model, ok, duration_ms, cost) in records {
            store.log_call(CallRecord {
                id: 0,
                timestamp: now_rfc3339(),
                provider: "test".into(),
                model: (*model).into(),
                caller: "t".into(),
                prompt: String::new(),
                response: String::new(),
                input_tokens: 1,
                output_tokens: 1,
                cost_estimate: *cost,
                duration_ms: *duration_ms,
                ok: *ok,
                error: if *ok { None } else { Some("e".into()) },
            });
        }
        store.flush_pending().unwrap();
        store
    }

    fn resolve_with(
        store: &InteractionStore,
        strategy: Strategy,
        capability: Option<Capability>,
    ) -> String {
        resolve(&RouterConfig::default(), store, Some(strategy), capability, None).unwrap()
    }

    #[test]
    fn empty_stats_falls_back_to_registry() {
        let store = store_with(&[]);
        assert_eq!(resolve_with(&store, Strategy::Cheapest, None), "claude-haiku-4-5");
        assert_eq!(resolve_with(&store, Strategy::Fastest, None), "claude-haiku-4-5");
        assert_eq!(resolve_with(&store, Strategy::Best, None), "claude-opus-4-5");
        assert_eq!(resolve_with(&store, Strategy::Balanced, None), "claude-sonnet-4-5");
    }

    #[test]
    fn best_multimodal_resolves_to_gpt_4o() {
        let store = store_with(&[]);
        assert_eq!(
            resolve_with(&store, Strategy::Best, Some(Capability::Multimodal)),
            "gpt-4o"
        );
    }

    #[test]
    fn specific_returns_the_named_model() {
        let store = store_with(&[]);
        let config = RouterConfig::default();
        assert_eq!(
            resolve(&config, &store, Some(Strategy::Specific), None, Some("opus-4")).unwrap(),
            "claude-opus-4-5"
        );
        // No strategy given with an explicit model behaves like specific.
        assert_eq!(
            resolve(&config, &store, None, None, Some("gpt-4o")).unwrap(),
            "gpt-4o"
        );
    }

    #[test]
    fn explicit_model_does_not_override_a_real_strategy() {
        let store = store_with(&[]);
        let config = RouterConfig::default();
        // cheapest still runs its selection even with a model hint.
        assert_eq!(
            resolve(&config, &store, Some(Strategy::Cheapest), None, Some("gpt-4o")).unwrap(),
            "claude-haiku-4-5"
        );
        // No strategy and no model falls through to balanced resolution.
        assert_eq!(
            resolve(&config, &store, None, None, None).unwrap(),
            "claude-sonnet-4-5"
        );
    }

    #[test]
    fn cheapest_prefers_reliable_low_cost_stats() {
        // gpt-3.5-turbo is cheap in stats but unreliable; sonnet is the
        // cheapest reliable candidate.
        let store = store_with(&[
            ("gpt-3.5-turbo", false, 100, 0.001),
            ("gpt-3.5-turbo", false, 100, 0.001),
            ("gpt-3.5-turbo", true, 100, 0.001),
            ("claude-sonnet-4-5", true, 900, 0.02),
            ("claude-sonnet-4-5", true, 900, 0.02),
            ("claude-sonnet-4-5", true, 900, 0.02),
        ]);
        assert_eq!(resolve_with(&store, Strategy::Cheapest, None), "claude-sonnet-4-5");
    }

    #[test]
    fn fastest_uses_latency_stats() {
        let store = store_with(&[
            ("claude-opus-4-5", true, 4_000, 0.5),
            ("claude-opus-4-5", true, 4_000, 0.5),
            ("claude-opus-4-5", true, 4_000, 0.5),
            ("gpt-4o", true, 300, 0.05),
            ("gpt-4o", true, 300, 0.05),
            ("gpt-4o", true, 300, 0.05),
        ]);
        assert_eq!(resolve_with(&store, Strategy::Fastest, None), "gpt-4o");
    }

    #[test]
    fn best_ignores_stats() {
        // Even with stellar stats for haiku, best stays static.
        let store = store_with(&[
            ("claude-haiku-4-5", true, 10, 0.0001),
            ("claude-haiku-4-5", true, 10, 0.0001),
            ("claude-haiku-4-5", true, 10, 0.0001),
        ]);
        assert_eq!(resolve_with(&store, Strategy::Best, None), "claude-opus-4-5");
    }

    #[test]
    fn balanced_needs_higher_reliability() {
        // 0.85 success clears the general floor but not the balanced floor.
        let records: Vec<(&str, bool, u64, f64)> = (0..17)
            .map(|i| ("gpt-4o", i < 14, 100u64, 0.01))
            .chain((0..10).map(|_| ("claude-sonnet-4-5", true, 500u64, 0.03)))
            .collect();
        let store = store_with(&records);

        // gpt-4o (82% success) is fine for cheapest…
        assert_eq!(resolve_with(&store, Strategy::Cheapest, None), "gpt-4o");
        // …but balanced demands ≥ 0.9 and picks the reliable model.
        assert_eq!(resolve_with(&store, Strategy::Balanced, None), "claude-sonnet-4-5");
    }

    #[test]
    fn balanced_maximizes_inverse_cost_latency() {
        let store = store_with(&[
            // score = 1/(0.01 * 100) = 1.0
            ("gpt-4o", true, 100, 0.01),
            ("gpt-4o", true, 100, 0.01),
            ("gpt-4o", true, 100, 0.01),
            // score = 1/(0.05 * 400) = 0.05
            ("claude-sonnet-4-5", true, 400, 0.05),
            ("claude-sonnet-4-5", true, 400, 0.05),
            ("claude-sonnet-4-5", true, 400, 0.05),
        ]);
        assert_eq!(resolve_with(&store, Strategy::Balanced, None), "gpt-4o");
    }

    #[test]
    fn config_overrides_apply() {
        let mut config = RouterConfig::default();
        config.apply(RouterOverrides {
            min_success_rate: Some(0.5),
            min_sample_size: Some(10),
            ..Default::default()
        });
        assert_eq!(config.min_success_rate, 0.5);
        assert_eq!(config.min_sample_size, 10);
        // Untouched fields keep their defaults.
        assert_eq!(config.stats_hours_back, 24);
        assert_eq!(config.balanced_min_success_rate, 0.9);
    }
}
