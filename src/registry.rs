// ── Hivecore: Capability Registry ──────────────────────────────────────────
// Pure-data source of model metadata plus selection helpers. No I/O — the
// table is process-lifetime constant and every operation is deterministic
// (ties broken by alphabetical model name).

use crate::atoms::types::Capability::*;
use crate::atoms::types::{Capability, ModelDescriptor, Pricing, ProviderKind, Tier};

/// The static model table. Pricing figures are estimates; gpt-5.3-codex
/// pricing is a placeholder overridable via `Core::configure_pricing`.
static MODELS: &[ModelDescriptor] = &[
    ModelDescriptor {
        name: "claude-haiku-4-5",
        provider: ProviderKind::Anthropic,
        tier: Tier::Cheap,
        capabilities: &[SimpleReasoning, Classification, Extraction, Coding],
        cost_tier: 1,
        default_timeout_ms: 60_000,
        max_context_tokens: 200_000,
        pricing: Pricing { input_per_million: 1.0, output_per_million: 5.0 },
    },
    ModelDescriptor {
        name: "claude-sonnet-4-5",
        provider: ProviderKind::Anthropic,
        tier: Tier::Balanced,
        capabilities: &[Coding, Reasoning, Review, Creative, LongContext],
        cost_tier: 3,
        default_timeout_ms: 120_000,
        max_context_tokens: 200_000,
        pricing: Pricing { input_per_million: 3.0, output_per_million: 15.0 },
    },
    ModelDescriptor {
        name: "claude-opus-4-5",
        provider: ProviderKind::Anthropic,
        tier: Tier::Best,
        capabilities: &[Reasoning, Coding, Creative, Review, LongContext],
        cost_tier: 5,
        default_timeout_ms: 300_000,
        max_context_tokens: 200_000,
        pricing: Pricing { input_per_million: 15.0, output_per_million: 75.0 },
    },
    // Previous-generation opus: registered at the balanced tier so `best`
    // has a single best-tier Anthropic entry.
    ModelDescriptor {
        name: "claude-opus-4",
        provider: ProviderKind::Anthropic,
        tier: Tier::Balanced,
        capabilities: &[Reasoning, Coding, Review],
        cost_tier: 5,
        default_timeout_ms: 240_000,
        max_context_tokens: 200_000,
        pricing: Pricing { input_per_million: 15.0, output_per_million: 75.0 },
    },
    ModelDescriptor {
        name: "claude-sonnet-3-5",
        provider: ProviderKind::Anthropic,
        tier: Tier::Balanced,
        capabilities: &[Coding, Reasoning, Creative],
        cost_tier: 3,
        default_timeout_ms: 120_000,
        max_context_tokens: 200_000,
        pricing: Pricing { input_per_million: 3.0, output_per_million: 15.0 },
    },
    // The registry's only multimodal entry.
    ModelDescriptor {
        name: "gpt-4o",
        provider: ProviderKind::OpenAi,
        tier: Tier::Balanced,
        capabilities: &[Multimodal, Coding, Creative, Classification],
        cost_tier: 3,
        default_timeout_ms: 120_000,
        max_context_tokens: 128_000,
        pricing: Pricing { input_per_million: 2.5, output_per_million: 10.0 },
    },
    ModelDescriptor {
        name: "gpt-4-turbo",
        provider: ProviderKind::OpenAi,
        tier: Tier::Balanced,
        capabilities: &[Coding, Reasoning],
        cost_tier: 4,
        default_timeout_ms: 180_000,
        max_context_tokens: 128_000,
        pricing: Pricing { input_per_million: 10.0, output_per_million: 30.0 },
    },
    ModelDescriptor {
        name: "gpt-3.5-turbo",
        provider: ProviderKind::OpenAi,
        tier: Tier::Cheap,
        capabilities: &[SimpleReasoning, Classification, Extraction],
        cost_tier: 2,
        default_timeout_ms: 90_000,
        max_context_tokens: 16_000,
        pricing: Pricing { input_per_million: 0.5, output_per_million: 1.5 },
    },
    ModelDescriptor {
        name: "gpt-5.3-codex",
        provider: ProviderKind::OpenAi,
        tier: Tier::Best,
        capabilities: &[Coding, Review],
        cost_tier: 4,
        default_timeout_ms: 240_000,
        max_context_tokens: 400_000,
        // Placeholder — override via configure_pricing.
        pricing: Pricing { input_per_million: 1.25, output_per_million: 10.0 },
    },
];

/// Look up one model's descriptor.
pub fn info(name: &str) -> Option<&'static ModelDescriptor> {
    MODELS.iter().find(|m| m.name == name)
}

/// All registered model names, in registry order.
pub fn all_names() -> Vec<&'static str> {
    MODELS.iter().map(|m| m.name).collect()
}

/// Model names at exactly the given tier, ordered by cost then name.
pub fn by_tier(tier: Tier) -> Vec<&'static str> {
    let mut hits: Vec<&'static ModelDescriptor> =
        MODELS.iter().filter(|m| m.tier == tier).collect();
    hits.sort_by_key(|m| (m.cost_tier, m.name));
    hits.into_iter().map(|m| m.name).collect()
}

/// Model names carrying the given capability tag.
pub fn by_capability(cap: Capability) -> Vec<&'static str> {
    MODELS
        .iter()
        .filter(|m| m.capabilities.contains(&cap))
        .map(|m| m.name)
        .collect()
}

/// Models whose context window fits at least `min_tokens`, optionally
/// restricted to `candidates`.
pub fn by_context_fit(min_tokens: u64, candidates: Option<&[&str]>) -> Vec<&'static str> {
    pool(candidates)
        .filter(|m| m.max_context_tokens >= min_tokens)
        .map(|m| m.name)
        .collect()
}

/// Lowest cost tier wins; ties broken alphabetically.
pub fn cheapest(candidates: Option<&[&str]>) -> Option<&'static str> {
    pool(candidates)
        .min_by_key(|m| (m.cost_tier, m.name))
        .map(|m| m.name)
}

/// Lowest default timeout wins; ties broken alphabetically.
pub fn fastest(candidates: Option<&[&str]>) -> Option<&'static str> {
    pool(candidates)
        .min_by_key(|m| (m.default_timeout_ms, m.name))
        .map(|m| m.name)
}

/// Highest tier wins; ties broken alphabetically.
pub fn best(candidates: Option<&[&str]>) -> Option<&'static str> {
    pool(candidates)
        .max_by(|a, b| a.tier.cmp(&b.tier).then(b.name.cmp(a.name)))
        .map(|m| m.name)
}

fn pool<'a>(
    candidates: Option<&'a [&'a str]>,
) -> impl Iterator<Item = &'static ModelDescriptor> + 'a {
    MODELS.iter().filter(move |m| match candidates {
        Some(c) => c.contains(&m.name),
        None => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_known_and_unknown() {
        let d = info("claude-sonnet-4-5").unwrap();
        assert_eq!(d.provider, ProviderKind::Anthropic);
        assert_eq!(d.tier, Tier::Balanced);
        assert!(info("gpt-9000").is_none());
    }

    #[test]
    fn static_selection_helpers() {
        assert_eq!(cheapest(None), Some("claude-haiku-4-5"));
        assert_eq!(fastest(None), Some("claude-haiku-4-5"));
        assert_eq!(best(None), Some("claude-opus-4-5"));
    }

    #[test]
    fn best_multimodal_is_gpt_4o() {
        let multimodal = by_capability(Capability::Multimodal);
        assert_eq!(multimodal, vec!["gpt-4o"]);
        assert_eq!(best(Some(multimodal.as_slice())), Some("gpt-4o"));
    }

    #[test]
    fn best_tie_breaks_alphabetically() {
        // Both best-tier entries; the lexicographically smaller name wins.
        let pool = ["gpt-5.3-codex", "claude-opus-4-5"];
        assert_eq!(best(Some(&pool[..])), Some("claude-opus-4-5"));
    }

    #[test]
    fn context_fit_filters() {
        let big = by_context_fit(150_000, None);
        assert!(big.contains(&"claude-opus-4-5"));
        assert!(!big.contains(&"gpt-4o"));
        assert!(by_context_fit(1_000_000, None).is_empty());
    }

    #[test]
    fn capability_pools() {
        let reasoning = by_capability(Capability::Reasoning);
        assert!(reasoning.contains(&"claude-opus-4-5"));
        assert!(reasoning.contains(&"claude-sonnet-4-5"));
        assert!(!reasoning.contains(&"gpt-3.5-turbo"));
    }

    #[test]
    fn cheapest_within_candidates() {
        let pool = ["gpt-4-turbo", "gpt-3.5-turbo"];
        assert_eq!(cheapest(Some(&pool[..])), Some("gpt-3.5-turbo"));
        let empty: &[&str] = &[];
        assert_eq!(cheapest(Some(empty)), None);
    }

    #[test]
    fn tier_listing_ordered_by_cost() {
        let cheap = by_tier(Tier::Cheap);
        assert_eq!(cheap, vec!["claude-haiku-4-5", "gpt-3.5-turbo"]);
    }
}
