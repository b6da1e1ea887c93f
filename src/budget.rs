//! Budget Optimizer
//!
//! Selects and orders items from every layer under a global token ceiling and optional
//! per-layer ceilings.
//!
//! # Algorithm
//!
//! 1. Visit layers in priority order: Static, Ephemeral, Dynamic, SemiStatic.
//! 2. A layer may spend `min(per-layer budget, remaining global budget)`.
//! 3. Within a layer, items are ranked by relevance (absent = 0), stable on input order,
//!    and accepted greedily while they fit. An item that does not fit is dropped whole.
//! 4. Accepted tokens are subtracted from the shared remaining budget. Per-layer
//!    allowance never carries over, but whatever a layer leaves unspent stays in the
//!    shared pool for later layers.
//! 5. Output is layer priority order, then ranked order within each layer.
//!
//! The Ephemeral layer is the live user turn and is always included in full. If it pushes
//! the assembly past the global budget, the selection records a budget-exceeded warning
//! instead of dropping it. Overrunning only its own per-layer cap is not a warning.
//!
//! Selection is a pure function of its inputs: identical inputs give identical output.

use crate::error::ConfigError;
use crate::token::TokenCounter;
use crate::types::{ContextItem, Layer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Validated token budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudget {
    global: usize,
    per_layer: BTreeMap<Layer, usize>,
}

impl TokenBudget {
    /// Build a budget from signed values, as they arrive from configuration.
    ///
    /// Fails if any budget is negative, or if the global budget cannot cover the
    /// Static and Ephemeral per-layer budgets.
    pub fn new(global: i64, per_layer: &BTreeMap<Layer, i64>) -> Result<Self, ConfigError> {
        if global < 0 {
            return Err(ConfigError::InvalidConfiguration(format!(
                "global budget must not be negative (got {})",
                global
            )));
        }
        let mut validated = BTreeMap::new();
        for (&layer, &budget) in per_layer {
            if budget < 0 {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "{} layer budget must not be negative (got {})",
                    layer, budget
                )));
            }
            validated.insert(layer, budget as usize);
        }

        let budget = Self {
            global: global as usize,
            per_layer: validated,
        };
        let minimum = budget.reserved_minimum();
        if budget.global < minimum {
            return Err(ConfigError::InvalidConfiguration(format!(
                "global budget {} is smaller than the {} tokens reserved for the static and ephemeral layers",
                budget.global, minimum
            )));
        }
        Ok(budget)
    }

    /// Global budget only, no per-layer caps
    pub fn global(global: usize) -> Self {
        Self {
            global,
            per_layer: BTreeMap::new(),
        }
    }

    pub fn global_limit(&self) -> usize {
        self.global
    }

    /// Per-layer cap, if configured
    pub fn layer_limit(&self, layer: Layer) -> Option<usize> {
        self.per_layer.get(&layer).copied()
    }

    /// Tokens guaranteed to Static plus Ephemeral
    pub fn reserved_minimum(&self) -> usize {
        self.layer_limit(Layer::Static).unwrap_or(0)
            + self.layer_limit(Layer::Ephemeral).unwrap_or(0)
    }
}

/// Outcome of selecting one layer
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LayerSelection {
    /// Budget the layer was allowed to spend
    pub available: usize,
    pub accepted_tokens: usize,
    pub accepted_items: usize,
    pub dropped_items: usize,
    pub dropped_tokens: usize,
}

/// Ephemeral content forced the assembly past the global budget.
///
/// `available` is the global budget left when Ephemeral was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BudgetExceeded {
    pub required: usize,
    pub available: usize,
}

impl fmt::Display for BudgetExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ephemeral input needs {} tokens but only {} were available",
            self.required, self.available
        )
    }
}

/// Items chosen across all layers
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub items: Vec<ContextItem>,
    pub total_tokens: usize,
    pub per_layer: BTreeMap<Layer, LayerSelection>,
    pub budget_exceeded: Option<BudgetExceeded>,
    /// Layers where the token estimator failed and the fallback estimate was used
    pub estimator_fallbacks: Vec<Layer>,
}

/// Select items from `layers` under `budget`.
///
/// `layers` may list layers in any order; missing layers count as empty.
pub fn select(
    layers: &[(Layer, &[ContextItem])],
    budget: &TokenBudget,
    counter: &TokenCounter,
) -> Selection {
    let mut selection = Selection::default();
    let mut remaining = budget.global_limit();

    for layer in Layer::PRIORITY {
        let items: &[ContextItem] = layers
            .iter()
            .find(|(l, _)| *l == layer)
            .map(|(_, items)| *items)
            .unwrap_or(&[]);

        let available = match budget.layer_limit(layer) {
            Some(limit) => limit.min(remaining),
            None => remaining,
        };

        let mut sized = Vec::with_capacity(items.len());
        let mut fell_back = false;
        for item in items {
            let estimate = counter.count_item(item);
            fell_back |= estimate.fell_back;
            sized.push((item, estimate.tokens));
        }
        if fell_back {
            selection.estimator_fallbacks.push(layer);
        }

        let mut layer_selection = LayerSelection {
            available,
            ..LayerSelection::default()
        };

        if layer == Layer::Ephemeral {
            let required: usize = sized.iter().map(|(_, tokens)| tokens).sum();
            if required > remaining {
                selection.budget_exceeded = Some(BudgetExceeded {
                    required,
                    available: remaining,
                });
            }
            for (item, _) in &sized {
                selection.items.push((*item).clone());
            }
            layer_selection.accepted_items = sized.len();
            layer_selection.accepted_tokens = required;
        } else {
            // Stable sort keeps input order among equal scores
            sized.sort_by(|(a, _), (b, _)| b.rank_score().total_cmp(&a.rank_score()));
            for (item, tokens) in sized {
                if layer_selection.accepted_tokens + tokens <= available {
                    layer_selection.accepted_tokens += tokens;
                    layer_selection.accepted_items += 1;
                    selection.items.push(item.clone());
                } else {
                    layer_selection.dropped_items += 1;
                    layer_selection.dropped_tokens += tokens;
                }
            }
        }

        remaining = remaining.saturating_sub(layer_selection.accepted_tokens);
        selection.total_tokens += layer_selection.accepted_tokens;
        selection.per_layer.insert(layer, layer_selection);
    }

    selection
}
