//! Property tests for the budget optimizer

use proptest::prelude::*;
use std::collections::BTreeMap;
use strata::budget::{select, TokenBudget};
use strata::token::TokenCounter;
use strata::{ContextItem, Layer};

fn build_items(layer: Layer, shapes: &[(usize, Option<f32>)]) -> Vec<ContextItem> {
    shapes
        .iter()
        .enumerate()
        .map(|(i, &(tokens, score))| {
            let item = super::test_utils::sized_item(layer, tokens, &format!("{}", i));
            match score {
                Some(score) => item.with_relevance(score),
                None => item,
            }
        })
        .collect()
}

fn layer_shapes() -> impl Strategy<Value = Vec<(usize, Option<f32>)>> {
    prop::collection::vec((1usize..60, prop::option::of(0.0f32..=1.0)), 0..8)
}

#[test]
fn test_budget_law_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(
                [layer_shapes(), layer_shapes(), layer_shapes(), layer_shapes()],
                [
                    prop::option::of(0i64..150),
                    prop::option::of(0i64..150),
                    prop::option::of(0i64..150),
                    prop::option::of(0i64..150),
                ],
                0i64..300,
            ),
            |(shapes, limits, extra)| {
                let items: Vec<(Layer, Vec<ContextItem>)> = Layer::ALL
                    .iter()
                    .zip(shapes.iter())
                    .map(|(&layer, spec)| (layer, build_items(layer, spec)))
                    .collect();
                let per_layer: BTreeMap<Layer, i64> = Layer::ALL
                    .iter()
                    .zip(limits.iter())
                    .filter_map(|(&layer, limit)| limit.map(|limit| (layer, limit)))
                    .collect();
                let reserved = per_layer.get(&Layer::Static).copied().unwrap_or(0)
                    + per_layer.get(&Layer::Ephemeral).copied().unwrap_or(0);
                let budget = TokenBudget::new(reserved + extra, &per_layer).unwrap();
                let global = budget.global_limit();

                let layers: Vec<(Layer, &[ContextItem])> = items
                    .iter()
                    .map(|(layer, items)| (*layer, &items[..]))
                    .collect();
                let counter = TokenCounter::default();
                let selection = select(&layers, &budget, &counter);

                let ephemeral = selection.per_layer[&Layer::Ephemeral].accepted_tokens;
                prop_assert!(selection.total_tokens - ephemeral <= global);
                prop_assert_eq!(
                    selection.total_tokens > global,
                    selection.budget_exceeded.is_some()
                );

                for layer in [Layer::Static, Layer::Dynamic, Layer::SemiStatic] {
                    let stats = &selection.per_layer[&layer];
                    prop_assert!(stats.accepted_tokens <= stats.available);
                    if let Some(limit) = budget.layer_limit(layer) {
                        prop_assert!(stats.accepted_tokens <= limit);
                    }
                }

                // Ephemeral is never trimmed
                let ephemeral_in = items
                    .iter()
                    .find(|(layer, _)| *layer == Layer::Ephemeral)
                    .map(|(_, items)| items.len())
                    .unwrap_or(0);
                prop_assert_eq!(
                    selection
                        .items
                        .iter()
                        .filter(|item| item.origin_layer() == Layer::Ephemeral)
                        .count(),
                    ephemeral_in
                );

                // Pure function of inputs
                let again = select(&layers, &budget, &counter);
                prop_assert_eq!(again.items, selection.items);

                Ok(())
            },
        )
        .unwrap();
}
