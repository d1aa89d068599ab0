mod common;

use common::{scalar, tag};
use crdbl_core::{Filter, Operation, OperationLog, Projection, ReplicaContext, Tag, VectorClock};
use proptest::prelude::*;

const TAGS: [Tag; 3] = [Tag::UNTAGGED, Tag([1, 0, 0, 0]), Tag([2, 0, 0, 0])];

// Node creations carry no dependencies, so every filter, including inverted
// and start-bounded ones, selects a replayable subset.
fn arb_log() -> impl Strategy<Value = Vec<Operation>> {
    prop::collection::vec((1u32..=3, 0usize..TAGS.len()), 0..40).prop_map(|picks| {
        let mut next = [1u32; 4];
        picks
            .into_iter()
            .map(|(site, t)| {
                let seq = next[site as usize];
                next[site as usize] += 1;
                scalar(TAGS[t], site, seq)
            })
            .collect()
    })
}

fn arb_clock() -> impl Strategy<Value = VectorClock> {
    prop::collection::btree_map(1u32..=3, 1u32..16, 0..3).prop_map(VectorClock::from_pairs)
}

fn arb_filter() -> impl Strategy<Value = Filter> {
    (
        prop::collection::vec(
            (
                0usize..TAGS.len(),
                prop::option::of(arb_clock()),
                prop::option::of(arb_clock()),
            ),
            0..3,
        ),
        prop::collection::btree_set(1u32..=3, 0..3),
        any::<bool>(),
        any::<bool>(),
        prop::option::of((prop::option::of(arb_clock()), arb_clock())),
    )
        .prop_map(|(ranges, sites, site_invert, invert, clock)| {
            let mut filter = Filter::new();
            if let Some((start, end)) = clock {
                filter = match filter.clone().with_clock_range(start, Some(end.clone())) {
                    Ok(next) => next,
                    Err(_) => filter
                        .with_clock_range(None, Some(end))
                        .expect("end-only range is always valid"),
                };
            }
            for (t, start, end) in ranges {
                filter = match filter.clone().with_tag_range(TAGS[t], start, end.clone()) {
                    Ok(next) => next,
                    Err(_) => filter
                        .with_tag_range(TAGS[t], None, end)
                        .expect("end-only range is always valid"),
                };
            }
            for site in sites {
                filter = filter.with_site_filter(site);
            }
            filter.with_site_invert(site_invert).with_invert(invert)
        })
}

fn materialize(log: &OperationLog, filter: &Filter) -> ReplicaContext<Projection> {
    ReplicaContext::materialize(log.clone(), Projection::new(), filter)
        .expect("independent operations always replay")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn round_trip_restores_view(ops in arb_log(), f0 in arb_filter(), f1 in arb_filter()) {
        let log: OperationLog = ops.into_iter().collect();
        let mut ctx = materialize(&log, &f0);
        let view = ctx.engine().snapshot();
        let clock = ctx.materialized_clock().clone();

        ctx.transition(&f1).expect("f0 -> f1");
        ctx.transition(&f0).expect("f1 -> f0");

        prop_assert_eq!(ctx.engine().snapshot(), view);
        prop_assert_eq!(ctx.materialized_clock(), &clock);
    }

    #[test]
    fn transition_matches_direct_materialization(
        ops in arb_log(),
        f0 in arb_filter(),
        f1 in arb_filter(),
    ) {
        let log: OperationLog = ops.into_iter().collect();
        let mut ctx = materialize(&log, &f0);
        ctx.transition(&f1).expect("f0 -> f1");
        let direct = materialize(&log, &f1);

        prop_assert_eq!(ctx.engine().snapshot(), direct.engine().snapshot());
        prop_assert_eq!(ctx.materialized_clock(), direct.materialized_clock());
    }

    #[test]
    fn materialized_clock_is_clock_of_admitted_ops(ops in arb_log(), filter in arb_filter()) {
        let log: OperationLog = ops.into_iter().collect();
        let ctx = materialize(&log, &filter);
        let expected: VectorClock = log
            .forward()
            .filter(|op| filter.matches(op))
            .map(|op| op.ts)
            .collect();

        prop_assert_eq!(ctx.materialized_clock(), &expected);
        prop_assert_eq!(ctx.engine().applied_len(), log.iter_matching(&filter).count());
    }

    #[test]
    fn repeated_transition_is_noop(ops in arb_log(), filter in arb_filter()) {
        let log: OperationLog = ops.into_iter().collect();
        let mut ctx = materialize(&log, &filter);
        let report = ctx.transition(&filter).expect("no-op");
        prop_assert_eq!(report.applied + report.unapplied, 0);
    }

    #[test]
    fn inverted_filter_complements(ops in arb_log(), filter in arb_filter()) {
        let log: OperationLog = ops.into_iter().collect();
        let inverse = filter.clone().inverted();
        for op in &log {
            prop_assert_ne!(filter.matches(op), inverse.matches(op));
        }
        prop_assert!(!Filter::nothing().matches(&scalar(tag(1), 1, 1)));
    }
}
