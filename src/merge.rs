//! Reduce many stats records to one.

use std::collections::HashSet;
use std::num::NonZeroU64;

use rand::RngCore;
use tracing::debug;

use crate::job::{MergePolicy, StatsRecord};

/// Options for [`merge_all`].
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Modules to include. Empty includes every module.
    pub select_module: HashSet<String>,
    /// Merge each module separately and prefix its metrics with the module
    /// name before merging the per-module results.
    pub group_by_module: bool,
    pub merge_by: MergePolicy,
    /// Applied once, to the final merged record.
    pub divide_by: NonZeroU64,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            select_module: HashSet::new(),
            group_by_module: false,
            merge_by: MergePolicy::default(),
            divide_by: NonZeroU64::MIN,
        }
    }
}

/// Pairwise merge of `records`, left to right.
///
/// Returns `None` when nothing is left after module selection.
pub fn merge_all(
    mut records: Vec<StatsRecord>,
    opts: &MergeOptions,
    rng: &mut dyn RngCore,
) -> Option<StatsRecord> {
    if !opts.select_module.is_empty() {
        records.retain(|r| opts.select_module.contains(&r.identity.module));
    }

    if opts.group_by_module {
        records = merge_per_module(records, opts.merge_by, rng);
    }

    debug!(
        "Merging {} records by {}, dividing by {}",
        records.len(),
        opts.merge_by,
        opts.divide_by
    );
    let merged = fold(records, opts.merge_by, rng)?;
    Some(merged.divided_by(opts.divide_by, rng))
}

fn fold(
    records: Vec<StatsRecord>,
    policy: MergePolicy,
    rng: &mut dyn RngCore,
) -> Option<StatsRecord> {
    records
        .into_iter()
        .reduce(|acc, r| acc.merged_with(&r, policy, rng))
}

/// One record per module, metrics prefixed with the module name, in module order.
fn merge_per_module(
    mut records: Vec<StatsRecord>,
    policy: MergePolicy,
    rng: &mut dyn RngCore,
) -> Vec<StatsRecord> {
    // Stable, so records of one module keep their relative order.
    records.sort_by(|a, b| a.identity.module.cmp(&b.identity.module));

    let mut merged = Vec::new();
    for group in records.chunk_by(|a, b| a.identity.module == b.identity.module) {
        let module = group[0].identity.module.clone();
        if let Some(record) = fold(group.to_vec(), policy, rng) {
            merged.push(record.prefixed_by(&module, rng));
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::tests::record;
    use crate::job::{JobKind, MetricValue, MERGED};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rec(module: &str, start: u64, metrics: &[(&str, i64)]) -> StatsRecord {
        let metrics: Vec<_> = metrics
            .iter()
            .map(|(k, v)| (*k, MetricValue::Int(*v)))
            .collect();
        record(JobKind::Frontend, module, start, 10, &metrics)
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    fn divisor(n: u64) -> NonZeroU64 {
        NonZeroU64::new(n).unwrap()
    }

    #[test]
    fn test_empty_input_is_none() {
        assert!(merge_all(Vec::new(), &MergeOptions::default(), &mut rng()).is_none());
    }

    #[test]
    fn test_empty_after_selection_is_none() {
        let opts = MergeOptions {
            select_module: HashSet::from(["Missing".to_string()]),
            ..MergeOptions::default()
        };
        let records = vec![rec("A", 0, &[("x", 1)])];
        assert!(merge_all(records, &opts, &mut rng()).is_none());
    }

    #[test]
    fn test_single_record() {
        let records = vec![rec("A", 5, &[("x", 3)])];
        let merged = merge_all(records, &MergeOptions::default(), &mut rng()).unwrap();
        assert_eq!(merged.metrics["x"], MetricValue::Int(3));
        assert_eq!(merged.start_micros, 5);
        assert_eq!(merged.identity.module, "A");
    }

    #[test]
    fn test_merge_sum_across_modules() {
        let records = vec![
            rec("A", 0, &[("x", 1), ("y", 2)]),
            rec("B", 20, &[("x", 10)]),
            rec("A", 5, &[("y", 4)]),
        ];
        let merged = merge_all(records, &MergeOptions::default(), &mut rng()).unwrap();
        assert_eq!(merged.metrics["x"], MetricValue::Int(11));
        assert_eq!(merged.metrics["y"], MetricValue::Int(6));
        assert_eq!(merged.identity.module, MERGED);
        assert_eq!(merged.start_micros, 0);
        assert_eq!(merged.duration_micros, 30);
        assert_eq!(merged.identity.args.len(), 3);
    }

    #[test]
    fn test_select_module() {
        let opts = MergeOptions {
            select_module: HashSet::from(["A".to_string()]),
            merge_by: MergePolicy::Max,
            ..MergeOptions::default()
        };
        let records = vec![
            rec("A", 0, &[("x", 1)]),
            rec("B", 0, &[("x", 100)]),
            rec("A", 0, &[("x", 7)]),
        ];
        let merged = merge_all(records, &opts, &mut rng()).unwrap();
        assert_eq!(merged.metrics["x"], MetricValue::Int(7));
        assert_eq!(merged.identity.module, "A");
    }

    #[test]
    fn test_group_by_module_prefixes_metrics() {
        let opts = MergeOptions {
            group_by_module: true,
            ..MergeOptions::default()
        };
        let records = vec![
            rec("B", 0, &[("x", 10)]),
            rec("A", 0, &[("x", 1), ("y", 2)]),
            rec("A", 0, &[("x", 3)]),
        ];
        let merged = merge_all(records, &opts, &mut rng()).unwrap();
        let keys: Vec<_> = merged.metrics.keys().cloned().collect();
        assert_eq!(keys, vec!["A.x", "A.y", "B.x"]);
        assert_eq!(merged.metrics["A.x"], MetricValue::Int(4));
        assert_eq!(merged.metrics["A.y"], MetricValue::Int(2));
        assert_eq!(merged.metrics["B.x"], MetricValue::Int(10));
    }

    #[test]
    fn test_divide_applies_once_to_final_result() {
        let records = vec![
            rec("A", 0, &[("x", 3)]),
            rec("A", 0, &[("x", 3)]),
            rec("B", 0, &[("x", 2)]),
            rec("B", 0, &[("x", 2)]),
        ];

        // Dividing every input first would give 0 + 0 + 0 + 0.
        let opts = MergeOptions {
            divide_by: divisor(4),
            ..MergeOptions::default()
        };
        let merged = merge_all(records.clone(), &opts, &mut rng()).unwrap();
        assert_eq!(merged.metrics["x"], MetricValue::Int(2));

        // Dividing each module group as well would give 6/4/4 = 0 and 4/4/4 = 0.
        let opts = MergeOptions {
            group_by_module: true,
            divide_by: divisor(4),
            ..MergeOptions::default()
        };
        let merged = merge_all(records, &opts, &mut rng()).unwrap();
        assert_eq!(merged.metrics["A.x"], MetricValue::Int(1));
        assert_eq!(merged.metrics["B.x"], MetricValue::Int(1));
    }

    #[test]
    fn test_nonzero_min_across_records() {
        let opts = MergeOptions {
            merge_by: MergePolicy::Min,
            ..MergeOptions::default()
        };
        let records = vec![
            rec("A", 0, &[("x", 0), ("y", 0)]),
            rec("A", 0, &[("x", 5), ("y", 0)]),
            rec("A", 0, &[("x", 3)]),
        ];
        let merged = merge_all(records, &opts, &mut rng()).unwrap();
        assert_eq!(merged.metrics["x"], MetricValue::Int(3));
        assert_eq!(merged.metrics["y"], MetricValue::Int(0));
    }

    #[test]
    fn test_deterministic_with_seeded_rng() {
        let records = vec![rec("A", 0, &[("x", 1)]), rec("B", 0, &[("x", 2)])];
        let opts = MergeOptions {
            group_by_module: true,
            ..MergeOptions::default()
        };
        let first = merge_all(records.clone(), &opts, &mut rng()).unwrap();
        let second = merge_all(records, &opts, &mut rng()).unwrap();
        assert_eq!(first, second);
    }
}
