use serde::{Deserialize, Serialize};

use crate::bucketing::hashing::MAX_TRAFFIC_VALUE;
use crate::settings::settings_models::{Campaign, Variation};

/// Inclusive bucket range `[start, end]` inside `[1, 10000]`, or `[-1, -1]` when unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketRange {
    pub start: i32,
    pub end: i32,
}

impl BucketRange {
    pub const UNREACHABLE: BucketRange = BucketRange { start: -1, end: -1 };

    pub fn is_unreachable(&self) -> bool {
        self.start < 1 || self.end < self.start
    }

    pub fn contains(&self, bucket: u32) -> bool {
        if self.is_unreachable() {
            return false;
        }
        let bucket = i64::from(bucket);
        bucket >= i64::from(self.start) && bucket <= i64::from(self.end)
    }
}

impl Default for BucketRange {
    fn default() -> Self {
        BucketRange::UNREACHABLE
    }
}

/// Width of the bucket block a weight occupies: `ceil(weight * 100)` clamped to 10000.
fn range_width(weight: f64) -> i32 {
    if !weight.is_finite() || weight <= 0.0 {
        return 0;
    }
    let width = (weight * 100.0).ceil().min(f64::from(MAX_TRAFFIC_VALUE));
    width as i32
}

/// Range of a single-variation (rollout/personalize) campaign: `[1, floor(weight * 100)]`.
pub fn rollout_range(weight: f64) -> BucketRange {
    if !weight.is_finite() || weight <= 0.0 {
        return BucketRange::UNREACHABLE;
    }
    let end = (weight * 100.0).floor().min(f64::from(MAX_TRAFFIC_VALUE)) as i32;
    if end < 1 {
        return BucketRange::UNREACHABLE;
    }
    BucketRange { start: 1, end }
}

/// Contiguous ranges for weights taken in declared order, accumulating from 1.
///
/// Zero weights get [`BucketRange::UNREACHABLE`] and take no width. Ranges never
/// extend past 10000; anything pushed beyond it becomes unreachable.
pub fn allocate_ranges(weights: &[f64]) -> Vec<BucketRange> {
    let max = i32::try_from(MAX_TRAFFIC_VALUE).unwrap_or(i32::MAX);
    let mut allocated = 0;
    weights
        .iter()
        .map(|&weight| {
            let width = range_width(weight);
            if width == 0 || allocated >= max {
                return BucketRange::UNREACHABLE;
            }
            let range = BucketRange {
                start: allocated + 1,
                end: (allocated + width).min(max),
            };
            allocated += width;
            range
        })
        .collect()
}

/// Rescales weights so they sum to 100; all-zero weights are split equally.
pub fn scale_weights(weights: &[f64]) -> Vec<f64> {
    if weights.is_empty() {
        return Vec::new();
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        let equal = 100.0 / weights.len() as f64;
        return vec![equal; weights.len()];
    }
    weights.iter().map(|w| (w / total) * 100.0).collect()
}

/// Splits 100 equally across `count` entries, rounded to 4 decimals.
pub fn equal_weights(count: usize) -> Vec<f64> {
    if count == 0 {
        return Vec::new();
    }
    let weight = ((100.0 / count as f64) * 10_000.0).round() / 10_000.0;
    vec![weight; count]
}

/// Index of the range containing `bucket`.
pub fn find_range(ranges: &[BucketRange], bucket: u32) -> Option<usize> {
    ranges.iter().position(|range| range.contains(bucket))
}

/// Assigns bucket ranges to every variation of `campaign`.
pub fn allocate_campaign(campaign: &mut Campaign) {
    if campaign.campaign_type.is_single_variation() {
        for variation in campaign.variations.iter_mut() {
            variation.range = rollout_range(variation.weight);
        }
        return;
    }

    let weights: Vec<f64> = campaign.variations.iter().map(|v| v.weight).collect();
    for (variation, range) in campaign
        .variations
        .iter_mut()
        .zip(allocate_ranges(&weights))
    {
        variation.range = range;
    }
}

/// The variation whose range contains `bucket`.
pub fn variation_for_bucket(variations: &[Variation], bucket: u32) -> Option<&Variation> {
    variations.iter().find(|v| v.range.contains(bucket))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::{ab_campaign, rollout_campaign};

    fn assert_partitioned(ranges: &[BucketRange]) {
        let reachable: Vec<&BucketRange> = ranges.iter().filter(|r| !r.is_unreachable()).collect();
        for range in &reachable {
            assert!(range.start >= 1 && range.end <= 10_000, "{:?} out of bounds", range);
            assert!(range.start <= range.end);
        }
        for pair in reachable.windows(2) {
            assert!(pair[0].end < pair[1].start, "{:?} overlaps {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_rollout_range() {
        assert_eq!(rollout_range(50.0), BucketRange { start: 1, end: 5000 });
        assert_eq!(rollout_range(100.0), BucketRange { start: 1, end: 10_000 });
        assert_eq!(rollout_range(33.335), BucketRange { start: 1, end: 3333 });
        assert_eq!(rollout_range(0.0), BucketRange::UNREACHABLE);
        assert_eq!(rollout_range(-5.0), BucketRange::UNREACHABLE);
    }

    #[test]
    fn test_allocate_ranges_accumulates_in_order() {
        let ranges = allocate_ranges(&[50.0, 50.0]);
        assert_eq!(ranges[0], BucketRange { start: 1, end: 5000 });
        assert_eq!(ranges[1], BucketRange { start: 5001, end: 10_000 });
    }

    #[test]
    fn test_allocate_ranges_skips_zero_weights() {
        let ranges = allocate_ranges(&[0.0, 25.0, 0.0, 75.0]);
        assert_eq!(ranges[0], BucketRange::UNREACHABLE);
        assert_eq!(ranges[1], BucketRange { start: 1, end: 2500 });
        assert_eq!(ranges[2], BucketRange::UNREACHABLE);
        assert_eq!(ranges[3], BucketRange { start: 2501, end: 10_000 });
    }

    #[test]
    fn test_allocate_ranges_rounds_widths_up() {
        let ranges = allocate_ranges(&equal_weights(3));
        assert_eq!(ranges[0], BucketRange { start: 1, end: 3334 });
        assert_eq!(ranges[1], BucketRange { start: 3335, end: 6668 });
        assert_eq!(ranges[2], BucketRange { start: 6669, end: 10_000 });
        assert_partitioned(&ranges);
    }

    #[test]
    fn test_allocate_ranges_never_exceeds_bucket_space() {
        let ranges = allocate_ranges(&[80.0, 80.0, 10.0]);
        assert_eq!(ranges[0], BucketRange { start: 1, end: 8000 });
        assert_eq!(ranges[1], BucketRange { start: 8001, end: 10_000 });
        assert_eq!(ranges[2], BucketRange::UNREACHABLE);
        assert_partitioned(&ranges);
    }

    #[test]
    fn test_partition_invariant_for_many_weightings() {
        let weightings: Vec<Vec<f64>> = vec![
            vec![10.0, 20.0, 30.0, 40.0],
            vec![33.33, 33.33, 33.34],
            vec![0.01, 99.99],
            vec![1.0; 100],
            vec![12.5, 0.0, 12.5, 75.0],
        ];
        for weights in weightings {
            assert_partitioned(&allocate_ranges(&weights));
        }
    }

    #[test]
    fn test_scale_weights() {
        assert_eq!(scale_weights(&[20.0, 30.0]), vec![40.0, 60.0]);
        assert_eq!(scale_weights(&[0.0, 0.0, 0.0, 0.0]), vec![25.0; 4]);
        assert_eq!(scale_weights(&[50.0, 50.0]), vec![50.0, 50.0]);
        assert!(scale_weights(&[]).is_empty());
    }

    #[test]
    fn test_equal_weights_rounds_to_four_decimals() {
        assert_eq!(equal_weights(3), vec![33.3333; 3]);
        assert_eq!(equal_weights(2), vec![50.0; 2]);
        assert!(equal_weights(0).is_empty());
    }

    #[test]
    fn test_find_range() {
        let ranges = allocate_ranges(&[50.0, 50.0]);
        assert_eq!(find_range(&ranges, 1), Some(0));
        assert_eq!(find_range(&ranges, 5000), Some(0));
        assert_eq!(find_range(&ranges, 5001), Some(1));
        assert_eq!(find_range(&ranges, 0), None);
        assert_eq!(find_range(&ranges, 10_001), None);
    }

    #[test]
    fn test_allocate_rollout_campaign() {
        let mut campaign = rollout_campaign(1, "rollout", 50.0);
        allocate_campaign(&mut campaign);
        assert_eq!(campaign.variations[0].range, BucketRange { start: 1, end: 5000 });
    }

    #[test]
    fn test_allocate_ab_campaign() {
        let mut campaign = ab_campaign(2, "ab", 100.0, &[(1, 50.0), (2, 0.0), (3, 50.0)]);
        allocate_campaign(&mut campaign);
        assert_eq!(campaign.variations[0].range, BucketRange { start: 1, end: 5000 });
        assert_eq!(campaign.variations[1].range, BucketRange::UNREACHABLE);
        assert_eq!(campaign.variations[2].range, BucketRange { start: 5001, end: 10_000 });
        assert_eq!(variation_for_bucket(&campaign.variations, 7000).map(|v| v.id), Some(3));
        assert!(variation_for_bucket(&campaign.variations, 0).is_none());
    }
}
