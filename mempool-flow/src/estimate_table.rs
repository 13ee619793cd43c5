use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::FlowError;

/// Fee rate estimates keyed by target (minutes or blocks) and confidence.
///
/// Targets iterate in ascending order and, within a target, confidences
/// iterate in ascending order. A value of `None` means no fee rate in range
/// clears the simulated bucket: the estimate is undefined.
///
/// Serialized as `{"<target>": {"<confidence>": fee_rate | null}}`.
///
/// # Example
/// ```
/// use mempool_flow::EstimateTable;
///
/// let mut table = EstimateTable::new();
/// table.insert(30, 0.5, Some(12));
/// table.insert(60, 0.5, None);
///
/// assert_eq!(table.get_fee_rate(30, 0.5), Some(12));
/// assert_eq!(table.get_fee_rate(60, 0.5), None);
/// assert!(table.contains(60, 0.5));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "BTreeMap<String, BTreeMap<String, Option<u64>>>")]
pub struct EstimateTable {
    targets: BTreeMap<u32, BTreeMap<OrderedFloat, Option<u64>>>,
}

impl EstimateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every `(target, confidence)` pair present and undefined.
    pub fn undefined(targets: &[u32], confidences: &[f64]) -> Self {
        let mut table = Self::new();
        for &target in targets {
            for &confidence in confidences {
                table.insert(target, confidence, None);
            }
        }
        table
    }

    /// Records the estimate for a target and confidence, replacing any previous one.
    pub fn insert(&mut self, target: u32, confidence: f64, fee_rate: Option<u64>) {
        self.targets
            .entry(target)
            .or_default()
            .insert(OrderedFloat(confidence), fee_rate);
    }

    /// Returns the fee rate for a target and confidence, or `None` if it is
    /// missing or undefined.
    pub fn get_fee_rate(&self, target: u32, confidence: f64) -> Option<u64> {
        self.get(target, confidence).flatten()
    }

    /// Returns the stored entry, distinguishing missing (`None`) from undefined (`Some(None)`).
    pub fn get(&self, target: u32, confidence: f64) -> Option<Option<u64>> {
        self.targets
            .get(&target)
            .and_then(|row| row.get(&OrderedFloat(confidence)))
            .copied()
    }

    pub fn contains(&self, target: u32, confidence: f64) -> bool {
        self.get(target, confidence).is_some()
    }

    /// All targets in ascending order.
    pub fn targets(&self) -> Vec<u32> {
        self.targets.keys().copied().collect()
    }

    /// All confidence levels present in any row, ascending.
    pub fn confidences(&self) -> Vec<f64> {
        let mut levels: Vec<OrderedFloat> = self
            .targets
            .values()
            .flat_map(|row| row.keys().copied())
            .collect();
        levels.sort();
        levels.dedup();
        levels.into_iter().map(|c| c.0).collect()
    }

    /// Fee rates of one confidence level across targets, in ascending target order.
    pub fn column(&self, confidence: f64) -> Vec<(u32, Option<u64>)> {
        self.targets
            .iter()
            .filter_map(|(&target, row)| {
                row.get(&OrderedFloat(confidence))
                    .map(|&fee_rate| (target, fee_rate))
            })
            .collect()
    }

    /// Clamps every estimate to the running minimum of the estimates for
    /// shorter targets at the same confidence, so a longer target never asks
    /// for a higher fee rate. Undefined estimates count as infinitely high.
    pub fn apply_decreasing_correction(&mut self) {
        for confidence in self.confidences() {
            let key = OrderedFloat(confidence);
            let mut running_min: Option<u64> = None;

            for row in self.targets.values_mut() {
                let Some(value) = row.get_mut(&key) else {
                    continue;
                };
                running_min = match (running_min, *value) {
                    (Some(min), Some(rate)) => Some(min.min(rate)),
                    (Some(min), None) => Some(min),
                    (None, rate) => rate,
                };
                *value = running_min;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl Serialize for EstimateTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct Row<'a>(&'a BTreeMap<OrderedFloat, Option<u64>>);

        impl Serialize for Row<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(self.0.len()))?;
                for (confidence, fee_rate) in self.0 {
                    map.serialize_entry(&confidence.0.to_string(), fee_rate)?;
                }
                map.end()
            }
        }

        let mut map = serializer.serialize_map(Some(self.targets.len()))?;
        for (target, row) in &self.targets {
            map.serialize_entry(&target.to_string(), &Row(row))?;
        }
        map.end()
    }
}

impl TryFrom<BTreeMap<String, BTreeMap<String, Option<u64>>>> for EstimateTable {
    type Error = FlowError;

    fn try_from(raw: BTreeMap<String, BTreeMap<String, Option<u64>>>) -> Result<Self, Self::Error> {
        let mut table = EstimateTable::new();
        for (target, row) in raw {
            let target: u32 = target
                .parse()
                .map_err(|_| FlowError::invalid_parameter(format!("invalid target '{target}'")))?;
            for (confidence, fee_rate) in row {
                let confidence: f64 = confidence.parse().map_err(|_| {
                    FlowError::invalid_parameter(format!("invalid confidence '{confidence}'"))
                })?;
                table.insert(target, confidence, fee_rate);
            }
        }
        Ok(table)
    }
}

impl fmt::Display for EstimateTable {
    /// Formats the table with targets as rows and confidence levels as columns.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.targets.is_empty() {
            return Ok(());
        }

        let confidences = self.confidences();

        write!(f, "{:10}", "Target")?;
        for confidence in &confidences {
            write!(f, "\t{:10}", format!("{:.1}%", confidence * 100.0))?;
        }
        writeln!(f)?;

        for &target in self.targets.keys() {
            write!(f, "{:10}", target)?;
            for &confidence in &confidences {
                match self.get_fee_rate(target, confidence) {
                    Some(fee_rate) => write!(f, "\t{:10}", fee_rate)?,
                    None => write!(f, "\t{:10}", "-")?,
                }
            }
            writeln!(f)?;
        }

        Ok(())
    }
}

/// Complete result of one estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeEstimates {
    /// Window in minutes → confidence → fee rate.
    pub by_minute: EstimateTable,

    /// Confirmation count → confidence → fee rate. Reserved: every entry is undefined.
    pub by_block: EstimateTable,
}

/// A wrapper around f64 that implements Ord for use in BTreeMap.
/// This is safe for our use case as we only use valid probability values (0.0 to 1.0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderedFloat(pub f64);

impl Eq for OrderedFloat {}

impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_versus_undefined() {
        let mut table = EstimateTable::new();
        table.insert(30, 0.5, None);

        assert_eq!(table.get(30, 0.5), Some(None));
        assert_eq!(table.get(30, 0.9), None);
        assert_eq!(table.get_fee_rate(30, 0.5), None);
    }

    #[test]
    fn test_decreasing_correction() {
        let mut table = EstimateTable::new();
        table.insert(30, 0.5, Some(5));
        table.insert(60, 0.5, Some(10));
        table.insert(120, 0.5, Some(3));
        table.insert(30, 0.9, None);
        table.insert(60, 0.9, Some(8));
        table.insert(120, 0.9, None);

        table.apply_decreasing_correction();

        assert_eq!(table.column(0.5), vec![(30, Some(5)), (60, Some(5)), (120, Some(3))]);
        assert_eq!(table.column(0.9), vec![(30, None), (60, Some(8)), (120, Some(8))]);
    }

    #[test]
    fn test_targets_sorted_numerically() {
        let mut table = EstimateTable::new();
        table.insert(120, 0.5, Some(1));
        table.insert(30, 0.5, Some(2));
        table.insert(60, 0.5, Some(3));

        assert_eq!(table.targets(), vec![30, 60, 120]);
    }

    #[test]
    fn test_json_shape() {
        let mut table = EstimateTable::new();
        table.insert(30, 0.5, Some(12));
        table.insert(30, 0.9, None);

        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json, serde_json::json!({"30": {"0.5": 12, "0.9": null}}));

        let parsed: EstimateTable = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, table);
    }

    #[test]
    fn test_undefined_table() {
        let table = EstimateTable::undefined(&[1], &[0.5, 0.8, 0.9]);
        assert_eq!(table.confidences(), vec![0.5, 0.8, 0.9]);
        assert!(table.contains(1, 0.8));
        assert_eq!(table.get_fee_rate(1, 0.8), None);
    }
}
