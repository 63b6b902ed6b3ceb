//! Partition schemes.
//!
//! A scheme is a pure function from key values to partition identifiers
//! (strings used as bucket key components) and, for sorted schemes,
//! from ranges to the ordered partition list that drives traversal.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use graindex_types::error::InvalidArgumentSnafu;
use graindex_types::{IndexValue, PartitionBin, Result};

/// Pure key-to-partition mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionScheme {
    /// `stable_hash(key) mod partitions`; 0 partitions means per-key.
    Hash {
        /// Partition count; 0 for one partition per distinct key.
        partitions: u32,
    },
    /// UTC instants binned by year or month; partition ids are the
    /// fixed-width bin keys (`yyyy` / `yyyyMM`) whose lexicographic
    /// order matches time order.
    DateTime {
        /// Bin granularity.
        bin: PartitionBin,
    },
}

impl PartitionScheme {
    /// Partition id for one key value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when a date-time scheme receives a
    /// non-instant key.
    pub fn partition(&self, value: &IndexValue) -> Result<String> {
        match self {
            PartitionScheme::Hash { partitions } => {
                let hash = value.stable_hash();
                Ok(if *partitions == 0 { hash.to_string() } else { (hash % partitions).to_string() })
            },
            PartitionScheme::DateTime { bin } => match value {
                IndexValue::Time(instant) => Ok(bin_key(*bin, instant)),
                other => InvalidArgumentSnafu {
                    message: format!("date-time scheme over non-instant key {other}"),
                }
                .fail(),
            },
        }
    }

    /// Ordered partition ids covering `[start, end]`.
    ///
    /// Bins step from `floor_bin(start)` to `floor_bin(end)` inclusive;
    /// the returned order is the traversal order for sorted lookups.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for hash schemes (no range routing),
    /// non-instant bounds, or `start > end`.
    pub fn partitions_in_range(&self, start: &IndexValue, end: &IndexValue) -> Result<Vec<String>> {
        let PartitionScheme::DateTime { bin } = *self else {
            return InvalidArgumentSnafu {
                message: "range routing over a hash scheme".to_string(),
            }
            .fail();
        };
        let (IndexValue::Time(start), IndexValue::Time(end)) = (start, end) else {
            return InvalidArgumentSnafu {
                message: "date-time scheme over non-instant range".to_string(),
            }
            .fail();
        };
        if start > end {
            return InvalidArgumentSnafu { message: format!("range start {start} > end {end}") }.fail();
        }

        let mut partitions = Vec::new();
        let mut cursor = floor_bin(bin, start);
        let last = floor_bin(bin, end);
        while cursor <= last {
            partitions.push(bin_key(bin, &cursor));
            cursor = next_bin(bin, &cursor);
        }
        Ok(partitions)
    }
}

fn bin_key(bin: PartitionBin, instant: &DateTime<Utc>) -> String {
    match bin {
        PartitionBin::Year => format!("{:04}", instant.year()),
        PartitionBin::Month => format!("{:04}{:02}", instant.year(), instant.month()),
    }
}

fn floor_bin(bin: PartitionBin, instant: &DateTime<Utc>) -> DateTime<Utc> {
    match bin {
        PartitionBin::Year => Utc
            .with_ymd_and_hms(instant.year(), 1, 1, 0, 0, 0)
            .single()
            .unwrap_or(*instant),
        PartitionBin::Month => Utc
            .with_ymd_and_hms(instant.year(), instant.month(), 1, 0, 0, 0)
            .single()
            .unwrap_or(*instant),
    }
}

fn next_bin(bin: PartitionBin, floored: &DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = match bin {
        PartitionBin::Year => (floored.year() + 1, 1),
        PartitionBin::Month => {
            if floored.month() == 12 {
                (floored.year() + 1, 1)
            } else {
                (floored.year(), floored.month() + 1)
            }
        },
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single().unwrap_or(*floored)
}
