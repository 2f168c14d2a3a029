//! Restore points and their serialized views.

use serde::{Deserialize, Serialize};

use crate::timestamp::Timestamp;

/// A recorded checkpoint: the page count of a database as of `timestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestorePoint {
    /// Checkpoint timestamp.
    pub timestamp: Timestamp,
    /// Total pages of the database after the checkpoint.
    pub page_count: u32,
}

impl RestorePoint {
    /// Creates a restore point.
    #[must_use]
    pub fn new(timestamp: Timestamp, page_count: u32) -> Self {
        Self {
            timestamp,
            page_count,
        }
    }

    /// Returns the database size implied by the page count.
    #[must_use]
    pub fn database_size(&self, page_size: usize) -> u64 {
        u64::from(self.page_count) * page_size as u64
    }
}

/// The recorded checkpoint instants of one day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestorePoints {
    /// Distinct checkpoint timestamps, ascending.
    pub data: Vec<Timestamp>,
    /// Earliest timestamp, 0 if empty.
    pub start: Timestamp,
    /// Latest timestamp, 0 if empty.
    pub end: Timestamp,
    /// Number of distinct timestamps.
    pub total: usize,
}

impl RestorePoints {
    /// Builds the view from checkpoint timestamps in any order.
    pub fn from_timestamps(timestamps: impl IntoIterator<Item = Timestamp>) -> Self {
        let mut data: Vec<Timestamp> = timestamps.into_iter().collect();
        data.sort_unstable();
        data.dedup();

        Self {
            start: data.first().copied().unwrap_or_default(),
            end: data.last().copied().unwrap_or_default(),
            total: data.len(),
            data,
        }
    }
}

/// One day-bucket of restore points as exposed to listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    /// Day bucket of the snapshot.
    pub timestamp: Timestamp,
    /// Checkpoint instants recorded that day; absent when not loaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_points: Option<RestorePoints>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_points_sorted_and_deduplicated() {
        let points = RestorePoints::from_timestamps([30, 10, 20, 10]);
        assert_eq!(points.data, vec![10, 20, 30]);
        assert_eq!(points.start, 10);
        assert_eq!(points.end, 30);
        assert_eq!(points.total, 3);
    }

    #[test]
    fn test_empty_restore_points() {
        let points = RestorePoints::from_timestamps([]);
        assert_eq!(points, RestorePoints::default());
    }

    #[test]
    fn test_json_shape() {
        let summary = SnapshotSummary {
            timestamp: 0,
            restore_points: Some(RestorePoints::from_timestamps([5])),
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["restorePoints"]["total"], 1);
        assert_eq!(json["restorePoints"]["data"][0], 5);

        let point = serde_json::to_value(RestorePoint::new(5, 2)).unwrap();
        assert_eq!(point["pageCount"], 2);
    }
}
