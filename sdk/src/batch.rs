//! Grouping queued records into delivery batches.

use serde::Serialize;
use shared::models::{Event, LogEntry, Metric, Record, RequestRecord, Span};

use crate::queue::BoundedQueue;

/// Records grouped by kind, ready to be sent in one request.
///
/// Order within each kind follows capture order. A batch is delivered or
/// dropped as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Batch {
    /// Request records.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub requests: Vec<RequestRecord>,
    /// Metric data points.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<Metric>,
    /// Log entries.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogEntry>,
    /// Finished spans.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub traces: Vec<Span>,
    /// Custom events.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<Event>,
}

impl Batch {
    /// Builds a batch from records, partitioning them by kind.
    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let mut batch = Self::default();
        for record in records {
            batch.push(record);
        }
        batch
    }

    /// Adds one record to the list for its kind.
    pub fn push(&mut self, record: Record) {
        match record {
            Record::Request(r) => self.requests.push(r),
            Record::Metric(m) => self.metrics.push(m),
            Record::Log(l) => self.logs.push(l),
            Record::Span(s) => self.traces.push(s),
            Record::Event(e) => self.events.push(e),
        }
    }

    /// Total number of records across all kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
            + self.metrics.len()
            + self.logs.len()
            + self.traces.len()
            + self.events.len()
    }

    /// Returns true if the batch holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encodes the batch as the JSON request body.
    ///
    /// # Errors
    ///
    /// Returns an error if a record fails to serialize.
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Cuts batches of at most `batch_size` records out of a queue.
#[derive(Debug, Clone, Copy)]
pub struct Batcher {
    batch_size: usize,
}

impl Batcher {
    /// Creates a batcher. A size of zero is treated as one.
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Maximum records per batch.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Returns true when `queued` records fill at least one batch.
    #[must_use]
    pub fn is_ready(&self, queued: usize) -> bool {
        queued >= self.batch_size
    }

    /// Drains the oldest records into a batch, or returns `None` if the
    /// queue is empty.
    pub fn next_batch(&self, queue: &BoundedQueue<Record>) -> Option<Batch> {
        let records = queue.drain(self.batch_size);
        if records.is_empty() {
            None
        } else {
            Some(Batch::from_records(records))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::LogLevel;

    #[test]
    fn test_partition_by_kind_preserves_order() {
        let batch = Batch::from_records([
            Record::from(Metric::new("a", 1.0)),
            Record::from(LogEntry::new(LogLevel::Info, "first")),
            Record::from(Metric::new("b", 2.0)),
            Record::from(LogEntry::new(LogLevel::Info, "second")),
        ]);

        assert_eq!(batch.len(), 4);
        let names: Vec<_> = batch.metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        let messages: Vec<_> = batch.logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, ["first", "second"]);
    }

    #[test]
    fn test_payload_omits_empty_kinds() {
        let batch = Batch::from_records([Record::from(RequestRecord::new("get", "/a", 200, 1.0))]);
        let value: serde_json::Value = serde_json::from_slice(&batch.to_payload().unwrap()).unwrap();

        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, ["requests"]);
        assert_eq!(value["requests"][0]["method"], "GET");
    }

    #[test]
    fn test_next_batch_respects_size() {
        let queue = BoundedQueue::new(1000);
        for i in 0..250 {
            queue.push(Record::from(Metric::new(format!("m{i}"), 1.0)));
        }
        let batcher = Batcher::new(200);

        assert!(batcher.is_ready(queue.len()));
        let first = batcher.next_batch(&queue).unwrap();
        assert_eq!(first.len(), 200);
        assert_eq!(first.metrics[0].name, "m0");

        assert!(!batcher.is_ready(queue.len()));
        let second = batcher.next_batch(&queue).unwrap();
        assert_eq!(second.len(), 50);
        assert_eq!(second.metrics[0].name, "m200");

        assert!(batcher.next_batch(&queue).is_none());
    }

    #[test]
    fn test_empty_batch() {
        let batch = Batch::default();
        assert!(batch.is_empty());
        assert_eq!(batch.to_payload().unwrap(), b"{}");
    }
}
