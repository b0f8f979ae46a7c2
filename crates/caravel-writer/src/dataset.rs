//! Input dataset contract.
//!
//! The compute engine feeding Caravel is external; all the pipeline needs
//! is a partitioned, lazily iterable sequence of records with named
//! fields. [`VecDataset`] is the in-memory realization used by tests and
//! small loads; any engine that can iterate a partition on demand can
//! implement [`Dataset`].

use caravel_codec::Datum;

/// One input record: named fields in input order.
///
/// Field names are matched to table columns case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct Record {
    fields: Vec<(String, Datum)>,
}

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, datum: Datum) -> Self {
        self.fields.push((name.into(), datum));
        self
    }

    /// The fields in input order.
    #[must_use]
    pub fn fields(&self) -> &[(String, Datum)] {
        &self.fields
    }

    /// Number of fields.
    #[inline]
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

/// A partitioned stream of records.
pub trait Dataset: Send + Sync {
    /// Number of partitions.
    fn partition_count(&self) -> usize;

    /// Iterates one partition's records.
    fn partition(&self, index: usize) -> Box<dyn Iterator<Item = Record> + Send + '_>;

    /// Total record count across partitions.
    fn count(&self) -> usize {
        (0..self.partition_count())
            .map(|i| self.partition(i).count())
            .sum()
    }
}

/// In-memory dataset: one `Vec` per partition.
#[derive(Debug, Clone, Default)]
pub struct VecDataset {
    partitions: Vec<Vec<Record>>,
}

impl VecDataset {
    /// Creates a dataset from explicit partitions.
    #[must_use]
    pub fn new(partitions: Vec<Vec<Record>>) -> Self {
        Self { partitions }
    }

    /// Creates a single-partition dataset.
    #[must_use]
    pub fn single(records: Vec<Record>) -> Self {
        Self {
            partitions: vec![records],
        }
    }
}

impl Dataset for VecDataset {
    fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    fn partition(&self, index: usize) -> Box<dyn Iterator<Item = Record> + Send + '_> {
        Box::new(self.partitions[index].iter().cloned())
    }

    fn count(&self) -> usize {
        self.partitions.iter().map(Vec::len).sum()
    }
}
