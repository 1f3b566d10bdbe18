use serde::{Deserialize, Serialize};
use std::io::BufRead;
use thiserror::Error;

/// Errors produced while building or reading a [`CustomDataset`].
#[derive(Debug, Error)]
pub enum DatasetError {
    /// Texts and labels have different lengths.
    #[error("got {texts} texts but {labels} labels")]
    LengthMismatch {
        /// Number of texts.
        texts: usize,
        /// Number of labels.
        labels: usize,
    },
    /// An index outside `0..len` was requested.
    #[error("index {index} is out of range for dataset of length {len}")]
    IndexOutOfRange {
        /// The requested index.
        index: usize,
        /// Length of the dataset.
        len: usize,
    },
    /// A batch size of zero was requested.
    #[error("batch size must be at least 1")]
    ZeroBatchSize,
    /// Rank and world size do not describe a valid shard.
    #[error("rank {rank} is out of range for world size {world_size}")]
    InvalidShard {
        /// Requested shard rank.
        rank: usize,
        /// Number of shards.
        world_size: usize,
    },
    /// A line of a TSV dataset could not be parsed.
    #[error("line {line}: {reason}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },
    /// Reading the TSV source failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single (text, label) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetEntry {
    /// Input text (prompt).
    pub text: String,
    /// Class index.
    pub label: usize,
}

/// An ordered group of prompts and their labels, as fed to [`crate::process_batch`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Batch {
    /// Prompts, in dataset order.
    pub prompts: Vec<String>,
    /// Labels, one per prompt.
    pub labels: Vec<usize>,
}

impl Batch {
    /// Number of examples in the batch.
    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    /// Whether the batch holds no examples.
    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

/// A read-only dataset of texts paired with integer labels.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CustomDataset {
    entries: Vec<DatasetEntry>,
}

impl CustomDataset {
    /// Pairs `texts[i]` with `labels[i]`.
    ///
    /// # Errors
    /// Returns `DatasetError::LengthMismatch` if the two sequences differ in length.
    pub fn new<S: Into<String>>(texts: Vec<S>, labels: Vec<usize>) -> Result<Self, DatasetError> {
        if texts.len() != labels.len() {
            return Err(DatasetError::LengthMismatch {
                texts: texts.len(),
                labels: labels.len(),
            });
        }
        let entries = texts
            .into_iter()
            .zip(labels)
            .map(|(text, label)| DatasetEntry {
                text: text.into(),
                label,
            })
            .collect();
        Ok(Self { entries })
    }

    /// Reads a dataset with one `label<TAB>text` entry per line.
    ///
    /// Blank lines are skipped. The text keeps any further tabs.
    ///
    /// # Errors
    /// Returns `DatasetError::Parse` for a line without a tab or with a
    /// non-integer label, and `DatasetError::Io` if reading fails.
    pub fn from_tsv<R: BufRead>(reader: R) -> Result<Self, DatasetError> {
        let mut entries = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let (label, text) = line.split_once('\t').ok_or_else(|| DatasetError::Parse {
                line: i + 1,
                reason: "expected `label<TAB>text`".to_string(),
            })?;
            let label = label.trim().parse().map_err(|e| DatasetError::Parse {
                line: i + 1,
                reason: format!("invalid label {label:?}: {e}"),
            })?;
            entries.push(DatasetEntry {
                text: text.to_string(),
                label,
            });
        }
        Ok(Self { entries })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the dataset holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entry at `index`.
    ///
    /// # Errors
    /// Returns `DatasetError::IndexOutOfRange` if `index >= len()`.
    pub fn get(&self, index: usize) -> Result<&DatasetEntry, DatasetError> {
        self.entries.get(index).ok_or(DatasetError::IndexOutOfRange {
            index,
            len: self.entries.len(),
        })
    }

    /// Iterates over the entries in order.
    pub fn iter(&self) -> std::slice::Iter<'_, DatasetEntry> {
        self.entries.iter()
    }

    /// The entries this rank owns under round-robin sharding: every index
    /// with `index % world_size == rank`.
    ///
    /// # Errors
    /// Returns `DatasetError::InvalidShard` unless `rank < world_size`.
    pub fn shard(&self, rank: usize, world_size: usize) -> Result<Self, DatasetError> {
        if rank >= world_size {
            return Err(DatasetError::InvalidShard { rank, world_size });
        }
        let entries = self
            .entries
            .iter()
            .skip(rank)
            .step_by(world_size)
            .cloned()
            .collect();
        Ok(Self { entries })
    }

    /// Splits the dataset into consecutive batches of `batch_size`; the last
    /// batch may be shorter.
    ///
    /// # Errors
    /// Returns `DatasetError::ZeroBatchSize` if `batch_size` is 0.
    pub fn batches(&self, batch_size: usize) -> Result<Vec<Batch>, DatasetError> {
        if batch_size == 0 {
            return Err(DatasetError::ZeroBatchSize);
        }
        Ok(self
            .entries
            .chunks(batch_size)
            .map(|chunk| Batch {
                prompts: chunk.iter().map(|e| e.text.clone()).collect(),
                labels: chunk.iter().map(|e| e.label).collect(),
            })
            .collect())
    }
}

impl<'a> IntoIterator for &'a CustomDataset {
    type Item = &'a DatasetEntry;
    type IntoIter = std::slice::Iter<'a, DatasetEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CustomDataset {
        CustomDataset::new(vec!["text1", "text2", "text3"], vec![0, 1, 0]).unwrap()
    }

    #[test]
    fn length_and_indexing() {
        let dataset = sample();
        assert_eq!(dataset.len(), 3);
        let entry = dataset.get(1).unwrap();
        assert_eq!(entry.text, "text2");
        assert_eq!(entry.label, 1);
    }

    #[test]
    fn entries_keep_input_order() {
        let texts: Vec<String> = (0..10).map(|i| format!("t{i}")).collect();
        let labels: Vec<usize> = (0..10).map(|i| i % 2).collect();
        let dataset = CustomDataset::new(texts.clone(), labels.clone()).unwrap();
        for (i, entry) in dataset.iter().enumerate() {
            assert_eq!(entry.text, texts[i]);
            assert_eq!(entry.label, labels[i]);
        }
    }

    #[test]
    fn out_of_range_index_fails() {
        let dataset = sample();
        assert!(matches!(
            dataset.get(3),
            Err(DatasetError::IndexOutOfRange { index: 3, len: 3 })
        ));

        let empty = CustomDataset::new(Vec::<String>::new(), vec![]).unwrap();
        assert!(empty.is_empty());
        assert!(matches!(
            empty.get(0),
            Err(DatasetError::IndexOutOfRange { index: 0, len: 0 })
        ));
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        assert!(matches!(
            CustomDataset::new(vec!["a", "b"], vec![0]),
            Err(DatasetError::LengthMismatch { texts: 2, labels: 1 })
        ));
    }

    #[test]
    fn shards_are_disjoint_and_cover_everything() {
        let texts: Vec<String> = (0..7).map(|i| i.to_string()).collect();
        let dataset = CustomDataset::new(texts, vec![0; 7]).unwrap();
        let a = dataset.shard(0, 2).unwrap();
        let b = dataset.shard(1, 2).unwrap();
        assert_eq!(a.len(), 4);
        assert_eq!(b.len(), 3);
        assert_eq!(a.get(1).unwrap().text, "2");
        assert_eq!(b.get(1).unwrap().text, "3");
        assert!(matches!(
            dataset.shard(2, 2),
            Err(DatasetError::InvalidShard { .. })
        ));
    }

    #[test]
    fn batches_split_in_order() {
        let batches = sample().batches(2).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].prompts, vec!["text1", "text2"]);
        assert_eq!(batches[0].labels, vec![0, 1]);
        assert_eq!(batches[1].len(), 1);
        assert!(matches!(sample().batches(0), Err(DatasetError::ZeroBatchSize)));
    }

    #[test]
    fn reads_tsv() {
        let input = "0\thello world\n\n1\tsecond\twith tab\n";
        let dataset = CustomDataset::from_tsv(input.as_bytes()).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.get(1).unwrap().text, "second\twith tab");
        assert_eq!(dataset.get(1).unwrap().label, 1);
    }

    #[test]
    fn tsv_errors_name_the_line() {
        let err = CustomDataset::from_tsv("0\tok\nno tab here\n".as_bytes()).unwrap_err();
        assert!(matches!(err, DatasetError::Parse { line: 2, .. }));

        let err = CustomDataset::from_tsv("x\tbad label\n".as_bytes()).unwrap_err();
        assert!(matches!(err, DatasetError::Parse { line: 1, .. }));
    }
}
