//! In-memory vector index with durable JSON persistence.
//!
//! Records are stored L2-normalised so that search is a plain dot product
//! (cosine similarity). Insertion order is preserved and used as the
//! tie-break for equal scores, including across a save/load round trip.
//!
//! # Persisted format
//!
//! ```json
//! {
//!   "header": { "format_version": 1, "metric": "cosine", "dims": 8,
//!               "model": "...", "record_count": 3,
//!               "created_at": "...", "checksum": "<sha256 hex>" },
//!   "records": [ { "chunk_id": "...", "document_id": "...", "start": 0,
//!                  "end": 40, "text": "...", "vector": "<base64 f32 LE>" } ]
//! }
//! ```
//!
//! Writes go to a sibling temp file which is then renamed over the target.
//! Any disagreement on load (version, metric, dimensionality, record
//! count, checksum, undecodable vector) is [`RagError::CorruptIndex`].
//!
//! [`SharedIndex`] is the swap handle used by a serving pipeline: queries
//! search an `Arc` snapshot, rebuilds replace the pointer wholesale.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, RwLock};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::embedding::{blob_to_vec, dot, l2_normalize, vec_to_blob};
use crate::error::{RagError, Result};
use crate::models::{EmbeddingRecord, ScoredRecord};

pub const FORMAT_VERSION: u32 = 1;
pub const METRIC: &str = "cosine";

/// Header of a persisted index file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHeader {
    pub format_version: u32,
    pub metric: String,
    pub dims: usize,
    pub model: String,
    pub record_count: usize,
    pub created_at: DateTime<Utc>,
    pub checksum: String,
}

#[derive(Serialize, Deserialize)]
struct StoredRecord {
    chunk_id: String,
    document_id: String,
    start: usize,
    end: usize,
    text: String,
    vector: String,
}

#[derive(Serialize, Deserialize)]
struct StoredIndex {
    header: IndexHeader,
    records: Vec<StoredRecord>,
}

/// Exact nearest-neighbour index over embedding records.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    model: String,
    dims: Option<usize>,
    records: Vec<EmbeddingRecord>,
    positions: HashMap<String, usize>,
}

impl VectorIndex {
    /// Empty index whose dimensionality is fixed by the first insert.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Empty index with dimensionality fixed up front, e.g. from the
    /// embedder's declared dims.
    pub fn with_dims(model: impl Into<String>, dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(RagError::invalid("index dimensionality must be > 0"));
        }
        Ok(Self {
            model: model.into(),
            dims: Some(dims),
            ..Self::default()
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dims(&self) -> Option<usize> {
        self.dims
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn get(&self, chunk_id: &str) -> Option<&EmbeddingRecord> {
        self.positions.get(chunk_id).map(|&i| &self.records[i])
    }

    /// Add records, normalising their vectors.
    ///
    /// A record whose `chunk_id` is already present replaces the stored
    /// record in place (keeping its original insertion position).
    ///
    /// # Errors
    ///
    /// - [`RagError::DimensionMismatch`] if any vector's length differs from
    ///   the index dimensionality (or from the first vector of this call
    ///   when the index has none yet).
    /// - [`RagError::InvalidArgument`] for empty or non-finite vectors.
    ///
    /// On error nothing from the call is inserted.
    pub fn add(&mut self, records: Vec<EmbeddingRecord>) -> Result<()> {
        let mut dims = self.dims;
        for record in &records {
            if record.vector.is_empty() {
                return Err(RagError::invalid(format!(
                    "empty vector for chunk {}",
                    record.chunk_id
                )));
            }
            if record.vector.iter().any(|v| !v.is_finite()) {
                return Err(RagError::invalid(format!(
                    "non-finite value in vector for chunk {}",
                    record.chunk_id
                )));
            }
            match dims {
                Some(expected) if expected != record.vector.len() => {
                    return Err(RagError::DimensionMismatch {
                        expected,
                        actual: record.vector.len(),
                    });
                }
                Some(_) => {}
                None => dims = Some(record.vector.len()),
            }
        }

        self.dims = dims;
        for mut record in records {
            record.vector = l2_normalize(&record.vector);
            self.insert_normalized(record);
        }
        Ok(())
    }

    fn insert_normalized(&mut self, record: EmbeddingRecord) {
        match self.positions.get(&record.chunk_id) {
            Some(&i) => self.records[i] = record,
            None => {
                self.positions
                    .insert(record.chunk_id.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    /// Return up to `k` records ranked by descending cosine similarity.
    ///
    /// Equal scores keep insertion order. An empty index yields an empty
    /// result for any query.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidArgument`] if `k == 0` or the query contains
    ///   non-finite values.
    /// - [`RagError::DimensionMismatch`] if the query length differs from
    ///   the index dimensionality.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredRecord>> {
        if k == 0 {
            return Err(RagError::invalid("k must be > 0"));
        }
        let dims = match self.dims {
            Some(d) if !self.records.is_empty() => d,
            _ => return Ok(Vec::new()),
        };
        if query.len() != dims {
            return Err(RagError::DimensionMismatch {
                expected: dims,
                actual: query.len(),
            });
        }
        if query.iter().any(|v| !v.is_finite()) {
            return Err(RagError::invalid("query vector contains non-finite values"));
        }

        let query = l2_normalize(query);
        let mut scored: Vec<(usize, f32)> = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (i, dot(&query, &r.vector)))
            .collect();

        // `sort_by` is stable, so equal scores stay in insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredRecord {
                record: self.records[i].clone(),
                score,
            })
            .collect())
    }

    fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update((self.dims.unwrap_or(0) as u64).to_le_bytes());
        for r in &self.records {
            hasher.update(r.chunk_id.as_bytes());
            hasher.update([0u8]);
            hasher.update(r.document_id.as_bytes());
            hasher.update([0u8]);
            hasher.update((r.start as u64).to_le_bytes());
            hasher.update((r.end as u64).to_le_bytes());
            hasher.update(r.text.as_bytes());
            hasher.update([0u8]);
            hasher.update(vec_to_blob(&r.vector));
        }
        hex::encode(hasher.finalize())
    }

    /// Header describing the index as it would be persisted now.
    pub fn header(&self) -> IndexHeader {
        IndexHeader {
            format_version: FORMAT_VERSION,
            metric: METRIC.to_string(),
            dims: self.dims.unwrap_or(0),
            model: self.model.clone(),
            record_count: self.records.len(),
            created_at: Utc::now(),
            checksum: self.checksum(),
        }
    }

    /// Persist the index atomically to `path`.
    pub fn save(&self, path: &Path) -> Result<IndexHeader> {
        let header = self.header();
        let stored = StoredIndex {
            header: header.clone(),
            records: self
                .records
                .iter()
                .map(|r| StoredRecord {
                    chunk_id: r.chunk_id.clone(),
                    document_id: r.document_id.clone(),
                    start: r.start,
                    end: r.end,
                    text: r.text.clone(),
                    vector: STANDARD.encode(vec_to_blob(&r.vector)),
                })
                .collect(),
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = std::path::PathBuf::from(tmp_name);
        {
            let file = std::fs::File::create(&tmp_path)?;
            let mut writer = std::io::BufWriter::new(file);
            serde_json::to_writer(&mut writer, &stored)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        std::fs::rename(&tmp_path, path)?;

        log::info!(
            "Saved index: {} records, dims {}, to {}",
            header.record_count,
            header.dims,
            path.display()
        );
        Ok(header)
    }

    /// Read only the header of a persisted index.
    pub fn read_header(path: &Path) -> Result<IndexHeader> {
        Ok(read_stored(path)?.header)
    }

    /// Load a persisted index, verifying its header and checksum.
    pub fn load(path: &Path) -> Result<Self> {
        let stored = read_stored(path)?;
        let header = stored.header;

        if header.format_version != FORMAT_VERSION {
            return Err(RagError::CorruptIndex(format!(
                "unsupported format_version {} (expected {})",
                header.format_version, FORMAT_VERSION
            )));
        }
        if header.metric != METRIC {
            return Err(RagError::CorruptIndex(format!(
                "unsupported metric '{}'",
                header.metric
            )));
        }
        if header.record_count != stored.records.len() {
            return Err(RagError::CorruptIndex(format!(
                "header declares {} records, file holds {}",
                header.record_count,
                stored.records.len()
            )));
        }
        if header.dims == 0 && !stored.records.is_empty() {
            return Err(RagError::CorruptIndex("records present but dims is 0".into()));
        }

        let mut index = Self {
            model: header.model.clone(),
            dims: (header.dims > 0).then_some(header.dims),
            ..Self::default()
        };

        for stored_record in stored.records {
            let blob = STANDARD.decode(&stored_record.vector).map_err(|e| {
                RagError::CorruptIndex(format!(
                    "undecodable vector for {}: {}",
                    stored_record.chunk_id, e
                ))
            })?;
            if blob.len() != header.dims * 4 {
                return Err(RagError::CorruptIndex(format!(
                    "vector for {} has {} bytes, expected {}",
                    stored_record.chunk_id,
                    blob.len(),
                    header.dims * 4
                )));
            }
            // Stored vectors are already normalised; keep them bit-exact.
            index.insert_normalized(EmbeddingRecord {
                chunk_id: stored_record.chunk_id,
                document_id: stored_record.document_id,
                start: stored_record.start,
                end: stored_record.end,
                text: stored_record.text,
                vector: blob_to_vec(&blob),
            });
        }

        if index.records.len() != header.record_count {
            return Err(RagError::CorruptIndex("duplicate chunk ids in index file".into()));
        }
        if index.checksum() != header.checksum {
            return Err(RagError::CorruptIndex("checksum mismatch".into()));
        }

        log::info!(
            "Loaded index: {} records, dims {}, model {}",
            index.len(),
            header.dims,
            index.model
        );
        Ok(index)
    }
}

fn read_stored(path: &Path) -> Result<StoredIndex> {
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| RagError::CorruptIndex(format!("{}: {}", path.display(), e)))
}

/// Read-mostly handle to the currently served index.
///
/// Readers take a [`snapshot`](SharedIndex::snapshot) and search it without
/// holding the lock; a rebuild constructs a new [`VectorIndex`] and
/// [`replace`](SharedIndex::replace)s the pointer in one step.
#[derive(Debug, Default)]
pub struct SharedIndex {
    inner: RwLock<Arc<VectorIndex>>,
}

impl SharedIndex {
    pub fn new(index: VectorIndex) -> Self {
        Self {
            inner: RwLock::new(Arc::new(index)),
        }
    }

    pub fn snapshot(&self) -> Arc<VectorIndex> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Swap in a new index, returning the previous one.
    pub fn replace(&self, index: VectorIndex) -> Arc<VectorIndex> {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, Arc::new(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            chunk_id: id.to_string(),
            document_id: "doc".to_string(),
            start: 0,
            end: 10,
            text: format!("text of {}", id),
            vector,
        }
    }

    fn basis(dims: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dims];
        v[hot] = 1.0;
        v
    }

    fn three_chunk_index() -> VectorIndex {
        let mut index = VectorIndex::new("test");
        index
            .add(vec![
                record("c0", vec![1.0, 0.5, 0.0, 0.0, 0.2, 0.0, 0.0, 0.1]),
                record("c1", vec![0.0, 0.3, 2.0, 0.7, 0.0, 0.1, 0.0, 0.0]),
                record("c2", vec![0.1, 0.0, 0.0, 0.0, 0.9, 0.9, 0.4, 0.0]),
            ])
            .unwrap();
        index
    }

    #[test]
    fn test_identical_query_ranks_first_with_score_one() {
        let index = three_chunk_index();
        let query = vec![0.0, 0.3, 2.0, 0.7, 0.0, 0.1, 0.0, 0.0];
        let hits = index.search(&query, 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].record.chunk_id, "c1");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_search_returns_at_most_k() {
        let index = three_chunk_index();
        let hits = index.search(&basis(8, 0), 2).unwrap();
        assert_eq!(hits.len(), 2);
        let hits = index.search(&basis(8, 0), 10).unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_k_zero_is_invalid() {
        let index = three_chunk_index();
        let err = index.search(&basis(8, 0), 0).unwrap_err();
        assert!(matches!(err, RagError::InvalidArgument(_)));
        let err = VectorIndex::new("m").search(&[1.0], 0).unwrap_err();
        assert!(matches!(err, RagError::InvalidArgument(_)));
    }

    #[test]
    fn test_empty_index_returns_empty_for_any_query() {
        let index = VectorIndex::new("m");
        assert!(index.search(&[1.0, 2.0, 3.0], 5).unwrap().is_empty());
        let index = VectorIndex::with_dims("m", 4).unwrap();
        assert!(index.search(&[1.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut index = VectorIndex::new("m");
        index
            .add(vec![
                record("first", vec![1.0, 0.0]),
                record("other", vec![0.0, 1.0]),
                record("second", vec![2.0, 0.0]),
                record("third", vec![0.5, 0.0]),
            ])
            .unwrap();
        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.record.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_dimension_mismatch_leaves_index_unchanged() {
        let mut index = three_chunk_index();
        let before = index.search(&basis(8, 4), 3).unwrap();

        let err = index
            .add(vec![record("c3", basis(8, 1)), record("c4", vec![1.0, 2.0])])
            .unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 8,
                actual: 2
            }
        ));
        assert_eq!(index.len(), 3);
        assert!(index.get("c3").is_none());

        let after = index.search(&basis(8, 4), 3).unwrap();
        let ids = |hits: &[ScoredRecord]| {
            hits.iter()
                .map(|h| (h.record.chunk_id.clone(), h.score))
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&before), ids(&after));
    }

    #[test]
    fn test_mismatch_within_first_batch() {
        let mut index = VectorIndex::new("m");
        let err = index
            .add(vec![record("a", vec![1.0, 0.0]), record("b", vec![1.0])])
            .unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { .. }));
        assert!(index.is_empty());
        assert_eq!(index.dims(), None);
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let index = three_chunk_index();
        let err = index.search(&[1.0, 0.0], 1).unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 8, actual: 2 }));
    }

    #[test]
    fn test_non_finite_vectors_rejected() {
        let mut index = three_chunk_index();
        let err = index.add(vec![record("bad", vec![f32::NAN; 8])]).unwrap_err();
        assert!(matches!(err, RagError::InvalidArgument(_)));
        let mut query = basis(8, 0);
        query[3] = f32::INFINITY;
        assert!(matches!(
            index.search(&query, 1).unwrap_err(),
            RagError::InvalidArgument(_)
        ));
    }

    #[test]
    fn test_large_finite_components_score_by_direction() {
        let mut index = VectorIndex::new("test");
        index
            .add(vec![
                record("big", vec![1e20, 1e20]),
                record("other", vec![1.0, -1.0]),
            ])
            .unwrap();
        let hits = index.search(&[1.0, 1.0], 2).unwrap();
        assert_eq!(hits[0].record.chunk_id, "big");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_re_add_overwrites() {
        let mut index = three_chunk_index();
        index.add(vec![record("c0", basis(8, 6))]).unwrap();
        assert_eq!(index.len(), 3);

        let hits = index.search(&basis(8, 6), 1).unwrap();
        assert_eq!(hits[0].record.chunk_id, "c0");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_with_dims_enforced_on_first_insert() {
        let mut index = VectorIndex::with_dims("m", 3).unwrap();
        let err = index.add(vec![record("a", vec![1.0, 0.0])]).unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 3, actual: 2 }));
        assert!(VectorIndex::with_dims("m", 0).is_err());
    }

    #[test]
    fn test_persistence_round_trip_preserves_rankings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.json");

        let mut index = three_chunk_index();
        index.add(vec![record("tie", vec![1.0, 0.5, 0.0, 0.0, 0.2, 0.0, 0.0, 0.1])]).unwrap();
        let header = index.save(&path).unwrap();
        assert_eq!(header.record_count, 4);
        assert_eq!(header.dims, 8);
        assert_eq!(header.metric, "cosine");

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded.model(), "test");

        let queries = [
            basis(8, 0),
            basis(8, 4),
            vec![0.3, -0.2, 0.9, 0.1, 0.0, 0.5, -0.4, 0.2],
        ];
        for q in &queries {
            let a = index.search(q, 4).unwrap();
            let b = loaded.search(q, 4).unwrap();
            assert_eq!(a.len(), b.len());
            for (x, y) in a.iter().zip(b.iter()) {
                assert_eq!(x.record, y.record);
                assert_eq!(x.score.to_bits(), y.score.to_bits());
            }
        }
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_empty_index_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        VectorIndex::new("m").save(&path).unwrap();
        let loaded = VectorIndex::load(&path).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.dims(), None);
    }

    #[test]
    fn test_load_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        three_chunk_index().save(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let tampered = content.replace("text of c1", "text of cX");
        std::fs::write(&path, tampered).unwrap();
        assert!(matches!(
            VectorIndex::load(&path).unwrap_err(),
            RagError::CorruptIndex(_)
        ));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            VectorIndex::load(&path).unwrap_err(),
            RagError::CorruptIndex(_)
        ));
    }

    #[test]
    fn test_load_rejects_wrong_metric_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        three_chunk_index().save(&path).unwrap();
        let original = std::fs::read_to_string(&path).unwrap();

        let mut json: serde_json::Value = serde_json::from_str(&original).unwrap();
        json["header"]["metric"] = "l2".into();
        std::fs::write(&path, json.to_string()).unwrap();
        let err = VectorIndex::load(&path).unwrap_err();
        assert!(err.to_string().contains("metric"));

        let mut json: serde_json::Value = serde_json::from_str(&original).unwrap();
        json["header"]["record_count"] = 7.into();
        std::fs::write(&path, json.to_string()).unwrap();
        assert!(matches!(
            VectorIndex::load(&path).unwrap_err(),
            RagError::CorruptIndex(_)
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = VectorIndex::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, RagError::Io(_)));
    }

    #[test]
    fn test_shared_index_swap() {
        let shared = SharedIndex::new(VectorIndex::new("m"));
        let before = shared.snapshot();
        assert!(before.is_empty());

        let previous = shared.replace(three_chunk_index());
        assert!(previous.is_empty());
        assert_eq!(shared.snapshot().len(), 3);
        // Snapshots taken earlier are unaffected.
        assert!(before.is_empty());
    }
}
