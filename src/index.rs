//! # Embedding Index
//!
//! Similarity index over procedure embeddings. Each procedure id owns one
//! dense vector derived from its title, description and keywords via the
//! [`EmbeddingClient`]. Vectors are L2-normalized on ingest and kept in an
//! in-process table; in persistent mode a [HNSW](https://arxiv.org/abs/1603.09320)
//! index (`hora` crate) is rebuilt from that table and dumped to disk next to
//! a YAML metadata file.
//!
//! The HNSW index only narrows the candidate set; similarity is always
//! computed as cosine against the stored vector, so both modes answer
//! queries in the same `{id, distance, similarity}` shape with
//! `similarity = 1 − distance`. Callers cannot tell which mode served them.
//!
//! If the persist directory cannot be created or written, the index degrades
//! to memory-only mode once, at construction, with a warning — queries then
//! run as a cosine scan over the table.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use hora::core::ann_index::{ANNIndex, SerializableIndex};
use hora::core::metrics::Metric;
use hora::index::hnsw_idx::HNSWIndex;
use hora::index::hnsw_params::HNSWParams;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::embedding::EmbeddingClient;
use crate::error::{Error, Result};

/// One nearest-neighbor result. `similarity = 1 − distance`, both in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub process_id: String,
    pub distance: f32,
    pub similarity: f32,
}

/// Metadata persisted beside the HNSW dump: slot → id mapping plus the
/// vector table itself, so a restart needs no embedding calls.
#[derive(Debug, Serialize, Deserialize)]
struct IndexMeta {
    dimension: usize,
    slots: Vec<String>,
    entries: HashMap<String, Vec<f32>>,
}

pub struct ProcessIndex {
    embedder: EmbeddingClient,
    /// id → normalized vector; the source of truth for every rebuild.
    entries: HashMap<String, Vec<f32>>,
    /// Built ANN index, present only in persistent mode after a rebuild.
    hnsw: Option<HNSWIndex<f32, usize>>,
    /// HNSW slot → procedure id, parallel to insertion order at rebuild.
    slots: Vec<String>,
    /// `None` means degraded (memory-only) mode.
    persist_dir: Option<PathBuf>,
    name: String,
}

impl ProcessIndex {
    /// Open an index named `name`, persisting under `dir` when possible.
    ///
    /// A write check decides the mode up front; the decision is logged once
    /// and never revisited for the lifetime of the index. In persistent mode
    /// an earlier dump is rehydrated if present, so a restart answers
    /// queries without re-embedding anything.
    pub fn open(embedder: EmbeddingClient, dir: Option<PathBuf>, name: &str) -> Self {
        let persist_dir = dir.and_then(|dir| match check_writable(&dir) {
            Ok(()) => Some(dir),
            Err(err) => {
                warn!(%err, "vector index storage unavailable, falling back to in-memory mode");
                None
            }
        });

        if let Some(dir) = &persist_dir {
            info!(dir = %dir.display(), "vector index in persistent mode");
        }

        let mut index = Self {
            embedder,
            entries: HashMap::new(),
            hnsw: None,
            slots: Vec::new(),
            persist_dir,
            name: name.to_string(),
        };
        if let Err(err) = index.rehydrate() {
            warn!(%err, "could not rehydrate index dump, starting empty");
        }
        index
    }

    /// Load the vector table and built ANN index back from an earlier
    /// [`rebuild`](Self::rebuild) dump. Missing files mean a first run and
    /// are not an error; state only changes when both files load cleanly.
    fn rehydrate(&mut self) -> Result<()> {
        let Some(dir) = self.persist_dir.clone() else {
            return Ok(());
        };
        let meta_path = self.meta_file(&dir);
        let index_path = self.index_file(&dir);
        if !meta_path.exists() || !index_path.exists() {
            return Ok(());
        }

        let meta: IndexMeta = serde_yaml::from_str(&fs::read_to_string(&meta_path)?)?;
        let hnsw = HNSWIndex::load(
            index_path
                .to_str()
                .ok_or_else(|| Error::Index("non-utf8 index path".to_string()))?,
        )
        .map_err(|e| Error::Index(e.to_string()))?;

        info!(entries = meta.entries.len(), "vector index rehydrated from disk");
        self.entries = meta.entries;
        self.slots = meta.slots;
        self.hnsw = Some(hnsw);
        Ok(())
    }

    /// Embed `text` and store its vector under `id`, replacing any existing
    /// entry so a renamed or edited procedure never leaves an orphan behind.
    pub async fn upsert(&mut self, id: &str, text: &str) -> Result<()> {
        let vector = self.embedder.embed(text).await?;
        self.upsert_vector(id, vector);
        Ok(())
    }

    /// Store a precomputed vector. Normalization happens here.
    pub fn upsert_vector(&mut self, id: &str, vector: Vec<f32>) {
        self.entries.remove(id);
        self.entries.insert(id.to_string(), normalize(vector));
    }

    /// Drop every entry and any persisted artifacts.
    pub fn remove_all(&mut self) {
        self.entries.clear();
        self.slots.clear();
        self.hnsw = None;
        if let Some(dir) = &self.persist_dir {
            let _ = fs::remove_file(self.index_file(dir));
            let _ = fs::remove_file(self.meta_file(dir));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recreate the ANN index from the table and dump it to disk.
    ///
    /// Memory-only mode is a no-op; the cosine scan always reflects the
    /// current table.
    pub fn rebuild(&mut self) -> Result<()> {
        let Some(dir) = self.persist_dir.clone() else {
            return Ok(());
        };

        self.hnsw = None;
        self.slots.clear();

        let Some(dimension) = self.entries.values().next().map(Vec::len) else {
            return Ok(());
        };

        let mut index = HNSWIndex::new(dimension, &HNSWParams::default());
        for (id, vector) in &self.entries {
            if vector.len() != dimension {
                warn!(id, "dimension mismatch, entry excluded from the built index");
                continue;
            }
            index
                .add(vector, self.slots.len())
                .map_err(|e| Error::Index(e.to_string()))?;
            self.slots.push(id.clone());
        }
        index
            .build(Metric::Euclidean)
            .map_err(|e| Error::Index(e.to_string()))?;

        index
            .dump(
                self.index_file(&dir)
                    .to_str()
                    .ok_or_else(|| Error::Index("non-utf8 index path".to_string()))?,
            )
            .map_err(|e| Error::Index(e.to_string()))?;
        let meta = IndexMeta {
            dimension,
            slots: self.slots.clone(),
            entries: self.entries.clone(),
        };
        fs::write(self.meta_file(&dir), serde_yaml::to_string(&meta)?)?;

        debug!(entries = self.slots.len(), dimension, "vector index rebuilt");
        self.hnsw = Some(index);
        Ok(())
    }

    /// Embed the query text and return the `k` nearest entries.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<Hit>> {
        let vector = self.embedder.embed(text).await?;
        Ok(self.query_vector(&normalize(vector), k))
    }

    /// Nearest neighbors for an already-normalized query vector, sorted by
    /// non-decreasing distance, at most `k` results.
    pub fn query_vector(&self, vector: &[f32], k: usize) -> Vec<Hit> {
        if let Some(hnsw) = &self.hnsw {
            let mut hits: Vec<Hit> = hnsw
                .search(vector, k)
                .into_iter()
                .filter_map(|slot| {
                    let id = self.slots.get(slot)?;
                    let stored = self.entries.get(id)?;
                    let similarity = cosine_similarity(vector, stored).clamp(0.0, 1.0);
                    Some(Hit {
                        process_id: id.clone(),
                        distance: 1.0 - similarity,
                        similarity,
                    })
                })
                .collect();
            hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
            return hits;
        }

        let mut hits: Vec<Hit> = self
            .entries
            .iter()
            .map(|(id, stored)| {
                let similarity = cosine_similarity(vector, stored).clamp(0.0, 1.0);
                Hit {
                    process_id: id.clone(),
                    distance: 1.0 - similarity,
                    similarity,
                }
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        hits
    }

    /// Cosine similarity between two stored entries, if both exist.
    /// Used by the recommender; no embedding call involved.
    pub fn similarity_between(&self, a: &str, b: &str) -> Option<f32> {
        let va = self.entries.get(a)?;
        let vb = self.entries.get(b)?;
        Some(cosine_similarity(va, vb))
    }

    fn index_file(&self, dir: &std::path::Path) -> PathBuf {
        dir.join(format!("{}_hnsw_index.bin", self.uuid()))
    }

    fn meta_file(&self, dir: &std::path::Path) -> PathBuf {
        dir.join(format!("{}_index_meta.yaml", self.uuid()))
    }

    fn uuid(&self) -> u64 {
        let digest = sha256::digest(self.name.clone());
        digest.as_bytes().iter().map(|b| *b as u64).sum()
    }
}

/// Cosine similarity: dot product over the product of norms.
/// Returns 0 on length mismatch or when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

fn normalize(vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vector;
    }
    vector.into_iter().map(|x| x / norm).collect()
}

fn check_writable(dir: &std::path::Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    let marker = dir.join(".write_check");
    fs::write(&marker, b"ok")?;
    fs::remove_file(&marker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn dummy_embedder() -> EmbeddingClient {
        EmbeddingClient::new(
            "http://127.0.0.1:9",
            "unused",
            "unused",
            Duration::from_millis(100),
        )
        .unwrap()
    }

    fn memory_index() -> ProcessIndex {
        ProcessIndex::open(dummy_embedder(), None, "test_index")
    }

    #[test]
    fn cosine_similarity_is_symmetric_and_self_is_one() {
        let a = vec![0.3, 0.7, 0.1];
        let b = vec![0.9, 0.2, 0.4];
        let ab = cosine_similarity(&a, &b);
        let ba = cosine_similarity(&b, &a);
        assert!((ab - ba).abs() < 1e-6);
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_zero_norm_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn query_vector_is_sorted_and_bounded_by_k() {
        let mut index = memory_index();
        index.upsert_vector("a", vec![1.0, 0.0, 0.0]);
        index.upsert_vector("b", vec![0.8, 0.6, 0.0]);
        index.upsert_vector("c", vec![0.0, 0.0, 1.0]);

        let hits = index.query_vector(&[1.0, 0.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].process_id, "a");
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[test]
    fn upsert_replaces_rather_than_duplicates() {
        let mut index = memory_index();
        index.upsert_vector("a", vec![1.0, 0.0]);
        index.upsert_vector("a", vec![0.0, 1.0]);
        assert_eq!(index.len(), 1);

        let hits = index.query_vector(&[0.0, 1.0], 1);
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn persistent_mode_builds_and_dumps_hnsw() {
        let tmp = TempDir::new().unwrap();
        let mut index = ProcessIndex::open(
            dummy_embedder(),
            Some(tmp.path().to_path_buf()),
            "persist_test",
        );
        index.upsert_vector("a", vec![1.0, 0.0, 0.0]);
        index.upsert_vector("b", vec![0.0, 1.0, 0.0]);
        index.upsert_vector("c", vec![0.0, 0.0, 1.0]);
        index.rebuild().unwrap();

        let hits = index.query_vector(&[0.9, 0.1, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].process_id, "a");
        assert!(hits[0].distance <= hits[1].distance);

        let files: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(files.iter().any(|f| f.ends_with("_hnsw_index.bin")));
        assert!(files.iter().any(|f| f.ends_with("_index_meta.yaml")));
    }

    #[test]
    fn persistent_mode_rehydrates_on_open() {
        let tmp = TempDir::new().unwrap();
        {
            let mut index = ProcessIndex::open(
                dummy_embedder(),
                Some(tmp.path().to_path_buf()),
                "rehydrate_test",
            );
            index.upsert_vector("a", vec![1.0, 0.0, 0.0]);
            index.upsert_vector("b", vec![0.0, 1.0, 0.0]);
            index.rebuild().unwrap();
        }

        // a fresh open must serve queries from the dump, with no embedding calls
        let reopened = ProcessIndex::open(
            dummy_embedder(),
            Some(tmp.path().to_path_buf()),
            "rehydrate_test",
        );
        assert_eq!(reopened.len(), 2);
        let hits = reopened.query_vector(&[0.9, 0.1, 0.0], 1);
        assert_eq!(hits[0].process_id, "a");
        assert!(reopened.similarity_between("a", "b").is_some());
    }

    #[test]
    fn corrupt_dump_starts_empty_instead_of_failing() {
        let tmp = TempDir::new().unwrap();
        {
            let mut index = ProcessIndex::open(
                dummy_embedder(),
                Some(tmp.path().to_path_buf()),
                "corrupt_test",
            );
            index.upsert_vector("a", vec![1.0, 0.0]);
            index.rebuild().unwrap();
        }
        // clobber the metadata; open must fall back to an empty index
        for entry in fs::read_dir(tmp.path()).unwrap() {
            let path = entry.unwrap().path();
            if path.to_string_lossy().ends_with("_index_meta.yaml") {
                fs::write(&path, "not: [valid").unwrap();
            }
        }

        let reopened = ProcessIndex::open(
            dummy_embedder(),
            Some(tmp.path().to_path_buf()),
            "corrupt_test",
        );
        assert!(reopened.is_empty());
    }

    #[test]
    fn remove_all_clears_entries_and_artifacts() {
        let tmp = TempDir::new().unwrap();
        let mut index = ProcessIndex::open(
            dummy_embedder(),
            Some(tmp.path().to_path_buf()),
            "clear_test",
        );
        index.upsert_vector("a", vec![1.0, 0.0]);
        index.upsert_vector("b", vec![0.0, 1.0]);
        index.rebuild().unwrap();

        index.remove_all();
        assert!(index.is_empty());
        assert!(index.query_vector(&[1.0, 0.0], 3).is_empty());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn unwritable_dir_degrades_to_memory_mode() {
        let mut index = ProcessIndex::open(
            dummy_embedder(),
            Some(PathBuf::from("/proc/definitely_not_writable/idx")),
            "degraded_test",
        );
        index.upsert_vector("a", vec![1.0, 0.0]);
        index.rebuild().unwrap();

        // still answers queries from the in-process table
        let hits = index.query_vector(&[1.0, 0.0], 1);
        assert_eq!(hits[0].process_id, "a");
    }

    #[tokio::test]
    async fn query_embeds_then_searches() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200)
                .json_body(serde_json::json!({"data": [{"embedding": [1.0, 0.0]}]}));
        });
        let embedder = EmbeddingClient::new(
            &server.base_url(),
            "k",
            "m",
            Duration::from_secs(5),
        )
        .unwrap();

        let mut index = ProcessIndex::open(embedder, None, "query_test");
        index.upsert_vector("near", vec![1.0, 0.0]);
        index.upsert_vector("far", vec![0.0, 1.0]);

        let hits = index.query("anything", 1).await.unwrap();
        assert_eq!(hits[0].process_id, "near");
    }

    #[tokio::test]
    async fn query_embedding_failure_is_an_error_not_a_panic() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(503);
        });
        let embedder = EmbeddingClient::new(
            &server.base_url(),
            "k",
            "m",
            Duration::from_secs(5),
        )
        .unwrap();

        let index = ProcessIndex::open(embedder, None, "fail_test");
        assert!(index.query("anything", 1).await.is_err());
    }
}
