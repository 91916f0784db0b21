//! Exact ID-mapped inner-product index with a single self-describing file.
//! The file is always replaced atomically (write to `<path>.tmp`, then
//! rename), so readers observe either the previous commit or the new one.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::IndexError;

const MAGIC: [u8; 8] = *b"RAGIDX01";

fn io_err(path: &Path, source: std::io::Error) -> IndexError {
    IndexError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Scale a vector to unit Euclidean norm. Zero vectors are left unchanged.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// In-memory flat index: one row per id, searched by brute-force inner
/// product. Row order is insertion order, which also breaks score ties.
#[derive(Debug, Clone)]
pub struct FlatIpIndex {
    dimension: usize,
    ids: Vec<i64>,
    vectors: Vec<f32>,
    pos: HashMap<i64, usize>,
}

impl FlatIpIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ids: Vec::new(),
            vectors: Vec::new(),
            pos: HashMap::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn ntotal(&self) -> usize {
        self.ids.len()
    }

    fn row(&self, at: usize) -> &[f32] {
        &self.vectors[at * self.dimension..(at + 1) * self.dimension]
    }

    /// Upsert one vector under `id`.
    pub fn add(&mut self, id: i64, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                file: vector.len(),
                expected: self.dimension,
            });
        }
        self.remove(&[id]);
        self.pos.insert(id, self.ids.len());
        self.ids.push(id);
        self.vectors.extend_from_slice(vector);
        Ok(())
    }

    /// Remove ids, ignoring ones not present. Returns how many were removed.
    pub fn remove(&mut self, ids: &[i64]) -> usize {
        let mut removed = 0usize;
        for &id in ids {
            let Some(at) = self.pos.remove(&id) else { continue };
            removed += 1;
            let last = self.ids.len() - 1;
            if at != last {
                let moved_id = self.ids[last];
                self.ids[at] = moved_id;
                let (head, tail) = self.vectors.split_at_mut(last * self.dimension);
                head[at * self.dimension..(at + 1) * self.dimension]
                    .copy_from_slice(&tail[..self.dimension]);
                self.pos.insert(moved_id, at);
            }
            self.ids.pop();
            self.vectors.truncate(self.ids.len() * self.dimension);
        }
        removed
    }

    /// Top-`k` rows by inner product, score-descending; ties keep insertion
    /// order (stable sort).
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(i64, f32)> {
        if k == 0 || self.ids.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(i64, f32)> = self
            .ids
            .iter()
            .enumerate()
            .map(|(at, &id)| {
                let dot = self
                    .row(at)
                    .iter()
                    .zip(query.iter())
                    .map(|(a, b)| a * b)
                    .sum::<f32>();
                (id, dot)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    /// Serialise to `<path>.tmp` and atomically rename over `path`.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| io_err(path, e))?;
            }
        }
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = std::path::PathBuf::from(tmp_name);
        {
            let file = File::create(&tmp).map_err(|e| io_err(&tmp, e))?;
            let mut w = BufWriter::new(file);
            w.write_all(&MAGIC).map_err(|e| io_err(&tmp, e))?;
            w.write_all(&(self.dimension as u32).to_le_bytes())
                .map_err(|e| io_err(&tmp, e))?;
            w.write_all(&(self.ids.len() as u64).to_le_bytes())
                .map_err(|e| io_err(&tmp, e))?;
            for (at, &id) in self.ids.iter().enumerate() {
                w.write_all(&id.to_le_bytes()).map_err(|e| io_err(&tmp, e))?;
                w.write_all(bytemuck::cast_slice(self.row(at)))
                    .map_err(|e| io_err(&tmp, e))?;
            }
            let file = w.into_inner().map_err(|e| io_err(&tmp, e.into()))?;
            file.sync_all().map_err(|e| io_err(&tmp, e))?;
        }
        std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let file = File::open(path).map_err(|e| io_err(path, e))?;
        let mut r = BufReader::new(file);

        let mut magic = [0u8; 8];
        r.read_exact(&mut magic).map_err(|e| io_err(path, e))?;
        if magic != MAGIC {
            return Err(IndexError::Corrupt("bad magic".into()));
        }
        let mut dim_bytes = [0u8; 4];
        r.read_exact(&mut dim_bytes).map_err(|e| io_err(path, e))?;
        let dimension = u32::from_le_bytes(dim_bytes) as usize;
        if dimension == 0 {
            return Err(IndexError::Corrupt("zero dimension".into()));
        }
        let mut count_bytes = [0u8; 8];
        r.read_exact(&mut count_bytes).map_err(|e| io_err(path, e))?;
        let count = u64::from_le_bytes(count_bytes) as usize;

        let mut index = FlatIpIndex::new(dimension);
        let mut row_bytes = vec![0u8; dimension * 4];
        for _ in 0..count {
            let mut id_bytes = [0u8; 8];
            r.read_exact(&mut id_bytes).map_err(|e| io_err(path, e))?;
            r.read_exact(&mut row_bytes).map_err(|e| io_err(path, e))?;
            let id = i64::from_le_bytes(id_bytes);
            let row: Vec<f32> = bytemuck::pod_collect_to_vec(&row_bytes);
            index.add(id, &row)?;
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_replaces_the_previous_vector() {
        let mut idx = FlatIpIndex::new(2);
        idx.add(1, &[1.0, 0.0]).unwrap();
        idx.add(1, &[0.0, 1.0]).unwrap();
        assert_eq!(idx.ntotal(), 1);
        let hits = idx.search(&[0.0, 1.0], 1);
        assert_eq!(hits[0].0, 1);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn remove_keeps_remaining_rows_searchable() {
        let mut idx = FlatIpIndex::new(2);
        idx.add(1, &[1.0, 0.0]).unwrap();
        idx.add(2, &[0.0, 1.0]).unwrap();
        idx.add(3, &[0.7, 0.7]).unwrap();
        assert_eq!(idx.remove(&[1, 99]), 1);
        assert_eq!(idx.ntotal(), 2);
        let hits = idx.search(&[1.0, 0.0], 3);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 3);
        assert_eq!(hits[1].0, 2);
    }

    #[test]
    fn remove_on_empty_index_is_not_an_error() {
        let mut idx = FlatIpIndex::new(4);
        assert_eq!(idx.remove(&[5, 6]), 0);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.index");
        let mut idx = FlatIpIndex::new(3);
        idx.add(10, &[1.0, 0.0, 0.0]).unwrap();
        idx.add(20, &[0.0, 1.0, 0.0]).unwrap();
        idx.save(&path).unwrap();

        let loaded = FlatIpIndex::load(&path).unwrap();
        assert_eq!(loaded.dimension(), 3);
        assert_eq!(loaded.ntotal(), 2);
        let hits = loaded.search(&[0.0, 1.0, 0.0], 1);
        assert_eq!(hits[0].0, 20);
        // No stray temp file left behind.
        assert!(!dir.path().join("chunks.index.tmp").exists());
    }

    #[test]
    fn load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.index");
        std::fs::write(&path, b"not an index at all").unwrap();
        assert!(matches!(
            FlatIpIndex::load(&path),
            Err(IndexError::Corrupt(_)) | Err(IndexError::Io { .. })
        ));
    }

    #[test]
    fn normalization_produces_unit_vectors() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let mut idx = FlatIpIndex::new(2);
        idx.add(7, &[1.0, 0.0]).unwrap();
        idx.add(3, &[1.0, 0.0]).unwrap();
        let hits = idx.search(&[1.0, 0.0], 2);
        assert_eq!(hits[0].0, 7);
        assert_eq!(hits[1].0, 3);
    }
}
