//! Storage for bootstrap null arrays.
//!
//! The permutation bootstrap is the expensive part of a test. A null array
//! depends on the sample size m (and on the kernel blocks, which the caller
//! is expected to hold fixed for a given m). A [`NullCache`] lets callers
//! reuse one across runs. [`crate::bootstrap_run`] only reads from a cache;
//! storing a fresh array is a separate [`crate::BootstrapRun::persist`] call.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::{Error, Result};

/// Keyed store of bootstrap null arrays, keyed by sample size m.
pub trait NullCache {
    /// Stored null array for sample size `m`, if any.
    fn get(&self, m: usize) -> Result<Option<Vec<f64>>>;

    /// Store `null` for sample size `m`, replacing any previous entry.
    fn put(&mut self, m: usize, null: &[f64]) -> Result<()>;
}

/// In-process cache.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: HashMap<usize, Vec<f64>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl NullCache for MemoryCache {
    fn get(&self, m: usize) -> Result<Option<Vec<f64>>> {
        Ok(self.entries.get(&m).cloned())
    }

    fn put(&mut self, m: usize, null: &[f64]) -> Result<()> {
        self.entries.insert(m, null.to_vec());
        Ok(())
    }
}

/// Plain-text cache: one file `mmdTestThresh{m}.txt` per sample size inside
/// `dir`, one real number per line.
///
/// Writes go to a temporary file in the same directory and are renamed into
/// place, so concurrent readers see either the old or the new array.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File holding the null array for sample size `m`.
    pub fn path_for(&self, m: usize) -> PathBuf {
        self.dir.join(format!("mmdTestThresh{m}.txt"))
    }
}

fn parse_null_array(path: &Path, text: &str) -> Result<Vec<f64>> {
    let malformed = |reason: String| Error::CacheRead {
        path: path.to_path_buf(),
        reason,
    };

    let mut null = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: f64 = line
            .parse()
            .map_err(|e| malformed(format!("line {}: {e}", lineno + 1)))?;
        if !value.is_finite() {
            return Err(malformed(format!("line {}: non-finite value", lineno + 1)));
        }
        null.push(value);
    }

    if null.is_empty() {
        return Err(malformed("no samples".to_string()));
    }
    Ok(null)
}

impl NullCache for FileCache {
    fn get(&self, m: usize) -> Result<Option<Vec<f64>>> {
        let path = self.path_for(m);
        match fs::read_to_string(&path) {
            Ok(text) => parse_null_array(&path, &text).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::CacheRead {
                path,
                reason: e.to_string(),
            }),
        }
    }

    fn put(&mut self, m: usize, null: &[f64]) -> Result<()> {
        let mut text = String::with_capacity(null.len() * 24);
        for value in null {
            text.push_str(&format!("{value:e}\n"));
        }

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(text.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path_for(m)).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_cache() {
        let mut cache = MemoryCache::new();
        assert!(cache.is_empty());
        assert_eq!(cache.get(3).unwrap(), None);

        cache.put(3, &[0.5, 1.5]).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(3).unwrap(), Some(vec![0.5, 1.5]));
        assert_eq!(cache.get(4).unwrap(), None);
    }

    #[test]
    fn test_file_name_follows_sample_size() {
        let cache = FileCache::new("/tmp/nulls");
        assert_eq!(cache.path_for(50), PathBuf::from("/tmp/nulls/mmdTestThresh50.txt"));
    }

    #[test]
    fn test_parse_accepts_scientific_lines() {
        let path = Path::new("mmdTestThresh2.txt");
        let null = parse_null_array(path, "1.000000000000000000e+00\n  2.5e-1 \n\n3\n").unwrap();
        assert_eq!(null, vec![1.0, 0.25, 3.0]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let path = Path::new("mmdTestThresh2.txt");
        let err = parse_null_array(path, "1.0\nabc\n").unwrap_err();
        match err {
            Error::CacheRead { reason, .. } => assert!(reason.starts_with("line 2")),
            other => panic!("unexpected error: {other}"),
        }

        assert!(matches!(
            parse_null_array(path, "\n \n"),
            Err(Error::CacheRead { .. })
        ));
        assert!(matches!(
            parse_null_array(path, "NaN\n"),
            Err(Error::CacheRead { .. })
        ));
    }
}
