//! The on-disk cache of exported symbol summaries.
//!
//! The cache maps a source path (an output directory of some project, or an
//! external classpath entry) to the artifact holding only its exported
//! summaries. Downstream front ends get the artifact substituted onto their
//! search path in place of the real output, which is what lets them start
//! before the upstream's object code exists.

use std::collections::HashMap;
use std::fs;
use std::sync::Mutex;
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

use crate::error::CacheError;

pub struct PickleCache {
    root: Utf8PathBuf,
    archive: bool,
    entries: Mutex<HashMap<Utf8PathBuf, Utf8PathBuf>>,
    /// Owns the root directory when no persistent location was configured;
    /// dropping it removes the cache on exit.
    _temp: Option<TempDir>,
}

impl PickleCache {
    /// Opens the cache at `root`, or under a freshly allocated temporary
    /// directory (removed on drop) when no location is configured.
    pub fn new(root: Option<Utf8PathBuf>, archive: bool) -> Result<Self, CacheError> {
        let (root, temp) = match root {
            Some(root) => {
                fs::create_dir_all(&root).map_err(CacheError::Root)?;
                (root, None)
            }
            None => {
                let temp = TempDir::new().map_err(CacheError::Root)?;
                let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf())
                    .map_err(|_| CacheError::Root(std::io::Error::other("non-UTF-8 temp dir")))?;
                (root, Some(temp))
            }
        };

        Ok(Self {
            root,
            archive,
            entries: Mutex::new(HashMap::new()),
            _temp: temp,
        })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn uses_archive(&self) -> bool {
        self.archive
    }

    /// Deterministic location of the summary artifact for `source`: the
    /// normalized source path mirrored under the cache root, with an archive
    /// suffix under the archive layout.
    pub fn artifact_path(&self, source: &Utf8Path) -> Utf8PathBuf {
        let mirrored = source.as_str().trim_start_matches('/');
        let path = self.root.join(mirrored);
        if self.archive {
            Utf8PathBuf::from(format!("{path}.tgz"))
        } else {
            path
        }
    }

    /// Records `source → artifact` and stamps the artifact's modification
    /// time with the source's, so a later run can tell the artifact is still
    /// authoritative without rebuilding it.
    pub fn publish(&self, source: &Utf8Path, artifact: &Utf8Path) -> Result<(), CacheError> {
        let mtime = modified(source).map_err(|source_err| CacheError::Stamp {
            path: source.to_owned(),
            source: source_err,
        })?;
        let file = fs::File::open(artifact).map_err(|source_err| CacheError::Stamp {
            path: artifact.to_owned(),
            source: source_err,
        })?;
        file.set_modified(mtime)
            .map_err(|source_err| CacheError::Stamp {
                path: artifact.to_owned(),
                source: source_err,
            })?;

        let mut entries = self.entries.lock().unwrap();
        entries.insert(source.to_owned(), artifact.to_owned());
        Ok(())
    }

    /// Records the mapping for a source whose cached artifact is already
    /// fresh, without touching the artifact.
    pub fn adopt(&self, source: &Utf8Path) {
        let artifact = self.artifact_path(source);
        let mut entries = self.entries.lock().unwrap();
        entries.insert(source.to_owned(), artifact);
    }

    /// Returns the cached artifact for a classpath entry if one was
    /// published, otherwise the entry unchanged.
    pub fn substitute(&self, entry: &Utf8Path) -> Utf8PathBuf {
        let entries = self.entries.lock().unwrap();
        match entries.get(entry) {
            Some(cached) => cached.clone(),
            None => entry.to_owned(),
        }
    }

    /// Presence + equal mtime means the cached artifact is authoritative and
    /// need not be rebuilt.
    pub fn is_fresh(&self, source: &Utf8Path) -> bool {
        let artifact = self.artifact_path(source);
        match (modified(&artifact), modified(source)) {
            (Ok(cached), Ok(current)) => cached == current,
            _ => false,
        }
    }
}

fn modified(path: &Utf8Path) -> std::io::Result<SystemTime> {
    fs::metadata(path)?.modified()
}
