//! Publishing symbol summaries into the cache.
//!
//! Two producers feed the cache: a single-threaded pre-scan that strips
//! summaries out of external classpath entries before any runner starts, and
//! the per-project export that the runner triggers the moment its front end
//! crosses the summary-materialization boundary.

use std::collections::HashSet;
use std::fs;
use std::time::Instant;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::write::GzEncoder;

use crate::cache::PickleCache;
use crate::project::Project;
use crate::toolchain::{Pickle, Toolchain};
use crate::utils::as_overhead;

/// Extension of exported summary files.
pub const SIG_EXT: &str = "sig";

/// Strips summaries out of every stale external classpath entry. Runs before
/// any project; a failure here aborts the whole run.
pub(crate) fn pre_extract_external(
    cache: &PickleCache,
    toolchain: &dyn Toolchain,
    entries: &[Utf8PathBuf],
) -> anyhow::Result<()> {
    let start = Instant::now();
    let mut exported = 0usize;

    for entry in entries {
        if cache.is_fresh(entry) {
            tracing::debug!("summaries for '{entry}' are up to date");
            cache.adopt(entry);
            continue;
        }
        let artifact = cache.artifact_path(entry);
        if let Some(parent) = artifact.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating cache directory for '{entry}'"))?;
        }
        toolchain
            .strip_pickles(entry, &artifact)
            .with_context(|| format!("stripping summaries out of '{entry}'"))?;
        cache.publish(entry, &artifact)?;
        exported += 1;
    }

    if exported > 0 {
        tracing::info!(
            "Exported pickles for {exported} external classpath entries {}",
            as_overhead(start)
        );
    }
    Ok(())
}

/// Writes the project's summary table into its cached artifact, one `.sig`
/// file per symbol under the symbol's ownership chain, and publishes it.
pub(crate) fn export_pickles(
    cache: &PickleCache,
    project: &Project,
    pickles: &[Pickle],
) -> anyhow::Result<()> {
    project.pickle_export_timer.start()?;
    let artifact = cache.artifact_path(&project.output_dir);

    // Deterministic on a given input.
    let mut ordered: Vec<&Pickle> = pickles.iter().collect();
    ordered.sort_by(|a, b| (&a.owners, &a.name).cmp(&(&b.owners, &b.name)));

    // Buffers are deduplicated by identity; a shared buffer is written once.
    let mut seen: HashSet<usize> = HashSet::new();
    let unique: Vec<&Pickle> = ordered
        .into_iter()
        .filter(|p| seen.insert(p.bytes.as_ptr() as usize))
        .collect();

    if cache.uses_archive() {
        write_archive(&artifact, &unique)?;
    } else {
        write_tree(&artifact, &unique)?;
    }

    cache.publish(&project.output_dir, &artifact)?;
    project.pickle_export_timer.stop()?;
    Ok(())
}

fn sig_rel_path(pickle: &Pickle) -> Utf8PathBuf {
    let mut path = Utf8PathBuf::new();
    for owner in &pickle.owners {
        path.push(owner);
    }
    path.push(format!("{}.{SIG_EXT}", pickle.name));
    path
}

fn write_tree(root: &Utf8Path, pickles: &[&Pickle]) -> anyhow::Result<()> {
    for pickle in pickles {
        let path = root.join(sig_rel_path(pickle));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &pickle.bytes)
            .with_context(|| format!("writing summary '{path}'"))?;
    }
    // An empty table still publishes an (empty) artifact directory.
    fs::create_dir_all(root)?;
    Ok(())
}

fn write_archive(artifact: &Utf8Path, pickles: &[&Pickle]) -> anyhow::Result<()> {
    if let Some(parent) = artifact.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(artifact)
        .with_context(|| format!("creating summary archive '{artifact}'"))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for pickle in pickles {
        let mut header = tar::Header::new_gnu();
        header.set_size(pickle.bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, sig_rel_path(pickle), &pickle.bytes[..])?;
    }

    builder.into_inner()?.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Settings;
    use crate::toolchain::fake::{FakeToolchain, pickle};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn utf8(path: std::path::PathBuf) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(path).unwrap()
    }

    fn cache_in(dir: &TempDir, archive: bool) -> PickleCache {
        PickleCache::new(Some(utf8(dir.path().join("cache"))), archive).unwrap()
    }

    fn project_with_output(dir: &TempDir) -> Project {
        let out = utf8(dir.path().join("out"));
        fs::create_dir_all(&out).unwrap();
        Project::new(
            Settings {
                label: "p".into(),
                output_dir: out,
                ..Settings::default()
            },
            true,
        )
    }

    #[test]
    fn test_pre_extract_reuses_fresh_artifacts() {
        let dir = TempDir::new().unwrap();
        let entry = utf8(dir.path().join("dep.jar"));
        fs::write(&entry, b"bytecode").unwrap();
        let entries = vec![entry.clone()];

        let cache = cache_in(&dir, false);
        let toolchain = FakeToolchain::new();

        pre_extract_external(&cache, &toolchain, &entries).unwrap();
        assert_eq!(
            toolchain
                .strip_count
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );
        assert_ne!(cache.substitute(&entry), entry);

        // The artifact carries the source's mtime, so a rerun extracts
        // nothing.
        pre_extract_external(&cache, &toolchain, &entries).unwrap();
        assert_eq!(
            toolchain
                .strip_count
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );
        assert_ne!(cache.substitute(&entry), entry);
    }

    #[test]
    fn test_export_writes_ownership_tree() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, false);
        let project = project_with_output(&dir);

        let pickles = vec![
            pickle(&["com", "acme"], "Widget", b"widget-sig"),
            pickle(&["com"], "Root", b"root-sig"),
        ];
        export_pickles(&cache, &project, &pickles).unwrap();

        let artifact = cache.artifact_path(&project.output_dir);
        assert!(artifact.join("com/acme/Widget.sig").is_file());
        assert!(artifact.join("com/Root.sig").is_file());
        assert!(project.pickle_export_timer.is_stopped());
        assert!(cache.is_fresh(&project.output_dir));
        assert_eq!(cache.substitute(&project.output_dir), artifact);
    }

    #[test]
    fn test_export_dedups_shared_buffers() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, false);
        let project = project_with_output(&dir);

        let shared: Arc<[u8]> = Arc::from(&b"shared"[..]);
        let first = Pickle {
            owners: vec!["pkg".into()],
            name: "A".into(),
            bytes: shared.clone(),
        };
        let alias = Pickle {
            owners: vec!["pkg".into()],
            name: "B".into(),
            bytes: shared,
        };
        export_pickles(&cache, &project, &[first, alias]).unwrap();

        let artifact = cache.artifact_path(&project.output_dir);
        assert!(artifact.join("pkg/A.sig").is_file());
        assert!(!artifact.join("pkg/B.sig").exists());
    }

    #[test]
    fn test_export_archive_layout() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, true);
        let project = project_with_output(&dir);

        let pickles = vec![pickle(&["pkg"], "Sym", b"sig-bytes")];
        export_pickles(&cache, &project, &pickles).unwrap();

        let artifact = cache.artifact_path(&project.output_dir);
        assert!(artifact.as_str().ends_with(".tgz"));

        let file = fs::File::open(&artifact).unwrap();
        let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["pkg/Sym.sig".to_string()]);
    }
}
