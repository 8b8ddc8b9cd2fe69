//! Subprocess-backed toolchain.
//!
//! The binary drives real command-line tools through this module. The
//! front-end command is expected to write its summary files (`.sig`) into
//! the output directory and announce the phase boundary by printing
//! [`PICKLES_READY_MARKER`] on stdout; everything after that line is plain
//! compiler output and gets echoed. The secondary compiler is `javac`-shaped
//! (`-d`, `-cp`, source files, exit status) and the pickle extractor is
//! invoked as `cmd <input> <output>`.

use std::fs;
use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use std::sync::Arc;

use anyhow::{Context, bail};
use camino::{Utf8Path, Utf8PathBuf};
use walkdir::WalkDir;

use crate::export::SIG_EXT;
use crate::toolchain::{Frontend, FrontendConfig, Pickle, Toolchain};

/// Stdout line with which the front-end command announces that symbol
/// summaries are materialized.
pub const PICKLES_READY_MARKER: &str = "pickles-ready";

pub struct ExecToolchain {
    frontend: Vec<String>,
    javac: Vec<String>,
    strip: Option<Vec<String>>,
}

impl ExecToolchain {
    /// `frontend` and `javac` are command lines (program + leading
    /// arguments); `strip` may be absent when no external classpath needs
    /// extraction.
    pub fn new(frontend: Vec<String>, javac: Vec<String>, strip: Option<Vec<String>>) -> Self {
        Self {
            frontend,
            javac,
            strip,
        }
    }
}

impl Toolchain for ExecToolchain {
    fn new_frontend(&self, config: FrontendConfig<'_>) -> anyhow::Result<Box<dyn Frontend>> {
        if self.frontend.is_empty() {
            bail!("no front-end command configured (--frontend-cmd)");
        }
        Ok(Box::new(ExecFrontend {
            argv: self.frontend.clone(),
            label: config.label.to_string(),
            output_dir: config.output_dir.to_owned(),
            classpath: config.classpath.to_vec(),
            macro_classpath: config.macro_classpath.to_vec(),
            plugin_classpath: config.plugin_classpath.to_vec(),
            extra_args: config.extra_args.to_vec(),
            cache_macro_classloader: config.cache_macro_classloader,
            cache_plugin_classloader: config.cache_plugin_classloader,
            errors: false,
        }))
    }

    fn compile_java(
        &self,
        output_dir: &Utf8Path,
        classpath: &[Utf8PathBuf],
        files: &[Utf8PathBuf],
    ) -> anyhow::Result<bool> {
        let mut cmd = command(&self.javac)?;
        cmd.arg("-d").arg(output_dir);
        if !classpath.is_empty() {
            cmd.arg("-cp").arg(join_classpath(classpath));
        }
        cmd.args(files.iter().map(|p| p.as_str()));
        let status = cmd
            .status()
            .with_context(|| format!("running the secondary compiler for '{output_dir}'"))?;
        Ok(status.success())
    }

    fn strip_pickles(&self, input: &Utf8Path, output: &Utf8Path) -> anyhow::Result<()> {
        let argv = self
            .strip
            .as_ref()
            .context("no pickle extractor configured (--strip-cmd)")?;
        let status = command(argv)?
            .arg(input)
            .arg(output)
            .status()
            .with_context(|| format!("running the pickle extractor on '{input}'"))?;
        if !status.success() {
            bail!("pickle extractor failed on '{input}'");
        }
        Ok(())
    }
}

struct ExecFrontend {
    argv: Vec<String>,
    label: String,
    output_dir: Utf8PathBuf,
    classpath: Vec<Utf8PathBuf>,
    macro_classpath: Vec<Utf8PathBuf>,
    plugin_classpath: Vec<Utf8PathBuf>,
    extra_args: Vec<String>,
    cache_macro_classloader: bool,
    cache_plugin_classloader: bool,
    errors: bool,
}

impl Frontend for ExecFrontend {
    fn compile(
        &mut self,
        files: &[Utf8PathBuf],
        on_pickles: &mut dyn FnMut(&[Pickle]),
    ) -> anyhow::Result<()> {
        let mut cmd = command(&self.argv)?;
        cmd.args(&self.extra_args);
        if self.cache_macro_classloader {
            cmd.arg("-cache-macro-classloader");
        }
        if self.cache_plugin_classloader {
            cmd.arg("-cache-plugin-classloader");
        }
        cmd.arg("-d").arg(&self.output_dir);
        if !self.classpath.is_empty() {
            cmd.arg("-classpath").arg(join_classpath(&self.classpath));
        }
        if !self.macro_classpath.is_empty() {
            cmd.arg("-macro-classpath")
                .arg(join_classpath(&self.macro_classpath));
        }
        if !self.plugin_classpath.is_empty() {
            cmd.arg("-plugin-classpath")
                .arg(join_classpath(&self.plugin_classpath));
        }
        cmd.args(files.iter().map(|p| p.as_str()));
        cmd.stdout(Stdio::piped());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning the front end for '{}'", self.label))?;
        let stdout = child.stdout.take().context("front-end stdout unavailable")?;
        for line in BufReader::new(stdout).lines() {
            let line = line?;
            if line.trim() == PICKLES_READY_MARKER {
                let pickles = collect_sigs(&self.output_dir)?;
                on_pickles(&pickles);
            } else {
                tracing::info!("[{}] {line}", self.label);
            }
        }

        let status = child.wait()?;
        self.errors = !status.success();
        Ok(())
    }

    fn has_errors(&self) -> bool {
        self.errors
    }

    fn close(&mut self) {}
}

fn command(argv: &[String]) -> anyhow::Result<Command> {
    let (program, args) = argv.split_first().context("empty command line")?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

fn join_classpath(entries: &[Utf8PathBuf]) -> String {
    entries
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(":")
}

/// Reassembles the symbol table from the `.sig` files the front end wrote
/// under its output directory; the relative directory chain is the symbol's
/// ownership chain.
fn collect_sigs(output_dir: &Utf8Path) -> anyhow::Result<Vec<Pickle>> {
    let mut pickles = Vec::new();
    for entry in WalkDir::new(output_dir).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(path) = Utf8PathBuf::from_path_buf(entry.into_path()) else {
            continue;
        };
        if path.extension() != Some(SIG_EXT) {
            continue;
        }
        let rel = path
            .strip_prefix(output_dir)
            .with_context(|| format!("summary file '{path}' outside the output directory"))?;
        let owners: Vec<String> = rel
            .parent()
            .map(|p| p.components().map(|c| c.as_str().to_string()).collect())
            .unwrap_or_default();
        let name = rel.file_stem().unwrap_or_default().to_string();
        let bytes: Arc<[u8]> = Arc::from(fs::read(&path)?);
        pickles.push(Pickle {
            owners,
            name,
            bytes,
        });
    }
    pickles.sort_by(|a, b| (&a.owners, &a.name).cmp(&(&b.owners, &b.name)));
    Ok(pickles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_join_classpath() {
        let entries = vec![Utf8PathBuf::from("/a"), Utf8PathBuf::from("/b/c.jar")];
        assert_eq!(join_classpath(&entries), "/a:/b/c.jar");
    }

    #[test]
    fn test_collect_sigs() {
        let dir = TempDir::new().unwrap();
        let out = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(out.join("com/acme")).unwrap();
        fs::write(out.join("com/acme/Widget.sig"), b"w").unwrap();
        fs::write(out.join("Root.sig"), b"r").unwrap();
        fs::write(out.join("com/acme/Widget.class"), b"ignored").unwrap();

        let pickles = collect_sigs(&out).unwrap();
        assert_eq!(pickles.len(), 2);
        assert_eq!(pickles[0].name, "Root");
        assert!(pickles[0].owners.is_empty());
        assert_eq!(pickles[1].name, "Widget");
        assert_eq!(pickles[1].owners, vec!["com".to_string(), "acme".into()]);
    }
}
