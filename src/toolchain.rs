//! Contracts of the wrapped compilers.
//!
//! The driver treats the front end, the secondary-language compiler and the
//! pickle extractor as black boxes behind these traits. The front end's
//! phase-advance observation is a callback: `compile` invokes `on_pickles`
//! once, at the boundary after which all symbol summaries are materialized,
//! carrying the summary table.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

/// One exported symbol summary.
///
/// `owners` is the symbol's ownership chain, outermost first; it becomes the
/// directory hierarchy of the exported artifact. Identical summary buffers
/// share one `Arc`, and the exporter writes each buffer exactly once.
#[derive(Debug, Clone)]
pub struct Pickle {
    pub owners: Vec<String>,
    pub name: String,
    pub bytes: Arc<[u8]>,
}

/// Everything a front end needs to construct itself for one project.
///
/// `classpath` is already substituted through the summary cache when the
/// pipeline strategy is active.
#[derive(Debug)]
pub struct FrontendConfig<'a> {
    pub label: &'a str,
    pub output_dir: &'a Utf8Path,
    pub classpath: &'a [Utf8PathBuf],
    pub macro_classpath: &'a [Utf8PathBuf],
    pub plugin_classpath: &'a [Utf8PathBuf],
    pub extra_args: &'a [String],
    pub cache_macro_classloader: bool,
    pub cache_plugin_classloader: bool,
}

/// A constructed front-end instance, good for one project.
pub trait Frontend: Send {
    /// Runs the front end over `files`.
    ///
    /// `on_pickles` fires at most once, when the run crosses the
    /// summary-materialization phase boundary. An `Err` is an internal
    /// failure; ordinary compile errors are reported via [`has_errors`]
    /// after the run returns `Ok`.
    ///
    /// [`has_errors`]: Frontend::has_errors
    fn compile(
        &mut self,
        files: &[Utf8PathBuf],
        on_pickles: &mut dyn FnMut(&[Pickle]),
    ) -> anyhow::Result<()>;

    fn has_errors(&self) -> bool;

    /// Releases the instance. Called exactly once by the runner.
    fn close(&mut self);
}

/// Factory for the external tools of one build.
pub trait Toolchain: Send + Sync {
    fn new_frontend(&self, config: FrontendConfig<'_>) -> anyhow::Result<Box<dyn Frontend>>;

    /// Compiles secondary-language sources into `output_dir`. Returns the
    /// compiler's boolean verdict.
    fn compile_java(
        &self,
        output_dir: &Utf8Path,
        classpath: &[Utf8PathBuf],
        files: &[Utf8PathBuf],
    ) -> anyhow::Result<bool>;

    /// Reads `input` and writes a summary-only artifact at `output`.
    fn strip_pickles(&self, input: &Utf8Path, output: &Utf8Path) -> anyhow::Result<()>;
}

#[cfg(test)]
pub(crate) mod fake {
    //! A synthetic toolchain for scheduler tests: per-project scripted
    //! delays, pickles and failures, plus a shared event log the tests
    //! assert ordering on.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;

    #[derive(Debug, Clone)]
    pub(crate) struct FakeSpec {
        /// Sleep before the pickle boundary.
        pub outline_ms: u64,
        /// Sleep between the boundary and the end of the run.
        pub body_ms: u64,
        /// Fires the boundary callback with these pickles.
        pub pickles: Vec<Pickle>,
        /// Whether the boundary fires at all.
        pub emit_pickles: bool,
        /// Report compile errors at the end of the run.
        pub fail: bool,
        /// Never return from the compile (stall scenarios).
        pub hang: bool,
    }

    impl Default for FakeSpec {
        fn default() -> Self {
            Self {
                outline_ms: 0,
                body_ms: 0,
                pickles: vec![pickle(&["pkg"], "Sym", b"sig")],
                emit_pickles: true,
                fail: false,
                hang: false,
            }
        }
    }

    pub(crate) fn pickle(owners: &[&str], name: &str, bytes: &[u8]) -> Pickle {
        Pickle {
            owners: owners.iter().map(|s| s.to_string()).collect(),
            name: name.to_string(),
            bytes: Arc::from(bytes),
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeToolchain {
        specs: Mutex<HashMap<String, FakeSpec>>,
        log: Arc<Mutex<Vec<String>>>,
        pub(crate) strip_count: AtomicUsize,
    }

    impl FakeToolchain {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn with(self, label: &str, spec: FakeSpec) -> Self {
            self.specs.lock().unwrap().insert(label.to_string(), spec);
            self
        }

        pub(crate) fn events(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        /// Position of `event` in the recorded timeline.
        pub(crate) fn position(&self, event: &str) -> Option<usize> {
            self.events().iter().position(|e| e == event)
        }

        fn record(&self, event: String) {
            self.log.lock().unwrap().push(event);
        }
    }

    impl Toolchain for FakeToolchain {
        fn new_frontend(&self, config: FrontendConfig<'_>) -> anyhow::Result<Box<dyn Frontend>> {
            let spec = self
                .specs
                .lock()
                .unwrap()
                .get(config.label)
                .cloned()
                .unwrap_or_default();
            Ok(Box::new(FakeFrontend {
                label: config.label.to_string(),
                spec,
                log: self.log.clone(),
                errors: false,
            }))
        }

        fn compile_java(
            &self,
            output_dir: &Utf8Path,
            _classpath: &[Utf8PathBuf],
            _files: &[Utf8PathBuf],
        ) -> anyhow::Result<bool> {
            self.record(format!("javac:{}", output_dir.file_name().unwrap_or("?")));
            std::thread::sleep(Duration::from_millis(2));
            Ok(true)
        }

        fn strip_pickles(&self, _input: &Utf8Path, output: &Utf8Path) -> anyhow::Result<()> {
            self.strip_count.fetch_add(1, Ordering::SeqCst);
            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(output, b"stripped")?;
            Ok(())
        }
    }

    struct FakeFrontend {
        label: String,
        spec: FakeSpec,
        log: Arc<Mutex<Vec<String>>>,
        errors: bool,
    }

    impl FakeFrontend {
        fn record(&self, event: &str) {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{event}", self.label));
        }
    }

    impl Frontend for FakeFrontend {
        fn compile(
            &mut self,
            _files: &[Utf8PathBuf],
            on_pickles: &mut dyn FnMut(&[Pickle]),
        ) -> anyhow::Result<()> {
            self.record("start");
            if self.spec.hang {
                loop {
                    std::thread::sleep(Duration::from_secs(3600));
                }
            }
            std::thread::sleep(Duration::from_millis(self.spec.outline_ms));
            if self.spec.emit_pickles {
                self.record("pickles");
                on_pickles(&self.spec.pickles);
            }
            std::thread::sleep(Duration::from_millis(self.spec.body_ms));
            if self.spec.fail {
                self.errors = true;
            }
            self.record("end");
            Ok(())
        }

        fn has_errors(&self) -> bool {
            self.errors
        }

        fn close(&mut self) {
            self.record("close");
        }
    }
}
