//! Per-project stage execution.
//!
//! A [`Runner`] owns one project's sub-operations: the pickled compile that
//! resolves the outline signal mid-run, the plain per-group compile for
//! leaves, and the secondary-language compile. Every completion helper is
//! idempotent — a signal completes at most once, and only the winning
//! completion emits a monitor event — which is what makes failure paths safe
//! to layer over the regular ones.

use std::panic::AssertUnwindSafe;

use camino::Utf8PathBuf;
use crossbeam_channel::Sender;

use crate::cache::PickleCache;
use crate::error::{Outcome, TaskError};
use crate::export;
use crate::project::{Group, Project};
use crate::toolchain::{Frontend, FrontendConfig, Toolchain};
use crate::{Options, Strategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Outline,
    Group(usize),
    Javac,
}

/// Sent to the scheduler's monitor when a signal completes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BuildEvent {
    pub project: usize,
    pub stage: Stage,
    pub failed: bool,
}

pub(crate) struct Runner<'a> {
    pub id: usize,
    pub projects: &'a [Project],
    pub cache: &'a PickleCache,
    pub toolchain: &'a dyn Toolchain,
    pub pool: &'a rayon::ThreadPool,
    pub options: &'a Options,
    pub events: Sender<BuildEvent>,
}

impl<'a> Runner<'a> {
    pub(crate) fn project(&self) -> &'a Project {
        &self.projects[self.id]
    }

    pub(crate) fn complete_outline(&self, outcome: Outcome) {
        let failed = outcome.is_err();
        if self.project().outline_done.complete(outcome) {
            self.notify(Stage::Outline, failed);
        }
    }

    pub(crate) fn complete_group(&self, index: usize, outcome: Outcome) {
        let failed = outcome.is_err();
        if self.project().groups[index].done.complete(outcome) {
            self.notify(Stage::Group(index), failed);
        }
    }

    pub(crate) fn complete_javac(&self, outcome: Outcome) {
        let failed = outcome.is_err();
        if self.project().javac_done.complete(outcome) {
            self.notify(Stage::Javac, failed);
        }
    }

    fn notify(&self, stage: Stage, failed: bool) {
        let _ = self.events.send(BuildEvent {
            project: self.id,
            stage,
            failed,
        });
    }

    /// Records `err` into every not-yet-completed signal of the project.
    pub(crate) fn fail_all(&self, err: &TaskError) {
        self.complete_outline(Err(err.clone()));
        for index in 0..self.project().groups.len() {
            self.complete_group(index, Err(err.clone()));
        }
        self.complete_javac(Err(err.clone()));
    }

    /// Constructs a front end for this project. Under the pipeline strategy
    /// the classpath is first substituted through the summary cache, so the
    /// front end reads summaries instead of real classfiles.
    fn new_frontend(&self) -> anyhow::Result<Box<dyn Frontend>> {
        let project = self.project();
        let classpath: Vec<Utf8PathBuf> = match self.options.strategy {
            Strategy::Pipeline => project
                .classpath
                .iter()
                .map(|entry| self.cache.substitute(entry))
                .collect(),
            Strategy::Traditional => project.classpath.clone(),
        };
        self.toolchain.new_frontend(FrontendConfig {
            label: &project.label,
            output_dir: &project.output_dir,
            classpath: &classpath,
            macro_classpath: &project.macro_classpath,
            plugin_classpath: &project.plugin_classpath,
            extra_args: &project.extra_args,
            cache_macro_classloader: self.options.cache_macro_classloaders,
            cache_plugin_classloader: self.options.cache_plugin_classloaders,
        })
    }

    /// Single-group compile that exports pickles at the phase boundary and
    /// resolves `outline_done` mid-run.
    pub(crate) fn full_compile_export_pickles(&self) {
        let result = self.pool.install(|| run_caught(|| self.compile_pickled()));
        match result {
            Ok(()) => {
                // The boundary normally resolved the outline already; a run
                // that never crossed it resolves here.
                self.complete_outline(Ok(()));
                self.complete_group(0, Ok(()));
            }
            Err(err) => {
                tracing::error!("{}: {err:?}", self.project().label);
                let err = TaskError::new(err);
                self.complete_outline(Err(err.clone()));
                self.complete_group(0, Err(err));
            }
        }
    }

    fn compile_pickled(&self) -> anyhow::Result<()> {
        let project = self.project();
        let group = &project.groups[0];

        project.outline_timer.start()?;
        let mut frontend = self.new_frontend()?;

        let mut boundary: anyhow::Result<()> = Ok(());
        let run = frontend.compile(&group.files, &mut |pickles| {
            let result = (|| {
                project.outline_timer.stop()?;
                export::export_pickles(self.cache, project, pickles)?;
                group.timer.start()?;
                Ok(())
            })();
            match &result {
                Ok(()) => self.complete_outline(Ok(())),
                Err(err) => self.complete_outline(Err(TaskError::msg(format!(
                    "'{}': pickle export failed: {err}",
                    project.label
                )))),
            }
            if boundary.is_ok() {
                boundary = result;
            }
        });
        let errors = frontend.has_errors();

        // Stash the instance; the close step at the end of the chain drains
        // it exactly once.
        *project.compiler.lock().unwrap() = Some(frontend);

        if group.timer.is_started() && !group.timer.is_stopped() {
            group.timer.stop()?;
        }
        if project.outline_timer.is_started() && !project.outline_timer.is_stopped() {
            project.outline_timer.stop()?;
        }

        run?;
        boundary?;
        if errors {
            anyhow::bail!("compile errors in '{}'", project.label);
        }
        Ok(())
    }

    /// Compiles every group independently, each in its own freshly
    /// constructed front end. Used for leaves and under the traditional
    /// strategy; `outline_done` is resolved by the caller beforehand.
    pub(crate) fn full_compile(&self) {
        self.pool.in_place_scope(|scope| {
            for (index, group) in self.project().groups.iter().enumerate() {
                scope.spawn(move |_| {
                    match run_caught(|| self.compile_group(index, group)) {
                        Ok(()) => self.complete_group(index, Ok(())),
                        Err(err) => {
                            tracing::error!("{}: {err:?}", self.project().label);
                            self.complete_group(index, Err(TaskError::new(err)));
                        }
                    }
                });
            }
        });
    }

    fn compile_group(&self, index: usize, group: &Group) -> anyhow::Result<()> {
        let project = self.project();

        // The first group's front end still crosses the summary boundary;
        // timing it keeps the outline lane of the trace meaningful even
        // though nothing is exported here.
        let time_outline = index == 0;
        if time_outline {
            project.outline_timer.start()?;
        }

        group.timer.start()?;
        let mut frontend = self.new_frontend()?;
        let run = frontend.compile(&group.files, &mut |_pickles| {
            if time_outline
                && project.outline_timer.is_started()
                && !project.outline_timer.is_stopped()
            {
                let _ = project.outline_timer.stop();
            }
        });
        let errors = frontend.has_errors();
        frontend.close();
        group.timer.stop()?;

        if time_outline
            && project.outline_timer.is_started()
            && !project.outline_timer.is_stopped()
        {
            let _ = project.outline_timer.stop();
        }

        run?;
        if errors {
            anyhow::bail!("compile errors in '{}'", project.label);
        }
        Ok(())
    }

    /// Secondary-language compile. With no secondary sources, `javac_done`
    /// resolves success immediately and the timer never runs.
    pub(crate) fn java_compile(&self) {
        let project = self.project();
        let files = project.java_files();
        if files.is_empty() {
            self.complete_javac(Ok(()));
            return;
        }

        let result = self.pool.install(|| {
            run_caught(|| {
                project.javac_timer.start()?;
                let mut classpath = Vec::with_capacity(project.classpath.len() + 1);
                classpath.push(project.output_dir.clone());
                classpath.extend(project.classpath.iter().cloned());
                let ok = self
                    .toolchain
                    .compile_java(&project.output_dir, &classpath, &files)?;
                project.javac_timer.stop()?;
                if !ok {
                    anyhow::bail!("secondary compilation failed in '{}'", project.label);
                }
                Ok(())
            })
        });
        match result {
            Ok(()) => self.complete_javac(Ok(())),
            Err(err) => {
                tracing::error!("{}: {err:?}", project.label);
                self.complete_javac(Err(TaskError::new(err)));
            }
        }
    }

    /// Closes the lazily constructed front end; at most once per project.
    pub(crate) fn close(&self) {
        if let Some(mut frontend) = self.project().compiler.lock().unwrap().take() {
            frontend.close();
        }
    }
}

/// Catches panics at the task boundary and converts them into failures.
///
/// We use AssertUnwindSafe because a panicking stage only ever touched
/// cloned or interior-mutability state that stays consistent across the
/// unwind.
fn run_caught(f: impl FnOnce() -> anyhow::Result<()>) -> anyhow::Result<()> {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic) => {
            let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                format!("Task panicked: {s}")
            } else if let Some(s) = panic.downcast_ref::<String>() {
                format!("Task panicked: {s}")
            } else {
                String::from("Task panicked with unknown payload")
            };
            Err(anyhow::anyhow!(msg))
        }
    }
}
