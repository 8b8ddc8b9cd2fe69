//! The top-level engine.
//!
//! One plain thread per project runs that project's chain: wait on every
//! dependency edge with its class-specific condition, compile, then the
//! secondary language, then close the front end. All actual compilation is
//! executed as tasks on a worker pool sized to the configured parallelism,
//! so chains are cheap to block. The scheduler thread itself sits on the
//! monitor channel, turning completion events into progress and watching
//! for stalls.

use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};
use indicatif::ProgressBar;

use crate::cache::PickleCache;
use crate::error::{DriverError, Outcome, TaskError};
use crate::export;
use crate::graph::{self, DepClass, DepGraph, Dependency};
use crate::project::{CriticalPath, Project};
use crate::runner::{BuildEvent, Runner, Stage};
use crate::signal::Signal;
use crate::toolchain::Toolchain;
use crate::trace;
use crate::utils::PROGRESS_STYLE;
use crate::{Options, Strategy};

/// Summary of a finished run.
#[derive(Debug, Clone, Copy)]
pub struct BuildStats {
    pub wall_ms: f64,
    /// Maximum full critical path across projects.
    pub critical_path_ms: f64,
}

pub struct Scheduler<'t> {
    projects: Vec<Project>,
    options: Options,
    toolchain: &'t dyn Toolchain,
}

impl<'t> Scheduler<'t> {
    pub fn new(projects: Vec<Project>, options: Options, toolchain: &'t dyn Toolchain) -> Self {
        Self {
            projects,
            options,
            toolchain,
        }
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    /// Runs the whole build. Returns the first failure, after every chain
    /// has drained and every front end is closed.
    pub fn run(&self) -> Result<BuildStats, DriverError> {
        let epoch = Instant::now();

        let graph = graph::build(&self.projects)?;
        let dot_path = self.options.report_dir.join("projects.dot");
        graph::write_dot(&self.projects, &graph, &dot_path)?;

        let cache = PickleCache::new(self.options.cache_dir.clone(), self.options.use_archive)?;
        export::pre_extract_external(&cache, self.toolchain, &graph.external_classpath)
            .map_err(DriverError::Extract)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.parallelism)
            .thread_name(|index| format!("worker-{index}"))
            .panic_handler(|panic| {
                // An uncaught worker panic is unrecoverable.
                eprintln!("worker thread panicked: {panic:?}");
                std::process::exit(-1);
            })
            .build()?;

        let (events_tx, events_rx) = unbounded::<BuildEvent>();

        let first_failure = std::thread::scope(|scope| {
            for id in 0..self.projects.len() {
                let runner = Runner {
                    id,
                    projects: &self.projects,
                    cache: &cache,
                    toolchain: self.toolchain,
                    pool: &pool,
                    options: &self.options,
                    events: events_tx.clone(),
                };
                let deps = graph.dependencies(id);
                let depended_on = graph.depended_on[id];
                std::thread::Builder::new()
                    .name(format!("chain-{}", self.projects[id].label))
                    .spawn_scoped(scope, move || run_chain(runner, deps, depended_on))
                    .expect("failed to spawn chain thread");
            }
            drop(events_tx);
            self.monitor(events_rx)
        });

        let wall_ms = epoch.elapsed().as_secs_f64() * 1e3;
        let critical_path_ms = self.record_critical_paths(&graph);
        if self.options.parallelism == 1 {
            tracing::info!("critical path {critical_path_ms:.1} ms, wall clock {wall_ms:.1} ms");
        }

        let trace_path = self
            .options
            .report_dir
            .join(format!("build-{}.trace", self.options.label));
        trace::write_trace(&trace_path, epoch, &self.projects)?;

        if let Some(event) = first_failure {
            return Err(DriverError::Build(self.failure_of(event)));
        }
        Ok(BuildStats {
            wall_ms,
            critical_path_ms,
        })
    }

    fn failure_of(&self, event: BuildEvent) -> TaskError {
        let project = &self.projects[event.project];
        let outcome = match event.stage {
            Stage::Outline => project.outline_done.peek(),
            Stage::Group(index) => project.groups[index].done.peek(),
            Stage::Javac => project.javac_done.peek(),
        };
        match outcome {
            Some(Err(err)) => err,
            _ => TaskError::msg(format!("'{}' failed", project.label)),
        }
    }

    /// Drains completion events behind an overall progress bar. A poll
    /// interval without any event prints either a progress line (the count
    /// advanced since the last poll) or a stall line plus one status row per
    /// project.
    fn monitor(&self, events: Receiver<BuildEvent>) -> Option<BuildEvent> {
        let total: u64 = self
            .projects
            .iter()
            .map(|p| p.groups.len() as u64 + 2)
            .sum();
        if total == 0 {
            return None;
        }

        let bar = ProgressBar::new(total);
        bar.set_style(PROGRESS_STYLE.clone());
        bar.set_message("Building projects...");

        let mut first_failure: Option<BuildEvent> = None;
        let mut completed = 0u64;
        let mut at_last_poll = 0u64;

        while completed < total {
            match events.recv_timeout(self.options.stall_poll) {
                Ok(event) => {
                    completed += 1;
                    bar.inc(1);
                    if event.failed && first_failure.is_none() {
                        first_failure = Some(event);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if completed > at_last_poll {
                        bar.println(format!("{completed}/{total} stages complete"));
                    } else {
                        bar.println(format!(
                            "no progress in {:.0?}, project status (outline, groups, java):",
                            self.options.stall_poll
                        ));
                        for project in &self.projects {
                            bar.println(format!("  {}  {}", status_row(project), project.label));
                        }
                    }
                    at_last_poll = completed;
                }
                // Every chain is gone; whatever was queued has been drained.
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        bar.finish_with_message("Build complete");
        first_failure
    }

    fn record_critical_paths(&self, graph: &DepGraph) -> f64 {
        let mut memo: Vec<Option<CriticalPath>> = vec![None; self.projects.len()];
        let mut max_full: f64 = 0.0;
        for id in 0..self.projects.len() {
            let path = self.critical_path(graph, id, &mut memo);
            let _ = self.projects[id].critical.set(path);
            max_full = max_full.max(path.full_ms);
            tracing::debug!(
                "{}: critical path outline {:.1} ms, regular {:.1} ms, full {:.1} ms",
                self.projects[id].label,
                path.outline_ms,
                path.regular_ms,
                path.full_ms,
            );
        }
        max_full
    }

    fn critical_path(
        &self,
        graph: &DepGraph,
        id: usize,
        memo: &mut Vec<Option<CriticalPath>>,
    ) -> CriticalPath {
        if let Some(path) = memo[id] {
            return path;
        }

        let mut dep_outline: f64 = 0.0;
        let mut dep_full: f64 = 0.0;
        for dep in graph.dependencies(id) {
            let upstream = self.critical_path(graph, dep.target, memo);
            dep_outline = dep_outline.max(upstream.outline_ms);
            dep_full = dep_full.max(upstream.full_ms);
        }

        let project = &self.projects[id];
        let group_max = project
            .groups
            .iter()
            .map(|g| g.timer.duration_ms())
            .fold(0.0, f64::max);
        let group_sum: f64 = project.groups.iter().map(|g| g.timer.duration_ms()).sum();

        let path = match self.options.strategy {
            Strategy::Pipeline => CriticalPath {
                outline_ms: dep_outline + project.outline_timer.duration_ms(),
                regular_ms: dep_outline + group_max,
                full_ms: dep_full + group_sum,
            },
            Strategy::Traditional => CriticalPath {
                outline_ms: 0.0,
                regular_ms: 0.0,
                full_ms: dep_full + group_sum,
            },
        };
        memo[id] = Some(path);
        path
    }
}

/// One project's chain, executed on its own thread.
fn run_chain(runner: Runner<'_>, deps: &[Dependency], depended_on: bool) {
    let project = runner.project();
    let strategy = runner.options.strategy;

    // 1. Wait on every edge with its class-specific condition. Macro and
    //    plugin dependencies execute upstream bytecode, so summaries are not
    //    sufficient for them even under the pipeline strategy.
    for dep in deps {
        let upstream = &runner.projects[dep.target];
        let outcome = match (strategy, dep.class) {
            (Strategy::Traditional, _) => upstream.javac_done.wait(),
            (Strategy::Pipeline, DepClass::Outline) => upstream.outline_done.wait(),
            (Strategy::Pipeline, DepClass::Macro | DepClass::Plugin) => {
                upstream.javac_done.wait()
            }
        };
        if outcome.is_err() {
            // Transitive failure: this project never starts compiling.
            let err = TaskError::msg(format!(
                "'{}' blocked by failed dependency '{}'",
                project.label, upstream.label
            ));
            runner.fail_all(&err);
            runner.close();
            return;
        }
    }

    // 2. Only projects someone depends on export pickles; for the rest the
    //    outline resolves unconditionally.
    match strategy {
        Strategy::Pipeline if depended_on => runner.full_compile_export_pickles(),
        _ => {
            runner.complete_outline(Ok(()));
            runner.full_compile();
        }
    }

    // 3. Secondary sources compile once every group has finished.
    let groups_ok = project.groups.iter().all(|g| g.done.wait().is_ok());
    if groups_ok {
        runner.java_compile();
    } else {
        runner.complete_javac(Err(TaskError::msg(format!(
            "'{}': group compilation failed",
            project.label
        ))));
    }

    // 4. The front end closes exactly once, at the very end.
    runner.close();
}

fn status_row(project: &Project) -> String {
    let outline = signal_char(&project.outline_done);
    let javac = signal_char(&project.javac_done);

    let mut groups = 'x';
    for group in &project.groups {
        match group.done.peek() {
            Some(Err(_)) => {
                groups = '!';
                break;
            }
            None => groups = '-',
            Some(Ok(())) => {}
        }
    }

    format!("{outline}{groups}{javac}")
}

fn signal_char(signal: &Signal<Outcome>) -> char {
    match signal.peek() {
        None => '-',
        Some(Ok(())) => 'x',
        Some(Err(_)) => '!',
    }
}
