#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod cache;
mod error;
pub mod exec;
mod export;
mod graph;
mod project;
mod runner;
mod scheduler;
mod signal;
mod timer;
pub mod toolchain;
mod trace;
mod utils;

use std::time::Duration;

use camino::Utf8PathBuf;

pub use crate::cache::PickleCache;
pub use crate::error::{
    CacheError, DriverError, GraphError, Outcome, ParseError, TaskError, TimerError,
};
pub use crate::export::SIG_EXT;
pub use crate::graph::{DepClass, DepGraph, Dependency, build as build_graph, to_dot};
pub use crate::project::{
    ARGS_EXT, CriticalPath, Group, JAVA_EXT, Project, Settings, find_args_files,
};
pub use crate::scheduler::{BuildStats, Scheduler};
pub use crate::signal::Signal;
pub use crate::timer::Timer;
pub use crate::utils::init_logging;

/// How aggressively downstream work overlaps upstream work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Downstream front ends start as soon as the upstream's symbol
    /// summaries exist.
    #[default]
    Pipeline,
    /// Downstream projects wait for full upstream completion, classfiles
    /// included.
    Traditional,
}

/// Process-wide options of one driver run.
#[derive(Debug, Clone)]
pub struct Options {
    pub strategy: Strategy,
    /// Size of the worker pool.
    pub parallelism: usize,
    /// Persistent summary-cache location; `None` allocates a temporary one,
    /// removed on exit.
    pub cache_dir: Option<Utf8PathBuf>,
    /// Package exported summaries into archives instead of directory trees.
    pub use_archive: bool,
    /// Forwarded to the front end.
    pub cache_macro_classloaders: bool,
    /// Forwarded to the front end.
    pub cache_plugin_classloaders: bool,
    /// Embedded in the trace file name.
    pub label: String,
    /// Where `projects.dot` and the trace file land.
    pub report_dir: Utf8PathBuf,
    /// Interval of the progress/stall probe.
    pub stall_poll: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            strategy: Strategy::Pipeline,
            parallelism: num_cpus::get(),
            cache_dir: None,
            use_archive: false,
            cache_macro_classloaders: false,
            cache_plugin_classloaders: false,
            label: "build".to_string(),
            report_dir: Utf8PathBuf::from("."),
            stall_poll: Duration::from_secs(60),
        }
    }
}
