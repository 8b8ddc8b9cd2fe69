use std::sync::Arc;

use camino::Utf8PathBuf;
use thiserror::Error;

/// A cloneable task failure.
///
/// Stage outcomes are broadcast through write-once signals with any number of
/// downstream consumers, so the error type has to be `Clone`; the inner
/// `anyhow::Error` is shared behind an `Arc`.
#[derive(Debug, Error, Clone)]
#[error(transparent)]
pub struct TaskError(#[from] pub(crate) Arc<anyhow::Error>);

impl TaskError {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(err.into()))
    }

    pub fn msg(msg: impl Into<String>) -> Self {
        Self::new(anyhow::anyhow!(msg.into()))
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(e: anyhow::Error) -> Self {
        TaskError(Arc::new(e))
    }
}

/// Result carried by every completion signal.
pub type Outcome = Result<(), TaskError>;

#[derive(Debug, Error)]
pub enum TimerError {
    #[error("timer already started")]
    AlreadyStarted,

    #[error("timer already stopped")]
    AlreadyStopped,

    #[error("timer stopped before it was started")]
    NotStarted,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("couldn't read argument file '{path}'.\n{source}")]
    File {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("argument file '{0}' declares no output directory (-d)")]
    MissingOutputDir(Utf8PathBuf),

    #[error("argument file '{0}' declares more than one output directory")]
    DuplicateOutputDir(Utf8PathBuf),

    #[error("option '{1}' in '{0}' is missing its value")]
    MissingValue(Utf8PathBuf, String),

    #[error("couldn't create output directory '{path}'.\n{source}")]
    OutputDir {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("couldn't expand classpath entry.\n{0}")]
    GlobPattern(#[from] glob::PatternError),
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("projects '{first}' and '{second}' share the output directory '{dir}'")]
    SharedOutputDir {
        dir: Utf8PathBuf,
        first: String,
        second: String,
    },

    #[error("dependency cycle detected at project '{0}'")]
    Cycle(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("couldn't allocate the summary cache root.\n{0}")]
    Root(std::io::Error),

    #[error("couldn't stamp '{path}'.\n{source}")]
    Stamp {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
}

/// Top-level error of a driver run.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("error while pre-extracting the external classpath.\n{0}")]
    Extract(#[source] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("couldn't build the worker pool.\n{0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("build failed.\n{0}")]
    Build(TaskError),
}
