use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use tracing::error;

use nagare::exec::ExecToolchain;
use nagare::{DriverError, Options, Project, Scheduler, Strategy, find_args_files, init_logging};

/// Pipelined parallel build driver for two-phase compilers
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Build strategy
    #[arg(long, value_enum, default_value_t = StrategyArg::Pipeline)]
    strategy: StrategyArg,

    /// Worker pool size (defaults to the available processors)
    #[arg(short = 'j', long)]
    parallelism: Option<usize>,

    /// Persistent summary cache location (defaults to a fresh temporary
    /// directory, removed on exit)
    #[arg(long)]
    pickle_cache: Option<Utf8PathBuf>,

    /// Package exported summaries into archives instead of directory trees
    #[arg(long)]
    use_archive: bool,

    /// Ask the front end to cache macro classloaders
    #[arg(long)]
    cache_macro_classloaders: bool,

    /// Ask the front end to cache plugin classloaders
    #[arg(long)]
    cache_plugin_classloaders: bool,

    /// Label embedded in the trace file name (defaults to the input
    /// directory name)
    #[arg(long)]
    label: Option<String>,

    /// Front-end command line, whitespace-separated
    #[arg(long, value_name = "CMD")]
    frontend_cmd: Option<String>,

    /// Secondary-language compiler command line
    #[arg(long, value_name = "CMD", default_value = "javac")]
    javac_cmd: String,

    /// Pickle extractor command line, invoked as `CMD <input> <output>`
    #[arg(long, value_name = "CMD")]
    strip_cmd: Option<String>,

    /// A directory to scan recursively for *.args files, or explicit
    /// argument files
    inputs: Vec<Utf8PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Pipeline,
    Traditional,
}

fn main() -> ExitCode {
    let _ = init_logging();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), DriverError> {
    let (args_files, default_label) = discover(&cli.inputs);

    // Every argument file is parsed up front; option errors are all
    // reported, and any of them stops the run before scheduling.
    let strategy = match cli.strategy {
        StrategyArg::Pipeline => Strategy::Pipeline,
        StrategyArg::Traditional => Strategy::Traditional,
    };
    let single_group = strategy == Strategy::Pipeline;

    let mut projects = Vec::new();
    let mut first_error = None;
    for file in &args_files {
        match Project::from_args_file(file, single_group) {
            Ok(project) => projects.push(project),
            Err(err) => {
                error!("{err}");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }
    if let Some(err) = first_error {
        return Err(err.into());
    }

    let options = Options {
        strategy,
        parallelism: cli.parallelism.unwrap_or_else(num_cpus::get),
        cache_dir: cli.pickle_cache,
        use_archive: cli.use_archive,
        cache_macro_classloaders: cli.cache_macro_classloaders,
        cache_plugin_classloaders: cli.cache_plugin_classloaders,
        label: cli.label.unwrap_or(default_label),
        ..Options::default()
    };

    let toolchain = ExecToolchain::new(
        cli.frontend_cmd.as_deref().map(split_cmd).unwrap_or_default(),
        split_cmd(&cli.javac_cmd),
        cli.strip_cmd.as_deref().map(split_cmd),
    );

    let scheduler = Scheduler::new(projects, options, &toolchain);
    let stats = scheduler.run()?;
    tracing::info!("build finished in {:.0} ms", stats.wall_ms);
    Ok(())
}

/// A single directory argument expands to its argument files; anything else
/// is taken literally.
fn discover(inputs: &[Utf8PathBuf]) -> (Vec<Utf8PathBuf>, String) {
    match inputs {
        [dir] if dir.is_dir() => {
            let label = dir.file_name().unwrap_or("build").to_string();
            (find_args_files(dir), label)
        }
        files => (files.to_vec(), "build".to_string()),
    }
}

fn split_cmd(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}
