//! Projects and their argument files.
//!
//! One argument file describes one project: whitespace-separated tokens in
//! the front end's option syntax. The parser picks out the handful of
//! options the driver has to understand (output directory and the three
//! classpaths), forwards everything else opaquely, and canonicalizes every
//! path so projects can be related to each other by output directory.

use std::fs;
use std::sync::{Mutex, OnceLock};

use camino::{Utf8Path, Utf8PathBuf};
use walkdir::WalkDir;

use crate::error::{Outcome, ParseError};
use crate::signal::Signal;
use crate::timer::Timer;
use crate::toolchain::Frontend;

/// Extension of argument files.
pub const ARGS_EXT: &str = "args";
/// Extension of secondary-language sources.
pub const JAVA_EXT: &str = "java";
/// Largest group the partitioner will produce.
const GROUP_SIZE: usize = 128;
/// Sources under the standard-library root are always compiled as a single
/// group.
const STDLIB_ROOT_MARKER: &str = "library/src";

/// A batch of sources compiled together in one front-end run.
pub struct Group {
    pub files: Vec<Utf8PathBuf>,
    pub timer: Timer,
    pub done: Signal<Outcome>,
}

impl Group {
    fn new(files: Vec<Utf8PathBuf>) -> Self {
        Self {
            files,
            timer: Timer::new(),
            done: Signal::new(),
        }
    }
}

/// Parsed contents of one argument file.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub label: String,
    pub args_file: Utf8PathBuf,
    pub output_dir: Utf8PathBuf,
    pub source_files: Vec<Utf8PathBuf>,
    pub classpath: Vec<Utf8PathBuf>,
    pub macro_classpath: Vec<Utf8PathBuf>,
    pub plugin_classpath: Vec<Utf8PathBuf>,
    /// Tokens the driver doesn't interpret, forwarded to the front end.
    pub extra_args: Vec<String>,
}

/// Critical-path accumulators, filled in after the run joins.
#[derive(Debug, Clone, Copy, Default)]
pub struct CriticalPath {
    pub outline_ms: f64,
    pub regular_ms: f64,
    pub full_ms: f64,
}

/// One unit of work: a project with its stages, timers and signals.
pub struct Project {
    pub label: String,
    pub args_file: Utf8PathBuf,
    pub output_dir: Utf8PathBuf,
    pub source_files: Vec<Utf8PathBuf>,
    pub classpath: Vec<Utf8PathBuf>,
    pub macro_classpath: Vec<Utf8PathBuf>,
    pub plugin_classpath: Vec<Utf8PathBuf>,
    pub extra_args: Vec<String>,

    pub groups: Vec<Group>,

    pub outline_timer: Timer,
    pub pickle_export_timer: Timer,
    pub javac_timer: Timer,

    pub outline_done: Signal<Outcome>,
    pub javac_done: Signal<Outcome>,

    /// The lazily constructed front end, stashed here by the pickled
    /// compile so the close step can drain it exactly once.
    pub(crate) compiler: Mutex<Option<Box<dyn Frontend>>>,

    pub critical: OnceLock<CriticalPath>,
}

impl Project {
    pub fn new(settings: Settings, single_group: bool) -> Self {
        let groups = partition_groups(settings.source_files.clone(), single_group);
        Self {
            label: settings.label,
            args_file: settings.args_file,
            output_dir: settings.output_dir,
            source_files: settings.source_files,
            classpath: settings.classpath,
            macro_classpath: settings.macro_classpath,
            plugin_classpath: settings.plugin_classpath,
            extra_args: settings.extra_args,
            groups,
            outline_timer: Timer::new(),
            pickle_export_timer: Timer::new(),
            javac_timer: Timer::new(),
            outline_done: Signal::new(),
            javac_done: Signal::new(),
            compiler: Mutex::new(None),
            critical: OnceLock::new(),
        }
    }

    pub fn from_args_file(path: &Utf8Path, single_group: bool) -> Result<Self, ParseError> {
        Ok(Self::new(parse_args_file(path)?, single_group))
    }

    pub fn java_files(&self) -> Vec<Utf8PathBuf> {
        self.source_files
            .iter()
            .filter(|f| f.extension() == Some(JAVA_EXT))
            .cloned()
            .collect()
    }

    pub fn has_java(&self) -> bool {
        self.source_files
            .iter()
            .any(|f| f.extension() == Some(JAVA_EXT))
    }
}

/// Splits the sorted source list into ⌈n/128⌉ chunks of roughly equal,
/// ceiling-divided size. Standard-library projects and every project under
/// the pipeline strategy compile as a single group.
fn partition_groups(mut files: Vec<Utf8PathBuf>, single_group: bool) -> Vec<Group> {
    files.sort();

    let stdlib = files
        .iter()
        .any(|f| f.as_str().contains(STDLIB_ROOT_MARKER));
    if single_group || stdlib || files.is_empty() {
        return vec![Group::new(files)];
    }

    let count = files.len().div_ceil(GROUP_SIZE);
    let per_group = files.len().div_ceil(count);
    files
        .chunks(per_group)
        .map(|chunk| Group::new(chunk.to_vec()))
        .collect()
}

fn parse_args_file(path: &Utf8Path) -> Result<Settings, ParseError> {
    let text = fs::read_to_string(path).map_err(|source| ParseError::File {
        path: path.to_owned(),
        source,
    })?;
    let tokens: Vec<&str> = text.split_whitespace().collect();

    let mut settings = Settings {
        label: path.file_stem().unwrap_or("project").to_string(),
        args_file: path.to_owned(),
        ..Settings::default()
    };
    let mut output_dir = None;

    fn next_value<'t>(
        tokens: &[&'t str],
        cursor: &mut usize,
        path: &Utf8Path,
        option: &str,
    ) -> Result<&'t str, ParseError> {
        match tokens.get(*cursor) {
            Some(&value) => {
                *cursor += 1;
                Ok(value)
            }
            None => Err(ParseError::MissingValue(
                path.to_owned(),
                option.to_string(),
            )),
        }
    }

    let mut cursor = 0;
    while let Some(&token) = tokens.get(cursor) {
        cursor += 1;
        match token {
            "-d" => {
                let dir = next_value(&tokens, &mut cursor, path, "-d")?;
                if output_dir.is_some() {
                    return Err(ParseError::DuplicateOutputDir(path.to_owned()));
                }
                fs::create_dir_all(dir).map_err(|source| ParseError::OutputDir {
                    path: dir.into(),
                    source,
                })?;
                output_dir = Some(canonical(Utf8Path::new(dir)));
            }
            "-classpath" | "-cp" => {
                let entries = expand_classpath(next_value(&tokens, &mut cursor, path, token)?)?;
                settings.classpath.extend(entries);
            }
            "-macro-classpath" => {
                let entries = expand_classpath(next_value(&tokens, &mut cursor, path, token)?)?;
                settings.macro_classpath.extend(entries);
            }
            "-plugin-classpath" => {
                let entries = expand_classpath(next_value(&tokens, &mut cursor, path, token)?)?;
                settings.plugin_classpath.extend(entries);
            }
            flag if flag.starts_with('-') => settings.extra_args.push(flag.to_string()),
            source => settings.source_files.push(canonical(Utf8Path::new(source))),
        }
    }

    settings.output_dir = output_dir.ok_or_else(|| ParseError::MissingOutputDir(path.to_owned()))?;
    Ok(settings)
}

/// Splits a `:`-separated classpath value and expands trailing-`*` entries
/// into the directory's archives, sorted.
fn expand_classpath(value: &str) -> Result<Vec<Utf8PathBuf>, ParseError> {
    let mut entries = Vec::new();
    for entry in value.split(':').filter(|e| !e.is_empty()) {
        if entry.ends_with('*') {
            let mut archives: Vec<Utf8PathBuf> = glob::glob(entry)?
                .filter_map(Result::ok)
                .filter_map(|p| Utf8PathBuf::from_path_buf(p).ok())
                .filter(|p| p.extension() == Some("jar"))
                .map(|p| canonical(&p))
                .collect();
            archives.sort();
            entries.extend(archives);
        } else {
            entries.push(canonical(Utf8Path::new(entry)));
        }
    }
    Ok(entries)
}

/// Canonicalizes where possible; entries that don't exist (yet) are merely
/// absolutized so graph keys still line up.
fn canonical(path: &Utf8Path) -> Utf8PathBuf {
    if let Ok(real) = path.canonicalize_utf8() {
        return real;
    }
    if path.is_absolute() {
        return path.to_owned();
    }
    match std::env::current_dir()
        .ok()
        .and_then(|cwd| Utf8PathBuf::from_path_buf(cwd).ok())
    {
        Some(cwd) => cwd.join(path),
        None => path.to_owned(),
    }
}

/// Recursively collects the `*.args` files under `dir`, sorted.
pub fn find_args_files(dir: &Utf8Path) -> Vec<Utf8PathBuf> {
    let mut files: Vec<Utf8PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| Utf8PathBuf::from_path_buf(entry.into_path()).ok())
        .filter(|path| path.extension() == Some(ARGS_EXT))
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn utf8(path: std::path::PathBuf) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(path).unwrap()
    }

    #[test]
    fn test_parse_args_file() {
        let dir = TempDir::new().unwrap();
        let root = utf8(dir.path().to_path_buf());
        let args = root.join("web.args");
        fs::write(
            &args,
            format!(
                "-d {root}/out -classpath {root}/a:{root}/b -macro-classpath {root}/m \
                 -deprecation {root}/src/Main.x {root}/src/Util.java"
            ),
        )
        .unwrap();

        let project = Project::from_args_file(&args, true).unwrap();
        assert_eq!(project.label, "web");
        assert!(project.output_dir.as_str().ends_with("/out"));
        assert!(project.output_dir.is_dir());
        assert_eq!(project.classpath.len(), 2);
        assert_eq!(project.macro_classpath.len(), 1);
        assert_eq!(project.extra_args, vec!["-deprecation"]);
        assert_eq!(project.source_files.len(), 2);
        assert!(project.has_java());
        assert_eq!(project.java_files().len(), 1);
        assert_eq!(project.groups.len(), 1);
    }

    #[test]
    fn test_missing_output_dir() {
        let dir = TempDir::new().unwrap();
        let args = utf8(dir.path().join("p.args"));
        fs::write(&args, "A.x B.x").unwrap();
        assert!(matches!(
            Project::from_args_file(&args, true),
            Err(ParseError::MissingOutputDir(_))
        ));
    }

    #[test]
    fn test_duplicate_output_dir() {
        let dir = TempDir::new().unwrap();
        let root = utf8(dir.path().to_path_buf());
        let args = root.join("p.args");
        fs::write(&args, format!("-d {root}/one -d {root}/two")).unwrap();
        assert!(matches!(
            Project::from_args_file(&args, true),
            Err(ParseError::DuplicateOutputDir(_))
        ));
    }

    #[test]
    fn test_option_missing_value() {
        let dir = TempDir::new().unwrap();
        let args = utf8(dir.path().join("p.args"));
        fs::write(&args, "-classpath").unwrap();
        assert!(matches!(
            Project::from_args_file(&args, true),
            Err(ParseError::MissingValue(_, _))
        ));
    }

    #[test]
    fn test_classpath_glob_expansion() {
        let dir = TempDir::new().unwrap();
        let root = utf8(dir.path().to_path_buf());
        let lib = root.join("lib");
        fs::create_dir(&lib).unwrap();
        fs::write(lib.join("b.jar"), b"").unwrap();
        fs::write(lib.join("a.jar"), b"").unwrap();
        fs::write(lib.join("notes.txt"), b"").unwrap();

        let entries = expand_classpath(&format!("{lib}/*")).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].as_str().ends_with("a.jar"));
        assert!(entries[1].as_str().ends_with("b.jar"));
    }

    #[test]
    fn test_partitioning() {
        let files = |n: usize| -> Vec<Utf8PathBuf> {
            (0..n)
                .map(|i| Utf8PathBuf::from(format!("/src/f{i:04}.x")))
                .collect()
        };

        assert_eq!(partition_groups(files(5), false).len(), 1);
        assert_eq!(partition_groups(files(128), false).len(), 1);

        let three = partition_groups(files(300), false);
        assert_eq!(three.len(), 3);
        assert!(three.iter().all(|g| g.files.len() == 100));

        let two = partition_groups(files(129), false);
        assert_eq!(two.len(), 2);
        assert_eq!(two[0].files.len(), 65);
        assert_eq!(two[1].files.len(), 64);

        // Pipeline forces a single group no matter the size.
        assert_eq!(partition_groups(files(300), true).len(), 1);

        // So does the standard library root.
        let mut stdlib = files(300);
        stdlib.push(Utf8PathBuf::from("/work/library/src/Core.x"));
        assert_eq!(partition_groups(stdlib, false).len(), 1);

        // Empty projects still have one (empty) group.
        assert_eq!(partition_groups(Vec::new(), false).len(), 1);
    }

    #[test]
    fn test_groups_are_sorted_and_cover_all_sources() {
        let mut files: Vec<Utf8PathBuf> = (0..200)
            .rev()
            .map(|i| Utf8PathBuf::from(format!("/src/f{i:04}.x")))
            .collect();
        let groups = partition_groups(files.clone(), false);
        let flattened: Vec<_> = groups.iter().flat_map(|g| g.files.clone()).collect();
        files.sort();
        assert_eq!(flattened, files);
    }

    #[test]
    fn test_find_args_files() {
        let dir = TempDir::new().unwrap();
        let root = utf8(dir.path().to_path_buf());
        fs::create_dir_all(root.join("nested/deep")).unwrap();
        fs::write(root.join("b.args"), "").unwrap();
        fs::write(root.join("nested/deep/a.args"), "").unwrap();
        fs::write(root.join("nested/readme.md"), "").unwrap();

        let found = find_args_files(&root);
        assert_eq!(found.len(), 2);
        assert!(found[0].as_str().ends_with("b.args") || found[0].as_str().ends_with("a.args"));
        assert!(found.windows(2).all(|w| w[0] <= w[1]));
    }
}
