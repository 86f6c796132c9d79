//! Compile-command lookup.
//!
//! Finds the `compile_commands.json` that governs a source file and picks the
//! record that builds it. Candidate databases are tried in this order:
//!
//! 1. the `compile_commands_dir` setting, then `.clangd`'s
//!    `CompileFlags.CompilationDatabase`
//! 2. `compile_commands.json` at the workspace root
//! 3. workspace subdirectories named like a build directory
//! 4. every directory from the source file up to the workspace root
//!
//! The first readable database is the one that is searched.

use crate::config::RemarksConfig;
use crate::error::Result;
use crate::model::CompileCommand;
use crate::notice::NoticeKind;
use crate::notice::NoticeLatch;
use path_absolutize::Absolutize;
use serde::Deserialize;
use serde_json::Value;
use std::borrow::Cow;
use std::path::Path;
use std::path::PathBuf;
use tracing::debug;
use tracing::info;

pub const DATABASE_FILE_NAME: &str = "compile_commands.json";
pub const CLANGD_FILE_NAME: &str = ".clangd";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundReason {
    NoDatabase,
    NoMatchingEntry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(CompileCommand),
    NotFound(NotFoundReason),
}

impl Lookup {
    pub fn found(self) -> Option<CompileCommand> {
        match self {
            Self::Found(command) => Some(command),
            Self::NotFound(_) => None,
        }
    }
}

/// A parsed database. Records that fail validation are already dropped.
#[derive(Debug, Clone)]
pub struct CompilationDatabase {
    pub path: PathBuf,
    pub commands: Vec<CompileCommand>,
}

impl CompilationDatabase {
    /// Reads and validates `path`. Invalid records are reported through
    /// `notices` and skipped; an unreadable file or anything that is not a
    /// JSON array is an error.
    pub fn load(path: &Path, notices: &NoticeLatch) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let records: Vec<Value> = serde_json::from_str(&content)?;
        let base = path.parent().unwrap_or(Path::new("/"));

        let mut commands = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            match parse_record(record, base) {
                Ok(command) => commands.push(command),
                Err(kind) => {
                    debug!(index, %kind, path = %path.display(), "skipping record");
                    notices.raise(
                        kind,
                        format!(
                            "{}: record {index} skipped ({})",
                            path.display(),
                            describe_invalid(kind)
                        ),
                    );
                }
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            commands,
        })
    }

    /// Absolute `(directory, file)` comparison first, then the target
    /// relative to `root` against each record's file relative to its
    /// directory. The second pass finds entries from a checkout that moved;
    /// such a match is rebased onto `root`.
    pub fn find(&self, target: &Path, root: &Path) -> Option<CompileCommand> {
        let target = normalize(target, root);
        if let Some(command) = self.commands.iter().find(|c| c.file == target) {
            return Some(command.clone());
        }

        let root = normalize(root, root);
        let relative = pathdiff::diff_paths(&target, &root)?;
        let command = self.commands.iter().find(|command| {
            pathdiff::diff_paths(&command.file, &command.directory)
                .is_some_and(|file| file == relative)
        })?;
        debug!(
            recorded = %command.directory.display(),
            root = %root.display(),
            "rebasing compile command from a moved checkout"
        );
        Some(CompileCommand {
            directory: root,
            file: target,
            command: command.command.clone(),
        })
    }
}

fn describe_invalid(kind: NoticeKind) -> &'static str {
    match kind {
        NoticeKind::InvalidRecordFile => "missing or non-string \"file\"",
        NoticeKind::InvalidRecordDirectory => "missing or non-string \"directory\"",
        _ => "needs non-empty string \"arguments\" or a string \"command\"",
    }
}

fn parse_record(record: &Value, base: &Path) -> std::result::Result<CompileCommand, NoticeKind> {
    let file = record
        .get("file")
        .and_then(Value::as_str)
        .ok_or(NoticeKind::InvalidRecordFile)?;
    let directory = record
        .get("directory")
        .and_then(Value::as_str)
        .ok_or(NoticeKind::InvalidRecordDirectory)?;

    let command = match record.get("arguments") {
        Some(Value::Array(items)) if !items.is_empty() => {
            let words = items
                .iter()
                .map(Value::as_str)
                .collect::<Option<Vec<&str>>>()
                .ok_or(NoticeKind::InvalidRecordInvocation)?;
            shlex::try_join(words).map_err(|_| NoticeKind::InvalidRecordInvocation)?
        }
        _ => record
            .get("command")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or(NoticeKind::InvalidRecordInvocation)?,
    };

    let directory = normalize(Path::new(directory), base);
    let file = normalize(&directory.join(file), &directory);
    Ok(CompileCommand {
        directory,
        file,
        command,
    })
}

/// Lexically normalised absolute path; relative paths are taken from `base`.
fn normalize(path: &Path, base: &Path) -> PathBuf {
    path.absolutize_from(base)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| base.join(path))
}

/// Resolves compile commands for source files in one workspace.
#[derive(Debug, Clone)]
pub struct CompileCommandResolver {
    compile_commands_dir: Option<PathBuf>,
    build_dir_markers: Vec<String>,
    notices: NoticeLatch,
}

impl CompileCommandResolver {
    pub fn new(config: &RemarksConfig, notices: NoticeLatch) -> Self {
        Self {
            compile_commands_dir: config.compile_commands_dir.clone(),
            build_dir_markers: config.build_dir_markers.clone(),
            notices,
        }
    }

    pub fn notices(&self) -> &NoticeLatch {
        &self.notices
    }

    pub fn resolve(&self, source_file: &Path, workspace_root: &Path) -> Lookup {
        let root = workspace_root
            .absolutize()
            .map(Cow::into_owned)
            .unwrap_or_else(|_| workspace_root.to_path_buf());
        let source = normalize(source_file, &root);

        for candidate in self.candidates(&source, &root) {
            if !candidate.is_file() {
                continue;
            }
            let database = match CompilationDatabase::load(&candidate, &self.notices) {
                Ok(database) => database,
                Err(err) => {
                    self.notices.raise(
                        NoticeKind::MalformedDatabase,
                        format!("ignoring {}: {err}", candidate.display()),
                    );
                    continue;
                }
            };

            debug!(
                path = %candidate.display(),
                commands = database.commands.len(),
                "searching compile database"
            );
            return match database.find(&source, &root) {
                Some(command) => {
                    info!(file = %source.display(), "resolved compile command");
                    Lookup::Found(command)
                }
                None => {
                    self.notices.raise(
                        NoticeKind::NoMatchingCommand,
                        format!(
                            "{} has no entry for {}",
                            candidate.display(),
                            source.display()
                        ),
                    );
                    Lookup::NotFound(NotFoundReason::NoMatchingEntry)
                }
            };
        }

        self.notices.raise(
            NoticeKind::MissingDatabase,
            format!(
                "no usable {DATABASE_FILE_NAME} found for {}; generate one with your build system",
                root.display()
            ),
        );
        Lookup::NotFound(NotFoundReason::NoDatabase)
    }

    /// Database paths to try, most specific configuration first. Duplicates
    /// are removed, keeping the earliest position.
    pub fn candidates(&self, source: &Path, root: &Path) -> Vec<PathBuf> {
        let mut directories = Vec::new();

        if let Some(dir) = &self.compile_commands_dir {
            directories.push(normalize(dir, root));
        }
        directories.extend(clangd_database_dirs(root));
        directories.push(root.to_path_buf());
        directories.extend(self.build_dirs(root));

        if source.starts_with(root) {
            directories.extend(
                source
                    .ancestors()
                    .skip(1)
                    .take_while(|dir| *dir != root)
                    .map(Path::to_path_buf),
            );
        }

        let mut seen = std::collections::HashSet::new();
        directories
            .into_iter()
            .filter(|dir| seen.insert(dir.clone()))
            .map(|dir| dir.join(DATABASE_FILE_NAME))
            .collect()
    }

    fn build_dirs(&self, root: &Path) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(root) else {
            return Vec::new();
        };
        let mut dirs: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_dir()))
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                self.build_dir_markers
                    .iter()
                    .any(|marker| name.contains(marker.as_str()))
            })
            .map(|entry| entry.path())
            .collect();
        dirs.sort();
        dirs
    }
}

/// `CompileFlags: { CompilationDatabase: <dir> }` from every document of the
/// workspace's `.clangd`.
fn clangd_database_dirs(root: &Path) -> Vec<PathBuf> {
    let path = root.join(CLANGD_FILE_NAME);
    let Ok(content) = std::fs::read_to_string(&path) else {
        return Vec::new();
    };

    let mut dirs = Vec::new();
    for document in serde_yaml::Deserializer::from_str(&content) {
        let value = match serde_yaml::Value::deserialize(document) {
            Ok(value) => value,
            Err(err) => {
                debug!(%err, path = %path.display(), "unreadable .clangd fragment");
                continue;
            }
        };
        if let Some(dir) = value
            .get("CompileFlags")
            .and_then(|flags| flags.get("CompilationDatabase"))
            .and_then(serde_yaml::Value::as_str)
        {
            dirs.push(normalize(Path::new(dir), root));
        }
    }
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_database(dir: &Path, records: Value) {
        std::fs::create_dir_all(dir).expect("create dir");
        std::fs::write(
            dir.join(DATABASE_FILE_NAME),
            serde_json::to_string_pretty(&records).expect("serialize"),
        )
        .expect("write database");
    }

    fn entry(directory: &Path, file: &str, command: &str) -> Value {
        json!({
            "directory": directory.to_string_lossy(),
            "file": file,
            "command": command,
        })
    }

    fn resolver(config: &RemarksConfig) -> CompileCommandResolver {
        CompileCommandResolver::new(config, NoticeLatch::new())
    }

    #[test]
    fn configured_directory_beats_root_database() {
        let temp = TempDir::new().expect("temp dir");
        let root = temp.path();
        let source = root.join("src/main.c");
        write_database(root, json!([entry(root, "src/main.c", "cc -DFROM_ROOT src/main.c")]));
        write_database(
            &root.join("cmake-x"),
            json!([entry(root, "src/main.c", "cc -DFROM_X src/main.c")]),
        );

        let config = RemarksConfig {
            compile_commands_dir: Some(PathBuf::from("cmake-x")),
            ..RemarksConfig::default()
        };
        let command = resolver(&config).resolve(&source, root).found().expect("found");
        assert_eq!(command.command, "cc -DFROM_X src/main.c");

        let command = resolver(&RemarksConfig::default())
            .resolve(&source, root)
            .found()
            .expect("found");
        assert_eq!(command.command, "cc -DFROM_ROOT src/main.c");
    }

    #[test]
    fn clangd_pointer_is_honoured() {
        let temp = TempDir::new().expect("temp dir");
        let root = temp.path();
        std::fs::write(
            root.join(CLANGD_FILE_NAME),
            "If:\n  PathMatch: .*\\.h\n---\nCompileFlags:\n  CompilationDatabase: out/debug\n",
        )
        .expect("write .clangd");
        write_database(
            &root.join("out/debug"),
            json!([entry(root, "a.c", "clang -O2 a.c")]),
        );
        write_database(root, json!([entry(root, "a.c", "gcc a.c")]));

        let command = resolver(&RemarksConfig::default())
            .resolve(&root.join("a.c"), root)
            .found()
            .expect("found");
        assert_eq!(command.command, "clang -O2 a.c");
    }

    #[test]
    fn build_directories_are_searched_in_name_order() {
        let temp = TempDir::new().expect("temp dir");
        let root = temp.path();
        write_database(
            &root.join("build-release"),
            json!([entry(root, "a.c", "cc -O3 a.c")]),
        );
        write_database(&root.join("build-debug"), json!([entry(root, "a.c", "cc -O0 a.c")]));
        std::fs::create_dir_all(root.join("docs")).expect("create dir");

        let resolver = resolver(&RemarksConfig::default());
        let candidates = resolver.candidates(&root.join("a.c"), root);
        assert_eq!(
            candidates,
            vec![
                root.join(DATABASE_FILE_NAME),
                root.join("build-debug").join(DATABASE_FILE_NAME),
                root.join("build-release").join(DATABASE_FILE_NAME),
            ]
        );
        let command = resolver.resolve(&root.join("a.c"), root).found().expect("found");
        assert_eq!(command.command, "cc -O0 a.c");
    }

    #[test]
    fn walks_up_but_never_above_the_root() {
        let temp = TempDir::new().expect("temp dir");
        let outer = temp.path();
        let root = outer.join("project");
        let source = root.join("lib/sub/x.cpp");
        write_database(
            &root.join("lib"),
            json!([entry(&root.join("lib"), "sub/x.cpp", "c++ -c sub/x.cpp")]),
        );
        write_database(outer, json!([entry(&root, "lib/sub/x.cpp", "never")]));

        let resolver = resolver(&RemarksConfig::default());
        let candidates = resolver.candidates(&source, &root);
        assert!(!candidates.contains(&outer.join(DATABASE_FILE_NAME)));
        let command = resolver.resolve(&source, &root).found().expect("found");
        assert_eq!(command.command, "c++ -c sub/x.cpp");
        assert_eq!(command.directory, root.join("lib"));
        assert_eq!(command.file, source);
    }

    #[test]
    fn malformed_database_is_reported_and_skipped() {
        let temp = TempDir::new().expect("temp dir");
        let root = temp.path();
        std::fs::write(root.join(DATABASE_FILE_NAME), "{\"not\": \"an array\"}")
            .expect("write");
        write_database(&root.join("build"), json!([entry(root, "a.c", "cc a.c")]));

        let resolver = resolver(&RemarksConfig::default());
        let lookup = resolver.resolve(&root.join("a.c"), root);
        assert!(matches!(lookup, Lookup::Found(_)));
        let kinds: Vec<NoticeKind> = resolver.notices().drain().into_iter().map(|n| n.kind).collect();
        assert_eq!(kinds, vec![NoticeKind::MalformedDatabase]);
    }

    #[test]
    fn arguments_are_preferred_and_quoted() {
        let temp = TempDir::new().expect("temp dir");
        let root = temp.path();
        write_database(
            root,
            json!([{
                "directory": root.to_string_lossy(),
                "file": "a.c",
                "arguments": ["clang", "-DNAME=two words", "-c", "a.c"],
                "command": "ignored",
            }]),
        );
        let command = resolver(&RemarksConfig::default())
            .resolve(&root.join("a.c"), root)
            .found()
            .expect("found");
        assert_eq!(
            command.arguments(),
            vec!["clang", "-DNAME=two words", "-c", "a.c"]
        );
    }

    #[test]
    fn invalid_records_are_skipped_with_one_notice_per_kind() {
        let temp = TempDir::new().expect("temp dir");
        let root = temp.path();
        write_database(
            root,
            json!([
                {"directory": root.to_string_lossy(), "command": "cc x.c"},
                {"directory": root.to_string_lossy(), "command": "cc y.c"},
                {"file": "z.c", "command": "cc z.c"},
                {"directory": root.to_string_lossy(), "file": "a.c", "arguments": []},
                entry(root, "a.c", "cc a.c"),
            ]),
        );
        let notices = NoticeLatch::new();
        let database =
            CompilationDatabase::load(&root.join(DATABASE_FILE_NAME), &notices).expect("load");
        assert_eq!(database.commands.len(), 1);

        let kinds: Vec<NoticeKind> = notices.drain().into_iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![
                NoticeKind::InvalidRecordFile,
                NoticeKind::InvalidRecordDirectory,
                NoticeKind::InvalidRecordInvocation,
            ]
        );
    }

    #[test]
    fn relative_match_rebases_moved_checkout() {
        let temp = TempDir::new().expect("temp dir");
        let root = temp.path();
        write_database(
            root,
            json!([entry(Path::new("/old/checkout"), "src/a.c", "cc -c src/a.c")]),
        );
        let command = resolver(&RemarksConfig::default())
            .resolve(&root.join("src/a.c"), root)
            .found()
            .expect("found");
        assert_eq!(command.directory, root.to_path_buf());
        assert_eq!(command.file, root.join("src/a.c"));
        assert_eq!(command.command, "cc -c src/a.c");
    }

    #[test]
    fn lexically_normalised_paths_match() {
        let temp = TempDir::new().expect("temp dir");
        let root = temp.path();
        write_database(
            root,
            json!([entry(&root.join("build"), "../src/./a.c", "cc ../src/a.c")]),
        );
        let lookup = resolver(&RemarksConfig::default()).resolve(&root.join("src/a.c"), root);
        assert!(matches!(lookup, Lookup::Found(_)));
    }

    #[test]
    fn missing_database_and_missing_entry_are_distinct() {
        let temp = TempDir::new().expect("temp dir");
        let root = temp.path();
        let resolver = resolver(&RemarksConfig::default());
        assert_eq!(
            resolver.resolve(&root.join("a.c"), root),
            Lookup::NotFound(NotFoundReason::NoDatabase)
        );
        assert_eq!(
            resolver.resolve(&root.join("a.c"), root),
            Lookup::NotFound(NotFoundReason::NoDatabase)
        );

        write_database(root, json!([entry(root, "b.c", "cc b.c")]));
        assert_eq!(
            resolver.resolve(&root.join("a.c"), root),
            Lookup::NotFound(NotFoundReason::NoMatchingEntry)
        );

        let kinds: Vec<NoticeKind> = resolver.notices().drain().into_iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![NoticeKind::MissingDatabase, NoticeKind::NoMatchingCommand]
        );
    }
}
