//! Local project context
//!
//! Decides whether a query is about files on this machine and, if so,
//! gathers a directory tree plus the README and build files so the model
//! can answer without guessing.

use ignore::WalkBuilder;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::ffi::OsStr;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Depth of the directory tree below the target.
pub const MAX_TREE_DEPTH: usize = 4;
/// Tree lines kept before the listing is cut.
pub const MAX_TREE_ENTRIES: usize = 400;
/// Lines read from each attached file.
pub const MAX_FILE_LINES: usize = 300;
/// Character budget for the whole attachment.
pub const MAX_ATTACHMENT_CHARS: usize = 24_000;

const MAX_LINE_BYTES: usize = 2000;
const MAX_FILE_BYTES: u64 = 256 * 1024;

const README_FILES: &[&str] = &[
    "README.md",
    "README.txt",
    "README",
    "README.rst",
    "README.markdown",
    "readme.md",
    "readme.txt",
    "readme",
];

const CONFIG_FILES: &[&str] = &[
    "package.json",
    "pyproject.toml",
    "Cargo.toml",
    "pom.xml",
    "build.gradle",
    "setup.py",
    "requirements.txt",
    "Pipfile",
    "go.mod",
    "composer.json",
    "Gemfile",
    "Makefile",
    "CMakeLists.txt",
    "Dockerfile",
    "docker-compose.yml",
    ".gitignore",
    "tsconfig.json",
    "webpack.config.js",
    "vite.config.js",
];

const DOC_EXTENSIONS: &[&str] = &["md", "txt", "rst"];

/// Marker file and the language it implies, first match wins per language.
const LANGUAGE_MARKERS: &[(&str, &str)] = &[
    ("Cargo.toml", "Rust"),
    ("package.json", "JavaScript/Node.js"),
    ("tsconfig.json", "TypeScript"),
    ("pyproject.toml", "Python"),
    ("setup.py", "Python"),
    ("requirements.txt", "Python"),
    ("Pipfile", "Python"),
    ("go.mod", "Go"),
    ("pom.xml", "Java"),
    ("build.gradle", "Java"),
    ("composer.json", "PHP"),
    ("Gemfile", "Ruby"),
    ("CMakeLists.txt", "C/C++"),
];

/// What kind of local question a query is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// Names a concrete path
    FileOperation,
    /// Asks about the project in the working directory
    ProjectInfo,
    General,
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryType::FileOperation => write!(f, "file_operation"),
            QueryType::ProjectInfo => write!(f, "project_info"),
            QueryType::General => write!(f, "general"),
        }
    }
}

/// Outcome of evaluating a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryScope {
    pub query_type: QueryType,
    /// Path to describe; `None` for general queries
    pub target: Option<PathBuf>,
}

impl QueryScope {
    pub fn general() -> Self {
        Self {
            query_type: QueryType::General,
            target: None,
        }
    }

    pub fn needs_context(&self) -> bool {
        self.target.is_some()
    }
}

/// One way of recognising a local query. `None` means "not mine".
pub trait EvaluationStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, query: &str, cwd: &Path) -> Option<QueryScope>;
}

lazy_static! {
    static ref PATH_TOKEN: Regex =
        Regex::new(r#"(?:^|\s)["']?((?:/|\./|\.\./|~/)[^\s"']+)"#).expect("valid regex");

    static ref PROJECT_QUESTION: Vec<Regex> = [
        r"(?:what|explain|describe|analy[sz]e)\s+(?:is|does)?\s*(?:this|the|that)\s+(?:project|code|codebase|repository|repo)",
        r"(?:what|which)\s+(?:programming\s+)?language",
        r"what\s+(?:framework|technology|technologies|stack)",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){}", p)).expect("valid regex"))
    .collect();

    static ref PROJECT_KEYWORD: Regex = Regex::new(
        r"(?i)\b(?:project|directory|folder|files?|code|repository|repo|codebase|workspace|source|src|modules?|components?|structure|tree|programming|framework|library|dependencies)\b"
    )
    .expect("valid regex");
}

/// Matches explicit paths: `/etc/nginx`, `./src`, `../x`, `~/notes`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PathDetection;

impl EvaluationStrategy for PathDetection {
    fn name(&self) -> &'static str {
        "path"
    }

    fn evaluate(&self, query: &str, cwd: &Path) -> Option<QueryScope> {
        let token = PATH_TOKEN.captures(query)?.get(1)?.as_str();
        let token = token.trim_end_matches(['?', '!', ',', ';', ':', '.', ')']);
        if token.is_empty() || token == "/" || token == "~/" {
            return None;
        }
        let target = resolve_path(token, cwd);
        debug!(path = %target.display(), "query names a path");
        Some(QueryScope {
            query_type: QueryType::FileOperation,
            target: Some(target),
        })
    }
}

fn resolve_path(token: &str, cwd: &Path) -> PathBuf {
    let path = match token.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(token)),
        None => PathBuf::from(token),
    };
    let path = if path.is_absolute() { path } else { cwd.join(path) };
    path.canonicalize().unwrap_or(path)
}

/// Matches questions like "what is this project" or "which language".
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternDetection;

impl EvaluationStrategy for PatternDetection {
    fn name(&self) -> &'static str {
        "pattern"
    }

    fn evaluate(&self, query: &str, cwd: &Path) -> Option<QueryScope> {
        PROJECT_QUESTION.iter().any(|p| p.is_match(query)).then(|| QueryScope {
            query_type: QueryType::ProjectInfo,
            target: Some(cwd.to_path_buf()),
        })
    }
}

/// Matches project vocabulary anywhere in the query.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordDetection;

impl EvaluationStrategy for KeywordDetection {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn evaluate(&self, query: &str, cwd: &Path) -> Option<QueryScope> {
        PROJECT_KEYWORD.is_match(query).then(|| QueryScope {
            query_type: QueryType::ProjectInfo,
            target: Some(cwd.to_path_buf()),
        })
    }
}

/// Runs strategies in order; the first that claims the query decides.
pub struct QueryEvaluator {
    strategies: Vec<Box<dyn EvaluationStrategy>>,
}

impl Default for QueryEvaluator {
    fn default() -> Self {
        Self::new(vec![
            Box::new(PathDetection),
            Box::new(PatternDetection),
            Box::new(KeywordDetection),
        ])
    }
}

impl QueryEvaluator {
    pub fn new(strategies: Vec<Box<dyn EvaluationStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn evaluate(&self, query: &str, cwd: &Path) -> QueryScope {
        for strategy in &self.strategies {
            if let Some(scope) = strategy.evaluate(query, cwd) {
                debug!(strategy = strategy.name(), query_type = %scope.query_type, "query needs local context");
                return scope;
            }
        }
        QueryScope::general()
    }
}

/// Collected context, ready to render into a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalContext {
    pub root: PathBuf,
    pub tree: Option<String>,
    /// (name, content) in collection order
    pub files: Vec<(String, String)>,
    pub languages: Vec<&'static str>,
}

impl LocalContext {
    /// Markdown attachment, cut to [`MAX_ATTACHMENT_CHARS`].
    pub fn render(&self) -> String {
        let mut out = format!("CONTEXT ATTACHMENTS for {}:\n", self.root.display());
        if !self.languages.is_empty() {
            out.push_str(&format!("Detected languages: {}\n", self.languages.join(", ")));
        }
        if let Some(tree) = &self.tree {
            out.push_str(&format!("\nDirectory tree:\n```\n{}\n```\n", tree));
        }
        for (name, content) in &self.files {
            let section = format!("\n{}:\n```\n{}\n```\n", name, content);
            if out.len() + section.len() > MAX_ATTACHMENT_CHARS {
                out.push_str(&format!("\n({} skipped, attachment size limit reached)\n", name));
                continue;
            }
            out.push_str(&section);
        }
        if out.len() > MAX_ATTACHMENT_CHARS {
            let mut cut = MAX_ATTACHMENT_CHARS;
            while !out.is_char_boundary(cut) {
                cut -= 1;
            }
            out.truncate(cut);
            out.push_str("\n... (attachment truncated)");
        }
        out
    }
}

/// Reads the tree and key files under a target path.
#[derive(Debug, Clone)]
pub struct LocalContextCollector {
    max_depth: usize,
    max_entries: usize,
    max_lines: usize,
}

impl Default for LocalContextCollector {
    fn default() -> Self {
        Self {
            max_depth: MAX_TREE_DEPTH,
            max_entries: MAX_TREE_ENTRIES,
            max_lines: MAX_FILE_LINES,
        }
    }
}

impl LocalContextCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = max_lines;
        self
    }

    /// `None` when the target is neither a directory nor a regular file.
    pub fn collect(&self, target: &Path) -> Option<LocalContext> {
        if target.is_file() {
            let name = target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| target.display().to_string());
            let files = self.read_limited(target).map(|c| (name, c)).into_iter().collect();
            return Some(LocalContext {
                root: target.to_path_buf(),
                tree: None,
                files,
                languages: Vec::new(),
            });
        }
        if !target.is_dir() {
            debug!(path = %target.display(), "no local context for missing path");
            return None;
        }

        let tree = self.tree(target);
        let mut files = Vec::new();

        if let Some((name, content)) = README_FILES
            .iter()
            .find_map(|name| self.read_limited(&target.join(name)).map(|c| (name.to_string(), c)))
        {
            files.push((name, content));
        }
        for name in CONFIG_FILES {
            if let Some(content) = self.read_limited(&target.join(name)) {
                files.push((name.to_string(), content));
            }
        }
        let mut docs: Vec<String> = std::fs::read_dir(target)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .filter(|name| {
                        Path::new(name)
                            .extension()
                            .and_then(|ext| ext.to_str())
                            .is_some_and(|ext| DOC_EXTENSIONS.contains(&ext))
                    })
                    .collect()
            })
            .unwrap_or_default();
        docs.sort();
        for name in docs {
            if files.iter().any(|(seen, _)| *seen == name) {
                continue;
            }
            if let Some(content) = self.read_limited(&target.join(&name)) {
                files.push((name, content));
            }
        }

        let languages = detect_languages(target);
        debug!(
            path = %target.display(),
            files = files.len(),
            ?languages,
            "collected local context"
        );
        Some(LocalContext {
            root: target.to_path_buf(),
            tree: Some(tree),
            files,
            languages,
        })
    }

    /// Indented listing, directories first at each level. Honours
    /// `.gitignore` and skips `.git`.
    pub fn tree(&self, root: &Path) -> String {
        let walker = WalkBuilder::new(root)
            .hidden(false)
            .git_ignore(true)
            .require_git(false)
            .max_depth(Some(self.max_depth))
            .filter_entry(|entry| entry.file_name() != OsStr::new(".git"))
            .sort_by_file_path(|a, b| b.is_dir().cmp(&a.is_dir()).then_with(|| a.cmp(b)))
            .build();

        let mut lines = Vec::new();
        let mut skipped = 0usize;
        for entry in walker.flatten() {
            let depth = entry.depth();
            if depth == 0 {
                continue;
            }
            if lines.len() >= self.max_entries {
                skipped += 1;
                continue;
            }
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            lines.push(format!(
                "{}{}{}",
                "  ".repeat(depth - 1),
                entry.file_name().to_string_lossy(),
                if is_dir { "/" } else { "" }
            ));
        }
        if skipped > 0 {
            lines.push(format!("... ({} more entries)", skipped));
        }
        if lines.is_empty() {
            return "(empty directory)".to_string();
        }
        lines.join("\n")
    }

    /// First `max_lines` lines of a regular file, lossily decoded.
    fn read_limited(&self, path: &Path) -> Option<String> {
        if !path.is_file() {
            return None;
        }
        let file = File::open(path)
            .map_err(|e| debug!(path = %path.display(), error = %e, "cannot read context file"))
            .ok()?;
        let mut reader = BufReader::new(file.take(MAX_FILE_BYTES));
        let mut lines = Vec::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            if lines.len() >= self.max_lines {
                lines.push(format!("... (truncated after {} lines)", self.max_lines));
                break;
            }
            buf.truncate(MAX_LINE_BYTES);
            let line = String::from_utf8_lossy(&buf);
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        let content = lines.join("\n");
        (!content.trim().is_empty()).then_some(content)
    }
}

fn detect_languages(root: &Path) -> Vec<&'static str> {
    let mut languages = Vec::new();
    for (marker, language) in LANGUAGE_MARKERS {
        if root.join(marker).is_file() && !languages.contains(language) {
            languages.push(*language);
        }
    }
    languages
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/bin")).unwrap();
        fs::create_dir_all(dir.path().join("target/debug")).unwrap();
        fs::write(dir.path().join("README.md"), "# demo\nA small tool.\n").unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"demo\"\n").unwrap();
        fs::write(dir.path().join("NOTES.txt"), "remember the milk\n").unwrap();
        fs::write(dir.path().join(".gitignore"), "target/\n").unwrap();
        fs::write(dir.path().join("src/main.rs"), "fn main() {}\n").unwrap();
        fs::write(dir.path().join("src/bin/extra.rs"), "fn main() {}\n").unwrap();
        fs::write(dir.path().join("target/debug/demo"), "bin").unwrap();
        dir
    }

    #[test]
    fn test_evaluator_strategy_order() {
        let evaluator = QueryEvaluator::default();
        let cwd = Path::new("/srv/app");

        let scope = evaluator.evaluate("what is in /etc/nginx/nginx.conf?", cwd);
        assert_eq!(scope.query_type, QueryType::FileOperation);
        assert!(scope.target.unwrap().ends_with("nginx.conf"));

        let scope = evaluator.evaluate("What programming language is this written in", cwd);
        assert_eq!(scope.query_type, QueryType::ProjectInfo);
        assert_eq!(scope.target.as_deref(), Some(cwd));

        let scope = evaluator.evaluate("summarise the repo for me", cwd);
        assert_eq!(scope.query_type, QueryType::ProjectInfo);

        let scope = evaluator.evaluate("install nginx and check disk usage", cwd);
        assert_eq!(scope, QueryScope::general());
        assert!(!scope.needs_context());
    }

    #[test]
    fn test_path_detection_relative_and_quoted() {
        let dir = project();
        let scope = PathDetection
            .evaluate("count lines in './src/main.rs'", dir.path())
            .unwrap();
        let expected = dir.path().join("src/main.rs").canonicalize().unwrap();
        assert_eq!(scope.target, Some(expected));

        // Fractions and bare slashes are not paths.
        assert!(PathDetection.evaluate("what is 1/2 of 10", dir.path()).is_none());
        assert!(PathDetection.evaluate("du -sh / please", dir.path()).is_none());
    }

    #[test]
    fn test_keywords_need_whole_words() {
        let cwd = Path::new("/tmp");
        assert!(KeywordDetection.evaluate("show the folder structure", cwd).is_some());
        assert!(KeywordDetection.evaluate("edit my profile settings", cwd).is_none());
        assert!(KeywordDetection.evaluate("decode this base64", cwd).is_none());
    }

    #[test]
    fn test_collect_project_directory() {
        let dir = project();
        let context = LocalContextCollector::new().collect(dir.path()).unwrap();

        let tree = context.tree.as_deref().unwrap();
        assert!(tree.contains("src/"));
        assert!(tree.contains("    extra.rs"));
        assert!(!tree.contains("target"), "gitignored dirs are skipped:\n{tree}");
        let src = tree.find("src/").unwrap();
        let readme = tree.find("README.md").unwrap();
        assert!(src < readme, "directories come first:\n{tree}");

        let names: Vec<_> = context.files.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["README.md", "Cargo.toml", ".gitignore", "NOTES.txt"]);
        assert_eq!(context.languages, ["Rust"]);

        let rendered = context.render();
        assert!(rendered.contains("Detected languages: Rust"));
        assert!(rendered.contains("A small tool."));
    }

    #[test]
    fn test_collect_single_file_and_line_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.log");
        let body: String = (0..50).map(|i| format!("line {i}\n")).collect();
        fs::write(&path, body).unwrap();

        let context = LocalContextCollector::new()
            .with_max_lines(10)
            .collect(&path)
            .unwrap();
        assert!(context.tree.is_none());
        let (name, content) = &context.files[0];
        assert_eq!(name, "big.log");
        assert!(content.starts_with("line 0\n"));
        assert!(content.contains("line 9"));
        assert!(!content.contains("line 10"));
        assert!(content.ends_with("(truncated after 10 lines)"));
    }

    #[test]
    fn test_missing_target_has_no_context() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LocalContextCollector::new()
            .collect(&dir.path().join("nope"))
            .is_none());
    }

    #[test]
    fn test_render_respects_budget() {
        let context = LocalContext {
            root: PathBuf::from("/p"),
            tree: None,
            files: vec![
                ("a.txt".to_string(), "x".repeat(MAX_ATTACHMENT_CHARS - 200)),
                ("b.txt".to_string(), "y".repeat(1000)),
            ],
            languages: Vec::new(),
        };
        let rendered = context.render();
        assert!(rendered.len() <= MAX_ATTACHMENT_CHARS + 40);
        assert!(rendered.contains("b.txt skipped"));
        assert!(!rendered.contains('y'));
    }
}
