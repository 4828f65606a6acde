//! Source corpus: which files are indexable and how paths are keyed.

use std::path::{Component, Path, PathBuf};

pub const DEFAULT_EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

/// An indexable file found under the corpus root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusFile {
    pub abs_path: PathBuf,
    /// Path relative to the root with `/` separators; the index key.
    pub rel_path: String,
}

#[derive(Debug, Clone)]
pub struct Corpus {
    root: PathBuf,
    extensions: Vec<String>,
}

impl Corpus {
    /// The root is canonicalized when it exists so watcher events match it.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, extensions: &[String]) -> Self {
        let root = root.into();
        let root = root.canonicalize().unwrap_or(root);
        let extensions = if extensions.is_empty() {
            DEFAULT_EXTENSIONS.iter().map(|e| (*e).to_owned()).collect()
        } else {
            extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect()
        };
        Self { root, extensions }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Extension matches and no path component below the root is hidden.
    #[must_use]
    pub fn is_indexable(&self, path: &Path) -> bool {
        let has_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)));
        if !has_ext {
            return false;
        }
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        !rel.components().any(|c| match c {
            Component::Normal(s) => s.to_str().is_some_and(|s| s.starts_with('.')),
            _ => false,
        })
    }

    /// Index key for `path`, which may be absolute or relative to the root.
    /// `None` when the path leaves the root or names the root itself.
    #[must_use]
    pub fn relative(&self, path: &Path) -> Option<String> {
        let rel = if path.is_absolute() {
            path.strip_prefix(&self.root).ok()?
        } else {
            path
        };
        let mut parts: Vec<String> = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(s) => parts.push(s.to_string_lossy().into_owned()),
                Component::CurDir => {}
                Component::ParentDir => {
                    parts.pop()?;
                }
                Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        (!parts.is_empty()).then(|| parts.join("/"))
    }

    #[must_use]
    pub fn resolve(&self, rel_path: &str) -> PathBuf {
        self.root.join(rel_path)
    }

    /// All indexable files, honoring `.gitignore` and skipping hidden entries,
    /// sorted by relative path.
    #[must_use]
    pub fn walk(&self) -> Vec<CorpusFile> {
        let mut files: Vec<CorpusFile> = ignore::WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(true)
            .build()
            .flatten()
            .filter(|e| e.file_type().is_some_and(|ft| ft.is_file()) && self.is_indexable(e.path()))
            .filter_map(|e| {
                Some(CorpusFile {
                    rel_path: self.relative(e.path())?,
                    abs_path: e.into_path(),
                })
            })
            .collect();
        files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        files
    }
}

/// `content_type` payload value for a file.
#[must_use]
pub fn content_type(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    if ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("markdown") {
        "markdown"
    } else {
        "text"
    }
}
