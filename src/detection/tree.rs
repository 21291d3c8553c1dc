//! # Scan mode: candidates from a directory of compiled classes.
//!
//! ```text
//! <root>/com/acme/FooTest.class        ─► com.acme.FooTest
//! <root>/com/acme/FooTest$Inner.class  ─► com.acme.FooTest$Inner
//! <root>/com/acme/FooTest$1.class      ─► (skipped: anonymous)
//! <root>/com/acme/notes.txt            ─► (skipped: not a class file)
//! ```
//!
//! Entries are visited in file-name order so enumeration is deterministic.
//! Include/exclude filters are globs over the path relative to the root
//! (`**/*Test.class`); an empty include set accepts everything.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;
use walkdir::WalkDir;

use super::detector::Candidate;
use crate::error::DetectionError;

const CLASS_EXT: &str = "class";

/// Directory tree of compiled test classes.
#[derive(Debug, Clone)]
pub struct ClassFileTree {
    root: PathBuf,
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl ClassFileTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            include: None,
            exclude: None,
        }
    }

    /// Only class files matching one of `patterns` are candidates.
    pub fn with_includes<I, S>(mut self, patterns: I) -> Result<Self, DetectionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.include = build_set(patterns)?;
        Ok(self)
    }

    /// Class files matching one of `patterns` are never candidates.
    pub fn with_excludes<I, S>(mut self, patterns: I) -> Result<Self, DetectionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.exclude = build_set(patterns)?;
        Ok(self)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walks the tree, yielding candidates and unreadable entries.
    pub fn scan(&self) -> impl Iterator<Item = Result<Candidate, DetectionError>> + '_ {
        WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(move |entry| match entry {
                Ok(entry) if entry.file_type().is_file() => self.candidate(entry.path()).map(Ok),
                Ok(_) => None,
                Err(source) => Some(Err(DetectionError::Io {
                    path: source.path().map(Path::to_path_buf),
                    source,
                })),
            })
    }

    fn candidate(&self, path: &Path) -> Option<Candidate> {
        if path.extension().and_then(|e| e.to_str()) != Some(CLASS_EXT) {
            return None;
        }
        let rel = path.strip_prefix(&self.root).ok()?;
        if self.include.as_ref().is_some_and(|set| !set.is_match(rel)) {
            return None;
        }
        if self.exclude.as_ref().is_some_and(|set| set.is_match(rel)) {
            return None;
        }

        let name = class_name(rel)?;
        if is_anonymous(&name) {
            debug!(class = %name, "skipping anonymous class");
            return None;
        }
        Some(Candidate {
            name: Arc::from(name),
            path: Some(path.to_path_buf()),
        })
    }
}

fn build_set<I, S>(patterns: I) -> Result<Option<GlobSet>, DetectionError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut builder = GlobSetBuilder::new();
    let mut any = false;
    for pattern in patterns {
        let glob = Glob::new(pattern.as_ref()).map_err(|source| DetectionError::Pattern { source })?;
        builder.add(glob);
        any = true;
    }
    if !any {
        return Ok(None);
    }
    builder
        .build()
        .map(Some)
        .map_err(|source| DetectionError::Pattern { source })
}

/// `a/b/C.class` → `a.b.C`; `None` for non UTF-8 paths.
fn class_name(rel: &Path) -> Option<String> {
    let stem = rel.with_extension("");
    let mut parts = Vec::new();
    for component in stem.components() {
        parts.push(component.as_os_str().to_str()?);
    }
    Some(parts.join("."))
}

/// Compiler-generated anonymous classes carry a numeric `$` segment (`Outer$1`).
fn is_anonymous(class_name: &str) -> bool {
    class_name
        .split('$')
        .skip(1)
        .any(|seg| seg.starts_with(|c: char| c.is_ascii_digit()))
}
