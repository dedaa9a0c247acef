//! Include resolution.
//!
//! The front end calls an [`IncludeHandler`] synchronously for every `#include` it meets,
//! depth-first in source order. Handlers own nothing across calls: each resolution returns
//! its bytes by value, so a nested include can be resolved while the parent is still being
//! processed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Which form of `#include` was written.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum IncludeKind {
    /// `#include "path"`
    Quoted,
    /// `#include <path>`
    Angled,
}

/// One `#include` directive to resolve.
#[derive(Debug, Copy, Clone)]
pub struct IncludeRequest<'a> {
    /// The path as written between the delimiters.
    pub path: &'a str,
    pub kind: IncludeKind,
    /// Name of the file containing the directive.
    pub includer: &'a str,
}

/// A resolved include.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeSource {
    /// Name used for diagnostics inside the included file.
    pub name: String,
    /// UTF-8 file contents.
    pub contents: Vec<u8>,
}

impl IncludeSource {
    pub fn new(name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
        }
    }
}

/// Host-supplied include lookup.
///
/// Returning `None` means "not found"; the front end turns that into a diagnostic naming the
/// path.
pub trait IncludeHandler {
    fn resolve(&mut self, request: &IncludeRequest<'_>) -> Option<IncludeSource>;
}

impl<F> IncludeHandler for F
where
    F: FnMut(&IncludeRequest<'_>) -> Option<IncludeSource>,
{
    fn resolve(&mut self, request: &IncludeRequest<'_>) -> Option<IncludeSource> {
        self(request)
    }
}

/// Resolves nothing.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoIncludeHandler;

impl IncludeHandler for NoIncludeHandler {
    fn resolve(&mut self, _request: &IncludeRequest<'_>) -> Option<IncludeSource> {
        None
    }
}

/// Serves includes from an in-memory map keyed by the path as written.
#[derive(Debug, Default, Clone)]
pub struct MemoryIncludeHandler {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryIncludeHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(path, contents);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), contents.into());
    }
}

impl IncludeHandler for MemoryIncludeHandler {
    fn resolve(&mut self, request: &IncludeRequest<'_>) -> Option<IncludeSource> {
        self.files
            .get(request.path)
            .map(|contents| IncludeSource::new(request.path, contents.clone()))
    }
}

/// The default handler: reads from disk.
///
/// Quoted includes look next to the including file first; both forms then try each search
/// directory in order.
#[derive(Debug, Default, Clone)]
pub struct FileSystemIncludeHandler {
    search_dirs: Vec<PathBuf>,
}

impl FileSystemIncludeHandler {
    pub fn new(search_dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            search_dirs: search_dirs.into_iter().collect(),
        }
    }

    fn candidates(&self, request: &IncludeRequest<'_>) -> Vec<PathBuf> {
        let path = Path::new(request.path);
        if path.is_absolute() {
            return vec![path.to_path_buf()];
        }

        let mut candidates = Vec::with_capacity(self.search_dirs.len() + 1);
        if request.kind == IncludeKind::Quoted {
            let base = Path::new(request.includer)
                .parent()
                .unwrap_or_else(|| Path::new(""));
            candidates.push(base.join(path));
        }
        candidates.extend(self.search_dirs.iter().map(|dir| dir.join(path)));
        candidates
    }
}

impl IncludeHandler for FileSystemIncludeHandler {
    fn resolve(&mut self, request: &IncludeRequest<'_>) -> Option<IncludeSource> {
        for candidate in self.candidates(request) {
            match std::fs::read(&candidate) {
                Ok(contents) => {
                    log::debug!("[mach-dxc] resolved '{}' to {}", request.path, candidate.display());
                    return Some(IncludeSource::new(candidate.display().to_string(), contents));
                }
                Err(e) => log::trace!("[mach-dxc] {}: {}", candidate.display(), e),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str) -> IncludeRequest<'_> {
        IncludeRequest {
            path,
            kind: IncludeKind::Quoted,
            includer: "hlsl.hlsl",
        }
    }

    #[test]
    fn memory_handler_matches_exact_path() {
        let mut handler = MemoryIncludeHandler::new().with_file("common.hlsli", "#define X 1");
        let found = handler.resolve(&request("common.hlsli")).unwrap();
        assert_eq!(found.contents, b"#define X 1");
        assert!(handler.resolve(&request("other.hlsli")).is_none());
    }

    fn counting(calls: &mut u32) -> impl FnMut(&IncludeRequest<'_>) -> Option<IncludeSource> + '_ {
        move |req| {
            *calls += 1;
            Some(IncludeSource::new(req.path, Vec::new()))
        }
    }

    #[test]
    fn closures_are_handlers() {
        let mut calls = 0;
        let mut handler = counting(&mut calls);
        assert!(handler.resolve(&request("a.h")).is_some());
        drop(handler);
        assert_eq!(calls, 1);
    }

    #[test]
    fn filesystem_search_order() {
        let handler = FileSystemIncludeHandler::new([PathBuf::from("inc"), PathBuf::from("sys")]);
        let quoted = handler.candidates(&IncludeRequest {
            path: "a.h",
            kind: IncludeKind::Quoted,
            includer: "shaders/main.hlsl",
        });
        assert_eq!(
            quoted,
            vec![
                PathBuf::from("shaders/a.h"),
                PathBuf::from("inc/a.h"),
                PathBuf::from("sys/a.h")
            ]
        );

        let angled = handler.candidates(&IncludeRequest {
            path: "a.h",
            kind: IncludeKind::Angled,
            includer: "shaders/main.hlsl",
        });
        assert_eq!(angled, vec![PathBuf::from("inc/a.h"), PathBuf::from("sys/a.h")]);
    }

    #[test]
    fn filesystem_reports_missing() {
        let mut handler = FileSystemIncludeHandler::default();
        assert!(handler
            .resolve(&request("definitely/not/here/missing.hlsli"))
            .is_none());
    }
}
