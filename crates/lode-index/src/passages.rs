//! Passage directory loader.

use std::path::Path;

use tracing::{debug, warn};

use lode_core::error::Result;
use lode_core::types::Passage;

/// Files that matched the extension but could not be read as UTF-8 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadablePassage {
    pub key: String,
    pub error: String,
}

/// Read every `*.{extension}` file directly under `dir`, sorted by filename.
///
/// The filename is the passage key. A missing directory yields no passages.
pub fn load_passages(
    dir: &Path,
    extension: &str,
) -> Result<(Vec<Passage>, Vec<UnreadablePassage>)> {
    if !dir.exists() {
        warn!(dir = %dir.display(), "Passage directory does not exist");
        return Ok((Vec::new(), Vec::new()));
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path.is_file()
            && path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(extension));
        if matches {
            paths.push(path);
        }
    }
    paths.sort();

    let mut passages = Vec::with_capacity(paths.len());
    let mut unreadable = Vec::new();
    for path in paths {
        let Some(key) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            warn!(path = %path.display(), "Skipping passage with non-UTF-8 filename");
            continue;
        };
        match std::fs::read_to_string(&path) {
            Ok(content) => passages.push(Passage::new(key, content, path)),
            Err(e) => {
                warn!(key = %key, error = %e, "Passage unreadable");
                unreadable.push(UnreadablePassage {
                    key,
                    error: e.to_string(),
                });
            }
        }
    }

    debug!(
        dir = %dir.display(),
        loaded = passages.len(),
        unreadable = unreadable.len(),
        "Passages loaded"
    );
    Ok((passages, unreadable))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loads_matching_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "second").unwrap();
        std::fs::write(dir.path().join("a.txt"), "first").unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();
        std::fs::create_dir(dir.path().join("nested.txt")).unwrap();

        let (passages, unreadable) = load_passages(dir.path(), "txt").unwrap();
        let keys: Vec<&str> = passages.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["a.txt", "b.txt"]);
        assert_eq!(passages[0].content, "first");
        assert_eq!(passages[0].source_path, dir.path().join("a.txt"));
        assert!(unreadable.is_empty());
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (passages, unreadable) = load_passages(&dir.path().join("absent"), "txt").unwrap();
        assert!(passages.is_empty());
        assert!(unreadable.is_empty());
    }

    #[test]
    fn test_non_utf8_content_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.txt"), [0xff, 0xfe, 0xfd]).unwrap();
        std::fs::write(dir.path().join("good.txt"), "ok").unwrap();

        let (passages, unreadable) = load_passages(dir.path(), "txt").unwrap();
        assert_eq!(passages.len(), 1);
        assert_eq!(unreadable.len(), 1);
        assert_eq!(unreadable[0].key, "bad.txt");
    }
}
