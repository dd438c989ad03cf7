//! Cheatsheet loading, memoized for the life of the process.

use std::path::Path;
use std::sync::OnceLock;

use tracing::{debug, warn};

use strudel_rag_core::prompt::DEFAULT_CHEATSHEET;

static CHEATSHEET: OnceLock<String> = OnceLock::new();

/// The cheatsheet text, read from `path` on first call.
///
/// Falls back to the embedded cheatsheet when no path is configured or the
/// file cannot be read. Later calls return the first result.
pub fn cheatsheet(path: Option<&Path>) -> &'static str {
    CHEATSHEET.get_or_init(|| load(path))
}

fn load(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return DEFAULT_CHEATSHEET.to_string();
    };
    match std::fs::read_to_string(path) {
        Ok(text) => {
            debug!(path = %path.display(), "cheatsheet loaded");
            text
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cheatsheet unreadable, using built-in");
            DEFAULT_CHEATSHEET.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_falls_back() {
        assert_eq!(load(None), DEFAULT_CHEATSHEET);
        assert_eq!(load(Some(Path::new("/nonexistent/cheatsheet.md"))), DEFAULT_CHEATSHEET);
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cheatsheet.md");
        std::fs::write(&path, "s(\"bd\") plays a kick").unwrap();
        assert_eq!(load(Some(&path)), "s(\"bd\") plays a kick");
    }

    #[test]
    fn test_memoized() {
        let first = cheatsheet(None);
        let second = cheatsheet(Some(Path::new("/elsewhere.md")));
        assert!(std::ptr::eq(first, second));
    }
}
