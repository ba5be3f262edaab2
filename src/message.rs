//! Relayed line definition
//!
//! The relay never parses what clients send: a `Line` is an opaque,
//! immutable piece of text without its terminating newline.

use std::sync::Arc;

/// One relayed line of text
///
/// Backed by `Arc<str>` so a single fan-out can hand the same line to
/// every recipient queue without copying the payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Line(Arc<str>);

impl Line {
    /// Create a line from any string-like value
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self(text.into())
    }

    /// Borrow the text of this line
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length of the line in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the line is empty (an empty line is still relayed)
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Line {
    fn from(text: String) -> Self {
        Self(text.into())
    }
}

impl From<&str> for Line {
    fn from(text: &str) -> Self {
        Self(text.into())
    }
}

impl AsRef<str> for Line {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Line {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_from_string() {
        let line = Line::from("[12:00] alice: hi".to_string());
        assert_eq!(line.as_str(), "[12:00] alice: hi");
        assert_eq!(line.len(), 17);
        assert!(!line.is_empty());
    }

    #[test]
    fn test_line_clone_shares_payload() {
        let line = Line::new("shared");
        let copy = line.clone();
        assert!(Arc::ptr_eq(&line.0, &copy.0));
    }

    #[test]
    fn test_empty_line() {
        let line = Line::from("");
        assert!(line.is_empty());
        assert_eq!(line.to_string(), "");
    }
}
