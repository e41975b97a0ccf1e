//! Document and collection paths.
//!
//! Paths are hierarchical and alternate between collection names and document
//! IDs: `users/u1` is a document, `downloads/u1/downloads` is a collection and
//! `downloads/u1/downloads/b7` is a document inside it. Every segment is
//! validated on construction so backends can map segments straight onto keys
//! or file names.

use std::fmt;

use crate::error::{ErrorKind, Result};

/// Upper bound on the encoded size of a single segment.
pub const MAX_SEGMENT_BYTES: usize = 1500;

/// Validates a single path segment (a collection name or a document ID).
///
/// # Examples
///
/// ```
/// use booktally_store::path::validate_segment;
/// // Valid segments
/// assert!(validate_segment("users").is_ok());
/// assert!(validate_segment("book-123.epub").is_ok());
/// // Invalid segments
/// assert!(validate_segment("").is_err());
/// assert!(validate_segment("..").is_err());
/// assert!(validate_segment("a/b").is_err());
/// assert!(validate_segment("a\0b").is_err());
/// ```
pub fn validate_segment(segment: &str) -> Result<&str> {
    let invalid = segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.len() > MAX_SEGMENT_BYTES
        // Null bytes cause truncation in C-based syscalls, and path
        // separators would let an ID address a different document.
        || segment.contains(['/', '\\', '\0']);
    if invalid {
        exn::bail!(ErrorKind::InvalidPath(segment.escape_debug().to_string()));
    }
    Ok(segment)
}

fn split(path: &str) -> Result<Vec<String>> {
    // Tolerate a single leading or trailing separator, nothing else.
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    trimmed
        .split('/')
        .map(|segment| validate_segment(segment).map(str::to_string))
        .collect::<Result<Vec<_>>>()
}

/// Path to a single document: an even number of segments.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath {
    segments: Vec<String>,
}
impl DocumentPath {
    /// Parse a slash-separated document path.
    ///
    /// ```
    /// use booktally_store::path::DocumentPath;
    ///
    /// let path = DocumentPath::parse("downloads/u1/downloads/b7").unwrap();
    /// assert_eq!(path.id(), "b7");
    /// assert_eq!(path.collection().to_string(), "downloads/u1/downloads");
    /// // Collections are not documents
    /// assert!(DocumentPath::parse("downloads/u1/downloads").is_err());
    /// ```
    pub fn parse(path: &str) -> Result<Self> {
        let segments = split(path)?;
        if segments.len() % 2 != 0 {
            exn::bail!(ErrorKind::InvalidPath(path.to_string()));
        }
        Ok(Self { segments })
    }

    /// Top-level document `{collection}/{id}`.
    pub fn new(collection: &str, id: &str) -> Result<Self> {
        Ok(Self {
            segments: vec![validate_segment(collection)?.to_string(), validate_segment(id)?.to_string()],
        })
    }

    /// The document ID (last segment).
    pub fn id(&self) -> &str {
        // Never empty: constructors reject zero segments.
        &self.segments[self.segments.len() - 1]
    }

    /// The collection this document lives in.
    pub fn collection(&self) -> CollectionPath {
        CollectionPath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        }
    }

    /// A sub-collection nested under this document.
    pub fn subcollection(&self, name: &str) -> Result<CollectionPath> {
        let mut segments = self.segments.clone();
        segments.push(validate_segment(name)?.to_string());
        Ok(CollectionPath { segments })
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(String::as_str)
    }
}
impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}
impl fmt::Debug for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentPath({self})")
    }
}

/// Path to a collection of documents: an odd number of segments.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath {
    segments: Vec<String>,
}
impl CollectionPath {
    /// Parse a slash-separated collection path.
    pub fn parse(path: &str) -> Result<Self> {
        let segments = split(path)?;
        if segments.len() % 2 != 1 {
            exn::bail!(ErrorKind::InvalidPath(path.to_string()));
        }
        Ok(Self { segments })
    }

    /// Top-level collection.
    pub fn root(name: &str) -> Result<Self> {
        Ok(Self {
            segments: vec![validate_segment(name)?.to_string()],
        })
    }

    /// Path of the document `id` inside this collection.
    pub fn doc(&self, id: &str) -> Result<DocumentPath> {
        let mut segments = self.segments.clone();
        segments.push(validate_segment(id)?.to_string());
        Ok(DocumentPath { segments })
    }

    /// Whether `path` is a direct child of this collection.
    pub fn contains(&self, path: &DocumentPath) -> bool {
        path.segments.len() == self.segments.len() + 1 && path.segments.starts_with(&self.segments)
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(String::as_str)
    }
}
impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}
impl fmt::Debug for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CollectionPath({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("users/u1")]
    #[case("/users/u1")]
    #[case("users/u1/")]
    #[case("downloads/u1/downloads/b7")]
    #[case("downloads/user@example.com/downloads/isbn:978-0-00")]
    fn test_valid_document_paths(#[case] path: &str) {
        assert!(DocumentPath::parse(path).is_ok(), "{path} should be valid");
    }

    #[rstest]
    #[case("")]
    #[case("users")]
    #[case("users//u1")]
    #[case("users/../u1")]
    #[case("users/./u1")]
    #[case("users/u1/downloads")]
    #[case("users/u\0")]
    #[case("users/a\\b")]
    fn test_invalid_document_paths(#[case] path: &str) {
        assert!(DocumentPath::parse(path).is_err(), "{path} should be invalid");
    }

    #[test]
    fn test_display_round_trip() {
        let path = DocumentPath::parse("/downloads/u1/downloads/b7/").unwrap();
        assert_eq!(path.to_string(), "downloads/u1/downloads/b7");
        assert_eq!(DocumentPath::parse(&path.to_string()).unwrap(), path);
    }

    #[test]
    fn test_navigation() {
        let user = DocumentPath::new("downloads", "u1").unwrap();
        let ledger = user.subcollection("downloads").unwrap();
        assert_eq!(ledger.to_string(), "downloads/u1/downloads");
        let record = ledger.doc("b7").unwrap();
        assert_eq!(record.id(), "b7");
        assert_eq!(record.collection(), ledger);
        assert!(ledger.contains(&record));
        assert!(!ledger.contains(&user));
    }

    #[test]
    fn test_contains_is_segment_based() {
        let ledger = CollectionPath::parse("downloads/u1/downloads").unwrap();
        let other = DocumentPath::parse("downloads/u10/downloads/b7").unwrap();
        assert!(!ledger.contains(&other));
    }

    #[test]
    fn test_segment_length_limit() {
        let long = "x".repeat(MAX_SEGMENT_BYTES + 1);
        assert!(validate_segment(&long).is_err());
        assert!(validate_segment(&long[1..]).is_ok());
    }

    #[test]
    fn test_invalid_id_reported() {
        let err = DocumentPath::new("users", "a/b").unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(id) if id == "a/b"));
    }
}
