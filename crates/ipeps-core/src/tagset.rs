//! Sorted, de-duplicated tag sets attached to tensor legs.
//!
//! Tags only describe a leg (site role, bond direction, reduced leg, ...).
//! They never take part in leg matching: two legs pair in a contraction
//! when their identities and layers agree.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

/// Maximum number of tags on a single leg.
pub const MAX_TAGS: usize = 6;

/// Maximum length of a single tag in bytes.
pub const MAX_TAG_LEN: usize = 16;

/// Error type for tag set construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagSetError {
    #[error("too many tags: {count} (max {max})")]
    TooManyTags { count: usize, max: usize },
    #[error("tag '{tag}' is longer than {max} bytes")]
    TagTooLong { tag: String, max: usize },
    #[error("invalid tag '{0}': tags must be non-empty and must not contain ',' or whitespace")]
    InvalidTag(String),
}

/// An immutable, cheaply clonable set of tags.
///
/// Tags are kept sorted so that equality does not depend on insertion order.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TagSet(Arc<[String]>);

impl TagSet {
    /// Empty tag set.
    pub fn new() -> Self {
        Self(Arc::from(Vec::new()))
    }

    /// Build a tag set from individual tags.
    pub fn from_tags<S: AsRef<str>>(tags: &[S]) -> Result<Self, TagSetError> {
        let mut out: Vec<String> = Vec::with_capacity(tags.len());
        for tag in tags {
            let tag = tag.as_ref().trim();
            validate_tag(tag)?;
            out.push(tag.to_string());
        }
        out.sort();
        out.dedup();
        if out.len() > MAX_TAGS {
            return Err(TagSetError::TooManyTags {
                count: out.len(),
                max: MAX_TAGS,
            });
        }
        Ok(Self(out.into()))
    }

    /// Return a new set with `tag` added.
    pub fn with_tag(&self, tag: &str) -> Result<Self, TagSetError> {
        let mut tags: Vec<&str> = self.iter().collect();
        tags.push(tag);
        Self::from_tags(&tags)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.0.binary_search_by(|t| t.as_str().cmp(tag)).is_ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Value of the first `key=value` tag with the given key.
    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.iter().find_map(|t| {
            t.strip_prefix(key)
                .and_then(|rest| rest.strip_prefix('='))
        })
    }
}

impl Default for TagSet {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_tag(tag: &str) -> Result<(), TagSetError> {
    if tag.is_empty() || tag.contains(',') || tag.chars().any(char::is_whitespace) {
        return Err(TagSetError::InvalidTag(tag.to_string()));
    }
    if tag.len() > MAX_TAG_LEN {
        return Err(TagSetError::TagTooLong {
            tag: tag.to_string(),
            max: MAX_TAG_LEN,
        });
    }
    Ok(())
}

impl FromStr for TagSet {
    type Err = TagSetError;

    /// Parse a comma-separated list, e.g. `"site=A,dir=right"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Self::new());
        }
        let tags: Vec<&str> = s.split(',').collect();
        Self::from_tags(&tags)
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, tag) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(tag)?;
        }
        Ok(())
    }
}

impl fmt::Debug for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_sorted_and_deduplicated() {
        let a: TagSet = "site=A,dir=up,site=A".parse().unwrap();
        let b: TagSet = "dir=up,site=A".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.to_string(), "dir=up,site=A");
    }

    #[test]
    fn test_value_of() {
        let t: TagSet = "site=B,phys".parse().unwrap();
        assert_eq!(t.value_of("site"), Some("B"));
        assert_eq!(t.value_of("dir"), None);
        assert!(t.has_tag("phys"));
    }

    #[test]
    fn test_invalid_tags_rejected() {
        assert!(matches!(
            TagSet::from_tags(&["a b"]),
            Err(TagSetError::InvalidTag(_))
        ));
        assert!(matches!(
            TagSet::from_tags(&["abcdefghijklmnopq"]),
            Err(TagSetError::TagTooLong { .. })
        ));
        assert!(matches!(
            "a,b,c,d,e,f,g".parse::<TagSet>(),
            Err(TagSetError::TooManyTags { count: 7, .. })
        ));
    }

    #[test]
    fn test_empty_string_is_empty_set() {
        let t: TagSet = "".parse().unwrap();
        assert!(t.is_empty());
    }
}
