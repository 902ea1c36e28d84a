//! Share root declarations.
//!
//! A root is declared as `[alias]absolute-path`. A leading `!` or `-` marks
//! the root hidden: peers cannot browse it, but the operator can still search
//! it. The alias becomes the first segment of every remote name under the
//! root and must be unique across all roots.

use crate::error::{IndexError, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// One declared share root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootSpec {
    /// Alias exposed to the overlay as the first path segment.
    pub alias: String,
    /// Absolute local path of the root.
    pub path: PathBuf,
    /// Hidden roots are excluded from peer browse/listing.
    pub hidden: bool,
}

impl RootSpec {
    /// Parse a root spec string.
    ///
    /// Accepted forms:
    /// - `/srv/music` (alias defaults to the last path segment)
    /// - `[music]/srv/music`
    /// - `![music]/srv/private` or `-[music]/srv/private` (hidden)
    pub fn parse(spec: &str) -> Result<Self> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Err(IndexError::invalid_root(spec, "empty spec"));
        }

        let (hidden, rest) = match trimmed.as_bytes()[0] {
            b'!' | b'-' => (true, &trimmed[1..]),
            _ => (false, trimmed),
        };

        let (alias, raw_path) = if let Some(stripped) = rest.strip_prefix('[') {
            let close = stripped
                .find(']')
                .ok_or_else(|| IndexError::invalid_root(spec, "unterminated alias bracket"))?;
            let alias = &stripped[..close];
            if alias.is_empty() {
                return Err(IndexError::invalid_root(spec, "empty alias"));
            }
            (alias.to_string(), &stripped[close + 1..])
        } else {
            let alias = Path::new(rest)
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    IndexError::invalid_root(spec, "cannot derive an alias from the path")
                })?;
            (alias.to_string(), rest)
        };

        if alias.contains('\\') || alias.contains('/') {
            return Err(IndexError::invalid_root(spec, "alias contains a separator"));
        }

        let path = PathBuf::from(raw_path);
        if !path.is_absolute() {
            return Err(IndexError::invalid_root(spec, "path must be absolute"));
        }

        Ok(RootSpec {
            alias,
            path,
            hidden,
        })
    }

    /// Parse and cross-validate a whole list of root specs.
    ///
    /// Aliases must be unique, and no two roots may point at the same
    /// absolute path.
    pub fn parse_all(specs: &[String]) -> Result<Vec<RootSpec>> {
        let roots: Vec<RootSpec> = specs
            .iter()
            .map(|s| RootSpec::parse(s))
            .collect::<Result<_>>()?;
        validate(&roots)?;
        Ok(roots)
    }
}

/// Check alias and path uniqueness across a set of roots.
pub fn validate(roots: &[RootSpec]) -> Result<()> {
    let mut aliases = HashSet::new();
    let mut paths = HashSet::new();

    for root in roots {
        if !aliases.insert(root.alias.to_lowercase()) {
            return Err(IndexError::RootConflict(format!(
                "alias '{}' declared twice",
                root.alias
            )));
        }
        if !paths.insert(root.path.clone()) {
            return Err(IndexError::RootConflict(format!(
                "path '{}' declared twice",
                root.path.display()
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_path() {
        let root = RootSpec::parse("/srv/music").unwrap();
        assert_eq!(root.alias, "music");
        assert_eq!(root.path, PathBuf::from("/srv/music"));
        assert!(!root.hidden);
    }

    #[test]
    fn test_parse_aliased_path() {
        let root = RootSpec::parse("[tunes]/srv/music").unwrap();
        assert_eq!(root.alias, "tunes");
        assert_eq!(root.path, PathBuf::from("/srv/music"));
    }

    #[test]
    fn test_parse_hidden_markers() {
        let bang = RootSpec::parse("![tunes]/srv/music").unwrap();
        assert!(bang.hidden);

        let dash = RootSpec::parse("-[tunes]/srv/music").unwrap();
        assert!(dash.hidden);
        assert_eq!(dash.alias, "tunes");
    }

    #[test]
    fn test_parse_rejects_relative_path() {
        assert!(matches!(
            RootSpec::parse("[a]relative/path"),
            Err(IndexError::InvalidRoot { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_malformed_alias() {
        assert!(RootSpec::parse("[a/srv/music").is_err());
        assert!(RootSpec::parse("[]/srv/music").is_err());
        assert!(RootSpec::parse("[a/b]/srv/music").is_err());
    }

    #[test]
    fn test_validate_duplicate_alias() {
        let roots = vec![
            RootSpec::parse("[m]/srv/a").unwrap(),
            RootSpec::parse("[M]/srv/b").unwrap(),
        ];
        assert!(matches!(
            validate(&roots),
            Err(IndexError::RootConflict(_))
        ));
    }

    #[test]
    fn test_validate_duplicate_path() {
        let roots = vec![
            RootSpec::parse("[a]/srv/music").unwrap(),
            RootSpec::parse("[b]/srv/music").unwrap(),
        ];
        assert!(matches!(
            validate(&roots),
            Err(IndexError::RootConflict(_))
        ));
    }

    #[test]
    fn test_parse_all_happy_path() {
        let specs = vec![
            "[music]/srv/music".to_string(),
            "![private]/srv/private".to_string(),
        ];
        let roots = RootSpec::parse_all(&specs).unwrap();
        assert_eq!(roots.len(), 2);
        assert!(roots[1].hidden);
    }
}
