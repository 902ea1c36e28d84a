//! Catalog search backends.
//!
//! Two storage modes exist: an in-memory postings map, and an on-disk
//! full-text index for nodes whose share is too large to keep token postings
//! resident. Both answer the same whole-word intersection queries; the
//! choice is an operator setting.

use crate::catalog::{SharedFile, tokenize};
use crate::error::Result;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// The token index behind one catalog.
pub enum CatalogBackend {
    /// Lowercased whole-word token -> sorted file ids.
    Memory {
        /// Posting lists.
        tokens: HashMap<String, Vec<u32>>,
    },
    /// FTS5 table keyed by file id, one row per file.
    Disk {
        /// Connection to the catalog's private database.
        conn: Mutex<Connection>,
    },
}

impl CatalogBackend {
    /// A backend with nothing in it.
    #[must_use]
    pub fn empty() -> Self {
        CatalogBackend::Memory {
            tokens: HashMap::new(),
        }
    }

    /// Build the in-memory postings map.
    #[must_use]
    pub fn memory(files: &[SharedFile]) -> Self {
        let mut tokens: HashMap<String, Vec<u32>> = HashMap::new();
        for file in files {
            let mut seen = tokenize(&file.remote_name);
            seen.sort_unstable();
            seen.dedup();
            for token in seen {
                tokens.entry(token).or_default().push(file.id);
            }
        }
        CatalogBackend::Memory { tokens }
    }

    /// Build the on-disk full-text index.
    ///
    /// `path` of `None` keeps the index in a private in-memory database,
    /// which is what tests use.
    pub fn disk(files: &[SharedFile], path: Option<&Path>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)?,
            None => Connection::open_in_memory()?,
        };

        conn.execute_batch(
            "DROP TABLE IF EXISTS share_names;
             CREATE VIRTUAL TABLE share_names USING fts5(name, tokenize='unicode61');",
        )?;

        {
            let mut insert =
                conn.prepare("INSERT INTO share_names (rowid, name) VALUES (?1, ?2)")?;
            for file in files {
                insert.execute((file.id as i64, file.remote_name.as_str()))?;
            }
        }

        Ok(CatalogBackend::Disk {
            conn: Mutex::new(conn),
        })
    }

    /// Ids of files containing every token as a whole word.
    pub fn search(&self, tokens: &[String]) -> Result<Vec<u32>> {
        match self {
            CatalogBackend::Memory { tokens: postings } => {
                Ok(intersect_postings(postings, tokens))
            }
            CatalogBackend::Disk { conn } => {
                // Quoted terms joined with AND: whole-word conjunction.
                let query = tokens
                    .iter()
                    .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
                    .collect::<Vec<_>>()
                    .join(" AND ");

                let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
                let mut stmt =
                    conn.prepare("SELECT rowid FROM share_names WHERE share_names MATCH ?1")?;
                let ids = stmt
                    .query_map([query], |row| row.get::<_, i64>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(ids.into_iter().map(|id| id as u32).collect())
            }
        }
    }
}

/// Intersect sorted posting lists, smallest first.
fn intersect_postings(postings: &HashMap<String, Vec<u32>>, tokens: &[String]) -> Vec<u32> {
    let mut lists: Vec<&Vec<u32>> = Vec::with_capacity(tokens.len());
    for token in tokens {
        match postings.get(token) {
            Some(list) => lists.push(list),
            None => return Vec::new(),
        }
    }
    lists.sort_by_key(|l| l.len());

    let (first, rest) = match lists.split_first() {
        Some(split) => split,
        None => return Vec::new(),
    };

    first
        .iter()
        .copied()
        .filter(|id| rest.iter().all(|list| list.binary_search(id).is_ok()))
        .collect()
}
