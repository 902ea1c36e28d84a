//! The immutable share catalog.
//!
//! One [`Catalog`] is the complete product of one scan. It is never mutated:
//! a refill builds a new catalog on the side and swaps the active reference.
//! Remote names use the overlay's backslash separator with the root alias as
//! the first segment; local paths stay in host form.

use crate::audio::AudioInfo;
use crate::error::{IndexError, Result};
use crate::store::CatalogBackend;
use drift_proto::{RemoteDirectory, RemoteFile};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// The overlay path separator.
pub const REMOTE_SEPARATOR: char = '\\';

/// One shared file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFile {
    /// Catalog-local identifier, stable within one catalog only.
    pub id: u32,
    /// Full remote name, e.g. `music\album\track.mp3`.
    pub remote_name: String,
    /// Absolute local path in host form.
    pub local_path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Lowercased extension without the dot, empty when none.
    pub extension: String,
    /// Probed audio properties, when the probe succeeded.
    pub audio: Option<AudioInfo>,
    /// Inherited from the root: hidden files are operator-search-only.
    pub hidden: bool,
}

impl SharedFile {
    /// Convert to the overlay wire representation.
    #[must_use]
    pub fn to_remote(&self) -> RemoteFile {
        RemoteFile {
            name: self.remote_name.clone(),
            size: self.size,
            extension: self.extension.clone(),
            bitrate: self.audio.map(|a| a.bitrate),
            duration: self.audio.map(|a| a.duration_secs),
            is_vbr: self.audio.map(|a| a.is_vbr).unwrap_or(false),
        }
    }
}

/// One shared directory. Every ancestor of every file is represented.
#[derive(Debug, Clone, Default)]
pub struct SharedDirectory {
    /// Full remote path of the directory.
    pub remote_path: String,
    /// Hidden directories are excluded from peer browse and listing.
    pub hidden: bool,
    /// Ids of the files directly inside this directory.
    pub file_ids: Vec<u32>,
}

/// A complete, immutable share catalog.
pub struct Catalog {
    files: Vec<SharedFile>,
    /// Keyed by lowercased remote path; ordered for deterministic browse.
    directories: BTreeMap<String, SharedDirectory>,
    /// Lowercased remote name -> file id.
    names: HashMap<String, u32>,
    backend: CatalogBackend,
}

impl Catalog {
    /// An empty catalog, used before the first scan completes.
    #[must_use]
    pub fn empty() -> Self {
        Catalog {
            files: Vec::new(),
            directories: BTreeMap::new(),
            names: HashMap::new(),
            backend: CatalogBackend::empty(),
        }
    }

    /// Assemble a catalog from scanned files.
    ///
    /// Assigns ids, materialises every ancestor directory, sorts directory
    /// contents by name, and builds the search backend.
    pub fn assemble(mut files: Vec<SharedFile>, backend_builder: BackendBuilder) -> Result<Self> {
        files.sort_by(|a, b| a.remote_name.cmp(&b.remote_name));

        let mut directories: BTreeMap<String, SharedDirectory> = BTreeMap::new();
        let mut names = HashMap::with_capacity(files.len());

        for (id, file) in files.iter_mut().enumerate() {
            file.id = id as u32;
            names.insert(file.remote_name.to_lowercase(), file.id);

            let mut ancestor = parent_of(&file.remote_name);
            let mut direct_parent = true;
            while let Some(dir_path) = ancestor {
                let entry = directories
                    .entry(dir_path.to_lowercase())
                    .or_insert_with(|| SharedDirectory {
                        remote_path: dir_path.to_string(),
                        hidden: file.hidden,
                        file_ids: Vec::new(),
                    });
                // A directory is visible when any contributing root is.
                entry.hidden &= file.hidden;
                if direct_parent {
                    entry.file_ids.push(file.id);
                    direct_parent = false;
                }
                ancestor = parent_of(dir_path);
            }
        }

        let backend = backend_builder(&files)?;

        Ok(Catalog {
            files,
            directories,
            names,
            backend,
        })
    }

    /// Full tree browse.
    #[must_use]
    pub fn browse(&self, include_hidden: bool) -> Vec<RemoteDirectory> {
        self.directories
            .values()
            .filter(|d| include_hidden || !d.hidden)
            .map(|d| self.to_remote_directory(d))
            .collect()
    }

    /// One directory listing.
    pub fn list(&self, remote_path: &str, include_hidden: bool) -> Result<RemoteDirectory> {
        let dir = self
            .directories
            .get(&remote_path.to_lowercase())
            .filter(|d| include_hidden || !d.hidden)
            .ok_or_else(|| IndexError::DirectoryNotFound(remote_path.to_string()))?;
        Ok(self.to_remote_directory(dir))
    }

    /// Resolve a remote name to the shared file behind it.
    pub fn resolve(&self, remote_name: &str, include_hidden: bool) -> Result<&SharedFile> {
        self.names
            .get(&remote_name.to_lowercase())
            .map(|id| &self.files[*id as usize])
            .filter(|f| include_hidden || !f.hidden)
            .ok_or_else(|| IndexError::FileNotFound(remote_name.to_string()))
    }

    /// Search the catalog. `tokens` must already be lowercased.
    ///
    /// A file matches when every token appears as a whole word in its full
    /// remote name. Results are capped at `limit` in catalog order, which is
    /// deterministic for a given catalog.
    pub fn search_tokens(
        &self,
        tokens: &[String],
        include_hidden: bool,
        limit: usize,
    ) -> Result<Vec<&SharedFile>> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut ids = self.backend.search(tokens)?;
        ids.sort_unstable();
        Ok(ids
            .into_iter()
            .map(|id| &self.files[id as usize])
            .filter(|f| include_hidden || !f.hidden)
            .take(limit)
            .collect())
    }

    /// Visible directory and file counts, as advertised to the overlay.
    #[must_use]
    pub fn visible_counts(&self) -> (u64, u64) {
        let dirs = self.directories.values().filter(|d| !d.hidden).count() as u64;
        let files = self.files.iter().filter(|f| !f.hidden).count() as u64;
        (dirs, files)
    }

    /// Total number of files, hidden included.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Total number of directories, hidden included.
    #[must_use]
    pub fn directory_count(&self) -> usize {
        self.directories.len()
    }

    fn to_remote_directory(&self, dir: &SharedDirectory) -> RemoteDirectory {
        RemoteDirectory {
            name: dir.remote_path.clone(),
            files: dir
                .file_ids
                .iter()
                .map(|id| self.files[*id as usize].to_remote())
                .collect(),
        }
    }
}

/// Builds the search backend for a finished file list.
pub type BackendBuilder = Box<dyn FnOnce(&[SharedFile]) -> Result<CatalogBackend> + Send>;

/// The remote path one level up, or `None` at the root alias.
fn parent_of(remote_path: &str) -> Option<&str> {
    remote_path
        .rsplit_once(REMOTE_SEPARATOR)
        .map(|(parent, _)| parent)
}

/// Split text into lowercased whole-word tokens.
///
/// Word boundaries are any non-alphanumeric characters, which makes the
/// backslash-separated remote name, the filename, and the extension all
/// searchable without special cases.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CatalogBackend;

    fn seed(remote_name: &str, size: u64, hidden: bool) -> SharedFile {
        SharedFile {
            id: 0,
            remote_name: remote_name.to_string(),
            local_path: PathBuf::from("/srv").join(remote_name.replace('\\', "/")),
            size,
            extension: remote_name
                .rsplit_once('.')
                .map(|(_, e)| e.to_lowercase())
                .unwrap_or_default(),
            audio: None,
            hidden,
        }
    }

    fn memory_backend() -> BackendBuilder {
        Box::new(|files| Ok(CatalogBackend::memory(files)))
    }

    fn sample_catalog() -> Catalog {
        Catalog::assemble(
            vec![
                seed(r"music\dylan\visions.mp3", 100, false),
                seed(r"music\dylan\hurricane.mp3", 200, false),
                seed(r"music\beatles\taxman.mp3", 300, false),
                seed(r"private\diary.txt", 50, true),
            ],
            memory_backend(),
        )
        .unwrap()
    }

    #[test]
    fn test_ancestors_materialised() {
        let catalog = sample_catalog();
        // music, music\dylan, music\beatles, private
        assert_eq!(catalog.directory_count(), 4);
        assert!(catalog.list("music", false).is_ok());
        assert!(catalog.list(r"music\dylan", false).is_ok());
    }

    #[test]
    fn test_list_is_case_insensitive() {
        let catalog = sample_catalog();
        let dir = catalog.list(r"MUSIC\Dylan", false).unwrap();
        assert_eq!(dir.files.len(), 2);
    }

    #[test]
    fn test_hidden_directories_invisible_to_peers() {
        let catalog = sample_catalog();
        assert!(catalog.list("private", false).is_err());
        assert!(catalog.list("private", true).is_ok());

        let browsed = catalog.browse(false);
        assert!(browsed.iter().all(|d| !d.name.starts_with("private")));
    }

    #[test]
    fn test_resolve() {
        let catalog = sample_catalog();
        let file = catalog.resolve(r"music\dylan\visions.mp3", false).unwrap();
        assert_eq!(file.size, 100);

        assert!(catalog.resolve(r"private\diary.txt", false).is_err());
        assert!(catalog.resolve(r"private\diary.txt", true).is_ok());
        assert!(catalog.resolve(r"music\nope.mp3", false).is_err());
    }

    #[test]
    fn test_search_whole_word_intersection() {
        let catalog = sample_catalog();

        let hits = catalog
            .search_tokens(&["dylan".to_string()], false, 100)
            .unwrap();
        assert_eq!(hits.len(), 2);

        let hits = catalog
            .search_tokens(&["dylan".to_string(), "hurricane".to_string()], false, 100)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].remote_name, r"music\dylan\hurricane.mp3");

        // "dyl" is not a whole word anywhere.
        let hits = catalog
            .search_tokens(&["dyl".to_string()], false, 100)
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_search_respects_limit_and_hidden() {
        let catalog = sample_catalog();

        let hits = catalog
            .search_tokens(&["mp3".to_string()], false, 2)
            .unwrap();
        assert_eq!(hits.len(), 2);

        let hits = catalog
            .search_tokens(&["diary".to_string()], false, 10)
            .unwrap();
        assert!(hits.is_empty());

        let hits = catalog
            .search_tokens(&["diary".to_string()], true, 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_visible_counts_exclude_hidden() {
        let catalog = sample_catalog();
        let (dirs, files) = catalog.visible_counts();
        assert_eq!(dirs, 3);
        assert_eq!(files, 3);
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize(r"music\Bob Dylan\Blonde-on-Blonde (1966)\01.mp3"),
            vec![
                "music", "bob", "dylan", "blonde", "on", "blonde", "1966", "01", "mp3"
            ]
        );
        assert!(tokenize("  \\ - ").is_empty());
    }
}
