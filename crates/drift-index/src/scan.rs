//! The share index and its refill scan.
//!
//! The active catalog lives behind an atomic reference. A refill walks all
//! configured roots with a bounded worker pool, builds the next catalog
//! entirely on the side, and swaps it in as one operation: a reader sees the
//! old catalog or the new one, never a mix.

use crate::audio;
use crate::catalog::{Catalog, REMOTE_SEPARATOR, SharedFile};
use crate::error::{IndexError, Result};
use crate::roots::{self, RootSpec};
use crate::search::parse_query;
use crate::store::CatalogBackend;
use arc_swap::ArcSwap;
use drift_proto::RemoteDirectory;
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use walkdir::WalkDir;

/// Where the catalog's token index lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    /// Token postings held in memory.
    #[default]
    Memory,
    /// Token index in an embedded full-text store on disk.
    Disk,
}

/// Operator configuration for the share index.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Declared share roots.
    pub roots: Vec<RootSpec>,
    /// Exclusion filters applied to the full local path.
    pub filters: Vec<String>,
    /// Maximum number of files returned per search.
    pub response_limit: usize,
    /// Drop one-character query tokens.
    pub remove_single_character_terms: bool,
    /// Token index storage mode.
    pub storage_mode: StorageMode,
    /// Location of the on-disk token index. `None` keeps it in memory even
    /// in [`StorageMode::Disk`], which is what tests use.
    pub disk_index_path: Option<PathBuf>,
    /// Scan worker pool size. Zero means one worker per CPU.
    pub workers: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        IndexOptions {
            roots: Vec::new(),
            filters: Vec::new(),
            response_limit: 100,
            remove_single_character_terms: true,
            storage_mode: StorageMode::Memory,
            disk_index_path: None,
            workers: 0,
        }
    }
}

/// Refill progress, reported to the observer at every 10% boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum FillState {
    /// The scan has started.
    Filling,
    /// Fraction of directories scanned, 0.0 to 1.0.
    Progress(f32),
    /// The new catalog is live.
    Completed {
        /// Directories in the new catalog.
        directories: u64,
        /// Files in the new catalog.
        files: u64,
    },
    /// The scan failed; the previous catalog remains active.
    Faulted(String),
}

/// The shared-file index.
pub struct SharesIndex {
    options: IndexOptions,
    filters: Vec<Regex>,
    active: ArcSwap<Catalog>,
    refilling: AtomicBool,
}

impl SharesIndex {
    /// Create an index with an empty active catalog.
    ///
    /// Validates roots and compiles filters; configuration problems are
    /// reported here rather than at scan time.
    pub fn new(options: IndexOptions) -> Result<Self> {
        roots::validate(&options.roots)?;

        let filters = options
            .filters
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| IndexError::InvalidFilter {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(SharesIndex {
            options,
            filters,
            active: ArcSwap::from_pointee(Catalog::empty()),
            refilling: AtomicBool::new(false),
        })
    }

    /// The active catalog.
    #[must_use]
    pub fn catalog(&self) -> Arc<Catalog> {
        self.active.load_full()
    }

    /// Scan all roots and atomically replace the active catalog.
    ///
    /// Blocking; callers on an async runtime should wrap this in a blocking
    /// task. Readers are never blocked. `observer` receives [`FillState`]
    /// transitions including a progress report at each 10% boundary.
    pub fn refill(&self, observer: impl Fn(FillState) + Sync) -> Result<()> {
        if self
            .refilling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(IndexError::RefillInProgress);
        }

        observer(FillState::Filling);
        let outcome = self.scan_all(&observer);
        self.refilling.store(false, Ordering::Release);

        match outcome {
            Ok(catalog) => {
                let directories = catalog.directory_count() as u64;
                let files = catalog.file_count() as u64;
                self.active.store(Arc::new(catalog));
                tracing::info!(directories, files, "share catalog refilled");
                observer(FillState::Completed { directories, files });
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "share refill failed");
                observer(FillState::Faulted(err.to_string()));
                Err(err)
            }
        }
    }

    /// True while a refill is running.
    #[must_use]
    pub fn is_refilling(&self) -> bool {
        self.refilling.load(Ordering::Acquire)
    }

    /// Search the active catalog.
    pub fn search(&self, query: &str, include_hidden: bool) -> Result<Vec<SharedFile>> {
        let tokens = parse_query(query, self.options.remove_single_character_terms);
        let catalog = self.catalog();
        let hits = catalog.search_tokens(&tokens, include_hidden, self.options.response_limit)?;
        Ok(hits.into_iter().cloned().collect())
    }

    /// Full share listing for a peer browse.
    #[must_use]
    pub fn browse(&self) -> Vec<RemoteDirectory> {
        self.catalog().browse(false)
    }

    /// One directory listing for a peer.
    pub fn list(&self, remote_path: &str) -> Result<RemoteDirectory> {
        self.catalog().list(remote_path, false)
    }

    /// Resolve a peer-requested remote name to the local file behind it.
    pub fn resolve(&self, remote_name: &str) -> Result<SharedFile> {
        self.catalog().resolve(remote_name, false).cloned()
    }

    /// Visible directory and file counts for the overlay's share counters.
    #[must_use]
    pub fn visible_counts(&self) -> (u64, u64) {
        self.catalog().visible_counts()
    }

    /// The configured per-search response cap.
    #[must_use]
    pub fn response_limit(&self) -> usize {
        self.options.response_limit
    }

    fn worker_count(&self) -> usize {
        match self.options.workers {
            0 => num_cpus::get().max(1),
            n => n,
        }
    }

    fn scan_all(&self, observer: &(impl Fn(FillState) + Sync)) -> Result<Catalog> {
        // Pass one: count directories so progress has a denominator.
        let mut total_dirs = 0u64;
        for root in &self.options.roots {
            total_dirs += WalkDir::new(&root.path)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_dir())
                .count() as u64;
        }
        let total_dirs = total_dirs.max(1);

        let scanned_dirs = AtomicU64::new(0);
        let last_decile = AtomicU32::new(0);
        let report_dir_done = || {
            let done = scanned_dirs.fetch_add(1, Ordering::Relaxed) + 1;
            let progress = done as f32 / total_dirs as f32;
            let decile = (progress * 10.0) as u32;
            if decile > last_decile.swap(decile, Ordering::Relaxed) {
                observer(FillState::Progress(progress.min(1.0)));
            }
        };

        // Pass two: walk each root on the worker pool, collecting files.
        let workers = self.worker_count();
        let mut files: Vec<SharedFile> = Vec::new();
        for chunk in self.options.roots.chunks(workers.max(1)) {
            let results = std::thread::scope(|scope| {
                let handles: Vec<_> = chunk
                    .iter()
                    .map(|root| scope.spawn(|| self.scan_root(root, &report_dir_done)))
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().expect("scan worker panicked"))
                    .collect::<Vec<_>>()
            });
            for result in results {
                files.extend(result?);
            }
        }

        let backend: crate::catalog::BackendBuilder = match self.options.storage_mode {
            StorageMode::Memory => Box::new(|files| Ok(CatalogBackend::memory(files))),
            StorageMode::Disk => {
                let path = self.options.disk_index_path.clone();
                Box::new(move |files| CatalogBackend::disk(files, path.as_deref()))
            }
        };

        Catalog::assemble(files, backend)
    }

    fn scan_root(&self, root: &RootSpec, dir_done: &(impl Fn() + Sync)) -> Result<Vec<SharedFile>> {
        let mut files = Vec::new();

        for entry in WalkDir::new(&root.path) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    // Unreadable entries are skipped, not fatal.
                    tracing::warn!(root = %root.alias, error = %err, "skipping unreadable entry");
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                dir_done();
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }

            let local_path = entry.path();
            let path_text = local_path.to_string_lossy();
            if self.filters.iter().any(|f| f.is_match(&path_text)) {
                tracing::debug!(path = %path_text, "excluded by filter");
                continue;
            }

            let relative = match local_path.strip_prefix(&root.path) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let mut remote_name = String::from(&root.alias);
            for component in relative.components() {
                remote_name.push(REMOTE_SEPARATOR);
                remote_name.push_str(&component.as_os_str().to_string_lossy());
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let extension = local_path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
                .unwrap_or_default();

            files.push(SharedFile {
                id: 0,
                remote_name,
                local_path: local_path.to_path_buf(),
                size,
                extension,
                audio: audio::probe(local_path, size),
                hidden: root.hidden,
            });
        }

        tracing::debug!(root = %root.alias, files = files.len(), "root scanned");
        Ok(files)
    }
}
