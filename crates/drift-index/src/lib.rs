//! # DRIFT Index
//!
//! The shared-file index: a scanned, filtered, searchable catalog of the
//! files this node advertises to the overlay.
//!
//! The index consumes a list of root-path specs (`[alias]/absolute/path`,
//! optionally marked hidden) and exclusion filters, and produces an immutable
//! [`Catalog`]. The active catalog sits behind an atomic reference: readers
//! always see one complete catalog, and a refill builds the next catalog on
//! the side before swapping it in whole.
//!
//! ```no_run
//! use drift_index::{IndexOptions, RootSpec, SharesIndex};
//!
//! # fn main() -> Result<(), drift_index::IndexError> {
//! let options = IndexOptions {
//!     roots: vec![RootSpec::parse("[music]/srv/music")?],
//!     ..Default::default()
//! };
//! let index = SharesIndex::new(options)?;
//! index.refill(|_| {})?;
//! let hits = index.search("dylan 1966", false);
//! # let _ = hits;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod catalog;
pub mod error;
pub mod roots;
pub mod scan;
pub mod search;
pub mod store;

pub use audio::AudioInfo;
pub use catalog::{Catalog, SharedDirectory, SharedFile};
pub use error::{IndexError, Result};
pub use roots::RootSpec;
pub use scan::{FillState, IndexOptions, SharesIndex, StorageMode};
