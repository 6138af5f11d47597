//! # discmerge-core
//!
//! Core library for merging and rebuilding SingStar disc export datasets.
//!
//! This crate provides:
//! - Locating a disc's Export root and reading its bank files
//! - Melody fingerprinting to tell identical songs from ID collisions
//! - Dry-run planning of a merge
//! - Full union merges and selective subset builds
//! - The `melodies_{n}.chc` cache codec and `config.xml` rebuild
//!
//! ## Modules
//!
//! - [`dataset`] - Export layout resolution and dataset accessors
//! - [`fingerprint`] - Melody fingerprints
//! - [`plan`] - Duplicate classification and dry-run reports
//! - [`merge`] - Full union merge
//! - [`subset`] - Guarded, cancellable subset builds
//! - [`cache`] - Melody cache build/parse/validate
//! - [`manifest`] - Versioned `config.xml` rebuild
//! - [`config`] - Persisted settings and build options
//! - [`error`] - Error types and Result alias
//!
//! ## Example
//!
//! ```no_run
//! use std::collections::BTreeSet;
//! use std::path::Path;
//! use discmerge_core::{Config, ExportDataset, SubsetBuilder};
//!
//! let options = Config::load().build_options()?;
//! let base = ExportDataset::open_path(Path::new("discs/SingStar"), "Base")?;
//! let donor = ExportDataset::open_path(Path::new("discs/SingStar Pop"), "Pop")?;
//!
//! let selected: BTreeSet<u32> = [101, 102, 250].into_iter().collect();
//! let report = SubsetBuilder::new(base, vec![donor])
//!     .with_options(options)
//!     .build(Path::new("out/Mix"), &selected)?;
//! println!("{} songs written to {}", report.merged_song_count, report.output.display());
//! # Ok::<(), discmerge_core::Error>(())
//! ```

pub mod build;
pub mod cache;
pub mod config;
pub mod dataset;
pub mod error;
pub mod fingerprint;
pub mod fsops;
pub mod manifest;
pub mod merge;
pub mod plan;
pub mod subset;
pub mod xml;

// Error types
pub use error::{Error, ErrorKind, Result};

// Configuration
pub use config::{BuildMode, BuildOptions, CollisionPolicy, Config, SonglistMode};

// Datasets
pub use dataset::{resolve_input, DatasetLocation, ExportDataset, LayoutKind};

// Fingerprints
pub use fingerprint::{fingerprint_file, fingerprint_song_dir, fingerprint_str, MelodyFingerprint};

// Planning
pub use plan::{make_plan, CollisionInfo, DatasetSummary, DuplicateClass, PlanReport};

// Engines
pub use build::{cancel_flag, BuildPhase, BuildProgress, CancelCheck, ProgressCallback};
pub use merge::{MergeEngine, MergeStats};
pub use subset::{SubsetBuilder, SubsetReport, BASE_LABEL};

// Codecs
pub use cache::{build_cache, parse_index, validate_cache, CacheEntry};
pub use manifest::{rebuild_manifest, validate_manifest};
