//! Configuration and build options

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Persisted settings for discmerge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct Config {
    /// Highest bank version written to every output
    pub target_version: u32,
    /// Manifest rebuild mode
    pub mode: BuildMode,
    /// How songlists are combined
    pub songlist_mode: SonglistMode,
    /// Keep a timestamped backup when overwriting a previous output
    pub keep_backup: bool,
    /// Seed rebuilds from the backup with hardlinks
    pub fast_update: bool,
    /// Number of cache entries byte-compared against their source documents
    pub cache_validation_sample: usize,
    /// Attempts for publish/backup renames
    pub rename_max_attempts: u32,
    /// Sleep between rename attempts
    pub rename_retry_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_version: 6,
            mode: BuildMode::UpdateRequired,
            songlist_mode: SonglistMode::UnionByName,
            keep_backup: true,
            fast_update: false,
            cache_validation_sample: 10,
            rename_max_attempts: 20,
            rename_retry_delay_ms: 100,
        }
    }
}

impl Config {
    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("discmerge").join("config.json"))
    }

    /// Load config from disk, falling back to defaults if missing or unreadable
    pub fn load() -> Self {
        Self::config_path()
            .and_then(|path| std::fs::read_to_string(&path).ok())
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        if let Some(path) = Self::config_path() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let content =
                serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
            std::fs::write(&path, content)?;
        }
        Ok(())
    }

    /// Options the merge and subset engines consume
    pub fn build_options(&self) -> Result<BuildOptions> {
        let options = BuildOptions {
            target_version: self.target_version,
            mode: self.mode,
            songlist_mode: self.songlist_mode,
            cache_validation_sample: self.cache_validation_sample,
            rename_max_attempts: self.rename_max_attempts,
            rename_retry_delay: Duration::from_millis(self.rename_retry_delay_ms),
        };
        options.validate()?;
        Ok(options)
    }
}

/// Engine-facing options shared by merge and subset builds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub target_version: u32,
    pub mode: BuildMode,
    pub songlist_mode: SonglistMode,
    pub cache_validation_sample: usize,
    pub rename_max_attempts: u32,
    pub rename_retry_delay: Duration,
}

impl Default for BuildOptions {
    fn default() -> Self {
        let config = Config::default();
        Self {
            target_version: config.target_version,
            mode: config.mode,
            songlist_mode: config.songlist_mode,
            cache_validation_sample: config.cache_validation_sample,
            rename_max_attempts: config.rename_max_attempts,
            rename_retry_delay: Duration::from_millis(config.rename_retry_delay_ms),
        }
    }
}

impl BuildOptions {
    pub fn with_target_version(mut self, target_version: u32) -> Self {
        self.target_version = target_version;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_version < 1 {
            return Err(Error::InvalidOptions(
                "target_version must be at least 1".to_string(),
            ));
        }
        if self.rename_max_attempts < 1 {
            return Err(Error::InvalidOptions(
                "rename_max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Manifest rebuild mode
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BuildMode {
    /// Strip legacy errata blocks; the disc expects its own update
    #[default]
    UpdateRequired,
    /// Keep the template blocks as they are
    SelfContained,
}

/// How songlists from donors are combined with the base
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SonglistMode {
    #[default]
    UnionByName,
    BaseOnly,
}

/// Projection policy for duplicate IDs in a dry-run plan
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CollisionPolicy {
    /// Unresolved duplicates are excluded from the projected count
    #[default]
    Fail,
    PreferBase,
    PreferDonor,
}

macro_rules! kebab_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
                match normalized.as_str() {
                    $($text => Ok($ty::$variant),)+
                    _ => Err(Error::InvalidOptions(format!(
                        "unknown {}: {}",
                        stringify!($ty),
                        s
                    ))),
                }
            }
        }
    };
}

kebab_enum!(BuildMode {
    UpdateRequired => "update-required",
    SelfContained => "self-contained",
});

kebab_enum!(SonglistMode {
    UnionByName => "union-by-name",
    BaseOnly => "base-only",
});

kebab_enum!(CollisionPolicy {
    Fail => "fail",
    PreferBase => "prefer-base",
    PreferDonor => "prefer-donor",
});
