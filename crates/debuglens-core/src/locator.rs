//! # Standard Locator
//!
//! A ready-made [`ModuleCallbacks`] for the common case where module names are file
//! paths on the local file system.
//!
//! - **find_elf** opens the module name
//! - **find_debuginfo** follows the `.gnu_debuglink` hint through the debug directories
//!
//! ## Search order for debug files
//!
//! 1. The debug-link name itself, if it is absolute
//! 2. For each configured directory `dir`: `dir/name`, `dir/.debug/name`, and
//!    `dir/<main image directory>/name`
//! 3. The main image's directory, then its `.debug` subdirectory
//!
//! Candidates must match the CRC-32 stored in the debug link unless verification is
//! disabled in [`LocatorConfig`]. Relocatable modules are not supported: section
//! load addresses are only known to the embedder.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use crate::callbacks::{DebugLink, LocatedImage, ModuleCallbacks, ModuleInfo, UserData};
use crate::error::{CallbackError, CallbackResult};

/// Default global debug directory.
pub const DEFAULT_DEBUG_DIR: &str = "/usr/lib/debug";

/// Settings of the [`StandardLocator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorConfig
{
    /// Global debug directories, searched in order.
    pub debug_dirs: Vec<PathBuf>,
    /// Require candidates to match the debug-link CRC-32.
    pub verify_crc: bool,
}

impl Default for LocatorConfig
{
    fn default() -> Self
    {
        Self {
            debug_dirs: vec![PathBuf::from(DEFAULT_DEBUG_DIR)],
            verify_crc: true,
        }
    }
}

impl LocatorConfig
{
    /// Read the configuration from the environment.
    ///
    /// - `DEBUGLENS_DEBUG_PATH`: colon separated debug directories (replaces the default)
    /// - `DEBUGLENS_SKIP_CRC`: `1` or `true` disables CRC verification
    #[must_use]
    pub fn from_env() -> Self
    {
        Self::from_vars(|name| env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self
    {
        let mut config = Self::default();
        if let Some(path) = var("DEBUGLENS_DEBUG_PATH") {
            config.debug_dirs = path
                .split(':')
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        if let Some(skip) = var("DEBUGLENS_SKIP_CRC") {
            config.verify_crc = !matches!(skip.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        config
    }
}

/// File-system based callbacks.
#[derive(Debug, Clone, Default)]
pub struct StandardLocator
{
    config: LocatorConfig,
}

impl StandardLocator
{
    #[must_use]
    pub fn new(config: LocatorConfig) -> Self
    {
        Self { config }
    }

    pub fn config(&self) -> &LocatorConfig
    {
        &self.config
    }

    /// Candidate paths for `debug_name`, deduplicated, in search order.
    fn search_paths(&self, main_path: &Path, debug_name: &Path) -> Vec<PathBuf>
    {
        let mut paths = Vec::new();
        let mut seen = HashSet::new();
        let mut add_path = |path: PathBuf| {
            if seen.insert(path.clone()) {
                paths.push(path);
            }
        };

        if debug_name.is_absolute() {
            add_path(debug_name.to_path_buf());
        }
        let basename = debug_name.file_name().map_or(debug_name, Path::new);
        let main_dir = main_path.parent().filter(|dir| !dir.as_os_str().is_empty());

        for dir in &self.config.debug_dirs {
            add_path(dir.join(basename));
            add_path(dir.join(".debug").join(basename));
            if let Some(main_dir) = main_dir {
                let relative = main_dir.strip_prefix("/").unwrap_or(main_dir);
                add_path(dir.join(relative).join(basename));
            }
        }

        let main_dir = main_dir.unwrap_or_else(|| Path::new("."));
        add_path(main_dir.join(basename));
        add_path(main_dir.join(".debug").join(basename));

        paths
    }

    fn open_candidate(&self, path: &Path, link: &DebugLink) -> Option<LocatedImage>
    {
        if !self.config.verify_crc {
            return LocatedImage::open(path).ok();
        }

        let bytes = fs::read(path).ok()?;
        let crc = crc32fast::hash(&bytes);
        if crc != link.crc {
            warn!(
                path = %path.display(),
                expected = format_args!("0x{:08x}", link.crc),
                actual = format_args!("0x{crc:08x}"),
                "debug file CRC mismatch"
            );
            return None;
        }
        Some(LocatedImage::from_bytes(bytes, Some(path.to_path_buf())))
    }
}

impl ModuleCallbacks for StandardLocator
{
    fn find_elf(&self, module: &ModuleInfo, _user_data: &mut UserData) -> CallbackResult<LocatedImage>
    {
        LocatedImage::open(&module.name)
    }

    fn find_debuginfo(
        &self,
        module: &ModuleInfo,
        _user_data: &mut UserData,
        main_name: Option<&Path>,
        debuglink: Option<&DebugLink>,
    ) -> CallbackResult<LocatedImage>
    {
        let Some(link) = debuglink else {
            return Err(CallbackError::not_found());
        };
        let main_path = main_name.unwrap_or_else(|| Path::new(&module.name));

        for candidate in self.search_paths(main_path, Path::new(&link.file_name)) {
            if candidate == main_path {
                continue;
            }
            trace!(path = %candidate.display(), "checking debug file candidate");
            if let Some(image) = self.open_candidate(&candidate, link) {
                debug!(module = %module.name, path = %candidate.display(), "found debug file");
                return Ok(image);
            }
        }

        debug!(module = %module.name, link = %link.file_name, "debug file not found");
        Err(CallbackError::not_found())
    }
}
