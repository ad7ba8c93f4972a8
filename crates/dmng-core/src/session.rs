//! Per-invocation configuration.
//!
//! The engine keeps no process-wide mutable state: everything that varies
//! per user or per invocation (directory layout, verbosity) lives in a
//! [`Session`] value threaded through the operations that need it.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Directory layout and verbosity for one invocation.
#[derive(Debug, Clone)]
pub struct Session {
    home: PathBuf,
    store_dir: PathBuf,
    store_path: PathBuf,
    log_dir: PathBuf,
    profiles_dir: PathBuf,
    debug: bool,
}

/// Store file name inside the store directory.
const STORE_FILE: &str = "profiles-DB.sql";

impl Session {
    /// Builds a session from the environment: `$HOME`, falling back to
    /// the platform base-directory lookup and finally to `/home/$USER`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HomeNotFound`] when no home directory can be
    /// located.
    pub fn new() -> Result<Self> {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .filter(|h| !h.as_os_str().is_empty())
            .or_else(|| directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()))
            .or_else(|| {
                std::env::var("USER")
                    .ok()
                    .filter(|user| !user.is_empty())
                    .map(|user| PathBuf::from("/home").join(user))
            })
            .ok_or(Error::HomeNotFound)?;
        Ok(Self::at_home(home))
    }

    /// Builds a session rooted at an explicit home directory.
    ///
    /// Tests use this to keep every path under a temporary directory.
    #[must_use]
    pub fn at_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        let store_dir = home.join(".config").join("dmng").join("profiles");
        Self {
            store_path: store_dir.join(STORE_FILE),
            store_dir,
            log_dir: home.join(".config").join("dmng").join("logs"),
            profiles_dir: home.join(".dmng_profiles"),
            home,
            debug: false,
        }
    }

    /// Enables verbose diagnostics for this invocation.
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// The user's home directory.
    #[must_use]
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Directory holding the requirement store.
    #[must_use]
    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    /// The requirement store file.
    #[must_use]
    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Ephemeral directory for tracer log files.
    #[must_use]
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Directory receiving serialized policy documents.
    #[must_use]
    pub fn profiles_dir(&self) -> &Path {
        &self.profiles_dir
    }

    /// Whether verbose diagnostics were requested.
    #[must_use]
    pub const fn debug(&self) -> bool {
        self.debug
    }
}
