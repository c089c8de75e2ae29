//! Host view of the interpreter's module search path
//!
//! The host speaks in one separator-joined string (see
//! [`pyhost_config::SEARCH_PATH_SEPARATOR`]); the interpreter keeps an ordered
//! list in `sys.path`. Two views exist while running: the *default* path
//! captured at startup and the *live* path the interpreter is using now.

use crate::engine::Engine;
use crate::errors::RuntimeError;
use crate::lifecycle::Runtime;
use pyhost_config::{join_search_path, split_search_path};
use pyhost_logger as logger;
use serde::Serialize;
use std::path::Path;

/// Directory name pip installs distributions into
pub const SITE_PACKAGES: &str = "site-packages";

/// Contents of one `site-packages` directory found on the search path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SitePackagesListing {
    pub directory: String,
    pub entries: Vec<String>,
}

impl<E: Engine> Runtime<E> {
    /// The module search path as a host-native joined string
    ///
    /// Once a path has been set explicitly that value is reported. Until then
    /// this is the default path captured when the current session started, or
    /// an empty string when nothing is running.
    pub fn search_path(&self) -> String {
        if let Some(entries) = self.staged().read().search_path_entries() {
            return join_search_path(entries);
        }
        self.default_search_path()
            .map(|entries| join_search_path(&entries))
            .unwrap_or_default()
    }

    /// Set the module search path from a host-native joined string
    ///
    /// The value is staged for future starts and, while running, replaces the
    /// interpreter's live search path right away.
    pub fn set_search_path(&self, joined: &str) -> Result<(), RuntimeError> {
        let entries = split_search_path(joined);
        self.staged()
            .write()
            .set_search_path_entries(entries.clone());

        if self.is_initialized() {
            self.engine().write_search_path(&entries)?;
            logger::debug(&format!(
                "Replaced live search path with {} entries",
                entries.len()
            ));
        }
        Ok(())
    }

    /// Search path captured at startup of the current session
    pub fn default_search_path(&self) -> Option<Vec<String>> {
        self.session().map(|session| session.default_search_path)
    }

    /// The interpreter's current search path, including runtime mutations
    pub fn live_search_path(&self) -> Result<Vec<String>, RuntimeError> {
        self.ensure_running()?;
        self.engine().read_search_path()
    }
}

/// List every existing directory among `entries` that lies in `site-packages`
///
/// Any entry mentioning `site-packages` counts, so eggs and `.pth`-added
/// directories below it are listed too. Unreadable or missing directories
/// are skipped; entries are sorted by name.
pub fn list_site_packages(entries: &[String]) -> Vec<SitePackagesListing> {
    entries
        .iter()
        .map(Path::new)
        .filter(|dir| dir.to_string_lossy().contains(SITE_PACKAGES))
        .filter_map(|dir| {
            let read = dir.read_dir().ok()?;
            let mut names: Vec<String> = read
                .flatten()
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            Some(SitePackagesListing {
                directory: dir.display().to_string(),
                entries: names,
            })
        })
        .collect()
}
