//! Copy-on-write config reload: a new [`super::Config`] is
//! parsed and validated off to the side, then published through an
//! `arc_swap::ArcSwap`. In-flight tasks holding the old `Arc` finish their
//! request against the old config; new work samples the new one.

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::{Config, ConfigError};

pub struct Paths {
    pub main_conf: PathBuf,
    pub metrics: PathBuf,
}

/// Shared handle to the active configuration. Cheap to clone; every holder
/// sees the most recently published config on its next [`SharedConfig::load`].
#[derive(Clone)]
pub struct SharedConfig {
    inner: Arc<ArcSwap<Config>>,
    paths: Arc<Paths>,
}

impl SharedConfig {
    pub fn new(config: Config, paths: Paths) -> Self {
        SharedConfig {
            inner: Arc::new(ArcSwap::new(Arc::new(config))),
            paths: Arc::new(paths),
        }
    }

    /// The config in effect right now. Tasks should call this once at the
    /// start of a scrape or command and hold the result for its duration.
    pub fn load(&self) -> Arc<Config> {
        self.inner.load_full()
    }

    /// Re-read and re-validate the on-disk configuration, then publish it
    /// atomically. Leaves the previous config in place (and in use by any
    /// in-flight task) if loading fails. `users`/`admins` are loaded
    /// separately from the main `.ini` (they need the master key), so the
    /// caller supplies `apply_credentials` to repopulate them on the
    /// freshly parsed config before it's published — otherwise a reload
    /// would silently wipe out every known user and admin.
    pub fn reload<F>(&self, apply_credentials: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut Config),
    {
        let mut fresh = super::load(&self.paths.main_conf, &self.paths.metrics)?;
        apply_credentials(&mut fresh);
        self.inner.store(Arc::new(fresh));
        Ok(())
    }
}
