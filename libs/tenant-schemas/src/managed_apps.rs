//! Managed-app signal: which applications the migrator should skip.
//!
//! The migrator only understands a deny-list keyed by application label, so
//! "migrate these apps" is translated into "ignore every other app" here.
//! The whole mapping can be snapshotted and reinstated, which keeps a
//! migration run side-effect free from the caller's point of view.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::apps::app_label;

/// Where the migrator takes an application's migrations from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MigrationSource {
    /// Skip the application entirely.
    Ignore,
    /// Load migrations registered under another module name.
    Module(String),
}

impl MigrationSource {
    const IGNORE: &'static str = "ignore";
}

impl From<String> for MigrationSource {
    fn from(value: String) -> Self {
        if value == Self::IGNORE {
            Self::Ignore
        } else {
            Self::Module(value)
        }
    }
}

impl From<MigrationSource> for String {
    fn from(value: MigrationSource) -> Self {
        match value {
            MigrationSource::Ignore => MigrationSource::IGNORE.to_owned(),
            MigrationSource::Module(module) => module,
        }
    }
}

/// Label -> source mapping read by the migrator.
pub type MigrationModules = BTreeMap<String, MigrationSource>;

/// The managed-app signal.
///
/// `None` means "not configured"; [`ManagedApps::save`] turns it into an empty
/// mapping and [`ManagedApps::restore`] puts the `None` back.
///
/// The mapping in effect at construction, or at the last `save`, is the
/// baseline that [`ManagedApps::reset`] returns labels to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedApps {
    modules: Option<MigrationModules>,
    baseline: MigrationModules,
}

/// Captured state of a [`ManagedApps`] mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a snapshot does nothing unless it is restored"]
pub struct ManagedAppsSnapshot {
    modules: Option<MigrationModules>,
    baseline: MigrationModules,
}

impl ManagedApps {
    #[must_use]
    pub fn new(modules: Option<MigrationModules>) -> Self {
        let baseline = modules.clone().unwrap_or_default();
        Self { modules, baseline }
    }

    /// The current mapping, `None` when unconfigured.
    #[must_use]
    pub fn modules(&self) -> Option<&MigrationModules> {
        self.modules.as_ref()
    }

    /// Source configured for an application (identifier or label).
    #[must_use]
    pub fn source(&self, app: &str) -> Option<&MigrationSource> {
        self.modules.as_ref()?.get(app_label(app))
    }

    #[must_use]
    pub fn is_skipped(&self, app: &str) -> bool {
        matches!(self.source(app), Some(MigrationSource::Ignore))
    }

    /// Mark every app of `excluded` that is not in `included` as ignored.
    ///
    /// Existing markers are kept and module overrides of excluded apps are
    /// shadowed; call [`ManagedApps::reset`] between independent
    /// configurations.
    pub fn configure(&mut self, included: &[String], excluded: &[String]) {
        let modules = self.modules.get_or_insert_with(BTreeMap::new);
        for app in excluded.iter().filter(|app| !included.contains(app)) {
            modules.insert(app_label(app).to_owned(), MigrationSource::Ignore);
        }
    }

    /// Return every app in `apps` to its baseline entry.
    ///
    /// Markers added by [`ManagedApps::configure`] are cleared; entries the
    /// baseline carries (module overrides, configured ignores) come back.
    pub fn reset(&mut self, apps: &[String]) {
        let Some(modules) = self.modules.as_mut() else {
            return;
        };
        for app in apps {
            let label = app_label(app);
            match self.baseline.get(label) {
                Some(source) => {
                    modules.insert(label.to_owned(), source.clone());
                }
                None => {
                    modules.remove(label);
                }
            }
        }
    }

    /// Snapshot the mapping, initializing it to empty when unconfigured.
    ///
    /// The current mapping becomes the baseline for [`ManagedApps::reset`].
    pub fn save(&mut self) -> ManagedAppsSnapshot {
        let snapshot = ManagedAppsSnapshot {
            modules: self.modules.clone(),
            baseline: self.baseline.clone(),
        };
        self.baseline = self.modules.get_or_insert_with(BTreeMap::new).clone();
        snapshot
    }

    pub fn restore(&mut self, snapshot: ManagedAppsSnapshot) {
        self.modules = snapshot.modules;
        self.baseline = snapshot.baseline;
    }

    /// Save now and restore when the returned scope is dropped.
    pub fn scoped(&mut self) -> ManagedAppsScope<'_> {
        let snapshot = self.save();
        ManagedAppsScope {
            managed: self,
            snapshot: Some(snapshot),
        }
    }
}

/// Scoped save/restore of a [`ManagedApps`] mapping.
///
/// Restores on every exit path, including `?` propagation.
#[must_use = "the mapping is restored as soon as the scope is dropped"]
pub struct ManagedAppsScope<'a> {
    managed: &'a mut ManagedApps,
    snapshot: Option<ManagedAppsSnapshot>,
}

impl Deref for ManagedAppsScope<'_> {
    type Target = ManagedApps;

    fn deref(&self) -> &Self::Target {
        self.managed
    }
}

impl DerefMut for ManagedAppsScope<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.managed
    }
}

impl Drop for ManagedAppsScope<'_> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.managed.restore(snapshot);
        }
    }
}
