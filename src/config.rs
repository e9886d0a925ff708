//! Process-wide sandbox configuration.
//!
//! Captured once from the environment before the first intercepted call and
//! immutable afterward. Every engine operation takes `&SandboxConfig`
//! explicitly; nothing here requires ongoing synchronization because the
//! `LazyLock` initialization happens-before every read.

use std::env;
use std::sync::LazyLock;

/// Filename of this library as it appears in `LD_PRELOAD` entries.
pub const PRELOAD_LIBNAME: &str = "libsnapbox_preload.so";

/// Colon-separated preload list we must keep propagating to children.
pub const LD_PRELOAD_VAR: &str = "LD_PRELOAD";

/// Sandbox root. Absent or empty means the engine is inert.
pub const SANDBOX_ROOT_VAR: &str = "SNAPBOX_PRELOAD";

/// Per-application writable data root, substituted for `/var/lib`.
pub const DATA_ROOT_VAR: &str = "SNAP_DATA";

/// Application identity, used to namespace IPC objects.
pub const APP_NAME_VAR: &str = "SNAP_NAME";

/// Global-state root whose subtree is given a private writable copy.
pub const VARLIB: &str = "/var/lib";

/// Shared-memory root. Objects under it are conventionally flat entries,
/// so namespacing happens inside the name, not by nesting directories.
pub const SHM_DIR: &str = "/dev/shm/";

/// Loader hardcoded by 32-bit ELF binaries; the exec fallback redirects it.
pub const LD_LINUX: &str = "/lib/ld-linux.so.2";

/// Immutable sandbox parameters for this process.
#[derive(Clone, Debug, Default)]
pub struct SandboxConfig {
    /// Directory prefix substituted for real top-level paths. Empty means
    /// pass-through: every wrapper delegates with its arguments untouched.
    pub sandbox_root: String,
    /// Writable root substituted for the `/var/lib` prefix.
    pub data_root: String,
    /// Logical name of the confined application instance.
    pub app_name: String,
    /// `/dev/shm/snap.<app_name>`, the per-application shm namespace.
    pub shm_prefix: String,
    /// Absolute `LD_PRELOAD` entries naming this library, kept so they can
    /// be re-injected into the environment of exec'd children.
    pub preload_entries: Vec<String>,
}

impl SandboxConfig {
    /// Build the configuration from the process environment.
    ///
    /// Mirrors the activation rule of the hosting environment: without an
    /// `LD_PRELOAD` there is nothing to propagate, and without a sandbox
    /// root there is nothing to redirect, so either missing variable leaves
    /// the engine inert.
    pub fn from_env() -> Self {
        let ld_preload = env_string(LD_PRELOAD_VAR);
        if ld_preload.is_empty() {
            return Self::default();
        }

        let sandbox_root = env_string(SANDBOX_ROOT_VAR);
        if sandbox_root.is_empty() {
            return Self::default();
        }

        let app_name = env_string(APP_NAME_VAR);
        Self {
            shm_prefix: format!("{}snap.{}", SHM_DIR, app_name),
            preload_entries: capture_preload_entries(&ld_preload),
            data_root: env_string(DATA_ROOT_VAR),
            app_name,
            sandbox_root,
        }
    }

    /// Explicit-value constructor for tests and for callers that already
    /// hold the parameters.
    pub fn with_values(sandbox_root: &str, data_root: &str, app_name: &str) -> Self {
        Self {
            sandbox_root: sandbox_root.to_owned(),
            data_root: data_root.to_owned(),
            app_name: app_name.to_owned(),
            shm_prefix: format!("{}snap.{}", SHM_DIR, app_name),
            preload_entries: Vec::new(),
        }
    }

    /// Whether redirection is engaged at all.
    pub fn is_active(&self) -> bool {
        !self.sandbox_root.is_empty()
    }
}

/// Pull every absolute-pathed copy of our own library out of the preload
/// list. Better to carry a stranger's copy than to drop ourselves from the
/// child's environment.
pub(crate) fn capture_preload_entries(ld_preload: &str) -> Vec<String> {
    let suffix = format!("/{}", PRELOAD_LIBNAME);
    ld_preload
        .split(':')
        .filter(|entry| entry.ends_with(&suffix))
        .map(str::to_owned)
        .collect()
}

fn env_string(name: &str) -> String {
    env::var(name).unwrap_or_default()
}

static CONFIG: LazyLock<SandboxConfig> = LazyLock::new(SandboxConfig::from_env);

/// The process-wide configuration.
pub fn config() -> &'static SandboxConfig {
    &CONFIG
}

/// Force capture now. Called from the library constructor so the snapshot
/// is taken before the application can mutate its environment.
pub fn force_init() {
    LazyLock::force(&CONFIG);
}
