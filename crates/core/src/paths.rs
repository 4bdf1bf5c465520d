// crates/core/src/paths.rs
//! Storage location resolution.
//!
//! The database lives in a cloud-synchronized folder when one is available so
//! that several machines converge on a single shared file. Resolution is a
//! pure function of (config, environment, filesystem probe) evaluated in
//! strict priority order:
//!
//! 1. explicit `db_path` from the user config,
//! 2. the `CLAUDE_LEDGER_DB_PATH` environment override,
//! 3. cloud-sync auto-detection (ordered candidate strategies),
//! 4. local fallback `~/.claude/usage/`, created if necessary.
//!
//! A candidate that cannot be created or written is disqualified silently and
//! resolution falls through to the next tier; only exhausting every tier is
//! an error.

use crate::config::UserConfig;
use crate::error::PathError;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit database file path.
pub const DB_PATH_ENV: &str = "CLAUDE_LEDGER_DB_PATH";

/// Folder created inside a detected cloud-sync root.
pub const CLOUD_FOLDER: &str = ".claude-ledger";

/// Database file name, shared by every machine writing to the same folder.
pub const DB_FILE_NAME: &str = "usage_history.db";

/// Read access to the process environment, injectable for tests.
pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
    fn home(&self) -> Option<PathBuf>;
}

/// Filesystem probing, injectable for tests.
///
/// `try_create_writable` must return `false` (never error) on permission
/// problems — that is what lets a read-only mount fall through the chain.
pub trait FsProbe {
    fn exists(&self, path: &Path) -> bool;
    fn try_create_writable(&self, path: &Path) -> bool;
}

/// The real process environment.
pub struct SystemEnv;

impl Env for SystemEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }

    fn home(&self) -> Option<PathBuf> {
        dirs::home_dir()
    }
}

/// The real filesystem.
pub struct RealFs;

impl FsProbe for RealFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn try_create_writable(&self, path: &Path) -> bool {
        if std::fs::create_dir_all(path).is_err() {
            return false;
        }
        // Creating the directory is not enough on some network mounts; prove
        // writability with a throwaway probe file.
        let probe = path.join(format!(".write-probe-{}", std::process::id()));
        match std::fs::write(&probe, b"") {
            Ok(()) => {
                let _ = std::fs::remove_file(&probe);
                true
            }
            Err(_) => false,
        }
    }
}

/// One cloud-sync detection strategy: yields zero or more candidate sync
/// roots, in preference order. Strategies are tried in declaration order,
/// independent of the host OS — a candidate that does not exist simply never
/// qualifies.
pub struct CloudStrategy {
    pub name: &'static str,
    pub candidates: fn(&dyn Env) -> Vec<PathBuf>,
}

/// OneDrive as seen from WSL2: the user-profile location first, then
/// non-system drive mounts, then the bare C: mount.
fn onedrive_wsl_candidates(env: &dyn Env) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(user) = env.var("USER") {
        candidates.push(PathBuf::from(format!("/mnt/c/Users/{user}/OneDrive")));
    }
    for drive in ["d", "e", "f", "c"] {
        candidates.push(PathBuf::from(format!("/mnt/{drive}/OneDrive")));
    }
    candidates
}

/// iCloud Drive on macOS.
fn icloud_candidates(env: &dyn Env) -> Vec<PathBuf> {
    match env.home() {
        Some(home) => vec![home
            .join("Library")
            .join("Mobile Documents")
            .join("com~apple~CloudDocs")],
        None => Vec::new(),
    }
}

/// Detection strategies in priority order.
pub const CLOUD_STRATEGIES: &[CloudStrategy] = &[
    CloudStrategy {
        name: "onedrive-wsl",
        candidates: onedrive_wsl_candidates,
    },
    CloudStrategy {
        name: "icloud-drive",
        candidates: icloud_candidates,
    },
];

/// Resolve the database file path. See the module docs for the tier order.
pub fn resolve_db_path(
    config: &UserConfig,
    env: &dyn Env,
    probe: &dyn FsProbe,
) -> Result<PathBuf, PathError> {
    // 1. Explicit configuration
    if let Some(path) = &config.db_path {
        return Ok(path.clone());
    }

    // 2. Environment override
    if let Some(path) = env.var(DB_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }

    // 3. Cloud-sync auto-detection
    for strategy in CLOUD_STRATEGIES {
        for base in (strategy.candidates)(env) {
            if !probe.exists(&base) {
                continue;
            }
            let folder = base.join(CLOUD_FOLDER);
            if probe.try_create_writable(&folder) {
                tracing::debug!(strategy = strategy.name, path = %folder.display(), "Cloud-sync folder detected");
                return Ok(folder.join(DB_FILE_NAME));
            }
        }
    }

    // 4. Local fallback
    let fallback = env
        .home()
        .ok_or(PathError::HomeDirNotFound)?
        .join(".claude")
        .join("usage");
    if probe.try_create_writable(&fallback) {
        Ok(fallback.join(DB_FILE_NAME))
    } else {
        Err(PathError::AllTiersFailed {
            last_tried: fallback,
        })
    }
}

/// Resolve against the real environment and filesystem.
pub fn resolve_default(config: &UserConfig) -> Result<PathBuf, PathError> {
    resolve_db_path(config, &SystemEnv, &RealFs)
}
