// crates/core/src/discovery.rs
//! Producer log discovery.
//!
//! The producer stores session logs in a structured hierarchy:
//!
//! ```text
//! ~/.claude/projects/
//! ├── {encoded-project-dir}/
//! │   ├── {sessionId}.jsonl          ← session log (scan)
//! │   └── {sessionId}/               ← sub-agent / tool output (ignore)
//! ```
//!
//! Only files exactly two path components deep (`{project}/{session}.jsonl`)
//! are session logs; deeper `.jsonl` files belong to sub-agents. Symlinks are
//! skipped so a hostile link cannot pull files from outside the tree.

use crate::error::DiscoveryError;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// A discovered producer log file.
#[derive(Debug, Clone)]
pub struct LogFile {
    pub path: PathBuf,
    pub size: u64,
    /// Last modification time as Unix timestamp (seconds).
    pub modified_at: i64,
}

/// Default producer log directory: `~/.claude/projects`.
pub fn producer_logs_dir() -> Result<PathBuf, DiscoveryError> {
    dirs::home_dir()
        .map(|home| home.join(".claude").join("projects"))
        .ok_or(DiscoveryError::HomeDirNotFound)
}

/// Whether `path` is a session log at the expected depth below `base`.
pub fn is_session_log(base: &Path, path: &Path) -> bool {
    if path.extension().map(|e| e != "jsonl").unwrap_or(true) {
        return false;
    }
    match path.strip_prefix(base) {
        Ok(rel) => rel.components().count() == 2,
        Err(_) => false,
    }
}

/// Scan `base_dir` for session log files, sorted by modification time
/// (oldest first, so ingestion replays history in rough order).
pub async fn scan_log_files(base_dir: &Path) -> Result<Vec<LogFile>, DiscoveryError> {
    let mut files = Vec::new();

    let mut project_entries = fs::read_dir(base_dir)
        .await
        .map_err(|e| DiscoveryError::io(base_dir, e))?;

    while let Ok(Some(project_entry)) = project_entries.next_entry().await {
        let project_path = project_entry.path();

        let file_type = match project_entry.file_type().await {
            Ok(ft) => ft,
            Err(_) => continue,
        };
        if !file_type.is_dir() || file_type.is_symlink() {
            continue;
        }

        let mut session_entries = match fs::read_dir(&project_path).await {
            Ok(e) => e,
            Err(e) => {
                debug!("Cannot read project dir {:?}: {}", project_path, e);
                continue;
            }
        };

        while let Ok(Some(session_entry)) = session_entries.next_entry().await {
            let file_path = session_entry.path();

            if !is_session_log(base_dir, &file_path) {
                continue;
            }

            // symlink_metadata so links are seen as links, not their targets
            let metadata = match fs::symlink_metadata(&file_path).await {
                Ok(m) => m,
                Err(_) => continue,
            };
            if !metadata.is_file() {
                continue;
            }

            let modified_at = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);

            files.push(LogFile {
                path: file_path,
                size: metadata.len(),
                modified_at,
            });
        }
    }

    files.sort_by_key(|f| f.modified_at);
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_logs_dir(projects: &[(&str, &[&str])]) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::TempDir::new().unwrap();
        let base = tmp.path().to_path_buf();
        for (project, sessions) in projects {
            let project_dir = base.join(project);
            fs::create_dir_all(&project_dir).await.unwrap();
            for session in *sessions {
                fs::write(project_dir.join(session), "{}\n").await.unwrap();
            }
        }
        (tmp, base)
    }

    #[tokio::test]
    async fn test_scan_finds_session_logs() {
        let (_tmp, base) = setup_logs_dir(&[
            ("-Users-foo-project-a", &["abc123.jsonl", "def456.jsonl"]),
            ("-Users-foo-project-b", &["ghi789.jsonl"]),
        ])
        .await;

        let files = scan_log_files(&base).await.unwrap();
        assert_eq!(files.len(), 3);
        for f in &files {
            assert!(f.size > 0);
            assert!(f.modified_at > 0);
        }
    }

    #[tokio::test]
    async fn test_scan_ignores_subagent_files() {
        let (_tmp, base) = setup_logs_dir(&[("-Users-foo-proj", &["abc.jsonl"])]).await;

        // Sub-agent log at depth 4 — must not be picked up
        let sub = base.join("-Users-foo-proj").join("abc").join("subagents");
        fs::create_dir_all(&sub).await.unwrap();
        fs::write(sub.join("agent-1.jsonl"), "{}\n").await.unwrap();

        // Non-JSONL file at session depth
        fs::write(base.join("-Users-foo-proj").join("notes.txt"), "x")
            .await
            .unwrap();

        let files = scan_log_files(&base).await.unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("abc.jsonl"));
    }

    #[tokio::test]
    async fn test_scan_missing_dir_errors() {
        let err = scan_log_files(Path::new("/nonexistent-logs-dir"))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::LogsDirNotFound { .. }));
    }

    #[test]
    fn test_is_session_log_depth_filter() {
        let base = Path::new("/home/u/.claude/projects");
        assert!(is_session_log(base, &base.join("proj").join("s1.jsonl")));
        assert!(!is_session_log(
            base,
            &base.join("proj").join("s1").join("subagents").join("a.jsonl")
        ));
        assert!(!is_session_log(base, &base.join("proj").join("readme.md")));
        assert!(!is_session_log(base, Path::new("/tmp/s1.jsonl")));
    }
}
