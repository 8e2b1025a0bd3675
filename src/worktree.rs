use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::error::{GroveError, Result};

/// A git worktree as reported by `git worktree list --porcelain`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worktree {
    pub path: PathBuf,
    /// Short branch name, `None` for a detached HEAD
    pub branch: Option<String>,
    pub is_main: bool,
}

/// Thin wrapper over the git CLI for worktree lookups
#[derive(Debug, Clone)]
pub struct WorktreeService {
    repo_root: PathBuf,
}

impl WorktreeService {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    /// List every worktree of the repository, main worktree first
    pub async fn list_worktrees(&self) -> Result<Vec<Worktree>> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_root)
            .args(["worktree", "list", "--porcelain"])
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GroveError::Git(stderr.trim().to_string()));
        }

        Ok(parse_worktree_list(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Resolve the branch checked out at `path`
    pub async fn branch_for_path(&self, path: &Path) -> Option<String> {
        let target = canonical(path);
        if let Ok(worktrees) = self.list_worktrees().await {
            if let Some(found) = worktrees.into_iter().find(|w| canonical(&w.path) == target) {
                return found.branch;
            }
        }

        // Not one of ours; ask the checkout directly
        let output = Command::new("git")
            .arg("-C")
            .arg(path)
            .args(["rev-parse", "--abbrev-ref", "HEAD"])
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!branch.is_empty() && branch != "HEAD").then_some(branch)
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Parse porcelain output: blank-line separated records of `key value` lines
pub fn parse_worktree_list(output: &str) -> Vec<Worktree> {
    let mut worktrees = Vec::new();
    let mut current: Option<Worktree> = None;

    for line in output.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(done) = current.take() {
                worktrees.push(done);
            }
            current = Some(Worktree {
                path: PathBuf::from(path),
                branch: None,
                is_main: worktrees.is_empty(),
            });
        } else if let Some(branch) = line.strip_prefix("branch ") {
            if let Some(wt) = current.as_mut() {
                let short = branch.strip_prefix("refs/heads/").unwrap_or(branch);
                wt.branch = Some(short.to_string());
            }
        } else if line.trim().is_empty() {
            if let Some(done) = current.take() {
                worktrees.push(done);
            }
        }
    }

    if let Some(done) = current.take() {
        worktrees.push(done);
    }

    worktrees
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_worktree_list() {
        let output = "\
worktree /repo
HEAD 1111111111111111111111111111111111111111
branch refs/heads/main

worktree /repo-wt/feature-login
HEAD 2222222222222222222222222222222222222222
branch refs/heads/feature/login

worktree /repo-wt/bisect
HEAD 3333333333333333333333333333333333333333
detached
";
        let worktrees = parse_worktree_list(output);
        assert_eq!(worktrees.len(), 3);
        assert_eq!(worktrees[0].path, PathBuf::from("/repo"));
        assert!(worktrees[0].is_main);
        assert_eq!(worktrees[0].branch.as_deref(), Some("main"));
        assert!(!worktrees[1].is_main);
        assert_eq!(worktrees[1].branch.as_deref(), Some("feature/login"));
        assert_eq!(worktrees[2].branch, None);
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_worktree_list("").is_empty());
    }

    #[tokio::test]
    async fn test_branch_for_non_repo_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let service = WorktreeService::new(dir.path());
        assert_eq!(service.branch_for_path(dir.path()).await, None);
    }
}
