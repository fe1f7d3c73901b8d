//! Working copy inspection
//!
//! Only what the emulator needs: finding the working copy that encloses a
//! directory and reading the branch that is currently checked out.

use std::path::{Path, PathBuf};

use crate::error::{Result, SimulatorError};

const GIT_DIR: &str = ".git";
const HEAD_REF_PREFIX: &str = "ref: refs/heads/";
const GITDIR_PREFIX: &str = "gitdir:";

/// Find the root of the working copy that contains `dir`
///
/// Walks up the ancestors of `dir` until a `.git` directory (or a `.git` file as
/// used by worktrees and submodules) is found.
#[must_use]
pub fn find_working_copy(dir: &Path) -> Option<PathBuf> {
    dir.ancestors()
        .find(|candidate| candidate.join(GIT_DIR).exists())
        .map(Path::to_path_buf)
}

/// Resolve the git directory of a working copy root
async fn git_dir(root: &Path) -> Result<PathBuf> {
    let dot_git = root.join(GIT_DIR);
    let metadata = tokio::fs::metadata(&dot_git).await.map_err(|_| {
        SimulatorError::Config(format!("{} is no valid git repository.", root.display()))
    })?;
    if metadata.is_dir() {
        return Ok(dot_git);
    }

    let pointer = tokio::fs::read_to_string(&dot_git).await?;
    let target = pointer
        .trim()
        .strip_prefix(GITDIR_PREFIX)
        .map(str::trim)
        .ok_or_else(|| {
            SimulatorError::Config(format!("{} is no valid git repository.", root.display()))
        })?;
    Ok(root.join(target))
}

/// Name of the branch checked out in the working copy at `root`
///
/// A detached HEAD yields the commit id it points at.
///
/// # Errors
///
/// Returns an error if `HEAD` cannot be read.
pub async fn current_branch(root: &Path) -> Result<String> {
    let head_path = git_dir(root).await?.join("HEAD");
    let head = tokio::fs::read_to_string(&head_path).await?;
    let head = head.trim();
    Ok(head
        .strip_prefix(HEAD_REF_PREFIX)
        .unwrap_or(head)
        .to_string())
}

#[cfg(test)]
pub(crate) fn init_fake_repo(root: &Path, branch: &str) {
    std::fs::create_dir_all(root.join(GIT_DIR)).unwrap();
    std::fs::write(
        root.join(GIT_DIR).join("HEAD"),
        format!("{HEAD_REF_PREFIX}{branch}\n"),
    )
    .unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_find_working_copy_from_subdirectory() {
        let temp = TempDir::new().unwrap();
        init_fake_repo(temp.path(), "main");
        let nested = temp.path().join("docs").join("api");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_working_copy(&nested).as_deref(), Some(temp.path()));
    }

    #[test]
    fn test_find_working_copy_outside_repo() {
        let temp = TempDir::new().unwrap();
        assert!(find_working_copy(temp.path()).is_none());
    }

    #[tokio::test]
    async fn test_current_branch() {
        let temp = TempDir::new().unwrap();
        init_fake_repo(temp.path(), "feature/x");
        assert_eq!(current_branch(temp.path()).await.unwrap(), "feature/x");
    }

    #[tokio::test]
    async fn test_detached_head() {
        let temp = TempDir::new().unwrap();
        init_fake_repo(temp.path(), "main");
        let sha = "0123456789abcdef0123456789abcdef01234567";
        std::fs::write(temp.path().join(".git").join("HEAD"), sha).unwrap();
        assert_eq!(current_branch(temp.path()).await.unwrap(), sha);
    }

    #[tokio::test]
    async fn test_gitdir_pointer_file() {
        let temp = TempDir::new().unwrap();
        let real = temp.path().join("real-git");
        std::fs::create_dir_all(&real).unwrap();
        std::fs::write(real.join("HEAD"), "ref: refs/heads/worktree\n").unwrap();
        let checkout = temp.path().join("checkout");
        std::fs::create_dir_all(&checkout).unwrap();
        std::fs::write(checkout.join(".git"), format!("gitdir: {}\n", real.display())).unwrap();

        assert_eq!(current_branch(&checkout).await.unwrap(), "worktree");
    }

    #[tokio::test]
    async fn test_not_a_repository() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            current_branch(temp.path()).await,
            Err(SimulatorError::Config(_))
        ));
    }
}
