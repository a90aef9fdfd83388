//! Publishes generated app snapshots to a git repository.
//!
//! Each publish clones the target repo into a scratch directory, rebuilds
//! the dedicated branch's top level from the generated [`FileSet`], and
//! force-pushes. Build pipeline files listed in [`KEEP_FILES`] survive the
//! rebuild so the hosted build trigger keeps working.

use std::fs;
use std::path::Path;

use anyhow::Context;
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Commit, Cred, FetchOptions, IndexAddOption, PushOptions, RemoteCallbacks, Repository, Signature};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::errors::PublishError;
use crate::fileset::FileSet;

/// Top-level entries preserved across snapshot rebuilds.
const KEEP_FILES: &[&str] = &["cloudbuild.yaml"];

const COMMITTER_NAME: &str = "appforge";
const COMMITTER_EMAIL: &str = "appforge@localhost";

/// Repository that receives generated apps.
#[derive(Debug, Clone)]
pub struct RepoLocation {
    /// HTTPS clone URL, or a filesystem path for local targets.
    pub url: String,
    /// Access token sent as the password half of HTTPS basic auth.
    pub token: Option<String>,
    /// Branch that holds the generated snapshot.
    pub branch: String,
    /// Fetch branch tips only. Off for local targets, where the
    /// transport has no shallow support.
    pub shallow: bool,
}

/// Branch state a publish left behind, consumed by the build trigger.
#[derive(Debug, Clone)]
pub struct RepositoryReference {
    pub branch: String,
    /// Commit the branch tip points at after the call.
    pub commit: String,
}

#[derive(Clone)]
pub struct Publisher {
    target: RepoLocation,
}

impl Publisher {
    pub fn new(target: RepoLocation) -> Self {
        Self { target }
    }

    /// Replaces the snapshot on the generated branch with `files` and
    /// force-pushes it. Returns without pushing when the branch tip
    /// already holds an identical tree.
    ///
    /// Concurrent publishes to one repository race on the branch with
    /// last-writer-wins semantics; callers wanting a stronger guarantee
    /// must serialize per target.
    pub fn publish(&self, files: &FileSet, message: &str) -> Result<RepositoryReference, PublishError> {
        let workdir = TempDir::new().map_err(PublishError::Workdir)?;
        let repo = self.clone_target(workdir.path())?;
        let base = self.branch_base(&repo)?;

        // Detached checkout of the base keeps ref juggling out of the
        // working tree even when the generated branch is the default.
        repo.set_head_detached(base.id())?;
        repo.checkout_head(Some(CheckoutBuilder::new().force()))?;

        let root = repo
            .workdir()
            .ok_or_else(|| anyhow::anyhow!("Clone has no working directory"))?
            .to_path_buf();
        clear_top_level(&root)?;
        write_snapshot(&root, files)?;

        let mut index = repo.index()?;
        index.clear()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree_id = index.write_tree()?;

        if tree_id == base.tree_id() {
            debug!(branch = %self.target.branch, "snapshot unchanged, skipping push");
            return Ok(RepositoryReference {
                branch: self.target.branch.clone(),
                commit: base.id().to_string(),
            });
        }

        let tree = repo.find_tree(tree_id)?;
        let signature = Signature::now(COMMITTER_NAME, COMMITTER_EMAIL)?;
        let branch_ref = format!("refs/heads/{}", self.target.branch);
        let commit_id = repo.commit(Some(&branch_ref), &signature, &signature, message, &tree, &[&base])?;

        let mut remote = repo.find_remote("origin")?;
        let refspec = format!("+{branch_ref}:{branch_ref}");
        let mut push_options = PushOptions::new();
        push_options.remote_callbacks(self.auth_callbacks());
        remote
            .push(&[refspec.as_str()], Some(&mut push_options))
            .map_err(|e| PublishError::Push {
                branch: self.target.branch.clone(),
                source: e,
            })?;

        info!(branch = %self.target.branch, commit = %commit_id, "published generated app");
        Ok(RepositoryReference {
            branch: self.target.branch.clone(),
            commit: commit_id.to_string(),
        })
    }

    fn clone_target(&self, path: &Path) -> Result<Repository, PublishError> {
        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(self.auth_callbacks());
        if self.target.shallow {
            fetch.depth(1);
        }
        RepoBuilder::new()
            .fetch_options(fetch)
            .clone(&self.target.url, path)
            .map_err(|e| PublishError::Clone {
                url: self.target.url.clone(),
                source: e,
            })
    }

    /// Tip the new snapshot commits on top of: the generated branch when
    /// the remote already has one, otherwise the default branch head.
    fn branch_base<'r>(&self, repo: &'r Repository) -> Result<Commit<'r>, PublishError> {
        let remote_ref = format!("refs/remotes/origin/{}", self.target.branch);
        if let Ok(reference) = repo.find_reference(&remote_ref) {
            return Ok(reference.peel_to_commit()?);
        }
        Ok(repo.head()?.peel_to_commit()?)
    }

    fn auth_callbacks(&self) -> RemoteCallbacks<'static> {
        let mut callbacks = RemoteCallbacks::new();
        if let Some(token) = self.target.token.clone() {
            callbacks.credentials(move |_url, _username, _allowed| {
                Cred::userpass_plaintext("oauth2", &token)
            });
        }
        callbacks
    }
}

/// Removes everything at the top of the working tree except the git
/// directory and the entries in [`KEEP_FILES`].
fn clear_top_level(root: &Path) -> Result<(), PublishError> {
    let entries = fs::read_dir(root).with_context(|| format!("Failed to list {}", root.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to list {}", root.display()))?;
        let name = entry.file_name();
        if name == ".git" || KEEP_FILES.iter().any(|keep| name == *keep) {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        }
        .with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    Ok(())
}

/// Writes the canonical app layout under `root`.
fn write_snapshot(root: &Path, files: &FileSet) -> Result<(), PublishError> {
    for (rel, content) in files.entries() {
        let path = root.join(&rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| PublishError::WriteFile {
                path: path.clone(),
                source: e,
            })?;
        }
        fs::write(&path, content).map_err(|e| PublishError::WriteFile {
            path: path.clone(),
            source: e,
        })?;
    }
    Ok(())
}
