//! Git repository access
//!
//! Thin layer over git2 providing what the mining loop needs from a
//! repository: acquisition (clone or reuse), chronological commit listing,
//! detached checkouts and working-tree cleanup between snapshots.

use chrono::{DateTime, TimeZone, Utc};
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{ErrorCode, Oid, Repository, ResetType, Sort};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MiningError, MiningResult};

/// A commit as seen by the mining loop
#[derive(Debug, Clone, PartialEq)]
pub struct CommitInfo {
    pub hash: String,
    pub date: DateTime<Utc>,
    pub author: String,
    pub summary: String,
    pub parent_count: usize,
}

impl CommitInfo {
    /// Build a commit entry from a hash and a date only
    pub fn new(hash: impl Into<String>, date: DateTime<Utc>) -> Self {
        Self {
            hash: hash.into(),
            date,
            author: String::new(),
            summary: String::new(),
            parent_count: 0,
        }
    }

    /// First eight characters of the hash, for log lines
    pub fn short_hash(&self) -> &str {
        short_hash(&self.hash)
    }
}

/// Shorten a commit hash for display
pub fn short_hash(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

/// A working tree that can be moved between commits.
///
/// Only one thread may drive a given working tree; implementations are not
/// required to be `Sync`.
pub trait WorkingTree {
    /// Root directory of the checked-out files
    fn root(&self) -> &Path;

    /// Discard local modifications, untracked and ignored files
    fn reset_working_tree(&self) -> MiningResult<()>;

    /// Check out the given commit with a detached HEAD
    fn checkout(&self, commit_hash: &str) -> MiningResult<()>;
}

/// A wrapper around git2::Repository owned by a single mining worker
pub struct RepositoryHandle {
    repository: Repository,
    path: PathBuf,
    name: String,
}

impl RepositoryHandle {
    /// Open a repository from a path
    pub fn open<P: AsRef<Path>>(path: P) -> MiningResult<Self> {
        let path = path.as_ref();
        let repository = Repository::open(path)
            .map_err(|e| MiningError::repository_with_path(format!("Failed to open repository: {}", e.message()), path))?;

        let workdir = repository
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| MiningError::repository_with_path("Bare repositories have no working tree", path))?;

        let canonical_path = workdir.canonicalize().unwrap_or(workdir);
        let name = repository_name(&canonical_path.to_string_lossy());

        debug!("Opened repository {} at {}", name, canonical_path.display());
        Ok(Self {
            repository,
            path: canonical_path,
            name,
        })
    }

    /// Repository name (last path component)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Working directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a reference to the underlying Repository
    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    /// List commits reachable from HEAD, oldest first.
    ///
    /// With `max_commits`, only the newest N commits are kept, still in
    /// chronological order. An empty repository yields an empty list.
    pub fn list_commits(&self, max_commits: Option<usize>) -> MiningResult<Vec<CommitInfo>> {
        if self.repository.is_empty()? {
            info!("Repository {} has no commits", self.name);
            return Ok(Vec::new());
        }

        let mut walk = self.repository.revwalk()?;
        walk.push_head()?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME | Sort::REVERSE)?;

        let mut commits = Vec::new();
        for oid in walk {
            let commit = self.repository.find_commit(oid?)?;
            let seconds = commit.time().seconds();
            let date = Utc
                .timestamp_opt(seconds, 0)
                .single()
                .ok_or_else(|| MiningError::repository(format!("Commit {} has an invalid timestamp {}", commit.id(), seconds)))?;

            commits.push(CommitInfo {
                hash: commit.id().to_string(),
                date,
                author: commit.author().name().unwrap_or("").to_string(),
                summary: commit.summary().unwrap_or("").to_string(),
                parent_count: commit.parent_count(),
            });
        }

        if let Some(limit) = max_commits {
            if commits.len() > limit {
                let skip = commits.len() - limit;
                commits.drain(..skip);
            }
        }

        debug!("Listed {} commits for {}", commits.len(), self.name);
        Ok(commits)
    }

    /// Name of the currently checked out branch, or the detached commit hash
    pub fn head_reference(&self) -> MiningResult<Option<String>> {
        match self.repository.head() {
            Ok(head) => {
                if self.repository.head_detached()? {
                    Ok(head.target().map(|oid| oid.to_string()))
                } else {
                    Ok(head.name().map(str::to_string))
                }
            }
            Err(e) if e.code() == ErrorCode::UnbornBranch => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Move HEAD back to a reference captured with `head_reference`
    pub fn restore_head(&self, reference: &str) -> MiningResult<()> {
        self.reset_working_tree()?;

        if reference.starts_with("refs/") {
            let target = self
                .repository
                .find_reference(reference)?
                .peel_to_commit()?;
            let mut builder = CheckoutBuilder::new();
            builder.force();
            self.repository.checkout_tree(target.as_object(), Some(&mut builder))?;
            self.repository.set_head(reference)?;
        } else {
            self.checkout(reference)?;
        }

        debug!("Restored HEAD of {} to {}", self.name, reference);
        Ok(())
    }
}

impl WorkingTree for RepositoryHandle {
    fn root(&self) -> &Path {
        &self.path
    }

    fn reset_working_tree(&self) -> MiningResult<()> {
        let head = match self.repository.head() {
            Ok(head) => head,
            Err(e) if e.code() == ErrorCode::UnbornBranch => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let commit = head.peel_to_commit()?;

        let mut builder = CheckoutBuilder::new();
        builder.force().remove_untracked(true).remove_ignored(true);
        self.repository
            .reset(commit.as_object(), ResetType::Hard, Some(&mut builder))?;
        Ok(())
    }

    fn checkout(&self, commit_hash: &str) -> MiningResult<()> {
        let oid = Oid::from_str(commit_hash)
            .map_err(|e| MiningError::checkout(commit_hash, e.message()))?;
        let commit = self
            .repository
            .find_commit(oid)
            .map_err(|e| MiningError::checkout(commit_hash, e.message()))?;

        let mut builder = CheckoutBuilder::new();
        builder.force().remove_untracked(true);
        self.repository
            .checkout_tree(commit.as_object(), Some(&mut builder))
            .map_err(|e| MiningError::checkout(commit_hash, e.message()))?;
        self.repository
            .set_head_detached(oid)
            .map_err(|e| MiningError::checkout(commit_hash, e.message()))?;
        Ok(())
    }
}

/// Where the local copy of a source lives: `repos_dir/<owner>-<name>`
pub fn local_copy_path(repos_dir: &Path, url_or_path: &str) -> MiningResult<PathBuf> {
    let key = repository_key(url_or_path);
    if key.is_empty() {
        return Err(MiningError::repository(format!("Cannot derive a repository name from '{}'", url_or_path)));
    }
    Ok(repos_dir.join(key))
}

/// Make sure a repository exists on local disk and return its path.
///
/// Every source, URL or local repository, is cloned into
/// [`local_copy_path`]. Mining resets and checks out the copy, so a user's
/// own working tree is never touched. An existing copy is reused without
/// fetching.
pub fn ensure_local_copy(repos_dir: &Path, url_or_path: &str) -> MiningResult<PathBuf> {
    let target = local_copy_path(repos_dir, url_or_path)?;
    if target.exists() {
        info!("Repository {} already exists in {}, skipping clone", url_or_path, repos_dir.display());
        return Ok(target);
    }

    if !repos_dir.is_dir() {
        info!("{} did not exist, creating it", repos_dir.display());
        fs::create_dir_all(repos_dir)?;
    }

    let candidate = Path::new(url_or_path);
    let source = if candidate.is_dir() {
        let canonical = candidate.canonicalize()?;
        Repository::open(&canonical).map_err(|e| {
            MiningError::repository_with_path(format!("Not a git repository: {}", e.message()), &canonical)
        })?;
        canonical.to_string_lossy().to_string()
    } else {
        url_or_path.to_string()
    };

    info!("Cloning {} into {}", source, target.display());
    RepoBuilder::new()
        .clone(&source, &target)
        .map_err(|e| MiningError::repository(format!("Failed to clone {}: {}", url_or_path, e.message())))?;
    info!("Finished cloning {}", target.display());

    Ok(target)
}

/// Delete a local clone. Missing directories are not an error.
pub fn remove_local_copy(path: &Path) -> MiningResult<()> {
    if !path.exists() {
        info!("Could not find {}, nothing to remove", path.display());
        return Ok(());
    }

    info!("Removing {}", path.display());
    fs::remove_dir_all(path)?;
    if path.exists() {
        warn!("Failed to remove {}", path.display());
    }
    Ok(())
}

/// Name of a repository from either a file path or a URL
pub fn repository_name(path_or_url: &str) -> String {
    let normalized = path_or_url.trim().replace('\\', "/");
    let last = normalized
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("");
    last.strip_suffix(".git").unwrap_or(last).to_string()
}

/// Owner segment of a repository source: `<owner>` in `https://host/<owner>/<name>`,
/// `git@host:<owner>/<name>` or the parent directory of a local path
pub fn repository_owner(path_or_url: &str) -> Option<String> {
    let normalized = path_or_url.trim().replace('\\', "/");
    let mut segments = normalized.trim_end_matches('/').rsplit('/');
    segments.next()?;
    segments
        .next()
        .map(|owner| owner.rsplit(':').next().unwrap_or(owner).trim().to_string())
        .filter(|owner| !owner.is_empty())
}

/// Key a repository is stored and reported under: `<owner>-<name>`, or the
/// bare name when the source has no owner segment
pub fn repository_key(path_or_url: &str) -> String {
    let name = repository_name(path_or_url);
    match repository_owner(path_or_url) {
        Some(owner) if !name.is_empty() => format!("{}-{}", owner, name),
        _ => name,
    }
}

/// Strip whitespace and a trailing slash from a repository URL
pub fn sanitize_url(url: &str) -> String {
    let trimmed = url.trim();
    trimmed.strip_suffix('/').unwrap_or(trimmed).to_string()
}

/// Read repository URLs or paths from a file, one per line.
/// Blank lines and lines starting with `#` are skipped.
pub fn read_repository_list(path: &Path) -> MiningResult<Vec<String>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(sanitize_url)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect())
}
