//! Git plumbing for the authoring flows.
//!
//! # Invariants
//! - Every network operation authenticates through [`GitRemote`] credentials.
//! - A push counts as successful only when the remote accepted every ref.

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    Cred, CredentialType, Direction, ErrorCode, FetchOptions, Oid, PushOptions, RemoteCallbacks,
    Repository, Signature,
};
use log::{error, info};
use std::cell::{Cell, RefCell};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Instant;

const REMOTE_NAME: &str = "origin";
const MAX_CREDENTIAL_ATTEMPTS: u32 = 3;

pub type GitResult<T> = Result<T, GitError>;

#[derive(Debug)]
pub enum GitError {
    Git(git2::Error),
    Io(std::io::Error),
    /// The branch to create already exists locally or on the remote.
    BranchExists(String),
    /// The remote refused to update a ref.
    PushRejected { refname: String, message: String },
    /// The clone has no working tree.
    BareRepository,
}

impl Display for GitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Git(err) => write!(f, "git error: {}", err.message()),
            Self::Io(err) => write!(f, "{err}"),
            Self::BranchExists(name) => write!(f, "branch `{name}` already exists"),
            Self::PushRejected { refname, message } => {
                write!(f, "push of `{refname}` rejected: {message}")
            }
            Self::BareRepository => write!(f, "repository has no working tree"),
        }
    }
}

impl Error for GitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Git(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<git2::Error> for GitError {
    fn from(value: git2::Error) -> Self {
        Self::Git(value)
    }
}

impl From<std::io::Error> for GitError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Deploy credential used for clone, fetch and push.
#[derive(Debug, Clone, Default)]
pub struct GitCredentials {
    pub username: String,
    pub private_key_path: Option<PathBuf>,
    pub token: Option<String>,
}

/// Name and email recorded on commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

/// Remote repository the authoring flows operate on.
#[derive(Debug, Clone)]
pub struct GitRemote {
    pub url: String,
    pub main_branch: String,
    pub credentials: GitCredentials,
    /// History depth for network clones; `0` fetches everything.
    pub clone_depth: u32,
}

impl GitRemote {
    /// Clones only `branch` into `dir` and checks it out.
    pub fn clone_branch(&self, branch: &str, dir: &Path) -> GitResult<Repository> {
        let started_at = Instant::now();
        info!(
            "event=git_clone module=git status=start branch={} depth={}",
            branch, self.clone_depth
        );

        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(self.callbacks());
        // libgit2 has no shallow support over the local transport.
        if self.clone_depth > 0 && !self.is_local() {
            fetch.depth(i32::try_from(self.clone_depth).unwrap_or(i32::MAX));
        }

        let refspec = format!("+refs/heads/{branch}:refs/remotes/{REMOTE_NAME}/{branch}");
        let mut builder = RepoBuilder::new();
        builder
            .branch(branch)
            .fetch_options(fetch)
            .remote_create(move |repo, name, url| repo.remote_with_fetch(name, url, &refspec));

        match builder.clone(&self.url, dir) {
            Ok(repo) => {
                info!(
                    "event=git_clone module=git status=ok branch={} duration_ms={}",
                    branch,
                    started_at.elapsed().as_millis()
                );
                Ok(repo)
            }
            Err(err) => {
                error!(
                    "event=git_clone module=git status=error branch={} duration_ms={} error={}",
                    branch,
                    started_at.elapsed().as_millis(),
                    err.message()
                );
                Err(err.into())
            }
        }
    }

    /// Returns whether `branch` exists on the remote.
    ///
    /// Single-branch clones never see other branches, so this asks the
    /// remote directly.
    pub fn branch_exists(&self, branch: &str) -> GitResult<bool> {
        let mut remote = git2::Remote::create_detached(self.url.as_str())?;
        let connection = remote.connect_auth(Direction::Fetch, Some(self.callbacks()), None)?;
        let wanted = format!("refs/heads/{branch}");
        let exists = connection
            .list()?
            .iter()
            .any(|head| head.name() == wanted);
        Ok(exists)
    }

    /// Pushes local `branch` to the same name on the remote.
    pub fn push_branch(&self, repo: &Repository, branch: &str) -> GitResult<()> {
        let started_at = Instant::now();
        info!("event=git_push module=git status=start branch={}", branch);

        let rejection: RefCell<Option<(String, String)>> = RefCell::new(None);
        let result = {
            let mut callbacks = self.callbacks();
            callbacks.push_update_reference(|refname, status| {
                if let Some(message) = status {
                    rejection.replace(Some((refname.to_string(), message.to_string())));
                }
                Ok(())
            });
            let mut options = PushOptions::new();
            options.remote_callbacks(callbacks);

            let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
            repo.find_remote(REMOTE_NAME)
                .and_then(|mut remote| remote.push(&[refspec.as_str()], Some(&mut options)))
                .map_err(GitError::from)
        };
        let result = result.and_then(|()| match rejection.into_inner() {
            Some((refname, message)) => Err(GitError::PushRejected { refname, message }),
            None => Ok(()),
        });

        match &result {
            Ok(()) => info!(
                "event=git_push module=git status=ok branch={} duration_ms={}",
                branch,
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=git_push module=git status=error branch={} duration_ms={} error={}",
                branch,
                started_at.elapsed().as_millis(),
                err
            ),
        }
        result
    }

    fn is_local(&self) -> bool {
        self.url.starts_with("file://") || Path::new(&self.url).exists()
    }

    fn callbacks<'cb>(&self) -> RemoteCallbacks<'cb> {
        let credentials = self.credentials.clone();
        let attempts = Cell::new(0_u32);
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |_url, username_from_url, allowed| {
            attempts.set(attempts.get() + 1);
            if attempts.get() > MAX_CREDENTIAL_ATTEMPTS {
                return Err(git2::Error::from_str("remote rejected the deploy credential"));
            }

            let username = username_from_url
                .filter(|name| !name.is_empty())
                .unwrap_or(credentials.username.as_str());
            if allowed.contains(CredentialType::USERNAME) {
                return Cred::username(username);
            }
            if allowed.contains(CredentialType::SSH_KEY) {
                if let Some(key) = credentials.private_key_path.as_deref() {
                    return Cred::ssh_key(username, None, key, None);
                }
                return Cred::ssh_key_from_agent(username);
            }
            if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
                if let Some(token) = credentials.token.as_deref() {
                    return Cred::userpass_plaintext(&credentials.username, token);
                }
            }
            Cred::default()
        });
        callbacks
    }
}

/// Working-tree root of `repo`.
pub fn workdir(repo: &Repository) -> GitResult<&Path> {
    repo.workdir().ok_or(GitError::BareRepository)
}

/// Creates `name` at `HEAD` and checks it out.
pub fn create_branch(repo: &Repository, name: &str) -> GitResult<()> {
    let head = repo.head()?.peel_to_commit()?;
    match repo.branch(name, &head, false) {
        Ok(_) => {}
        Err(err) if err.code() == ErrorCode::Exists => {
            return Err(GitError::BranchExists(name.to_string()));
        }
        Err(err) => return Err(err.into()),
    }
    repo.set_head(&format!("refs/heads/{name}"))?;
    repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
    Ok(())
}

/// Stages `paths` (relative to the working tree) and commits on `HEAD`.
pub fn commit_paths(
    repo: &Repository,
    paths: &[&Path],
    message: &str,
    identity: &CommitIdentity,
) -> GitResult<Oid> {
    let mut index = repo.index()?;
    for path in paths {
        index.add_path(path)?;
    }
    index.write()?;
    let tree = repo.find_tree(index.write_tree()?)?;

    let signature = Signature::now(&identity.name, &identity.email)?;
    let parent = repo.head()?.peel_to_commit()?;
    let oid = repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        message,
        &tree,
        &[&parent],
    )?;
    info!("event=git_commit module=git status=ok commit={}", oid);
    Ok(oid)
}

/// Name of the branch `HEAD` points at, if any.
pub fn current_branch(repo: &Repository) -> GitResult<Option<String>> {
    let head = match repo.head() {
        Ok(head) => head,
        Err(err) if err.code() == ErrorCode::UnbornBranch => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(head.shorthand().map(str::to_string).filter(|_| head.is_branch()))
}

/// Checks out `refname` (a full ref such as `refs/remotes/origin/0001`)
/// with a detached `HEAD`, or a local branch when `refname` is one.
pub fn checkout_ref(repo: &Repository, refname: &str) -> GitResult<()> {
    let reference = repo.find_reference(refname)?;
    let commit = reference.peel_to_commit()?;
    repo.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))?;
    if reference.is_branch() {
        repo.set_head(refname)?;
    } else {
        repo.set_head_detached(commit.id())?;
    }
    Ok(())
}
