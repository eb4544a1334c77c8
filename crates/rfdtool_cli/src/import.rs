//! Bulk and single-document import sources.

use crate::submit::{Submitted, Submitter};
use crate::CliError;
use git2::{BranchType, Oid, Repository};
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use rfdtool_core::authoring::git::checkout_ref;
use rfdtool_core::{Rfd, RfdId, Renderer};
use std::fs::File;
use std::path::Path;

static RFD_DIR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})").expect("valid rfd directory regex"));
static RFD_BRANCH_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^origin/(\d{4})$").expect("valid rfd branch regex"));

const README: &str = "README.md";

/// Counts printed after a bulk run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub created: usize,
    pub updated: usize,
    pub accepted: usize,
    pub failed: usize,
}

impl ImportSummary {
    fn record(&mut self, submitted: Submitted) {
        match submitted {
            Submitted::Created => self.created += 1,
            Submitted::Updated => self.updated += 1,
            Submitted::Accepted => self.accepted += 1,
        }
    }
}

/// Leading four-digit id of an RFD directory name.
pub fn rfd_id_from_dir_name(name: &str) -> Option<RfdId> {
    let captures = RFD_DIR_PATTERN.captures(name)?;
    RfdId::parse(&captures[1]).ok()
}

/// Renders `<folder>/<id>/README.md`.
///
/// Outside bulk mode a discussion link is required unless the state allows
/// publishing without one.
pub fn read_rfd(
    renderer: &dyn Renderer,
    folder: &Path,
    dir_name: &str,
    id: RfdId,
    bulk: bool,
) -> Result<Rfd, CliError> {
    let path = folder.join(dir_name).join(README);
    let mut file = File::open(&path).map_err(|source| CliError::Read {
        path: path.clone(),
        source,
    })?;
    let rfd = renderer.render_reader(id, &mut file)?;
    if !bulk && !rfd.state.allows_missing_discussion() && rfd.discussion.trim().is_empty() {
        return Err(CliError::DiscussionRequired(id));
    }
    Ok(rfd)
}

/// Directory entries of `folder` that look like RFDs, sorted by name.
pub fn rfd_dirs(folder: &Path) -> Result<Vec<(String, RfdId)>, CliError> {
    let entries = std::fs::read_dir(folder).map_err(|source| CliError::Read {
        path: folder.to_path_buf(),
        source,
    })?;
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| CliError::Read {
            path: folder.to_path_buf(),
            source,
        })?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(id) = rfd_id_from_dir_name(&name) else {
            continue;
        };
        if entry.path().join(README).is_file() {
            dirs.push((name, id));
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Renders and submits every RFD directory under `folder`.
pub fn import_folder(
    renderer: &dyn Renderer,
    submitter: &dyn Submitter,
    folder: &Path,
) -> Result<ImportSummary, CliError> {
    let mut summary = ImportSummary::default();
    for (name, id) in rfd_dirs(folder)? {
        let rfd = read_rfd(renderer, folder, &name, id, true)?;
        match submitter.submit(&rfd) {
            Ok(submitted) => summary.record(submitted),
            Err(err) => {
                warn!(
                    "event=folder_import module=cli status=error id={} error={}",
                    id, err
                );
                summary.failed += 1;
            }
        }
    }
    info!(
        "event=folder_import module=cli status=ok created={} updated={} accepted={} failed={}",
        summary.created, summary.updated, summary.accepted, summary.failed
    );
    Ok(summary)
}

/// Restores the checkout a branch scan started from.
struct HeadGuard<'r> {
    repo: &'r Repository,
    branch: Option<String>,
    commit: Option<Oid>,
}

impl<'r> HeadGuard<'r> {
    fn capture(repo: &'r Repository) -> Result<Self, CliError> {
        let head = repo.head()?;
        let branch = head
            .is_branch()
            .then(|| head.name().map(str::to_string))
            .flatten();
        Ok(Self {
            repo,
            branch,
            commit: head.target(),
        })
    }

    fn restore(&self) -> Result<(), CliError> {
        if let Some(branch) = &self.branch {
            checkout_ref(self.repo, branch)?;
            return Ok(());
        }
        if let Some(commit) = self.commit {
            let object = self.repo.find_object(commit, None)?;
            self.repo
                .checkout_tree(&object, Some(git2::build::CheckoutBuilder::new().force()))?;
            self.repo.set_head_detached(commit)?;
        }
        Ok(())
    }
}

impl Drop for HeadGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.restore() {
            warn!(
                "event=branch_import module=cli status=error stage=restore_head error={}",
                err
            );
        }
    }
}

/// Imports every `origin/NNNN` branch of the repository at `repo_path`.
///
/// A branch whose RFD already exists at the starting `HEAD` counts as an
/// update. Per-branch failures are logged and skipped; the original
/// checkout is restored afterwards.
pub fn import_branches(
    renderer: &dyn Renderer,
    submitter: &dyn Submitter,
    repo_path: &Path,
    rfd_folder: &str,
) -> Result<ImportSummary, CliError> {
    let repo = Repository::open(repo_path)?;
    let folder = repo_path.join(rfd_folder);
    info!(
        "event=branch_import module=cli status=start repo={}",
        repo_path.display()
    );

    let mut branches = Vec::new();
    for branch in repo.branches(Some(BranchType::Remote))? {
        let (branch, _) = branch?;
        let Some(name) = branch.name()? else {
            continue;
        };
        if let Some(captures) = RFD_BRANCH_PATTERN.captures(name) {
            branches.push((name.to_string(), captures[1].to_string()));
        }
    }
    branches.sort();

    let mut summary = ImportSummary::default();
    let base_tree = repo.head()?.peel_to_tree()?;
    let guard = HeadGuard::capture(&repo)?;
    for (branch, number) in branches {
        let Ok(id) = RfdId::parse(&number) else {
            continue;
        };
        let in_base = Path::new(rfd_folder).join(&number).join(README);
        let exists_at_base = base_tree.get_path(&in_base).is_ok();

        if let Err(err) = checkout_ref(&repo, &format!("refs/remotes/{branch}")) {
            warn!(
                "event=branch_import module=cli status=skipped branch={} reason=checkout error={}",
                branch, err
            );
            summary.failed += 1;
            continue;
        }
        if !folder.join(&number).join(README).is_file() {
            warn!(
                "event=branch_import module=cli status=skipped branch={} reason=no_readme",
                branch
            );
            continue;
        }

        let submitted = read_rfd(renderer, &folder, &number, id, true)
            .and_then(|rfd| submitter.submit(&rfd));
        match submitted {
            Ok(Submitted::Accepted) if exists_at_base => summary.updated += 1,
            Ok(Submitted::Accepted) => summary.created += 1,
            Ok(submitted) => summary.record(submitted),
            Err(err) => {
                warn!(
                    "event=branch_import module=cli status=skipped branch={} reason=submit error={}",
                    branch, err
                );
                summary.failed += 1;
            }
        }
    }
    drop(guard);

    info!(
        "event=branch_import module=cli status=ok created={} updated={} failed={}",
        summary.created, summary.updated, summary.failed
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::{rfd_dirs, rfd_id_from_dir_name, read_rfd};
    use crate::CliError;
    use rfdtool_core::{MarkdownRenderer, RfdId};
    use std::fs;

    const DISCUSSION_RFD: &str = "---\ntitle: Storage\nstate: discussion\n---\nBody\n";

    #[test]
    fn dir_names_need_four_leading_digits() {
        assert_eq!(rfd_id_from_dir_name("0042"), Some(RfdId::new(42).unwrap()));
        assert_eq!(
            rfd_id_from_dir_name("0042-storage"),
            Some(RfdId::new(42).unwrap())
        );
        assert_eq!(rfd_id_from_dir_name("042"), None);
        assert_eq!(rfd_id_from_dir_name("notes"), None);
    }

    #[test]
    fn folder_scan_keeps_only_rfd_dirs_with_readme() {
        let root = tempfile::tempdir().unwrap();
        for name in ["0003", "0001", "0002", "templates"] {
            fs::create_dir(root.path().join(name)).unwrap();
        }
        for name in ["0003", "0001", "templates"] {
            fs::write(root.path().join(name).join("README.md"), DISCUSSION_RFD).unwrap();
        }

        let ids: Vec<u32> = rfd_dirs(root.path())
            .unwrap()
            .into_iter()
            .map(|(_, id)| id.value())
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn single_push_requires_discussion_link() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("0005")).unwrap();
        fs::write(root.path().join("0005").join("README.md"), DISCUSSION_RFD).unwrap();
        let id = RfdId::new(5).unwrap();

        let err = read_rfd(&MarkdownRenderer, root.path(), "0005", id, false).unwrap_err();
        assert!(matches!(err, CliError::DiscussionRequired(found) if found == id));

        let rfd = read_rfd(&MarkdownRenderer, root.path(), "0005", id, true).unwrap();
        assert_eq!(rfd.title, "Storage");
    }
}
