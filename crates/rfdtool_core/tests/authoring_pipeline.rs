use git2::{Oid, Repository, Signature};
use rfdtool_core::authoring::git::{CommitIdentity, GitCredentials, GitError, GitRemote};
use rfdtool_core::authoring::{
    AuthoringError, DiscussionWriteOutcome, DiscussionWriter, GitDiscussionWriter, PipelineState,
};
use rfdtool_core::writeback::JobStatus;
use rfdtool_core::{
    AuthoringPipeline, AuthoringSettings, DocumentStore, KvDocumentStore, MarkdownRenderer, Renderer,
    RfdId, RfdService, RfdState, TemplateOverlay, WebhookClient, WebhookSettings,
};
use rfdtool_core::{RenderResult, Rfd, StoreError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TEMPLATE: &str = "---
title: Replace me
authors: Your Name <you@example.com>
state: prediscussion
discussion:
---

# Summary

Describe the problem.
";

const EXISTING_RFD: &str = "---
title: Merged proposal
authors: Ann Lee <ann@example.com>
state: published
discussion:
---

Merged body.
";

fn id(value: u32) -> RfdId {
    RfdId::new(value).unwrap()
}

/// Bare remote whose `main` holds the template and optionally merged RFDs.
fn seed_remote(dir: &Path, merged: &[(&str, &str)]) -> Repository {
    let bare = Repository::init_bare(dir).unwrap();
    let tree_id = {
        let mut root = bare.treebuilder(None).unwrap();
        root.insert("prototemplate.md", bare.blob(TEMPLATE.as_bytes()).unwrap(), 0o100644)
            .unwrap();

        if !merged.is_empty() {
            let mut folder = bare.treebuilder(None).unwrap();
            for (number, source) in merged {
                let mut rfd_dir = bare.treebuilder(None).unwrap();
                rfd_dir
                    .insert("README.md", bare.blob(source.as_bytes()).unwrap(), 0o100644)
                    .unwrap();
                folder
                    .insert(*number, rfd_dir.write().unwrap(), 0o040000)
                    .unwrap();
            }
            root.insert("rfd", folder.write().unwrap(), 0o040000).unwrap();
        }
        root.write().unwrap()
    };
    {
        let tree = bare.find_tree(tree_id).unwrap();
        let signature = Signature::now("Seed", "seed@example.com").unwrap();
        bare.commit(
            Some("refs/heads/main"),
            &signature,
            &signature,
            "Add RFD template",
            &tree,
            &[],
        )
        .unwrap();
    }
    bare.set_head("refs/heads/main").unwrap();
    bare
}

fn settings(remote: &Path) -> AuthoringSettings {
    AuthoringSettings {
        remote: GitRemote {
            url: remote.to_str().unwrap().to_string(),
            main_branch: "main".to_string(),
            credentials: GitCredentials::default(),
            clone_depth: 1,
        },
        folder: "rfd".to_string(),
        template_file: "prototemplate.md".to_string(),
        commit_author: CommitIdentity {
            name: "RFD Bot".to_string(),
            email: "rfd@example.com".to_string(),
        },
    }
}

fn branch_head(repo: &Repository, branch: &str) -> Option<Oid> {
    repo.find_reference(&format!("refs/heads/{branch}"))
        .ok()?
        .target()
}

fn read_on_branch(repo: &Repository, branch: &str, path: &str) -> Option<String> {
    let commit = repo
        .find_reference(&format!("refs/heads/{branch}"))
        .ok()?
        .peel_to_commit()
        .ok()?;
    let entry = commit.tree().ok()?.get_path(Path::new(path)).ok()?;
    let blob = repo.find_blob(entry.id()).ok()?;
    Some(String::from_utf8(blob.content().to_vec()).unwrap())
}

fn head_message(repo: &Repository, branch: &str) -> String {
    repo.find_reference(&format!("refs/heads/{branch}"))
        .unwrap()
        .peel_to_commit()
        .unwrap()
        .message()
        .unwrap()
        .to_string()
}

fn overlay(title: &str) -> TemplateOverlay {
    TemplateOverlay {
        title: title.to_string(),
        authors: "Ann Lee <ann@example.com>, bob@example.com".to_string(),
        tags: "Storage, API".to_string(),
    }
}

#[test]
fn create_commits_pushes_and_ingests_the_next_rfd() {
    let remote_dir = tempfile::tempdir().unwrap();
    let remote = seed_remote(remote_dir.path(), &[]);
    let main_before = branch_head(&remote, "main");
    let store: Arc<dyn DocumentStore> = Arc::new(KvDocumentStore::open_in_memory().unwrap());
    let pipeline = AuthoringPipeline::new(
        settings(remote_dir.path()),
        store.clone(),
        Arc::new(MarkdownRenderer),
    );

    let outcome = pipeline.create(&overlay("Storage engine")).unwrap();
    assert_eq!(
        outcome.trail,
        vec![
            PipelineState::Init,
            PipelineState::Cloned,
            PipelineState::BranchCreated,
            PipelineState::TemplateRead,
            PipelineState::FileWritten,
            PipelineState::Committed,
            PipelineState::Ingested,
            PipelineState::Pushed,
            PipelineState::Done,
        ]
    );
    assert_eq!(outcome.rfd.id, id(1));
    assert_eq!(outcome.rfd.state, RfdState::Ideation);
    assert_eq!(outcome.rfd.tags, vec!["api", "storage"]);
    assert_eq!(outcome.rfd.authors, vec!["ann@example.com", "bob@example.com"]);

    let stored = store.get_rfd(id(1)).unwrap().unwrap();
    assert_eq!(stored.title, "Storage engine");
    assert!(stored.content_md.contains("Describe the problem."));
    assert_eq!(store.next_rfd_id().unwrap(), id(2));
    assert_eq!(store.get_tag("storage").unwrap().unwrap().rfds, vec![id(1)]);
    assert_eq!(store.get_author("ann@example.com").unwrap().unwrap().name, "Ann Lee");

    let pushed = read_on_branch(&remote, "0001", "rfd/0001/README.md").unwrap();
    let rendered = MarkdownRenderer.render(id(1), &pushed).unwrap();
    assert_eq!(rendered.title, "Storage engine");
    assert_eq!(rendered.state, RfdState::Ideation);
    assert!(rendered.discussion.is_empty());
    assert_eq!(head_message(&remote, "0001").trim(), "Creating RFD 0001");
    assert_eq!(branch_head(&remote, "main"), main_before);

    let second = pipeline.create(&overlay("Second")).unwrap();
    assert_eq!(second.rfd.id, id(2));
    assert!(branch_head(&remote, "0002").is_some());
}

#[test]
fn existing_remote_branch_fails_before_anything_is_stored() {
    let remote_dir = tempfile::tempdir().unwrap();
    let remote = seed_remote(remote_dir.path(), &[]);
    let main = remote
        .find_reference("refs/heads/main")
        .unwrap()
        .peel_to_commit()
        .unwrap();
    remote.branch("0001", &main, false).unwrap();

    let store: Arc<dyn DocumentStore> = Arc::new(KvDocumentStore::open_in_memory().unwrap());
    let pipeline = AuthoringPipeline::new(
        settings(remote_dir.path()),
        store.clone(),
        Arc::new(MarkdownRenderer),
    );

    let failure = pipeline.create(&overlay("Collides")).unwrap_err();
    assert_eq!(failure.state, PipelineState::Cloned);
    assert_eq!(failure.id, Some(id(1)));
    assert!(!failure.ingested());
    assert!(matches!(
        failure.error,
        AuthoringError::Remote(GitError::BranchExists(ref name)) if name == "0001"
    ));
    assert!(store.get_rfds().unwrap().is_empty());
    assert_eq!(store.next_rfd_id().unwrap(), id(1));
}

/// Runs a competing creation to completion before rendering the first time.
struct RacingRenderer {
    competitor: AuthoringPipeline,
    raced: AtomicBool,
}

impl Renderer for RacingRenderer {
    fn render(&self, id: RfdId, source: &str) -> RenderResult<Rfd> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            let winner = self.competitor.create(&overlay("Winner")).unwrap();
            assert_eq!(winner.rfd.id, id);
        }
        MarkdownRenderer.render(id, source)
    }
}

/// Removes the remote before rendering, so the later push has nowhere to go.
struct RemoteRemovingRenderer {
    remote: PathBuf,
}

impl Renderer for RemoteRemovingRenderer {
    fn render(&self, id: RfdId, source: &str) -> RenderResult<Rfd> {
        std::fs::remove_dir_all(&self.remote).unwrap();
        MarkdownRenderer.render(id, source)
    }
}

#[test]
fn concurrent_create_for_the_same_id_keeps_the_pushed_winner() {
    let remote_dir = tempfile::tempdir().unwrap();
    let remote = seed_remote(remote_dir.path(), &[]);
    let store: Arc<dyn DocumentStore> = Arc::new(KvDocumentStore::open_in_memory().unwrap());
    let competitor = AuthoringPipeline::new(
        settings(remote_dir.path()),
        store.clone(),
        Arc::new(MarkdownRenderer),
    );
    let pipeline = AuthoringPipeline::new(
        settings(remote_dir.path()),
        store.clone(),
        Arc::new(RacingRenderer {
            competitor,
            raced: AtomicBool::new(false),
        }),
    );

    let failure = pipeline.create(&overlay("Loser")).unwrap_err();
    assert_eq!(failure.state, PipelineState::Committed);
    assert_eq!(failure.id, Some(id(1)));
    assert!(!failure.ingested());
    assert!(matches!(
        failure.error,
        AuthoringError::Store(StoreError::IdentifierConflict { expected, actual })
            if expected == id(2) && actual == id(1)
    ));

    let pushed = read_on_branch(&remote, "0001", "rfd/0001/README.md").unwrap();
    assert_eq!(MarkdownRenderer.render(id(1), &pushed).unwrap().title, "Winner");
    let stored = store.get_rfd(id(1)).unwrap().unwrap();
    assert_eq!(stored.title, "Winner");
    assert_eq!(stored.content_md, MarkdownRenderer.render(id(1), &pushed).unwrap().content_md);
    assert_eq!(store.get_rfds().unwrap().len(), 1);
    assert_eq!(store.next_rfd_id().unwrap(), id(2));
}

#[test]
fn push_failure_after_ingestion_keeps_the_local_record() {
    let remote_dir = tempfile::tempdir().unwrap();
    let remote_path = remote_dir.path().join("origin.git");
    seed_remote(&remote_path, &[]);
    let store: Arc<dyn DocumentStore> = Arc::new(KvDocumentStore::open_in_memory().unwrap());
    let pipeline = AuthoringPipeline::new(
        settings(&remote_path),
        store.clone(),
        Arc::new(RemoteRemovingRenderer {
            remote: remote_path.clone(),
        }),
    );

    let failure = pipeline.create(&overlay("Stranded")).unwrap_err();
    assert_eq!(failure.state, PipelineState::Ingested);
    assert!(failure.ingested());
    assert_eq!(failure.id, Some(id(1)));
    assert!(matches!(failure.error, AuthoringError::Remote(_)));

    let stored = store.get_rfd(id(1)).unwrap().unwrap();
    assert_eq!(stored.title, "Stranded");
    assert_eq!(store.get_tag("api").unwrap().unwrap().rfds, vec![id(1)]);
    assert_eq!(store.next_rfd_id().unwrap(), id(2));
}

#[test]
fn create_requires_title_and_authors() {
    let remote_dir = tempfile::tempdir().unwrap();
    seed_remote(remote_dir.path(), &[]);
    let store: Arc<dyn DocumentStore> = Arc::new(KvDocumentStore::open_in_memory().unwrap());
    let pipeline = AuthoringPipeline::new(
        settings(remote_dir.path()),
        store,
        Arc::new(MarkdownRenderer),
    );

    let failure = pipeline.create(&overlay("  ")).unwrap_err();
    assert_eq!(failure.state, PipelineState::Init);
    assert_eq!(failure.id, None);
    assert!(matches!(failure.error, AuthoringError::Validation(_)));

    let mut missing_authors = overlay("Title");
    missing_authors.authors = " ".to_string();
    let failure = pipeline.create(&missing_authors).unwrap_err();
    assert_eq!(failure.state, PipelineState::Init);
}

#[test]
fn discussion_link_targets_rfd_branch_then_main() {
    let remote_dir = tempfile::tempdir().unwrap();
    let remote = seed_remote(remote_dir.path(), &[("0007", EXISTING_RFD)]);
    let store: Arc<dyn DocumentStore> = Arc::new(KvDocumentStore::open_in_memory().unwrap());
    store.import_rfd(&MarkdownRenderer.render(id(7), EXISTING_RFD).unwrap()).unwrap();
    let pipeline = AuthoringPipeline::new(
        settings(remote_dir.path()),
        store,
        Arc::new(MarkdownRenderer),
    );
    let created = pipeline.create(&overlay("Branch only")).unwrap();
    assert_eq!(created.rfd.id, id(8));

    let writer = GitDiscussionWriter::new(settings(remote_dir.path()));
    let url = "https://chat.example.com/d/8";
    let outcome = writer.write_discussion(id(8), url).unwrap();
    assert_eq!(
        outcome,
        DiscussionWriteOutcome::Pushed {
            branch: "0008".to_string()
        }
    );
    let source = read_on_branch(&remote, "0008", "rfd/0008/README.md").unwrap();
    assert_eq!(MarkdownRenderer.render(id(8), &source).unwrap().discussion, url);
    assert_eq!(
        head_message(&remote, "0008").trim(),
        "Adding discussion link to RFD 0008"
    );

    let again = writer.write_discussion(id(8), url).unwrap();
    assert!(!again.pushed());
    assert_eq!(again.branch(), "0008");

    let merged = writer
        .write_discussion(id(7), "https://chat.example.com/d/7")
        .unwrap();
    assert_eq!(merged.branch(), "main");
    let source = read_on_branch(&remote, "main", "rfd/0007/README.md").unwrap();
    let rendered = MarkdownRenderer.render(id(7), &source).unwrap();
    assert_eq!(rendered.discussion, "https://chat.example.com/d/7");
    assert_eq!(rendered.title, "Merged proposal");
}

#[test]
fn service_create_stores_provisioned_discussion_and_writes_it_back() {
    let remote_dir = tempfile::tempdir().unwrap();
    let remote = seed_remote(remote_dir.path(), &[]);
    let mut server = mockito::Server::new();
    let hook = server
        .mock("POST", "/hook")
        .match_header(
            "x-rfd-signature",
            mockito::Matcher::Regex("^sha256=[0-9a-f]{64}$".to_string()),
        )
        .match_body(mockito::Matcher::PartialJsonString(
            r#"{"event":"rfd.created","link":"https://rfd.example.com/rfd/0001"}"#.to_string(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success":true,"discussion":{"id":"d1","url":"https://chat.example.com/d/1"}}"#)
        .create();

    let client = WebhookClient::new(
        WebhookSettings {
            url: format!("{}/hook", server.url()),
            secret: Some("s3cret".to_string()),
            timeout: Duration::from_secs(5),
        },
        "https://rfd.example.com",
    )
    .unwrap();
    let store: Arc<dyn DocumentStore> = Arc::new(KvDocumentStore::open_in_memory().unwrap());
    let service = RfdService::builder(store.clone())
        .authoring(settings(remote_dir.path()))
        .webhook(client)
        .build()
        .unwrap();

    let outcome = service.create_rfd(&overlay("With discussion")).unwrap();
    hook.assert();
    assert!(outcome.created);
    assert_eq!(outcome.rfd.discussion, "https://chat.example.com/d/1");
    assert_eq!(
        store.get_rfd(id(1)).unwrap().unwrap().discussion,
        "https://chat.example.com/d/1"
    );

    let job = outcome.writeback_job.unwrap();
    let queue = service.writeback().unwrap();
    assert_eq!(
        queue.wait(job, Duration::from_secs(60)),
        Some(JobStatus::Succeeded)
    );
    let source = read_on_branch(&remote, "0001", "rfd/0001/README.md").unwrap();
    assert_eq!(
        MarkdownRenderer.render(id(1), &source).unwrap().discussion,
        "https://chat.example.com/d/1"
    );
    service.shutdown();
}
