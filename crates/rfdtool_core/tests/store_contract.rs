use rfdtool_core::repo::StoreError;
use rfdtool_core::{
    Author, DocumentStore, KvDocumentStore, Rfd, RfdId, RfdState, SqliteDocumentStore, Tag,
};

fn id(value: u32) -> RfdId {
    RfdId::new(value).unwrap()
}

fn rfd(value: u32) -> Rfd {
    let mut rfd = Rfd::new(id(value), format!("RFD {value}"), RfdState::Discussion);
    rfd.authors = vec!["ann@example.com".to_string()];
    rfd.content_md = format!("body {value}");
    rfd
}

fn for_each_backend(check: fn(&dyn DocumentStore)) {
    let kv = KvDocumentStore::open_in_memory().unwrap();
    check(&kv);
    let sqlite = SqliteDocumentStore::open_in_memory().unwrap();
    check(&sqlite);
}

#[test]
fn empty_store_starts_at_one() {
    for_each_backend(|store| {
        assert_eq!(store.next_rfd_id().unwrap(), id(1), "{}", store.backend());
        assert!(store.get_rfds().unwrap().is_empty());
        assert!(store.get_rfd(id(1)).unwrap().is_none());
        store.check().unwrap();
    });
}

#[test]
fn sequential_create_requires_next_id_and_leaves_allocator_on_conflict() {
    for_each_backend(|store| {
        let err = store.create_rfd(&rfd(2)).unwrap_err();
        match err {
            StoreError::IdentifierConflict { expected, actual } => {
                assert_eq!(expected, id(1));
                assert_eq!(actual, id(2));
            }
            other => panic!("{}: unexpected error: {other}", store.backend()),
        }
        assert_eq!(store.next_rfd_id().unwrap(), id(1));
        assert!(store.get_rfd(id(2)).unwrap().is_none());

        let created = store.create_rfd(&rfd(1)).unwrap();
        assert_eq!(created.id, id(1));
        assert_eq!(created.created_at, created.modified_at);
        assert_eq!(store.next_rfd_id().unwrap(), id(2));

        let err = store.create_rfd(&rfd(1)).unwrap_err();
        assert!(matches!(err, StoreError::IdentifierConflict { .. }));
    });
}

#[test]
fn import_raises_allocator_but_never_lowers_it() {
    for_each_backend(|store| {
        store.create_rfd(&rfd(1)).unwrap();
        store.create_rfd(&rfd(2)).unwrap();
        assert_eq!(store.next_rfd_id().unwrap(), id(3));

        store.import_rfd(&rfd(10)).unwrap();
        assert_eq!(store.next_rfd_id().unwrap(), id(11), "{}", store.backend());

        store.import_rfd(&rfd(5)).unwrap();
        assert_eq!(store.next_rfd_id().unwrap(), id(11));
    });
}

#[test]
fn import_of_stored_id_is_rejected() {
    for_each_backend(|store| {
        store.import_rfd(&rfd(4)).unwrap();
        let err = store.import_rfd(&rfd(4)).unwrap_err();
        assert!(
            matches!(err, StoreError::AlreadyExists(found) if found == id(4)),
            "{}",
            store.backend()
        );
    });
}

#[test]
fn update_overwrites_fields_and_keeps_creation_time() {
    for_each_backend(|store| {
        let created = store.create_rfd(&rfd(1)).unwrap();

        let mut changed = created.clone();
        changed.title = "Renamed".to_string();
        changed.state = RfdState::Published;
        changed.discussion = "https://chat.example.com/d/1".to_string();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let updated = store.update_rfd(&changed).unwrap();

        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.modified_at > created.modified_at);
        let loaded = store.get_rfd(id(1)).unwrap().unwrap();
        assert_eq!(loaded.title, "Renamed");
        assert_eq!(loaded.state, RfdState::Published);
        assert_eq!(loaded.discussion, "https://chat.example.com/d/1");
        assert_eq!(loaded.content_md, "body 1");
    });
}

#[test]
fn update_of_missing_id_is_not_found() {
    for_each_backend(|store| {
        let err = store.update_rfd(&rfd(9)).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(found) if found == id(9)));
    });
}

#[test]
fn author_lookup_matches_exactly() {
    for_each_backend(|store| {
        let mut first = rfd(1);
        first.authors = vec!["ann@example.com".to_string()];
        let mut second = rfd(2);
        second.authors = vec!["joann@example.com".to_string(), "bob@example.com".to_string()];
        store.create_rfd(&first).unwrap();
        store.create_rfd(&second).unwrap();

        let ids: Vec<RfdId> = store
            .get_rfds_by_author("ann@example.com")
            .unwrap()
            .into_iter()
            .map(|rfd| rfd.id)
            .collect();
        assert_eq!(ids, vec![id(1)], "{}", store.backend());
        assert_eq!(store.get_rfds_by_author("bob@example.com").unwrap().len(), 1);
        assert!(store.get_rfds_by_author("example.com").unwrap().is_empty());
    });
}

#[test]
fn get_rfds_lists_ascending_ids() {
    for_each_backend(|store| {
        for value in [12, 3, 7] {
            store.import_rfd(&rfd(value)).unwrap();
        }
        let ids: Vec<u32> = store
            .get_rfds()
            .unwrap()
            .into_iter()
            .map(|rfd| rfd.id.value())
            .collect();
        assert_eq!(ids, vec![3, 7, 12]);
    });
}

#[test]
fn tags_are_created_once_and_updated_in_place() {
    for_each_backend(|store| {
        let mut tag = Tag::new("storage");
        tag.rfds = vec![id(3), id(1), id(3)];
        let created = store.create_tag(&tag).unwrap();
        assert_eq!(created.rfds, vec![id(1), id(3)], "{}", store.backend());

        let err = store.create_tag(&Tag::new("storage")).unwrap_err();
        assert!(matches!(err, StoreError::TagExists(name) if name == "storage"));

        let mut loaded = store.get_tag("storage").unwrap().unwrap();
        loaded.remove_rfd(id(1));
        loaded.insert_rfd(id(2));
        store.update_tag(&loaded).unwrap();
        assert_eq!(
            store.get_tag("storage").unwrap().unwrap().rfds,
            vec![id(2), id(3)]
        );

        let err = store.update_tag(&Tag::new("missing")).unwrap_err();
        assert!(matches!(err, StoreError::TagNotFound(name) if name == "missing"));
        assert!(store.get_tag("missing").unwrap().is_none());
    });
}

#[test]
fn tags_list_sorted_by_name() {
    for_each_backend(|store| {
        for name in ["zeta", "alpha", "mid"] {
            store.create_tag(&Tag::new(name)).unwrap();
        }
        let names: Vec<String> = store
            .get_tags()
            .unwrap()
            .into_iter()
            .map(|tag| tag.name)
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    });
}

#[test]
fn author_upsert_keeps_known_name_and_creation_time() {
    for_each_backend(|store| {
        let first = store
            .upsert_author(&Author::new("ann@example.com", "Ann Lee"))
            .unwrap();
        let merged = store
            .upsert_author(&Author::new("ann@example.com", ""))
            .unwrap();
        assert_eq!(merged.name, "Ann Lee", "{}", store.backend());
        assert_eq!(merged.created_at, first.created_at);

        let renamed = store
            .upsert_author(&Author::new("ann@example.com", "Ann Lee-Park"))
            .unwrap();
        assert_eq!(renamed.name, "Ann Lee-Park");
        assert_eq!(store.get_authors().unwrap().len(), 1);
        assert!(store.get_author("bob@example.com").unwrap().is_none());
    });
}

#[test]
fn folder_import_with_gap_then_sequential_create() {
    for_each_backend(|store| {
        store.import_rfd(&rfd(1)).unwrap();
        store.import_rfd(&rfd(3)).unwrap();

        assert_eq!(store.ensure_allocator_consistency().unwrap(), id(4));
        assert_eq!(store.next_rfd_id().unwrap(), id(4));

        for rejected in [2, 3, 5] {
            let err = store.create_rfd(&rfd(rejected)).unwrap_err();
            assert!(
                matches!(err, StoreError::IdentifierConflict { expected, .. } if expected == id(4)),
                "{}: id {rejected}",
                store.backend()
            );
        }
        store.create_rfd(&rfd(4)).unwrap();
        assert_eq!(store.next_rfd_id().unwrap(), id(5));
    });
}

#[test]
fn invalid_documents_are_rejected_before_persistence() {
    for_each_backend(|store| {
        let mut untitled = rfd(1);
        untitled.title = "  ".to_string();
        assert!(matches!(
            store.create_rfd(&untitled).unwrap_err(),
            StoreError::Validation(_)
        ));
        assert_eq!(store.next_rfd_id().unwrap(), id(1));
        assert!(store.get_rfds().unwrap().is_empty());
    });
}

#[test]
fn file_backed_stores_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();

    let kv_path = dir.path().join("rfd.sled");
    {
        let store = KvDocumentStore::open(&kv_path).unwrap();
        store.create_rfd(&rfd(1)).unwrap();
        store.create_tag(&Tag::new("api")).unwrap();
    }
    let store = KvDocumentStore::open(&kv_path).unwrap();
    assert_eq!(store.get_rfd(id(1)).unwrap().unwrap().title, "RFD 1");
    assert_eq!(store.next_rfd_id().unwrap(), id(2));
    assert!(store.get_tag("api").unwrap().is_some());
    drop(store);

    let db_path = dir.path().join("rfd.db");
    {
        let store = SqliteDocumentStore::open(&db_path).unwrap();
        store.create_rfd(&rfd(1)).unwrap();
    }
    let store = SqliteDocumentStore::open(&db_path).unwrap();
    assert_eq!(store.get_rfd(id(1)).unwrap().unwrap().title, "RFD 1");
    assert_eq!(store.next_rfd_id().unwrap(), id(2));
}

#[test]
fn sqlite_allocator_drift_is_repaired_upward_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rfd.db");
    {
        let store = SqliteDocumentStore::open(&path).unwrap();
        store.import_rfd(&rfd(6)).unwrap();
        store.import_rfd(&rfd(8)).unwrap();
        assert_eq!(store.next_rfd_id().unwrap(), id(9));
    }

    // Simulate a crash between document write and allocator advance.
    set_next(&path, 2);
    let store = SqliteDocumentStore::open(&path).unwrap();
    assert_eq!(store.next_rfd_id().unwrap(), id(2));
    assert_eq!(store.ensure_allocator_consistency().unwrap(), id(9));
    assert_eq!(store.next_rfd_id().unwrap(), id(9));
    drop(store);

    set_next(&path, 20);
    let store = SqliteDocumentStore::open(&path).unwrap();
    assert_eq!(store.ensure_allocator_consistency().unwrap(), id(20));
}

fn set_next(path: &std::path::Path, value: u32) {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute(
        "UPDATE meta SET value = ?1 WHERE key = 'nextRFD';",
        [value.to_string()],
    )
    .unwrap();
}
