use docwatch::classifier::PathClassifier;
use docwatch::error::{DocError, DocResult};
use docwatch::store::{DocumentStore, MemoryDocumentStore, RetryPolicy, SqliteDocumentStore};
use docwatch::{Reconciled, ReconciliationHandler};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    // dropped last so the files outlive the store
    _tmpdir: TempDir,
    root: PathBuf,
    store: Arc<dyn DocumentStore>,
    handler: ReconciliationHandler,
}

async fn sqlite_fixture() -> DocResult<Fixture> {
    let tmpdir = TempDir::new()?;
    let root = tmpdir.path().join("docs");
    fs::create_dir_all(&root)?;
    let store: Arc<dyn DocumentStore> = Arc::new(
        SqliteDocumentStore::open(&tmpdir.path().join("documents.db"), RetryPolicy::default())
            .await?,
    );
    let handler = ReconciliationHandler::new(Arc::clone(&store), PathClassifier::new(&root));
    Ok(Fixture {
        _tmpdir: tmpdir,
        root,
        store,
        handler,
    })
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        base_delay_ms: 1,
        max_delay_ms: 4,
        ..Default::default()
    }
}

#[tokio::test]
async fn add_creates_one_active_record() -> DocResult<()> {
    let fx = sqlite_fixture().await?;
    let path = fx.root.join("notes.txt");
    fs::write(&path, "hello")?;

    let outcome = fx.handler.on_add(&path).await?;
    assert!(matches!(outcome, Reconciled::Created(_)));

    let records = fx.store.list_all().await?;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert!(record.file_path.ends_with("notes.txt"));
    assert_eq!(record.title, "notes");
    assert_eq!(record.content, "hello");
    assert_eq!(record.metadata.size, 5);
    assert!(record.metadata.last_modified.is_some());
    assert!(!record.metadata.deleted);

    Ok(())
}

#[tokio::test]
async fn unlink_soft_deletes_and_keeps_id() -> DocResult<()> {
    let fx = sqlite_fixture().await?;
    let path = fx.root.join("notes.txt");
    fs::write(&path, "hello")?;
    let created = fx.handler.on_add(&path).await?;

    fs::remove_file(&path)?;
    let outcome = fx.handler.on_unlink(&path).await?;
    assert_eq!(outcome, Reconciled::SoftDeleted(created.id().unwrap().clone()));

    let record = fx.store.get_by_path(&path).await?.expect("row is kept");
    assert_eq!(&record.id, created.id().unwrap());
    assert!(record.metadata.deleted);
    assert!(record.metadata.deleted_at.is_some());

    Ok(())
}

#[tokio::test]
async fn re_adding_a_deleted_file_revives_the_same_record() -> DocResult<()> {
    let fx = sqlite_fixture().await?;
    let path = fx.root.join("notes.txt");

    fs::write(&path, "hello")?;
    let id = fx.handler.on_add(&path).await?.id().cloned().unwrap();

    fs::remove_file(&path)?;
    fx.handler.on_unlink(&path).await?;

    fs::write(&path, "hello again")?;
    let outcome = fx.handler.on_add(&path).await?;
    assert_eq!(outcome, Reconciled::Revived(id.clone()));

    let records = fx.store.list_all().await?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, id);
    assert_eq!(records[0].content, "hello again");
    assert!(!records[0].metadata.deleted);
    assert!(records[0].metadata.deleted_at.is_none());

    Ok(())
}

#[tokio::test]
async fn replaying_add_leaves_record_identical() -> DocResult<()> {
    let fx = sqlite_fixture().await?;
    let path = fx.root.join("notes.txt");
    fs::write(&path, "hello")?;

    fx.handler.on_add(&path).await?;
    let once = fx.store.get_by_path(&path).await?.unwrap();

    let replay = fx.handler.on_add(&path).await?;
    assert_eq!(replay, Reconciled::Unchanged(once.id.clone()));
    let twice = fx.store.get_by_path(&path).await?.unwrap();
    assert_eq!(once, twice);

    Ok(())
}

#[tokio::test]
async fn replaying_unlink_is_harmless() -> DocResult<()> {
    let fx = sqlite_fixture().await?;
    let path = fx.root.join("notes.txt");
    fs::write(&path, "hello")?;
    fx.handler.on_add(&path).await?;
    fs::remove_file(&path)?;

    fx.handler.on_unlink(&path).await?;
    let once = fx.store.get_by_path(&path).await?.unwrap();
    fx.handler.on_unlink(&path).await?;
    let twice = fx.store.get_by_path(&path).await?.unwrap();

    assert_eq!(once, twice);
    Ok(())
}

#[tokio::test]
async fn change_updates_content_in_place() -> DocResult<()> {
    let fx = sqlite_fixture().await?;
    let path = fx.root.join("notes.txt");
    fs::write(&path, "hello")?;
    let id = fx.handler.on_add(&path).await?.id().cloned().unwrap();

    fs::write(&path, "hello, edited")?;
    assert_eq!(fx.handler.on_change(&path).await?, Reconciled::Updated(id.clone()));

    let record = fx.store.get_by_id(&id).await?.unwrap();
    assert_eq!(record.content, "hello, edited");
    assert_eq!(record.metadata.size, 13);

    Ok(())
}

#[tokio::test]
async fn change_without_record_heals_into_create() -> DocResult<()> {
    let fx = sqlite_fixture().await?;
    let path = fx.root.join("missed.txt");
    fs::write(&path, "never saw the add")?;

    let outcome = fx.handler.on_change(&path).await?;
    assert!(matches!(outcome, Reconciled::Created(_)));

    let record = fx.store.get_by_path(&path).await?.expect("healed record");
    assert_eq!(record.content, "never saw the add");
    assert!(!record.metadata.deleted);

    Ok(())
}

#[tokio::test]
async fn orphan_change_is_dropped_when_healing_is_off() -> DocResult<()> {
    let fx = sqlite_fixture().await?;
    let handler = fx.handler.clone().heal_orphan_changes(false);
    let path = fx.root.join("missed.txt");
    fs::write(&path, "never saw the add")?;

    assert_eq!(handler.on_change(&path).await?, Reconciled::Orphaned);
    assert!(fx.store.list_all().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn unlink_without_record_is_a_no_op() -> DocResult<()> {
    let fx = sqlite_fixture().await?;
    let path = fx.root.join("never-indexed.txt");

    assert_eq!(fx.handler.on_unlink(&path).await?, Reconciled::Absent);
    assert!(fx.store.list_all().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn ignored_paths_produce_no_mutation() -> DocResult<()> {
    let fx = sqlite_fixture().await?;
    fs::create_dir_all(fx.root.join(".git"))?;
    fs::create_dir_all(fx.root.join("node_modules/pkg"))?;

    let paths = [
        fx.root.join(".git/config"),
        fx.root.join("node_modules/pkg/readme.md"),
        fx.root.join(".notes.txt.swp"),
        fx.root.join("notes.txt~"),
        fx.root.join("desktop.ini"),
        fx.root.join("aux.txt"),
    ];
    for path in &paths {
        fs::write(path, "ignored")?;
        assert_eq!(fx.handler.on_add(path).await?, Reconciled::Ignored);
        assert_eq!(fx.handler.on_change(path).await?, Reconciled::Ignored);
        assert_eq!(fx.handler.on_unlink(path).await?, Reconciled::Ignored);
    }

    assert!(fx.store.list_all().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn unreadable_file_is_abandoned_without_mutation() -> DocResult<()> {
    let fx = sqlite_fixture().await?;
    let path = fx.root.join("notes.txt");
    fs::write(&path, "hello")?;
    fx.handler.on_add(&path).await?;
    let before = fx.store.get_by_path(&path).await?.unwrap();

    // vanished between the event and the read
    fs::remove_file(&path)?;
    assert_eq!(fx.handler.on_change(&path).await?, Reconciled::Abandoned);
    assert_eq!(fx.handler.on_add(&path).await?, Reconciled::Abandoned);

    // not valid UTF-8
    let binary = fx.root.join("image.bin");
    fs::write(&binary, [0xff, 0xfe, 0x00, 0x80])?;
    assert_eq!(fx.handler.on_add(&binary).await?, Reconciled::Abandoned);

    assert_eq!(fx.store.get_by_path(&path).await?.unwrap(), before);
    assert!(fx.store.get_by_path(&binary).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn relative_and_dotted_paths_resolve_to_one_record() -> DocResult<()> {
    let fx = sqlite_fixture().await?;
    let path = fx.root.join("notes.txt");
    fs::write(&path, "hello")?;

    let dotted = fx.root.join("sub/../notes.txt");
    fx.handler.on_add(&dotted).await?;
    let outcome = fx.handler.on_add(&path).await?;

    assert!(matches!(outcome, Reconciled::Unchanged(_)));
    assert_eq!(fx.store.list_all().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn transient_store_failures_are_invisible_to_the_caller() -> DocResult<()> {
    let tmpdir = TempDir::new()?;
    let store = Arc::new(MemoryDocumentStore::with_retry_policy(fast_retry()));
    let handler = ReconciliationHandler::new(store.clone(), PathClassifier::new(tmpdir.path()));
    let path = tmpdir.path().join("notes.txt");
    fs::write(&path, "hello")?;

    store.fail_next_writes(2);
    let outcome = handler.on_add(&path).await?;

    assert!(matches!(outcome, Reconciled::Created(_)));
    assert_eq!(store.write_attempts(), 3);
    assert_eq!(store.get_by_path(&path).await?.unwrap().content, "hello");
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_surface_storage_unavailable() -> DocResult<()> {
    let tmpdir = TempDir::new()?;
    let store = Arc::new(MemoryDocumentStore::with_retry_policy(fast_retry()));
    let handler = ReconciliationHandler::new(store.clone(), PathClassifier::new(tmpdir.path()));
    let path = tmpdir.path().join("notes.txt");
    fs::write(&path, "hello")?;

    store.fail_next_writes(10);
    let err = handler.on_add(&path).await.unwrap_err();

    assert!(
        matches!(err, DocError::StorageUnavailable { attempts: 3, .. }),
        "got {err:?}"
    );
    assert!(store.is_empty());
    Ok(())
}

#[tokio::test]
async fn unlinking_a_directory_soft_deletes_everything_below_it() -> DocResult<()> {
    let fx = sqlite_fixture().await?;
    let sub = fx.root.join("sub");
    fs::create_dir_all(sub.join("deep"))?;
    let a = sub.join("a.md");
    let b = sub.join("deep/b.md");
    let sibling = fx.root.join("subway.md");
    for path in [&a, &b, &sibling] {
        fs::write(path, "body")?;
        fx.handler.on_add(path).await?;
    }

    fs::remove_dir_all(&sub)?;
    let outcome = fx.handler.on_unlink(&sub).await?;
    match &outcome {
        Reconciled::SoftDeletedTree(ids) => assert_eq!(ids.len(), 2),
        other => panic!("expected SoftDeletedTree, got {other:?}"),
    }
    assert!(outcome.wrote());

    for path in [&a, &b] {
        let record = fx.store.get_by_path(path).await?.unwrap();
        assert!(record.metadata.deleted, "{}", path.display());
        assert_eq!(record.content, "body");
    }
    assert!(!fx.store.get_by_path(&sibling).await?.unwrap().metadata.deleted);

    // replaying finds nothing left to flag
    assert_eq!(fx.handler.on_unlink(&sub).await?, Reconciled::Absent);
    Ok(())
}
