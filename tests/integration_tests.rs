//! Integration Tests
//!
//! End-to-end editing sessions against the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use atelier::remote::{ContentBackend, Failure, MockBackend};
use atelier::state::{lock, Change, ChangeKind, FileStore, KeyValueStore, MemoryStore, RestoreOutcome, SaveStatus};
use atelier::sync::{DrainOutcome, SharedDocument};
use atelier::{EditorConfig, EditorError, EditorSession};

const BRANCH: &str = "site-edits";
const PAGE: &str = "index.html";

struct Harness {
    backend: Arc<MockBackend>,
    document: SharedDocument,
    session: EditorSession,
}

fn build(storage: Arc<dyn KeyValueStore>, backend: Arc<MockBackend>) -> Harness {
    let document = SharedDocument::new();
    document.set(PAGE, "<html><body><p>Hello</p></body></html>");
    let session = EditorSession::new(
        EditorConfig::default(),
        Arc::clone(&backend) as Arc<dyn ContentBackend>,
        storage,
        Arc::new(document.clone()),
    );
    Harness {
        backend,
        document,
        session,
    }
}

async fn harness() -> Harness {
    let backend = Arc::new(MockBackend::new());
    backend.seed(BRANCH, PAGE, "<html><body><p>Hello</p></body></html>");
    let h = build(Arc::new(MemoryStore::new()), backend);
    h.session.open_page(PAGE).await.unwrap();
    h
}

/// Edit the paragraph the way a text widget would.
fn edit_text(h: &Harness, from: &str, to: &str) -> Change {
    h.document.replace(PAGE, from, to);
    let change = Change::text("p-0", from, to, PAGE);
    h.session.record_edit(change.clone()).unwrap();
    change
}

// === Autosave ===

#[tokio::test(start_paused = true)]
async fn test_hello_world_autosave() {
    let h = harness().await;
    let handle = h.session.spawn_autosave();

    let change = edit_text(&h, "Hello", "Hello World");
    assert_eq!(change.kind, ChangeKind::Text);
    assert_eq!(change.orig, "Hello");
    assert_eq!(change.new.as_str(), "Hello World");
    assert_eq!(change.page, PAGE);

    tokio::time::sleep(Duration::from_secs(31)).await;

    let writes = h.backend.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].path, PAGE);
    assert_eq!(writes[0].message, "Autosave: 1 change to index.html");
    assert_eq!(
        writes[0].content,
        "<html><body><p>Hello World</p></body></html>"
    );

    {
        let state = lock(h.session.store());
        assert!(state.pending_changes().is_empty());
        assert_eq!(state.applied_changes(), &[change]);
        assert!(!state.has_unsaved_changes());
    }

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_tick_without_changes_does_not_write() {
    let h = harness().await;
    let handle = h.session.spawn_autosave();

    tokio::time::sleep(Duration::from_secs(95)).await;
    assert!(h.backend.writes().is_empty());

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_autosave_retries_on_next_tick() {
    let h = harness().await;
    let handle = h.session.spawn_autosave();
    edit_text(&h, "Hello", "Hello World");
    h.backend.fail_next_write(Failure::Network);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(h.backend.writes().is_empty());
    assert_eq!(lock(h.session.store()).save_status(), SaveStatus::Error);
    assert_eq!(lock(h.session.store()).pending_changes().len(), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.backend.writes().len(), 1);
    assert!(lock(h.session.store()).pending_changes().is_empty());

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_unsyncable_queue_item_does_not_stop_autosave() {
    let h = harness().await;
    // Queued from an earlier session; no document for it exists here.
    lock(h.session.store())
        .enqueue_offline(Change::text("x", "a", "b", "about.html"))
        .unwrap();
    let handle = h.session.spawn_autosave();

    edit_text(&h, "Hello", "Hello World");
    tokio::time::sleep(Duration::from_secs(30 * 60)).await;

    let writes = h.backend.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].path, PAGE);
    assert_eq!(writes[0].message, "Autosave: 1 change to index.html");
    {
        let state = lock(h.session.store());
        assert!(state.pending_changes().is_empty());
        assert_eq!(state.offline_queue().len(), 1);
        assert!(state.last_warning().is_some());
    }
    assert!(h.session.scheduler().drain_failures() >= 1);

    handle.stop().await;
}

// === Optimistic concurrency ===

#[tokio::test]
async fn test_sequential_saves_chain_version_tokens() {
    let h = harness().await;
    let fetched = h.client_token();

    edit_text(&h, "Hello", "Hello World");
    h.session.save_now().await.unwrap();
    let after_first = h.backend.sha(BRANCH, PAGE);

    edit_text(&h, "Hello World", "Hello Again");
    h.session.save_now().await.unwrap();

    let writes = h.backend.writes();
    assert_eq!(writes[0].sha, fetched);
    assert_eq!(writes[1].sha, after_first);
    assert_ne!(writes[1].sha, fetched);
    assert_eq!(writes[1].message, "1 change to index.html");
}

#[tokio::test]
async fn test_conflicting_manual_save_is_surfaced() {
    let h = harness().await;
    h.backend
        .remote_edit(BRANCH, PAGE, "<html><body><p>Other</p></body></html>");

    let change = edit_text(&h, "Hello", "Hello World");
    let err = h.session.save_now().await.unwrap_err();

    assert!(matches!(err, EditorError::Conflict { .. }));
    assert!(err.recovery_suggestion().is_some());
    let state = lock(h.session.store());
    assert_eq!(state.pending_changes(), &[change]);
    assert_eq!(state.save_status(), SaveStatus::Error);
}

// === Offline ===

#[tokio::test]
async fn test_offline_edits_drain_as_one_save() {
    let h = harness().await;
    h.session.set_online(false).await;

    edit_text(&h, "Hello", "Hello 1");
    edit_text(&h, "Hello 1", "Hello 2");
    edit_text(&h, "Hello 2", "Hello 3");
    assert!(h.backend.writes().is_empty());
    {
        let state = lock(h.session.store());
        assert_eq!(state.offline_queue().len(), 1);
        assert_eq!(state.offline_queue()[0].changes.len(), 3);
    }

    let outcome = h.session.set_online(true).await;
    assert!(matches!(outcome, Some(DrainOutcome::Drained { items: 1 })));

    let writes = h.backend.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].message, "Offline sync: 3 changes to index.html");
    assert_eq!(
        writes[0].content,
        "<html><body><p>Hello 3</p></body></html>"
    );

    let state = lock(h.session.store());
    assert!(state.offline_queue().is_empty());
    assert!(state.pending_changes().is_empty());
}

#[tokio::test]
async fn test_failed_drain_keeps_queue_intact() {
    let h = harness().await;
    h.session.set_online(false).await;
    edit_text(&h, "Hello", "Hello 1");
    edit_text(&h, "Hello 1", "Hello 2");
    edit_text(&h, "Hello 2", "Hello 3");
    let queued = lock(h.session.store()).offline_queue().to_vec();

    h.backend.fail_next_write(Failure::Server(503));
    let outcome = h.session.set_online(true).await;
    assert!(matches!(
        outcome,
        Some(DrainOutcome::Stopped { synced: 0, remaining: 1, .. })
    ));

    let state = lock(h.session.store());
    assert_eq!(state.offline_queue(), queued.as_slice());
    assert_eq!(state.pending_changes().len(), 3);
    assert!(state.last_warning().is_some());
    drop(state);

    let backup = h.session.backup().read().unwrap().unwrap();
    assert_eq!(backup.offline_queue, queued);
}

#[tokio::test(start_paused = true)]
async fn test_connectivity_signal_drives_running_scheduler() {
    let h = harness().await;
    let handle = h.session.spawn_autosave();

    handle.set_online(false);
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(lock(h.session.store()).is_offline());

    edit_text(&h, "Hello", "Hello 1");
    edit_text(&h, "Hello 1", "Hello 2");

    // Ticks while offline never write.
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(h.backend.writes().is_empty());

    handle.set_online(true);
    tokio::time::sleep(Duration::from_millis(1)).await;
    let writes = h.backend.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].message, "Offline sync: 2 changes to index.html");

    handle.stop().await;
}

// === Undo / redo ===

#[tokio::test]
async fn test_undo_redo_round_trip_after_save() {
    let h = harness().await;
    edit_text(&h, "Hello", "Hello World");
    h.session.save_now().await.unwrap();
    edit_text(&h, "Hello World", "Hello Again");

    let before = lock(h.session.store()).pending_changes().to_vec();
    h.session.undo().unwrap();
    h.session.redo().unwrap();
    assert_eq!(lock(h.session.store()).pending_changes(), before.as_slice());

    // Undoing a saved edit queues its inverse so the revert is persisted.
    h.session.undo().unwrap();
    h.session.undo().unwrap();
    let pending = lock(h.session.store()).pending_changes().to_vec();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].new.as_str(), "Hello");

    h.session.redo().unwrap();
    assert!(lock(h.session.store()).pending_changes().is_empty());
}

// === Local backup ===

#[tokio::test]
async fn test_backup_survives_reload() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MockBackend::new());
    backend.seed(BRANCH, PAGE, "<html><body><p>Hello</p></body></html>");

    let storage: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(dir.path()));
    let first = build(Arc::clone(&storage), Arc::clone(&backend));
    first.session.open_page(PAGE).await.unwrap();
    let c1 = edit_text(&first, "Hello", "Hello World");
    let c2 = edit_text(&first, "Hello World", "Hello Again");
    drop(first);

    let reloaded = build(Arc::new(FileStore::new(dir.path())), backend);
    let accept = |_: &str| true;
    let outcome = reloaded.session.recover_backup(&accept).unwrap();
    assert_eq!(outcome, RestoreOutcome::Restored { pending: 2, queued: 0 });

    let state = lock(reloaded.session.store());
    assert_eq!(state.pending_changes(), &[c1, c2]);
    assert_eq!(state.current_page(), Some(PAGE));
}

#[tokio::test]
async fn test_backup_restore_requires_confirmation() {
    let storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let backend = Arc::new(MockBackend::new());
    backend.seed(BRANCH, PAGE, "<p>Hello</p>");

    let first = build(Arc::clone(&storage), Arc::clone(&backend));
    first.session.open_page(PAGE).await.unwrap();
    edit_text(&first, "Hello", "Hello World");

    let reloaded = build(storage, backend);
    let decline = |_: &str| false;
    let outcome = reloaded.session.recover_backup(&decline).unwrap();
    assert_eq!(outcome, RestoreOutcome::Declined);
    assert!(lock(reloaded.session.store()).pending_changes().is_empty());
}

// === Version history ===

#[tokio::test]
async fn test_restore_version_adds_commit() {
    let h = harness().await;
    edit_text(&h, "Hello", "Hello World");
    h.session.save_now().await.unwrap();

    let versions = h.session.versions().load(PAGE).await.unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].message, "1 change to index.html");

    let original = versions[1].id.clone();
    let selected = h.session.versions().select(&original).unwrap();
    assert_eq!(selected.id, original);

    let receipt = h
        .session
        .restore_version(&original, &|_: &str| true)
        .await
        .unwrap();
    assert!(receipt.is_some());
    assert_eq!(
        h.backend.file(BRANCH, PAGE).as_deref(),
        Some("<html><body><p>Hello</p></body></html>")
    );

    let after = h.session.versions().load(PAGE).await.unwrap();
    assert_eq!(after.len(), 3);
    assert!(after[0].message.starts_with("Restore version from "));

    // The next save keeps the rollback.
    edit_text(&h, "Hello", "Hello Again");
    h.session.save_now().await.unwrap();
    assert_eq!(
        h.backend.file(BRANCH, PAGE).as_deref(),
        Some("<html><body><p>Hello Again</p></body></html>")
    );
}

impl Harness {
    fn client_token(&self) -> Option<String> {
        self.session.client().version_token(PAGE)
    }
}
