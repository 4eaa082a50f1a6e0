//! Merge-rule interleavings over the operation queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use note_sync::clock::{Clock, ManualClock};
use note_sync::storage::memory::MemoryStore;
use note_sync::{Operation, OperationKind, OperationPayload, OperationQueue, SyncConfig};

fn queue_fixture() -> (OperationQueue, Arc<ManualClock>) {
    let clock = ManualClock::new(Utc::now());
    let queue = OperationQueue::new(
        Arc::new(MemoryStore::new()),
        clock.clone(),
        Arc::new(SyncConfig::default()),
    );
    (queue, clock)
}

fn op(kind: OperationKind, target: &str, at: chrono::DateTime<chrono::Utc>) -> Operation {
    let payload = match kind {
        OperationKind::NoteCreate | OperationKind::CloudUpload => OperationPayload::Note {
            title: "t".into(),
            content: "c".into(),
            folder_id: "f".into(),
        },
        OperationKind::CloudDelete | OperationKind::FolderDelete => {
            OperationPayload::Delete { tag: None }
        }
        OperationKind::FolderCreate | OperationKind::FolderRename => OperationPayload::Folder {
            name: "n".into(),
            tag: None,
        },
        OperationKind::ImageUpload => OperationPayload::Image {
            attachment_id: "a".into(),
        },
    };
    Operation::new(kind, target, payload, at)
}

#[test]
fn upload_delete_upload_interleaving_keeps_only_the_delete() {
    let (queue, clock) = queue_fixture();
    queue
        .enqueue(op(OperationKind::CloudUpload, "n1", clock.now()))
        .unwrap();
    queue
        .enqueue(op(OperationKind::CloudDelete, "n1", clock.now()))
        .unwrap();
    // The note is being deleted; later edits must not resurrect an upload.
    assert!(queue
        .enqueue(op(OperationKind::CloudUpload, "n1", clock.now()))
        .unwrap()
        .is_none());

    let pending = queue.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind, OperationKind::CloudDelete);
}

#[test]
fn create_after_delete_is_a_fresh_note() {
    let (queue, clock) = queue_fixture();
    queue
        .enqueue(op(OperationKind::CloudDelete, "n1", clock.now()))
        .unwrap();
    // Reusing an id after a queued delete is a new create; both survive.
    assert!(queue
        .enqueue(op(OperationKind::NoteCreate, "n1", clock.now()))
        .unwrap()
        .is_some());

    let kinds: Vec<OperationKind> = queue.pending().into_iter().map(|o| o.kind).collect();
    assert_eq!(
        kinds,
        vec![OperationKind::NoteCreate, OperationKind::CloudDelete]
    );
}

#[test]
fn folder_rename_replaces_queued_rename_only() {
    let (queue, clock) = queue_fixture();
    queue
        .enqueue(op(OperationKind::FolderCreate, "f1", clock.now()))
        .unwrap();
    let first = queue
        .enqueue(op(OperationKind::FolderRename, "f1", clock.now()))
        .unwrap()
        .unwrap();
    let second = queue
        .enqueue(op(OperationKind::FolderRename, "f1", clock.now()))
        .unwrap()
        .unwrap();

    let pending = queue.pending();
    assert_eq!(pending.len(), 2, "create survives, one rename");
    assert!(pending.iter().all(|o| o.id != first.id));
    assert!(pending.iter().any(|o| o.id == second.id));
}

#[test]
fn folder_delete_sweeps_create_and_rename() {
    let (queue, clock) = queue_fixture();
    queue
        .enqueue(op(OperationKind::FolderCreate, "f1", clock.now()))
        .unwrap();
    queue
        .enqueue(op(OperationKind::FolderRename, "f1", clock.now()))
        .unwrap();
    queue
        .enqueue(op(OperationKind::FolderDelete, "f1", clock.now()))
        .unwrap();

    let pending = queue.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind, OperationKind::FolderDelete);
}

#[test]
fn merges_are_scoped_per_target() {
    let (queue, clock) = queue_fixture();
    queue
        .enqueue(op(OperationKind::CloudUpload, "n1", clock.now()))
        .unwrap();
    queue
        .enqueue(op(OperationKind::CloudUpload, "n2", clock.now()))
        .unwrap();
    queue
        .enqueue(op(OperationKind::CloudUpload, "n1", clock.now()))
        .unwrap();

    let stats = queue.statistics();
    assert_eq!(stats.total, 2, "one upload per note");
}

#[test]
fn terminal_rows_do_not_participate_in_merging() {
    let (queue, clock) = queue_fixture();
    let parked = queue
        .enqueue(op(OperationKind::CloudUpload, "n1", clock.now()))
        .unwrap()
        .unwrap();
    queue
        .mark_failed(&parked.id, "http 401", note_sync::ErrorKind::AuthExpired)
        .unwrap();

    // A fresh upload coexists with the parked row instead of merging it.
    clock.advance(Duration::from_secs(1));
    assert!(queue
        .enqueue(op(OperationKind::CloudUpload, "n1", clock.now()))
        .unwrap()
        .is_some());
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.pending().len(), 1);
}

#[test]
fn mixed_kind_drain_order_is_stable() {
    let (queue, clock) = queue_fixture();
    let mut expected = Vec::new();

    let image = queue
        .enqueue(op(OperationKind::ImageUpload, "n9", clock.now()))
        .unwrap()
        .unwrap();
    clock.advance(Duration::from_secs(1));
    let upload = queue
        .enqueue(op(OperationKind::CloudUpload, "n1", clock.now()))
        .unwrap()
        .unwrap();
    clock.advance(Duration::from_secs(1));
    let delete = queue
        .enqueue(op(OperationKind::CloudDelete, "n2", clock.now()))
        .unwrap()
        .unwrap();
    clock.advance(Duration::from_secs(1));
    let create = queue
        .enqueue(op(OperationKind::NoteCreate, "n3", clock.now()))
        .unwrap()
        .unwrap();

    // (priority desc, created asc): create 4, delete 3, upload 2, image 1.
    expected.extend([create.id, delete.id, upload.id, image.id]);
    let order: Vec<String> = queue.pending().into_iter().map(|o| o.id).collect();
    assert_eq!(order, expected);
}
