//! Portable archive documents for Lantern stores.
//!
//! A document packages a filtered snapshot of an entity store, plus the
//! payloads its tasks reference, into one versioned file. Documents are
//! written through a temp file and renamed into place, and opened through a
//! memory map so that reading the info or a single blob never decodes the
//! whole file.
//!
//! # Architecture
//!
//! - [`format`]: header, sections, index, footer
//! - [`export`]: streams a store snapshot into a document
//! - [`open`] / [`DocumentHandle`]: lazy, checked access to a document

pub mod error;
pub mod format;
pub mod reader;
pub mod writer;

pub use error::{ArchiveError, ArchiveResult};
pub use format::{DatabaseRecord, DocumentInfo, CURRENT_SCHEMA, SCHEMA_V1, SCHEMA_V2};
pub use reader::{open, DocumentHandle, RecordIter, VerifyReport};
pub use writer::{export, ExportOptions, ExportReport};

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    use chrono::Utc;
    use lantern_blob::BlobStore;
    use lantern_criteria::Criteria;
    use lantern_store::{
        EntityStore, OpenOptions, StoreError, StoreReader, StoreSettings, StoreWriter, TaskOutcome,
        TaskUpdate,
    };
    use lantern_types::{
        CancelFlag, EntityId, FetchType, LogLevel, Message, Metadata, NetworkTask, Transaction,
    };

    struct Fixture {
        store: EntityStore,
        body: Vec<u8>,
    }

    /// One session with an info message, an error message, and a completed
    /// task with a response body and one transaction.
    fn fixture() -> Fixture {
        let store = EntityStore::in_memory();
        let session = store.create_session(Metadata::new()).unwrap();
        store
            .insert_message(Message::new(session.id, Utc::now(), "app", LogLevel::Info, "hello"))
            .unwrap();
        let failed = store
            .insert_message(Message::new(session.id, Utc::now(), "auth", LogLevel::Error, "denied"))
            .unwrap();
        store.set_pinned(&EntityId::Message(failed.id), true).unwrap();

        let task = store
            .insert_task(NetworkTask::new(session.id, Utc::now(), "GET", "https://api.example.com/users"))
            .unwrap();
        store
            .append_transaction(&task.id, Transaction::new(task.id, FetchType::NetworkLoad, Utc::now()))
            .unwrap();
        let body = br#"{"users":[1,2,3]}"#.repeat(200);
        let key = store.blobs().put(&body).unwrap();
        store
            .update_task(
                &task.id,
                TaskUpdate {
                    status_code: Some(200),
                    response_body_key: Some(key),
                    response_body_size: Some(body.len() as u64),
                    ..TaskUpdate::complete(TaskOutcome::Success, Utc::now())
                },
            )
            .unwrap();
        Fixture { store, body }
    }

    fn export_to(store: &EntityStore, path: &Path, criteria: Option<&Criteria>) -> ExportReport {
        export(store, criteria, path, &ExportOptions::default(), &CancelFlag::new()).unwrap()
    }

    #[test]
    fn export_then_open() {
        let fx = fixture();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.lantern");
        let report = export_to(&fx.store, &path, None);
        assert_eq!(report.bytes, fs::metadata(&path).unwrap().len());

        let doc = open(&path).unwrap();
        let info = doc.info().unwrap();
        assert_eq!(info.schema_version, CURRENT_SCHEMA);
        assert_eq!(info.session_count, 1);
        assert_eq!(info.message_count, 2);
        assert_eq!(info.task_count, 1);
        assert_eq!(info.transaction_count, 1);
        assert_eq!(info.blob_count, 1);
        assert_eq!(info.total_blob_bytes, fx.body.len() as u64);
        assert_eq!(info.filter, None);

        let keys = doc.blob_keys().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(doc.blob(&keys[0]).unwrap(), fx.body);

        // session + 2 messages + task + transaction + pin
        assert_eq!(doc.records().unwrap().count(), 6);
        assert!(!doc.database().unwrap().is_empty());

        let report = doc.verify().unwrap();
        assert_eq!(report.records, 6);
        assert_eq!(report.blobs, 1);
    }

    #[test]
    fn filtered_export_keeps_related_records() {
        let fx = fixture();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.lantern");
        let criteria = Criteria::messages().with_levels([LogLevel::Error]);
        let report = export_to(&fx.store, &path, Some(&criteria));
        assert_eq!(report.info.message_count, 1);
        assert_eq!(report.info.task_count, 0);
        assert_eq!(report.info.blob_count, 0);
        assert!(report.info.filter.is_some());

        let doc = open(&path).unwrap();
        let records: Vec<DatabaseRecord> = doc.records().unwrap().map(Result::unwrap).collect();
        assert!(matches!(records[0], DatabaseRecord::Session(_)));
        assert!(matches!(&records[1], DatabaseRecord::Message(m) if m.label == "auth"));
        assert!(matches!(records[2], DatabaseRecord::Pin(_)));
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn load_store_supports_queries_and_blobs() {
        let fx = fixture();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.lantern");
        export_to(&fx.store, &path, None);

        let loaded = open(&path).unwrap().load_store().unwrap();
        assert_eq!(loaded.counts(), fx.store.counts());
        assert_eq!(loaded.pins(), fx.store.pins());
        assert_eq!(
            loaded.query(&Criteria::all()).unwrap(),
            fx.store.query(&Criteria::all()).unwrap()
        );

        let task_id = loaded.query(&Criteria::tasks()).unwrap()[0];
        let task = loaded.fetch(&task_id).unwrap();
        let key = task.as_task().unwrap().response_body_key.unwrap();
        assert_eq!(loaded.blobs().get(&key).unwrap(), fx.body);
        assert_eq!(loaded.blobs().ref_count(&key), 1);

        assert!(matches!(
            loaded.clear_pins(),
            Err(StoreError::ReadOnlyViolation)
        ));
    }

    #[test]
    fn export_without_blobs() {
        let fx = fixture();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("light.lantern");
        let options = ExportOptions {
            include_blobs: false,
            ..ExportOptions::default()
        };
        export(&fx.store, None, &path, &options, &CancelFlag::new()).unwrap();

        let doc = open(&path).unwrap();
        assert!(doc.blob_keys().unwrap().is_empty());
        assert_eq!(doc.info().unwrap().task_count, 1);
    }

    #[test]
    fn cancelled_export_leaves_nothing() {
        let fx = fixture();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cancelled.lantern");
        let cancel = CancelFlag::new();
        cancel.cancel();
        let result = export(&fx.store, None, &path, &ExportOptions::default(), &cancel);
        assert!(matches!(result, Err(ArchiveError::Cancelled)));
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_parent_directory() {
        let fx = fixture();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("logs.lantern");
        assert!(matches!(
            export(&fx.store, None, &path, &ExportOptions::default(), &CancelFlag::new()),
            Err(ArchiveError::FileDoesntExist(_))
        ));
        assert!(matches!(open(&path), Err(ArchiveError::FileDoesntExist(_))));
        assert!(matches!(
            open(dir.path().join("absent.lantern")),
            Err(ArchiveError::FileDoesntExist(_))
        ));
    }

    #[test]
    fn garbage_is_not_a_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.lantern");
        fs::write(&path, vec![0x42; 256]).unwrap();
        assert!(matches!(open(&path), Err(ArchiveError::StoreInvalid(_))));
    }

    #[test]
    fn unknown_schema_is_refused() {
        let fx = fixture();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.lantern");
        export_to(&fx.store, &path, None);
        let mut bytes = fs::read(&path).unwrap();
        bytes[4..8].copy_from_slice(&7u32.to_be_bytes());
        fs::write(&path, bytes).unwrap();
        assert!(matches!(open(&path), Err(ArchiveError::UnsupportedSchema(7))));
    }

    #[test]
    fn schema_one_documents_are_readable() {
        let fx = fixture();
        let tables = fx.store.snapshot();
        let selection = writer::Selection::collect(&tables, None).unwrap();
        let info = DocumentInfo {
            schema_version: SCHEMA_V1,
            store_version: 1,
            created_at: Utc::now(),
            session_count: 1,
            message_count: 2,
            task_count: 1,
            transaction_count: 1,
            blob_count: 0,
            total_blob_bytes: 0,
            app_info: Default::default(),
            filter: None,
        };
        let mut bytes = Vec::new();
        writer::write_document(
            &mut bytes,
            &info,
            &selection,
            &tables,
            fx.store.blobs().as_ref(),
            &[],
            1024,
            3,
            &CancelFlag::new(),
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.lantern");
        fs::write(&path, bytes).unwrap();

        let doc = open(&path).unwrap();
        assert_eq!(doc.schema_version().unwrap(), SCHEMA_V1);
        assert!(doc.blob_keys().unwrap().is_empty());
        let loaded = doc.load_store().unwrap();
        assert_eq!(loaded.counts().tasks, 1);
        let task_id = loaded.query(&Criteria::tasks()).unwrap()[0];
        let key = loaded.fetch(&task_id).unwrap().as_task().unwrap().response_body_key.unwrap();
        assert!(loaded.blobs().get(&key).unwrap_err().is_not_found());
    }

    #[test]
    fn verify_detects_flipped_bytes() {
        let fx = fixture();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flip.lantern");
        export_to(&fx.store, &path, None);

        let doc = open(&path).unwrap();
        let key = doc.blob_keys().unwrap()[0];
        drop(doc);

        let mut bytes = fs::read(&path).unwrap();
        // Last byte before the index belongs to the only blob section.
        let footer = &bytes[bytes.len() - 52..];
        let index_offset = u64::from_be_bytes(footer[0..8].try_into().unwrap()) as usize;
        bytes[index_offset - 1] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        let doc = open(&path).unwrap();
        assert!(doc.info().is_ok());
        assert!(matches!(doc.blob(&key), Err(ArchiveError::Corrupted(_))));
        assert!(matches!(doc.verify(), Err(ArchiveError::Corrupted(_))));
    }

    #[test]
    fn closed_handle_reports_unknown() {
        let fx = fixture();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("closed.lantern");
        export_to(&fx.store, &path, None);

        let doc = open(&path).unwrap();
        let records = doc.records().unwrap();
        doc.close();
        doc.close();
        assert!(doc.is_closed());
        assert!(matches!(doc.info(), Err(ArchiveError::Unknown(_))));
        assert!(matches!(doc.blob_keys(), Err(ArchiveError::Unknown(_))));
        // An iterator taken before close keeps working.
        assert_eq!(records.count(), 6);
    }

    #[test]
    fn export_from_disk_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = EntityStore::open(
            dir.path().join("store"),
            OpenOptions::create(),
            StoreSettings::default(),
        )
        .unwrap();
        let session = store.create_session(Metadata::new()).unwrap();
        for i in 0..50 {
            store
                .insert_message(Message::new(session.id, Utc::now(), "bulk", LogLevel::Debug, format!("line {i}")))
                .unwrap();
        }
        let path = dir.path().join("bulk.lantern");
        export_to(&store, &path, None);
        assert_eq!(open(&path).unwrap().load_store().unwrap().counts().messages, 50);
    }
}
