//! High-level SDK for Lantern.
//!
//! [`LoggerStore`] is the entry point for applications: it records log
//! messages and network tasks, answers queries and live subscriptions, and
//! shares the store as an archive document or a text transcript.

pub mod config;
pub mod error;
pub mod logger;
pub mod producer;
pub mod share;

pub use config::{retention_cutoff, StoreConfig, CONFIG_FILE};
pub use error::{SdkError, SdkResult};
pub use logger::{LoggerStore, ShareReport, StoreInfo, NETWORK_LABEL};
pub use producer::{NetworkRequest, NetworkResponse, TaskMetrics, TransactionMetrics};
pub use share::{ShareOptions, ShareOutput, SharingTimeRange};

// Re-export key types
pub use lantern_archive::{DocumentHandle, DocumentInfo};
pub use lantern_criteria::Criteria;
pub use lantern_live::{LiveEvent, Subscription};
pub use lantern_store::{OpenOptions, PruneReport};
pub use lantern_types::{
    CancelFlag, Entity, EntityId, LogLevel, Metadata, SourceLocation, TaskError, TaskId,
    TaskState,
};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use lantern_types::{FetchType, TransferSize};

    fn logger() -> LoggerStore {
        LoggerStore::in_memory(StoreConfig::default()).unwrap()
    }

    fn metrics(status: u16) -> TaskMetrics {
        let start = Utc::now();
        TaskMetrics {
            transactions: vec![TransactionMetrics {
                fetch_type: FetchType::NetworkLoad,
                start,
                end: Some(start + ChronoDuration::milliseconds(80)),
                transfer_size: TransferSize {
                    response_body: 11,
                    ..TransferSize::default()
                },
                response: Some(
                    NetworkResponse::new(status).with_header("Content-Type", "application/json"),
                ),
            }],
        }
    }

    fn network_messages(logger: &LoggerStore) -> Vec<Entity> {
        let mut criteria = Criteria::messages();
        criteria.labels.focused = Some(NETWORK_LABEL.into());
        logger
            .query(&criteria)
            .unwrap()
            .iter()
            .map(|id| logger.fetch(id).unwrap())
            .collect()
    }

    #[test]
    fn task_lifecycle_stores_bodies_and_links_a_message() {
        let logger = logger();
        let request = NetworkRequest::new("POST", "https://api.example.com/login")
            .with_header("Accept", "application/json")
            .with_body(b"{\"user\":\"a\"}".to_vec());
        let task = logger.record_task_created(request).unwrap();
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.host.as_deref(), Some("api.example.com"));
        let request_key = task.request_body_key.unwrap();
        assert_eq!(logger.blob(&request_key).unwrap(), b"{\"user\":\"a\"}");

        let head = NetworkResponse::new(200).with_header("Content-Type", "application/json");
        logger
            .record_task_data_received(&task.id, Some(&head), b"{\"ok\":")
            .unwrap();
        logger
            .record_task_data_received(&task.id, None, b"true}")
            .unwrap();
        let done = logger
            .record_task_completed(&task.id, metrics(200), None)
            .unwrap();

        assert_eq!(done.state, TaskState::Success);
        assert_eq!(done.status_code, Some(200));
        assert_eq!(done.content_type().as_deref(), Some("application/json"));
        assert_eq!(done.response_body_size, 11);
        assert_eq!(logger.blob(&done.response_body_key.unwrap()).unwrap(), b"{\"ok\":true}");
        assert_eq!(done.duration, Some(std::time::Duration::from_millis(80)));
        assert_eq!(logger.transactions(&task.id).unwrap().len(), 1);

        let messages = network_messages(&logger);
        assert_eq!(messages.len(), 1);
        let message = messages[0].as_message().unwrap();
        assert_eq!(message.level, LogLevel::Debug);
        assert_eq!(message.linked_task_id, Some(task.id));
        assert_eq!(message.text, "POST https://api.example.com/login 200");
    }

    #[test]
    fn failed_task_records_an_error_message() {
        let logger = logger();
        let task = logger
            .record_task_created(NetworkRequest::new("GET", "https://cdn.example.com/a.png"))
            .unwrap();
        let error = TaskError {
            code: -1001,
            domain: "NSURLErrorDomain".into(),
            description: "timed out".into(),
        };
        let done = logger
            .record_task_completed(&task.id, TaskMetrics::default(), Some(error.clone()))
            .unwrap();
        assert_eq!(done.state, TaskState::Failure);
        assert_eq!(done.error, Some(error));
        assert_eq!(done.response_body_key, None);

        let messages = network_messages(&logger);
        let message = messages[0].as_message().unwrap();
        assert_eq!(message.level, LogLevel::Error);
        assert!(message.text.ends_with("failed: timed out"));
    }

    #[test]
    fn lifecycle_violations_are_typed() {
        let logger = logger();
        let unknown = TaskId::new();
        assert!(matches!(
            logger.record_task_completed(&unknown, TaskMetrics::default(), None),
            Err(SdkError::TaskNotFound(id)) if id == unknown
        ));
        assert!(matches!(
            logger.record_task_data_received(&unknown, None, b"x"),
            Err(SdkError::TaskNotFound(_))
        ));

        let task = logger
            .record_task_created(NetworkRequest::new("GET", "https://a.io"))
            .unwrap();
        logger
            .record_task_completed(&task.id, TaskMetrics::default(), None)
            .unwrap();
        assert!(matches!(
            logger.record_task_completed(&task.id, TaskMetrics::default(), None),
            Err(SdkError::TaskAlreadyCompleted(_))
        ));
        assert!(matches!(
            logger.record_task_data_received(&task.id, None, b"late"),
            Err(SdkError::TaskAlreadyCompleted(_))
        ));
        // Only the first completion produced a message.
        assert_eq!(network_messages(&logger).len(), 1);
    }

    #[test]
    fn messages_carry_metadata_and_source() {
        let logger = logger();
        let mut metadata = Metadata::new();
        metadata.insert("user".into(), "42".into());
        let source = SourceLocation {
            file: "auth.rs".into(),
            function: "sign_in".into(),
            line: 12,
        };
        let message = logger
            .record_message("auth", LogLevel::Warning, "retrying", metadata.clone(), Some(source.clone()))
            .unwrap();
        assert_eq!(message.session_id, logger.session_id().unwrap());
        assert_eq!(message.metadata, metadata);
        assert_eq!(message.source, Some(source));
        assert_eq!(logger.labels(), vec![("auth".to_string(), 1)]);
    }

    #[test]
    fn reopening_closes_the_previous_session() {
        let dir = tempfile::tempdir().unwrap();
        let first = {
            let logger =
                LoggerStore::open(dir.path(), OpenOptions::create(), StoreConfig::default()).unwrap();
            logger
                .record_message("app", LogLevel::Info, "first run", Metadata::new(), None)
                .unwrap();
            logger.session_id().unwrap()
        };

        let logger =
            LoggerStore::open(dir.path(), OpenOptions::create(), StoreConfig::default()).unwrap();
        let second = logger.session_id().unwrap();
        assert_ne!(first, second);
        let sessions = logger.sessions();
        assert_eq!(sessions.len(), 2);
        assert!(sessions.iter().any(|s| s.id == first && s.is_closed()));
        assert_eq!(logger.info().current_session, Some(second));
        assert_eq!(logger.info().counts.messages, 1);
    }

    #[test]
    fn readonly_store_rejects_producers() {
        let dir = tempfile::tempdir().unwrap();
        LoggerStore::open(dir.path(), OpenOptions::create(), StoreConfig::default())
            .unwrap()
            .close()
            .unwrap();

        let logger =
            LoggerStore::open(dir.path(), OpenOptions::readonly(), StoreConfig::default()).unwrap();
        assert_eq!(logger.session_id(), None);
        assert!(logger.info().readonly);
        assert!(matches!(
            logger.record_message("app", LogLevel::Info, "x", Metadata::new(), None),
            Err(SdkError::Store(lantern_store::StoreError::ReadOnlyViolation))
        ));
        assert!(logger.close().is_ok());
    }

    #[test]
    fn close_is_idempotent_and_final() {
        let logger = logger();
        logger.close().unwrap();
        logger.close().unwrap();
        assert!(matches!(
            logger.record_message("app", LogLevel::Info, "after", Metadata::new(), None),
            Err(SdkError::Store(lantern_store::StoreError::SessionClosed(_)))
        ));
    }

    #[test]
    fn sweep_follows_retention() {
        let logger = LoggerStore::in_memory(StoreConfig {
            max_age_days: None,
            ..StoreConfig::default()
        })
        .unwrap();
        assert_eq!(logger.sweep(&CancelFlag::new()).unwrap(), None);

        let logger = logger_with_record();
        let report = logger.sweep(&CancelFlag::new()).unwrap().unwrap();
        assert_eq!(report.total(), 0);
        assert_eq!(logger.info().counts.messages, 1);
    }

    #[test]
    fn out_of_range_retention_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            max_age_days: Some(200_000_000),
            ..StoreConfig::default()
        };
        assert!(matches!(
            LoggerStore::open(dir.path(), OpenOptions::create(), config.clone()),
            Err(SdkError::Config(_))
        ));

        let logger = LoggerStore::in_memory(config).unwrap();
        assert!(matches!(logger.sweep(&CancelFlag::new()), Err(SdkError::Config(_))));
    }

    fn logger_with_record() -> LoggerStore {
        let logger = logger();
        logger
            .record_message("app", LogLevel::Info, "kept", Metadata::new(), None)
            .unwrap();
        logger
    }

    #[test]
    fn shared_document_reopens_with_the_same_records() {
        let dir = tempfile::tempdir().unwrap();
        let logger = logger_with_record();
        let task = logger
            .record_task_created(NetworkRequest::new("GET", "https://a.io/x"))
            .unwrap();
        logger
            .record_task_data_received(&task.id, Some(&NetworkResponse::new(200)), b"payload")
            .unwrap();
        logger
            .record_task_completed(&task.id, metrics(200), None)
            .unwrap();

        let path = dir.path().join("share.lantern");
        let report = logger
            .export(&path, &ShareOptions::default(), &CancelFlag::new())
            .unwrap();
        assert_eq!(report.output, ShareOutput::Document);
        // One message, the network message, and the task.
        assert_eq!(report.records, 3);

        let reopened = LoggerStore::from_archive(&path).unwrap();
        assert!(reopened.info().readonly);
        assert_eq!(reopened.info().counts.tasks, 1);
        let copy = reopened.fetch(&EntityId::Task(task.id)).unwrap();
        let key = copy.as_task().unwrap().response_body_key.unwrap();
        assert_eq!(reopened.blob(&key).unwrap(), b"payload");
    }

    #[test]
    fn text_share_respects_min_level() {
        let dir = tempfile::tempdir().unwrap();
        let logger = logger_with_record();
        logger
            .record_message("db", LogLevel::Error, "disk full", Metadata::new(), None)
            .unwrap();
        let options = ShareOptions {
            output: ShareOutput::Text,
            min_level: Some(LogLevel::Warning),
            ..ShareOptions::default()
        };
        let path = dir.path().join("share.txt");
        let report = logger.export(&path, &options, &CancelFlag::new()).unwrap();
        assert_eq!(report.records, 1);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("[error] db: disk full"));
        assert!(!text.contains("kept"));
        assert_eq!(report.bytes, text.len() as u64);
    }

    #[test]
    fn share_into_missing_directory_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let logger = logger_with_record();
        let options = ShareOptions {
            output: ShareOutput::Text,
            ..ShareOptions::default()
        };
        let path = dir.path().join("missing").join("share.txt");
        assert!(matches!(
            logger.export(&path, &options, &CancelFlag::new()),
            Err(SdkError::Archive(lantern_archive::ArchiveError::FileDoesntExist(_)))
        ));
    }

    #[test]
    fn remove_all_keeps_the_session() {
        let logger = logger_with_record();
        let report = logger.remove_all().unwrap();
        assert_eq!(report.messages, 1);
        assert_eq!(logger.info().counts.messages, 0);
        logger
            .record_message("app", LogLevel::Info, "again", Metadata::new(), None)
            .unwrap();
    }

    #[test]
    fn info_reports_blob_usage() {
        let logger = logger();
        logger
            .record_task_created(NetworkRequest::new("PUT", "https://a.io").with_body(vec![7u8; 64]))
            .unwrap();
        let info = logger.info();
        assert_eq!(info.blob_count, 1);
        assert_eq!(info.blob_logical_bytes, 64);
        assert_eq!(info.counts.tasks, 1);
    }

    #[test]
    fn process_wide_store_is_installed_once() {
        let installed = logger().install_shared().unwrap();
        let shared = LoggerStore::shared().unwrap();
        assert!(std::sync::Arc::ptr_eq(&installed, &shared));
        assert!(matches!(
            logger().install_shared(),
            Err(SdkError::SharedAlreadySet)
        ));
    }

    #[tokio::test]
    async fn subscriptions_see_recorded_messages() {
        let logger = logger();
        let mut sub = logger
            .subscribe(&Criteria::all().with_levels([LogLevel::Error]))
            .unwrap();
        assert_eq!(sub.recv().await, Some(LiveEvent::Snapshot(vec![])));

        logger
            .record_message("app", LogLevel::Info, "quiet", Metadata::new(), None)
            .unwrap();
        let loud = logger
            .record_message("app", LogLevel::Error, "loud", Metadata::new(), None)
            .unwrap();
        assert_eq!(
            sub.recv().await,
            Some(LiveEvent::Inserted(vec![EntityId::Message(loud.id)]))
        );
    }
}
