//! Live queries over a Lantern entity store.
//!
//! A [`LiveRegistry`] is attached to a store as a commit listener. Each
//! [`Subscription`] starts with a snapshot of the records matching its
//! criteria, then receives incremental [`LiveEvent`]s as commits insert,
//! update, or remove matching records.
//!
//! Subscription lifecycle: `Idle -> Subscribed -> (Notifying)* -> Unsubscribed`.

pub mod error;
pub mod event;
pub mod registry;

pub use error::{LiveError, LiveResult};
pub use event::{LiveEvent, SubscriptionId, SubscriptionState};
pub use registry::{LiveRegistry, Subscription};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lantern_criteria::{Criteria, CustomField, CustomRule, Operator};
    use lantern_store::{EntityStore, StoreWriter, TaskOutcome, TaskUpdate};
    use lantern_types::{CancelFlag, EntityId, LogLevel, Message, Metadata, NetworkTask, SessionId};

    fn setup() -> (EntityStore, std::sync::Arc<LiveRegistry>, SessionId) {
        let store = EntityStore::in_memory();
        let registry = LiveRegistry::attach(&store);
        let session = store.create_session(Metadata::new()).unwrap();
        (store, registry, session.id)
    }

    fn log(store: &EntityStore, session: SessionId, level: LogLevel) -> EntityId {
        let m = store
            .insert_message(Message::new(session, Utc::now(), "app", level, "text"))
            .unwrap();
        EntityId::Message(m.id)
    }

    #[test]
    fn snapshot_then_inserts() {
        let (store, registry, session) = setup();
        let early = log(&store, session, LogLevel::Error);
        log(&store, session, LogLevel::Info);

        let criteria = Criteria::all().with_levels([LogLevel::Error]);
        let mut sub = registry.subscribe(&store, &criteria).unwrap();
        assert_eq!(sub.state(), SubscriptionState::Subscribed);
        assert_eq!(sub.try_recv(), Some(LiveEvent::Snapshot(vec![early])));

        let late = log(&store, session, LogLevel::Error);
        log(&store, session, LogLevel::Debug);
        assert_eq!(sub.try_recv(), Some(LiveEvent::Inserted(vec![late])));
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn task_updates_and_unmatching() {
        let (store, registry, session) = setup();
        let mut criteria = Criteria::tasks();
        criteria.custom.is_enabled = true;
        criteria.custom.rules.push(CustomRule::new(
            CustomField::StatusCode,
            Operator::LessThan,
            "400",
        ));
        let mut sub = registry.subscribe(&store, &Criteria::tasks()).unwrap();
        let mut ok_only = registry.subscribe(&store, &criteria).unwrap();
        assert_eq!(sub.try_recv(), Some(LiveEvent::Snapshot(vec![])));
        assert_eq!(ok_only.try_recv(), Some(LiveEvent::Snapshot(vec![])));

        let task = store
            .insert_task(NetworkTask::new(session, Utc::now(), "GET", "https://a.io"))
            .unwrap();
        let id = EntityId::Task(task.id);
        assert_eq!(sub.try_recv(), Some(LiveEvent::Inserted(vec![id])));
        // No status code yet: the rule does not match.
        assert_eq!(ok_only.try_recv(), None);

        store
            .update_task(&task.id, TaskUpdate { status_code: Some(200), ..Default::default() })
            .unwrap();
        assert_eq!(sub.try_recv(), Some(LiveEvent::Updated(id)));
        assert_eq!(ok_only.try_recv(), Some(LiveEvent::Inserted(vec![id])));

        store
            .update_task(
                &task.id,
                TaskUpdate {
                    status_code: Some(503),
                    ..TaskUpdate::complete(TaskOutcome::Success, Utc::now())
                },
            )
            .unwrap();
        assert_eq!(sub.try_recv(), Some(LiveEvent::Updated(id)));
        assert_eq!(ok_only.try_recv(), Some(LiveEvent::Removed(vec![id])));
    }

    #[test]
    fn prune_delivers_removals() {
        let (store, registry, session) = setup();
        let old = log(&store, session, LogLevel::Info);
        let mut sub = registry.subscribe(&store, &Criteria::all()).unwrap();
        assert_eq!(sub.try_recv(), Some(LiveEvent::Snapshot(vec![old])));

        store.prune(store.now(), &CancelFlag::new()).unwrap();
        assert_eq!(sub.try_recv(), Some(LiveEvent::Removed(vec![old])));
    }

    #[test]
    fn pin_toggles_drive_pinned_only_queries() {
        let (store, registry, session) = setup();
        let id = log(&store, session, LogLevel::Info);
        let mut criteria = Criteria::all();
        criteria.pinned_only = true;
        let mut sub = registry.subscribe(&store, &criteria).unwrap();
        assert_eq!(sub.try_recv(), Some(LiveEvent::Snapshot(vec![])));

        store.set_pinned(&id, true).unwrap();
        assert_eq!(sub.try_recv(), Some(LiveEvent::Inserted(vec![id])));
        store.clear_pins().unwrap();
        assert_eq!(sub.try_recv(), Some(LiveEvent::Removed(vec![id])));
    }

    #[test]
    fn unsubscribe_is_idempotent_and_final() {
        let (store, registry, session) = setup();
        let mut sub = registry.subscribe(&store, &Criteria::all()).unwrap();
        log(&store, session, LogLevel::Info);

        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(sub.state(), SubscriptionState::Unsubscribed);
        assert_eq!(registry.subscriber_count(), 0);
        assert_eq!(sub.try_recv(), None);

        log(&store, session, LogLevel::Info);
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn dropped_subscriptions_are_pruned_on_commit() {
        let (store, registry, session) = setup();
        let sub = registry.subscribe(&store, &Criteria::messages()).unwrap();
        let _other = registry.subscribe(&store, &Criteria::tasks()).unwrap();
        drop(sub);
        assert_eq!(registry.subscriber_count(), 2);

        log(&store, session, LogLevel::Info);
        assert_eq!(registry.subscriber_count(), 1);
    }

    #[test]
    fn invalid_criteria_is_rejected() {
        let (store, registry, _) = setup();
        let mut criteria = Criteria::all();
        criteria.custom.is_enabled = true;
        criteria
            .custom
            .rules
            .push(CustomRule::new(CustomField::Text, Operator::Regex, "(unclosed"));
        assert!(matches!(
            registry.subscribe(&store, &criteria),
            Err(LiveError::Criteria(_))
        ));
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn events_arrive_across_threads() {
        let (store, registry, session) = setup();
        let store = std::sync::Arc::new(store);
        let mut sub = registry.subscribe(&store, &Criteria::all()).unwrap();
        assert_eq!(sub.recv().await, Some(LiveEvent::Snapshot(vec![])));

        let writer = {
            let store = std::sync::Arc::clone(&store);
            std::thread::spawn(move || {
                for _ in 0..10 {
                    log(&store, session, LogLevel::Info);
                }
            })
        };
        let mut seen = 0;
        while seen < 10 {
            match sub.recv().await {
                Some(LiveEvent::Inserted(ids)) => seen += ids.len(),
                other => panic!("unexpected event {other:?}"),
            }
        }
        writer.join().unwrap();
        assert_eq!(seen, 10);
    }
}
