use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use lantern_criteria::{compile, Criteria, QueryPlan};
use lantern_store::{Change, CommitListener, EntityStore, EntityTables};
use lantern_types::EntityId;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::LiveResult;
use crate::event::{LiveEvent, SubscriptionId, SubscriptionState};

/// A subscriber: a compiled plan, the ids it currently matches, and the
/// sending half of its channel.
struct Subscriber {
    id: SubscriptionId,
    plan: QueryPlan,
    matched: HashSet<EntityId>,
    sender: mpsc::UnboundedSender<LiveEvent>,
    state: Arc<AtomicU8>,
}

impl Subscriber {
    /// Deliver the deltas of one commit. Returns `false` once the receiver
    /// is gone.
    fn notify(&mut self, tables: &EntityTables, changes: &[Change]) -> bool {
        let ctx = tables.match_context();
        let mut inserted = Vec::new();
        let mut updated = Vec::new();
        let mut removed = Vec::new();

        for change in changes {
            match change {
                Change::Inserted(entity) | Change::Updated(entity) => {
                    let id = entity.id();
                    let matches = self.plan.matches(entity, &ctx);
                    let known = self.matched.contains(&id);
                    match (known, matches) {
                        (false, true) => {
                            self.matched.insert(id);
                            inserted.push(id);
                        }
                        (true, true) => updated.push(id),
                        (true, false) => {
                            self.matched.remove(&id);
                            removed.push(id);
                        }
                        (false, false) => {}
                    }
                }
                Change::Removed(id) => {
                    if self.matched.remove(id) {
                        removed.push(*id);
                    }
                }
            }
        }

        if inserted.is_empty() && updated.is_empty() && removed.is_empty() {
            return !self.sender.is_closed();
        }

        let notifying = self.state.compare_exchange(
            SubscriptionState::Subscribed as u8,
            SubscriptionState::Notifying as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if notifying.is_err() {
            // Unsubscribe is in progress and will remove this entry.
            return true;
        }
        let mut open = true;
        if !inserted.is_empty() {
            inserted.reverse();
            open &= self.sender.send(LiveEvent::Inserted(inserted)).is_ok();
        }
        for id in updated {
            open &= self.sender.send(LiveEvent::Updated(id)).is_ok();
        }
        if !removed.is_empty() {
            open &= self.sender.send(LiveEvent::Removed(removed)).is_ok();
        }
        let next = if open {
            SubscriptionState::Subscribed
        } else {
            SubscriptionState::Unsubscribed
        };
        // An unsubscribe racing with delivery wins.
        let _ = self.state.compare_exchange(
            SubscriptionState::Notifying as u8,
            next as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        open
    }
}

/// Subscription registry, notified by the store after every commit.
///
/// Runs inside the store's writer critical section, so every subscriber
/// sees commits in order and exactly once.
pub struct LiveRegistry {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl LiveRegistry {
    fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a registry and register it as a commit listener of `store`.
    pub fn attach(store: &EntityStore) -> Arc<Self> {
        let registry = Arc::new(Self::new());
        store.add_listener(registry.clone());
        registry
    }

    /// Subscribe to records of `store` matching `criteria`.
    ///
    /// The initial snapshot is taken under the store's writer lock, so no
    /// commit falls between it and the first delta. `store` must be the
    /// store this registry is attached to.
    pub fn subscribe(
        self: &Arc<Self>,
        store: &EntityStore,
        criteria: &Criteria,
    ) -> LiveResult<Subscription> {
        let plan = compile(criteria)?;
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let state = Arc::new(AtomicU8::new(SubscriptionState::Idle as u8));
        let (sender, receiver) = mpsc::unbounded_channel();

        let initial = store.observe(|tables| {
            let ctx = tables.match_context();
            let matched: HashSet<EntityId> = tables
                .timeline()
                .filter(|id| tables.entity(id).is_some_and(|e| plan.matches(&e, &ctx)))
                .collect();
            let snapshot = tables.query(&plan);
            let initial = snapshot.len();
            // The receiver is still in scope; this cannot fail.
            let _ = sender.send(LiveEvent::Snapshot(snapshot));
            self.subscribers.write().push(Subscriber {
                id,
                plan,
                matched,
                sender,
                state: Arc::clone(&state),
            });
            state.store(SubscriptionState::Subscribed as u8, Ordering::Release);
            initial
        });

        debug!(subscription = %id, initial, "subscribed");
        Ok(Subscription {
            id,
            receiver,
            registry: Arc::downgrade(self),
            state,
        })
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    /// Number of registered subscribers, including ones whose receiver was
    /// dropped since the last commit.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl CommitListener for LiveRegistry {
    fn on_commit(&self, tables: &EntityTables, changes: &[Change]) {
        if changes.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.write();
        subscribers.retain_mut(|sub| {
            let open = sub.notify(tables, changes);
            if !open {
                sub.state
                    .store(SubscriptionState::Unsubscribed as u8, Ordering::Release);
                debug!(subscription = %sub.id, "receiver dropped; pruned");
            }
            open
        });
    }
}

impl std::fmt::Debug for LiveRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveRegistry")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Subscription handle
// ---------------------------------------------------------------------------

/// Receiving end of a live query.
///
/// Dropping the handle unsubscribes lazily: the registry prunes it on the
/// next commit.
pub struct Subscription {
    id: SubscriptionId,
    receiver: mpsc::UnboundedReceiver<LiveEvent>,
    registry: Weak<LiveRegistry>,
    state: Arc<AtomicU8>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn state(&self) -> SubscriptionState {
        SubscriptionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Wait for the next event. `None` after unsubscribe.
    pub async fn recv(&mut self) -> Option<LiveEvent> {
        self.receiver.recv().await
    }

    /// Next queued event, if any.
    pub fn try_recv(&mut self) -> Option<LiveEvent> {
        self.receiver.try_recv().ok()
    }

    /// Stop receiving. Idempotent; queued events are discarded and nothing
    /// is delivered after this returns.
    pub fn unsubscribe(&mut self) {
        let previous = self
            .state
            .swap(SubscriptionState::Unsubscribed as u8, Ordering::AcqRel);
        if previous == SubscriptionState::Unsubscribed as u8 {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {}
        debug!(subscription = %self.id, "unsubscribed");
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
