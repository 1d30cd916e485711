use std::collections::{HashMap, HashSet};
use std::ops::Bound;
use std::sync::Arc;

use im::{HashMap as PMap, OrdMap, OrdSet};

use lantern_criteria::{MatchContext, QueryPlan, Scope, SortOrder};
use lantern_types::{
    BlobKey, Entity, EntityId, Message, MessageId, NetworkTask, Session, SessionId, TaskId,
    Timestamp, Transaction,
};
use serde::{Deserialize, Serialize};

use crate::record::{Change, StoreCounts, WalRecord};

/// In-memory tables of one store: entity records keyed by id, plus the
/// secondary indexes queries use.
///
/// Every table is a persistent map, so cloning the tables for a reader
/// snapshot is constant time and a commit against a shared copy touches
/// only the paths it changes.
#[derive(Clone, Debug, Default)]
pub struct EntityTables {
    sessions: OrdMap<SessionId, Arc<Session>>,
    messages: PMap<MessageId, Arc<Message>>,
    tasks: PMap<TaskId, Arc<NetworkTask>>,
    /// Per task, ordered by start.
    transactions: PMap<TaskId, Vec<Arc<Transaction>>>,
    timeline: OrdMap<Timestamp, Vec<EntityId>>,
    labels: OrdMap<String, usize>,
    messages_by_label: PMap<String, OrdSet<(Timestamp, MessageId)>>,
    hosts: OrdMap<String, usize>,
    session_children: PMap<SessionId, usize>,
    pins: Arc<HashSet<EntityId>>,
    active_session: Option<SessionId>,
}

/// Flat, serializable form of [`EntityTables`], used by snapshots and
/// archive documents. Indexes are rebuilt on load.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablesImage {
    pub sessions: Vec<Session>,
    pub messages: Vec<Message>,
    pub tasks: Vec<NetworkTask>,
    pub transactions: Vec<Transaction>,
    pub pins: Vec<EntityId>,
    pub active_session: Option<SessionId>,
}

impl EntityTables {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn session(&self, id: &SessionId) -> Option<&Arc<Session>> {
        self.sessions.get(id)
    }

    /// Sessions in id order (ids are time-ordered).
    pub fn sessions(&self) -> impl Iterator<Item = &Arc<Session>> {
        self.sessions.values()
    }

    pub fn message(&self, id: &MessageId) -> Option<&Arc<Message>> {
        self.messages.get(id)
    }

    pub fn task(&self, id: &TaskId) -> Option<&Arc<NetworkTask>> {
        self.tasks.get(id)
    }

    pub fn entity(&self, id: &EntityId) -> Option<Entity> {
        match id {
            EntityId::Message(m) => self.messages.get(m).cloned().map(Entity::Message),
            EntityId::Task(t) => self.tasks.get(t).cloned().map(Entity::Task),
        }
    }

    /// Transactions of a task, ordered by start.
    pub fn transactions(&self, task: &TaskId) -> &[Arc<Transaction>] {
        self.transactions.get(task).map_or(&[], Vec::as_slice)
    }

    /// Every message and task, oldest first.
    pub fn timeline(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.timeline.values().flatten().copied()
    }

    /// Messages and tasks created strictly before `before`, oldest first.
    pub fn created_before(&self, before: Timestamp) -> impl Iterator<Item = EntityId> + '_ {
        self.timeline
            .range((Bound::Unbounded, Bound::Excluded(before)))
            .flat_map(|(_, ids)| ids.iter().copied())
    }

    /// Distinct labels with message counts.
    pub fn labels(&self) -> impl Iterator<Item = (&str, usize)> {
        self.labels.iter().map(|(l, n)| (l.as_str(), *n))
    }

    /// Distinct task hosts with task counts.
    pub fn hosts(&self) -> impl Iterator<Item = (&str, usize)> {
        self.hosts.iter().map(|(h, n)| (h.as_str(), *n))
    }

    pub fn pins(&self) -> &HashSet<EntityId> {
        &self.pins
    }

    pub fn is_pinned(&self, id: &EntityId) -> bool {
        self.pins.contains(id)
    }

    /// The most recently created session that is still open.
    pub fn active_session(&self) -> Option<SessionId> {
        self.active_session
    }

    /// Number of messages and tasks in a session.
    pub fn session_children(&self, id: &SessionId) -> usize {
        self.session_children.get(id).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> StoreCounts {
        StoreCounts {
            sessions: self.sessions.len(),
            messages: self.messages.len(),
            tasks: self.tasks.len(),
            transactions: self.transactions.values().map(Vec::len).sum(),
        }
    }

    /// How many records reference each blob.
    pub fn blob_references(&self) -> HashMap<BlobKey, u64> {
        let mut refs = HashMap::new();
        for task in self.tasks.values() {
            for key in task.blob_keys() {
                *refs.entry(key).or_insert(0) += 1;
            }
        }
        refs
    }

    /// Match context for evaluating criteria against these tables.
    pub fn match_context(&self) -> MatchContext<'_> {
        MatchContext::new(self.active_session).with_pins(&self.pins)
    }

    /// Ids of the entities matching `plan`, in the plan's order, up to its
    /// limit.
    pub fn query(&self, plan: &QueryPlan) -> Vec<EntityId> {
        let limit = plan.limit().unwrap_or(usize::MAX);
        let mut out = Vec::new();
        if limit == 0 {
            return out;
        }
        let ctx = self.match_context();
        for id in self.candidates(plan) {
            let Some(entity) = self.entity(&id) else {
                continue;
            };
            if plan.matches(&entity, &ctx) {
                out.push(id);
                if out.len() >= limit {
                    break;
                }
            }
        }
        out
    }

    /// Candidate ids for a plan, narrowed by its index hints.
    fn candidates<'a>(&'a self, plan: &QueryPlan) -> Box<dyn Iterator<Item = EntityId> + 'a> {
        let newest_first = plan.order() == SortOrder::NewestFirst;

        if plan.pinned_only() {
            let mut pinned: Vec<(Timestamp, EntityId)> = self
                .pins
                .iter()
                .filter_map(|id| self.entity(id).map(|e| (e.created_at(), *id)))
                .collect();
            pinned.sort();
            if newest_first {
                pinned.reverse();
            }
            return Box::new(pinned.into_iter().map(|(_, id)| id));
        }

        if let (Some(label), Scope::Messages) = (plan.focused_label(), plan.scope()) {
            let Some(index) = self.messages_by_label.get(label) else {
                return Box::new(std::iter::empty());
            };
            let ids = index.iter().map(|(_, id)| EntityId::Message(*id));
            return if newest_first {
                Box::new(ids.rev())
            } else {
                Box::new(ids)
            };
        }

        let (start, end) = plan.time_bounds();
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Box::new(std::iter::empty());
            }
        }
        let lower = start.map_or(Bound::Unbounded, Bound::Included);
        let upper = end.map_or(Bound::Unbounded, Bound::Included);
        let range = self.timeline.range((lower, upper));
        if newest_first {
            Box::new(range.rev().flat_map(|(_, ids)| ids.iter().rev().copied()))
        } else {
            Box::new(range.flat_map(|(_, ids)| ids.iter().copied()))
        }
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Apply one WAL record. Returns the entity-level changes.
    ///
    /// Infallible and idempotent: the writer validates before logging, and
    /// replaying a record whose effect is already present (or whose target
    /// is gone) is a no-op.
    pub fn apply(&mut self, record: &WalRecord) -> Vec<Change> {
        match record {
            WalRecord::CreateSession(session) => {
                self.active_session = Some(session.id);
                self.sessions.insert(session.id, Arc::new(session.clone()));
                Vec::new()
            }
            WalRecord::CloseSession { id, closed_at } => {
                if let Some(session) = self.sessions.get_mut(id) {
                    Arc::make_mut(session).closed_at = Some(*closed_at);
                }
                if self.active_session == Some(*id) {
                    self.active_session = None;
                }
                Vec::new()
            }
            WalRecord::InsertMessage(message) => {
                if self.messages.contains_key(&message.id) {
                    return Vec::new();
                }
                let message = Arc::new(message.clone());
                self.index_message(&message);
                self.messages.insert(message.id, Arc::clone(&message));
                vec![Change::Inserted(Entity::Message(message))]
            }
            WalRecord::InsertTask(task) => {
                if self.tasks.contains_key(&task.id) {
                    return Vec::new();
                }
                let task = Arc::new(task.clone());
                self.index_task(&task);
                self.tasks.insert(task.id, Arc::clone(&task));
                vec![Change::Inserted(Entity::Task(task))]
            }
            WalRecord::AppendTransaction(transaction) => {
                let seen = self
                    .transactions(&transaction.task_id)
                    .iter()
                    .any(|t| t.id == transaction.id);
                let Some(task) = self.tasks.get_mut(&transaction.task_id).filter(|_| !seen) else {
                    return Vec::new();
                };
                Arc::make_mut(task).observe_transaction(transaction);
                let task = Arc::clone(task);
                self.insert_transaction(transaction.clone());
                vec![Change::Updated(Entity::Task(task))]
            }
            WalRecord::UpdateTask(task) => {
                if !self.tasks.contains_key(&task.id) {
                    return Vec::new();
                }
                let task = Arc::new(task.clone());
                self.tasks.insert(task.id, Arc::clone(&task));
                vec![Change::Updated(Entity::Task(task))]
            }
            WalRecord::SetPinned { id, pinned } => {
                let Some(entity) = self.entity(id) else {
                    self.unpin(id);
                    return Vec::new();
                };
                let changed = if *pinned {
                    !self.pins.contains(id) && Arc::make_mut(&mut self.pins).insert(*id)
                } else {
                    self.unpin(id)
                };
                if changed {
                    vec![Change::Updated(entity)]
                } else {
                    Vec::new()
                }
            }
            WalRecord::ClearPins => {
                let mut unpinned: Vec<EntityId> =
                    std::mem::take(&mut self.pins).iter().copied().collect();
                unpinned.sort();
                unpinned
                    .iter()
                    .filter_map(|id| self.entity(id))
                    .map(Change::Updated)
                    .collect()
            }
            WalRecord::Remove(id) => {
                if self.remove(id) {
                    vec![Change::Removed(*id)]
                } else {
                    Vec::new()
                }
            }
            WalRecord::RemoveSession(id) => {
                if self.session_children(id) == 0 {
                    self.sessions.remove(id);
                    self.session_children.remove(id);
                    if self.active_session == Some(*id) {
                        self.active_session = None;
                    }
                }
                Vec::new()
            }
            WalRecord::RemoveAll => {
                let removed: Vec<Change> = self.timeline().map(Change::Removed).collect();
                let active = self
                    .active_session
                    .and_then(|id| self.sessions.get(&id).cloned());
                *self = Self::default();
                if let Some(session) = active {
                    self.active_session = Some(session.id);
                    self.sessions.insert(session.id, session);
                }
                removed
            }
        }
    }

    fn index_message(&mut self, message: &Arc<Message>) {
        self.push_timeline(message.created_at, EntityId::Message(message.id));
        increment(&mut self.labels, &message.label);
        let entry = (message.created_at, message.id);
        match self.messages_by_label.get_mut(&message.label) {
            Some(index) => {
                index.insert(entry);
            }
            None => {
                self.messages_by_label
                    .insert(message.label.clone(), OrdSet::unit(entry));
            }
        }
        self.add_child(message.session_id);
    }

    fn index_task(&mut self, task: &Arc<NetworkTask>) {
        self.push_timeline(task.created_at, EntityId::Task(task.id));
        if let Some(host) = &task.host {
            increment(&mut self.hosts, host);
        }
        self.add_child(task.session_id);
    }

    fn push_timeline(&mut self, at: Timestamp, id: EntityId) {
        match self.timeline.get_mut(&at) {
            Some(ids) => ids.push(id),
            None => {
                self.timeline.insert(at, vec![id]);
            }
        }
    }

    fn add_child(&mut self, session: SessionId) {
        let n = self.session_children(&session);
        self.session_children.insert(session, n + 1);
    }

    fn unpin(&mut self, id: &EntityId) -> bool {
        self.pins.contains(id) && Arc::make_mut(&mut self.pins).remove(id)
    }

    fn insert_transaction(&mut self, transaction: Transaction) {
        let task_id = transaction.task_id;
        let mut list = self.transactions.get(&task_id).cloned().unwrap_or_default();
        let at = list.partition_point(|t| t.timing.start <= transaction.timing.start);
        list.insert(at, Arc::new(transaction));
        self.transactions.insert(task_id, list);
    }

    fn remove(&mut self, id: &EntityId) -> bool {
        let (created_at, session_id) = match id {
            EntityId::Message(mid) => {
                let Some(message) = self.messages.remove(mid) else {
                    return false;
                };
                decrement(&mut self.labels, &message.label);
                if let Some(index) = self.messages_by_label.get_mut(&message.label) {
                    index.remove(&(message.created_at, message.id));
                    if index.is_empty() {
                        self.messages_by_label.remove(&message.label);
                    }
                }
                (message.created_at, message.session_id)
            }
            EntityId::Task(tid) => {
                let Some(task) = self.tasks.remove(tid) else {
                    return false;
                };
                if let Some(host) = &task.host {
                    decrement(&mut self.hosts, host);
                }
                self.transactions.remove(tid);
                (task.created_at, task.session_id)
            }
        };
        if let Some(ids) = self.timeline.get_mut(&created_at) {
            ids.retain(|x| x != id);
            if ids.is_empty() {
                self.timeline.remove(&created_at);
            }
        }
        if let Some(n) = self.session_children.get_mut(&session_id) {
            *n = n.saturating_sub(1);
        }
        self.unpin(id);
        true
    }

    // -----------------------------------------------------------------------
    // Images
    // -----------------------------------------------------------------------

    /// Flatten into a serializable image.
    pub fn to_image(&self) -> TablesImage {
        let mut tasks: Vec<NetworkTask> = self.tasks.values().map(|t| (**t).clone()).collect();
        tasks.sort_by_key(|t| (t.created_at, t.id));
        let mut messages: Vec<Message> = self.messages.values().map(|m| (**m).clone()).collect();
        messages.sort_by_key(|m| (m.created_at, m.id));
        let transactions = tasks
            .iter()
            .flat_map(|t| self.transactions(&t.id).iter().map(|tx| (**tx).clone()))
            .collect();
        let mut pins: Vec<EntityId> = self.pins.iter().copied().collect();
        pins.sort();
        TablesImage {
            sessions: self.sessions.values().map(|s| (**s).clone()).collect(),
            messages,
            tasks,
            transactions,
            pins,
            active_session: self.active_session,
        }
    }

    /// Rebuild tables and indexes from an image.
    ///
    /// Task records already carry the fields derived from their
    /// transactions, so transactions are attached without re-deriving.
    pub fn from_image(image: TablesImage) -> Self {
        let mut tables = Self::new();
        for session in image.sessions {
            tables.sessions.insert(session.id, Arc::new(session));
        }
        for message in image.messages {
            let message = Arc::new(message);
            tables.index_message(&message);
            tables.messages.insert(message.id, message);
        }
        for task in image.tasks {
            let task = Arc::new(task);
            tables.index_task(&task);
            tables.tasks.insert(task.id, task);
        }
        for transaction in image.transactions {
            if tables.tasks.contains_key(&transaction.task_id) {
                tables.insert_transaction(transaction);
            }
        }
        let pins: HashSet<EntityId> = image
            .pins
            .into_iter()
            .filter(|id| tables.entity(id).is_some())
            .collect();
        tables.pins = Arc::new(pins);
        tables.active_session = image
            .active_session
            .filter(|id| tables.sessions.contains_key(id));
        tables
    }

    /// Latest `created_at` of any record, for seeding the writer clock.
    pub fn last_timestamp(&self) -> Option<Timestamp> {
        let entity = self.timeline.iter().next_back().map(|(at, _)| *at);
        let session = self.sessions.values().map(|s| s.started_at).max();
        entity.max(session)
    }
}

fn increment(counts: &mut OrdMap<String, usize>, key: &str) {
    match counts.get_mut(key) {
        Some(n) => *n += 1,
        None => {
            counts.insert(key.to_string(), 1);
        }
    }
}

fn decrement(counts: &mut OrdMap<String, usize>, key: &str) {
    if let Some(n) = counts.get_mut(key) {
        *n -= 1;
        if *n == 0 {
            counts.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use lantern_criteria::{compile, Criteria, SortOrder};
    use lantern_types::{FetchType, LogLevel, Metadata};

    fn t(secs: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + ChronoDuration::seconds(secs)
    }

    fn seeded() -> (EntityTables, SessionId) {
        let mut tables = EntityTables::new();
        let session = Session::new(t(0), Metadata::new());
        let sid = session.id;
        tables.apply(&WalRecord::CreateSession(session));
        (tables, sid)
    }

    fn msg(sid: SessionId, secs: i64, label: &str, level: LogLevel) -> Message {
        Message::new(sid, t(secs), label, level, "text")
    }

    #[test]
    fn insert_indexes_labels_and_hosts() {
        let (mut tables, sid) = seeded();
        tables.apply(&WalRecord::InsertMessage(msg(sid, 1, "auth", LogLevel::Info)));
        tables.apply(&WalRecord::InsertMessage(msg(sid, 2, "auth", LogLevel::Error)));
        tables.apply(&WalRecord::InsertTask(NetworkTask::new(sid, t(3), "GET", "https://a.io/x")));

        assert_eq!(tables.labels().collect::<Vec<_>>(), vec![("auth", 2)]);
        assert_eq!(tables.hosts().collect::<Vec<_>>(), vec![("a.io", 1)]);
        assert_eq!(tables.session_children(&sid), 3);
        assert_eq!(tables.counts().messages, 2);
        assert_eq!(tables.active_session(), Some(sid));
    }

    #[test]
    fn query_orders_and_limits() {
        let (mut tables, sid) = seeded();
        let ids: Vec<EntityId> = (1..=5)
            .map(|i| {
                let m = msg(sid, i, "l", LogLevel::Info);
                let id = EntityId::Message(m.id);
                tables.apply(&WalRecord::InsertMessage(m));
                id
            })
            .collect();

        let newest = tables.query(&compile(&Criteria::all()).unwrap());
        assert_eq!(newest, ids.iter().rev().copied().collect::<Vec<_>>());

        let oldest = compile(&Criteria::all().with_order(SortOrder::OldestFirst).with_limit(2)).unwrap();
        assert_eq!(tables.query(&oldest), ids[..2].to_vec());
    }

    #[test]
    fn focused_label_uses_index() {
        let (mut tables, sid) = seeded();
        let keep = msg(sid, 1, "auth", LogLevel::Info);
        let keep_id = EntityId::Message(keep.id);
        tables.apply(&WalRecord::InsertMessage(keep));
        tables.apply(&WalRecord::InsertMessage(msg(sid, 2, "db", LogLevel::Info)));

        let mut criteria = Criteria::messages();
        criteria.labels.focused = Some("auth".into());
        assert_eq!(tables.query(&compile(&criteria).unwrap()), vec![keep_id]);

        criteria.labels.focused = Some("unknown".into());
        assert!(tables.query(&compile(&criteria).unwrap()).is_empty());
    }

    #[test]
    fn time_bounds_narrow_the_scan() {
        let (mut tables, sid) = seeded();
        for i in 1..=10 {
            tables.apply(&WalRecord::InsertMessage(msg(sid, i, "l", LogLevel::Info)));
        }
        let mut criteria = Criteria::all();
        criteria.dates.start = Some(t(3));
        criteria.dates.end = Some(t(5));
        assert_eq!(tables.query(&compile(&criteria).unwrap()).len(), 3);

        criteria.dates.start = Some(t(6));
        assert!(tables.query(&compile(&criteria).unwrap()).is_empty());
    }

    #[test]
    fn remove_cleans_indexes_and_pins() {
        let (mut tables, sid) = seeded();
        let m = msg(sid, 1, "auth", LogLevel::Info);
        let id = EntityId::Message(m.id);
        tables.apply(&WalRecord::InsertMessage(m));
        tables.apply(&WalRecord::SetPinned { id, pinned: true });
        assert!(tables.is_pinned(&id));

        let changes = tables.apply(&WalRecord::Remove(id));
        assert_eq!(changes, vec![Change::Removed(id)]);
        assert!(tables.entity(&id).is_none());
        assert!(!tables.is_pinned(&id));
        assert_eq!(tables.labels().count(), 0);
        assert_eq!(tables.timeline().count(), 0);
        assert_eq!(tables.session_children(&sid), 0);

        assert!(tables.apply(&WalRecord::Remove(id)).is_empty());
    }

    #[test]
    fn transactions_stay_ordered_and_update_task() {
        let (mut tables, sid) = seeded();
        let task = NetworkTask::new(sid, t(1), "GET", "https://a.io");
        let tid = task.id;
        tables.apply(&WalRecord::InsertTask(task));

        let late = Transaction::new(tid, FetchType::NetworkLoad, t(5));
        let early = Transaction::new(tid, FetchType::LocalCache, t(2));
        tables.apply(&WalRecord::AppendTransaction(late.clone()));
        let changes = tables.apply(&WalRecord::AppendTransaction(early.clone()));

        assert!(matches!(&changes[..], [Change::Updated(Entity::Task(_))]));
        let starts: Vec<_> = tables.transactions(&tid).iter().map(|t| t.timing.start).collect();
        assert_eq!(starts, vec![t(2), t(5)]);
        assert!(tables.task(&tid).unwrap().from_cache);
    }

    #[test]
    fn replayed_inserts_are_ignored() {
        let (mut tables, sid) = seeded();
        let m = WalRecord::InsertMessage(msg(sid, 1, "auth", LogLevel::Info));
        tables.apply(&m);
        assert!(tables.apply(&m).is_empty());
        assert_eq!(tables.labels().collect::<Vec<_>>(), vec![("auth", 1)]);
        assert_eq!(tables.timeline().count(), 1);

        let task = NetworkTask::new(sid, t(2), "GET", "https://a.io");
        let tx = WalRecord::AppendTransaction(Transaction::new(task.id, FetchType::NetworkLoad, t(2)));
        let tid = task.id;
        tables.apply(&WalRecord::InsertTask(task));
        tables.apply(&tx);
        assert!(tables.apply(&tx).is_empty());
        assert_eq!(tables.transactions(&tid).len(), 1);
    }

    #[test]
    fn remove_all_keeps_active_session() {
        let mut tables = EntityTables::new();
        let old = Session::new(t(0), Metadata::new());
        let old_id = old.id;
        tables.apply(&WalRecord::CreateSession(old));
        tables.apply(&WalRecord::InsertMessage(msg(old_id, 1, "a", LogLevel::Info)));
        tables.apply(&WalRecord::CloseSession { id: old_id, closed_at: t(1) });
        let current = Session::new(t(2), Metadata::new());
        let sid = current.id;
        tables.apply(&WalRecord::CreateSession(current));
        assert_eq!(tables.active_session(), Some(sid));

        let changes = tables.apply(&WalRecord::RemoveAll);
        assert_eq!(changes.len(), 1);
        assert_eq!(tables.counts().sessions, 1);
        assert_eq!(tables.active_session(), Some(sid));
    }

    #[test]
    fn image_roundtrip_rebuilds_indexes() {
        let (mut tables, sid) = seeded();
        let m = msg(sid, 1, "auth", LogLevel::Warning);
        let mid = EntityId::Message(m.id);
        tables.apply(&WalRecord::InsertMessage(m));
        let task = NetworkTask::new(sid, t(2), "GET", "https://a.io");
        let tid = task.id;
        tables.apply(&WalRecord::InsertTask(task));
        tables.apply(&WalRecord::AppendTransaction(Transaction::new(tid, FetchType::LocalCache, t(2))));
        tables.apply(&WalRecord::SetPinned { id: mid, pinned: true });

        let rebuilt = EntityTables::from_image(tables.to_image());
        assert_eq!(rebuilt.to_image(), tables.to_image());
        assert_eq!(rebuilt.labels().collect::<Vec<_>>(), vec![("auth", 1)]);
        assert!(rebuilt.task(&tid).unwrap().from_cache);
        assert_eq!(rebuilt.transactions(&tid).len(), 1);
        assert_eq!(rebuilt.active_session(), Some(sid));
        assert_eq!(rebuilt.last_timestamp(), Some(t(2)));
    }
}
