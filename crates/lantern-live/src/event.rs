use lantern_types::EntityId;

/// A delta delivered to a subscriber.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LiveEvent {
    /// Initial result set, in the criteria's order. Always the first event.
    Snapshot(Vec<EntityId>),
    /// Newly matching records, newest first.
    Inserted(Vec<EntityId>),
    /// A matching task changed and still matches.
    Updated(EntityId),
    /// Records that were pruned or stopped matching.
    Removed(Vec<EntityId>),
}

/// Lifecycle of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SubscriptionState {
    Idle = 0,
    Subscribed = 1,
    /// Deltas for a commit are being delivered.
    Notifying = 2,
    Unsubscribed = 3,
}

impl SubscriptionState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Subscribed,
            2 => Self::Notifying,
            _ => Self::Unsubscribed,
        }
    }
}

/// Registry-local subscription id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub:{}", self.0)
    }
}
