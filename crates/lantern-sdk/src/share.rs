use std::io::{self, Write};

use chrono::Duration as ChronoDuration;
use lantern_criteria::{Criteria, DatesFacet, SortOrder};
use lantern_store::{EntityStore, StoreReader};
use lantern_types::{CancelFlag, Entity, LogLevel, Message, NetworkTask, Timestamp};

use crate::error::{SdkError, SdkResult};

/// Which records a share covers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SharingTimeRange {
    #[default]
    CurrentSession,
    LastHour,
    Today,
    All,
}

/// What a share produces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShareOutput {
    /// An archive document.
    #[default]
    Document,
    /// A plain-text transcript, one line per record.
    Text,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShareOptions {
    pub time_range: SharingTimeRange,
    /// Drop messages below this level. Tasks are always kept.
    pub min_level: Option<LogLevel>,
    pub output: ShareOutput,
    /// Embed request and response bodies in documents.
    pub include_blobs: bool,
}

impl Default for ShareOptions {
    fn default() -> Self {
        Self {
            time_range: SharingTimeRange::default(),
            min_level: None,
            output: ShareOutput::default(),
            include_blobs: true,
        }
    }
}

impl ShareOptions {
    /// Criteria selecting the shared records as of `now`.
    pub fn criteria(&self, now: Timestamp) -> Criteria {
        let mut criteria = Criteria::all().with_order(SortOrder::OldestFirst);
        criteria.dates = match self.time_range {
            SharingTimeRange::CurrentSession => DatesFacet::session(),
            SharingTimeRange::LastHour => {
                DatesFacet::between(Some(now - ChronoDuration::hours(1)), None)
            }
            SharingTimeRange::Today => DatesFacet::today(now),
            SharingTimeRange::All => DatesFacet::default(),
        };
        if let Some(level) = self.min_level {
            criteria = criteria.with_levels(level.and_above());
        }
        criteria
    }
}

/// Write the records matching `criteria` as text, oldest first. Returns the
/// number of lines written.
pub(crate) fn write_text(
    store: &EntityStore,
    criteria: &Criteria,
    out: &mut impl Write,
    cancel: &CancelFlag,
) -> SdkResult<usize> {
    let ids = store.query(criteria)?;
    let mut lines = 0;
    for id in &ids {
        if cancel.is_cancelled() {
            return Err(SdkError::Store(lantern_store::StoreError::Cancelled));
        }
        match store.fetch(id) {
            Ok(Entity::Message(message)) => write_message(out, &message)?,
            Ok(Entity::Task(task)) => write_task(out, &task)?,
            // Pruned between the query and the fetch.
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e.into()),
        }
        lines += 1;
    }
    out.flush()?;
    Ok(lines)
}

fn write_message(out: &mut impl Write, message: &Message) -> io::Result<()> {
    writeln!(
        out,
        "{} [{}] {}: {}",
        message.created_at.format("%Y-%m-%d %H:%M:%S%.3f"),
        message.level,
        message.label,
        message.text
    )
}

fn write_task(out: &mut impl Write, task: &NetworkTask) -> io::Result<()> {
    write!(
        out,
        "{} [network] {} {}",
        task.created_at.format("%Y-%m-%d %H:%M:%S%.3f"),
        task.method,
        task.url
    )?;
    if let Some(code) = task.status_code {
        write!(out, " {code}")?;
    }
    if let Some(duration) = task.duration {
        write!(out, " {}ms", duration.as_millis())?;
    }
    if let Some(error) = &task.error {
        write!(out, " error {} {}: {}", error.domain, error.code, error.description)?;
    }
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use lantern_criteria::{compile, MatchContext};
    use lantern_store::{StoreWriter, TaskOutcome, TaskUpdate};
    use lantern_types::{Metadata, SessionId};

    #[test]
    fn time_ranges_map_to_date_facets() {
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 15, 30, 0).unwrap();
        let session = ShareOptions::default().criteria(now);
        assert!(session.dates.current_session_only);
        assert_eq!(session.order, SortOrder::OldestFirst);

        let hour = ShareOptions {
            time_range: SharingTimeRange::LastHour,
            ..ShareOptions::default()
        }
        .criteria(now);
        assert_eq!(hour.dates.start, Some(Utc.with_ymd_and_hms(2026, 3, 4, 14, 30, 0).unwrap()));

        let today = ShareOptions {
            time_range: SharingTimeRange::Today,
            ..ShareOptions::default()
        }
        .criteria(now);
        assert_eq!(today.dates.start, Some(Utc.with_ymd_and_hms(2026, 3, 4, 0, 0, 0).unwrap()));

        let all = ShareOptions {
            time_range: SharingTimeRange::All,
            ..ShareOptions::default()
        }
        .criteria(now);
        assert!(!all.dates.current_session_only);
        assert_eq!(all.dates.start, None);
    }

    #[test]
    fn min_level_filters_messages_only() {
        let criteria = ShareOptions {
            min_level: Some(LogLevel::Warning),
            time_range: SharingTimeRange::All,
            ..ShareOptions::default()
        }
        .criteria(Utc::now());
        let plan = compile(&criteria).unwrap();
        let session = SessionId::new();
        let ctx = MatchContext::new(Some(session));
        let info = Entity::Message(
            Message::new(session, Utc::now(), "app", LogLevel::Info, "hi").into(),
        );
        let error = Entity::Message(
            Message::new(session, Utc::now(), "app", LogLevel::Error, "bad").into(),
        );
        let task = Entity::Task(NetworkTask::new(session, Utc::now(), "GET", "https://a.io").into());
        assert!(!plan.matches(&info, &ctx));
        assert!(plan.matches(&error, &ctx));
        assert!(plan.matches(&task, &ctx));
    }

    #[test]
    fn text_lists_records_oldest_first() {
        let store = EntityStore::in_memory();
        let session = store.create_session(Metadata::new()).unwrap();
        store
            .insert_message(Message::new(session.id, Utc::now(), "auth", LogLevel::Info, "signed in"))
            .unwrap();
        let task = store
            .insert_task(NetworkTask::new(session.id, Utc::now(), "GET", "https://api.example.com/me"))
            .unwrap();
        store
            .update_task(
                &task.id,
                TaskUpdate {
                    status_code: Some(200),
                    ..TaskUpdate::complete(TaskOutcome::Success, Utc::now())
                },
            )
            .unwrap();

        let criteria = ShareOptions::default().criteria(Utc::now());
        let mut out = Vec::new();
        let lines = write_text(&store, &criteria, &mut out, &CancelFlag::new()).unwrap();
        assert_eq!(lines, 2);
        let text = String::from_utf8(out).unwrap();
        let rows: Vec<&str> = text.lines().collect();
        assert!(rows[0].ends_with("[info] auth: signed in"));
        assert!(rows[1].contains("[network] GET https://api.example.com/me 200"));
    }

    #[test]
    fn cancelled_text_share_stops() {
        let store = EntityStore::in_memory();
        let session = store.create_session(Metadata::new()).unwrap();
        store
            .insert_message(Message::new(session.id, Utc::now(), "app", LogLevel::Info, "x"))
            .unwrap();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let mut out = Vec::new();
        assert!(matches!(
            write_text(&store, &Criteria::all(), &mut out, &cancel),
            Err(SdkError::Store(lantern_store::StoreError::Cancelled))
        ));
    }
}
