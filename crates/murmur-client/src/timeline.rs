//! Rendering a conversation's messages into a UI-ready timeline.
//!
//! A message exists in up to two copies: the optimistic [`PendingMessage`]
//! the sender shows right away, and the [`ConfirmedMessage`] decoded from
//! the store.  [`reconcile`] collapses the pair, [`order_entries`] and
//! [`group_by_day`] lay the survivors out.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use tracing::debug;

use murmur_shared::constants::{EMPTY_BODY_PLACEHOLDER, UNDECRYPTABLE_PLACEHOLDER};
use murmur_shared::crypto::decrypt_message;
use murmur_shared::keys::SymmetricKey;
use murmur_shared::types::{ConversationId, MessageId, SortDirection, UserId};
use murmur_store::MessageDoc;

/// Identifier of an optimistic entry.  Never collides with store ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(u64);

impl LocalId {
    pub(crate) fn new(n: u64) -> Self {
        Self(n)
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local-{}", self.0)
    }
}

/// A message the local user sent that the store has not echoed back yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub local_id: LocalId,
    pub sender: UserId,
    /// Plaintext, never ciphertext.
    pub text: String,
    /// Local clock at send time.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Decrypted(String),
    /// Legacy record stored without encryption.
    Plain(String),
    Undecryptable,
}

impl MessageBody {
    pub fn text(&self) -> &str {
        match self {
            MessageBody::Decrypted(text) | MessageBody::Plain(text) => text.as_str(),
            MessageBody::Undecryptable => UNDECRYPTABLE_PLACEHOLDER,
        }
    }

    /// The text a sender could have typed, if known.
    pub fn readable_text(&self) -> Option<&str> {
        match self {
            MessageBody::Decrypted(text) | MessageBody::Plain(text) => Some(text.as_str()),
            MessageBody::Undecryptable => None,
        }
    }

    pub fn is_decrypted(&self) -> bool {
        !matches!(self, MessageBody::Undecryptable)
    }
}

/// A message as stored, decoded for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedMessage {
    pub id: MessageId,
    pub sender: UserId,
    pub timestamp: Option<DateTime<Utc>>,
    pub body: MessageBody,
}

impl ConfirmedMessage {
    /// Decode one record.  A failure only affects this record.
    pub fn from_doc(doc: MessageDoc, key: Option<&SymmetricKey>) -> Self {
        let body = if doc.encrypted {
            match (key, doc.nonce.as_deref()) {
                (Some(key), Some(nonce)) => match decrypt_message(&doc.text, key, nonce) {
                    Ok(plaintext) => MessageBody::Decrypted(plaintext),
                    Err(e) => {
                        debug!(message = %doc.id, error = %e, "Message could not be decrypted");
                        MessageBody::Undecryptable
                    }
                },
                _ => MessageBody::Undecryptable,
            }
        } else if doc.text.is_empty() {
            MessageBody::Plain(EMPTY_BODY_PLACEHOLDER.to_string())
        } else {
            MessageBody::Plain(doc.text)
        };

        Self {
            id: doc.id,
            sender: doc.sender_id,
            timestamp: doc.timestamp,
            body,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEntry {
    Pending(PendingMessage),
    Confirmed(ConfirmedMessage),
}

impl TimelineEntry {
    pub fn sender(&self) -> &UserId {
        match self {
            TimelineEntry::Pending(p) => &p.sender,
            TimelineEntry::Confirmed(c) => &c.sender,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            TimelineEntry::Pending(p) => &p.text,
            TimelineEntry::Confirmed(c) => c.body.text(),
        }
    }

    /// Server timestamp; `None` while sending.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            TimelineEntry::Pending(_) => None,
            TimelineEntry::Confirmed(c) => c.timestamp,
        }
    }

    pub fn is_decrypted(&self) -> bool {
        match self {
            TimelineEntry::Pending(_) => true,
            TimelineEntry::Confirmed(c) => c.body.is_decrypted(),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, TimelineEntry::Pending(_))
    }

    /// Stable key for list rendering.
    pub fn key(&self) -> String {
        match self {
            TimelineEntry::Pending(p) => p.local_id.to_string(),
            TimelineEntry::Confirmed(c) => c.id.to_string(),
        }
    }
}

/// Output of [`reconcile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub entries: Vec<TimelineEntry>,
    /// Pending entries absorbed by a confirmed copy; safe to forget.
    pub superseded: Vec<LocalId>,
}

/// Merge confirmed records with outstanding optimistic entries.
///
/// A pending entry and a confirmed entry are the same message when sender and
/// readable text match and the confirmed one carries a server timestamp no
/// older than `created_at - window`.  Matching is one-to-one: each pending
/// entry claims the earliest eligible confirmed entry not already claimed,
/// so sending the same text twice keeps both.
pub fn reconcile(confirmed: Vec<ConfirmedMessage>, pending: &[PendingMessage], window: Duration) -> Reconciled {
    let mut claimed = vec![false; confirmed.len()];
    let mut superseded = Vec::new();
    let mut unmatched = Vec::new();

    for p in pending {
        let not_before = p
            .created_at
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let candidate = confirmed
            .iter()
            .enumerate()
            .filter(|(i, c)| {
                !claimed[*i]
                    && c.sender == p.sender
                    && c.body.readable_text() == Some(p.text.as_str())
                    && c.timestamp.is_some_and(|ts| ts >= not_before)
            })
            .min_by_key(|(_, c)| c.timestamp)
            .map(|(i, _)| i);

        match candidate {
            Some(i) => {
                claimed[i] = true;
                superseded.push(p.local_id);
            }
            None => unmatched.push(TimelineEntry::Pending(p.clone())),
        }
    }

    let mut entries: Vec<TimelineEntry> = confirmed.into_iter().map(TimelineEntry::Confirmed).collect();
    entries.extend(unmatched);
    Reconciled { entries, superseded }
}

/// Order entries by server timestamp.  Entries without one stay in their
/// given order after every timestamped entry in ascending mode, and before
/// them in descending mode.
pub fn order_entries(entries: Vec<TimelineEntry>, direction: SortDirection) -> Vec<TimelineEntry> {
    let (mut timed, untimed): (Vec<_>, Vec<_>) = entries.into_iter().partition(|e| e.timestamp().is_some());
    timed.sort_by_key(TimelineEntry::timestamp);
    timed.extend(untimed);
    if direction == SortDirection::Descending {
        timed.reverse();
    }
    timed
}

/// How a day bucket is headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayLabel {
    Today,
    Yesterday,
    Date(NaiveDate),
}

impl fmt::Display for DayLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DayLabel::Today => write!(f, "Today"),
            DayLabel::Yesterday => write!(f, "Yesterday"),
            DayLabel::Date(date) => write!(f, "{}", date.format("%A, %B %-d, %Y")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayBucket {
    pub date: NaiveDate,
    pub entries: Vec<TimelineEntry>,
}

impl DayBucket {
    pub fn label(&self, today: NaiveDate) -> DayLabel {
        if self.date == today {
            DayLabel::Today
        } else if self.date.succ_opt() == Some(today) {
            DayLabel::Yesterday
        } else {
            DayLabel::Date(self.date)
        }
    }
}

/// Bucket entries by calendar date in `tz`.
///
/// Entries without a timestamp join the most recent bucket, or start one
/// dated `today` when there is none.  Buckets and their entries follow
/// `direction`.
pub fn group_by_day<Tz: TimeZone>(
    entries: Vec<TimelineEntry>,
    direction: SortDirection,
    tz: &Tz,
    today: NaiveDate,
) -> Vec<DayBucket> {
    let mut days: Vec<DayBucket> = Vec::new();

    for entry in order_entries(entries, SortDirection::Ascending) {
        let date = match entry.timestamp() {
            Some(ts) => ts.with_timezone(tz).date_naive(),
            None => days.last().map_or(today, |d| d.date),
        };
        match days.last_mut() {
            Some(bucket) if bucket.date == date => bucket.entries.push(entry),
            _ => days.push(DayBucket {
                date,
                entries: vec![entry],
            }),
        }
    }

    if direction == SortDirection::Descending {
        days.reverse();
        for day in &mut days {
            day.entries.reverse();
        }
    }
    days
}

/// A rendered conversation, ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeline {
    pub conversation_id: ConversationId,
    pub direction: SortDirection,
    /// Increases with every render of the same stream.
    pub revision: u64,
    pub days: Vec<DayBucket>,
}

impl Timeline {
    pub fn entries(&self) -> impl Iterator<Item = &TimelineEntry> {
        self.days.iter().flat_map(|d| d.entries.iter())
    }

    pub fn len(&self) -> usize {
        self.days.iter().map(|d| d.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.days.iter().all(|d| d.entries.is_empty())
    }

    pub fn pending_count(&self) -> usize {
        self.entries().filter(|e| e.is_pending()).count()
    }
}
