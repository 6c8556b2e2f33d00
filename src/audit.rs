//! Event log records and reconstruction of a document's history across its versions
use chrono::Utc;

use crate::document::Document;
use crate::types::{DocumentId, EventId, TimeStamp, UserId};

/// One message on a document's event log. Bodies may carry light HTML markup.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Event {
    #[n(0)]
    pub id: EventId,
    #[n(1)]
    pub document_id: DocumentId,
    #[n(2)]
    pub author: UserId,
    #[n(3)]
    pub date: TimeStamp<Utc>,
    #[n(4)]
    pub body: String,
}

impl Event {
    pub fn new(document_id: DocumentId, author: UserId, date: TimeStamp<Utc>, body: String) -> Self {
        Self {
            id: EventId::generate(),
            document_id,
            author,
            date,
            body,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Reject,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrailEntry {
    pub date: TimeStamp<Utc>,
    pub version: String,
    pub actor: UserId,
    pub action: String,
    pub kind: EntryKind,
}

/// Lower-case phrase lists driving noise filtering and classification.
#[derive(Debug, Clone, Copy)]
pub struct TrailRules<'a> {
    pub noise_patterns: &'a [String],
    pub rejection_phrases: &'a [String],
}

/// History of a document, newest entry first. Iterate it as often as needed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditTrail {
    entries: Vec<TrailEntry>,
}

impl AuditTrail {
    pub fn iter(&self) -> std::slice::Iter<'_, TrailEntry> {
        self.entries.iter()
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a AuditTrail {
    type Item = &'a TrailEntry;
    type IntoIter = std::slice::Iter<'a, TrailEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Drops tags, decodes the common entities and collapses whitespace.
pub fn clean_markup(body: &str) -> String {
    let mut text = String::with_capacity(body.len());
    let mut in_tag = false;
    for c in body.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                text.push(' ');
            }
            _ if in_tag => {}
            _ => text.push(c),
        }
    }
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn mentions(text: &str, phrases: &[String]) -> bool {
    let lower = text.to_lowercase();
    phrases.iter().any(|p| lower.contains(&p.to_lowercase()))
}

pub fn classify(text: &str, rules: TrailRules<'_>) -> EntryKind {
    if mentions(text, rules.rejection_phrases) {
        EntryKind::Reject
    } else {
        EntryKind::Info
    }
}

/// Merges the logs of every version into one trail, newest first.
///
/// Entries that are empty after cleaning or that match a noise pattern are omitted.
pub fn build_trail<'d>(
    versions: impl IntoIterator<Item = (&'d Document, Vec<Event>)>,
    rules: TrailRules<'_>,
) -> AuditTrail {
    let mut keyed: Vec<(EventId, TrailEntry)> = versions
        .into_iter()
        .flat_map(|(doc, events)| {
            events.into_iter().filter_map(move |event| {
                let action = clean_markup(&event.body);
                if action.is_empty() || mentions(&action, rules.noise_patterns) {
                    return None;
                }
                let entry = TrailEntry {
                    date: event.date,
                    version: doc.version.clone(),
                    actor: event.author,
                    kind: classify(&action, rules),
                    action,
                };
                Some((event.id, entry))
            })
        })
        .collect();

    // event ids are time-ordered, which breaks ties between events of one commit
    keyed.sort_by(|(a_id, a), (b_id, b)| b.date.cmp(&a.date).then_with(|| b_id.cmp(a_id)));
    let entries = keyed.into_iter().map(|(_, entry)| entry).collect();
    AuditTrail { entries }
}
