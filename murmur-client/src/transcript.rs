//! In-memory, ordered view of one conversation.
//!
//! Holds optimistic local entries next to durable rows and reconciles the two:
//! each local send is matched to its durable row exactly once, first by
//! correlation id and otherwise by sender, content and time proximity.

use tracing::debug;

use crate::models::Message;

/// Heuristic matching window between a local entry and a durable row
pub const DEFAULT_MATCH_WINDOW_MS: i64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    /// Shown locally, durable write not confirmed yet
    Pending,
    /// Backed by a durable row
    Confirmed,
    /// Durable write failed; can be retried
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Durable id, once known
    pub id: Option<String>,
    /// Correlation id of a local send
    pub client_msg_id: Option<String>,
    pub sender_id: String,
    pub content: String,
    /// Client clock while pending, store clock once confirmed
    pub created_at: i64,
    pub status: EntryStatus,
    arrival: u64,
}

impl Entry {
    pub fn is_pending(&self) -> bool {
        self.status == EntryStatus::Pending
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, EntryStatus::Failed(_))
    }

    fn is_unmatched(&self) -> bool {
        self.id.is_none() && self.client_msg_id.is_some()
    }

    fn confirm_with(&mut self, message: &Message) {
        self.id = Some(message.id.clone());
        self.created_at = message.created_at;
        self.status = EntryStatus::Confirmed;
    }
}

/// Result of merging a durable row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Merge {
    /// Row already displayed
    Duplicate,
    /// Row reconciled a local send
    Reconciled { client_msg_id: String },
    /// Row is new to this transcript
    Inserted,
}

#[derive(Debug)]
pub struct Transcript {
    entries: Vec<Entry>,
    next_arrival: u64,
    match_window_ms: i64,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    pub fn new() -> Self {
        Self::with_match_window(DEFAULT_MATCH_WINDOW_MS)
    }

    pub fn with_match_window(match_window_ms: i64) -> Self {
        Self {
            entries: Vec::new(),
            next_arrival: 0,
            match_window_ms,
        }
    }

    /// Entries in display order: `created_at`, then arrival
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, client_msg_id: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|e| e.client_msg_id.as_deref() == Some(client_msg_id))
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_pending()).count()
    }

    /// Correlation ids of every failed send, oldest first
    pub fn failed(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.is_failed())
            .filter_map(|e| e.client_msg_id.clone())
            .collect()
    }

    /// Add an optimistic entry and return its fresh correlation id
    pub fn push_pending(&mut self, sender_id: &str, content: &str, created_at: i64) -> String {
        let client_msg_id = uuid::Uuid::new_v4().to_string();
        let arrival = self.bump();
        self.entries.push(Entry {
            id: None,
            client_msg_id: Some(client_msg_id.clone()),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            created_at,
            status: EntryStatus::Pending,
            arrival,
        });
        self.sort();
        client_msg_id
    }

    /// Record the store's answer to the send identified by `client_msg_id`
    pub fn confirm(&mut self, client_msg_id: &str, message: &Message) -> Merge {
        if self.contains_id(&message.id) {
            return Merge::Duplicate;
        }
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.client_msg_id.as_deref() == Some(client_msg_id) && e.id.is_none())
        {
            entry.confirm_with(message);
            self.sort();
            return Merge::Reconciled {
                client_msg_id: client_msg_id.to_string(),
            };
        }
        // The entry was already matched to an identical row; place this one by content
        self.merge_uncorrelated(message)
    }

    /// Mark a pending send as failed. Confirmed entries are left alone.
    pub fn fail(&mut self, client_msg_id: &str, reason: &str) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|e| e.client_msg_id.as_deref() == Some(client_msg_id) && e.id.is_none())
        {
            Some(entry) => {
                entry.status = EntryStatus::Failed(reason.to_string());
                true
            }
            None => false,
        }
    }

    /// Move a failed send back to pending and return its content for re-sending
    pub fn retry(&mut self, client_msg_id: &str) -> Option<String> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.client_msg_id.as_deref() == Some(client_msg_id) && e.is_failed())?;
        entry.status = EntryStatus::Pending;
        Some(entry.content.clone())
    }

    /// Merge one durable row from the feed or from history
    pub fn merge(&mut self, message: &Message) -> Merge {
        if self.contains_id(&message.id) {
            return Merge::Duplicate;
        }

        if let Some(key) = message.client_msg_id.as_deref() {
            if let Some(entry) = self
                .entries
                .iter_mut()
                .find(|e| e.client_msg_id.as_deref() == Some(key) && e.id.is_none())
            {
                entry.confirm_with(message);
                self.sort();
                return Merge::Reconciled {
                    client_msg_id: key.to_string(),
                };
            }
            // Correlation id from another device of the same user
            self.insert(message);
            return Merge::Inserted;
        }

        self.merge_uncorrelated(message)
    }

    /// Merge a history page; returns how many rows were new or reconciled
    pub fn merge_history(&mut self, messages: &[Message]) -> usize {
        messages
            .iter()
            .filter(|m| self.merge(m) != Merge::Duplicate)
            .count()
    }

    /// Rows without a usable correlation id: match the oldest unmatched entry
    /// of the same sender with the same content inside the window.
    fn merge_uncorrelated(&mut self, message: &Message) -> Merge {
        let window = self.match_window_ms;
        let candidate = self
            .entries
            .iter_mut()
            .filter(|e| {
                e.is_unmatched()
                    && e.sender_id == message.sender_id
                    && e.content == message.content
                    && (e.created_at - message.created_at).abs() <= window
            })
            .min_by_key(|e| e.arrival);

        match candidate {
            Some(entry) => {
                let client_msg_id = entry.client_msg_id.clone().unwrap_or_default();
                debug!(message_id = %message.id, client_msg_id = %client_msg_id, "Matched by content");
                entry.confirm_with(message);
                self.sort();
                Merge::Reconciled { client_msg_id }
            }
            None => {
                self.insert(message);
                Merge::Inserted
            }
        }
    }

    fn insert(&mut self, message: &Message) {
        let arrival = self.bump();
        self.entries.push(Entry {
            id: Some(message.id.clone()),
            client_msg_id: message.client_msg_id.clone(),
            sender_id: message.sender_id.clone(),
            content: message.content.clone(),
            created_at: message.created_at,
            status: EntryStatus::Confirmed,
            arrival,
        });
        self.sort();
    }

    fn contains_id(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id.as_deref() == Some(id))
    }

    fn bump(&mut self) -> u64 {
        let arrival = self.next_arrival;
        self.next_arrival += 1;
        arrival
    }

    fn sort(&mut self) {
        self.entries.sort_by_key(|e| (e.created_at, e.arrival));
    }
}
