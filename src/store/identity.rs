//! Message identity resolution.
//!
//! Records are addressed by their Discord message id. Records archived before
//! ids were stored are addressed by a [`LegacyKey`] until an incoming message
//! matches them, at which point they are promoted to their message id and the
//! legacy key is retired.

use std::collections::{HashMap, VecDeque};

use tracing::warn;

use crate::model::{
    format_timestamp, normalize_timestamp, ChannelScope, ConversationScope, Record,
    SourceMessage,
};

/// Composite identity of a record that has no message id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LegacyKey {
    guild: String,
    category: String,
    channel: String,
    thread: String,
    author: String,
    created_at: String,
    content: String,
}

impl LegacyKey {
    pub fn for_message(scope: &ConversationScope, message: &SourceMessage) -> Self {
        Self {
            guild: scope.channel.guild_name.clone(),
            category: scope.channel.category_name.clone(),
            channel: scope.channel.channel_name.clone(),
            thread: scope.thread_name.clone().unwrap_or_default(),
            author: message.author.clone(),
            created_at: format_timestamp(&message.created_at),
            content: message.content.clone(),
        }
    }

    /// Key of a persisted record, scoped by the names stored in its document.
    pub fn for_record(scope: &ChannelScope, record: &Record) -> Self {
        Self {
            guild: scope.guild_name.clone(),
            category: scope.category_name.clone(),
            channel: scope.channel_name.clone(),
            thread: record.thread.clone().unwrap_or_default(),
            author: record.author.clone(),
            created_at: normalize_timestamp(&record.created_at),
            content: record.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    MessageId(String),
    Legacy(LegacyKey),
}

impl Identity {
    pub fn of_record(scope: &ChannelScope, record: &Record) -> Self {
        if record.message_id.is_empty() {
            Self::Legacy(LegacyKey::for_record(scope, record))
        } else {
            Self::MessageId(record.message_id.clone())
        }
    }
}

/// How an incoming message was matched to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Already archived under its message id.
    Existing,
    /// A legacy record promoted to the message's id.
    Reconciled,
    /// First sighting; a record was appended.
    Created,
}

impl Resolution {
    pub fn is_new(self) -> bool {
        self == Self::Created
    }
}

/// An ordered list of records of one kind, with identity indices kept in step
/// with the list. Positions are stable since records are only ever appended.
#[derive(Debug, Default)]
pub struct RecordSet {
    records: Vec<Record>,
    by_message_id: HashMap<String, usize>,
    by_legacy: HashMap<LegacyKey, VecDeque<usize>>,
}

impl RecordSet {
    /// Indexes persisted records. A repeated message id is folded into the
    /// first record carrying it.
    pub fn from_records(scope: &ChannelScope, records: Vec<Record>) -> Self {
        let mut set = Self::default();
        for record in records {
            match Identity::of_record(scope, &record) {
                Identity::MessageId(id) => {
                    if let Some(&pos) = set.by_message_id.get(&id) {
                        warn!("Duplicate archived message {} folded into earlier entry", id);
                        merge_attachments(&mut set.records[pos], record);
                        continue;
                    }
                    set.push(record, Identity::MessageId(id));
                }
                legacy @ Identity::Legacy(_) => {
                    set.push(record, legacy);
                }
            }
        }
        set
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Finds the record backing `message`, promoting a legacy record or
    /// appending a new one as needed. A known message id always wins over a
    /// legacy match.
    pub fn resolve(
        &mut self,
        scope: &ConversationScope,
        message: &SourceMessage,
    ) -> (&mut Record, Resolution) {
        if !message.id.is_empty() {
            if let Some(&pos) = self.by_message_id.get(&message.id) {
                return (&mut self.records[pos], Resolution::Existing);
            }
        }

        let key = LegacyKey::for_message(scope, message);
        if let Some(pos) = self.take_legacy(&key) {
            if message.id.is_empty() {
                // Nothing to promote to; the record stays legacy-addressed.
                self.by_legacy.entry(key).or_default().push_front(pos);
                return (&mut self.records[pos], Resolution::Existing);
            }
            self.by_message_id.insert(message.id.clone(), pos);
            let record = &mut self.records[pos];
            record.message_id = message.id.clone();
            record.author = message.author.clone();
            record.content = message.content.clone();
            record.created_at = format_timestamp(&message.created_at);
            record.thread = scope.thread_name.clone();
            return (record, Resolution::Reconciled);
        }

        let identity = if message.id.is_empty() {
            Identity::Legacy(key)
        } else {
            Identity::MessageId(message.id.clone())
        };
        let pos = self.push(Record::from_message(scope, message), identity);
        (&mut self.records[pos], Resolution::Created)
    }

    /// Merges a record from another copy of the same channel's document.
    /// Returns `true` when it was appended rather than folded into an
    /// existing record.
    pub fn absorb(&mut self, scope: &ChannelScope, record: Record) -> bool {
        if !record.message_id.is_empty() {
            if let Some(&pos) = self.by_message_id.get(&record.message_id) {
                merge_attachments(&mut self.records[pos], record);
                return false;
            }
        }

        let key = LegacyKey::for_record(scope, &record);
        if let Some(pos) = self.take_legacy(&key) {
            if record.message_id.is_empty() {
                self.by_legacy.entry(key).or_default().push_front(pos);
            } else {
                self.by_message_id.insert(record.message_id.clone(), pos);
                self.records[pos].message_id = record.message_id.clone();
            }
            merge_attachments(&mut self.records[pos], record);
            return false;
        }

        let identity = Identity::of_record(scope, &record);
        self.push(record, identity);
        true
    }

    fn push(&mut self, record: Record, identity: Identity) -> usize {
        let pos = self.records.len();
        self.records.push(record);
        match identity {
            Identity::MessageId(id) => {
                self.by_message_id.insert(id, pos);
            }
            Identity::Legacy(key) => self.by_legacy.entry(key).or_default().push_back(pos),
        }
        pos
    }

    fn take_legacy(&mut self, key: &LegacyKey) -> Option<usize> {
        let queue = self.by_legacy.get_mut(key)?;
        let pos = queue.pop_front();
        if queue.is_empty() {
            self.by_legacy.remove(key);
        }
        pos
    }
}

fn merge_attachments(target: &mut Record, source: Record) {
    for attachment in source.attachments {
        if !target.attachments.iter().any(|a| a.id == attachment.id) {
            target.attachments.push(attachment);
        }
    }
}
