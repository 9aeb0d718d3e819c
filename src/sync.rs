//! The archive run: walks every guild, channel and thread the bot can see and
//! folds their history into the per-channel documents.
//!
//! Traversal is strictly sequential. A failing conversation is skipped after
//! a cooldown and never aborts the run.

use std::fmt;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::{Config, DEFAULT_SURVEY_KEYWORD};
use crate::media::{AttachmentMaterializer, Downloader};
use crate::model::{ChannelScope, ConversationScope, RecordKind, SourceMessage};
use crate::source::{ChannelRef, ChatSource, GuildRef, SourceError, ThreadVisibility};
use crate::store::identity::Resolution;
use crate::store::{DocumentId, StateStore};

/// Category name recorded for channels outside any category.
pub const NO_CATEGORY: &str = "（カテゴリなし）";

const PREVIEW_CHARS: usize = 60;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub survey_keyword: String,
    /// Pause after each conversation.
    pub conversation_pause: Duration,
    /// Pause after a conversation fails.
    pub error_cooldown: Duration,
    pub fetch_retry_backoff: Duration,
    pub max_fetch_retries: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            survey_keyword: DEFAULT_SURVEY_KEYWORD.to_string(),
            conversation_pause: Duration::from_millis(250),
            error_cooldown: Duration::from_secs(1),
            fetch_retry_backoff: Duration::from_secs(2),
            max_fetch_retries: 3,
        }
    }
}

impl From<&Config> for SyncOptions {
    fn from(config: &Config) -> Self {
        Self {
            survey_keyword: config.survey_keyword.clone(),
            conversation_pause: config.conversation_pause,
            error_cooldown: config.error_cooldown,
            fetch_retry_backoff: config.fetch_retry_backoff,
            max_fetch_retries: config.max_fetch_retries,
        }
    }
}

/// Surveys carry the keyword; other messages are kept only for their
/// attachments.
pub fn classify(message: &SourceMessage, survey_keyword: &str) -> Option<RecordKind> {
    if message.content.contains(survey_keyword) {
        Some(RecordKind::Survey)
    } else if !message.attachments.is_empty() {
        Some(RecordKind::Asset)
    } else {
        None
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub total_surveys: usize,
    pub total_assets: usize,
    pub conversations: usize,
    pub failed_conversations: usize,
    pub created: usize,
    pub reconciled: usize,
    pub attachments_downloaded: usize,
    pub attachments_failed: usize,
    pub documents_written: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} surveys, {} assets archived ({} new, {} reconciled); \
             {} conversations ({} failed); {} attachments downloaded ({} failed); \
             {} files written",
            self.total_surveys,
            self.total_assets,
            self.created,
            self.reconciled,
            self.conversations,
            self.failed_conversations,
            self.attachments_downloaded,
            self.attachments_failed,
            self.documents_written
        )
    }
}

pub struct Archiver<S, D> {
    source: S,
    store: StateStore,
    materializer: AttachmentMaterializer<D>,
    options: SyncOptions,
    summary: RunSummary,
}

impl<S: ChatSource, D: Downloader> Archiver<S, D> {
    pub fn new(
        source: S,
        store: StateStore,
        materializer: AttachmentMaterializer<D>,
        options: SyncOptions,
    ) -> Self {
        Self {
            source,
            store,
            materializer,
            options,
            summary: RunSummary::default(),
        }
    }

    /// Archives every visible guild, then saves every touched document again.
    pub async fn run(&mut self) -> RunSummary {
        let guilds = match self.source.guilds().await {
            Ok(guilds) => guilds,
            Err(e) => {
                error!("Failed to list guilds: {}", e);
                Vec::new()
            }
        };

        for guild in &guilds {
            info!("Guild: {}", guild.name);
            let channels = match self.source.text_channels(guild).await {
                Ok(channels) => channels,
                Err(e) => {
                    warn!("Skipping guild {}: cannot list channels: {}", guild.name, e);
                    continue;
                }
            };
            for channel in &channels {
                self.archive_channel(guild, channel).await;
            }
        }

        self.finish()
    }

    /// Archives a channel and all of its threads, then saves its document.
    pub async fn archive_channel(&mut self, guild: &GuildRef, channel: &ChannelRef) {
        let scope = ChannelScope {
            guild_name: guild.name.clone(),
            guild_id: guild.id.clone(),
            category_name: channel
                .category
                .clone()
                .unwrap_or_else(|| NO_CATEGORY.to_string()),
            channel_name: channel.name.clone(),
            channel_id: channel.id.clone(),
        };
        info!("  - [{}] #{}", scope.category_name, scope.channel_name);
        let doc = self.store.find_or_create(&scope);

        self.archive_conversation(doc, ConversationScope::channel(scope.clone()), &channel.id)
            .await;

        match self.source.active_threads(guild, channel).await {
            Ok(threads) => {
                for thread in threads {
                    info!("    thread: {}", thread.name);
                    let conversation = ConversationScope::thread(scope.clone(), &thread.name);
                    self.archive_conversation(doc, conversation, &thread.id).await;
                }
            }
            Err(e) => warn!("    Cannot list threads of #{}: {}", channel.name, e),
        }

        for visibility in [ThreadVisibility::Public, ThreadVisibility::Private] {
            let threads = match self.source.archived_threads(channel, visibility).await {
                Ok(threads) => threads,
                Err(SourceError::Forbidden) if visibility == ThreadVisibility::Private => {
                    warn!("    No access to private threads of #{}", channel.name);
                    continue;
                }
                Err(e) => {
                    warn!(
                        "    Cannot list archived {:?} threads of #{}: {}",
                        visibility, channel.name, e
                    );
                    continue;
                }
            };
            for thread in threads {
                info!("    thread (archived, {:?}): {}", visibility, thread.name);
                let conversation = ConversationScope::thread(scope.clone(), &thread.name);
                self.archive_conversation(doc, conversation, &thread.id).await;
            }
        }

        if let Err(e) = self.store.persist(doc) {
            error!("Failed to save archive for #{}: {}", channel.name, e);
        }
    }

    async fn archive_conversation(
        &mut self,
        doc: DocumentId,
        scope: ConversationScope,
        conversation_id: &str,
    ) {
        self.summary.conversations += 1;
        match self.traverse(doc, &scope, conversation_id).await {
            Ok(seen) => {
                debug!("    {} messages read from {}", seen, conversation_id);
                tokio::time::sleep(self.options.conversation_pause).await;
            }
            Err(e) => {
                self.summary.failed_conversations += 1;
                match e {
                    SourceError::Forbidden => {
                        warn!("    Skipping {}: no access", conversation_id)
                    }
                    e => warn!("    Skipping {}: {}", conversation_id, e),
                }
                tokio::time::sleep(self.options.error_cooldown).await;
            }
        }
    }

    /// Reads a conversation oldest-first, page by page.
    async fn traverse(
        &mut self,
        doc: DocumentId,
        scope: &ConversationScope,
        conversation_id: &str,
    ) -> Result<usize, SourceError> {
        let mut cursor: Option<String> = None;
        let mut seen = 0usize;
        loop {
            let page = self.fetch_page(conversation_id, cursor.as_deref()).await?;
            let Some(last) = page.last() else { break };
            let next = last.id.clone();

            for message in &page {
                self.archive_message(doc, scope, message).await;
                seen += 1;
            }

            if next.is_empty() || cursor.as_deref() == Some(next.as_str()) {
                break;
            }
            cursor = Some(next);
        }
        Ok(seen)
    }

    async fn fetch_page(
        &self,
        conversation_id: &str,
        after: Option<&str>,
    ) -> Result<Vec<SourceMessage>, SourceError> {
        let mut attempt = 0u32;
        loop {
            match self.source.history_page(conversation_id, after).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() && attempt < self.options.max_fetch_retries => {
                    attempt += 1;
                    warn!(
                        "    Fetch from {} failed ({}), retry {}/{}",
                        conversation_id, e, attempt, self.options.max_fetch_retries
                    );
                    tokio::time::sleep(self.options.fetch_retry_backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn archive_message(
        &mut self,
        doc: DocumentId,
        scope: &ConversationScope,
        message: &SourceMessage,
    ) {
        let Some(kind) = classify(message, &self.options.survey_keyword) else {
            return;
        };

        let (record, resolution) = self.store.get_mut(doc).resolve(kind, scope, message);
        let stats = self
            .materializer
            .materialize(record, &message.attachments)
            .await;
        self.summary.attachments_downloaded += stats.downloaded;
        self.summary.attachments_failed += stats.failed;

        match resolution {
            Resolution::Created => {
                self.summary.created += 1;
                match kind {
                    RecordKind::Survey => {
                        info!("    → {}: {}", message.author, preview(&message.content))
                    }
                    RecordKind::Asset => {
                        info!("    ◎ asset from {} ({})", message.author, message.id)
                    }
                }
            }
            Resolution::Reconciled => {
                self.summary.reconciled += 1;
                info!(
                    "    ↺ linked archived {} to message {} by {}",
                    kind.as_str(),
                    message.id,
                    message.author
                );
            }
            Resolution::Existing => {
                debug!(
                    "    ↺ {} {} already archived",
                    kind.as_str(),
                    message.id
                );
            }
        }
    }

    fn finish(&mut self) -> RunSummary {
        self.summary.documents_written = self.store.persist_touched();
        let (surveys, assets) = self.store.totals();
        self.summary.total_surveys = surveys;
        self.summary.total_assets = assets;
        info!(
            "Archive complete: {} -> {}",
            self.summary,
            self.store.root().display()
        );
        self.summary.clone()
    }
}

fn preview(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or_default();
    if first_line.chars().count() > PREVIEW_CHARS {
        let head: String = first_line.chars().take(PREVIEW_CHARS - 3).collect();
        format!("{}...", head)
    } else {
        first_line.to_string()
    }
}
