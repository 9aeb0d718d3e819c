//! The chat source the archiver reads from.

pub mod discord;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::SourceMessage;

pub use discord::DiscordSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRef {
    pub id: String,
    pub name: String,
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadVisibility {
    Public,
    Private,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid credentials")]
    Unauthorized,
    #[error("access denied")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("rate limited")]
    RateLimited,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("{0}")]
    Other(String),
}

impl SourceError {
    /// Worth retrying after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Transport(_))
    }
}

/// Read access to a guild/channel/thread hierarchy and its message history.
///
/// Threads are conversations in their own right: their ids are accepted by
/// [`ChatSource::history_page`] like channel ids.
#[async_trait]
pub trait ChatSource: Send + Sync {
    async fn guilds(&self) -> Result<Vec<GuildRef>, SourceError>;

    /// Text channels of a guild, in display order.
    async fn text_channels(&self, guild: &GuildRef) -> Result<Vec<ChannelRef>, SourceError>;

    async fn active_threads(
        &self,
        guild: &GuildRef,
        channel: &ChannelRef,
    ) -> Result<Vec<ThreadRef>, SourceError>;

    async fn archived_threads(
        &self,
        channel: &ChannelRef,
        visibility: ThreadVisibility,
    ) -> Result<Vec<ThreadRef>, SourceError>;

    /// The next page of messages strictly after `after` (or from the start
    /// of the conversation), oldest first. An empty page ends the history.
    async fn history_page(
        &self,
        conversation_id: &str,
        after: Option<&str>,
    ) -> Result<Vec<SourceMessage>, SourceError>;
}
