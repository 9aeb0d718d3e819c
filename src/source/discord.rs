use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serenity::all::{
    ChannelId, ChannelType, GetMessages, GuildChannel, GuildId, Message, MessageId, ThreadsData,
    User,
};
use serenity::http::{GuildPagination, Http, HttpError, LightMethod, Request, Route};
use tracing::{debug, warn};

use super::{ChannelRef, ChatSource, GuildRef, SourceError, ThreadRef, ThreadVisibility};
use crate::model::{SourceAttachment, SourceMessage};

/// Discord's maximum page size for message history.
const HISTORY_PAGE_SIZE: u8 = 100;
const GUILD_PAGE_SIZE: u64 = 200;
const ARCHIVED_THREAD_PAGE_SIZE: u64 = 100;
/// 2015-01-01T00:00:00Z, the start of Discord snowflake time.
const DISCORD_EPOCH_MS: u64 = 1_420_070_400_000;

/// [`ChatSource`] over Discord's REST API. No gateway connection is opened.
pub struct DiscordSource {
    http: Arc<Http>,
}

impl DiscordSource {
    pub fn new(token: &str) -> Self {
        Self {
            http: Arc::new(Http::new(token)),
        }
    }

    /// Checks the token by fetching the bot user; returns its tag.
    pub async fn current_user(&self) -> Result<String, SourceError> {
        let user = self.http.get_current_user().await?;
        Ok(format!("{} ({})", author_tag(&user), user.id))
    }
}

#[async_trait]
impl ChatSource for DiscordSource {
    async fn guilds(&self) -> Result<Vec<GuildRef>, SourceError> {
        let mut guilds = Vec::new();
        let mut after: Option<GuildId> = None;
        loop {
            let page = self
                .http
                .get_guilds(after.map(GuildPagination::After), Some(GUILD_PAGE_SIZE))
                .await?;
            let Some(last) = page.last() else { break };
            after = Some(last.id);
            let full_page = page.len() as u64 >= GUILD_PAGE_SIZE;
            guilds.extend(page.into_iter().map(|g| GuildRef {
                id: g.id.to_string(),
                name: g.name,
            }));
            if !full_page {
                break;
            }
        }
        Ok(guilds)
    }

    async fn text_channels(&self, guild: &GuildRef) -> Result<Vec<ChannelRef>, SourceError> {
        let guild_id = GuildId::new(parse_snowflake(&guild.id)?);
        let channels = guild_id.channels(&self.http).await?;

        let categories: HashMap<ChannelId, String> = channels
            .values()
            .filter(|c| c.kind == ChannelType::Category)
            .map(|c| (c.id, c.name.clone()))
            .collect();

        let mut text: Vec<&GuildChannel> = channels
            .values()
            .filter(|c| matches!(c.kind, ChannelType::Text | ChannelType::News))
            .collect();
        text.sort_by_key(|c| (c.position, c.id));

        Ok(text
            .into_iter()
            .map(|c| ChannelRef {
                id: c.id.to_string(),
                name: c.name.clone(),
                category: c.parent_id.and_then(|p| categories.get(&p).cloned()),
            })
            .collect())
    }

    async fn active_threads(
        &self,
        guild: &GuildRef,
        channel: &ChannelRef,
    ) -> Result<Vec<ThreadRef>, SourceError> {
        let guild_id = GuildId::new(parse_snowflake(&guild.id)?);
        let parent = ChannelId::new(parse_snowflake(&channel.id)?);
        let data = guild_id.get_active_threads(&self.http).await?;
        Ok(data
            .threads
            .into_iter()
            .filter(|t| t.parent_id == Some(parent))
            .map(thread_ref)
            .collect())
    }

    async fn archived_threads(
        &self,
        channel: &ChannelRef,
        visibility: ThreadVisibility,
    ) -> Result<Vec<ThreadRef>, SourceError> {
        let channel_id = ChannelId::new(parse_snowflake(&channel.id)?);
        let http = &self.http;
        let threads = collect_archived_threads(&channel.name, move |before| async move {
            let route = match visibility {
                ThreadVisibility::Public => Route::ChannelArchivedPublicThreads { channel_id },
                ThreadVisibility::Private => Route::ChannelArchivedPrivateThreads { channel_id },
            };
            // serenity's typed helpers take a snowflake `before`, but these
            // endpoints page by archive timestamp.
            let mut params = vec![("limit", ARCHIVED_THREAD_PAGE_SIZE.to_string())];
            if let Some(before) = before {
                params.push(("before", before));
            }
            let data: ThreadsData = http
                .fire(Request::new(route, LightMethod::Get).params(Some(params)))
                .await?;
            Ok::<_, SourceError>((data.threads, data.has_more))
        })
        .await?;
        Ok(threads.into_iter().map(thread_ref).collect())
    }

    async fn history_page(
        &self,
        conversation_id: &str,
        after: Option<&str>,
    ) -> Result<Vec<SourceMessage>, SourceError> {
        let channel_id = ChannelId::new(parse_snowflake(conversation_id)?);
        let cursor = match after {
            Some(id) => MessageId::new(parse_snowflake(id)?),
            None => MessageId::new(1),
        };
        let mut page = channel_id
            .messages(
                &self.http,
                GetMessages::new().after(cursor).limit(HISTORY_PAGE_SIZE),
            )
            .await?;
        page.sort_by_key(|m| m.id);
        debug!("Fetched {} messages from {} after {}", page.len(), conversation_id, cursor);
        Ok(page.iter().map(source_message).collect())
    }
}

/// Walks archived-thread pages newest-first until Discord reports no more.
/// A failure after the first page keeps the threads already listed.
async fn collect_archived_threads<F, Fut>(
    channel_name: &str,
    mut fetch: F,
) -> Result<Vec<GuildChannel>, SourceError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<(Vec<GuildChannel>, bool), SourceError>>,
{
    let mut threads = Vec::new();
    let mut seen = HashSet::new();
    let mut before: Option<String> = None;
    loop {
        let (page, has_more) = match fetch(before.clone()).await {
            Ok(page) => page,
            Err(e) if !threads.is_empty() => {
                warn!(
                    "#{}: stopped listing archived threads after {}: {}",
                    channel_name,
                    threads.len(),
                    e
                );
                break;
            }
            Err(e) => return Err(e),
        };
        let next = archive_cursor(&page);
        threads.extend(page.into_iter().filter(|t| seen.insert(t.id)));
        if !has_more {
            break;
        }
        match next {
            Some(cursor) if before.as_deref() != Some(cursor.as_str()) => before = Some(cursor),
            _ => {
                warn!("#{}: archived thread listing has no usable cursor", channel_name);
                break;
            }
        }
    }
    Ok(threads)
}

/// Archive time of the oldest thread on a page, the `before` cursor of the next.
fn archive_cursor(page: &[GuildChannel]) -> Option<String> {
    page.last()
        .and_then(|t| t.thread_metadata)
        .and_then(|m| m.archive_timestamp)
        .and_then(|ts| ts.to_rfc3339())
}

fn thread_ref(thread: GuildChannel) -> ThreadRef {
    ThreadRef {
        id: thread.id.to_string(),
        name: thread.name,
    }
}

fn source_message(message: &Message) -> SourceMessage {
    SourceMessage {
        id: message.id.to_string(),
        author: author_tag(&message.author),
        content: message.content.clone(),
        created_at: snowflake_time(message.id.get()),
        attachments: message
            .attachments
            .iter()
            .map(|a| SourceAttachment {
                id: a.id.to_string(),
                file_name: a.filename.clone(),
                content_type: a.content_type.clone(),
                size: u64::from(a.size),
                url: a.url.clone(),
            })
            .collect(),
    }
}

/// `name#1234` for legacy accounts, the bare username otherwise.
fn author_tag(user: &User) -> String {
    match user.discriminator {
        Some(discriminator) => format!("{}#{:04}", user.name, discriminator.get()),
        None => user.name.clone(),
    }
}

/// Creation time encoded in a snowflake, millisecond precision.
fn snowflake_time(id: u64) -> DateTime<Utc> {
    let millis = (id >> 22) + DISCORD_EPOCH_MS;
    Utc.timestamp_millis_opt(millis as i64)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn parse_snowflake(raw: &str) -> Result<u64, SourceError> {
    raw.parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .ok_or_else(|| SourceError::Other(format!("invalid Discord id '{}'", raw)))
}

impl From<serenity::Error> for SourceError {
    fn from(err: serenity::Error) -> Self {
        match &err {
            serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) => {
                match response.status_code.as_u16() {
                    401 => Self::Unauthorized,
                    403 => Self::Forbidden,
                    404 => Self::NotFound,
                    429 => Self::RateLimited,
                    500..=599 => Self::Transport(err.to_string()),
                    _ => Self::Other(err.to_string()),
                }
            }
            serenity::Error::Http(HttpError::Request(_)) => Self::Transport(err.to_string()),
            _ => Self::Other(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::format_timestamp;

    #[test]
    fn test_snowflake_time() {
        // Example snowflake from Discord's API reference.
        let created = snowflake_time(175_928_847_299_117_063);
        assert_eq!(format_timestamp(&created), "2016-04-30T11:18:25.796000+00:00");
    }

    #[test]
    fn test_author_tag() {
        let mut user = User::default();
        user.name = "alice".to_string();
        user.discriminator = None;
        assert_eq!(author_tag(&user), "alice");

        user.discriminator = std::num::NonZeroU16::new(42);
        assert_eq!(author_tag(&user), "alice#0042");
    }

    fn archived_thread(id: u64, archived_at: &str) -> GuildChannel {
        let mut thread = GuildChannel::default();
        thread.id = ChannelId::new(id);
        thread.name = format!("thread-{}", id);
        thread.thread_metadata = Some(
            serde_json::from_value(serde_json::json!({
                "archived": true,
                "auto_archive_duration": 1440,
                "archive_timestamp": archived_at,
            }))
            .unwrap(),
        );
        thread
    }

    #[tokio::test]
    async fn test_archived_threads_follow_timestamp_cursor() {
        let pages = vec![
            (
                vec![
                    archived_thread(3, "2024-03-01T00:00:00.000Z"),
                    archived_thread(2, "2024-02-01T00:00:00.000Z"),
                ],
                true,
            ),
            (vec![archived_thread(1, "2024-01-01T00:00:00.000Z")], false),
        ];
        let mut cursors = Vec::new();
        let threads = collect_archived_threads("surveys", |before| {
            let page = pages[cursors.len()].clone();
            cursors.push(before);
            async move { Ok::<_, SourceError>(page) }
        })
        .await
        .unwrap();

        let ids: Vec<u64> = threads.iter().map(|t| t.id.get()).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert_eq!(cursors.len(), 2);
        assert_eq!(cursors[0], None);
        assert_eq!(cursors[1].as_deref(), Some("2024-02-01T00:00:00.000Z"));
    }

    #[tokio::test]
    async fn test_archived_thread_errors() {
        let result = collect_archived_threads("private", |_| async {
            Err::<(Vec<GuildChannel>, bool), _>(SourceError::Forbidden)
        })
        .await;
        assert!(matches!(result, Err(SourceError::Forbidden)));

        let mut calls = 0;
        let threads = collect_archived_threads("private", |_| {
            calls += 1;
            let page = if calls == 1 {
                Ok((vec![archived_thread(5, "2024-05-01T00:00:00.000Z")], true))
            } else {
                Err(SourceError::Forbidden)
            };
            async move { page }
        })
        .await
        .unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_parse_snowflake() {
        assert_eq!(parse_snowflake("123").unwrap(), 123);
        assert!(parse_snowflake("0").is_err());
        assert!(parse_snowflake("abc").is_err());
    }
}
