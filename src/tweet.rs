use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::DecodeError;

/// One decoded status from the live feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Tweet {
    pub id: u64,
    pub author: Option<String>,
    pub text: String,
    pub created_at: Option<DateTime<Utc>>,
    pub entities: Vec<Entity>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Hashtag(String),
    Mention(String),
    Url(String),
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    id: Option<u64>,
    text: Option<String>,
    user: Option<ApiUser>,
    created_at: Option<String>,
    entities: Option<ApiEntities>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    screen_name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiEntities {
    #[serde(default)]
    hashtags: Vec<ApiHashtag>,
    #[serde(default)]
    user_mentions: Vec<ApiMention>,
    #[serde(default)]
    urls: Vec<ApiUrl>,
}

#[derive(Debug, Deserialize)]
struct ApiHashtag {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMention {
    screen_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUrl {
    expanded_url: Option<String>,
    url: Option<String>,
}

// The wire format: "Wed Aug 27 13:08:45 +0000 2008"
const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

/// Map one complete line from the stream into a [`Tweet`].
///
/// A line that is not a JSON object fails as `Malformed`; a JSON object
/// without the required `id` and `text` fields fails as `UnrecognizedShape`.
/// Everything else (author, timestamp, entities) degrades to absent.
pub fn parse_status(line: &str) -> Result<Tweet, DecodeError> {
    let status: ApiStatus = serde_json::from_str(line).map_err(|source| DecodeError::Malformed {
        line: line.to_string(),
        source,
    })?;

    let (id, text) = match (status.id, status.text) {
        (Some(id), Some(text)) => (id, text),
        _ => {
            return Err(DecodeError::UnrecognizedShape {
                line: line.to_string(),
            })
        }
    };

    let author = status.user.and_then(|u| u.screen_name);
    let created_at = status.created_at.as_deref().and_then(parse_created_at);
    let entities = status.entities.map(collect_entities).unwrap_or_default();

    Ok(Tweet {
        id,
        author,
        text,
        created_at,
        entities,
    })
}

fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, CREATED_AT_FORMAT)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn collect_entities(api: ApiEntities) -> Vec<Entity> {
    let mut entities = Vec::new();

    for tag in api.hashtags {
        if let Some(text) = tag.text {
            entities.push(Entity::Hashtag(text));
        }
    }

    for mention in api.user_mentions {
        if let Some(name) = mention.screen_name {
            entities.push(Entity::Mention(name));
        }
    }

    for url in api.urls {
        // Prefer the resolved URL over the t.co wrapper
        if let Some(u) = url.expanded_url.or(url.url) {
            entities.push(Entity::Url(u));
        }
    }

    entities
}
