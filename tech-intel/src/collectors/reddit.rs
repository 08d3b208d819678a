use super::Collector;
use crate::config::RedditCredentials;
use crate::fetcher::Fetcher;
use crate::types::{CollectError, NewRawItem, Source, SourceType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const OAUTH_BASE: &str = "https://oauth.reddit.com";
const PUBLIC_BASE: &str = "https://www.reddit.com";
const DEFAULT_LIMIT: u64 = 50;
const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(60);
const SORT_MODES: [&str; 4] = ["hot", "new", "top", "rising"];

static SUBREDDIT_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"reddit\.com/r/([^/?#]+)").expect("valid subreddit pattern"));

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    id: String,
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    url: String,
    permalink: String,
    author: Option<String>,
    created_utc: f64,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: i64,
    link_flair_text: Option<String>,
    #[serde(default)]
    is_self: bool,
    subreddit: Option<String>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Clone, PartialEq)]
struct ListingOptions {
    subreddit: String,
    sort: String,
    limit: u64,
    min_score: Option<i64>,
    flair_filter: Vec<String>,
}

/// Collects posts of a subreddit listing.
pub struct RedditCollector {
    fetcher: Arc<Fetcher>,
    credentials: RedditCredentials,
    token: Mutex<Option<CachedToken>>,
    token_url: String,
    oauth_base: String,
    public_base: String,
}

impl RedditCollector {
    pub fn new(fetcher: Arc<Fetcher>, credentials: RedditCredentials) -> Self {
        Self {
            fetcher,
            credentials,
            token: Mutex::new(None),
            token_url: TOKEN_URL.to_string(),
            oauth_base: OAUTH_BASE.to_string(),
            public_base: PUBLIC_BASE.to_string(),
        }
    }

    /// Points token, OAuth and public endpoints at another host.
    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        self.token_url = format!("{}/api/v1/access_token", base);
        self.oauth_base = base.clone();
        self.public_base = base;
        self
    }

    fn user_agent(&self) -> &str {
        self.credentials
            .user_agent
            .as_deref()
            .unwrap_or(&self.fetcher.config().user_agent)
    }

    async fn access_token(&self) -> Result<Option<String>, CollectError> {
        let (Some(client_id), Some(client_secret)) =
            (&self.credentials.client_id, &self.credentials.client_secret)
        else {
            return Ok(None);
        };

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(Some(token.value.clone()));
            }
        }

        let request = self
            .fetcher
            .client()
            .post(&self.token_url)
            .basic_auth(client_id, Some(client_secret))
            .header("User-Agent", self.user_agent())
            .form(&[("grant_type", "client_credentials")]);
        let response: TokenResponse = self.fetcher.get_json(request).await?;

        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(TOKEN_EXPIRY_SKEW);
        *cached = Some(CachedToken {
            value: response.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        debug!("Obtained Reddit access token valid for {:?}", lifetime);
        Ok(Some(response.access_token))
    }

    async fn fetch_listing(&self, options: &ListingOptions) -> Result<Listing, CollectError> {
        let limit = options.limit.to_string();

        match self.access_token().await {
            Ok(Some(token)) => {
                let url = format!("{}/r/{}/{}", self.oauth_base, options.subreddit, options.sort);
                let request = self
                    .fetcher
                    .client()
                    .get(&url)
                    .query(&[("limit", limit.as_str())])
                    .bearer_auth(token)
                    .header("User-Agent", self.user_agent());
                match self.fetcher.get_json(request).await {
                    Ok(listing) => return Ok(listing),
                    Err(e) => warn!("Reddit OAuth listing failed, using public endpoint: {}", e),
                }
            }
            Ok(None) => debug!("No Reddit credentials, using public endpoint"),
            Err(e) => warn!("Reddit token request failed, using public endpoint: {}", e),
        }

        let url = format!("{}/r/{}/{}.json", self.public_base, options.subreddit, options.sort);
        let request = self
            .fetcher
            .client()
            .get(&url)
            .query(&[("limit", limit.as_str())])
            .header("User-Agent", self.user_agent());
        self.fetcher.get_json(request).await
    }
}

fn listing_options(source: &Source) -> Result<ListingOptions, CollectError> {
    let subreddit = source
        .config_str("subreddit")
        .map(str::to_string)
        .or_else(|| SUBREDDIT_URL.captures(&source.url).map(|c| c[1].to_string()))
        .ok_or_else(|| CollectError::Config(format!("cannot determine subreddit for source {}", source.name)))?;

    let sort = source.config_str("sort").unwrap_or("hot").to_lowercase();
    if !SORT_MODES.contains(&sort.as_str()) {
        return Err(CollectError::Config(format!("unsupported sort mode: {}", sort)));
    }

    let flair_filter = source
        .config
        .get("flairFilter")
        .and_then(|v| v.as_array())
        .map(|flairs| {
            flairs
                .iter()
                .filter_map(|f| f.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Ok(ListingOptions {
        subreddit,
        sort,
        limit: source.config_u64("limit").unwrap_or(DEFAULT_LIMIT),
        min_score: source.config_i64("minScore"),
        flair_filter,
    })
}

fn keep_post(post: &Post, options: &ListingOptions) -> bool {
    if options.min_score.is_some_and(|min| post.score < min) {
        return false;
    }
    if !options.flair_filter.is_empty() {
        return post
            .link_flair_text
            .as_ref()
            .is_some_and(|flair| options.flair_filter.contains(flair));
    }
    true
}

fn map_post(post: Post, subreddit: &str) -> NewRawItem {
    let content = if post.selftext.trim().is_empty() {
        format!("External link: {}", post.url)
    } else {
        post.selftext.clone()
    };

    NewRawItem {
        external_id: format!("post-{}", post.id),
        title: post.title,
        content,
        url: format!("https://reddit.com{}", post.permalink),
        author: post.author,
        published_at: DateTime::from_timestamp(post.created_utc as i64, 0).unwrap_or_else(Utc::now),
        metadata: json!({
            "subreddit": post.subreddit.as_deref().unwrap_or(subreddit),
            "score": post.score,
            "numComments": post.num_comments,
            "flair": post.link_flair_text,
            "isSelf": post.is_self,
            "externalUrl": if post.is_self { None } else { Some(post.url) },
        }),
    }
}

#[async_trait]
impl Collector for RedditCollector {
    fn source_type(&self) -> SourceType {
        SourceType::Reddit
    }

    async fn fetch(&self, source: &Source) -> Result<Vec<NewRawItem>, CollectError> {
        let options = listing_options(source)?;
        let listing = self.fetch_listing(&options).await?;

        let total = listing.data.children.len();
        let items: Vec<NewRawItem> = listing
            .data
            .children
            .into_iter()
            .map(|c| c.data)
            .filter(|p| keep_post(p, &options))
            .map(|p| map_post(p, &options.subreddit))
            .collect();

        info!("Reddit r/{}: kept {} of {} posts", options.subreddit, items.len(), total);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewSource;

    fn source(url: &str, config: serde_json::Value) -> Source {
        Source::from_new(
            NewSource::new("sub", SourceType::Reddit, url).with_config(config),
            Utc::now(),
        )
    }

    fn post(score: i64, flair: Option<&str>, selftext: &str) -> Post {
        Post {
            id: "abc".into(),
            title: "Show: my tool".into(),
            selftext: selftext.into(),
            url: "https://tool.dev".into(),
            permalink: "/r/rust/comments/abc/show_my_tool/".into(),
            author: Some("ferris".into()),
            created_utc: 1_740_000_000.0,
            score,
            num_comments: 3,
            link_flair_text: flair.map(str::to_string),
            is_self: !selftext.is_empty(),
            subreddit: Some("rust".into()),
        }
    }

    #[test]
    fn resolves_options_from_url_and_config() {
        let options = listing_options(&source("https://www.reddit.com/r/rust/", serde_json::json!({}))).unwrap();
        assert_eq!(options.subreddit, "rust");
        assert_eq!(options.sort, "hot");
        assert_eq!(options.limit, 50);

        let options = listing_options(&source(
            "https://example.com",
            serde_json::json!({ "subreddit": "node", "sort": "TOP", "minScore": 10, "flairFilter": ["News"] }),
        ))
        .unwrap();
        assert_eq!(options.subreddit, "node");
        assert_eq!(options.sort, "top");
        assert_eq!(options.min_score, Some(10));
        assert_eq!(options.flair_filter, vec!["News".to_string()]);
    }

    #[test]
    fn rejects_unknown_sort() {
        let result = listing_options(&source(
            "https://www.reddit.com/r/rust",
            serde_json::json!({ "sort": "controversial" }),
        ));
        assert!(matches!(result, Err(CollectError::Config(_))));
    }

    #[test]
    fn filters_by_score_and_flair() {
        let options = ListingOptions {
            subreddit: "rust".into(),
            sort: "hot".into(),
            limit: 50,
            min_score: Some(10),
            flair_filter: vec!["News".into()],
        };
        assert!(keep_post(&post(20, Some("News"), ""), &options));
        assert!(!keep_post(&post(5, Some("News"), ""), &options));
        assert!(!keep_post(&post(20, Some("Meme"), ""), &options));
        assert!(!keep_post(&post(20, None, ""), &options));
    }

    #[test]
    fn link_posts_get_placeholder_content() {
        let item = map_post(post(1, None, ""), "rust");
        assert_eq!(item.external_id, "post-abc");
        assert_eq!(item.content, "External link: https://tool.dev");
        assert_eq!(item.url, "https://reddit.com/r/rust/comments/abc/show_my_tool/");
        assert_eq!(item.metadata["externalUrl"], "https://tool.dev");
    }
}
