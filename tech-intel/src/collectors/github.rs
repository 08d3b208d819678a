use super::Collector;
use crate::fetcher::Fetcher;
use crate::types::{CollectError, NewRawItem, Source, SourceType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

const DEFAULT_API_BASE: &str = "https://api.github.com";
const RELEASES_PER_PAGE: u32 = 20;
const EMPTY_NOTES: &str = "No release notes provided.";

static REPO_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"github\.com/([^/]+)/([^/?#]+)").expect("valid repo pattern"));

#[derive(Debug, Deserialize)]
struct Release {
    id: u64,
    tag_name: String,
    name: Option<String>,
    body: Option<String>,
    html_url: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
    published_at: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    author: Option<ReleaseAuthor>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAuthor {
    login: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

/// Collects published releases of a GitHub repository.
pub struct GithubCollector {
    fetcher: Arc<Fetcher>,
    token: Option<String>,
    api_base: String,
}

impl GithubCollector {
    pub fn new(fetcher: Arc<Fetcher>, token: Option<String>) -> Self {
        Self {
            fetcher,
            token,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }
}

/// Owner and repo from explicit config, else from the source URL.
pub fn resolve_repo(source: &Source) -> Option<RepoRef> {
    if let (Some(owner), Some(repo)) = (source.config_str("owner"), source.config_str("repo")) {
        return Some(RepoRef {
            owner: owner.to_string(),
            repo: repo.trim_end_matches(".git").to_string(),
        });
    }

    let captures = REPO_URL.captures(&source.url)?;
    Some(RepoRef {
        owner: captures[1].to_string(),
        repo: captures[2].trim_end_matches(".git").to_string(),
    })
}

fn map_release(repo: &RepoRef, release: Release) -> NewRawItem {
    let title = match release.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("{} {}: {}", repo.repo, release.tag_name, name),
        None => format!("{} {}", repo.repo, release.tag_name),
    };
    let content = release
        .body
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| EMPTY_NOTES.to_string());

    NewRawItem {
        external_id: format!("release-{}", release.id),
        title,
        content,
        url: release.html_url,
        author: release.author.map(|a| a.login),
        published_at: release
            .published_at
            .or(release.created_at)
            .unwrap_or_else(Utc::now),
        metadata: json!({
            "tagName": release.tag_name,
            "prerelease": release.prerelease,
            "owner": repo.owner,
            "repo": repo.repo,
        }),
    }
}

#[async_trait]
impl Collector for GithubCollector {
    fn source_type(&self) -> SourceType {
        SourceType::Github
    }

    async fn fetch(&self, source: &Source) -> Result<Vec<NewRawItem>, CollectError> {
        let repo = resolve_repo(source).ok_or_else(|| {
            CollectError::Config(format!("cannot determine owner/repo for source {}", source.name))
        })?;
        let include_prerelease = source.config_bool("includePrerelease").unwrap_or(false);

        let url = format!("{}/repos/{}/{}/releases", self.api_base, repo.owner, repo.repo);
        let mut request = self
            .fetcher
            .client()
            .get(&url)
            .query(&[("per_page", RELEASES_PER_PAGE)])
            .header("Accept", "application/vnd.github.v3+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let releases: Vec<Release> = self.fetcher.get_json(request).await.map_err(|e| match e {
            CollectError::NotFound(_) => {
                CollectError::NotFound(format!("repository {}/{} not found", repo.owner, repo.repo))
            }
            CollectError::RateLimited(_) => CollectError::RateLimited("GitHub API rate limit exceeded".to_string()),
            other => other,
        })?;

        let total = releases.len();
        let items: Vec<NewRawItem> = releases
            .into_iter()
            .filter(|r| !r.draft)
            .filter(|r| include_prerelease || !r.prerelease)
            .map(|r| map_release(&repo, r))
            .collect();

        debug!("Kept {} of {} releases for {}/{}", items.len(), total, repo.owner, repo.repo);
        info!("GitHub {}/{}: {} releases", repo.owner, repo.repo, items.len());
        Ok(items)
    }
}
