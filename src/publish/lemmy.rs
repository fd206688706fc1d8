// src/publish/lemmy.rs
//! Lemmy v3 API publisher: password login → JWT, community name → id, post.
//! Also lists a community's newest posts so the dedup ledger can be seeded.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{FeedPost, FeedPublisher, PostReference, PublishRequest};
use crate::error::PipelineError;

pub const MAX_TITLE_CHARS: usize = 200;

pub struct LemmyPublisher {
    client: Client,
    api_base: String,
    username: String,
    password: String,
    jwt: Mutex<Option<String>>,
    communities: Mutex<HashMap<String, i64>>,
}

/// `[TAG] title`, entities decoded, capped at [`MAX_TITLE_CHARS`].
pub fn format_title(tag: &str, title: &str) -> String {
    let decoded = html_escape::decode_html_entities(title);
    let full = if tag.trim().is_empty() {
        decoded.trim().to_string()
    } else {
        format!("[{}] {}", tag.trim().to_uppercase(), decoded.trim())
    };
    if full.chars().count() <= MAX_TITLE_CHARS {
        return full;
    }
    let mut cut: String = full.chars().take(MAX_TITLE_CHARS - 3).collect();
    cut.truncate(cut.trim_end().len());
    cut.push_str("...");
    cut
}

impl LemmyPublisher {
    pub fn new(instance: &str, username: String, password: String) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .user_agent(concat!("blueflag/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| PipelineError::SourceUnavailable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            api_base: format!("{}/api/v3", instance.trim_end_matches('/')),
            username,
            password,
            jwt: Mutex::new(None),
            communities: Mutex::new(HashMap::new()),
        })
    }

    async fn token(&self) -> Result<String, PipelineError> {
        let mut g = self.jwt.lock().await;
        if let Some(t) = g.as_ref() {
            return Ok(t.clone());
        }
        let t = self.login().await?;
        *g = Some(t.clone());
        Ok(t)
    }

    async fn login(&self) -> Result<String, PipelineError> {
        let rsp = self
            .client
            .post(format!("{}/user/login", self.api_base))
            .json(&LoginRequest {
                username_or_email: &self.username,
                password: &self.password,
            })
            .send()
            .await
            .map_err(|e| PipelineError::SourceUnavailable(format!("lemmy login: {e}")))?;
        let body: LoginResponse = read_json(rsp, "login").await?;
        let jwt = body
            .jwt
            .ok_or_else(|| PipelineError::PublishRejected("lemmy login returned no token".into()))?;
        tracing::info!(target: "publish", user = %self.username, "logged in to lemmy");
        Ok(jwt)
    }

    async fn community_id(&self, name: &str, jwt: &str) -> Result<i64, PipelineError> {
        if let Some(id) = self.communities.lock().await.get(name) {
            return Ok(*id);
        }
        let rsp = self
            .client
            .get(format!("{}/community", self.api_base))
            .query(&[("name", name)])
            .bearer_auth(jwt)
            .send()
            .await
            .map_err(|e| PipelineError::SourceUnavailable(format!("lemmy community: {e}")))?;
        let body: CommunityResponse = read_json(rsp, "community").await?;
        let id = body.community_view.community.id;
        self.communities.lock().await.insert(name.to_string(), id);
        Ok(id)
    }

    async fn create_post(&self, req: &PublishRequest, jwt: &str) -> Result<PostReference, PipelineError> {
        let community_id = self.community_id(&req.community, jwt).await?;
        let payload = CreatePost {
            community_id,
            name: format_title(&req.tag, &req.title),
            url: &req.url,
        };
        let rsp = self
            .client
            .post(format!("{}/post", self.api_base))
            .bearer_auth(jwt)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PipelineError::SourceUnavailable(format!("lemmy post: {e}")))?;
        let status = rsp.status();
        if !status.is_success() {
            let body = rsp.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body, "post"));
        }
        // The post exists from here on; nothing below may look retryable.
        let body = rsp.text().await.unwrap_or_default();
        Ok(post_reference(&body))
    }

    async fn list_posts(&self, community: &str, limit: u32, jwt: &str) -> Result<Vec<FeedPost>, PipelineError> {
        let community_id = self.community_id(community, jwt).await?;
        let rsp = self
            .client
            .get(format!("{}/post/list", self.api_base))
            .query(&[
                ("community_id", community_id.to_string()),
                ("sort", "New".to_string()),
                ("limit", limit.clamp(1, 50).to_string()),
            ])
            .bearer_auth(jwt)
            .send()
            .await
            .map_err(|e| PipelineError::SourceUnavailable(format!("lemmy post list: {e}")))?;
        let body: PostListResponse = read_json(rsp, "post list").await?;
        Ok(body.posts.into_iter().map(|v| v.post.into_feed_post()).collect())
    }
}

/// Reference from a 2xx create-post body. Unreadable bodies still mean the
/// post was created.
fn post_reference(body: &str) -> PostReference {
    let parsed = serde_json::from_str::<PostResponse>(body)
        .ok()
        .and_then(|b| b.post_view.map(|v| v.post).or(b.post));
    match parsed {
        Some(post) => PostReference {
            id: Some(post.id),
            url: post.ap_id,
        },
        None => {
            let snippet: String = body.chars().take(200).collect();
            tracing::warn!(target: "publish", body = %snippet, "lemmy accepted the post but the response did not identify it");
            PostReference { id: None, url: None }
        }
    }
}

/// Lemmy 0.19 sends RFC 3339; older releases send a naive UTC timestamp.
fn parse_lemmy_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").map(|n| n.and_utc()))
        .ok()
}

fn is_auth_failure(e: &PipelineError) -> bool {
    matches!(e, PipelineError::PublishRejected(msg) if msg.starts_with("HTTP 401"))
}

#[async_trait]
impl FeedPublisher for LemmyPublisher {
    async fn publish_item(&self, req: &PublishRequest) -> Result<PostReference, PipelineError> {
        let jwt = self.token().await?;
        match self.create_post(req, &jwt).await {
            Err(e) if is_auth_failure(&e) => {
                // Expired token: log in once more and retry this request.
                tracing::info!(target: "publish", "lemmy token rejected, logging in again");
                *self.jwt.lock().await = None;
                let jwt = self.token().await?;
                self.create_post(req, &jwt).await
            }
            other => other,
        }
    }

    async fn recent_posts(&self, community: &str, limit: u32) -> Result<Vec<FeedPost>, PipelineError> {
        let jwt = self.token().await?;
        match self.list_posts(community, limit, &jwt).await {
            Err(e) if is_auth_failure(&e) => {
                *self.jwt.lock().await = None;
                let jwt = self.token().await?;
                self.list_posts(community, limit, &jwt).await
            }
            other => other,
        }
    }

    fn name(&self) -> &'static str {
        "lemmy"
    }
}

async fn read_json<T: for<'de> Deserialize<'de>>(
    rsp: reqwest::Response,
    what: &str,
) -> Result<T, PipelineError> {
    let status = rsp.status();
    if status.is_success() {
        return rsp
            .json::<T>()
            .await
            .map_err(|e| PipelineError::SourceUnavailable(format!("lemmy {what} body: {e}")));
    }
    let body = rsp.text().await.unwrap_or_default();
    Err(classify_failure(status, &body, what))
}

fn classify_failure(status: StatusCode, body: &str, what: &str) -> PipelineError {
    let snippet: String = body.chars().take(200).collect();
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        PipelineError::SourceUnavailable(format!("lemmy {what}: HTTP {status}: {snippet}"))
    } else {
        PipelineError::PublishRejected(format!("HTTP {} {what}: {snippet}", status.as_u16()))
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username_or_email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(default)]
    jwt: Option<String>,
}

#[derive(Deserialize)]
struct CommunityResponse {
    community_view: CommunityView,
}

#[derive(Deserialize)]
struct CommunityView {
    community: IdOnly,
}

#[derive(Deserialize)]
struct IdOnly {
    id: i64,
}

#[derive(Serialize)]
struct CreatePost<'a> {
    community_id: i64,
    name: String,
    url: &'a str,
}

#[derive(Deserialize)]
struct PostResponse {
    #[serde(default)]
    post_view: Option<PostView>,
    #[serde(default)]
    post: Option<Post>,
}

#[derive(Deserialize)]
struct PostView {
    post: Post,
}

#[derive(Deserialize)]
struct Post {
    id: i64,
    #[serde(default)]
    ap_id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    published: Option<String>,
}

impl Post {
    fn into_feed_post(self) -> FeedPost {
        FeedPost {
            id: self.id,
            title: self.name,
            url: self.url,
            published_at: self.published.as_deref().and_then(parse_lemmy_time),
        }
    }
}

#[derive(Deserialize)]
struct PostListResponse {
    #[serde(default)]
    posts: Vec<PostView>,
}
