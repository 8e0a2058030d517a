//! GitHub content backend
//!
//! Talks to the GitHub REST API (`/repos/{owner}/{repo}/contents` and
//! `/commits`). File bodies travel base64-encoded; a write carries the
//! previous blob sha, and GitHub rejects it when the file moved on.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EditorConfig;
use crate::error::{EditorError, Result};
use crate::remote::backend::{CommitInfo, ContentBackend, RemoteFile, WriteReceipt, WriteRequest};

/// Transport timeout for a single request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";

#[derive(Debug, Deserialize)]
struct ContentResponse {
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutBody<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    content: ShaOnly,
    commit: ShaOnly,
}

#[derive(Debug, Deserialize)]
struct ShaOnly {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CommitEntry {
    sha: String,
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    message: String,
    #[serde(default)]
    author: Option<CommitAuthor>,
}

#[derive(Debug, Deserialize)]
struct CommitAuthor {
    #[serde(default)]
    name: String,
    date: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// GitHub REST backend.
#[derive(Debug, Clone)]
pub struct GitHubBackend {
    client: reqwest::Client,
    api_url: Url,
    owner: String,
    repo: String,
    token: String,
}

impl GitHubBackend {
    pub fn new(
        api_url: &str,
        owner: impl Into<String>,
        repo: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self> {
        let api_url = Url::parse(api_url).map_err(|e| EditorError::InvalidConfig {
            reason: format!("invalid API URL '{}': {}", api_url, e),
        })?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            api_url,
            owner: owner.into(),
            repo: repo.into(),
            token: token.into(),
        })
    }

    pub fn from_config(config: &EditorConfig, token: impl Into<String>) -> Result<Self> {
        Self::new(&config.api_url, &config.owner, &config.repo, token)
    }

    /// URL of `/repos/{owner}/{repo}/{segments...}`.
    fn repo_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| EditorError::InvalidConfig {
                reason: format!("API URL '{}' cannot be a base", self.api_url),
            })?;
            path.pop_if_empty()
                .push("repos")
                .push(&self.owner)
                .push(&self.repo);
            for segment in segments {
                // File paths keep their directory structure.
                path.extend(segment.split('/').filter(|s| !s.is_empty()));
            }
        }
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(AUTHORIZATION, format!("token {}", self.token))
            .header(ACCEPT, GITHUB_ACCEPT)
            .header(
                USER_AGENT,
                concat!("atelier/", env!("CARGO_PKG_VERSION")),
            )
    }

    /// Send a request and turn error statuses into [`EditorError`]s.
    async fn send(&self, request: RequestBuilder, path: &str) -> Result<Response> {
        let response = self.authorized(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let body: ErrorBody = response.json().await.unwrap_or_default();
        let error = status_error(status.as_u16(), &headers, body.message, path);
        debug!(status = status.as_u16(), path, error = %error, "GitHub API error");
        Err(error)
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Map a non-success GitHub response to an error.
fn status_error(status: u16, headers: &HeaderMap, message: String, path: &str) -> EditorError {
    let header = |name: &'static str| header_str(headers, name);

    match status {
        401 => EditorError::Unauthorized,
        403 if header("x-ratelimit-remaining") == Some("0") => EditorError::RateLimited {
            retry_after: header("x-ratelimit-reset")
                .and_then(|v| v.parse::<i64>().ok())
                .map(|reset| {
                    let secs = (reset - Utc::now().timestamp()).max(1);
                    Duration::from_secs(secs as u64)
                }),
        },
        403 | 429 if header("retry-after").is_some() => EditorError::RateLimited {
            retry_after: header("retry-after")
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs),
        },
        429 => EditorError::RateLimited { retry_after: None },
        403 => EditorError::Forbidden { reason: message },
        404 => EditorError::NotFound {
            path: path.to_string(),
        },
        409 => EditorError::Conflict {
            path: path.to_string(),
        },
        422 if message.to_lowercase().contains("sha") => EditorError::Conflict {
            path: path.to_string(),
        },
        _ => EditorError::Backend { status, message },
    }
}

fn decode_content(path: &str, response: ContentResponse) -> Result<RemoteFile> {
    let encoding = response.encoding.as_deref().unwrap_or("base64");
    let content = match (encoding, response.content) {
        ("base64", Some(content)) => {
            let cleaned: String = content.chars().filter(|c| !c.is_whitespace()).collect();
            STANDARD
                .decode(cleaned)
                .map_err(|e| EditorError::InvalidContent {
                    path: path.to_string(),
                    reason: e.to_string(),
                })?
        }
        (encoding, _) => {
            return Err(EditorError::InvalidContent {
                path: path.to_string(),
                reason: format!("unsupported content encoding '{}'", encoding),
            })
        }
    };
    Ok(RemoteFile {
        content,
        sha: response.sha,
    })
}

#[async_trait]
impl ContentBackend for GitHubBackend {
    async fn read_file(&self, path: &str, git_ref: &str) -> Result<RemoteFile> {
        let url = self.repo_url(&["contents", path])?;
        let request = self.client.get(url).query(&[("ref", git_ref)]);
        let response: ContentResponse = self.send(request, path).await?.json().await?;
        decode_content(path, response)
    }

    async fn write_file(&self, request: WriteRequest) -> Result<WriteReceipt> {
        let url = self.repo_url(&["contents", &request.path])?;
        let body = PutBody {
            message: &request.message,
            content: STANDARD.encode(&request.content),
            branch: &request.branch,
            sha: request.sha.as_deref(),
        };
        let response: PutResponse = self
            .send(self.client.put(url).json(&body), &request.path)
            .await?
            .json()
            .await?;

        Ok(WriteReceipt {
            content_sha: response.content.sha,
            commit_id: response.commit.sha,
        })
    }

    async fn list_commits(
        &self,
        git_ref: &str,
        path: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CommitInfo>> {
        let url = self.repo_url(&["commits"])?;
        let mut query = vec![
            ("sha", git_ref.to_string()),
            ("per_page", limit.to_string()),
        ];
        if let Some(path) = path {
            query.push(("path", path.to_string()));
        }

        let entries: Vec<CommitEntry> = self
            .send(self.client.get(url).query(&query), path.unwrap_or(git_ref))
            .await?
            .json()
            .await?;

        let commits = entries
            .into_iter()
            .filter_map(|entry| match entry.commit.author {
                Some(author) => Some(CommitInfo {
                    id: entry.sha,
                    message: entry.commit.message,
                    author: author.name,
                    date: author.date,
                }),
                None => {
                    warn!(commit = %entry.sha, "skipping commit without author date");
                    None
                }
            })
            .collect();
        Ok(commits)
    }

    async fn probe(&self) -> Result<()> {
        let url = self.repo_url(&[])?;
        self.send(self.client.get(url), &self.repo).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use test_case::test_case;

    fn backend() -> GitHubBackend {
        GitHubBackend::new("https://api.github.com", "acme", "site", "ghp_test").unwrap()
    }

    #[test]
    fn test_repo_url_keeps_directories() {
        let url = backend()
            .repo_url(&["contents", "blog/post one.html"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/acme/site/contents/blog/post%20one.html"
        );
    }

    #[test]
    fn test_repo_url_with_base_path() {
        let backend = GitHubBackend::new("https://ghe.example.com/api/v3/", "acme", "site", "t").unwrap();
        let url = backend.repo_url(&["commits"]).unwrap();
        assert_eq!(url.as_str(), "https://ghe.example.com/api/v3/repos/acme/site/commits");
    }

    #[test]
    fn test_invalid_api_url() {
        let err = GitHubBackend::new("not a url", "a", "b", "t").unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[test_case(401, "", "UNAUTHORIZED" ; "bad token")]
    #[test_case(403, "Resource not accessible", "FORBIDDEN" ; "missing scope")]
    #[test_case(404, "Not Found", "NOT_FOUND" ; "missing file")]
    #[test_case(409, "is at abc but expected def", "CONFLICT" ; "stale sha")]
    #[test_case(422, "\"sha\" wasn't supplied.", "CONFLICT" ; "missing sha")]
    #[test_case(422, "Invalid request", "BACKEND_ERROR" ; "other validation")]
    #[test_case(429, "", "RATE_LIMITED" ; "secondary rate limit")]
    #[test_case(502, "Bad Gateway", "BACKEND_ERROR" ; "server error")]
    fn test_status_mapping(status: u16, message: &str, code: &str) {
        let err = status_error(status, &HeaderMap::new(), message.to_string(), "index.html");
        assert_eq!(err.error_code(), code);
    }

    #[test]
    fn test_exhausted_quota_is_rate_limited() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        let reset = (Utc::now().timestamp() + 30).to_string();
        headers.insert("x-ratelimit-reset", HeaderValue::from_str(&reset).unwrap());

        match status_error(403, &headers, "API rate limit exceeded".into(), "index.html") {
            EditorError::RateLimited {
                retry_after: Some(wait),
            } => assert!(wait <= Duration::from_secs(30) && wait >= Duration::from_secs(1)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("7"));
        match status_error(403, &headers, String::new(), "index.html") {
            EditorError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_content_with_line_breaks() {
        let encoded = STANDARD.encode("<p>Grüße</p>");
        let wrapped = format!("{}\n{}\n", &encoded[..8], &encoded[8..]);
        let file = decode_content(
            "index.html",
            ContentResponse {
                sha: "abc".into(),
                content: Some(wrapped),
                encoding: Some("base64".into()),
            },
        )
        .unwrap();
        assert_eq!(String::from_utf8(file.content).unwrap(), "<p>Grüße</p>");
        assert_eq!(file.sha, "abc");
    }

    #[test]
    fn test_decode_rejects_unknown_encoding() {
        let err = decode_content(
            "big.mp4",
            ContentResponse {
                sha: "abc".into(),
                content: None,
                encoding: Some("none".into()),
            },
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONTENT");
    }
}
