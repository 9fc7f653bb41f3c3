//! Remote catalog API client.
//!
//! Every request goes through the chained rate limiter and is classified
//! solely by HTTP status; response bodies are never part of the failure
//! contract.

use crate::config::Config;
use crate::error::TransportError;
use crate::groups::RemoteGroup;
use crate::rate_limit::{ChainedRequest, RateLimitBucket};
use crate::upload::{JobStatus, UploadJob, UploadTransport};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Common HTTP client configuration.
pub(crate) fn create_http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(concat!("shuppan/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(30))
        .build()
}

/// Maps an HTTP status to the transport failure taxonomy.
fn classify_status(status: StatusCode) -> Result<(), TransportError> {
    if status.is_success() {
        return Ok(());
    }
    match status.as_u16() {
        403 => Err(TransportError::Forbidden),
        429 => Err(TransportError::RateLimited),
        s => Err(TransportError::Status { status: s }),
    }
}

/// Published chapters for a series, as returned by the aggregate
/// endpoint. Consumed only by duplicate detection.
#[derive(Debug, Clone, Deserialize)]
pub struct ChapterAggregate {
    pub chapters: Vec<AggregateChapter>,

    /// Groups referenced by index from the chapter versions.
    pub groups: Vec<RemoteGroup>,
}

/// One published volume/chapter coordinate.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregateChapter {
    pub volume: String,
    pub chapter: String,

    /// Published versions of this chapter, keyed by version id.
    pub entries: HashMap<String, AggregateEntry>,
}

/// One published version's group credits.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregateEntry {
    /// Indexes into [`ChapterAggregate::groups`].
    pub groups: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct GroupSearchResponse {
    data: Vec<RemoteGroup>,
}

#[derive(Debug, Deserialize)]
struct UploadSession {
    id: String,
}

#[derive(Debug, Serialize)]
struct BeginSessionRequest<'a> {
    series_id: &'a str,
    groups: &'a [String],
}

#[derive(Debug, Serialize)]
struct CommitSessionRequest<'a> {
    volume: Option<&'a str>,
    chapter: Option<&'a str>,
    title: Option<&'a str>,
    translated_language: &'a str,
    page_order: Vec<&'a str>,
}

/// Client for the remote catalog service.
#[derive(Debug)]
pub struct CatalogClient {
    client: reqwest::Client,
    base_url: Url,
    token: String,
    chain: ChainedRequest,
}

impl CatalogClient {
    /// Builds a client from configuration.
    ///
    /// Fails fast on a missing bearer token or an unusable base URL;
    /// everything after this point is classified remote failure.
    pub fn new(config: &Config) -> crate::error::Result<Self> {
        if !config.api.is_configured() {
            return Err(TransportError::MissingCredential.into());
        }

        let base_url = Url::parse(&config.api.base_url).context("invalid api.base_url")?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("api.base_url cannot be used as a base URL");
        }

        let limits = &config.rate_limits;
        // Narrowest scope first, global last
        let chain = ChainedRequest::new(
            vec![
                Arc::new(RateLimitBucket::new(
                    limits.upload_capacity,
                    Duration::from_secs(limits.upload_interval_sec),
                )),
                Arc::new(RateLimitBucket::new(
                    limits.global_capacity,
                    Duration::from_secs(limits.global_interval_sec),
                )),
            ],
            limits.quota_retry_limit,
        );

        Ok(Self {
            client: create_http_client().context("failed to create HTTP client")?,
            base_url,
            token: config.api.token.clone(),
            chain,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .expect("base URL validated in new()")
            .pop_if_empty()
            .extend(segments);
        url
    }

    /// Searches remote groups by name. Callers apply the exact-name
    /// match; first match wins.
    pub async fn search_groups(&self, name: &str) -> Result<Vec<RemoteGroup>, TransportError> {
        let mut url = self.endpoint(&["group"]);
        url.query_pairs_mut().append_pair("name", name);
        let url = &url;

        let response: GroupSearchResponse = self
            .chain
            .execute(|| async move {
                let resp = self
                    .client
                    .get(url.clone())
                    .bearer_auth(&self.token)
                    .send()
                    .await?;
                classify_status(resp.status())?;
                Ok(resp.json().await?)
            })
            .await?;
        Ok(response.data)
    }

    /// Fetches the published-chapter aggregate for a series.
    pub async fn get_aggregate(&self, series_id: &str) -> Result<ChapterAggregate, TransportError> {
        let url = self.endpoint(&["series", series_id, "aggregate"]);
        let url = &url;

        self.chain
            .execute(|| async move {
                let resp = self
                    .client
                    .get(url.clone())
                    .bearer_auth(&self.token)
                    .send()
                    .await?;
                classify_status(resp.status())?;
                Ok(resp.json().await?)
            })
            .await
    }

    async fn begin_session(&self, job: &UploadJob) -> Result<String, TransportError> {
        let url = self.endpoint(&["upload"]);
        let url = &url;
        let body = BeginSessionRequest {
            series_id: &job.draft.series_id,
            groups: &job.draft.group_ids,
        };
        let body = &body;

        let session: UploadSession = self
            .chain
            .execute(|| async move {
                let resp = self
                    .client
                    .put(url.clone())
                    .bearer_auth(&self.token)
                    .json(body)
                    .send()
                    .await?;
                classify_status(resp.status())?;
                Ok(resp.json().await?)
            })
            .await?;
        debug!("opened upload session {}", session.id);
        Ok(session.id)
    }

    async fn put_page(
        &self,
        session_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<(), TransportError> {
        let url = self.endpoint(&["upload", session_id, filename]);
        let url = &url;

        self.chain
            .execute(|| {
                // The body is consumed per attempt
                let bytes = bytes.to_vec();
                async move {
                    let resp = self
                        .client
                        .put(url.clone())
                        .bearer_auth(&self.token)
                        .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                        .body(bytes)
                        .send()
                        .await?;
                    classify_status(resp.status())
                }
            })
            .await
    }

    async fn commit_session(
        &self,
        session_id: &str,
        job: &UploadJob,
    ) -> Result<(), TransportError> {
        let url = self.endpoint(&["upload", session_id, "commit"]);
        let url = &url;
        let body = CommitSessionRequest {
            volume: job.draft.volume.as_deref(),
            chapter: job.draft.chapter.as_deref(),
            title: job.draft.title.as_deref(),
            translated_language: &job.draft.language,
            page_order: job.pages.iter().map(|p| p.filename.as_str()).collect(),
        };
        let body = &body;

        self.chain
            .execute(|| async move {
                let resp = self
                    .client
                    .put(url.clone())
                    .bearer_auth(&self.token)
                    .json(body)
                    .send()
                    .await?;
                classify_status(resp.status())
            })
            .await
    }
}

#[async_trait]
impl UploadTransport for CatalogClient {
    async fn active_session(&self) -> Result<Option<String>, TransportError> {
        let url = self.endpoint(&["upload"]);
        let url = &url;

        self.chain
            .execute(|| async move {
                let resp = self
                    .client
                    .get(url.clone())
                    .bearer_auth(&self.token)
                    .send()
                    .await?;
                if resp.status() == StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                classify_status(resp.status())?;
                let session: UploadSession = resp.json().await?;
                Ok(Some(session.id))
            })
            .await
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), TransportError> {
        let url = self.endpoint(&["upload", session_id]);
        let url = &url;

        self.chain
            .execute(|| async move {
                let resp = self
                    .client
                    .delete(url.clone())
                    .bearer_auth(&self.token)
                    .send()
                    .await?;
                classify_status(resp.status())
            })
            .await
    }

    async fn upload_chapter(&self, job: &mut UploadJob) -> Result<(), TransportError> {
        let session_id = match &job.session_id {
            Some(id) => id.clone(),
            None => {
                let id = self.begin_session(job).await?;
                job.session_id = Some(id.clone());
                id
            }
        };

        for i in 0..job.pages.len() {
            if job.pages[i].status == JobStatus::Completed {
                continue;
            }
            job.pages[i].status = JobStatus::Uploading;

            let filename = job.pages[i].filename.clone();
            let bytes = match tokio::fs::read(&job.pages[i].path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    let err =
                        TransportError::Network(format!("failed to read page '{filename}': {e}"));
                    job.pages[i].status = JobStatus::Failed;
                    job.pages[i].error = Some(err.to_string());
                    return Err(err);
                }
            };

            match self.put_page(&session_id, &filename, &bytes).await {
                Ok(()) => job.pages[i].status = JobStatus::Completed,
                Err(e) => {
                    job.pages[i].status = JobStatus::Failed;
                    job.pages[i].error = Some(e.to_string());
                    return Err(e);
                }
            }
        }

        self.commit_session(&session_id, job).await?;
        debug!(
            "committed upload session {} ({} pages)",
            session_id,
            job.pages.len()
        );
        Ok(())
    }
}

/// Resolves the remote catalog entries for a series' dataset groups.
///
/// Convenience for change-engine callers: the engine needs a catalog
/// covering the series' dump group names, fetched here through the group
/// search with the exact-name rule, first match wins. Names the remote
/// service does not know are skipped.
pub async fn resolve_series_catalog(
    client: &CatalogClient,
    group_names: impl IntoIterator<Item = String>,
) -> Result<Vec<RemoteGroup>, TransportError> {
    let mut catalog: Vec<RemoteGroup> = Vec::new();
    for name in group_names {
        let results = client.search_groups(&name).await?;
        let Some(found) = results.into_iter().find(|r| r.name == name) else {
            debug!("no exact remote match for group '{name}'");
            continue;
        };
        if !catalog.iter().any(|g| g.id == found.id) {
            catalog.push(found);
        }
    }
    Ok(catalog)
}
