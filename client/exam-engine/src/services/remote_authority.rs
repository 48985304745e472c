use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use crate::error::RemoteError;
use crate::models::remote::{
    ConflictBody, FetchedAttempt, GradedResult, InProgressStatus, StartedAttempt,
    SubmissionReceipt, SubmitAttemptRequest,
};
use crate::models::{AnswerEntry, AttemptId, ExamId, ResultId};
use crate::utils::retry::{retry_async_when, RetryConfig};

/// The backend grading/attempt service, source of truth for whether an attempt is still open.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    async fn start_attempt(&self, exam_id: &ExamId) -> Result<StartedAttempt, RemoteError>;

    async fn check_in_progress(&self, exam_id: &ExamId) -> Result<InProgressStatus, RemoteError>;

    /// Fails with `Conflict` if the attempt was already finalized.
    async fn fetch_attempt(&self, attempt_id: &AttemptId) -> Result<FetchedAttempt, RemoteError>;

    /// Fails with `Conflict` on a duplicate submission and `Invalid` once the window hard-closed.
    async fn submit_attempt(
        &self,
        attempt_id: &AttemptId,
        answers: Vec<AnswerEntry>,
    ) -> Result<ResultId, RemoteError>;

    async fn fetch_result(&self, result_id: &ResultId) -> Result<GradedResult, RemoteError>;
}

/// JSON-over-HTTP client for the attempt service.
pub struct HttpRemoteAuthority {
    http_client: Client,
    base_url: Url,
    timeout: Duration,
    read_retry: RetryConfig,
}

impl HttpRemoteAuthority {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        // A trailing slash keeps `join` from dropping the last path segment.
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized)
            .map_err(|e| RemoteError::Invalid(format!("bad api url {}: {}", base_url, e)))?;

        Ok(Self {
            http_client: Client::new(),
            base_url,
            timeout,
            read_retry: RetryConfig::default(),
        })
    }

    pub fn with_read_retry(mut self, read_retry: RetryConfig) -> Self {
        self.read_retry = read_retry;
        self
    }

    /// Appends each segment percent-escaped, so an id can never reach another endpoint.
    fn url(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        if let Some(bad) = segments
            .iter()
            .find(|segment| matches!(**segment, "" | "." | ".."))
        {
            return Err(RemoteError::Invalid(format!("bad path segment {:?}", bad)));
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                RemoteError::Invalid(format!("api url {} cannot take a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, RemoteError> {
        let url = self.url(segments)?;
        retry_async_when(&self.read_retry, RemoteError::is_transient, || async {
            tracing::debug!("GET {}", url);
            let response = self
                .http_client
                .get(url.clone())
                .timeout(self.timeout)
                .send()
                .await?;
            decode(response).await
        })
        .await
    }
}

/// Stable per attempt, so a resend after a lost reply is recognised as the same submission.
pub fn idempotency_key(attempt_id: &AttemptId) -> String {
    let name = format!("exam-engine:submit:{}", attempt_id);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

/// Maps the authority's status codes onto `RemoteError`.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return response.json::<T>().await.map_err(|e| RemoteError::Unexpected {
            status: status.as_u16(),
            body: format!("undecodable body: {}", e),
        });
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    Err(match status {
        StatusCode::CONFLICT => match serde_json::from_str::<ConflictBody>(&body) {
            Ok(conflict) => RemoteError::Conflict {
                result_id: conflict.result_id,
            },
            Err(_) => RemoteError::Unexpected {
                status: status.as_u16(),
                body,
            },
        },
        StatusCode::GONE | StatusCode::UNPROCESSABLE_ENTITY => RemoteError::Invalid(body),
        StatusCode::NOT_FOUND => RemoteError::NotFound,
        StatusCode::FORBIDDEN | StatusCode::LOCKED => RemoteError::NotAvailable,
        _ => RemoteError::Unexpected {
            status: status.as_u16(),
            body,
        },
    })
}

#[async_trait]
impl RemoteAuthority for HttpRemoteAuthority {
    async fn start_attempt(&self, exam_id: &ExamId) -> Result<StartedAttempt, RemoteError> {
        let url = self.url(&["exams", exam_id.as_str(), "attempts"])?;
        tracing::info!(exam_id = %exam_id, "Starting attempt");

        let response = self
            .http_client
            .post(url)
            .timeout(self.timeout)
            .send()
            .await?;
        decode(response).await
    }

    async fn check_in_progress(&self, exam_id: &ExamId) -> Result<InProgressStatus, RemoteError> {
        self.get_json(&["exams", exam_id.as_str(), "attempts", "in-progress"])
            .await
    }

    async fn fetch_attempt(&self, attempt_id: &AttemptId) -> Result<FetchedAttempt, RemoteError> {
        self.get_json(&["attempts", attempt_id.as_str()]).await
    }

    async fn submit_attempt(
        &self,
        attempt_id: &AttemptId,
        answers: Vec<AnswerEntry>,
    ) -> Result<ResultId, RemoteError> {
        let url = self.url(&["attempts", attempt_id.as_str(), "submit"])?;
        let payload = SubmitAttemptRequest {
            answers,
            idempotency_key: idempotency_key(attempt_id),
        };
        tracing::info!(
            attempt_id = %attempt_id,
            idempotency_key = %payload.idempotency_key,
            answers = payload.answers.len(),
            "Submitting attempt"
        );

        // Sent exactly once; retrying is the coordinator's decision, not the transport's.
        let response = self
            .http_client
            .post(url)
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await?;
        let receipt: SubmissionReceipt = decode(response).await?;
        Ok(receipt.result_id)
    }

    async fn fetch_result(&self, result_id: &ResultId) -> Result<GradedResult, RemoteError> {
        self.get_json(&["results", result_id.as_str()]).await
    }
}
