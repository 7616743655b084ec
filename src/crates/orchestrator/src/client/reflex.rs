//! Gateway to the reflex tier, in-process or over HTTP

use async_trait::async_trait;
use reflex::http::{PreprocessBody, PREPROCESS_PATH};
use reflex::ratelimit::Caller;
use reflex::{PreprocessRequest, PreprocessResult, ReflexError, ReflexPipeline};
use std::sync::Arc;
use std::time::Duration;

use super::error::UpstreamError;

#[async_trait]
pub trait ReflexGateway: Send + Sync {
    async fn preprocess(
        &self,
        request: PreprocessRequest,
        caller: &Caller,
    ) -> Result<PreprocessResult, UpstreamError>;

    /// Prometheus text of an in-process pipeline, appended to `/metrics`
    fn render_metrics(&self) -> Option<String> {
        None
    }

    /// The pipeline itself when it runs in this process
    fn local_pipeline(&self) -> Option<&Arc<ReflexPipeline>> {
        None
    }
}

/// Pipeline running inside the orchestrator process
pub struct LocalReflex {
    pipeline: Arc<ReflexPipeline>,
}

impl LocalReflex {
    pub fn new(pipeline: Arc<ReflexPipeline>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &Arc<ReflexPipeline> {
        &self.pipeline
    }
}

impl From<ReflexError> for UpstreamError {
    fn from(err: ReflexError) -> Self {
        match err {
            ReflexError::Validation(msg) => UpstreamError::Rejected(msg),
            ReflexError::RateLimited { retry_after, .. } => UpstreamError::RateLimited { retry_after },
            ReflexError::StoreUnavailable(msg) => UpstreamError::Unavailable(format!("reflex store: {}", msg)),
            ReflexError::DeadlineExceeded(_) => UpstreamError::Timeout(err.to_string()),
            ReflexError::Cancelled => UpstreamError::Cancelled,
            ReflexError::Config(_) | ReflexError::Internal(_) => UpstreamError::Unavailable(err.to_string()),
        }
    }
}

#[async_trait]
impl ReflexGateway for LocalReflex {
    async fn preprocess(
        &self,
        request: PreprocessRequest,
        caller: &Caller,
    ) -> Result<PreprocessResult, UpstreamError> {
        Ok(self.pipeline.process(request, caller).await?)
    }

    fn render_metrics(&self) -> Option<String> {
        Some(self.pipeline.render_metrics())
    }

    fn local_pipeline(&self) -> Option<&Arc<ReflexPipeline>> {
        Some(&self.pipeline)
    }
}

/// Remote reflex service speaking `POST /preprocess`
pub struct HttpReflexClient {
    http: reqwest::Client,
    url: String,
}

impl HttpReflexClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(UpstreamError::from)?;
        Ok(Self {
            http,
            url: format!("{}{}", base_url.trim_end_matches('/'), PREPROCESS_PATH),
        })
    }
}

#[async_trait]
impl ReflexGateway for HttpReflexClient {
    async fn preprocess(
        &self,
        request: PreprocessRequest,
        caller: &Caller,
    ) -> Result<PreprocessResult, UpstreamError> {
        let body = PreprocessBody {
            request,
            user_id: caller.user_id.clone(),
        };
        let mut builder = self.http.post(&self.url).json(&body);
        if let Some(ip) = &caller.ip {
            builder = builder.header("x-forwarded-for", ip);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(UpstreamError::from_response(response).await);
        }
        response
            .json::<PreprocessResult>()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflex::ratelimit::Dimension;

    #[test]
    fn test_reflex_errors_map_to_upstream() {
        let err: UpstreamError = ReflexError::RateLimited {
            dimension: Dimension::User,
            retry_after: Duration::from_secs(36),
        }
        .into();
        assert_eq!(
            err,
            UpstreamError::RateLimited {
                retry_after: Duration::from_secs(36)
            }
        );

        let err: UpstreamError = ReflexError::DeadlineExceeded(Duration::from_millis(50)).into();
        assert!(err.is_retryable());

        let err: UpstreamError = ReflexError::Validation("text must not be empty".into()).into();
        assert!(!err.trips_breaker());
    }
}
