use super::{HttpRequest, HttpResponse, Transport};
use extractor_core::backoff::retry_with_backoff;
use extractor_core::{Result, RetryPolicy};
use std::sync::Arc;
use tracing::instrument;

/// Sends a request, retrying throttled (429) and server-error (5xx) responses
/// with jittered exponential backoff.
///
/// A 401 is handed back as a normal response so the caller can re-authenticate.
/// Any other non-2xx status fails at once with [`Error::Http`]; transport
/// failures are not retried.
///
/// [`Error::Http`]: extractor_core::Error::Http
#[derive(Clone)]
pub struct Invoker {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl Invoker {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub async fn invoke(&self, request: &HttpRequest) -> Result<HttpResponse> {
        self.invoke_with_attempts(request, self.policy.max_attempts)
            .await
    }

    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn invoke_with_attempts(
        &self,
        request: &HttpRequest,
        max_attempts: u32,
    ) -> Result<HttpResponse> {
        let policy = RetryPolicy {
            max_attempts,
            ..self.policy.clone()
        };

        retry_with_backoff(
            || async move {
                let response = self.transport.send(request).await?;
                classify(response)
            },
            &policy,
            "api_request",
        )
        .await
    }
}

fn classify(response: HttpResponse) -> Result<HttpResponse> {
    if response.is_success() || response.is_unauthorized() {
        Ok(response)
    } else {
        Err(response.into_error())
    }
}
