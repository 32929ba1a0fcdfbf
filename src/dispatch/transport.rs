// Outbound HTTP seam. The dispatcher talks to a `DecisionTransport` so its
// retry and routing logic can be driven by scripted replies in tests.

use std::time::Duration;

use futures::future::BoxFuture;

use super::action::ChatCompletionRequest;
use crate::error::DispatchError;

/// One POST to a provider endpoint.
pub struct ProviderRequest<'a> {
    pub endpoint: &'a str,
    pub api_key: &'a str,
    pub body: &'a ChatCompletionRequest,
    pub timeout: Duration,
    pub max_response_bytes: usize,
}

/// Raw provider reply: status and body text.
#[derive(Debug, Clone)]
pub struct ProviderReply {
    pub status: u16,
    pub body: String,
}

pub trait DecisionTransport: Send + Sync {
    fn post<'a>(
        &'a self,
        request: ProviderRequest<'a>,
    ) -> BoxFuture<'a, Result<ProviderReply, DispatchError>>;
}

/// reqwest-backed transport used in production.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl DecisionTransport for HttpTransport {
    fn post<'a>(
        &'a self,
        request: ProviderRequest<'a>,
    ) -> BoxFuture<'a, Result<ProviderReply, DispatchError>> {
        Box::pin(async move {
            let mut response = self
                .client
                .post(request.endpoint)
                .bearer_auth(request.api_key)
                .json(request.body)
                .timeout(request.timeout)
                .send()
                .await
                .map_err(|e| map_reqwest_error(e, request.timeout))?;

            let status = response.status().as_u16();

            // Read in chunks so an oversized body is rejected without buffering it all.
            let mut bytes: Vec<u8> = Vec::new();
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| map_reqwest_error(e, request.timeout))?
            {
                if bytes.len() + chunk.len() > request.max_response_bytes {
                    return Err(DispatchError::ResponseTooLarge {
                        limit: request.max_response_bytes,
                    });
                }
                bytes.extend_from_slice(&chunk);
            }

            Ok(ProviderReply {
                status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            })
        })
    }
}

fn map_reqwest_error(e: reqwest::Error, timeout: Duration) -> DispatchError {
    if e.is_timeout() {
        DispatchError::Timeout(timeout)
    } else {
        DispatchError::Transport(e.to_string())
    }
}
