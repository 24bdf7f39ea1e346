//! HTTP layer: status mapping and the authentication flows.
//!
//! This is the ONLY place for status code handling. client/mod.rs never
//! interprets status codes.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use tracing::debug;

use crate::allocator::ExistenceProbe;
use crate::auth::challenge::Challenge;
use crate::auth::session::JSON_CONTENT_TYPE;
use crate::auth::{AuthStrategy, KeyPairAuth, SessionAuth};
use crate::error::{HandleError, HandleResult};
use crate::record::Record;

use super::helpers::parse_error_body;

/// HTTP backend for making requests (holds reqwest client, base URL, auth).
#[derive(Debug, Clone)]
pub(crate) struct HttpBackend {
    pub(crate) client: reqwest::Client,
    pub(crate) base_url: String,
    pub(crate) auth: AuthStrategy,
}

impl HttpBackend {
    pub(crate) fn handle_url(&self, suffix: &str) -> String {
        format!("{}{}", self.base_url, suffix)
    }

    /// PUT a new record; the registry refuses to replace an existing one.
    ///
    /// A 409, or a 200 that reports a replaced record instead of 201, is
    /// `AlreadyExists`.
    pub(crate) async fn put_new(&self, suffix: &str, body: &str) -> HandleResult<StatusCode> {
        let url = format!("{}?overwrite=false", self.handle_url(suffix));
        let status = self.send(Method::PUT, &url, suffix, Some(body)).await?;

        if status == StatusCode::OK {
            return Err(HandleError::AlreadyExists {
                handle: suffix.to_string(),
            });
        }
        Ok(status)
    }

    /// Unauthenticated GET of a record.
    pub(crate) async fn get_record(&self, suffix: &str) -> HandleResult<Record> {
        let url = self.handle_url(suffix);
        debug!(url = %url, "fetching record");

        let response = self.client.get(&url).send().await?;
        let response = expect_success(response, suffix).await?;
        let body = response.text().await.map_err(|e| HandleError::Network {
            message: format!("failed to read response body: {}", e),
        })?;

        serde_json::from_str(&body).map_err(|e| HandleError::Decode {
            message: format!("failed to parse record {}: {}", suffix, e),
        })
    }

    /// Send a mutating request with the configured authentication.
    pub(crate) async fn send_authenticated(
        &self,
        method: Method,
        suffix: &str,
        body: Option<&str>,
    ) -> HandleResult<StatusCode> {
        let url = self.handle_url(suffix);
        self.send(method, &url, suffix, body).await
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        suffix: &str,
        body: Option<&str>,
    ) -> HandleResult<StatusCode> {
        debug!(method = %method, url = %url, mode = ?self.auth.mode(), "sending authenticated request");

        match &self.auth {
            AuthStrategy::Session(auth) => {
                self.send_in_session(auth, method, url, suffix, body).await
            }
            AuthStrategy::KeyPair(auth) => {
                self.send_with_challenge(auth, method, url, suffix, body)
                    .await
            }
        }
    }

    async fn send_in_session(
        &self,
        auth: &SessionAuth,
        method: Method,
        url: &str,
        suffix: &str,
        body: Option<&str>,
    ) -> HandleResult<StatusCode> {
        let (session_id, authorization) = auth.manager().authorization_header().await?;

        let response = self
            .request(method, url, body, Some(&authorization))
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            auth.manager().invalidate(&session_id).await;
            return Err(HandleError::AuthenticationFailed {
                message: format!("registry refused session {}", session_id),
            });
        }

        finish(response, suffix).await
    }

    async fn send_with_challenge(
        &self,
        auth: &KeyPairAuth,
        method: Method,
        url: &str,
        suffix: &str,
        body: Option<&str>,
    ) -> HandleResult<StatusCode> {
        let response = self.request(method.clone(), url, body, None).send().await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            debug!(url = %url, "registry accepted request without a challenge");
            return finish(response, suffix).await;
        }

        let challenge = challenge_from(&response)?;
        debug!(session_id = %challenge.session_id, "answering registry challenge");
        let authorization = auth.respond(&challenge)?;

        let response = self
            .request(method, url, body, Some(&authorization))
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let message = response.text().await.unwrap_or_default();
            return Err(HandleError::AuthenticationFailed {
                message: format!(
                    "registry rejected signed request: {}",
                    parse_error_body(&message)
                ),
            });
        }

        finish(response, suffix).await
    }

    fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&str>,
        authorization: Option<&str>,
    ) -> RequestBuilder {
        let mut request = self
            .client
            .request(method, url)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE);

        if let Some(body) = body {
            request = request.body(body.to_string());
        }

        if let Some(authorization) = authorization {
            request = request.header(AUTHORIZATION, authorization);
        }

        request
    }
}

#[async_trait]
impl ExistenceProbe for HttpBackend {
    async fn exists(&self, suffix: &str) -> HandleResult<bool> {
        let url = self.handle_url(suffix);
        let response = self.client.get(&url).send().await?;

        match expect_success(response, suffix).await {
            Ok(_) => Ok(true),
            Err(HandleError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Challenge from every `WWW-Authenticate` header of a 401.
fn challenge_from(response: &Response) -> HandleResult<Challenge> {
    let values: Vec<&str> = response
        .headers()
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    if values.is_empty() {
        return Err(HandleError::MalformedChallenge {
            reason: "401 without WWW-Authenticate header".into(),
        });
    }

    Challenge::from_www_authenticate(&values.join(", "))
}

async fn expect_success(response: Response, suffix: &str) -> HandleResult<Response> {
    let status = response.status();

    match status.as_u16() {
        200..=299 => Ok(response),

        404 => Err(HandleError::NotFound {
            handle: suffix.to_string(),
        }),

        409 => Err(HandleError::AlreadyExists {
            handle: suffix.to_string(),
        }),

        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(HandleError::Registry {
                status: status.as_u16(),
                message: parse_error_body(&body),
            })
        }
    }
}

async fn finish(response: Response, suffix: &str) -> HandleResult<StatusCode> {
    let status = response.status();
    expect_success(response, suffix).await?;
    Ok(status)
}
