use crate::api::mail_client::MailClient;
use crate::config::MailConfig;
use crate::error::MailClientError;
use crate::store::CredentialRecord;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

const LATEST_MAIL_PATH: &str = "/api/mail-new";
const CLEAR_MAILBOX_PATH: &str = "/api/process-inbox";

/// Envelope returned by every endpoint of the remote mail API.
#[derive(Debug, Deserialize)]
struct MailApiEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

/// Client for the hosted mail API that performs OAuth refresh and mailbox
/// access on our behalf.
#[derive(Clone)]
pub struct CloudMailClient {
    http: reqwest::Client,
    base_url: Url,
    max_retries: usize,
}

fn retry_policy(max_times: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(3))
        .with_max_times(max_times)
        .with_jitter()
}

impl CloudMailClient {
    pub fn new(cfg: &MailConfig) -> Result<Self, MailClientError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("mailpool/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .timeout(Duration::from_secs(cfg.timeout_secs));
        if let Some(proxy_url) = cfg.proxy.as_ref() {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url.as_str())?);
        }
        let http = builder.build()?;

        Ok(Self {
            http,
            base_url: cfg.base_url.clone(),
            max_retries: cfg.max_retries,
        })
    }

    async fn call(
        &self,
        path: &str,
        account: &CredentialRecord,
        mailbox: &str,
    ) -> Result<MailApiEnvelope, MailClientError> {
        let url = self.base_url.join(path)?;
        let query = [
            ("refresh_token", account.refresh_token.expose_secret()),
            ("client_id", account.client_id.as_str()),
            ("email", account.email.as_str()),
            ("mailbox", mailbox),
        ];

        // The query string carries the refresh token, so URLs are stripped
        // from every error before it is logged or returned.
        let resp = (|| async {
            self.http
                .get(url.clone())
                .query(&query)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| MailClientError::Reqwest(e.without_url()))
        })
        .retry(retry_policy(self.max_retries))
        .when(MailClientError::is_retryable)
        .notify(|err, dur: Duration| {
            warn!(path, error = %err, "mail API retrying after {:?}", dur);
        })
        .await?;

        let body = resp
            .bytes()
            .await
            .map_err(|e| MailClientError::Reqwest(e.without_url()))?;
        serde_json::from_slice(&body).map_err(|e| MailClientError::Decode(e.to_string()))
    }
}

#[async_trait]
impl MailClient for CloudMailClient {
    async fn fetch_latest(
        &self,
        account: &CredentialRecord,
        mailbox: &str,
    ) -> Result<Option<Value>, MailClientError> {
        info!(email = %account.email, mailbox, "requesting latest mail");
        let envelope = self.call(LATEST_MAIL_PATH, account, mailbox).await?;
        if !envelope.success {
            return Err(MailClientError::Api(
                envelope.message.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(envelope.data.filter(|v| !v.is_null()))
    }

    async fn clear_mailbox(
        &self,
        account: &CredentialRecord,
        mailbox: &str,
    ) -> Result<(), MailClientError> {
        info!(email = %account.email, mailbox, "requesting mailbox clear");
        let envelope = self.call(CLEAR_MAILBOX_PATH, account, mailbox).await?;
        if !envelope.success {
            return Err(MailClientError::Api(
                envelope.message.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AccountId;
    use axum::{Json, Router, extract::Query, http::StatusCode, routing::get};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    async fn serve(router: Router) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Url::parse(&format!("http://{addr}")).unwrap()
    }

    fn client_for(base_url: Url) -> CloudMailClient {
        CloudMailClient::new(&MailConfig {
            base_url,
            proxy: None,
            connect_timeout_secs: 2,
            timeout_secs: 5,
            max_retries: 2,
        })
        .unwrap()
    }

    fn record() -> CredentialRecord {
        let id = AccountId::parse("a@example.com").unwrap();
        CredentialRecord::from_json(
            &id,
            br#"{"email":"a@example.com","password":"pw","client_id":"cid","refresh_token":"rt"}"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn fetch_latest_sends_credentials_and_returns_data() {
        let router = Router::new().route(
            LATEST_MAIL_PATH,
            get(|Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(q["refresh_token"], "rt");
                assert_eq!(q["client_id"], "cid");
                assert_eq!(q["email"], "a@example.com");
                Json(json!({"success": true, "data": {"subject": "code 1234", "mailbox": q["mailbox"]}}))
            }),
        );
        let client = client_for(serve(router).await);

        let data = client.fetch_latest(&record(), "Junk").await.unwrap().unwrap();
        assert_eq!(data["subject"], "code 1234");
        assert_eq!(data["mailbox"], "Junk");
    }

    #[tokio::test]
    async fn null_data_means_no_mail() {
        let router = Router::new().route(
            LATEST_MAIL_PATH,
            get(|| async { Json(json!({"success": true, "data": null})) }),
        );
        let client = client_for(serve(router).await);
        assert!(client.fetch_latest(&record(), "INBOX").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unsuccessful_envelope_is_an_api_error() {
        let router = Router::new().route(
            CLEAR_MAILBOX_PATH,
            get(|| async { Json(json!({"success": false, "message": "token revoked"})) }),
        );
        let client = client_for(serve(router).await);
        let err = client.clear_mailbox(&record(), "INBOX").await.unwrap_err();
        assert!(matches!(err, MailClientError::Api(ref m) if m == "token revoked"));
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_succeed() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            CLEAR_MAILBOX_PATH,
            get(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        (StatusCode::BAD_GATEWAY, Json(json!({})))
                    } else {
                        (StatusCode::OK, Json(json!({"success": true})))
                    }
                }
            }),
        );
        let client = client_for(serve(router).await);
        client.clear_mailbox(&record(), "INBOX").await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn errors_do_not_expose_the_refresh_token() {
        let router = Router::new().route(
            LATEST_MAIL_PATH,
            get(|| async { (StatusCode::UNAUTHORIZED, "nope") }),
        );
        let client = client_for(serve(router).await);
        let err = client.fetch_latest(&record(), "INBOX").await.unwrap_err();
        assert!(!err.to_string().contains("refresh_token=rt"));
        assert!(!err.is_retryable());
    }
}
