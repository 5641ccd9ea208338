use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;
use crate::error::ClientError;
use crate::models::{
    CreateWebhookBody, CreateWebhookResponse, DeleteAllBody, DeleteRequestBody, DeliveryReceipt,
    ErrorBody, MessageResponse, PauseResponse, RequestDetail, RequestId, RequestPage,
    WebhookEndpoint, WebhookUrlBody,
};
use crate::pagination::PageQuery;

/// REST client for the capture backend. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
}

impl ApiClient {
    pub fn new(
        base: Url,
        session_cookie: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = session_cookie {
            headers.insert(COOKIE, HeaderValue::from_str(&format!("session={cookie}"))?);
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self { http, base })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, ClientError> {
        Self::new(
            cfg.base_url.clone(),
            cfg.session_cookie.as_deref(),
            cfg.http_timeout(),
        )
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Public capture URL of an endpoint.
    pub fn webhook_url(&self, slug: &str) -> Result<Url, ClientError> {
        self.url(&[slug])
    }

    pub async fn create_webhook(&self, name: &str) -> Result<WebhookEndpoint, ClientError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::new("Please enter a webhook name"));
        }
        let created: CreateWebhookResponse = self
            .json(
                self.http
                    .post(self.url(&["add_webhook"])?)
                    .json(&CreateWebhookBody { name }),
            )
            .await?;
        debug!("created webhook {} at {}", created.name, created.url);
        Ok(WebhookEndpoint::new(&created.url, created.name))
    }

    /// Flips the active flag and returns the new value.
    pub async fn toggle_pause(&self, slug: &str) -> Result<bool, ClientError> {
        let paused: PauseResponse = self
            .json(
                self.http
                    .post(self.url(&["pause"])?)
                    .json(&WebhookUrlBody { url: slug }),
            )
            .await?;
        Ok(paused.status)
    }

    pub async fn delete_webhook(&self, slug: &str) -> Result<(), ClientError> {
        self.send(
            self.http
                .post(self.url(&["delete"])?)
                .json(&WebhookUrlBody { url: slug }),
        )
        .await?;
        Ok(())
    }

    pub async fn delete_request(&self, request_id: RequestId) -> Result<(), ClientError> {
        self.send(
            self.http
                .post(self.url(&["delete_request"])?)
                .json(&DeleteRequestBody { id: request_id }),
        )
        .await?;
        Ok(())
    }

    pub async fn delete_all_requests(&self, slug: &str) -> Result<String, ClientError> {
        let done: MessageResponse = self
            .json(
                self.http
                    .post(self.url(&["webhooks", "delete_all"])?)
                    .json(&DeleteAllBody { webhook_id: slug }),
            )
            .await?;
        Ok(done.message)
    }

    pub async fn fetch_request(&self, request_id: RequestId) -> Result<RequestDetail, ClientError> {
        let id = request_id.to_string();
        self.json(self.http.get(self.url(&["webhook", "request", &id])?))
            .await
    }

    pub async fn fetch_requests(
        &self,
        slug: &str,
        page: PageQuery,
    ) -> Result<RequestPage, ClientError> {
        self.json(
            self.http
                .get(self.url(&["api", "webhook", slug, "requests"])?)
                .query(&page),
        )
        .await
    }

    /// Posts a JSON body to an endpoint's capture URL, as an external
    /// sender would.
    pub async fn send_test_request(
        &self,
        slug: &str,
        body: &str,
        query: &[(String, String)],
    ) -> Result<(StatusCode, DeliveryReceipt), ClientError> {
        let response = self
            .send(
                self.http
                    .post(self.webhook_url(slug)?)
                    .query(query)
                    .header(CONTENT_TYPE, "application/json")
                    .body(body.to_string()),
            )
            .await?;
        let status = response.status();
        Ok((status, response.json().await?))
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::new(format!("{} cannot be a base url", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        Ok(self.send(request).await?.json().await?)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let url = response.url().clone();
        let text = response.text().await.unwrap_or_default();
        let reason = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(ErrorBody::into_reason)
            .unwrap_or(text);
        warn!("{url} returned {status}: {reason}");
        Err(ClientError::with_status(status, reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;

    fn client(backend: &MockBackend) -> ApiClient {
        ApiClient::new(backend.base_url(), Some("s3cret"), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn urls_keep_the_base_path() {
        let api = ApiClient::new(
            Url::parse("http://localhost:5000/hooks/").unwrap(),
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            api.url(&["api", "webhook", "abc", "requests"]).unwrap().as_str(),
            "http://localhost:5000/hooks/api/webhook/abc/requests"
        );
        assert_eq!(
            api.webhook_url("abc").unwrap().as_str(),
            "http://localhost:5000/hooks/abc"
        );
    }

    #[tokio::test]
    async fn creates_pauses_and_deletes_webhooks() {
        let backend = MockBackend::start().await;
        let api = client(&backend);

        let err = api.create_webhook("   ").await.unwrap_err();
        assert_eq!(err.message, "Please enter a webhook name");

        let created = api.create_webhook("orders").await.unwrap();
        assert_eq!(created.name, "orders");
        assert_eq!(created.slug.len(), 10);
        assert!(created.active);
        assert_eq!(backend.last_cookie().as_deref(), Some("session=s3cret"));

        assert!(!api.toggle_pause(&created.slug).await.unwrap());
        assert_eq!(backend.is_active(&created.slug), Some(false));
        assert!(api.toggle_pause(&created.slug).await.unwrap());

        api.delete_webhook(&created.slug).await.unwrap();
        let err = api.delete_webhook(&created.slug).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.message, "Webhook not found");
    }

    #[tokio::test]
    async fn pages_details_and_deletions() {
        let backend = MockBackend::start().await;
        backend.add_webhook("abc");
        let ids = backend.seed_requests("abc", 3);
        let api = client(&backend);

        let page = api
            .fetch_requests("abc", PageQuery { offset: 0, limit: 2 })
            .await
            .unwrap();
        assert_eq!(page.total, Some(3));
        assert!(page.has_more);
        let newest: Vec<_> = page.requests.iter().map(|summary| summary.id.0).collect();
        assert_eq!(newest, vec![ids[2], ids[1]]);

        let detail = api.fetch_request(RequestId(ids[0])).await.unwrap();
        assert_eq!(detail.body, "{\"n\":0}");
        assert!(detail.timestamp.is_some());
        assert_eq!(
            detail.headers.get("content-type").map(String::as_str),
            Some("application/json")
        );

        api.delete_request(RequestId(ids[0])).await.unwrap();
        assert!(api.fetch_request(RequestId(ids[0])).await.unwrap_err().is_not_found());

        let message = api.delete_all_requests("abc").await.unwrap();
        assert_eq!(message, "Successfully deleted 2 webhook requests.");
        assert_eq!(backend.request_count("abc"), 0);
    }

    #[tokio::test]
    async fn test_requests_land_on_the_endpoint() {
        let backend = MockBackend::start().await;
        backend.add_webhook("abc");
        let api = client(&backend);

        let (status, receipt) = api
            .send_test_request("abc", "{\"ok\":true}", &[("source".into(), "cli".into())])
            .await
            .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(receipt.status.as_deref(), Some("queued"));
        assert!(receipt.job_id.is_some());
        assert_eq!(backend.request_count("abc"), 1);

        let page = api
            .fetch_requests("abc", PageQuery { offset: 0, limit: 100 })
            .await
            .unwrap();
        let detail = api.fetch_request(page.requests[0].id).await.unwrap();
        assert_eq!(detail.query_params.get("source").map(String::as_str), Some("cli"));

        assert!(api.toggle_pause("abc").await.is_ok());
        let (status, receipt) = api.send_test_request("abc", "{}", &[]).await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(receipt.message, "Webhook is paused");
        assert!(receipt.job_id.is_none());
        assert_eq!(backend.request_count("abc"), 1);
    }
}
