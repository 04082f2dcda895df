// HTTP client wrapper for the calendar API

use reqwest::{RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Header carrying the caller's owner identity
pub const OWNER_HEADER: &str = "X-Owner";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Not found")]
    NotFound,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct Client {
    base_url: String,
    owner: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base_url: &str, owner: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn owned(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(OWNER_HEADER, &self.owner)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self.owned(self.http.get(self.url(path))).send().await?;
        self.handle_response(response).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let response = self
            .owned(self.http.post(self.url(path)))
            .json(body)
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let response = self
            .owned(self.http.put(self.url(path)))
            .json(body)
            .send()
            .await?;
        self.handle_response(response).await
    }

    /// DELETE that returns no body
    pub async fn delete(&self, path: &str) -> Result<(), ClientError> {
        let response = self.owned(self.http.delete(self.url(path))).send().await?;
        let status = response.status();

        if status == StatusCode::NO_CONTENT || status == StatusCode::OK {
            return Ok(());
        }
        Err(Self::error_from(response).await)
    }

    /// DELETE that returns a JSON body
    pub async fn delete_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self.owned(self.http.delete(self.url(path))).send().await?;
        self.handle_response(response).await
    }

    async fn error_from(response: reqwest::Response) -> ClientError {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return ClientError::NotFound;
        }
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or(text);
        ClientError::Api {
            status: status.as_u16(),
            message,
        }
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let body = response.json().await?;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_sends_owner_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/events"))
            .and(header(OWNER_HEADER, "alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::new(&format!("{}/", server.uri()), "alice");
        let body: Value = client.get("/v1/events").await.unwrap();
        assert_eq!(body["data"], json!([]));
    }

    #[tokio::test]
    async fn test_api_error_message_is_extracted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "error": "another event exists for this date",
                "kind": "overlap"
            })))
            .mount(&server)
            .await;

        let client = Client::new(&server.uri(), "alice");
        let err = client
            .post::<Value, _>("/v1/events", &json!({}))
            .await
            .unwrap_err();
        match err {
            ClientError::Api { status, message } => {
                assert_eq!(status, 409);
                assert_eq!(message, "another event exists for this date");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = Client::new(&server.uri(), "alice");
        assert!(matches!(
            client.delete("/v1/events/x").await,
            Err(ClientError::NotFound)
        ));
    }
}
