//! Search API client

use crate::error::{DataError, Result};
use crate::params::{AlbumParams, ArtistParams, BackendType, SearchParams};
use crate::remote::types::{ApiData, ApiResponse};
use bridge_traits::http::{HttpClient, HttpRequest};
use core_runtime::logging::redact_query;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Client for the `multisearch`, `artists` and `albums` endpoints.
#[derive(Clone)]
pub struct DatmusicApi {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
}

impl DatmusicApi {
    pub fn new(http_client: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /multisearch?query&page&types[]`
    #[instrument(skip(self, params), fields(query = %redact_query(&params.query), page = params.page))]
    pub async fn multisearch(
        &self,
        params: &SearchParams,
        backends: &[BackendType],
    ) -> Result<ApiData> {
        let mut request = HttpRequest::get(format!("{}/multisearch", self.base_url))
            .query_pairs(params.query_pairs());
        for backend in backends {
            request = request.query("types[]", backend.as_str());
        }
        self.execute(request).await
    }

    /// `GET /artists/{id}?page`
    #[instrument(skip(self))]
    pub async fn artist(&self, params: &ArtistParams) -> Result<ApiData> {
        let request = HttpRequest::get(format!("{}/artists/{}", self.base_url, params.id))
            .query("page", params.page);
        self.execute(request).await
    }

    /// `GET /albums/{id}?owner_id&access_key`
    #[instrument(skip(self))]
    pub async fn album(&self, params: &AlbumParams) -> Result<ApiData> {
        let request = HttpRequest::get(format!("{}/albums/{}", self.base_url, params.id))
            .query("owner_id", params.owner_id)
            .query("access_key", params.access_key.clone());
        self.execute(request).await
    }

    async fn execute(&self, request: HttpRequest) -> Result<ApiData> {
        let url = request.url.clone();
        let response = self.http_client.execute(request).await.map_err(|e| {
            warn!(url = %url, error = %e, "Request failed");
            DataError::Network(e.to_string())
        })?;

        // Upstream errors come as an envelope with any status code
        let envelope = match response.json::<ApiResponse>() {
            Ok(envelope) => envelope,
            Err(e) if response.is_success() => {
                return Err(DataError::Serialization(e.to_string()));
            }
            Err(_) => {
                return Err(DataError::Network(format!(
                    "HTTP {} from {}",
                    response.status, url
                )));
            }
        };

        if !envelope.is_ok() {
            let error = envelope.error.unwrap_or_default();
            if let Some(captcha_id) = error.captcha_id {
                debug!(captcha_id, "Captcha required");
                return Err(DataError::CaptchaRequired {
                    captcha_id,
                    captcha_index: error.captcha_index.unwrap_or_default(),
                    image_url: error.captcha_image_url.unwrap_or_default(),
                });
            }
            return Err(DataError::Upstream {
                id: error.id,
                code: error.code.unwrap_or(-1),
                message: error
                    .message
                    .unwrap_or_else(|| format!("status '{}'", envelope.status)),
            });
        }

        Ok(envelope.data)
    }
}

impl std::fmt::Debug for DatmusicApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatmusicApi")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::http::HttpResponse;
    use mockall::mock;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    fn api(mock: MockHttpClient) -> DatmusicApi {
        DatmusicApi::new(Arc::new(mock), "https://api.test/")
    }

    #[tokio::test]
    async fn test_multisearch_builds_query() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .withf(|request| {
                request.url == "https://api.test/multisearch"
                    && request.query_values("query") == vec!["abc"]
                    && request.query_values("page") == vec!["2"]
                    && request.query_values("types[]") == vec!["audios", "flacs"]
            })
            .returning(|_| {
                Ok(HttpResponse::new(
                    200,
                    r#"{"status":"ok","data":{"audios":[{"id":"1"}],"flacs":[{"id":"2","key":"flacs"}]}}"#,
                ))
            });

        let params = SearchParams::new("abc").with_page(2);
        let data = api(mock_http)
            .multisearch(&params, &[BackendType::Audios, BackendType::Flacs])
            .await
            .unwrap();

        let ids: Vec<_> = data.all_audios().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_captcha_error_is_distinguished() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().returning(|_| {
            Ok(HttpResponse::new(
                200,
                r#"{"status":"error","error":{"id":"captcha","code":14,"captcha_id":77,"captcha_index":3,"captcha_img":"https://img/77"}}"#,
            ))
        });

        let result = api(mock_http).artist(&ArtistParams::new("1")).await;
        assert_eq!(
            result.unwrap_err(),
            DataError::CaptchaRequired {
                captcha_id: 77,
                captcha_index: 3,
                image_url: "https://img/77".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_upstream_error_on_error_status() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().returning(|_| {
            Ok(HttpResponse::new(
                500,
                r#"{"status":"error","error":{"id":"unknown","message":"boom"}}"#,
            ))
        });

        let result = api(mock_http).album(&AlbumParams::new("9", -1, "k")).await;
        assert!(matches!(
            result,
            Err(DataError::Upstream { ref id, code: -1, ref message }) if id == "unknown" && message == "boom"
        ));
    }

    #[tokio::test]
    async fn test_transport_and_status_failures_are_network_errors() {
        let mut failing = MockHttpClient::new();
        failing
            .expect_execute()
            .returning(|_| Err(BridgeError::OperationFailed("connection reset".to_string())));
        let result = api(failing).artist(&ArtistParams::new("1")).await;
        assert!(matches!(result, Err(DataError::Network(_))));

        let mut bad_gateway = MockHttpClient::new();
        bad_gateway
            .expect_execute()
            .returning(|_| Ok(HttpResponse::new(502, "<html>bad gateway</html>")));
        let result = api(bad_gateway).artist(&ArtistParams::new("1")).await;
        assert!(matches!(result, Err(DataError::Network(ref m)) if m.contains("502")));
    }

    #[tokio::test]
    async fn test_album_query_carries_access_key() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .withf(|request| {
                request.url == "https://api.test/albums/9"
                    && request.query_values("owner_id") == vec!["-5"]
                    && request.query_values("access_key") == vec!["key"]
            })
            .returning(|_| {
                Ok(HttpResponse::new(
                    200,
                    r#"{"status":"ok","data":{"album":{"id":"9","title":"A","audios":[{"id":"1"}]}}}"#,
                ))
            });

        let data = api(mock_http)
            .album(&AlbumParams::new("9", -5, "key"))
            .await
            .unwrap();
        assert_eq!(data.album.unwrap().audios.len(), 1);
    }
}
