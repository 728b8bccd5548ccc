//! Tests for `ReqwestClient`.
//!
//! These tests cover construction only; request behaviour is exercised
//! through the scripted client in the dispatcher tests.

use super::*;

mod reqwest_client {
    use super::*;

    #[test]
    fn new_creates_client() {
        let client = ReqwestClient::new();
        let _ = format!("{client:?}");
    }

    #[test]
    fn with_timeout_creates_client() {
        let client = ReqwestClient::with_timeout(std::time::Duration::from_secs(30));
        assert!(format!("{client:?}").contains("ReqwestClient"));
    }

    #[test]
    fn from_client_accepts_custom_client() {
        let custom = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap();
        let client = ReqwestClient::from_client(custom);

        let _ = format!("{client:?}");
    }

    #[test]
    fn client_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ReqwestClient>();
    }

    #[tokio::test]
    async fn request_to_invalid_host_returns_error_or_proxy_response() {
        let client = ReqwestClient::new();
        let url = url::Url::parse("http://invalid.invalid.invalid/rest/profile.json").unwrap();

        let result = client.request(HttpRequest::post(url)).await;

        // A proxy may answer with an error status instead of failing the connection.
        match result {
            Err(HttpError::Connection(_)) => {}
            Ok(resp) if !resp.is_success() => {}
            other => panic!("Expected connection error or proxy error response, got {other:?}"),
        }
    }
}
