//! Tests for `WebhookConnector`.

use super::*;
use crate::classifier::{ErrorClassifier, RecoveryPolicy};
use crate::credential::Webhook;
use crate::time::mock::RecordingSleeper;
use crate::transport::mock::ScriptedClient;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const WEBHOOK: &str = "https://example.bitrix24.com/rest/1/abc123/";

fn connector(
    url: &str,
    client: &Arc<ScriptedClient>,
    sleeper: &RecordingSleeper,
    policy: &RecoveryPolicy,
) -> WebhookConnector<Arc<ScriptedClient>, RecordingSleeper> {
    WebhookConnector::new(
        Webhook::new(url),
        Pipeline::new(
            Arc::clone(client),
            sleeper.clone(),
            ErrorClassifier::for_webhook(policy),
            policy.max_dispatch_attempts,
        ),
    )
}

fn params(value: serde_json::Value) -> Params {
    value.as_object().cloned().unwrap()
}

mod credential_checks {
    use super::*;

    #[tokio::test]
    async fn invalid_webhook_sends_nothing() {
        let client = Arc::new(ScriptedClient::default());
        let sleeper = RecordingSleeper::default();
        let connector = connector("not a url", &client, &sleeper, &RecoveryPolicy::default());

        let err = connector
            .send_request("scope", &Params::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::InvalidCredential(_)));
        assert_eq!(err.to_string(), "Invalid credential: the webhook is incorrect: 'not a url'");
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn non_http_scheme_is_rejected_for_batches_too() {
        let client = Arc::new(ScriptedClient::default());
        let sleeper = RecordingSleeper::default();
        let connector = connector(
            "ftp://example.com/rest/",
            &client,
            &sleeper,
            &RecoveryPolicy::default(),
        );

        let result = connector
            .send_batch_request(&[BatchQuery::bare("scope")])
            .await;

        assert!(matches!(result, Err(ApiError::InvalidCredential(_))));
        assert_eq!(client.calls(), 0);
    }
}

mod requests {
    use super::*;

    #[tokio::test]
    async fn posts_params_to_method_url() {
        let client = Arc::new(ScriptedClient::with_json(vec![
            json!({"result": {"ID": "2"}}),
        ]));
        let sleeper = RecordingSleeper::default();
        let connector = connector(WEBHOOK, &client, &sleeper, &RecoveryPolicy::default());

        let response = connector
            .send_request("crm.deal.get", &params(json!({"id": 2})))
            .await
            .unwrap();

        assert_eq!(response.get("result"), Some(&json!({"ID": "2"})));
        let request = &client.captured_requests()[0];
        assert_eq!(
            request.url.as_str(),
            "https://example.bitrix24.com/rest/1/abc123/crm.deal.get.json"
        );
        assert_eq!(
            request.headers.get(http::header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(client.json_body(0), json!({"id": 2}));
    }

    #[tokio::test]
    async fn webhook_without_trailing_slash_still_works() {
        let client = Arc::new(ScriptedClient::with_json(vec![json!({"result": []})]));
        let sleeper = RecordingSleeper::default();
        let connector = connector(
            "https://example.bitrix24.com/rest/1/abc123",
            &client,
            &sleeper,
            &RecoveryPolicy::default(),
        );

        connector.send_request("scope", &Params::new()).await.unwrap();

        assert_eq!(
            client.captured_requests()[0].url.as_str(),
            "https://example.bitrix24.com/rest/1/abc123/scope.json"
        );
    }

    #[tokio::test]
    async fn batch_posts_envelope_without_auth() {
        let client = Arc::new(ScriptedClient::with_json(vec![json!({
            "result": {"result": [[], {"ID": "2"}], "result_error": []}
        })]));
        let sleeper = RecordingSleeper::default();
        let connector = connector(WEBHOOK, &client, &sleeper, &RecoveryPolicy::default());

        connector
            .send_batch_request(&[
                BatchQuery::bare("scope"),
                BatchQuery::new("crm.deal.get", params(json!({"id": 2}))),
            ])
            .await
            .unwrap();

        assert!(
            client.captured_requests()[0]
                .url
                .as_str()
                .ends_with("/batch.json")
        );
        assert_eq!(
            client.json_body(0),
            json!({"cmd": ["scope?", "crm.deal.get?id=2"], "halt": 0})
        );
    }

    #[tokio::test]
    async fn transport_error_is_not_retried() {
        let client = Arc::new(ScriptedClient::default());
        client.push_error(crate::transport::HttpError::Timeout);
        let sleeper = RecordingSleeper::default();
        let connector = connector(WEBHOOK, &client, &sleeper, &RecoveryPolicy::default());

        let result = connector.send_request("scope", &Params::new()).await;

        assert!(matches!(result, Err(ApiError::Transport(_))));
        assert_eq!(client.calls(), 1);
    }
}

mod recovery {
    use super::*;

    #[tokio::test]
    async fn query_limit_sleeps_and_resends_same_payload() {
        let client = Arc::new(ScriptedClient::with_json(vec![
            json!({"error": "QUERY_LIMIT_EXCEEDED", "error_description": "Too many requests"}),
            json!({"result": 1}),
        ]));
        let sleeper = RecordingSleeper::default();
        let connector = connector(WEBHOOK, &client, &sleeper, &RecoveryPolicy::default());

        let response = connector
            .send_request("crm.deal.add", &params(json!({"fields": {"TITLE": "x"}})))
            .await
            .unwrap();

        assert_eq!(response.get("result"), Some(&json!(1)));
        assert_eq!(sleeper.delays(), vec![Duration::from_secs(1)]);
        assert_eq!(client.json_body(0), client.json_body(1));
    }

    #[tokio::test]
    async fn operation_time_limit_waits_five_seconds() {
        let client = Arc::new(ScriptedClient::with_json(vec![
            json!({
                "error": "OPERATION_TIME_LIMIT",
                "error_description": "Method is blocked due to operation time limit."
            }),
            json!({"result": 1}),
        ]));
        let sleeper = RecordingSleeper::default();
        let connector = connector(WEBHOOK, &client, &sleeper, &RecoveryPolicy::default());

        connector.send_request("scope", &Params::new()).await.unwrap();

        assert_eq!(sleeper.delays(), vec![Duration::from_secs(5)]);
    }

    #[tokio::test]
    async fn empty_response_fails_on_sixth_attempt() {
        let client = Arc::new(ScriptedClient::default());
        for _ in 0..6 {
            client.push_raw(Vec::new());
        }
        let sleeper = RecordingSleeper::default();
        let connector = connector(WEBHOOK, &client, &sleeper, &RecoveryPolicy::default());

        let result = connector.send_request("scope", &Params::new()).await;

        assert!(matches!(result, Err(ApiError::EmptyResponse)));
        assert_eq!(client.calls(), 6);
        assert_eq!(sleeper.delays(), vec![Duration::from_millis(500); 5]);
    }

    #[tokio::test]
    async fn empty_response_budget_is_per_call() {
        let client = Arc::new(ScriptedClient::default());
        for _ in 0..5 {
            client.push_raw(Vec::new());
        }
        client.push_json(json!({"result": 1}));
        for _ in 0..5 {
            client.push_raw(Vec::new());
        }
        client.push_json(json!({"result": 2}));
        let sleeper = RecordingSleeper::default();
        let connector = connector(WEBHOOK, &client, &sleeper, &RecoveryPolicy::default());

        let first = connector.send_request("scope", &Params::new()).await;
        let second = connector.send_request("scope", &Params::new()).await;

        assert!(first.is_ok());
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn access_denied_is_raised_without_retry() {
        let client = Arc::new(ScriptedClient::with_json(vec![json!({
            "error": "",
            "error_description": "Access denied."
        })]));
        let sleeper = RecordingSleeper::default();
        let connector = connector(WEBHOOK, &client, &sleeper, &RecoveryPolicy::default());

        let result = connector.send_request("user.get", &Params::new()).await;

        assert!(matches!(result, Err(ApiError::AccessDenied { .. })));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn dispatcher_ceiling_stops_endless_retries() {
        let client = Arc::new(ScriptedClient::default());
        for _ in 0..3 {
            client.push_json(
                json!({"error": "QUERY_LIMIT_EXCEEDED", "error_description": "Too many requests"}),
            );
        }
        let sleeper = RecordingSleeper::default();
        let policy = RecoveryPolicy::default().with_max_dispatch_attempts(3);
        let connector = connector(WEBHOOK, &client, &sleeper, &policy);

        let result = connector.send_request("scope", &Params::new()).await;

        assert!(matches!(
            result,
            Err(ApiError::RetryLoopExhausted { attempts: 3 })
        ));
        assert_eq!(client.calls(), 3);
        assert_eq!(sleeper.delays().len(), 2);
    }

    #[tokio::test]
    async fn response_with_lone_error_key_is_returned() {
        let client = Arc::new(ScriptedClient::with_json(vec![json!({"error": "SOMETHING"})]));
        let sleeper = RecordingSleeper::default();
        let connector = connector(WEBHOOK, &client, &sleeper, &RecoveryPolicy::default());

        let response = connector.send_request("scope", &Params::new()).await.unwrap();

        assert_eq!(response.get("error"), Some(&json!("SOMETHING")));
    }
}
