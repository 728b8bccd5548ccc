//! Tests for the run module.

use super::*;

use std::collections::VecDeque;
use std::sync::Mutex;

use b24_client::config::Cli;
use b24_client::credential::{MemoryCredentialStore, Webhook};
use b24_client::transport::{HttpError, HttpRequest, HttpResponse};
use serde_json::json;

const WEBHOOK: &str = "https://example.bitrix24.com/rest/1/secret/";

/// Answers with queued JSON bodies and records request URLs.
#[derive(Debug, Default)]
struct QueuedClient {
    bodies: Mutex<VecDeque<Value>>,
    urls: Mutex<Vec<String>>,
}

impl QueuedClient {
    fn new(bodies: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            bodies: Mutex::new(bodies.into()),
            urls: Mutex::new(Vec::new()),
        })
    }

    fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl HttpClient for QueuedClient {
    async fn request(&self, req: HttpRequest) -> Result<HttpResponse, HttpError> {
        self.urls.lock().unwrap().push(req.url.to_string());
        let body = self.bodies.lock().unwrap().pop_front().unwrap();
        Ok(HttpResponse::new(
            http::StatusCode::OK,
            http::HeaderMap::new(),
            body.to_string().into_bytes(),
        ))
    }
}

fn config(args: &[&str]) -> (ValidatedConfig, Command) {
    let mut full_args = vec!["b24-client"];
    full_args.extend(args);
    let cli = Cli::parse_from_iter(full_args);
    let config = ValidatedConfig::from_raw(&cli, None).unwrap();
    (config, cli.command)
}

mod run_error {
    use super::*;

    #[test]
    fn interrupted_displays_message() {
        let error = RunError::Interrupted;
        assert_eq!(error.to_string(), "Interrupted before the command finished");
    }

    #[test]
    fn api_error_is_transparent() {
        let error = RunError::from(ApiError::EmptyResponse);
        assert_eq!(
            error.to_string(),
            "Bitrix24 returned an empty response to your request."
        );
    }

    #[test]
    fn missing_setting_names_command() {
        let error = RunError::MissingSetting {
            command: "install",
            setting: "client_id",
        };
        assert_eq!(error.to_string(), "Missing setting for install: client_id");
    }
}

mod arguments {
    use super::*;

    #[test]
    fn absent_params_are_empty() {
        assert!(parse_params(None).unwrap().is_empty());
    }

    #[test]
    fn params_object_is_parsed() {
        let params = parse_params(Some(r#"{"id": 7, "select": ["ID"]}"#)).unwrap();

        assert_eq!(params.get("id"), Some(&json!(7)));
        assert_eq!(params.get("select"), Some(&json!(["ID"])));
    }

    #[test]
    fn params_must_be_an_object() {
        let result = parse_params(Some("[1, 2]"));

        assert!(matches!(
            result,
            Err(RunError::InvalidJson {
                what: "--params",
                ..
            })
        ));
    }

    #[test]
    fn queries_are_parsed_in_order() {
        let queries = parse_queries(
            r#"[{"method": "crm.deal.get", "params": {"id": 1}}, {"method": "profile"}]"#,
        )
        .unwrap();

        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].method, "crm.deal.get");
        assert_eq!(queries[0].params.get("id"), Some(&json!(1)));
        assert_eq!(queries[1], BatchQuery::bare("profile"));
    }

    #[test]
    fn query_without_method_is_rejected() {
        let result = parse_queries(r#"[{"params": {}}]"#);

        assert!(matches!(result, Err(RunError::InvalidJson { .. })));
    }

    #[test]
    fn query_with_unknown_key_is_rejected() {
        let result = parse_queries(r#"[{"method": "profile", "halt": 1}]"#);

        assert!(matches!(result, Err(RunError::InvalidJson { .. })));
    }
}

mod credentials {
    use super::*;

    #[test]
    fn webhook_target_becomes_webhook_credential() {
        let store = MemoryCredentialStore::new();
        let target = ConnectionTarget::Webhook(Webhook::new(WEBHOOK));

        let credential = resolve_credential(&store, &target).unwrap();

        assert_eq!(credential, Credential::Webhook(Webhook::new(WEBHOOK)));
    }

    #[tokio::test]
    async fn stored_member_is_loaded() {
        let store = MemoryCredentialStore::new();
        let user = TokenUser::new("m1", "example.bitrix24.com", "a1", "r1", "app", "secret");
        let saved = store.save(&user).await.unwrap();

        let credential =
            resolve_credential(&store, &ConnectionTarget::Member("m1".to_string())).unwrap();

        assert_eq!(credential, Credential::Token(saved));
    }

    #[test]
    fn unknown_member_is_unregistered() {
        let store = MemoryCredentialStore::new();

        let credential =
            resolve_credential(&store, &ConnectionTarget::Member("ghost".to_string())).unwrap();

        match credential {
            Credential::Token(user) => {
                assert_eq!(user.member_id, "ghost");
                assert!(!user.is_registered());
            }
            Credential::Webhook(_) => panic!("expected a token credential"),
        }
    }

    #[test]
    fn install_request_takes_member_and_app_credentials() {
        let (config, _) = config(&[
            "--member-id",
            "m1",
            "--client-id",
            "app",
            "--client-secret",
            "secret",
            "install",
            "--domain",
            "example.bitrix24.com",
            "--access-token",
            "a1",
            "--refresh-token",
            "r1",
        ]);

        let request = install_request(
            &config,
            "example.bitrix24.com".to_string(),
            "a1".to_string(),
            "r1".to_string(),
            Some(3600),
        )
        .unwrap();

        assert_eq!(request.member_id, "m1");
        assert_eq!(request.client_id, "app");
        assert_eq!(request.client_secret, "secret");
        assert_eq!(request.expires_in, Some(3600));
    }

    #[test]
    fn install_request_without_member_fails() {
        let (config, _) = config(&["--webhook", WEBHOOK, "call", "profile"]);

        let result = install_request(&config, String::new(), String::new(), String::new(), None);

        assert!(matches!(
            result,
            Err(RunError::MissingSetting {
                setting: "member_id",
                ..
            })
        ));
    }

    #[test]
    fn user_summary_omits_secrets() {
        let user = TokenUser::new("m1", "example.bitrix24.com", "a1", "r1", "app", "s3cr3t")
            .with_id(4);

        let summary = user_summary(&user).to_string();

        assert!(summary.contains("\"id\":4"));
        assert!(!summary.contains("a1"));
        assert!(!summary.contains("s3cr3t"));
    }
}

mod commands {
    use super::*;

    #[tokio::test]
    async fn call_prints_response() {
        let http = QueuedClient::new(vec![json!({"result": {"ID": "1"}})]);
        let store = Arc::new(MemoryCredentialStore::new());
        let (config, command) = config(&["--webhook", WEBHOOK, "call", "profile"]);

        let output = run_command(&config, command, Arc::clone(&http), store)
            .await
            .unwrap();

        assert_eq!(output, Some(json!({"result": {"ID": "1"}})));
        assert_eq!(http.urls(), vec![format!("{WEBHOOK}profile.json")]);
    }

    #[tokio::test]
    async fn batch_prints_results_in_order() {
        let http = QueuedClient::new(vec![json!({
            "result": {
                "result": [{"ID": "1"}, {"ID": "2"}],
                "result_error": [],
            }
        })]);
        let store = Arc::new(MemoryCredentialStore::new());
        let (config, command) = config(&[
            "--webhook",
            WEBHOOK,
            "batch",
            r#"[{"method": "crm.deal.get", "params": {"id": 1}}, {"method": "crm.deal.get", "params": {"id": 2}}]"#,
        ]);

        let output = run_command(&config, command, Arc::clone(&http), store)
            .await
            .unwrap();

        assert_eq!(output, Some(json!([{"ID": "1"}, {"ID": "2"}])));
        assert_eq!(http.urls(), vec![format!("{WEBHOOK}batch.json")]);
    }

    #[tokio::test]
    async fn get_all_single_page() {
        let http = QueuedClient::new(vec![json!({
            "result": [{"ID": "1"}, {"ID": "2"}],
            "total": 2,
        })]);
        let store = Arc::new(MemoryCredentialStore::new());
        let (config, command) = config(&["--webhook", WEBHOOK, "get-all", "crm.deal.list"]);

        let output = run_command(&config, command, Arc::clone(&http), store)
            .await
            .unwrap();

        assert_eq!(output, Some(json!([{"ID": "1"}, {"ID": "2"}])));
    }

    #[tokio::test]
    async fn get_all_error_response_fails() {
        let http = QueuedClient::new(vec![json!({
            "error": "ERROR_METHOD_NOT_FOUND",
            "error_description": "Method not found!",
        })]);
        let store = Arc::new(MemoryCredentialStore::new());
        let (config, command) = config(&["--webhook", WEBHOOK, "get-all", "crm.nothing.list"]);

        let result = run_command(&config, command, http, store).await;

        assert!(matches!(result, Err(RunError::Api(_))));
    }

    #[tokio::test]
    async fn unknown_member_fails_without_sending() {
        let http = QueuedClient::new(vec![]);
        let store = Arc::new(MemoryCredentialStore::new());
        let (config, command) = config(&["--member-id", "ghost", "call", "profile"]);

        let result = run_command(&config, command, Arc::clone(&http), store).await;

        assert!(matches!(
            result,
            Err(RunError::Api(ApiError::InvalidCredential(_)))
        ));
        assert!(http.urls().is_empty());
    }

    #[tokio::test]
    async fn install_registers_member() {
        let http = QueuedClient::new(vec![json!({"result": {"ID": "9", "ADMIN": true}})]);
        let store = Arc::new(MemoryCredentialStore::new());
        let (config, command) = config(&[
            "--member-id",
            "m1",
            "--client-id",
            "app",
            "--client-secret",
            "secret",
            "install",
            "--domain",
            "example.bitrix24.com",
            "--access-token",
            "a1",
            "--refresh-token",
            "r1",
        ]);

        let output = run_command(&config, command, Arc::clone(&http), Arc::clone(&store))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(output["member_id"], "m1");
        assert_eq!(output["user_id"], 9);
        assert_eq!(output["is_admin"], true);
        assert!(store.find_by_member_id("m1").unwrap().is_some());
        assert_eq!(
            http.urls(),
            vec!["https://example.bitrix24.com/rest/profile.json".to_string()]
        );
    }
}
