//! Tests for the wire format.

use super::wire::{BatchQuery, Params, batch_payload, build_query, call_payload, decode};
use crate::error::ApiError;
use serde_json::json;

fn params(value: serde_json::Value) -> Params {
    value.as_object().cloned().unwrap()
}

mod query_string {
    use super::*;

    #[test]
    fn flat_scalars() {
        let query = build_query(&params(json!({"id": 2, "name": "Deal one"})));
        assert_eq!(query, "id=2&name=Deal+one");
    }

    #[test]
    fn nested_objects_use_brackets() {
        let query = build_query(&params(json!({"filter": {"STATUS": 5}})));
        assert_eq!(query, "filter%5BSTATUS%5D=5");
    }

    #[test]
    fn arrays_use_indices() {
        let query = build_query(&params(json!({"select": ["ID", "TITLE"]})));
        assert_eq!(query, "select%5B0%5D=ID&select%5B1%5D=TITLE");
    }

    #[test]
    fn booleans_become_digits_and_nulls_vanish() {
        let query = build_query(&params(json!({"a": true, "b": false, "c": null})));
        assert_eq!(query, "a=1&b=0");
    }

    #[test]
    fn empty_params_give_empty_string() {
        assert_eq!(build_query(&Params::new()), "");
    }

    #[test]
    fn reserved_characters_are_escaped() {
        let query = build_query(&params(json!({"q": "a&b=c"})));
        assert_eq!(query, "q=a%26b%3Dc");
    }

    #[test]
    fn command_joins_method_and_query() {
        let query = BatchQuery::new("crm.deal.get", params(json!({"id": 2})));
        assert_eq!(query.command(), "crm.deal.get?id=2");
        assert_eq!(BatchQuery::bare("scope").command(), "scope?");
    }
}

mod payloads {
    use super::*;

    #[test]
    fn call_payload_without_auth_is_params() {
        let body = call_payload(&params(json!({"id": 2})), None);
        assert_eq!(body, json!({"id": 2}));
    }

    #[test]
    fn call_payload_appends_auth() {
        let body = call_payload(&params(json!({"id": 2})), Some("token"));
        assert_eq!(body, json!({"id": 2, "auth": "token"}));
    }

    #[test]
    fn batch_payload_keeps_query_order() {
        let queries = vec![
            BatchQuery::bare("scope"),
            BatchQuery::new("crm.deal.get", params(json!({"id": 2}))),
        ];

        let body = batch_payload(&queries, Some("t"));

        assert_eq!(
            body,
            json!({"cmd": ["scope?", "crm.deal.get?id=2"], "halt": 0, "auth": "t"})
        );
    }
}

mod decoding {
    use super::*;

    #[test]
    fn object_passes_through() {
        let response = decode(br#"{"result": true}"#).unwrap();
        assert_eq!(response.get("result"), Some(&json!(true)));
    }

    #[test]
    fn blank_null_and_empty_array_are_empty() {
        for body in [&b""[..], b"  \n", b"null", b"[]"] {
            assert!(decode(body).unwrap().is_empty());
        }
    }

    #[test]
    fn non_json_is_empty() {
        assert!(decode(b"<html>Bad gateway</html>").unwrap().is_empty());
    }

    #[test]
    fn other_values_are_unexpected() {
        assert!(matches!(
            decode(b"42"),
            Err(ApiError::UnexpectedResponse(_))
        ));
        assert!(matches!(
            decode(b"[1, 2]"),
            Err(ApiError::UnexpectedResponse(_))
        ));
    }
}
