//! Property-based tests for the cassette round-trip, matcher FIFO
//! discipline, and diff normalization invariants.

use std::collections::HashSet;

use proptest::prelude::*;
use serde_json::{Value, json};

use mcp_cassette::cassette::{Cassette, Interaction};
use mcp_cassette::matcher::{MethodParamsMatcher, StrictMatcher, Matcher, match_key_for};
use mcp_cassette::verify::{deep_diff, strip_volatile};

/// Arbitrary JSON value, a few levels deep.
fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 _\\-]{0,12}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 24, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z_]{1,8}", inner, 0..4).prop_map(|map| {
                Value::Object(map.into_iter().collect())
            }),
        ]
    })
}

/// Arbitrary params object (JSON object or absent).
fn arb_params() -> impl Strategy<Value = Option<Value>> {
    prop::option::of(
        prop::collection::btree_map("[a-z_]{1,8}", arb_json(), 0..4)
            .prop_map(|map| Value::Object(map.into_iter().collect())),
    )
}

fn request_with(method: &str, params: Option<Value>, id: u64) -> Value {
    let mut request = json!({"jsonrpc": "2.0", "id": id, "method": method});
    if let Some(params) = params {
        request["params"] = params;
    }
    request
}

fn interaction_with(method: &str, params: Option<Value>, marker: usize) -> Interaction {
    Interaction::JsonRpcRequest {
        request: request_with(method, params, marker as u64),
        response: Some(json!({"jsonrpc": "2.0", "id": marker, "result": {"marker": marker}})),
        response_is_sse: false,
        response_status: 200,
        latency_ms: 0,
    }
}

proptest! {
    /// Serialize/deserialize round-trips preserve the cassette exactly.
    #[test]
    fn cassette_round_trips_through_json(
        params in arb_params(),
        response in arb_json(),
        latency in 0u64..100_000,
        status in prop_oneof![Just(200u16), Just(202), Just(400), Just(500)],
    ) {
        let mut cassette = Cassette::new("http://localhost:8000/mcp");
        cassette.add_interaction(Interaction::JsonRpcRequest {
            request: request_with("tools/call", params, 1),
            response: Some(response),
            response_is_sse: false,
            response_status: status,
            latency_ms: latency,
        });
        cassette.add_interaction(Interaction::Lifecycle {
            http_method: "GET".to_string(),
            http_path: "/mcp".to_string(),
            response_is_sse: true,
            response_status: 200,
            latency_ms: 0,
        });

        let text = serde_json::to_string_pretty(&cassette).expect("serialize");
        let reloaded: Cassette = serde_json::from_str(&text).expect("deserialize");
        prop_assert_eq!(reloaded, cassette);
    }

    /// k identical requests against n identical recordings return the first
    /// min(k, n) responses in recorded order; request k > n misses.
    #[test]
    fn matcher_fifo_discipline(
        params in arb_params(),
        n in 1usize..5,
        k in 1usize..8,
    ) {
        let interactions: Vec<Interaction> = (0..n)
            .map(|i| interaction_with("tools/call", params.clone(), i))
            .collect();
        let mut matcher = MethodParamsMatcher::new(&interactions);

        let incoming = request_with("tools/call", params, 999);
        for round in 0..k {
            let matched = matcher.match_request(&incoming);
            if round < n {
                let matched = matched.expect("within recorded count");
                prop_assert_eq!(
                    matched.response().expect("response")["result"]["marker"].as_u64(),
                    Some(round as u64)
                );
            } else {
                prop_assert!(matched.is_none());
            }
        }
        prop_assert!(matcher.all_consumed());
        prop_assert_eq!(matcher.unmatched_requests().len(), k.saturating_sub(n));
    }

    /// Replacing top-level _meta on either side never changes method_params
    /// match outcomes.
    #[test]
    fn meta_is_invisible_to_method_params(
        params in prop::collection::btree_map("[a-z_]{1,8}", arb_json(), 0..4),
        recorded_token in any::<u32>(),
        incoming_token in any::<u32>(),
    ) {
        let mut recorded_params: serde_json::Map<String, Value> =
            params.clone().into_iter().collect();
        recorded_params.insert("_meta".to_string(), json!({"progressToken": recorded_token}));
        let mut incoming_params: serde_json::Map<String, Value> =
            params.into_iter().collect();
        incoming_params.insert("_meta".to_string(), json!({"progressToken": incoming_token}));

        let recorded = request_with("tools/call", Some(Value::Object(recorded_params)), 1);
        let incoming = request_with("tools/call", Some(Value::Object(incoming_params)), 2);
        prop_assert_eq!(match_key_for(&recorded), match_key_for(&incoming));
    }

    /// Under strict matching, differing _meta values miss.
    #[test]
    fn meta_is_visible_to_strict(
        recorded_token in any::<u32>(),
        incoming_token in any::<u32>(),
    ) {
        prop_assume!(recorded_token != incoming_token);

        let interaction = interaction_with(
            "tools/call",
            Some(json!({"name": "t", "_meta": {"progressToken": recorded_token}})),
            0,
        );
        let mut matcher = StrictMatcher::new(&[interaction]);

        let incoming = request_with(
            "tools/call",
            Some(json!({"name": "t", "_meta": {"progressToken": incoming_token}})),
            9,
        );
        prop_assert!(matcher.match_request(&incoming).is_none());
    }

    /// Stripping then diffing a value against itself is always clean.
    #[test]
    fn strip_then_self_diff_is_empty(value in arb_json()) {
        let none = HashSet::new();
        let stripped = strip_volatile(&value, &none, &none);
        prop_assert!(deep_diff(&stripped, &stripped).is_empty());
    }

    /// Diffing two container-encoding JSON strings equals diffing the
    /// parsed forms.
    #[test]
    fn json_in_string_diff_matches_parsed_diff(
        expected in prop::collection::btree_map("[a-z_]{1,6}", arb_json(), 1..4),
        actual in prop::collection::btree_map("[a-z_]{1,6}", arb_json(), 1..4),
    ) {
        let expected = Value::Object(expected.into_iter().collect());
        let actual = Value::Object(actual.into_iter().collect());

        let as_strings = deep_diff(
            &Value::String(expected.to_string()),
            &Value::String(actual.to_string()),
        );
        let as_values = deep_diff(&expected, &actual);
        prop_assert_eq!(as_strings, as_values);
    }
}
