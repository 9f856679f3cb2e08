//! Property and table tests for the diff/patch engine and the syncers.
//!
//! Invariants checked:
//!
//! 1. Applying `diff(a, b)` to `a` yields `b`, in both list encodings.
//! 2. The same holds after the patch has been through JSON, for states
//!    whose selectors keep their shape.
//! 3. Replaying every per-transaction patch reaches the same state as a
//!    single merged patch, and a client fed either stream matches the
//!    server.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use proptest::collection::{btree_map, btree_set, vec};
use proptest::prelude::*;
use rstest::rstest;
use serde_json::json;

use glint_core::sync::{apply, diff, ListEncoding, MissingPathPolicy, State};
use glint_core::{
    Cell, ClientOptions, ClientSyncer, Runtime, ServerOptions, ServerSyncer, Source, SyncPayload,
    Value,
};

const NAMES: [&str; 4] = ["a", "b", "c", "d"];

// ── Strategies ──────────────────────────────────────────────────────────

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        "[a-z]{0,6}".prop_map(Value::String),
    ]
}

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![Just(Value::Null), scalar()]
}

fn map_of<S: Strategy<Value = Value>>(inner: S, size: std::ops::Range<usize>) -> impl Strategy<Value = Value> {
    btree_map("[a-d]", inner, size).prop_map(|map: BTreeMap<String, Value>| map.into_iter().collect())
}

/// Arbitrary values of any shape. Floats are left out so equality is exact.
fn any_value() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            vec(inner.clone(), 0..4).prop_map(Value::List),
            map_of(inner, 0..4),
            btree_set("[a-d]", 0..4).prop_map(|set| Value::Set(set.into_iter().collect())),
        ]
    })
}

/// Values of a fixed shape, so a selector never changes type between
/// states. List items are never null.
fn value_of(kind: u8) -> BoxedStrategy<Value> {
    match kind {
        0 => leaf().boxed(),
        1 => vec(scalar(), 0..5).prop_map(Value::List).boxed(),
        2 => map_of(leaf(), 0..4).boxed(),
        _ => map_of(map_of(leaf(), 0..3), 0..3).boxed(),
    }
}

/// Two states with the same selector shapes. Either side may lack a
/// selector.
fn states() -> impl Strategy<Value = (State, State)> {
    vec(0u8..4, NAMES.len())
        .prop_flat_map(|kinds| {
            kinds
                .into_iter()
                .map(|kind| (proptest::option::of(value_of(kind)), proptest::option::of(value_of(kind))))
                .collect::<Vec<_>>()
        })
        .prop_map(|entries| {
            let mut prev = State::new();
            let mut next = State::new();
            for (name, (a, b)) in NAMES.iter().zip(entries) {
                if let Some(a) = a {
                    prev.insert(name.to_string(), a);
                }
                if let Some(b) = b {
                    next.insert(name.to_string(), b);
                }
            }
            (prev, next)
        })
}

/// A sequence of selector values, one frame per transaction. The first
/// frame is the initial state.
fn timeline() -> impl Strategy<Value = Vec<Vec<Value>>> {
    vec(0u8..4, NAMES.len()).prop_flat_map(|kinds| {
        let frame: Vec<BoxedStrategy<Value>> = kinds.into_iter().map(value_of).collect();
        vec(frame, 2..7)
    })
}

fn encoding_strategy() -> impl Strategy<Value = ListEncoding> {
    prop_oneof![Just(ListEncoding::Indexed), Just(ListEncoding::Sparse)]
}

// ── Helpers ─────────────────────────────────────────────────────────────

/// Diff, send through JSON, apply. Returns the result and the number of
/// issues reported.
fn wire(prev: &State, next: &State, encoding: ListEncoding) -> (State, usize) {
    let json = SyncPayload::Patch(diff(prev, next, encoding)).to_json().unwrap();
    let SyncPayload::Patch(decoded) = SyncPayload::from_json(&json, encoding).unwrap() else {
        panic!("patch decoded as init: {json}");
    };
    let mut state = prev.clone();
    let issues = apply(&mut state, &decoded, MissingPathPolicy::Create);
    (state, issues.len())
}

struct Replica {
    server_state: State,
    client_state: State,
    snapshot_replay: State,
}

/// Run a timeline through a server and a client connected over JSON.
fn replicate(frames: &[Vec<Value>], options: ServerOptions) -> Replica {
    let encoding = if options.auto_serialize {
        ListEncoding::Indexed
    } else {
        ListEncoding::Sparse
    };

    let rt = Runtime::new();
    let cells: Vec<Cell<Value>> = frames[0].iter().map(|v| Cell::new(&rt, v.clone())).collect();
    let server: ServerSyncer<()> = ServerSyncer::new(
        &rt,
        NAMES.iter().zip(&cells).map(|(name, cell)| (*name, Source::from(cell))),
        options,
    );

    let sent: Rc<RefCell<Vec<String>>> = Rc::default();
    let sent_clone = sent.clone();
    let _connection = server
        .connect(move |_, payloads| {
            for payload in payloads {
                sent_clone.borrow_mut().push(payload.to_json().unwrap());
            }
        })
        .unwrap();

    let mut snapshot_replay = server.current_state().unwrap();
    server.hydrate(()).unwrap();

    for frame in &frames[1..] {
        rt.batch(|| {
            for (cell, value) in cells.iter().zip(frame) {
                cell.set(value.clone());
            }
        });
    }
    server.flush();

    let client_rt = Runtime::new();
    let client = ClientSyncer::new(
        &client_rt,
        NAMES.map(|name| (name, Cell::new(&client_rt, Value::Null))),
        ClientOptions::default(),
    );
    let payloads: Vec<SyncPayload> = sent
        .borrow()
        .iter()
        .map(|json| SyncPayload::from_json(json, encoding).unwrap())
        .collect();
    client.sync(&payloads);

    for payload in &payloads {
        if let SyncPayload::Patch(patch) = payload {
            apply(&mut snapshot_replay, patch, MissingPathPolicy::Create);
        }
    }

    Replica {
        server_state: server.current_state().unwrap(),
        client_state: NAMES
            .iter()
            .map(|name| (name.to_string(), client.atom(name).unwrap().peek()))
            .collect(),
        snapshot_replay,
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 1. diff then apply reproduces the target
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn apply_diff_reaches_target(
        prev in vec(any_value(), 0..4),
        next in vec(any_value(), 0..4),
        encoding in encoding_strategy(),
    ) {
        let prev: State = NAMES.iter().map(|n| n.to_string()).zip(prev).collect();
        let next: State = NAMES.iter().map(|n| n.to_string()).zip(next).collect();

        let patch = diff(&prev, &next, encoding);
        let mut state = prev.clone();
        let issues = apply(&mut state, &patch, MissingPathPolicy::Create);

        prop_assert!(issues.is_empty(), "issues: {:?}", issues);
        prop_assert_eq!(state, next);
    }

    #[test]
    fn equal_states_diff_to_nothing(state in vec(any_value(), 0..4), encoding in encoding_strategy()) {
        let state: State = NAMES.iter().map(|n| n.to_string()).zip(state).collect();
        prop_assert!(diff(&state, &state, encoding).is_empty());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. The same through JSON
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn json_patches_reach_target((prev, next) in states(), encoding in encoding_strategy()) {
        let (state, issues) = wire(&prev, &next, encoding);
        prop_assert_eq!(issues, 0);
        prop_assert_eq!(state, next);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. History replay matches the merged patch
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn replicas_converge(frames in timeline(), preserve_history in any::<bool>(), auto_serialize in any::<bool>()) {
        let options = ServerOptions {
            preserve_history,
            auto_serialize,
            ..ServerOptions::default()
        };
        let replica = replicate(&frames, options);

        prop_assert_eq!(&replica.snapshot_replay, &replica.server_state);
        prop_assert_eq!(&replica.client_state, &replica.server_state);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// Wire shapes
// ═════════════════════════════════════════════════════════════════════════

#[rstest]
#[case::replace(json!({"count": 1}), json!({"count": 2}), ListEncoding::Indexed, json!({"count": 2}))]
#[case::remove_selector(json!({"count": 1}), json!({}), ListEncoding::Indexed, json!({"count": {"__none": "__none"}}))]
#[case::unchanged(json!({"count": 1}), json!({"count": 1}), ListEncoding::Indexed, json!({}))]
#[case::map_members(
    json!({"todos": {"a": "x", "b": "y"}}),
    json!({"todos": {"a": "x", "c": "z"}}),
    ListEncoding::Indexed,
    json!({"todos": {"b": {"__none": "__none"}, "c": "z"}})
)]
#[case::indexed_list(
    json!({"items": [1, 2, 3]}),
    json!({"items": [1, 5]}),
    ListEncoding::Indexed,
    json!({"items": {"1": 5, "2": {"__none": "__none"}}})
)]
#[case::sparse_list(
    json!({"items": [1, 2, 3]}),
    json!({"items": [1, 5]}),
    ListEncoding::Sparse,
    json!({"items": [null, 5, {"__none": "__none"}]})
)]
#[case::type_change(json!({"x": 1}), json!({"x": [1]}), ListEncoding::Indexed, json!({"x": [1]}))]
fn diff_wire_shape(
    #[case] prev: serde_json::Value,
    #[case] next: serde_json::Value,
    #[case] encoding: ListEncoding,
    #[case] expected: serde_json::Value,
) {
    let prev: State = serde_json::from_value(prev).unwrap();
    let next: State = serde_json::from_value(next).unwrap();

    let patch = diff(&prev, &next, encoding);

    assert_eq!(serde_json::to_value(&patch).unwrap(), expected);
}

#[rstest]
#[case::indexed(ListEncoding::Indexed)]
#[case::sparse(ListEncoding::Sparse)]
fn growing_list_survives_the_wire(#[case] encoding: ListEncoding) {
    let prev: State = serde_json::from_value(json!({"items": ["a"]})).unwrap();
    let next: State = serde_json::from_value(json!({"items": ["a", "b", "c"]})).unwrap();

    let (state, issues) = wire(&prev, &next, encoding);

    assert_eq!(issues, 0);
    assert_eq!(state, next);
}
