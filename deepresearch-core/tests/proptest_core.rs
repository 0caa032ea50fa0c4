//! Property-based tests for core components using proptest.

use proptest::prelude::*;

use chrono::Duration;
use deepresearch_core::store::{MemorySessionStore, SessionStore};
use deepresearch_core::types::{
    ProgressEvent, ReasoningStep, ResearchCost, ResearchSession, ResearchStatus, StepKind,
    UploadedDocument, RATE_PER_1K_USD,
};

fn in_flight_status() -> impl Strategy<Value = ResearchStatus> {
    prop_oneof![
        Just(ResearchStatus::Planning),
        Just(ResearchStatus::Searching),
        Just(ResearchStatus::Drafting),
    ]
}

fn step_kind() -> impl Strategy<Value = StepKind> {
    prop_oneof![
        Just(StepKind::Plan),
        Just(StepKind::Search),
        Just(StepKind::Analyze),
        Just(StepKind::Synthesize),
    ]
}

prop_compose! {
    fn progress_event()(
        status in in_flight_status(),
        kind in step_kind(),
        title in "[A-Za-z ]{1,24}",
        tokens in 0u64..5000,
    ) -> ProgressEvent {
        ProgressEvent::new(
            status,
            ReasoningStep::new(title, "step", kind).with_metrics(tokens, 100),
        )
    }
}

// --- Store ordering properties ---

proptest! {
    #[test]
    fn store_lists_newest_first(offsets in prop::collection::vec(0i64..1_000_000, 1..20)) {
        let store = MemorySessionStore::new();
        for (i, offset) in offsets.iter().enumerate() {
            let mut session = ResearchSession::new(format!("query {i}"), None);
            session.created_at = session.created_at - Duration::seconds(*offset);
            store.upsert(&session).unwrap();
        }

        let listed = store.list().unwrap();
        prop_assert_eq!(listed.len(), offsets.len());
        for pair in listed.windows(2) {
            prop_assert!(pair[0].created_at >= pair[1].created_at);
        }
    }

    #[test]
    fn store_upsert_replaces_by_id(queries in prop::collection::vec("[a-z]{1,12}", 1..10)) {
        let store = MemorySessionStore::new();
        let mut session = ResearchSession::new("initial", None);
        for query in &queries {
            session.query = query.clone();
            store.upsert(&session).unwrap();
        }

        let listed = store.list().unwrap();
        prop_assert_eq!(listed.len(), 1);
        prop_assert_eq!(&listed[0].query, queries.last().unwrap());
    }

    #[test]
    fn store_append_to_unknown_id_is_silent(id in "[a-z0-9_-]{1,24}") {
        let store = MemorySessionStore::new();
        store
            .append_document(&id, UploadedDocument::new("notes.md", 12, "text/markdown"))
            .unwrap();
        prop_assert!(store.list().unwrap().is_empty());
        prop_assert!(store.get(&id).unwrap().is_none());
    }
}

// --- Cost properties ---

proptest! {
    #[test]
    fn cost_estimate_is_linear_in_tokens(
        input in 0u64..1_000_000,
        output in 0u64..1_000_000,
    ) {
        let cost = ResearchCost::from_tokens(input, output);
        let expected = ((input + output) as f64 / 1000.0) * RATE_PER_1K_USD;
        prop_assert!((cost.estimated_cost - expected).abs() < 1e-12);
        prop_assert_eq!(cost.input_tokens, input);
        prop_assert_eq!(cost.output_tokens, output);
    }

    #[test]
    fn cost_tip_flips_at_input_threshold(input in 0u64..10_000) {
        let cost = ResearchCost::from_tokens(input, 0);
        if input > 2000 {
            prop_assert!(cost.optimization_tip.contains("refining search scope"));
        } else {
            prop_assert_eq!(cost.optimization_tip.as_str(), "Resource usage balanced.");
        }
    }
}

// --- Session lifecycle properties ---

proptest! {
    #[test]
    fn progress_keeps_reasoning_and_timeline_in_lockstep(
        events in prop::collection::vec(progress_event(), 0..12)
    ) {
        let mut session = ResearchSession::new("lockstep", None);
        for event in events.clone() {
            prop_assert!(session.apply_progress(event));
        }

        prop_assert_eq!(session.reasoning.len(), events.len());
        prop_assert_eq!(session.timeline.len(), events.len());
        prop_assert_eq!(&session.reasoning, &session.timeline);
        if let Some(last) = events.last() {
            prop_assert_eq!(session.status, last.status);
        }
    }

    #[test]
    fn terminal_sessions_reject_further_progress(
        events in prop::collection::vec(progress_event(), 1..8)
    ) {
        let mut session = ResearchSession::new("terminal", None);
        session.fail();
        for event in events {
            prop_assert!(!session.apply_progress(event));
        }
        prop_assert!(session.reasoning.is_empty());
        prop_assert_eq!(session.status, ResearchStatus::Failed);
    }

    #[test]
    fn fresh_sessions_get_unique_ids_and_trace_prefix(n in 1usize..8) {
        let sessions: Vec<ResearchSession> = (0..n)
            .map(|i| ResearchSession::new(format!("q{i}"), None))
            .collect();
        for session in &sessions {
            prop_assert!(session.trace_id.starts_with("trace_"));
        }

        let mut ids: Vec<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        prop_assert_eq!(ids.len(), n);
    }

    #[test]
    fn session_json_roundtrip_is_lossless(
        query in ".{0,64}",
        events in prop::collection::vec(progress_event(), 0..6)
    ) {
        let mut session = ResearchSession::new(query, Some("parent".to_string()));
        for event in events {
            session.apply_progress(event);
        }

        let json = serde_json::to_string(&session).unwrap();
        let parsed: ResearchSession = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(parsed, session);
    }
}
