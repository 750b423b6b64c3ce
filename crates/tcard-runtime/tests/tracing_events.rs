#![forbid(unsafe_code)]

//! Structured log events emitted by the runtime.
//!
//! ```sh
//! cargo test -p tcard-runtime --test tracing_events
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tcard_core::{CardConfig, FieldKey};
use tcard_runtime::{
    BackendError, ErrorCode, HostContext, MockBackend, MockBehavior, RuntimeConfig,
    SharedResultCache, TemplateCard, register_template_card,
};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;

// ============================================================================
// Test Infrastructure
// ============================================================================

#[derive(Debug, Clone)]
struct CapturedEvent {
    level: tracing::Level,
    message: String,
    fields: HashMap<String, String>,
}

/// A tracing Layer that records every event it sees.
struct EventCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

struct FieldVisitor {
    message: String,
    fields: HashMap<String, String>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .insert(field.name().to_string(), format!("{value:?}"));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.fields.insert(field.name().to_string(), value.to_string());
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields.insert(field.name().to_string(), value.to_string());
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for EventCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = FieldVisitor {
            message: String::new(),
            fields: HashMap::new(),
        };
        event.record(&mut visitor);
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

/// Run `f` with a subscriber capturing every runtime event.
fn capture(f: impl FnOnce()) -> Vec<CapturedEvent> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let layer = EventCapture {
        events: Arc::clone(&events),
    };
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::new("tcard_runtime=trace"))
        .with(layer);
    tracing::subscriber::with_default(subscriber, f);
    let captured = events.lock().unwrap().clone();
    captured
}

fn find<'a>(events: &'a [CapturedEvent], message: &str) -> Vec<&'a CapturedEvent> {
    events.iter().filter(|e| e.message == message).collect()
}

fn card(backend: &Arc<MockBackend>) -> TemplateCard {
    let mut card = TemplateCard::new(SharedResultCache::new(4), RuntimeConfig::default());
    card.set_host(Some(HostContext::new(backend.clone(), "Ada")));
    card
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn open_and_close_are_debug_events() {
    let backend = Arc::new(MockBackend::new());
    let events = capture(|| {
        let mut card = card(&backend);
        card.set_config(CardConfig::stub()).unwrap();
        card.mount();
        card.unmount().unwrap();
    });

    let opened = find(&events, "opening template subscription");
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].level, tracing::Level::DEBUG);
    assert_eq!(opened[0].fields["field"], "primary");
    assert_eq!(opened[0].fields["backend"], "MockBackend");

    assert_eq!(find(&events, "closed template subscription").len(), 1);
    assert_eq!(find(&events, "caching rendered results").len(), 1);
}

#[test]
fn fallback_is_a_warning() {
    let backend = Arc::new(MockBackend::new().with_behavior(
        "{{ bad_expr }}",
        MockBehavior::Reject(BackendError::template_error("'bad_expr' is undefined")),
    ));
    let events = capture(|| {
        let mut card = card(&backend);
        card.set_config(CardConfig::new().with_field(FieldKey::IconColor, "{{ bad_expr }}"))
            .unwrap();
        card.mount();
    });

    let fallback = find(&events, "template subscription failed, showing raw template");
    assert_eq!(fallback.len(), 1);
    assert_eq!(fallback[0].level, tracing::Level::WARN);
    assert_eq!(fallback[0].fields["field"], "icon_color");
    assert!(fallback[0].fields["error"].contains("template_error"));
}

#[test]
fn fatal_close_is_a_warning() {
    let backend = Arc::new(MockBackend::new());
    let events = capture(|| {
        let mut card = card(&backend);
        card.set_config(CardConfig::stub()).unwrap();
        card.mount();
        backend.fail_next_unsubscribe(
            "Hello, {{user}}",
            BackendError::new(ErrorCode::Other("timeout".into()), "no answer"),
        );
        assert!(card.unmount().is_err());
    });

    let failed = find(&events, "failed to close template subscription");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].level, tracing::Level::WARN);
    assert_eq!(failed[0].fields["field"], "primary");
}

#[test]
fn trace_level_reports_pumps() {
    let backend = Arc::new(MockBackend::new());
    let events = capture(|| {
        let mut card = card(&backend);
        card.set_config(CardConfig::stub()).unwrap();
        card.mount();
        backend.push("Hello, {{user}}", "Hello, Ada");
        card.pump();
        // Idle pumps stay quiet.
        card.pump();
    });

    let applied = find(&events, "applying push");
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].level, tracing::Level::TRACE);
    let pumps = find(&events, "pump complete");
    assert_eq!(pumps.len(), 1);
    assert_eq!(pumps[0].fields["applied"], "1");
}

#[test]
fn registration_is_an_info_event() {
    let events = capture(|| {
        register_template_card();
    });
    // Another test in this binary may have registered first.
    for event in find(&events, "registered card") {
        assert_eq!(event.level, tracing::Level::INFO);
        assert_eq!(event.fields["card_type"], "tcard-template-card");
    }
}
