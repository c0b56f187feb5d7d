use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::sync::OnceLock;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}
static REQ_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static ACTIVE_SESSIONS: OnceLock<IntGauge> = OnceLock::new();
static SESSION_OUTCOMES: OnceLock<IntCounterVec> = OnceLock::new();
static TOOL_CALLS: OnceLock<IntCounterVec> = OnceLock::new();
static CREDITS_CHARGED: OnceLock<IntCounterVec> = OnceLock::new();

pub fn init_metrics() {
    let req_counter = REQ_COUNTER.get_or_init(|| {
        IntCounterVec::new(
            prometheus::opts!("requests_total", "Total requests per route"),
            &["route", "status"],
        )
        .expect("static metric definition")
    });

    let active_sessions = ACTIVE_SESSIONS.get_or_init(|| {
        IntGauge::new("active_sessions", "Sessions currently holding a device connection")
            .expect("static metric definition")
    });

    let session_outcomes = SESSION_OUTCOMES.get_or_init(|| {
        IntCounterVec::new(
            prometheus::opts!("session_outcomes_total", "Sessions closed, by close status"),
            &["status"],
        )
        .expect("static metric definition")
    });

    let tool_calls = TOOL_CALLS.get_or_init(|| {
        IntCounterVec::new(
            prometheus::opts!("tool_calls_total", "Model-requested tool and action calls"),
            &["name", "kind"],
        )
        .expect("static metric definition")
    });

    let credits_charged = CREDITS_CHARGED.get_or_init(|| {
        IntCounterVec::new(
            prometheus::opts!("credits_charged_total", "Credits charged, by charge kind"),
            &["kind"],
        )
        .expect("static metric definition")
    });

    REGISTRY.register(Box::new(req_counter.clone())).ok();
    REGISTRY.register(Box::new(active_sessions.clone())).ok();
    REGISTRY.register(Box::new(session_outcomes.clone())).ok();
    REGISTRY.register(Box::new(tool_calls.clone())).ok();
    REGISTRY.register(Box::new(credits_charged.clone())).ok();
}

pub fn inc_request(route: &str, status: &str) {
    if let Some(counter) = REQ_COUNTER.get() {
        counter.with_label_values(&[route, status]).inc();
    }
}

pub fn inc_sessions() {
    if let Some(gauge) = ACTIVE_SESSIONS.get() {
        gauge.inc();
    }
}

pub fn dec_sessions() {
    if let Some(gauge) = ACTIVE_SESSIONS.get() {
        gauge.dec();
    }
}

pub fn inc_session_outcome(status: &str) {
    if let Some(counter) = SESSION_OUTCOMES.get() {
        counter.with_label_values(&[status]).inc();
    }
}

pub fn inc_tool_call(name: &str, kind: &str) {
    if let Some(counter) = TOOL_CALLS.get() {
        counter.with_label_values(&[name, kind]).inc();
    }
}

pub fn add_credits(kind: &str, credits: i64) {
    if credits <= 0 {
        return;
    }
    if let Some(counter) = CREDITS_CHARGED.get() {
        counter.with_label_values(&[kind]).inc_by(credits as u64);
    }
}

/// Prometheus text exposition of everything registered so far.
pub fn render() -> anyhow::Result<Vec<u8>> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}

#[cfg(feature = "server")]
pub async fn get_metrics() -> axum::response::Response {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    match render() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            buffer,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("metrics encoding failed: {}", e))
            .into_response(),
    }
}
