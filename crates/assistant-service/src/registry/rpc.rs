//! Request/response round trips to the client device during an action.
//!
//! An action callback receives a [`DeviceRpc`]; each `call` hands one
//! request to a pump that writes it to the transport and reads exactly one
//! reply. The handle is not `Clone` and `call` takes `&mut self`, so at most
//! one request is ever outstanding. The pump shares the action's deadline:
//! once it passes, every request resolves to a structured error.
//!
//! A reply abandoned at the deadline may still arrive later and would be read
//! as the answer to the next request. The receiver records whether a read
//! was cut short; the caller must then stop using the transport.

use crate::protocol::{parse_action_reply, ServerMessage};
use crate::transport::DeviceTransport;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

struct PendingRequest {
    payload: Value,
    reply: oneshot::Sender<Value>,
}

pub struct DeviceRpc {
    requests: mpsc::Sender<PendingRequest>,
}

pub(crate) struct RpcReceiver {
    requests: mpsc::Receiver<PendingRequest>,
    awaiting_reply: Arc<AtomicBool>,
}

/// Set while a request has been written and its reply not yet read.
#[derive(Clone)]
pub(crate) struct ReplyGuard(Arc<AtomicBool>);

impl ReplyGuard {
    /// True when a read was dropped before the device answered.
    pub(crate) fn abandoned(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub(crate) fn channel() -> (DeviceRpc, RpcReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (
        DeviceRpc { requests: tx },
        RpcReceiver {
            requests: rx,
            awaiting_reply: Arc::default(),
        },
    )
}

pub fn rpc_error(message: impl Into<String>) -> Value {
    json!({"status": "error", "error": message.into()})
}

impl DeviceRpc {
    /// Send `payload` to the device and wait for its reply. Failures come
    /// back as `{"status": "error", "error": ...}`.
    pub async fn call(&mut self, payload: Value) -> Value {
        let (reply, response) = oneshot::channel();
        if self.requests.send(PendingRequest { payload, reply }).await.is_err() {
            return rpc_error("action channel closed");
        }
        response
            .await
            .unwrap_or_else(|_| rpc_error("action channel closed"))
    }
}

impl RpcReceiver {
    pub(crate) fn reply_guard(&self) -> ReplyGuard {
        ReplyGuard(Arc::clone(&self.awaiting_reply))
    }

    /// Serve requests until every [`DeviceRpc`] handle is dropped.
    pub(crate) async fn pump(mut self, transport: &dyn DeviceTransport, deadline: Instant) {
        while let Some(request) = self.requests.recv().await {
            let round_trip = exchange(transport, request.payload, &self.awaiting_reply);
            let response = match tokio::time::timeout_at(deadline, round_trip).await {
                Ok(response) => response,
                Err(_) => {
                    warn!("device did not answer before the action deadline");
                    rpc_error("timed out waiting for the watch to respond")
                }
            };
            let _ = request.reply.send(response);
        }
    }
}

async fn exchange(transport: &dyn DeviceTransport, payload: Value, awaiting_reply: &AtomicBool) -> Value {
    debug!("Sending request to watch...");
    awaiting_reply.store(true, Ordering::SeqCst);
    if let Err(e) = transport.send(ServerMessage::ActionRequest(payload)).await {
        awaiting_reply.store(false, Ordering::SeqCst);
        warn!("unable to write request: {}", e);
        return rpc_error(format!("unable to write request: {}", e));
    }
    debug!("Reading response from watch...");
    let received = transport.receive().await;
    awaiting_reply.store(false, Ordering::SeqCst);
    let frame = match received {
        Ok(frame) => frame,
        Err(e) => {
            warn!("unable to read response: {}", e);
            return rpc_error(format!("unable to read response: {}", e));
        }
    };
    match parse_action_reply(&frame) {
        Ok(map) => Value::Object(map),
        Err(e) => {
            warn!("{}", e);
            rpc_error(e.to_string())
        }
    }
}
