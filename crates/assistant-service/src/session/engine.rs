//! The per-connection session state machine.
//!
//! Authenticate, check quota, restore the prior thread, then alternate
//! between streaming a generation and dispatching the function calls it asks
//! for. Once the model answers without calling anything, verify the final
//! message, persist the thread and close.

use super::pacing::split_words;
use super::system_prompt::system_prompt;
use super::thread::{load_thread, store_thread, StoredThread};
use super::SessionParams;
use crate::backend::{GenerationBackend, GenerationEvent, GenerationRequest, Usage};
use crate::config::SessionSettings;
use crate::error::SessionError;
use crate::metrics;
use crate::protocol::{CloseStatus, ServerMessage};
use crate::quota::{IdentityResolver, QuotaLedger};
use crate::registry::{rpc_error, tool_error, DeviceUnresponsive, Registry, ToolContext};
use crate::store::KeyValueStore;
use crate::transcript::{FunctionCall, Transcript};
use crate::transport::DeviceTransport;
use crate::verifier::{format_lies, Verifier};
use crate::widgets::{WidgetContext, WidgetExtractor, WidgetRenderer};
use chrono::Utc;
use futures_util::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Process-wide collaborators every session borrows.
#[derive(Clone)]
pub struct SessionServices {
    pub store: Arc<dyn KeyValueStore>,
    pub identity: Arc<dyn IdentityResolver>,
    pub backend: Arc<dyn GenerationBackend>,
    pub registry: Arc<Registry>,
    pub renderer: Arc<dyn WidgetRenderer>,
    pub verifier: Arc<Verifier>,
    pub settings: SessionSettings,
}

pub struct Session {
    services: SessionServices,
    params: Arc<SessionParams>,
    /// Fresh id; the thread is stored under it.
    thread_id: String,
    transcript: Transcript,
    widgets: Arc<Mutex<WidgetContext>>,
    /// Set once the watch misses an action deadline with a reply still owed.
    /// Its late reply may arrive at any point, so no further action reads
    /// from the transport.
    device_unresponsive: bool,
}

impl Session {
    pub fn new(services: SessionServices, params: SessionParams) -> Self {
        Self {
            services,
            params: Arc::new(params),
            thread_id: Uuid::new_v4().to_string(),
            transcript: Transcript::new(),
            widgets: Arc::new(Mutex::new(WidgetContext::default())),
            device_unresponsive: false,
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Drive the session to completion and close the transport. Returns the
    /// stored thread id on success.
    pub async fn run(mut self, transport: &dyn DeviceTransport) -> Result<String, SessionError> {
        metrics::inc_sessions();
        let result = self.drive(transport).await;
        metrics::dec_sessions();

        let (status, reason) = match &result {
            Ok(()) => (CloseStatus::Normal, ""),
            Err(e) => {
                error!(thread_id = %self.thread_id, "session failed: {}", e);
                (e.close_status(), e.close_reason())
            }
        };
        metrics::inc_session_outcome(status.as_str());
        if let Err(e) = transport.close(status, reason).await {
            debug!("close failed: {}", e);
        }
        result.map(|()| self.thread_id)
    }

    async fn drive(&mut self, transport: &dyn DeviceTransport) -> Result<(), SessionError> {
        let ledger = self.authenticate().await?;
        self.restore().await?;
        self.transcript.push_user(self.params.prompt.clone());

        let mut iteration = 0;
        loop {
            iteration += 1;
            if !self.generate_iteration(iteration, &ledger, transport).await? {
                break;
            }
            debug!(iteration, "going around again");
        }

        self.verify(&ledger, transport).await;

        if let Err(e) = transport.send(ServerMessage::Done).await {
            warn!("write to client failed: {}", e);
        }
        let thread = {
            let widgets = self.widgets.lock().await;
            StoredThread::new(&self.thread_id, &self.transcript, &widgets)
        };
        store_thread(self.services.store.as_ref(), &thread, self.services.settings.thread_ttl)
            .await
            .map_err(SessionError::Persist)?;
        if let Err(e) = transport.send(ServerMessage::ThreadId(self.thread_id.clone())).await {
            warn!("sending thread id failed: {}", e);
        }
        info!(thread_id = %self.thread_id, turns = self.transcript.len(), "request handled successfully");
        Ok(())
    }

    /// Resolve the user and check they may spend credits.
    async fn authenticate(&self) -> Result<QuotaLedger, SessionError> {
        let user = self
            .services
            .identity
            .resolve(&self.params.token)
            .await
            .map_err(|e| SessionError::Unauthorized(e.to_string()))?;
        if !user.has_subscription {
            return Err(SessionError::NoSubscription { user_id: user.user_id });
        }

        let ledger = QuotaLedger::with_cap(
            self.services.store.clone(),
            user.user_id,
            self.services.settings.monthly_quota_credits,
        );
        let (used, remaining) = ledger.get_quota().await.map_err(SessionError::QuotaLookup)?;
        if remaining < 1 {
            return Err(SessionError::QuotaExceeded { user_id: user.user_id, used });
        }
        info!(user_id = user.user_id, used, remaining, "quota checked");
        Ok(ledger)
    }

    async fn restore(&mut self) -> Result<(), SessionError> {
        let Some(original) = self.params.thread_id.clone() else {
            return Ok(());
        };
        let restore_error = |reason: String| SessionError::Restore {
            thread_id: original.clone(),
            reason,
        };
        let thread = load_thread(self.services.store.as_ref(), &original)
            .await
            .map_err(|e| restore_error(e.to_string()))?
            .ok_or_else(|| restore_error("thread not found".to_string()))?;
        let earlier = Transcript::from_persisted(thread.messages).map_err(|e| restore_error(e.to_string()))?;
        debug!(original = %original, turns = earlier.len(), "restored thread");
        self.transcript.prepend(earlier);
        *self.widgets.lock().await = thread.context_storage;
        Ok(())
    }

    /// One generation request. Returns whether another is needed.
    async fn generate_iteration(
        &mut self,
        iteration: u32,
        ledger: &QuotaLedger,
        transport: &dyn DeviceTransport,
    ) -> Result<bool, SessionError> {
        let offer_tools = iteration <= self.services.settings.max_tool_iterations;
        let mut request = GenerationRequest::chat(
            &self.services.settings.chat_model,
            system_prompt(&self.params, Utc::now()),
            self.transcript.turns().to_vec(),
        );
        if offer_tools {
            request = request.with_tools(self.services.registry.definitions_for_capabilities(&self.params.actions));
        } else {
            info!(iteration, "tool budget spent, asking for a plain answer");
        }

        let mut stream = self.services.backend.stream(request).await.map_err(SessionError::Backend)?;
        let mut extractor = WidgetExtractor::new();
        let mut content = String::new();
        let mut calls: Vec<FunctionCall> = Vec::new();
        let mut usage: Option<Usage> = None;

        while let Some(event) = stream.next().await {
            match event.map_err(SessionError::Backend)? {
                GenerationEvent::Text(chunk) => {
                    content.push_str(&chunk);
                    let ready = {
                        let widgets = self.widgets.lock().await;
                        extractor
                            .feed(&chunk, self.services.renderer.as_ref(), &self.params, &widgets)
                            .await
                    };
                    if let Some(text) = ready {
                        self.forward(&text, transport).await?;
                    }
                }
                GenerationEvent::FunctionCall(call) => calls.push(call),
                GenerationEvent::Usage(reported) => usage = Some(reported),
            }
        }
        if let Some(leftover) = extractor.finish() {
            warn!("stream ended inside a widget tag: {:?}", leftover);
            if !leftover.contains("<!") {
                self.forward(&leftover, transport).await?;
            }
        }

        if let Some(usage) = usage {
            charge_usage(ledger, usage).await;
        }
        if !content.trim().is_empty() {
            self.transcript.push_model_text(content);
        }
        if calls.is_empty() {
            return Ok(false);
        }
        if !offer_tools {
            warn!(iteration, "model called functions it was not offered; ignoring");
            return Ok(false);
        }

        for call in calls {
            self.dispatch(call, ledger, transport).await?;
        }
        Ok(true)
    }

    /// Send text to the client one word at a time.
    async fn forward(&self, text: &str, transport: &dyn DeviceTransport) -> Result<(), SessionError> {
        for word in split_words(text) {
            transport
                .send(ServerMessage::Content(word.to_string()))
                .await
                .map_err(SessionError::Transport)?;
            tokio::time::sleep(self.services.settings.word_delay).await;
        }
        Ok(())
    }

    async fn dispatch(
        &mut self,
        call: FunctionCall,
        ledger: &QuotaLedger,
        transport: &dyn DeviceTransport,
    ) -> Result<(), SessionError> {
        let name = call.name.clone();
        let args = match &call.args {
            Value::Null => "{}".to_string(),
            args => args.to_string(),
        };
        self.transcript.push_model_call(call);
        info!(function = %name, "calling function");

        let registry = &self.services.registry;
        transport
            .send(ServerMessage::Thought(registry.summarise(&name, &args)))
            .await
            .map_err(SessionError::Transport)?;

        let ctx = ToolContext {
            params: self.params.clone(),
            ledger: ledger.clone(),
            widgets: self.widgets.clone(),
            thread_id: self.thread_id.clone(),
        };
        let result = if !registry.is_action(&name) {
            registry.call_function(&ctx, &name, &args).await
        } else if self.device_unresponsive {
            warn!(function = %name, "watch stopped responding, not sending action");
            Ok(rpc_error("the watch stopped responding"))
        } else {
            registry.call_action(&ctx, &name, &args, transport).await
        };
        let response = match result {
            Ok(response) => response,
            Err(e) if e.is::<DeviceUnresponsive>() => {
                warn!(function = %name, "{}", e);
                self.device_unresponsive = true;
                rpc_error("timed out waiting for the watch to respond")
            }
            Err(e) => {
                warn!(function = %name, "call function failed: {}", e);
                tool_error(format!("failed to call function: {}", e))
            }
        };
        self.transcript
            .push_function(name, response)
            .map_err(SessionError::Backend)
    }

    async fn verify(&self, ledger: &QuotaLedger, transport: &dyn DeviceTransport) {
        let lies = match self.services.verifier.find_lies(&self.transcript, ledger).await {
            Ok(lies) => lies,
            Err(e) => {
                warn!("find lies failed: {}", e);
                return;
            }
        };
        let Some(message) = format_lies(&lies) else {
            return;
        };
        let topics: Vec<&str> = lies.iter().map(|t| t.as_str()).collect();
        warn!(thread_id = %self.thread_id, ?topics, "lies detected");
        if let Err(e) = transport.send(ServerMessage::Warning(message)).await {
            warn!("write to client failed: {}", e);
        }
    }
}

async fn charge_usage(ledger: &QuotaLedger, usage: Usage) {
    if let Err(e) = ledger.charge_input_tokens(usage.input_tokens).await {
        warn!("charge input quota failed: {}", e);
    }
    if let Err(e) = ledger.charge_output_tokens(usage.output_tokens).await {
        warn!("charge output quota failed: {}", e);
    }
}
