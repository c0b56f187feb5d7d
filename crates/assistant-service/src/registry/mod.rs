//! Tool and action registry.
//!
//! Built once at startup from a list of [`Registration`]s and read-only after
//! that. Every registration carries closures bound to its own argument type,
//! so decoding happens without any runtime type inspection.

pub mod repair;
pub mod rpc;
pub mod schema;

pub use rpc::{rpc_error, DeviceRpc};
pub use schema::{FunctionDeclaration, Schema, SchemaType};

use crate::metrics;
use crate::quota::QuotaLedger;
use crate::session::SessionParams;
use crate::transport::DeviceTransport;
use crate::widgets::WidgetContext;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(10);

const LOST_THOUGHT: &str = "Bobby is slightly lost";
const CONFUSED_THOUGHT: &str = "Bobby is doing the wrong thing";

/// What a tool sees of the session that called it.
#[derive(Clone)]
pub struct ToolContext {
    pub params: Arc<SessionParams>,
    pub ledger: QuotaLedger,
    pub widgets: Arc<Mutex<WidgetContext>>,
    pub thread_id: String,
}

impl ToolContext {
    pub fn supports_action(&self, action: &str) -> bool {
        self.params.supports_action(action)
    }

    pub fn capabilities(&self) -> &[String] {
        &self.params.actions
    }
}

/// An action's deadline passed while the device still owed a reply. The
/// transport can no longer be trusted to pair requests with replies.
#[derive(Debug, thiserror::Error)]
#[error("timed out waiting for the watch to answer {action}")]
pub struct DeviceUnresponsive {
    pub action: String,
}

/// `{"error": message}`, the shape tool failures take in a function turn.
pub fn tool_error(message: impl Into<String>) -> Value {
    json!({"error": message.into()})
}

type Decoded<T> = Result<T, serde_json::Error>;
type FunctionHandler = Box<dyn Fn(ToolContext, &str) -> Decoded<BoxFuture<'static, Value>> + Send + Sync>;
type ActionHandler =
    Box<dyn Fn(ToolContext, &str, DeviceRpc) -> Decoded<BoxFuture<'static, Value>> + Send + Sync>;
type ThoughtHandler = Box<dyn Fn(&str) -> Decoded<String> + Send + Sync>;

enum Handler {
    Function(FunctionHandler),
    Action(ActionHandler),
}

pub struct Registration {
    declaration: FunctionDeclaration,
    aliases: Vec<String>,
    capability: Option<String>,
    anti_capability: Option<String>,
    handler: Handler,
    thought: ThoughtHandler,
}

impl Registration {
    /// A tool answered entirely on the server.
    pub fn function<I, F, Fut, T>(declaration: FunctionDeclaration, f: F, thought: T) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        F: Fn(ToolContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Value> + Send + 'static,
        T: Fn(&I) -> String + Send + Sync + 'static,
    {
        let handler: FunctionHandler = Box::new(move |ctx, raw| {
            let input: I = serde_json::from_str(raw)?;
            Ok(Box::pin(f(ctx, input)) as BoxFuture<'static, Value>)
        });
        Self::build::<I, T>(declaration, Handler::Function(handler), thought)
    }

    /// A tool that needs the device to do something, via [`DeviceRpc`].
    pub fn action<I, F, Fut, T>(declaration: FunctionDeclaration, f: F, thought: T) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        F: Fn(ToolContext, I, DeviceRpc) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Value> + Send + 'static,
        T: Fn(&I) -> String + Send + Sync + 'static,
    {
        let handler: ActionHandler = Box::new(move |ctx, raw, rpc| {
            let input: I = serde_json::from_str(raw)?;
            Ok(Box::pin(f(ctx, input, rpc)) as BoxFuture<'static, Value>)
        });
        Self::build::<I, T>(declaration, Handler::Action(handler), thought)
    }

    fn build<I, T>(declaration: FunctionDeclaration, handler: Handler, thought: T) -> Self
    where
        I: DeserializeOwned + 'static,
        T: Fn(&I) -> String + Send + Sync + 'static,
    {
        let thought: ThoughtHandler = Box::new(move |raw| {
            let input: I = serde_json::from_str(raw)?;
            Ok(thought(&input))
        });
        Self {
            declaration,
            aliases: Vec::new(),
            capability: None,
            anti_capability: None,
            handler,
            thought,
        }
    }

    pub fn aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Only offered to clients declaring `capability`.
    pub fn capability(mut self, capability: &str) -> Self {
        self.capability = Some(capability.to_string());
        self
    }

    /// Hidden from clients declaring `capability`.
    pub fn anti_capability(mut self, capability: &str) -> Self {
        self.anti_capability = Some(capability.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.declaration.name
    }

    pub fn is_action(&self) -> bool {
        matches!(self.handler, Handler::Action(_))
    }

    fn visible_to(&self, capabilities: &[String]) -> bool {
        let has = |c: &String| capabilities.iter().any(|x| x == c);
        self.capability.as_ref().map_or(true, has) && !self.anti_capability.as_ref().map_or(false, has)
    }
}

pub struct Registry {
    registrations: Vec<Registration>,
    by_name: HashMap<String, Vec<usize>>,
    aliases: HashMap<String, String>,
    action_timeout: Duration,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            registrations: Vec::new(),
            by_name: HashMap::new(),
            aliases: HashMap::new(),
            action_timeout: DEFAULT_ACTION_TIMEOUT,
        }
    }
}

impl Registry {
    pub fn new(registrations: Vec<Registration>) -> Self {
        let mut registry = Self::default();
        for registration in registrations {
            registry.register(registration);
        }
        registry
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    /// Add a registration.
    ///
    /// # Panics
    ///
    /// If the declaration is unusable by the model: an empty name, parameters
    /// that are not an object, or `required` naming a property that does not
    /// exist.
    pub fn register(&mut self, registration: Registration) {
        let name = registration.declaration.name.clone();
        assert!(!name.is_empty(), "function declarations need a name");
        match &registration.declaration.parameters {
            Some(params) => {
                assert!(
                    params.schema_type == SchemaType::Object,
                    "parameters of {} must be an object",
                    name
                );
                for required in &params.required {
                    assert!(
                        params.properties.contains_key(required),
                        "{} requires undeclared property {}",
                        name,
                        required
                    );
                }
            }
            None => panic!("{} has no parameter schema", name),
        }

        let index = self.registrations.len();
        for alias in &registration.aliases {
            if alias != &name {
                self.aliases.insert(alias.clone(), name.clone());
            }
        }
        self.by_name.entry(name).or_default().push(index);
        self.registrations.push(registration);
    }

    fn canonical<'a>(&'a self, name: &'a str) -> &'a str {
        match self.aliases.get(name) {
            Some(real) => {
                info!("Model asked for {:?}, which is an alias for {:?}.", name, real);
                real.as_str()
            }
            None => name,
        }
    }

    /// The registration a caller with `capabilities` would have been offered,
    /// or the first one registered under that name.
    fn resolve(&self, name: &str, capabilities: &[String]) -> Option<&Registration> {
        let candidates = self.by_name.get(self.canonical(name))?;
        candidates
            .iter()
            .map(|&i| &self.registrations[i])
            .find(|r| r.visible_to(capabilities))
            .or_else(|| candidates.first().map(|&i| &self.registrations[i]))
    }

    pub fn is_action(&self, name: &str) -> bool {
        self.resolve(name, &[]).map_or(false, Registration::is_action)
    }

    pub fn definitions_for_capabilities(&self, capabilities: &[String]) -> Vec<FunctionDeclaration> {
        self.registrations
            .iter()
            .filter(|r| r.visible_to(capabilities))
            .map(|r| r.declaration.clone())
            .collect()
    }

    /// Run a server-side tool. Bad arguments become an error payload for the
    /// model; an unknown name is an error.
    pub async fn call_function(&self, ctx: &ToolContext, name: &str, raw_args: &str) -> anyhow::Result<Value> {
        let handler = match self.resolve(name, ctx.capabilities()).map(|r| &r.handler) {
            Some(Handler::Function(handler)) => handler,
            _ => return Err(anyhow::anyhow!("function {:?} not found", name)),
        };
        metrics::inc_tool_call(name, "function");
        let args = repair::repair_arguments(raw_args);
        match handler(ctx.clone(), &args) {
            Ok(future) => Ok(future.await),
            Err(e) => Ok(tool_error(format!("Invalid JSON: {}", e))),
        }
    }

    /// Run a device action. The callback and the request pump run together
    /// under one deadline. Running out of time yields an error payload,
    /// unless a request was still waiting on the device: that returns
    /// [`DeviceUnresponsive`] and the caller must not act on this transport
    /// again.
    pub async fn call_action(
        &self,
        ctx: &ToolContext,
        name: &str,
        raw_args: &str,
        transport: &dyn DeviceTransport,
    ) -> anyhow::Result<Value> {
        let handler = match self.resolve(name, ctx.capabilities()).map(|r| &r.handler) {
            Some(Handler::Action(handler)) => handler,
            _ => return Err(anyhow::anyhow!("function {:?} not found", name)),
        };
        metrics::inc_tool_call(name, "action");
        let args = repair::repair_arguments(raw_args);
        let (rpc, receiver) = rpc::channel();
        let reply_guard = receiver.reply_guard();
        let mut action = match handler(ctx.clone(), &args, rpc) {
            Ok(future) => future,
            Err(e) => return Ok(tool_error(format!("Invalid JSON: {}", e))),
        };

        let deadline = Instant::now() + self.action_timeout;
        let pump = receiver.pump(transport, deadline);
        let exchange = async {
            tokio::pin!(pump);
            tokio::select! {
                value = &mut action => value,
                // Pump ends once the action drops its handle.
                _ = &mut pump => action.await,
            }
        };
        let value = match tokio::time::timeout_at(deadline, exchange).await {
            Ok(value) => value,
            Err(_) => {
                warn!(action = name, "action timed out");
                rpc_error("timed out waiting for the watch to respond")
            }
        };
        if reply_guard.abandoned() {
            warn!(action = name, "device reply still outstanding at the deadline");
            return Err(DeviceUnresponsive {
                action: name.to_string(),
            }
            .into());
        }
        Ok(value)
    }

    /// Human-readable description of a call about to happen. Never fails.
    pub fn summarise(&self, name: &str, raw_args: &str) -> String {
        let Some(registration) = self.resolve(name, &[]) else {
            return LOST_THOUGHT.to_string();
        };
        match (registration.thought)(&repair::repair_arguments(raw_args)) {
            Ok(thought) => thought,
            Err(_) => CONFUSED_THOUGHT.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}
