//! Ordered conversation history for one session.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    User { text: String },
    ModelText { text: String },
    ModelCall { call: FunctionCall },
    Function { name: String, response: Value },
}

impl Turn {
    pub fn role(&self) -> &'static str {
        match self {
            Turn::User { .. } => "user",
            Turn::ModelText { .. } | Turn::ModelCall { .. } => "model",
            Turn::Function { .. } => "function",
        }
    }
}

/// The `{role, content}` record kept for a resumable thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::User { text: text.into() });
    }

    pub fn push_model_text(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::ModelText { text: text.into() });
    }

    pub fn push_model_call(&mut self, call: FunctionCall) {
        self.turns.push(Turn::ModelCall { call });
    }

    /// Append a function result. It must answer the call in the turn right
    /// before it.
    pub fn push_function(&mut self, name: impl Into<String>, response: Value) -> anyhow::Result<()> {
        let name = name.into();
        match self.turns.last() {
            Some(Turn::ModelCall { call }) if call.name == name => {
                self.turns.push(Turn::Function { name, response });
                Ok(())
            }
            Some(Turn::ModelCall { call }) => Err(anyhow::anyhow!(
                "function result for {} does not answer pending call to {}",
                name,
                call.name
            )),
            _ => Err(anyhow::anyhow!(
                "function result for {} without a preceding call",
                name
            )),
        }
    }

    /// Text of the most recent model turn that said something.
    pub fn last_model_text(&self) -> Option<&str> {
        self.turns.iter().rev().find_map(|turn| match turn {
            Turn::ModelText { text } if !text.trim().is_empty() => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn function_call_names(&self) -> impl Iterator<Item = &str> {
        self.turns.iter().filter_map(|turn| match turn {
            Turn::ModelCall { call } => Some(call.name.as_str()),
            _ => None,
        })
    }

    pub fn has_call_to(&self, name: &str) -> bool {
        self.function_call_names().any(|n| n == name)
    }

    /// Text turns only, in order. Function calls and results are dropped.
    pub fn to_persisted(&self) -> Vec<PersistedMessage> {
        self.turns
            .iter()
            .filter_map(|turn| match turn {
                Turn::User { text } | Turn::ModelText { text } if !text.trim().is_empty() => {
                    Some(PersistedMessage {
                        role: turn.role().to_string(),
                        content: text.clone(),
                    })
                }
                _ => None,
            })
            .collect()
    }

    pub fn from_persisted(messages: Vec<PersistedMessage>) -> anyhow::Result<Self> {
        let mut transcript = Self::new();
        for message in messages {
            match message.role.as_str() {
                "user" => transcript.push_user(message.content),
                "model" => transcript.push_model_text(message.content),
                other => return Err(anyhow::anyhow!("unexpected role in stored thread: {}", other)),
            }
        }
        Ok(transcript)
    }

    /// Add `earlier` in front of the current turns.
    pub fn prepend(&mut self, earlier: Transcript) {
        let mut turns = earlier.turns;
        turns.append(&mut self.turns);
        self.turns = turns;
    }
}
