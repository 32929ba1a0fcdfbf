// Typed decision actions and the provider wire format.

use serde::{Deserialize, Serialize};

use crate::engine::unit::Vec2;

/// One instruction from the decision service. `thought` is display-only.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Action {
    Move {
        #[serde(rename = "unitId")]
        unit_id: String,
        target: Vec2,
        #[serde(skip_serializing_if = "Option::is_none")]
        thought: Option<String>,
    },
    Attack {
        #[serde(rename = "unitId")]
        unit_id: String,
        #[serde(rename = "targetUnitId")]
        target_unit_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        damage: Option<i32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        thought: Option<String>,
    },
    Heal {
        #[serde(rename = "unitId")]
        unit_id: String,
        #[serde(rename = "targetUnitId")]
        target_unit_id: String,
        #[serde(rename = "healAmount", skip_serializing_if = "Option::is_none")]
        amount: Option<i32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        thought: Option<String>,
    },
}

impl Action {
    pub fn unit_id(&self) -> &str {
        match self {
            Action::Move { unit_id, .. }
            | Action::Attack { unit_id, .. }
            | Action::Heal { unit_id, .. } => unit_id,
        }
    }

    pub fn thought(&self) -> Option<&str> {
        match self {
            Action::Move { thought, .. }
            | Action::Attack { thought, .. }
            | Action::Heal { thought, .. } => thought.as_deref(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Move { .. } => "MOVE",
            Action::Attack { .. } => "ATTACK",
            Action::Heal { .. } => "HEAL",
        }
    }
}

/// Parsed decision: ordered actions plus an optional error code.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DecisionResponse {
    pub actions: Vec<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<u16>,
}

/// Which route a decision request takes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    /// Shared key pool against the standard provider.
    Standard,
    /// Dedicated provider and key, falling back to the pool on failure.
    Premium,
}

// ── Provider wire format (OpenAI-compatible chat completions) ──────────

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ChatCompletionRequest {
    pub fn new(
        model: &str,
        system_prompt: &str,
        user_payload: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        ChatCompletionRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_payload.to_string(),
                },
            ],
            temperature,
            max_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionResponse {
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first()?.message.content.as_deref()
    }
}
