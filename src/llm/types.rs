// Wire shapes of the Responses API as used for computer use.
use serde::{Deserialize, Serialize};

use crate::agent_engine::state::PendingSafetyCheck;

#[derive(Debug, Clone, Serialize)]
pub struct ResponsesRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    pub tools: Vec<ToolDef>,
    pub input: Vec<InputItem>,
    pub truncation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolDef {
    ComputerUsePreview {
        display_width: u32,
        display_height: u32,
        environment: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    Message {
        role: String,
        content: Vec<ContentPart>,
    },
    ComputerCallOutput {
        call_id: String,
        output: ScreenshotOutput,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        acknowledged_safety_checks: Vec<SafetyCheckWire>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
    InputImage { image_url: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ScreenshotOutput {
    #[serde(rename = "type")]
    pub output_type: &'static str,
    pub image_url: String,
}

impl ScreenshotOutput {
    pub fn new(image_url: String) -> Self {
        Self {
            output_type: "computer_screenshot",
            image_url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyCheckWire {
    pub id: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl From<SafetyCheckWire> for PendingSafetyCheck {
    fn from(w: SafetyCheckWire) -> Self {
        PendingSafetyCheck {
            id: w.id,
            code: w.code,
            message: w.message,
        }
    }
}

impl From<&PendingSafetyCheck> for SafetyCheckWire {
    fn from(c: &PendingSafetyCheck) -> Self {
        SafetyCheckWire {
            id: c.id.clone(),
            code: c.code.clone(),
            message: c.message.clone(),
        }
    }
}

/// Top level of a response. Output items stay untyped until the decoder checks them.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponsesResponse {
    pub id: Option<String>,
    #[serde(default)]
    pub output: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComputerCallWire {
    pub call_id: Option<String>,
    pub action: Option<serde_json::Value>,
    #[serde(default)]
    pub pending_safety_checks: Vec<SafetyCheckWire>,
}
