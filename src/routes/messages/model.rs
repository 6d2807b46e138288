use serde::{Deserialize, Serialize};

use crate::models::Message;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub receiver_id: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    /// Narrows the listing to one conversation.
    #[serde(default)]
    pub conversation_with: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModerateRequest {
    pub action: ModerateAction,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerateAction {
    Approve,
    Reject,
    Delete,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct ModerateResponse {
    pub message: Option<Message>,
    pub deleted: bool,
}
