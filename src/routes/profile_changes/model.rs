use serde::{Deserialize, Serialize};

use crate::models::ProfileChangeRequest;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestChangesBody {
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub school: Option<String>,
    pub grade: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewBody {
    pub action: ReviewAction,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAction {
    Approve,
    Reject,
}

#[derive(Debug, Serialize)]
pub struct PendingRequestsResponse {
    pub requests: Vec<ProfileChangeRequest>,
}
