use serde::{Deserialize, Serialize};

use crate::models::Verification;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyChildRequest {
    pub child_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyChildResponse {
    pub child_id: String,
    pub verification: Verification,
}
