use serde::{Deserialize, Serialize};

use crate::models::MonitoringLevel;

#[derive(Debug, Deserialize)]
pub struct ValidateCodeRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCodeResponse {
    pub school_verified: bool,
    pub school: String,
    pub grade: String,
    pub monitoring_level: MonitoringLevel,
}
