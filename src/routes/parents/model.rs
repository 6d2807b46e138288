use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Message, MonitoringLevel, UserSummary};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildOverview {
    #[serde(flatten)]
    pub summary: UserSummary,
    pub monitoring_level: MonitoringLevel,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub children: Vec<ChildOverview>,
    pub recent_messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildDetailResponse {
    pub child: crate::routes::auth::model::UserPayload,
    pub friends: Vec<UserSummary>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionView {
    pub parent: UserSummary,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionsResponse {
    pub connections: Vec<ConnectionView>,
}
