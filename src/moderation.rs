use crate::models::{ContentStatus, MonitoringLevel, UserType};

/// The moderation gate: decides the initial status of a freshly created post
/// or message from the author's role and monitoring level.
///
/// Parents are never pre-moderated.  Kids under full monitoring queue as
/// `pending` until a linked parent reviews; kids under partial monitoring
/// publish immediately.
pub fn initial_status(author_type: UserType, monitoring_level: MonitoringLevel) -> ContentStatus {
    match (author_type, monitoring_level) {
        (UserType::Parent, _) => ContentStatus::Approved,
        (UserType::Kid, MonitoringLevel::Full) => ContentStatus::Pending,
        (UserType::Kid, MonitoringLevel::Partial) => ContentStatus::Approved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kid_under_full_monitoring_is_pending() {
        assert_eq!(
            initial_status(UserType::Kid, MonitoringLevel::Full),
            ContentStatus::Pending
        );
    }

    #[test]
    fn kid_under_partial_monitoring_is_approved() {
        assert_eq!(
            initial_status(UserType::Kid, MonitoringLevel::Partial),
            ContentStatus::Approved
        );
    }

    #[test]
    fn parent_is_approved_regardless_of_level() {
        assert_eq!(
            initial_status(UserType::Parent, MonitoringLevel::Full),
            ContentStatus::Approved
        );
        assert_eq!(
            initial_status(UserType::Parent, MonitoringLevel::Partial),
            ContentStatus::Approved
        );
    }
}
