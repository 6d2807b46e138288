pub mod auth;
pub mod friends;
pub mod messages;
pub mod parents;
pub mod posts;
pub mod profile_changes;
pub mod school_codes;
pub mod users;
pub mod verification;
