use std::env;
use std::time::Duration;

/// Content and code limits shared by validation and minting.
pub mod limits {
    pub const MAX_POST_LEN: usize = 500;
    pub const MAX_COMMENT_LEN: usize = 200;
    pub const MAX_MESSAGE_LEN: usize = 1000;
    pub const MIN_PASSWORD_LEN: usize = 8;

    pub const FRIEND_CODE_LEN: usize = 8;
    pub const FRIEND_CODE_EXPIRY_HOURS: i64 = 24;
    pub const LOGIN_CODE_LEN: usize = 6;
    pub const LOGIN_CODE_EXPIRY_MINUTES: i64 = 10;
    pub const SCHOOL_CODE_LEN: usize = 6;

    pub const FEED_LIMIT: i64 = 50;
    pub const MESSAGE_PAGE_LIMIT: i64 = 50;
    pub const SEARCH_LIMIT: i64 = 20;
    pub const DASHBOARD_ACTIVITY_LIMIT: i64 = 20;
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub jwt_secret: String,
    pub jwt_expiration_secs: u64,
    pub code_login_expiration_secs: u64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u32,
    pub server_host: String,
    pub server_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        let jwt_expiration = env::var("JWT_EXPIRATION")
            .ok()
            .and_then(|v| v.trim_end_matches('h').parse::<u64>().ok())
            .unwrap_or(24);
        // Code-exchange tokens get their own, much shorter lifetime.
        let code_login_expiration = env::var("CODE_LOGIN_EXPIRATION")
            .ok()
            .and_then(|v| v.trim_end_matches('h').parse::<u64>().ok())
            .unwrap_or(1);

        Ok(Config {
            database_url: env::var("DATABASE_URL").ok(),
            redis_url: env::var("REDIS_URL").ok(),
            jwt_secret: env::var("JWT_SECRET")?,
            jwt_expiration_secs: jwt_expiration * 3600,
            code_login_expiration_secs: code_login_expiration * 3600,
            rate_limit_window_secs: env::var("RATE_LIMIT_WINDOW")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            rate_limit_requests: env::var("RATE_LIMIT_REQUESTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "::".into()),
            server_port: env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
        })
    }

    pub fn jwt_expiration(&self) -> Duration {
        Duration::from_secs(self.jwt_expiration_secs)
    }

    pub fn code_login_expiration(&self) -> Duration {
        Duration::from_secs(self.code_login_expiration_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

#[cfg(test)]
impl Config {
    /// Fixed config for tests; no environment involved.
    pub fn for_tests() -> Self {
        Config {
            database_url: None,
            redis_url: None,
            jwt_secret: "test-secret".into(),
            jwt_expiration_secs: 24 * 3600,
            code_login_expiration_secs: 3600,
            rate_limit_window_secs: 60,
            rate_limit_requests: 100,
            server_host: "::".into(),
            server_port: 0,
        }
    }
}
