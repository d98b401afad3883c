//! Process configuration, read from the environment (and `.env`).
use std::{env, net::SocketAddr, str::FromStr};

use crate::error::{config, AppErr, AppResult};

const DEV_SECRET: &str = "dev-only-secret";

/// Whether admin-only commands check the caller's role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AdminPolicy {
    #[default]
    Enforce,
    /// Any connected client may trigger flashes, change settings and notify.
    Open,
}

impl FromStr for AdminPolicy {
    type Err = AppErr;
    fn from_str(s: &str) -> AppResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enforce" => Ok(AdminPolicy::Enforce),
            "open"    => Ok(AdminPolicy::Open),
            other     => Err(config(format!("ADMIN_COMMANDS must be enforce|open, got {other:?}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host:             String,
    pub port:             u16,
    pub jwt_secret:       String,
    pub admin_policy:     AdminPolicy,
    pub database_url:     Option<String>,
    pub allowed_origins:  Vec<String>,
    pub mailbox_capacity: usize,
    pub hub_capacity:     usize,
    pub max_frame_bytes:  usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host:             "0.0.0.0".into(),
            port:             3000,
            jwt_secret:       DEV_SECRET.into(),
            admin_policy:     AdminPolicy::Enforce,
            database_url:     None,
            allowed_origins:  Vec::new(),
            mailbox_capacity: 64,
            hub_capacity:     1024,
            max_frame_bytes:  64 * 1024,
        }
    }
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|k| env::var(k).ok())
    }

    /// Same as [`Config::from_env`] over an arbitrary key lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let d = Config::default();
        let admin_policy = match get("ADMIN_COMMANDS") {
            Some(v) => v.parse()?,
            None    => d.admin_policy,
        };
        let jwt_secret = match get("JWT_SECRET").filter(|s| !s.is_empty()) {
            Some(s) => s,
            None if admin_policy == AdminPolicy::Enforce =>
                return Err(config("JWT_SECRET is required when ADMIN_COMMANDS=enforce")),
            None => d.jwt_secret,
        };
        let cfg = Config {
            host:             get("HOST").unwrap_or(d.host),
            port:             num(&get, "PORT", d.port)?,
            jwt_secret,
            admin_policy,
            database_url:     get("DATABASE_URL").filter(|s| !s.is_empty()),
            allowed_origins:  get("ALLOWED_ORIGINS")
                .map(|s| s.split(',').map(|o| o.trim().to_string()).filter(|o| !o.is_empty()).collect())
                .unwrap_or_default(),
            mailbox_capacity: num(&get, "MAILBOX_CAPACITY", d.mailbox_capacity)?,
            hub_capacity:     num(&get, "HUB_QUEUE_CAPACITY", d.hub_capacity)?,
            max_frame_bytes:  num(&get, "MAX_FRAME_BYTES", d.max_frame_bytes)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.mailbox_capacity == 0 || self.hub_capacity == 0 {
            return Err(config("queue capacities must be > 0"));
        }
        if self.max_frame_bytes < 256 {
            return Err(config("MAX_FRAME_BYTES must be at least 256"));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> AppResult<SocketAddr> {
        format!("{}:{}", self.host, self.port).parse().map_err(config)
    }
}

fn num<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> AppResult<T>
where T::Err: std::fmt::Display {
    match get(key) {
        Some(v) => v.trim().parse().map_err(|e| config(format!("{key}: {e}"))),
        None    => Ok(default),
    }
}
