use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey,
                   Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role { #[default] Guest, Admin }

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub:  String,
    #[serde(default)]
    pub role: Role,
    pub exp:  i64,
}

/// Who sits behind a connection. Anonymous sockets are guests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Option<String>,
    pub role:    Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool { self.role == Role::Admin }
}

pub fn sign(uid:&str, role:Role, secret:&str) -> AppResult<String> {
    let c = Claims { sub: uid.into(), role, exp: Utc::now().timestamp()+86_400 };
    Ok(encode(&Header::default(), &c, &EncodingKey::from_secret(secret.as_bytes()))?)
}

pub fn verify(token:&str, secret:&str) -> Option<Caller> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()),
                     &Validation::new(Algorithm::HS256))
        .map(|d| Caller { user_id: Some(d.claims.sub), role: d.claims.role }).ok()
}
