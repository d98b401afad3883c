//! Socket frames: JSON objects tagged by `"type"`.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashColors {
    pub color1: String,
    pub color2: String,
}

/* ------------ client → server ------------ */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMsg {
    JoinEvent { event_id: String, user_id: String, session_id: String },
    LeaveEvent { event_id: String, user_id: String },
    TriggerFlash {
        event_id: String,
        color: String,
        duration: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
    },
    UpdateFlashSettings {
        event_id: String,
        flash_interval: u64,
        flash_enabled: bool,
        colors: FlashColors,
    },
    SendEventNotification { event_id: String, title: String, body: String },
    GetActiveCount { event_id: String },
}

impl ClientMsg {
    pub fn event_id(&self) -> &str {
        match self {
            ClientMsg::JoinEvent { event_id, .. }
            | ClientMsg::LeaveEvent { event_id, .. }
            | ClientMsg::TriggerFlash { event_id, .. }
            | ClientMsg::UpdateFlashSettings { event_id, .. }
            | ClientMsg::SendEventNotification { event_id, .. }
            | ClientMsg::GetActiveCount { event_id } => event_id,
        }
    }

    /// trigger-flash, update-settings and notify.
    pub fn is_admin_only(&self) -> bool {
        matches!(
            self,
            ClientMsg::TriggerFlash { .. }
                | ClientMsg::UpdateFlashSettings { .. }
                | ClientMsg::SendEventNotification { .. }
        )
    }
}

/* ------------ server → client ------------ */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMsg {
    AttendeeCountUpdate { event_id: String, count: usize },
    Flash {
        color: String,
        duration: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
        timestamp: i64,
    },
    FlashSettingsUpdated { flash_interval: u64, flash_enabled: bool, colors: FlashColors },
    Notification { title: String, body: String, event_id: String, timestamp: i64 },
    ActiveCount { event_id: String, count: usize },
    Error { message: String },
}

impl ServerMsg {
    /// Wire name, used for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMsg::AttendeeCountUpdate { .. } => "attendeeCountUpdate",
            ServerMsg::Flash { .. } => "flash",
            ServerMsg::FlashSettingsUpdated { .. } => "flashSettingsUpdated",
            ServerMsg::Notification { .. } => "notification",
            ServerMsg::ActiveCount { .. } => "activeCount",
            ServerMsg::Error { .. } => "error",
        }
    }
}

/// Lenient parse: anything that is not a well-formed command yields `None`.
pub fn parse_client(raw: &str) -> Option<ClientMsg> {
    serde_json::from_str(raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_uses_camel_case_fields() {
        let m = parse_client(r#"{"type":"joinEvent","eventId":"E1","userId":"U1","sessionId":"s"}"#);
        assert_eq!(
            m,
            Some(ClientMsg::JoinEvent { event_id: "E1".into(), user_id: "U1".into(), session_id: "s".into() })
        );
    }

    #[test]
    fn missing_field_is_ignored() {
        assert!(parse_client(r#"{"type":"joinEvent","eventId":"E1"}"#).is_none());
        assert!(parse_client(r##"{"type":"triggerFlash","eventId":"E1","color":"#fff"}"##).is_none());
        assert!(parse_client(r#"{"type":"dance","eventId":"E1"}"#).is_none());
        assert!(parse_client("not json").is_none());
    }

    #[test]
    fn flash_pattern_is_optional() {
        let m = parse_client(r##"{"type":"triggerFlash","eventId":"E1","color":"#FDB913","duration":500}"##).unwrap();
        assert!(m.is_admin_only());
        assert_eq!(m.event_id(), "E1");

        let out = serde_json::to_value(ServerMsg::Flash {
            color: "#FDB913".into(), duration: 500, pattern: None, timestamp: 7,
        }).unwrap();
        assert_eq!(out, json!({"type":"flash","color":"#FDB913","duration":500,"timestamp":7}));
    }

    #[test]
    fn settings_frame_shape() {
        let out = serde_json::to_value(ServerMsg::FlashSettingsUpdated {
            flash_interval: 2000,
            flash_enabled: true,
            colors: FlashColors { color1: "#FDB913".into(), color2: "#000000".into() },
        }).unwrap();
        assert_eq!(out, json!({
            "type":"flashSettingsUpdated","flashInterval":2000,"flashEnabled":true,
            "colors":{"color1":"#FDB913","color2":"#000000"}
        }));
    }

    #[test]
    fn get_count_is_not_admin_only() {
        let m = parse_client(r#"{"type":"getActiveCount","eventId":"E9"}"#).unwrap();
        assert!(!m.is_admin_only());
    }
}
