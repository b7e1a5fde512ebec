use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single analytics event, as queued by the `EventCollector`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub name: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl AnalyticsEvent {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            properties: Map::new(),
            timestamp: Utc::now(),
            session_id: None,
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }
}

/// Random 16-hex-digit identifier for grouping events from one process run.
pub fn new_session_id() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_fields() {
        let event = AnalyticsEvent::new("button_clicked")
            .with_property("id", "submit")
            .with_property("count", 3)
            .with_session("abc");

        assert_eq!(event.name, "button_clicked");
        assert_eq!(event.properties["id"], "submit");
        assert_eq!(event.properties["count"], 3);
        assert_eq!(event.session_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_empty_properties_are_omitted() {
        let json = serde_json::to_value(AnalyticsEvent::new("page_view")).unwrap();
        assert!(json.get("properties").is_none());
        assert!(json.get("session_id").is_none());
    }

    #[test]
    fn test_session_id_is_hex() {
        let id = new_session_id();
        assert_eq!(id.len(), 16);
        assert!(hex::decode(&id).is_ok());
    }
}
