use serde::{Deserialize, Serialize};

/// Resolved handle to the remote chat. Obtained once at startup and shared
/// read-only for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryTarget {
    pub chat_id: i64,
    pub title: Option<String>,
    pub username: Option<String>,
}

impl DeliveryTarget {
    /// Title, else `@username`, else the numeric id.
    pub fn display_name(&self) -> String {
        match (&self.title, &self.username) {
            (Some(title), _) => title.clone(),
            (None, Some(username)) => format!("@{username}"),
            (None, None) => self.chat_id.to_string(),
        }
    }
}
