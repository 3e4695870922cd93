use crate::types::KEY_SEPARATOR;
use serde::Deserialize;

/// Topic on which release and gray rule changes are announced.
pub const RELEASE_TOPIC: &str = "apollo-release";

/// A message delivered by the notification transport.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ReleaseMessage {
    pub topic: String,
    pub message: String,
}

impl ReleaseMessage {
    pub fn new<T: Into<String>, M: Into<String>>(topic: T, message: M) -> Self {
        ReleaseMessage {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// A release notification for the given scope.
    pub fn release(app_id: &str, cluster_name: &str, namespace_name: &str) -> Self {
        ReleaseMessage::new(
            RELEASE_TOPIC,
            format!("{app_id}{KEY_SEPARATOR}{cluster_name}{KEY_SEPARATOR}{namespace_name}"),
        )
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum NotificationError {
    #[error("malformed release message payload: {0:?}")]
    MalformedPayload(String),
}

/// The scope named by a release message, in the casing it was sent with.
#[derive(Debug, PartialEq)]
pub struct ReleaseScope<'a> {
    pub app_id: &'a str,
    pub cluster_name: &'a str,
    pub namespace_name: &'a str,
}

pub fn parse_payload(payload: &str) -> Result<ReleaseScope<'_>, NotificationError> {
    let parts: Vec<&str> = payload.split(KEY_SEPARATOR).collect();

    match parts.as_slice() {
        [app_id, cluster_name, namespace_name]
            if parts.iter().all(|part| !part.trim().is_empty()) =>
        {
            Ok(ReleaseScope {
                app_id: *app_id,
                cluster_name: *cluster_name,
                namespace_name: *namespace_name,
            })
        }
        _ => Err(NotificationError::MalformedPayload(payload.to_string())),
    }
}
