use super::query::HeaderMultimap;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Outcome of a `Serve` call.
///
/// `NotHandled` carries nothing, so a declining plugin cannot leak a partial
/// response into the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PluginReply {
    NotHandled,
    Handled(HandledReply),
}

impl PluginReply {
    pub fn not_handled() -> Self {
        PluginReply::NotHandled
    }

    pub fn handled(reply: HandledReply) -> Self {
        PluginReply::Handled(reply)
    }

    pub fn is_handled(&self) -> bool {
        matches!(self, PluginReply::Handled(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandledReply {
    /// `None` (or `0` from older peers) means the host's default status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default)]
    pub headers: HeaderMultimap,
    #[serde(default, with = "super::base64_bytes")]
    pub body: Bytes,
}

impl HandledReply {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Replace every value of `name` with `value`.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers
            .insert(name.to_string(), vec![value.into()]);
    }

    /// Append `value` after any existing values of `name`.
    pub fn add_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers
            .entry(name.to_string())
            .or_default()
            .push(value.into());
    }

    /// Status to write, if the plugin asked for one.
    pub fn effective_status(&self) -> Option<u16> {
        self.status.filter(|s| *s > 0)
    }
}
