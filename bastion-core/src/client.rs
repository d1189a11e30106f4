use serde_json::Value;

/// Informational request metadata carried into sessions, tokens and events.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClientContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_info: Option<Value>,
}

impl ClientContext {
    pub fn new(ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip_address: Some(ip_address.into()),
            user_agent: Some(user_agent.into()),
            device_info: None,
        }
    }

    #[must_use]
    pub fn with_device_info(mut self, device_info: Value) -> Self {
        self.device_info = Some(device_info);
        self
    }
}
