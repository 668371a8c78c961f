//! Agent configuration.

use crate::error::{CoreError, CoreResult};
use apmkit_protocol::keys::{DEFAULT_PLATFORM_TYPE, DEFAULT_TECHNOLOGY_TYPE};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Static device fields reported in every beacon header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceMetadata {
    /// Operating system.
    pub operating_system: Option<String>,
    /// Manufacturer.
    pub manufacturer: Option<String>,
    /// Model identifier.
    pub model: Option<String>,
}

impl DeviceMetadata {
    /// Creates empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the operating system.
    pub fn with_operating_system(mut self, os: impl Into<String>) -> Self {
        self.operating_system = Some(os.into());
        self
    }

    /// Sets the manufacturer.
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Sets the model identifier.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Configuration of the monitored application and its collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Collector endpoint URL.
    pub endpoint_url: String,
    /// Application id.
    pub application_id: String,
    /// Application name.
    pub application_name: String,
    /// Application version.
    pub application_version: String,
    /// Device id; non-numeric values are hashed to a number.
    pub device_id: String,
    /// Server id used until the collector assigns one.
    pub server_id: i32,
    /// Agent technology type.
    pub technology_type: String,
    /// Platform type.
    pub platform_type: u32,
    /// Device metadata.
    pub device: DeviceMetadata,
    /// Upper bound on buffered bytes per session before the oldest
    /// records are evicted.
    pub max_buffered_bytes: usize,
}

impl AgentConfig {
    /// Creates a new configuration.
    pub fn new(
        endpoint_url: impl Into<String>,
        application_id: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            application_id: application_id.into(),
            device_id: device_id.into(),
            ..Self::default()
        }
    }

    /// Sets the application name.
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Sets the application version.
    pub fn with_application_version(mut self, version: impl Into<String>) -> Self {
        self.application_version = version.into();
        self
    }

    /// Sets the initial server id.
    pub fn with_server_id(mut self, server_id: i32) -> Self {
        self.server_id = server_id;
        self
    }

    /// Sets the device metadata.
    pub fn with_device(mut self, device: DeviceMetadata) -> Self {
        self.device = device;
        self
    }

    /// Sets the per-session buffer cap.
    pub fn with_max_buffered_bytes(mut self, bytes: usize) -> Self {
        self.max_buffered_bytes = bytes;
        self
    }

    /// Checks that the configuration can be used to talk to a collector.
    pub fn validate(&self) -> CoreResult<()> {
        if self.endpoint_url.trim().is_empty() {
            return Err(CoreError::invalid_config("endpoint URL is empty"));
        }
        url::Url::parse(&self.endpoint_url)?;
        if self.application_id.trim().is_empty() {
            return Err(CoreError::invalid_config("application id is empty"));
        }
        if self.max_buffered_bytes == 0 {
            return Err(CoreError::invalid_config("max buffered bytes must be positive"));
        }
        Ok(())
    }

    /// Numeric device id reported as `vi`.
    ///
    /// Numeric ids are used as-is, anything else maps to the first eight
    /// bytes of its SHA-256 digest.
    pub fn numeric_device_id(&self) -> i64 {
        let trimmed = self.device_id.trim();
        if let Ok(id) = trimmed.parse::<i64>() {
            return id;
        }
        let digest = Sha256::digest(trimmed.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        i64::from_be_bytes(bytes)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            application_id: String::new(),
            application_name: String::new(),
            application_version: String::new(),
            device_id: String::new(),
            server_id: 1,
            technology_type: DEFAULT_TECHNOLOGY_TYPE.to_string(),
            platform_type: DEFAULT_PLATFORM_TYPE,
            device: DeviceMetadata::default(),
            max_buffered_bytes: 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = AgentConfig::new("https://collector.example.com/mbeacon", "app-1", "42")
            .with_application_name("Shop")
            .with_application_version("1.2")
            .with_server_id(3)
            .with_device(DeviceMetadata::new().with_operating_system("Linux"));

        assert_eq!(config.application_name, "Shop");
        assert_eq!(config.server_id, 3);
        assert_eq!(config.device.operating_system.as_deref(), Some("Linux"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_errors() {
        let config = AgentConfig::new("", "app", "1");
        assert!(matches!(config.validate(), Err(CoreError::InvalidConfig { .. })));

        let config = AgentConfig::new("not a url", "app", "1");
        assert!(matches!(config.validate(), Err(CoreError::InvalidEndpoint(_))));

        let config = AgentConfig::new("https://c.example.com", " ", "1");
        assert!(matches!(config.validate(), Err(CoreError::InvalidConfig { .. })));
    }

    #[test]
    fn numeric_device_ids() {
        assert_eq!(AgentConfig::new("", "", "12345").numeric_device_id(), 12345);
        assert_eq!(AgentConfig::new("", "", "-7").numeric_device_id(), -7);
    }

    #[test]
    fn hashed_device_ids_are_stable() {
        let a = AgentConfig::new("", "", "device-abc").numeric_device_id();
        let b = AgentConfig::new("", "", "device-abc").numeric_device_id();
        let c = AgentConfig::new("", "", "device-abd").numeric_device_id();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn deserialize_with_defaults() {
        let config: AgentConfig = serde_json::from_str(
            r#"{"endpoint_url": "https://c.example.com", "application_id": "app"}"#,
        )
        .unwrap();
        assert_eq!(config.server_id, 1);
        assert_eq!(config.technology_type, DEFAULT_TECHNOLOGY_TYPE);
        assert!(config.validate().is_ok());
    }
}
