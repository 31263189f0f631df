use std::fs;
use std::path::Path;

use bluenet_codec::DecoderConfig;
use bluenet_transport_ble::SchedulerConfig;
use serde::{Deserialize, Serialize};

use crate::error::BluenetError;

/// Library configuration, usually loaded from a TOML file.
///
/// Every field has a default, so an empty file is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluenetConfig {
    /// Name attached to the library's tracing span.
    pub app_name: String,
    pub scheduler: SchedulerConfig,
    pub decoder: DecoderConfig,
    /// Extra attempts after the first failed setup read-back.
    pub write_verify_max_retries: u8,
    /// Drop advertisements before they are decoded.
    pub battery_saving: bool,
    pub event_bus_capacity: usize,
}

impl Default for BluenetConfig {
    fn default() -> Self {
        Self {
            app_name: "bluenet".to_string(),
            scheduler: SchedulerConfig::default(),
            decoder: DecoderConfig::default(),
            write_verify_max_retries: 2,
            battery_saving: false,
            event_bus_capacity: 256,
        }
    }
}

impl BluenetConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, BluenetError> {
        Ok(toml::from_str(input)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, BluenetError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| BluenetError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn defaults_are_applied() {
        let cfg = BluenetConfig::from_toml_str("").expect("empty config");
        assert_eq!(cfg, BluenetConfig::default());
        assert_eq!(cfg.write_verify_max_retries, 2);
        assert_eq!(cfg.scheduler.connect, Duration::from_secs(2));
        assert!(!cfg.battery_saving);
    }

    #[test]
    fn human_readable_durations_are_parsed() {
        let cfg = BluenetConfig::from_toml_str(
            r#"
            app_name = "hub"
            battery_saving = true

            [scheduler]
            connect = "5s"
            read_characteristic = "750ms"

            [decoder]
            utc_offset_secs = 3600
            "#,
        )
        .expect("config");
        assert_eq!(cfg.app_name, "hub");
        assert!(cfg.battery_saving);
        assert_eq!(cfg.scheduler.connect, Duration::from_secs(5));
        assert_eq!(cfg.scheduler.read_characteristic, Duration::from_millis(750));
        assert_eq!(cfg.scheduler.disconnect, Duration::from_secs(2));
        assert_eq!(cfg.decoder.utc_offset_secs, 3600);
    }

    #[test]
    fn malformed_durations_are_rejected() {
        let err = BluenetConfig::from_toml_str("[scheduler]\nconnect = \"soon\"\n")
            .expect_err("bad duration");
        assert!(matches!(err, BluenetError::ConfigParse(_)));
    }

    #[test]
    fn file_is_loaded() {
        let mut tmp = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(
            tmp,
            "write_verify_max_retries = 4\nevent_bus_capacity = 16\n[scheduler]\nawait_disconnect = \"10s\""
        )
        .expect("write config");

        let cfg = BluenetConfig::load(tmp.path()).expect("load");
        assert_eq!(cfg.write_verify_max_retries, 4);
        assert_eq!(cfg.event_bus_capacity, 16);
        assert_eq!(cfg.scheduler.await_disconnect, Duration::from_secs(10));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = BluenetConfig::load("/nonexistent/bluenet.toml").expect_err("missing");
        assert!(err.to_string().contains("/nonexistent/bluenet.toml"));
    }
}
