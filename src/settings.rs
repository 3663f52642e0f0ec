//! User settings consumed by the safety core.
//!
//! The host application owns the settings store; this module only mirrors
//! the record shape (camelCase JSON, matching the mobile client) and offers
//! file-backed load/save for the sentinel binary.

use crate::error::{SafetyError, SafetyResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Security feature toggles. Each detector reads exactly one flag; the
/// voice-activation flag is carried for the host UI but has no detector
/// behind it here.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecuritySettings {
    pub location_sharing_enabled: bool,
    pub share_location_on_sos: bool,
    pub send_sms_on_sos: bool,
    pub shake_to_sos_enabled: bool,
    pub voice_activation_enabled: bool,
    pub accident_detection_enabled: bool,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            location_sharing_enabled: true,
            share_location_on_sos: true,
            send_sms_on_sos: true,
            shake_to_sos_enabled: true,
            voice_activation_enabled: false,
            accident_detection_enabled: true,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrustedContact {
    pub name: String,
    pub phone: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserSettings {
    pub display_name: String,
    pub trusted_contacts: Vec<TrustedContact>,
    pub security: SecuritySettings,
}

impl UserSettings {
    pub fn load(path: &Path) -> SafetyResult<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| SafetyError::Storage(format!("read {}: {}", path.display(), e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| SafetyError::Storage(format!("parse {}: {}", path.display(), e)))
    }

    pub fn save(&self, path: &Path) -> SafetyResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SafetyError::Storage(e.to_string()))?;
        fs::write(path, json)
            .map_err(|e| SafetyError::Storage(format!("write {}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_defaults() {
        let security = SecuritySettings::default();
        assert!(security.shake_to_sos_enabled);
        assert!(security.accident_detection_enabled);
        assert!(!security.voice_activation_enabled);
    }

    #[test]
    fn test_partial_camel_case_json() {
        let settings: UserSettings = serde_json::from_str(
            r#"{
                "displayName": "Ada",
                "trustedContacts": [{"name": "Sam", "phone": "+1555"}],
                "security": {"shakeToSosEnabled": false}
            }"#,
        )
        .unwrap();

        assert_eq!(settings.display_name, "Ada");
        assert_eq!(settings.trusted_contacts.len(), 1);
        assert!(!settings.security.shake_to_sos_enabled);
        // Unmentioned fields fall back to defaults.
        assert!(settings.security.accident_detection_enabled);
    }
}
