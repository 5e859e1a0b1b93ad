use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::kes::KesClient;
use crate::kms::{Kms, MasterKeyKms};

/// KMS configuration (loaded from ipos.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KmsConfig {
    /// Local master key, used when KES is not enabled
    pub master_key: Option<MasterKeyConfig>,
    pub kes: KesConfig,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterKeyConfig {
    /// Key ID bound into every data key
    pub key_id: String,
    /// 256-bit master key as 64 hex characters
    pub key: String,
}

impl fmt::Debug for MasterKeyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKeyConfig")
            .field("key_id", &self.key_id)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Remote KES server, authenticated with a client certificate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KesConfig {
    pub enabled: bool,
    /// KES server URL, e.g. https://kes.example.com:7373
    pub endpoint: String,
    /// PEM private key of the client certificate
    pub key_file: PathBuf,
    /// PEM client certificate
    pub cert_file: PathBuf,
    /// CA certificate file or directory of PEM files (optional)
    pub ca_path: Option<PathBuf>,
    /// Key used when the caller does not name one
    pub default_key_id: String,
}

impl KesConfig {
    /// Check that an enabled configuration names everything the client needs.
    pub fn verify(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.endpoint.is_empty() {
            return Err(Error::Config("KES endpoint is empty".into()));
        }
        if self.key_file.as_os_str().is_empty() {
            return Err(Error::Config("KES client key file is empty".into()));
        }
        if self.cert_file.as_os_str().is_empty() {
            return Err(Error::Config("KES client certificate file is empty".into()));
        }
        if self.default_key_id.is_empty() {
            return Err(Error::Config("KES default key ID is empty".into()));
        }
        Ok(())
    }
}

impl KmsConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Build the configured KMS: KES when enabled, otherwise the master key.
    pub fn build(&self) -> Result<Box<dyn Kms>> {
        if self.kes.enabled {
            debug!(endpoint = %self.kes.endpoint, "using KES");
            return Ok(Box::new(KesClient::new(&self.kes)?));
        }
        match &self.master_key {
            Some(master) => {
                debug!(key_id = %master.key_id, "using local master key");
                Ok(Box::new(MasterKeyKms::from_hex(&master.key_id, &master.key)?))
            }
            None => Err(Error::Config("no KMS configured".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX_KEY: &str = "6368616e676520746869732070617373776f726420746f206120736563726574";

    #[test]
    fn test_parse_defaults() {
        let config = KmsConfig::from_toml("").unwrap();
        assert!(config.master_key.is_none());
        assert!(!config.kes.enabled);
        assert!(config.kes.ca_path.is_none());
        assert!(matches!(config.build(), Err(Error::Config(_))));
    }

    #[test]
    fn test_parse_master_key_config() {
        let toml_str = format!(
            r#"
[master_key]
key_id = "my-key"
key = "{HEX_KEY}"
"#
        );
        let config = KmsConfig::from_toml(&toml_str).unwrap();
        let kms = config.build().unwrap();
        assert_eq!(kms.key_id(), "my-key");
        assert_eq!(kms.info().auth_type, "master-key");

        let dbg = format!("{config:?}");
        assert!(!dbg.contains(HEX_KEY));
    }

    #[test]
    fn test_parse_kes_config() {
        let toml_str = r#"
[kes]
enabled = true
endpoint = "https://kes.example.com:7373"
key_file = "/etc/ipos/client.key"
cert_file = "/etc/ipos/client.crt"
ca_path = "/etc/ipos/CAs"
default_key_id = "ipos-key"
"#;
        let config = KmsConfig::from_toml(toml_str).unwrap();
        assert!(config.kes.enabled);
        assert_eq!(config.kes.endpoint, "https://kes.example.com:7373");
        assert_eq!(config.kes.ca_path, Some(PathBuf::from("/etc/ipos/CAs")));
        config.kes.verify().unwrap();
    }

    #[test]
    fn test_kes_verify() {
        let mut kes = KesConfig::default();
        kes.verify().unwrap();

        kes.enabled = true;
        assert!(kes.verify().is_err());
        kes.endpoint = "https://kes:7373".into();
        kes.key_file = "client.key".into();
        kes.cert_file = "client.crt".into();
        assert!(kes.verify().is_err());
        kes.default_key_id = "key".into();
        kes.verify().unwrap();
    }

    #[test]
    fn test_kes_missing_cert_files() {
        let config = KmsConfig {
            master_key: None,
            kes: KesConfig {
                enabled: true,
                endpoint: "https://kes:7373".into(),
                key_file: "/nonexistent/client.key".into(),
                cert_file: "/nonexistent/client.crt".into(),
                ca_path: None,
                default_key_id: "key".into(),
            },
        };
        assert!(matches!(config.build(), Err(Error::Io(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ipos.toml");
        std::fs::write(
            &path,
            format!("[master_key]\nkey_id = \"k\"\nkey = \"{HEX_KEY}\"\n"),
        )
        .unwrap();
        let config = KmsConfig::load(&path).unwrap();
        assert_eq!(config.master_key.unwrap().key_id, "k");

        std::fs::write(&path, "[kes\n").unwrap();
        assert!(matches!(KmsConfig::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = KmsConfig {
            master_key: Some(MasterKeyConfig {
                key_id: "k".into(),
                key: HEX_KEY.into(),
            }),
            kes: KesConfig::default(),
        };
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = KmsConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed.master_key.unwrap().key, HEX_KEY);
    }
}
