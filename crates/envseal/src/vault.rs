//! Local vault sink
//!
//! Each secret is one age-encrypted file holding the JSON object of the
//! secret set. Names are path-like (e.g. prod/web) and map to
//! `<vault>/secrets/<name>.age`. References have the form `vault:<name>`.

use crate::secret::{SecretReference, SecretSet};
use crate::sink::{SecretSink, SinkError};
use age::secrecy::ExposeSecret;
use std::collections::BTreeMap;
use std::fs::{self, File, Permissions};
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const REFERENCE_PREFIX: &str = "vault";

/// Age-encrypted secret store on the local filesystem
pub struct VaultSink {
    /// Root directory for the vault
    root: PathBuf,
    /// Directory for encrypted secrets
    secrets_dir: PathBuf,
    /// Directory for identity keys
    keys_dir: PathBuf,
    /// Path to the identity key file
    identity_path: PathBuf,
}

impl VaultSink {
    pub fn new(root: &Path) -> Self {
        let secrets_dir = root.join("secrets");
        let keys_dir = root.join("keys");
        let identity_path = keys_dir.join("identity.key");

        Self {
            root: root.to_path_buf(),
            secrets_dir,
            keys_dir,
            identity_path,
        }
    }

    /// Create directories and generate the identity key; returns the public key
    pub fn init(&self) -> Result<String, SinkError> {
        fs::create_dir_all(&self.secrets_dir)?;
        fs::create_dir_all(&self.keys_dir)?;

        fs::set_permissions(&self.root, Permissions::from_mode(0o700))?;
        fs::set_permissions(&self.secrets_dir, Permissions::from_mode(0o700))?;
        fs::set_permissions(&self.keys_dir, Permissions::from_mode(0o700))?;

        if self.identity_path.exists() {
            return self.public_key();
        }

        let identity = age::x25519::Identity::generate();
        let identity_str = identity.to_string();

        let mut file = File::create(&self.identity_path)?;
        file.write_all(identity_str.expose_secret().as_bytes())?;
        fs::set_permissions(&self.identity_path, Permissions::from_mode(0o600))?;

        Ok(identity.to_public().to_string())
    }

    pub fn is_initialized(&self) -> bool {
        self.identity_path.exists()
    }

    fn ensure_initialized(&self) -> Result<(), SinkError> {
        if !self.is_initialized() {
            return Err(SinkError::NotInitialized);
        }
        Ok(())
    }

    /// Public key (recipient) of the vault identity
    pub fn public_key(&self) -> Result<String, SinkError> {
        self.ensure_initialized()?;
        Ok(self.load_identity()?.to_public().to_string())
    }

    fn load_identity(&self) -> Result<age::x25519::Identity, SinkError> {
        let content = fs::read_to_string(&self.identity_path)?;
        content
            .trim()
            .parse::<age::x25519::Identity>()
            .map_err(|e| SinkError::Decryption(format!("failed to parse identity: {}", e)))
    }

    fn validate_name(&self, name: &str) -> Result<(), SinkError> {
        if name.is_empty() {
            return Err(SinkError::InvalidName("name cannot be empty".to_string()));
        }

        if name.contains("..") || name.starts_with('/') || name.ends_with('/') {
            return Err(SinkError::InvalidName(format!("invalid name format: {}", name)));
        }

        if let Some(c) = name
            .chars()
            .find(|c| !c.is_alphanumeric() && !matches!(c, '/' | '_' | '-' | '.'))
        {
            return Err(SinkError::InvalidName(format!(
                "invalid character '{}' in {}",
                c, name
            )));
        }

        Ok(())
    }

    fn secret_path(&self, name: &str) -> PathBuf {
        self.secrets_dir.join(format!("{}.age", name))
    }

    fn reference(&self, name: &str) -> Result<SecretReference, SinkError> {
        Ok(SecretReference::new(format!("{}:{}", REFERENCE_PREFIX, name))?)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.secret_path(name).exists()
    }

    fn write_encrypted(&self, name: &str, payload: &str) -> Result<(), SinkError> {
        let recipient = self.load_identity()?.to_public();

        let path = self.secret_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let encryptor = age::Encryptor::with_recipients(vec![Box::new(recipient)])
            .ok_or_else(|| SinkError::Encryption("no recipients".to_string()))?;

        let mut encrypted = vec![];
        let mut writer = encryptor
            .wrap_output(&mut encrypted)
            .map_err(|e| SinkError::Encryption(e.to_string()))?;
        writer
            .write_all(payload.as_bytes())
            .map_err(|e| SinkError::Encryption(e.to_string()))?;
        writer
            .finish()
            .map_err(|e| SinkError::Encryption(e.to_string()))?;

        let mut file = File::create(&path)?;
        file.write_all(&encrypted)?;
        fs::set_permissions(&path, Permissions::from_mode(0o600))?;

        debug!(secret = name, bytes = encrypted.len(), "wrote encrypted secret");
        Ok(())
    }

    /// Decrypt a stored secret back into its name/value map
    pub fn read(&self, name: &str) -> Result<BTreeMap<String, String>, SinkError> {
        self.ensure_initialized()?;
        self.validate_name(name)?;

        let path = self.secret_path(name);
        if !path.exists() {
            return Err(SinkError::NotFound(name.to_string()));
        }

        let identity = self.load_identity()?;
        let encrypted = fs::read(&path)?;

        let decryptor = match age::Decryptor::new(&encrypted[..])
            .map_err(|e| SinkError::Decryption(e.to_string()))?
        {
            age::Decryptor::Recipients(d) => d,
            _ => {
                return Err(SinkError::Decryption(
                    "unexpected passphrase encryption".to_string(),
                ))
            }
        };

        let mut decrypted = vec![];
        let mut reader = decryptor
            .decrypt(std::iter::once(&identity as &dyn age::Identity))
            .map_err(|e| SinkError::Decryption(e.to_string()))?;
        reader
            .read_to_end(&mut decrypted)
            .map_err(|e| SinkError::Decryption(e.to_string()))?;

        serde_json::from_slice(&decrypted).map_err(|e| SinkError::Corrupt(e.to_string()))
    }
}

impl SecretSink for VaultSink {
    fn create(&self, name: &str, secrets: &SecretSet) -> Result<SecretReference, SinkError> {
        self.ensure_initialized()?;
        self.validate_name(name)?;

        if self.exists(name) {
            return Err(SinkError::AlreadyExists(name.to_string()));
        }

        self.write_encrypted(name, &secrets.to_json())?;
        self.reference(name)
    }

    fn update(&self, name: &str, secrets: &SecretSet) -> Result<SecretReference, SinkError> {
        self.ensure_initialized()?;
        self.validate_name(name)?;

        if !self.exists(name) {
            return Err(SinkError::NotFound(name.to_string()));
        }

        self.write_encrypted(name, &secrets.to_json())?;
        self.reference(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::publish;

    fn temp_vault() -> (VaultSink, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let vault = VaultSink::new(&dir.path().join("vault"));
        (vault, dir)
    }

    fn secrets(pairs: &[(&str, &str)]) -> SecretSet {
        let mut builder = SecretSet::builder();
        for (name, value) in pairs {
            builder.insert(*name, *value);
        }
        builder.finish()
    }

    #[test]
    fn test_init() {
        let (vault, _dir) = temp_vault();
        assert!(!vault.is_initialized());

        let pubkey = vault.init().unwrap();
        assert!(pubkey.starts_with("age1"));
        assert!(vault.is_initialized());

        // Re-init keeps the same identity
        assert_eq!(vault.init().unwrap(), pubkey);
    }

    #[test]
    fn test_create_then_read() {
        let (vault, _dir) = temp_vault();
        vault.init().unwrap();

        let reference = vault
            .create("prod/web", &secrets(&[("DB_PASSWORD", "secret1")]))
            .unwrap();
        assert_eq!(reference.as_str(), "vault:prod/web");

        let stored = vault.read("prod/web").unwrap();
        assert_eq!(stored.get("DB_PASSWORD").map(String::as_str), Some("secret1"));
    }

    #[test]
    fn test_create_existing_fails_and_publish_updates() {
        let (vault, _dir) = temp_vault();
        vault.init().unwrap();
        vault.create("app", &secrets(&[("A", "1")])).unwrap();

        assert!(matches!(
            vault.create("app", &secrets(&[("A", "2")])),
            Err(SinkError::AlreadyExists(_))
        ));

        let reference = publish(&vault, "app", &secrets(&[("A", "2"), ("B", "3")])).unwrap();
        assert_eq!(reference.as_str(), "vault:app");

        let stored = vault.read("app").unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored["A"], "2");
    }

    #[test]
    fn test_not_initialized() {
        let (vault, _dir) = temp_vault();
        assert!(matches!(
            vault.create("app", &secrets(&[("A", "1")])),
            Err(SinkError::NotInitialized)
        ));
    }

    #[test]
    fn test_invalid_names() {
        let (vault, _dir) = temp_vault();
        vault.init().unwrap();
        let set = secrets(&[("A", "1")]);

        assert!(matches!(vault.create("", &set), Err(SinkError::InvalidName(_))));
        assert!(matches!(vault.create("../escape", &set), Err(SinkError::InvalidName(_))));
        assert!(matches!(vault.create("/absolute", &set), Err(SinkError::InvalidName(_))));
        assert!(matches!(vault.create("with space", &set), Err(SinkError::InvalidName(_))));
    }

    #[test]
    fn test_read_missing() {
        let (vault, _dir) = temp_vault();
        vault.init().unwrap();
        assert!(matches!(vault.read("nonexistent"), Err(SinkError::NotFound(_))));
    }
}
