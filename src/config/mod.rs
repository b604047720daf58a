//! Signer configuration.
//!
//! All four parameters are mandatory; the struct cannot be built with any of
//! them absent, and a TOML document missing a field fails to deserialize.
//! There are deliberately no silent defaults.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Directory URL of the Let's Encrypt live service.
pub const LETS_ENCRYPT_DIRECTORY: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Directory URL of the Let's Encrypt staging (test) service.
pub const LETS_ENCRYPT_STAGING_DIRECTORY: &str =
    "https://acme-staging-v02.api.letsencrypt.org/directory";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    /// Directory URL of the ACME service used for signing.
    pub acme_directory: Url,
    /// Directory containing one docroot per virtual host, named by FQDN.
    pub docroots_dir: PathBuf,
    /// Docroot of the default virtual host; owns the real `.well-known`.
    pub default_docroot: PathBuf,
    /// Directory holding the PEM private keys of the virtual hosts.
    pub private_keys_dir: PathBuf,
}

impl Configuration {
    /// Configuration against the Let's Encrypt live service.
    pub fn lets_encrypt(
        docroots_dir: PathBuf,
        default_docroot: PathBuf,
        private_keys_dir: PathBuf,
    ) -> Self {
        Self::for_environment(
            AcmeEnvironment::Production,
            docroots_dir,
            default_docroot,
            private_keys_dir,
        )
    }

    /// Configuration against the Let's Encrypt staging service, for testing.
    pub fn lets_encrypt_staging(
        docroots_dir: PathBuf,
        default_docroot: PathBuf,
        private_keys_dir: PathBuf,
    ) -> Self {
        Self::for_environment(
            AcmeEnvironment::Staging,
            docroots_dir,
            default_docroot,
            private_keys_dir,
        )
    }

    pub fn for_environment(
        environment: AcmeEnvironment,
        docroots_dir: PathBuf,
        default_docroot: PathBuf,
        private_keys_dir: PathBuf,
    ) -> Self {
        Self {
            acme_directory: environment.directory_url(),
            docroots_dir,
            default_docroot,
            private_keys_dir,
        }
    }
}

/// The well-known ACME service environments this signer has presets for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, strum::Display, clap::ValueEnum)]
#[strum(serialize_all = "lowercase")]
pub enum AcmeEnvironment {
    Production,
    Staging,
}

impl AcmeEnvironment {
    pub fn directory_url(self) -> Url {
        let raw = match self {
            AcmeEnvironment::Production => LETS_ENCRYPT_DIRECTORY,
            AcmeEnvironment::Staging => LETS_ENCRYPT_STAGING_DIRECTORY,
        };
        Url::parse(raw).expect("BUG: built-in directory URL must parse")
    }
}

pub trait ConfigBackend {
    fn load<P: AsRef<Path>>(file: P) -> Result<Configuration, anyhow::Error>;
    fn save<P: AsRef<Path>>(config: &Configuration, file: P) -> Result<(), anyhow::Error>;
}

/// TOML file backend.
#[derive(Debug, Clone)]
pub struct TomlConfiguration;

impl ConfigBackend for TomlConfiguration {
    fn load<P: AsRef<Path>>(file: P) -> Result<Configuration, anyhow::Error> {
        let file = file.as_ref();
        let document = std::fs::read_to_string(file)
            .with_context(|| format!("Reading configuration file {} failed", file.display()))?;
        let config = toml_edit::de::from_str(&document)
            .with_context(|| format!("Configuration file {} is invalid", file.display()))?;
        Ok(config)
    }

    fn save<P: AsRef<Path>>(config: &Configuration, file: P) -> Result<(), anyhow::Error> {
        let file = file.as_ref();
        let document = toml_edit::ser::to_string_pretty(config)
            .context("Serializing configuration failed")?;
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(file, document)
            .with_context(|| format!("Writing configuration file {} failed", file.display()))?;
        Ok(())
    }
}

pub fn load<P: AsRef<Path>>(file: P) -> Result<Configuration, anyhow::Error> {
    TomlConfiguration::load(file)
}

pub fn save<P: AsRef<Path>>(config: &Configuration, file: P) -> Result<(), anyhow::Error> {
    TomlConfiguration::save(config, file)
}

#[cfg(test)]
mod tests {
    use super::{AcmeEnvironment, ConfigBackend, Configuration, TomlConfiguration};
    use std::path::PathBuf;

    #[test]
    fn test_round_trip_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("certbridge.toml");
        let config = Configuration::lets_encrypt_staging(
            PathBuf::from("/srv/docroots"),
            PathBuf::from("/srv/docroots/_default"),
            PathBuf::from("/etc/certbridge/keys"),
        );

        TomlConfiguration::save(&config, &file).unwrap();
        let loaded = TomlConfiguration::load(&file).unwrap();

        assert_eq!(loaded.acme_directory, config.acme_directory);
        assert_eq!(loaded.docroots_dir, config.docroots_dir);
        assert_eq!(loaded.default_docroot, config.default_docroot);
        assert_eq!(loaded.private_keys_dir, config.private_keys_dir);
    }

    #[test]
    fn test_missing_mandatory_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("incomplete.toml");
        std::fs::write(
            &file,
            "acme_directory = \"https://acme-staging-v02.api.letsencrypt.org/directory\"\n\
             docroots_dir = \"/srv/docroots\"\n",
        )
        .unwrap();

        let result = TomlConfiguration::load(&file);

        assert!(result.is_err());
    }

    #[test]
    fn test_environment_presets() {
        assert_eq!(
            AcmeEnvironment::Production.directory_url().as_str(),
            "https://acme-v02.api.letsencrypt.org/directory"
        );
        assert_eq!(
            AcmeEnvironment::Staging.directory_url().as_str(),
            "https://acme-staging-v02.api.letsencrypt.org/directory"
        );
    }
}
