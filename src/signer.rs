//! The signing pipeline: CSR in, PEM certificate chain out.
//!
//! Each call is an independent pipeline over shared read-only configuration;
//! any number of calls may be in flight concurrently for different domains.
//! Expected rejections (no eligible name, no matching key, client failure)
//! surface as `Ok(None)` so callers can decide how to react; only unexpected
//! conditions become errors.

use crate::cmd_runner::{AcmeClientRunner, CertbotRunner, ProcessOutput};
use crate::config::Configuration;
use crate::{csr, keystore, webroot};
use anyhow::Context;
use std::ffi::OsString;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

const CERT_FILE: &str = "certificate.pem";
const FULLCHAIN_FILE: &str = "fullchain.pem";
const CHAIN_FILE: &str = "chain.pem";

/// Bridges CSRs from dynamically registered virtual hosts to an external
/// ACME client.
#[derive(Debug)]
pub struct AcmeCertificateSigner<R = CertbotRunner> {
    config: Configuration,
    runner: R,
}

impl AcmeCertificateSigner<CertbotRunner> {
    pub fn new(config: Configuration) -> Self {
        Self::with_runner(config, CertbotRunner::default())
    }
}

impl<R: AcmeClientRunner> AcmeCertificateSigner<R> {
    /// Build a signer with a custom external client runner. Tests use this to
    /// substitute a mock for the real subprocess.
    pub fn with_runner(config: Configuration, runner: R) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Sign a PEM CSR and return the issued full certificate chain in PEM form.
    ///
    /// The incoming CSR serves as a guideline: the optional `alias` becomes
    /// the certificate's common name and first SAN, and the CSR's own common
    /// name is included when it is neither `localhost` nor an IP literal.
    ///
    /// Returns `Ok(None)` when the request has no eligible name, when no
    /// private key on disk matches the request's public key, or when the
    /// external client fails. Temporary state is cleaned up on every path,
    /// including cancellation of the returned future.
    pub async fn sign(&self, csr_pem: &str, alias: Option<&str>) -> anyhow::Result<Option<String>> {
        let parsed = csr::parse_csr(csr_pem).context("Parsing the incoming CSR failed")?;
        let names = csr::eligible_names(&parsed, alias);
        if names.is_empty() {
            debug!("Request carries no name eligible for a public certificate");
            return Ok(None);
        }
        let Some(key) =
            keystore::find_key_for_public_key(&self.config.private_keys_dir, &parsed.spki_der)
                .await
        else {
            debug!("No private key on disk matches the request's public key");
            return Ok(None);
        };
        let rewritten = csr::rebuild_csr(&names, &key)?;
        let domain = rewritten.primary_domain.clone();
        info!("Requesting certificate for {domain} ({} names)", names.len());

        // Uniquely named, removed on drop: also when this future is cancelled.
        let mut csr_file = tempfile::NamedTempFile::new()
            .context("Creating a temporary file for the CSR failed")?;
        csr_file
            .write_all(rewritten.pem.as_bytes())
            .context("Writing the temporary CSR file failed")?;
        csr_file
            .flush()
            .context("Flushing the temporary CSR file failed")?;

        {
            let docroots_dir = self.config.docroots_dir.clone();
            let default_docroot = self.config.default_docroot.clone();
            let domain = domain.clone();
            tokio::task::spawn_blocking(move || {
                webroot::provision(&docroots_dir, &domain, &default_docroot)
            })
            .await
            .context("Webroot provisioning task failed")??;
        }

        let output_dir = tempfile::tempdir()
            .context("Creating a temporary output directory failed")?;
        let args = self.client_arguments(csr_file.path(), output_dir.path());
        let output = self
            .runner
            .run(&args)
            .await
            .context("Launching the external ACME client failed")?;
        if !output.success() {
            log_client_failure(&output);
            return Ok(None);
        }
        let chain = tokio::fs::read_to_string(output_dir.path().join(FULLCHAIN_FILE))
            .await
            .context("Reading the issued certificate chain failed")?;
        info!("Certificate for {domain} issued");
        Ok(Some(chain))
    }

    fn client_arguments(&self, csr_path: &Path, output_dir: &Path) -> Vec<OsString> {
        vec![
            OsString::from("certonly"),
            OsString::from("--server"),
            OsString::from(self.config.acme_directory.as_str()),
            OsString::from("--webroot"),
            OsString::from("--webroot-path"),
            self.config.default_docroot.clone().into_os_string(),
            OsString::from("--csr"),
            csr_path.as_os_str().to_os_string(),
            OsString::from("--cert-path"),
            output_dir.join(CERT_FILE).into_os_string(),
            OsString::from("--fullchain-path"),
            output_dir.join(FULLCHAIN_FILE).into_os_string(),
            OsString::from("--chain-path"),
            output_dir.join(CHAIN_FILE).into_os_string(),
        ]
    }
}

fn log_client_failure(output: &ProcessOutput) {
    error!(
        "ACME client failed with exit code {}: {}",
        output.exit_code,
        String::from_utf8_lossy(&output.stdout)
    );
}

#[cfg(test)]
mod tests {
    use super::AcmeCertificateSigner;
    use crate::cmd_runner::CertbotRunner;
    use crate::config::Configuration;
    use std::ffi::OsString;
    use std::path::{Path, PathBuf};

    fn test_signer() -> AcmeCertificateSigner {
        let config = Configuration::lets_encrypt_staging(
            PathBuf::from("/srv/docroots"),
            PathBuf::from("/srv/docroots/_default"),
            PathBuf::from("/etc/keys"),
        );
        AcmeCertificateSigner::with_runner(config, CertbotRunner::default())
    }

    #[test]
    fn test_client_argument_layout() {
        let signer = test_signer();

        let args = signer.client_arguments(Path::new("/tmp/req.pem"), Path::new("/tmp/out"));

        let expected: Vec<OsString> = [
            "certonly",
            "--server",
            "https://acme-staging-v02.api.letsencrypt.org/directory",
            "--webroot",
            "--webroot-path",
            "/srv/docroots/_default",
            "--csr",
            "/tmp/req.pem",
            "--cert-path",
            "/tmp/out/certificate.pem",
            "--fullchain-path",
            "/tmp/out/fullchain.pem",
            "--chain-path",
            "/tmp/out/chain.pem",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        assert_eq!(args, expected);
    }
}
