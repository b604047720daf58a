//! Parsing incoming certificate signing requests and rebuilding them into
//! requests acceptable to the ACME provider.
//!
//! The incoming CSR is only a guideline: its subject and public key are
//! extracted, the eligible names are re-derived, and a fresh request is
//! constructed and signed with the matching private key from the key store.
//! The original request object is never modified.

use crate::name;
use anyhow::Context;
use tracing::debug;
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::prelude::FromDer;

/// PKCS#10 object identifier for the basicConstraints extension (2.5.29.19).
const BASIC_CONSTRAINTS_OID: &[u64] = &[2, 5, 29, 19];
/// DER encoding of a basicConstraints value with cA absent, i.e. CA:FALSE.
const BASIC_CONSTRAINTS_NO_CA: [u8; 2] = [0x30, 0x00];

#[derive(Debug, thiserror::Error)]
pub enum CsrError {
    #[error("request is not valid PEM: {0}")]
    Pem(#[from] pem::PemError),
    #[error("PEM block is not a certificate request (found tag {0})")]
    UnexpectedTag(String),
    #[error("decoding the certificate request structure failed: {0}")]
    Decode(String),
}

/// The fields of an incoming CSR this system cares about.
#[derive(Debug, Clone)]
pub struct ParsedCsr {
    /// The subject common name, if the subject carries a readable one.
    pub common_name: Option<String>,
    /// DER-encoded SubjectPublicKeyInfo of the requester's public key.
    pub spki_der: Vec<u8>,
}

/// A rebuilt, signed CSR ready to hand to the ACME client.
#[derive(Debug, Clone)]
pub struct RewrittenCsr {
    pub pem: String,
    /// First SAN entry; the domain the HTTP-01 challenge is provisioned for.
    pub primary_domain: String,
    pub names: Vec<String>,
}

/// Decode a PEM certificate signing request into the fields we need.
pub fn parse_csr(csr_pem: &str) -> Result<ParsedCsr, CsrError> {
    let block = pem::parse(csr_pem)?;
    if block.tag() != "CERTIFICATE REQUEST" && block.tag() != "NEW CERTIFICATE REQUEST" {
        return Err(CsrError::UnexpectedTag(block.tag().to_string()));
    }
    let (_, request) = X509CertificationRequest::from_der(block.contents())
        .map_err(|err| CsrError::Decode(err.to_string()))?;
    let info = &request.certification_request_info;
    let common_name = info
        .subject
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(ToString::to_string);
    Ok(ParsedCsr {
        common_name,
        spki_der: info.subject_pki.raw.to_vec(),
    })
}

/// Derive the SAN list for the outgoing request.
///
/// The optional alias always comes first. The original common name follows
/// unless it is `localhost` or an IP address literal; a CA cannot issue for
/// either through this flow. An empty result means the request carries no name
/// a public certificate could be issued for.
pub fn eligible_names(csr: &ParsedCsr, alias: Option<&str>) -> Vec<String> {
    let mut names = Vec::new();
    if let Some(alias) = alias {
        names.push(alias.to_string());
    }
    if let Some(common_name) = &csr.common_name {
        if common_name != "localhost" && !name::is_ip_literal(common_name) {
            names.push(common_name.clone());
        } else {
            debug!("Common name {common_name} is not eligible for a public certificate");
        }
    }
    names
}

/// Build and sign a fresh CSR carrying `names` as DNS SANs, the first name as
/// subject common name, a CA:FALSE basicConstraints extension, and the given
/// key as its public key. Signed with a SHA-256 family digest (implied by the
/// key's algorithm).
pub fn rebuild_csr(names: &[String], key: &rcgen::KeyPair) -> anyhow::Result<RewrittenCsr> {
    let primary_domain = names
        .first()
        .context("a certificate request needs at least one name")?
        .clone();
    let mut params = rcgen::CertificateParams::new(names.to_vec())
        .context("Assembling certificate request parameters failed")?;
    params.distinguished_name = rcgen::DistinguishedName::new();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, primary_domain.as_str());
    let mut basic_constraints = rcgen::CustomExtension::from_oid_content(
        BASIC_CONSTRAINTS_OID,
        BASIC_CONSTRAINTS_NO_CA.to_vec(),
    );
    basic_constraints.set_criticality(true);
    params.custom_extensions.push(basic_constraints);
    let request = params
        .serialize_request(key)
        .context("Signing the rebuilt certificate request failed")?;
    let pem = request
        .pem()
        .context("Encoding the rebuilt certificate request failed")?;
    Ok(RewrittenCsr {
        pem,
        primary_domain,
        names: names.to_vec(),
    })
}
