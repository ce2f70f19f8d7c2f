//! Peer certificate inspection.
//!
//! The engine hands over the peer's end-entity certificate in DER form.
//! This module exposes the fields applications commonly log or match on,
//! and computes fingerprints for display.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use der::oid::AssociatedOid;
use der::Decode;
use sha2::{Digest, Sha256};
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::SubjectAltName;
use x509_cert::Certificate;

use crate::Error;

/// A parsed peer certificate.
#[derive(Clone)]
pub struct PeerCertificate {
    der: Vec<u8>,
    cert: Certificate,
}

impl PeerCertificate {
    /// Parse a DER encoded X.509 certificate.
    pub fn from_der(der: &[u8]) -> Result<Self, Error> {
        let cert = Certificate::from_der(der)
            .map_err(|e| Error::Certificate(format!("Invalid certificate: {}", e)))?;
        Ok(PeerCertificate {
            der: der.to_vec(),
            cert,
        })
    }

    /// The certificate in DER format.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Subject distinguished name, RFC 4514 formatted.
    pub fn subject(&self) -> String {
        self.cert.tbs_certificate.subject.to_string()
    }

    /// Issuer distinguished name, RFC 4514 formatted.
    pub fn issuer(&self) -> String {
        self.cert.tbs_certificate.issuer.to_string()
    }

    /// Serial number as uppercase hex.
    pub fn serial(&self) -> String {
        self.cert
            .tbs_certificate
            .serial_number
            .as_bytes()
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect()
    }

    /// IP addresses listed in the subject alternative name extension.
    pub fn ip_addresses(&self) -> Result<Vec<IpAddr>, Error> {
        let Some(extensions) = &self.cert.tbs_certificate.extensions else {
            return Ok(Vec::new());
        };

        let mut ips = Vec::new();

        for ext in extensions.iter().filter(|e| e.extn_id == SubjectAltName::OID) {
            let san = SubjectAltName::from_der(ext.extn_value.as_bytes())
                .map_err(|e| Error::Certificate(format!("Invalid subjectAltName: {}", e)))?;

            for name in san.0 {
                if let GeneralName::IpAddress(octets) = name {
                    if let Some(ip) = ip_from_octets(octets.as_bytes()) {
                        ips.push(ip);
                    }
                }
            }
        }

        Ok(ips)
    }

    /// SHA-256 over the DER encoding.
    pub fn fingerprint(&self) -> Vec<u8> {
        calculate_fingerprint(&self.der)
    }

    /// The fingerprint as uppercase hex pairs separated by colons,
    /// for example "AF:12:F6:...".
    pub fn fingerprint_str(&self) -> String {
        format_fingerprint(&self.fingerprint())
    }
}

fn ip_from_octets(octets: &[u8]) -> Option<IpAddr> {
    match octets.len() {
        4 => {
            let mut b = [0u8; 4];
            b.copy_from_slice(octets);
            Some(IpAddr::V4(Ipv4Addr::from(b)))
        }
        16 => {
            let mut b = [0u8; 16];
            b.copy_from_slice(octets);
            Some(IpAddr::V6(Ipv6Addr::from(b)))
        }
        _ => None,
    }
}

/// Calculate a certificate fingerprint using SHA-256
pub fn calculate_fingerprint(cert_der: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(cert_der);
    hasher.finalize().to_vec()
}

/// Format a fingerprint as a colon-separated hex string
pub fn format_fingerprint(fingerprint: &[u8]) -> String {
    fingerprint
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<String>>()
        .join(":")
}

impl fmt::Debug for PeerCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerCertificate")
            .field("subject", &self.subject())
            .field("serial", &self.serial())
            .finish()
    }
}
