//! Validity oracle for keybox entries.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::sync::Mutex;
use std::time::Duration;
use x509_parser::prelude::*;

use super::{KeyboxEntry, Validity};

/// Public attestation revocation list.
pub const DEFAULT_CRL_URL: &str = "https://android.googleapis.com/attestation/status";

/// Digest lengths (hex chars) a revocation key may be padded to.
const HASH_LENGTHS: [usize; 3] = [32, 40, 64];

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("oracle timed out")]
    Timeout,

    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    #[error("malformed revocation list: {0}")]
    Malformed(String),
}

/// Something that can tell whether a keybox entry is still good.
///
/// Calls may block on I/O; the maintainer runs them on the blocking pool with
/// a timeout. Any error means "unknown" and the entry is left alone.
pub trait ValidityOracle: Send + Sync {
    /// Called once per maintenance cycle before any [`check`](Self::check).
    fn refresh(&self) -> Result<(), OracleError> {
        Ok(())
    }

    fn check(&self, entry: &KeyboxEntry) -> Result<Validity, OracleError>;
}

/// Oracle backed by the published revocation list.
///
/// An entry counts as revoked when any certificate in its chain is on the
/// list, either by serial number or by the SHA-256 of its public key.
pub struct CrlOracle {
    url: String,
    timeout: Duration,
    revoked: Mutex<Option<HashSet<String>>>,
}

impl CrlOracle {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            revoked: Mutex::new(None),
        }
    }

    /// Build an oracle from an already fetched list (used by tests and offline runs).
    pub fn with_revoked(revoked: HashSet<String>) -> Self {
        Self {
            url: String::new(),
            timeout: Duration::from_secs(0),
            revoked: Mutex::new(Some(revoked)),
        }
    }

    fn fetch(&self) -> Result<HashSet<String>, OracleError> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(self.timeout)
            .timeout_read(self.timeout)
            .build();

        let response = agent
            .get(&self.url)
            .set("Cache-Control", "no-cache")
            .call()
            .map_err(|e| match e {
                ureq::Error::Status(code, _) => {
                    OracleError::Unavailable(format!("HTTP {}", code))
                }
                ureq::Error::Transport(t) => OracleError::Unavailable(t.to_string()),
            })?;

        let json: serde_json::Value = response
            .into_json()
            .map_err(|e| OracleError::Malformed(e.to_string()))?;
        parse_crl(&json)
    }
}

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// DER bytes of every PEM certificate embedded in a keybox file.
pub fn certificate_chain(keybox: &str) -> Result<Vec<Vec<u8>>, OracleError> {
    let mut chain = Vec::new();
    let mut rest = keybox;
    while let Some(start) = rest.find(PEM_BEGIN) {
        let body = &rest[start + PEM_BEGIN.len()..];
        let end = body
            .find(PEM_END)
            .ok_or_else(|| OracleError::Malformed("unterminated certificate".into()))?;
        let encoded: String = body[..end].chars().filter(|c| !c.is_whitespace()).collect();
        let der = STANDARD
            .decode(encoded)
            .map_err(|e| OracleError::Malformed(format!("certificate base64: {}", e)))?;
        chain.push(der);
        rest = &body[end + PEM_END.len()..];
    }
    Ok(chain)
}

/// Serial as lowercase hex without leading zeros.
fn hex_serial(raw: &[u8]) -> String {
    let hex: String = raw.iter().map(|b| format!("{:02x}", b)).collect();
    match hex.trim_start_matches('0') {
        "" => "0".to_string(),
        trimmed => trimmed.to_string(),
    }
}

/// The revocation list keys a certificate can appear under.
pub fn revocation_keys(der: &[u8]) -> Result<[String; 2], OracleError> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| OracleError::Malformed(format!("certificate: {}", e)))?;
    let serial = hex_serial(cert.tbs_certificate.raw_serial());
    let key_id = format!("{:x}", Sha256::digest(cert.public_key().raw));
    Ok([serial, key_id])
}

impl ValidityOracle for CrlOracle {
    fn refresh(&self) -> Result<(), OracleError> {
        let fetched = self.fetch()?;
        tracing::info!(entries = fetched.len(), "fetched revocation list");
        let mut guard = self
            .revoked
            .lock()
            .map_err(|_| OracleError::Unavailable("revocation list lock poisoned".into()))?;
        *guard = Some(fetched);
        Ok(())
    }

    fn check(&self, entry: &KeyboxEntry) -> Result<Validity, OracleError> {
        let content = fs::read(&entry.path)
            .map_err(|e| OracleError::Unavailable(format!("read {}: {}", entry.id, e)))?;
        let chain = certificate_chain(&String::from_utf8_lossy(&content))?;
        if chain.is_empty() {
            return Err(OracleError::Malformed(format!(
                "{} has no certificates",
                entry.id
            )));
        }

        let guard = self
            .revoked
            .lock()
            .map_err(|_| OracleError::Unavailable("revocation list lock poisoned".into()))?;
        let revoked = guard
            .as_ref()
            .ok_or_else(|| OracleError::Unavailable("revocation list not loaded".into()))?;

        for der in &chain {
            let keys = revocation_keys(der)?;
            if let Some(key) = keys.iter().find(|k| revoked.contains(*k)) {
                tracing::info!(keybox = %entry.id, key = %key, "certificate is revoked");
                return Ok(Validity::Revoked);
            }
        }
        Ok(Validity::Valid)
    }
}

/// Parse the revocation list JSON into a set of lowercase hex keys.
///
/// Keys under `entries` are either decimal serial numbers or hex digests.
/// Decimal keys are converted to hex and also stored zero-padded to the
/// common digest lengths, since leading zeros are lost in decimal form.
pub fn parse_crl(json: &serde_json::Value) -> Result<HashSet<String>, OracleError> {
    let entries = json
        .get("entries")
        .and_then(|e| e.as_object())
        .ok_or_else(|| OracleError::Malformed("'entries' object missing".into()))?;

    let mut set = HashSet::new();
    for key in entries.keys() {
        if !normalize_entry(key, &mut set) {
            tracing::warn!(key = %key, "skipping unparseable revocation entry");
        }
    }
    Ok(set)
}

fn normalize_entry(key: &str, set: &mut HashSet<String>) -> bool {
    let mut added = false;

    let is_decimal = !key.is_empty()
        && key.bytes().all(|b| b.is_ascii_digit())
        && !(key.len() > 1 && key.starts_with('0'));
    if is_decimal {
        if let Some(hex) = decimal_to_hex(key) {
            for len in HASH_LENGTHS {
                if hex.len() < len {
                    set.insert(format!("{:0>width$}", hex, width = len));
                }
            }
            set.insert(hex);
            added = true;
        }
    }

    let is_hex = !key.is_empty() && key.bytes().all(|b| b.is_ascii_hexdigit());
    if is_hex && HASH_LENGTHS.contains(&key.len()) {
        set.insert(key.to_ascii_lowercase());
        added = true;
    }

    if !added && is_hex {
        let trimmed = key.trim_start_matches('0').to_ascii_lowercase();
        set.insert(if trimmed.is_empty() {
            "0".to_string()
        } else {
            trimmed
        });
        added = true;
    }

    added
}

/// Convert an arbitrary-length decimal string to lowercase hex.
fn decimal_to_hex(decimal: &str) -> Option<String> {
    let mut digits: Vec<u32> = decimal
        .bytes()
        .map(|b| (b as char).to_digit(10))
        .collect::<Option<_>>()?;

    let mut hex = Vec::new();
    while !(digits.is_empty() || digits.iter().all(|d| *d == 0)) {
        let mut remainder = 0u32;
        let mut quotient = Vec::with_capacity(digits.len());
        for d in &digits {
            let acc = remainder * 10 + d;
            let q = acc / 16;
            remainder = acc % 16;
            if !(quotient.is_empty() && q == 0) {
                quotient.push(q);
            }
        }
        hex.push(std::char::from_digit(remainder, 16)?);
        digits = quotient;
    }

    if hex.is_empty() {
        return Some("0".to_string());
    }
    Some(hex.iter().rev().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decimal_to_hex() {
        assert_eq!(decimal_to_hex("0").as_deref(), Some("0"));
        assert_eq!(decimal_to_hex("255").as_deref(), Some("ff"));
        assert_eq!(decimal_to_hex("4096").as_deref(), Some("1000"));
        // Larger than u128
        assert_eq!(
            decimal_to_hex("1461501637330902918203684832716283019655932542975").as_deref(),
            Some("ffffffffffffffffffffffffffffffffffffffff")
        );
        assert_eq!(decimal_to_hex("12a"), None);
    }

    #[test]
    fn test_parse_crl_requires_entries() {
        assert!(matches!(
            parse_crl(&json!({"nope": {}})),
            Err(OracleError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_crl_normalizes_keys() {
        let digest = "AB".repeat(32);
        let crl = json!({
            "entries": {
                "255": {"status": "REVOKED"},
                "00c0ffee": {"status": "REVOKED"},
                digest.clone(): {"status": "REVOKED"}
            }
        });
        let set = parse_crl(&crl).unwrap();

        assert!(set.contains("ff"));
        assert!(set.contains(&format!("{:0>64}", "ff")));
        assert!(set.contains("c0ffee"));
        assert!(set.contains(&digest.to_ascii_lowercase()));
    }

    #[test]
    fn test_decimal_key_is_not_read_as_hex() {
        let set = parse_crl(&json!({"entries": {"10": "REVOKED"}})).unwrap();
        assert!(set.contains("a"));
        assert!(!set.contains("10"));

        let ambiguous = "10000000000000000000000000000000";
        let set = parse_crl(&json!({"entries": {ambiguous: "REVOKED"}})).unwrap();
        assert!(set.contains(&decimal_to_hex(ambiguous).unwrap()));
    }

    fn keybox_with_serial(serial: &[u8]) -> (String, Vec<u8>) {
        let mut params = rcgen::CertificateParams::new(vec!["keybox.test".into()]).unwrap();
        params.serial_number = Some(rcgen::SerialNumber::from_slice(serial));
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        let xml = format!(
            "<AndroidAttestation>\n  <Keybox DeviceID=\"test\">\n    <Key algorithm=\"ecdsa\">\n      \
             <CertificateChain>\n        <NumberOfCertificates>1</NumberOfCertificates>\n        \
             <Certificate format=\"pem\">\n{}        </Certificate>\n      </CertificateChain>\n    \
             </Key>\n  </Keybox>\n</AndroidAttestation>\n",
            cert.pem()
        );
        (xml, cert.der().to_vec())
    }

    fn entry_at(dir: &std::path::Path, id: &str, content: &str) -> KeyboxEntry {
        let path = dir.join(id);
        std::fs::write(&path, content).unwrap();
        KeyboxEntry {
            id: id.to_string(),
            status: Validity::Unknown,
            enabled: true,
            path,
        }
    }

    #[test]
    fn test_hex_serial() {
        assert_eq!(hex_serial(&[0x00, 0x30, 0x39]), "3039");
        assert_eq!(hex_serial(&[0x00]), "0");
        assert_eq!(hex_serial(&[0x0a, 0xff]), "aff");
    }

    #[test]
    fn test_certificate_chain_reads_embedded_pem() {
        let (xml, der) = keybox_with_serial(&[0x30, 0x39]);
        assert_eq!(certificate_chain(&xml).unwrap(), vec![der]);
        assert!(certificate_chain("<AndroidAttestation/>").unwrap().is_empty());
        assert!(matches!(
            certificate_chain("-----BEGIN CERTIFICATE-----\nAAAA"),
            Err(OracleError::Malformed(_))
        ));
    }

    #[test]
    fn test_check_matches_serial_from_decimal_list() {
        let dir = tempfile::TempDir::new().unwrap();
        let (bad_xml, _) = keybox_with_serial(&[0x30, 0x39]);
        let (good_xml, _) = keybox_with_serial(&[0x30, 0x3a]);

        // 12345 == 0x3039
        let revoked = parse_crl(&json!({"entries": {"12345": {"status": "REVOKED"}}})).unwrap();
        let oracle = CrlOracle::with_revoked(revoked);

        assert_eq!(
            oracle.check(&entry_at(dir.path(), "bad.xml", &bad_xml)).unwrap(),
            Validity::Revoked
        );
        assert_eq!(
            oracle.check(&entry_at(dir.path(), "good.xml", &good_xml)).unwrap(),
            Validity::Valid
        );
    }

    #[test]
    fn test_check_matches_hex_serial() {
        let dir = tempfile::TempDir::new().unwrap();
        let (xml, _) = keybox_with_serial(&[0x30, 0x39]);
        let revoked = parse_crl(&json!({"entries": {"3039": {"status": "REVOKED"}}})).unwrap();
        let oracle = CrlOracle::with_revoked(revoked);
        assert_eq!(
            oracle.check(&entry_at(dir.path(), "a.xml", &xml)).unwrap(),
            Validity::Revoked
        );
    }

    #[test]
    fn test_check_matches_public_key_digest() {
        let dir = tempfile::TempDir::new().unwrap();
        let (xml, der) = keybox_with_serial(&[0x01, 0x02, 0x03]);
        let (_, cert) = X509Certificate::from_der(&der).unwrap();
        let key_id = format!("{:x}", Sha256::digest(cert.public_key().raw));
        assert_eq!(revocation_keys(&der).unwrap()[1], key_id);

        let oracle = CrlOracle::with_revoked(HashSet::from([key_id]));
        assert_eq!(
            oracle.check(&entry_at(dir.path(), "a.xml", &xml)).unwrap(),
            Validity::Revoked
        );
    }

    #[test]
    fn test_keybox_without_certificates_is_not_judged() {
        let dir = tempfile::TempDir::new().unwrap();
        let oracle = CrlOracle::with_revoked(HashSet::from(["3039".to_string()]));
        assert!(matches!(
            oracle.check(&entry_at(dir.path(), "empty.xml", "<AndroidAttestation/>")),
            Err(OracleError::Malformed(_))
        ));
    }

    #[test]
    fn test_check_without_list_is_unavailable() {
        let oracle = CrlOracle::new("http://127.0.0.1:9/unused", Duration::from_millis(10));
        let dir = tempfile::TempDir::new().unwrap();
        let (xml, _) = keybox_with_serial(&[0x30, 0x39]);
        let entry = entry_at(dir.path(), "a.xml", &xml);
        assert!(matches!(
            oracle.check(&entry),
            Err(OracleError::Unavailable(_))
        ));
    }
}
