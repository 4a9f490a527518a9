//! Content-based classification of candidate artifacts.
//!
//! Certificates are parsed with `x509-parser`. Private keys only need their
//! outer ASN.1 shape recognized (PKCS#8, encrypted PKCS#8, PKCS#1, SEC1), plus
//! the public half when it is stored in the clear; `der-parser` (re-exported
//! by `x509-parser`) reads those envelopes.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use x509_parser::der_parser::ber::BerObjectContent;
use x509_parser::der_parser::der::{DerObject, parse_der};
use x509_parser::oid_registry::{OID_KEY_TYPE_EC_PUBLIC_KEY, OID_PKCS1_RSAENCRYPTION};
use x509_parser::pem::Pem;
use x509_parser::public_key::PublicKey;

const PEM_MARKER: &[u8] = b"-----BEGIN ";

/// First byte of a DER SEQUENCE.
const DER_SEQUENCE: u8 = 0x30;

/// A parsed public certificate.
#[derive(Debug, Clone)]
pub(crate) struct CertificateCandidate {
    pub path: PathBuf,
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    pub not_after: DateTime<Utc>,
    pub fingerprint: String,
    /// Digest of the public key material, comparable with [`KeyCandidate::key_id`].
    pub key_id: Option<String>,
}

/// A recognized private key.
#[derive(Debug, Clone)]
pub(crate) struct KeyCandidate {
    pub path: PathBuf,
    /// `None` for encrypted or otherwise opaque keys.
    pub key_id: Option<String>,
}

/// What one file turned out to contain. A combined PEM may hold both.
#[derive(Debug, Default)]
pub(crate) struct Classified {
    pub certificate: Option<CertificateCandidate>,
    pub key: Option<KeyCandidate>,
}

impl Classified {
    pub fn is_empty(&self) -> bool {
        self.certificate.is_none() && self.key.is_none()
    }
}

/// Classify a file by content.
///
/// Returns `Ok` with an empty [`Classified`] for unrelated files and `Err`
/// only when the file claims to be PEM but cannot be decoded.
pub(crate) fn classify(path: &Path, bytes: &[u8]) -> Result<Classified, String> {
    if contains(bytes, PEM_MARKER) {
        classify_pem(path, bytes)
    } else {
        Ok(classify_der(path, bytes))
    }
}

fn classify_pem(path: &Path, bytes: &[u8]) -> Result<Classified, String> {
    let mut classified = Classified::default();

    for block in Pem::iter_from_buffer(bytes) {
        let pem = block.map_err(|e| format!("malformed PEM: {}", e))?;
        match pem.label.as_str() {
            // A chain file lists the leaf first; the rest are issuers.
            "CERTIFICATE" | "X509 CERTIFICATE" if classified.certificate.is_none() => {
                classified.certificate = parse_certificate(path, &pem.contents);
            }
            "PRIVATE KEY" | "RSA PRIVATE KEY" | "EC PRIVATE KEY" | "ENCRYPTED PRIVATE KEY"
                if classified.key.is_none() =>
            {
                classified.key = Some(KeyCandidate {
                    path: path.to_path_buf(),
                    key_id: private_key_id(&pem.contents).flatten(),
                });
            }
            _ => {}
        }
    }

    Ok(classified)
}

fn classify_der(path: &Path, bytes: &[u8]) -> Classified {
    if bytes.first() != Some(&DER_SEQUENCE) {
        return Classified::default();
    }

    if let Some(certificate) = parse_certificate(path, bytes) {
        return Classified {
            certificate: Some(certificate),
            key: None,
        };
    }

    match private_key_id(bytes) {
        Some(key_id) => Classified {
            certificate: None,
            key: Some(KeyCandidate {
                path: path.to_path_buf(),
                key_id,
            }),
        },
        None => Classified::default(),
    }
}

fn parse_certificate(path: &Path, der: &[u8]) -> Option<CertificateCandidate> {
    let (_, cert) = x509_parser::parse_x509_certificate(der).ok()?;
    let not_after = DateTime::<Utc>::from_timestamp(cert.validity().not_after.timestamp(), 0)?;

    let key_id = match cert.public_key().parsed() {
        Ok(PublicKey::RSA(rsa)) => Some(rsa_key_id(rsa.modulus)),
        Ok(PublicKey::EC(point)) => Some(ec_key_id(point.data())),
        _ => None,
    };

    Some(CertificateCandidate {
        path: path.to_path_buf(),
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        serial: cert.raw_serial_as_string(),
        not_after,
        fingerprint: sha256_hex(der),
        key_id,
    })
}

/// Recognize a DER private key.
///
/// `None`: not a private key. `Some(None)`: a key with no readable public
/// half. `Some(Some(id))`: a key whose public material is known.
fn private_key_id(der: &[u8]) -> Option<Option<String>> {
    let items = parse_sequence(der)?;

    match items.as_slice() {
        // PKCS#8 PrivateKeyInfo
        [version, algorithm, key, ..]
            if integer(version).is_some()
                && sequence(algorithm).is_some()
                && octets(key).is_some() =>
        {
            let oid = sequence(algorithm)
                .and_then(|alg| alg.first())
                .and_then(|o| o.as_oid().ok());
            let key = octets(key)?;
            match oid {
                Some(oid) if *oid == OID_PKCS1_RSAENCRYPTION => Some(pkcs1_key_id(key)),
                Some(oid) if *oid == OID_KEY_TYPE_EC_PUBLIC_KEY => Some(sec1_key_id(key)),
                Some(_) => Some(None),
                None => None,
            }
        }
        // EncryptedPrivateKeyInfo
        [algorithm, data] if sequence(algorithm).is_some() && octets(data).is_some() => {
            Some(None)
        }
        // SEC1 ECPrivateKey
        [version, private, ..] if integer(version).is_some() && octets(private).is_some() => {
            Some(sec1_key_id(der))
        }
        // PKCS#1 RSAPrivateKey
        [..] if items.len() >= 9 && items.iter().all(|i| integer(i).is_some()) => {
            Some(pkcs1_key_id(der))
        }
        _ => None,
    }
}

fn pkcs1_key_id(der: &[u8]) -> Option<String> {
    let items = parse_sequence(der)?;
    match items.as_slice() {
        [version, modulus, ..] if integer(version).is_some() => {
            integer(modulus).map(rsa_key_id)
        }
        _ => None,
    }
}

/// Public point of an `ECPrivateKey`, stored under the `[1]` tag.
fn sec1_key_id(der: &[u8]) -> Option<String> {
    let items = parse_sequence(der)?;
    items.iter().find_map(|item| {
        let BerObjectContent::Unknown(tagged) = &item.content else {
            return None;
        };
        let (_, inner) = parse_der(tagged.data).ok()?;
        match &inner.content {
            BerObjectContent::BitString(0, bits) => Some(ec_key_id(bits.data)),
            _ => None,
        }
    })
}

fn parse_sequence(der: &[u8]) -> Option<Vec<DerObject<'_>>> {
    let (rest, object) = parse_der(der).ok()?;
    if !rest.is_empty() {
        return None;
    }
    match object.content {
        BerObjectContent::Sequence(items) => Some(items),
        _ => None,
    }
}

fn sequence<'a, 'b>(object: &'b DerObject<'a>) -> Option<&'b [DerObject<'a>]> {
    match &object.content {
        BerObjectContent::Sequence(items) => Some(items),
        _ => None,
    }
}

fn integer<'a>(object: &DerObject<'a>) -> Option<&'a [u8]> {
    match object.content {
        BerObjectContent::Integer(bytes) => Some(bytes),
        _ => None,
    }
}

fn octets<'a>(object: &DerObject<'a>) -> Option<&'a [u8]> {
    match object.content {
        BerObjectContent::OctetString(bytes) => Some(bytes),
        _ => None,
    }
}

fn rsa_key_id(modulus: &[u8]) -> String {
    let start = modulus
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(modulus.len());
    let mut hasher = Sha256::new();
    hasher.update(b"rsa:");
    hasher.update(&modulus[start..]);
    format!("{:x}", hasher.finalize())
}

fn ec_key_id(point: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"ec:");
    hasher.update(point);
    format!("{:x}", hasher.finalize())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub const ALICE_CRT: &[u8] = include_bytes!("../../tests/fixtures/alice.crt");
    pub const ALICE_KEY: &[u8] = include_bytes!("../../tests/fixtures/alice.key");
    pub const BOB_SIGN_CERT: &[u8] = include_bytes!("../../tests/fixtures/bob_signCert.der");
    pub const BOB_SIGN_PRI: &[u8] = include_bytes!("../../tests/fixtures/bob_signPri.key");
    pub const BOB_KM_CERT: &[u8] = include_bytes!("../../tests/fixtures/bob_kmCert.der");
    pub const BOB_KM_PRI: &[u8] = include_bytes!("../../tests/fixtures/bob_kmPri.key");
    pub const CAROL_CRT: &[u8] = include_bytes!("../../tests/fixtures/carol.crt");
    pub const DAVE_KEY: &[u8] = include_bytes!("../../tests/fixtures/dave.key");
    pub const ERIN_CRT: &[u8] = include_bytes!("../../tests/fixtures/erin.crt");
    pub const ERIN_KEY: &[u8] = include_bytes!("../../tests/fixtures/erin.key");
    pub const ERIN_PKCS8_KEY: &[u8] = include_bytes!("../../tests/fixtures/erin_pkcs8.key");
    pub const RENEW_KEY: &[u8] = include_bytes!("../../tests/fixtures/renew.key");
    pub const RENEW_OLD_CRT: &[u8] = include_bytes!("../../tests/fixtures/renew_old.crt");
    pub const RENEW_NEW_CRT: &[u8] = include_bytes!("../../tests/fixtures/renew_new.crt");
    pub const FRANK_SHORT_CRT: &[u8] = include_bytes!("../../tests/fixtures/frank_short.crt");
    pub const FRANK_LONG_CRT: &[u8] = include_bytes!("../../tests/fixtures/frank_long.crt");
    pub const FRANK_SECRET: &[u8] = include_bytes!("../../tests/fixtures/frank_secret.bin");
}
