//! HTTP Signatures for `ActivityPub` requests.
//!
//! The federation layer consumes signing and verification through the
//! [`SignatureProvider`] trait. [`RsaSha256Signer`] is the draft-cavage
//! `rsa-sha256` implementation used in production.
//! See: <https://datatracker.ietf.org/doc/html/draft-cavage-http-signatures>

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::Utc;
use rsa::{
    RsaPrivateKey, RsaPublicKey,
    pkcs1v15::{Signature, SigningKey, VerifyingKey},
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding},
    sha2::Sha256,
    signature::{SignatureEncoding, Signer, Verifier},
};
use sha2::{Digest, Sha256 as Sha256Hasher};
use std::collections::HashMap;
use url::Url;

use crate::{AppError, AppResult};

/// Headers covered by a signature on a bodiless request.
const GET_SIGNED_HEADERS: &[&str] = &["(request-target)", "host", "date"];

/// Headers covered by a signature on a request with a body.
const POST_SIGNED_HEADERS: &[&str] = &["(request-target)", "host", "date", "digest"];

/// Key material used to sign one request.
#[derive(Debug, Clone)]
pub struct SigningKeyRef<'a> {
    /// Key ID, typically `{actorUri}#main-key`.
    pub key_id: &'a str,
    /// PKCS#8 PEM private key.
    pub private_key_pem: &'a str,
}

/// Signs outbound requests and verifies inbound ones.
pub trait SignatureProvider: Send + Sync {
    /// Produce the headers (`host`, `date`, optional `digest`, `signature`)
    /// to attach to a request.
    fn sign(
        &self,
        method: &str,
        url: &Url,
        body: Option<&[u8]>,
        key: &SigningKeyRef<'_>,
    ) -> AppResult<Vec<(String, String)>>;

    /// Verify a `Signature` header against lower-cased request headers.
    fn verify(
        &self,
        signature_header: &str,
        public_key_pem: &str,
        method: &str,
        path: &str,
        headers: &HashMap<String, String>,
    ) -> AppResult<bool>;
}

/// Parsed HTTP Signature header.
#[derive(Debug, Clone)]
pub struct HttpSignature {
    /// Key ID (typically the actor's public key URL)
    pub key_id: String,
    /// Algorithm used (typically "rsa-sha256")
    pub algorithm: String,
    /// Headers included in the signature
    pub headers: Vec<String>,
    /// The signature itself (base64 encoded)
    pub signature: String,
}

impl HttpSignature {
    /// Parse an HTTP Signature header value.
    ///
    /// Format: `keyId="...",algorithm="...",headers="...",signature="..."`
    pub fn parse(header: &str) -> AppResult<Self> {
        let mut key_id = None;
        let mut algorithm = None;
        let mut headers = None;
        let mut signature = None;

        for part in header.split(',') {
            if let Some((key, value)) = part.trim().split_once('=') {
                let value = value.trim_matches('"').to_string();
                match key.trim() {
                    "keyId" => key_id = Some(value),
                    "algorithm" => algorithm = Some(value),
                    "headers" => headers = Some(value),
                    "signature" => signature = Some(value),
                    _ => {}
                }
            }
        }

        Ok(Self {
            key_id: key_id.ok_or_else(|| AppError::BadRequest("Missing keyId".to_string()))?,
            algorithm: algorithm.unwrap_or_else(|| "rsa-sha256".to_string()),
            headers: headers
                .as_deref()
                .unwrap_or("date")
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            signature: signature
                .ok_or_else(|| AppError::BadRequest("Missing signature".to_string()))?,
        })
    }
}

/// Build the signing string from request components.
pub fn build_signature_string(
    method: &str,
    path: &str,
    headers: &HashMap<String, String>,
    signed_headers: &[String],
) -> AppResult<String> {
    signed_headers
        .iter()
        .map(|name| {
            let value = if name == "(request-target)" {
                format!("{} {}", method.to_lowercase(), path)
            } else {
                headers
                    .get(&name.to_lowercase())
                    .cloned()
                    .ok_or_else(|| AppError::BadRequest(format!("Missing header: {name}")))?
            };
            Ok(format!("{name}: {value}"))
        })
        .collect::<AppResult<Vec<_>>>()
        .map(|lines| lines.join("\n"))
}

/// Calculate the `Digest` header value of a body.
#[must_use]
pub fn calculate_digest(body: &[u8]) -> String {
    let hash = Sha256Hasher::digest(body);
    format!("SHA-256={}", BASE64.encode(hash))
}

/// RSA key pair in PEM format.
#[derive(Debug, Clone)]
pub struct RsaKeypair {
    /// SPKI public key.
    pub public_key_pem: String,
    /// PKCS#8 private key.
    pub private_key_pem: String,
}

/// Generate a 2048-bit RSA key pair for an actor.
pub fn generate_rsa_keypair() -> AppResult<RsaKeypair> {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, 2048)
        .map_err(|e| AppError::Internal(format!("Failed to generate RSA key: {e}")))?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_key_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| AppError::Internal(format!("Failed to encode private key: {e}")))?
        .to_string();
    let public_key_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| AppError::Internal(format!("Failed to encode public key: {e}")))?;

    Ok(RsaKeypair {
        public_key_pem,
        private_key_pem,
    })
}

/// `rsa-sha256` signer.
#[derive(Debug, Clone, Default)]
pub struct RsaSha256Signer;

impl RsaSha256Signer {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl SignatureProvider for RsaSha256Signer {
    fn sign(
        &self,
        method: &str,
        url: &Url,
        body: Option<&[u8]>,
        key: &SigningKeyRef<'_>,
    ) -> AppResult<Vec<(String, String)>> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(key.private_key_pem)
            .map_err(|e| AppError::Internal(format!("Failed to parse private key: {e}")))?;

        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(AppError::BadRequest(format!("URL has no host: {url}"))),
        };
        let path = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_string(),
        };

        let mut headers = HashMap::new();
        headers.insert("host".to_string(), host);
        headers.insert(
            "date".to_string(),
            Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        );
        let signed: &[&str] = if let Some(body) = body {
            headers.insert("digest".to_string(), calculate_digest(body));
            POST_SIGNED_HEADERS
        } else {
            GET_SIGNED_HEADERS
        };

        let names: Vec<String> = signed.iter().map(|s| (*s).to_string()).collect();
        let signing_string = build_signature_string(method, &path, &headers, &names)?;
        let signature = SigningKey::<Sha256>::new(private_key).sign(signing_string.as_bytes());

        let mut out: Vec<(String, String)> = headers.into_iter().collect();
        out.sort();
        out.push((
            "signature".to_string(),
            format!(
                r#"keyId="{}",algorithm="rsa-sha256",headers="{}",signature="{}""#,
                key.key_id,
                signed.join(" "),
                BASE64.encode(signature.to_bytes())
            ),
        ));
        Ok(out)
    }

    fn verify(
        &self,
        signature_header: &str,
        public_key_pem: &str,
        method: &str,
        path: &str,
        headers: &HashMap<String, String>,
    ) -> AppResult<bool> {
        let parsed = HttpSignature::parse(signature_header)?;
        let signing_string = build_signature_string(method, path, headers, &parsed.headers)?;

        let sig_bytes = BASE64
            .decode(&parsed.signature)
            .map_err(|e| AppError::BadRequest(format!("Invalid signature encoding: {e}")))?;
        let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
            .map_err(|e| AppError::BadRequest(format!("Invalid public key: {e}")))?;
        let signature = Signature::try_from(sig_bytes.as_slice())
            .map_err(|e| AppError::BadRequest(format!("Invalid signature format: {e}")))?;

        Ok(VerifyingKey::<Sha256>::new(public_key)
            .verify(signing_string.as_bytes(), &signature)
            .is_ok())
    }
}
