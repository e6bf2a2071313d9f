//! Common utilities and shared types for fedigate.
//!
//! - **Configuration**: layered settings via [`Config`]
//! - **Error handling**: [`AppError`] and [`AppResult`]
//! - **HTTP Signatures**: the [`SignatureProvider`] seam and its RSA implementation
//! - **ID Generation**: ULID-based identifiers via [`IdGenerator`]

pub mod config;
pub mod error;
pub mod http_signature;
pub mod id;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use http_signature::{
    HttpSignature, RsaKeypair, RsaSha256Signer, SignatureProvider, SigningKeyRef,
    build_signature_string, calculate_digest, generate_rsa_keypair,
};
pub use id::IdGenerator;
