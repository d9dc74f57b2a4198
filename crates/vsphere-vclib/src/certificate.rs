//! Loading of the certificate and private key used for SAML token login.
//!
//! When the configured username is PEM encoded, the username and password
//! are interpreted as certificate and private key respectively.
use educe::Educe;
use rsa::{
    RsaPrivateKey,
    pkcs1::DecodeRsaPrivateKey,
    pkcs8::{DecodePrivateKey, EncodePublicKey},
};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::instrument;
use x509_cert::{
    Certificate,
    der::{Encode, pem},
    name::Name,
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read PEM-encoded certificate chain"))]
    ReadCertificateChain { source: x509_cert::der::Error },

    #[snafu(display("the certificate chain does not contain any certificate"))]
    NoCertificate,

    #[snafu(display("failed to decode PEM-encoded private key"))]
    DecodePrivateKeyPem { source: pem::Error },

    #[snafu(display("unsupported private key type {label:?}"))]
    UnsupportedPrivateKey { label: String },

    #[snafu(display("failed to deserialize PKCS8 private key"))]
    DeserializePkcs8PrivateKey { source: rsa::pkcs8::Error },

    #[snafu(display("failed to deserialize PKCS1 RSA private key"))]
    DeserializePkcs1PrivateKey { source: rsa::pkcs1::Error },

    #[snafu(display("failed to deserialize SEC1 EC private key"))]
    DeserializeSec1PrivateKey { source: p256::elliptic_curve::Error },

    #[snafu(display("failed to encode public key"))]
    EncodePublicKey { source: x509_cert::spki::Error },

    #[snafu(display("failed to encode the public key of the certificate"))]
    EncodeCertificatePublicKey { source: x509_cert::der::Error },

    #[snafu(display("the private key does not match the public key of the certificate"))]
    KeyMismatch,
}

/// Returns whether `input` is a PEM document.
pub fn is_pem_encoded(input: &str) -> bool {
    pem::decode_label(input.trim().as_bytes()).is_ok()
}

/// A private key supported for certificate login.
#[derive(Clone, Educe)]
#[educe(Debug)]
pub enum PrivateKey {
    Rsa(#[educe(Debug(ignore))] RsaPrivateKey),
    EcdsaP256(#[educe(Debug(ignore))] p256::SecretKey),
}

impl PrivateKey {
    /// Parses a PEM-encoded RSA (PKCS#8 or PKCS#1) or P-256 (PKCS#8 or SEC1)
    /// private key.
    pub fn from_pem(input: &str) -> Result<Self> {
        let input = input.trim();
        let label = pem::decode_label(input.as_bytes()).context(DecodePrivateKeyPemSnafu)?;

        match label {
            "PRIVATE KEY" => match RsaPrivateKey::from_pkcs8_pem(input) {
                Ok(key) => Ok(Self::Rsa(key)),
                Err(_) => p256::SecretKey::from_pkcs8_pem(input)
                    .map(Self::EcdsaP256)
                    .context(DeserializePkcs8PrivateKeySnafu),
            },
            "RSA PRIVATE KEY" => RsaPrivateKey::from_pkcs1_pem(input)
                .map(Self::Rsa)
                .context(DeserializePkcs1PrivateKeySnafu),
            "EC PRIVATE KEY" => p256::SecretKey::from_sec1_pem(input)
                .map(Self::EcdsaP256)
                .context(DeserializeSec1PrivateKeySnafu),
            label => UnsupportedPrivateKeySnafu { label }.fail(),
        }
    }

    /// DER encoded SubjectPublicKeyInfo of the public half.
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        let document = match self {
            Self::Rsa(key) => key.to_public_key().to_public_key_der(),
            Self::EcdsaP256(key) => key.public_key().to_public_key_der(),
        }
        .context(EncodePublicKeySnafu)?;

        Ok(document.as_bytes().to_vec())
    }
}

/// A certificate together with the matching private key.
#[derive(Clone, Debug)]
pub struct CertificateKeyPair {
    certificate: Certificate,
    private_key: PrivateKey,
}

impl CertificateKeyPair {
    /// Loads the first certificate of `certificate_pem` and the private key
    /// from `private_key_pem`, and checks that both belong together.
    #[instrument(name = "load_certificate_key_pair", skip_all)]
    pub fn from_pem(certificate_pem: &str, private_key_pem: &str) -> Result<Self> {
        let certificate = Certificate::load_pem_chain(certificate_pem.trim().as_bytes())
            .context(ReadCertificateChainSnafu)?
            .into_iter()
            .next()
            .context(NoCertificateSnafu)?;
        let private_key = PrivateKey::from_pem(private_key_pem)?;

        let certificate_public_key = certificate
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .context(EncodeCertificatePublicKeySnafu)?;
        ensure!(
            certificate_public_key == private_key.public_key_der()?,
            KeyMismatchSnafu
        );

        Ok(Self {
            certificate,
            private_key,
        })
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub fn subject(&self) -> &Name {
        &self.certificate.tbs_certificate.subject
    }
}
