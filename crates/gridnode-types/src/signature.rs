//! Threshold signature requirements attached to a deployment.

use std::fmt;
use std::io::{self, Write};

use ed25519_dalek::Verifier as _;
use serde::{Deserialize, Serialize};

use crate::error::{TypesError, TypesResult};

pub const SIGNATURE_TYPE_ED25519: &str = "ed25519";
pub const SIGNATURE_TYPE_SR25519: &str = "sr25519";

/// Produces signatures with a private key.
pub trait Signer {
    fn sign(&self, msg: &[u8]) -> TypesResult<Vec<u8>>;

    /// Signature scheme name, e.g. [`SIGNATURE_TYPE_ED25519`].
    fn kind(&self) -> &str;
}

/// Checks a signature against a public key.
pub trait Verifier {
    fn verify(&self, msg: &[u8], sig: &[u8]) -> bool;
}

/// Resolves a twin to its public key bytes.
pub trait KeyGetter {
    fn get_key(&self, twin: u32) -> TypesResult<Vec<u8>>;
}

/// Raw ed25519 public key.
#[derive(Debug, Clone)]
pub struct Ed25519VerifyingKey(pub Vec<u8>);

impl Verifier for Ed25519VerifyingKey {
    fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        let Ok(bytes) = <[u8; 32]>::try_from(self.0.as_slice()) else {
            return false;
        };
        let Ok(key) = ed25519_dalek::VerifyingKey::from_bytes(&bytes) else {
            return false;
        };
        let Ok(sig) = ed25519_dalek::Signature::from_slice(sig) else {
            return false;
        };
        key.verify(msg, &sig).is_ok()
    }
}

/// Signer backed by an in-memory ed25519 key.
pub struct Ed25519Signer(ed25519_dalek::SigningKey);

impl Ed25519Signer {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(seed))
    }

    pub fn public_key(&self) -> Vec<u8> {
        self.0.verifying_key().to_bytes().to_vec()
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, msg: &[u8]) -> TypesResult<Vec<u8>> {
        use ed25519_dalek::Signer as _;
        Ok(self.0.sign(msg).to_bytes().to_vec())
    }

    fn kind(&self) -> &str {
        SIGNATURE_TYPE_ED25519
    }
}

/// Signing context used by substrate wallets.
const SR25519_CONTEXT: &[u8] = b"substrate";

/// Raw sr25519 (schnorrkel) public key.
#[derive(Debug, Clone)]
pub struct Sr25519VerifyingKey(pub Vec<u8>);

impl Verifier for Sr25519VerifyingKey {
    fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        let Ok(key) = schnorrkel::PublicKey::from_bytes(&self.0) else {
            return false;
        };
        let Ok(sig) = schnorrkel::Signature::from_bytes(sig) else {
            return false;
        };
        let ctx = schnorrkel::context::signing_context(SR25519_CONTEXT);
        key.verify(ctx.bytes(msg), &sig).is_ok()
    }
}

/// Signer backed by an in-memory sr25519 keypair.
pub struct Sr25519Signer(schnorrkel::Keypair);

impl Sr25519Signer {
    /// Expand a mini secret key the way substrate key derivation does.
    pub fn from_seed(seed: &[u8; 32]) -> TypesResult<Self> {
        let mini = schnorrkel::MiniSecretKey::from_bytes(seed)
            .map_err(|e| TypesError::Signature(format!("invalid sr25519 seed: {e}")))?;
        Ok(Self(mini.expand_to_keypair(schnorrkel::ExpansionMode::Ed25519)))
    }

    pub fn public_key(&self) -> Vec<u8> {
        self.0.public.to_bytes().to_vec()
    }
}

impl Signer for Sr25519Signer {
    fn sign(&self, msg: &[u8]) -> TypesResult<Vec<u8>> {
        let ctx = schnorrkel::context::signing_context(SR25519_CONTEXT);
        Ok(self.0.sign(ctx.bytes(msg)).to_bytes().to_vec())
    }

    fn kind(&self) -> &str {
        SIGNATURE_TYPE_SR25519
    }
}

/// Pick a verifier for a signature type. An empty type means ed25519.
pub fn verifier_for(kind: &str, key: Vec<u8>) -> TypesResult<Box<dyn Verifier>> {
    match kind {
        "" | SIGNATURE_TYPE_ED25519 => Ok(Box::new(Ed25519VerifyingKey(key))),
        SIGNATURE_TYPE_SR25519 => Ok(Box::new(Sr25519VerifyingKey(key))),
        other => Err(TypesError::Signature(format!(
            "unsupported signature type '{other}'"
        ))),
    }
}

// ── Requirement ────────────────────────────────────────────────

/// One twin asked to co-sign a deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRequest {
    pub twin_id: u32,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub weight: u64,
}

impl SignatureRequest {
    pub fn challenge(&self, w: &mut dyn Write) -> io::Result<()> {
        write!(w, "{}", self.twin_id)?;
        write!(w, "{}", self.required)?;
        write!(w, "{}", self.weight)
    }
}

/// A hex-encoded signature from one twin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub twin_id: u32,
    pub signature: String,
    #[serde(default)]
    pub signature_type: String,
}

/// How the signed message was framed by the signing wallet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureStyle {
    #[default]
    #[serde(rename = "")]
    Default,
    /// The wallet signs `<Bytes>{hex(hash)}</Bytes>` instead of the raw hash.
    #[serde(rename = "polka-wallet")]
    PolkaWallet,
}

impl fmt::Display for SignatureStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureStyle::Default => Ok(()),
            SignatureStyle::PolkaWallet => f.write_str("polka-wallet"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRequirement {
    #[serde(default)]
    pub requests: Vec<SignatureRequest>,
    #[serde(default)]
    pub weight_required: u64,
    #[serde(default)]
    pub signatures: Vec<Signature>,
    #[serde(default)]
    pub signature_style: SignatureStyle,
}

impl SignatureRequirement {
    /// Requests in order, then the weight threshold and style. Signatures
    /// themselves are not part of the challenge.
    pub fn challenge(&self, w: &mut dyn Write) -> io::Result<()> {
        for request in &self.requests {
            request.challenge(w)?;
        }
        write!(w, "{}", self.weight_required)?;
        write!(w, "{}", self.signature_style)
    }

    pub fn signature_of(&self, twin: u32) -> Option<&Signature> {
        self.signatures.iter().find(|s| s.twin_id == twin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ed25519_sign_and_verify() {
        let signer = Ed25519Signer::from_seed(&[7u8; 32]);
        let sig = signer.sign(b"hello").unwrap();
        let key = Ed25519VerifyingKey(signer.public_key());
        assert!(key.verify(b"hello", &sig));
        assert!(!key.verify(b"hellp", &sig));
        assert!(!key.verify(b"hello", &sig[..10]));
    }

    #[test]
    fn sr25519_sign_and_verify() {
        let signer = Sr25519Signer::from_seed(&[9u8; 32]).unwrap();
        let sig = signer.sign(b"hello").unwrap();
        let key = verifier_for(signer.kind(), signer.public_key()).unwrap();
        assert!(key.verify(b"hello", &sig));
        assert!(!key.verify(b"hellp", &sig));

        // An ed25519 verifier does not accept the sr25519 signature.
        let ed = verifier_for(SIGNATURE_TYPE_ED25519, signer.public_key()).unwrap();
        assert!(!ed.verify(b"hello", &sig));
    }

    #[test]
    fn unknown_signature_type_is_rejected() {
        assert!(verifier_for("secp256k1", vec![0; 32]).is_err());
        assert!(verifier_for("", vec![0; 32]).is_ok());
    }

    #[test]
    fn requirement_challenge_layout() {
        let req = SignatureRequirement {
            requests: vec![SignatureRequest {
                twin_id: 3,
                required: true,
                weight: 2,
            }],
            weight_required: 2,
            signatures: vec![],
            signature_style: SignatureStyle::PolkaWallet,
        };
        let mut buf = Vec::new();
        req.challenge(&mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "3true22polka-wallet");
    }

    #[test]
    fn style_serializes_as_wire_string() {
        assert_eq!(
            serde_json::to_string(&SignatureStyle::PolkaWallet).unwrap(),
            "\"polka-wallet\""
        );
        let style: SignatureStyle = serde_json::from_str("\"\"").unwrap();
        assert_eq!(style, SignatureStyle::Default);
    }
}
