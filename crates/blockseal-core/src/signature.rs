//! Transaction authentication: RSASSA-PSS with SHA-256, MGF1-SHA-256 and the maximum salt
//! length for the key, over a canonical signing message.
//!
//! Public keys travel in OpenSSH encoding (`ssh-rsa AAAA...`), private keys as unencrypted
//! PKCS#8 PEM.

use crate::error::SignatureError;
use crate::{Authentication, Transaction};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Pss, RsaPrivateKey, RsaPublicKey};
use serde::Serialize;
use sha2::{Digest, Sha256};
use ssh_key::public::KeyData;

const SHA256_OUTPUT_LEN: usize = 32;

/// Field order of this struct is the signing message contract.
#[derive(Serialize)]
struct SigningPayload<'a> {
    sender: &'a str,
    receiver: &'a str,
    amount: f64,
}

/// Compact JSON `{"sender":...,"receiver":...,"amount":...}`, fields in that order.
pub fn signing_message(
    sender: &str,
    receiver: &str,
    amount: f64,
) -> Result<Vec<u8>, SignatureError> {
    serde_json::to_vec(&SigningPayload {
        sender,
        receiver,
        amount,
    })
    .map_err(|err| SignatureError::Encoding(err.to_string()))
}

pub fn parse_public_key(openssh: &[u8]) -> Result<RsaPublicKey, SignatureError> {
    let text = std::str::from_utf8(openssh)
        .map_err(|err| SignatureError::InvalidPublicKey(err.to_string()))?;
    let key = ssh_key::PublicKey::from_openssh(text.trim())
        .map_err(|err| SignatureError::InvalidPublicKey(err.to_string()))?;
    let rsa_key = key.key_data().rsa().ok_or_else(|| {
        SignatureError::InvalidPublicKey(format!("expected ssh-rsa, found {}", key.algorithm()))
    })?;
    RsaPublicKey::try_from(rsa_key)
        .map_err(|err| SignatureError::InvalidPublicKey(err.to_string()))
}

/// emLen - hLen - 2, with emLen = ceil((modBits - 1) / 8).
pub fn max_pss_salt_len(key: &RsaPublicKey) -> usize {
    let em_bits = key.n().bits().saturating_sub(1);
    em_bits
        .div_ceil(8)
        .saturating_sub(SHA256_OUTPUT_LEN + 2)
}

fn pss(key: &RsaPublicKey) -> Pss {
    Pss::new_with_salt::<Sha256>(max_pss_salt_len(key))
}

/// Verify `signature` over `message` with an OpenSSH-encoded RSA public key.
pub fn verify(message: &[u8], public_key: &[u8], signature: &[u8]) -> Result<(), SignatureError> {
    let key = parse_public_key(public_key)?;
    let digest = Sha256::digest(message);
    key.verify(pss(&key), &digest, signature)
        .map_err(|_| SignatureError::Mismatch)
}

/// Unsigned transactions pass without any check. Signed ones must verify over the signing
/// message rebuilt from their own sender, receiver and amount.
pub fn verify_transaction(tx: &Transaction) -> Result<(), SignatureError> {
    match tx.authentication() {
        Authentication::Unsigned => Ok(()),
        Authentication::Signed {
            public_key,
            signature,
        } => {
            let message = signing_message(tx.sender(), tx.receiver(), tx.amount())?;
            verify(&message, public_key, signature)
        }
    }
}

/// A freshly generated client key pair, both halves in their at-rest text encodings.
#[derive(Clone, Debug)]
pub struct ClientKeys {
    pub public_openssh: String,
    pub private_pem: String,
}

pub fn generate_keypair(bits: usize) -> Result<ClientKeys, SignatureError> {
    let mut rng = rand::thread_rng();
    let private = RsaPrivateKey::new(&mut rng, bits)
        .map_err(|err| SignatureError::KeyGeneration(err.to_string()))?;
    let ssh_public = ssh_key::public::RsaPublicKey::try_from(&private.to_public_key())
        .map_err(|err| SignatureError::KeyGeneration(err.to_string()))?;
    let public_openssh = ssh_key::PublicKey::new(KeyData::Rsa(ssh_public), "")
        .to_openssh()
        .map_err(|err| SignatureError::KeyGeneration(err.to_string()))?;
    let private_pem = private
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|err| SignatureError::KeyGeneration(err.to_string()))?
        .to_string();
    Ok(ClientKeys {
        public_openssh,
        private_pem,
    })
}

/// Sign the signing message for `(sender, receiver, amount)` with a PKCS#8 PEM private key.
pub fn sign(
    private_pem: &str,
    sender: &str,
    receiver: &str,
    amount: f64,
) -> Result<Vec<u8>, SignatureError> {
    let private = RsaPrivateKey::from_pkcs8_pem(private_pem)
        .map_err(|err| SignatureError::InvalidPrivateKey(err.to_string()))?;
    let message = signing_message(sender, receiver, amount)?;
    let digest = Sha256::digest(&message);
    let scheme = pss(&private.to_public_key());
    private
        .sign_with_rng(&mut rand::thread_rng(), scheme, &digest)
        .map_err(|err| SignatureError::Signing(err.to_string()))
}
