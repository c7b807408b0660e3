//! Input authorization
//!
//! Spending an output requires a proof that the spender controls the
//! output's owner key. How that proof is produced and checked is pluggable:
//! [`OwnerKeyAuthorizer`] is the placeholder scheme where the proof is the
//! owner key itself, [`EcdsaAuthorizer`] signs with an ECDSA P-256 key whose
//! hex-encoded public key is the owner identity.

use crate::error::{BlockchainError, Result};
use crate::utils::{
    ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify, public_key_from_pkcs8,
};
use data_encoding::HEXLOWER;

pub trait Authorizer: Send + Sync {
    /// Produce the proof placed in the input spending output `vout` of `txid`.
    fn prove(&self, owner: &str, txid: &[u8], vout: usize) -> Result<Vec<u8>>;

    /// Check `proof` against the owner key of the referenced output.
    fn verify(&self, proof: &[u8], owner: &str, txid: &[u8], vout: usize) -> bool;
}

/// Bytes a proof commits to: the referenced transaction ID and output index.
pub fn spend_message(txid: &[u8], vout: usize) -> Vec<u8> {
    let mut message = txid.to_vec();
    message.extend((vout as u64).to_be_bytes());
    message
}

/// Placeholder scheme: the proof is the owner key, compared byte for byte.
#[derive(Debug, Default, Clone, Copy)]
pub struct OwnerKeyAuthorizer;

impl Authorizer for OwnerKeyAuthorizer {
    fn prove(&self, owner: &str, _txid: &[u8], _vout: usize) -> Result<Vec<u8>> {
        Ok(owner.as_bytes().to_vec())
    }

    fn verify(&self, proof: &[u8], owner: &str, _txid: &[u8], _vout: usize) -> bool {
        proof == owner.as_bytes()
    }
}

/// ECDSA P-256 over SHA-256. Owner keys are lowercase hex public keys.
pub struct EcdsaAuthorizer {
    pkcs8: Option<Vec<u8>>,
    owner: Option<String>,
}

impl EcdsaAuthorizer {
    /// An authorizer that can only verify.
    pub fn verifier() -> EcdsaAuthorizer {
        EcdsaAuthorizer {
            pkcs8: None,
            owner: None,
        }
    }

    /// An authorizer that can also sign for the key in `pkcs8`.
    pub fn with_signing_key(pkcs8: Vec<u8>) -> Result<EcdsaAuthorizer> {
        let public_key = public_key_from_pkcs8(&pkcs8)?;
        Ok(EcdsaAuthorizer {
            pkcs8: Some(pkcs8),
            owner: Some(HEXLOWER.encode(&public_key)),
        })
    }

    /// The owner key this authorizer signs for, if any.
    pub fn owner_key(&self) -> Option<&str> {
        self.owner.as_deref()
    }
}

impl Authorizer for EcdsaAuthorizer {
    fn prove(&self, owner: &str, txid: &[u8], vout: usize) -> Result<Vec<u8>> {
        let (pkcs8, signer) = match (&self.pkcs8, &self.owner) {
            (Some(pkcs8), Some(signer)) => (pkcs8, signer),
            _ => {
                return Err(BlockchainError::Transaction(
                    "No signing key configured".to_string(),
                ))
            }
        };
        if signer != owner {
            return Err(BlockchainError::Transaction(format!(
                "Signing key does not own outputs of {owner}"
            )));
        }
        ecdsa_p256_sha256_sign_digest(pkcs8, &spend_message(txid, vout))
    }

    fn verify(&self, proof: &[u8], owner: &str, txid: &[u8], vout: usize) -> bool {
        match HEXLOWER.decode(owner.as_bytes()) {
            Ok(public_key) => {
                ecdsa_p256_sha256_sign_verify(&public_key, proof, &spend_message(txid, vout))
            }
            Err(_) => false,
        }
    }
}
