// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! # EIP712 signed message
//!
//! This crate contains the `Eip712SignedMessage` struct which is used to sign and verify messages
//! using EIP712 standard.
//!
//! Signatures produced here are always in low-S canonical form, and equality between signatures
//! is defined over that form so that a malleated copy of a signature can never be counted twice.
//!
//! # Example
//! ```rust
//! # use alloy::{dyn_abi::Eip712Domain, primitives::FixedBytes, primitives::Address, signers::local::PrivateKeySigner};
//! # let domain_separator = Eip712Domain::default();
//! use sdp_eip712_message::Eip712SignedMessage;
//! # let wallet = PrivateKeySigner::random();
//! # let wallet_address = wallet.address();
//! # let message = msg::Receipt::new(
//! #     FixedBytes::ZERO,
//! #     Address::from([0x11u8; 20]),
//! #     Address::from([0x22u8; 20]),
//! #     Address::from([0x33u8; 20]),
//! #     100,
//! # ).unwrap();
//!
//! let signed_message = Eip712SignedMessage::new(&domain_separator, message, &wallet).unwrap();
//! let signer = signed_message.recover_signer(&domain_separator).unwrap();
//!
//! assert_eq!(signer, wallet_address);
//! ```
//!

use alloy::{
    dyn_abi::Eip712Domain,
    primitives::{Address, Signature, U256},
    signers::{local::PrivateKeySigner, SignerSync},
    sol_types::SolStruct,
};
use serde::{Deserialize, Serialize};

/// secp256k1 group order n.
const SECP256K1_N: U256 = U256::from_limbs([
    0xBFD25E8CD0364141,
    0xBAAEDCE6AF48A03B,
    0xFFFFFFFFFFFFFFFE,
    0xFFFFFFFFFFFFFFFF,
]);

/// n / 2. A signature whose `s` exceeds this has a distinct, equally valid counterpart.
const SECP256K1_N_HALF: U256 = U256::from_limbs([
    0xDFE92F46681B20A0,
    0x5D576E7357A4501D,
    0xFFFFFFFFFFFFFFFF,
    0x7FFFFFFFFFFFFFFF,
]);

/// Errors returned by creation of messages and verify signature
#[derive(thiserror::Error, Debug)]
pub enum Eip712Error {
    /// `alloy` wallet error
    #[error(transparent)]
    WalletError(#[from] alloy::signers::Error),

    /// `alloy` signature error
    #[error(transparent)]
    SignatureError(#[from] alloy::primitives::SignatureError),
}

/// EIP712 signed message
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Eip712SignedMessage<M: SolStruct> {
    /// Message to be signed
    pub message: M,
    /// ECDSA Signature of eip712 hash of message
    pub signature: Signature,
}

/// Returns the low-S canonical form of `signature`.
///
/// If `s > n / 2`, `s` is replaced with `n - s` and the recovery bit is flipped;
/// otherwise the signature is returned unchanged. Idempotent.
pub fn normalized(signature: &Signature) -> Signature {
    if signature.s() > SECP256K1_N_HALF {
        Signature::new(signature.r(), SECP256K1_N - signature.s(), !signature.v())
    } else {
        *signature
    }
}

/// Signature equality under low-S normalization.
pub fn signatures_equal(a: &Signature, b: &Signature) -> bool {
    normalized(a) == normalized(b)
}

/// Signature that can be used in a HashSet
///
/// Built from the normalized form of a signature, so the two malleable
/// representations of one signature map to the same bytes.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SignatureBytes([u8; 65]);

/// Extension for Signature to return [SignatureBytes]
pub trait SignatureBytesExt {
    fn get_signature_bytes(&self) -> SignatureBytes;
}

impl SignatureBytesExt for Signature {
    fn get_signature_bytes(&self) -> SignatureBytes {
        SignatureBytes(normalized(self).as_bytes())
    }
}

/// Unique identifier for a message
///
/// This is equal to the hash of the contents of a message, excluding the signature.
/// This means that two receipts signed by two different signers will have the same id.
///
/// This cannot be used as a unique identifier for a signed message, but can be used as a key
/// for a hashmap where the value is the message.
#[derive(Debug, Eq, PartialEq, Hash)]
pub struct MessageId(pub [u8; 32]);

impl<M: SolStruct> Eip712SignedMessage<M> {
    /// Creates a signed message with signed EIP712 hash of `message` using `signing_wallet`
    ///
    /// The stored signature is canonicalized to low-S form before being returned.
    ///
    /// # Errors
    ///
    /// Returns [`Eip712Error::WalletError`] if could not sign using the wallet
    ///
    pub fn new(
        domain_separator: &Eip712Domain,
        message: M,
        signing_wallet: &PrivateKeySigner,
    ) -> Result<Self, Eip712Error> {
        let recovery_message_hash = message.eip712_signing_hash(domain_separator);

        let signature = normalized(&signing_wallet.sign_hash_sync(&recovery_message_hash)?);

        Ok(Self { message, signature })
    }

    /// Recovers and returns the signer of the message from the signature.
    pub fn recover_signer(&self, domain_separator: &Eip712Domain) -> Result<Address, Eip712Error> {
        let recovery_message_hash = self.message.eip712_signing_hash(domain_separator);
        let recovered_address = self
            .signature
            .recover_address_from_prehash(&recovery_message_hash)?;
        Ok(recovered_address)
    }

    /// Checks that the message signature is valid for the given verifying key,
    /// returns `Ok(true)` if it is.
    ///
    /// # Errors
    ///
    /// Returns [`Eip712Error::SignatureError`] if the signature is structurally invalid
    ///
    pub fn verify(
        &self,
        domain_separator: &Eip712Domain,
        expected_address: Address,
    ) -> Result<bool, Eip712Error> {
        let recovered_address = self.recover_signer(domain_separator)?;
        Ok(recovered_address == expected_address)
    }

    /// Use this as a simple key for testing
    pub fn unique_hash(&self) -> MessageId {
        MessageId(self.message.eip712_hash_struct().into())
    }
}
