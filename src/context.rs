//! Append-only audit trail of a trade.
//!
//! Every committed transition leaves a [`Witness`]. Witnesses are chained: each
//! one carries the sha256 digest of its predecessor's CBOR encoding, so a
//! reordered or edited history no longer verifies.
use crate::error::TradeError;
use crate::types::{BookId, Party, TimeStamp, TradeType, UserId};
use chrono::Utc;
use serde::Serialize;

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Witness {
    #[n(0)]
    pub actor: UserId,
    #[n(1)]
    pub timestamp: TimeStamp<Utc>,
    #[n(2)]
    pub witness_type: WitnessType,
    #[n(3)]
    pub prev_digest: Option<String>, // None only for the first witness
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WitnessType {
    #[n(0)]
    #[serde(rename_all = "camelCase")]
    Request {
        #[n(0)]
        requested_book: BookId,
        #[n(1)]
        offered_book: Option<BookId>,
    },
    #[n(1)]
    #[serde(rename_all = "camelCase")]
    Accept {
        #[n(0)]
        trade_type: TradeType,
        #[n(1)]
        counter_offer: Option<BookId>,
    },
    #[n(2)]
    Reject,
    #[n(3)]
    Cancel,
    #[n(4)]
    Confirm {
        #[n(0)]
        party: Party,
    },
    #[n(5)]
    Complete,
}

impl Witness {
    pub fn new(
        actor: UserId,
        timestamp: TimeStamp<Utc>,
        witness_type: WitnessType,
        prev_digest: Option<String>,
    ) -> Self {
        Self {
            actor,
            timestamp,
            witness_type,
            prev_digest,
        }
    }

    /// Returns the digest of this witness and its CBOR encoding
    pub fn build(&self) -> Result<(String, Vec<u8>), TradeError> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }

    pub fn digest(&self) -> Result<String, TradeError> {
        self.build().map(|(hash, _)| hash)
    }
}

/// Checks that every witness points at the digest of the one before it
pub fn verify_chain(witnesses: &[Witness]) -> bool {
    let mut expected: Option<String> = None;
    for witness in witnesses {
        if witness.prev_digest != expected {
            return false;
        }
        match witness.digest() {
            Ok(hash) => expected = Some(hash),
            Err(_) => return false,
        }
    }
    true
}
