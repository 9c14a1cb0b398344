use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::account::AccountId;
use crate::chain::ChainId;
use crate::error::{TypesError, TypesResult};

pub const CALL_HASH_LENGTH: usize = 32;

/// Blake2-256 hash of an encoded call, the stable handle of a multisig operation
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallHash([u8; CALL_HASH_LENGTH]);

impl CallHash {
    pub const fn new(bytes: [u8; CALL_HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(value: &str) -> TypesResult<Self> {
        let trimmed = value.strip_prefix("0x").unwrap_or(value);
        let bytes = hex::decode(trimmed).map_err(|e| TypesError::InvalidHex(e.to_string()))?;
        let raw: [u8; CALL_HASH_LENGTH] =
            bytes.as_slice().try_into().map_err(|_| TypesError::InvalidLength {
                expected: CALL_HASH_LENGTH,
                actual: bytes.len(),
            })?;
        Ok(Self(raw))
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for CallHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for CallHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallHash({})", self.to_hex())
    }
}

impl Serialize for CallHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CallHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::from_hex(&value).map_err(serde::de::Error::custom)
    }
}

/// Block height plus extrinsic index at which an operation was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timepoint {
    pub height: u32,
    pub index: u32,
}

/// On-chain state of an open multisig operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigDefinition {
    pub timepoint: Timepoint,
    /// Approvals needed before the call executes
    pub threshold: u16,
    pub depositor: AccountId,
    /// Signatories that approved so far, in approval order
    pub approvals: Vec<AccountId>,
}

impl MultisigDefinition {
    pub fn has_approved(&self, account_id: &AccountId) -> bool {
        self.approvals.contains(account_id)
    }

    /// Whether one more approval executes the call
    pub fn is_final_approval(&self) -> bool {
        self.approvals.len() + 1 >= usize::from(self.threshold)
    }
}

/// Identity of a pending operation; call data is not part of it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperationKey {
    pub call_hash: CallHash,
    pub chain_id: ChainId,
    pub multisig_account_id: AccountId,
}

/// A call waiting for enough multisig approvals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    pub call_hash: CallHash,
    pub chain_id: ChainId,
    pub multisig_account_id: AccountId,
    pub call: Option<Vec<u8>>,
    pub timestamp: DateTime<Utc>,
    pub multisig_definition: Option<MultisigDefinition>,
}

impl PendingOperation {
    pub fn new(key: PendingOperationKey, timestamp: DateTime<Utc>) -> Self {
        Self {
            call_hash: key.call_hash,
            chain_id: key.chain_id,
            multisig_account_id: key.multisig_account_id,
            call: None,
            timestamp,
            multisig_definition: None,
        }
    }

    pub fn with_call(mut self, call: Vec<u8>) -> Self {
        self.call = Some(call);
        self
    }

    pub fn with_definition(mut self, definition: MultisigDefinition) -> Self {
        self.multisig_definition = Some(definition);
        self
    }

    pub fn key(&self) -> PendingOperationKey {
        PendingOperationKey {
            call_hash: self.call_hash,
            chain_id: self.chain_id.clone(),
            multisig_account_id: self.multisig_account_id,
        }
    }

    pub fn has_definition(&self) -> bool {
        self.multisig_definition.is_some()
    }

    pub fn approvals_count(&self) -> usize {
        self.multisig_definition
            .as_ref()
            .map(|definition| definition.approvals.len())
            .unwrap_or(0)
    }

    /// Folds a newer observation of the same operation into this one.
    ///
    /// Call data is first-writer-wins; the definition always follows the newer
    /// observation when it carries one. Observations for a different key are
    /// ignored and `self` is returned unchanged.
    pub fn merging(&self, newer: &PendingOperation) -> PendingOperation {
        if self.key() != newer.key() {
            return self.clone();
        }

        PendingOperation {
            call_hash: self.call_hash,
            chain_id: self.chain_id.clone(),
            multisig_account_id: self.multisig_account_id,
            call: self.call.clone().or_else(|| newer.call.clone()),
            timestamp: self.timestamp.max(newer.timestamp),
            multisig_definition: newer
                .multisig_definition
                .clone()
                .or_else(|| self.multisig_definition.clone()),
        }
    }
}

/// A multisig account discovered by the indexer for one of its signatories
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredMultisig {
    pub account_id: AccountId,
    pub threshold: u16,
    pub signatories: Vec<AccountId>,
}

impl DiscoveredMultisig {
    pub fn has_signatory(&self, account_id: &AccountId) -> bool {
        self.signatories.contains(account_id)
    }

    /// Signatories other than `signatory`, sorted as the multisig pallet expects
    pub fn other_signatories(&self, signatory: &AccountId) -> Vec<AccountId> {
        let mut others: Vec<AccountId> = self
            .signatories
            .iter()
            .filter(|account_id| *account_id != signatory)
            .copied()
            .collect();
        others.sort();
        others.dedup();
        others
    }
}
