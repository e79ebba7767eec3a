//! Contact directory and quota ledger consumed by the engine

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use shared_types::{ContactId, InitiatorId};
use thiserror::Error;

/// A directory entry owned by an initiator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub owner: InitiatorId,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".to_string()
}

pub trait ContactDirectory: Send + Sync {
    fn lookup(&self, id: &ContactId) -> Option<Contact>;
}

#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    contacts: RwLock<HashMap<ContactId, Contact>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, contact: Contact) {
        self.contacts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(contact.id.clone(), contact);
    }
}

impl ContactDirectory for InMemoryDirectory {
    fn lookup(&self, id: &ContactId) -> Option<Contact> {
        self.contacts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("insufficient credits: {required} required, {available} available")]
    Insufficient { required: u32, available: u32 },

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Credit balances per initiator
pub trait QuotaLedger: Send + Sync {
    fn balance(&self, initiator: &InitiatorId) -> Result<u32, LedgerError>;

    /// Remove `credits` in one step; never leaves a partial debit behind
    fn debit(&self, initiator: &InitiatorId, credits: u32) -> Result<u32, LedgerError>;

    /// Return credits, used when a debited send could not be committed
    fn refund(&self, initiator: &InitiatorId, credits: u32) -> Result<u32, LedgerError>;
}

#[derive(Debug, Default)]
pub struct InMemoryLedger {
    balances: RwLock<HashMap<InitiatorId, u32>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, initiator: &InitiatorId, credits: u32) -> u32 {
        let mut balances = self.balances.write().unwrap_or_else(|e| e.into_inner());
        let balance = balances.entry(initiator.clone()).or_insert(0);
        *balance = balance.saturating_add(credits);
        *balance
    }
}

impl QuotaLedger for InMemoryLedger {
    fn balance(&self, initiator: &InitiatorId) -> Result<u32, LedgerError> {
        Ok(self
            .balances
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(initiator)
            .copied()
            .unwrap_or(0))
    }

    fn debit(&self, initiator: &InitiatorId, credits: u32) -> Result<u32, LedgerError> {
        let mut balances = self.balances.write().unwrap_or_else(|e| e.into_inner());
        let available = balances.get(initiator).copied().unwrap_or(0);
        if available < credits {
            return Err(LedgerError::Insufficient {
                required: credits,
                available,
            });
        }
        let remaining = available - credits;
        balances.insert(initiator.clone(), remaining);
        Ok(remaining)
    }

    fn refund(&self, initiator: &InitiatorId, credits: u32) -> Result<u32, LedgerError> {
        Ok(self.grant(initiator, credits))
    }
}
