use crate::payments::types::LedgerEntry;
use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Error)]
#[error("Commerce hook failed: {0}")]
pub struct CommerceError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountingEntry {
    Payment,
    Refund,
}

impl AccountingEntry {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountingEntry::Payment => "payment",
            AccountingEntry::Refund => "refund",
        }
    }
}

/// Bookkeeping owned by the storefront (carts, accounting ledger).
///
/// Calls are best effort: callers log failures and never roll back a payment
/// transition because of them.
#[async_trait]
pub trait CommerceHooks: Send + Sync {
    async fn clear_cart(&self, entry: &LedgerEntry) -> Result<(), CommerceError>;

    /// Compensating action after an order payment failed.
    async fn restore_cart(&self, entry: &LedgerEntry) -> Result<(), CommerceError>;

    async fn record_transaction(
        &self,
        entry: &LedgerEntry,
        kind: AccountingEntry,
    ) -> Result<(), CommerceError>;
}

#[derive(Debug, Clone, Default)]
pub struct LoggingCommerceHooks;

#[async_trait]
impl CommerceHooks for LoggingCommerceHooks {
    async fn clear_cart(&self, entry: &LedgerEntry) -> Result<(), CommerceError> {
        info!(entity = %entry.entity(), "cart cleared");
        Ok(())
    }

    async fn restore_cart(&self, entry: &LedgerEntry) -> Result<(), CommerceError> {
        info!(entity = %entry.entity(), "cart restored");
        Ok(())
    }

    async fn record_transaction(
        &self,
        entry: &LedgerEntry,
        kind: AccountingEntry,
    ) -> Result<(), CommerceError> {
        let amount = entry
            .payment
            .as_ref()
            .map(|p| p.amount_major())
            .unwrap_or_default();
        info!(
            entity = %entry.entity(),
            kind = kind.as_str(),
            amount = %amount,
            "accounting transaction recorded"
        );
        Ok(())
    }
}
