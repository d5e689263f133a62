use std::fmt;

mod http;
mod paper;

pub use http::HttpLedgerClient;
pub use paper::{PaperLedger, RecordedTransfer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerErrorKind {
    Retryable,
    Terminal,
}

#[derive(Debug, Clone)]
pub struct LedgerError {
    pub kind: LedgerErrorKind,
    pub code: String,
    pub detail: String,
}

impl LedgerError {
    pub fn retryable(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: LedgerErrorKind::Retryable,
            code: code.into(),
            detail: detail.into(),
        }
    }

    pub fn terminal(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: LedgerErrorKind::Terminal,
            code: code.into(),
            detail: detail.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == LedgerErrorKind::Retryable
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ledger error [{}]: {}", self.code, self.detail)
    }
}

impl std::error::Error for LedgerError {}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Receipt returned by every mutating contract call; the orchestrator keeps
/// the transaction reference for its audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerReceipt {
    pub tx_ref: String,
}

/// Contract surface of the ledger service. All amounts are integer base
/// units of the campaign's reward currency.
pub trait LedgerClient: Send + Sync {
    /// Stops the campaign's on-ledger accrual. Not safely idempotent;
    /// callers must not retry a failed close blindly.
    fn close_campaign(&self, ledger_ref: &str) -> LedgerResult<LedgerReceipt>;

    /// Final settlement: returns any unspent reserved balance to the owner.
    fn expire_campaign(&self, ledger_ref: &str, owner: &str) -> LedgerResult<LedgerReceipt>;

    /// Reserves the distributable total before any individual payout.
    fn reserve_total_reward(
        &self,
        ledger_ref: &str,
        owner: &str,
        amount: u64,
        token_id: Option<&str>,
    ) -> LedgerResult<LedgerReceipt>;

    fn transfer_reward(
        &self,
        recipient_wallet: &str,
        amount: u64,
        token_id: Option<&str>,
    ) -> LedgerResult<LedgerReceipt>;

    /// Balance lookup; for token queries this also serves as the
    /// wallet/token association check (`unassociated` error when the wallet
    /// has never opted in to the token).
    fn query_balance(&self, owner: &str, token_id: Option<&str>) -> LedgerResult<u64>;
}
