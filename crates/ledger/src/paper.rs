use crate::{LedgerClient, LedgerError, LedgerReceipt, LedgerResult};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

/// A transfer the paper ledger executed, kept for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTransfer {
    pub recipient_wallet: String,
    pub amount: u64,
    pub token_id: Option<String>,
}

#[derive(Debug, Default)]
struct PaperState {
    tx_counter: u64,
    balances: BTreeMap<String, u64>,
    reservations: BTreeMap<String, u64>,
    transfers: Vec<RecordedTransfer>,
    closed_refs: BTreeSet<String>,
    expired_refs: BTreeSet<String>,
    associated_token_wallets: BTreeSet<(String, String)>,
    fail_next_reserve: bool,
    fail_transfer_for: BTreeSet<String>,
}

/// In-memory ledger for dry runs and tests. Mirrors the contract surface of
/// the HTTP client without touching the network.
#[derive(Debug, Default)]
pub struct PaperLedger {
    state: Mutex<PaperState>,
}

impl PaperLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_tx_ref(state: &mut PaperState, action: &str) -> LedgerReceipt {
        state.tx_counter += 1;
        LedgerReceipt {
            tx_ref: format!("paper-{}-{}", action, state.tx_counter),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PaperState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_balance(&self, owner: &str, balance: u64) {
        self.lock().balances.insert(owner.to_string(), balance);
    }

    /// Marks a wallet as opted in to a token, so token transfers to it pass
    /// the association check.
    pub fn associate_token_wallet(&self, wallet: &str, token_id: &str) {
        self.lock()
            .associated_token_wallets
            .insert((wallet.to_string(), token_id.to_string()));
    }

    pub fn set_fail_next_reserve(&self, fail: bool) {
        self.lock().fail_next_reserve = fail;
    }

    pub fn set_fail_transfer_for(&self, recipient_wallet: &str) {
        self.lock()
            .fail_transfer_for
            .insert(recipient_wallet.to_string());
    }

    pub fn transfers(&self) -> Vec<RecordedTransfer> {
        self.lock().transfers.clone()
    }

    pub fn reserved_amount(&self, ledger_ref: &str) -> u64 {
        self.lock().reservations.get(ledger_ref).copied().unwrap_or(0)
    }

    pub fn closed_refs(&self) -> Vec<String> {
        self.lock().closed_refs.iter().cloned().collect()
    }

    pub fn expired_refs(&self) -> Vec<String> {
        self.lock().expired_refs.iter().cloned().collect()
    }
}

impl LedgerClient for PaperLedger {
    fn close_campaign(&self, ledger_ref: &str) -> LedgerResult<LedgerReceipt> {
        let mut state = self.lock();
        if !state.closed_refs.insert(ledger_ref.to_string()) {
            return Err(LedgerError::terminal(
                "already_closed",
                format!("campaign ref {ledger_ref} was already closed"),
            ));
        }
        Ok(Self::next_tx_ref(&mut state, "close"))
    }

    fn expire_campaign(&self, ledger_ref: &str, _owner: &str) -> LedgerResult<LedgerReceipt> {
        let mut state = self.lock();
        state.reservations.remove(ledger_ref);
        state.expired_refs.insert(ledger_ref.to_string());
        Ok(Self::next_tx_ref(&mut state, "expire"))
    }

    fn reserve_total_reward(
        &self,
        ledger_ref: &str,
        _owner: &str,
        amount: u64,
        _token_id: Option<&str>,
    ) -> LedgerResult<LedgerReceipt> {
        let mut state = self.lock();
        if state.fail_next_reserve {
            state.fail_next_reserve = false;
            return Err(LedgerError::retryable(
                "reserve_unavailable",
                "paper ledger was told to fail this reserve",
            ));
        }
        *state.reservations.entry(ledger_ref.to_string()).or_insert(0) += amount;
        Ok(Self::next_tx_ref(&mut state, "reserve"))
    }

    fn transfer_reward(
        &self,
        recipient_wallet: &str,
        amount: u64,
        token_id: Option<&str>,
    ) -> LedgerResult<LedgerReceipt> {
        let mut state = self.lock();
        if state.fail_transfer_for.contains(recipient_wallet) {
            return Err(LedgerError::retryable(
                "transfer_failed",
                format!("paper ledger was told to fail transfers to {recipient_wallet}"),
            ));
        }
        if let Some(token) = token_id {
            let key = (recipient_wallet.to_string(), token.to_string());
            if !state.associated_token_wallets.contains(&key) {
                return Err(LedgerError::terminal(
                    "unassociated",
                    format!("wallet {recipient_wallet} is not associated with token {token}"),
                ));
            }
        }
        *state
            .balances
            .entry(recipient_wallet.to_string())
            .or_insert(0) += amount;
        state.transfers.push(RecordedTransfer {
            recipient_wallet: recipient_wallet.to_string(),
            amount,
            token_id: token_id.map(str::to_string),
        });
        Ok(Self::next_tx_ref(&mut state, "transfer"))
    }

    fn query_balance(&self, owner: &str, token_id: Option<&str>) -> LedgerResult<u64> {
        let state = self.lock();
        if let Some(token) = token_id {
            let key = (owner.to_string(), token.to_string());
            if !state.associated_token_wallets.contains(&key) {
                return Err(LedgerError::terminal(
                    "unassociated",
                    format!("wallet {owner} is not associated with token {token}"),
                ));
            }
        }
        Ok(state.balances.get(owner).copied().unwrap_or(0))
    }
}
