use anyhow::{Context, Result};
use promobot_core_types::{CampaignRow, RewardCurrency};
use promobot_ledger::LedgerClient;
use promobot_storage::SqliteStore;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of one distribution pass. `success` means every user we set out
/// to pay was paid; skipped users (no wallet, over budget, unassociated
/// token wallet) do not count against it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionReport {
    pub success: bool,
    pub total_distributed: u64,
    pub users_rewarded: u64,
    pub users_failed: u64,
    pub skipped_no_wallet: u64,
    pub skipped_unassociated: u64,
    pub deferred_over_budget: u64,
    pub reserve_error: Option<String>,
}

impl DistributionReport {
    pub fn metadata_json(&self) -> String {
        json!({
            "total_distributed": self.total_distributed,
            "users_rewarded": self.users_rewarded,
            "users_failed": self.users_failed,
            "skipped_no_wallet": self.skipped_no_wallet,
            "skipped_unassociated": self.skipped_unassociated,
            "deferred_over_budget": self.deferred_over_budget,
            "reserve_error": self.reserve_error,
        })
        .to_string()
    }
}

struct UserPayout {
    amount: u64,
    engagement_ids: Vec<String>,
}

/// Pays out validated engagements. Reserves the full planned total on the
/// ledger before the first transfer, and marks rows paid only after their
/// transfer went through, so a crash mid-pass leaves unpaid rows that the
/// next pass picks up again.
pub struct DistributionRuntime {
    ledger: Arc<dyn LedgerClient>,
}

impl DistributionRuntime {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self { ledger }
    }

    pub fn distribute(&self, store: &SqliteStore, campaign: &CampaignRow) -> Result<DistributionReport> {
        let payable = store
            .list_payable_engagements(&campaign.campaign_id)
            .context("list payable engagements")?;
        let token_id = match campaign.reward_currency {
            RewardCurrency::Native => None,
            RewardCurrency::Token => campaign.token_id.as_deref(),
        };

        let mut report = DistributionReport::default();
        let mut remaining = campaign.remaining_budget();
        let mut plan: BTreeMap<String, UserPayout> = BTreeMap::new();
        for row in &payable {
            let entry = plan.entry(row.user_id.clone()).or_insert(UserPayout {
                amount: 0,
                engagement_ids: Vec::new(),
            });
            entry.amount += campaign.reward_rate(row.kind);
            entry.engagement_ids.push(row.engagement_id.clone());
        }

        // Budget clamp runs over the deterministic user order; whoever does
        // not fit is deferred, not partially paid.
        let mut funded: Vec<(String, UserPayout)> = Vec::new();
        let mut planned_total = 0u64;
        for (user_id, payout) in plan {
            if payout.amount == 0 {
                continue;
            }
            if payout.amount > remaining {
                warn!(
                    campaign_id = %campaign.campaign_id,
                    user_id = %user_id,
                    amount = payout.amount,
                    remaining,
                    "payout exceeds remaining budget, deferring user"
                );
                report.deferred_over_budget += 1;
                continue;
            }
            remaining -= payout.amount;
            planned_total += payout.amount;
            funded.push((user_id, payout));
        }

        if planned_total > 0 {
            if let Err(error) = self.ledger.reserve_total_reward(
                &campaign.ledger_ref,
                &campaign.owner_user_id,
                planned_total,
                token_id,
            ) {
                warn!(
                    campaign_id = %campaign.campaign_id,
                    amount = planned_total,
                    %error,
                    "reward reservation failed, no transfers attempted"
                );
                store
                    .record_lifecycle_event(
                        &campaign.campaign_id,
                        "reward",
                        "error",
                        "reward reservation failed",
                        Some(&json!({ "amount": planned_total, "error": error.to_string() }).to_string()),
                    )
                    .context("record reserve failure")?;
                report.reserve_error = Some(error.to_string());
                return Ok(report);
            }
        }

        for (user_id, payout) in funded {
            match self.pay_user(store, campaign, &user_id, &payout, token_id) {
                Ok(PayOutcome::Paid) => {
                    report.users_rewarded += 1;
                    report.total_distributed += payout.amount;
                }
                Ok(PayOutcome::NoWallet) => report.skipped_no_wallet += 1,
                Ok(PayOutcome::Unassociated) => report.skipped_unassociated += 1,
                Ok(PayOutcome::TransferFailed) => report.users_failed += 1,
                Err(error) => return Err(error),
            }
        }

        report.success = report.users_failed == 0 && report.reserve_error.is_none();
        info!(
            campaign_id = %campaign.campaign_id,
            total_distributed = report.total_distributed,
            users_rewarded = report.users_rewarded,
            users_failed = report.users_failed,
            "distribution pass finished"
        );
        store
            .record_lifecycle_event(
                &campaign.campaign_id,
                "reward",
                if report.success { "info" } else { "warn" },
                "distribution pass finished",
                Some(&report.metadata_json()),
            )
            .context("record distribution summary")?;
        Ok(report)
    }

    fn pay_user(
        &self,
        store: &SqliteStore,
        campaign: &CampaignRow,
        user_id: &str,
        payout: &UserPayout,
        token_id: Option<&str>,
    ) -> Result<PayOutcome> {
        let user = store.user_by_id(user_id).context("load user")?;
        let wallet = match user.as_ref().and_then(|u| u.wallet_address.as_deref()) {
            Some(wallet) => wallet,
            None => {
                info!(user_id, "no wallet on file, leaving engagements unpaid");
                return Ok(PayOutcome::NoWallet);
            }
        };

        if let Some(token) = token_id {
            // The balance lookup doubles as the association check; a wallet
            // that never opted in to the token cannot receive it.
            match self.ledger.query_balance(wallet, Some(token)) {
                Ok(_) => {}
                Err(error) if !error.is_retryable() => {
                    info!(user_id, wallet, token, %error, "wallet not associated with token");
                    return Ok(PayOutcome::Unassociated);
                }
                Err(error) => {
                    warn!(user_id, wallet, %error, "balance check failed");
                    return Ok(PayOutcome::TransferFailed);
                }
            }
        }

        match self.ledger.transfer_reward(wallet, payout.amount, token_id) {
            Ok(receipt) => {
                info!(user_id, amount = payout.amount, tx_ref = %receipt.tx_ref, "reward transferred");
            }
            Err(error) => {
                warn!(user_id, amount = payout.amount, %error, "reward transfer failed");
                return Ok(PayOutcome::TransferFailed);
            }
        }

        store
            .mark_engagements_paid(&payout.engagement_ids)
            .context("mark engagements paid")?;
        store
            .add_lifetime_reward(user_id, payout.amount)
            .context("bump lifetime reward")?;
        store
            .add_claimed_amount(&campaign.campaign_id, payout.amount)
            .context("bump claimed amount")?;
        Ok(PayOutcome::Paid)
    }

}

enum PayOutcome {
    Paid,
    NoWallet,
    Unassociated,
    TransferFailed,
}
