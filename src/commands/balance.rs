use chrono::Utc;

use crate::error::Result;
use crate::models::{AccountBalance, UpdateBalanceInput};
use crate::store::{JournalStore, WriteBatch};

/// Stored balance record, or a fresh one that the caller must persist.
/// The flag is true when the record already exists.
pub(crate) async fn load_balance(
    store: &dyn JournalStore,
    owner_id: &str,
    now: i64,
) -> Result<(AccountBalance, bool)> {
    match store.get_balance(owner_id).await? {
        Some(balance) => Ok((balance, true)),
        None => Ok((AccountBalance::initial(owner_id, now), false)),
    }
}

/// Current balance record, created on first access
pub async fn get_account_balance(
    store: &dyn JournalStore,
    owner_id: &str,
) -> Result<AccountBalance> {
    let now = Utc::now().timestamp();
    let (balance, exists) = load_balance(store, owner_id, now).await?;
    if !exists {
        log::info!("Creating balance record for {}", owner_id);
        store
            .commit(WriteBatch::new().put_balance(balance.clone()))
            .await?;
    }
    Ok(balance)
}

pub async fn set_starting_balance(
    store: &dyn JournalStore,
    owner_id: &str,
    input: UpdateBalanceInput,
) -> Result<AccountBalance> {
    let now = Utc::now().timestamp();
    let (balance, _) = load_balance(store, owner_id, now).await?;

    // Validated before anything is written
    let updated = balance.with_starting_balance(input.starting_balance, now)?;
    store
        .commit(WriteBatch::new().put_balance(updated.clone()))
        .await?;

    log::info!(
        "Starting balance for {} set to {:.2} (current {:.2})",
        owner_id,
        updated.starting_balance,
        updated.current_balance
    );
    Ok(updated)
}

/// Rebuild the totals from every trade the owner has. Safe to call at any time.
pub async fn recalculate_balance(
    store: &dyn JournalStore,
    owner_id: &str,
) -> Result<AccountBalance> {
    let now = Utc::now().timestamp();
    let (trades, (balance, _)) = futures::try_join!(
        store.list_trades(owner_id),
        load_balance(store, owner_id, now)
    )?;

    let drift = balance.drift(&trades);
    if drift.abs() > 0.01 {
        log::warn!(
            "Balance for {} drifted by {:.2} from its trades, repairing",
            owner_id,
            drift
        );
    }

    let recalculated = balance.recalculated(&trades, now)?;
    store
        .commit(WriteBatch::new().put_balance(recalculated.clone()))
        .await?;

    log::info!(
        "Recalculated balance for {} over {} trades: total P&L {:.2}",
        owner_id,
        trades.len(),
        recalculated.total_pnl
    );
    Ok(recalculated)
}
