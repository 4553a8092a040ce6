use chrono::Utc;

use super::balance::load_balance;
use crate::analytics::contribution_delta;
use crate::error::{JournalError, Result};
use crate::models::{
    normalize_tags, CreateTradeInput, Trade, TradeFilters, TradeStatus, TradeUpdate,
};
use crate::store::{JournalStore, WriteBatch};

fn new_trade_id() -> String {
    format!("TRADE-{}-{}", Utc::now().timestamp_millis(), uuid::Uuid::new_v4())
}

/// Commit one trade mutation together with its balance adjustment.
///
/// `before` is the stored trade (None on create), `after` the trade to store
/// (None on delete). The delta is applied exactly once, inside the same batch.
async fn commit_mutation(
    store: &dyn JournalStore,
    owner_id: &str,
    before: Option<&Trade>,
    after: Option<Trade>,
    now: i64,
) -> Result<Option<Trade>> {
    let delta = contribution_delta(before, after.as_ref());
    let (balance, exists) = load_balance(store, owner_id, now).await?;

    let mut batch = WriteBatch::new();
    let mut current_balance = balance.current_balance;
    if delta != 0.0 || !exists {
        // Fails on a negative result before anything is written
        let next = balance.apply_delta(delta, now)?;
        if delta != 0.0 {
            log::info!(
                "Reconciled balance for {}: delta {:+.2}, total P&L {:.2}",
                owner_id,
                delta,
                next.total_pnl
            );
        }
        current_balance = next.current_balance;
        batch = batch.put_balance(next);
    }

    let stored = match after {
        Some(mut trade) => {
            let was_closed = before.is_some_and(|t| t.is_closed());
            if !trade.is_closed() {
                trade.balance_after = None;
            } else if delta != 0.0 || !was_closed {
                trade.balance_after = Some(current_balance);
            }
            batch = batch.put_trade(trade.clone());
            Some(trade)
        }
        None => {
            if let Some(trade) = before {
                batch = batch.delete_trade(owner_id, &trade.id);
            }
            None
        }
    };

    store.commit(batch).await?;
    Ok(stored)
}

fn stored_or_err(trade: Option<Trade>) -> Result<Trade> {
    trade.ok_or_else(|| JournalError::DatabaseError("Trade was not stored".to_string()))
}

/// Owner's trades, newest first, optionally filtered and paginated
pub async fn get_trades(
    store: &dyn JournalStore,
    owner_id: &str,
    filters: Option<TradeFilters>,
) -> Result<Vec<Trade>> {
    let trades = store.list_trades(owner_id).await?;
    let filters = filters.unwrap_or_default();
    let matching = trades.into_iter().filter(|t| filters.matches(t));

    if let (Some(page), Some(limit)) = (filters.page, filters.limit) {
        // A page past any addressable offset is simply empty
        let Some(offset) = page.saturating_sub(1).checked_mul(limit) else {
            return Ok(Vec::new());
        };
        return Ok(matching.skip(offset).take(limit).collect());
    }

    Ok(matching.collect())
}

/// A trade owned by `owner_id`; other owners' trades read as missing
pub async fn get_trade(store: &dyn JournalStore, owner_id: &str, id: &str) -> Result<Trade> {
    store
        .get_trade(id)
        .await?
        .filter(|t| t.owner_id == owner_id)
        .ok_or_else(|| JournalError::NotFound(format!("Trade {}", id)))
}

pub async fn create_trade(
    store: &dyn JournalStore,
    owner_id: &str,
    input: CreateTradeInput,
) -> Result<Trade> {
    let now = Utc::now().timestamp();

    let mut trade = Trade {
        id: new_trade_id(),
        owner_id: owner_id.to_string(),
        symbol: input.symbol.trim().to_uppercase(),
        direction: input.direction,
        entry_price: input.entry_price,
        exit_price: input.exit_price,
        quantity: input.quantity,
        entry_date: input.entry_date,
        exit_date: input.exit_date,
        status: input.status,
        pnl: None,
        pnl_percent: None,
        notes: input.notes,
        tags: normalize_tags(input.tags),
        strategy: input.strategy,
        balance_after: None,
        created_at: now,
        updated_at: now,
    };
    trade.refresh_pnl();
    trade.validate()?;

    let trade = stored_or_err(commit_mutation(store, owner_id, None, Some(trade), now).await?)?;
    log::info!("Created trade {} ({} {})", trade.id, trade.direction, trade.symbol);
    Ok(trade)
}

pub async fn update_trade(
    store: &dyn JournalStore,
    owner_id: &str,
    id: &str,
    update: TradeUpdate,
) -> Result<Trade> {
    let now = Utc::now().timestamp();

    // Prior P&L must be read before the edit to get the right delta
    let existing = get_trade(store, owner_id, id).await?;
    let updated = update.apply_to(&existing, now);
    updated.validate()?;

    stored_or_err(commit_mutation(store, owner_id, Some(&existing), Some(updated), now).await?)
}

pub async fn delete_trade(store: &dyn JournalStore, owner_id: &str, id: &str) -> Result<()> {
    let now = Utc::now().timestamp();
    let existing = get_trade(store, owner_id, id).await?;
    commit_mutation(store, owner_id, Some(&existing), None, now).await?;
    log::info!("Deleted trade {}", id);
    Ok(())
}

/// Copy a trade as a new open position
pub async fn duplicate_trade(store: &dyn JournalStore, owner_id: &str, id: &str) -> Result<Trade> {
    let now = Utc::now().timestamp();
    let original = get_trade(store, owner_id, id).await?;

    let copy = Trade {
        id: new_trade_id(),
        status: TradeStatus::Open,
        exit_price: None,
        exit_date: None,
        pnl: None,
        pnl_percent: None,
        balance_after: None,
        created_at: now,
        updated_at: now,
        ..original
    };
    copy.validate()?;

    stored_or_err(commit_mutation(store, owner_id, None, Some(copy), now).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::calculate_stats;
    use crate::commands::balance::{get_account_balance, set_starting_balance};
    use crate::models::{TradeDirection, UpdateBalanceInput};
    use crate::store::{LocalStore, SqliteStore};

    fn closed_input(
        symbol: &str,
        direction: TradeDirection,
        entry: f64,
        exit: f64,
        qty: f64,
    ) -> CreateTradeInput {
        CreateTradeInput {
            symbol: symbol.to_string(),
            direction,
            entry_price: entry,
            exit_price: Some(exit),
            quantity: qty,
            entry_date: 1_700_000_000,
            exit_date: Some(1_700_003_600),
            status: TradeStatus::Closed,
            notes: String::new(),
            tags: vec![],
            strategy: None,
        }
    }

    fn open_input(symbol: &str) -> CreateTradeInput {
        CreateTradeInput {
            exit_price: None,
            exit_date: None,
            status: TradeStatus::Open,
            ..closed_input(symbol, TradeDirection::Long, 50.0, 50.0, 2.0)
        }
    }

    async fn funded_store() -> LocalStore {
        let store = LocalStore::new();
        set_starting_balance(
            &store,
            "alice",
            UpdateBalanceInput {
                starting_balance: 10_000.0,
            },
        )
        .await
        .unwrap();
        store
    }

    async fn scenario_six(store: &dyn JournalStore) {
        let long = closed_input("AAPL", TradeDirection::Long, 100.0, 110.0, 10.0);
        create_trade(store, "alice", long).await.unwrap();
        let short = closed_input("TSLA", TradeDirection::Short, 200.0, 190.0, 5.0);
        create_trade(store, "alice", short).await.unwrap();
    }

    #[tokio::test]
    async fn test_two_winning_trades() {
        let store = funded_store().await;
        scenario_six(&store).await;

        let balance = get_account_balance(&store, "alice").await.unwrap();
        assert_eq!(balance.total_pnl, 150.0);
        assert_eq!(balance.current_balance, 10_150.0);
        assert!((balance.total_return_percent - 1.5).abs() < 1e-9);

        let trades = get_trades(&store, "alice", None).await.unwrap();
        let stats = calculate_stats(&trades, Some(&balance));
        assert_eq!(stats.win_rate, 100.0);
        assert_eq!(stats.profit_factor, 150.0);
        assert_eq!(stats.winning_trades, 2);
        assert_eq!(stats.losing_trades, 0);
    }

    #[tokio::test]
    async fn test_losing_trade_then_delete_restores_state() {
        let store = funded_store().await;
        scenario_six(&store).await;
        let before_loss = get_account_balance(&store, "alice").await.unwrap();

        // Long 100 -> 85 on 5 shares: -75
        let input = closed_input("NVDA", TradeDirection::Long, 100.0, 85.0, 5.0);
        let loser = create_trade(&store, "alice", input).await.unwrap();
        assert_eq!(loser.pnl, Some(-75.0));
        assert_eq!(loser.balance_after, Some(10_075.0));

        let balance = get_account_balance(&store, "alice").await.unwrap();
        let trades = get_trades(&store, "alice", None).await.unwrap();
        let stats = calculate_stats(&trades, Some(&balance));
        assert_eq!(stats.win_rate, 66.7);
        assert_eq!(stats.profit_factor, 2.0);
        assert_eq!(stats.average_win, 75.0);
        assert_eq!(stats.average_loss, 75.0);

        delete_trade(&store, "alice", &loser.id).await.unwrap();
        let restored = get_account_balance(&store, "alice").await.unwrap();
        assert_eq!(restored.total_pnl, before_loss.total_pnl);
        assert_eq!(restored.current_balance, before_loss.current_balance);
        assert_eq!(restored.total_return_percent, before_loss.total_return_percent);
    }

    #[tokio::test]
    async fn test_edit_applies_difference_not_new_pnl() {
        let store = funded_store().await;
        let input = closed_input("AAPL", TradeDirection::Long, 100.0, 110.0, 10.0);
        let trade = create_trade(&store, "alice", input).await.unwrap();

        let updated = update_trade(
            &store,
            "alice",
            &trade.id,
            TradeUpdate {
                exit_price: Some(Some(120.0)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.pnl, Some(200.0));

        let balance = get_account_balance(&store, "alice").await.unwrap();
        assert_eq!(balance.total_pnl, 200.0);
        assert_eq!(updated.balance_after, Some(10_200.0));
    }

    #[tokio::test]
    async fn test_status_transitions_move_balance() {
        let store = funded_store().await;
        let trade = create_trade(&store, "alice", open_input("MSFT")).await.unwrap();
        assert_eq!(trade.pnl, None);
        assert_eq!(get_account_balance(&store, "alice").await.unwrap().total_pnl, 0.0);

        // open -> closed
        let closed = update_trade(
            &store,
            "alice",
            &trade.id,
            TradeUpdate {
                status: Some(TradeStatus::Closed),
                exit_price: Some(Some(60.0)),
                exit_date: Some(Some(1_700_010_000)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(closed.pnl, Some(20.0));
        assert_eq!(get_account_balance(&store, "alice").await.unwrap().total_pnl, 20.0);

        // closed -> open
        let reopened = update_trade(
            &store,
            "alice",
            &trade.id,
            TradeUpdate {
                status: Some(TradeStatus::Open),
                exit_price: Some(None),
                exit_date: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(reopened.pnl, None);
        assert_eq!(reopened.balance_after, None);
        assert_eq!(get_account_balance(&store, "alice").await.unwrap().total_pnl, 0.0);
    }

    #[tokio::test]
    async fn test_invalid_trade_rejected_before_write() {
        let store = LocalStore::new();
        let mut input = closed_input("AAPL", TradeDirection::Long, 100.0, 110.0, 10.0);
        input.quantity = 0.0;

        let err = create_trade(&store, "alice", input).await.unwrap_err();
        assert!(matches!(err, JournalError::Validation(_)));
        assert!(store.list_trades("alice").await.unwrap().is_empty());
        assert!(store.get_balance("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_loss_beyond_balance_rejected() {
        let store = LocalStore::new();
        set_starting_balance(&store, "alice", UpdateBalanceInput { starting_balance: 100.0 })
            .await
            .unwrap();

        let input = closed_input("AAPL", TradeDirection::Long, 100.0, 50.0, 10.0);
        let err = create_trade(&store, "alice", input).await.unwrap_err();
        assert!(matches!(err, JournalError::Validation(_)));
        assert!(store.list_trades("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_other_owner_cannot_touch_trade() {
        let store = funded_store().await;
        let trade = create_trade(&store, "alice", open_input("AMD")).await.unwrap();

        assert!(matches!(
            get_trade(&store, "mallory", &trade.id).await,
            Err(JournalError::NotFound(_))
        ));
        assert!(delete_trade(&store, "mallory", &trade.id).await.is_err());
        assert_eq!(store.list_trades("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_creates_open_copy() {
        let store = funded_store().await;
        let mut input = closed_input("aapl", TradeDirection::Long, 100.0, 110.0, 10.0);
        input.tags = vec![" swing ".to_string(), "swing".to_string(), "".to_string()];
        let original = create_trade(&store, "alice", input).await.unwrap();
        assert_eq!(original.symbol, "AAPL");
        assert_eq!(original.tags, vec!["swing".to_string()]);

        let copy = duplicate_trade(&store, "alice", &original.id).await.unwrap();
        assert_ne!(copy.id, original.id);
        assert_eq!(copy.status, TradeStatus::Open);
        assert_eq!(copy.pnl, None);
        assert_eq!(copy.tags, original.tags);

        // The copy carries no realized P&L
        assert_eq!(get_account_balance(&store, "alice").await.unwrap().total_pnl, 100.0);
    }

    #[tokio::test]
    async fn test_filters_and_pagination() {
        let store = funded_store().await;
        for symbol in ["AAPL", "TSLA", "AAPL", "NVDA"] {
            create_trade(&store, "alice", open_input(symbol)).await.unwrap();
        }

        let aapl = get_trades(
            &store,
            "alice",
            Some(TradeFilters {
                symbol: Some("aap".to_string()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(aapl.len(), 2);

        let page_two = get_trades(
            &store,
            "alice",
            Some(TradeFilters {
                page: Some(2),
                limit: Some(3),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(page_two.len(), 1);
        assert_eq!(page_two[0].symbol, "AAPL");
    }

    #[tokio::test]
    async fn test_page_beyond_addressable_range_is_empty() {
        let store = funded_store().await;
        create_trade(&store, "alice", open_input("AAPL")).await.unwrap();

        let far = get_trades(
            &store,
            "alice",
            Some(TradeFilters {
                page: Some(3),
                limit: Some(usize::MAX / 2 + 1),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert!(far.is_empty());

        // Offset still representable: ordinary skip
        let second = get_trades(
            &store,
            "alice",
            Some(TradeFilters {
                page: Some(2),
                limit: Some(usize::MAX),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_backend_reconciles_the_same_way() {
        let store = SqliteStore::open_in_memory().unwrap();
        set_starting_balance(&store, "alice", UpdateBalanceInput { starting_balance: 10_000.0 })
            .await
            .unwrap();
        scenario_six(&store).await;

        let balance = get_account_balance(&store, "alice").await.unwrap();
        assert_eq!(balance.current_balance, 10_150.0);
    }
}
