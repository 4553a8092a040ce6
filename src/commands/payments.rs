use chrono::Utc;

use crate::auth::Principal;
use crate::error::{JournalError, Result};
use crate::models::{Payment, PaymentFilter, PaymentInput, PaymentStatus, Plan, Role, UserProfile};
use crate::store::{JournalStore, WriteBatch};

fn new_payment_id() -> String {
    format!("PAY-{}-{}", Utc::now().timestamp_millis(), uuid::Uuid::new_v4())
}

fn new_profile(uid: &str, email: &str, principal: Option<&Principal>, now: i64) -> UserProfile {
    UserProfile {
        uid: uid.to_string(),
        email: email.to_string(),
        display_name: None,
        role: principal.map(|p| p.role).unwrap_or(Role::User),
        plan: Plan::Free,
        subscription_expires_at: None,
        created_at: now,
        updated_at: now,
    }
}

async fn pending_review(store: &dyn JournalStore, id: &str) -> Result<Payment> {
    let payment = store
        .get_payment(id)
        .await?
        .ok_or_else(|| JournalError::NotFound(format!("Payment {}", id)))?;
    if payment.status != PaymentStatus::Pending {
        return Err(JournalError::Validation(format!(
            "Payment {} is already {}",
            id, payment.status
        )));
    }
    Ok(payment)
}

/// Record a manual payment for review
pub async fn submit_payment(
    store: &dyn JournalStore,
    principal: &Principal,
    input: PaymentInput,
) -> Result<Payment> {
    if input.plan == Plan::Free {
        return Err(JournalError::Validation(
            "The free plan does not require a payment".to_string(),
        ));
    }
    if !input.amount.is_finite() || input.amount <= 0.0 {
        return Err(JournalError::Validation(
            "Payment amount must be positive".to_string(),
        ));
    }
    if input.amount < input.plan.price() {
        return Err(JournalError::Validation(format!(
            "The {} plan costs {:.2}, got {:.2}",
            input.plan.as_str(),
            input.plan.price(),
            input.amount
        )));
    }
    if input.reference.trim().is_empty() {
        return Err(JournalError::Validation(
            "A payment reference is required".to_string(),
        ));
    }

    let pending = store
        .list_payments(&PaymentFilter {
            user_id: Some(principal.uid.clone()),
            status: Some(PaymentStatus::Pending),
        })
        .await?;
    if !pending.is_empty() {
        return Err(JournalError::Validation(
            "A payment is already awaiting review".to_string(),
        ));
    }

    let now = Utc::now().timestamp();
    let payment = Payment {
        id: new_payment_id(),
        user_id: principal.uid.clone(),
        email: principal.email.clone(),
        plan: input.plan,
        amount: input.amount,
        method: input.method.trim().to_string(),
        reference: input.reference.trim().to_string(),
        status: PaymentStatus::Pending,
        submitted_at: now,
        reviewed_at: None,
        reviewed_by: None,
        rejection_reason: None,
    };

    let mut batch = WriteBatch::new().put_payment(payment.clone());
    if store.get_user(&principal.uid).await?.is_none() {
        batch = batch.put_user(new_profile(&principal.uid, &principal.email, Some(principal), now));
    }
    store.commit(batch).await?;

    log::info!(
        "Payment {} submitted by {} for the {} plan",
        payment.id,
        principal.uid,
        payment.plan
    );
    Ok(payment)
}

/// Approve a pending payment and upgrade the payer in one atomic write.
///
/// On failure nothing is persisted and `TransactionAborted` is returned;
/// the operator may call this again to retry.
pub async fn approve_payment(
    store: &dyn JournalStore,
    admin: &Principal,
    payment_id: &str,
) -> Result<Payment> {
    admin.require_admin()?;
    let payment = pending_review(store, payment_id).await?;

    let now = Utc::now().timestamp();
    let mut user = match store.get_user(&payment.user_id).await? {
        Some(user) => user,
        None => new_profile(&payment.user_id, &payment.email, None, now),
    };

    // An unexpired subscription is extended from its current expiry
    let base = user
        .subscription_expires_at
        .filter(|expires_at| *expires_at > now)
        .unwrap_or(now);
    user.plan = payment.plan;
    user.subscription_expires_at = Some(base + payment.plan.duration_secs());
    user.updated_at = now;

    let approved = Payment {
        status: PaymentStatus::Approved,
        reviewed_at: Some(now),
        reviewed_by: Some(admin.uid.clone()),
        ..payment
    };

    let batch = WriteBatch::new()
        .put_payment(approved.clone())
        .put_user(user);
    if let Err(e) = store.commit(batch).await {
        log::error!("Approval of payment {} rolled back: {}", payment_id, e);
        return Err(JournalError::TransactionAborted(format!(
            "Approval of payment {} was not saved: {}",
            payment_id, e
        )));
    }

    log::info!(
        "Payment {} approved by {}: {} on {} plan",
        payment_id,
        admin.uid,
        approved.user_id,
        approved.plan
    );
    Ok(approved)
}

pub async fn reject_payment(
    store: &dyn JournalStore,
    admin: &Principal,
    payment_id: &str,
    reason: &str,
) -> Result<Payment> {
    admin.require_admin()?;
    let payment = pending_review(store, payment_id).await?;

    let now = Utc::now().timestamp();
    let reason = reason.trim();
    let rejected = Payment {
        status: PaymentStatus::Rejected,
        reviewed_at: Some(now),
        reviewed_by: Some(admin.uid.clone()),
        rejection_reason: (!reason.is_empty()).then(|| reason.to_string()),
        ..payment
    };
    store
        .commit(WriteBatch::new().put_payment(rejected.clone()))
        .await?;

    log::info!("Payment {} rejected by {}", payment_id, admin.uid);
    Ok(rejected)
}

/// Admin view over every user's payments
pub async fn list_payments(
    store: &dyn JournalStore,
    admin: &Principal,
    status: Option<PaymentStatus>,
) -> Result<Vec<Payment>> {
    admin.require_admin()?;
    store
        .list_payments(&PaymentFilter {
            user_id: None,
            status,
        })
        .await
}

pub async fn list_my_payments(
    store: &dyn JournalStore,
    principal: &Principal,
) -> Result<Vec<Payment>> {
    store
        .list_payments(&PaymentFilter {
            user_id: Some(principal.uid.clone()),
            status: None,
        })
        .await
}

pub async fn list_users(store: &dyn JournalStore, admin: &Principal) -> Result<Vec<UserProfile>> {
    admin.require_admin()?;
    store.list_users().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountBalance, Trade};
    use crate::store::{LocalStore, StoreBackend};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::watch;

    fn principal(uid: &str, role: Role) -> Principal {
        Principal {
            uid: uid.to_string(),
            email: format!("{}@example.com", uid),
            role,
        }
    }

    fn monthly() -> PaymentInput {
        PaymentInput {
            plan: Plan::Monthly,
            amount: 29.0,
            method: "bank_transfer".to_string(),
            reference: " TX-4411 ".to_string(),
        }
    }

    #[tokio::test]
    async fn test_submit_validates_input() {
        let store = LocalStore::new();
        let alice = principal("alice", Role::User);

        let mut free = monthly();
        free.plan = Plan::Free;
        assert!(submit_payment(&store, &alice, free).await.is_err());

        let mut zero = monthly();
        zero.amount = 0.0;
        assert!(submit_payment(&store, &alice, zero).await.is_err());

        // Below the list price of the chosen plan
        let mut short = monthly();
        short.amount = 10.0;
        assert!(matches!(
            submit_payment(&store, &alice, short).await,
            Err(JournalError::Validation(_))
        ));
        let mut annual_at_monthly_price = monthly();
        annual_at_monthly_price.plan = Plan::Annual;
        assert!(submit_payment(&store, &alice, annual_at_monthly_price).await.is_err());

        let mut blank = monthly();
        blank.reference = "  ".to_string();
        assert!(submit_payment(&store, &alice, blank).await.is_err());

        let payment = submit_payment(&store, &alice, monthly()).await.unwrap();
        assert_eq!(payment.reference, "TX-4411");
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert!(store.get_user("alice").await.unwrap().is_some());

        // Only one pending payment at a time
        assert!(matches!(
            submit_payment(&store, &alice, monthly()).await,
            Err(JournalError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_approval_updates_payment_and_user() {
        let store = LocalStore::new();
        let alice = principal("alice", Role::User);
        let admin = principal("root", Role::Admin);

        let payment = submit_payment(&store, &alice, monthly()).await.unwrap();
        let approved = approve_payment(&store, &admin, &payment.id).await.unwrap();
        assert_eq!(approved.status, PaymentStatus::Approved);
        assert_eq!(approved.reviewed_by.as_deref(), Some("root"));

        let user = store.get_user("alice").await.unwrap().unwrap();
        assert_eq!(user.plan, Plan::Monthly);
        let first_expiry = user.subscription_expires_at.unwrap();
        assert!(first_expiry >= approved.submitted_at + Plan::Monthly.duration_secs());

        // Renewal stacks on the unexpired subscription
        let mut annual = monthly();
        annual.plan = Plan::Annual;
        annual.amount = 290.0;
        let renewal = submit_payment(&store, &alice, annual).await.unwrap();
        approve_payment(&store, &admin, &renewal.id).await.unwrap();

        let user = store.get_user("alice").await.unwrap().unwrap();
        assert_eq!(user.plan, Plan::Annual);
        assert_eq!(
            user.subscription_expires_at,
            Some(first_expiry + Plan::Annual.duration_secs())
        );

        // Already reviewed
        assert!(approve_payment(&store, &admin, &payment.id).await.is_err());
    }

    #[tokio::test]
    async fn test_non_admin_cannot_review() {
        let store = LocalStore::new();
        let alice = principal("alice", Role::User);
        let payment = submit_payment(&store, &alice, monthly()).await.unwrap();

        for result in [
            approve_payment(&store, &alice, &payment.id).await,
            reject_payment(&store, &alice, &payment.id, "no").await,
        ] {
            assert!(matches!(result, Err(JournalError::Unauthorized(_))));
        }
        assert!(list_payments(&store, &alice, None).await.is_err());
        assert!(list_users(&store, &alice).await.is_err());
        assert_eq!(list_my_payments(&store, &alice).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reject_keeps_user_on_free() {
        let store = LocalStore::new();
        let alice = principal("alice", Role::User);
        let admin = principal("root", Role::Admin);

        let payment = submit_payment(&store, &alice, monthly()).await.unwrap();
        let rejected = reject_payment(&store, &admin, &payment.id, "reference not found")
            .await
            .unwrap();
        assert_eq!(rejected.status, PaymentStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("reference not found"));

        let user = store.get_user("alice").await.unwrap().unwrap();
        assert_eq!(user.plan, Plan::Free);

        let pending = list_payments(&store, &admin, Some(PaymentStatus::Pending))
            .await
            .unwrap();
        assert!(pending.is_empty());
    }

    /// Store whose commits fail until `healthy` is set
    struct FlakyStore {
        inner: LocalStore,
        healthy: AtomicBool,
    }

    #[async_trait]
    impl JournalStore for FlakyStore {
        fn backend(&self) -> StoreBackend {
            self.inner.backend()
        }
        async fn list_trades(&self, owner_id: &str) -> Result<Vec<Trade>> {
            self.inner.list_trades(owner_id).await
        }
        async fn get_trade(&self, id: &str) -> Result<Option<Trade>> {
            self.inner.get_trade(id).await
        }
        async fn get_balance(&self, owner_id: &str) -> Result<Option<AccountBalance>> {
            self.inner.get_balance(owner_id).await
        }
        async fn get_payment(&self, id: &str) -> Result<Option<Payment>> {
            self.inner.get_payment(id).await
        }
        async fn list_payments(&self, filter: &PaymentFilter) -> Result<Vec<Payment>> {
            self.inner.list_payments(filter).await
        }
        async fn get_user(&self, uid: &str) -> Result<Option<UserProfile>> {
            self.inner.get_user(uid).await
        }
        async fn list_users(&self) -> Result<Vec<UserProfile>> {
            self.inner.list_users().await
        }
        async fn commit(&self, batch: WriteBatch) -> Result<()> {
            if !self.healthy.load(Ordering::SeqCst) {
                return Err(JournalError::Unavailable("connection reset".to_string()));
            }
            self.inner.commit(batch).await
        }
        async fn subscribe_trades(&self, owner_id: &str) -> Result<watch::Receiver<Vec<Trade>>> {
            self.inner.subscribe_trades(owner_id).await
        }
        async fn subscribe_balance(
            &self,
            owner_id: &str,
        ) -> Result<watch::Receiver<Option<AccountBalance>>> {
            self.inner.subscribe_balance(owner_id).await
        }
    }

    #[tokio::test]
    async fn test_failed_approval_aborts_and_can_be_retried() {
        let store = FlakyStore {
            inner: LocalStore::new(),
            healthy: AtomicBool::new(true),
        };
        let alice = principal("alice", Role::User);
        let admin = principal("root", Role::Admin);
        let payment = submit_payment(&store, &alice, monthly()).await.unwrap();

        store.healthy.store(false, Ordering::SeqCst);
        let err = approve_payment(&store, &admin, &payment.id).await.unwrap_err();
        assert!(matches!(err, JournalError::TransactionAborted(_)));
        assert!(err.is_recoverable());

        // Neither record moved
        let stored = store.get_payment(&payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Pending);
        assert_eq!(store.get_user("alice").await.unwrap().unwrap().plan, Plan::Free);

        store.healthy.store(true, Ordering::SeqCst);
        approve_payment(&store, &admin, &payment.id).await.unwrap();
        assert_eq!(store.get_user("alice").await.unwrap().unwrap().plan, Plan::Monthly);
    }
}
