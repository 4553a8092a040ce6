use crate::error::Result;
use crate::models::{PaymentFilter, PaymentStatus, Plan, SubscriptionState};
use crate::store::JournalStore;

/// Where a user's subscription stands at `now`
pub async fn get_subscription(
    store: &dyn JournalStore,
    uid: &str,
    now: i64,
) -> Result<SubscriptionState> {
    if let Some(user) = store.get_user(uid).await? {
        if let (plan, Some(expires_at)) = (user.plan, user.subscription_expires_at) {
            if plan != Plan::Free {
                return Ok(if expires_at > now {
                    SubscriptionState::Active { plan, expires_at }
                } else {
                    SubscriptionState::Expired {
                        plan,
                        expired_at: expires_at,
                    }
                });
            }
        }
    }

    let pending = store
        .list_payments(&PaymentFilter {
            user_id: Some(uid.to_string()),
            status: Some(PaymentStatus::Pending),
        })
        .await?;

    Ok(match pending.first() {
        Some(payment) => SubscriptionState::Pending {
            requested_plan: payment.plan,
        },
        None => SubscriptionState::Free,
    })
}
