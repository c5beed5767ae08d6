//! Persisted stores: customer links, subscription snapshots, user tier state,
//! quota counters and parked billing events.
//!
//! Every write is a single-document atomic upsert, so concurrent delivery of
//! events for different customers needs no cross-document locking, and
//! replaying the same event converges on the same state.

use anyhow::Result;
use futures::TryStreamExt;
use mongodb::bson::{doc, DateTime};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{
    FindOneAndUpdateOptions, FindOptions, IndexOptions, ReplaceOptions, ReturnDocument,
    UpdateOptions,
};
use mongodb::{Collection, Database, IndexModel};

use crate::models::{
    CustomerLink, OperationKind, QuotaCounter, SubscriptionSnapshot, Tier, UserTierState,
};
use crate::services::billing::PendingBillingEvent;
use crate::services::quota::{QuotaDecision, QuotaLimit};

#[derive(Clone)]
pub struct GatewayRepository {
    links: Collection<CustomerLink>,
    snapshots: Collection<SubscriptionSnapshot>,
    tiers: Collection<UserTierState>,
    quotas: Collection<QuotaCounter>,
    pending: Collection<PendingBillingEvent>,
}

impl GatewayRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            links: db.collection("customer_links"),
            snapshots: db.collection("subscription_snapshots"),
            tiers: db.collection("user_tiers"),
            quotas: db.collection("quota_counters"),
            pending: db.collection("pending_billing_events"),
        }
    }

    /// Initialize indexes. The unique quota index is load-bearing: the atomic
    /// consume path relies on it to reject an upsert racing an at-limit
    /// counter.
    pub async fn init_indexes(&self) -> Result<()> {
        let quota_index = IndexModel::builder()
            .keys(doc! { "user_id": 1, "kind": 1, "date": 1 })
            .options(
                IndexOptions::builder()
                    .name("quota_daily_unique_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        self.quotas.create_indexes([quota_index], None).await?;

        let pending_index = IndexModel::builder()
            .keys(doc! { "customer_id": 1, "received_at": 1 })
            .options(
                IndexOptions::builder()
                    .name("pending_customer_idx".to_string())
                    .build(),
            )
            .build();

        self.pending.create_indexes([pending_index], None).await?;

        tracing::info!("Gateway indexes initialized");
        Ok(())
    }

    /// Upsert the customer -> user association. A second write for the same
    /// customer replaces the first: last write wins, no merge.
    pub async fn link_customer(&self, customer_id: &str, user_id: &str) -> Result<()> {
        let link = CustomerLink {
            customer_id: customer_id.to_string(),
            user_id: user_id.to_string(),
            linked_at: DateTime::now(),
        };
        self.links
            .replace_one(
                doc! { "_id": customer_id },
                link,
                ReplaceOptions::builder().upsert(true).build(),
            )
            .await?;
        Ok(())
    }

    pub async fn resolve_customer(&self, customer_id: &str) -> Result<Option<String>> {
        let link = self.links.find_one(doc! { "_id": customer_id }, None).await?;
        Ok(link.map(|l| l.user_id))
    }

    /// Persist the subscription snapshot and the derived tier.
    ///
    /// Two single-document upserts; each is idempotent, so replaying the same
    /// event converges even if a crash lands between them and the sender
    /// redelivers.
    pub async fn apply_subscription(
        &self,
        user_id: &str,
        snapshot: SubscriptionSnapshot,
        tier: Tier,
    ) -> Result<()> {
        let subscription_id = snapshot.subscription_id.clone();
        self.snapshots
            .replace_one(
                doc! { "_id": &subscription_id },
                snapshot,
                ReplaceOptions::builder().upsert(true).build(),
            )
            .await?;

        self.tiers
            .update_one(
                doc! { "_id": user_id },
                doc! {
                    "$set": {
                        "tier": mongodb::bson::to_bson(&tier)?,
                        "updated_at": DateTime::now()
                    }
                },
                UpdateOptions::builder().upsert(true).build(),
            )
            .await?;

        Ok(())
    }

    pub async fn get_tier(&self, user_id: &str) -> Result<Option<UserTierState>> {
        let state = self.tiers.find_one(doc! { "_id": user_id }, None).await?;
        Ok(state)
    }

    /// Atomically check and consume one quota unit.
    ///
    /// The limit predicate lives in the update filter, so the check and the
    /// `$inc` are one server-side operation. When the counter is at its limit
    /// the filter matches nothing and the upsert collides with the unique
    /// (user_id, kind, date) index, which reads back as `Denied`.
    pub async fn try_consume_quota(
        &self,
        user_id: &str,
        kind: OperationKind,
        date: &str,
        limit: QuotaLimit,
    ) -> Result<QuotaDecision> {
        let mut filter = doc! {
            "user_id": user_id,
            "kind": kind.as_str(),
            "date": date,
        };
        if let QuotaLimit::Limited(l) = limit {
            filter.insert("count", doc! { "$lt": i64::from(l) });
        }

        let update = doc! { "$inc": { "count": 1 } };
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        // Two concurrent first writes of the day can both take the upsert
        // path and collide on the unique index. One retry tells that apart
        // from an at-limit counter: after the retry the document exists, so a
        // second collision can only mean the filter excluded it.
        let mut retried = false;
        loop {
            match self
                .quotas
                .find_one_and_update(filter.clone(), update.clone(), options.clone())
                .await
            {
                Ok(Some(counter)) => {
                    return Ok(QuotaDecision::Allowed {
                        used_today: counter.count,
                    })
                }
                Ok(None) => return Ok(QuotaDecision::Denied),
                Err(e) if is_duplicate_key(&e) && !retried => retried = true,
                Err(e) if is_duplicate_key(&e) => return Ok(QuotaDecision::Denied),
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn get_usage(
        &self,
        user_id: &str,
        kind: OperationKind,
        date: &str,
    ) -> Result<i64> {
        let counter = self
            .quotas
            .find_one(
                doc! { "user_id": user_id, "kind": kind.as_str(), "date": date },
                None,
            )
            .await?;
        Ok(counter.map(|c| c.count).unwrap_or(0))
    }

    /// Park a subscription event that arrived before its checkout link.
    pub async fn park_pending_event(&self, event: PendingBillingEvent) -> Result<()> {
        self.pending.insert_one(event, None).await?;
        Ok(())
    }

    /// Parked events for a customer, oldest first, so replay lands on the
    /// latest state under last-write-wins.
    pub async fn pending_events(&self, customer_id: &str) -> Result<Vec<PendingBillingEvent>> {
        let options = FindOptions::builder()
            .sort(doc! { "received_at": 1 })
            .build();
        let cursor = self
            .pending
            .find(doc! { "customer_id": customer_id }, Some(options))
            .await?;
        let events: Vec<PendingBillingEvent> = cursor.try_collect().await?;
        Ok(events)
    }

    /// Remove parked events once they have been applied.
    pub async fn clear_pending_events(&self, customer_id: &str) -> Result<()> {
        self.pending
            .delete_many(doc! { "customer_id": customer_id }, None)
            .await?;
        Ok(())
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match *err.kind {
        ErrorKind::Command(ref command_err) => command_err.code == 11000,
        ErrorKind::Write(WriteFailure::WriteError(ref write_err)) => write_err.code == 11000,
        _ => false,
    }
}
