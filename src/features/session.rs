// Session context
// Owns the local store and the background machinery for one logged-in user.
// Every mutator returns its result or a named rejection.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex, RwLock, RwLockReadGuard};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::economy::{self, Eligibility, EvictionConsent, SpinOutcome};
use super::local_store::{ActiveParts, DirtyField, LocalStore};
use super::presence::{Presence, PresenceEvent, PresenceTracker};
use super::reconciler::{Mirrors, SubscriptionReconciler};
use super::scheduler::SyncScheduler;
use super::social::{AdmireOutcome, SocialActions};
use crate::api::payment::{PaymentKind, PaymentLedger, PaymentOutcome, PendingPayment};
use crate::api::store::{Collection, FieldFilter, RemoteStore};
use crate::error::Rejection;
use crate::models::book::Book;
use crate::models::cart::{self, CartItem};
use crate::models::coupon::{self, Coupon};
use crate::models::library::{AvatarConfig, BookProgress, UserMaps};
use crate::models::user::{ProfileDocument, UserState};
use crate::utils::config::Settings;

pub struct Session {
    remote: Arc<dyn RemoteStore>,
    settings: Settings,
    store: Arc<Mutex<LocalStore>>,
    scheduler: SyncScheduler,
    presence: PresenceTracker,
    reconciler: SubscriptionReconciler,
    social: SocialActions,
    ledger: PaymentLedger,
    counters: JoinHandle<()>,
}

impl Session {
    /// Load (or create) the profile for `uid` and start syncing
    pub async fn login(
        remote: Arc<dyn RemoteStore>,
        settings: Settings,
        uid: &str,
        username: &str,
    ) -> Result<Self> {
        let (mut doc, fresh) = match remote.get_profile(uid).await? {
            Some(value) => (ProfileDocument::from_value(uid, value)?, false),
            None => (
                ProfileDocument {
                    user: UserState::new(uid, username, username),
                    ..Default::default()
                },
                true,
            ),
        };
        if doc.user.username.is_empty() {
            doc.user.username = username.to_string();
        }
        let username = doc.user.username.clone();
        let lookup_key = username.to_lowercase();
        if fresh {
            if let Some(claim) = remote.get_document(Collection::Usernames, &lookup_key).await? {
                let owner = claim["uid"].as_str().unwrap_or_default();
                if owner != uid {
                    bail!("username {} is already taken", username);
                }
            }
        }

        let store = Arc::new(Mutex::new(LocalStore::new()));
        store.lock().await.hydrate(doc);

        let scheduler = SyncScheduler::new(
            remote.clone(),
            store.clone(),
            settings.debounce,
            settings.flush_timeout,
        );

        if fresh {
            remote
                .put_document(Collection::Usernames, &lookup_key, &json!({ "uid": uid }))
                .await?;
            store.lock().await.touch(DirtyField::Profile)?;
            if let Some(write) = scheduler.flush_now().await {
                write.await??;
            }
            info!("Registered new profile {} ({})", username, uid);
        } else {
            info!("Logged in as {} ({})", username, uid);
        }

        let presence = PresenceTracker::new(store.clone(), scheduler.clone(), settings.idle_timeout);
        let reconciler = SubscriptionReconciler::start(remote.clone());
        let counters = spawn_counter_sync(
            reconciler.changes(),
            reconciler.mirrors(),
            store.clone(),
            scheduler.clone(),
        );

        Ok(Self {
            social: SocialActions::new(remote.clone()),
            ledger: PaymentLedger::new(&settings.payment_ledger_path),
            remote,
            settings,
            store,
            scheduler,
            presence,
            reconciler,
            counters,
        })
    }

    /// End the session: stop timers, write the offline profile under the
    /// departing identity, then drop all local state.
    pub async fn logout(self) -> Result<(), Rejection> {
        let username = self.username().await.unwrap_or_default();

        self.presence.handle(PresenceEvent::Terminate).await;
        let result = self.scheduler.flush_final().await;
        self.scheduler.cancel().await;
        self.reconciler.stop();
        self.counters.abort();
        self.store.lock().await.clear();

        info!("Logged out {}", username);
        result
    }

    /// Process shutdown: best-effort final write, state kept
    pub async fn terminate(&self) -> Result<(), Rejection> {
        self.presence.handle(PresenceEvent::Terminate).await;
        let result = self.scheduler.flush_final().await;
        if let Err(e) = &result {
            error!("Final sync failed: {}", e);
        }
        result
    }

    // ============ Accessors ============

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn social(&self) -> &SocialActions {
        &self.social
    }

    pub async fn user(&self) -> Option<UserState> {
        self.store.lock().await.user().cloned()
    }

    pub async fn username(&self) -> Option<String> {
        self.store.lock().await.active_username().map(str::to_string)
    }

    pub async fn maps(&self) -> Option<UserMaps> {
        self.store.lock().await.active_maps().cloned()
    }

    pub async fn coupons(&self) -> Vec<Coupon> {
        self.store.lock().await.coupons().to_vec()
    }

    pub async fn cart(&self) -> Vec<CartItem> {
        self.store.lock().await.cart().to_vec()
    }

    pub async fn blocked_users(&self) -> BTreeSet<String> {
        self.store.lock().await.blocked_users().clone()
    }

    pub async fn snapshot(&self) -> Option<ProfileDocument> {
        self.store.lock().await.snapshot()
    }

    pub async fn presence(&self) -> Presence {
        self.presence.state().await
    }

    pub async fn mirrors(&self) -> RwLockReadGuard<'_, Mirrors> {
        self.reconciler.read().await
    }

    pub fn changes(&self) -> broadcast::Receiver<Collection> {
        self.reconciler.changes()
    }

    /// Fetch another user's library and avatar for viewing
    pub async fn view_profile(&self, username: &str) -> Result<Option<UserMaps>> {
        if let Some(maps) = self.store.lock().await.maps_for(username) {
            return Ok(Some(maps.clone()));
        }

        let hits = self
            .remote
            .query(Collection::Users, &[FieldFilter::eq("username", username)])
            .await?;
        let Some(doc) = hits.into_iter().next() else {
            return Ok(None);
        };
        let profile = ProfileDocument::from_value(&doc.id, doc.data)?;
        self.store
            .lock()
            .await
            .cache_foreign_maps(username, profile.maps.clone());
        Ok(Some(profile.maps))
    }

    pub async fn presence_event(&self, event: PresenceEvent) -> Presence {
        self.presence.handle(event).await
    }

    // ============ Economy ============

    pub async fn award_points(&self, amount: i64, now: DateTime<Utc>) -> Result<i64, Rejection> {
        self.mutate(&[DirtyField::Points], |parts| {
            Ok(economy::award_points(parts.user, amount, now))
        })
        .await
    }

    pub async fn claim_daily_points(&self, now: DateTime<Utc>) -> Result<i64, Rejection> {
        self.mutate(&[DirtyField::Points], |parts| {
            economy::claim_daily_points(parts.user, now)
        })
        .await
    }

    pub async fn spin_for_coupon(&self, consent: EvictionConsent) -> Result<SpinOutcome, Rejection> {
        let (roll, coupon_id) = {
            let mut rng = rand::rng();
            (
                rng.random_range(0.0..100.0),
                format!("cpn-{:016x}", rng.random::<u64>()),
            )
        };

        let outcome = self
            .mutate(&[DirtyField::Points, DirtyField::Coupons], |parts| {
                economy::spin_for_coupon(parts.user, parts.coupons, consent, roll, coupon_id)
            })
            .await?;
        info!("Spin won a ${} coupon", outcome.coupon.value);
        Ok(outcome)
    }

    pub async fn unlock_item(&self, item_id: &str, cost: i64) -> Result<bool, Rejection> {
        self.mutate(&[DirtyField::Points, DirtyField::UnlockedItems], |parts| {
            economy::unlock_item(parts.user, parts.maps, item_id, cost)
        })
        .await
    }

    /// Grant the periodic membership reward if one is due
    pub async fn membership_tick(&self, now: DateTime<Utc>) -> Result<Option<i64>, Rejection> {
        let reward = self
            .store
            .lock()
            .await
            .mutate_if_changed(&[DirtyField::Points, DirtyField::Membership], |parts| {
                economy::membership_reward_tick(parts.user, now)
            })?;
        if let Some(points) = reward {
            info!("Membership reward: {} points", points);
            self.scheduler.mark_dirty().await;
        }
        Ok(reward)
    }

    // ============ Books ============

    /// Publish a new chapter, within the daily cap. The slot is reserved
    /// before the write and handed back if the write fails.
    pub async fn publish_chapter(
        &self,
        book_id: &str,
        title: &str,
        now: DateTime<Utc>,
    ) -> Result<u32, Rejection> {
        self.book(book_id).await?;

        self.mutate(&[DirtyField::ChapterQuota], |parts| {
            economy::can_publish_chapter(parts.user, now)?;
            economy::record_chapter_publish(parts.user, now);
            Ok(())
        })
        .await?;

        match self.social.publish_chapter(book_id, title, now).await {
            Ok(index) => Ok(index),
            Err(e) => {
                warn!("Publishing to {} failed, releasing the slot: {}", book_id, e);
                self.mutate(&[DirtyField::ChapterQuota], |parts| {
                    parts.user.daily_chapters_published =
                        parts.user.daily_chapters_published.saturating_sub(1);
                    Ok(())
                })
                .await?;
                Err(Rejection::RemoteWriteFailed(e.to_string()))
            }
        }
    }

    pub async fn check_monetization_eligibility(
        &self,
        book_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Eligibility, Rejection> {
        let book = self.book(book_id).await?;
        Ok(economy::monetization_eligibility(&book, now))
    }

    /// Submit a monetization request when the book qualifies. The returned
    /// report lists what is missing otherwise.
    pub async fn request_monetization(
        &self,
        book_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Eligibility, Rejection> {
        self.book(book_id).await?;
        self.social
            .request_monetization(book_id, now)
            .await
            .map_err(|e| Rejection::RemoteWriteFailed(e.to_string()))
    }

    async fn book(&self, book_id: &str) -> Result<Book, Rejection> {
        self.reconciler
            .read()
            .await
            .book(book_id)
            .cloned()
            .ok_or_else(|| Rejection::UnknownBook(book_id.to_string()))
    }

    // ============ Library ============

    pub async fn add_to_library(&self, book_id: &str) -> Result<bool, Rejection> {
        let added = self.store.lock().await.add_to_library(book_id)?;
        let _ = self.scheduler.flush_now().await;
        Ok(added)
    }

    pub async fn remove_from_library(&self, book_id: &str) -> Result<bool, Rejection> {
        let removed = self.store.lock().await.remove_from_library(book_id)?;
        let _ = self.scheduler.flush_now().await;
        Ok(removed)
    }

    pub async fn update_book_progress(
        &self,
        book_id: &str,
        scroll_progress: f64,
        chapter_index: u32,
        now: DateTime<Utc>,
    ) -> Result<BookProgress, Rejection> {
        let progress = self
            .store
            .lock()
            .await
            .update_book_progress(book_id, scroll_progress, chapter_index, now)?;
        self.scheduler.mark_dirty().await;
        Ok(progress)
    }

    // ============ Profile ============

    pub async fn set_avatar_config(&self, config: AvatarConfig) -> Result<(), Rejection> {
        self.store.lock().await.set_avatar_config(config)?;
        self.scheduler.mark_dirty().await;
        Ok(())
    }

    pub async fn set_display_name(&self, display_name: &str) -> Result<(), Rejection> {
        self.store.lock().await.set_display_name(display_name)?;
        self.scheduler.mark_dirty().await;
        Ok(())
    }

    // ============ Social ============

    pub async fn toggle_admire(&self, target: &str, now: DateTime<Utc>) -> Result<AdmireOutcome, Rejection> {
        let me = {
            let store = self.store.lock().await;
            let me = store
                .active_username()
                .ok_or(Rejection::NoActiveSession)?
                .to_string();
            if store.is_blocked(target) {
                return Err(Rejection::UserBlocked(target.to_string()));
            }
            me
        };
        if me == target {
            return Ok(AdmireOutcome::Dropped);
        }

        let admiring = self.reconciler.read().await.is_admiring(&me, target);
        Ok(self.social.toggle_admire(&me, target, admiring, now))
    }

    /// Block a user and cut every admire edge between the two of you
    pub async fn block_user(&self, username: &str) -> Result<bool, Rejection> {
        let (me, added) = {
            let mut store = self.store.lock().await;
            let added = store.block_user(username)?;
            (store.active_username().unwrap_or_default().to_string(), added)
        };
        self.scheduler.mark_dirty().await;

        let social = self.social.clone();
        let other = username.to_string();
        tokio::spawn(async move {
            if let Err(e) = social.remove_relationships_between(&me, &other).await {
                warn!("Could not remove relationships between {} and {}: {}", me, other, e);
            }
        });
        Ok(added)
    }

    pub async fn unblock_user(&self, username: &str) -> Result<bool, Rejection> {
        let removed = self.store.lock().await.unblock_user(username)?;
        self.scheduler.mark_dirty().await;
        Ok(removed)
    }

    // ============ Cart ============

    pub async fn add_to_cart(&self, item: CartItem) -> Result<bool, Rejection> {
        let added = self.store.lock().await.add_to_cart(item)?;
        self.scheduler.mark_dirty().await;
        Ok(added)
    }

    pub async fn remove_from_cart(&self, book_id: &str) -> Result<bool, Rejection> {
        let removed = self.store.lock().await.remove_from_cart(book_id)?;
        self.scheduler.mark_dirty().await;
        Ok(removed)
    }

    pub async fn clear_cart(&self) -> Result<(), Rejection> {
        self.store.lock().await.clear_cart()?;
        self.scheduler.mark_dirty().await;
        Ok(())
    }

    // ============ Payments ============

    /// Record a cart checkout before handing off to the processor
    pub async fn begin_book_checkout(
        &self,
        coupon_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<PendingPayment> {
        let (items, coupon_value) = {
            let store = self.store.lock().await;
            if store.user().is_none() {
                return Err(Rejection::NoActiveSession.into());
            }
            let coupon_value = coupon_id.and_then(|id| {
                coupon::unused(store.coupons())
                    .find(|c| c.id == id)
                    .map(|c| c.value)
            });
            (store.cart().to_vec(), coupon_value)
        };
        if items.is_empty() {
            bail!("cart is empty");
        }

        let pending = PendingPayment {
            kind: PaymentKind::BookPurchase {
                book_ids: items.iter().map(|i| i.id.clone()).collect(),
            },
            amount_cents: cart::total_cents(&items, coupon_value),
            coupon_id: coupon_value.and(coupon_id.map(str::to_string)),
            created_at: now,
        };
        self.ledger.save(&pending).await?;
        Ok(pending)
    }

    pub async fn begin_points_purchase(
        &self,
        points: i64,
        amount_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<PendingPayment> {
        self.begin_payment(PaymentKind::PointsPack { points }, amount_cents, now)
            .await
    }

    pub async fn begin_membership_purchase(
        &self,
        amount_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<PendingPayment> {
        self.begin_payment(PaymentKind::Membership, amount_cents, now).await
    }

    async fn begin_payment(
        &self,
        kind: PaymentKind,
        amount_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<PendingPayment> {
        if self.store.lock().await.user().is_none() {
            return Err(Rejection::NoActiveSession.into());
        }
        let pending = PendingPayment {
            kind,
            amount_cents,
            coupon_id: None,
            created_at: now,
        };
        self.ledger.save(&pending).await?;
        Ok(pending)
    }

    /// Apply the processor's verdict to whatever was pending
    pub async fn complete_payment(
        &self,
        outcome: PaymentOutcome,
        now: DateTime<Utc>,
    ) -> Result<Option<PaymentKind>> {
        let Some(pending) = self.ledger.take().await? else {
            warn!("Payment return without a pending payment");
            return Ok(None);
        };
        if outcome == PaymentOutcome::Cancelled {
            info!("Payment cancelled ({:?})", pending.kind);
            return Ok(None);
        }

        let fields = [
            DirtyField::Library,
            DirtyField::Coupons,
            DirtyField::Cart,
            DirtyField::Points,
            DirtyField::Membership,
        ];
        self.store.lock().await.mutate(&fields, |parts| {
            match &pending.kind {
                PaymentKind::BookPurchase { book_ids } => {
                    for id in book_ids {
                        parts.maps.owned_book_ids.insert(id.clone());
                        parts.maps.purchased_book_ids.insert(id.clone());
                    }
                    if let Some(coupon_id) = &pending.coupon_id {
                        economy::redeem_coupon(parts.coupons, coupon_id);
                    }
                    parts.cart.retain(|item| !book_ids.contains(&item.id));
                }
                PaymentKind::PointsPack { points } => {
                    economy::credit_purchased_points(parts.user, *points);
                }
                PaymentKind::Membership => economy::activate_membership(parts.user, now),
            }
            Ok(())
        })?;
        let _ = self.scheduler.flush_now().await;

        info!("Payment applied: {:?}", pending.kind);
        Ok(Some(pending.kind))
    }

    async fn mutate<R>(
        &self,
        fields: &[DirtyField],
        f: impl FnOnce(ActiveParts<'_>) -> Result<R, Rejection>,
    ) -> Result<R, Rejection> {
        let result = self.store.lock().await.mutate(fields, f);
        if result.is_ok() {
            self.scheduler.mark_dirty().await;
        }
        result
    }
}

/// Keep the profile's admire counters in line with the relationship mirror
fn spawn_counter_sync(
    mut changes: broadcast::Receiver<Collection>,
    mirrors: Arc<RwLock<Mirrors>>,
    store: Arc<Mutex<LocalStore>>,
    scheduler: SyncScheduler,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(Collection::Relationships) | Err(RecvError::Lagged(_)) => {}
                Ok(_) => continue,
                Err(RecvError::Closed) => break,
            }

            let changed = {
                let mirrors = mirrors.read().await;
                let mut store = store.lock().await;
                let Some(username) = store.active_username().map(str::to_string) else {
                    continue;
                };
                store
                    .set_social_counts(mirrors.social_counts(&username))
                    .unwrap_or(false)
            };
            if changed {
                scheduler.mark_dirty().await;
            }
        }
    })
}
