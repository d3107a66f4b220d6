// Local state store
// Optimistic, per-session tree for the authenticated user. Every mutation records which
// fields it touched so the sync scheduler can see it.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};

use crate::error::Rejection;
use crate::models::cart::CartItem;
use crate::models::coupon::Coupon;
use crate::models::library::{AvatarConfig, BookProgress, UserMaps};
use crate::models::social::SocialCounts;
use crate::models::user::{ProfileDocument, UserState};

/// Groups of profile fields tracked for batched writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DirtyField {
    Points,
    Profile,
    Membership,
    ChapterQuota,
    Presence,
    SocialCounters,
    Avatar,
    UnlockedItems,
    Library,
    BookProgress,
    ReadingActivity,
    BlockedUsers,
    Coupons,
    Cart,
}

/// Mutable view over the active user's data, handed to economy rules
pub struct ActiveParts<'a> {
    pub user: &'a mut UserState,
    pub maps: &'a mut UserMaps,
    pub coupons: &'a mut Vec<Coupon>,
    pub cart: &'a mut Vec<CartItem>,
    pub blocked_users: &'a mut BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct LocalStore {
    user: Option<UserState>,
    maps: HashMap<String, UserMaps>,
    coupons: Vec<Coupon>,
    cart: Vec<CartItem>,
    blocked_users: BTreeSet<String>,
    dirty: BTreeSet<DirtyField>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the session from a profile document (remote copy or defaults)
    pub fn hydrate(&mut self, doc: ProfileDocument) {
        let ProfileDocument {
            user,
            maps,
            coupons,
            cart,
            blocked_users,
        } = doc;

        self.maps.insert(user.username.clone(), maps);
        self.user = Some(user);
        self.coupons = coupons;
        self.cart = cart;
        self.blocked_users = blocked_users;
        self.dirty.clear();
    }

    /// Drop everything held for the session
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    // ============ Read accessors ============

    pub fn user(&self) -> Option<&UserState> {
        self.user.as_ref()
    }

    pub fn active_username(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.username.as_str())
    }

    pub fn active_maps(&self) -> Option<&UserMaps> {
        self.maps.get(self.active_username()?)
    }

    /// Maps for any username held in memory, the active user's included
    pub fn maps_for(&self, username: &str) -> Option<&UserMaps> {
        self.maps.get(username)
    }

    pub fn coupons(&self) -> &[Coupon] {
        &self.coupons
    }

    pub fn cart(&self) -> &[CartItem] {
        &self.cart
    }

    pub fn blocked_users(&self) -> &BTreeSet<String> {
        &self.blocked_users
    }

    pub fn is_blocked(&self, username: &str) -> bool {
        self.blocked_users.contains(username)
    }

    /// Full profile document for the active user
    pub fn snapshot(&self) -> Option<ProfileDocument> {
        let user = self.user.clone()?;
        let maps = self.maps.get(&user.username).cloned().unwrap_or_default();
        Some(ProfileDocument {
            user,
            maps,
            coupons: self.coupons.clone(),
            cart: self.cart.clone(),
            blocked_users: self.blocked_users.clone(),
        })
    }

    // ============ Dirty tracking ============

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn dirty_fields(&self) -> &BTreeSet<DirtyField> {
        &self.dirty
    }

    pub fn take_dirty(&mut self) -> BTreeSet<DirtyField> {
        std::mem::take(&mut self.dirty)
    }

    pub fn forget_dirty(&mut self) {
        self.dirty.clear();
    }

    /// Mark a field dirty without changing it, so the next write carries it
    pub fn touch(&mut self, field: DirtyField) -> Result<(), Rejection> {
        if self.user.is_none() {
            return Err(Rejection::NoActiveSession);
        }
        self.dirty.insert(field);
        Ok(())
    }

    // ============ Mutators ============

    /// Run `f` over the active user's data. The listed fields are marked dirty
    /// only when `f` succeeds, so rejections leave no trace.
    pub fn mutate<R>(
        &mut self,
        fields: &[DirtyField],
        f: impl FnOnce(ActiveParts<'_>) -> Result<R, Rejection>,
    ) -> Result<R, Rejection> {
        let user = self.user.as_mut().ok_or(Rejection::NoActiveSession)?;
        let maps = self.maps.entry(user.username.clone()).or_default();

        let result = f(ActiveParts {
            user,
            maps,
            coupons: &mut self.coupons,
            cart: &mut self.cart,
            blocked_users: &mut self.blocked_users,
        })?;

        self.dirty.extend(fields.iter().copied());
        Ok(result)
    }

    /// Like `mutate`, for rules that usually find nothing to do. Fields are
    /// marked dirty only when `f` returns `Some`.
    pub fn mutate_if_changed<R>(
        &mut self,
        fields: &[DirtyField],
        f: impl FnOnce(ActiveParts<'_>) -> Option<R>,
    ) -> Result<Option<R>, Rejection> {
        let changed = self.mutate(&[], |parts| Ok(f(parts)))?;
        if changed.is_some() {
            self.dirty.extend(fields.iter().copied());
        }
        Ok(changed)
    }

    /// Cache another user's maps for viewing. Never dirty-tracked, and never
    /// allowed to overwrite the active user's entry.
    pub fn cache_foreign_maps(&mut self, username: &str, maps: UserMaps) {
        if self.active_username() == Some(username) {
            return;
        }
        self.maps.insert(username.to_string(), maps);
    }

    /// Returns true if the book was not already in the library
    pub fn add_to_library(&mut self, book_id: &str) -> Result<bool, Rejection> {
        self.mutate(&[DirtyField::Library], |parts| {
            let owned = parts.maps.owned_book_ids.insert(book_id.to_string());
            let purchased = parts.maps.purchased_book_ids.insert(book_id.to_string());
            Ok(owned || purchased)
        })
    }

    /// Hide a book from the library view. Purchases are kept so access survives.
    pub fn remove_from_library(&mut self, book_id: &str) -> Result<bool, Rejection> {
        self.mutate(&[DirtyField::Library], |parts| {
            Ok(parts.maps.owned_book_ids.remove(book_id))
        })
    }

    pub fn update_book_progress(
        &mut self,
        book_id: &str,
        scroll_progress: f64,
        chapter_index: u32,
        now: DateTime<Utc>,
    ) -> Result<BookProgress, Rejection> {
        self.mutate(
            &[DirtyField::BookProgress, DirtyField::ReadingActivity],
            |parts| {
                let scroll = if scroll_progress.is_finite() {
                    scroll_progress.clamp(0.0, 100.0)
                } else {
                    0.0
                };
                let progress = BookProgress {
                    scroll_progress: scroll,
                    chapter_index,
                };
                parts
                    .maps
                    .book_progress
                    .insert(book_id.to_string(), progress.clone());
                parts.maps.record_activity(book_id, chapter_index, now);
                Ok(progress)
            },
        )
    }

    pub fn set_avatar_config(&mut self, config: AvatarConfig) -> Result<(), Rejection> {
        self.mutate(&[DirtyField::Avatar], |parts| {
            parts.maps.avatar_config = config;
            Ok(())
        })
    }

    pub fn set_display_name(&mut self, display_name: &str) -> Result<(), Rejection> {
        self.mutate(&[DirtyField::Profile], |parts| {
            parts.user.display_name = display_name.trim().to_string();
            Ok(())
        })
    }

    /// Cart is unique by book id; returns false for a duplicate
    pub fn add_to_cart(&mut self, item: CartItem) -> Result<bool, Rejection> {
        self.mutate(&[DirtyField::Cart], |parts| {
            if parts.cart.iter().any(|i| i.id == item.id) {
                return Ok(false);
            }
            parts.cart.push(item);
            Ok(true)
        })
    }

    pub fn remove_from_cart(&mut self, book_id: &str) -> Result<bool, Rejection> {
        self.mutate(&[DirtyField::Cart], |parts| {
            let before = parts.cart.len();
            parts.cart.retain(|i| i.id != book_id);
            Ok(parts.cart.len() != before)
        })
    }

    pub fn clear_cart(&mut self) -> Result<(), Rejection> {
        self.mutate(&[DirtyField::Cart], |parts| {
            parts.cart.clear();
            Ok(())
        })
    }

    pub fn block_user(&mut self, username: &str) -> Result<bool, Rejection> {
        self.mutate(&[DirtyField::BlockedUsers], |parts| {
            Ok(parts.blocked_users.insert(username.to_string()))
        })
    }

    pub fn unblock_user(&mut self, username: &str) -> Result<bool, Rejection> {
        self.mutate(&[DirtyField::BlockedUsers], |parts| {
            Ok(parts.blocked_users.remove(username))
        })
    }

    /// Returns true if the flag actually changed
    pub fn set_online(&mut self, online: bool) -> Result<bool, Rejection> {
        let user = self.user.as_mut().ok_or(Rejection::NoActiveSession)?;
        if user.is_online == online {
            return Ok(false);
        }
        user.is_online = online;
        self.dirty.insert(DirtyField::Presence);
        Ok(true)
    }

    /// Store derived admire counts; only marks dirty when they changed
    pub fn set_social_counts(&mut self, counts: SocialCounts) -> Result<bool, Rejection> {
        let user = self.user.as_mut().ok_or(Rejection::NoActiveSession)?;
        let current = SocialCounts {
            admirers: user.admirers_count,
            admiring: user.admiring_count,
            mutuals: user.mutuals_count,
        };
        if current == counts {
            return Ok(false);
        }
        user.admirers_count = counts.admirers;
        user.admiring_count = counts.admiring;
        user.mutuals_count = counts.mutuals;
        self.dirty.insert(DirtyField::SocialCounters);
        Ok(true)
    }
}
