// Application data store - async SQLite store with embedded authorization
//
// Every mutation checks authorization in its own body (owner-only updates,
// member-only posting) and every group read/write passes through
// Group::reconcile so no caller ever sees an invariant-violating record.

use anyhow::Result;
use chrono::Utc;
use lru::LruCache;
use sqlx::{sqlite::SqlitePool, Row};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::core::{normalize_timestamp_ms, Address, TxHash};
use crate::error::{AppError, AppResult};
use crate::onchain::splits::CollaboratorShare;
use crate::store::models::{
    AdministratorShare, BillingCadence, Comment, Course, CourseModule, Group,
    GroupSettingsUpdate, Lesson, Membership, Post, User, Visibility, MAX_DESCRIPTION_LEN,
    MAX_GROUP_NAME_LEN,
};

/// New groups start with a 30-day platform subscription window.
const DEFAULT_SUBSCRIPTION_DURATION_MS: i64 = 30 * 24 * 60 * 60 * 1000;

pub struct DataStore {
    pub pool: SqlitePool,
    group_cache: Arc<Mutex<LruCache<i64, Group>>>,
}

impl DataStore {
    pub async fn new(database_url: &str, cache_capacity: usize) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;
        let capacity = NonZeroUsize::new(cache_capacity.max(1)).unwrap();

        Ok(DataStore {
            pool,
            group_cache: Arc::new(Mutex::new(LruCache::new(capacity))),
        })
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                wallet_address TEXT NOT NULL UNIQUE,
                display_name TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS groups (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                short_description TEXT,
                description TEXT,
                about_url TEXT,
                thumbnail_url TEXT,
                gallery_urls TEXT NOT NULL DEFAULT '[]',
                owner_id INTEGER NOT NULL,
                visibility TEXT NOT NULL DEFAULT 'private',
                billing_cadence TEXT NOT NULL DEFAULT 'free',
                price REAL NOT NULL DEFAULT 0,
                member_count INTEGER NOT NULL DEFAULT 1,
                tags TEXT NOT NULL DEFAULT '[]',
                subscription_id TEXT,
                ends_on INTEGER
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_groups (
                user_id INTEGER NOT NULL,
                group_id INTEGER NOT NULL,
                pass_expires_at INTEGER,
                has_active_pass INTEGER,
                join_tx_hash TEXT,
                joined_at INTEGER NOT NULL,
                UNIQUE(user_id, group_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        // Survives membership deletion so a returning holder of an unexpired
        // pass can rejoin without repaying even when the chain read fails.
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS pass_cache (
                user_id INTEGER NOT NULL,
                group_id INTEGER NOT NULL,
                pass_expires_at INTEGER,
                UNIQUE(user_id, group_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS administrators (
                group_id INTEGER NOT NULL,
                wallet_address TEXT NOT NULL,
                share_bps INTEGER NOT NULL,
                UNIQUE(group_id, wallet_address)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS courses (
                id INTEGER PRIMARY KEY,
                group_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                thumbnail_url TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS course_modules (
                id INTEGER PRIMARY KEY,
                course_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                position INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS lessons (
                id INTEGER PRIMARY KEY,
                module_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                video_url TEXT,
                position INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY,
                group_id INTEGER NOT NULL,
                author_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS comments (
                id INTEGER PRIMARY KEY,
                post_id INTEGER NOT NULL,
                author_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_wallet ON users(wallet_address)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_groups_owner ON groups(owner_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_groups_subscription ON groups(subscription_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_user_groups_user ON user_groups(user_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_user_groups_group ON user_groups(group_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_group ON posts(group_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Users

    pub async fn ensure_user(&self, wallet: &Address) -> AppResult<User> {
        if let Some(user) = self.get_user_by_wallet(wallet).await? {
            return Ok(user);
        }

        let result = sqlx::query("INSERT INTO users (wallet_address) VALUES (?)")
            .bind(wallet.as_str())
            .execute(&self.pool)
            .await?;

        Ok(User {
            id: result.last_insert_rowid(),
            wallet_address: wallet.clone(),
            display_name: None,
        })
    }

    pub async fn get_user_by_wallet(&self, wallet: &Address) -> AppResult<Option<User>> {
        let row = sqlx::query(
            "SELECT id, wallet_address, display_name FROM users WHERE wallet_address = ?",
        )
        .bind(wallet.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(user_from_row).transpose()
    }

    pub async fn require_user_by_wallet(&self, wallet: &Address) -> AppResult<User> {
        self.get_user_by_wallet(wallet)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No user for wallet {}", wallet)))
    }

    pub async fn get_user(&self, id: i64) -> AppResult<Option<User>> {
        let row =
            sqlx::query("SELECT id, wallet_address, display_name FROM users WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(user_from_row).transpose()
    }

    // ------------------------------------------------------------------
    // Groups

    /// Create a community. The owner becomes the sole member and the platform
    /// subscription window opens for 30 days.
    pub async fn create_group(
        &self,
        owner_wallet: &Address,
        name: &str,
        description: Option<&str>,
    ) -> AppResult<Group> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("name is required".to_string()));
        }
        if name.len() > MAX_GROUP_NAME_LEN {
            return Err(AppError::Validation(format!(
                "name cannot be longer than {} characters",
                MAX_GROUP_NAME_LEN
            )));
        }

        let owner = self.ensure_user(owner_wallet).await?;
        let now = Utc::now().timestamp_millis();

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO groups (name, description, owner_id, ends_on, price, member_count)
             VALUES (?, ?, ?, ?, 0, 1)",
        )
        .bind(name)
        .bind(description)
        .bind(owner.id)
        .bind(now + DEFAULT_SUBSCRIPTION_DURATION_MS)
        .execute(&mut *tx)
        .await?;

        let group_id = result.last_insert_rowid();

        sqlx::query("INSERT INTO user_groups (user_id, group_id, joined_at) VALUES (?, ?, ?)")
            .bind(owner.id)
            .bind(group_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        self.get_group(group_id)
            .await?
            .ok_or_else(|| AppError::Internal("group vanished after insert".to_string()))
    }

    pub async fn get_group(&self, id: i64) -> AppResult<Option<Group>> {
        {
            let mut cache = self.group_cache.lock().await;
            if let Some(group) = cache.get(&id).cloned() {
                return Ok(Some(group));
            }
        }

        let row = sqlx::query(GROUP_COLUMNS_QUERY)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            let group = group_from_row(row)?;
            self.group_cache
                .lock()
                .await
                .put(id, group.clone());
            Ok(Some(group))
        } else {
            Ok(None)
        }
    }

    pub async fn require_group(&self, id: i64) -> AppResult<Group> {
        self.get_group(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Group not found".to_string()))
    }

    /// Load the group and verify the caller owns it.
    pub async fn require_owner(&self, group_id: i64, wallet: &Address) -> AppResult<Group> {
        let group = self.require_group(group_id).await?;
        let owner = self.require_user_by_wallet(wallet).await?;
        if group.owner_id != owner.id {
            return Err(AppError::Forbidden(
                "Only the group owner can perform this action".to_string(),
            ));
        }
        Ok(group)
    }

    pub async fn list_all_groups(&self) -> AppResult<Vec<Group>> {
        let rows = sqlx::query(
            "SELECT id, name, short_description, description, about_url, thumbnail_url,
                    gallery_urls, owner_id, visibility, billing_cadence, price, member_count,
                    tags, subscription_id, ends_on
             FROM groups ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(group_from_row).collect()
    }

    pub async fn list_groups_for_member(&self, wallet: &Address) -> AppResult<Vec<Group>> {
        let user = match self.get_user_by_wallet(wallet).await? {
            Some(user) => user,
            None => return Ok(Vec::new()),
        };

        let group_ids: Vec<i64> =
            sqlx::query("SELECT group_id FROM user_groups WHERE user_id = ? ORDER BY joined_at")
                .bind(user.id)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .map(|row| row.get::<i64, _>(0))
                .collect();

        let mut groups = Vec::new();
        for group_id in group_ids {
            if let Some(group) = self.get_group(group_id).await? {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    pub async fn get_members(&self, group_id: i64) -> AppResult<Vec<User>> {
        let rows = sqlx::query(
            "SELECT u.id, u.wallet_address, u.display_name
             FROM user_groups ug JOIN users u ON u.id = ug.user_id
             WHERE ug.group_id = ? ORDER BY ug.joined_at",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(user_from_row).collect()
    }

    pub async fn get_membership(
        &self,
        group_id: i64,
        wallet: &Address,
    ) -> AppResult<Option<Membership>> {
        let user = match self.get_user_by_wallet(wallet).await? {
            Some(user) => user,
            None => return Ok(None),
        };

        let row = sqlx::query(
            "SELECT user_id, group_id, pass_expires_at, has_active_pass, join_tx_hash, joined_at
             FROM user_groups WHERE group_id = ? AND user_id = ?",
        )
        .bind(group_id)
        .bind(user.id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(membership_from_row))
    }

    /// Best-known pass expiry for a wallet that may no longer be a member.
    pub async fn get_cached_pass_expiry(
        &self,
        group_id: i64,
        wallet: &Address,
    ) -> AppResult<Option<i64>> {
        let user = match self.get_user_by_wallet(wallet).await? {
            Some(user) => user,
            None => return Ok(None),
        };

        let row = sqlx::query(
            "SELECT pass_expires_at FROM pass_cache WHERE group_id = ? AND user_id = ?",
        )
        .bind(group_id)
        .bind(user.id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|r| r.get::<Option<i64>, _>(0)))
    }

    pub async fn update_group_name(
        &self,
        group_id: i64,
        owner_wallet: &Address,
        name: &str,
    ) -> AppResult<()> {
        self.require_owner(group_id, owner_wallet).await?;

        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("name is required".to_string()));
        }
        if name.len() > MAX_GROUP_NAME_LEN {
            return Err(AppError::Validation(format!(
                "name cannot be longer than {} characters",
                MAX_GROUP_NAME_LEN
            )));
        }

        sqlx::query("UPDATE groups SET name = ? WHERE id = ?")
            .bind(name)
            .bind(group_id)
            .execute(&self.pool)
            .await?;

        self.invalidate_group(group_id).await;
        Ok(())
    }

    pub async fn update_group_description(
        &self,
        group_id: i64,
        owner_wallet: &Address,
        description: &str,
    ) -> AppResult<()> {
        self.require_owner(group_id, owner_wallet).await?;

        let description = description.trim();
        if description.is_empty() {
            return Err(AppError::Validation("Description is required".to_string()));
        }
        if description.len() > MAX_DESCRIPTION_LEN {
            return Err(AppError::Validation("Description is too long".to_string()));
        }

        sqlx::query("UPDATE groups SET description = ? WHERE id = ?")
            .bind(description)
            .bind(group_id)
            .execute(&self.pool)
            .await?;

        self.invalidate_group(group_id).await;
        Ok(())
    }

    /// Apply an owner-submitted settings payload. Returns the reconciled
    /// group and the cleaned collaborator list so the caller can re-register
    /// the payout split with the course registrar.
    pub async fn update_group_settings(
        &self,
        group_id: i64,
        owner_wallet: &Address,
        update: &GroupSettingsUpdate,
    ) -> AppResult<(Group, Vec<CollaboratorShare>)> {
        let group = self.require_owner(group_id, owner_wallet).await?;
        let collaborators = update.validate(owner_wallet)?;

        // Run the raw payload through the same reconciliation as reads.
        let reconciled = Group {
            short_description: update
                .short_description
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            about_url: update
                .about_url
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            thumbnail_url: update.thumbnail_url.clone().filter(|s| !s.is_empty()),
            gallery_urls: update.gallery_urls.clone(),
            visibility: update.visibility,
            billing_cadence: update.billing_cadence,
            price: update.price,
            tags: update.tags.clone(),
            ..group
        }
        .reconcile();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE groups SET short_description = ?, about_url = ?, thumbnail_url = ?,
                    gallery_urls = ?, tags = ?, visibility = ?, billing_cadence = ?, price = ?
             WHERE id = ?",
        )
        .bind(&reconciled.short_description)
        .bind(&reconciled.about_url)
        .bind(&reconciled.thumbnail_url)
        .bind(serde_json::to_string(&reconciled.gallery_urls).unwrap_or_else(|_| "[]".into()))
        .bind(serde_json::to_string(&reconciled.tags).unwrap_or_else(|_| "[]".into()))
        .bind(reconciled.visibility.as_str())
        .bind(reconciled.billing_cadence.as_str())
        .bind(reconciled.price)
        .bind(group_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM administrators WHERE group_id = ?")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;

        for entry in &collaborators {
            sqlx::query(
                "INSERT INTO administrators (group_id, wallet_address, share_bps) VALUES (?, ?, ?)",
            )
            .bind(group_id)
            .bind(entry.wallet_address.as_str())
            .bind(entry.share_bps as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.invalidate_group(group_id).await;

        Ok((reconciled, collaborators))
    }

    pub async fn administrators(&self, group_id: i64) -> AppResult<Vec<AdministratorShare>> {
        let rows = sqlx::query(
            "SELECT group_id, wallet_address, share_bps FROM administrators WHERE group_id = ?",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(AdministratorShare {
                    group_id: row.get("group_id"),
                    wallet_address: Address::parse(row.get::<String, _>("wallet_address").as_str())
                        .map_err(AppError::from)?,
                    share_bps: row.get::<i64, _>("share_bps") as u32,
                })
            })
            .collect()
    }

    /// Webhook-driven: record the subscription id and extend the window.
    pub async fn update_subscription(
        &self,
        group_id: i64,
        subscription_id: &str,
        ends_on: i64,
    ) -> AppResult<()> {
        ensure_valid_ends_on(ends_on)?;

        sqlx::query("UPDATE groups SET subscription_id = ?, ends_on = ? WHERE id = ?")
            .bind(subscription_id)
            .bind(normalize_timestamp_ms(ends_on))
            .bind(group_id)
            .execute(&self.pool)
            .await?;

        self.invalidate_group(group_id).await;
        Ok(())
    }

    /// Webhook-driven variant keyed by subscription id.
    pub async fn update_subscription_by_id(
        &self,
        subscription_id: &str,
        ends_on: i64,
    ) -> AppResult<()> {
        ensure_valid_ends_on(ends_on)?;

        let row = sqlx::query("SELECT id FROM groups WHERE subscription_id = ?")
            .bind(subscription_id)
            .fetch_optional(&self.pool)
            .await?;

        let group_id: i64 = row
            .map(|r| r.get(0))
            .ok_or_else(|| {
                AppError::NotFound(format!("No group for subscription {}", subscription_id))
            })?;

        sqlx::query("UPDATE groups SET ends_on = ? WHERE id = ?")
            .bind(normalize_timestamp_ms(ends_on))
            .bind(group_id)
            .execute(&self.pool)
            .await?;

        self.invalidate_group(group_id).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Membership

    /// Create or confirm a membership record. Idempotent per (user, group):
    /// rejoining refreshes the cached pass fields instead of inserting a
    /// duplicate. Assumes any required on-chain settlement already succeeded.
    pub async fn join_group(
        &self,
        group_id: i64,
        member_wallet: &Address,
        tx_hash: Option<&TxHash>,
        has_active_pass: bool,
        pass_expires_at: Option<i64>,
    ) -> AppResult<Membership> {
        self.require_group(group_id).await?;
        let user = self.ensure_user(member_wallet).await?;
        let now = Utc::now().timestamp_millis();
        let pass_expires_at = pass_expires_at.map(normalize_timestamp_ms);

        let existing = sqlx::query(
            "SELECT user_id FROM user_groups WHERE group_id = ? AND user_id = ?",
        )
        .bind(group_id)
        .bind(user.id)
        .fetch_optional(&self.pool)
        .await?;

        let mut tx = self.pool.begin().await?;

        if existing.is_some() {
            sqlx::query(
                "UPDATE user_groups SET pass_expires_at = ?, has_active_pass = ?, join_tx_hash = ?
                 WHERE group_id = ? AND user_id = ?",
            )
            .bind(pass_expires_at)
            .bind(has_active_pass)
            .bind(tx_hash.map(|h| h.as_str().to_string()))
            .bind(group_id)
            .bind(user.id)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                "INSERT INTO user_groups (user_id, group_id, pass_expires_at, has_active_pass, join_tx_hash, joined_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(user.id)
            .bind(group_id)
            .bind(pass_expires_at)
            .bind(has_active_pass)
            .bind(tx_hash.map(|h| h.as_str().to_string()))
            .bind(now)
            .execute(&mut *tx)
            .await?;

            sqlx::query("UPDATE groups SET member_count = member_count + 1 WHERE id = ?")
                .bind(group_id)
                .execute(&mut *tx)
                .await?;
        }

        if pass_expires_at.is_some() {
            sqlx::query(
                "INSERT OR REPLACE INTO pass_cache (user_id, group_id, pass_expires_at) VALUES (?, ?, ?)",
            )
            .bind(user.id)
            .bind(group_id)
            .bind(pass_expires_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.invalidate_group(group_id).await;

        Ok(Membership {
            user_id: user.id,
            group_id,
            pass_expires_at,
            has_active_pass: Some(has_active_pass),
            join_tx_hash: tx_hash.map(|h| h.as_str().to_string()),
            joined_at: now,
        })
    }

    /// Remove a membership. The best-known pass expiry is retained in the
    /// pass cache so an unexpired pass still allows rejoining without payment.
    pub async fn leave_group(
        &self,
        group_id: i64,
        member_wallet: &Address,
        pass_expires_at: Option<i64>,
    ) -> AppResult<()> {
        let group = self.require_group(group_id).await?;
        let user = self.require_user_by_wallet(member_wallet).await?;

        if group.owner_id == user.id {
            return Err(AppError::Validation(
                "The owner cannot leave their own group".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM user_groups WHERE group_id = ? AND user_id = ?")
            .bind(group_id)
            .bind(user.id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Membership not found".to_string()));
        }

        sqlx::query(
            "UPDATE groups SET member_count = MAX(member_count - 1, 1) WHERE id = ?",
        )
        .bind(group_id)
        .execute(&mut *tx)
        .await?;

        if let Some(expiry) = pass_expires_at {
            sqlx::query(
                "INSERT OR REPLACE INTO pass_cache (user_id, group_id, pass_expires_at) VALUES (?, ?, ?)",
            )
            .bind(user.id)
            .bind(group_id)
            .bind(normalize_timestamp_ms(expiry))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.invalidate_group(group_id).await;

        Ok(())
    }

    /// Owner-initiated deletion: cascades to memberships, administrator
    /// shares, classroom content and the feed in one transaction.
    pub async fn delete_group(&self, group_id: i64, owner_wallet: &Address) -> AppResult<()> {
        self.require_owner(group_id, owner_wallet).await?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM lessons WHERE module_id IN (
                SELECT m.id FROM course_modules m
                JOIN courses c ON c.id = m.course_id WHERE c.group_id = ?
            )",
        )
        .bind(group_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM course_modules WHERE course_id IN (
                SELECT id FROM courses WHERE group_id = ?
            )",
        )
        .bind(group_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM courses WHERE group_id = ?")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "DELETE FROM comments WHERE post_id IN (SELECT id FROM posts WHERE group_id = ?)",
        )
        .bind(group_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM posts WHERE group_id = ?")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM administrators WHERE group_id = ?")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM user_groups WHERE group_id = ?")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM pass_cache WHERE group_id = ?")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM groups WHERE id = ?")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        self.invalidate_group(group_id).await;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Classroom content

    pub async fn create_course(
        &self,
        group_id: i64,
        owner_wallet: &Address,
        title: &str,
        description: Option<&str>,
        thumbnail_url: Option<&str>,
    ) -> AppResult<Course> {
        self.require_owner(group_id, owner_wallet).await?;

        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("Course title is required".to_string()));
        }

        let result = sqlx::query(
            "INSERT INTO courses (group_id, title, description, thumbnail_url) VALUES (?, ?, ?, ?)",
        )
        .bind(group_id)
        .bind(title)
        .bind(description)
        .bind(thumbnail_url)
        .execute(&self.pool)
        .await?;

        Ok(Course {
            id: result.last_insert_rowid(),
            group_id,
            title: title.to_string(),
            description: description.map(|s| s.to_string()),
            thumbnail_url: thumbnail_url.map(|s| s.to_string()),
        })
    }

    pub async fn list_courses(&self, group_id: i64) -> AppResult<Vec<Course>> {
        let rows = sqlx::query(
            "SELECT id, group_id, title, description, thumbnail_url FROM courses
             WHERE group_id = ? ORDER BY id",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Course {
                id: row.get("id"),
                group_id: row.get("group_id"),
                title: row.get("title"),
                description: row.get("description"),
                thumbnail_url: row.get("thumbnail_url"),
            })
            .collect())
    }

    pub async fn delete_course(&self, course_id: i64, owner_wallet: &Address) -> AppResult<()> {
        let group_id = self.course_group_id(course_id).await?;
        self.require_owner(group_id, owner_wallet).await?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM lessons WHERE module_id IN (
                SELECT id FROM course_modules WHERE course_id = ?
            )",
        )
        .bind(course_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM course_modules WHERE course_id = ?")
            .bind(course_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM courses WHERE id = ?")
            .bind(course_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn create_module(
        &self,
        course_id: i64,
        owner_wallet: &Address,
        title: &str,
    ) -> AppResult<CourseModule> {
        let group_id = self.course_group_id(course_id).await?;
        self.require_owner(group_id, owner_wallet).await?;

        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("Module title is required".to_string()));
        }

        let position: i64 = sqlx::query(
            "SELECT COALESCE(MAX(position), -1) + 1 FROM course_modules WHERE course_id = ?",
        )
        .bind(course_id)
        .fetch_one(&self.pool)
        .await?
        .get(0);

        let result = sqlx::query(
            "INSERT INTO course_modules (course_id, title, position) VALUES (?, ?, ?)",
        )
        .bind(course_id)
        .bind(title)
        .bind(position)
        .execute(&self.pool)
        .await?;

        Ok(CourseModule {
            id: result.last_insert_rowid(),
            course_id,
            title: title.to_string(),
            position,
        })
    }

    pub async fn list_modules(&self, course_id: i64) -> AppResult<Vec<CourseModule>> {
        let rows = sqlx::query(
            "SELECT id, course_id, title, position FROM course_modules
             WHERE course_id = ? ORDER BY position",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| CourseModule {
                id: row.get("id"),
                course_id: row.get("course_id"),
                title: row.get("title"),
                position: row.get("position"),
            })
            .collect())
    }

    pub async fn create_lesson(
        &self,
        module_id: i64,
        owner_wallet: &Address,
        title: &str,
        description: Option<&str>,
        video_url: Option<&str>,
    ) -> AppResult<Lesson> {
        let group_id = self.module_group_id(module_id).await?;
        self.require_owner(group_id, owner_wallet).await?;

        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("Lesson title is required".to_string()));
        }

        let position: i64 = sqlx::query(
            "SELECT COALESCE(MAX(position), -1) + 1 FROM lessons WHERE module_id = ?",
        )
        .bind(module_id)
        .fetch_one(&self.pool)
        .await?
        .get(0);

        let result = sqlx::query(
            "INSERT INTO lessons (module_id, title, description, video_url, position)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(module_id)
        .bind(title)
        .bind(description)
        .bind(video_url)
        .bind(position)
        .execute(&self.pool)
        .await?;

        Ok(Lesson {
            id: result.last_insert_rowid(),
            module_id,
            title: title.to_string(),
            description: description.map(|s| s.to_string()),
            video_url: video_url.map(|s| s.to_string()),
            position,
        })
    }

    pub async fn list_lessons(&self, module_id: i64) -> AppResult<Vec<Lesson>> {
        let rows = sqlx::query(
            "SELECT id, module_id, title, description, video_url, position FROM lessons
             WHERE module_id = ? ORDER BY position",
        )
        .bind(module_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Lesson {
                id: row.get("id"),
                module_id: row.get("module_id"),
                title: row.get("title"),
                description: row.get("description"),
                video_url: row.get("video_url"),
                position: row.get("position"),
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Feed

    pub async fn create_post(
        &self,
        group_id: i64,
        author_wallet: &Address,
        content: &str,
    ) -> AppResult<Post> {
        let group = self.require_group(group_id).await?;
        let author = self.require_user_by_wallet(author_wallet).await?;

        let is_member = self
            .get_membership(group_id, author_wallet)
            .await?
            .is_some();
        if !is_member && group.owner_id != author.id {
            return Err(AppError::Forbidden(
                "Only members can post to this group".to_string(),
            ));
        }

        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::Validation("Post content is required".to_string()));
        }

        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            "INSERT INTO posts (group_id, author_id, content, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(group_id)
        .bind(author.id)
        .bind(content)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Post {
            id: result.last_insert_rowid(),
            group_id,
            author_id: author.id,
            content: content.to_string(),
            created_at: now,
        })
    }

    pub async fn list_posts(&self, group_id: i64) -> AppResult<Vec<Post>> {
        let rows = sqlx::query(
            "SELECT id, group_id, author_id, content, created_at FROM posts
             WHERE group_id = ? ORDER BY created_at DESC",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Post {
                id: row.get("id"),
                group_id: row.get("group_id"),
                author_id: row.get("author_id"),
                content: row.get("content"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    /// Author-or-owner delete; comments cascade.
    pub async fn delete_post(&self, post_id: i64, requester_wallet: &Address) -> AppResult<()> {
        let row = sqlx::query("SELECT group_id, author_id FROM posts WHERE id = ?")
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;

        let group_id: i64 = row.get("group_id");
        let author_id: i64 = row.get("author_id");

        let requester = self.require_user_by_wallet(requester_wallet).await?;
        let group = self.require_group(group_id).await?;
        if requester.id != author_id && requester.id != group.owner_id {
            return Err(AppError::Forbidden(
                "Only the author or group owner can delete a post".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM comments WHERE post_id = ?")
            .bind(post_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(post_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(())
    }

    pub async fn create_comment(
        &self,
        post_id: i64,
        author_wallet: &Address,
        content: &str,
    ) -> AppResult<Comment> {
        let row = sqlx::query("SELECT group_id FROM posts WHERE id = ?")
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;
        let group_id: i64 = row.get(0);

        let group = self.require_group(group_id).await?;
        let author = self.require_user_by_wallet(author_wallet).await?;
        let is_member = self
            .get_membership(group_id, author_wallet)
            .await?
            .is_some();
        if !is_member && group.owner_id != author.id {
            return Err(AppError::Forbidden(
                "Only members can comment in this group".to_string(),
            ));
        }

        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::Validation("Comment content is required".to_string()));
        }

        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            "INSERT INTO comments (post_id, author_id, content, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(post_id)
        .bind(author.id)
        .bind(content)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Comment {
            id: result.last_insert_rowid(),
            post_id,
            author_id: author.id,
            content: content.to_string(),
            created_at: now,
        })
    }

    pub async fn list_comments(&self, post_id: i64) -> AppResult<Vec<Comment>> {
        let rows = sqlx::query(
            "SELECT id, post_id, author_id, content, created_at FROM comments
             WHERE post_id = ? ORDER BY created_at",
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Comment {
                id: row.get("id"),
                post_id: row.get("post_id"),
                author_id: row.get("author_id"),
                content: row.get("content"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Internal helpers

    async fn course_group_id(&self, course_id: i64) -> AppResult<i64> {
        let row = sqlx::query("SELECT group_id FROM courses WHERE id = ?")
            .bind(course_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Course not found".to_string()))?;
        Ok(row.get(0))
    }

    async fn module_group_id(&self, module_id: i64) -> AppResult<i64> {
        let row = sqlx::query(
            "SELECT c.group_id FROM course_modules m JOIN courses c ON c.id = m.course_id
             WHERE m.id = ?",
        )
        .bind(module_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Module not found".to_string()))?;
        Ok(row.get(0))
    }

    async fn invalidate_group(&self, group_id: i64) {
        self.group_cache.lock().await.pop(&group_id);
    }
}

/// Billing payloads are untrusted input; an epoch that is not a plausible
/// future-or-past instant is rejected before it reaches normalization.
fn ensure_valid_ends_on(ends_on: i64) -> AppResult<()> {
    if ends_on <= 0 {
        return Err(AppError::Validation(
            "Subscription end date must be a positive epoch timestamp".to_string(),
        ));
    }
    Ok(())
}

const GROUP_COLUMNS_QUERY: &str =
    "SELECT id, name, short_description, description, about_url, thumbnail_url,
            gallery_urls, owner_id, visibility, billing_cadence, price, member_count,
            tags, subscription_id, ends_on
     FROM groups WHERE id = ?";

fn user_from_row(row: sqlx::sqlite::SqliteRow) -> AppResult<User> {
    Ok(User {
        id: row.get("id"),
        wallet_address: Address::parse(row.get::<String, _>("wallet_address").as_str())
            .map_err(AppError::from)?,
        display_name: row.get("display_name"),
    })
}

fn membership_from_row(row: sqlx::sqlite::SqliteRow) -> Membership {
    Membership {
        user_id: row.get("user_id"),
        group_id: row.get("group_id"),
        pass_expires_at: row.get("pass_expires_at"),
        has_active_pass: row.get("has_active_pass"),
        join_tx_hash: row.get("join_tx_hash"),
        joined_at: row.get("joined_at"),
    }
}

fn group_from_row(row: sqlx::sqlite::SqliteRow) -> AppResult<Group> {
    let tags: Vec<String> =
        serde_json::from_str(row.get::<String, _>("tags").as_str()).unwrap_or_default();
    let gallery_urls: Vec<String> =
        serde_json::from_str(row.get::<String, _>("gallery_urls").as_str()).unwrap_or_default();

    Ok(Group {
        id: row.get("id"),
        name: row.get("name"),
        short_description: row.get("short_description"),
        description: row.get("description"),
        about_url: row.get("about_url"),
        thumbnail_url: row.get("thumbnail_url"),
        gallery_urls,
        owner_id: row.get("owner_id"),
        visibility: Visibility::parse(row.get::<String, _>("visibility").as_str()),
        billing_cadence: BillingCadence::parse(row.get::<String, _>("billing_cadence").as_str()),
        price: row.get("price"),
        member_count: row.get("member_count"),
        tags,
        subscription_id: row.get("subscription_id"),
        ends_on: row.get("ends_on"),
    }
    .reconcile())
}
