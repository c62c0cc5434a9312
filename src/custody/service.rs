//! Wallet custody service

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::WalletStore;
use crate::store::{LockConfig, LockManager, SharedStore};

use super::crypto::{generate_keypair, EnvelopeCipher, ENCRYPTION_VERSION};
use super::types::{
    AuditAction, AuditSeverity, ManagedWallet, WalletAuditLogEntry, WalletInfo, WalletStatus,
};

fn custody_lock_key(wallet_id: &str) -> String {
    format!("custody:lock:{}", wallet_id)
}

/// Manages wallet creation, key access, rotation, and revocation
pub struct WalletCustodyService {
    store: Arc<dyn WalletStore>,
    cipher: EnvelopeCipher,
    /// Serializes rotate/revoke per wallet across instances
    locks: LockManager,
}

impl WalletCustodyService {
    pub fn new(
        store: Arc<dyn WalletStore>,
        shared_store: Arc<dyn SharedStore>,
        cipher: EnvelopeCipher,
        lock_config: LockConfig,
    ) -> Self {
        info!(
            kms = cipher.kms_key_id().is_some(),
            "wallet custody service initialized"
        );

        Self {
            store,
            cipher,
            locks: LockManager::new(shared_store, lock_config),
        }
    }

    /// Create a new wallet with a freshly generated keypair.
    ///
    /// The wallet row and its creation audit entry are persisted as one
    /// atomic unit; there is no state where the wallet exists without a
    /// retrievable key.
    pub async fn create_wallet(
        &self,
        wallet_id: &str,
        metadata: Option<serde_json::Value>,
        actor: &str,
    ) -> Result<WalletInfo> {
        if self.store.find_active(wallet_id).await?.is_some() {
            return Err(Error::WalletAlreadyExists(wallet_id.to_string()));
        }

        let keypair = generate_keypair()?;
        let encrypted_private_key = self.cipher.encrypt(&keypair.private_key)?;

        let wallet = ManagedWallet {
            id: Uuid::new_v4(),
            wallet_id: wallet_id.to_string(),
            address: keypair.address,
            encrypted_private_key,
            encryption_version: ENCRYPTION_VERSION.to_string(),
            kms_key_id: self.cipher.kms_key_id().map(String::from),
            metadata,
            status: WalletStatus::Active,
            created_at: Utc::now(),
            rotated_at: None,
            last_used_at: None,
        };

        let audit = WalletAuditLogEntry::new(
            wallet_id,
            AuditAction::Create,
            AuditSeverity::Info,
            actor,
            Some(json!({ "address": wallet.address.as_str() })),
        );

        self.store.insert_wallet(&wallet, &audit).await?;

        info!(wallet_id, address = %wallet.address, "wallet created");

        Ok(WalletInfo::from(&wallet))
    }

    /// Public wallet fields; no decryption, no audit entry
    pub async fn get_wallet(&self, wallet_id: &str) -> Result<WalletInfo> {
        let wallet = self
            .store
            .find_any(wallet_id)
            .await?
            .ok_or_else(|| Error::WalletNotFound(wallet_id.to_string()))?;

        self.store.touch_last_used(wallet.id).await?;

        Ok(WalletInfo::from(&wallet))
    }

    /// Decrypt and return the signing key.
    ///
    /// High-severity audit entry on every call that reaches a wallet record;
    /// a revoked wallet is denied before any decryption happens.
    pub async fn get_private_key(&self, wallet_id: &str, actor: &str) -> Result<String> {
        let wallet = self
            .store
            .find_any(wallet_id)
            .await?
            .ok_or_else(|| Error::WalletNotFound(wallet_id.to_string()))?;

        if wallet.status == WalletStatus::Revoked {
            self.store
                .append_audit(&WalletAuditLogEntry::new(
                    wallet_id,
                    AuditAction::Access,
                    AuditSeverity::Critical,
                    actor,
                    Some(json!({
                        "address": wallet.address.as_str(),
                        "denied": "wallet revoked",
                    })),
                ))
                .await?;

            warn!(wallet_id, "key access denied: wallet revoked");
            return Err(Error::WalletRevoked(wallet_id.to_string()));
        }

        let private_key = self.cipher.decrypt(&wallet.encrypted_private_key)?;

        self.store
            .append_audit(&WalletAuditLogEntry::new(
                wallet_id,
                AuditAction::Access,
                AuditSeverity::High,
                actor,
                Some(json!({ "address": wallet.address.as_str() })),
            ))
            .await?;

        self.store.touch_last_used(wallet.id).await?;

        Ok(private_key)
    }

    /// Rotate a wallet: prior record is retained as an immutable tombstone,
    /// a fresh keypair takes over the wallet id
    pub async fn rotate_wallet(&self, wallet_id: &str, actor: &str) -> Result<WalletInfo> {
        let lock = self.locks.acquire(&custody_lock_key(wallet_id)).await?;
        let result = self.rotate_locked(wallet_id, actor).await;
        if let Err(e) = self.locks.release(lock).await {
            warn!(wallet_id, "failed to release custody lock: {}", e);
        }
        result
    }

    async fn rotate_locked(&self, wallet_id: &str, actor: &str) -> Result<WalletInfo> {
        let old = self
            .store
            .find_active(wallet_id)
            .await?
            .ok_or_else(|| Error::WalletNotFound(wallet_id.to_string()))?;

        let now = Utc::now();
        self.store
            .update_status(old.id, WalletStatus::Rotated, Some(now))
            .await?;

        let keypair = generate_keypair()?;
        let encrypted_private_key = self.cipher.encrypt(&keypair.private_key)?;

        let mut metadata = old
            .metadata
            .clone()
            .unwrap_or_else(|| json!({}));
        if let Some(map) = metadata.as_object_mut() {
            map.insert("rotated_from".to_string(), json!(old.address.as_str()));
            map.insert("rotation_date".to_string(), json!(now.to_rfc3339()));
        }

        let new_wallet = ManagedWallet {
            id: Uuid::new_v4(),
            wallet_id: wallet_id.to_string(),
            address: keypair.address,
            encrypted_private_key,
            encryption_version: ENCRYPTION_VERSION.to_string(),
            kms_key_id: self.cipher.kms_key_id().map(String::from),
            metadata: Some(metadata),
            status: WalletStatus::Active,
            created_at: now,
            rotated_at: None,
            last_used_at: None,
        };

        let create_audit = WalletAuditLogEntry::new(
            wallet_id,
            AuditAction::Create,
            AuditSeverity::Info,
            actor,
            Some(json!({ "address": new_wallet.address.as_str() })),
        );

        self.store.insert_wallet(&new_wallet, &create_audit).await?;

        self.store
            .append_audit(&WalletAuditLogEntry::new(
                wallet_id,
                AuditAction::Rotate,
                AuditSeverity::High,
                actor,
                Some(json!({
                    "old_address": old.address.as_str(),
                    "new_address": new_wallet.address.as_str(),
                })),
            ))
            .await?;

        warn!(
            wallet_id,
            old = %old.address,
            new = %new_wallet.address,
            "wallet rotated"
        );

        Ok(WalletInfo::from(&new_wallet))
    }

    /// Revoke a wallet; all subsequent key access fails
    pub async fn revoke_wallet(&self, wallet_id: &str, reason: &str, actor: &str) -> Result<()> {
        let lock = self.locks.acquire(&custody_lock_key(wallet_id)).await?;
        let result = self.revoke_locked(wallet_id, reason, actor).await;
        if let Err(e) = self.locks.release(lock).await {
            warn!(wallet_id, "failed to release custody lock: {}", e);
        }
        result
    }

    async fn revoke_locked(&self, wallet_id: &str, reason: &str, actor: &str) -> Result<()> {
        let wallet = self
            .store
            .find_any(wallet_id)
            .await?
            .ok_or_else(|| Error::WalletNotFound(wallet_id.to_string()))?;

        self.store
            .update_status(wallet.id, WalletStatus::Revoked, None)
            .await?;

        self.store
            .append_audit(&WalletAuditLogEntry::new(
                wallet_id,
                AuditAction::Revoke,
                AuditSeverity::Critical,
                actor,
                Some(json!({
                    "address": wallet.address.as_str(),
                    "reason": reason,
                })),
            ))
            .await?;

        warn!(wallet_id, reason, "wallet revoked");
        Ok(())
    }

    /// List wallets in custody, optionally filtered by status
    pub async fn list_wallets(
        &self,
        status: Option<WalletStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WalletInfo>> {
        let wallets = self.store.list(status, limit, offset).await?;
        Ok(wallets.iter().map(WalletInfo::from).collect())
    }

    /// Audit trail for a wallet, newest first
    pub async fn list_audit_log(
        &self,
        wallet_id: &str,
        limit: i64,
    ) -> Result<Vec<WalletAuditLogEntry>> {
        self.store.list_audit(wallet_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryWalletStore;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn test_service() -> WalletCustodyService {
        test_service_with_key(&"ab".repeat(32))
    }

    fn test_service_with_key(key: &str) -> WalletCustodyService {
        WalletCustodyService::new(
            Arc::new(MemoryWalletStore::new()),
            Arc::new(MemoryStore::new()),
            EnvelopeCipher::from_hex(key, None).unwrap(),
            LockConfig {
                ttl: Duration::from_secs(5),
                wait_budget: Duration::from_millis(200),
                retry_base: Duration::from_millis(10),
            },
        )
    }

    #[tokio::test]
    async fn test_create_and_get_wallet() {
        let service = test_service();

        let created = service.create_wallet("w1", None, "admin").await.unwrap();
        assert_eq!(created.status, WalletStatus::Active);

        let fetched = service.get_wallet("w1").await.unwrap();
        assert_eq!(fetched.address, created.address);
        assert_eq!(fetched.status, WalletStatus::Active);
    }

    #[tokio::test]
    async fn test_duplicate_create_fails() {
        let service = test_service();
        service.create_wallet("w1", None, "admin").await.unwrap();

        let err = service.create_wallet("w1", None, "admin").await.unwrap_err();
        assert!(matches!(err, Error::WalletAlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_get_unknown_wallet_fails() {
        let service = test_service();
        let err = service.get_wallet("nope").await.unwrap_err();
        assert!(matches!(err, Error::WalletNotFound(_)));
    }

    #[tokio::test]
    async fn test_get_private_key_audits_at_high_severity() {
        let service = test_service();
        service.create_wallet("w1", None, "admin").await.unwrap();

        let key = service.get_private_key("w1", "minter").await.unwrap();
        assert!(key.starts_with("0x"));
        assert_eq!(key.len(), 66);

        let audit = service.list_audit_log("w1", 10).await.unwrap();
        let access: Vec<_> = audit
            .iter()
            .filter(|e| e.action == AuditAction::Access)
            .collect();
        assert_eq!(access.len(), 1);
        assert!(access[0].severity >= AuditSeverity::High);
        assert_eq!(access[0].actor, "minter");
    }

    #[tokio::test]
    async fn test_revoked_wallet_never_returns_key() {
        let service = test_service();
        service.create_wallet("w1", None, "admin").await.unwrap();
        service.revoke_wallet("w1", "compromised", "admin").await.unwrap();

        // Denied every time, regardless of how often it is asked.
        for _ in 0..3 {
            let err = service.get_private_key("w1", "minter").await.unwrap_err();
            assert!(matches!(err, Error::WalletRevoked(_)));
        }

        let info = service.get_wallet("w1").await.unwrap();
        assert_eq!(info.status, WalletStatus::Revoked);
    }

    #[tokio::test]
    async fn test_rotate_keeps_prior_record() {
        let service = test_service();
        let original = service.create_wallet("w1", None, "admin").await.unwrap();

        let rotated = service.rotate_wallet("w1", "admin").await.unwrap();
        assert_ne!(rotated.address, original.address);
        assert_eq!(rotated.status, WalletStatus::Active);

        // get_wallet resolves to the new active record.
        let active = service.get_wallet("w1").await.unwrap();
        assert_eq!(active.address, rotated.address);

        // Prior record is still present as a rotated tombstone.
        let all = service.list_wallets(None, 10, 0).await.unwrap();
        assert_eq!(all.len(), 2);
        let tombstone = all
            .iter()
            .find(|w| w.address == original.address)
            .expect("prior wallet record retained");
        assert_eq!(tombstone.status, WalletStatus::Rotated);

        // Linkage recorded on the new record.
        let metadata = rotated.metadata.unwrap();
        assert_eq!(
            metadata["rotated_from"].as_str().unwrap(),
            original.address.as_str()
        );
    }

    #[tokio::test]
    async fn test_rotation_preserves_audit_history() {
        let service = test_service();
        service.create_wallet("w1", None, "admin").await.unwrap();
        service.get_private_key("w1", "minter").await.unwrap();

        let before: Vec<_> = service
            .list_audit_log("w1", 50)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.action == AuditAction::Access)
            .collect();

        service.rotate_wallet("w1", "admin").await.unwrap();

        let after = service.list_audit_log("w1", 50).await.unwrap();
        let access_after: Vec<_> = after
            .iter()
            .filter(|e| e.action == AuditAction::Access)
            .collect();

        // Historical access entries unchanged, rotation appended.
        assert_eq!(access_after.len(), before.len());
        assert!(after.iter().any(|e| e.action == AuditAction::Rotate));
    }

    #[tokio::test]
    async fn test_rotated_wallet_key_still_decrypts() {
        let service = test_service();
        service.create_wallet("w1", None, "admin").await.unwrap();
        service.rotate_wallet("w1", "admin").await.unwrap();

        // Active record resolves and decrypts after rotation.
        let key = service.get_private_key("w1", "minter").await.unwrap();
        assert!(key.starts_with("0x"));
    }

    #[tokio::test]
    async fn test_key_mismatch_is_fatal_decryption_error() {
        let store: Arc<MemoryWalletStore> = Arc::new(MemoryWalletStore::new());
        let shared: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let lock_config = LockConfig {
            ttl: Duration::from_secs(5),
            wait_budget: Duration::from_millis(200),
            retry_base: Duration::from_millis(10),
        };

        let writer = WalletCustodyService::new(
            Arc::clone(&store) as Arc<dyn crate::storage::WalletStore>,
            Arc::clone(&shared) as Arc<dyn crate::store::SharedStore>,
            EnvelopeCipher::from_hex(&"ab".repeat(32), None).unwrap(),
            lock_config.clone(),
        );
        writer.create_wallet("w1", None, "admin").await.unwrap();

        // Same records, different envelope key.
        let reader = WalletCustodyService::new(
            store,
            shared,
            EnvelopeCipher::from_hex(&"cd".repeat(32), None).unwrap(),
            lock_config,
        );

        let err = reader.get_private_key("w1", "minter").await.unwrap_err();
        assert!(matches!(err, Error::WalletDecryption(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_list_wallets_with_status_filter() {
        let service = test_service();
        service.create_wallet("w1", None, "admin").await.unwrap();
        service.create_wallet("w2", None, "admin").await.unwrap();
        service.revoke_wallet("w2", "test", "admin").await.unwrap();

        let active = service
            .list_wallets(Some(WalletStatus::Active), 10, 0)
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].wallet_id, "w1");

        let revoked = service
            .list_wallets(Some(WalletStatus::Revoked), 10, 0)
            .await
            .unwrap();
        assert_eq!(revoked.len(), 1);
        assert_eq!(revoked[0].wallet_id, "w2");
    }
}
