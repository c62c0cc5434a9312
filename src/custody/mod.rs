//! Wallet custody
//!
//! Encrypted storage and lifecycle management for the service-controlled
//! signing keys. Every key access is audited; wallet records are tombstoned
//! on rotation and revocation, never deleted.

pub mod crypto;
pub mod service;
pub mod types;

pub use crypto::{generate_keypair, EnvelopeCipher};
pub use service::WalletCustodyService;
pub use types::{
    AuditAction, AuditSeverity, ManagedWallet, WalletAuditLogEntry, WalletInfo, WalletStatus,
};
