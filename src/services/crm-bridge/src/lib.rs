//! # CRM Bridge Service
//!
//! Receives JSON webhooks from arbitrary third-party systems and turns each one
//! into a Bitrix24 CRM operation: create a deal, create a lead, move a deal by
//! id or move the newest deal matching a phone number.
//!
//! ## Architecture
//!
//! - **Connections** bind a unique webhook path to one operation, a field
//!   mapping and a small configuration object.
//! - **Mapping** ([`mapping`]) projects the inbound payload onto CRM field names
//!   by following dot-delimited source paths.
//! - **Dispatch** ([`dispatch`]) picks the operation handler from the
//!   connection's category; handlers live in [`operations`].
//! - **Bitrix** ([`bitrix`]) is the outbound REST client, behind the
//!   [`bitrix::CrmClient`] trait.
//! - **Store** ([`store`]) persists users, projects and connections in
//!   PostgreSQL or in memory.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use crm_bridge::{BridgeConfig, BridgeService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BridgeConfig::from_env()?;
//!     let service = BridgeService::new(config).await?;
//!     service.start().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod bitrix;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod mapping;
pub mod metrics;
pub mod models;
pub mod operations;
pub mod service;
pub mod store;

// Re-export main types for easier usage
pub use bitrix::{BitrixClient, CrmClient};
pub use config::BridgeConfig;
pub use dispatch::dispatch;
pub use error::{BridgeError, BridgeResult};
pub use models::{
    Connection, ConnectionCategory, ConnectionStatus, FieldMappingRule, OperationResult, Project,
    User,
};
pub use operations::OperationContext;
pub use service::{AppState, BridgeService};
pub use store::{MemoryStore, PostgresStore, Store};

/// Version information for the bridge service
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const SERVICE_NAME: &str = "crm-bridge";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info() {
        assert!(!VERSION.is_empty());
        assert_eq!(SERVICE_NAME, "crm-bridge");
    }
}
