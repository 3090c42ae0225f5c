//! Marketplace subscriptions for projects
//!
//! A marketplace links projects to named, versioned bundles that ship
//! rule types and profiles, and materializes that content inside each
//! project.
//!
//! # Architecture
//!
//! ```text
//! caller (owns the transaction)
//!     │  subscribe / add_profile
//!     ▼
//! Marketplace (router)   BundleId → BundleSource
//!     │                        │
//!     │                        └── get_bundle → BundleReader
//!     ▼
//! SubscriptionService ──► Querier (bundles, subscriptions)
//!     │
//!     ├──► RuleTypeService::upsert   (one per rule type in the bundle)
//!     └──► ProfileService::create    (one profile, after a subscription check)
//! ```

pub mod bundle;
pub mod config;
pub mod error;
pub mod marketplace;
pub mod project;
pub mod services;
pub mod sources;
pub mod store;
pub mod subscriptions;

pub use bundle::{BundleId, BundleMetadata, BundleReader, Profile, RuleType};
pub use config::{MarketplaceConfig, SourceConfig};
pub use error::{ConfigError, ErrorKind, MarketplaceError, SubscriptionError};
pub use marketplace::{from_config, Marketplace, NoopMarketplace, RoutedMarketplace};
pub use project::{ProjectContext, Provider};
pub use services::{ProfileService, RuleTypeService};
pub use sources::BundleSource;
pub use store::Querier;
pub use subscriptions::SubscriptionService;
