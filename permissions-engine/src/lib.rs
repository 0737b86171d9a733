//! Relationship-based access control on top of a Zanzibar-style backend.
//!
//! The [`Engine`] translates domain operations into relationship tuples:
//! - Roles bundling granted actions, owned by a resource
//! - Relationships between resources, validated against a [`Policy`]
//! - Subject-role assignments
//! - Permission checks for an action on a resource
//!
//! Every write returns a [`ConsistencyToken`]. Passing it to a later read
//! guarantees the read observes the write.
//!
//! # Example
//!
//! ```rust
//! use permissions_engine::{backend::InMemoryBackend, Engine, PrefixedId};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::new("example", Arc::new(InMemoryBackend::new()));
//! engine.apply_schema().await?;
//!
//! let tenant = engine.new_resource_from_id(&PrefixedId::generate("tnntten")?)?;
//! let user = engine.new_resource_from_id(&PrefixedId::generate("idntusr")?)?;
//!
//! let (role, _) = engine.create_role(&tenant, &["loadbalancer_update"]).await?;
//! engine.assign_subject_role(&user, &role).await?;
//!
//! engine
//!     .subject_has_permission(&user, "loadbalancer_update", &tenant)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod id;
pub mod models;
pub mod policy;
pub mod schema;
pub mod validation;

pub use backend::PermissionsBackend;
pub use engine::Engine;
pub use error::{BackendError, EngineError, IdError, PolicyError, Result};
pub use id::{PrefixRegistry, PrefixedId};
pub use models::*;
pub use policy::{Policy, PolicyDocument};
pub use schema::Schema;
