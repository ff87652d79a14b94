//! Cloud agent client
//!
//! A typed facade over the fleet cloud agent, the service that owns the
//! actual compute, network and storage resources. Each resource kind has a
//! `get`, an idempotent `reconcile` (create-or-update) and a `delete`.
//!
//! # Example
//!
//! ```no_run
//! use cloud_client::{CloudClient, CloudClientTrait, GroupSpec, StaticTokenAuthorizer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let auth = StaticTokenAuthorizer::new("your-api-token");
//! let client = CloudClient::connect("http://cloud-agent:8080".to_string(), &auth).await?;
//!
//! client
//!     .reconcile_group(&GroupSpec { name: "rg-1".into(), location: "westus".into() })
//!     .await?;
//!
//! match client.get_virtual_machine("rg-1", "vm-1").await {
//!     Ok(vm) => println!("state: {}", vm.provisioning_state),
//!     Err(e) if e.is_not_found() => println!("not created yet"),
//!     Err(e) => return Err(e.into()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod cloud_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use auth::{Authorizer, StaticTokenAuthorizer, TokenFileAuthorizer};
pub use client::CloudClient;
pub use cloud_trait::CloudClientTrait;
pub use error::{CloudError, codes};
pub use models::*;
#[cfg(feature = "test-util")]
pub use mock::MockCloudClient;
