//! # rosprov - MikroTik RouterOS provisioning
//!
//! `rosprov` turns service requests into idempotent RouterOS scripts and
//! pushes them to devices over SSH. Every stateful object a script creates is
//! preceded by a guarded removal, so re-running a script converges instead of
//! duplicating objects.
//!
//! ## Features
//!
//! - **Typed script builder**: statements are values, rendered to text last
//! - **Service generators**: Hotspot, PPPoE and VLAN-separated Hybrid topologies
//! - **Hardening and SNMP**: management lockdown, firewall, logging, walled garden
//! - **SSH executor**: credential decrypted once per session and zeroed on teardown
//! - **Retry primitive**: exponential backoff with a result value, never an error
//! - **Key rotation**: a new key must log in before the old one is removed
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use rosprov::config::Settings;
//! use rosprov::credential::CredentialVault;
//! use rosprov::generator::{ServiceOptions, ServicePlan};
//! use rosprov::model::ServiceType;
//! use rosprov::orchestrator::{ConfigurationService, DeployMode, RouterLocks, ServiceRequest};
//! use rosprov::session::RouterOsConnector;
//! use rosprov::store::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::from_env()?;
//!     let service = ConfigurationService::new(
//!         Arc::new(RouterOsConnector::from_settings(&settings)),
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(CredentialVault::from_env()?),
//!         settings,
//!         RouterLocks::new(),
//!     );
//!
//!     let request = ServiceRequest {
//!         plans: vec![ServicePlan {
//!             service_type: ServiceType::Pppoe,
//!             interfaces: vec!["ether2".to_string(), "ether3".to_string()],
//!             options: ServiceOptions::with_radius("10.8.0.1", "radius-secret"),
//!             service_id: None,
//!         }],
//!         ..Default::default()
//!     };
//!     service.generate_service_config("R1", request).await?;
//!     let report = service.deploy_service_config("R1", DeployMode::Auto).await?;
//!     println!("{}", report.outcome.message);
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`script::Script`] - ordered RouterOS statements with idempotent pairing
//! - [`generator`] - service, hardening and SNMP script generators
//! - [`session::SshExecutor`] - one authenticated session per router
//! - [`rotation::KeyRotationService`] - SSH key generation, install and rotation
//! - [`orchestrator::ConfigurationService`] - compose, persist and deploy
//! - [`error::ProvisionError`] - error taxonomy shared by all components
//! - [`config`] - SSH algorithm tables, provisioning constants and [`config::Settings`]

pub mod config;
pub mod credential;
pub mod error;
pub mod generator;
pub mod model;
pub mod orchestrator;
pub mod pool;
pub mod rotation;
pub mod script;
pub mod session;
pub mod store;
