//! # netwarden - Guarded command execution for network devices
//!
//! `netwarden` sits between a caller that wants to run commands on network
//! gear (an operator tool, an automation agent, an LLM) and the devices
//! themselves. It resolves devices from an explicit registry, refuses
//! configuration that would cut off the management path before any
//! connection is made, scopes every SSH session to a single operation, and
//! reports every outcome as a typed [`ExecutionResult`].
//!
//! ## Features
//!
//! - **Explicit registry**: devices come from JSON or environment variables, loaded once
//! - **Lockout prevention**: the management interface and access path are protected by rules
//! - **Scoped sessions**: one open/close per call, released on every exit path, with deadlines
//! - **Typed outcomes**: a closed status set with per-line reports for partial configuration
//! - **Legacy SSH**: algorithm profiles down to `diffie-hellman-group1-sha1` for old IOS images
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use netwarden::executor::CommandExecutor;
//! use netwarden::registry::DeviceRegistry;
//! use netwarden::session::{SessionManager, SshSessionProvider};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = DeviceRegistry::from_env(&["router", "switch1", "switch2"])?;
//!     let sessions = SessionManager::new(Arc::new(SshSessionProvider::default()));
//!     let executor = CommandExecutor::new(Arc::new(registry), sessions);
//!
//!     let result = executor
//!         .execute_read("router", "show ip interface brief")
//!         .await;
//!     println!("{}", result.summary());
//!
//!     let lines = vec!["interface GigabitEthernet0/0".to_string(), "shutdown".to_string()];
//!     let result = executor.execute_config("router", &lines).await;
//!     println!("{}", result.summary());
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`registry::DeviceRegistry`] - immutable name to profile lookup
//! - [`safety::SafetyValidator`] - ordered safety rules over a configuration change set
//! - [`session::SessionManager`] - session acquisition, deadlines, release and optional pooling
//! - [`session::SshSessionProvider`] - IOS-style SSH shell provider
//! - [`executor::CommandExecutor`] - `execute_read` / `execute_config`
//! - [`result::ExecutionResult`] - outcome returned to the caller

pub mod config;
pub mod error;
pub mod executor;
pub mod registry;
pub mod request;
pub mod result;
pub mod safety;
pub mod session;

pub use executor::CommandExecutor;
pub use result::{ExecutionResult, ExecutionStatus};
