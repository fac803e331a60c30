//! CircleCI infrastructure provider.
//!
//! A provider plugin that manages CircleCI projects, environment variables,
//! checkout keys, contexts, scheduled pipelines, webhooks and self-hosted
//! runner resource classes and tokens.
//!
//! # Layers
//!
//! - **Transport**: [`transport::RetryTransport`] wraps the network
//!   transport and retries responses rate limited with HTTP 429, backing off
//!   `500ms * 2^attempt` per the shared [`retry::RetryPolicy`]. Backoff waits
//!   abort when the caller's [`context::CallContext`] is cancelled.
//! - **API client**: [`api::CircleciClient`] speaks the v2, v1.1 and runner
//!   REST APIs.
//! - **Resources**: [`resources`] maps host state onto API calls.
//! - **Provider**: [`CircleciProvider`] implements [`ProviderService`], which
//!   [`serve`] exposes over gRPC.
//!
//! # Handshake Protocol
//!
//! On startup the provider binds a loopback port and prints one line to
//! stdout:
//!
//! ```text
//! CIRCLECI_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! Format: `CIRCLECI_PROVIDER|<protocol_version>|<address>`. The host then
//! connects to the `circleci.provider.v1.Provider` service at that address.
//!
//! # Provider Protocol
//!
//! - **GetMetadata**, **GetSchema**: resource and data source names and schemas
//! - **ValidateProviderConfig**, **Configure**: token, hosts and retry settings
//! - **Stop**: cancel outstanding requests
//! - **ValidateResourceConfig**, **UpgradeResourceState**, **Plan**
//! - **Create**, **Read**, **Update**, **Delete**, **ImportResourceState**
//! - **ValidateDataSourceConfig**, **ReadDataSource**

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod resources;
pub mod retry;
pub mod schema;
pub mod server;
pub mod testing;
pub mod transport;
pub mod types;

#[allow(clippy::all)]
pub mod proto;

pub use error::{ApiError, ProviderError, TransportError};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::CircleciProvider;
pub use schema::ProviderSchema;
pub use server::{serve, serve_with_options, ProviderService, ServeOptions};
pub use types::{
    AttributeChange, ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities,
    HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};

pub use async_trait::async_trait;
