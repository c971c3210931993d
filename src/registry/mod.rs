//! Multi-cluster gateway management console - control plane core
//!
//! Seven cooperating components, each owning one concern:
//!
//! - [`store`]: Registration Store, durable record of every managed cluster.
//! - [`credentials`]: Credential Store, named credential blobs a
//!   Registration references by name, never embeds.
//! - [`client`]: Cluster Client, one live Kubernetes connection per cluster.
//! - [`pool`]: Client Pool, reconciles live clients against the
//!   Registration Store.
//! - [`breaker`]: Circuit Breaker, per-cluster closed/open/half-open gate.
//! - [`health`]: Health Checker, background prober feeding both the Pool
//!   and the Store.
//! - [`router`]: Request Router, resolves which cluster (or "all
//!   clusters") a request targets.
//! - [`aggregator`]: Global Aggregator, fans a query out across every
//!   registered cluster.
//! - [`heartbeat`]: Heartbeat Ingester, accepts agent-pushed liveness
//!   reports.
//! - [`events`]: Event Hub, topic-based pub/sub over WebSocket.
//! - [`api`]: HTTP boundary wiring all of the above onto one Axum router.

pub mod aggregator;
pub mod api;
pub mod breaker;
pub mod client;
pub mod credentials;
pub mod error;
pub mod events;
pub mod health;
pub mod heartbeat;
pub mod pool;
pub mod registration;
pub mod router;
pub mod store;

pub use aggregator::{AggregateItem, AggregateResult, AggregatorConfig, GlobalAggregator};
pub use api::{create_registry_router, RegistryState};
pub use breaker::{BreakerState, CircuitBreaker};
pub use client::ClusterClient;
pub use credentials::{CredentialSource, CredentialStore};
pub use error::ApiError;
pub use events::EventHub;
pub use health::{HealthChecker, HealthCheckerConfig};
pub use heartbeat::HeartbeatIngester;
pub use pool::ClientPool;
pub use registration::{Phase, Registration, RegistrationRecord};
pub use router::RequestRouter;
pub use store::RegistrationStore;
