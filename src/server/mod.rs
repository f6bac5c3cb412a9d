//! Thin REST surface over the Execution Runner and the authoring-facing
//! services (C7, C8, C10).
//!
//! The dashboard/pages layer that would normally front this is explicitly
//! out of scope (§1): "a thin CRUD view over the services." What remains
//! in scope is *some* programmatic surface for that view (and any other
//! caller) to drive workflows, executions, and knowledge retrieval through
//! — the ambient equivalent of the teacher's GraphQL server, built here as
//! a small `axum` REST API instead (see `DESIGN.md` for why GraphQL itself
//! was dropped).
//!
//! ## Server Architecture
//!
//! ```text
//! Client (any language)
//!        | HTTP/JSON
//! Server Layer (this module) <- axum routes, request/response DTOs
//!        | async fn calls
//! Engine Layer <- Runner, KnowledgeIndex, AgentInterface
//!        | async fn calls
//! Storage Layer <- WorkflowStorage
//! ```

pub mod rest;

pub use rest::{AppState, RestServer, RestServerConfig};
