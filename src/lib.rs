//! postgres-operator
//!
//! A Kubernetes operator that keeps PostgreSQL tables converged with
//! declarative `PostgreSQL` custom resources: one resource, one table, with
//! the spec's key/value entries translated into columns by a fixed rule.

pub mod config;
pub mod crd;
pub mod error;
pub mod probes;
pub mod reconciler;
pub mod store;
pub mod translate;
