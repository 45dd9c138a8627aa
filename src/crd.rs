//! Custom resource definitions
//!
//! The `PostgreSQL` resource declares one managed table: the object name is the
//! table name and the spec is a flat column-name → column-type-token mapping.
//! The status subresource carries the reconciler's last observed outcome and is
//! never written by anything else.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// PostgreSQL is the schema for one managed table.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "batch.hub.docker.com",
    version = "v1",
    kind = "PostgreSQL",
    plural = "postgresqls",
    shortname = "pg",
    namespaced,
    status = "PostgreSQLStatus",
    printcolumn = r#"{"name":"Observed", "type":"integer", "jsonPath":".status.observedGeneration"}"#,
    printcolumn = r#"{"name":"LastError", "type":"string", "jsonPath":".status.lastError"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct PostgreSQLSpec {
    /// Desired columns, keyed by column name. Flattened so the manifest reads
    /// as a plain mapping under `spec`, matching the wire format users write:
    ///
    /// ```yaml
    /// spec:
    ///   col1: int
    ///   col2: text
    /// ```
    ///
    /// `BTreeMap` gives unique keys and a deterministic iteration order, which
    /// the DDL generator relies on.
    #[serde(flatten)]
    pub columns: BTreeMap<String, String>,
}

/// Observed state of a PostgreSQL resource, owned by the reconciler.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PostgreSQLStatus {
    /// Wall-clock time of the last completed reconcile attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconcile_time: Option<DateTime<Utc>>,

    /// Human-readable failure from the last attempt; cleared on success.
    ///
    /// Never skipped when serializing: the status is written as a JSON merge
    /// patch, and a merge patch only removes a field when the patch carries
    /// an explicit `null` for it. Omitting the key would leave a stale error
    /// in place forever after a recovery.
    #[serde(default)]
    pub last_error: Option<String>,

    /// `metadata.generation` the reconciler last converged successfully.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl PostgreSQLStatus {
    /// Status after a successful convergence of the given generation.
    pub fn converged(generation: Option<i64>) -> Self {
        Self {
            last_reconcile_time: Some(Utc::now()),
            last_error: None,
            observed_generation: generation,
        }
    }

    /// Status after a failed attempt. The observed generation is left to the
    /// previous successful value by the merge patch, so only the fields set
    /// here are serialized.
    pub fn failed(message: String) -> Self {
        Self {
            last_reconcile_time: Some(Utc::now()),
            last_error: Some(message),
            observed_generation: None,
        }
    }
}
