//! Reconciliation engine
//!
//! One invocation converges one table. The external database has no watch or
//! versioning primitive, so convergence is destroy-and-recreate: validate the
//! spec, `DROP TABLE IF EXISTS`, then `CREATE TABLE` with the full column set
//! as a single statement. Recreation is idempotent, which makes a reconcile
//! aborted mid-flight safe: the next attempt rebuilds from scratch no matter
//! how far the previous one got.
//!
//! The controller runtime guarantees at most one in-flight invocation per
//! object and redelivers only the latest known state, so this module treats
//! every call as "converge to what the object says now" and never assumes it
//! saw intermediate edits.

use crate::config::BackoffConfig;
use crate::crd::{PostgreSQL, PostgreSQLStatus};
use crate::error::{Error, RetryClass};
use crate::store::TableStore;
use crate::translate::{self, TableSpec};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::Client;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Shared state handed to every reconcile invocation.
///
/// The table store is injected rather than reached through a global so tests
/// can substitute a fake; the pool behind it is the only shared mutable
/// resource in the process.
pub struct Context {
    pub client: Client,
    pub store: Arc<dyn TableStore>,
    pub retries: RetryTracker,
}

impl Context {
    pub fn new(client: Client, store: Arc<dyn TableStore>, backoff: BackoffConfig) -> Self {
        Self {
            client,
            store,
            retries: RetryTracker::new(backoff),
        }
    }
}

/// Per-identity retry bookkeeping.
///
/// Tracks consecutive transient failures so the requeue delay grows
/// exponentially per table instead of hot-looping against an unreachable
/// database, and resets as soon as an attempt succeeds (or the object goes
/// away).
pub struct RetryTracker {
    backoff: BackoffConfig,
    failures: Mutex<HashMap<String, u32>>,
}

impl RetryTracker {
    pub fn new(backoff: BackoffConfig) -> Self {
        Self {
            backoff,
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn resync_interval(&self) -> Duration {
        self.backoff.resync
    }

    /// Delay before the next attempt for this identity, advancing the
    /// failure count when the error is transient.
    pub fn delay_for(&self, key: &str, err: &Error) -> Duration {
        match err.retry_class() {
            RetryClass::InvalidSpec => self.backoff.invalid_spec_requeue,
            RetryClass::Transient => {
                let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
                let attempts = failures.entry(key.to_string()).or_insert(0);
                *attempts = attempts.saturating_add(1);
                jittered(backoff_delay(&self.backoff, *attempts))
            }
        }
    }

    pub fn clear(&self, key: &str) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}

/// Deterministic exponential schedule: `base * 2^(attempts-1)`, capped.
pub fn backoff_delay(cfg: &BackoffConfig, attempts: u32) -> Duration {
    let shift = attempts.saturating_sub(1).min(31);
    cfg.base
        .checked_mul(1u32 << shift)
        .unwrap_or(cfg.cap)
        .min(cfg.cap)
}

/// Additive jitter of at most 10%, spreading many identities recovering from
/// the same outage without ever shrinking the deterministic schedule.
fn jittered(delay: Duration) -> Duration {
    let max_jitter_ms = (delay.as_millis() as u64) / 10;
    if max_jitter_ms == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter_ms))
}

/// Drive the external table to match the declared columns.
///
/// Validation runs before any statement is issued, so a spec that cannot be
/// translated never destroys an existing table. Errors from either statement
/// propagate untouched; partial application is reported as failure, never as
/// success.
pub async fn converge(
    store: &dyn TableStore,
    name: &str,
    columns: &BTreeMap<String, String>,
) -> Result<TableSpec, Error> {
    let table = translate::translate(name, columns)?;
    store.drop_table(&table).await?;
    store.create_table(&table).await?;
    Ok(table)
}

/// Reconcile one `PostgreSQL` object.
pub async fn reconcile(obj: Arc<PostgreSQL>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = obj
        .metadata
        .name
        .as_deref()
        .ok_or(Error::MissingObjectKey(".metadata.name"))?;
    let namespace = obj
        .metadata
        .namespace
        .as_deref()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let key = format!("{namespace}/{name}");
    let api: Api<PostgreSQL> = Api::namespaced(ctx.client.clone(), namespace);

    // Re-fetch by identity: the queued object may be stale, and deletion is
    // signalled by absence. A vanished object is not an error; drop the key
    // and leave the external table alone.
    let Some(latest) = api.get_opt(name).await? else {
        debug!(%key, "resource deleted, dropping key");
        ctx.retries.clear(&key);
        return Ok(Action::await_change());
    };

    let generation = latest.metadata.generation;
    match converge(ctx.store.as_ref(), name, &latest.spec.columns).await {
        Ok(table) => {
            ctx.retries.clear(&key);
            patch_status(&api, name, &PostgreSQLStatus::converged(generation)).await?;
            info!(%key, table = %table.name, columns = table.columns.len(), "table converged");
            Ok(Action::requeue(ctx.retries.resync_interval()))
        }
        Err(err) => {
            // Best-effort: the requeue must still be scheduled when the
            // status write itself fails.
            let status = PostgreSQLStatus::failed(err.to_string());
            if let Err(status_err) = patch_status(&api, name, &status).await {
                warn!(%key, error = %status_err, "failed to record error in status");
            }
            Err(err)
        }
    }
}

/// Schedule the retry for a failed reconcile. Nothing is ever dropped as
/// fatal here; external outages are expected to be transient and invalid
/// specs wait on a long interval for a human edit.
pub fn error_policy(obj: Arc<PostgreSQL>, err: &Error, ctx: Arc<Context>) -> Action {
    let key = format!(
        "{}/{}",
        obj.metadata.namespace.as_deref().unwrap_or_default(),
        obj.metadata.name.as_deref().unwrap_or_default()
    );
    let delay = ctx.retries.delay_for(&key, err);
    warn!(%key, error = %err, ?delay, "reconcile failed, requeueing");
    Action::requeue(delay)
}

async fn patch_status(
    api: &Api<PostgreSQL>,
    name: &str,
    status: &PostgreSQLStatus,
) -> Result<(), Error> {
    api.patch_status(
        name,
        &PatchParams::default(),
        &Patch::Merge(&serde_json::json!({ "status": status })),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory stand-in for the external database, with per-statement
    /// failure injection.
    #[derive(Default)]
    struct FakeStore {
        tables: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
        fail_drop: AtomicBool,
        fail_create: AtomicBool,
    }

    impl FakeStore {
        fn seed(&self, table: &str, columns: &[(&str, &str)]) {
            self.tables.lock().unwrap().insert(
                table.to_string(),
                columns
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            );
        }

        fn snapshot(&self) -> BTreeMap<String, BTreeMap<String, String>> {
            self.tables.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TableStore for FakeStore {
        async fn drop_table(&self, table: &TableSpec) -> Result<(), Error> {
            if self.fail_drop.load(Ordering::SeqCst) {
                return Err(Error::Timeout(Duration::from_secs(1)));
            }
            self.tables.lock().unwrap().remove(table.name.as_str());
            Ok(())
        }

        async fn create_table(&self, table: &TableSpec) -> Result<(), Error> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(Error::Timeout(Duration::from_secs(1)));
            }
            let columns = table
                .columns
                .iter()
                .map(|c| (c.name.clone(), c.sql_type.to_string()))
                .collect();
            self.tables
                .lock()
                .unwrap()
                .insert(table.name.as_str().to_string(), columns);
            Ok(())
        }

        async fn current_columns(
            &self,
            table: &TableSpec,
        ) -> Result<Option<BTreeMap<String, String>>, Error> {
            Ok(self.tables.lock().unwrap().get(table.name.as_str()).cloned())
        }
    }

    fn spec(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn converges_from_arbitrary_prior_state() {
        let store = FakeStore::default();
        store.seed("orders", &[("legacy", "BYTEA"), ("junk", "TEXT")]);

        let table = converge(&store, "orders", &spec(&[("col1", "int"), ("col2", "text")]))
            .await
            .unwrap();

        let current = store.current_columns(&table).await.unwrap().unwrap();
        assert_eq!(
            current,
            spec(&[("col1", "INTEGER"), ("col2", "TEXT")])
        );
    }

    #[tokio::test]
    async fn reconciling_twice_is_idempotent() {
        let store = FakeStore::default();
        let desired = spec(&[("id", "uuid"), ("total", "numeric")]);

        let table = converge(&store, "orders", &desired).await.unwrap();
        let first = store.snapshot();
        converge(&store, "orders", &desired).await.unwrap();
        let second = store.snapshot();

        assert_eq!(first, second);
        assert!(store.current_columns(&table).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn drop_failure_leaves_external_state_unchanged() {
        let store = FakeStore::default();
        store.seed("orders", &[("keep", "TEXT")]);
        let before = store.snapshot();
        store.fail_drop.store(true, Ordering::SeqCst);

        let err = converge(&store, "orders", &spec(&[("col1", "int")]))
            .await
            .unwrap_err();

        assert_eq!(err.retry_class(), RetryClass::Transient);
        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn create_failure_is_reported_not_swallowed() {
        let store = FakeStore::default();
        store.seed("orders", &[("keep", "TEXT")]);
        store.fail_create.store(true, Ordering::SeqCst);

        let err = converge(&store, "orders", &spec(&[("col1", "int")]))
            .await
            .unwrap_err();

        // The drop went through, so the table is gone; what matters is that
        // the partial state is surfaced as a retryable failure.
        assert_eq!(err.retry_class(), RetryClass::Transient);
        assert!(store.snapshot().get("orders").is_none());
    }

    #[tokio::test]
    async fn invalid_spec_never_touches_existing_table() {
        let store = FakeStore::default();
        store.seed("orders", &[("keep", "TEXT")]);
        let before = store.snapshot();

        let err = converge(&store, "orders", &spec(&[("bad name", "int")]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidSpec(_)));
        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn reconciling_one_identity_never_mutates_another() {
        let store = FakeStore::default();
        store.seed("other", &[("payload", "JSONB")]);

        converge(&store, "orders", &spec(&[("col1", "int")]))
            .await
            .unwrap();

        assert_eq!(
            store.snapshot().get("other").unwrap(),
            &spec(&[("payload", "JSONB")])
        );
    }

    #[test]
    fn backoff_schedule_is_non_decreasing_and_capped() {
        let cfg = BackoffConfig::default();
        let delays: Vec<Duration> = (1..=12).map(|n| backoff_delay(&cfg, n)).collect();
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0], "schedule decreased: {pair:?}");
        }
        assert_eq!(delays[0], cfg.base);
        assert_eq!(*delays.last().unwrap(), cfg.cap);
    }

    #[test]
    fn backoff_does_not_overflow_at_high_attempt_counts() {
        let cfg = BackoffConfig::default();
        assert_eq!(backoff_delay(&cfg, u32::MAX), cfg.cap);
    }

    #[test]
    fn transient_failures_grow_delay_and_clear_resets_it() {
        let cfg = BackoffConfig::default();
        let tracker = RetryTracker::new(cfg.clone());
        let err = Error::Timeout(Duration::from_secs(1));

        let first = tracker.delay_for("default/orders", &err);
        let second = tracker.delay_for("default/orders", &err);
        assert!(first >= cfg.base);
        assert!(second >= backoff_delay(&cfg, 2));

        tracker.clear("default/orders");
        let reset = tracker.delay_for("default/orders", &err);
        assert!(reset < backoff_delay(&cfg, 2));
    }

    #[test]
    fn identities_back_off_independently() {
        let cfg = BackoffConfig::default();
        let tracker = RetryTracker::new(cfg.clone());
        let err = Error::Timeout(Duration::from_secs(1));

        tracker.delay_for("default/orders", &err);
        tracker.delay_for("default/orders", &err);
        let fresh = tracker.delay_for("default/users", &err);
        assert!(fresh < backoff_delay(&cfg, 2));
    }

    #[test]
    fn invalid_spec_gets_the_long_fixed_interval() {
        let cfg = BackoffConfig::default();
        let tracker = RetryTracker::new(cfg.clone());
        let err = Error::InvalidSpec("nope".into());

        assert_eq!(tracker.delay_for("default/orders", &err), cfg.invalid_spec_requeue);
        // Repeats do not grow; only a spec edit can change the outcome.
        assert_eq!(tracker.delay_for("default/orders", &err), cfg.invalid_spec_requeue);
    }
}
