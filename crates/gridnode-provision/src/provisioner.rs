//! Dispatch of lifecycle calls to per-type managers.
//!
//! [`MapProvisioner`] is a fixed routing table built at startup. It folds
//! each manager outcome into a [`Verdict`], whose
//! [`into_result`](Verdict::into_result) is the result to persist.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use gridnode_types::{
    ResultState, TypeRegistry, WorkloadResult, WorkloadType, WorkloadWithId, now,
};
use tracing::{debug, error, warn};

use crate::context::Context;
use crate::counters::Counters;
use crate::error::{ProvisionError, ProvisionResult};
use crate::manager::{Failure, Manager, ManagerResult, Outcome};
use crate::redact::redact;

// ── Verdict ────────────────────────────────────────────────────

/// Closed set of lifecycle outcomes as seen by the reconciliation loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Ok(WorkloadResult),
    /// Already in the desired state; carries the result to keep.
    NoAction(WorkloadResult),
    /// Change refused, existing state still valid.
    Unchanged {
        previous: WorkloadResult,
        reason: String,
    },
    Paused(WorkloadResult),
    Failed(WorkloadResult),
}

impl Verdict {
    /// Fold a manager outcome, given the workload's last persisted result.
    pub fn from_outcome(previous: &WorkloadResult, outcome: ManagerResult, redact_errors: bool) -> Self {
        let message = |failure: &Failure| {
            let msg = failure.to_string();
            if redact_errors { redact(&msg) } else { msg }
        };

        match outcome {
            Ok(Outcome::Ok(data)) => Verdict::Ok(WorkloadResult {
                created: now(),
                state: ResultState::Ok,
                error: String::new(),
                data,
            }),
            Ok(Outcome::NoActionNeeded(data)) => {
                if previous.is_nil() {
                    Verdict::NoAction(WorkloadResult {
                        created: now(),
                        state: ResultState::Ok,
                        error: String::new(),
                        data,
                    })
                } else {
                    Verdict::NoAction(previous.clone())
                }
            }
            Ok(Outcome::Paused) => Verdict::Paused(WorkloadResult {
                created: now(),
                state: ResultState::Paused,
                error: "paused".into(),
                data: previous.data.clone(),
            }),
            Err(failure @ Failure::Unchanged(_)) => Verdict::Unchanged {
                previous: previous.clone(),
                reason: message(&failure),
            },
            Err(failure @ Failure::Failed(_)) => Verdict::Failed(WorkloadResult {
                created: now(),
                state: ResultState::Error,
                error: message(&failure),
                data: serde_json::Value::Null,
            }),
        }
    }

    /// The result to persist for this verdict.
    ///
    /// `Unchanged` keeps the previous state and data and records the reason.
    pub fn into_result(self) -> WorkloadResult {
        match self {
            Verdict::Ok(r) | Verdict::NoAction(r) | Verdict::Paused(r) | Verdict::Failed(r) => r,
            Verdict::Unchanged { previous, reason } => WorkloadResult {
                created: now(),
                error: reason,
                ..previous
            },
        }
    }

    /// State the workload ends up in once the verdict is persisted.
    pub fn state(&self) -> ResultState {
        match self {
            Verdict::Ok(r) | Verdict::NoAction(r) | Verdict::Paused(r) | Verdict::Failed(r) => {
                r.state
            }
            Verdict::Unchanged { previous, .. } => previous.state,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Verdict::Failed(_))
    }
}

// ── Provisioner contract ───────────────────────────────────────

/// Lifecycle entry points consumed by the reconciliation loop.
///
/// `Err` is reserved for engine errors: unknown types, admission denial,
/// cancellation. Handler failures come back as [`Verdict::Failed`].
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(&self, ctx: &Context, wl: &WorkloadWithId) -> ProvisionResult<Verdict>;

    async fn deprovision(&self, ctx: &Context, wl: &WorkloadWithId) -> ProvisionResult<()>;

    async fn update(&self, ctx: &Context, wl: &WorkloadWithId) -> ProvisionResult<Verdict>;

    async fn pause(&self, ctx: &Context, wl: &WorkloadWithId) -> ProvisionResult<Verdict>;

    async fn resume(&self, ctx: &Context, wl: &WorkloadWithId) -> ProvisionResult<Verdict>;

    /// Whether the manager for `typ` applies live updates.
    fn can_update(&self, typ: &WorkloadType) -> bool;
}

// ── Dispatcher ─────────────────────────────────────────────────

/// Static type → manager routing table.
///
/// Holds no per-workload state. The optional [`Counters`] are updated on
/// successful provision and decommission.
pub struct MapProvisioner {
    managers: HashMap<WorkloadType, Arc<dyn Manager>>,
    registry: Arc<TypeRegistry>,
    counters: Option<Arc<Counters>>,
    redact_errors: bool,
}

impl MapProvisioner {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            managers: HashMap::new(),
            registry,
            counters: None,
            redact_errors: true,
        }
    }

    pub fn with_manager(mut self, typ: impl Into<WorkloadType>, manager: Arc<dyn Manager>) -> Self {
        self.managers.insert(typ.into(), manager);
        self
    }

    pub fn with_counters(mut self, counters: Arc<Counters>) -> Self {
        self.counters = Some(counters);
        self
    }

    pub fn with_redaction(mut self, enabled: bool) -> Self {
        self.redact_errors = enabled;
        self
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn counters(&self) -> Option<&Arc<Counters>> {
        self.counters.as_ref()
    }

    /// Registered types that have no manager.
    pub fn unhandled_types(&self) -> Vec<WorkloadType> {
        self.registry
            .types()
            .into_iter()
            .filter(|typ| !self.managers.contains_key(typ))
            .collect()
    }

    fn manager(&self, wl: &WorkloadWithId) -> ProvisionResult<&Arc<dyn Manager>> {
        self.managers.get(&wl.typ).ok_or_else(|| {
            error!(workload_id = %wl.id, typ = %wl.typ, "no manager for workload type");
            ProvisionError::UnknownType(wl.typ.to_string())
        })
    }

    fn verdict(&self, wl: &WorkloadWithId, op: &str, outcome: ManagerResult) -> Verdict {
        let verdict = Verdict::from_outcome(&wl.result, outcome, self.redact_errors);
        match &verdict {
            Verdict::Failed(result) => {
                warn!(workload_id = %wl.id, op, error = %result.error, "workload operation failed");
            }
            Verdict::Unchanged { reason, .. } => {
                debug!(workload_id = %wl.id, op, reason = %reason, "workload left unchanged");
            }
            _ => debug!(workload_id = %wl.id, op, state = %verdict.state(), "workload operation done"),
        }
        verdict
    }

    fn count_up(&self, wl: &WorkloadWithId) {
        if let Some(counters) = &self.counters {
            if let Err(e) = counters.increment(&self.registry, wl) {
                warn!(workload_id = %wl.id, error = %e, "failed to account workload capacity");
            }
        }
    }

    fn count_down(&self, wl: &WorkloadWithId) {
        if let Some(counters) = &self.counters {
            if let Err(e) = counters.decrement(&self.registry, wl) {
                warn!(workload_id = %wl.id, error = %e, "failed to release workload capacity");
            }
        }
    }
}

#[async_trait]
impl Provisioner for MapProvisioner {
    async fn provision(&self, ctx: &Context, wl: &WorkloadWithId) -> ProvisionResult<Verdict> {
        let manager = self.manager(wl)?;
        ctx.check()?;
        let verdict = self.verdict(wl, "provision", manager.provision(ctx, wl).await);
        if matches!(verdict, Verdict::Ok(_)) {
            self.count_up(wl);
        }
        Ok(verdict)
    }

    async fn deprovision(&self, ctx: &Context, wl: &WorkloadWithId) -> ProvisionResult<()> {
        let manager = self.manager(wl)?;
        ctx.check()?;
        if let Err(e) = manager.deprovision(ctx, wl).await {
            let msg = format!("{e:#}");
            let msg = if self.redact_errors { redact(&msg) } else { msg };
            warn!(workload_id = %wl.id, error = %msg, "failed to deprovision workload");
            return Err(ProvisionError::Deprovision(msg));
        }
        if wl.result.state.is_okay() {
            self.count_down(wl);
        }
        debug!(workload_id = %wl.id, "workload deprovisioned");
        Ok(())
    }

    async fn update(&self, ctx: &Context, wl: &WorkloadWithId) -> ProvisionResult<Verdict> {
        let manager = self.manager(wl)?;
        ctx.check()?;
        let verdict = self.verdict(wl, "update", manager.update(ctx, wl).await);
        if matches!(verdict, Verdict::Ok(_)) {
            // Swap the previous version's capacity for the new one.
            if let Ok(previous) = ctx.get_workload(&wl.name) {
                if previous.result.state.is_okay() {
                    self.count_down(&previous);
                }
            }
            self.count_up(wl);
        }
        Ok(verdict)
    }

    async fn pause(&self, ctx: &Context, wl: &WorkloadWithId) -> ProvisionResult<Verdict> {
        let manager = self.manager(wl)?;
        if wl.result.state != ResultState::Ok {
            return Err(ProvisionError::InvalidState {
                op: "pause",
                state: wl.result.state,
            });
        }
        ctx.check()?;
        Ok(self.verdict(wl, "pause", manager.pause(ctx, wl).await))
    }

    async fn resume(&self, ctx: &Context, wl: &WorkloadWithId) -> ProvisionResult<Verdict> {
        let manager = self.manager(wl)?;
        if wl.result.state != ResultState::Paused {
            return Err(ProvisionError::InvalidState {
                op: "resume",
                state: wl.result.state,
            });
        }
        ctx.check()?;
        Ok(self.verdict(wl, "resume", manager.resume(ctx, wl).await))
    }

    fn can_update(&self, typ: &WorkloadType) -> bool {
        self.managers
            .get(typ)
            .is_some_and(|manager| manager.supports_update())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use gridnode_types::{Workload, WorkloadId, zos};
    use serde_json::{Value, json};

    fn previous_ok() -> WorkloadResult {
        WorkloadResult {
            created: 100,
            state: ResultState::Ok,
            error: String::new(),
            data: json!({ "path": "/mnt/vol" }),
        }
    }

    #[test]
    fn ok_builds_fresh_result() {
        let verdict = Verdict::from_outcome(&WorkloadResult::default(), Ok(Outcome::Ok(json!(1))), true);
        let result = verdict.into_result();
        assert_eq!(result.state, ResultState::Ok);
        assert_eq!(result.data, json!(1));
        assert!(result.created > 0);
    }

    #[test]
    fn no_action_preserves_previous_result() {
        let previous = previous_ok();
        let verdict = Verdict::from_outcome(&previous, Ok(Outcome::NoActionNeeded(json!("new"))), true);
        assert_eq!(verdict, Verdict::NoAction(previous));
    }

    #[test]
    fn no_action_without_previous_uses_payload() {
        let verdict = Verdict::from_outcome(
            &WorkloadResult::default(),
            Ok(Outcome::NoActionNeeded(json!("data"))),
            true,
        );
        let result = verdict.into_result();
        assert_eq!(result.state, ResultState::Ok);
        assert_eq!(result.data, json!("data"));
    }

    #[test]
    fn unchanged_keeps_previous_state() {
        let previous = previous_ok();
        let verdict = Verdict::from_outcome(
            &previous,
            Err(Failure::unchanged(anyhow::anyhow!("cannot shrink"))),
            true,
        );
        assert_eq!(verdict.state(), ResultState::Ok);
        let result = verdict.into_result();
        assert_eq!(result.state, ResultState::Ok);
        assert_eq!(result.error, "cannot shrink");
        assert_eq!(result.data, previous.data);
    }

    #[test]
    fn failure_is_redacted() {
        let failure = Failure::failed(anyhow::anyhow!(
            "device 0123abcd-0000-1111-2222-333344445555 busy"
        ));
        let verdict = Verdict::from_outcome(&previous_ok(), Err(failure), true);
        assert!(verdict.is_failed());
        let result = verdict.into_result();
        assert_eq!(result.state, ResultState::Error);
        assert_eq!(result.error, "device 0123abcd-*** busy");
        assert_eq!(result.data, Value::Null);
    }

    #[test]
    fn redaction_can_be_disabled() {
        let failure = Failure::failed(anyhow::anyhow!("0123abcd-0000-1111-2222-333344445555"));
        let result = Verdict::from_outcome(&previous_ok(), Err(failure), false).into_result();
        assert_eq!(result.error, "0123abcd-0000-1111-2222-333344445555");
    }

    #[test]
    fn paused_records_message() {
        let result = Verdict::from_outcome(&previous_ok(), Ok(Outcome::Paused), true).into_result();
        assert_eq!(result.state, ResultState::Paused);
        assert_eq!(result.error, "paused");
        assert_eq!(result.data, json!({ "path": "/mnt/vol" }));
    }

    // ── Dispatcher ──

    #[derive(Default)]
    struct Recording {
        provisions: AtomicUsize,
        deprovisions: AtomicUsize,
    }

    #[async_trait]
    impl Manager for Recording {
        async fn provision(&self, _ctx: &Context, wl: &WorkloadWithId) -> ManagerResult {
            let n = self.provisions.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Ok(Outcome::Ok(json!({ "name": wl.name })))
            } else {
                Ok(Outcome::NoActionNeeded(json!({ "name": wl.name })))
            }
        }

        async fn deprovision(&self, _ctx: &Context, _wl: &WorkloadWithId) -> anyhow::Result<()> {
            self.deprovisions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn volume(name: &str, size: u64) -> WorkloadWithId {
        WorkloadWithId::new(
            WorkloadId::new(1, 1, name).unwrap(),
            Workload::new(name, zos::VOLUME_TYPE, json!({ "size": size })),
        )
    }

    fn dispatcher(manager: Arc<Recording>) -> MapProvisioner {
        let registry = zos::default_registry();
        let counters = Arc::new(Counters::new(&registry));
        MapProvisioner::new(registry)
            .with_manager(zos::VOLUME_TYPE, manager)
            .with_counters(counters)
    }

    #[tokio::test]
    async fn unknown_type_is_an_error() {
        let provisioner = dispatcher(Arc::new(Recording::default()));
        let wl = WorkloadWithId::new(
            WorkloadId::new(1, 1, "db").unwrap(),
            Workload::new("db", zos::ZDB_TYPE, json!({ "size": 1 })),
        );
        let err = provisioner.provision(&Context::background(), &wl).await.unwrap_err();
        assert!(matches!(err, ProvisionError::UnknownType(t) if t == "zdb"));
        assert!(!provisioner.can_update(&zos::ZDB_TYPE.into()));
        assert!(provisioner.unhandled_types().contains(&zos::ZDB_TYPE.into()));
    }

    #[tokio::test]
    async fn repeated_provision_is_counted_once() {
        let manager = Arc::new(Recording::default());
        let provisioner = dispatcher(Arc::clone(&manager));
        let ctx = Context::background();
        let mut wl = volume("vol", 2048);

        let first = provisioner.provision(&ctx, &wl).await.unwrap();
        assert!(matches!(first, Verdict::Ok(_)));
        wl.result = first.into_result();

        let second = provisioner.provision(&ctx, &wl).await.unwrap();
        assert_eq!(second, Verdict::NoAction(wl.result.clone()));

        let counters = provisioner.counters().unwrap();
        assert_eq!(counters.current().sru, 2048);
        assert_eq!(counters.workload_count(&zos::VOLUME_TYPE.into()), 1);

        provisioner.deprovision(&ctx, &wl).await.unwrap();
        assert_eq!(counters.current().sru, 0);
        assert_eq!(manager.deprovisions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pause_and_resume_require_matching_state() {
        let provisioner = dispatcher(Arc::new(Recording::default()));
        let ctx = Context::background();
        let mut wl = volume("vol", 1);

        let err = provisioner.pause(&ctx, &wl).await.unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidState { op: "pause", .. }));

        wl.result = previous_ok();
        let paused = provisioner.pause(&ctx, &wl).await.unwrap();
        assert_eq!(paused.state(), ResultState::Paused);
        assert!(provisioner.resume(&ctx, &wl).await.is_err());

        wl.result = paused.into_result();
        let resumed = provisioner.resume(&ctx, &wl).await.unwrap();
        assert_eq!(resumed.state(), ResultState::Ok);
    }

    #[tokio::test]
    async fn update_without_support_is_unchanged() {
        let provisioner = dispatcher(Arc::new(Recording::default()));
        let mut wl = volume("vol", 1);
        wl.result = previous_ok();

        assert!(!provisioner.can_update(&zos::VOLUME_TYPE.into()));
        let verdict = provisioner.update(&Context::background(), &wl).await.unwrap();
        assert!(matches!(verdict, Verdict::Unchanged { .. }));
        assert_eq!(verdict.state(), ResultState::Ok);
    }

    #[tokio::test]
    async fn cancelled_context_skips_manager() {
        let manager = Arc::new(Recording::default());
        let provisioner = dispatcher(Arc::clone(&manager));
        let (tx, rx) = tokio::sync::watch::channel(true);
        let ctx = Context::background().with_cancel(rx);

        let err = provisioner.provision(&ctx, &volume("vol", 1)).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Cancelled));
        assert_eq!(manager.provisions.load(Ordering::SeqCst), 0);
        drop(tx);
    }
}
