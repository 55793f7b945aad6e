//! Plan execution with checkpointing and resumability.
//!
//! The applier walks a plan's phases in order. Within a phase, consecutive
//! parallel-safe operations are dispatched concurrently and their log
//! records are appended in operation-id order, so the execution log is
//! deterministic regardless of physical completion order. A checkpoint is
//! written at every phase boundary; a failed or cancelled run resumes from
//! the latest one.

pub mod handlers;
pub mod state;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use tracing::{debug, info};

use crate::errors::{ApplyError, OperationFailure};
use crate::plan::{Operation, Phase, PhaseName, Plan};

pub use handlers::ApplyContext;
pub use state::{
    ApplyState, ApplyStatus, Checkpoint, ExecutionLogEntry, OperationStatus, StateStore,
};

pub struct Applier {
    ctx: Arc<ApplyContext>,
    store: StateStore,
    cancelled: Arc<AtomicBool>,
}

impl Applier {
    pub fn new(ctx: ApplyContext, store: StateStore) -> Self {
        Self {
            ctx: Arc::new(ctx),
            store,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle callers can flip to cancel the run at the next operation
    /// boundary. Cancellation pauses the state; it is not a failure.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Execute a plan from scratch.
    pub async fn execute(&self, plan: &Plan) -> Result<ApplyState, ApplyError> {
        let state = ApplyState::for_plan(plan);
        self.store.save(&state)?;
        self.run(plan, state).await
    }

    /// Resume a previous run from its latest checkpoint. Phases at or
    /// before the checkpointed phase are skipped, as are operations the
    /// restored state already marks completed.
    pub async fn resume(&self, plan: &Plan, state_id: &str) -> Result<ApplyState, ApplyError> {
        let state = self.store.load(state_id)?;
        if state.status == ApplyStatus::Completed {
            println!("Apply state {state_id} is already completed");
            return Ok(state);
        }
        let restored = match self.store.restore_latest(state_id) {
            Ok(restored) => restored,
            // Failed before the first phase boundary: nothing durable to
            // roll back to, so continue from the persisted state itself.
            Err(ApplyError::CheckpointNotFound(_)) => {
                let mut state = state;
                state.transition(ApplyStatus::Paused);
                state
            }
            Err(err) => return Err(err),
        };
        println!(
            "Resuming {} from checkpoint after phase {}",
            state_id,
            restored
                .current_phase
                .map(|p| p.to_string())
                .unwrap_or_else(|| "<none>".into())
        );
        self.run(plan, restored).await
    }

    async fn run(&self, plan: &Plan, mut state: ApplyState) -> Result<ApplyState, ApplyError> {
        if state.status == ApplyStatus::Completed {
            return Ok(state);
        }

        let resume_after = state.checkpoints.last().map(|c| c.phase);
        state.transition(ApplyStatus::Running);
        self.store.save(&state)?;
        info!(state_id = %state.state_id, plan_id = %plan.plan_id, "apply running");

        for phase in &plan.phases {
            if let Some(after) = resume_after {
                if phase.name <= after {
                    debug!(phase = %phase.name, "phase covered by checkpoint; skipping");
                    continue;
                }
            }

            if self.cancelled.load(Ordering::Relaxed) {
                state.transition(ApplyStatus::Paused);
                self.store.save(&state)?;
                return Err(ApplyError::Cancelled {
                    phase: phase.name.to_string(),
                });
            }

            println!("==> {}: {}", phase.name, phase.description);
            state.current_phase = Some(phase.name);
            self.store.save(&state)?;

            match self.run_phase(plan, phase, &mut state).await {
                Ok(()) => {
                    self.store.checkpoint(
                        &mut state,
                        phase.name,
                        &format!("after {}", phase.name),
                    )?;
                }
                Err(failure) => {
                    state.failure = Some(failure.clone());
                    state.transition(ApplyStatus::Failed);
                    self.store.save(&state)?;
                    println!(
                        "Apply failed: operation {} in phase {}: {}",
                        failure.operation_id, failure.phase, failure.message
                    );
                    println!("State {} can be resumed after the cause is fixed", state.state_id);
                    return Err(failure.into());
                }
            }
        }

        state.current_phase = None;
        state.transition(ApplyStatus::Completed);
        self.store.save(&state)?;
        println!("Apply {} completed", state.state_id);
        Ok(state)
    }

    async fn run_phase(
        &self,
        plan: &Plan,
        phase: &Phase,
        state: &mut ApplyState,
    ) -> Result<(), OperationFailure> {
        let mut index = 0;
        while index < phase.operations.len() {
            if self.cancelled.load(Ordering::Relaxed) {
                // Surface cancellation at the outer loop; leave the phase
                // un-checkpointed so resume re-enters it.
                return Ok(());
            }

            let operation = &phase.operations[index];
            if operation.parallel {
                let mut batch = Vec::new();
                while index < phase.operations.len() && phase.operations[index].parallel {
                    batch.push(&phase.operations[index]);
                    index += 1;
                }
                self.run_parallel(plan, phase.name, &batch, state).await?;
            } else {
                self.run_single(plan, phase.name, operation, state).await?;
                index += 1;
            }
        }
        Ok(())
    }

    async fn run_single(
        &self,
        plan: &Plan,
        phase: PhaseName,
        operation: &Operation,
        state: &mut ApplyState,
    ) -> Result<(), OperationFailure> {
        if state.operation_completed(&operation.id) {
            debug!(operation = %operation.id, "already completed; skipping");
            return Ok(());
        }

        println!("  -> {}", operation.description);
        state.log(phase, &operation.id, "started", None);
        state.set_operation_status(&operation.id, OperationStatus::Running);
        let _ = self.store.save(state);

        let result = self.apply_operation(plan, phase, operation).await;
        match result {
            Ok(()) => {
                state.log(phase, &operation.id, "completed", None);
                state.set_operation_status(&operation.id, OperationStatus::Completed);
                let _ = self.store.save(state);
                Ok(())
            }
            Err(failure) => {
                state.log(
                    phase,
                    &operation.id,
                    "failed",
                    Some(failure.message.clone()),
                );
                state.set_operation_status(&operation.id, OperationStatus::Failed);
                let _ = self.store.save(state);
                Err(failure)
            }
        }
    }

    /// Run a batch of parallel-safe operations concurrently. Log entries
    /// and statuses are recorded in operation-id order; the first failure
    /// in that order is returned after every worker finishes.
    async fn run_parallel(
        &self,
        plan: &Plan,
        phase: PhaseName,
        batch: &[&Operation],
        state: &mut ApplyState,
    ) -> Result<(), OperationFailure> {
        let mut pending: Vec<&Operation> = batch
            .iter()
            .copied()
            .filter(|op| !state.operation_completed(&op.id))
            .collect();
        pending.sort_by(|a, b| a.id.cmp(&b.id));
        if pending.is_empty() {
            return Ok(());
        }

        for operation in &pending {
            println!("  -> {}", operation.description);
            state.log(phase, &operation.id, "started", None);
            state.set_operation_status(&operation.id, OperationStatus::Running);
        }
        let _ = self.store.save(state);

        let futures = pending.iter().map(|operation| {
            let operation = (*operation).clone();
            async move {
                let result = self.apply_operation(plan, phase, &operation).await;
                (operation.id.clone(), result)
            }
        });
        let mut results: Vec<(String, Result<(), OperationFailure>)> = join_all(futures).await;
        results.sort_by(|a, b| a.0.cmp(&b.0));

        let mut first_failure = None;
        for (operation_id, result) in results {
            match result {
                Ok(()) => {
                    state.log(phase, &operation_id, "completed", None);
                    state.set_operation_status(&operation_id, OperationStatus::Completed);
                }
                Err(failure) => {
                    state.log(phase, &operation_id, "failed", Some(failure.message.clone()));
                    state.set_operation_status(&operation_id, OperationStatus::Failed);
                    if first_failure.is_none() {
                        first_failure = Some(failure);
                    }
                }
            }
        }
        let _ = self.store.save(state);

        match first_failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    /// Pre-conditions, then the handler (or a dry-run trace).
    async fn apply_operation(
        &self,
        plan: &Plan,
        phase: PhaseName,
        operation: &Operation,
    ) -> Result<(), OperationFailure> {
        let report = handlers::evaluate_preconditions(&self.ctx, plan, operation).await;
        for warning in &report.warnings {
            println!("Warning: {warning}");
        }
        if let Some(failed) = report.failed {
            if plan.dry_run {
                println!("Warning: pre-condition not yet satisfied (dry run): {failed}");
            } else {
                return Err(OperationFailure::precondition(
                    &operation.id,
                    phase.as_str(),
                    failed,
                ));
            }
        }

        if plan.dry_run {
            for change in &operation.changes {
                println!(
                    "  (dry run) would {:?} {} {}",
                    change.action, change.resource_type, change.resource_id
                );
            }
            return Ok(());
        }

        handlers::execute_operation(&self.ctx, plan, operation)
            .await
            .map_err(|err| {
                OperationFailure::terminal(&operation.id, phase.as_str(), format!("{err:#}"))
            })
    }
}
