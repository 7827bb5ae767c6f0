use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::usecases::reconcile_stale_payments::{
    ReconcileParams, ReconcileResult, ReconcileStalePaymentsUseCase,
};

#[derive(Debug, Clone, PartialEq)]
pub enum SweepOutcome {
    Completed(ReconcileResult),
    SkippedAlreadyRunning,
}

/// Periodic sweep with a run-in-progress guard shared by the timer and the
/// manual trigger. At most one sweep runs at a time.
pub struct ReconciliationScheduler {
    usecase: Arc<ReconcileStalePaymentsUseCase>,
    params: ReconcileParams,
    running: AtomicBool,
}

struct RunGuard<'a> {
    running: &'a AtomicBool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

impl ReconciliationScheduler {
    pub fn new(usecase: Arc<ReconcileStalePaymentsUseCase>, params: ReconcileParams) -> Self {
        Self {
            usecase,
            params,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn run_once(&self) -> Result<SweepOutcome> {
        let Some(_guard) = self.try_begin() else {
            warn!("reconciliation_scheduler: sweep already running; skipping");
            return Ok(SweepOutcome::SkippedAlreadyRunning);
        };

        let result = self.usecase.run(&self.params).await?;
        Ok(SweepOutcome::Completed(result))
    }

    /// Runs forever. The first tick fires immediately; overdue ticks are skipped.
    pub async fn run(self: Arc<Self>, every: Duration) -> Result<()> {
        info!(interval_secs = every.as_secs(), "reconciliation_scheduler: starting");
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let Err(err) = self.run_once().await {
                error!(error = ?err, "reconciliation_scheduler: sweep failed");
            }
        }
    }

    fn try_begin(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard {
                running: &self.running,
            })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use crates::{
        application::{
            payment_notifications::PaymentNotifier, payment_state_machine::PaymentStateMachine,
        },
        domain::{
            clock::ManualClock,
            entities::payments::PaymentEntity,
            repositories::{notifications::MockNotificationSink, payments::PaymentRepository},
            value_objects::enums::{
                payment_methods::PaymentMethod, payment_statuses::PaymentStatus,
            },
        },
        infra::memory::payments::InMemoryPaymentRepository,
        payments::gateway::GatewayRegistry,
    };
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::*;

    struct Fixture {
        scheduler: Arc<ReconciliationScheduler>,
        store: InMemoryPaymentRepository,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
        ));
        let store = InMemoryPaymentRepository::new();
        let repository: Arc<dyn PaymentRepository + Send + Sync> = Arc::new(store.clone());
        let mut sink = MockNotificationSink::new();
        sink.expect_notify().returning(|_, _| Ok(()));

        let usecase = ReconcileStalePaymentsUseCase::new(
            Arc::clone(&repository),
            PaymentStateMachine::new(repository, clock.clone()),
            GatewayRegistry::new(),
            PaymentNotifier::new(Arc::new(sink)),
            clock.clone(),
        );
        let scheduler = ReconciliationScheduler::new(
            Arc::new(usecase),
            ReconcileParams {
                stale_after: ChronoDuration::minutes(30),
                limit: None,
                gateway_check: None,
            },
        );

        Fixture {
            scheduler: Arc::new(scheduler),
            store,
            clock,
        }
    }

    fn pending_at(created_at: chrono::DateTime<Utc>) -> PaymentEntity {
        PaymentEntity {
            id: Uuid::new_v4(),
            appointment_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            amount: dec!(300000),
            method: PaymentMethod::MoMo,
            status: PaymentStatus::Pending,
            transaction_id: None,
            refund_of: None,
            failure_reason: None,
            description: None,
            created_at,
            settled_at: None,
        }
    }

    #[tokio::test]
    async fn advancing_the_clock_makes_rows_stale() {
        let f = fixture();
        f.store
            .seed(pending_at(Utc.with_ymd_and_hms(2025, 3, 1, 8, 50, 0).unwrap()))
            .await;

        let first = f.scheduler.run_once().await.unwrap();
        assert!(matches!(first, SweepOutcome::Completed(ref r) if r.scanned == 0));
        assert_eq!(f.store.snapshot().await[0].status, PaymentStatus::Pending);

        f.clock.advance(ChronoDuration::minutes(30));
        let second = f.scheduler.run_once().await.unwrap();
        assert!(matches!(second, SweepOutcome::Completed(ref r) if r.failed == 1));
        assert_eq!(f.store.snapshot().await[0].status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn overlapping_run_is_skipped() {
        let f = fixture();
        f.store
            .seed(pending_at(Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()))
            .await;

        let guard = f.scheduler.try_begin();
        assert!(guard.is_some());
        assert!(f.scheduler.is_running());

        let skipped = f.scheduler.run_once().await.unwrap();
        assert_eq!(skipped, SweepOutcome::SkippedAlreadyRunning);
        assert_eq!(f.store.snapshot().await[0].status, PaymentStatus::Pending);

        drop(guard);
        assert!(!f.scheduler.is_running());
        let ran = f.scheduler.run_once().await.unwrap();
        assert!(matches!(ran, SweepOutcome::Completed(ref r) if r.failed == 1));
    }

    #[tokio::test]
    async fn guard_is_released_after_each_run() {
        let f = fixture();
        f.scheduler.run_once().await.unwrap();
        assert!(!f.scheduler.is_running());
        assert!(matches!(
            f.scheduler.run_once().await.unwrap(),
            SweepOutcome::Completed(_)
        ));
    }
}
