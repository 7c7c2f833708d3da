//! Periodic miss detection.
//!
//! A run walks every goal, evaluates its most recently concluded period(s)
//! and dispatches at most one penalty per (goal, period). A sweeper claims the
//! period's miss marker before calling the sender and confirms it afterwards,
//! so concurrent sweepers never send the same penalty twice. A claim left
//! pending by a crashed sweeper becomes available again after `claim_ttl`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use futures_util::{stream, StreamExt};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::error::{EngineError, EngineResult};
use super::ledger::CheckinLedger;
use super::penalty::{PenaltyEvent, PenaltySender};
use super::progress::{ProgressResolver, ProgressStatus};
use super::store::{CheckinStore, GoalStore, MissMarkerStore};
use crate::models::goal::Goal;

#[derive(Debug, Clone)]
pub struct SweepOptions {
    /// Goals evaluated concurrently.
    pub concurrency: usize,
    /// Budget for one run; goals not started by then are deferred.
    pub run_deadline: Duration,
    /// Budget for a single sender call.
    pub dispatch_timeout: Duration,
    /// How many concluded periods per goal to re-check.
    pub lookback_periods: u32,
    pub marker_retention: chrono::Duration,
    /// Age after which an unconfirmed claim may be taken over.
    pub claim_ttl: chrono::Duration,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            run_deadline: Duration::from_secs(120),
            dispatch_timeout: Duration::from_secs(10),
            lookback_periods: 1,
            marker_retention: chrono::Duration::days(400),
            claim_ttl: chrono::Duration::minutes(10),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    /// Goals examined in this run.
    pub processed_count: u64,
    pub penalized: u64,
    /// Periods skipped because another run sent or holds the penalty.
    pub already_handled: u64,
    /// Periods (or whole goals, on storage errors) left for the next run.
    pub failed: u64,
    /// Goals not reached before the run deadline.
    pub deferred: u64,
}

#[derive(Debug, Default)]
struct GoalReport {
    examined: bool,
    penalized: u64,
    already_handled: u64,
    failed: u64,
    unsent: Vec<PenaltyEvent>,
}

enum Dispatched {
    Penalized,
    AlreadyHandled,
}

enum DispatchFailure {
    Claim(EngineError),
    Send(String),
    Confirm(EngineError),
}

pub struct MissSweep {
    goals: Arc<dyn GoalStore>,
    checkins: Arc<dyn CheckinStore>,
    markers: Arc<dyn MissMarkerStore>,
    sender: Arc<dyn PenaltySender>,
    resolver: ProgressResolver,
    options: SweepOptions,
    run_lock: Mutex<()>,
}

impl MissSweep {
    pub fn new(
        goals: Arc<dyn GoalStore>,
        checkins: Arc<dyn CheckinStore>,
        markers: Arc<dyn MissMarkerStore>,
        sender: Arc<dyn PenaltySender>,
        resolver: ProgressResolver,
        options: SweepOptions,
    ) -> Self {
        Self {
            goals,
            checkins,
            markers,
            sender,
            resolver,
            options,
            run_lock: Mutex::new(()),
        }
    }

    /// One full pass over all goals as of `now`.
    ///
    /// Runs in this process are serialized; across processes the marker
    /// claim keeps a period from being sent twice.
    pub async fn run(&self, now: NaiveDateTime) -> EngineResult<SweepSummary> {
        let _guard = self.run_lock.lock().await;
        let deadline = Instant::now() + self.options.run_deadline;

        let goals = self.goals.list_goals().await?;
        tracing::debug!(goals = goals.len(), now = %now, "Miss sweep started");

        let reports: Vec<GoalReport> = stream::iter(goals)
            .map(|goal| async move {
                if Instant::now() >= deadline {
                    return GoalReport::default();
                }
                match goal {
                    Ok(goal) => self.sweep_goal(&goal, now).await,
                    Err(e) => {
                        tracing::warn!(error = %e, "Sweep skipped unreadable goal");
                        GoalReport {
                            examined: true,
                            failed: 1,
                            ..Default::default()
                        }
                    }
                }
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;

        let mut summary = SweepSummary::default();
        let mut unsent = Vec::new();
        for report in reports {
            if report.examined {
                summary.processed_count += 1;
            } else {
                summary.deferred += 1;
            }
            summary.penalized += report.penalized;
            summary.already_handled += report.already_handled;
            summary.failed += report.failed;
            unsent.extend(report.unsent);
        }

        // Every goal has had its turn; give failed sends one more try.
        for event in unsent {
            if Instant::now() >= deadline {
                summary.failed += 1;
                continue;
            }
            match self.dispatch(&event).await {
                Ok(Dispatched::Penalized) => summary.penalized += 1,
                Ok(Dispatched::AlreadyHandled) => summary.already_handled += 1,
                Err(failure) => {
                    log_failure(&event, &failure, true);
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            processed = summary.processed_count,
            penalized = summary.penalized,
            already_handled = summary.already_handled,
            failed = summary.failed,
            deferred = summary.deferred,
            "Miss sweep finished"
        );
        Ok(summary)
    }

    /// Drop markers older than the retention window.
    pub async fn prune(&self, now: DateTime<Utc>) -> EngineResult<u64> {
        self.markers
            .prune_markers(now - self.options.marker_retention)
            .await
    }

    async fn sweep_goal(&self, goal: &Goal, now: NaiveDateTime) -> GoalReport {
        let mut report = GoalReport {
            examined: true,
            ..Default::default()
        };

        let periods = self
            .resolver
            .concluded_periods(goal, now, self.options.lookback_periods);
        let (Some(newest), Some(oldest)) = (periods.first(), periods.last()) else {
            return report;
        };

        let records = match self
            .checkins
            .list_checkins(goal.id, oldest.start, newest.end())
            .await
        {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(goal_id = %goal.id, error = %e, "Sweep could not load check-ins");
                report.failed += 1;
                return report;
            }
        };
        let ledger = CheckinLedger::from_records(records);

        for period in &periods {
            let key = period.key();
            match self.markers.has_marker(goal.id, &key).await {
                Ok(true) => {
                    report.already_handled += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(goal_id = %goal.id, period_key = %key, error = %e, "Sweep could not read miss marker");
                    report.failed += 1;
                    continue;
                }
            }

            let ProgressStatus::Missed {
                period_key,
                deadline,
                done,
                required,
            } = self.resolver.evaluate_period(goal, &ledger, period, now)
            else {
                continue;
            };

            let event = PenaltyEvent {
                goal_id: goal.id,
                user_id: goal.user_id,
                title: goal.title.clone(),
                period_key,
                deadline,
                done,
                required,
            };
            match self.dispatch(&event).await {
                Ok(Dispatched::Penalized) => report.penalized += 1,
                Ok(Dispatched::AlreadyHandled) => report.already_handled += 1,
                Err(failure @ DispatchFailure::Send(_)) => {
                    log_failure(&event, &failure, false);
                    report.unsent.push(event);
                }
                Err(failure) => {
                    log_failure(&event, &failure, false);
                    report.failed += 1;
                }
            }
        }
        report
    }

    async fn dispatch(&self, event: &PenaltyEvent) -> Result<Dispatched, DispatchFailure> {
        let stale_before = Utc::now() - self.options.claim_ttl;
        match self
            .markers
            .claim_marker(event.goal_id, &event.period_key, stale_before)
            .await
        {
            Ok(marker) if marker.claimed_at > marker.created_at => tracing::info!(
                goal_id = %event.goal_id,
                period_key = %event.period_key,
                first_claimed_at = %marker.created_at,
                "Taking over an abandoned claim"
            ),
            Ok(_) => {}
            Err(EngineError::DuplicateMiss { .. }) => {
                tracing::debug!(
                    goal_id = %event.goal_id,
                    period_key = %event.period_key,
                    "Period already sent or claimed by another run"
                );
                return Ok(Dispatched::AlreadyHandled);
            }
            Err(e) => return Err(DispatchFailure::Claim(e)),
        }

        let sent = match tokio::time::timeout(self.options.dispatch_timeout, self.sender.send(event)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("sender timed out".to_string()),
        };
        if let Err(reason) = sent {
            if let Err(e) = self
                .markers
                .release_marker(event.goal_id, &event.period_key)
                .await
            {
                tracing::warn!(
                    goal_id = %event.goal_id,
                    period_key = %event.period_key,
                    error = %e,
                    "Could not release claim; it will expire"
                );
            }
            return Err(DispatchFailure::Send(reason));
        }

        self.markers
            .confirm_marker(event.goal_id, &event.period_key)
            .await
            .map_err(DispatchFailure::Confirm)?;
        Ok(Dispatched::Penalized)
    }
}

fn log_failure(event: &PenaltyEvent, failure: &DispatchFailure, final_attempt: bool) {
    match failure {
        DispatchFailure::Claim(e) => tracing::warn!(
            goal_id = %event.goal_id,
            period_key = %event.period_key,
            error = %e,
            "Could not claim miss marker"
        ),
        DispatchFailure::Send(reason) => tracing::warn!(
            goal_id = %event.goal_id,
            period_key = %event.period_key,
            final_attempt,
            error = %reason,
            "Penalty dispatch failed"
        ),
        DispatchFailure::Confirm(e) => tracing::error!(
            goal_id = %event.goal_id,
            period_key = %event.period_key,
            error = %e,
            "Penalty sent but miss marker not confirmed; claim stays pending until it expires"
        ),
    }
}
