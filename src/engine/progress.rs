use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

use super::calendar::{Period, PeriodScope};
use super::error::{EngineError, EngineResult};
use super::ledger::CheckinLedger;
use super::recurrence::{Evaluator, Recurrence};
use crate::models::goal::Goal;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProgressStatus {
    NotActiveToday {
        next_active_date: Option<NaiveDate>,
    },
    InProgress {
        done: u32,
        required: u32,
    },
    Satisfied {
        done: u32,
        required: u32,
    },
    Missed {
        period_key: String,
        deadline: NaiveDateTime,
        done: u32,
        required: u32,
    },
}

/// Coarse grouping for the goal history view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalBucket {
    Upcoming,
    Active,
    Completed,
    Missed,
    Ended,
}

/// When a period stops accepting check-ins for miss purposes.
///
/// The deadline is `reset_time` on the period's last day, or midnight at the
/// end of that day when the goal has no reset time.
pub fn period_deadline(goal: &Goal, period: &Period) -> NaiveDateTime {
    let last_day = period.end();
    match goal.reset_time {
        Some(reset) => last_day.and_time(reset),
        None => last_day
            .succ_opt()
            .map(|next| next.and_time(NaiveTime::MIN))
            .unwrap_or_else(|| last_day.and_time(NaiveTime::MIN)),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressResolver {
    evaluator: Evaluator,
}

impl ProgressResolver {
    pub fn new(evaluator: Evaluator) -> Self {
        Self { evaluator }
    }

    /// Rejects a check-in for `date` unless the goal is due that day and the
    /// period holding it has not passed its deadline.
    pub fn check_open(&self, goal: &Goal, date: NaiveDate, now: NaiveDateTime) -> EngineResult<()> {
        if !self.evaluator.is_active_on(goal, date) {
            return Err(EngineError::InvalidDate(format!(
                "goal is not active on {}",
                date
            )));
        }
        let period = Period::containing(date, goal.scope());
        let deadline = period_deadline(goal, &period);
        if now >= deadline {
            return Err(EngineError::InvalidDate(format!(
                "period {} closed at {}",
                period.key(),
                deadline
            )));
        }
        Ok(())
    }

    /// Status of the goal for the period containing `now`.
    pub fn evaluate(&self, goal: &Goal, ledger: &CheckinLedger, now: NaiveDateTime) -> ProgressStatus {
        let today = now.date();
        if !self.evaluator.is_active_on(goal, today) {
            return ProgressStatus::NotActiveToday {
                next_active_date: self.evaluator.next_active_date(goal, today),
            };
        }
        let period = Period::containing(today, goal.scope());
        self.evaluate_period(goal, ledger, &period, now)
    }

    pub fn evaluate_period(
        &self,
        goal: &Goal,
        ledger: &CheckinLedger,
        period: &Period,
        now: NaiveDateTime,
    ) -> ProgressStatus {
        let required = self.required_for(goal, period);
        if required == 0 {
            return ProgressStatus::NotActiveToday {
                next_active_date: self.evaluator.next_active_date(goal, now.date()),
            };
        }

        // Weekly targets count distinct active days, not summed counts.
        let done = match period.scope {
            PeriodScope::Day => ledger.get_count(goal.id, period.start),
            PeriodScope::Week => period
                .days()
                .filter(|day| {
                    ledger.get_count(goal.id, *day) > 0 && self.evaluator.is_active_on(goal, *day)
                })
                .count() as u32,
        };
        if done >= required {
            return ProgressStatus::Satisfied { done, required };
        }

        let deadline = period_deadline(goal, period);
        if now >= deadline {
            ProgressStatus::Missed {
                period_key: period.key(),
                deadline,
                done,
                required,
            }
        } else {
            ProgressStatus::InProgress { done, required }
        }
    }

    /// Check-ins needed to satisfy `period`; 0 when nothing is due in it.
    ///
    /// Weekly targets shrink to the number of active days the week actually
    /// has inside the goal's range, so a goal starting on a Friday is not
    /// asked for three check-ins in its two-day first week.
    pub fn required_for(&self, goal: &Goal, period: &Period) -> u32 {
        match (&goal.recurrence, period.scope) {
            (Recurrence::XPerWeek { count, .. }, PeriodScope::Week) => {
                (*count as u32).min(self.evaluator.active_days_in(goal, period))
            }
            (_, PeriodScope::Day) if self.evaluator.is_active_on(goal, period.start) => {
                goal.checkins_per_day
            }
            _ => 0,
        }
    }

    /// Most recently concluded periods, newest first.
    ///
    /// For day-scoped goals the newest candidate is yesterday, for weekly
    /// goals the last completed week. `lookback` widens the window to earlier
    /// periods so a skipped sweep run does not lose misses.
    pub fn concluded_periods(&self, goal: &Goal, now: NaiveDateTime, lookback: u32) -> Vec<Period> {
        let end = self.evaluator.effective_end_date(goal);
        let mut period = Period::containing(now.date(), goal.scope()).previous();
        let mut periods = Vec::new();

        for _ in 0..lookback.max(1) {
            if period.end() < goal.start_date {
                break;
            }
            if period.start <= end && now >= period_deadline(goal, &period) {
                periods.push(period);
            }
            period = period.previous();
        }
        periods
    }

    pub fn classify(&self, goal: &Goal, ledger: &CheckinLedger, now: NaiveDateTime) -> GoalBucket {
        let today = now.date();
        if today < goal.start_date {
            return GoalBucket::Upcoming;
        }

        let status = if goal.recurrence == Recurrence::None {
            let period = Period::containing(goal.start_date, PeriodScope::Day);
            self.evaluate_period(goal, ledger, &period, now)
        } else if today > self.evaluator.effective_end_date(goal) {
            return GoalBucket::Ended;
        } else {
            self.evaluate(goal, ledger, now)
        };

        match status {
            ProgressStatus::Satisfied { .. } => GoalBucket::Completed,
            ProgressStatus::Missed { .. } => GoalBucket::Missed,
            _ => GoalBucket::Active,
        }
    }

    /// Date range of check-ins needed to evaluate or classify the goal at `now`.
    pub fn lookup_window(&self, goal: &Goal, now: NaiveDateTime) -> (NaiveDate, NaiveDate) {
        let week = Period::containing(now.date(), PeriodScope::Week);
        if goal.recurrence == Recurrence::None {
            (week.start.min(goal.start_date), week.end().max(goal.start_date))
        } else {
            (week.start, week.end())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::recurrence::WeekdaySet;
    use crate::models::goal::test_goal;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn at(date: NaiveDate, h: u32, m: u32) -> NaiveDateTime {
        date.and_hms_opt(h, m, 0).unwrap()
    }

    fn resolver() -> ProgressResolver {
        ProgressResolver::default()
    }

    fn three_per_week_any() -> Recurrence {
        Recurrence::XPerWeek {
            count: 3,
            any_days: true,
            days: WeekdaySet::default(),
        }
    }

    // ── Deadline policy ──────────────────────────────────────────────────

    #[test]
    fn test_deadline_uses_reset_time() {
        let mut goal = test_goal(Recurrence::Daily, d(2024, 6, 1), None);
        goal.reset_time = NaiveTime::from_hms_opt(18, 0, 0);
        let period = Period::containing(d(2024, 6, 1), PeriodScope::Day);
        assert_eq!(period_deadline(&goal, &period), at(d(2024, 6, 1), 18, 0));
    }

    #[test]
    fn test_deadline_without_reset_time_is_end_of_day() {
        let goal = test_goal(Recurrence::Daily, d(2024, 6, 1), None);
        let period = Period::containing(d(2024, 6, 1), PeriodScope::Day);
        assert_eq!(period_deadline(&goal, &period), at(d(2024, 6, 2), 0, 0));
    }

    #[test]
    fn test_week_deadline_is_saturday() {
        let mut goal = test_goal(three_per_week_any(), d(2024, 6, 2), None);
        goal.reset_time = NaiveTime::from_hms_opt(20, 0, 0);
        let period = Period::containing(d(2024, 6, 4), PeriodScope::Week);
        assert_eq!(period_deadline(&goal, &period), at(d(2024, 6, 8), 20, 0));
    }

    // ── Evaluate ─────────────────────────────────────────────────────────

    #[test]
    fn test_future_start_is_not_active() {
        let goal = test_goal(Recurrence::Daily, d(2024, 7, 1), None);
        let status = resolver().evaluate(&goal, &CheckinLedger::new(), at(d(2024, 6, 1), 9, 0));
        assert_eq!(
            status,
            ProgressStatus::NotActiveToday {
                next_active_date: Some(d(2024, 7, 1))
            }
        );
    }

    #[test]
    fn test_daily_in_progress_then_satisfied() {
        let mut goal = test_goal(Recurrence::Daily, d(2024, 6, 1), None);
        goal.checkins_per_day = 2;
        let mut ledger = CheckinLedger::new();
        let now = at(d(2024, 6, 3), 9, 0);

        ledger.set_count(&goal, d(2024, 6, 3), 1).unwrap();
        assert_eq!(
            resolver().evaluate(&goal, &ledger, now),
            ProgressStatus::InProgress { done: 1, required: 2 }
        );

        ledger.set_count(&goal, d(2024, 6, 3), 2).unwrap();
        assert_eq!(
            resolver().evaluate(&goal, &ledger, now),
            ProgressStatus::Satisfied { done: 2, required: 2 }
        );
    }

    #[test]
    fn test_daily_missed_after_reset_time() {
        let mut goal = test_goal(Recurrence::Daily, d(2024, 6, 1), None);
        goal.reset_time = NaiveTime::from_hms_opt(18, 0, 0);
        let ledger = CheckinLedger::new();

        assert!(matches!(
            resolver().evaluate(&goal, &ledger, at(d(2024, 6, 3), 17, 59)),
            ProgressStatus::InProgress { .. }
        ));
        match resolver().evaluate(&goal, &ledger, at(d(2024, 6, 3), 18, 0)) {
            ProgressStatus::Missed { period_key, done, required, .. } => {
                assert_eq!(period_key, "2024-06-03");
                assert_eq!((done, required), (0, 1));
            }
            other => panic!("expected Missed, got {:?}", other),
        }
    }

    #[test]
    fn test_miss_does_not_carry_into_next_day() {
        let mut goal = test_goal(Recurrence::Daily, d(2024, 6, 1), None);
        goal.reset_time = NaiveTime::from_hms_opt(18, 0, 0);
        let ledger = CheckinLedger::new();
        assert!(matches!(
            resolver().evaluate(&goal, &ledger, at(d(2024, 6, 4), 8, 0)),
            ProgressStatus::InProgress { done: 0, required: 1 }
        ));
    }

    #[test]
    fn test_x_per_week_any_days_counts_checked_in_days() {
        let goal = test_goal(three_per_week_any(), d(2024, 6, 2), None);
        let mut ledger = CheckinLedger::new();
        let now = at(d(2024, 6, 7), 12, 0); // Friday

        ledger.set_count(&goal, d(2024, 6, 2), 1).unwrap();
        ledger.set_count(&goal, d(2024, 6, 6), 1).unwrap();
        assert_eq!(
            resolver().evaluate(&goal, &ledger, now),
            ProgressStatus::InProgress { done: 2, required: 3 }
        );

        ledger.set_count(&goal, d(2024, 6, 7), 1).unwrap();
        assert_eq!(
            resolver().evaluate(&goal, &ledger, now),
            ProgressStatus::Satisfied { done: 3, required: 3 }
        );
    }

    #[test]
    fn test_x_per_week_counts_days_not_repetitions() {
        let mut goal = test_goal(three_per_week_any(), d(2024, 6, 2), None);
        goal.checkins_per_day = 3;
        let mut ledger = CheckinLedger::new();
        ledger.set_count(&goal, d(2024, 6, 3), 3).unwrap();

        assert_eq!(ledger.week_total(goal.id, d(2024, 6, 3)), 3);
        assert_eq!(
            resolver().evaluate(&goal, &ledger, at(d(2024, 6, 4), 9, 0)),
            ProgressStatus::InProgress { done: 1, required: 3 }
        );
    }

    #[test]
    fn test_x_per_week_ignores_inactive_days() {
        let goal = test_goal(
            Recurrence::XPerWeek {
                count: 2,
                any_days: false,
                days: WeekdaySet::from_indices(&[2, 4]).unwrap(),
            },
            d(2024, 6, 2),
            None,
        );
        let mut ledger = CheckinLedger::new();
        // Wednesday and Friday, neither is a scheduled day
        ledger.set_count(&goal, d(2024, 6, 5), 1).unwrap();
        ledger.set_count(&goal, d(2024, 6, 7), 1).unwrap();

        let week = Period::containing(d(2024, 6, 4), PeriodScope::Week);
        match resolver().evaluate_period(&goal, &ledger, &week, at(d(2024, 6, 9), 0, 0)) {
            ProgressStatus::Missed { done, required, .. } => assert_eq!((done, required), (0, 2)),
            other => panic!("expected Missed, got {:?}", other),
        }
    }

    #[test]
    fn test_x_per_week_fixed_days_missed_after_week() {
        let goal = test_goal(
            Recurrence::XPerWeek {
                count: 2,
                any_days: false,
                days: WeekdaySet::from_indices(&[2, 4]).unwrap(),
            },
            d(2024, 6, 2),
            None,
        );
        let mut ledger = CheckinLedger::new();
        ledger.set_count(&goal, d(2024, 6, 4), 1).unwrap(); // Tuesday only

        let week = Period::containing(d(2024, 6, 4), PeriodScope::Week);
        // Still Saturday: week not over
        assert!(matches!(
            resolver().evaluate_period(&goal, &ledger, &week, at(d(2024, 6, 8), 12, 0)),
            ProgressStatus::InProgress { done: 1, required: 2 }
        ));
        match resolver().evaluate_period(&goal, &ledger, &week, at(d(2024, 6, 9), 0, 0)) {
            ProgressStatus::Missed { period_key, done, .. } => {
                assert_eq!(period_key, "2024-W23");
                assert_eq!(done, 1);
            }
            other => panic!("expected Missed, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_first_week_shrinks_target() {
        // Starts Friday: only two active days that week
        let goal = test_goal(three_per_week_any(), d(2024, 6, 7), None);
        let week = Period::containing(d(2024, 6, 7), PeriodScope::Week);
        assert_eq!(resolver().required_for(&goal, &week), 2);
    }

    #[test]
    fn test_none_goal_single_evaluation() {
        let mut goal = test_goal(Recurrence::None, d(2024, 6, 1), None);
        goal.reset_time = NaiveTime::from_hms_opt(12, 0, 0);
        let ledger = CheckinLedger::new();
        assert!(matches!(
            resolver().evaluate(&goal, &ledger, at(d(2024, 6, 1), 12, 30)),
            ProgressStatus::Missed { .. }
        ));
        assert_eq!(
            resolver().evaluate(&goal, &ledger, at(d(2024, 6, 2), 9, 0)),
            ProgressStatus::NotActiveToday { next_active_date: None }
        );
    }

    // ── Check-in gate ────────────────────────────────────────────────────

    #[test]
    fn test_check_open_rejects_closed_period() {
        let mut goal = test_goal(Recurrence::Daily, d(2024, 6, 1), None);
        goal.reset_time = NaiveTime::from_hms_opt(18, 0, 0);

        assert!(resolver().check_open(&goal, d(2024, 6, 3), at(d(2024, 6, 3), 17, 59)).is_ok());
        let err = resolver()
            .check_open(&goal, d(2024, 6, 3), at(d(2024, 6, 3), 18, 0))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidDate(_)));
        // Yesterday closed at its own reset time
        assert!(resolver().check_open(&goal, d(2024, 6, 2), at(d(2024, 6, 3), 9, 0)).is_err());
    }

    #[test]
    fn test_check_open_rejects_inactive_day() {
        let goal = test_goal(
            Recurrence::CustomDays {
                days: WeekdaySet::from_indices(&[1, 3, 5]).unwrap(),
            },
            d(2024, 6, 1),
            None,
        );
        // Tuesday
        let err = resolver()
            .check_open(&goal, d(2024, 6, 4), at(d(2024, 6, 4), 9, 0))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidDate(_)));
        assert!(resolver().check_open(&goal, d(2024, 6, 5), at(d(2024, 6, 5), 9, 0)).is_ok());
    }

    #[test]
    fn test_check_open_allows_earlier_day_of_open_week() {
        let goal = test_goal(three_per_week_any(), d(2024, 5, 26), None);
        assert!(resolver().check_open(&goal, d(2024, 6, 4), at(d(2024, 6, 5), 9, 0)).is_ok());
        // Previous week closed at Sunday midnight
        assert!(resolver().check_open(&goal, d(2024, 6, 1), at(d(2024, 6, 2), 9, 0)).is_err());
    }

    // ── Concluded periods ────────────────────────────────────────────────

    #[test]
    fn test_concluded_period_is_yesterday_for_daily() {
        let goal = test_goal(Recurrence::Daily, d(2024, 6, 1), Some(d(2024, 6, 3)));
        let periods = resolver().concluded_periods(&goal, at(d(2024, 6, 2), 19, 0), 1);
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].key(), "2024-06-01");
    }

    #[test]
    fn test_concluded_periods_stop_at_start_date() {
        let goal = test_goal(Recurrence::Daily, d(2024, 6, 1), None);
        let periods = resolver().concluded_periods(&goal, at(d(2024, 6, 3), 1, 0), 7);
        let keys: Vec<String> = periods.iter().map(|p| p.key()).collect();
        assert_eq!(keys, vec!["2024-06-02", "2024-06-01"]);
    }

    #[test]
    fn test_concluded_period_is_last_week_for_weekly_target() {
        let goal = test_goal(three_per_week_any(), d(2024, 5, 1), None);
        let periods = resolver().concluded_periods(&goal, at(d(2024, 6, 5), 9, 0), 1);
        assert_eq!(periods[0].start, d(2024, 5, 26));
    }

    #[test]
    fn test_concluded_periods_skip_after_end() {
        let goal = test_goal(Recurrence::Daily, d(2024, 6, 1), Some(d(2024, 6, 3)));
        assert!(resolver()
            .concluded_periods(&goal, at(d(2024, 6, 10), 9, 0), 1)
            .is_empty());
    }

    // ── Classify ─────────────────────────────────────────────────────────

    #[test]
    fn test_classify_one_time_goal() {
        let goal = test_goal(Recurrence::None, d(2024, 6, 1), None);
        let mut ledger = CheckinLedger::new();
        assert_eq!(
            resolver().classify(&goal, &ledger, at(d(2024, 5, 30), 9, 0)),
            GoalBucket::Upcoming
        );
        assert_eq!(
            resolver().classify(&goal, &ledger, at(d(2024, 6, 1), 9, 0)),
            GoalBucket::Active
        );
        assert_eq!(
            resolver().classify(&goal, &ledger, at(d(2024, 6, 5), 9, 0)),
            GoalBucket::Missed
        );
        ledger.set_count(&goal, d(2024, 6, 1), 1).unwrap();
        assert_eq!(
            resolver().classify(&goal, &ledger, at(d(2024, 6, 5), 9, 0)),
            GoalBucket::Completed
        );
    }

    #[test]
    fn test_classify_repeating_goal_ended() {
        let goal = test_goal(Recurrence::Daily, d(2024, 6, 1), Some(d(2024, 6, 3)));
        assert_eq!(
            resolver().classify(&goal, &CheckinLedger::new(), at(d(2024, 6, 4), 9, 0)),
            GoalBucket::Ended
        );
    }

    #[test]
    fn test_lookup_window_covers_one_time_start() {
        let goal = test_goal(Recurrence::None, d(2024, 5, 1), None);
        let (start, end) = resolver().lookup_window(&goal, at(d(2024, 6, 5), 9, 0));
        assert_eq!(start, d(2024, 5, 1));
        assert_eq!(end, d(2024, 6, 8));
    }
}
