//! Summaries over stored daily step records.

use std::collections::HashMap;
use std::num::NonZeroU32;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::db::DailyStepRecord;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DayTotal {
    pub date: NaiveDate,
    pub steps: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepSummary {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub daily_goal: u32,
    pub total_steps: u64,
    /// Averaged over every calendar day in the range; untracked days count as zero.
    pub average_steps: u64,
    pub days_tracked: u32,
    pub days_goal_met: u32,
    pub best_day: Option<DayTotal>,
    /// Consecutive goal days ending at `to`. An unmet `to` is treated as still in
    /// progress and the streak is counted from the day before.
    pub current_streak: u32,
    pub days: Vec<DayTotal>,
}

/// The `days` calendar days ending at `today`, inclusive. Zero is treated as one.
pub fn trailing_range(today: NaiveDate, days: u32) -> (NaiveDate, NaiveDate) {
    let span = i64::from(days.max(1)) - 1;
    (today - Duration::days(span), today)
}

pub fn summarize(
    records: &[DailyStepRecord],
    goal: NonZeroU32,
    from: NaiveDate,
    to: NaiveDate,
) -> StepSummary {
    let by_date: HashMap<NaiveDate, u64> = records
        .iter()
        .filter(|record| record.date >= from && record.date <= to)
        .map(|record| (record.date, record.step_count))
        .collect();
    let goal_steps = u64::from(goal.get());

    let days: Vec<DayTotal> = from
        .iter_days()
        .take_while(|date| *date <= to)
        .map(|date| DayTotal {
            date,
            steps: by_date.get(&date).copied().unwrap_or(0),
        })
        .collect();

    let total_steps: u64 = days.iter().map(|day| day.steps).sum();
    let average_steps = if days.is_empty() {
        0
    } else {
        total_steps / days.len() as u64
    };

    let best_day = days
        .iter()
        .filter(|day| day.steps > 0)
        .max_by(|a, b| a.steps.cmp(&b.steps).then(b.date.cmp(&a.date)))
        .cloned();

    let met = |day: &DayTotal| day.steps >= goal_steps;
    let mut trailing = days.iter().rev().peekable();
    if trailing.peek().is_some_and(|day| !met(day)) {
        trailing.next();
    }
    let current_streak = trailing.take_while(|day| met(day)).count() as u32;

    StepSummary {
        from,
        to,
        daily_goal: goal.get(),
        total_steps,
        average_steps,
        days_tracked: by_date.len() as u32,
        days_goal_met: days.iter().filter(|day| met(day)).count() as u32,
        best_day,
        current_streak,
        days,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StepSource;
    use chrono::Utc;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn record(d: u32, steps: u64) -> DailyStepRecord {
        DailyStepRecord {
            user_id: "u1".into(),
            date: day(d),
            step_count: steps,
            last_source: StepSource::Device,
            updated_at: Utc::now(),
        }
    }

    fn goal(value: u32) -> NonZeroU32 {
        NonZeroU32::new(value).unwrap()
    }

    #[test]
    fn trailing_range_is_inclusive() {
        assert_eq!(trailing_range(day(10), 7), (day(4), day(10)));
        assert_eq!(trailing_range(day(10), 1), (day(10), day(10)));
        assert_eq!(trailing_range(day(10), 0), (day(10), day(10)));
    }

    #[test]
    fn totals_and_averages_cover_missing_days() {
        let records = vec![record(1, 12_000), record(3, 6_000), record(4, 10_000)];
        let summary = summarize(&records, goal(10_000), day(1), day(4));

        assert_eq!(summary.total_steps, 28_000);
        assert_eq!(summary.average_steps, 7_000);
        assert_eq!(summary.days_tracked, 3);
        assert_eq!(summary.days_goal_met, 2);
        assert_eq!(summary.days.len(), 4);
        assert_eq!(summary.days[1].steps, 0);
        assert_eq!(
            summary.best_day,
            Some(DayTotal {
                date: day(1),
                steps: 12_000
            })
        );
    }

    #[test]
    fn streak_tolerates_an_unfinished_today() {
        let records = vec![
            record(1, 2_000),
            record(2, 11_000),
            record(3, 10_000),
            record(4, 500),
        ];
        let summary = summarize(&records, goal(10_000), day(1), day(4));
        assert_eq!(summary.current_streak, 2);

        let finished = vec![record(3, 10_000), record(4, 10_500)];
        let summary = summarize(&finished, goal(10_000), day(1), day(4));
        assert_eq!(summary.current_streak, 2);
    }

    #[test]
    fn empty_history_summarizes_to_zero() {
        let summary = summarize(&[], goal(10_000), day(1), day(7));
        assert_eq!(summary.total_steps, 0);
        assert_eq!(summary.best_day, None);
        assert_eq!(summary.current_streak, 0);
        assert_eq!(summary.days.len(), 7);
    }

    #[test]
    fn records_outside_range_are_ignored() {
        let records = vec![record(1, 50_000), record(5, 1_000)];
        let summary = summarize(&records, goal(10_000), day(2), day(5));
        assert_eq!(summary.total_steps, 1_000);
        assert_eq!(summary.days_tracked, 1);
    }
}
