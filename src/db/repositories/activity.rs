use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{format_date, parse_date, parse_datetime, parse_source, to_i64, to_u64},
        models::DailyStepRecord,
    },
    models::StepSource,
};

const SELECT_COLUMNS: &str = "user_id, date, steps, last_source, updated_at";

fn row_to_record(row: &Row) -> Result<DailyStepRecord> {
    Ok(DailyStepRecord {
        user_id: row.get(0)?,
        date: parse_date(&row.get::<_, String>(1)?, "date")?,
        step_count: to_u64(row.get(2)?, "steps")?,
        last_source: parse_source(&row.get::<_, String>(3)?)?,
        updated_at: parse_datetime(&row.get::<_, String>(4)?, "updated_at")?,
    })
}

impl Database {
    pub async fn get_daily_record(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<DailyStepRecord>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM activity_data WHERE user_id = ?1 AND date = ?2"
            ))?;
            let mut rows = stmt.query(params![user_id, format_date(date)])?;
            match rows.next()? {
                Some(row) => row_to_record(row).map(Some),
                None => Ok(None),
            }
        })
        .await
    }

    /// Writes `steps` for the day unless the stored count is already at least as high.
    /// The comparison happens inside the upsert so concurrent writes cannot regress the row.
    pub async fn upsert_daily_max(
        &self,
        user_id: &str,
        date: NaiveDate,
        steps: u64,
        source: StepSource,
        observed_at: DateTime<Utc>,
    ) -> Result<DailyStepRecord> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let date_key = format_date(date);
            let timestamp = observed_at.to_rfc3339();

            conn.execute(
                "INSERT INTO activity_data (user_id, date, steps, last_source, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(user_id, date) DO UPDATE SET
                     last_source = CASE WHEN excluded.steps > activity_data.steps
                                        THEN excluded.last_source ELSE activity_data.last_source END,
                     updated_at = CASE WHEN excluded.steps > activity_data.steps
                                       THEN excluded.updated_at ELSE activity_data.updated_at END,
                     steps = MAX(activity_data.steps, excluded.steps)",
                params![user_id, date_key, to_i64(steps)?, source.as_str(), timestamp],
            )
            .with_context(|| "failed to upsert daily step record")?;

            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM activity_data WHERE user_id = ?1 AND date = ?2"
            ))?;
            let mut rows = stmt.query(params![user_id, date_key])?;
            let row = rows
                .next()?
                .context("daily step record missing after upsert")?;
            row_to_record(row)
        })
        .await
    }

    /// Records for `from..=to`, oldest first.
    pub async fn list_daily_records(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyStepRecord>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM activity_data
                 WHERE user_id = ?1 AND date >= ?2 AND date <= ?3
                 ORDER BY date ASC"
            ))?;
            let mut rows = stmt.query(params![user_id, format_date(from), format_date(to)])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_record(row)?);
            }
            Ok(records)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("stride.sqlite3")).unwrap();
        (dir, db)
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[tokio::test]
    async fn first_write_creates_the_record() {
        let (_dir, db) = open();
        assert!(db.get_daily_record("u1", day(1)).await.unwrap().is_none());

        let record = db
            .upsert_daily_max("u1", day(1), 5000, StepSource::Manual, Utc::now())
            .await
            .unwrap();
        assert_eq!(record.step_count, 5000);
        assert_eq!(record.last_source, StepSource::Manual);

        let stored = db.get_daily_record("u1", day(1)).await.unwrap().unwrap();
        assert_eq!(stored, record);
    }

    #[tokio::test]
    async fn lower_counts_never_overwrite() {
        let (_dir, db) = open();
        db.upsert_daily_max("u1", day(1), 8000, StepSource::Device, Utc::now())
            .await
            .unwrap();
        let record = db
            .upsert_daily_max("u1", day(1), 3000, StepSource::Manual, Utc::now())
            .await
            .unwrap();

        assert_eq!(record.step_count, 8000);
        assert_eq!(record.last_source, StepSource::Device);

        let record = db
            .upsert_daily_max("u1", day(1), 9000, StepSource::GoogleFit, Utc::now())
            .await
            .unwrap();
        assert_eq!(record.step_count, 9000);
        assert_eq!(record.last_source, StepSource::GoogleFit);
    }

    #[tokio::test]
    async fn concurrent_writes_keep_the_maximum() {
        let (_dir, db) = open();
        let counts = [1200u64, 9400, 300, 7000, 9399, 0, 4100];

        let writes = counts.iter().map(|&steps| {
            let db = db.clone();
            tokio::spawn(async move {
                db.upsert_daily_max("u1", day(2), steps, StepSource::Device, Utc::now())
                    .await
                    .unwrap();
            })
        });
        for write in writes.collect::<Vec<_>>() {
            write.await.unwrap();
        }

        let stored = db.get_daily_record("u1", day(2)).await.unwrap().unwrap();
        assert_eq!(stored.step_count, 9400);
    }

    #[tokio::test]
    async fn records_are_keyed_per_user_and_day() {
        let (_dir, db) = open();
        db.upsert_daily_max("u1", day(1), 100, StepSource::Manual, Utc::now())
            .await
            .unwrap();
        db.upsert_daily_max("u1", day(3), 300, StepSource::Manual, Utc::now())
            .await
            .unwrap();
        db.upsert_daily_max("u2", day(2), 999, StepSource::Manual, Utc::now())
            .await
            .unwrap();

        let records = db.list_daily_records("u1", day(1), day(3)).await.unwrap();
        let dates: Vec<_> = records.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![day(1), day(3)]);

        let narrow = db.list_daily_records("u1", day(2), day(3)).await.unwrap();
        assert_eq!(narrow.len(), 1);
    }
}
