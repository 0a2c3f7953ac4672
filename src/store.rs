//! Persistence layer: process table, time-series metrics and the event log.
//!
//! A single SQLite database (`nova.db`) holds three collections. Schema
//! evolution is a monotonic migration list; the highest applied version is
//! kept in `PRAGMA user_version` and pending migrations run transactionally
//! at startup.
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::{
    path::Path,
    sync::Mutex,
};
use tracing::{debug, warn};

use crate::{
    error::StoreError,
    process::{EventRecord, EventType, MetricSample, ProcessId, ProcessRecord, ProcessStatus},
};
use crate::config::ProcessSpec;

/// Ordered schema migrations. Never reorder or edit an entry; append only.
const MIGRATIONS: &[&str] = &[
    // v1: initial schema.
    "
    CREATE TABLE processes (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        name        TEXT NOT NULL,
        spec        TEXT NOT NULL,
        status      TEXT NOT NULL,
        pid         INTEGER,
        started_at  INTEGER,
        restarts    INTEGER NOT NULL DEFAULT 0,
        created_at  INTEGER NOT NULL
    );
    CREATE UNIQUE INDEX idx_processes_name ON processes(name);

    CREATE TABLE metrics (
        process_id          INTEGER NOT NULL
                            REFERENCES processes(id) ON DELETE CASCADE,
        ts                  INTEGER NOT NULL,
        cpu                 REAL NOT NULL,
        memory              INTEGER NOT NULL,
        heap_used           INTEGER,
        heap_total          INTEGER,
        event_loop_latency  REAL,
        active_handles      INTEGER,
        active_requests     INTEGER,
        PRIMARY KEY (process_id, ts)
    ) WITHOUT ROWID;

    CREATE TABLE events (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        process_id    INTEGER REFERENCES processes(id) ON DELETE CASCADE,
        process_name  TEXT NOT NULL,
        type          TEXT NOT NULL,
        data          TEXT,
        ts            INTEGER NOT NULL
    );
    CREATE INDEX idx_events_process_ts ON events(process_id, ts);
    CREATE INDEX idx_events_type_ts ON events(type, ts);
    ",
];

/// Durable store shared across daemon components.
pub struct Store {
    conn: Mutex<Connection>,
}

/// Fields updated together on a lifecycle transition.
#[derive(Debug, Clone)]
pub struct Transition {
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub restarts: u32,
}

/// Outcome of one downsampling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownsampleReport {
    /// Rows produced by aggregation.
    pub aggregated: u64,
    /// Rows removed by the retention delete.
    pub expired: u64,
}

impl Store {
    /// Opens (creating if needed) the database and applies pending migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        // journal_mode returns the resulting mode as a row.
        let _ = conn.query_row("PRAGMA journal_mode = wal", [], |_row| Ok(()));
        conn.pragma_update(None, "foreign_keys", "on")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let mut conn = self.lock();
        let applied: i64 =
            conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

        for (index, sql) in MIGRATIONS.iter().enumerate() {
            let version = index as i64 + 1;
            if version <= applied {
                continue;
            }
            debug!("applying schema migration v{version}");
            let tx = conn.transaction()?;
            tx.execute_batch(sql)?;
            tx.pragma_update(None, "user_version", version)?;
            tx.commit()?;
        }

        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Highest applied schema version.
    pub fn schema_version(&self) -> Result<i64, StoreError> {
        let conn = self.lock();
        Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    /// Inserts a new process record, assigning its id.
    pub fn insert_process(&self, spec: &ProcessSpec) -> Result<ProcessRecord, StoreError> {
        let conn = self.lock();
        let created_at = Utc::now();
        let encoded = serde_json::to_string(spec)?;
        let result = conn.execute(
            "INSERT INTO processes (name, spec, status, pid, started_at, restarts, created_at)
             VALUES (?1, ?2, ?3, NULL, NULL, 0, ?4)",
            params![
                spec.name,
                encoded,
                ProcessStatus::Stopped.as_ref(),
                created_at.timestamp()
            ],
        );

        match result {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(StoreError::DuplicateName(spec.name.clone()));
            }
            Err(err) => return Err(err.into()),
        }

        let id = conn.last_insert_rowid();
        Ok(ProcessRecord {
            id,
            spec: spec.clone(),
            status: ProcessStatus::Stopped,
            pid: None,
            started_at: None,
            restarts: 0,
            created_at,
        })
    }

    /// Replaces the stored spec for a record (used by `scale` and re-start
    /// with an updated definition).
    pub fn update_spec(&self, id: ProcessId, spec: &ProcessSpec) -> Result<(), StoreError> {
        let conn = self.lock();
        let encoded = serde_json::to_string(spec)?;
        let changed = conn.execute(
            "UPDATE processes SET name = ?1, spec = ?2 WHERE id = ?3",
            params![spec.name, encoded, id],
        )?;
        if changed == 0 {
            return Err(StoreError::MissingRow(id));
        }
        Ok(())
    }

    /// Applies a status transition and, when given, the accompanying event
    /// row in the same transaction.
    pub fn record_transition(
        &self,
        id: ProcessId,
        transition: &Transition,
        event: Option<&EventRecord>,
    ) -> Result<(), StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE processes SET status = ?1, pid = ?2, started_at = ?3, restarts = ?4
             WHERE id = ?5",
            params![
                transition.status.as_ref(),
                transition.pid,
                transition.started_at.map(|t| t.timestamp()),
                transition.restarts,
                id
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::MissingRow(id));
        }
        if let Some(event) = event {
            insert_event(&tx, event)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Appends an event row outside a transition, retrying once on failure.
    /// Events may be lost on persistent disk failure but are never duplicated.
    pub fn append_event(&self, event: &EventRecord) -> Result<(), StoreError> {
        let conn = self.lock();
        match insert_event(&conn, event) {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!("event append failed, retrying once: {first}");
                insert_event(&conn, event).map_err(StoreError::from)
            }
        }
    }

    /// Loads a record by id.
    pub fn get_process(&self, id: ProcessId) -> Result<Option<ProcessRecord>, StoreError> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, spec, status, pid, started_at, restarts, created_at
             FROM processes WHERE id = ?1",
            params![id],
            row_to_record,
        )
        .optional()?
        .transpose()
    }

    /// Loads a record by unique name.
    pub fn find_by_name(&self, name: &str) -> Result<Option<ProcessRecord>, StoreError> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, spec, status, pid, started_at, restarts, created_at
             FROM processes WHERE name = ?1",
            params![name],
            row_to_record,
        )
        .optional()?
        .transpose()
    }

    /// Loads every record, ordered by id.
    pub fn load_processes(&self) -> Result<Vec<ProcessRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, spec, status, pid, started_at, restarts, created_at
             FROM processes ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }

    /// Removes a record; dependent metrics and events cascade.
    pub fn delete_process(&self, id: ProcessId) -> Result<(), StoreError> {
        let conn = self.lock();
        let changed = conn.execute("DELETE FROM processes WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::MissingRow(id));
        }
        Ok(())
    }

    /// Inserts a batch of metric samples in one transaction.
    pub fn insert_metrics(&self, samples: &[MetricSample]) -> Result<(), StoreError> {
        if samples.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO metrics
                 (process_id, ts, cpu, memory, heap_used, heap_total,
                  event_loop_latency, active_handles, active_requests)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for sample in samples {
                stmt.execute(params![
                    sample.process_id,
                    sample.ts,
                    sample.cpu,
                    sample.memory,
                    sample.heap_used,
                    sample.heap_total,
                    sample.event_loop_latency,
                    sample.active_handles,
                    sample.active_requests,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Range query over metric samples for one process.
    pub fn metrics_range(
        &self,
        process_id: ProcessId,
        start: i64,
        end: i64,
    ) -> Result<Vec<MetricSample>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT process_id, ts, cpu, memory, heap_used, heap_total,
                    event_loop_latency, active_handles, active_requests
             FROM metrics
             WHERE process_id = ?1 AND ts >= ?2 AND ts <= ?3
             ORDER BY ts",
        )?;
        let rows = stmt.query_map(params![process_id, start, end], row_to_sample)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// Range query over events for one process.
    pub fn events_for_process(
        &self,
        process_id: ProcessId,
        start: i64,
        end: i64,
        limit: usize,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, process_id, process_name, type, data, ts
             FROM events
             WHERE process_id = ?1 AND ts >= ?2 AND ts <= ?3
             ORDER BY ts, id LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![process_id, start, end, limit as i64],
            row_to_event,
        )?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row??);
        }
        Ok(events)
    }

    /// Range query over events of one type across all processes.
    pub fn events_by_type(
        &self,
        event_type: EventType,
        start: i64,
        end: i64,
        limit: usize,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, process_id, process_name, type, data, ts
             FROM events
             WHERE type = ?1 AND ts >= ?2 AND ts <= ?3
             ORDER BY ts, id LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![event_type.as_ref(), start, end, limit as i64],
            row_to_event,
        )?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row??);
        }
        Ok(events)
    }

    /// Downsamples history in one transaction: samples older than
    /// `expire_before` are deleted, then samples older than `coarsen_before`
    /// are replaced by per-bucket means (`bucket_secs` wide).
    ///
    /// Aggregates land exactly on bucket boundaries, so a second run over the
    /// same cutoffs reproduces the same rows.
    pub fn downsample(
        &self,
        coarsen_before: i64,
        expire_before: i64,
        bucket_secs: i64,
    ) -> Result<DownsampleReport, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let expired = tx.execute(
            "DELETE FROM metrics WHERE ts < ?1",
            params![expire_before],
        )? as u64;

        tx.execute_batch("DROP TABLE IF EXISTS temp.downsample_buckets;")?;
        tx.execute(
            "CREATE TEMP TABLE downsample_buckets AS
             SELECT process_id,
                    (ts / ?2) * ?2                        AS bucket_ts,
                    AVG(cpu)                              AS cpu,
                    CAST(AVG(memory) AS INTEGER)          AS memory,
                    CAST(AVG(heap_used) AS INTEGER)       AS heap_used,
                    CAST(AVG(heap_total) AS INTEGER)      AS heap_total,
                    AVG(event_loop_latency)               AS event_loop_latency,
                    CAST(AVG(active_handles) AS INTEGER)  AS active_handles,
                    CAST(AVG(active_requests) AS INTEGER) AS active_requests
             FROM metrics
             WHERE ts < ?1
             GROUP BY process_id, bucket_ts",
            params![coarsen_before, bucket_secs],
        )?;
        tx.execute("DELETE FROM metrics WHERE ts < ?1", params![coarsen_before])?;
        let aggregated = tx.execute(
            "INSERT OR REPLACE INTO metrics
             (process_id, ts, cpu, memory, heap_used, heap_total,
              event_loop_latency, active_handles, active_requests)
             SELECT process_id, bucket_ts, cpu, memory, heap_used, heap_total,
                    event_loop_latency, active_handles, active_requests
             FROM downsample_buckets",
            [],
        )? as u64;
        tx.execute_batch("DROP TABLE temp.downsample_buckets;")?;

        tx.commit()?;
        Ok(DownsampleReport { aggregated, expired })
    }
}

fn insert_event<C: std::ops::Deref<Target = Connection>>(
    conn: &C,
    event: &EventRecord,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO events (process_id, process_name, type, data, ts)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event.process_id,
            event.process_name,
            event.event_type.as_ref(),
            serde_json::to_string(&event.data).unwrap_or_else(|_| "null".to_string()),
            event.ts.timestamp()
        ],
    )?;
    Ok(())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(info, _)
            if info.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

type RecordRow = Result<ProcessRecord, StoreError>;

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<RecordRow, rusqlite::Error> {
    let id: i64 = row.get(0)?;
    let spec_json: String = row.get(1)?;
    let status_raw: String = row.get(2)?;
    let pid: Option<u32> = row.get(3)?;
    let started_at: Option<i64> = row.get(4)?;
    let restarts: u32 = row.get(5)?;
    let created_at: i64 = row.get(6)?;

    let decode = || -> Result<ProcessRecord, StoreError> {
        let spec: ProcessSpec = serde_json::from_str(&spec_json)?;
        let status = ProcessStatus::parse(&status_raw).unwrap_or(ProcessStatus::Stopped);
        Ok(ProcessRecord {
            id,
            spec,
            status,
            pid,
            started_at: started_at.and_then(|s| DateTime::from_timestamp(s, 0)),
            restarts,
            created_at: DateTime::from_timestamp(created_at, 0).unwrap_or_else(Utc::now),
        })
    };
    Ok(decode())
}

fn row_to_sample(row: &rusqlite::Row<'_>) -> Result<MetricSample, rusqlite::Error> {
    Ok(MetricSample {
        process_id: row.get(0)?,
        ts: row.get(1)?,
        cpu: row.get(2)?,
        memory: row.get(3)?,
        heap_used: row.get(4)?,
        heap_total: row.get(5)?,
        event_loop_latency: row.get(6)?,
        active_handles: row.get(7)?,
        active_requests: row.get(8)?,
    })
}

type EventRow = Result<EventRecord, StoreError>;

fn row_to_event(row: &rusqlite::Row<'_>) -> Result<EventRow, rusqlite::Error> {
    let id: i64 = row.get(0)?;
    let process_id: i64 = row.get(1)?;
    let process_name: String = row.get(2)?;
    let type_raw: String = row.get(3)?;
    let data_raw: Option<String> = row.get(4)?;
    let ts: i64 = row.get(5)?;

    let decode = move || -> Result<EventRecord, StoreError> {
        let event_type = EventType::parse(&type_raw).unwrap_or(EventType::Error);
        let data = data_raw
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or(serde_json::Value::Null);
        Ok(EventRecord {
            id,
            process_id,
            process_name,
            event_type,
            data,
            ts: DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now),
        })
    };
    Ok(decode())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    fn spec(name: &str) -> ProcessSpec {
        ProcessSpec::new(name, "./app.sh")
    }

    #[test]
    fn insert_assigns_monotonic_ids() {
        let store = store();
        let a = store.insert_process(&spec("a")).unwrap();
        let b = store.insert_process(&spec("b")).unwrap();
        assert!(b.id > a.id);
        assert_eq!(a.status, ProcessStatus::Stopped);
        assert_eq!(a.restarts, 0);
    }

    #[test]
    fn duplicate_name_is_rejected_and_leaves_state_unchanged() {
        let store = store();
        store.insert_process(&spec("api")).unwrap();
        let err = store.insert_process(&spec("api")).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateName(name) if name == "api"));
        assert_eq!(store.load_processes().unwrap().len(), 1);
    }

    #[test]
    fn record_round_trips_through_persistence() {
        let store = store();
        let mut definition = spec("api");
        definition.max_memory_restart = Some(64 * 1024 * 1024);
        definition.args = vec!["--verbose".to_string()];
        let record = store.insert_process(&definition).unwrap();

        let loaded = store.get_process(record.id).unwrap().unwrap();
        assert_eq!(loaded.spec, definition);
        assert_eq!(loaded.id, record.id);
    }

    #[test]
    fn transition_writes_status_and_event_atomically() {
        let store = store();
        let record = store.insert_process(&spec("api")).unwrap();

        let started = Utc::now();
        store
            .record_transition(
                record.id,
                &Transition {
                    status: ProcessStatus::Online,
                    pid: Some(4242),
                    started_at: Some(started),
                    restarts: 1,
                },
                Some(&EventRecord::now(
                    record.id,
                    "api",
                    EventType::Online,
                    json!({"instance": 0}),
                )),
            )
            .unwrap();

        let loaded = store.get_process(record.id).unwrap().unwrap();
        assert_eq!(loaded.status, ProcessStatus::Online);
        assert_eq!(loaded.pid, Some(4242));
        assert_eq!(loaded.restarts, 1);

        let events = store
            .events_for_process(record.id, 0, i64::MAX, 10)
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Online);
        assert_eq!(events[0].data["instance"], json!(0));
    }

    #[test]
    fn transition_on_missing_row_fails() {
        let store = store();
        let err = store
            .record_transition(
                999,
                &Transition {
                    status: ProcessStatus::Online,
                    pid: None,
                    started_at: None,
                    restarts: 0,
                },
                None,
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingRow(999)));
    }

    #[test]
    fn events_query_by_type() {
        let store = store();
        let a = store.insert_process(&spec("a")).unwrap();
        let b = store.insert_process(&spec("b")).unwrap();

        for (id, name, ty) in [
            (a.id, "a", EventType::Start),
            (a.id, "a", EventType::Crash),
            (b.id, "b", EventType::Start),
        ] {
            store
                .append_event(&EventRecord::now(id, name, ty, serde_json::Value::Null))
                .unwrap();
        }

        let starts = store
            .events_by_type(EventType::Start, 0, i64::MAX, 10)
            .unwrap();
        assert_eq!(starts.len(), 2);
        let crashes = store
            .events_by_type(EventType::Crash, 0, i64::MAX, 10)
            .unwrap();
        assert_eq!(crashes.len(), 1);
        assert_eq!(crashes[0].process_name, "a");
    }

    #[test]
    fn deleting_a_process_cascades() {
        let store = store();
        let record = store.insert_process(&spec("api")).unwrap();
        store
            .insert_metrics(&[MetricSample::os(record.id, 1000, 12.5, 1024)])
            .unwrap();
        store
            .append_event(&EventRecord::now(
                record.id,
                "api",
                EventType::Start,
                serde_json::Value::Null,
            ))
            .unwrap();

        store.delete_process(record.id).unwrap();
        assert!(store.get_process(record.id).unwrap().is_none());
        assert!(store.metrics_range(record.id, 0, i64::MAX).unwrap().is_empty());
        assert!(store
            .events_for_process(record.id, 0, i64::MAX, 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn metrics_range_is_inclusive_and_ordered() {
        let store = store();
        let record = store.insert_process(&spec("api")).unwrap();
        let samples: Vec<_> = (0..5)
            .map(|i| MetricSample::os(record.id, 100 + i, i as f64, 1000 + i as u64))
            .collect();
        store.insert_metrics(&samples).unwrap();

        let range = store.metrics_range(record.id, 101, 103).unwrap();
        assert_eq!(range.len(), 3);
        assert_eq!(range[0].ts, 101);
        assert_eq!(range[2].ts, 103);
    }

    #[test]
    fn downsample_aggregates_and_expires() {
        let store = store();
        let record = store.insert_process(&spec("api")).unwrap();

        // 120 one-second samples inside one bucket pair, plus recent samples.
        let mut samples = Vec::new();
        for i in 0..120 {
            samples.push(MetricSample::os(record.id, i, 10.0, 100));
        }
        samples.push(MetricSample::os(record.id, 10_000, 50.0, 200));
        store.insert_metrics(&samples).unwrap();

        let report = store.downsample(1_000, 0, 60).unwrap();
        assert_eq!(report.aggregated, 2); // buckets 0 and 60
        assert_eq!(report.expired, 0);

        let old = store.metrics_range(record.id, 0, 999).unwrap();
        assert_eq!(old.len(), 2);
        assert_eq!(old[0].ts, 0);
        assert_eq!(old[1].ts, 60);
        assert!((old[0].cpu - 10.0).abs() < f64::EPSILON);

        // Recent samples stay untouched.
        let recent = store.metrics_range(record.id, 10_000, 10_000).unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn downsample_is_idempotent() {
        let store = store();
        let record = store.insert_process(&spec("api")).unwrap();
        let samples: Vec<_> = (0..90)
            .map(|i| MetricSample::os(record.id, i, (i % 7) as f64, 512))
            .collect();
        store.insert_metrics(&samples).unwrap();

        store.downsample(1_000, 0, 60).unwrap();
        let first = store.metrics_range(record.id, 0, i64::MAX).unwrap();
        store.downsample(1_000, 0, 60).unwrap();
        let second = store.metrics_range(record.id, 0, i64::MAX).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn downsample_expires_old_rows() {
        let store = store();
        let record = store.insert_process(&spec("api")).unwrap();
        store
            .insert_metrics(&[
                MetricSample::os(record.id, 10, 1.0, 1),
                MetricSample::os(record.id, 5_000, 2.0, 2),
            ])
            .unwrap();

        let report = store.downsample(6_000, 1_000, 60).unwrap();
        assert_eq!(report.expired, 1);
        let rows = store.metrics_range(record.id, 0, i64::MAX).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ts, 4_980); // 5000 floored to the minute
    }

    #[test]
    fn migrations_record_schema_version() {
        let store = store();
        assert_eq!(store.schema_version().unwrap(), MIGRATIONS.len() as i64);
    }

    #[test]
    fn update_spec_persists_new_definition() {
        let store = store();
        let record = store.insert_process(&spec("api")).unwrap();
        let mut updated = record.spec.clone();
        updated.instances = crate::config::InstanceCount::Count(4);
        updated.exec_mode = crate::config::ExecMode::Cluster;
        store.update_spec(record.id, &updated).unwrap();

        let loaded = store.get_process(record.id).unwrap().unwrap();
        assert_eq!(loaded.spec, updated);
    }
}
