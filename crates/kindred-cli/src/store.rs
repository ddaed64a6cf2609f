//! SQLite-backed relationship store.
//!
//! Plays the role of the external backing store and policy layer: it owns
//! the records, applies mutations (stage changes, metric bumps, withdrawal
//! handling), and pushes change notifications. In-process mutations notify
//! directly; a polling bridge turns row changes made by *other* processes
//! into the same feeds, so `kindred watch` in one terminal picks up
//! `kindred activity complete` run in another.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use kindred_core::{
    ActivitiesChanged, EndRequestStatus, RelationshipChanged, RelationshipRecord,
    RelationshipSource, RelationshipStatus, Requirement, SourceError, Stage, StageMetrics,
    Subscription,
};

const FEED_CAPACITY: usize = 64;

fn sql_err(err: rusqlite::Error) -> SourceError {
    SourceError::Query(err.to_string())
}

/// Stored timestamps are compared lexicographically by the poll cursor, so
/// they use a fixed fractional precision.
fn now_str() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn bad_record(what: impl std::fmt::Display) -> SourceError {
    SourceError::InvalidRecord(what.to_string())
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, SourceError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| bad_record(format!("bad timestamp '{raw}': {e}")))
}

fn parse_status(raw: &str) -> Result<RelationshipStatus, SourceError> {
    match raw {
        "active" => Ok(RelationshipStatus::Active),
        "paused" => Ok(RelationshipStatus::Paused),
        "ended" => Ok(RelationshipStatus::Ended),
        other => Err(bad_record(format!("unknown status '{other}'"))),
    }
}

fn parse_end_request(raw: &str) -> Result<EndRequestStatus, SourceError> {
    match raw {
        "none" => Ok(EndRequestStatus::None),
        "pending_cooldown" => Ok(EndRequestStatus::PendingCooldown),
        "under_review" => Ok(EndRequestStatus::UnderReview),
        "approved" => Ok(EndRequestStatus::Approved),
        "rejected" => Ok(EndRequestStatus::Rejected),
        other => Err(bad_record(format!("unknown end-request status '{other}'"))),
    }
}

/// Raw relationship row, converted to the typed record outside the query.
struct RelationshipRow {
    id: String,
    youth_id: String,
    elder_id: String,
    current_stage: String,
    stage_start_date: String,
    created_at: String,
    status: String,
    message_count: u32,
    active_days: u32,
    video_call_count: u32,
    meeting_count: u32,
    progress_pct: u8,
    requirements_met: bool,
    end_request_status: String,
    end_request_by: Option<String>,
    end_request_reason: Option<String>,
    end_request_at: Option<String>,
}

impl RelationshipRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            youth_id: row.get(1)?,
            elder_id: row.get(2)?,
            current_stage: row.get(3)?,
            stage_start_date: row.get(4)?,
            created_at: row.get(5)?,
            status: row.get(6)?,
            message_count: row.get(7)?,
            active_days: row.get(8)?,
            video_call_count: row.get(9)?,
            meeting_count: row.get(10)?,
            progress_pct: row.get(11)?,
            requirements_met: row.get(12)?,
            end_request_status: row.get(13)?,
            end_request_by: row.get(14)?,
            end_request_reason: row.get(15)?,
            end_request_at: row.get(16)?,
        })
    }

    fn into_record(self) -> Result<RelationshipRecord, SourceError> {
        Ok(RelationshipRecord {
            current_stage: self
                .current_stage
                .parse::<Stage>()
                .map_err(bad_record)?,
            stage_start_date: parse_time(&self.stage_start_date)?,
            created_at: parse_time(&self.created_at)?,
            status: parse_status(&self.status)?,
            metrics: StageMetrics {
                message_count: self.message_count,
                active_days: self.active_days,
                video_call_count: self.video_call_count,
                meeting_count: self.meeting_count,
                progress_pct: self.progress_pct,
                requirements_met: self.requirements_met,
            },
            end_request_status: parse_end_request(&self.end_request_status)?,
            end_request_by: self.end_request_by,
            end_request_reason: self.end_request_reason,
            end_request_at: self
                .end_request_at
                .as_deref()
                .map(parse_time)
                .transpose()?,
            id: self.id,
            youth_id: self.youth_id,
            elder_id: self.elder_id,
        })
    }
}

const RELATIONSHIP_COLUMNS: &str = "id, youth_id, elder_id, current_stage, stage_start_date, \
     created_at, status, message_count, active_days, video_call_count, meeting_count, \
     progress_pct, requirements_met, end_request_status, end_request_by, end_request_reason, \
     end_request_at";

struct RequirementRow {
    id: String,
    relationship_id: String,
    stage: String,
    title: String,
    description: String,
    is_completed: bool,
    target_value: Option<u32>,
    current_value: Option<u32>,
    youth_signed: bool,
    elder_signed: bool,
}

impl RequirementRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            relationship_id: row.get(1)?,
            stage: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            is_completed: row.get(5)?,
            target_value: row.get(6)?,
            current_value: row.get(7)?,
            youth_signed: row.get(8)?,
            elder_signed: row.get(9)?,
        })
    }

    fn into_requirement(self) -> Result<Requirement, SourceError> {
        Ok(Requirement {
            stage: self.stage.parse::<Stage>().map_err(bad_record)?,
            id: self.id,
            relationship_id: self.relationship_id,
            title: self.title,
            description: self.description,
            is_completed: self.is_completed,
            target_value: self.target_value,
            current_value: self.current_value,
            youth_signed: self.youth_signed,
            elder_signed: self.elder_signed,
        })
    }
}

const REQUIREMENT_COLUMNS: &str = "id, relationship_id, stage, title, description, \
     is_completed, target_value, current_value, youth_signed, elder_signed";

/// Which participant signs a dual-signature requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Signer {
    Youth,
    Elder,
}

#[derive(Debug, Default, Clone)]
struct PollCursor {
    relationships: String,
    requirements: String,
}

/// SQLite store at `~/.config/kindred/kindred.db`.
pub struct LocalStore {
    conn: Mutex<Connection>,
    relationship_tx: broadcast::Sender<RelationshipChanged>,
    activities_tx: broadcast::Sender<ActivitiesChanged>,
    cursor: Mutex<PollCursor>,
}

impl LocalStore {
    /// Open (and migrate) the database at `path`.
    pub fn open(path: PathBuf) -> Result<Self, SourceError> {
        let conn = Connection::open(path).map_err(sql_err)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, SourceError> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, SourceError> {
        let (relationship_tx, _) = broadcast::channel(FEED_CAPACITY);
        let (activities_tx, _) = broadcast::channel(FEED_CAPACITY);
        let store = Self {
            conn: Mutex::new(conn),
            relationship_tx,
            activities_tx,
            cursor: Mutex::new(PollCursor::default()),
        };
        store.migrate()?;
        // Start the poll cursor at the present so only future external
        // writes emit events.
        let now = store.max_timestamps()?;
        *store.lock_cursor() = now;
        Ok(store)
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("store connection lock poisoned")
    }

    fn lock_cursor(&self) -> MutexGuard<'_, PollCursor> {
        self.cursor.lock().expect("poll cursor lock poisoned")
    }

    fn migrate(&self) -> Result<(), SourceError> {
        self.lock_conn()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS relationships (
                    id                 TEXT PRIMARY KEY,
                    youth_id           TEXT NOT NULL,
                    elder_id           TEXT NOT NULL,
                    current_stage      TEXT NOT NULL,
                    stage_start_date   TEXT NOT NULL,
                    created_at         TEXT NOT NULL,
                    status             TEXT NOT NULL,
                    message_count      INTEGER NOT NULL DEFAULT 0,
                    active_days        INTEGER NOT NULL DEFAULT 0,
                    video_call_count   INTEGER NOT NULL DEFAULT 0,
                    meeting_count      INTEGER NOT NULL DEFAULT 0,
                    progress_pct       INTEGER NOT NULL DEFAULT 0,
                    requirements_met   INTEGER NOT NULL DEFAULT 0,
                    end_request_status TEXT NOT NULL DEFAULT 'none',
                    end_request_by     TEXT,
                    end_request_reason TEXT,
                    end_request_at     TEXT,
                    updated_at         TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS requirements (
                    id              TEXT PRIMARY KEY,
                    relationship_id TEXT NOT NULL,
                    stage           TEXT NOT NULL,
                    title           TEXT NOT NULL,
                    description     TEXT NOT NULL DEFAULT '',
                    is_completed    INTEGER NOT NULL DEFAULT 0,
                    target_value    INTEGER,
                    current_value   INTEGER,
                    youth_signed    INTEGER NOT NULL DEFAULT 0,
                    elder_signed    INTEGER NOT NULL DEFAULT 0,
                    updated_at      TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_relationships_participants
                    ON relationships(youth_id, elder_id);
                CREATE INDEX IF NOT EXISTS idx_requirements_relationship_stage
                    ON requirements(relationship_id, stage);",
            )
            .map_err(sql_err)
    }

    fn max_timestamps(&self) -> Result<PollCursor, SourceError> {
        let conn = self.lock_conn();
        let relationships: Option<String> = conn
            .query_row("SELECT MAX(updated_at) FROM relationships", [], |row| {
                row.get(0)
            })
            .map_err(sql_err)?;
        let requirements: Option<String> = conn
            .query_row("SELECT MAX(updated_at) FROM requirements", [], |row| {
                row.get(0)
            })
            .map_err(sql_err)?;
        Ok(PollCursor {
            relationships: relationships.unwrap_or_default(),
            requirements: requirements.unwrap_or_default(),
        })
    }

    // ── Seeding ──────────────────────────────────────────────────────

    /// Insert a record plus its requirement list. Fails if a pair already
    /// exists between the two participants.
    pub fn seed(
        &self,
        record: &RelationshipRecord,
        requirements: &[Requirement],
    ) -> Result<(), SourceError> {
        if self
            .fetch_relationship_for_user(&record.youth_id)?
            .is_some()
        {
            return Err(SourceError::Query(format!(
                "user '{}' already has a relationship",
                record.youth_id
            )));
        }
        let now = now_str();
        {
            let conn = self.lock_conn();
            conn.execute(
                "INSERT INTO relationships (id, youth_id, elder_id, current_stage, \
                 stage_start_date, created_at, status, end_request_status, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.id,
                    record.youth_id,
                    record.elder_id,
                    record.current_stage.slug(),
                    record.stage_start_date.to_rfc3339(),
                    record.created_at.to_rfc3339(),
                    record.status.to_string(),
                    record.end_request_status.to_string(),
                    now,
                ],
            )
            .map_err(sql_err)?;
            for req in requirements {
                conn.execute(
                    "INSERT INTO requirements (id, relationship_id, stage, title, description, \
                     is_completed, target_value, current_value, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        req.id,
                        req.relationship_id,
                        req.stage.slug(),
                        req.title,
                        req.description,
                        req.is_completed,
                        req.target_value,
                        req.current_value,
                        now,
                    ],
                )
                .map_err(sql_err)?;
            }
        }
        self.lock_cursor().relationships = now.clone();
        self.lock_cursor().requirements = now;
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn fetch_relationship_for_user(
        &self,
        user_id: &str,
    ) -> Result<Option<RelationshipRecord>, SourceError> {
        let conn = self.lock_conn();
        let row = conn
            .query_row(
                &format!(
                    "SELECT {RELATIONSHIP_COLUMNS} FROM relationships
                     WHERE (youth_id = ?1 OR elder_id = ?1) AND status != 'ended'
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![user_id],
                RelationshipRow::from_row,
            )
            .optional()
            .map_err(sql_err)?;
        row.map(RelationshipRow::into_record).transpose()
    }

    /// The most recently created pair, ended or not. Used by the CLI to
    /// resolve a default user.
    pub fn any_relationship(&self) -> Result<Option<RelationshipRecord>, SourceError> {
        let conn = self.lock_conn();
        let row = conn
            .query_row(
                &format!(
                    "SELECT {RELATIONSHIP_COLUMNS} FROM relationships
                     ORDER BY created_at DESC LIMIT 1"
                ),
                [],
                RelationshipRow::from_row,
            )
            .optional()
            .map_err(sql_err)?;
        row.map(RelationshipRow::into_record).transpose()
    }

    pub fn fetch_requirements(
        &self,
        relationship_id: &str,
        stage: Stage,
    ) -> Result<Vec<Requirement>, SourceError> {
        let conn = self.lock_conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {REQUIREMENT_COLUMNS} FROM requirements
                 WHERE relationship_id = ?1 AND stage = ?2
                 ORDER BY rowid"
            ))
            .map_err(sql_err)?;
        let rows = stmt
            .query_map(params![relationship_id, stage.slug()], RequirementRow::from_row)
            .map_err(sql_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(sql_err)?;
        rows.into_iter()
            .map(RequirementRow::into_requirement)
            .collect()
    }

    pub fn all_requirements(
        &self,
        relationship_id: &str,
    ) -> Result<Vec<Requirement>, SourceError> {
        let conn = self.lock_conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {REQUIREMENT_COLUMNS} FROM requirements
                 WHERE relationship_id = ?1 ORDER BY rowid"
            ))
            .map_err(sql_err)?;
        let rows = stmt
            .query_map(params![relationship_id], RequirementRow::from_row)
            .map_err(sql_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(sql_err)?;
        rows.into_iter()
            .map(RequirementRow::into_requirement)
            .collect()
    }

    /// Resolve a requirement from a (possibly abbreviated) id.
    pub fn find_requirement(&self, id_prefix: &str) -> Result<Requirement, SourceError> {
        let conn = self.lock_conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {REQUIREMENT_COLUMNS} FROM requirements WHERE id LIKE ?1"
            ))
            .map_err(sql_err)?;
        let rows = stmt
            .query_map(params![format!("{id_prefix}%")], RequirementRow::from_row)
            .map_err(sql_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(sql_err)?;
        drop(stmt);
        drop(conn);
        match rows.len() {
            0 => Err(SourceError::Query(format!(
                "no requirement matches '{id_prefix}'"
            ))),
            1 => rows
                .into_iter()
                .next()
                .expect("len checked")
                .into_requirement(),
            n => Err(SourceError::Query(format!(
                "'{id_prefix}' is ambiguous ({n} matches)"
            ))),
        }
    }

    // ── Policy-layer mutations ───────────────────────────────────────

    /// Move the pair to a new stage (policy decision, e.g. a reviewer
    /// confirming the ceremony).
    pub fn set_stage(&self, relationship_id: &str, stage: Stage) -> Result<(), SourceError> {
        let now = now_str();
        self.lock_conn()
            .execute(
                "UPDATE relationships
                 SET current_stage = ?2, stage_start_date = ?3, updated_at = ?3
                 WHERE id = ?1",
                params![relationship_id, stage.slug(), now],
            )
            .map_err(sql_err)?;
        self.lock_cursor().relationships = now;
        self.notify_relationship(relationship_id);
        Ok(())
    }

    /// Bump stage metrics by the given deltas.
    pub fn bump_metrics(
        &self,
        relationship_id: &str,
        messages: u32,
        video_calls: u32,
        meetings: u32,
        active_days: u32,
    ) -> Result<(), SourceError> {
        let now = now_str();
        self.lock_conn()
            .execute(
                "UPDATE relationships SET
                    message_count = message_count + ?2,
                    video_call_count = video_call_count + ?3,
                    meeting_count = meeting_count + ?4,
                    active_days = active_days + ?5,
                    updated_at = ?6
                 WHERE id = ?1",
                params![relationship_id, messages, video_calls, meetings, active_days, now],
            )
            .map_err(sql_err)?;
        self.lock_cursor().relationships = now;
        self.notify_relationship(relationship_id);
        Ok(())
    }

    pub fn add_requirement(&self, requirement: &Requirement) -> Result<(), SourceError> {
        let now = now_str();
        self.lock_conn()
            .execute(
                "INSERT INTO requirements (id, relationship_id, stage, title, description, \
                 is_completed, target_value, current_value, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    requirement.id,
                    requirement.relationship_id,
                    requirement.stage.slug(),
                    requirement.title,
                    requirement.description,
                    requirement.is_completed,
                    requirement.target_value,
                    requirement.current_value,
                    now,
                ],
            )
            .map_err(sql_err)?;
        self.lock_cursor().requirements = now;
        self.notify_activities(&requirement.relationship_id);
        Ok(())
    }

    /// Mark a requirement completed. Completion is one-way.
    pub fn complete_requirement(&self, requirement_id: &str) -> Result<(), SourceError> {
        let requirement = self.find_requirement(requirement_id)?;
        let now = now_str();
        self.lock_conn()
            .execute(
                "UPDATE requirements SET is_completed = 1, updated_at = ?2 WHERE id = ?1",
                params![requirement.id, now],
            )
            .map_err(sql_err)?;
        self.lock_cursor().requirements = now;
        self.notify_activities(&requirement.relationship_id);
        Ok(())
    }

    /// Record one participant's signature; when both have signed, the
    /// requirement completes.
    pub fn sign_requirement(
        &self,
        requirement_id: &str,
        signer: Signer,
    ) -> Result<Requirement, SourceError> {
        let requirement = self.find_requirement(requirement_id)?;
        // UPDATE expressions see pre-update values: completion requires the
        // other participant to have signed already.
        let (column, other) = match signer {
            Signer::Youth => ("youth_signed", "elder_signed"),
            Signer::Elder => ("elder_signed", "youth_signed"),
        };
        let now = now_str();
        self.lock_conn()
            .execute(
                &format!(
                    "UPDATE requirements SET {column} = 1,
                        is_completed = CASE WHEN {other} = 1
                                            THEN 1 ELSE is_completed END,
                        updated_at = ?2
                     WHERE id = ?1"
                ),
                params![requirement.id, now],
            )
            .map_err(sql_err)?;
        self.lock_cursor().requirements = now;
        self.notify_activities(&requirement.relationship_id);
        self.find_requirement(&requirement.id)
    }

    /// Close out a pending withdrawal: approval ends the relationship,
    /// rejection reactivates it.
    pub fn resolve_withdrawal(
        &self,
        relationship_id: &str,
        approve: bool,
    ) -> Result<(), SourceError> {
        let (status, end_status) = if approve {
            ("ended", "approved")
        } else {
            ("active", "rejected")
        };
        let now = now_str();
        self.lock_conn()
            .execute(
                "UPDATE relationships
                 SET status = ?2, end_request_status = ?3, updated_at = ?4
                 WHERE id = ?1",
                params![relationship_id, status, end_status, now],
            )
            .map_err(sql_err)?;
        self.lock_cursor().relationships = now;
        self.notify_relationship(relationship_id);
        Ok(())
    }

    // ── Change feeds ─────────────────────────────────────────────────

    fn notify_relationship(&self, relationship_id: &str) {
        let _ = self
            .relationship_tx
            .send(RelationshipChanged::now(relationship_id));
    }

    fn notify_activities(&self, relationship_id: &str) {
        let _ = self
            .activities_tx
            .send(ActivitiesChanged::now(relationship_id));
    }

    /// One poll pass: emit events for rows touched by other processes
    /// since the last pass.
    pub fn poll_changes(&self) -> Result<(), SourceError> {
        let latest = self.max_timestamps()?;
        let previous = self.lock_cursor().clone();

        if latest.relationships > previous.relationships {
            if let Some(record) = self.any_relationship()? {
                debug!(relationship = %record.id, "external relationship change detected");
                self.lock_cursor().relationships = latest.relationships;
                self.notify_relationship(&record.id);
            }
        }
        if latest.requirements > previous.requirements {
            if let Some(record) = self.any_relationship()? {
                debug!(relationship = %record.id, "external activity change detected");
                self.lock_cursor().requirements = latest.requirements;
                self.notify_activities(&record.id);
            }
        }
        Ok(())
    }

    /// Poll for external writes on a fixed cadence until aborted.
    pub fn spawn_poller(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                if let Err(err) = self.poll_changes() {
                    warn!(error = %err, "change poll failed");
                }
            }
        })
    }
}

#[async_trait]
impl RelationshipSource for LocalStore {
    async fn relationship_snapshot(
        &self,
        user_id: &str,
    ) -> Result<Option<RelationshipRecord>, SourceError> {
        self.fetch_relationship_for_user(user_id)
    }

    async fn requirements(
        &self,
        relationship_id: &str,
        stage: Stage,
    ) -> Result<Vec<Requirement>, SourceError> {
        self.fetch_requirements(relationship_id, stage)
    }

    async fn request_withdrawal(
        &self,
        relationship_id: &str,
        user_id: &str,
        reason: &str,
    ) -> Result<(), SourceError> {
        let record = self
            .fetch_relationship_for_user(user_id)?
            .filter(|r| r.id == relationship_id)
            .ok_or_else(|| {
                SourceError::Query(format!(
                    "user '{user_id}' has no relationship '{relationship_id}'"
                ))
            })?;
        if record.end_request_status == EndRequestStatus::PendingCooldown {
            return Err(SourceError::Query(
                "a withdrawal request is already pending".into(),
            ));
        }
        let now = now_str();
        self.lock_conn()
            .execute(
                "UPDATE relationships
                 SET status = 'paused', end_request_status = 'pending_cooldown',
                     end_request_by = ?2, end_request_reason = ?3,
                     end_request_at = ?4, updated_at = ?4
                 WHERE id = ?1",
                params![relationship_id, user_id, reason, now],
            )
            .map_err(sql_err)?;
        self.lock_cursor().relationships = now;
        self.notify_relationship(relationship_id);
        Ok(())
    }

    fn subscribe_relationship(&self, _relationship_id: &str) -> Subscription<RelationshipChanged> {
        Subscription::new(self.relationship_tx.subscribe())
    }

    fn subscribe_activities(&self, _relationship_id: &str) -> Subscription<ActivitiesChanged> {
        Subscription::new(self.activities_tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindred_core::FeedMessage;

    fn seeded() -> (LocalStore, RelationshipRecord) {
        let store = LocalStore::open_memory().unwrap();
        let record = RelationshipRecord::new("youth-1", "elder-1");
        let requirements = vec![
            Requirement::new(&record.id, Stage::GettingToKnow, "Exchange introductions"),
            Requirement::new(&record.id, Stage::GettingToKnow, "Complete a voice call"),
            Requirement::new(&record.id, Stage::OfficialCeremony, "Sign the agreement"),
        ];
        store.seed(&record, &requirements).unwrap();
        (store, record)
    }

    #[test]
    fn seed_and_snapshot_roundtrip() {
        let (store, record) = seeded();
        let loaded = store
            .fetch_relationship_for_user("elder-1")
            .unwrap()
            .expect("record");
        assert_eq!(loaded.id, record.id);
        assert_eq!(loaded.current_stage, Stage::GettingToKnow);
        assert_eq!(loaded.status, RelationshipStatus::Active);
        assert_eq!(loaded.end_request_status, EndRequestStatus::None);
        assert!(store
            .fetch_relationship_for_user("stranger")
            .unwrap()
            .is_none());
    }

    #[test]
    fn seed_rejects_second_pair_for_same_user() {
        let (store, _) = seeded();
        let dup = RelationshipRecord::new("youth-1", "elder-2");
        assert!(store.seed(&dup, &[]).is_err());
    }

    #[test]
    fn requirements_filter_by_stage_in_insertion_order() {
        let (store, record) = seeded();
        let first = store
            .fetch_requirements(&record.id, Stage::GettingToKnow)
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].title, "Exchange introductions");
        let ceremony = store
            .fetch_requirements(&record.id, Stage::OfficialCeremony)
            .unwrap();
        assert_eq!(ceremony.len(), 1);
    }

    #[test]
    fn find_requirement_accepts_unique_prefix() {
        let (store, record) = seeded();
        let all = store.all_requirements(&record.id).unwrap();
        let target = &all[0];
        let found = store.find_requirement(&target.id[..8]).unwrap();
        assert_eq!(found.id, target.id);
        assert!(store.find_requirement("").is_err(), "empty prefix is ambiguous");
        assert!(store.find_requirement("zzzz").is_err());
    }

    #[test]
    fn completion_is_one_way() {
        let (store, record) = seeded();
        let all = store.all_requirements(&record.id).unwrap();
        store.complete_requirement(&all[0].id).unwrap();
        store.complete_requirement(&all[0].id).unwrap();
        let reloaded = store.find_requirement(&all[0].id).unwrap();
        assert!(reloaded.is_completed);
    }

    #[test]
    fn dual_signature_completes_only_with_both() {
        let (store, record) = seeded();
        let all = store.all_requirements(&record.id).unwrap();
        let agreement = all.iter().find(|r| r.title.contains("agreement")).unwrap();

        let after_one = store.sign_requirement(&agreement.id, Signer::Youth).unwrap();
        assert!(after_one.youth_signed && !after_one.elder_signed);
        assert!(!after_one.is_completed);

        // Re-signing by the same side changes nothing.
        let again = store.sign_requirement(&agreement.id, Signer::Youth).unwrap();
        assert!(!again.is_completed);

        let after_both = store.sign_requirement(&agreement.id, Signer::Elder).unwrap();
        assert!(after_both.elder_signed);
        assert!(after_both.is_completed);
    }

    #[tokio::test]
    async fn withdrawal_flow_updates_record_and_notifies() {
        let (store, record) = seeded();
        let mut feed = store.subscribe_relationship(&record.id);

        store
            .request_withdrawal(&record.id, "youth-1", "taking a break")
            .await
            .unwrap();
        let paused = store
            .fetch_relationship_for_user("youth-1")
            .unwrap()
            .unwrap();
        assert_eq!(paused.status, RelationshipStatus::Paused);
        assert_eq!(paused.end_request_status, EndRequestStatus::PendingCooldown);
        assert!(matches!(feed.next().await, FeedMessage::Event(_)));

        // A second request while one is pending is a policy error.
        assert!(store
            .request_withdrawal(&record.id, "elder-1", "me too")
            .await
            .is_err());

        // Rejection reactivates.
        store.resolve_withdrawal(&record.id, false).unwrap();
        let active = store
            .fetch_relationship_for_user("youth-1")
            .unwrap()
            .unwrap();
        assert_eq!(active.status, RelationshipStatus::Active);
        assert_eq!(active.end_request_status, EndRequestStatus::Rejected);
    }

    #[tokio::test]
    async fn approved_withdrawal_ends_the_relationship() {
        let (store, record) = seeded();
        store
            .request_withdrawal(&record.id, "elder-1", "health reasons")
            .await
            .unwrap();
        store.resolve_withdrawal(&record.id, true).unwrap();
        // Ended relationships no longer surface as the active snapshot.
        assert!(store
            .fetch_relationship_for_user("youth-1")
            .unwrap()
            .is_none());
        assert!(store.any_relationship().unwrap().is_some());
    }

    #[tokio::test]
    async fn poller_emits_events_for_external_writes() {
        let (store, record) = seeded();
        let mut rel_feed = store.subscribe_relationship(&record.id);
        let mut act_feed = store.subscribe_activities(&record.id);

        // Nothing external happened yet.
        store.poll_changes().unwrap();
        assert_eq!(rel_feed.drain(), 0);
        assert_eq!(act_feed.drain(), 0);

        // Simulate another process touching rows behind our back.
        let later = (Utc::now() + chrono::Duration::seconds(2))
            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
        store
            .lock_conn()
            .execute(
                "UPDATE relationships SET message_count = 5, updated_at = ?1",
                params![later],
            )
            .unwrap();
        store
            .lock_conn()
            .execute(
                "UPDATE requirements SET is_completed = 1, updated_at = ?1",
                params![later],
            )
            .unwrap();

        store.poll_changes().unwrap();
        assert!(matches!(rel_feed.next().await, FeedMessage::Event(_)));
        assert!(matches!(act_feed.next().await, FeedMessage::Event(_)));

        // Idempotent: a second poll with no new writes emits nothing.
        store.poll_changes().unwrap();
        assert_eq!(rel_feed.drain(), 0);
        assert_eq!(act_feed.drain(), 0);
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kindred.db");
        let record = RelationshipRecord::new("youth-9", "elder-9");
        {
            let store = LocalStore::open(path.clone()).unwrap();
            store
                .seed(
                    &record,
                    &[Requirement::new(&record.id, Stage::GettingToKnow, "Say hello")],
                )
                .unwrap();
            store.set_stage(&record.id, Stage::TrialPeriod).unwrap();
        }
        let reopened = LocalStore::open(path).unwrap();
        let loaded = reopened
            .fetch_relationship_for_user("youth-9")
            .unwrap()
            .expect("record persisted");
        assert_eq!(loaded.current_stage, Stage::TrialPeriod);
        assert_eq!(
            reopened.all_requirements(&record.id).unwrap().len(),
            1
        );
    }

    #[test]
    fn in_process_mutations_do_not_double_emit_via_poller() {
        let (store, record) = seeded();
        let mut rel_feed = store.subscribe_relationship(&record.id);
        store.set_stage(&record.id, Stage::TrialPeriod).unwrap();
        assert_eq!(rel_feed.drain(), 1, "direct notification");
        store.poll_changes().unwrap();
        assert_eq!(rel_feed.drain(), 0, "cursor already advanced");
    }
}
