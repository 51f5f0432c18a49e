//! Local persistence: capture records in SQLite, media bytes as files.
//!
//! The `captures` table is the photo roll; `generation_jobs` holds the
//! durable fields of in-flight generation work so a restart can resume
//! polling. Media (originals, edits, generated videos) stays on disk next
//! to the database, file names derived from the record id.

use crate::error::AiError;
use crate::managers::jobs::JobStore;
use crate::models::{CaptureRecord, GenerationJob, InspirationPersona, JobKind, JobStatus};
use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

pub const DATABASE_FILE_NAME: &str = "musecam.db";

pub struct CaptureStore {
    conn: Mutex<Connection>,
}

impl CaptureStore {
    pub fn open(path: &Path) -> Result<Self, AiError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = CaptureStore {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory database for tests and throwaway sessions.
    pub fn open_in_memory() -> Result<Self, AiError> {
        let store = CaptureStore {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), AiError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS captures (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                original_ref TEXT NOT NULL,
                edited_ref TEXT,
                video_ref TEXT,
                generated_video_ref TEXT,
                inspiration_text TEXT,
                inspiration_persona TEXT,
                video_analysis_text TEXT,
                video_script TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_captures_created_at
                ON captures(created_at DESC);

            CREATE TABLE IF NOT EXISTS generation_jobs (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                record_id TEXT NOT NULL,
                source_ref TEXT NOT NULL,
                status TEXT NOT NULL,
                detail TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_record_id
                ON generation_jobs(record_id);
            "#,
        )?;
        Ok(())
    }

    pub fn insert_record(&self, record: &CaptureRecord) -> Result<(), AiError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO captures (id, created_at, original_ref, edited_ref, video_ref, \
             generated_video_ref, inspiration_text, inspiration_persona, video_analysis_text, \
             video_script) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.id.to_string(),
                record.created_at.to_rfc3339(),
                record.original_ref,
                record.edited_ref,
                record.video_ref,
                record.generated_video_ref,
                record.inspiration_text,
                record.inspiration_persona.map(|p| p.label()),
                record.video_analysis_text,
                record.video_script,
            ],
        )?;
        Ok(())
    }

    pub fn update_record(&self, record: &CaptureRecord) -> Result<(), AiError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE captures SET edited_ref = ?2, video_ref = ?3, generated_video_ref = ?4, \
             inspiration_text = ?5, inspiration_persona = ?6, video_analysis_text = ?7, \
             video_script = ?8 WHERE id = ?1",
            params![
                record.id.to_string(),
                record.edited_ref,
                record.video_ref,
                record.generated_video_ref,
                record.inspiration_text,
                record.inspiration_persona.map(|p| p.label()),
                record.video_analysis_text,
                record.video_script,
            ],
        )?;
        Ok(())
    }

    pub fn get_record(&self, id: Uuid) -> Result<Option<CaptureRecord>, AiError> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT id, created_at, original_ref, edited_ref, video_ref, \
                 generated_video_ref, inspiration_text, inspiration_persona, \
                 video_analysis_text, video_script FROM captures WHERE id = ?1",
                params![id.to_string()],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// All capture records, newest first.
    pub fn list_records(&self) -> Result<Vec<CaptureRecord>, AiError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, created_at, original_ref, edited_ref, video_ref, \
             generated_video_ref, inspiration_text, inspiration_persona, \
             video_analysis_text, video_script FROM captures ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn delete_record(&self, id: Uuid) -> Result<(), AiError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM generation_jobs WHERE record_id = ?1",
            params![id.to_string()],
        )?;
        conn.execute("DELETE FROM captures WHERE id = ?1", params![id.to_string()])?;
        Ok(())
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<CaptureRecord> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(1)?;
    let persona: Option<String> = row.get(7)?;
    Ok(CaptureRecord {
        id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        original_ref: row.get(2)?,
        edited_ref: row.get(3)?,
        video_ref: row.get(4)?,
        generated_video_ref: row.get(5)?,
        inspiration_text: row.get(6)?,
        inspiration_persona: persona.as_deref().and_then(InspirationPersona::from_label),
        video_analysis_text: row.get(8)?,
        video_script: row.get(9)?,
    })
}

impl JobStore for CaptureStore {
    fn load_pending(&self) -> Result<Vec<GenerationJob>, AiError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, kind, record_id, source_ref, status, detail, created_at \
             FROM generation_jobs WHERE status IN ('pending', 'polling')",
        )?;
        let rows = stmt.query_map([], row_to_job)?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }

    fn save(&self, job: &GenerationJob) -> Result<(), AiError> {
        let detail = match &job.status {
            JobStatus::Succeeded { artifact_ref } => Some(artifact_ref.clone()),
            JobStatus::Failed { reason } => Some(reason.clone()),
            _ => None,
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO generation_jobs \
             (id, kind, record_id, source_ref, status, detail, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                job.id,
                job.kind.as_str(),
                job.record_id.to_string(),
                job.source_ref,
                job.status.as_str(),
                detail,
                job.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn clear(&self, job_id: &str) -> Result<(), AiError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM generation_jobs WHERE id = ?1", params![job_id])?;
        Ok(())
    }
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<GenerationJob> {
    let kind: String = row.get(1)?;
    let record_id: String = row.get(2)?;
    let status: String = row.get(4)?;
    let detail: Option<String> = row.get(5)?;
    let created_at: String = row.get(6)?;

    let status = match status.as_str() {
        "polling" => JobStatus::Polling,
        "succeeded" => JobStatus::Succeeded {
            artifact_ref: detail.unwrap_or_default(),
        },
        "failed" => JobStatus::Failed {
            reason: detail.unwrap_or_else(|| "unknown".to_string()),
        },
        "timed_out" => JobStatus::TimedOut,
        _ => JobStatus::Pending,
    };

    Ok(GenerationJob {
        id: row.get(0)?,
        kind: JobKind::from_str(&kind).unwrap_or(JobKind::VideoGeneration),
        record_id: Uuid::parse_str(&record_id).unwrap_or_else(|_| Uuid::nil()),
        source_ref: row.get(3)?,
        status,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

/// Media bytes on disk next to the database, file names derived from the
/// owning record id.
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        MediaStore { root: root.into() }
    }

    pub fn original_name(record_id: Uuid) -> String {
        format!("{}_original.jpg", record_id)
    }

    pub fn edited_name(record_id: Uuid) -> String {
        format!("{}_edited.jpg", record_id)
    }

    pub fn generated_video_name(record_id: Uuid) -> String {
        format!("{}_generated.mp4", record_id)
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn save(&self, name: &str, bytes: &[u8]) -> Result<(), AiError> {
        std::fs::create_dir_all(&self.root)?;
        let path = self.path_for(name);
        std::fs::write(&path, bytes)?;
        debug!("Saved media file {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>, AiError> {
        Ok(std::fs::read(self.path_for(name))?)
    }

    pub fn delete(&self, name: &str) {
        let path = self.path_for(name);
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
    }
}
