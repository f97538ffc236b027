//! SQLite 账本 (SqliteStore)
//!
//! 持久账本: 采集进程与预测进程各自打开同一个数据库文件。
//! WAL 模式下读写互不阻塞, 每个写操作是一个 IMMEDIATE 事务,
//! 失败时整体回滚。

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Params as SqlParams, Row, Transaction, TransactionBehavior};
use tracing::{debug, info};

use super::types::{Frame, FrameId, NewFrame, ObjectId, Person, PersonId, PixelBox, Stage, TrackedObject};
use super::{Store, StoreResult};
use crate::error::StoreError;

/// 其他连接持有写锁时的最长等待
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS frames (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    camera               TEXT    NOT NULL,
    timestamp            INTEGER NOT NULL,
    timestamp_label      TEXT    NOT NULL,
    image_path           TEXT    NOT NULL,
    annotated_image_path TEXT,
    person_detected      INTEGER NOT NULL DEFAULT 0,
    action_detected      INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_frames_person ON frames (person_detected, id);
CREATE INDEX IF NOT EXISTS idx_frames_action ON frames (action_detected, id);

CREATE TABLE IF NOT EXISTS persons (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    completed  INTEGER NOT NULL DEFAULT 0,
    idle       INTEGER NOT NULL DEFAULT 0,
    video_path TEXT
);

CREATE TABLE IF NOT EXISTS objects (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    frame_id  INTEGER NOT NULL REFERENCES frames (id),
    x0        INTEGER NOT NULL,
    y0        INTEGER NOT NULL,
    x1        INTEGER NOT NULL,
    y1        INTEGER NOT NULL,
    person_id INTEGER REFERENCES persons (id)
);
CREATE INDEX IF NOT EXISTS idx_objects_frame ON objects (frame_id);
CREATE INDEX IF NOT EXISTS idx_objects_person ON objects (person_id);
";

const FRAME_COLUMNS: &str =
    "id, camera, timestamp, timestamp_label, image_path, annotated_image_path, person_detected, action_detected";
const OBJECT_COLUMNS: &str = "id, frame_id, x0, y0, x1, y1, person_id";
const PERSON_COLUMNS: &str = "id, completed, idle, video_path";

// ========== 行映射 ==========

fn sql_id(id: u64) -> i64 {
    id as i64
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn frame_from_row(row: &Row<'_>) -> rusqlite::Result<Frame> {
    Ok(Frame {
        id: row.get::<_, i64>(0)? as FrameId,
        camera: row.get(1)?,
        timestamp: row.get(2)?,
        timestamp_label: row.get(3)?,
        image_path: PathBuf::from(row.get::<_, String>(4)?),
        annotated_image_path: row.get::<_, Option<String>>(5)?.map(PathBuf::from),
        person_detected: row.get(6)?,
        action_detected: row.get(7)?,
    })
}

fn object_from_row(row: &Row<'_>) -> rusqlite::Result<TrackedObject> {
    Ok(TrackedObject {
        id: row.get::<_, i64>(0)? as ObjectId,
        frame_id: row.get::<_, i64>(1)? as FrameId,
        bbox: PixelBox::new(row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?),
        person_id: row.get::<_, Option<i64>>(6)?.map(|id| id as PersonId),
    })
}

fn person_from_row(row: &Row<'_>) -> rusqlite::Result<Person> {
    Ok(Person {
        id: row.get::<_, i64>(0)? as PersonId,
        completed: row.get(1)?,
        idle: row.get(2)?,
        video_path: row.get::<_, Option<String>>(3)?.map(PathBuf::from),
    })
}

/// 执行查询并收集所有行
fn collect<T, P: SqlParams>(
    conn: &Connection,
    sql: &str,
    params: P,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> rusqlite::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, map)?;
    let out = rows.collect::<rusqlite::Result<Vec<T>>>();
    out
}

fn stage_column(stage: Stage) -> &'static str {
    match stage {
        Stage::Person => "person_detected",
        Stage::Action => "action_detected",
    }
}

/// SQLite 账本实现
pub struct SqliteStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// 打开(或新建)数据库文件
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::open_with_timeout(path, BUSY_TIMEOUT)
    }

    /// 指定写锁等待时间
    pub fn open_with_timeout(path: impl Into<PathBuf>, busy_timeout: Duration) -> StoreResult<Self> {
        let path = path.into();
        let conn = Connection::open(&path)?;
        conn.busy_timeout(busy_timeout)?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch(SCHEMA)?;

        let frames: i64 = conn.query_row("SELECT COUNT(*) FROM frames", [], |row| row.get(0))?;
        info!(path = %path.display(), journal = %mode, frames, "📒 账本已打开");
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("ledger connection poisoned".into()))
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> StoreResult<T> {
        let conn = self.lock()?;
        Ok(f(&conn)?)
    }

    /// 在一个写事务内执行, 出错时回滚
    fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> StoreResult<T>) -> StoreResult<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

fn person_row(tx: &Transaction<'_>, person_id: PersonId) -> StoreResult<Person> {
    tx.query_row(
        &format!("SELECT {PERSON_COLUMNS} FROM persons WHERE id = ?1"),
        params![sql_id(person_id)],
        person_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::person_not_found(person_id))
}

fn frame_exists(tx: &Transaction<'_>, frame_id: FrameId) -> StoreResult<bool> {
    let found: Option<i64> = tx
        .query_row("SELECT id FROM frames WHERE id = ?1", params![sql_id(frame_id)], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

impl Store for SqliteStore {
    fn create_frame(&self, frame: NewFrame) -> StoreResult<FrameId> {
        self.write(|tx| {
            tx.execute(
                "INSERT INTO frames (camera, timestamp, timestamp_label, image_path) VALUES (?1, ?2, ?3, ?4)",
                params![frame.camera, frame.timestamp, frame.timestamp_label, path_text(&frame.image_path)],
            )?;
            Ok(tx.last_insert_rowid() as FrameId)
        })
    }

    fn frame(&self, frame_id: FrameId) -> StoreResult<Option<Frame>> {
        self.read(|conn| {
            conn.query_row(
                &format!("SELECT {FRAME_COLUMNS} FROM frames WHERE id = ?1"),
                params![sql_id(frame_id)],
                frame_from_row,
            )
            .optional()
        })
    }

    fn next_unprocessed_frame(&self, stage: Stage) -> StoreResult<Option<Frame>> {
        let sql = format!(
            "SELECT {FRAME_COLUMNS} FROM frames WHERE {} = 0 ORDER BY id LIMIT 1",
            stage_column(stage)
        );
        self.read(|conn| conn.query_row(&sql, [], frame_from_row).optional())
    }

    fn latest_frame_id(&self) -> StoreResult<Option<FrameId>> {
        self.read(|conn| {
            let id: Option<i64> = conn.query_row("SELECT MAX(id) FROM frames", [], |row| row.get(0))?;
            Ok(id.map(|id| id as FrameId))
        })
    }

    fn mark_processed(&self, frame_id: FrameId, stage: Stage) -> StoreResult<()> {
        self.write(|tx| {
            let person_detected: bool = tx
                .query_row(
                    "SELECT person_detected FROM frames WHERE id = ?1",
                    params![sql_id(frame_id)],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| StoreError::frame_not_found(frame_id))?;
            if stage == Stage::Action && !person_detected {
                return Err(StoreError::Invariant(format!(
                    "frame {frame_id} cannot finish action detection before person detection"
                )));
            }
            tx.execute(
                &format!("UPDATE frames SET {} = 1 WHERE id = ?1", stage_column(stage)),
                params![sql_id(frame_id)],
            )?;
            debug!(frame_id, %stage, "frame marked processed");
            Ok(())
        })
    }

    fn set_annotated_image(&self, frame_id: FrameId, path: &Path) -> StoreResult<()> {
        self.write(|tx| {
            let changed = tx.execute(
                "UPDATE frames SET annotated_image_path = ?1 WHERE id = ?2",
                params![path_text(path), sql_id(frame_id)],
            )?;
            if changed == 0 {
                return Err(StoreError::frame_not_found(frame_id));
            }
            Ok(())
        })
    }

    fn frame_timestamp(&self, frame_id: FrameId) -> StoreResult<i64> {
        self.read(|conn| {
            conn.query_row(
                "SELECT timestamp FROM frames WHERE id = ?1",
                params![sql_id(frame_id)],
                |row| row.get(0),
            )
            .optional()
        })?
        .ok_or_else(|| StoreError::frame_not_found(frame_id))
    }

    fn create_object(&self, frame_id: FrameId, bbox: PixelBox) -> StoreResult<ObjectId> {
        self.write(|tx| {
            if !frame_exists(tx, frame_id)? {
                return Err(StoreError::frame_not_found(frame_id));
            }
            tx.execute(
                "INSERT INTO objects (frame_id, x0, y0, x1, y1) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![sql_id(frame_id), bbox.x0, bbox.y0, bbox.x1, bbox.y1],
            )?;
            Ok(tx.last_insert_rowid() as ObjectId)
        })
    }

    fn assign_person_to_object(&self, object_id: ObjectId, person_id: PersonId) -> StoreResult<()> {
        self.write(|tx| {
            person_row(tx, person_id)?;
            let owner: Option<i64> = tx
                .query_row(
                    "SELECT person_id FROM objects WHERE id = ?1",
                    params![sql_id(object_id)],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| StoreError::object_not_found(object_id))?;
            if let Some(owner) = owner {
                return Err(StoreError::Conflict(format!(
                    "object {object_id} already belongs to person {owner}"
                )));
            }
            tx.execute(
                "UPDATE objects SET person_id = ?1 WHERE id = ?2",
                params![sql_id(person_id), sql_id(object_id)],
            )?;
            Ok(())
        })
    }

    fn objects_in_frame(&self, frame_id: FrameId) -> StoreResult<Vec<TrackedObject>> {
        self.read(|conn| {
            collect(
                conn,
                &format!("SELECT {OBJECT_COLUMNS} FROM objects WHERE frame_id = ?1 ORDER BY id"),
                params![sql_id(frame_id)],
                object_from_row,
            )
        })
    }

    fn objects_for_person(&self, person_id: PersonId) -> StoreResult<Vec<TrackedObject>> {
        self.read(|conn| {
            collect(
                conn,
                &format!("SELECT {OBJECT_COLUMNS} FROM objects WHERE person_id = ?1 ORDER BY id"),
                params![sql_id(person_id)],
                object_from_row,
            )
        })
    }

    fn create_person(&self) -> StoreResult<PersonId> {
        self.write(|tx| {
            tx.execute("INSERT INTO persons DEFAULT VALUES", [])?;
            Ok(tx.last_insert_rowid() as PersonId)
        })
    }

    fn person(&self, person_id: PersonId) -> StoreResult<Option<Person>> {
        self.read(|conn| {
            conn.query_row(
                &format!("SELECT {PERSON_COLUMNS} FROM persons WHERE id = ?1"),
                params![sql_id(person_id)],
                person_from_row,
            )
            .optional()
        })
    }

    fn active_persons(&self) -> StoreResult<Vec<Person>> {
        self.read(|conn| {
            collect(
                conn,
                &format!("SELECT {PERSON_COLUMNS} FROM persons WHERE completed = 0 ORDER BY id"),
                [],
                person_from_row,
            )
        })
    }

    fn set_person_completed(&self, person_id: PersonId) -> StoreResult<()> {
        self.write(|tx| {
            let changed = tx.execute("UPDATE persons SET completed = 1 WHERE id = ?1", params![sql_id(person_id)])?;
            if changed == 0 {
                return Err(StoreError::person_not_found(person_id));
            }
            Ok(())
        })
    }

    fn set_person_idle(&self, person_id: PersonId) -> StoreResult<()> {
        self.write(|tx| {
            let changed = tx.execute("UPDATE persons SET idle = 1 WHERE id = ?1", params![sql_id(person_id)])?;
            if changed == 0 {
                return Err(StoreError::person_not_found(person_id));
            }
            Ok(())
        })
    }

    fn set_person_video_path(&self, person_id: PersonId, path: &Path) -> StoreResult<()> {
        self.write(|tx| {
            if let Some(existing) = person_row(tx, person_id)?.video_path {
                return Err(StoreError::Conflict(format!(
                    "person {person_id} already has video {}",
                    existing.display()
                )));
            }
            tx.execute(
                "UPDATE persons SET video_path = ?1 WHERE id = ?2",
                params![path_text(path), sql_id(person_id)],
            )?;
            Ok(())
        })
    }

    fn pending_videos(&self) -> StoreResult<Vec<Person>> {
        self.read(|conn| {
            collect(
                conn,
                &format!(
                    "SELECT {PERSON_COLUMNS} FROM persons \
                     WHERE idle = 1 AND completed = 1 AND video_path IS NULL ORDER BY id"
                ),
                [],
                person_from_row,
            )
        })
    }

    fn reset(&self) -> StoreResult<()> {
        self.write(|tx| {
            // sqlite_sequence 记录 AUTOINCREMENT 计数, 清空后ID从1开始
            tx.execute_batch(
                "DELETE FROM objects; DELETE FROM persons; DELETE FROM frames; DELETE FROM sqlite_sequence;",
            )?;
            info!("ledger reset");
            Ok(())
        })
    }
}
