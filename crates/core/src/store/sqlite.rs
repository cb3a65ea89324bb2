//! SQLite-backed store implementation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{
    CreateSessionRequest, DedupStore, DuplicateGroup, FileMapping, FileRecord, FileRecordUpdate,
    HashCacheEntry, MappingStatus, NewFileRecord, NewMapping, ProcessingStatus, Session,
    SessionCounters, SessionFilter, SessionStatus, SessionStore, StoreError,
};

const SESSION_COLUMNS: &str = "id, status, source_root, destination_root, created_at, \
    started_at, completed_at, files_scanned, files_processed, files_skipped, \
    files_duplicates, files_error, bytes_processed, bytes_total, error_message, updated_at";

const FILE_COLUMNS: &str = "id, session_id, source_path, hash, size, extension, category, \
    status, duplicate_of, error, updated_at";

const MAPPING_COLUMNS: &str =
    "id, session_id, source_path, destination_path, temp_path, size, status, created_at";

const GROUP_SELECT: &str = r#"
    SELECT g.id, g.hash, g.category, g.canonical_id, g.canonical_path,
           g.canonical_session, g.confirmed, g.created_at,
           (SELECT COUNT(*) FROM duplicate_members m WHERE m.group_id = g.id)
    FROM duplicate_groups g
"#;

/// SQLite-backed session, mapping and duplicate registry store.
///
/// All access goes through one serialized connection. Paths are stored as
/// BLOBs of their platform bytes so names that are not valid UTF-8 keep
/// distinct keys.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Database(format!(
                        "failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                source_root BLOB NOT NULL,
                destination_root BLOB NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                files_scanned INTEGER NOT NULL DEFAULT 0,
                files_processed INTEGER NOT NULL DEFAULT 0,
                files_skipped INTEGER NOT NULL DEFAULT 0,
                files_duplicates INTEGER NOT NULL DEFAULT 0,
                files_error INTEGER NOT NULL DEFAULT 0,
                bytes_processed INTEGER NOT NULL DEFAULT 0,
                bytes_total INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);

            CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                source_path BLOB NOT NULL,
                hash TEXT,
                size INTEGER NOT NULL,
                extension TEXT,
                category TEXT,
                status TEXT NOT NULL,
                duplicate_of INTEGER,
                error TEXT,
                updated_at TEXT NOT NULL,
                UNIQUE(session_id, source_path)
            );

            CREATE INDEX IF NOT EXISTS idx_files_status ON files(session_id, status);
            CREATE INDEX IF NOT EXISTS idx_files_hash ON files(hash);

            CREATE TABLE IF NOT EXISTS file_mappings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                source_path BLOB NOT NULL,
                destination_path BLOB NOT NULL,
                temp_path BLOB,
                size INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_mappings_session ON file_mappings(session_id, status);
            CREATE INDEX IF NOT EXISTS idx_mappings_source ON file_mappings(session_id, source_path);

            CREATE TABLE IF NOT EXISTS duplicate_groups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hash TEXT NOT NULL,
                category TEXT NOT NULL,
                canonical_id INTEGER NOT NULL,
                canonical_path BLOB NOT NULL,
                canonical_session TEXT NOT NULL,
                confirmed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE(hash, category)
            );

            CREATE INDEX IF NOT EXISTS idx_groups_session ON duplicate_groups(canonical_session);

            CREATE TABLE IF NOT EXISTS duplicate_members (
                group_id INTEGER NOT NULL,
                file_id INTEGER NOT NULL,
                source_path BLOB NOT NULL,
                UNIQUE(group_id, source_path)
            );

            CREATE TABLE IF NOT EXISTS hash_cache (
                path BLOB PRIMARY KEY,
                size INTEGER NOT NULL,
                mtime INTEGER NOT NULL,
                hash TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".to_string()))
    }

    fn load_session(conn: &Connection, id: &str) -> Result<Option<Session>, StoreError> {
        let sql = format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS);
        Ok(conn
            .query_row(&sql, params![id], Self::row_to_session)
            .optional()?)
    }

    fn load_file_record(conn: &Connection, id: i64) -> Result<Option<FileRecord>, StoreError> {
        let sql = format!("SELECT {} FROM files WHERE id = ?1", FILE_COLUMNS);
        Ok(conn
            .query_row(&sql, params![id], Self::row_to_file_record)
            .optional()?)
    }

    fn load_group(
        conn: &Connection,
        hash: &str,
        category: &str,
    ) -> Result<Option<DuplicateGroup>, StoreError> {
        let sql = format!("{} WHERE g.hash = ?1 AND g.category = ?2", GROUP_SELECT);
        Ok(conn
            .query_row(&sql, params![hash, category], Self::row_to_group)
            .optional()?)
    }

    fn load_group_by_id(conn: &Connection, id: i64) -> Result<DuplicateGroup, StoreError> {
        let sql = format!("{} WHERE g.id = ?1", GROUP_SELECT);
        conn.query_row(&sql, params![id], Self::row_to_group)
            .optional()?
            .ok_or_else(|| StoreError::Database(format!("group {} vanished", id)))
    }

    fn insert_mapping(
        conn: &Connection,
        mapping: NewMapping,
        status: MappingStatus,
    ) -> Result<FileMapping, StoreError> {
        let now = Utc::now();
        conn.execute(
            r#"
            INSERT INTO file_mappings (session_id, source_path, destination_path, temp_path,
                                       size, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                mapping.session_id,
                path_bytes(&mapping.source_path),
                path_bytes(&mapping.destination_path),
                mapping.temp_path.as_deref().map(path_bytes),
                mapping.size as i64,
                status.as_str(),
                now.to_rfc3339(),
            ],
        )?;

        Ok(FileMapping {
            id: conn.last_insert_rowid(),
            session_id: mapping.session_id,
            source_path: mapping.source_path,
            destination_path: mapping.destination_path,
            temp_path: mapping.temp_path,
            size: mapping.size,
            status,
            created_at: now,
        })
    }

    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
        let status: String = row.get(1)?;
        let source_root: Vec<u8> = row.get(2)?;
        let destination_root: Vec<u8> = row.get(3)?;
        let created_at: String = row.get(4)?;
        let started_at: Option<String> = row.get(5)?;
        let completed_at: Option<String> = row.get(6)?;
        let updated_at: String = row.get(15)?;

        Ok(Session {
            id: row.get(0)?,
            status: status.parse().unwrap_or(SessionStatus::Error),
            source_root: path_from_bytes(source_root),
            destination_root: path_from_bytes(destination_root),
            created_at: parse_timestamp(&created_at),
            started_at: started_at.as_deref().map(parse_timestamp),
            completed_at: completed_at.as_deref().map(parse_timestamp),
            counters: SessionCounters {
                files_scanned: row.get::<_, i64>(7)? as u64,
                files_processed: row.get::<_, i64>(8)? as u64,
                files_skipped: row.get::<_, i64>(9)? as u64,
                files_duplicates: row.get::<_, i64>(10)? as u64,
                files_error: row.get::<_, i64>(11)? as u64,
                bytes_processed: row.get::<_, i64>(12)? as u64,
                bytes_total: row.get::<_, i64>(13)? as u64,
            },
            error_message: row.get(14)?,
            updated_at: parse_timestamp(&updated_at),
        })
    }

    fn row_to_file_record(row: &rusqlite::Row) -> rusqlite::Result<FileRecord> {
        let source_path: Vec<u8> = row.get(2)?;
        let status: String = row.get(7)?;
        let updated_at: String = row.get(10)?;

        Ok(FileRecord {
            id: row.get(0)?,
            session_id: row.get(1)?,
            source_path: path_from_bytes(source_path),
            hash: row.get(3)?,
            size: row.get::<_, i64>(4)? as u64,
            extension: row.get(5)?,
            category: row.get(6)?,
            status: status.parse().unwrap_or(ProcessingStatus::Error),
            duplicate_of: row.get(8)?,
            error: row.get(9)?,
            updated_at: parse_timestamp(&updated_at),
        })
    }

    fn row_to_mapping(row: &rusqlite::Row) -> rusqlite::Result<FileMapping> {
        let source_path: Vec<u8> = row.get(2)?;
        let destination_path: Vec<u8> = row.get(3)?;
        let temp_path: Option<Vec<u8>> = row.get(4)?;
        let status: String = row.get(6)?;
        let created_at: String = row.get(7)?;

        Ok(FileMapping {
            id: row.get(0)?,
            session_id: row.get(1)?,
            source_path: path_from_bytes(source_path),
            destination_path: path_from_bytes(destination_path),
            temp_path: temp_path.map(path_from_bytes),
            size: row.get::<_, i64>(5)? as u64,
            status: status.parse().unwrap_or(MappingStatus::Pending),
            created_at: parse_timestamp(&created_at),
        })
    }

    fn row_to_group(row: &rusqlite::Row) -> rusqlite::Result<DuplicateGroup> {
        let canonical_path: Vec<u8> = row.get(4)?;
        let created_at: String = row.get(7)?;

        Ok(DuplicateGroup {
            id: row.get(0)?,
            hash: row.get(1)?,
            category: row.get(2)?,
            canonical_id: row.get(3)?,
            canonical_path: path_from_bytes(canonical_path),
            canonical_session: row.get(5)?,
            confirmed: row.get(6)?,
            created_at: parse_timestamp(&created_at),
            duplicate_count: row.get::<_, i64>(8)? as u64,
        })
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Platform bytes of a path. Round-trips through [`path_from_bytes`].
#[cfg(unix)]
fn path_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(unix)]
fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    use std::os::unix::ffi::OsStringExt;
    PathBuf::from(std::ffi::OsString::from_vec(bytes))
}

/// UTF-16 code units, little endian, unpaired surrogates included.
#[cfg(windows)]
fn path_bytes(path: &Path) -> Vec<u8> {
    use std::os::windows::ffi::OsStrExt;
    path.as_os_str()
        .encode_wide()
        .flat_map(u16::to_le_bytes)
        .collect()
}

#[cfg(windows)]
fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    use std::os::windows::ffi::OsStringExt;
    let wide: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    PathBuf::from(std::ffi::OsString::from_wide(&wide))
}

#[cfg(not(any(unix, windows)))]
fn path_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

#[cfg(not(any(unix, windows)))]
fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
}

impl SessionStore for SqliteStore {
    fn create_session(&self, request: CreateSessionRequest) -> Result<Session, StoreError> {
        let conn = self.conn()?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            r#"
            INSERT INTO sessions (id, status, source_root, destination_root,
                                  created_at, started_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?5)
            "#,
            params![
                id,
                SessionStatus::Running.as_str(),
                path_bytes(&request.source_root),
                path_bytes(&request.destination_root),
                now,
            ],
        )?;

        Self::load_session(&conn, &id)?.ok_or(StoreError::SessionNotFound(id))
    }

    fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let conn = self.conn()?;
        Self::load_session(&conn, id)
    }

    fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, StoreError> {
        let conn = self.conn()?;
        let mut sql = format!("SELECT {} FROM sessions", SESSION_COLUMNS);
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            sql.push_str(" WHERE status = ?");
            values.push(Box::new(status.as_str()));
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");
        values.push(Box::new(filter.limit));
        values.push(Box::new(filter.offset));

        let mut stmt = conn.prepare(&sql)?;
        let refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let sessions = stmt
            .query_map(refs.as_slice(), Self::row_to_session)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    fn update_status(
        &self,
        id: &str,
        status: SessionStatus,
        error_message: Option<&str>,
    ) -> Result<Session, StoreError> {
        let conn = self.conn()?;
        let current = Self::load_session(&conn, id)?
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;

        if !current.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }

        let now = Utc::now().to_rfc3339();
        let completed_at = status.is_terminal().then(|| now.clone());

        conn.execute(
            r#"
            UPDATE sessions
            SET status = ?2,
                completed_at = COALESCE(completed_at, ?3),
                error_message = COALESCE(?4, error_message),
                updated_at = ?5
            WHERE id = ?1
            "#,
            params![id, status.as_str(), completed_at, error_message, now],
        )?;

        Self::load_session(&conn, id)?.ok_or_else(|| StoreError::SessionNotFound(id.to_string()))
    }

    fn update_counters(&self, id: &str, counters: &SessionCounters) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"
            UPDATE sessions
            SET files_scanned = ?2, files_processed = ?3, files_skipped = ?4,
                files_duplicates = ?5, files_error = ?6, bytes_processed = ?7,
                bytes_total = ?8, updated_at = ?9
            WHERE id = ?1
            "#,
            params![
                id,
                counters.files_scanned as i64,
                counters.files_processed as i64,
                counters.files_skipped as i64,
                counters.files_duplicates as i64,
                counters.files_error as i64,
                counters.bytes_processed as i64,
                counters.bytes_total as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;

        if updated == 0 {
            return Err(StoreError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    fn find_incomplete_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM sessions WHERE status IN (?1, ?2) ORDER BY created_at DESC",
            SESSION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let sessions = stmt
            .query_map(
                params![
                    SessionStatus::Running.as_str(),
                    SessionStatus::Paused.as_str()
                ],
                Self::row_to_session,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    fn append_mapping(&self, mapping: NewMapping) -> Result<FileMapping, StoreError> {
        let conn = self.conn()?;
        Self::insert_mapping(&conn, mapping, MappingStatus::Completed)
    }

    fn begin_mapping(&self, mapping: NewMapping) -> Result<FileMapping, StoreError> {
        let conn = self.conn()?;
        Self::insert_mapping(&conn, mapping, MappingStatus::Pending)
    }

    fn complete_mapping(&self, mapping_id: i64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE file_mappings SET status = ?2, temp_path = NULL WHERE id = ?1 AND status = ?3",
            params![
                mapping_id,
                MappingStatus::Completed.as_str(),
                MappingStatus::Pending.as_str()
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::MappingNotFound(mapping_id));
        }
        Ok(())
    }

    fn discard_mapping(&self, mapping_id: i64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM file_mappings WHERE id = ?1 AND status = ?2",
            params![mapping_id, MappingStatus::Pending.as_str()],
        )?;
        Ok(())
    }

    fn mappings(
        &self,
        session_id: &str,
        status: Option<MappingStatus>,
    ) -> Result<Vec<FileMapping>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM file_mappings WHERE session_id = ?1 \
             AND (?2 IS NULL OR status = ?2) ORDER BY id",
            MAPPING_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let mappings = stmt
            .query_map(
                params![session_id, status.map(|s| s.as_str())],
                Self::row_to_mapping,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(mappings)
    }

    fn mark_mapping_undone(&self, mapping_id: i64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE file_mappings SET status = ?2 WHERE id = ?1",
            params![mapping_id, MappingStatus::Undone.as_str()],
        )?;
        Ok(())
    }

    fn find_mapping(
        &self,
        session_id: &str,
        source: &Path,
    ) -> Result<Option<FileMapping>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM file_mappings \
             WHERE session_id = ?1 AND source_path = ?2 AND status = ?3 \
             ORDER BY id LIMIT 1",
            MAPPING_COLUMNS
        );
        Ok(conn
            .query_row(
                &sql,
                params![
                    session_id,
                    path_bytes(source),
                    MappingStatus::Completed.as_str()
                ],
                Self::row_to_mapping,
            )
            .optional()?)
    }

    fn mapped_sources(&self, session_id: &str) -> Result<HashSet<PathBuf>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT source_path FROM file_mappings WHERE session_id = ?1 AND status = ?2",
        )?;
        let sources = stmt
            .query_map(
                params![session_id, MappingStatus::Completed.as_str()],
                |row| row.get::<_, Vec<u8>>(0).map(path_from_bytes),
            )?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(sources)
    }

    fn upsert_file_record(&self, record: NewFileRecord) -> Result<FileRecord, StoreError> {
        let conn = self.conn()?;
        let source = path_bytes(&record.source_path);

        conn.execute(
            r#"
            INSERT INTO files (session_id, source_path, size, extension, status, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(session_id, source_path) DO UPDATE SET
                size = excluded.size,
                extension = excluded.extension,
                status = excluded.status,
                error = NULL,
                updated_at = excluded.updated_at
            "#,
            params![
                record.session_id,
                source,
                record.size as i64,
                record.extension,
                ProcessingStatus::Processing.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;

        let sql = format!(
            "SELECT {} FROM files WHERE session_id = ?1 AND source_path = ?2",
            FILE_COLUMNS
        );
        Ok(conn.query_row(
            &sql,
            params![record.session_id, source],
            Self::row_to_file_record,
        )?)
    }

    fn update_file_record(&self, id: i64, update: FileRecordUpdate) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"
            UPDATE files
            SET status = ?2,
                hash = COALESCE(?3, hash),
                category = COALESCE(?4, category),
                duplicate_of = COALESCE(?5, duplicate_of),
                error = COALESCE(?6, error),
                updated_at = ?7
            WHERE id = ?1
            "#,
            params![
                id,
                update.status.as_str(),
                update.hash,
                update.category,
                update.duplicate_of,
                update.error,
                Utc::now().to_rfc3339(),
            ],
        )?;

        if updated == 0 {
            return Err(StoreError::RecordNotFound(id));
        }
        Ok(())
    }

    fn get_file_record(&self, id: i64) -> Result<Option<FileRecord>, StoreError> {
        let conn = self.conn()?;
        Self::load_file_record(&conn, id)
    }

    fn file_records(
        &self,
        session_id: &str,
        status: Option<ProcessingStatus>,
    ) -> Result<Vec<FileRecord>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM files WHERE session_id = ?1 \
             AND (?2 IS NULL OR status = ?2) ORDER BY id",
            FILE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(
                params![session_id, status.map(|s| s.as_str())],
                Self::row_to_file_record,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

impl DedupStore for SqliteStore {
    fn cached_hash(
        &self,
        path: &Path,
        size: u64,
        mtime: i64,
    ) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT hash FROM hash_cache WHERE path = ?1 AND size = ?2 AND mtime = ?3",
                params![path_bytes(path), size as i64, mtime],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn store_hash(&self, entry: &HashCacheEntry) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO hash_cache (path, size, mtime, hash, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(path) DO UPDATE SET
                size = excluded.size,
                mtime = excluded.mtime,
                hash = excluded.hash,
                updated_at = excluded.updated_at
            "#,
            params![
                path_bytes(&entry.path),
                entry.size as i64,
                entry.mtime,
                entry.hash,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn find_group(&self, hash: &str, category: &str) -> Result<Option<DuplicateGroup>, StoreError> {
        let conn = self.conn()?;
        Self::load_group(&conn, hash, category)
    }

    fn create_group(
        &self,
        hash: &str,
        category: &str,
        canonical_id: i64,
        canonical_path: &Path,
        canonical_session: &str,
    ) -> Result<DuplicateGroup, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO duplicate_groups (hash, category, canonical_id, canonical_path,
                                          canonical_session, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                hash,
                category,
                canonical_id,
                path_bytes(canonical_path),
                canonical_session,
                Utc::now().to_rfc3339(),
            ],
        )?;

        Self::load_group(&conn, hash, category)?
            .ok_or_else(|| StoreError::Database(format!("group {}/{} vanished", hash, category)))
    }

    fn take_over_group(
        &self,
        group_id: i64,
        canonical_id: i64,
        canonical_path: &Path,
        canonical_session: &str,
    ) -> Result<DuplicateGroup, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE duplicate_groups
            SET canonical_id = ?2, canonical_path = ?3, canonical_session = ?4, confirmed = 0
            WHERE id = ?1 AND confirmed = 0
            "#,
            params![
                group_id,
                canonical_id,
                path_bytes(canonical_path),
                canonical_session
            ],
        )?;
        Self::load_group_by_id(&conn, group_id)
    }

    fn confirm_group(&self, group_id: i64, canonical_id: i64) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE duplicate_groups SET confirmed = 1 WHERE id = ?1 AND canonical_id = ?2",
            params![group_id, canonical_id],
        )?;
        Ok(updated > 0)
    }

    fn confirm_mapped_groups(&self, session_id: &str) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let confirmed = conn.execute(
            r#"
            UPDATE duplicate_groups SET confirmed = 1
            WHERE canonical_session = ?1 AND confirmed = 0 AND canonical_path IN (
                SELECT source_path FROM file_mappings WHERE session_id = ?1 AND status = ?2
            )
            "#,
            params![session_id, MappingStatus::Completed.as_str()],
        )?;
        Ok(confirmed)
    }

    fn add_group_member(
        &self,
        group_id: i64,
        file_id: i64,
        source_path: &Path,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT OR IGNORE INTO duplicate_members (group_id, file_id, source_path)
            VALUES (?1, ?2, ?3)
            "#,
            params![group_id, file_id, path_bytes(source_path)],
        )?;
        Ok(())
    }

    fn release_groups_for_session(&self, session_id: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            DELETE FROM duplicate_members WHERE group_id IN (
                SELECT id FROM duplicate_groups WHERE canonical_session = ?1
            )
            "#,
            params![session_id],
        )?;
        let removed = tx.execute(
            "DELETE FROM duplicate_groups WHERE canonical_session = ?1",
            params![session_id],
        )?;
        tx.commit()?;
        Ok(removed)
    }
}
