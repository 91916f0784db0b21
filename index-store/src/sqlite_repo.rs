//! SQLite-backed storage adapter. One repo owns the connection; composite
//! operations (chunk replacement, cascading deletes) are explicit
//! transactions so callers never observe partial state.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use rag_model::{
    AuditAction, AuditLog, AuditStatus, ChatMessage, ChatRole, ChatSession, Chunk, ChunkRef,
    Citation, Department, Document, DocumentRef, NewChunk,
};

use crate::{ChunkStore, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS departments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    file_path TEXT NOT NULL,
    num_pages INTEGER,
    department_id INTEGER NOT NULL REFERENCES departments(id) ON DELETE RESTRICT,
    uploaded_by_id INTEGER,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    chunk_index INTEGER NOT NULL,
    page INTEGER,
    content TEXT NOT NULL,
    embedding BLOB,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id, chunk_index);
CREATE TABLE IF NOT EXISTS audit_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL,
    action TEXT NOT NULL,
    status TEXT NOT NULL,
    actor_id INTEGER,
    document_id INTEGER,
    department_id INTEGER,
    message TEXT NOT NULL,
    meta TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS chat_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER,
    answer_department_id INTEGER REFERENCES departments(id),
    title TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    ended_at TEXT
);
CREATE TABLE IF NOT EXISTS chat_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    routing_meta TEXT,
    retrieval_meta TEXT,
    citations TEXT NOT NULL DEFAULT '[]'
);
CREATE INDEX IF NOT EXISTS idx_messages_session ON chat_messages(session_id, created_at);
";

fn now_str() -> String {
    Utc::now().to_rfc3339()
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Timestamp(format!("{s}: {e}")))
}

fn embedding_to_blob(v: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(v).to_vec()
}

fn blob_to_embedding(b: &[u8]) -> Vec<f32> {
    bytemuck::pod_collect_to_vec(b)
}

/// New audit row; id and timestamp are assigned on insert.
#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub action: AuditAction,
    pub status: AuditStatus,
    pub actor_id: Option<i64>,
    pub document_id: Option<i64>,
    pub department_id: Option<i64>,
    pub message: String,
    pub meta: serde_json::Value,
}

pub struct SqliteRepo {
    conn: Mutex<Connection>,
}

impl SqliteRepo {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
                    path: dir.display().to_string(),
                    source,
                })?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // --- departments ---

    pub fn create_department(&self, code: &str, name: &str) -> Result<Department, StoreError> {
        if !rag_model::is_valid_department_code(code) {
            return Err(StoreError::Invalid(format!(
                "department code must be lowercase alphanumerics/underscore: {code:?}"
            )));
        }
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO departments (code, name) VALUES (?1, ?2)",
            params![code, name],
        )?;
        Ok(Department {
            id: conn.last_insert_rowid(),
            code: code.to_string(),
            name: name.to_string(),
        })
    }

    pub fn department_by_code(&self, code: &str) -> Result<Option<Department>, StoreError> {
        let conn = self.lock()?;
        let dept = conn
            .query_row(
                "SELECT id, code, name FROM departments WHERE code = ?1",
                params![code],
                |row| {
                    Ok(Department {
                        id: row.get(0)?,
                        code: row.get(1)?,
                        name: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(dept)
    }

    pub fn department_by_id(&self, id: i64) -> Result<Option<Department>, StoreError> {
        let conn = self.lock()?;
        let dept = conn
            .query_row(
                "SELECT id, code, name FROM departments WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Department {
                        id: row.get(0)?,
                        code: row.get(1)?,
                        name: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(dept)
    }

    pub fn list_department_codes(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT code FROM departments ORDER BY code")?;
        let codes = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(codes)
    }

    // --- documents ---

    fn map_document(row: &Row<'_>) -> rusqlite::Result<(Document, String)> {
        Ok((
            Document {
                id: row.get(0)?,
                title: row.get(1)?,
                file_path: row.get(2)?,
                num_pages: row.get(3)?,
                department_id: row.get(4)?,
                uploaded_by_id: row.get(5)?,
                created_at: Utc::now(), // replaced by the caller from column 6
            },
            row.get::<_, String>(6)?,
        ))
    }

    fn finish_document((mut doc, ts): (Document, String)) -> Result<Document, StoreError> {
        doc.created_at = parse_ts(&ts)?;
        Ok(doc)
    }

    const DOCUMENT_COLS: &'static str =
        "id, title, file_path, num_pages, department_id, uploaded_by_id, created_at";

    pub fn create_document(
        &self,
        title: &str,
        file_path: &str,
        department_id: i64,
        uploaded_by_id: Option<i64>,
    ) -> Result<Document, StoreError> {
        let created_at = now_str();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO documents (title, file_path, num_pages, department_id, uploaded_by_id, created_at)
             VALUES (?1, ?2, NULL, ?3, ?4, ?5)",
            params![title, file_path, department_id, uploaded_by_id, created_at],
        )?;
        Ok(Document {
            id: conn.last_insert_rowid(),
            title: title.to_string(),
            file_path: file_path.to_string(),
            num_pages: None,
            department_id,
            uploaded_by_id,
            created_at: parse_ts(&created_at)?,
        })
    }

    pub fn document_by_id(&self, id: i64) -> Result<Option<Document>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM documents WHERE id = ?1", Self::DOCUMENT_COLS),
                params![id],
                Self::map_document,
            )
            .optional()?;
        row.map(Self::finish_document).transpose()
    }

    pub fn list_documents(&self) -> Result<Vec<Document>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM documents ORDER BY id",
            Self::DOCUMENT_COLS
        ))?;
        let rows = stmt
            .query_map([], Self::map_document)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::finish_document).collect()
    }

    pub fn count_documents(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    pub fn set_document_num_pages(&self, id: i64, num_pages: u32) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE documents SET num_pages = ?1 WHERE id = ?2",
            params![num_pages, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "document",
                id,
            });
        }
        Ok(())
    }

    /// Delete a document; its chunks cascade in the same statement.
    /// Returns false when the document was already gone.
    pub fn delete_document(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    // --- chunks ---

    /// Swap a document's chunks for `rows` in one transaction and return the
    /// new chunk ids in `rows` order.
    pub fn replace_document_chunks(
        &self,
        document_id: i64,
        rows: &[NewChunk],
    ) -> Result<Vec<i64>, StoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document_id],
        )?;
        let created_at = now_str();
        let mut ids = Vec::with_capacity(rows.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks (document_id, chunk_index, page, content, embedding, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for row in rows {
                stmt.execute(params![
                    document_id,
                    row.chunk_index,
                    row.page,
                    row.content,
                    embedding_to_blob(&row.embedding),
                    created_at,
                ])?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit()?;
        Ok(ids)
    }

    pub fn chunk_ids_for_document(&self, document_id: i64) -> Result<Vec<i64>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM chunks WHERE document_id = ?1 ORDER BY chunk_index",
        )?;
        let ids = stmt
            .query_map(params![document_id], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    pub fn chunks_for_document(&self, document_id: i64) -> Result<Vec<Chunk>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, document_id, chunk_index, page, content, embedding, created_at
             FROM chunks WHERE document_id = ?1 ORDER BY chunk_index",
        )?;
        let rows = stmt
            .query_map(params![document_id], |row| {
                Ok((
                    Chunk {
                        id: row.get(0)?,
                        document_id: row.get(1)?,
                        chunk_index: row.get(2)?,
                        page: row.get(3)?,
                        content: row.get(4)?,
                        embedding: row
                            .get::<_, Option<Vec<u8>>>(5)?
                            .map(|b| blob_to_embedding(&b)),
                        created_at: Utc::now(),
                    },
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(mut chunk, ts)| {
                chunk.created_at = parse_ts(&ts)?;
                Ok(chunk)
            })
            .collect()
    }

    // --- audit log ---

    pub fn append_audit(&self, row: NewAuditLog) -> Result<i64, StoreError> {
        let meta = serde_json::to_string(&row.meta)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO audit_logs (created_at, action, status, actor_id, document_id, department_id, message, meta)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                now_str(),
                row.action.as_str(),
                row.status.as_str(),
                row.actor_id,
                row.document_id,
                row.department_id,
                row.message,
                meta,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_audit_logs(&self) -> Result<Vec<AuditLog>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, created_at, action, status, actor_id, document_id, department_id, message, meta
             FROM audit_logs ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                    row.get::<_, Option<i64>>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(id, created_at, action, status, actor_id, document_id, department_id, message, meta)| {
                    Ok(AuditLog {
                        id,
                        created_at: parse_ts(&created_at)?,
                        action: AuditAction::parse(&action)
                            .ok_or_else(|| StoreError::Invalid(format!("audit action {action:?}")))?,
                        status: AuditStatus::parse(&status)
                            .ok_or_else(|| StoreError::Invalid(format!("audit status {status:?}")))?,
                        actor_id,
                        document_id,
                        department_id,
                        message,
                        meta: serde_json::from_str(&meta)?,
                    })
                },
            )
            .collect()
    }

    // --- chat sessions / messages ---

    const SESSION_COLS: &'static str =
        "id, user_id, answer_department_id, title, created_at, updated_at, ended_at";

    fn map_session(row: &Row<'_>) -> rusqlite::Result<(ChatSession, String, String, Option<String>)> {
        Ok((
            ChatSession {
                id: row.get(0)?,
                user_id: row.get(1)?,
                answer_department_id: row.get(2)?,
                title: row.get(3)?,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                ended_at: None,
            },
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, Option<String>>(6)?,
        ))
    }

    fn finish_session(
        (mut session, created, updated, ended): (ChatSession, String, String, Option<String>),
    ) -> Result<ChatSession, StoreError> {
        session.created_at = parse_ts(&created)?;
        session.updated_at = parse_ts(&updated)?;
        session.ended_at = ended.as_deref().map(parse_ts).transpose()?;
        Ok(session)
    }

    pub fn create_session(&self, user_id: Option<i64>) -> Result<ChatSession, StoreError> {
        let now = now_str();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO chat_sessions (user_id, title, created_at, updated_at) VALUES (?1, '', ?2, ?2)",
            params![user_id, now],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.session_by_id(id)?.ok_or(StoreError::NotFound {
            entity: "chat_session",
            id,
        })
    }

    pub fn session_by_id(&self, id: i64) -> Result<Option<ChatSession>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM chat_sessions WHERE id = ?1", Self::SESSION_COLS),
                params![id],
                Self::map_session,
            )
            .optional()?;
        row.map(Self::finish_session).transpose()
    }

    /// The session with `id` when it is still open and owned by `user_id`
    /// (anonymous sessions have a null owner).
    pub fn open_session_matching(
        &self,
        id: i64,
        user_id: Option<i64>,
    ) -> Result<Option<ChatSession>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM chat_sessions
                     WHERE id = ?1 AND ended_at IS NULL AND user_id IS ?2",
                    Self::SESSION_COLS
                ),
                params![id, user_id],
                Self::map_session,
            )
            .optional()?;
        row.map(Self::finish_session).transpose()
    }

    /// Close an open session. Returns false when it was already closed.
    pub fn end_session(&self, id: i64) -> Result<bool, StoreError> {
        let now = now_str();
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE chat_sessions SET ended_at = ?1, updated_at = ?1
             WHERE id = ?2 AND ended_at IS NULL",
            params![now, id],
        )?;
        Ok(changed > 0)
    }

    pub fn set_session_answer_department(
        &self,
        session_id: i64,
        department_id: i64,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE chat_sessions SET answer_department_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![department_id, now_str(), session_id],
        )?;
        Ok(())
    }

    const MESSAGE_COLS: &'static str =
        "id, session_id, role, content, created_at, routing_meta, retrieval_meta, citations";

    fn map_message(row: &Row<'_>) -> rusqlite::Result<(i64, i64, String, String, String, Option<String>, Option<String>, String)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
        ))
    }

    fn finish_message(
        (id, session_id, role, content, created_at, routing, retrieval, citations): (
            i64,
            i64,
            String,
            String,
            String,
            Option<String>,
            Option<String>,
            String,
        ),
    ) -> Result<ChatMessage, StoreError> {
        Ok(ChatMessage {
            id,
            session_id,
            role: ChatRole::parse(&role)
                .ok_or_else(|| StoreError::Invalid(format!("chat role {role:?}")))?,
            content,
            created_at: parse_ts(&created_at)?,
            routing_meta: routing.as_deref().map(serde_json::from_str).transpose()?,
            retrieval_meta: retrieval.as_deref().map(serde_json::from_str).transpose()?,
            citations: serde_json::from_str::<Vec<Citation>>(&citations)?,
        })
    }

    pub fn append_message(
        &self,
        session_id: i64,
        role: ChatRole,
        content: &str,
    ) -> Result<ChatMessage, StoreError> {
        let now = now_str();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO chat_messages (session_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![session_id, role.as_str(), content, now],
        )?;
        let id = conn.last_insert_rowid();
        conn.execute(
            "UPDATE chat_sessions SET updated_at = ?1 WHERE id = ?2",
            params![now, session_id],
        )?;
        drop(conn);
        self.message_by_id(id)?.ok_or(StoreError::NotFound {
            entity: "chat_message",
            id,
        })
    }

    pub fn message_by_id(&self, id: i64) -> Result<Option<ChatMessage>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM chat_messages WHERE id = ?1", Self::MESSAGE_COLS),
                params![id],
                Self::map_message,
            )
            .optional()?;
        row.map(Self::finish_message).transpose()
    }

    pub fn set_message_routing_meta(
        &self,
        message_id: i64,
        meta: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE chat_messages SET routing_meta = ?1 WHERE id = ?2",
            params![serde_json::to_string(meta)?, message_id],
        )?;
        Ok(())
    }

    pub fn set_message_retrieval(
        &self,
        message_id: i64,
        retrieval_meta: Option<&serde_json::Value>,
        citations: &[Citation],
    ) -> Result<(), StoreError> {
        let retrieval = retrieval_meta.map(serde_json::to_string).transpose()?;
        let conn = self.lock()?;
        conn.execute(
            "UPDATE chat_messages SET retrieval_meta = ?1, citations = ?2 WHERE id = ?3",
            params![retrieval, serde_json::to_string(citations)?, message_id],
        )?;
        Ok(())
    }

    /// The newest `limit` user/assistant turns, returned oldest first.
    pub fn recent_dialogue(
        &self,
        session_id: i64,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        self.recent(session_id, limit, true)
    }

    /// The newest `limit` messages of any role, returned oldest first.
    pub fn recent_messages(
        &self,
        session_id: i64,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        self.recent(session_id, limit, false)
    }

    fn recent(
        &self,
        session_id: i64,
        limit: usize,
        dialogue_only: bool,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let filter = if dialogue_only {
            "AND role IN ('user', 'assistant')"
        } else {
            ""
        };
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chat_messages
             WHERE session_id = ?1 {filter}
             ORDER BY created_at DESC, id DESC LIMIT ?2",
            Self::MESSAGE_COLS
        ))?;
        let rows = stmt
            .query_map(params![session_id, limit as i64], Self::map_message)?
            .collect::<Result<Vec<_>, _>>()?;
        let mut messages = rows
            .into_iter()
            .map(Self::finish_message)
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}

impl ChunkStore for SqliteRepo {
    fn count_chunks(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    fn chunks_by_ids(&self, ids: &[i64]) -> Result<Vec<ChunkRef>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT c.id, c.document_id, c.chunk_index, c.page, c.content,
                    d.id, d.title, d.department_id, p.code
             FROM chunks c
             JOIN documents d ON d.id = c.document_id
             JOIN departments p ON p.id = d.department_id
             WHERE c.id IN ({placeholders})"
        ))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(ids.iter()), |row| {
                Ok(ChunkRef {
                    id: row.get(0)?,
                    document_id: row.get(1)?,
                    chunk_index: row.get(2)?,
                    page: row.get(3)?,
                    content: row.get(4)?,
                    document: DocumentRef {
                        id: row.get(5)?,
                        title: row.get(6)?,
                        department_id: row.get(7)?,
                        department_code: row.get(8)?,
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn chunk_contents_ordered(
        &self,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<(i64, String)>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, content FROM chunks ORDER BY id LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt
            .query_map(params![limit as i64, offset as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo_with_dept() -> (SqliteRepo, Department) {
        let repo = SqliteRepo::open_in_memory().unwrap();
        let dept = repo.create_department("hr", "人事総務").unwrap();
        (repo, dept)
    }

    fn new_chunk(index: u32, content: &str) -> NewChunk {
        NewChunk {
            chunk_index: index,
            page: Some(1),
            content: content.to_string(),
            embedding: vec![1.0, 0.0],
        }
    }

    #[test]
    fn department_codes_are_validated_and_unique() {
        let repo = SqliteRepo::open_in_memory().unwrap();
        assert!(matches!(
            repo.create_department("HR", "x"),
            Err(StoreError::Invalid(_))
        ));
        repo.create_department("hr", "人事").unwrap();
        assert!(repo.create_department("hr", "dup").is_err());
        assert_eq!(repo.list_department_codes().unwrap(), vec!["hr"]);
    }

    #[test]
    fn replace_chunks_is_all_or_nothing_and_dense() {
        let (repo, dept) = repo_with_dept();
        let doc = repo.create_document("規程", "hr/a.pdf", dept.id, None).unwrap();

        let first = vec![new_chunk(0, "旧1"), new_chunk(1, "旧2"), new_chunk(2, "旧3")];
        repo.replace_document_chunks(doc.id, &first).unwrap();
        let second = vec![new_chunk(0, "新1"), new_chunk(1, "新2")];
        let ids = repo.replace_document_chunks(doc.id, &second).unwrap();
        assert_eq!(ids.len(), 2);

        let chunks = repo.chunks_for_document(doc.id).unwrap();
        let indexes: Vec<u32> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indexes, vec![0, 1]);
        assert_eq!(chunks[0].content, "新1");
        assert_eq!(chunks[0].embedding.as_deref(), Some(&[1.0, 0.0][..]));
    }

    #[test]
    fn deleting_a_document_cascades_to_chunks() {
        let (repo, dept) = repo_with_dept();
        let doc = repo.create_document("規程", "hr/a.pdf", dept.id, None).unwrap();
        repo.replace_document_chunks(doc.id, &[new_chunk(0, "本文")]).unwrap();
        assert_eq!(repo.count_chunks().unwrap(), 1);

        assert!(repo.delete_document(doc.id).unwrap());
        assert_eq!(repo.count_chunks().unwrap(), 0);
        // Second delete reports the document as already gone.
        assert!(!repo.delete_document(doc.id).unwrap());
    }

    #[test]
    fn chunks_by_ids_eager_loads_the_owning_document() {
        let (repo, dept) = repo_with_dept();
        let doc = repo.create_document("就業規則", "hr/b.pdf", dept.id, None).unwrap();
        let ids = repo
            .replace_document_chunks(doc.id, &[new_chunk(0, "有給")])
            .unwrap();

        let refs = repo.chunks_by_ids(&[ids[0], 9999]).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].document.department_code, "hr");
        assert_eq!(refs[0].document.title, "就業規則");
    }

    #[test]
    fn audit_rows_round_trip() {
        let (repo, dept) = repo_with_dept();
        repo.append_audit(NewAuditLog {
            action: AuditAction::Upload,
            status: AuditStatus::Success,
            actor_id: Some(7),
            document_id: None,
            department_id: Some(dept.id),
            message: "アップロード".into(),
            meta: serde_json::json!({"chunk_count": 3}),
        })
        .unwrap();

        let logs = repo.list_audit_logs().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, AuditAction::Upload);
        assert_eq!(logs[0].status, AuditStatus::Success);
        assert_eq!(logs[0].meta["chunk_count"], 3);
    }

    #[test]
    fn session_lifecycle_and_ownership() {
        let repo = SqliteRepo::open_in_memory().unwrap();
        let session = repo.create_session(Some(1)).unwrap();
        assert!(session.is_open());

        // A different user cannot resume it.
        assert!(repo.open_session_matching(session.id, Some(2)).unwrap().is_none());
        assert!(repo.open_session_matching(session.id, None).unwrap().is_none());
        assert!(repo.open_session_matching(session.id, Some(1)).unwrap().is_some());

        assert!(repo.end_session(session.id).unwrap());
        assert!(!repo.end_session(session.id).unwrap());
        assert!(repo.open_session_matching(session.id, Some(1)).unwrap().is_none());
    }

    #[test]
    fn messages_come_back_in_chronological_order() {
        let repo = SqliteRepo::open_in_memory().unwrap();
        let session = repo.create_session(None).unwrap();
        repo.append_message(session.id, ChatRole::User, "質問1").unwrap();
        repo.append_message(session.id, ChatRole::Assistant, "回答1").unwrap();
        repo.append_message(session.id, ChatRole::System, "注記").unwrap();
        repo.append_message(session.id, ChatRole::User, "質問2").unwrap();

        let dialogue = repo.recent_dialogue(session.id, 20).unwrap();
        let contents: Vec<&str> = dialogue.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["質問1", "回答1", "質問2"]);

        let all = repo.recent_messages(session.id, 2).unwrap();
        let contents: Vec<&str> = all.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["注記", "質問2"]);
    }

    #[test]
    fn message_meta_updates_land_on_the_right_rows() {
        let repo = SqliteRepo::open_in_memory().unwrap();
        let session = repo.create_session(None).unwrap();
        let user = repo.append_message(session.id, ChatRole::User, "q").unwrap();
        let assistant = repo.append_message(session.id, ChatRole::Assistant, "a").unwrap();

        repo.set_message_routing_meta(user.id, &serde_json::json!({"is_business": true}))
            .unwrap();
        repo.set_message_retrieval(
            assistant.id,
            Some(&serde_json::json!({"scope_used": "hr"})),
            &[],
        )
        .unwrap();

        let user = repo.message_by_id(user.id).unwrap().unwrap();
        assert_eq!(user.routing_meta.unwrap()["is_business"], true);
        let assistant = repo.message_by_id(assistant.id).unwrap().unwrap();
        assert_eq!(assistant.retrieval_meta.unwrap()["scope_used"], "hr");
        assert!(assistant.citations.is_empty());
    }
}
