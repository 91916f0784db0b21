//! Per-owner chat session handling: one open session per owner, resumable
//! only by its owner, closed by reset. Anonymous owners are identified by an
//! opaque token chosen by the caller (the HTTP layer's cookie analog).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use index_store::sqlite_repo::SqliteRepo;
use index_store::StoreError;
use rag_model::ChatSession;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Owner {
    User(i64),
    Anonymous(String),
}

impl Owner {
    fn user_id(&self) -> Option<i64> {
        match self {
            Owner::User(id) => Some(*id),
            Owner::Anonymous(_) => None,
        }
    }
}

pub struct ChatSessionManager {
    repo: Arc<SqliteRepo>,
    remembered: Mutex<HashMap<Owner, i64>>,
}

impl ChatSessionManager {
    pub fn new(repo: Arc<SqliteRepo>) -> Self {
        Self {
            repo,
            remembered: Mutex::new(HashMap::new()),
        }
    }

    /// The owner's open session, or a fresh one when none is resumable.
    pub fn get_or_create_open_session(&self, owner: &Owner) -> Result<ChatSession, StoreError> {
        let mut remembered = self.remembered.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(&session_id) = remembered.get(owner) {
            if let Some(session) = self
                .repo
                .open_session_matching(session_id, owner.user_id())?
            {
                return Ok(session);
            }
        }
        let session = self.repo.create_session(owner.user_id())?;
        remembered.insert(owner.clone(), session.id);
        Ok(session)
    }

    /// Close the owner's open session and forget it; the next
    /// `get_or_create_open_session` starts fresh.
    pub fn reset_session(&self, owner: &Owner) -> Result<(), StoreError> {
        let mut remembered = self.remembered.lock().map_err(|_| StoreError::Poisoned)?;
        let Some(session_id) = remembered.remove(owner) else {
            return Ok(());
        };
        if let Some(session) = self
            .repo
            .open_session_matching(session_id, owner.user_id())?
        {
            self.repo.end_session(session.id)?;
        }
        Ok(())
    }
}
