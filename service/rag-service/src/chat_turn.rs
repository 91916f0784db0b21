//! Persistence wrapper around one chat turn: store the user message, run
//! the pipeline, recover from pipeline failures with a user-facing apology,
//! store the assistant message with its metas, and track the session's
//! answer department.

use std::sync::Arc;

use index_store::sqlite_repo::SqliteRepo;
use index_store::StoreError;
use rag_model::{ChatRole, ChatSession, UNKNOWN_DEPARTMENT};

use crate::rag_chat::{ChatMeta, RagChatService};

pub const ANSWER_FAILURE_MESSAGE: &str =
    "申し訳ありません。回答生成中にエラーが発生しました。もう一度お試しください。";

pub struct ChatTurnRunner {
    repo: Arc<SqliteRepo>,
    chat: Arc<RagChatService>,
}

impl ChatTurnRunner {
    pub fn new(repo: Arc<SqliteRepo>, chat: Arc<RagChatService>) -> Self {
        Self { repo, chat }
    }

    /// Run one turn to completion. The user and assistant rows are persisted
    /// consecutively, user first; a pipeline failure becomes the canned
    /// apology with empty meta instead of a lost turn.
    pub fn run_turn(
        &self,
        session: &ChatSession,
        user_text: &str,
    ) -> Result<(String, ChatMeta), StoreError> {
        let user_msg = self
            .repo
            .append_message(session.id, ChatRole::User, user_text)?;

        let (answer, meta) = match self.chat.chat(session, user_text) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(session_id = session.id, error = %err, "chat turn failed");
                (ANSWER_FAILURE_MESSAGE.to_string(), ChatMeta::default())
            }
        };

        self.update_answer_department(session, &meta)?;

        if let Some(routing) = &meta.routing {
            self.repo
                .set_message_routing_meta(user_msg.id, &serde_json::to_value(routing)?)?;
        }

        let assistant_msg = self
            .repo
            .append_message(session.id, ChatRole::Assistant, &answer)?;
        let retrieval = meta
            .retrieval
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        self.repo
            .set_message_retrieval(assistant_msg.id, retrieval.as_ref(), &meta.citations)?;

        Ok((answer, meta))
    }

    /// Remember the department the turn resolved to; unknown or unregistered
    /// codes keep the previous value.
    fn update_answer_department(
        &self,
        session: &ChatSession,
        meta: &ChatMeta,
    ) -> Result<(), StoreError> {
        let Some(routing) = &meta.routing else {
            return Ok(());
        };
        let code = routing.primary_department.trim();
        if code.is_empty() || code == UNKNOWN_DEPARTMENT {
            return Ok(());
        }
        let Some(dept) = self.repo.department_by_code(code)? else {
            return Ok(());
        };
        if session.answer_department_id != Some(dept.id) {
            self.repo
                .set_session_answer_department(session.id, dept.id)?;
        }
        Ok(())
    }
}
