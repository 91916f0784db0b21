//! Service layer of the internal Q&A system: ingestion, document
//! lifecycle with audit, routing, the RAG chat pipeline, and chat session
//! handling. Storage, extraction and providers come from the sibling crates
//! and are injected at construction.

pub mod blob_store;
pub mod chat_turn;
pub mod config;
pub mod document_service;
pub mod ingestion;
pub mod rag_chat;
pub mod routing;
pub mod session;

pub use blob_store::{BlobError, BlobStore, FsBlobStore};
pub use chat_turn::{ChatTurnRunner, ANSWER_FAILURE_MESSAGE};
pub use config::RagConfig;
pub use document_service::{DocumentService, ServiceError};
pub use ingestion::{IngestResult, IngestionError, IngestionService};
pub use rag_chat::{ChatError, ChatMeta, RagChatService, RetrievalMeta};
pub use routing::{Router, RoutingService};
pub use session::{ChatSessionManager, Owner};
