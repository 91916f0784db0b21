use std::path::PathBuf;
use std::sync::Arc;

use index_store::sqlite_repo::SqliteRepo;
use index_store::vector_index::VectorIndex;
use index_store::{SearchFilters, VectorSearch};
use llm_provider::config::OpenAiConfig;
use llm_provider::openai::{OpenAiEmbeddingProvider, OpenAiLlmProvider};
use llm_provider::EmbeddingProvider;
use rag_model::Locator;
use rag_service::rag_chat::RagChatService;
use rag_service::{
    ChatSessionManager, ChatTurnRunner, DocumentService, FsBlobStore, IngestionError,
    IngestionService, Owner, RagConfig, RoutingService, ServiceError,
};

const EXIT_OK: i32 = 0;
const EXIT_GENERAL: i32 = 1;
const EXIT_UNSUPPORTED_TYPE: i32 = 2;
const EXIT_SCAN_PDF: i32 = 3;

fn print_usage() {
    eprintln!(
        "Usage:\n\
         ragdesk-admin init-dept --code CODE --name NAME\n\
         ragdesk-admin upload --dept CODE [--actor ID] FILE...\n\
         ragdesk-admin delete --doc ID [--actor ID]\n\
         ragdesk-admin reindex --doc ID [--actor ID]\n\
         ragdesk-admin reindex-all [--actor ID]\n\
         ragdesk-admin search --query Q [--dept CODE] [--k N]\n\
         ragdesk-admin chat --message TEXT [--user ID | --anon TOKEN]\n\
         ragdesk-admin history [--user ID | --anon TOKEN]\n\
         \n\
         Common flags: --db PATH --index PATH --media DIR\n\
         Environment: OPENAI_API_KEY (required), OPENAI_BASE_URL (optional)\n"
    );
}

struct App {
    repo: Arc<SqliteRepo>,
    index: Arc<VectorIndex>,
    embedder: Arc<OpenAiEmbeddingProvider>,
    documents: DocumentService,
    chat_runner: ChatTurnRunner,
    sessions: ChatSessionManager,
    config: RagConfig,
}

fn build_app(args: &[String]) -> Result<App, String> {
    let mut config = RagConfig::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--db" => {
                config.db_path = PathBuf::from(flag_value(args, &mut i, "--db")?);
            }
            "--index" => {
                config.index_path = PathBuf::from(flag_value(args, &mut i, "--index")?);
            }
            "--media" => {
                config.media_root = PathBuf::from(flag_value(args, &mut i, "--media")?);
            }
            _ => i += 1,
        }
    }

    let provider_config = OpenAiConfig::from_env().map_err(|e| e.to_string())?;
    let embedder = Arc::new(OpenAiEmbeddingProvider::new(provider_config.clone()));
    let llm = Arc::new(OpenAiLlmProvider::new(provider_config));

    let repo = Arc::new(SqliteRepo::open(&config.db_path).map_err(|e| e.to_string())?);
    let blob = Arc::new(FsBlobStore::new(config.media_root.clone()));
    let index = Arc::new(
        VectorIndex::open(
            config.index_path.clone(),
            None,
            repo.clone(),
            embedder.clone(),
        )
        .map_err(|e| format!("index open failed: {e}"))?,
    );

    let ingestion = Arc::new(IngestionService::new(
        repo.clone(),
        blob.clone(),
        embedder.clone(),
        config.clone(),
    ));
    let documents = DocumentService::new(repo.clone(), blob, ingestion, index.clone());

    let router = Arc::new(RoutingService::new(llm.clone()));
    let chat = Arc::new(RagChatService::new(
        repo.clone(),
        index.clone() as Arc<dyn VectorSearch>,
        embedder.clone(),
        llm,
        router,
        config.clone(),
    ));
    let chat_runner = ChatTurnRunner::new(repo.clone(), chat);
    let sessions = ChatSessionManager::new(repo.clone());

    Ok(App {
        repo,
        index,
        embedder,
        documents,
        chat_runner,
        sessions,
        config,
    })
}

fn flag_value(args: &[String], i: &mut usize, flag: &str) -> Result<String, String> {
    if *i + 1 < args.len() {
        let value = args[*i + 1].clone();
        *i += 2;
        Ok(value)
    } else {
        Err(format!("{flag} requires a value"))
    }
}

fn find_flag(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|at| args.get(at + 1))
        .cloned()
}

fn positional_args(args: &[String]) -> Vec<String> {
    let flags_with_value = [
        "--db", "--index", "--media", "--dept", "--actor", "--doc", "--query", "--k",
        "--message", "--user", "--anon", "--code", "--name",
    ];
    let mut out = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if flags_with_value.contains(&args[i].as_str()) {
            i += 2;
        } else if args[i].starts_with("--") {
            i += 1;
        } else {
            out.push(args[i].clone());
            i += 1;
        }
    }
    out
}

fn parse_actor(args: &[String]) -> Option<i64> {
    find_flag(args, "--actor").and_then(|v| v.parse().ok())
}

fn owner_from_args(args: &[String]) -> Owner {
    if let Some(user) = find_flag(args, "--user").and_then(|v| v.parse().ok()) {
        Owner::User(user)
    } else {
        let token = find_flag(args, "--anon").unwrap_or_else(|| "cli".to_string());
        Owner::Anonymous(token)
    }
}

fn upload_failure_code(err: &ServiceError) -> i32 {
    match err {
        ServiceError::Ingestion(IngestionError::ScanPdf { .. }) => EXIT_SCAN_PDF,
        ServiceError::Ingestion(IngestionError::Extract(
            content_extractor::ExtractError::UnsupportedFileType { .. },
        )) => EXIT_UNSUPPORTED_TYPE,
        _ => EXIT_GENERAL,
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    let mut it = s.chars();
    let truncated: String = it.by_ref().take(max_chars).collect();
    if it.next().is_some() {
        format!("{}…", truncated)
    } else {
        truncated
    }
}

fn do_init_dept(app: &App, args: &[String]) -> Result<i32, String> {
    let code = find_flag(args, "--code").ok_or("--code is required")?;
    let name = find_flag(args, "--name").ok_or("--name is required")?;
    let dept = app
        .repo
        .create_department(&code, &name)
        .map_err(|e| e.to_string())?;
    println!("Created department {} ({})", dept.code, dept.name);
    Ok(EXIT_OK)
}

fn do_upload(app: &App, args: &[String]) -> Result<i32, String> {
    let dept_code = find_flag(args, "--dept").ok_or("--dept is required")?;
    let actor = parse_actor(args);
    let files = positional_args(args);
    if files.is_empty() {
        return Err("no files given".into());
    }
    let dept = app
        .repo
        .department_by_code(&dept_code)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("unknown department code: {dept_code}"))?;

    let mut success = 0usize;
    let mut failed = 0usize;
    let mut worst = EXIT_OK;
    for file in &files {
        let path = PathBuf::from(file);
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.bin")
            .to_string();
        let outcome = std::fs::read(&path)
            .map_err(|e| format!("read failed: {e}"))
            .and_then(|bytes| {
                app.documents
                    .upload(actor, &name, &bytes, &dept)
                    .map_err(|err| {
                        // Scan-PDF (3) outranks unsupported type (2) outranks
                        // general failure (1).
                        worst = worst.max(upload_failure_code(&err));
                        format!("{err}")
                    })
            });
        match outcome {
            Ok(doc) => {
                success += 1;
                println!("OK   {name} -> document {}", doc.id);
            }
            Err(err) => {
                failed += 1;
                worst = worst.max(EXIT_GENERAL);
                eprintln!("FAIL {name}: {err}");
            }
        }
    }
    println!("Upload finished: {{success: {success}, failed: {failed}}}");
    Ok(if failed == 0 { EXIT_OK } else { worst })
}

fn do_delete(app: &App, args: &[String]) -> Result<i32, String> {
    let doc_id: i64 = find_flag(args, "--doc")
        .ok_or("--doc is required")?
        .parse()
        .map_err(|_| "--doc must be a document id")?;
    let doc = app
        .repo
        .document_by_id(doc_id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("document {doc_id} not found"))?;
    app.documents
        .delete(parse_actor(args), &doc)
        .map_err(|e| e.to_string())?;
    println!("Deleted document {} ({})", doc.id, doc.title);
    Ok(EXIT_OK)
}

fn do_reindex(app: &App, args: &[String]) -> Result<i32, String> {
    let doc_id: i64 = find_flag(args, "--doc")
        .ok_or("--doc is required")?
        .parse()
        .map_err(|_| "--doc must be a document id")?;
    let doc = app
        .repo
        .document_by_id(doc_id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("document {doc_id} not found"))?;
    let result = app
        .documents
        .reindex(parse_actor(args), &doc)
        .map_err(|e| e.to_string())?;
    println!(
        "Reindexed document {}: {} chunks via {}",
        doc.id, result.chunk_count, result.engine
    );
    Ok(EXIT_OK)
}

fn do_reindex_all(app: &App, args: &[String]) -> Result<i32, String> {
    let meta = app
        .documents
        .reindex_all(parse_actor(args))
        .map_err(|e| e.to_string())?;
    println!(
        "{}",
        serde_json::to_string_pretty(&meta).unwrap_or_else(|_| meta.to_string())
    );
    let failed = meta["failed_documents"].as_u64().unwrap_or(0);
    Ok(if failed == 0 { EXIT_OK } else { EXIT_GENERAL })
}

fn do_search(app: &App, args: &[String]) -> Result<i32, String> {
    let query = find_flag(args, "--query").ok_or("--query is required")?;
    let k: usize = find_flag(args, "--k")
        .and_then(|v| v.parse().ok())
        .unwrap_or(app.config.top_k);
    let filters = match find_flag(args, "--dept") {
        Some(code) => SearchFilters::for_department_code(code),
        None => SearchFilters::none(),
    };

    let qvec = app
        .embedder
        .embed_one(&query)
        .map_err(|e| format!("embed failed: {e}"))?;
    let hits = app
        .index
        .search(&qvec, k, &filters)
        .map_err(|e| format!("search failed: {e}"))?;

    println!("Hits: {}", hits.len());
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{:>2}. [doc {} / {}] score={:.4} {}",
            i + 1,
            hit.chunk.document_id,
            hit.chunk.document.department_code,
            hit.score,
            truncate_chars(&hit.chunk.content, 60),
        );
    }
    Ok(EXIT_OK)
}

fn format_locator(locator: &Locator) -> String {
    match locator {
        Locator::PageSet { pages } => format!(
            "p.{}",
            pages
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(",")
        ),
        Locator::ChunkSet { chunks } => format!(
            "#{}",
            chunks
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(",")
        ),
    }
}

fn do_chat(app: &App, args: &[String]) -> Result<i32, String> {
    let message = find_flag(args, "--message").ok_or("--message is required")?;
    let owner = owner_from_args(args);
    let session = app
        .sessions
        .get_or_create_open_session(&owner)
        .map_err(|e| e.to_string())?;
    let (answer, meta) = app
        .chat_runner
        .run_turn(&session, &message)
        .map_err(|e| e.to_string())?;

    println!("{answer}");
    if !meta.citations.is_empty() {
        println!("---");
        for citation in &meta.citations {
            println!(
                "出典: {} ({})",
                citation.title,
                format_locator(&citation.locator)
            );
        }
    }
    Ok(EXIT_OK)
}

fn do_history(app: &App, args: &[String]) -> Result<i32, String> {
    let owner = owner_from_args(args);
    let session = app
        .sessions
        .get_or_create_open_session(&owner)
        .map_err(|e| e.to_string())?;
    let messages = app
        .repo
        .recent_messages(session.id, app.config.recent_message_display)
        .map_err(|e| e.to_string())?;
    for message in messages {
        println!("[{}] {}", message.role.as_str(), message.content);
    }
    Ok(EXIT_OK)
}

fn run() -> i32 {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        print_usage();
        return EXIT_GENERAL;
    }
    let command = args.remove(0);

    let app = match build_app(&args) {
        Ok(app) => app,
        Err(err) => {
            eprintln!("Error: {err}");
            return EXIT_GENERAL;
        }
    };

    let result = match command.as_str() {
        "init-dept" => do_init_dept(&app, &args),
        "upload" => do_upload(&app, &args),
        "delete" => do_delete(&app, &args),
        "reindex" => do_reindex(&app, &args),
        "reindex-all" => do_reindex_all(&app, &args),
        "search" => do_search(&app, &args),
        "chat" => do_chat(&app, &args),
        "history" => do_history(&app, &args),
        _ => {
            print_usage();
            return EXIT_GENERAL;
        }
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err}");
            EXIT_GENERAL
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    std::process::exit(run());
}
