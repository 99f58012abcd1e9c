//! kenbot — company Q&A assistant, console entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Init logger
//!   3. Load config
//!   4. Open the store and seed default knowledge
//!   5. Build the LLM provider
//!   6. Run the console loop
//!
//! The console is an operator/demo surface; an HTTP layer would sit on the
//! same [`ChatEngine`] API.
//!
//! Commands:
//!   /import <file>   ingest a JSON row file into the knowledge base
//!   /sessions        list recent sessions
//!   /top             most asked questions
//!   /quit            exit
//! Any other line is a chat message on the current session.

use std::io::{BufRead, Write};

use tracing::info;

use kenbot::config;
use kenbot::engine::{ChatEngine, EngineOptions};
use kenbot::error::AppError;
use kenbot::ingest;
use kenbot::llm::providers;
use kenbot::logger;
use kenbot::store::Db;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let config = config::load()?;
    // Validate up front: RUST_LOG takes precedence in init, so a typo in
    // the configured level would otherwise go unnoticed.
    logger::parse_level(&config.log_level)?;
    logger::init(&config.log_level)?;

    info!(
        bot_name = %config.bot_name,
        work_dir = %config.work_dir.display(),
        log_level = %config.log_level,
        "config loaded"
    );

    let db = Db::open(&config.work_dir)?;
    let seeded = ingest::seed_defaults(&db)?;
    info!(seeded, entries = db.knowledge_count()?, "knowledge store ready");

    let provider = providers::build(&config.llm, config.llm_api_key.clone())
        .map_err(|e| AppError::Config(e.to_string()))?;
    info!(provider = %config.llm.provider, "llm provider ready");

    let engine = ChatEngine::new(
        db,
        provider,
        EngineOptions {
            rank_limit: config.chat.rank_limit,
            history_window: config.chat.history_window,
        },
    );

    println!("{} ready — type a question, or /quit to exit.", config.bot_name);
    console_loop(&engine, config.chat.session_list_cap).await
}

async fn console_loop(engine: &ChatEngine, session_list_cap: usize) -> Result<(), AppError> {
    let stdin = std::io::stdin();
    let mut session_id: Option<String> = None;

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(()); // EOF
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').map_or((line, ""), |(c, rest)| (c, rest.trim())) {
            ("/quit", _) => return Ok(()),
            ("/import", path) if !path.is_empty() => {
                // Ingestion is operator-facing: errors print, the loop survives.
                match import_file(engine.db(), path) {
                    Ok((upserted, skipped)) => {
                        println!("imported: {upserted} rows upserted, {skipped} skipped")
                    }
                    Err(e) => println!("import failed: {e}"),
                }
            }
            ("/sessions", _) => {
                for s in engine.db().list_sessions(20, session_list_cap)? {
                    println!("{}  messages={}  updated={}", s.session_id, s.message_count, s.updated_at);
                }
            }
            ("/top", _) => {
                for (question, count) in engine.db().most_asked(5)? {
                    println!("{count:>4}  {question}");
                }
            }
            _ => {
                let reply = engine.respond(session_id.as_deref(), line).await?;
                session_id = Some(reply.session_id);
                println!("{}", reply.response);
            }
        }
    }
}

fn import_file(db: &Db, path: &str) -> Result<(usize, usize), AppError> {
    let bytes = std::fs::read(path)?;
    let rows = ingest::rows_from_json(&bytes)?;
    let report = ingest::ingest(db, &rows)?;
    Ok((report.upserted, report.skipped))
}
