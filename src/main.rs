//! # PetikSendiri Assistant CLI (`petik`)
//!
//! The `petik` binary drives the urban-farming assistant engine: database
//! initialization, knowledge-base ingestion, similarity search, chat, and
//! the JSON HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! petik --config ./config/petik.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `petik init` | Create the SQLite database and run schema migrations |
//! | `petik process` | Ingest the knowledge-base directory into the vector index |
//! | `petik search "<query>"` | Similarity search over indexed passages |
//! | `petik chat "<message>"` | Ask the assistant one question |
//! | `petik sessions list` | List chat sessions |
//! | `petik documents` | Show the document processing ledger |
//! | `petik stats` | Show knowledge-base totals |
//! | `petik serve` | Start the JSON HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! petik init --config ./config/petik.toml
//!
//! # Ingest documents placed under the knowledge-base directory
//! petik process --config ./config/petik.toml
//!
//! # Re-ingest everything from scratch
//! petik process --force --config ./config/petik.toml
//!
//! # Ask a question (a new session is created)
//! petik chat "Bagaimana cara menanam bayam?" --config ./config/petik.toml
//!
//! # Continue an existing session
//! petik chat "Kapan bisa dipanen?" --session <id> --config ./config/petik.toml
//!
//! # Start the HTTP API
//! petik serve --config ./config/petik.toml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use petik_assistant::chat;
use petik_assistant::config;
use petik_assistant::server;
use petik_assistant::service::Assistant;

/// PetikSendiri Assistant CLI — knowledge-base ingestion and
/// retrieval-augmented chat for urban farming.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/petik.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "petik",
    about = "PetikSendiri Assistant — knowledge-base ingestion and retrieval-augmented chat",
    version,
    long_about = "PetikSendiri Assistant ingests PDF, DOCX, and plain-text documents into a \
    persisted vector index and answers urban-farming questions grounded in the retrieved \
    passages, via a CLI and a JSON HTTP API."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/petik.toml`. Database, knowledge-base,
    /// embedding, model, and server settings are read from this file.
    #[arg(long, global = true, default_value = "./config/petik.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (processed_documents, chat_sessions, chat_messages).
    /// This command is idempotent — running it multiple times is safe.
    Init,

    /// Ingest the knowledge-base directory.
    ///
    /// Scans the configured directory for supported files (.pdf, .docx,
    /// .txt), extracts and chunks their text, embeds the chunks, and saves
    /// the vector index. Already processed files are skipped unless
    /// `--force` is given.
    Process {
        /// Reprocess every document and rebuild the index from scratch.
        #[arg(long)]
        force: bool,
    },

    /// Similarity search over the indexed passages.
    ///
    /// Embeds the query and prints the best-matching passages with their
    /// cosine scores and source files.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long, default_value_t = 4)]
        limit: usize,
    },

    /// Ask the assistant one question.
    ///
    /// Runs a full responder turn: retrieval, generation, and persistence.
    /// Without `--session` a new session is created and its id printed, so
    /// the conversation can be continued.
    Chat {
        /// The user message.
        message: String,

        /// Continue an existing session instead of starting a new one.
        #[arg(long)]
        session: Option<String>,
    },

    /// Inspect and manage chat sessions.
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Show the document processing ledger.
    ///
    /// One line per knowledge-base file ever seen, with its status, chunk
    /// count, and error message if processing failed.
    Documents,

    /// Show knowledge-base totals.
    Stats,

    /// Start the JSON HTTP server.
    ///
    /// Binds to the address configured in `[server].bind` and exposes the
    /// chat and knowledge-base endpoints.
    Serve,
}

/// Session management subcommands.
#[derive(Subcommand)]
enum SessionAction {
    /// List sessions, most recently active first.
    List {
        /// Only show sessions belonging to this user.
        #[arg(long)]
        user: Option<i64>,

        /// Maximum number of sessions to show.
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Print one session's full transcript.
    Show {
        /// Session id.
        id: String,
    },
    /// Delete a session and all of its messages.
    Delete {
        /// Session id.
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "petik_assistant=info,petik=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            // init is just the service constructor: pool + migrations + index
            Assistant::init(cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Process { force } => {
            let service = Assistant::init(cfg).await?;
            let summary = service.process_knowledge_base(force).await?;
            println!("{}", summary.message);
            if summary.success {
                println!("Chunks indexed: {}", summary.total_chunks);
            }
            if !summary.success {
                std::process::exit(1);
            }
        }
        Commands::Search { query, limit } => {
            let service = Assistant::init(cfg).await?;
            let hits = service.search(&query, limit).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                println!("{}. [{:.4}] {}", i + 1, hit.score, hit.filename);
                println!("   {}", snippet(&hit.text, 160));
            }
        }
        Commands::Chat { message, session } => {
            let service = Assistant::init(cfg).await?;
            let outcome = service.send_message(session.as_deref(), &message, None).await?;
            if outcome.is_new_session {
                println!("Session: {}", outcome.session.session_id);
            }
            println!("{}", outcome.message.content);
        }
        Commands::Sessions { action } => {
            let service = Assistant::init(cfg).await?;
            match action {
                SessionAction::List { user, limit } => {
                    let sessions = chat::list_sessions(&service.pool, user, 0, limit).await?;
                    if sessions.is_empty() {
                        println!("No sessions.");
                    }
                    for s in sessions {
                        println!("{}  {}", s.session_id, s.title);
                    }
                }
                SessionAction::Show { id } => {
                    let session = match chat::get_session(&service.pool, &id).await? {
                        Some(s) => s,
                        None => {
                            eprintln!("Session not found: {}", id);
                            std::process::exit(1);
                        }
                    };
                    println!("{} — {}", session.session_id, session.title);
                    for msg in chat::session_messages(&service.pool, &id).await? {
                        println!("[{}] {}", msg.role.as_str(), msg.content);
                    }
                }
                SessionAction::Delete { id } => {
                    if chat::delete_session(&service.pool, &id).await? {
                        println!("Session deleted.");
                    } else {
                        eprintln!("Session not found: {}", id);
                        std::process::exit(1);
                    }
                }
            }
        }
        Commands::Documents => {
            let service = Assistant::init(cfg).await?;
            let documents = petik_assistant::ledger::list_documents(&service.pool).await?;
            if documents.is_empty() {
                println!("No documents.");
            }
            for doc in documents {
                match doc.error_message {
                    Some(err) => println!(
                        "{:<10} {}  ({} chunks)  error: {}",
                        doc.status.as_str(),
                        doc.filename,
                        doc.chunk_count,
                        err
                    ),
                    None => println!(
                        "{:<10} {}  ({} chunks)",
                        doc.status.as_str(),
                        doc.filename,
                        doc.chunk_count
                    ),
                }
            }
        }
        Commands::Stats => {
            let service = Assistant::init(cfg).await?;
            let stats = service.stats().await?;
            println!("Documents:    {}", stats.total_documents);
            println!("Chunks:       {}", stats.total_chunks);
            println!(
                "Vector store: {}",
                if stats.vector_store_exists {
                    "present"
                } else {
                    "absent"
                }
            );
            match stats.last_updated {
                Some(ts) => println!("Last updated: {}", ts),
                None => println!("Last updated: never"),
            }
        }
        Commands::Serve => {
            let service = Assistant::init(cfg).await?;
            server::run_server(service).await?;
        }
    }

    Ok(())
}

/// First `max` characters of `text` with newlines collapsed, for one-line
/// search output.
fn snippet(text: &str, max: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > max {
        let cut: String = flat.chars().take(max).collect();
        format!("{}...", cut)
    } else {
        flat
    }
}
