//! Command definitions and handlers for the `tms` binary.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use uuid::Uuid;

use they_might_say::api::{
    ApiClient, CredentialStore, EpisodeExport, EpisodeStatus, ExportFormat, NewEpisode, NewSource,
    SourceQuery, SourceType, Upload,
};
use they_might_say::chat::{
    ChatContext, ChatUpdate, Citation, HttpStreamTransport, StudioChat, TransportSelector,
    WsTransport,
};
use they_might_say::citations::{project, CitationFilter, ConfidenceFilter, ConfidenceLevel};
use they_might_say::{ApiError, ChatError, Config};

/// How long the chat loop waits for the socket before starting on HTTP
const SOCKET_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "tms")]
#[command(about = "Studio client for They Might Say")]
pub struct Cli {
    /// Path to a YAML config file (defaults to ./config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log in and store the session
    Login {
        /// Username (prompted when omitted)
        #[arg(short, long)]
        username: Option<String>,

        /// Password (prompted when omitted)
        #[arg(long, env = "TMS_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// End the session and forget stored tokens
    Logout,

    /// Show the logged-in user
    Whoami,

    /// Episode operations
    Episodes {
        #[command(subcommand)]
        action: EpisodeAction,
    },

    /// Source and document operations
    Sources {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// Studio statistics
    Stats,

    /// Interactive Studio conversation
    Chat {
        /// Episode to attach the conversation to
        #[arg(short, long)]
        episode: Option<Uuid>,

        /// Restrict retrieval to these sources (repeatable)
        #[arg(short, long = "source")]
        sources: Vec<Uuid>,

        /// Skip the socket and stream over HTTP only
        #[arg(long)]
        http_only: bool,
    },
}

#[derive(Subcommand)]
pub enum EpisodeAction {
    /// List episodes
    List {
        /// Only episodes with this status (active, paused, completed, archived)
        #[arg(short, long)]
        status: Option<EpisodeStatus>,

        #[arg(short, long, default_value = "50")]
        limit: u32,
    },

    /// Show episode details
    Show { id: Uuid },

    /// Create an episode
    Create {
        #[arg(short, long)]
        title: String,

        #[arg(short, long)]
        desc: Option<String>,
    },

    /// Update episode status
    Status {
        id: Uuid,

        /// New status (active, paused, completed, archived)
        status: EpisodeStatus,
    },

    /// Delete an episode and its beats
    Delete { id: Uuid },

    /// Show the recorded exchanges of an episode
    Beats { id: Uuid },

    /// Export an episode
    Export {
        id: Uuid,

        #[arg(short, long, value_enum, default_value = "markdown")]
        format: ExportArg,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ExportArg {
    Json,
    Markdown,
}

impl From<ExportArg> for ExportFormat {
    fn from(arg: ExportArg) -> Self {
        match arg {
            ExportArg::Json => ExportFormat::Json,
            ExportArg::Markdown => ExportFormat::Markdown,
        }
    }
}

#[derive(Subcommand)]
pub enum SourceAction {
    /// List sources
    List {
        /// Match title, author or description
        #[arg(short, long)]
        search: Option<String>,

        /// Only sources of this type
        #[arg(short = 't', long = "type")]
        source_type: Option<SourceType>,

        /// Required tags (comma-separated)
        #[arg(long)]
        tags: Option<String>,

        #[arg(short, long, default_value = "100")]
        limit: u32,
    },

    /// Show source details
    Show { id: Uuid },

    /// Create a source
    Create {
        #[arg(short, long)]
        title: String,

        /// book, article, document, letter, speech, manuscript, other
        #[arg(short = 'y', long = "type", default_value = "document")]
        source_type: SourceType,

        #[arg(short, long)]
        author: Option<String>,

        #[arg(short, long)]
        desc: Option<String>,

        #[arg(long)]
        url: Option<String>,

        /// 0.0 to 1.0
        #[arg(short, long, default_value = "0.5")]
        reliability: f64,

        /// Tags (comma-separated)
        #[arg(long)]
        tags: Option<String>,
    },

    /// Delete a source and its documents
    Delete { id: Uuid },

    /// Upload a document file to a source
    Upload { id: Uuid, file: PathBuf },

    /// List documents of a source
    Documents { id: Uuid },

    /// Document processing status of a source
    Status { id: Uuid },

    /// Document, word and chunk totals of a source
    Stats { id: Uuid },

    /// Re-run processing for every document of a source
    Reprocess { id: Uuid },
}

/// Everything a command handler needs
struct App {
    config: Config,
    store: CredentialStore,
    api: Arc<ApiClient>,
}

impl App {
    fn new(config: Config) -> Result<Self> {
        let store = CredentialStore::new(config.credentials_path.clone());
        let api = ApiClient::with_tokens(config.api_config(), store.load())
            .context("Failed to build HTTP client")?;
        Ok(Self {
            config,
            store,
            api: Arc::new(api),
        })
    }

    /// Persist tokens if a refresh happened during the command
    async fn sync_session(&self) -> Result<()> {
        match self.api.tokens().await {
            Some(tokens) if self.store.load().as_ref() != Some(&tokens) => self.store.save(&tokens),
            _ => Ok(()),
        }
    }
}

pub async fn run(cli: Cli, config: Config) -> Result<()> {
    let app = App::new(config)?;
    let result = dispatch(&app, cli.command).await;

    if let Some(auth) = auth_failure(&result) {
        app.store.clear()?;
        match auth {
            ApiError::NotLoggedIn => eprintln!("Not logged in. Run `tms login` first."),
            _ => eprintln!("Session expired or rejected. Run `tms login` again."),
        }
        return result;
    }

    app.sync_session().await?;
    result
}

fn auth_failure(result: &Result<()>) -> Option<&ApiError> {
    let err = result.as_ref().err()?;
    if let Some(api) = err.downcast_ref::<ApiError>() {
        return api.is_auth().then_some(api);
    }
    match err.downcast_ref::<ChatError>() {
        Some(ChatError::Api(api)) if api.is_auth() => Some(api),
        _ => None,
    }
}

async fn dispatch(app: &App, command: Commands) -> Result<()> {
    match command {
        Commands::Login { username, password } => handle_login(app, username, password).await,
        Commands::Logout => handle_logout(app).await,
        Commands::Whoami => {
            let user = app.api.me().await?;
            println!("{} <{}> ({})", user.username, user.email, user.role);
            println!("ID: {}", user.id);
            Ok(())
        }
        Commands::Episodes { action } => handle_episodes(app, action).await,
        Commands::Sources { action } => handle_sources(app, action).await,
        Commands::Stats => handle_stats(app).await,
        Commands::Chat {
            episode,
            sources,
            http_only,
        } => handle_chat(app, episode, sources, http_only).await,
    }
}

async fn handle_login(app: &App, username: Option<String>, password: Option<String>) -> Result<()> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let username = match username {
        Some(u) => u,
        None => prompt(&mut stdin, "Username: ").await?,
    };
    let password = match password {
        Some(p) => p,
        None => prompt(&mut stdin, "Password: ").await?,
    };

    let tokens = app.api.login(&username, &password).await?;
    app.store.save(&tokens)?;
    println!("Logged in as {}", tokens.user.username);
    Ok(())
}

async fn handle_logout(app: &App) -> Result<()> {
    app.api.logout().await?;
    app.store.clear()?;
    println!("Logged out");
    Ok(())
}

async fn handle_episodes(app: &App, action: EpisodeAction) -> Result<()> {
    match action {
        EpisodeAction::List { status, limit } => {
            let episodes = app.api.list_episodes(0, limit, status).await?;
            println!("{:<36} {:<10} {:>5} {:>5} {}", "ID", "STATUS", "BEATS", "CITES", "TITLE");
            println!("{}", "-".repeat(80));
            for episode in episodes {
                println!(
                    "{:<36} {:<10} {:>5} {:>5} {}",
                    episode.id,
                    episode.status,
                    episode.beat_count,
                    episode.total_citations,
                    episode.title
                );
            }
        }
        EpisodeAction::Show { id } => {
            let episode = app.api.get_episode(id).await?;
            println!("{}", serde_json::to_string_pretty(&episode)?);
        }
        EpisodeAction::Create { title, desc } => {
            let episode = app
                .api
                .create_episode(&NewEpisode {
                    description: desc,
                    ..NewEpisode::new(title)
                })
                .await?;
            println!("Created episode: {}", episode.id);
        }
        EpisodeAction::Status { id, status } => {
            app.api.update_episode_status(id, status).await?;
            println!("Updated episode status to: {}", status);
        }
        EpisodeAction::Delete { id } => {
            app.api.delete_episode(id).await?;
            println!("Deleted episode: {}", id);
        }
        EpisodeAction::Beats { id } => {
            let beats = app.api.episode_beats(id, 0, 1000).await?;
            for beat in beats {
                println!("--- #{} ({})", beat.sequence_number, beat.created_at.format("%Y-%m-%d %H:%M"));
                println!("You: {}", beat.user_message);
                println!("Lincoln: {}", beat.lincoln_response);
                for citation in &beat.citations {
                    match (citation.author(), citation.page) {
                        (Some(author), Some(page)) => println!("  - {} ({}), p. {}", citation.label(), author, page),
                        (Some(author), None) => println!("  - {} ({})", citation.label(), author),
                        (None, Some(page)) => println!("  - {}, p. {}", citation.label(), page),
                        (None, None) => println!("  - {}", citation.label()),
                    }
                }
            }
        }
        EpisodeAction::Export { id, format, output } => {
            let rendered = match app.api.export_episode(id, format.into()).await? {
                EpisodeExport::Markdown(markdown) => markdown,
                EpisodeExport::Json(value) => serde_json::to_string_pretty(&value)?,
            };
            match output {
                Some(path) => {
                    tokio::fs::write(&path, rendered)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Exported episode to {}", path.display());
                }
                None => println!("{}", rendered),
            }
        }
    }
    Ok(())
}

async fn handle_sources(app: &App, action: SourceAction) -> Result<()> {
    match action {
        SourceAction::List {
            search,
            source_type,
            tags,
            limit,
        } => {
            let query = SourceQuery {
                limit,
                search,
                source_type,
                tags: split_tags(tags.as_deref()),
                ..Default::default()
            };
            let sources = app.api.list_sources(&query).await?;
            println!("{:<36} {:<10} {:>4} {:>4} {}", "ID", "TYPE", "DOCS", "REL", "TITLE");
            println!("{}", "-".repeat(80));
            for source in sources {
                println!(
                    "{:<36} {:<10} {:>4} {:>4.2} {}",
                    source.id,
                    source.source_type.as_str(),
                    source.document_count,
                    source.reliability_score,
                    source.title
                );
            }
        }
        SourceAction::Show { id } => {
            let source = app.api.get_source(id).await?;
            println!("{}", serde_json::to_string_pretty(&source)?);
        }
        SourceAction::Create {
            title,
            source_type,
            author,
            desc,
            url,
            reliability,
            tags,
        } => {
            let source = app
                .api
                .create_source(&NewSource {
                    author,
                    description: desc,
                    url,
                    reliability_score: reliability,
                    tags: split_tags(tags.as_deref()),
                    ..NewSource::new(title, source_type)
                })
                .await?;
            println!("Created source: {}", source.id);
        }
        SourceAction::Delete { id } => {
            app.api.delete_source(id).await?;
            println!("Deleted source: {}", id);
        }
        SourceAction::Upload { id, file } => {
            let upload = Upload::from_path(&file).await?;
            let document = app.api.upload_document(id, &upload).await?;
            println!(
                "Uploaded {} ({} bytes) as document {}, status: {}",
                document.filename, document.file_size, document.id, document.processing_status
            );
        }
        SourceAction::Documents { id } => {
            let documents = app.api.list_documents(id, 0, 100).await?;
            println!("{:<36} {:<12} {:>8} {}", "ID", "STATUS", "WORDS", "FILENAME");
            println!("{}", "-".repeat(80));
            for document in documents {
                println!(
                    "{:<36} {:<12} {:>8} {}",
                    document.id, document.processing_status, document.word_count, document.filename
                );
            }
        }
        SourceAction::Status { id } => {
            let status = app.api.processing_status(id).await?;
            println!(
                "{} documents: {} completed, {} processing, {} chunking, {} indexed, {} failed",
                status.total_documents,
                status.completed,
                status.processing,
                status.chunking,
                status.indexed,
                status.error
            );
            for document in status.documents {
                match document.error_message {
                    Some(error) => println!("  {} [{}] {}", document.filename, document.status, error),
                    None => println!("  {} [{}]", document.filename, document.status),
                }
            }
        }
        SourceAction::Stats { id } => {
            let stats = app.api.source_stats(id).await?;
            println!("{}", stats.source_title);
            println!(
                "  {} documents, {} words, {} characters, {} chunks",
                stats.total_documents, stats.total_words, stats.total_characters, stats.total_chunks
            );
            for (status, count) in &stats.processing_status {
                println!("  {}: {}", status, count);
            }
        }
        SourceAction::Reprocess { id } => {
            let summary = app.api.reprocess_source(id).await?;
            println!(
                "{} ({} of {} documents)",
                summary.message, summary.reprocessed, summary.total_documents
            );
        }
    }
    Ok(())
}

async fn handle_stats(app: &App) -> Result<()> {
    let stats = app.api.studio_stats().await?;
    println!(
        "Episodes: {} total, {} active, {} completed",
        stats.episodes.total, stats.episodes.active, stats.episodes.completed
    );
    println!(
        "Conversation: {} beats, {} citations, {:.0}% average citation accuracy",
        stats.conversation.total_beats,
        stats.conversation.total_citations,
        stats.conversation.average_citation_accuracy * 100.0
    );
    println!("Active connections: {}", stats.active_connections);
    if !stats.recent_episodes.is_empty() {
        println!("Recent:");
        for episode in stats.recent_episodes {
            println!("  {} [{}] {}", episode.id, episode.status, episode.title);
        }
    }
    Ok(())
}

async fn handle_chat(
    app: &App,
    episode: Option<Uuid>,
    sources: Vec<Uuid>,
    http_only: bool,
) -> Result<()> {
    let user = app.api.me().await?;
    let http = HttpStreamTransport::new(app.api.clone());

    let socket = if http_only || !app.config.prefer_websocket {
        None
    } else {
        let socket = WsTransport::connect(
            app.config.chat_socket_url(&user.id),
            app.config.reconnect_policy(),
        );
        if !socket.wait_open(SOCKET_GRACE).await {
            println!("(socket not open yet, replies stream over HTTP until it connects)");
        }
        Some(socket)
    };

    let context = ChatContext {
        episode_id: episode.map(|id| id.to_string()),
        source_ids: sources.iter().map(Uuid::to_string).collect(),
    };
    let mut chat = StudioChat::new(TransportSelector::new(socket, http), context);
    let mut filter = CitationFilter::default();

    println!("Studio chat as {}. /citations [high|medium|low|all] [search], /clear, /quit", user.username);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\nYou: ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        match line.split_whitespace().next() {
            Some("/quit") | Some("/exit") => break,
            Some("/clear") => {
                chat.clear();
                println!("Conversation cleared");
            }
            Some("/citations") => {
                filter = parse_citation_command(line, &filter)?;
                print_citations(chat.session().citations(), &filter);
            }
            _ => {
                let via = chat.transport().active_kind();
                let mut started = false;
                let result = chat
                    .send(line, |update| match update {
                        ChatUpdate::Delta(delta) => {
                            if !started {
                                print!("Lincoln: ");
                                started = true;
                            }
                            print!("{}", delta);
                            let _ = std::io::stdout().flush();
                        }
                        ChatUpdate::Completed(_) => println!(),
                        ChatUpdate::Failed(reason) => eprintln!("\n[error] {}", reason),
                    })
                    .await;

                match result {
                    Ok(Some(reply)) if !reply.citations().is_empty() => println!(
                        "[{} citations via {}; /citations to view]",
                        reply.citations().len(),
                        via
                    ),
                    Ok(_) => {}
                    Err(ChatError::Api(e)) if e.is_auth() => return Err(e.into()),
                    // Already reported through the observer
                    Err(_) => {}
                }
            }
        }
    }

    if let Some(socket) = chat.transport().primary() {
        socket.shutdown();
    }
    Ok(())
}

/// `/citations [high|medium|low|all] [search...]`
fn parse_citation_command(line: &str, current: &CitationFilter) -> Result<CitationFilter> {
    let mut words = line.split_whitespace().skip(1).peekable();
    let mut filter = current.clone();

    if let Some(first) = words.peek() {
        if let Ok(confidence) = first.parse::<ConfidenceFilter>() {
            filter.confidence = confidence;
            words.next();
        }
    }
    let search: Vec<&str> = words.collect();
    if !search.is_empty() {
        filter.search = search.join(" ");
    } else if line.split_whitespace().count() == 1 {
        filter = CitationFilter::default();
    }
    Ok(filter)
}

fn print_citations(citations: &[Citation], filter: &CitationFilter) {
    if citations.is_empty() {
        println!("No citations yet");
        return;
    }

    let groups = project(citations, filter);
    let shown: usize = groups.iter().map(|g| g.citations.len()).sum();
    println!("Citations: {} of {}", shown, citations.len());
    for group in groups {
        println!("\n{}", group.source_title);
        for citation in group.citations {
            let author = citation
                .source_author
                .as_deref()
                .map(|a| format!(" ({})", a))
                .unwrap_or_default();
            println!(
                "  [{} {:.0}%] {}{}",
                ConfidenceLevel::of(citation.confidence_score),
                citation.confidence_score * 100.0,
                citation.citation_text,
                author
            );
            if let Some(snippet) = &citation.context_snippet {
                println!("      \"{}\"", snippet);
            }
        }
    }
}

fn split_tags(tags: Option<&str>) -> Vec<String> {
    tags.map(|t| t.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default()
}

async fn prompt(stdin: &mut Lines<BufReader<Stdin>>, label: &str) -> Result<String> {
    print!("{}", label);
    std::io::stdout().flush()?;
    match stdin.next_line().await? {
        Some(line) if !line.trim().is_empty() => Ok(line.trim().to_string()),
        _ => bail!("No input for {}", label.trim_end_matches([':', ' '])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_citation_command() {
        let base = CitationFilter::default();

        let f = parse_citation_command("/citations high", &base).unwrap();
        assert_eq!(f.confidence, ConfidenceFilter::High);
        assert_eq!(f.search, "");

        let f = parse_citation_command("/citations low gettysburg address", &f).unwrap();
        assert_eq!(f.confidence, ConfidenceFilter::Low);
        assert_eq!(f.search, "gettysburg address");

        let f = parse_citation_command("/citations herndon", &f).unwrap();
        assert_eq!(f.confidence, ConfidenceFilter::Low);
        assert_eq!(f.search, "herndon");

        // Bare command resets the filter
        let f = parse_citation_command("/citations", &f).unwrap();
        assert_eq!(f, CitationFilter::default());
    }

    #[test]
    fn test_split_tags() {
        assert_eq!(split_tags(Some("speech, 1863")), vec!["speech", "1863"]);
        assert!(split_tags(None).is_empty());
    }

    #[test]
    fn test_cli_parses_chat_flags() {
        let cli = Cli::try_parse_from([
            "tms",
            "chat",
            "--episode",
            "3f2b8c1e-9d4a-4e6f-8a7b-1c2d3e4f5a6b",
            "--source",
            "7a1c2d3e-4f5a-4b6c-8d7e-9f0a1b2c3d4e",
            "--http-only",
        ])
        .unwrap();
        match cli.command {
            Commands::Chat {
                episode,
                sources,
                http_only,
            } => {
                assert!(episode.is_some());
                assert_eq!(sources.len(), 1);
                assert!(http_only);
            }
            _ => panic!("expected chat command"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_status() {
        let parsed = Cli::try_parse_from([
            "tms",
            "episodes",
            "status",
            "3f2b8c1e-9d4a-4e6f-8a7b-1c2d3e4f5a6b",
            "finished",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_cli_parses_source_stats() {
        let cli = Cli::try_parse_from([
            "tms",
            "sources",
            "stats",
            "7a1c2d3e-4f5a-4b6c-8d7e-9f0a1b2c3d4e",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Sources {
                action: SourceAction::Stats { .. }
            }
        ));
    }
}
