use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hookwatch::{
    api::ApiClient,
    config::Config,
    detail::{DETAIL_PLACEHOLDER, RenderedDetail},
    models::{EndpointId, EndpointRef, RequestId, WebhookEndpoint},
    pagination::{MAX_PAGE_SIZE, PageQuery},
    reconcile::Reconciliation,
    render::BodyFormat,
    session::{Command, Session, Update},
    transport::WebSocketChannel,
    view::{EndpointBoard, EndpointPage, RequestEntry},
};

#[derive(Parser)]
#[command(name = "hookwatch")]
#[command(about = "Live client for a webhook-capture backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Create an endpoint and print its capture URL
    Create { name: String },
    /// Pause or resume an endpoint
    Pause { slug: String },
    /// Delete an endpoint with all of its requests
    Delete { slug: String },
    /// List captured requests, newest first
    Requests {
        slug: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Show one captured request
    Show {
        id: RequestId,
        #[arg(long)]
        raw: bool,
    },
    /// Delete one captured request
    DeleteRequest { id: RequestId },
    /// Delete every captured request of an endpoint
    Clear { slug: String },
    /// Post a test request to an endpoint's capture URL
    Send {
        slug: String,
        #[arg(long, default_value = "{}")]
        body: String,
        /// Query parameter as key=value; repeatable
        #[arg(long = "query", value_parser = parse_pair)]
        query: Vec<(String, String)>,
    },
    /// Follow one endpoint live; reads commands from stdin
    Watch {
        slug: String,
        /// Numeric endpoint id, when known
        #[arg(long)]
        id: Option<String>,
    },
    /// Follow the request counters of several endpoints
    Board { slugs: Vec<String> },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = Config::from_env()?;
    let api = ApiClient::from_config(&cfg).map_err(|err| anyhow::anyhow!(err))?;

    match cli.command {
        Commands::Create { name } => {
            let card = api
                .create_webhook(&name)
                .await
                .map_err(|err| anyhow::anyhow!(err))?;
            let url = api
                .webhook_url(&card.slug)
                .map_err(|err| anyhow::anyhow!(err))?;
            println!("{}  {}  {url}", card.slug, card.name);
        }
        Commands::Pause { slug } => {
            let active = api
                .toggle_pause(&slug)
                .await
                .map_err(|err| anyhow::anyhow!(err))?;
            println!("{slug} is now {}", if active { "ACTIVE" } else { "PAUSED" });
        }
        Commands::Delete { slug } => {
            api.delete_webhook(&slug)
                .await
                .map_err(|err| anyhow::anyhow!(err))?;
            println!("deleted {slug}");
        }
        Commands::Requests { slug, offset, limit } => {
            let query = PageQuery {
                offset,
                limit: limit.unwrap_or(cfg.page_size).clamp(1, MAX_PAGE_SIZE),
            };
            let page = api
                .fetch_requests(&slug, query)
                .await
                .map_err(|err| anyhow::anyhow!(err))?;
            for summary in &page.requests {
                print_entry(&RequestEntry::from_summary(summary, &slug));
            }
            let shown = offset + page.requests.len() as u64;
            match page.total {
                Some(total) => println!("{shown} of {total}"),
                None => println!("{shown} shown"),
            }
        }
        Commands::Show { id, raw } => {
            let detail = api
                .fetch_request(id)
                .await
                .map_err(|err| anyhow::anyhow!(err))?;
            let rendered = RenderedDetail::render(id, &detail);
            print_detail(&rendered, if raw { BodyFormat::Raw } else { BodyFormat::Json });
        }
        Commands::DeleteRequest { id } => {
            api.delete_request(id)
                .await
                .map_err(|err| anyhow::anyhow!(err))?;
            println!("deleted request {id}");
        }
        Commands::Clear { slug } => {
            let message = api
                .delete_all_requests(&slug)
                .await
                .map_err(|err| anyhow::anyhow!(err))?;
            println!("{message}");
        }
        Commands::Send { slug, body, query } => {
            let (status, receipt) = api
                .send_test_request(&slug, &body, &query)
                .await
                .map_err(|err| anyhow::anyhow!(err))?;
            match receipt.job_id {
                Some(job) => println!("{status}  {} (job {job})", receipt.message),
                None => println!("{status}  {}", receipt.message),
            }
        }
        Commands::Watch { slug, id } => watch(&cfg, api, slug, id).await?,
        Commands::Board { slugs } => board(&cfg, api, slugs).await?,
    }

    Ok(())
}

async fn watch(
    cfg: &Config,
    api: ApiClient,
    slug: String,
    id: Option<String>,
) -> anyhow::Result<()> {
    let endpoint = EndpointRef {
        id: id.map(EndpointId::new),
        slug: Some(slug),
    };
    let channel = WebSocketChannel::new(
        cfg.push_url()?,
        cfg.session_cookie.clone(),
        cfg.retry_policy(),
    );
    info!("push channel {}", channel.url());
    let session = Session::open_endpoint(api, channel, endpoint, cfg.reconciler(), cfg.page_size)
        .await
        .map_err(|err| anyhow::anyhow!(err))?;
    if let Some(page) = session.page() {
        print_page(page);
    }
    println!("commands: <id> | show <id> | more | delete <id> | clear | raw | json | quit");

    let (tx, rx) = mpsc::channel(16);
    spawn_command_reader(tx);
    session
        .run(rx, |session, update| {
            if let Some(page) = session.page() {
                print_endpoint_update(page, update);
            }
        })
        .await;
    info!("watch finished");
    Ok(())
}

async fn board(cfg: &Config, api: ApiClient, slugs: Vec<String>) -> anyhow::Result<()> {
    if slugs.is_empty() {
        anyhow::bail!("name at least one endpoint slug");
    }
    let mut cards = Vec::with_capacity(slugs.len());
    for slug in slugs {
        let probe = PageQuery { offset: 0, limit: 1 };
        let page = api
            .fetch_requests(&slug, probe)
            .await
            .map_err(|err| anyhow::anyhow!(err))?;
        let mut card = WebhookEndpoint::new(&slug, slug.clone());
        card.request_count = page.total.unwrap_or(page.requests.len() as u64);
        cards.push(card);
    }

    let channel = WebSocketChannel::new(
        cfg.push_url()?,
        cfg.session_cookie.clone(),
        cfg.retry_policy(),
    );
    info!("push channel {}", channel.url());
    let session = Session::open_board(api, channel, cards, cfg.reconciler());
    if let Some(board) = session.board() {
        print_board(board);
    }

    let (tx, rx) = mpsc::channel(16);
    spawn_command_reader(tx);
    session
        .run(rx, |session, update| {
            if let Some(board) = session.board() {
                print_board_update(board, update);
            }
        })
        .await;
    Ok(())
}

/// Feeds stdin lines and ctrl-c into the session as commands.
fn spawn_command_reader(tx: mpsc::Sender<Command>) {
    let signal_tx = tx.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        let _ = signal_tx.send(Command::Quit).await;
    });
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_command(&line) {
                Some(command) => {
                    if tx.send(command).await.is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => eprintln!("unknown command: {}", line.trim()),
            }
        }
    });
}

fn parse_command(line: &str) -> Option<Command> {
    let mut words = line.split_whitespace();
    let head = words.next()?;
    let arg = words.next();
    match (head, arg) {
        ("more", None) => Some(Command::LoadMore),
        ("clear", None) => Some(Command::DeleteAll),
        ("raw", None) => Some(Command::Format(BodyFormat::Raw)),
        ("json", None) => Some(Command::Format(BodyFormat::Json)),
        ("quit" | "q", None) => Some(Command::Quit),
        ("show", Some(id)) => id.parse().ok().map(Command::Select),
        ("delete", Some(id)) => id.parse().ok().map(Command::Delete),
        (id, None) => id.parse().ok().map(Command::Select),
        _ => None,
    }
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))
}

fn print_entry(entry: &RequestEntry) {
    let marker = match (entry.active, entry.highlighted) {
        (true, _) => '>',
        (false, true) => '+',
        _ => ' ',
    };
    println!(
        "{marker} {:>8}  {}  POST {}  {}  {}",
        entry.request_id,
        entry.time_label(),
        entry.path,
        entry.status,
        entry.size_label()
    );
}

fn print_page(page: &EndpointPage) {
    println!("{}", page.list.count_label());
    for entry in page.list.entries() {
        print_entry(entry);
    }
    if let Some(label) = page.list.pager().control_label() {
        println!("[{label}]");
    }
}

fn print_detail(rendered: &RenderedDetail, format: BodyFormat) {
    println!(
        "#{}  {}  {}  {}  {}",
        rendered.request_id,
        rendered.status_label,
        rendered.timestamp_label,
        rendered.latency_label,
        rendered.size_label
    );
    println!("headers:");
    if rendered.headers.is_empty() {
        println!("  No headers");
    }
    for (key, value) in &rendered.headers {
        println!("  {key}: {value}");
    }
    println!("query:");
    if rendered.query_params.is_empty() {
        println!("  No query parameters");
    }
    for (key, value) in &rendered.query_params {
        println!("  {key}: {value}");
    }
    println!("body:");
    match format {
        BodyFormat::Raw => println!("{}", rendered.raw_body()),
        BodyFormat::Json => println!("{}", rendered.body.text),
    }
}

fn print_endpoint_update(page: &EndpointPage, update: &Update) {
    match update {
        Update::Reconciled(Reconciliation::Prepended { .. }) => {
            if let Some(entry) = page.list.first() {
                print_entry(entry);
            }
            println!("{}", page.list.count_label());
        }
        Update::Reconciled(Reconciliation::Ignored) | Update::HighlightCleared(_) => {}
        Update::Reconciled(_) | Update::Lagged(_) => println!("reloading..."),
        Update::Reloaded | Update::Page(_) | Update::Cleared(_) => print_page(page),
        Update::Deleted(id) => {
            println!("deleted request {id}");
            println!("{}", page.list.count_label());
            if page.detail.loaded().is_none() && !page.detail.is_loading() {
                println!("{DETAIL_PLACEHOLDER}");
            }
        }
        Update::Detail(_) | Update::FormatChanged(true) => match page.detail.loaded() {
            Some(rendered) => {
                let format = rendered.body.format;
                print_detail(rendered, format);
            }
            None => println!("{DETAIL_PLACEHOLDER}"),
        },
        Update::Selected(id) => println!("loading request {id}..."),
        Update::FormatChanged(false) => println!("body cannot be shown that way"),
        Update::PageSkipped => println!("nothing more to load"),
        Update::PageStale => println!("older page dropped after a reload"),
        Update::PageFailed | Update::ReloadFailed => {}
        Update::Failed(err) => eprintln!("error: {err}"),
        Update::Closed => {}
    }
}

fn print_board(board: &EndpointBoard) {
    for card in board.cards() {
        println!(
            "{:<7} {:<12} {:<20} {:>6} requests",
            card.status_label(),
            card.slug,
            card.name,
            card.request_count
        );
    }
}

fn print_board_update(board: &EndpointBoard, update: &Update) {
    match update {
        Update::Reconciled(Reconciliation::CounterIncremented { slug, count }) => {
            println!("{slug}: {count} requests");
        }
        Update::Reloaded => print_board(board),
        Update::Failed(err) => eprintln!("error: {err}"),
        _ => {}
    }
}
