use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use basket_sync::categorize::{Categorizer, NoopCategorizer, OpenAiCategorizer, OpenAiConfig};
use basket_sync::server::{ServerConfig, SyncServer};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "basket: collaborative shopping-list sync server", long_about = None)]
struct Cli {
    /// RocksDB directory. Without it, lists live in memory only.
    #[arg(long, env = "BASKET_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the WebSocket sync server (default).
    Serve(ServeArgs),
    /// Create a list and print its id.
    CreateList {
        /// Display name of the new list
        name: String,
    },
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "BASKET_BIND", default_value = "127.0.0.1:3001")]
    bind: String,

    /// Outbound event queue per connection.
    #[arg(long, env = "BASKET_SESSION_BUFFER", default_value_t = 256)]
    session_buffer: usize,

    /// Delay before a new item is highlighted for its author, in ms.
    #[arg(long, env = "BASKET_HIGHLIGHT_DELAY_MS", default_value_t = 250)]
    highlight_delay_ms: u64,

    /// Categorization timeout, in ms.
    #[arg(long, env = "BASKET_CATEGORIZE_TIMEOUT_MS", default_value_t = 5000)]
    categorize_timeout_ms: u64,

    /// API key for the categorization model. Without it, items stay in "Other".
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Chat-completions base URL.
    #[arg(long, env = "BASKET_CATEGORIZE_URL", default_value = "https://api.openai.com/v1")]
    categorize_url: String,

    /// Model used for categorization.
    #[arg(long, env = "BASKET_CATEGORIZE_MODEL", default_value = "gpt-4.1-nano")]
    categorize_model: String,
}

fn categorizer(args: &ServeArgs) -> Result<Arc<dyn Categorizer>, Box<dyn std::error::Error>> {
    match &args.openai_api_key {
        Some(key) if !key.is_empty() => {
            let config = OpenAiConfig {
                base_url: args.categorize_url.clone(),
                model: args.categorize_model.clone(),
                api_key: key.clone(),
                timeout: Duration::from_millis(args.categorize_timeout_ms),
            };
            info!("Categorizing with {} at {}", config.model, config.base_url);
            Ok(Arc::new(OpenAiCategorizer::new(config)?))
        }
        _ => {
            warn!("No API key configured, categorization disabled");
            Ok(Arc::new(NoopCategorizer))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or_else(|| Commands::Serve(ServeArgs::parse_default()));

    match command {
        Commands::Serve(args) => {
            let config = ServerConfig {
                bind_addr: args.bind.clone(),
                session_buffer: args.session_buffer,
                highlight_delay_ms: args.highlight_delay_ms,
                categorize_timeout_ms: args.categorize_timeout_ms,
                storage_path: cli.data_dir,
            };
            match &config.storage_path {
                Some(path) => info!("Storing lists in {}", path.display()),
                None => warn!("No data directory, lists are kept in memory"),
            }
            let server = SyncServer::from_config(config, categorizer(&args)?)?;
            server.run().await
        }
        Commands::CreateList { name } => {
            let Some(data_dir) = cli.data_dir else {
                return Err("create-list needs --data-dir (or BASKET_DATA_DIR)".into());
            };
            let config = ServerConfig {
                storage_path: Some(data_dir),
                ..ServerConfig::default()
            };
            let server = SyncServer::from_config(config, Arc::new(NoopCategorizer))?;
            let list = server.actions().create_list(&name).await?;
            println!("{}", list.id);
            Ok(())
        }
    }
}

impl ServeArgs {
    /// Defaults plus environment, for a bare `basket-server` invocation.
    fn parse_default() -> Self {
        #[derive(Parser)]
        struct Bare {
            #[command(flatten)]
            serve: ServeArgs,
        }
        Bare::parse_from(["basket-server"]).serve
    }
}
