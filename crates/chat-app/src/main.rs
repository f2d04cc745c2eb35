use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use scrolltosco_chat::chat::{
    ChatController, ContextMap, FileContextSource, SubmitOutcome, load_context,
};
use scrolltosco_chat::presentation::{InlineShell, ModalShell, SessionObserver, render_turn_block};
use scrolltosco_chat::settings::SettingsStore;
use scrolltosco_client::{TransportError, create_transport};
use serde_json::Value;
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Ask questions about your latest ScrollToSco screening result.
#[derive(Debug, Parser)]
#[command(name = "scrolltosco-chat", version)]
struct Cli {
    /// Backend base URL. Overrides the settings file.
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Persisted screening result used as diagnosis context.
    #[arg(long, value_name = "PATH")]
    context: Option<PathBuf>,

    /// Settings file to use instead of the per-user default.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Repaint the whole transcript on every update instead of printing line by line.
    #[arg(long)]
    modal: bool,

    /// Extra context entry sent with every request. Values are parsed as JSON when possible.
    #[arg(long = "context-override", value_name = "KEY=VALUE", value_parser = parse_override)]
    context_overrides: Vec<(String, Value)>,
}

#[derive(Debug, Snafu)]
enum CliError {
    #[snafu(display("failed to set up chat transport on `{stage}`: {source}"))]
    Transport {
        stage: &'static str,
        source: TransportError,
    },
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: io::Error,
    },
}

fn parse_override(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("context override key must not be empty".to_string());
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "chat shell exited with an error");
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let store = match cli.config {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::load(),
    };

    let mut settings = store.settings().as_ref().clone();
    if let Some(base_url) = cli.base_url {
        settings.base_url = base_url;
    }
    if let Some(context_path) = cli.context {
        settings.context_path = Some(context_path);
    }
    let settings = settings.normalized();
    let width = settings.wrap_width;

    let transport =
        create_transport(settings.to_transport_config()).context(TransportSnafu {
            stage: "create-chat-transport",
        })?;

    let context = settings
        .context_path
        .as_ref()
        .and_then(|path| load_context(&FileContextSource::new(path)));
    tracing::info!(
        base_url = %settings.base_url,
        context = context.as_ref().map(|context| context.kind()),
        "starting chat shell"
    );

    let observer: Box<dyn SessionObserver + Send> = if cli.modal {
        Box::new(ModalShell::new(io::stdout(), width))
    } else if io::stdin().is_terminal() {
        Box::new(InlineShell::new(io::stdout(), width).without_user_echo())
    } else {
        Box::new(InlineShell::new(io::stdout(), width))
    };

    let overrides = cli.context_overrides.into_iter().collect::<ContextMap>();
    let mut controller = ChatController::new(transport, context)
        .with_override_context(overrides)
        .with_observer(observer);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        // Ctrl-C at the prompt exits; during an exchange it only abandons the reply.
        let line = tokio::select! {
            line = lines.next_line() => line.context(ReadInputSnafu {
                stage: "read-stdin-line",
            })?,
            Ok(()) = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match line.trim() {
            "/quit" | "/exit" => break,
            "/history" => {
                print_history(&controller, width);
                continue;
            }
            _ => {}
        }

        if !matches!(controller.submit(&line), SubmitOutcome::Started(_)) {
            continue;
        }

        let interrupted = tokio::select! {
            _ = controller.drive() => false,
            Ok(()) = tokio::signal::ctrl_c() => true,
        };
        if interrupted {
            controller.abandon();
        }
    }

    Ok(())
}

fn print_history(controller: &ChatController, width: usize) {
    for turn in controller.turns() {
        println!("{}", render_turn_block(turn.role, &turn.content, width));
    }
}
