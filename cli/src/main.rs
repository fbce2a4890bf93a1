//! quill-probe: run a language server against one file and print what it
//! reports.
//!
//! ```text
//! quill-probe <config.toml> <file>
//! ```
//!
//! The server is started from the config's `[server]` table, initialized,
//! handed the file, and asked for its document symbols. Diagnostics and
//! file status pushed meanwhile are printed as they arrive. Logs go to
//! stderr and honour `RUST_LOG`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use quill_lsp::position::from_lsp_range;
use quill_lsp::{
    ClientEvent, DocumentHandle, LspConfig, ServerState, Session, Subscriber, TextBuffer,
    TextDocument, path_to_file_uri,
};

/// How long to wait on the server for any single step.
const STEP_TIMEOUT: Duration = Duration::from_secs(30);

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn usage() -> ! {
    eprintln!("usage: quill-probe <config.toml> <file>");
    std::process::exit(2);
}

/// Handle transport events until `done` holds or the server goes quiet.
async fn pump_until(
    session: &mut Session,
    what: &str,
    done: impl Fn(&Session) -> bool,
) -> Result<()> {
    while !done(session) {
        match timeout(STEP_TIMEOUT, session.pump()).await {
            Ok(true) => {}
            Ok(false) => bail!("server went away while waiting for {what}"),
            Err(_) => bail!("timed out waiting for {what}"),
        }
        if session.state() == ServerState::Stopped {
            bail!("server stopped while waiting for {what}");
        }
    }
    Ok(())
}

fn print_event(buffer: &TextBuffer, event: &ClientEvent) {
    match event {
        ClientEvent::Diagnostics { uri, diagnostics } => {
            println!("diagnostics for {uri}: {}", diagnostics.len());
            for d in diagnostics {
                let severity = d.severity.map_or("unknown", |s| s.label());
                println!(
                    "  {}:{} {severity}: {}",
                    d.range.start.line + 1,
                    d.range.start.character + 1,
                    d.message
                );
            }
        }
        ClientEvent::FileStatus(status) => println!("status: {}", status.state),
        ClientEvent::DocumentSymbols { symbols, .. } => {
            println!("symbols: {}", symbols.len());
            for symbol in symbols {
                let name = match &symbol.container_name {
                    Some(container) => format!("{container}::{}", symbol.name),
                    None => symbol.name.clone(),
                };
                let line = symbol.location.range.start.line + 1;
                // First line of the symbol's source, when the range maps.
                let source = from_lsp_range(buffer, symbol.location.range)
                    .map(|(start, end)| buffer.char_range(start, end.saturating_sub(start)))
                    .and_then(|text| text.lines().next().map(str::trim).map(String::from))
                    .unwrap_or_default();
                println!("  {name} (line {line}) {source}");
            }
        }
        ClientEvent::RequestFailed { error, .. } => println!("request failed: {error}"),
        other => tracing::debug!(?other, "Unexpected event"),
    }
}

fn drain(buffer: &TextBuffer, rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> bool {
    let mut got_symbols = false;
    while let Ok(event) = rx.try_recv() {
        got_symbols |= matches!(
            event,
            ClientEvent::DocumentSymbols { .. } | ClientEvent::RequestFailed { .. }
        );
        print_event(buffer, &event);
    }
    got_symbols
}

async fn run(config_path: &Path, file: &Path) -> Result<()> {
    let config = LspConfig::load(config_path)?;
    let file = file
        .canonicalize()
        .with_context(|| format!("resolving {}", file.display()))?;
    let text = fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
    let language = config
        .server
        .language_for(&file)
        .with_context(|| format!("no language configured for {}", file.display()))?
        .to_string();
    let uri = path_to_file_uri(&file)?.to_string();

    let mut client = config.client.clone();
    if client.root_uri.is_none()
        && let Some(parent) = file.parent()
    {
        client.root_uri = Some(path_to_file_uri(parent)?.to_string());
    }

    let mut session = Session::new(config.style_for_disabled_lines);
    if !session.start_server(&config.server.command, &config.server.args) {
        bail!("could not start {}", config.server.command);
    }
    pump_until(&mut session, "startup", |s| s.state() == ServerState::Running).await?;

    if !session.initialize(&client) {
        bail!("initialize could not be sent");
    }
    pump_until(&mut session, "initialize", |s| s.state() == ServerState::Ready).await?;
    tracing::info!(capabilities = ?session.capabilities(), "Server ready");

    let buffer = Rc::new(TextBuffer::new(text));
    let doc = DocumentHandle::from(buffer.clone());
    let (subscriber, mut rx) = Subscriber::channel();
    session.add_document(&doc, &uri, &language);
    session.register(&doc, &subscriber);

    let id = session
        .document_symbol_request(&doc)
        .context("documentSymbol could not be sent")?;
    session.register_request(id, &subscriber);

    let mut got_symbols = false;
    while !got_symbols {
        match timeout(STEP_TIMEOUT, session.pump()).await {
            Ok(true) => got_symbols = drain(&buffer, &mut rx),
            Ok(false) => bail!("server went away before answering"),
            Err(_) => bail!("timed out waiting for symbols"),
        }
    }
    // Diagnostics often trail the first response.
    session.poll_events(usize::MAX);
    drain(&buffer, &mut rx);

    session.unregister(&subscriber);
    session.remove_document(&doc);
    if session.stop_server() {
        let _ = timeout(STEP_TIMEOUT, async {
            while session.state() != ServerState::Stopped && session.pump().await {}
        })
        .await;
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let mut args = env::args_os().skip(1);
    let (Some(config_path), Some(file)) = (args.next(), args.next()) else {
        usage();
    };

    init_tracing();
    run(&PathBuf::from(config_path), &PathBuf::from(file)).await
}
