//! Quintilink CLI - headless front-end for the terminal core
//!
//! Connect as TCP client, TCP server or over a serial line, type quick-send
//! input (`AT<CR><LF>`, `<02 41 03>`) on stdin and watch the session log.

use clap::{Parser, Subcommand, ValueEnum};
use quintilink_core::cli::{CliResult, ExitCodes};
use quintilink_core::config::{self, ConnectionMode, ConnectionSettings};
use quintilink_core::core::codec;
use quintilink_core::core::compare;
use quintilink_core::core::logger::{ExportFormat, LogEntry};
use quintilink_core::core::session::{Session, SessionEvent};
use quintilink_core::core::store::MessageStore;
use quintilink_core::core::transport::{
    list_ports, SerialConfig, SerialFlowControl, SerialParity, ServerConfig, TcpConfig, Transport,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// CLI output format
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON lines for scripting
    Json,
}

/// Quintilink CLI
#[derive(Parser, Debug)]
#[command(
    name = "quintilink",
    version,
    about = "Byte-oriented TCP/serial terminal with automatic reactions",
    long_about = None
)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Verbose diagnostics
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write diagnostics to a daily rolling file in this directory
    #[arg(long, env = "QUINTILINK_LOG_DIR", global = true)]
    log_dir: Option<PathBuf>,

    /// Diagnostics as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Message/reaction store (defaults to the application data directory)
    #[arg(long, env = "QUINTILINK_STORE", global = true)]
    store: Option<PathBuf>,

    /// Export the session log on exit (format from extension: csv, json, txt)
    #[arg(long, global = true)]
    export: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to a TCP server
    Client {
        /// Host address
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port number
        #[arg(short, long, default_value = "9000")]
        port: u16,

        /// Connection timeout (seconds)
        #[arg(long, default_value = "10")]
        timeout: u64,
    },

    /// Listen for TCP clients and broadcast to all of them
    Server {
        /// Port number
        #[arg(short, long, default_value = "9000")]
        port: u16,

        /// Bind address
        #[arg(short, long, default_value = "0.0.0.0")]
        bind: String,
    },

    /// Open a serial port
    Serial {
        /// Serial port name (e.g., COM3, /dev/ttyUSB0)
        #[arg(short, long)]
        port: String,

        /// Baud rate
        #[arg(short, long, default_value = "9600")]
        baud: u32,

        /// Data bits (5-8)
        #[arg(long, default_value = "8")]
        data_bits: u8,

        /// Parity (none, odd, even)
        #[arg(long, default_value = "none")]
        parity: SerialParity,

        /// Stop bits (1, 2)
        #[arg(long, default_value = "1")]
        stop_bits: u8,

        /// Flow control (none, hw, sw)
        #[arg(long, default_value = "none")]
        flow: String,
    },

    /// Reconnect using the saved connection settings
    Connect,

    /// List available serial ports
    ListPorts,

    /// Encode quick-send input to hex
    Encode {
        /// Text with <..> hex or macro spans
        text: String,
    },

    /// Decode hex to annotated ASCII
    Decode {
        /// Hex bytes (separators allowed)
        hex: String,

        /// Print a hexdump instead
        #[arg(long)]
        dump: bool,
    },

    /// Compare two hex payloads byte by byte
    Compare {
        /// First payload
        left: String,

        /// Second payload
        right: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match init_tracing(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: could not initialise logging: {e:#}");
            return ExitCode::from(ExitCodes::CONFIG_ERROR);
        }
    };

    match run(&cli).await {
        Ok(result) => {
            if let (false, Some(msg)) = (result.is_success(), result.message()) {
                eprintln!("Error: {msg}");
            }
            result.to_exit_code()
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(ExitCodes::ERROR)
        }
    }
}

fn init_tracing(cli: &Cli) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let Some(dir) = &cli.log_dir else {
        let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
        if cli.json_logs {
            builder.json().init();
        } else {
            builder.init();
        }
        return Ok(None);
    };

    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::daily(dir, "quintilink.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false);
    if cli.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }

    Ok(Some(guard))
}

async fn run(cli: &Cli) -> anyhow::Result<CliResult> {
    match &cli.command {
        Commands::ListPorts => show_ports(cli),
        Commands::Encode { text } => Ok(encode(cli, text)),
        Commands::Decode { hex, dump } => Ok(decode(hex, *dump)),
        Commands::Compare { left, right } => compare_payloads(cli, left, right),
        Commands::Connect => {
            let settings = ConnectionSettings::load();
            let transport = settings.to_transport();
            interactive(cli, settings, transport).await
        }
        Commands::Client { host, port, timeout } => {
            let mut settings = ConnectionSettings::load();
            settings.mode = ConnectionMode::TcpClient;
            settings.host.clone_from(host);
            settings.port = *port;
            let transport = Transport::TcpClient(TcpConfig::new(host, *port).timeout(*timeout));
            interactive(cli, settings, transport).await
        }
        Commands::Server { port, bind } => {
            let mut settings = ConnectionSettings::load();
            settings.mode = ConnectionMode::TcpServer;
            settings.port = *port;
            let transport = Transport::TcpServer(ServerConfig::new(*port).bind_addr(bind));
            interactive(cli, settings, transport).await
        }
        Commands::Serial { port, baud, data_bits, parity, stop_bits, flow } => {
            let flow_control = match flow.to_lowercase().as_str() {
                "none" => SerialFlowControl::None,
                "hw" | "hardware" | "rts/cts" => SerialFlowControl::Hardware,
                "sw" | "software" | "xon/xoff" => SerialFlowControl::Software,
                other => {
                    return Ok(CliResult::error(ExitCodes::INVALID_ARGS, format!("Unknown flow control: {other}")));
                }
            };

            let mut settings = ConnectionSettings::load();
            settings.mode = ConnectionMode::Serial;
            settings.serial_port_name.clone_from(port);
            settings.baud_rate = *baud;
            settings.parity = *parity;
            settings.data_bits = *data_bits;
            settings.stop_bits = *stop_bits;

            let config = SerialConfig::new(port, *baud)
                .data_bits(*data_bits)
                .parity(*parity)
                .stop_bits(*stop_bits)
                .flow_control(flow_control);
            interactive(cli, settings, Transport::Serial(config)).await
        }
    }
}

fn show_ports(cli: &Cli) -> anyhow::Result<CliResult> {
    let ports = match list_ports() {
        Ok(ports) => ports,
        Err(e) => return Ok(CliResult::from(&e)),
    };

    match cli.format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.port_name,
                        "type": format!("{:?}", p.port_type)
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            if ports.is_empty() {
                println!("No serial ports found.");
            }
            for port in &ports {
                println!("{}  [{:?}]", port.port_name, port.port_type);
            }
        }
    }

    Ok(CliResult::success())
}

fn encode(cli: &Cli, text: &str) -> CliResult {
    let parsed = codec::mixed_input_parse(text);

    match cli.format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "hex": codec::bytes_to_hex(&parsed.bytes),
                "invalidSpans": parsed.invalid_spans
            })
        ),
        OutputFormat::Text => {
            println!("{}", codec::bytes_to_spaced_hex(&parsed.bytes));
            if parsed.invalid_spans > 0 {
                eprintln!("warning: {} invalid <...> span(s) kept as text", parsed.invalid_spans);
            }
        }
    }

    CliResult::success()
}

fn decode(hex: &str, dump: bool) -> CliResult {
    match codec::hex_to_bytes(hex) {
        Ok(bytes) if dump => {
            print!("{}", codec::hexdump(&bytes, 16));
            CliResult::success()
        }
        Ok(bytes) => {
            println!("{}", codec::bytes_to_macro_ascii(&bytes));
            CliResult::success()
        }
        Err(e) => CliResult::from(&e),
    }
}

fn compare_payloads(cli: &Cli, left: &str, right: &str) -> anyhow::Result<CliResult> {
    let (left, right) = match (codec::hex_to_bytes(left), codec::hex_to_bytes(right)) {
        (Ok(l), Ok(r)) => (l, r),
        (Err(e), _) | (_, Err(e)) => return Ok(CliResult::from(&e)),
    };
    let result = compare::compare(&left, &right);

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => {
            for diff in &result.differences {
                println!("{diff}");
            }
            println!(
                "{} of {} bytes differ ({:.1}% similar)",
                result.different_bytes,
                result.total_bytes,
                result.similarity_percentage()
            );
        }
    }

    Ok(CliResult::success())
}

fn open_session(cli: &Cli) -> anyhow::Result<Session> {
    let store = match &cli.store {
        Some(path) => Some(MessageStore::new(path)),
        None => {
            config::init_directories()?;
            MessageStore::default_location()
        }
    };

    Ok(match store {
        Some(store) => Session::with_store(store)?,
        None => Session::new(),
    })
}

fn print_entry(format: OutputFormat, entry: &LogEntry) {
    match format {
        OutputFormat::Text => println!("{}", entry.to_text()),
        OutputFormat::Json => match serde_json::to_string(entry) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("Could not encode log entry: {}", e),
        },
    }
}

async fn interactive(cli: &Cli, mut settings: ConnectionSettings, transport: Transport) -> anyhow::Result<CliResult> {
    let session = open_session(cli)?;
    let mut events = session.subscribe();

    if let Err(e) = session.connect(transport).await {
        drain_events(cli, &mut events);
        return Ok(CliResult::from(&e));
    }
    eprintln!("{} - type quick-send input, Ctrl+C to exit.", session.status_text());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    settings.push_quick_send(&line);
                    session.send_raw(&line).await;
                }
                None => stdin_open = false,
            },
            event = events.recv() => match event {
                Ok(SessionEvent::LogAppended { entry, .. }) => print_entry(cli.format, &entry),
                Ok(SessionEvent::StatusChanged(status)) => {
                    eprintln!("Status: {status}");
                    if !session.is_connected() {
                        break;
                    }
                }
                Ok(SessionEvent::ModemLinesChanged(modem)) => {
                    eprintln!("CTS={} DSR={} CD={}", modem.cts, modem.dsr, modem.dcd);
                }
                Ok(SessionEvent::StatisticsTick(_)) => {}
                Err(RecvError::Lagged(n)) => warn!("Dropped {} session events", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.disconnect().await;
    drain_events(cli, &mut events);
    eprintln!("{}", session.statistics_summary());

    if let Err(e) = settings.save() {
        warn!("Could not save settings: {}", e);
    }

    if let Some(path) = &cli.export {
        let format = export_format(path);
        session.log().export_to_file(path, format)?;
        info!("Exported {} log entries to {}", session.log().len(), path.display());
    }

    Ok(CliResult::success())
}

fn drain_events(cli: &Cli, events: &mut tokio::sync::broadcast::Receiver<SessionEvent>) {
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::LogAppended { entry, .. } = event {
            print_entry(cli.format, &entry);
        }
    }
}

fn export_format(path: &Path) -> ExportFormat {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| ext.parse().ok())
        .unwrap_or_default()
}
