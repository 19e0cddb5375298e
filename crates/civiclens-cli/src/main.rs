use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use civiclens_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use civiclens_contracts::events::{new_session_id, EventWriter};
use civiclens_contracts::grounding::SourceRef;
use civiclens_contracts::issue::{AlertRequest, Ticket, TicketLocation};
use civiclens_engine::{
    non_empty_env, ChatSession, CivicAnalyst, DryrunClient, GeminiClient, ReasoningClient,
    CHAT_GREETING,
};
use clap::{Parser, Subcommand};
use image::ImageFormat;
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(name = "civiclens-rs", version, about = "CivicLens civic issue analysis CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Analyze(AnalyzeArgs),
    Search(SearchArgs),
    Geocode(GeocodeArgs),
    Chat(ChatArgs),
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    /// JPEG or PNG image of the suspected issue.
    #[arg(long)]
    image: PathBuf,
    /// Free-text location hint forwarded to the classifier.
    #[arg(long)]
    location: Option<String>,
    #[arg(long)]
    lat: Option<f64>,
    #[arg(long)]
    lng: Option<f64>,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct SearchArgs {
    #[arg(long)]
    query: String,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct GeocodeArgs {
    #[arg(long)]
    lat: f64,
    #[arg(long)]
    lng: f64,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    events: Option<PathBuf>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("civiclens-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Analyze(args) => run_analyze(args),
        Command::Search(args) => run_search(args),
        Command::Geocode(args) => run_geocode(args),
        Command::Chat(args) => run_chat(args),
    }
}

fn build_analyst(events: Option<PathBuf>) -> Result<CivicAnalyst> {
    let client: Box<dyn ReasoningClient> = match GeminiClient::from_env() {
        Some(client) => Box::new(client),
        None => {
            eprintln!(
                "No GEMINI_API_KEY or GOOGLE_API_KEY set; using the offline dryrun client."
            );
            Box::new(DryrunClient)
        }
    };
    let mut analyst = CivicAnalyst::new(client);
    if let Some(path) = events {
        analyst = analyst.with_events(EventWriter::new(path, new_session_id()));
    }
    analyst.set_vision_model(non_empty_env("CIVICLENS_VISION_MODEL"));
    analyst.set_search_model(non_empty_env("CIVICLENS_SEARCH_MODEL"));
    analyst.set_chat_model(non_empty_env("CIVICLENS_CHAT_MODEL"));
    analyst.set_geocode_model(non_empty_env("CIVICLENS_GEOCODE_MODEL"));
    Ok(analyst)
}

fn run_analyze(args: AnalyzeArgs) -> Result<i32> {
    let bytes = fs::read(&args.image)
        .with_context(|| format!("failed reading {}", args.image.display()))?;
    let mime_type = sniff_image_mime(&bytes)?;

    let analyst = build_analyst(args.events)?;
    println!("Analyzing image...");
    let result = analyst.analyze_image(&bytes, mime_type, args.location.as_deref());
    println!("{}", serde_json::to_string_pretty(&result)?);

    if let (Some(lat), Some(lng)) = (args.lat, args.lng) {
        let geocode = analyst.reverse_geocode(lat, lng);
        let ticket = Ticket::from_analysis(
            &result,
            &bytes,
            TicketLocation {
                lat,
                lng,
                address: geocode.address.clone(),
            },
        );
        let alert = AlertRequest::from_ticket(&ticket);
        println!("\nTicket preview:");
        println!("{}", serde_json::to_string_pretty(&ticket)?);
        println!("\nAlert payload:");
        println!("{}", serde_json::to_string_pretty(&alert)?);
        if let Some(link) = geocode.map_link {
            println!("\nMap: {link}");
        }
    }

    Ok(0)
}

/// Uploads are JPEG/PNG only; everything else is rejected before any
/// network call.
fn sniff_image_mime(bytes: &[u8]) -> Result<&'static str> {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => Ok("image/jpeg"),
        Ok(ImageFormat::Png) => Ok("image/png"),
        Ok(other) => bail!("unsupported image format {other:?}; upload a JPEG or PNG"),
        Err(_) => bail!("payload is not a recognizable image; upload a JPEG or PNG"),
    }
}

fn run_search(args: SearchArgs) -> Result<i32> {
    if args.query.trim().is_empty() {
        bail!("search query must not be empty");
    }
    let analyst = build_analyst(args.events)?;
    println!("Searching...");
    let result = analyst.search_civic_info(&args.query);
    print_search_result(&result.text, &result.sources);
    Ok(0)
}

fn print_search_result(text: &str, sources: &[SourceRef]) {
    println!("{text}");
    if !sources.is_empty() {
        println!("\nSources:");
        for source in sources {
            println!("- {} ({})", source.title, source.uri);
        }
    }
}

fn run_geocode(args: GeocodeArgs) -> Result<i32> {
    let analyst = build_analyst(args.events)?;
    let result = analyst.reverse_geocode(args.lat, args.lng);
    println!("{}", result.address);
    if let Some(link) = result.map_link {
        println!("Map: {link}");
    }
    Ok(0)
}

fn run_chat(args: ChatArgs) -> Result<i32> {
    let analyst = build_analyst(args.events)?;
    let mut session = ChatSession::with_greeting();

    println!(
        "CivicBot chat started on the {} client. Type /help for commands.",
        analyst.client_name()
    );
    println!("CivicBot: {CHAT_GREETING}");

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        match intent.action.as_str() {
            "noop" => continue,
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
            }
            "quit" => break,
            "search" => {
                let query = intent
                    .command_args
                    .get("query")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .trim()
                    .to_string();
                if query.is_empty() {
                    println!("/search requires a query");
                    continue;
                }
                println!("Searching...");
                let result = analyst.search_civic_info(&query);
                print_search_result(&result.text, &result.sources);
            }
            "geocode" => {
                let lat = intent.command_args.get("lat").and_then(Value::as_f64);
                let lng = intent.command_args.get("lng").and_then(Value::as_f64);
                let (Some(lat), Some(lng)) = (lat, lng) else {
                    println!("/geocode requires <lat> <lng>");
                    continue;
                };
                let result = analyst.reverse_geocode(lat, lng);
                println!("{}", result.address);
                if let Some(link) = result.map_link {
                    println!("Map: {link}");
                }
            }
            "message" => {
                let Some(prompt) = intent.prompt.clone() else {
                    continue;
                };
                println!("CivicBot is typing...");
                match analyst.chat(&mut session, &prompt) {
                    Ok(reply) => println!("CivicBot: {reply}"),
                    Err(err) => println!("CivicBot: {err:#}"),
                }
            }
            _ => {
                println!("Unknown command. Type /help for the command list.");
            }
        }
    }

    Ok(0)
}
