use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use retouch_contracts::chat::{parse_intent, Intent, EDITOR_HELP_COMMANDS};
use retouch_contracts::events::EventWriter;
use retouch_contracts::history::ImageVersion;
use retouch_contracts::requests::{
    CropRect, ExpandDirection, GenerationRequest, Hotspot, InvalidInput, OperationKind,
};
use retouch_contracts::session::{
    CreditPackage, JsonSessionStore, SessionStore, UserSession,
};
use retouch_contracts::summary::write_summary;
use retouch_engine::codec::{extension_for_mime, load_image, save_image};
use retouch_engine::{EditError, Editor, EngineConfig, GenerationClient, SubmitOutcome};
use serde_json::{json, Map, Value};

#[derive(Debug, Parser)]
#[command(name = "retouch", version, about = "Prompt-driven photo retouching")]
struct Cli {
    /// State directory for accounts and the transaction ledger (overrides RETOUCH_HOME).
    #[arg(long, global = true)]
    home: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Register(RegisterArgs),
    Login(LoginArgs),
    Logout,
    Whoami,
    Buy(BuyArgs),
    #[command(subcommand)]
    Admin(AdminCommand),
    Apply(ApplyArgs),
    Edit(EditArgs),
}

#[derive(Debug, Parser)]
struct RegisterArgs {
    #[arg(long)]
    email: String,
    #[arg(long)]
    name: String,
    #[arg(long)]
    password: String,
}

#[derive(Debug, Parser)]
struct LoginArgs {
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
}

#[derive(Debug, Parser)]
struct BuyArgs {
    /// starter, pro or studio
    package: String,
}

#[derive(Debug, Subcommand)]
enum AdminCommand {
    Users,
    Enable { email: String },
    Disable { email: String },
    Grant { email: String, credits: i64 },
}

#[derive(Debug, Parser)]
struct ApplyArgs {
    #[arg(long)]
    image: PathBuf,
    /// edit, filter, adjust, combine or expand
    #[arg(long)]
    op: String,
    #[arg(long, default_value = "")]
    prompt: String,
    #[arg(long)]
    x: Option<u32>,
    #[arg(long)]
    y: Option<u32>,
    #[arg(long)]
    second: Option<PathBuf>,
    #[arg(long)]
    direction: Option<String>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    image_model: Option<String>,
}

#[derive(Debug, Parser)]
struct EditArgs {
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    image_model: Option<String>,
}

const EXIT_PAYWALL: i32 = 2;

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("retouch error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let mut config = EngineConfig::from_env();
    if let Some(home) = cli.home {
        config.state_dir = home;
    }
    let store = JsonSessionStore::open(&config.state_dir);
    match cli.command {
        Command::Register(args) => {
            let session = store.register(&args.email, &args.name, &args.password)?;
            println!(
                "Registered {} ({}) with {} credits.",
                session.email, session.role, session.credits
            );
            Ok(0)
        }
        Command::Login(args) => {
            let session = store.login(&args.email, &args.password)?;
            println!("Signed in as {}.", session.email);
            print_session(&session);
            Ok(0)
        }
        Command::Logout => {
            store.logout()?;
            println!("Signed out.");
            Ok(0)
        }
        Command::Whoami => {
            match store.current()? {
                Some(session) => print_session(&session),
                None => println!("Not signed in."),
            }
            Ok(0)
        }
        Command::Buy(args) => {
            let package: CreditPackage = args.package.parse()?;
            let actor = require_session(&store)?;
            let session = store.purchase(&actor.user_id, package)?;
            println!(
                "Purchased {} (+{} credits, ${:.2}). Balance: {}",
                package.as_str(),
                package.credits(),
                package.price_cents() as f64 / 100.0,
                session.credits
            );
            Ok(0)
        }
        Command::Admin(command) => run_admin(&store, command),
        Command::Apply(args) => run_apply(&config, store, args),
        Command::Edit(args) => run_edit(&config, store, args),
    }
}

fn require_session(store: &JsonSessionStore) -> Result<UserSession> {
    store
        .current()?
        .context("not signed in; run `retouch login` first")
}

fn print_session(session: &UserSession) {
    let status = if session.enabled { "enabled" } else { "disabled" };
    println!(
        "{} <{}> role={} credits={} {status}",
        session.name, session.email, session.role, session.credits
    );
}

fn run_admin(store: &JsonSessionStore, command: AdminCommand) -> Result<i32> {
    let actor = require_session(store)?;
    match command {
        AdminCommand::Users => {
            for session in store.list_users(&actor)? {
                print_session(&session);
            }
        }
        AdminCommand::Enable { email } => {
            let session = store.set_enabled(&actor, &email, true)?;
            println!("Enabled {}.", session.email);
        }
        AdminCommand::Disable { email } => {
            let session = store.set_enabled(&actor, &email, false)?;
            println!("Disabled {}.", session.email);
        }
        AdminCommand::Grant { email, credits } => {
            let session = store.grant_credits(&actor, &email, credits)?;
            println!("{} now has {} credits.", session.email, session.credits);
        }
    }
    Ok(0)
}

fn open_editor(
    config: &EngineConfig,
    store: JsonSessionStore,
    out_dir: &Path,
    events: Option<PathBuf>,
    image_model: Option<&str>,
) -> Result<Editor> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let (client, selection) = GenerationClient::from_config(config, image_model)?;
    if let (Some(requested), Some(reason)) = (
        selection.requested.as_deref(),
        selection.fallback_reason.as_deref(),
    ) {
        println!("{reason} Using {} instead of {requested}.", selection.model.name);
    }
    let events_path = events.unwrap_or_else(|| out_dir.join("events.jsonl"));
    let session_id = format!("edit-{}", Utc::now().timestamp_millis());
    Ok(Editor::new(
        client,
        Arc::new(store),
        EventWriter::new(events_path, session_id),
    ))
}

fn run_apply(config: &EngineConfig, store: JsonSessionStore, args: ApplyArgs) -> Result<i32> {
    let kind: OperationKind = args.op.parse()?;
    let hotspot = match (args.x, args.y) {
        (Some(x), Some(y)) => Some(Hotspot::new(x, y)),
        (None, None) => None,
        _ => bail!("--x and --y must be given together"),
    };
    let second = args.second.as_deref().map(load_image).transpose()?;
    let request = build_request(
        kind,
        args.prompt,
        hotspot,
        second,
        args.direction.as_deref(),
    )?;

    let editor = open_editor(
        config,
        store,
        &args.out,
        args.events,
        args.image_model.as_deref(),
    )?;
    editor.load_image(load_image(&args.image)?)?;
    let result = editor.submit(request);
    let code = match &result {
        Ok(_) => 0,
        Err(err) if err.is_paywall() => EXIT_PAYWALL,
        Err(_) => 1,
    };
    report_outcome(kind.as_str(), &args.out, result)?;
    finish_session(&editor, &args.out)?;
    Ok(code)
}

/// Builds a request from one-shot flags; the editor re-validates prompt text.
fn build_request(
    kind: OperationKind,
    prompt: String,
    hotspot: Option<Hotspot>,
    second: Option<ImageVersion>,
    direction: Option<&str>,
) -> Result<GenerationRequest> {
    let request = match kind {
        OperationKind::Edit => GenerationRequest::Edit {
            hotspot: hotspot.ok_or(InvalidInput::MissingHotspot)?,
            prompt,
        },
        OperationKind::Filter => GenerationRequest::Filter { prompt },
        OperationKind::Adjust => GenerationRequest::Adjust { prompt },
        OperationKind::Combine => GenerationRequest::Combine {
            second_image: second.ok_or(InvalidInput::MissingSecondImage)?,
            prompt,
        },
        OperationKind::Expand => {
            let Some(direction) = direction else {
                bail!("--direction is required for expand");
            };
            GenerationRequest::Expand {
                direction: direction.parse::<ExpandDirection>()?,
                prompt,
            }
        }
    };
    Ok(request)
}

fn version_path(out_dir: &Path, version: &ImageVersion) -> PathBuf {
    out_dir.join(format!(
        "{}.{}",
        version.name,
        extension_for_mime(&version.mime_type)
    ))
}

fn save_version(out_dir: &Path, version: &ImageVersion) -> Result<PathBuf> {
    let path = version_path(out_dir, version);
    save_image(version, &path)?;
    Ok(path)
}

fn report_outcome(
    operation: &str,
    out_dir: &Path,
    result: Result<SubmitOutcome, EditError>,
) -> Result<()> {
    match result {
        Ok(SubmitOutcome::Committed {
            version,
            credits_remaining,
        }) => {
            let path = save_version(out_dir, &version)?;
            println!(
                "{operation}: saved {} ({credits_remaining} credits left)",
                path.display()
            );
        }
        Ok(SubmitOutcome::Discarded) => {
            println!("{operation}: result discarded, the image changed while it was generating");
        }
        Err(err) if err.is_paywall() => {
            println!("{err}. Buy more with `retouch buy starter|pro|studio`.");
        }
        Err(err) => println!("{operation} failed: {err}"),
    }
    Ok(())
}

fn finish_session(editor: &Editor, out_dir: &Path) -> Result<()> {
    let summary = editor.finish()?;
    let mut extra = Map::new();
    if let Ok(client) = editor.client() {
        extra.insert("model".to_string(), Value::String(client.model().to_string()));
    }
    write_summary(&out_dir.join("summary.json"), &summary, Some(&extra))?;
    Ok(())
}

fn run_edit(config: &EngineConfig, store: JsonSessionStore, args: EditArgs) -> Result<i32> {
    let editor = open_editor(
        config,
        store,
        &args.out,
        args.events.clone(),
        args.image_model.as_deref(),
    )?;
    if let Some(path) = args.image.as_deref() {
        let image = load_image(path)?;
        println!("Loaded {}", image.name);
        editor.load_image(image)?;
    }

    let stdin = io::stdin();
    let mut line = String::new();
    println!("Retouch editor started. Type /help for commands.");

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

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        if intent.action == "quit" {
            break;
        }
        handle_intent(config, &editor, &args.out, &intent)?;
    }

    finish_session(&editor, &args.out)?;
    println!("Session summary written to {}", args.out.join("summary.json").display());
    Ok(0)
}

fn handle_intent(
    config: &EngineConfig,
    editor: &Editor,
    out_dir: &Path,
    intent: &Intent,
) -> Result<()> {
    let prompt = intent.prompt.clone().unwrap_or_default();
    match intent.action.as_str() {
        "noop" => {}
        "help" => println!("Commands: {}", EDITOR_HELP_COMMANDS.join(" ")),
        "set_image_model" => {
            let requested = intent.arg_str("model").map(str::trim).unwrap_or_default();
            if requested.is_empty() {
                println!("Image model: {}", editor.client()?.model());
                return Ok(());
            }
            let (client, selection) = GenerationClient::from_config(config, Some(requested))?;
            if let Some(reason) = selection.fallback_reason.as_deref() {
                println!("{reason}");
            }
            println!("Image model set to {}", client.model());
            editor.set_client(client)?;
        }
        "open" => {
            let Some(path) = intent.arg_str("path") else {
                return Ok(());
            };
            match load_image(Path::new(path)) {
                Ok(image) => {
                    println!("Loaded {}", image.name);
                    editor.load_image(image)?;
                }
                Err(err) => println!("Open failed: {err:#}"),
            }
        }
        "save" => {
            let Some(path) = intent.arg_str("path") else {
                return Ok(());
            };
            match editor.current()? {
                Some(version) => {
                    save_image(&version, Path::new(path))?;
                    println!("Saved {} to {path}", version.name);
                }
                None => println!("{}", InvalidInput::NoImageLoaded),
            }
        }
        "set_hotspot" => match point(intent) {
            Some((x, y)) => match editor.set_hotspot(x, y) {
                Ok(hotspot) => println!("Hotspot set to ({}, {})", hotspot.x, hotspot.y),
                Err(err) => println!("{err}"),
            },
            None => println!("/hotspot needs x and y"),
        },
        "edit" => {
            let Some((x, y)) = point(intent) else {
                println!("/edit needs x and y");
                return Ok(());
            };
            let result = editor.submit(GenerationRequest::Edit {
                hotspot: Hotspot::new(x, y),
                prompt,
            });
            report_outcome("edit", out_dir, result)?;
        }
        "edit_at_hotspot" => {
            report_outcome("edit", out_dir, editor.edit_at_hotspot(&prompt))?;
        }
        "filter" => {
            let result = editor.submit(GenerationRequest::Filter { prompt });
            report_outcome("filter", out_dir, result)?;
        }
        "adjust" => {
            let result = editor.submit(GenerationRequest::Adjust { prompt });
            report_outcome("adjust", out_dir, result)?;
        }
        "combine" => {
            let Some(path) = intent.arg_str("path") else {
                return Ok(());
            };
            let second = match load_image(Path::new(path)) {
                Ok(second) => second,
                Err(err) => {
                    println!("Combine failed: {err:#}");
                    return Ok(());
                }
            };
            let result = editor.submit(GenerationRequest::Combine {
                second_image: second,
                prompt,
            });
            report_outcome("combine", out_dir, result)?;
        }
        "expand" => {
            let raw = intent.arg_str("direction").unwrap_or_default();
            let direction = match raw.parse::<ExpandDirection>() {
                Ok(direction) => direction,
                Err(err) => {
                    println!("{err}");
                    return Ok(());
                }
            };
            let result = editor.submit(GenerationRequest::Expand { direction, prompt });
            report_outcome("expand", out_dir, result)?;
        }
        "crop" => {
            let rect = match (
                intent.arg_u32("x"),
                intent.arg_u32("y"),
                intent.arg_u32("width"),
                intent.arg_u32("height"),
            ) {
                (Some(x), Some(y), Some(width), Some(height)) => CropRect::new(x, y, width, height),
                _ => {
                    println!("{}", InvalidInput::MissingCropSelection);
                    return Ok(());
                }
            };
            match editor.crop(rect) {
                Ok(version) => {
                    let path = save_version(out_dir, &version)?;
                    println!("crop: saved {}", path.display());
                }
                Err(err) => println!("crop failed: {err}"),
            }
        }
        "undo" => {
            if !editor.undo()? {
                println!("Nothing to undo.");
            }
            print_current(editor)?;
        }
        "redo" => {
            if !editor.redo()? {
                println!("Nothing to redo.");
            }
            print_current(editor)?;
        }
        "reset_to_original" => {
            editor.reset_to_original()?;
            print_current(editor)?;
        }
        "history" => {
            let history = editor.history()?;
            if history.is_empty() {
                println!("{}", InvalidInput::NoImageLoaded);
            }
            for (idx, version) in history.versions().iter().enumerate() {
                let marker = if history.index() == Some(idx) { "*" } else { " " };
                println!(
                    "{marker} {idx}: {} ({}, {} bytes, {})",
                    version.name,
                    version.mime_type,
                    version.len(),
                    version.digest
                );
            }
        }
        "credits" => match editor.session()? {
            Some(session) => print_session(&session),
            None => println!("Not signed in."),
        },
        "invalid" => {
            println!(
                "{}",
                intent.arg_str("error").unwrap_or("Invalid command arguments")
            );
        }
        "unknown" => {
            println!(
                "Unknown command: /{}",
                intent.arg_str("command").unwrap_or_default()
            );
        }
        other => {
            let payload = json!({ "action": other, "raw": intent.raw });
            println!("Unhandled input: {payload}");
        }
    }
    Ok(())
}

fn point(intent: &Intent) -> Option<(u32, u32)> {
    Some((intent.arg_u32("x")?, intent.arg_u32("y")?))
}

fn print_current(editor: &Editor) -> Result<()> {
    let history = editor.history()?;
    match (history.current(), history.index()) {
        (Some(version), Some(index)) => println!(
            "Current: {} ({}/{})",
            version.name,
            index + 1,
            history.len()
        ),
        _ => println!("{}", InvalidInput::NoImageLoaded),
    }
    Ok(())
}
