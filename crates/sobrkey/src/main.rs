//! Sobrkey command line.
//!
//!   sobrkey journal write "Grateful for today"
//!   sobrkey check-in && sobrkey streak
//!   sobrkey meeting watch aa-newcomers
//!   sobrkey community post "Thirty days" --tag milestone
//!   sobrkey alert "Please call me" --lat 52.52 --lon 13.405

use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use nostr_client::NostrClient;
use sobrkey::config::{CONFIG_FILE, default_config_dir};
use sobrkey::constants::{DATE_FORMAT, MEETINGS};
use sobrkey::{
    CommunityPost, Config, DirectMessage, FileKeyStore, MeetingMessage, RelaySettings,
    SecureKeyStore, Sobrkey, TrustedContacts, compose_alert_message, identity, load_config, today,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// When set, the key store file is encrypted with this passphrase.
const PASSPHRASE_ENV: &str = "SOBRKEY_PASSPHRASE";

#[derive(Parser)]
#[command(name = "sobrkey")]
#[command(about = "Private recovery journal, check-ins, meetings and emergency alerts over Nostr")]
struct Args {
    /// Config file (default: ~/.sobrkey/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Relay URL for this run only (repeat or comma-delimit)
    #[arg(long = "relay", value_delimiter = ',', global = true)]
    relays: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the identity public key, creating one if needed
    Whoami,
    /// Replace the identity with a 64-character hex secret key
    ImportKey { secret_key: String },
    /// Print the identity's secret and public key for backup
    ExportKey,
    /// Manage saved relays
    Relays {
        #[command(subcommand)]
        command: RelayCommand,
    },
    /// Manage trusted contacts
    Contacts {
        #[command(subcommand)]
        command: ContactCommand,
    },
    /// Private journal
    Journal {
        #[command(subcommand)]
        command: JournalCommand,
    },
    /// Record today's check-in
    CheckIn,
    /// List check-ins (yours, or another public key's)
    CheckIns {
        #[arg(long)]
        pubkey: Option<String>,
    },
    /// Show the current check-in streak
    Streak,
    /// Meeting rooms
    Meeting {
        #[command(subcommand)]
        command: MeetingCommand,
    },
    /// Public community feed
    Community {
        #[command(subcommand)]
        command: CommunityCommand,
    },
    /// Direct messages
    Dm {
        #[command(subcommand)]
        command: DmCommand,
    },
    /// Send an emergency alert to trusted contacts
    Alert {
        /// Message (a timestamped default is used when empty)
        #[arg(default_value = "")]
        message: String,
        #[arg(long, requires = "lon")]
        lat: Option<f64>,
        #[arg(long, requires = "lat")]
        lon: Option<f64>,
        /// Recipients instead of the trusted contacts (comma-delimited)
        #[arg(long = "to", value_delimiter = ',')]
        to: Vec<String>,
    },
}

#[derive(Subcommand)]
enum RelayCommand {
    List,
    Add { url: String },
    Remove { url: String },
    /// Go back to the default relays
    Reset,
}

#[derive(Subcommand)]
enum ContactCommand {
    List,
    Add { pubkey: String },
    Remove { pubkey: String },
}

#[derive(Subcommand)]
enum JournalCommand {
    Write {
        text: String,
        /// Entry date, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<String>,
    },
    List,
    Show { date: String },
}

#[derive(Subcommand)]
enum MeetingCommand {
    /// List the built-in meeting rooms
    Rooms,
    Read { meeting_id: String },
    Send { meeting_id: String, text: String },
    /// Print new messages until Ctrl-C
    Watch { meeting_id: String },
}

#[derive(Subcommand)]
enum CommunityCommand {
    Post {
        text: String,
        /// Extra hashtag (repeat or comma-delimit)
        #[arg(long = "tag", value_delimiter = ',')]
        tags: Vec<String>,
    },
    List {
        /// Only posts from the last N days (0 for all)
        #[arg(long, default_value_t = 0)]
        days: u32,
    },
    /// Print new posts until Ctrl-C
    Watch,
}

#[derive(Subcommand)]
enum DmCommand {
    Send { pubkey: String, text: String },
    List {
        /// Only the conversation with this public key
        #[arg(long = "with")]
        with: Option<String>,
    },
    /// Print new messages from a public key until Ctrl-C
    Watch { pubkey: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => default_config_dir()?.join(CONFIG_FILE),
    };
    let config = load_config(&config_path)?;
    let config_dir = config_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let key_store_path = config.key_store_path(&config_dir);
    let store: Arc<dyn SecureKeyStore> = match std::env::var(PASSPHRASE_ENV) {
        Ok(passphrase) if !passphrase.is_empty() => {
            Arc::new(FileKeyStore::encrypted(key_store_path, passphrase))
        }
        _ => Arc::new(FileKeyStore::new(key_store_path)),
    };

    // Identity and settings commands work offline.
    let command = match args.command {
        Command::Whoami => {
            let keys = identity::load_or_generate(store.as_ref())?;
            println!("{}", keys.public_key_hex());
            return Ok(());
        }
        Command::ImportKey { secret_key } => {
            let keys = identity::import_secret_key(store.as_ref(), &secret_key)?;
            println!("Imported {}", keys.public_key_hex());
            return Ok(());
        }
        Command::ExportKey => {
            let (secret_key, public_key) = identity::export_identity(store.as_ref())?;
            println!("secret key: {}", secret_key);
            println!("public key: {}", public_key);
            return Ok(());
        }
        Command::Relays { command } => return relays(RelaySettings::new(store), command),
        Command::Contacts { command } => return contacts(TrustedContacts::new(store), command),
        command => command,
    };

    let app = open(&config, store, &args.relays).await?;
    app.connect().await.context("no relay reachable")?;
    let result = run(&app, command).await;
    app.disconnect().await;
    result
}

async fn open(
    config: &Config,
    store: Arc<dyn SecureKeyStore>,
    relays: &[String],
) -> Result<Sobrkey> {
    if relays.is_empty() {
        return Ok(Sobrkey::open(config, store).await?);
    }
    let keys = identity::load_or_generate(store.as_ref())?;
    let client = NostrClient::new(Arc::new(keys), relays, config.to_pool_config()).await?;
    Ok(Sobrkey::with_client(client, store))
}

fn relays(settings: RelaySettings, command: RelayCommand) -> Result<()> {
    match command {
        RelayCommand::List => {}
        RelayCommand::Add { url } => {
            if !settings.add(&url)? {
                println!("{} is already saved", url);
            }
        }
        RelayCommand::Remove { url } => {
            if !settings.remove(&url)? {
                println!("{} is not saved", url);
            }
        }
        RelayCommand::Reset => settings.reset()?,
    }
    for relay in settings.list()? {
        println!("{}", relay);
    }
    Ok(())
}

fn contacts(contacts: TrustedContacts, command: ContactCommand) -> Result<()> {
    match command {
        ContactCommand::List => {}
        ContactCommand::Add { pubkey } => {
            if !contacts.add(&pubkey)? {
                println!("Already trusted");
            }
        }
        ContactCommand::Remove { pubkey } => {
            if !contacts.remove(&pubkey)? {
                println!("Not a trusted contact");
            }
        }
    }
    for contact in contacts.list()? {
        println!("{}", contact);
    }
    Ok(())
}

fn parse_date(date: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date, DATE_FORMAT)
        .with_context(|| format!("invalid date {:?}, expected YYYY-MM-DD", date))
}

fn short(pubkey: &str) -> &str {
    pubkey.get(..8).unwrap_or(pubkey)
}

fn print_meeting_message(message: &MeetingMessage) {
    println!(
        "[{}] {}: {}",
        message.event.created_at,
        short(message.author()),
        message.text()
    );
}

fn print_community_post(post: &CommunityPost) {
    let hashtags: String = post
        .hashtags()
        .iter()
        .map(|name| format!(" #{}", name))
        .collect();
    println!(
        "[{}] {}: {}{}",
        post.event.created_at,
        short(post.author()),
        post.text(),
        hashtags
    );
}

fn print_direct_message(message: &DirectMessage) {
    let arrow = if message.outgoing { "->" } else { "<-" };
    let alert = if message.is_emergency() { " [EMERGENCY]" } else { "" };
    println!(
        "[{}] {} {}{}: {}",
        message.event.created_at,
        arrow,
        short(message.peer().unwrap_or("?")),
        alert,
        message.display_text()
    );
}

async fn wait_for_ctrl_c() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")
}

async fn run(app: &Sobrkey, command: Command) -> Result<()> {
    match command {
        Command::Journal { command } => match command {
            JournalCommand::Write { text, date } => {
                let event = match date {
                    Some(date) => app.save_journal_entry_for(parse_date(&date)?, &text).await?,
                    None => app.save_journal_entry(&text).await?,
                };
                println!("Saved {}", event.id);
            }
            JournalCommand::List => {
                for entry in app.journal_entries().await? {
                    let date = entry
                        .date
                        .map(|d| d.format(DATE_FORMAT).to_string())
                        .unwrap_or_default();
                    println!("{}  {}", date, entry.display_text());
                }
            }
            JournalCommand::Show { date } => {
                match app.journal_entry_for_date(parse_date(&date)?).await? {
                    Some(entry) => println!("{}", entry.display_text()),
                    None => println!("No entry for {}", date),
                }
            }
        },
        Command::CheckIn => {
            app.daily_check_in().await?;
            println!("Checked in. Streak: {}", app.check_in_streak(today()).await?);
        }
        Command::CheckIns { pubkey } => {
            for check_in in app.check_ins(pubkey.as_deref()).await? {
                let date = check_in
                    .date
                    .map(|d| d.format(DATE_FORMAT).to_string())
                    .unwrap_or_default();
                match check_in.content.text() {
                    Some(text) => println!("{}  {}", date, text),
                    None => println!("{}", date),
                }
            }
        }
        Command::Streak => println!("{}", app.check_in_streak(today()).await?),
        Command::Meeting { command } => match command {
            MeetingCommand::Rooms => {
                for (id, name) in MEETINGS {
                    println!("{:<24} {}", id, name);
                }
            }
            MeetingCommand::Read { meeting_id } => {
                let messages = app.meeting_messages(&meeting_id).await?;
                for message in messages.iter().rev() {
                    print_meeting_message(message);
                }
            }
            MeetingCommand::Send { meeting_id, text } => {
                let event = app.send_meeting_message(&meeting_id, &text).await?;
                println!("Sent {}", event.id);
            }
            MeetingCommand::Watch { meeting_id } => {
                let subscription = app
                    .subscribe_meeting(&meeting_id, |message| print_meeting_message(&message))
                    .await?;
                wait_for_ctrl_c().await?;
                subscription.unsubscribe().await?;
            }
        },
        Command::Community { command } => match command {
            CommunityCommand::Post { text, tags } => {
                let event = app.post_note(&text, &tags).await?;
                println!("Posted {}", event.id);
            }
            CommunityCommand::List { days } => {
                let posts = app.community_posts(days).await?;
                for post in posts.iter().rev() {
                    print_community_post(post);
                }
            }
            CommunityCommand::Watch => {
                let subscription = app
                    .subscribe_community(|post| print_community_post(&post))
                    .await?;
                wait_for_ctrl_c().await?;
                subscription.unsubscribe().await?;
            }
        },
        Command::Dm { command } => match command {
            DmCommand::Send { pubkey, text } => {
                let event = app.send_direct_message(&pubkey, &text).await?;
                println!("Sent {}", event.id);
            }
            DmCommand::List { with } => {
                let messages = app.direct_messages(with.as_deref()).await?;
                for message in messages.iter().rev() {
                    print_direct_message(message);
                }
            }
            DmCommand::Watch { pubkey } => {
                let subscription = app
                    .subscribe_direct_messages(&pubkey, |message| print_direct_message(&message))
                    .await?;
                wait_for_ctrl_c().await?;
                subscription.unsubscribe().await?;
            }
        },
        Command::Alert { message, lat, lon, to } => {
            let location = lat.zip(lon);
            let text = compose_alert_message(&message, location, Utc::now());
            let report = if to.is_empty() {
                app.send_emergency_alert_to_trusted(&text).await?
            } else {
                app.send_emergency_alert(&text, &to).await?
            };
            println!("Alert delivered to {} contact(s)", report.delivered.len());
            for (contact, reason) in &report.failed {
                println!("  failed {}: {}", short(contact), reason);
            }
        }
        Command::Whoami
        | Command::ImportKey { .. }
        | Command::ExportKey
        | Command::Relays { .. }
        | Command::Contacts { .. } => bail!("command does not need a relay connection"),
    }
    Ok(())
}
