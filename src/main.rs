mod clock;
mod config;
mod csv;
mod gateway;
mod models;
mod query;
mod store;
mod tui;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use clock::SystemClock;
use config::Config;
use csv::Dialect;
use gateway::{Gateway, SqliteStore};
use models::{format_date, Application, Field, Platform, Status};
use query::{Filter, SortKey, SortOrder, ViewState};
use store::ApplicationStore;

#[derive(Parser)]
#[command(name = "jobtrack")]
#[command(about = "Job application tracker - record, filter and follow up on applications")]
struct Cli {
    /// Database file (overrides JOBTRACK_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a new application
    Add {
        #[arg(short, long)]
        company: String,

        #[arg(short, long)]
        position: String,

        /// Remote, Hybrid, On-site - Lagos, On-site - Ibadan, On-site - Abuja, International Remote, Other
        #[arg(short, long)]
        location: Option<String>,

        /// LinkedIn, Upwork, Indeed, Company Website, Referral, Recruiter Contact, Other
        #[arg(long)]
        platform: Option<String>,

        /// Date applied (YYYY-MM-DD, default today)
        #[arg(short, long)]
        date: Option<String>,

        #[arg(short, long)]
        status: Option<String>,

        #[arg(long)]
        salary: Option<String>,

        /// Job posting URL
        #[arg(short, long)]
        url: Option<String>,

        #[arg(long)]
        contact: Option<String>,

        /// CV version sent (Support, Infrastructure, Custom)
        #[arg(long)]
        cv: Option<String>,

        /// Follow-up date (YYYY-MM-DD)
        #[arg(short, long)]
        follow_up: Option<String>,

        #[arg(short, long)]
        notes: Option<String>,
    },

    /// List applications
    List {
        /// Filter by status ("All" for everything)
        #[arg(short, long)]
        status: Option<String>,

        /// Filter by platform ("All" for everything)
        #[arg(short, long)]
        platform: Option<String>,

        /// Search company, position and notes
        #[arg(short = 'q', long)]
        search: Option<String>,

        /// dateApplied, company, status or followUpDate
        #[arg(long, default_value = "dateApplied")]
        sort: String,

        /// Sort ascending instead of descending
        #[arg(long)]
        asc: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show application details
    Show {
        /// Application ID
        id: i64,
    },

    /// Change one field of an application
    Set {
        /// Application ID
        id: i64,

        /// Field name (company, position, location, platform, dateApplied, status,
        /// salary, jobUrl, contactPerson, cvVersion, followUpDate, notes)
        field: String,

        /// New value (empty clears optional fields)
        value: String,
    },

    /// Mark an application as reviewed today without changing it
    Touch {
        /// Application ID
        id: i64,
    },

    /// Delete an application
    Delete {
        /// Application ID
        id: i64,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Import applications from a CSV export
    Import {
        /// CSV file
        file: PathBuf,

        /// Read the legacy format (split on every comma)
        #[arg(long)]
        legacy: bool,
    },

    /// Export applications to CSV
    Export {
        /// Output file ("-" for stdout, default job_applications_<date>.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the legacy format (only notes are quoted)
        #[arg(long)]
        legacy: bool,
    },

    /// Show statistics
    Stats {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// List applications due for a follow-up
    Followups,

    /// Browse applications interactively
    Browse {
        /// Initial status filter
        #[arg(short, long)]
        status: Option<String>,

        /// Initial platform filter
        #[arg(short, long)]
        platform: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env();
    init_tracing(&config.log_filter)?;

    let db_path = cli.db.clone().unwrap_or_else(|| config.db_path.clone());
    let backend = SqliteStore::open(&db_path)?;
    debug!(path = %backend.path().display(), "Opened database");

    let gateway = Arc::new(Gateway::new(Arc::new(backend)));
    let mut store = ApplicationStore::load(gateway, Arc::new(SystemClock), config.debounce).await;

    let result = tokio::task::block_in_place(|| run(cli.command, &mut store));

    store.flush().await;
    for event in store.poll_events() {
        if let Some(warning) = event.warning() {
            eprintln!("Warning: {}", warning);
        }
    }

    result
}

fn init_tracing(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .or_else(|_| EnvFilter::try_new("warn"))
        .map_err(|e| anyhow!("invalid log filter: {}", e))?;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    Ok(())
}

fn run(command: Commands, store: &mut ApplicationStore) -> Result<()> {
    match command {
        Commands::Add {
            company,
            position,
            location,
            platform,
            date,
            status,
            salary,
            url,
            contact,
            cv,
            follow_up,
            notes,
        } => {
            let mut draft = store.draft();
            draft.company = company;
            draft.position = position;

            let optional = [
                (Field::Location, location),
                (Field::Platform, platform),
                (Field::DateApplied, date),
                (Field::Status, status),
                (Field::Salary, salary),
                (Field::JobUrl, url),
                (Field::ContactPerson, contact),
                (Field::CvVersion, cv),
                (Field::FollowUpDate, follow_up),
                (Field::Notes, notes),
            ];
            for (field, value) in optional {
                if let Some(value) = value {
                    draft.set_field(field, &value)?;
                }
            }

            match store.add(draft) {
                Some(id) => println!("Added application #{}", id),
                None => println!("Company and position are required. Nothing added."),
            }
        }

        Commands::List {
            status,
            platform,
            search,
            sort,
            asc,
            json,
        } => {
            let view = ViewState {
                status: parse_filter(status.as_deref(), Status::parse, "status")?,
                platform: parse_filter(platform.as_deref(), Platform::parse, "platform")?,
                search: search.unwrap_or_default(),
                sort_by: sort.parse::<SortKey>().map_err(|e| anyhow!(e))?,
                order: if asc { SortOrder::Asc } else { SortOrder::Desc },
            };
            let rows = query::view(store.applications(), &view);

            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if rows.is_empty() {
                println!("No applications found.");
            } else {
                print_table(&rows);
                println!("\n{} of {} application(s)", rows.len(), store.len());
            }
        }

        Commands::Show { id } => match store.get(id) {
            Some(app) => print_details(app),
            None => println!("Application #{} not found.", id),
        },

        Commands::Set { id, field, value } => {
            let field: Field = field.parse()?;
            if store.update_field(id, field, &value)? {
                println!("Updated {} of application #{}.", field.name(), id);
            } else {
                println!("Application #{} not found.", id);
            }
        }

        Commands::Touch { id } => {
            if store.touch(id) {
                println!("Marked application #{} as updated today.", id);
            } else {
                println!("Application #{} not found.", id);
            }
        }

        Commands::Delete { id, yes } => {
            let Some(app) = store.get(id) else {
                println!("Application #{} not found.", id);
                return Ok(());
            };
            let prompt = format!(
                "Are you sure you want to delete #{} ({} - {})? [y/N] ",
                app.id, app.company, app.position
            );
            if !yes && !confirm(&prompt)? {
                println!("Kept application #{}.", id);
                return Ok(());
            }
            store.delete(id);
            println!("Deleted application #{}.", id);
        }

        Commands::Import { file, legacy } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read CSV file: {}", file.display()))?;
            let records = csv::import(&text, dialect(legacy), store.today());
            let count = store.import_batch(records);
            println!("Imported {} application(s).", count);
        }

        Commands::Export { output, legacy } => {
            let text = csv::export(store.applications(), dialect(legacy));
            match output {
                Some(path) if path.as_os_str() == "-" => println!("{}", text),
                output => {
                    let path =
                        output.unwrap_or_else(|| PathBuf::from(csv::export_file_name(store.today())));
                    std::fs::write(&path, &text)
                        .with_context(|| format!("Failed to write to {}", path.display()))?;
                    println!("Exported {} application(s) to {}", store.len(), path.display());
                }
            }
        }

        Commands::Stats { json } => {
            let stats = query::stats(store.applications(), store.today());
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
                if let Some(at) = store.last_sync() {
                    println!("\nLast saved: {}", at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"));
                }
            }
        }

        Commands::Followups => {
            let due = query::follow_ups_due(store.applications(), store.today());
            if due.is_empty() {
                println!("No follow-ups due.");
            } else {
                println!("{} application(s) need follow-up!", due.len());
                for app in due {
                    println!(
                        "  #{} {} - {} (due {}, {})",
                        app.id,
                        app.company,
                        app.position,
                        format_date(app.follow_up_date),
                        app.status
                    );
                }
            }
        }

        Commands::Browse { status, platform } => {
            let view = ViewState {
                status: parse_filter(status.as_deref(), Status::parse, "status")?,
                platform: parse_filter(platform.as_deref(), Platform::parse, "platform")?,
                ..ViewState::default()
            };
            tui::run_browse(store, view)?;
        }
    }

    Ok(())
}

fn dialect(legacy: bool) -> Dialect {
    if legacy {
        Dialect::Legacy
    } else {
        Dialect::Standard
    }
}

fn parse_filter<T>(value: Option<&str>, parse: fn(&str) -> Option<T>, what: &str) -> Result<Filter<T>> {
    match value.map(str::trim) {
        None | Some("") => Ok(Filter::All),
        Some(v) if v.eq_ignore_ascii_case("all") => Ok(Filter::All),
        Some(v) => parse(v)
            .map(Filter::Only)
            .ok_or_else(|| anyhow!("Unknown {} '{}'", what, v)),
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn print_table(rows: &[&Application]) {
    println!(
        "{:<18} {:<20} {:<22} {:<24} {:<16} {:<10} {:<10}",
        "ID", "STATUS", "COMPANY", "POSITION", "PLATFORM", "APPLIED", "FOLLOW-UP"
    );
    println!("{}", "-".repeat(126));
    for app in rows {
        println!(
            "{:<18} {:<20} {:<22} {:<24} {:<16} {:<10} {:<10}",
            app.id,
            truncate(app.status.label(), 20),
            truncate(&app.company, 22),
            truncate(&app.position, 24),
            truncate(app.platform_or_default().label(), 16),
            format_date(app.date_applied),
            format_date(app.follow_up_date),
        );
    }
}

fn print_details(app: &Application) {
    println!("Application #{}", app.id);
    for field in Field::ALL {
        if field == Field::Notes {
            continue;
        }
        let value = match field {
            Field::Platform => app.platform_or_default().to_string(),
            _ => app.field_value(field),
        };
        if !value.is_empty() {
            println!("{:<15} {}", format!("{}:", field.name()), value);
        }
    }
    println!("{:<15} {}", "lastUpdate:", format_date(app.last_update));
    if !app.notes.is_empty() {
        println!("\n--- Notes ---\n{}", textwrap::fill(&app.notes, 80));
    }
}

fn print_stats(stats: &query::Stats) {
    println!("Total:          {}", stats.total);
    println!("This week:      {}", stats.this_week);
    println!("This month:     {}", stats.this_month);
    println!("Interviews:     {}", stats.interview);
    println!("Response rate:  {}%", stats.response_rate);

    println!("\nBy status:");
    for (status, count) in &stats.by_status {
        println!("  {:<20} {}", status.label(), count);
    }

    let platforms = &stats.by_platform;
    println!("\nBy platform:");
    println!("  {:<20} {}", "LinkedIn", platforms.linkedin);
    println!("  {:<20} {}", "Upwork", platforms.upwork);
    println!("  {:<20} {}", "Indeed", platforms.indeed);
    println!("  {:<20} {}", "Company Website", platforms.company_website);
    println!("  {:<20} {}", "Other", platforms.other);
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_filter() {
        assert_eq!(parse_filter(None, Status::parse, "status").unwrap(), Filter::All);
        assert_eq!(parse_filter(Some("ALL"), Status::parse, "status").unwrap(), Filter::All);
        assert_eq!(
            parse_filter(Some("offer"), Status::parse, "status").unwrap(),
            Filter::Only(Status::Offer)
        );
        let err = parse_filter(Some("Myspace"), Platform::parse, "platform").unwrap_err();
        assert!(err.to_string().contains("Unknown platform 'Myspace'"));
    }

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate("Acme", 10), "Acme");
        assert_eq!(truncate("Société Générale Group", 10), "Société...");
    }

    #[test]
    fn test_add_arguments_parse() {
        let cli = Cli::try_parse_from([
            "jobtrack", "add", "-c", "Acme", "-p", "SRE", "--platform", "Upwork", "-f", "2024-11-01",
        ])
        .unwrap();
        match cli.command {
            Commands::Add {
                company,
                platform,
                follow_up,
                ..
            } => {
                assert_eq!(company, "Acme");
                assert_eq!(platform.as_deref(), Some("Upwork"));
                assert_eq!(follow_up.as_deref(), Some("2024-11-01"));
            }
            _ => panic!("expected add"),
        }
    }
}
