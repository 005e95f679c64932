mod settings;

use crate::settings::Settings;
use anyhow::{Context, bail};
use log::{info, warn};
use matchday_api::acquisition::{Acquisition, partition_periods};
use matchday_api::models::{SEASON, Season, TEAM, Team};
use matchday_api::pipeline::Session;
use matchday_api::store::{MemoryStore, Store};
use tracing_subscriber::EnvFilter;

#[derive(Debug, PartialEq)]
enum Command {
    Download {
        seasons: Vec<i32>,
        league: Option<String>,
        drop: bool,
    },
    Current {
        league: Option<String>,
    },
    Teams,
    Help,
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let command = match parse_args(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e}\n\n{}", usage_text());
            std::process::exit(2);
        }
    };

    match command {
        Command::Help => {
            println!("{}", usage_text());
            return Ok(());
        }
        Command::Version => {
            println!("matchday {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    better_panic::install();
    init_logging();
    let settings = Settings::load();

    match command {
        Command::Download { seasons, league, drop } => {
            download(&settings, &seasons, league.as_deref(), drop).await
        }
        Command::Current { league } => current(&settings, league.as_deref()).await,
        Command::Teams => teams(&settings),
        Command::Help | Command::Version => Ok(()),
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Command> {
    let mut args = args.into_iter();
    let Some(first) = args.next() else {
        return Ok(Command::Help);
    };

    let mut league = None;
    let mut drop = false;
    let mut seasons = Vec::new();
    let subcommand = first.clone();

    match first.as_str() {
        "-h" | "--help" => return Ok(Command::Help),
        "-V" | "--version" => return Ok(Command::Version),
        "download" | "current" | "teams" => {}
        other => bail!("Unknown command: {other}"),
    }

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-l" | "--league" => {
                let Some(key) = args.next() else {
                    bail!("{arg} needs a league key");
                };
                league = Some(key);
            }
            "-d" | "--drop" => drop = true,
            raw if subcommand == "download" => {
                let season = raw
                    .parse::<i32>()
                    .with_context(|| format!("invalid season year: {raw}"))?;
                seasons.push(season);
            }
            other => bail!("Unexpected argument: {other}"),
        }
    }

    match subcommand.as_str() {
        "download" if seasons.is_empty() => bail!("download needs at least one season year"),
        "download" => Ok(Command::Download { seasons, league, drop }),
        "current" => Ok(Command::Current { league }),
        _ => Ok(Command::Teams),
    }
}

fn usage_text() -> &'static str {
    "matchday - download OpenLigaDB seasons into a local match store

Usage:
  matchday download <year>... [--league <key>] [--drop]
  matchday current [--league <key>]
  matchday teams
  matchday --help
  matchday --version

Environment:
  MATCHDAY_API_URL       OpenLigaDB base URL (default https://www.openligadb.de/api)
  MATCHDAY_LEAGUE        League key (default bl1)
  MATCHDAY_STORE         Store snapshot path (default matchday.json)
  MATCHDAY_MAX_FETCHES   Seasons fetched in parallel (default 8)
  MATCHDAY_TIMEOUT_SECS  Per-request timeout (default 10)
  RUST_LOG               Log filter (default info)"
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn download(
    settings: &Settings,
    seasons: &[i32],
    league: Option<&str>,
    drop: bool,
) -> anyhow::Result<()> {
    if drop && settings.store_path.exists() {
        warn!("dropping store at {}", settings.store_path.display());
        std::fs::remove_file(&settings.store_path)
            .with_context(|| format!("removing {}", settings.store_path.display()))?;
    }

    let mut store = MemoryStore::open(&settings.store_path).context("opening the match store")?;
    let (fresh, skipped) = partition_periods(&store, seasons)?;
    if fresh.is_empty() {
        println!("All seasons already present, none will be downloaded.");
        return Ok(());
    }
    if !skipped.is_empty() {
        println!("Skipping {} as they are already present.", join_years(&skipped));
    }

    let league = league.unwrap_or(&settings.league);
    let acquisition = Acquisition::new(settings.client()).with_max_in_flight(settings.max_fetches);
    let mut session = Session::new(&mut store);
    let mut ingestion = acquisition.ingest(&fresh, Some(league));

    let mut count = 0usize;
    while let Some(next) = ingestion.next(&mut session).await {
        let game = next.context("downloading matches")?;
        session.add(game)?;
        count += 1;
        if count % 100 == 0 {
            info!("{count} matches downloaded");
        }
    }

    session.commit().context("committing the match store")?;
    println!("done: {count} matches from {}", join_years(&fresh));
    Ok(())
}

async fn current(settings: &Settings, league: Option<&str>) -> anyhow::Result<()> {
    let league = league.unwrap_or(&settings.league);
    let matchday = settings
        .client()
        .fetch_current_matchday(league)
        .await
        .with_context(|| format!("fetching the current matchday of {league}"))?;

    let season = matchday.season.map(|s| s.to_string()).unwrap_or_else(|| "?".into());
    println!(
        "{} season {season}: {} (matchday {})",
        matchday.league_name.as_deref().unwrap_or(league),
        matchday.group_name,
        matchday.group_order
    );
    Ok(())
}

fn teams(settings: &Settings) -> anyhow::Result<()> {
    let store = MemoryStore::open(&settings.store_path).context("opening the match store")?;

    let mut rows = Vec::new();
    for (_, entity) in store.all(&TEAM) {
        let team = Team::try_from(entity)?;
        let mut years = Vec::new();
        for season in &team.seasons {
            if let Some(entity) = store.get(*season) {
                years.push(Season::try_from(entity)?.year);
            }
        }
        years.sort_unstable();
        rows.push((team.name, years));
    }
    rows.sort();

    println!("{} teams across {} seasons", rows.len(), store.count(&SEASON));
    for (name, years) in rows {
        let years: Vec<String> = years.iter().map(i64::to_string).collect();
        println!("  {name:<32} {}", years.join(", "));
    }
    Ok(())
}

fn join_years(years: &[i32]) -> String {
    years.iter().map(i32::to_string).collect::<Vec<_>>().join(", ")
}
