// USAGE seisan_picker [--config picker.toml] <phases|noise|stations|pack> [options]

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rand::{rngs::StdRng, SeedableRng};
use std::{path::PathBuf, time::Instant};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use seisan_picker::{
    batch::{discover_source_files, BatchDriver},
    catalog::read_all_definitions,
    config::Config,
    noise::NoisePicker,
    pack,
    resolver::ArchiveResolver,
    stations::{load_stations, save_stations, PickIndex},
};

// ─────────────────────────────────────────────────────────────────────
// Simple timing helper
// ─────────────────────────────────────────────────────────────────────
fn timeit<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let t0 = Instant::now();
    let out = f();
    info!("{label:<20}{:?}", t0.elapsed());
    out
}

// ─────────────────────────────────────────────────────────────────────
// Command line
// ─────────────────────────────────────────────────────────────────────
fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%d.%m.%Y").map_err(|e| format!("expected DD.MM.YYYY: {e}"))
}

#[derive(Parser, Debug)]
#[command(name = "seisan_picker")]
#[command(about = "Slice SEISAN continuous archives around phase picks and noise triggers")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory to save picks into
    #[arg(short, long = "save", global = true)]
    save_dir: Option<PathBuf>,

    /// S-file database directory
    #[arg(short, long, global = true)]
    rea: Option<PathBuf>,

    /// Continuous archives directory
    #[arg(short, long, global = true)]
    archives: Option<PathBuf>,

    /// SEISAN.DEF file(s); repeat for several
    #[arg(short, long = "def", global = true)]
    definitions: Vec<PathBuf>,

    /// Logging level from 0 (errors) to 5 (everything)
    #[arg(long, global = true, value_parser = clap::value_parser!(u8).range(0..=5))]
    output_level: Option<u8>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Slice waveforms around the P and S picks of every S-file
    Phases {
        /// Rewrite events that already have output
        #[arg(long)]
        rewrite: bool,
    },
    /// Slice noise windows anchored on STA/LTA triggers
    Noise {
        /// Start date, DD.MM.YYYY
        #[arg(long, value_parser = parse_date)]
        start: Option<NaiveDate>,
        /// End date (exclusive), DD.MM.YYYY
        #[arg(short, long, value_parser = parse_date)]
        end: Option<NaiveDate>,
        /// Maximum number of noise picks
        #[arg(short, long)]
        max_picks: Option<usize>,
        /// Maximum random window offset, seconds
        #[arg(long)]
        offset: Option<u32>,
        /// Slice duration, seconds
        #[arg(long)]
        duration: Option<f64>,
        /// Stations list to pick from instead of scanning S-files
        #[arg(short, long)]
        load: Option<PathBuf>,
        /// Seed for the window offsets
        #[arg(long)]
        seed: Option<u64>,
    },
    /// List every station with at least one pick
    Stations {
        /// Where to write the list
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Pack saved pick groups into a CSV table
    Pack {
        /// Output CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Cli {
    /// Defaults, then the config file, then flags.
    fn config(&self) -> Result<Config> {
        let mut c = Config::load(self.config.as_deref())?;
        if let Some(p) = &self.save_dir     { c.save_dir = p.clone(); }
        if let Some(p) = &self.rea          { c.rea_path = p.clone(); }
        if let Some(p) = &self.archives     { c.archives_path = p.clone(); }
        if !self.definitions.is_empty()     { c.definitions = self.definitions.clone(); }
        if let Some(l) = self.output_level  { c.output_level = l; }

        match &self.command {
            Command::Phases { rewrite } => {
                if *rewrite {
                    c.batch.explicit_rewrite_duplicates = true;
                }
            }
            Command::Noise { start, end, max_picks, offset, duration, load, .. } => {
                if let Some(d) = start     { c.noise.start_date = *d; }
                if let Some(d) = end       { c.noise.end_date = *d; }
                if let Some(m) = max_picks { c.noise.max_noise_picks = *m; }
                if let Some(o) = offset    { c.slicing.slice_offset = *o; }
                if let Some(d) = duration  { c.slicing.slice_duration = *d; }
                if let Some(p) = load      { c.noise.stations_load_path = Some(p.clone()); }
            }
            Command::Stations { out } => {
                if let Some(p) = out { c.noise.stations_save_path = Some(p.clone()); }
            }
            Command::Pack { output } => {
                if let Some(p) = output { c.pack.output = p.clone(); }
            }
        }
        c.validate()?;
        Ok(c)
    }
}

fn init_tracing(output_level: u8) {
    let level = match output_level {
        0     => "error",
        1     => "warn",
        2 | 3 => "info",
        4     => "debug",
        _     => "trace",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| format!("seisan_picker={level}").into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn resolver(config: &Config) -> Result<ArchiveResolver> {
    let records = read_all_definitions(&config.definitions)?;
    info!(records = records.len(), "archive definitions read");
    Ok(ArchiveResolver::new(records, &config.archives_path))
}

// ─────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────
fn run_phases(config: &Config) -> Result<()> {
    let resolver = resolver(config)?;
    let files = timeit("discover", || discover_source_files(&config.rea_path))?;
    info!(files = files.len(), rea = %config.rea_path.display(), "S-files found");

    let mut driver = BatchDriver::new(config, &resolver)?;
    let summary = timeit("phases", || driver.run(&files))?;
    info!(?summary, "phase picking finished");
    Ok(())
}

fn run_noise(config: &Config, seed: Option<u64>) -> Result<()> {
    let resolver = resolver(config)?;
    let files = discover_source_files(&config.rea_path)?;
    let index = timeit("index picks", || PickIndex::from_files(&files));

    let stations = match &config.noise.stations_load_path {
        Some(p) => load_stations(p)?,
        None => {
            let s = index.stations();
            if let Some(p) = &config.noise.stations_save_path {
                save_stations(p, &s)?;
            }
            s
        }
    };
    info!(stations = stations.len(), "noise stations");

    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None    => StdRng::from_entropy(),
    };
    let mut picker = NoisePicker::new(config, &resolver, &index, stations)?;
    let summary = timeit("noise", || picker.run(&mut rng))?;
    info!(?summary, "noise picking finished");
    Ok(())
}

fn run_stations(config: &Config) -> Result<()> {
    let files = discover_source_files(&config.rea_path)?;
    let stations = PickIndex::from_files(&files).stations();
    match &config.noise.stations_save_path {
        Some(p) => save_stations(p, &stations)?,
        None    => stations.iter().for_each(|s| println!("{s}")),
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────
fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config().context("cannot build configuration")?;
    init_tracing(config.output_level);

    match &cli.command {
        Command::Phases { .. }        => run_phases(&config),
        Command::Noise { seed, .. }   => run_noise(&config, *seed),
        Command::Stations { .. }      => run_stations(&config),
        Command::Pack { .. }          => timeit("pack", || pack::pack(&config)).map(|_| ()),
    }
}
