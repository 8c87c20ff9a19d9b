use anyhow::{Context, Error, Result};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::io::{self, IsTerminal, Write};
use std::process::ExitCode;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use tracing_subscriber::EnvFilter;

use geolocate::{Config, Location, Manager, Unit};

/// Check if the error chain contains a broken pipe error.
#[inline(always)]
fn is_broken_pipe(err: &Error) -> bool {
    for cause in err.chain() {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::BrokenPipe {
                return true;
            }
        }
    }
    false
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[clap(
        long,
        global = true,
        value_name = "FILE",
        value_hint = clap::ValueHint::FilePath,
        env = "GEOLOCATION_CONFIG"
    )]
    config: Option<Utf8PathBuf>,

    /// Driver to use instead of the configured default
    #[clap(short, long, global = true, value_name = "DRIVER")]
    driver: Option<String>,

    /// Driver to try when the default one fails
    #[clap(long, global = true, value_name = "DRIVER")]
    fallback: Option<String>,

    /// Bypass the result cache
    #[clap(long, global = true)]
    no_cache: bool,

    /// Log filter, e.g. "debug" or "geolocate=trace" (default: RUST_LOG or warn)
    #[clap(long, global = true, value_name = "FILTER")]
    log_level: Option<String>,

    /// Use colors for table keys
    #[clap(short = 'C', long, global = true, value_enum, default_value_t = ArgsColorChoice::Auto)]
    color: ArgsColorChoice,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Display the location information for an IP address
    Locate {
        /// The IP address to locate
        ip: String,

        /// Print the record as JSON instead of a table
        #[clap(long)]
        json: bool,
    },
    /// Great-circle distance between two IP addresses
    Distance {
        from: String,
        to: String,

        /// km or mi
        #[clap(short, long, default_value = "km")]
        unit: Unit,
    },
    /// Remove every cached location
    ClearCache,
    /// List registered drivers
    ListDrivers,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, ValueEnum)]
enum ArgsColorChoice {
    Always,
    Never,
    Auto,
}

fn main() -> ExitCode {
    let err = match run_main() {
        Ok(code) => return code,
        Err(err) => err,
    };

    if is_broken_pipe(&err) {
        return ExitCode::SUCCESS;
    }

    if std::env::var("RUST_BACKTRACE").is_ok_and(|v| v == "1")
        && std::env::var("RUST_LIB_BACKTRACE").map_or(true, |v| v == "1")
    {
        let _ = writeln!(&mut io::stderr(), "Error: {:?}", err);
    } else {
        let _ = writeln!(&mut io::stderr(), "Error: {:#}", err);
    }

    ExitCode::FAILURE
}

fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid --log-level filter '{}'", level))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
    Ok(())
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path.as_std_path())
            .with_context(|| format!("failed to load configuration from {}", path))?,
        None => Config::default(),
    };
    config
        .apply_env_vars()
        .context("invalid configuration in environment")?;

    if let Some(driver) = &args.driver {
        config.driver = driver.clone();
    }
    if let Some(fallback) = &args.fallback {
        config.fallback_driver = Some(fallback.clone()).filter(|f| !f.is_empty());
    }
    if args.no_cache {
        config.cache.enabled = false;
    }
    Ok(config)
}

fn run_main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref())?;

    let colormode = match args.color {
        ArgsColorChoice::Auto => {
            if io::stdout().is_terminal() {
                ColorChoice::Always
            } else {
                ColorChoice::Never
            }
        }
        ArgsColorChoice::Always => ColorChoice::Always,
        ArgsColorChoice::Never => ColorChoice::Never,
    };

    let config = load_config(&args)?;
    let manager = Manager::new(config);
    let mut out = StandardStream::stdout(colormode);

    match args.command {
        Command::Locate { ip, json } => {
            let location = manager
                .locate(&ip)
                .with_context(|| format!("could not locate {}", ip))?;
            if json {
                serde_json::to_writer_pretty(&mut out, &location.to_map())?;
                writeln!(out)?;
            } else {
                write_table(&mut out, &location)?;
            }
        }
        Command::Distance { from, to, unit } => {
            let a = manager
                .locate(&from)
                .with_context(|| format!("could not locate {}", from))?;
            let b = manager
                .locate(&to)
                .with_context(|| format!("could not locate {}", to))?;
            writeln!(out, "{:.2} {}", a.distance_to(&b, unit), unit)?;
        }
        Command::ClearCache => {
            manager.flush_cache().context("failed to clear the cache")?;
            writeln!(out, "Geolocation cache cleared!")?;
        }
        Command::ListDrivers => {
            let config = manager.config();
            for name in manager.driver_names() {
                let mut marks = Vec::new();
                if name == config.driver {
                    marks.push("default");
                }
                if config.fallback_driver.as_deref() == Some(name) {
                    marks.push("fallback");
                }
                if marks.is_empty() {
                    writeln!(out, "{}", name)?;
                } else {
                    writeln!(out, "{} ({})", name, marks.join(", "))?;
                }
            }
        }
    }

    out.flush()?;
    Ok(ExitCode::SUCCESS)
}

/// Key/Value table with unset fields shown as N/A.
fn write_table<W: WriteColor>(out: &mut W, location: &Location) -> io::Result<()> {
    let map = location.to_map();
    let width = map.keys().map(String::len).max().unwrap_or(0).max("Key".len());

    let mut key_spec = ColorSpec::new();
    key_spec.set_fg(Some(Color::Green)).set_bold(true);

    out.set_color(ColorSpec::new().set_bold(true))?;
    write!(out, "{:<width$}", "Key", width = width)?;
    out.reset()?;
    writeln!(out, "  Value")?;

    for (key, value) in &map {
        out.set_color(&key_spec)?;
        write!(out, "{:<width$}", key, width = width)?;
        out.reset()?;
        writeln!(out, "  {}", display_value(value))?;
    }
    Ok(())
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "N/A".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
