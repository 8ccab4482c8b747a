use anyhow::{bail, Context, Result};
use chrono::{Local, Utc};
use clap::{Args, Parser, Subcommand};
use rollcall_hw::{Camera, SerialThermometer, TemperatureSensor};
use rollcall_store::{AttendanceFilter, Store};
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "rollcall", about = "rollcall attendance station CLI")]
struct Cli {
    /// SQLite database (default: $ROLLCALL_DB_PATH or $XDG_DATA_HOME/rollcall/rollcall.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a person; faces are enrolled through the daemon
    Add {
        name: String,
        /// External reference such as a staff or student number
        #[arg(short, long)]
        reference: Option<String>,
    },
    /// Change a person's name or reference
    Edit {
        id: i64,
        #[arg(short, long)]
        name: Option<String>,
        /// New reference; an empty string clears it
        #[arg(short, long)]
        reference: Option<String>,
    },
    /// List registered people
    List {
        #[arg(long)]
        json: bool,
    },
    /// Remove a person and their attendance history
    Remove { id: i64 },
    /// Show attendance: the latest record per person, or every record with --all
    Attendance {
        #[arg(long)]
        all: bool,
        #[arg(long)]
        json: bool,
    },
    /// Export every attendance record as CSV
    Export {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete attendance records
    Purge(PurgeArgs),
    /// Take one reading from the serial thermometer
    Temp {
        #[arg(long, default_value = "/dev/ttyACM0")]
        port: String,
        #[arg(long, default_value_t = 9600)]
        baud: u32,
    },
    /// List V4L2 capture devices
    Devices,
    /// Capture a few frames to check the camera works
    Test {
        #[arg(long, default_value = "/dev/video0")]
        device: String,
        #[arg(long, default_value_t = 10)]
        frames: usize,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct PurgeArgs {
    /// Every record
    #[arg(long)]
    all: bool,
    /// Records since midnight UTC
    #[arg(long)]
    today: bool,
    /// Records of one person
    #[arg(long, value_name = "ID")]
    identity: Option<i64>,
}

impl PurgeArgs {
    fn filter(&self) -> Result<AttendanceFilter> {
        if self.all {
            return Ok(AttendanceFilter::All);
        }
        if self.today {
            let midnight = Utc::now()
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .context("invalid midnight")?
                .and_utc();
            return Ok(AttendanceFilter::Since(midnight));
        }
        match self.identity {
            Some(id) => Ok(AttendanceFilter::Identity(id)),
            None => bail!("choose one of --all, --today or --identity"),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = cli.db.clone().unwrap_or_else(rollcall_store::default_db_path);
    let open_store = || {
        Store::open(&db_path).with_context(|| format!("opening database {}", db_path.display()))
    };
    let mut out = std::io::stdout().lock();

    match cli.command {
        Commands::Add { name, reference } => add(&open_store()?, &name, reference.as_deref(), &mut out)?,
        Commands::Edit { id, name, reference } => {
            edit(&open_store()?, id, name.as_deref(), reference.as_deref(), &mut out)?
        }
        Commands::List { json } => list(&open_store()?, json, &mut out)?,
        Commands::Remove { id } => {
            if !open_store()?.delete_identity(id)? {
                bail!("no identity with id {id}");
            }
            writeln!(out, "Removed identity {id}")?;
        }
        Commands::Attendance { all, json } => attendance(&open_store()?, all, json, &mut out)?,
        Commands::Export { output } => {
            let rows = open_store()?.report()?;
            match output {
                Some(path) => {
                    let file = std::fs::File::create(&path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    rollcall_store::write_csv(&rows, &Local, std::io::BufWriter::new(file))?;
                    eprintln!("Exported {} records to {}", rows.len(), path.display());
                }
                None => rollcall_store::write_csv(&rows, &Local, &mut out)?,
            }
        }
        Commands::Purge(args) => {
            let removed = open_store()?.purge(args.filter()?)?;
            writeln!(out, "Removed {removed} attendance records")?;
        }
        Commands::Temp { port, baud } => {
            let mut sensor = SerialThermometer::new(port, baud);
            let celsius = sensor.read_temperature()?;
            writeln!(out, "{celsius:.1} °C")?;
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                writeln!(out, "No capture devices found")?;
            }
            for dev in devices {
                writeln!(out, "{}\t{}\t{} ({})", dev.path, dev.name, dev.driver, dev.bus)?;
            }
        }
        Commands::Test { device, frames } => camera_test(&device, frames, &mut out)?,
    }

    Ok(())
}

fn add(store: &Store, name: &str, reference: Option<&str>, out: &mut impl Write) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        bail!("name must not be empty");
    }
    let identity = store.create_identity(name, normalize_reference(reference))?;
    writeln!(out, "Added {} with id {}", identity.name, identity.id)?;
    writeln!(
        out,
        "Enroll a face with: POST /identities/{}/enroll on the daemon",
        identity.id
    )?;
    Ok(())
}

fn edit(
    store: &Store,
    id: i64,
    name: Option<&str>,
    reference: Option<&str>,
    out: &mut impl Write,
) -> Result<()> {
    let current = store
        .get_identity(id)?
        .with_context(|| format!("no identity with id {id}"))?;
    let name = name.map(str::trim).unwrap_or(&current.name);
    if name.is_empty() {
        bail!("name must not be empty");
    }
    let reference = match reference {
        Some(r) => normalize_reference(Some(r)),
        None => current.reference.as_deref(),
    };
    let updated = store.update_identity(id, name, reference)?;
    writeln!(out, "Updated identity {}: {}", updated.id, updated.name)?;
    Ok(())
}

fn list(store: &Store, json: bool, out: &mut impl Write) -> Result<()> {
    let identities = store.list_identities()?;
    let rows: Vec<_> = identities
        .iter()
        .map(|i| {
            let samples = i
                .embeddings
                .as_deref()
                .and_then(|blob| rollcall_core::Embedding::decode_set(blob).ok())
                .map_or(0, |set| set.len());
            (i, samples)
        })
        .collect();

    if json {
        let value: Vec<_> = rows
            .iter()
            .map(|(i, samples)| {
                serde_json::json!({
                    "id": i.id,
                    "name": i.name,
                    "reference": i.reference,
                    "samples": samples,
                })
            })
            .collect();
        writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
        return Ok(());
    }

    if rows.is_empty() {
        writeln!(out, "No identities registered")?;
        return Ok(());
    }
    for (i, samples) in rows {
        writeln!(
            out,
            "{:>4}  {:<24} {:<12} {} samples",
            i.id,
            i.name,
            i.reference.as_deref().unwrap_or("-"),
            samples
        )?;
    }
    Ok(())
}

fn attendance(store: &Store, all: bool, json: bool, out: &mut impl Write) -> Result<()> {
    let rows = if all {
        store.report()?
    } else {
        store.latest_per_identity()?
    };
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&rows)?)?;
        return Ok(());
    }
    if rows.is_empty() {
        writeln!(out, "No attendance recorded")?;
    }
    for row in rows {
        writeln!(
            out,
            "{}  {:<24} {:<8} {:.1}",
            row.timestamp
                .with_timezone(&Local)
                .format(rollcall_store::export::TIMESTAMP_FORMAT),
            row.name,
            row.status.as_str(),
            row.temperature
        )?;
    }
    Ok(())
}

fn camera_test(device: &str, frames: usize, out: &mut impl Write) -> Result<()> {
    let mut camera = Camera::open(device, 640, 480)?;
    writeln!(
        out,
        "Opened {} at {}x{} ({:?})",
        camera.device_path, camera.width, camera.height, camera.pixel_format
    )?;

    let start = Instant::now();
    let mut brightness = 0.0;
    for _ in 0..frames {
        let frame = camera.capture_frame()?;
        let gray = frame.to_grayscale();
        brightness = gray.iter().map(|&p| p as f64).sum::<f64>() / gray.len().max(1) as f64;
    }
    let elapsed = start.elapsed().max(Duration::from_millis(1));
    writeln!(
        out,
        "Captured {frames} frames in {:.2}s ({:.1} fps), mean brightness {brightness:.0}",
        elapsed.as_secs_f64(),
        frames as f64 / elapsed.as_secs_f64()
    )?;
    Ok(())
}

fn normalize_reference(reference: Option<&str>) -> Option<&str> {
    reference.map(str::trim).filter(|r| !r.is_empty())
}
