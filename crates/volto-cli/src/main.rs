use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use volto_core::{CropRect, FrameReport};
use volto_hw::{Camera, FacingMode};

#[zbus::proxy(
    interface = "org.volto.Kiosk1",
    default_service = "org.volto.Kiosk1",
    default_path = "/org/volto/Kiosk1"
)]
trait Kiosk {
    async fn enroll(&self, name: &str, image: &str, crop: &str) -> zbus::Result<u32>;
    async fn add_sample(&self, person: u32, image: &str, crop: &str) -> zbus::Result<u32>;
    async fn list_people(&self) -> zbus::Result<String>;
    async fn remove_sample(&self, person: u32, sample: u32) -> zbus::Result<String>;
    async fn remove_person(&self, person: u32) -> zbus::Result<String>;
    async fn rename_person(&self, person: u32, name: &str) -> zbus::Result<String>;
    async fn select_target(&self, person: i32) -> zbus::Result<()>;
    async fn target_from_image(&self, image: &str, crop: &str) -> zbus::Result<()>;
    async fn start_scan(&self, facing: &str) -> zbus::Result<String>;
    async fn stop_scan(&self) -> zbus::Result<()>;
    async fn switch_camera(&self) -> zbus::Result<String>;
    async fn last_frame(&self) -> zbus::Result<String>;
    async fn import_legacy(&self, json: &str) -> zbus::Result<u32>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "volto", about = "Volto face-recognition kiosk CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a person from a photo
    Enroll {
        /// Name to enroll under; an existing name gains another photo
        #[arg(short, long)]
        name: String,
        #[command(flatten)]
        photo: Photo,
    },
    /// Add a photo to an enrolled person
    AddPhoto {
        /// Roster index of the person
        person: u32,
        #[command(flatten)]
        photo: Photo,
    },
    /// List enrolled people with photo quality and efficacy
    List,
    /// Remove a person and all their photos
    Remove {
        person: u32,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Remove a single photo
    RemovePhoto { person: u32, sample: u32 },
    /// Rename a person
    Rename { person: u32, name: String },
    /// Choose who live matching looks for
    Target(TargetArgs),
    /// Start scanning with the live camera
    Start {
        /// Camera to use: user (front) or environment (back)
        #[arg(short, long)]
        facing: Option<FacingMode>,
    },
    /// Stop scanning
    Stop,
    /// Switch between front and back cameras
    Switch,
    /// Print frame reports while scanning
    Watch {
        #[arg(long, default_value_t = 200)]
        interval_ms: u64,
    },
    /// Import a legacy database export (JSON) into an empty store
    ImportLegacy { file: PathBuf },
    /// Show daemon status
    Status,
    /// List local V4L2 capture devices
    Cameras,
}

#[derive(Args)]
struct Photo {
    /// Image file containing the face
    #[arg(short, long)]
    image: PathBuf,
    /// Crop rectangle in image pixels: x,y,width,height
    #[arg(short, long)]
    crop: Option<CropRect>,
}

#[derive(Args)]
#[command(group(ArgGroup::new("mode").required(true).args(["person", "image", "all"])))]
struct TargetArgs {
    /// Roster index of an enrolled person
    #[arg(short, long)]
    person: Option<u32>,
    /// Image of someone who is not enrolled
    #[arg(short, long)]
    image: Option<PathBuf>,
    /// Crop rectangle for --image: x,y,width,height
    #[arg(short, long, requires = "image")]
    crop: Option<CropRect>,
    /// Match against everyone again
    #[arg(short, long)]
    all: bool,
}

/// The daemon resolves paths itself, so send it an absolute one.
fn image_arg(path: &Path) -> Result<String> {
    let abs = std::fs::canonicalize(path)
        .with_context(|| format!("cannot read image {}", path.display()))?;
    Ok(abs.to_string_lossy().into_owned())
}

fn crop_arg(crop: Option<CropRect>) -> String {
    crop.map(|c| c.to_string()).unwrap_or_default()
}

fn format_roster(roster: &serde_json::Value) -> String {
    let Some(people) = roster.as_array().filter(|p| !p.is_empty()) else {
        return "No people enrolled".into();
    };
    let mut out = String::new();
    for p in people {
        let samples: Vec<String> = p["samples"]
            .as_array()
            .map(|s| {
                s.iter()
                    .enumerate()
                    .map(|(i, q)| format!("#{i} {}%", q.as_u64().unwrap_or(0)))
                    .collect()
            })
            .unwrap_or_default();
        out.push_str(&format!(
            "[{}] {}  {}\n    photos: {}\n",
            p["index"],
            p["name"].as_str().unwrap_or("?"),
            p["efficacy_label"].as_str().unwrap_or(""),
            samples.join(", ")
        ));
    }
    out.truncate(out.trim_end().len());
    out
}

fn format_frame(report: &FrameReport) -> String {
    if report.detected_count == 0 {
        return "no faces".into();
    }
    let faces: Vec<String> = report
        .faces
        .iter()
        .map(|f| {
            let mark = if f.matched { "+" } else { "-" };
            format!(
                "{mark}{} @ {:.0},{:.0} {:.0}x{:.0}",
                f.label, f.face_box.x, f.face_box.y, f.face_box.width, f.face_box.height
            )
        })
        .collect();
    format!(
        "{} detected, {} matched: {}",
        report.detected_count,
        report.matched_count,
        faces.join("; ")
    )
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

async fn connect() -> Result<KioskProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    let proxy = KioskProxy::new(&conn)
        .await
        .context("voltod is not reachable")?;
    tracing::debug!(unique_name = ?conn.unique_name(), "connected to session bus");
    Ok(proxy)
}

async fn watch(proxy: &KioskProxy<'_>, interval: Duration) -> Result<()> {
    let mut tick = tokio::time::interval(interval);
    let mut last: Option<FrameReport> = None;
    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
        let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
        if status["scanning"] != true {
            println!("not scanning");
            return Ok(());
        }
        let report: FrameReport = serde_json::from_str(&proxy.last_frame().await?)?;
        if last.as_ref() != Some(&report) {
            println!("{}", format_frame(&report));
            last = Some(report);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        // Local diagnostics; no daemon needed.
        Commands::Cameras => list_cameras(),
        command => run(&connect().await?, command).await?,
    }

    Ok(())
}

fn list_cameras() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No capture devices found");
    }
    for d in devices {
        println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }
}

async fn run(proxy: &KioskProxy<'_>, command: Commands) -> Result<()> {
    match command {
        Commands::Enroll { name, photo } => {
            let index = proxy
                .enroll(&name, &image_arg(&photo.image)?, &crop_arg(photo.crop))
                .await?;
            println!("Enrolled {name} as person {index}");
        }
        Commands::AddPhoto { person, photo } => {
            proxy
                .add_sample(person, &image_arg(&photo.image)?, &crop_arg(photo.crop))
                .await?;
            println!("Added photo to person {person}");
        }
        Commands::List => {
            let roster: serde_json::Value = serde_json::from_str(&proxy.list_people().await?)?;
            println!("{}", format_roster(&roster));
        }
        Commands::Remove { person, yes } => {
            let roster: serde_json::Value = serde_json::from_str(&proxy.list_people().await?)?;
            let Some(entry) = roster.get(person as usize) else {
                bail!("no person at index {person}");
            };
            let prompt = format!(
                "Remove {} and all {} photo(s)?",
                entry["name"].as_str().unwrap_or("?"),
                entry["samples"].as_array().map_or(0, |s| s.len())
            );
            if !yes && !confirm(&prompt)? {
                println!("Cancelled");
                return Ok(());
            }
            let name = proxy.remove_person(person).await?;
            println!("Removed {name}");
        }
        Commands::RemovePhoto { person, sample } => {
            let reply: serde_json::Value =
                serde_json::from_str(&proxy.remove_sample(person, sample).await?)?;
            if reply["outcome"] == "person_removed" {
                println!("Removed last photo; {} is no longer enrolled", reply["name"]);
            } else {
                println!("Removed photo; {} remaining", reply["remaining"]);
            }
        }
        Commands::Rename { person, name } => {
            let reply: serde_json::Value =
                serde_json::from_str(&proxy.rename_person(person, &name).await?)?;
            if reply["merged"] == true {
                println!("Merged into existing {name} (person {})", reply["index"]);
            } else {
                println!("Renamed person {person} to {name}");
            }
        }
        Commands::Target(args) => {
            if let Some(person) = args.person {
                let person = i32::try_from(person).context("person index out of range")?;
                proxy.select_target(person).await?;
                println!("Matching against person {person} only");
            } else if let Some(image) = args.image {
                proxy
                    .target_from_image(&image_arg(&image)?, &crop_arg(args.crop))
                    .await?;
                println!("Matching against the face in {}", image.display());
            } else {
                proxy.select_target(-1).await?;
                println!("Matching against everyone");
            }
        }
        Commands::Start { facing } => {
            let facing = facing.map(|f| f.to_string()).unwrap_or_default();
            let info: serde_json::Value = serde_json::from_str(&proxy.start_scan(&facing).await?)?;
            println!(
                "Scanning with {} camera {} at {}x{}",
                info["facing"].as_str().unwrap_or("?"),
                info["device"].as_str().unwrap_or("?"),
                info["width"],
                info["height"]
            );
        }
        Commands::Stop => {
            proxy.stop_scan().await?;
            println!("Scanning stopped");
        }
        Commands::Switch => {
            let facing = proxy.switch_camera().await?;
            println!("Using {facing} camera");
        }
        Commands::Watch { interval_ms } => {
            watch(proxy, Duration::from_millis(interval_ms.max(1))).await?;
        }
        Commands::ImportLegacy { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let count = proxy.import_legacy(&raw).await?;
            println!("Imported {count} people");
        }
        Commands::Status => {
            let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Cameras => list_cameras(),
    }

    Ok(())
}
