use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use location_tracker::config::{
    self, DEFAULT_ALTERNATE_IP_URL, DEFAULT_BASE_URL, DEFAULT_GEOCODE_URL, DEFAULT_PRIMARY_IP_URL,
};
use location_tracker::sources::{
    HttpIpLocator, IpProvider, LocationSource, NetworkSource, SimulatedGpsSource, TermuxGpsSource,
};
use location_tracker::{
    Command, DeviceIdentity, DisplayText, FallbackController, NominatimGeocoder, Publisher,
    ReqwestTransport, TrackerConfig, TrackerView,
};
use log::{info, warn};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Duration};

#[derive(Parser, Debug)]
#[command(name = "location_tracker")]
#[command(about = "Device location tracker - GPS with IP geolocation fallback", long_about = None)]
struct Args {
    /// Duration in seconds (0 = continuous)
    #[arg(long, value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// Device ID the record is stored under (prompted for when omitted, blank = generated)
    #[arg(long)]
    device_id: Option<String>,

    /// Datastore base URL
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Seconds to wait for a first GPS fix before falling back
    #[arg(long, default_value = "15")]
    gps_timeout_secs: u64,

    /// IP geolocation polling period in seconds
    #[arg(long, default_value = "5")]
    poll_interval_secs: u64,

    /// Minimum spacing between GPS requests in milliseconds
    #[arg(long, default_value = "1000")]
    gps_min_interval_ms: u64,

    /// Timeout for geolocation and address lookups in seconds
    #[arg(long, default_value = "10")]
    lookup_timeout_secs: u64,

    #[arg(long, default_value = DEFAULT_PRIMARY_IP_URL)]
    ip_url: String,

    #[arg(long, default_value = DEFAULT_ALTERNATE_IP_URL)]
    alt_ip_url: String,

    #[arg(long, default_value = DEFAULT_GEOCODE_URL)]
    geocode_url: String,

    /// Skip reverse geocoding
    #[arg(long)]
    no_geocode: bool,

    /// Use termux-location even when not running on Android
    #[arg(long)]
    force_gps: bool,

    /// Command used for GPS requests
    #[arg(long, default_value = location_tracker::sources::gps::TERMUX_LOCATION)]
    gps_command: String,

    /// Replace the GPS receiver with a simulated one
    #[arg(long)]
    simulate_gps: bool,

    /// Simulated cold-start delay in seconds
    #[arg(long, default_value = "2")]
    simulated_fix_delay_secs: u64,

    /// Simulated receiver fault after this many fixes
    #[arg(long)]
    simulated_fail_after: Option<u64>,

    /// Wait for a "start" command instead of tracking immediately
    #[arg(long)]
    no_autostart: bool,

    /// Write the tracker view as JSON to this file on every change
    #[arg(long)]
    status_file: Option<PathBuf>,
}

impl Args {
    fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            base_url: self.base_url.clone(),
            gps_timeout: Duration::from_secs(self.gps_timeout_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            gps_min_interval: Duration::from_millis(self.gps_min_interval_ms.max(1)),
            lookup_timeout: Duration::from_secs(self.lookup_timeout_secs),
            primary_ip_url: self.ip_url.clone(),
            alternate_ip_url: self.alt_ip_url.clone(),
            geocode_url: self.geocode_url.clone(),
            geocode: !self.no_geocode,
        }
    }

    fn precise_source(&self) -> Box<dyn LocationSource> {
        if self.simulate_gps {
            Box::new(
                SimulatedGpsSource::default()
                    .first_fix_delay(Duration::from_secs(self.simulated_fix_delay_secs))
                    .fail_after(self.simulated_fail_after),
            )
        } else {
            Box::new(TermuxGpsSource::with_command(self.gps_command.clone()).force(self.force_gps))
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = args.tracker_config();

    let device_id = match args.device_id.as_deref() {
        Some(id) => DeviceIdentity::from_input(Some(id)),
        None => DeviceIdentity::from_input(prompt_device_id()?.as_deref()),
    };

    println!("[{}] Location Tracker Starting", ts_now());
    println!("  Device ID: {}", device_id);
    println!("  Datastore: {}", config.base_url);
    println!("  Duration: {} seconds (0=continuous)", args.duration);
    println!("  GPS timeout: {:?}", config.gps_timeout);
    println!("  IP poll interval: {:?}", config.poll_interval);

    let lookup = config::lookup_client(config.lookup_timeout);
    let network = NetworkSource::new(
        HttpIpLocator::new(lookup.clone(), config.primary_ip_url.clone(), IpProvider::IpApi),
        HttpIpLocator::new(lookup.clone(), config.alternate_ip_url.clone(), IpProvider::IpInfo),
    );
    let geocoder = config
        .geocode
        .then(|| NominatimGeocoder::new(lookup, config.geocode_url.clone()));
    let publisher = Publisher::new(
        &config.base_url,
        ReqwestTransport::new(config::publish_client()),
    )
    .with_context(|| format!("invalid datastore URL {}", config.base_url))?;

    let mut controller = FallbackController::new(
        config,
        device_id,
        Some(args.precise_source()),
        Box::new(network),
        publisher,
        geocoder,
    )?;

    let render = tokio::spawn(render_views(controller.subscribe(), args.status_file.clone()));

    let (cmd_tx, mut cmd_rx) = mpsc::channel(16);
    if !args.no_autostart {
        cmd_tx.send(Command::Start).await?;
    }
    spawn_command_reader(cmd_tx.clone());

    let shutdown = cmd_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n[{}] Interrupted, stopping...", ts_now());
            let _ = shutdown.send(Command::Shutdown).await;
        }
    });

    if args.duration > 0 {
        let shutdown = cmd_tx.clone();
        let duration = args.duration;
        tokio::spawn(async move {
            sleep(Duration::from_secs(duration)).await;
            println!("[{}] Duration reached, stopping...", ts_now());
            let _ = shutdown.send(Command::Shutdown).await;
        });
    }
    drop(cmd_tx);

    let stats = controller.run(&mut cmd_rx).await;
    drop(controller);
    let _ = render.await;

    println!("\n=== Final Stats ===");
    println!("Readings received: {}", stats.readings_received);
    println!("Published: {}", stats.publish_succeeded);
    println!("Publish failures: {}", stats.publish_failed);

    Ok(())
}

fn prompt_device_id() -> Result<Option<String>> {
    print!("Enter device ID (blank for generated): ");
    io::stdout().flush()?;
    let mut line = String::new();
    let read = io::stdin().lock().read_line(&mut line)?;
    Ok((read > 0).then_some(line))
}

/// Read `start` / `stop` / `quit` lines on a plain thread; stdin has no
/// async reader on the current-thread runtime.
fn spawn_command_reader(commands: mpsc::Sender<Command>) {
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let command = match line.trim().to_ascii_lowercase().as_str() {
                "start" => Command::Start,
                "stop" => Command::Stop,
                "quit" | "exit" => Command::Shutdown,
                "" => continue,
                other => {
                    warn!("unknown command '{}' (start, stop, quit)", other);
                    continue;
                }
            };
            if commands.blocking_send(command).is_err() {
                break;
            }
        }
    });
}

/// Print changed display fields and mirror each view to the status file.
async fn render_views(mut views: watch::Receiver<TrackerView>, status_file: Option<PathBuf>) {
    let mut shown: Option<DisplayText> = None;

    loop {
        let view = views.borrow_and_update().clone();
        for (field, text) in view.display.changes_since(shown.as_ref()) {
            println!("[{}] {:<12} {}", ts_now(), field, text.replace('\n', "  "));
        }
        if let Some(path) = &status_file {
            if let Err(e) = view.save(path) {
                warn!("could not write {}: {}", path.display(), e);
            }
        }
        shown = Some(view.display);

        if views.changed().await.is_err() {
            break;
        }
    }

    info!("view channel closed");
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
