mod alarm;
mod clock;
mod config;
mod driver;
mod error;
mod settings;
mod transport;

use std::env;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};

use crate::alarm::matcher::FireEvent;
use crate::alarm::model::{
    AlarmId, AlarmTime, DEFAULT_ALARM_TIME, NewAlarm, parse_weekday, parse_weekday_list,
};
use crate::alarm::store::{AlarmStore, BulkOutcome};
use crate::clock::{Clock, SystemClock};
use crate::config::{ClientConfig, ConfigOverrides, load_client_config};
use crate::driver::{RingSlot, TickDriver};
use crate::error::ControlError;
use crate::settings::reconciler::SettingsReconciler;
use crate::transport::analytics::AnalyticsClient;
use crate::transport::http::{HttpBackend, WeatherLocation};
use crate::transport::{AlarmBackend, DeviceCommands};

const WATCH_POLL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(
    name = "alarmctl",
    version,
    about = "Manage IoT alarm clock schedules and push device settings"
)]
struct Cli {
    #[arg(long, default_value = "alarmctl.json")]
    config: PathBuf,

    #[arg(long, env = "ALARMCTL_BACKEND_URL")]
    backend_url: Option<String>,

    #[arg(long, env = "ALARMCTL_ANALYTICS_URL")]
    analytics_url: Option<String>,

    #[arg(long)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create, edit and remove alarms on the backend
    #[command(subcommand)]
    Alarms(AlarmCommand),
    /// Validate and push device settings
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// Direct device commands
    #[command(subcommand)]
    Device(DeviceCommand),
    #[command(subcommand)]
    Weather(WeatherCommand),
    /// Read-only sleep analytics
    #[command(subcommand)]
    Stats(StatsCommand),
    /// Run the local alarm matcher until stdin closes
    Watch(WatchArgs),
}

#[derive(Subcommand, Debug)]
enum AlarmCommand {
    List,
    Get {
        id: String,
    },
    Add {
        #[arg(long, default_value = DEFAULT_ALARM_TIME)]
        time: AlarmTime,
        /// Comma separated weekdays, e.g. Mon,Wed,Fri
        #[arg(long, default_value = "")]
        days: String,
        #[arg(long)]
        inactive: bool,
    },
    SetTime {
        id: String,
        time: AlarmTime,
    },
    ToggleDay {
        id: String,
        day: String,
    },
    Toggle {
        id: String,
    },
    Delete {
        id: String,
    },
    DeleteAll,
    AllOff,
}

#[derive(Subcommand, Debug)]
enum SettingsCommand {
    /// Send the full settings snapshot; unspecified fields keep their defaults
    Send(SendSettingsArgs),
    /// Send only the sampling rate
    SamplingRate {
        #[arg(allow_hyphen_values = true)]
        rate: String,
    },
}

#[derive(Args, Debug)]
struct SendSettingsArgs {
    #[arg(long)]
    mqtt: bool,
    #[arg(long)]
    async_http: bool,
    #[arg(long)]
    angry: bool,
    #[arg(long, allow_hyphen_values = true)]
    sampling_rate: Option<String>,
    #[arg(long, allow_hyphen_values = true)]
    window_size: Option<String>,
    #[arg(long, allow_negative_numbers = true)]
    volume: Option<i64>,
}

#[derive(Subcommand, Debug)]
enum DeviceCommand {
    /// Silence the alarm currently ringing, if any
    Stop,
    Start,
}

#[derive(Subcommand, Debug)]
enum WeatherCommand {
    Show,
    Locate {
        #[arg(allow_negative_numbers = true)]
        latitude: f64,
        #[arg(allow_negative_numbers = true)]
        longitude: f64,
    },
}

#[derive(Subcommand, Debug)]
enum StatsCommand {
    Sleep,
    Delay,
    BedState,
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Ask the device to ring when a local alarm fires
    #[arg(long)]
    ring_on_device: bool,

    /// Re-read the alarm list from the backend this often
    #[arg(long, default_value_t = 60)]
    refresh_secs: u64,
}

fn main() {
    init_logging();
    if let Err(err) = run() {
        let fields = err
            .downcast_ref::<ControlError>()
            .map(ControlError::field_errors)
            .unwrap_or_default();
        if fields.is_empty() {
            eprintln!("error: {err:#}");
        }
        for field in fields {
            eprintln!("error: {field}");
        }
        std::process::exit(1);
    }
}

fn init_logging() {
    let filters = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let _ = pretty_env_logger::formatted_builder()
        .parse_filters(&filters)
        .try_init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_client_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?
        .with_overrides(ConfigOverrides {
            backend_url: cli.backend_url,
            analytics_url: cli.analytics_url,
            request_timeout_ms: cli.timeout_ms,
        })?;

    match cli.command {
        Command::Stats(command) => {
            let analytics = AnalyticsClient::new(&config.analytics_http())?;
            run_stats(&analytics, command)
        }
        Command::Alarms(command) => run_alarms(&Session::connect(&config)?.store, command),
        Command::Settings(command) => {
            run_settings(&Session::connect(&config)?.reconciler, command)
        }
        Command::Device(command) => run_device(&Session::connect(&config)?.reconciler, command),
        Command::Weather(command) => run_weather(&Session::connect(&config)?.backend, command),
        Command::Watch(args) => {
            let session = Session::connect(&config)?;
            run_watch(
                &session.store,
                &session.reconciler,
                Arc::new(SystemClock),
                config.tick_interval(),
                args,
            )
        }
    }
}

/// One backend client shared by the alarm store and the settings reconciler.
struct Session {
    backend: Arc<HttpBackend>,
    store: AlarmStore,
    reconciler: SettingsReconciler,
}

impl Session {
    fn connect(config: &ClientConfig) -> Result<Self> {
        let backend = Arc::new(HttpBackend::new(&config.backend_http())?);
        info!("using backend at {}", config.backend_url);
        Ok(Self {
            store: AlarmStore::new(Arc::clone(&backend) as Arc<dyn AlarmBackend>),
            reconciler: SettingsReconciler::new(Arc::clone(&backend) as Arc<dyn DeviceCommands>),
            backend,
        })
    }
}

fn run_device(reconciler: &SettingsReconciler, command: DeviceCommand) -> Result<()> {
    match command {
        DeviceCommand::Stop => {
            reconciler.stop_active_alarm()?;
            println!("Alarm stopped.");
        }
        DeviceCommand::Start => {
            reconciler.start_alarm()?;
            println!("Alarm started on the device.");
        }
    }
    Ok(())
}

fn run_alarms(store: &AlarmStore, command: AlarmCommand) -> Result<()> {
    match command {
        AlarmCommand::List => {
            let alarms = store.refresh()?;
            if alarms.is_empty() {
                println!("No alarms set.");
            }
            for alarm in alarms {
                println!("{}", alarm.summary());
            }
        }
        AlarmCommand::Get { id } => {
            let alarm = store.fetch(&AlarmId::from(id))?;
            println!("{}", alarm.summary());
        }
        AlarmCommand::Add {
            time,
            days,
            inactive,
        } => {
            let alarm = store.add_alarm(NewAlarm {
                time,
                weekdays: parse_weekday_list(&days)?,
                active: !inactive,
            })?;
            println!("Alarm added: {}", alarm.summary());
        }
        AlarmCommand::SetTime { id, time } => {
            let alarm = store.set_time(&AlarmId::from(id), time)?;
            println!("Alarm updated: {}", alarm.summary());
        }
        AlarmCommand::ToggleDay { id, day } => {
            let day = parse_weekday(&day)?;
            store.refresh()?;
            let alarm = store.toggle_weekday(&AlarmId::from(id), day)?;
            println!("Alarm updated: {}", alarm.summary());
        }
        AlarmCommand::Toggle { id } => {
            let alarm = store.toggle_alarm(&AlarmId::from(id))?;
            let status = if alarm.active { "enabled" } else { "disabled" };
            println!("Alarm {} {status}.", alarm.id);
        }
        AlarmCommand::Delete { id } => {
            let id = AlarmId::from(id);
            store.delete_alarm(&id)?;
            println!("Alarm {id} deleted.");
        }
        AlarmCommand::DeleteAll => {
            store.refresh()?;
            report_bulk("deleted", store.delete_all())?;
        }
        AlarmCommand::AllOff => {
            store.refresh()?;
            report_bulk("switched off", store.set_all_off())?;
        }
    }
    Ok(())
}

fn report_bulk(verb: &str, outcome: BulkOutcome) -> Result<()> {
    println!("{} alarm(s) {verb}.", outcome.succeeded);
    match outcome.first_error {
        Some(err) => bail!("{} alarm(s) could not be {verb}: {err}", outcome.failed),
        None => Ok(()),
    }
}

fn run_settings(reconciler: &SettingsReconciler, command: SettingsCommand) -> Result<()> {
    match command {
        SettingsCommand::Send(args) => {
            let mut draft = reconciler.open_draft();
            draft.use_mqtt = args.mqtt;
            draft.use_async_http = args.async_http;
            draft.angry_mode = args.angry;
            if let Some(rate) = args.sampling_rate {
                draft.sampling_rate = rate;
            }
            if let Some(size) = args.window_size {
                draft.window_size = size;
            }
            if let Some(volume) = args.volume {
                draft.set_volume(volume);
            }
            let payload = reconciler.save_settings(&draft)?;
            println!(
                "Settings saved: sampling_rate={} w_size={} vol={} mqtt={} async_http={} angry={}",
                payload.sampling_rate,
                payload.w_size,
                payload.vol,
                payload.use_mqtt,
                payload.use_async_http,
                payload.angry_mode
            );
        }
        SettingsCommand::SamplingRate { rate } => {
            let payload = reconciler.send_sampling_rate(&rate)?;
            println!("Sampling rate sent: {}", payload.sampling_rate);
        }
    }
    Ok(())
}

fn run_weather(backend: &HttpBackend, command: WeatherCommand) -> Result<()> {
    match command {
        WeatherCommand::Show => {
            let report = backend.weather()?;
            println!("Weather: {}", report.weather);
        }
        WeatherCommand::Locate {
            latitude,
            longitude,
        } => {
            if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
                bail!("coordinates out of range: latitude {latitude}, longitude {longitude}");
            }
            backend.update_weather_location(WeatherLocation {
                latitude,
                longitude,
            })?;
            println!("Weather location set to {latitude}, {longitude}.");
        }
    }
    Ok(())
}

fn run_stats(analytics: &AnalyticsClient, command: StatsCommand) -> Result<()> {
    match command {
        StatsCommand::Sleep => println!("Sleep: {:.2} h", analytics.sleep_hours()?),
        StatsCommand::Delay => println!("Average delay: {:.1} ms", analytics.average_delay_ms()?),
        StatsCommand::BedState => {
            let prediction = analytics.bed_state_prediction()?;
            println!("{}", serde_json::to_string_pretty(&prediction)?);
        }
    }
    Ok(())
}

enum WatchInput {
    Stop,
    Quit,
    Unknown(String),
}

fn run_watch(
    store: &AlarmStore,
    reconciler: &SettingsReconciler,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
    args: WatchArgs,
) -> Result<()> {
    let alarms = store.refresh()?;
    println!("Watching {} alarm(s). Type 'stop' to silence, 'quit' to exit.", alarms.len());

    let (fire_tx, fire_rx) = mpsc::channel();
    let driver = TickDriver::start(store.matcher(), clock, tick_interval, fire_tx)?;
    let input_rx = spawn_stdin_reader()?;
    let refresh_every = Duration::from_secs(args.refresh_secs.max(1));
    let mut last_refresh = Instant::now();
    let mut ring = RingSlot::default();

    loop {
        match fire_rx.recv_timeout(WATCH_POLL) {
            Ok(event) => ring_alarm(&event, &mut ring, reconciler, args.ring_on_device),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                error!("tick driver exited unexpectedly");
                break;
            }
        }

        match input_rx.try_recv() {
            Ok(WatchInput::Stop) => {
                if reconciler.stop_active_alarm().is_ok() {
                    match ring.clear() {
                        Some(id) => println!("Alarm {id} stopped."),
                        None => println!("Nothing was ringing."),
                    }
                }
            }
            Ok(WatchInput::Quit) | Err(TryRecvError::Disconnected) => break,
            Ok(WatchInput::Unknown(line)) => println!("Unknown command '{line}'."),
            Err(TryRecvError::Empty) => {}
        }

        if last_refresh.elapsed() >= refresh_every {
            last_refresh = Instant::now();
            if let Err(err) = store.refresh() {
                warn!("keeping previous alarm list: {err}");
            }
        }
    }

    store.close();
    driver.stop();
    info!("watch ended");
    Ok(())
}

/// Only the alarm holding the ring slot is reported as ringing. With `ring_on_device` the slot
/// is claimed only once the device accepted the start command.
fn ring_alarm(
    event: &FireEvent,
    ring: &mut RingSlot,
    reconciler: &SettingsReconciler,
    ring_on_device: bool,
) {
    if let Some(current) = ring.current() {
        warn!("alarm {} fired while {current} is still ringing", event.id);
        return;
    }
    if ring_on_device && let Err(err) = reconciler.start_alarm() {
        println!("ALARM {} could not ring on the device: {err}", event.id);
        return;
    }
    ring.try_ring(&event.id);
    println!("ALARM {} ringing ({})", event.id, event.minute.format("%H:%M"));
}

fn spawn_stdin_reader() -> Result<Receiver<WatchInput>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                let input = match line.trim() {
                    "" => continue,
                    "stop" => WatchInput::Stop,
                    "quit" | "exit" => WatchInput::Quit,
                    other => WatchInput::Unknown(other.to_string()),
                };
                if tx.send(input).is_err() {
                    break;
                }
            }
        })
        .context("failed to spawn stdin reader")?;
    Ok(rx)
}
