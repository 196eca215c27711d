// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use padloop::audio;
use padloop::config::Settings;
use padloop::engine::AudioEngine;
use padloop::midi::{self, Connection, ConnectionState};
use padloop::performance::{Action, Options, Performance};
use padloop::project::{ControllerProfile, MidiClip, PadConfig, Project};
use padloop::store::Store;
use padloop::util::{bar_beat_display, duration_minutes_seconds, filename_display};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How often the connection state is checked for changes while monitoring.
const STATE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A pad and keys loop builder."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Lists the available MIDI inputs.
    MidiDevices {},
    /// Connects to the controller and prints what it sends.
    Monitor {
        /// The path to the settings file.
        config: PathBuf,
    },
    /// Plays pads and keys from the controller and records loops.
    Jam {
        /// The path to the settings file.
        config: PathBuf,
        /// The project that recorded clips are added to.
        #[arg(short, long, default_value = "default")]
        project: String,
    },
    /// Plays a stored project's arrangement until interrupted.
    Play {
        /// The path to the settings file.
        config: PathBuf,
        /// The id of the project to play.
        project: String,
    },
    /// Stores an audio file as a sample that pads can use.
    ImportSample {
        /// The path to the settings file.
        config: PathBuf,
        /// The id to store the sample under.
        id: String,
        /// The audio file.
        file: PathBuf,
    },
    /// Stores the configured pad layout as a controller profile.
    SaveProfile {
        /// The path to the settings file.
        config: PathBuf,
        /// The profile name. The id is derived from it.
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::MidiDevices {} => {
            let devices = midi::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Monitor { config } => {
            let settings = Settings::deserialize(&config)?;
            monitor(&settings).await?;
        }
        Commands::Jam { config, project } => {
            let settings = Settings::deserialize(&config)?;
            jam(&settings, &project).await?;
        }
        Commands::Play { config, project } => {
            let settings = Settings::deserialize(&config)?;
            play(&settings, &project).await?;
        }
        Commands::ImportSample { config, id, file } => {
            let settings = Settings::deserialize(&config)?;
            import_sample(&settings, &id, &file).await?;
        }
        Commands::SaveProfile { config, name } => {
            let settings = Settings::deserialize(&config)?;
            let store = Store::open(settings.store()).await?;
            let state = Connection::new(midi::get_access(settings.midi_device())).connect(|_| {});
            let profile = ControllerProfile::new(&name, state.device_name, &settings.pads());
            store.save_profile(&profile).await?;
            println!("Saved profile {} ({}).", profile.id, profile.name);
        }
    }

    Ok(())
}

fn print_state(state: &ConnectionState) {
    match (&state.device_name, &state.message) {
        (Some(device), _) => println!("MIDI {}: {}", state.status, device),
        (None, Some(message)) => println!("MIDI {}: {}", state.status, message),
        (None, None) => println!("MIDI {}", state.status),
    }
}

/// Prints connection changes until interrupted.
async fn watch_connection(connection: &Connection) -> Result<(), Box<dyn Error>> {
    let mut last = connection.state();
    print_state(&last);
    let mut interval = tokio::time::interval(STATE_CHECK_INTERVAL);
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                return Ok(());
            }
            _ = interval.tick() => {
                let state = connection.state();
                if (state.status, &state.device_name, &state.message)
                    != (last.status, &last.device_name, &last.message)
                {
                    print_state(&state);
                }
                last = state;
            }
        }
    }
}

async fn monitor(settings: &Settings) -> Result<(), Box<dyn Error>> {
    let connection = Connection::new(midi::get_access(settings.midi_device()));
    connection.connect(|message| println!("{}", message));
    watch_connection(&connection).await?;
    connection.disconnect();
    Ok(())
}

fn engine(settings: &Settings) -> Result<Arc<AudioEngine>, Box<dyn Error>> {
    let backend = audio::get_backend(settings.audio_device(), Some(settings.sample_rate()))?;
    info!(backend = %backend, "Using audio output");
    Ok(Arc::new(AudioEngine::with_lookahead(
        backend,
        settings.bpm(),
        settings.lookahead()?,
    )))
}

/// The configured pads, with notes from the configured profile if it is stored.
async fn pads(settings: &Settings, store: &Store) -> Result<Vec<PadConfig>, Box<dyn Error>> {
    let mut pads = settings.pads();
    if let Some(id) = settings.profile() {
        match store.load_profile(id).await? {
            Some(profile) => {
                info!(profile = profile.name, "Applying controller profile");
                profile.apply_to(&mut pads);
            }
            None => warn!(profile = id, "Controller profile not found"),
        }
    }
    Ok(pads)
}

async fn jam(settings: &Settings, project_id: &str) -> Result<(), Box<dyn Error>> {
    let store = Store::open(settings.store()).await?;
    let mut project = store
        .load_project(project_id)
        .await?
        .unwrap_or_else(|| settings.new_project());
    let engine = engine(settings)?;
    engine.transport().set_bpm(project.bpm);

    let performance = Arc::new(Performance::new(
        engine.clone(),
        pads(settings, &store).await?,
        Options {
            quantize: settings.quantize(),
            clip_length_bars: settings.clip_length_bars(),
            record_control: Some(settings.record_control()),
            existing_clips: project.clips.len(),
        },
    ));
    for (pad_id, sample_id) in settings.pad_samples() {
        let bytes = store.require_sample(&sample_id).await?;
        if !performance.load_sample(&pad_id, &sample_id, &bytes)? {
            warn!(pad = pad_id, "No such pad for sample");
        }
    }

    let bars = engine
        .transport()
        .subscribe(|_, bar| info!(bar = bar + 1, "Bar"));

    let (clip_tx, mut clip_rx) = mpsc::unbounded_channel::<MidiClip>();
    let connection = Connection::new(midi::get_access(settings.midi_device()));
    {
        let performance = performance.clone();
        connection.connect(move |message| match performance.handle(message) {
            Action::RecordingStarted => println!("Recording..."),
            Action::ClipFinished(clip) => {
                if clip_tx.send(clip).is_err() {
                    warn!("Dropped a finished clip after shutdown");
                }
            }
            _ => {}
        });
    }
    print_state(&connection.state());
    println!(
        "Press CC {} to start and stop recording, Ctrl-C to quit.",
        settings.record_control()
    );

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
            Some(clip) = clip_rx.recv() => {
                save_clip(&store, project_id, &mut project, clip).await?;
            }
        }
    }

    connection.disconnect();
    bars.unsubscribe();
    if performance.is_recording() {
        if let Some(clip) = performance.toggle_recording() {
            save_clip(&store, project_id, &mut project, clip).await?;
        }
    }
    Ok(())
}

/// Adds a clip to the project, places it after everything else on the first track
/// and saves the project.
async fn save_clip(
    store: &Store,
    project_id: &str,
    project: &mut Project,
    clip: MidiClip,
) -> Result<(), Box<dyn Error>> {
    let start_bar = project.length_bars() + 1;
    let clip_id = clip.id().to_string();
    let events = clip.events().len();
    project.add_clip(clip);
    project.place_clip(&clip_id, None, start_bar);
    store.save_project(project_id, project).await?;
    println!(
        "Saved {} ({} events) at bar {} of {}.",
        clip_id, events, start_bar, project_id
    );
    Ok(())
}

async fn play(settings: &Settings, project_id: &str) -> Result<(), Box<dyn Error>> {
    let store = Store::open(settings.store()).await?;
    let project = store
        .load_project(project_id)
        .await?
        .ok_or_else(|| format!("no project named {}", project_id))?;
    let engine = engine(settings)?;

    let bars = engine
        .transport()
        .subscribe(|_, bar| println!("{}", bar_beat_display(bar as f64)));
    let report = engine.play_arrangement(&project);
    let length = Duration::from_secs_f64(
        project.length_bars() as f64 * engine.transport().bar_duration(),
    );
    println!(
        "Playing {} ({}): {} placements, {} skipped, {} voices.",
        project_id,
        duration_minutes_seconds(length),
        report.placements,
        report.skipped,
        report.voices
    );

    tokio::signal::ctrl_c().await?;
    bars.unsubscribe();
    engine.stop_arrangement();
    Ok(())
}

async fn import_sample(settings: &Settings, id: &str, file: &Path) -> Result<(), Box<dyn Error>> {
    let bytes = tokio::fs::read(file).await?;
    let buffer = audio::buffer::decode(&bytes)?;
    let store = Store::open(settings.store()).await?;
    store.save_sample(id, &bytes).await?;
    println!(
        "Stored {} as sample {} ({:.2}s, {} channels, {} Hz).",
        filename_display(file),
        id,
        buffer.duration(),
        buffer.channels(),
        buffer.sample_rate()
    );
    Ok(())
}
