use WALKING_PIANO::{
    Args, Catalog, GameConfig, GameMode, InputPort, MidirInput, MidirOutput, NullOutput,
    OutputPort, Player, Session, SystemClock, import_midi_file, list_ports, load_player_tracks,
    note_name,
};
use anyhow::{Result, anyhow, bail};
use clap::Parser;
use log::{debug, info, warn};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

fn resolve_song(args: &Args, config: &GameConfig) -> Result<Option<PathBuf>> {
    if let Some(midi) = &args.midi {
        return Ok(Some(midi.clone()));
    }

    let Some(id) = args.song else {
        return Ok(None);
    };

    let Some(path) = &args.catalog else {
        bail!("--song needs a --catalog to look it up in..!")
    };

    let catalog = Catalog::from_json(&fs::read_to_string(path)?)?;
    let offered = catalog.filter(config.mode, config.players);
    debug!("{} of {} songs fit this mode..!", offered.len(), catalog.songs.len());

    let Some(entry) = offered.into_iter().find(|s| s.id == id) else {
        bail!(
            "Song {} is not in the catalog for {:?} with {} player(s)..!",
            id,
            config.mode,
            config.players
        )
    };

    info!("Selected '{}' from the catalog..!", entry.display_name);
    Ok(Some(PathBuf::from(&entry.file_path)))
}

fn open_output(args: &Args) -> Arc<dyn OutputPort> {
    let Some(name) = &args.output else {
        info!("No MIDI output given, playing silently..!");
        return Arc::new(NullOutput);
    };

    match MidirOutput::connect(name) {
        Ok(port) => Arc::new(port),
        Err(why) => {
            warn!("MIDI output unavailable, playing silently | why: {:?}", why);
            Arc::new(NullOutput)
        }
    }
}

fn open_input(args: &Args) -> Option<(MidirInput, Box<dyn InputPort>)> {
    let name = args.input.as_ref()?;

    match MidirInput::connect(name) {
        Ok((connection, port)) => Some((connection, Box::new(port))),
        Err(why) => {
            warn!("MIDI input unavailable, continuing without it | why: {:?}", why);
            None
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.list_ports {
        let (inputs, outputs) = list_ports()?;
        println!("MIDI inputs: {:?}", inputs);
        println!("MIDI outputs: {:?}", outputs);
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => GameConfig::load(path)?,
        None => GameConfig::default(),
    };
    config.apply_args(&args);
    debug!("Game config: {:?}", config);

    let midi = match resolve_song(&args, &config)? {
        Some(path) => {
            info!("Importing MIDI file: '{}'...", path.display());
            Some(import_midi_file(&path)?)
        }
        None if config.mode.has_falling_notes() || config.mode == GameMode::JukeBox => {
            bail!("{:?} mode needs a MIDI file or a catalog song..!", config.mode)
        }
        None => None,
    };

    if args.dry_run {
        let midi = midi.as_ref().ok_or_else(|| anyhow!("Nothing to preview..!"))?;
        let tracks = load_player_tracks(midi, &config)?;

        info!("Previewing at most {} events..!", args.dry_run_max);
        for track in tracks {
            info!("Player {} plays track {}..!", track.player, track.track);

            for (i, ev) in track.events.iter().take(args.dry_run_max).enumerate() {
                info!(
                    "Event {}: {:?} midi={} ({}) vel={} delay_s={:.6} at_s={:.6}",
                    i,
                    ev.kind,
                    ev.note,
                    note_name(ev.note),
                    ev.velocity,
                    ev.delay_seconds,
                    ev.at_seconds
                );
            }
        }
        return Ok(());
    }

    let output = open_output(&args);

    if config.mode == GameMode::JukeBox {
        let midi = midi.ok_or_else(|| anyhow!("JukeBox needs a song..!"))?;
        let player = Arc::new(Player::new(output, &config, args.verbose));
        player.load_song(&midi, &config)?;

        let player_for_handler = Arc::clone(&player);
        ctrlc::set_handler(move || {
            warn!("Ctrl-C received, stopping playback..!");
            let _ = player_for_handler.stop();
        })?;

        player.play(true)?;
        info!("Playback finished, exiting..!");
        return Ok(());
    }

    let opened = if config.mode.listens_to_input() {
        open_input(&args)
    } else {
        None
    };
    let (connection, input) = match opened {
        Some((connection, port)) => (Some(connection), Some(port)),
        None => (None, None),
    };

    let session = Session::start(
        config,
        midi.as_ref(),
        input,
        output,
        Arc::new(SystemClock::new()),
    )?;

    let state = Arc::clone(session.state());
    let session = Arc::new(Mutex::new(session));
    let session_for_handler = Arc::clone(&session);

    ctrlc::set_handler(move || {
        warn!("Ctrl-C received, leaving the game..!");
        if let Ok(mut session) = session_for_handler.lock() {
            let _ = session.teardown();
        }
    })?;

    state.wait();

    let Ok(mut session) = session.lock() else {
        bail!("Failed to lock the session..!")
    };
    let score = session.teardown()?;

    drop(connection);

    if state.config().mode == GameMode::Challenge {
        info!("Final score: {}..!", score);
    }

    Ok(())
}
