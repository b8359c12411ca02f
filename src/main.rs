//! snipkey daemon and preferences CLI.
//!
//! Without arguments this runs the capture daemon. The other commands edit or
//! print the preferences file; a running daemon picks the edits up on its own.

use anyhow::{bail, Context, Result};
use crossbeam_channel::{bounded, Sender};
use minimo::showln;
use single_instance::SingleInstance;
use snipkey::overlay::listen_for_overlay_events;
use snipkey::{
    platform, EngineEvent, IpcOverlay, PreferenceStore, PreferencesSource, ReplacementEngine, SearchCoordinator,
    SystemClipboard, DAEMON_PIPE_NAME, OVERLAY_PIPE_NAME, SERVICE_NAME,
};
use std::env;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const BUS_CAPACITY: usize = 256;

fn init_logging() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|e| {
            eprintln!("Failed to parse RUST_LOG: {}. Using default 'info' level.", e);
            EnvFilter::new("info")
        }))
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")
}

fn main() -> Result<()> {
    init_logging()?;

    let args: Vec<String> = env::args().collect();
    match args.get(1).map(String::as_str) {
        None | Some("run") => run_daemon(),
        Some("trigger") => handle_trigger(&args[2..]),
        Some("exempt") => handle_exempt(&args[2..]),
        Some("unexempt") => handle_unexempt(&args[2..]),
        Some("config") => handle_show_config(),
        Some(_) => {
            display_help();
            Ok(())
        }
    }
}

fn run_daemon() -> Result<()> {
    let instance = SingleInstance::new(SERVICE_NAME).context("Failed to create single instance guard")?;
    if !instance.is_single() {
        bail!("snipkey is already running");
    }

    info!("snipkey daemon starting");
    let store = PreferenceStore::open_default().context("Failed to open preferences")?;
    info!(path = %store.path().display(), trigger = %store.trigger_config().trigger, "preferences loaded");

    let backend = platform::native_backend().context("No input backend for this platform")?;
    let (sender, receiver) = bounded(BUS_CAPACITY);

    let _watcher = {
        let sender = sender.clone();
        store
            .watch(move || notify_bus(&sender, EngineEvent::PreferencesReloaded))
            .map_err(|e| warn!(error = %e, "Preferences hot reload disabled"))
            .ok()
    };

    listen_for_overlay_events(DAEMON_PIPE_NAME, sender.clone()).context("Overlay event listener setup failed")?;

    {
        let sender = sender.clone();
        ctrlc::set_handler(move || notify_bus(&sender, EngineEvent::Quit))
            .context("Failed to install Ctrl+C handler")?;
    }

    let platform::Backend { mut observer, injector, probe, screen } = backend;
    observer
        .start(sender.clone())
        .context("Keyboard observer failed to start; input monitoring permission is required")?;

    let engine = ReplacementEngine::new(injector, Box::new(SystemClipboard::new()));
    let mut coordinator = SearchCoordinator::new(
        Arc::new(store),
        Box::new(IpcOverlay::new(OVERLAY_PIPE_NAME)),
        probe,
        screen,
        engine,
    );

    info!("snipkey daemon running");
    coordinator.run(&receiver);

    if let Err(e) = observer.stop() {
        error!(error = %e, "Failed to stop keyboard observer");
    }
    info!("snipkey daemon stopped");
    Ok(())
}

fn notify_bus(sender: &Sender<EngineEvent>, event: EngineEvent) {
    if let Err(e) = sender.send(event) {
        error!(error = %e, "Engine bus closed");
    }
}

fn handle_trigger(args: &[String]) -> Result<()> {
    let [trigger] = args else {
        bail!("usage: snipkey trigger <character>");
    };
    let store = PreferenceStore::open_default()?;
    store.set_trigger(trigger).context("Failed to set trigger")?;
    showln!(gray_dim, "Trigger set to ", yellow_bold, trigger);
    Ok(())
}

fn handle_exempt(args: &[String]) -> Result<()> {
    let (app_id, display_name) = match args {
        [app_id] => (app_id, app_id),
        [app_id, display_name] => (app_id, display_name),
        _ => bail!("usage: snipkey exempt <executable> [display name]"),
    };
    let store = PreferenceStore::open_default()?;
    store.add_exception(app_id, display_name).context("Failed to add exception")?;
    showln!(yellow_bold, display_name, gray_dim, " exempted as ", white_bold, app_id);
    Ok(())
}

fn handle_unexempt(args: &[String]) -> Result<()> {
    let [app_id] = args else {
        bail!("usage: snipkey unexempt <executable>");
    };
    let store = PreferenceStore::open_default()?;
    if store.remove_exception(app_id)? {
        showln!(yellow_bold, app_id, gray_dim, " is no longer exempted");
    } else {
        showln!(orange_bold, app_id, gray_dim, " was not exempted");
    }
    Ok(())
}

fn handle_show_config() -> Result<()> {
    let store = PreferenceStore::open_default()?;
    let prefs = store.snapshot();

    showln!(
        yellow_bold,
        "┌─",
        white_bold,
        " SNIPKEY",
        yellow_bold,
        " ───────────────────────────────────────────────────────"
    );
    showln!(yellow_bold, "│ ", green_bold, store.path().display());
    showln!(yellow_bold, "│ ", gray_dim, "trigger      ", white_bold, prefs.trigger);
    for (app_id, display_name) in &prefs.exceptions {
        showln!(
            yellow_bold,
            "│ ",
            yellow_bold,
            "▫ ",
            gray_dim,
            app_id,
            cyan_bold,
            " ⋯ ",
            white_bold,
            display_name
        );
    }
    showln!(
        yellow_bold,
        "│ ",
        gray_dim,
        "overlay      ",
        white_bold,
        format!("{}x{}, gap {}", prefs.overlay.width, prefs.overlay.height, prefs.overlay.caret_gap)
    );
    showln!(
        yellow_bold,
        "│ ",
        gray_dim,
        "replacement  ",
        white_bold,
        format!(
            "settle {}ms, key delay {}ms, restore clipboard {}",
            prefs.replacement.paste_settle_ms, prefs.replacement.key_delay_ms, prefs.replacement.restore_clipboard
        )
    );
    showln!(
        yellow_bold,
        "└───────────────────────────────────────────────────────────────"
    );
    Ok(())
}

fn display_help() {
    showln!(yellow_bold, "snipkey", gray_dim, " type a trigger, pick a symbol, keep typing");
    showln!(white_bold, "  snipkey                      ", gray_dim, "run the daemon");
    showln!(white_bold, "  snipkey trigger <c>          ", gray_dim, "change the trigger character");
    showln!(white_bold, "  snipkey exempt <exe> [name]  ", gray_dim, "never capture in an application");
    showln!(white_bold, "  snipkey unexempt <exe>       ", gray_dim, "capture in an application again");
    showln!(white_bold, "  snipkey config               ", gray_dim, "print the current preferences");
}
