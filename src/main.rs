use anyhow::{Context, Result, anyhow};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::{
    io,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{sync::mpsc, time};
use tracing::{debug, info, warn};

mod app_state;
mod commands;
mod config;
mod error;
mod logging;
mod ui;

use app_state::{AppState, DownloadForm, events::*};
use commands::{DownloadController, YtDlpEngine};
use config::Settings;
use ui::{App, handle_input};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env().context("reading configuration")?;
    logging::init_tracing(&settings.log_file)?;
    info!(
        yt_dlp = %settings.yt_dlp.display(),
        output_dir = %settings.output_dir.display(),
        "tubegrab starting"
    );

    // Create communication channels
    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<InputEvent>();
    let (app_tx, mut app_rx) = mpsc::unbounded_channel::<AppEvent>();
    let (action_tx, mut action_rx) = mpsc::unbounded_channel::<DownloadAction>();

    // Setup application state
    let engine = Arc::new(YtDlpEngine::from_settings(&settings));
    let controller = DownloadController::new(engine, app_tx);
    let form = DownloadForm::new(
        settings.output_dir.to_string_lossy(),
        settings.resolution,
    );
    let mut app_state = AppState::new(form, controller);
    let mut app = App::default();

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Terminal reads block, so they get their own thread
    let input_task = tokio::task::spawn_blocking(move || {
        let tick_rate = Duration::from_millis(250);

        while !input_tx.is_closed() {
            match event::poll(tick_rate) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(error = %e, "terminal poll failed");
                    break;
                }
            }

            let event = match event::read() {
                Ok(Event::Key(key)) => InputEvent::Key(key),
                Ok(Event::Mouse(mouse)) => InputEvent::Mouse(mouse),
                Ok(Event::Resize(w, h)) => InputEvent::Resize(w, h),
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, "terminal read failed");
                    break;
                }
            };
            if input_tx.send(event).is_err() {
                break;
            }
        }
    });

    // Main event loop
    let mut last_render = Instant::now();
    let render_rate = Duration::from_millis(16); // ~60 FPS

    let result: Result<()> = loop {
        tokio::select! {
            // Handle input events
            input_event = input_rx.recv() => {
                match input_event {
                    Some(event) => {
                        handle_input(event, &mut app_state, &action_tx);
                        if app_state.should_quit {
                            break Ok(());
                        }
                    }
                    None => break Err(anyhow!("terminal input stopped")),
                }
            }

            // Handle download actions
            Some(action) = action_rx.recv() => {
                handle_download_action(action, &mut app_state);
            }

            // Handle events from the download worker
            Some(event) = app_rx.recv() => {
                handle_app_event(event, &mut app_state);
            }

            // Render UI at ~60 FPS
            _ = time::sleep_until(time::Instant::from_std(last_render + render_rate)) => {
                app_state.controller.tick(Instant::now());
                if let Err(e) = terminal.draw(|f| app.render(f, &app_state)) {
                    break Err(e.into());
                }
                last_render = Instant::now();
            }
        }
    };

    // A running download is cancelled so yt-dlp does not outlive the UI
    app_state.controller.shutdown().await;
    drop(input_rx);
    let _ = input_task.await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    info!("tubegrab exiting");
    result
}

/// Handle download actions in the main event loop
fn handle_download_action(action: DownloadAction, state: &mut AppState) {
    match action {
        DownloadAction::Start(request) => {
            if let Err(e) = state.controller.submit(request) {
                warn!(error = %e, "download request rejected");
                state.error_message = Some(e.to_string());
            }
        }
        DownloadAction::Cancel => {
            if !state.controller.cancel() {
                debug!("cancel requested with no running download");
            }
        }
    }
}

/// Handle application events from background tasks
fn handle_app_event(event: AppEvent, state: &mut AppState) {
    match event {
        AppEvent::Progress { id, progress } => state.controller.on_progress(id, progress),
        AppEvent::Status { id, message } => state.controller.on_status(id, message),
        AppEvent::Finished { id, outcome } => state.controller.on_outcome(id, outcome),
    }
}
