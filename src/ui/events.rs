use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tokio::sync::mpsc;

use crate::app_state::{AppState, events::*};

/// Handle input events and update application state
pub fn handle_input(
    event: InputEvent,
    state: &mut AppState,
    action_tx: &mpsc::UnboundedSender<DownloadAction>,
) {
    match event {
        InputEvent::Key(key) => {
            // Windows reports releases too
            if key.kind == KeyEventKind::Press {
                handle_key_event(key, state, action_tx);
            }
        }
        InputEvent::Mouse(_) => {}
        InputEvent::Resize(_width, _height) => {
            // Terminal resize is handled automatically by ratatui
        }
    }
}

/// Handle keyboard events
fn handle_key_event(
    key: KeyEvent,
    state: &mut AppState,
    action_tx: &mpsc::UnboundedSender<DownloadAction>,
) {
    // Handle Ctrl-C to quit
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        state.should_quit = true;
        return;
    }

    // Clear any error message on key press
    if state.error_message.is_some() {
        state.error_message = None;
        return;
    }

    let form = &mut state.form;
    match key.code {
        KeyCode::Enter => {
            let _ = action_tx.send(DownloadAction::Start(form.to_request()));
        }
        KeyCode::Esc => {
            let _ = action_tx.send(DownloadAction::Cancel);
        }
        KeyCode::Tab | KeyCode::Down => form.focus_next(),
        KeyCode::BackTab | KeyCode::Up => form.focus_prev(),
        KeyCode::Left => form.cycle_selector(false),
        KeyCode::Right => form.cycle_selector(true),
        KeyCode::Char(' ') if !form.focus.is_text() => form.cycle_selector(true),
        KeyCode::Char(c) => form.input_char(c),
        KeyCode::Backspace => form.backspace(),
        KeyCode::Delete => form.clear_field(),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::{DownloadForm, Field, Resolution};
    use crate::commands::DownloadController;
    use crate::commands::testing::{FakeEngine, Script};

    fn state() -> AppState {
        let (app_tx, _app_rx) = mpsc::unbounded_channel();
        let engine = FakeEngine::new(Script::WaitForCancel);
        AppState::new(
            DownloadForm::new("/tmp/out", Resolution::Best),
            DownloadController::new(engine, app_tx),
        )
    }

    fn press(state: &mut AppState, tx: &mpsc::UnboundedSender<DownloadAction>, code: KeyCode) {
        handle_input(
            InputEvent::Key(KeyEvent::new(code, KeyModifiers::NONE)),
            state,
            tx,
        );
    }

    #[test]
    fn test_typing_and_submitting() {
        let mut state = state();
        let (tx, mut rx) = mpsc::unbounded_channel();

        for c in "https://youtu.be/abc".chars() {
            press(&mut state, &tx, KeyCode::Char(c));
        }
        press(&mut state, &tx, KeyCode::Tab);
        press(&mut state, &tx, KeyCode::Tab);
        assert_eq!(state.form.focus, Field::Resolution);
        press(&mut state, &tx, KeyCode::Right);
        press(&mut state, &tx, KeyCode::Enter);

        match rx.try_recv() {
            Ok(DownloadAction::Start(request)) => {
                assert_eq!(request.url, "https://youtu.be/abc");
                assert_eq!(request.resolution, Resolution::P1080);
            }
            other => panic!("expected a start action, got {:?}", other),
        }
    }

    #[test]
    fn test_escape_requests_cancel() {
        let mut state = state();
        let (tx, mut rx) = mpsc::unbounded_channel();

        press(&mut state, &tx, KeyCode::Esc);

        assert!(matches!(rx.try_recv(), Ok(DownloadAction::Cancel)));
    }

    #[test]
    fn test_error_popup_swallows_next_key() {
        let mut state = state();
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.error_message = Some("Please enter a video URL".to_string());

        press(&mut state, &tx, KeyCode::Enter);

        assert!(state.error_message.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_ctrl_c_quits() {
        let mut state = state();
        let (tx, _rx) = mpsc::unbounded_channel();

        handle_input(
            InputEvent::Key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            &mut state,
            &tx,
        );

        assert!(state.should_quit);
    }
}
