use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::Color,
};

use crate::app_state::SessionPhase;

/// Helper function to create a centered rectangle for popups
pub fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

/// Get validation color for URL input field
pub fn validation_color(input: &str, is_valid: bool) -> Color {
    if input.is_empty() {
        Color::Gray
    } else if is_valid {
        Color::Green
    } else {
        Color::Red
    }
}

pub fn phase_color(phase: &SessionPhase) -> Color {
    match phase {
        SessionPhase::Idle => Color::Gray,
        SessionPhase::Running => Color::Yellow,
        SessionPhase::Succeeded(_) => Color::Green,
        SessionPhase::Failed(_) => Color::Red,
        SessionPhase::Cancelled => Color::Magenta,
    }
}
