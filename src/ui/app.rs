use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Gauge, Paragraph, Wrap},
};

use super::components::{centered_rect, phase_color, validation_color};
use crate::app_state::{AppState, Field, SessionPhase, format_bytes};
use crate::commands::is_valid_url;

const TUBEGRAB_ASCII: &str = r#" _         _                          _
| |_ _  _| |__  ___ __ _ _ _ __ _| |__
|  _| || | '_ \/ -_) _` | '_/ _` | '_ \
 \__|\_,_|_.__/\___\__, |_| \__,_|_.__/
                   |___/"#;

/// Width of the label column in the form, including the focus marker
const LABEL_WIDTH: usize = 14;

#[derive(Default)]
pub struct App;

impl App {
    /// Render the ASCII art header
    fn render_header(&self, f: &mut Frame, area: Rect) {
        let header = Paragraph::new(TUBEGRAB_ASCII)
            .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center);

        f.render_widget(header, area);
    }

    /// Render the complete UI
    pub fn render(&mut self, f: &mut Frame, state: &AppState) {
        let size = f.size();
        let form_height = state.form.visible_fields().len() as u16 + 2;

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(5),           // ASCII art header
                Constraint::Length(form_height), // Form
                Constraint::Length(3),           // Progress gauge
                Constraint::Length(4),           // Status
                Constraint::Min(0),
                Constraint::Length(1), // Help bar
            ])
            .split(size);

        self.render_header(f, chunks[0]);
        self.render_form(f, chunks[1], state);
        self.render_progress(f, chunks[2], state);
        self.render_status(f, chunks[3], state);
        self.render_help_bar(f, chunks[5], state);

        if state.error_message.is_some() {
            self.render_error_popup(f, size, state);
        }
    }

    /// Render the input form, one field per line
    fn render_form(&self, f: &mut Frame, area: Rect, state: &AppState) {
        let form = &state.form;
        let running = state.controller.is_running();
        let fields = form.visible_fields();

        let lines: Vec<Line> = fields
            .iter()
            .map(|field| {
                let focused = *field == form.focus;
                let marker = if focused { "> " } else { "  " };
                let label = format!("{}{}:", marker, field.label());
                let label_style = if focused {
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(Color::Cyan)
                };

                let value = form.value(*field);
                let value_span = match field {
                    Field::Url => {
                        let color = validation_color(&value, is_valid_url(&value));
                        Span::styled(value, Style::default().fg(color))
                    }
                    Field::Destination => Span::raw(value),
                    _ if focused => Span::styled(
                        format!("◀ {} ▶", value),
                        Style::default().add_modifier(Modifier::BOLD),
                    ),
                    _ => Span::raw(format!("  {}", value)),
                };

                Line::from(vec![
                    Span::styled(format!("{:<width$}", label, width = LABEL_WIDTH), label_style),
                    value_span,
                ])
            })
            .collect();

        let title = if running {
            "Download (running, Esc to cancel)"
        } else {
            "Download"
        };
        let form_widget = Paragraph::new(lines).block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(Style::default().fg(if running { Color::DarkGray } else { Color::Yellow })),
        );
        f.render_widget(form_widget, area);

        // Set cursor position when editing a text field
        if form.focus.is_text() && !running && state.error_message.is_none() {
            if let Some(row) = fields.iter().position(|field| *field == form.focus) {
                let typed = form.value(form.focus).chars().count();
                let x = area.x + 1 + (LABEL_WIDTH + typed) as u16;
                let y = area.y + 1 + row as u16;
                if x < area.x + area.width.saturating_sub(1) {
                    f.set_cursor(x, y);
                }
            }
        }
    }

    /// Render the progress gauge for the current session
    fn render_progress(&self, f: &mut Frame, area: Rect, state: &AppState) {
        let session = state.controller.session();
        let percent = session.progress.percent.clamp(0.0, 100.0);

        let label = match session.phase {
            SessionPhase::Idle => String::new(),
            SessionPhase::Running => {
                let progress = &session.progress;
                let mut label = format!("{:.1}%", percent);
                if let Some(downloaded) = progress.downloaded_bytes {
                    label.push_str(&format!(" | {}", format_bytes(downloaded)));
                    if let Some(total) = progress.total_bytes {
                        label.push_str(&format!(" / {}", format_bytes(total)));
                    }
                }
                format!(
                    "{} | {} | ETA {}",
                    label,
                    progress.speed_display(),
                    progress.eta_display()
                )
            }
            _ => format!("{:.1}%", percent),
        };

        let gauge = Gauge::default()
            .block(Block::default().title("Progress").borders(Borders::ALL))
            .gauge_style(Style::default().fg(match session.phase {
                SessionPhase::Running => Color::Blue,
                ref other => phase_color(other),
            }))
            .ratio(percent / 100.0)
            .label(label);

        f.render_widget(gauge, area);
    }

    /// Render status text and session details
    fn render_status(&self, f: &mut Frame, area: Rect, state: &AppState) {
        let session = state.controller.session();
        let mut lines = vec![Line::from(Span::styled(
            session.status_line(),
            Style::default().fg(phase_color(&session.phase)),
        ))];

        if let (Some(request), Some(started)) = (&session.request, session.started_at) {
            if session.phase != SessionPhase::Idle {
                lines.push(Line::from(vec![
                    Span::styled("Started: ", Style::default().fg(Color::Gray)),
                    Span::raw(started.format("%H:%M:%S").to_string()),
                    Span::styled("  Output: ", Style::default().fg(Color::Gray)),
                    Span::raw(request.destination.display().to_string()),
                ]));
            }
        }

        let status = Paragraph::new(lines)
            .block(Block::default().title("Status").borders(Borders::ALL))
            .wrap(Wrap { trim: true });

        f.render_widget(status, area);
    }

    /// Render the status bar
    fn render_help_bar(&self, f: &mut Frame, area: Rect, state: &AppState) {
        let help_text = if state.error_message.is_some() {
            "Any key: dismiss"
        } else if state.controller.is_running() {
            "Esc: cancel download | Ctrl+C: quit"
        } else {
            "Tab/↑/↓: field | ←/→: change option | Enter: start | Ctrl+C: quit"
        };

        let help = Paragraph::new(help_text)
            .style(Style::default().fg(Color::Gray))
            .alignment(Alignment::Left);

        f.render_widget(help, area);
    }

    /// Render error popup
    fn render_error_popup(&self, f: &mut Frame, area: Rect, state: &AppState) {
        if let Some(error) = &state.error_message {
            let popup_area = centered_rect(60, 20, area);

            // Clear background
            f.render_widget(Clear, popup_area);

            let error_text = Paragraph::new(error.as_str())
                .block(
                    Block::default()
                        .title("Error")
                        .borders(Borders::ALL)
                        .border_style(Style::default().fg(Color::Red)),
                )
                .wrap(Wrap { trim: true })
                .alignment(Alignment::Center);

            f.render_widget(error_text, popup_area);

            if popup_area.height > 3 {
                let help_area = Rect {
                    x: popup_area.x + 1,
                    y: popup_area.y + popup_area.height - 2,
                    width: popup_area.width.saturating_sub(2),
                    height: 1,
                };

                let help = Paragraph::new("Press any key to close")
                    .style(Style::default().fg(Color::Gray))
                    .alignment(Alignment::Center);

                f.render_widget(help, help_area);
            }
        }
    }
}
