//! Rendering for the setup form, the recorder output and the directory picker.

use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};

use super::app::{App, Screen};
use super::file_browser::DirectoryBrowser;
use super::form::{FieldKind, FormField, FormState};
use super::setup;

const LABEL_WIDTH: u16 = 18;

/// Rows around the output list: title, command box, list borders and help line.
pub const OUTPUT_CHROME_HEIGHT: u16 = 9;

pub fn render(frame: &mut Frame, app: &App) {
    match app.screen {
        Screen::Configure => render_form(frame, &app.form),
        Screen::Running | Screen::Completed => render_output(frame, app),
    }
    if let Some(ref browser) = app.browser {
        render_browser(frame, browser);
    }
}

fn help_item(key: &str, action: &str, key_color: Color) -> Vec<Span<'static>> {
    vec![
        Span::styled("[", Style::default().fg(Color::DarkGray)),
        Span::styled(key.to_string(), Style::default().fg(key_color)),
        Span::styled(format!("] {}  ", action), Style::default().fg(Color::DarkGray)),
    ]
}

fn help_line(items: &[(&str, &str)]) -> Line<'static> {
    let mut spans = vec![Span::raw(" ")];
    for (i, (key, action)) in items.iter().enumerate() {
        let color = if i == 0 { Color::Green } else { Color::Cyan };
        spans.extend(help_item(key, action, color));
    }
    Line::from(spans)
}

fn title_block(text: &str, color: Color) -> Paragraph<'static> {
    Paragraph::new(Line::from(Span::styled(
        text.to_string(),
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    )))
    .alignment(Alignment::Center)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(color)),
    )
}

fn render_form(frame: &mut Frame, form: &FormState) {
    let preview = format!("$ {}", setup::build_command_preview(form));
    let inner_width = frame.area().width.saturating_sub(2).max(1) as usize;
    let preview_height = preview.len().div_ceil(inner_width) as u16 + 2;

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(preview_height),
            Constraint::Length(1),
        ])
        .split(frame.area());

    frame.render_widget(title_block("QTM & Trigger Sync Setup", Color::Cyan), chunks[0]);

    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Session ")
        .border_style(Style::default().fg(Color::White));
    let inner = block.inner(chunks[1]);
    frame.render_widget(block, chunks[1]);

    // One row per field plus the Run button, scrolled to keep the focus visible
    let rows = inner.height as usize;
    let total = form.fields.len() + 1;
    let offset = if rows == 0 {
        0
    } else {
        form.active.saturating_sub(rows - 1).min(total.saturating_sub(rows))
    };
    for (row, index) in (offset..total).take(rows).enumerate() {
        let area = Rect {
            x: inner.x,
            y: inner.y + row as u16,
            width: inner.width,
            height: 1,
        };
        let is_active = index == form.active;
        match form.fields.get(index) {
            Some(field) => render_field(frame, field, area, is_active),
            None => render_run_button(frame, area, is_active),
        }
    }

    let command = Paragraph::new(preview)
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Command ")
                .border_style(Style::default().fg(Color::Green)),
        );
    frame.render_widget(command, chunks[2]);

    let footer = match form.error_message {
        Some(ref err) => Line::from(vec![
            Span::styled(" Error: ", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)),
            Span::styled(err.clone(), Style::default().fg(Color::Red)),
        ]),
        None => help_line(&[("Enter on Run", "Start"), ("↑↓", "Navigate"), ("Space", "Toggle/Browse"), ("Esc", "Quit")]),
    };
    frame.render_widget(Paragraph::new(footer), chunks[3]);
}

fn render_field(frame: &mut Frame, field: &FormField, area: Rect, is_active: bool) {
    let label_style = if is_active {
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
    } else if field.required {
        Style::default().fg(Color::White)
    } else {
        Style::default().fg(Color::Gray)
    };
    let label = Span::styled(
        format!("{:<width$}", format!("{}:", field.label), width = LABEL_WIDTH as usize),
        label_style,
    );

    let active_style = Style::default().fg(Color::Yellow).bg(Color::DarkGray);
    let value = match field.kind {
        FieldKind::Toggle => {
            let (text, color) = if field.is_on() { ("ON", Color::Green) } else { ("OFF", Color::Red) };
            vec![Span::styled(format!(" {} ", text), Style::default().fg(color).add_modifier(Modifier::BOLD))]
        }
        FieldKind::Choice(ref options) => {
            let position = options.iter().position(|o| *o == field.value).unwrap_or(0);
            let style = if is_active { active_style } else { Style::default().fg(Color::White) };
            vec![
                Span::styled(format!("< {} >", field.value), style),
                Span::styled(format!(" ({}/{})", position + 1, options.len()), Style::default().fg(Color::DarkGray)),
            ]
        }
        _ if is_active => {
            let shown = field.display_value();
            // Cursor position in the masked text counts characters
            let cursor = field.value[..field.cursor_pos.min(field.value.len())].chars().count();
            let split = shown.char_indices().nth(cursor).map(|(i, _)| i).unwrap_or(shown.len());
            let mut spans = vec![Span::styled(format!("[{}|{}]", &shown[..split], &shown[split..]), active_style)];
            if field.kind == FieldKind::Directory {
                spans.push(Span::styled(" [Space]", Style::default().fg(Color::Cyan)));
            }
            spans
        }
        _ if field.value.is_empty() => vec![Span::styled(format!("[{}]", field.hint), Style::default().fg(Color::DarkGray))],
        _ => vec![Span::styled(format!("[{}]", field.display_value()), Style::default().fg(Color::White))],
    };

    let mut spans = vec![label, Span::raw(" ")];
    spans.extend(value);
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_run_button(frame: &mut Frame, area: Rect, is_active: bool) {
    let style = if is_active {
        Style::default().fg(Color::Black).bg(Color::Green).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Green)
    };
    let button = Paragraph::new(Line::from(vec![
        Span::raw(" ".repeat(LABEL_WIDTH as usize + 1)),
        Span::styled(" Start Recording ", style),
    ]));
    frame.render_widget(button, area);
}

fn render_output(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(frame.area());

    let running = app.process.as_ref().is_some_and(|p| p.is_running());
    let (status, color) = if running {
        ("Recording", Color::Green)
    } else {
        ("Finished", Color::Yellow)
    };
    frame.render_widget(title_block(status, color), chunks[0]);

    let command = Paragraph::new(app.command.clone().unwrap_or_default())
        .style(Style::default().fg(Color::DarkGray))
        .block(Block::default().borders(Borders::ALL).title(" Command "));
    frame.render_widget(command, chunks[1]);

    let height = chunks[2].height.saturating_sub(2) as usize;
    let lines: Vec<Line> = app
        .output_lines
        .iter()
        .skip(app.scroll_offset)
        .take(height)
        .map(|l| Line::from(style_output_line(l)))
        .collect();
    let position = if app.output_lines.len() > height {
        format!(
            " [{}-{}/{}]",
            app.scroll_offset + 1,
            (app.scroll_offset + height).min(app.output_lines.len()),
            app.output_lines.len()
        )
    } else {
        String::new()
    };
    let output = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" Output{} ", position))
            .border_style(Style::default().fg(Color::White)),
    );
    frame.render_widget(output, chunks[2]);

    let help = if running {
        help_line(&[("Esc", "Cancel recording"), ("↑↓", "Scroll")])
    } else {
        help_line(&[("Enter/Esc", "Back to form"), ("↑↓", "Scroll"), ("Ctrl+C", "Quit")])
    };
    frame.render_widget(Paragraph::new(help), chunks[3]);
}

fn style_output_line(line: &str) -> Span<'_> {
    let color = if line.starts_with("[+]") {
        Color::Green
    } else if line.starts_with("[!]") || line.contains(" WARN ") {
        Color::Yellow
    } else if line.starts_with("Error") || line.contains(" ERROR ") {
        Color::Red
    } else {
        Color::White
    };
    Span::styled(line, Style::default().fg(color))
}

fn render_browser(frame: &mut Frame, browser: &DirectoryBrowser) {
    let area = frame.area();
    let width = (area.width * 8 / 10).clamp(40, 80).min(area.width);
    let height = (area.height * 8 / 10).clamp(10, 30).min(area.height);
    let dialog = Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    };
    frame.render_widget(Clear, dialog);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(3), Constraint::Length(1)])
        .split(dialog);

    let border = Style::default().fg(Color::Cyan);
    let background = Style::default().bg(Color::Black);

    let path = Paragraph::new(browser.current_dir.to_string_lossy().to_string()).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Select BIDS Root ")
            .border_style(border)
            .style(background),
    );
    frame.render_widget(path, chunks[0]);

    let list_block = Block::default().borders(Borders::ALL).border_style(border).style(background);
    match browser.error {
        Some(ref err) => {
            let error = Paragraph::new(err.clone()).style(Style::default().fg(Color::Red)).block(list_block);
            frame.render_widget(error, chunks[1]);
        }
        None => {
            let rows = chunks[1].height.saturating_sub(2) as usize;
            let offset = browser.scroll_offset(rows);
            let items: Vec<ListItem> = browser
                .entries
                .iter()
                .enumerate()
                .skip(offset)
                .take(rows)
                .map(|(i, name)| {
                    let selected = i == browser.selected;
                    let style = if selected {
                        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
                    } else {
                        Style::default().fg(Color::Cyan)
                    };
                    let prefix = if selected { "> " } else { "  " };
                    ListItem::new(Line::from(Span::styled(format!("{}{}/", prefix, name), style)))
                })
                .collect();
            frame.render_widget(List::new(items).block(list_block), chunks[1]);
        }
    }

    let help = Paragraph::new(help_line(&[
        ("Space", "Select this dir"),
        ("Enter", "Open"),
        ("Backspace", "Up"),
        ("Esc", "Cancel"),
    ]))
    .style(background)
    .alignment(Alignment::Center);
    frame.render_widget(help, chunks[2]);
}
