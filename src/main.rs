//! Triggersync - TUI launcher for QTM recordings with trigger sync
//!
//! This is the main entry point when running `cargo run`. It fills in a session
//! form and runs `triggersync-record` with the resulting arguments.

use std::io;
use std::panic;

use anyhow::Result;
use crossterm::{
    cursor::{Hide, Show},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};

mod tui;

use tui::{
    App,
    events::{Event, EventHandler, action_for},
    ui::{OUTPUT_CHROME_HEIGHT, render},
};

fn main() -> Result<()> {
    triggersync::display_license_notice("triggersync");

    // Restore the terminal before printing a panic
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        cleanup_terminal();
        original_hook(panic_info);
    }));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, Hide)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal);

    cleanup_terminal();

    result
}

fn cleanup_terminal() {
    let _ = disable_raw_mode();
    let _ = execute!(io::stdout(), LeaveAlternateScreen, Show);
}

fn run_app(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    let mut app = App::new();
    let events = EventHandler::default();

    loop {
        let height = terminal.size()?.height.saturating_sub(OUTPUT_CHROME_HEIGHT);
        app.set_visible_height(height as usize);

        terminal.draw(|frame| render(frame, &app))?;

        match events.next()? {
            Event::Key(key) => app.handle_action(action_for(&key)),
            Event::Tick => app.poll_process(),
            Event::Resize => terminal.autoresize()?,
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}
