//! Application state for the setup form.

use super::events::Action;
use super::file_browser::DirectoryBrowser;
use super::form::{FieldKind, FormState};
use super::process::{ProcessEvent, ProcessManager};
use super::setup;

const MAX_OUTPUT_LINES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Configure,
    Running,
    Completed,
}

pub struct App {
    pub screen: Screen,
    pub form: FormState,
    pub browser: Option<DirectoryBrowser>,
    pub process: Option<ProcessManager>,
    /// Command line of the last run, password masked
    pub command: Option<String>,
    pub output_lines: Vec<String>,
    pub scroll_offset: usize,
    pub auto_scroll: bool,
    /// Output rows on screen, updated every frame
    pub visible_height: usize,
    pub should_quit: bool,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        Self {
            screen: Screen::Configure,
            form: setup::create_setup_form(),
            browser: None,
            process: None,
            command: None,
            output_lines: Vec::new(),
            scroll_offset: 0,
            auto_scroll: true,
            visible_height: 20,
            should_quit: false,
        }
    }

    /// Route a key press to the browser, the form or the output view.
    pub fn handle_action(&mut self, action: Action) {
        if self.browser.is_some() {
            self.handle_browser(action);
            return;
        }
        match self.screen {
            Screen::Configure => self.handle_form(action),
            Screen::Running => match action {
                Action::Cancel | Action::Interrupt => self.cancel_run(),
                _ => self.handle_scroll(action),
            },
            Screen::Completed => match action {
                Action::Cancel | Action::Enter => self.back_to_form(),
                Action::Interrupt => self.should_quit = true,
                _ => self.handle_scroll(action),
            },
        }
    }

    fn handle_browser(&mut self, action: Action) {
        let Some(browser) = self.browser.as_mut() else {
            return;
        };
        match action {
            Action::Cancel => self.browser = None,
            Action::Up => browser.select_previous(),
            Action::Down => browser.select_next(),
            Action::PageUp => browser.page(-10),
            Action::PageDown => browser.page(10),
            Action::Backspace => browser.go_up(),
            Action::Enter => browser.enter_selected(),
            Action::Space => {
                let path = browser.current_dir.to_string_lossy().to_string();
                let index = browser.field_index;
                self.form.set_value(index, path);
                self.browser = None;
            }
            _ => {}
        }
    }

    fn handle_form(&mut self, action: Action) {
        match action {
            Action::Cancel | Action::Interrupt => self.should_quit = true,
            Action::Up => self.form.prev_field(),
            Action::Down => self.form.next_field(),
            Action::Left => self.form.move_left(),
            Action::Right => self.form.move_right(),
            Action::Home => self.form.move_home(),
            Action::End => self.form.move_end(),
            Action::Backspace => self.form.backspace(),
            Action::Delete => self.form.delete_char(),
            Action::Enter if self.form.is_run_button_focused() => self.start_run(),
            Action::Enter | Action::Space => self.activate_field(action),
            Action::Char(c) => self.form.insert_char(c),
            _ => {}
        }
    }

    fn activate_field(&mut self, action: Action) {
        let Some((kind, value)) = self.form.active_field().map(|f| (f.kind.clone(), f.value.clone())) else {
            return;
        };
        match kind {
            FieldKind::Directory if action == Action::Space => {
                self.browser = Some(DirectoryBrowser::new(&value, self.form.active));
            }
            FieldKind::Toggle | FieldKind::Choice(_) => self.form.toggle_active(),
            _ if action == Action::Space => self.form.insert_char(' '),
            _ => self.form.next_field(),
        }
    }

    fn handle_scroll(&mut self, action: Action) {
        let page = (self.visible_height / 2).max(1);
        match action {
            Action::Up => self.scroll_up(1),
            Action::Down => self.scroll_down(1),
            Action::PageUp => self.scroll_up(page),
            Action::PageDown => self.scroll_down(page),
            Action::End => {
                self.auto_scroll = true;
                self.follow_output();
            }
            _ => {}
        }
    }

    pub fn start_run(&mut self) {
        if setup::validate(&mut self.form).is_err() {
            return;
        }
        let args = setup::form_to_args(&self.form);
        let envs = setup::form_to_env(&self.form);

        self.output_lines.clear();
        self.scroll_offset = 0;
        self.auto_scroll = true;
        self.command = Some(setup::build_command_preview(&self.form));

        match ProcessManager::spawn(setup::RECORDER_BINARY, &args, &envs) {
            Ok(process) => {
                self.process = Some(process);
                self.screen = Screen::Running;
            }
            Err(e) => {
                self.add_output(format!("Error: {}", e));
                self.screen = Screen::Completed;
            }
        }
    }

    /// Esc while recording: stop the recorder, keep its output visible.
    pub fn cancel_run(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.kill();
        }
        self.add_output("[Cancelled]".to_string());
        self.screen = Screen::Completed;
    }

    fn back_to_form(&mut self) {
        self.screen = Screen::Configure;
        self.process = None;
    }

    /// Drain recorder output and notice when it exits.
    pub fn poll_process(&mut self) {
        let mut events = Vec::new();
        if let Some(ref process) = self.process {
            while let Some(event) = process.try_recv() {
                events.push(event);
            }
        }
        for event in events {
            match event {
                ProcessEvent::Output(line) => self.add_output(line),
                ProcessEvent::Error(err) => self.add_output(format!("[Error: {}]", err)),
            }
        }

        let exit = self.process.as_mut().and_then(|p| p.check_exit());
        if let Some(code) = exit {
            self.process = None;
            self.add_output(match code {
                Some(0) => "[Recording finished]".to_string(),
                Some(code) => format!("[Process exited with code: {}]", code),
                None => "[Process terminated]".to_string(),
            });
            self.screen = Screen::Completed;
        }
    }

    pub fn add_output(&mut self, line: String) {
        if self.output_lines.len() >= MAX_OUTPUT_LINES {
            self.output_lines.drain(0..MAX_OUTPUT_LINES / 10);
        }
        self.output_lines.push(strip_ansi(&line));
        self.follow_output();
    }

    fn max_scroll(&self) -> usize {
        self.output_lines.len().saturating_sub(self.visible_height)
    }

    fn follow_output(&mut self) {
        if self.auto_scroll {
            self.scroll_offset = self.max_scroll();
        } else {
            self.scroll_offset = self.scroll_offset.min(self.max_scroll());
        }
    }

    pub fn set_visible_height(&mut self, height: usize) {
        self.visible_height = height.max(1);
        self.follow_output();
    }

    fn scroll_up(&mut self, amount: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(amount);
        self.auto_scroll = false;
    }

    fn scroll_down(&mut self, amount: usize) {
        self.scroll_offset = (self.scroll_offset + amount).min(self.max_scroll());
        if self.scroll_offset >= self.max_scroll() {
            self.auto_scroll = true;
        }
    }
}

/// Drop CSI escape sequences and control characters other than tab.
fn strip_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            if chars.next() == Some('[') {
                for seq in chars.by_ref() {
                    if seq.is_ascii_alphabetic() {
                        break;
                    }
                }
            }
        } else if !c.is_control() || c == '\t' {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[32m INFO\x1b[0m Connected"), " INFO Connected");
        assert_eq!(strip_ansi("a\tb\r"), "a\tb");
    }

    #[test]
    fn test_run_with_missing_fields_stays_on_form() {
        let mut app = App::new();
        app.start_run();
        assert_eq!(app.screen, Screen::Configure);
        assert!(app.form.error_message.is_some());
        assert!(app.process.is_none());
    }

    #[test]
    fn test_output_follows_tail_until_scrolled() {
        let mut app = App::new();
        app.set_visible_height(2);
        for i in 0..5 {
            app.add_output(format!("line {}", i));
        }
        assert_eq!(app.scroll_offset, 3);

        app.handle_scroll(Action::Up);
        assert_eq!(app.scroll_offset, 2);
        app.add_output("line 5".to_string());
        assert_eq!(app.scroll_offset, 2);

        app.handle_scroll(Action::End);
        assert_eq!(app.scroll_offset, 4);
    }

    #[test]
    fn test_escape_on_form_quits() {
        let mut app = App::new();
        app.handle_action(Action::Cancel);
        assert!(app.should_quit);
    }

    #[test]
    fn test_toggle_with_space() {
        let mut app = App::new();
        app.form.active = app.form.fields.iter().position(|f| f.name == "triggers").unwrap();
        app.handle_action(Action::Space);
        assert!(app.form.is_on("triggers"));
    }
}
