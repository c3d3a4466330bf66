//! Directory picker for the BIDS root field.

use std::fs;
use std::path::{Path, PathBuf};

pub struct DirectoryBrowser {
    pub current_dir: PathBuf,
    /// Subdirectory names, sorted case-insensitively; `..` first when there is a parent
    pub entries: Vec<String>,
    pub selected: usize,
    pub error: Option<String>,
    /// Form field the choice is written back to
    pub field_index: usize,
}

impl DirectoryBrowser {
    /// Start at `start` if it is a directory, else its nearest existing parent,
    /// else the working directory.
    pub fn new(start: &str, field_index: usize) -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let current_dir = Path::new(start)
            .ancestors()
            .find(|p| !p.as_os_str().is_empty() && p.is_dir())
            .map(Path::to_path_buf)
            .unwrap_or(cwd);

        let mut browser = Self {
            current_dir,
            entries: Vec::new(),
            selected: 0,
            error: None,
            field_index,
        };
        browser.refresh();
        browser
    }

    pub fn refresh(&mut self) {
        self.entries.clear();
        self.selected = 0;
        self.error = None;

        if self.current_dir.parent().is_some() {
            self.entries.push("..".to_string());
        }

        match fs::read_dir(&self.current_dir) {
            Ok(read) => {
                let mut dirs: Vec<String> = read
                    .flatten()
                    .filter(|e| e.path().is_dir())
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .filter(|name| !name.starts_with('.'))
                    .collect();
                dirs.sort_by_key(|name| name.to_lowercase());
                self.entries.extend(dirs);
            }
            Err(e) => self.error = Some(format!("Cannot read directory: {}", e)),
        }
    }

    pub fn select_previous(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn select_next(&mut self) {
        if self.selected + 1 < self.entries.len() {
            self.selected += 1;
        }
    }

    pub fn page(&mut self, delta: isize) {
        let last = self.entries.len().saturating_sub(1) as isize;
        self.selected = (self.selected as isize + delta).clamp(0, last.max(0)) as usize;
    }

    /// Open the highlighted entry.
    pub fn enter_selected(&mut self) {
        let Some(name) = self.entries.get(self.selected) else {
            return;
        };
        if name == ".." {
            self.go_up();
        } else {
            self.current_dir = self.current_dir.join(name);
            self.refresh();
        }
    }

    pub fn go_up(&mut self) {
        if let Some(parent) = self.current_dir.parent() {
            self.current_dir = parent.to_path_buf();
            self.refresh();
        }
    }

    /// First entry index shown for a list `height` rows tall.
    pub fn scroll_offset(&self, height: usize) -> usize {
        if height == 0 {
            return 0;
        }
        self.selected.saturating_sub(height - 1)
    }
}
