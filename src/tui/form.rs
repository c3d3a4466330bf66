//! Editable fields of the setup form.

/// How a field takes input and is rendered.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldKind {
    Text,
    /// Text shown as `*`
    Secret,
    Integer,
    Float,
    /// Space/Enter or Left/Right to flip
    Toggle,
    /// Left/Right to cycle
    Choice(Vec<String>),
    /// Directory, Space opens the browser
    Directory,
}

#[derive(Clone, Debug)]
pub struct FormField {
    /// Flag name without the leading `--`, underscores for dashes
    pub name: &'static str,
    pub label: &'static str,
    pub value: String,
    pub required: bool,
    pub hint: &'static str,
    pub cursor_pos: usize,
    pub kind: FieldKind,
}

impl FormField {
    pub fn text(name: &'static str, label: &'static str, default: &str, hint: &'static str) -> Self {
        Self::with_kind(name, label, default, FieldKind::Text, hint)
    }

    pub fn secret(name: &'static str, label: &'static str, hint: &'static str) -> Self {
        Self::with_kind(name, label, "", FieldKind::Secret, hint)
    }

    pub fn integer(name: &'static str, label: &'static str, default: i64, hint: &'static str) -> Self {
        Self::with_kind(name, label, &default.to_string(), FieldKind::Integer, hint)
    }

    pub fn float(name: &'static str, label: &'static str, default: &str, hint: &'static str) -> Self {
        Self::with_kind(name, label, default, FieldKind::Float, hint)
    }

    pub fn toggle(name: &'static str, label: &'static str, default: bool) -> Self {
        Self::with_kind(name, label, if default { "true" } else { "false" }, FieldKind::Toggle, "Space to toggle")
    }

    pub fn choice(name: &'static str, label: &'static str, options: &[&str]) -> Self {
        let options: Vec<String> = options.iter().map(|s| s.to_string()).collect();
        let default = options.first().cloned().unwrap_or_default();
        Self::with_kind(name, label, &default, FieldKind::Choice(options), "←/→ to change")
    }

    pub fn directory(name: &'static str, label: &'static str, hint: &'static str) -> Self {
        Self::with_kind(name, label, "", FieldKind::Directory, hint)
    }

    fn with_kind(name: &'static str, label: &'static str, default: &str, kind: FieldKind, hint: &'static str) -> Self {
        Self {
            name,
            label,
            value: default.to_string(),
            required: false,
            hint,
            cursor_pos: default.len(),
            kind,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn is_on(&self) -> bool {
        self.kind == FieldKind::Toggle && self.value == "true"
    }

    pub fn accepts_text_input(&self) -> bool {
        matches!(
            self.kind,
            FieldKind::Text | FieldKind::Secret | FieldKind::Integer | FieldKind::Float | FieldKind::Directory
        )
    }

    fn accepts_char(&self, c: char) -> bool {
        match self.kind {
            FieldKind::Integer => c.is_ascii_digit(),
            FieldKind::Float => c.is_ascii_digit() || c == '.',
            FieldKind::Toggle | FieldKind::Choice(_) => false,
            _ => !c.is_control(),
        }
    }

    /// Flip a toggle or step a choice by `step` (wrapping).
    pub fn cycle(&mut self, step: isize) {
        match self.kind {
            FieldKind::Toggle => {
                self.value = if self.value == "true" { "false" } else { "true" }.to_string();
            }
            FieldKind::Choice(ref options) if !options.is_empty() => {
                let current = options.iter().position(|o| *o == self.value).unwrap_or(0);
                let next = (current as isize + step).rem_euclid(options.len() as isize) as usize;
                self.value = options[next].clone();
            }
            _ => {}
        }
    }

    /// Value as displayed (secrets masked).
    pub fn display_value(&self) -> String {
        match self.kind {
            FieldKind::Secret => "*".repeat(self.value.chars().count()),
            _ => self.value.clone(),
        }
    }
}

pub struct FormState {
    pub fields: Vec<FormField>,
    /// `fields.len()` is the Run button
    pub active: usize,
    pub error_message: Option<String>,
}

impl FormState {
    pub fn new(fields: Vec<FormField>) -> Self {
        Self {
            fields,
            active: 0,
            error_message: None,
        }
    }

    pub fn is_run_button_focused(&self) -> bool {
        self.active >= self.fields.len()
    }

    pub fn active_field(&self) -> Option<&FormField> {
        self.fields.get(self.active)
    }

    pub fn active_field_mut(&mut self) -> Option<&mut FormField> {
        self.fields.get_mut(self.active)
    }

    pub fn field(&self, name: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn value(&self, name: &str) -> &str {
        self.field(name).map(|f| f.value.trim()).unwrap_or("")
    }

    pub fn is_on(&self, name: &str) -> bool {
        self.field(name).is_some_and(FormField::is_on)
    }

    pub fn next_field(&mut self) {
        self.active = (self.active + 1) % (self.fields.len() + 1);
        self.cursor_to_end();
    }

    pub fn prev_field(&mut self) {
        let total = self.fields.len() + 1;
        self.active = (self.active + total - 1) % total;
        self.cursor_to_end();
    }

    fn cursor_to_end(&mut self) {
        if let Some(field) = self.active_field_mut() {
            field.cursor_pos = field.value.len();
        }
    }

    pub fn insert_char(&mut self, c: char) {
        if let Some(field) = self.active_field_mut()
            && field.accepts_char(c)
            && field.value.len() < 256
        {
            field.value.insert(field.cursor_pos, c);
            field.cursor_pos += c.len_utf8();
        }
        self.error_message = None;
    }

    pub fn backspace(&mut self) {
        if let Some(field) = self.active_field_mut()
            && field.accepts_text_input()
            && let Some(prev) = field.value[..field.cursor_pos].chars().next_back()
        {
            field.cursor_pos -= prev.len_utf8();
            field.value.remove(field.cursor_pos);
        }
        self.error_message = None;
    }

    pub fn delete_char(&mut self) {
        if let Some(field) = self.active_field_mut()
            && field.accepts_text_input()
            && field.cursor_pos < field.value.len()
        {
            field.value.remove(field.cursor_pos);
        }
        self.error_message = None;
    }

    pub fn move_left(&mut self) {
        if let Some(field) = self.active_field_mut() {
            if field.accepts_text_input() {
                if let Some(prev) = field.value[..field.cursor_pos].chars().next_back() {
                    field.cursor_pos -= prev.len_utf8();
                }
            } else {
                field.cycle(-1);
            }
        }
    }

    pub fn move_right(&mut self) {
        if let Some(field) = self.active_field_mut() {
            if field.accepts_text_input() {
                if let Some(next) = field.value[field.cursor_pos..].chars().next() {
                    field.cursor_pos += next.len_utf8();
                }
            } else {
                field.cycle(1);
            }
        }
    }

    pub fn move_home(&mut self) {
        if let Some(field) = self.active_field_mut() {
            field.cursor_pos = 0;
        }
    }

    pub fn move_end(&mut self) {
        self.cursor_to_end();
    }

    pub fn toggle_active(&mut self) {
        if let Some(field) = self.active_field_mut() {
            field.cycle(1);
        }
        self.error_message = None;
    }

    /// Store a path picked in the browser into field `index`.
    pub fn set_value(&mut self, index: usize, value: String) {
        if let Some(field) = self.fields.get_mut(index) {
            field.cursor_pos = value.len();
            field.value = value;
        }
    }

    pub fn missing_required(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|f| f.required && f.value.trim().is_empty())
            .map(|f| f.label)
            .collect()
    }
}
