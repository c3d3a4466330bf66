//! The recording setup form and its conversion to `triggersync-record`
//! arguments.

use triggersync::cli::PASSWORD_ENV;
use triggersync::trigger::parse_address;

use super::form::{FieldKind, FormField, FormState};

pub const RECORDER_BINARY: &str = "triggersync-record";

/// Fields only passed on when their toggle is on.
const TRIGGER_FIELDS: &[&str] = &["backend", "address", "serial_port", "pulse"];
const GAIT_FIELDS: &[&str] = &["threshold"];

/// Passed through the environment instead of the command line.
const ENV_FIELDS: &[(&str, &str)] = &[("password", PASSWORD_ENV)];

pub fn create_setup_form() -> FormState {
    FormState::new(vec![
        FormField::text("host", "Host", "127.0.0.1", "QTM host"),
        FormField::text("version", "Version", "1.22", "RT protocol version"),
        FormField::secret("password", "Password", "QTM control password"),
        FormField::float("duration", "Duration (s) *", "10.0", "Capture time").required(),
        FormField::text("subject", "Subject *", "", "BIDS subject label").required(),
        FormField::text("task", "Task *", "walking", "BIDS task label").required(),
        FormField::directory("bids_root", "BIDS Root *", "Space to browse").required(),
        FormField::toggle("triggers", "Triggers", false),
        FormField::choice("backend", "Trigger Hub", &["parallel", "serial"]),
        FormField::text("address", "Address (hex)", "0x4000", "Parallel port base address"),
        FormField::text("serial_port", "Serial Port", "COM6", "e.g. COM6 or /dev/ttyUSB0"),
        FormField::float("pulse", "Pulse (ms)", "", "5 parallel, 10 serial"),
        FormField::integer("start_code", "Start Code", 1, "TaskStart code (1-255)"),
        FormField::integer("end_code", "End Code", 2, "TaskEnd code (1-255)"),
        FormField::toggle("gait", "Gait Events", false),
        FormField::float("threshold", "Threshold (N)", "20.0", "Force-plate contact threshold"),
    ])
}

/// Check values the recorder would reject, before spawning it.
pub fn validate(form: &mut FormState) -> Result<(), String> {
    let result = check(form);
    form.error_message = result.as_ref().err().cloned();
    result
}

fn check(form: &FormState) -> Result<(), String> {
    let missing = form.missing_required();
    if !missing.is_empty() {
        return Err(format!("Required fields missing: {}", missing.join(", ")));
    }

    match form.value("duration").parse::<f64>() {
        Ok(d) if d > 0.0 => {}
        _ => return Err("Duration must be a positive number".to_string()),
    }

    for name in ["start_code", "end_code"] {
        match form.value(name).parse::<u8>() {
            Ok(code) if code > 0 => {}
            _ => return Err(format!("{} must be 1-255", name.replace('_', " "))),
        }
    }

    if form.is_on("triggers") && form.value("backend") == "parallel" {
        parse_address(form.value("address")).map_err(|e| e.to_string())?;
    }
    Ok(())
}

/// Command-line arguments for the recorder.
pub fn form_to_args(form: &FormState) -> Vec<String> {
    let triggers = form.is_on("triggers");
    let gait = form.is_on("gait");
    let mut args = Vec::new();

    for field in &form.fields {
        let value = field.value.trim();
        if value.is_empty()
            || (!triggers && TRIGGER_FIELDS.contains(&field.name))
            || (!gait && GAIT_FIELDS.contains(&field.name))
            || ENV_FIELDS.iter().any(|(name, _)| *name == field.name)
        {
            continue;
        }

        let flag = format!("--{}", field.name.replace('_', "-"));
        match field.kind {
            FieldKind::Toggle => {
                if field.is_on() {
                    args.push(flag);
                }
            }
            _ => {
                args.push(flag);
                args.push(value.to_string());
            }
        }
    }

    args
}

/// Environment variables for the recorder, for fields kept off its command line.
pub fn form_to_env(form: &FormState) -> Vec<(&'static str, String)> {
    ENV_FIELDS
        .iter()
        .filter_map(|(name, var)| {
            let value = form.value(name).trim();
            (!value.is_empty()).then(|| (*var, value.to_string()))
        })
        .collect()
}

/// Command shown under the form; secret values are masked.
pub fn build_command_preview(form: &FormState) -> String {
    let mut parts: Vec<String> = form_to_env(form)
        .into_iter()
        .map(|(var, _)| format!("{}=****", var))
        .collect();
    parts.push(RECORDER_BINARY.to_string());
    parts.extend(form_to_args(form));
    parts.join(" ")
}
