//! Line rendering for the progress modes

use chrono::{DateTime, Utc};
use crossterm::style::{Color, Stylize};
use serde::Serialize;
use std::fmt::Write as _;
use std::str::FromStr;
use std::time::Duration;

use super::event::{FinalStatus, ProgressEvent};

/// How progress lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressMode {
    /// `Tty` when stdout is a terminal, `Plain` otherwise.
    #[default]
    Auto,
    Plain,
    Tty,
    Json,
}

impl ProgressMode {
    /// Replace `Auto` by a concrete mode.
    pub fn resolve(self, is_tty: bool) -> ProgressMode {
        match self {
            ProgressMode::Auto if is_tty => ProgressMode::Tty,
            ProgressMode::Auto => ProgressMode::Plain,
            other => other,
        }
    }
}

impl FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(ProgressMode::Auto),
            "plain" => Ok(ProgressMode::Plain),
            "tty" => Ok(ProgressMode::Tty),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!(
                "unknown progress mode {:?} (auto, plain, tty, json)",
                other
            )),
        }
    }
}

const PALETTE: [Color; 6] = [
    Color::Cyan,
    Color::Magenta,
    Color::Blue,
    Color::Yellow,
    Color::Green,
    Color::DarkCyan,
];

/// Label attached to a writer view.
#[derive(Debug, Clone)]
pub(crate) struct Prefix {
    pub name: String,
    pub visible: bool,
    pub slot: usize,
}

#[derive(Serialize)]
struct JsonLine<'a> {
    at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<&'a str>,
    elapsed_ms: u64,
    event: &'a ProgressEvent,
}

/// Render one event as one or more complete, newline-terminated lines.
pub(crate) fn render(
    mode: ProgressMode,
    prefix: Option<&Prefix>,
    elapsed: Duration,
    event: &ProgressEvent,
) -> String {
    if mode == ProgressMode::Json {
        let line = JsonLine {
            at: Utc::now(),
            target: prefix.map(|p| p.name.as_str()),
            elapsed_ms: elapsed.as_millis() as u64,
            event,
        };
        let mut out = serde_json::to_string(&line).unwrap_or_default();
        out.push('\n');
        return out;
    }

    let tty = mode == ProgressMode::Tty;
    let head = match prefix.filter(|p| p.visible) {
        Some(p) if tty => format!(
            "{} ",
            format!("[{}]", p.name).with(PALETTE[p.slot % PALETTE.len()]).bold()
        ),
        Some(p) => format!("[{}] ", p.name),
        None => String::new(),
    };
    let head = format!("{}{:>6.1}s | ", head, elapsed.as_secs_f64());

    let (body, failed) = describe(event);
    let mut out = String::with_capacity(body.len() + head.len() + 1);
    for line in body.split('\n') {
        let line = line.trim_end_matches('\r');
        if tty && failed {
            let _ = writeln!(out, "{}{}", head, line.red());
        } else {
            let _ = writeln!(out, "{}{}", head, line);
        }
    }
    out
}

/// Human text for an event, and whether it reports a failure.
fn describe(event: &ProgressEvent) -> (String, bool) {
    match event {
        ProgressEvent::Started => ("started".to_string(), false),
        ProgressEvent::Step { name } => (format!("=> {}", name), false),
        ProgressEvent::Output { line, .. } => (line.clone(), false),
        ProgressEvent::Finished { status } => match status {
            FinalStatus::Succeeded => ("done".to_string(), false),
            FinalStatus::Failed { error } => (format!("FAILED: {}", error), true),
            FinalStatus::Canceled { error } => (format!("CANCELED: {}", error), true),
        },
    }
}
