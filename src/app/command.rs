use serde::Serialize;

use crate::audio::capture::SourceInfo;
use crate::protocol::{ACCEPTED_BAR_COUNTS, ACCEPTED_FPS, ACCEPTED_FREQ_MAX};

/// A text command from the viewer. Values outside the accepted sets never
/// parse, so anything constructed here is safe to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    GetSources,
    SetSource(String),
    SetFps(u32),
    SetFreqMax(u32),
    SetBarCount(usize),
}

impl Command {
    pub fn parse(msg: &str) -> Option<Self> {
        if msg == "GET_SOURCES" {
            return Some(Command::GetSources);
        }
        if let Some(name) = msg.strip_prefix("SET_SOURCE:") {
            let name = name.trim();
            return (!name.is_empty()).then(|| Command::SetSource(name.to_string()));
        }
        if let Some(v) = msg.strip_prefix("SET_FPS:") {
            let fps = v.trim().parse().ok()?;
            return ACCEPTED_FPS.contains(&fps).then_some(Command::SetFps(fps));
        }
        if let Some(v) = msg.strip_prefix("SET_FREQ_MAX:") {
            let hz = v.trim().parse().ok()?;
            return ACCEPTED_FREQ_MAX.contains(&hz).then_some(Command::SetFreqMax(hz));
        }
        if let Some(v) = msg.strip_prefix("SET_BAR_COUNT:") {
            let count = v.trim().parse().ok()?;
            return ACCEPTED_BAR_COUNTS.contains(&count).then_some(Command::SetBarCount(count));
        }
        None
    }
}

/// JSON acknowledgement sent back as a text frame, e.g. `{"fpsChanged":30}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Ack {
    FpsChanged(u32),
    FreqMaxChanged(u32),
    BarCountChanged(usize),
    SourceChanged(String),
    SourceError(String),
    Sources(Vec<SourceInfo>),
}

impl Ack {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
