use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::time::Duration;
use thiserror::Error;

use crate::protocol;

/// How long `read_chunk` waits for the device before giving up.
const STALL_TIMEOUT: Duration = Duration::from_secs(2);
/// Callback packets buffered between the device thread and the reader.
const CHANNEL_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device available")]
    NoDevice,
    #[error("input device not found: {0}")]
    UnknownDevice(String),
    #[error("unsupported sample format {0:?}")]
    Format(cpal::SampleFormat),
    #[error(transparent)]
    Devices(#[from] cpal::DevicesError),
    #[error(transparent)]
    Config(#[from] cpal::DefaultStreamConfigError),
    #[error(transparent)]
    Build(#[from] cpal::BuildStreamError),
    #[error(transparent)]
    Play(#[from] cpal::PlayStreamError),
    #[error("input device disappeared")]
    DeviceLost,
    #[error("no audio received for {0:?}")]
    Stalled(Duration),
    #[error("capture stream closed")]
    Closed,
}

/// A blocking source of mono `f32` PCM.
pub trait AudioSource {
    fn name(&self) -> &str;
    fn sample_rate(&self) -> u32;
    /// Blocks until `out` is completely filled.
    fn read_chunk(&mut self, out: &mut [f32]) -> Result<(), CaptureError>;
    /// Drops everything captured so far.
    fn flush(&mut self);
}

/// Opens and enumerates sources of one capture backend.
pub trait SourceProvider {
    fn open(&self, name: Option<&str>) -> Result<Box<dyn AudioSource>, CaptureError>;
    fn list(&self) -> Result<Vec<SourceInfo>, CaptureError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    pub name: String,
    pub desc: String,
}

enum Packet {
    Samples(Vec<f32>),
    Lost,
}

/// Input device opened through cpal, downmixed to mono in the callback.
pub struct CpalSource {
    name: String,
    sample_rate: u32,
    rx: Receiver<Packet>,
    pending: VecDeque<f32>,
    lost: bool,
    _stream: cpal::Stream,
}

impl CpalSource {
    /// Opens `name`, or the best-looking loopback/monitor device when `None`.
    pub fn open(name: Option<&str>) -> Result<Self, CaptureError> {
        let device = match name {
            Some(wanted) => find_device(wanted)?,
            None => best_capture_device()
                .or_else(|| cpal::default_host().default_input_device())
                .ok_or(CaptureError::NoDevice)?,
        };
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let supported = preferred_config(&device)?;
        let channels = supported.channels().max(1) as usize;
        let sample_rate = supported.sample_rate().0;
        let format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        let (tx, rx) = mpsc::sync_channel(CHANNEL_DEPTH);
        let stream = match format {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, channels, tx, |s| s)?,
            cpal::SampleFormat::I16 => {
                build_stream::<i16>(&device, &config, channels, tx, |s| s as f32 / i16::MAX as f32)?
            }
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, channels, tx, |s| {
                (s as f32 / u16::MAX as f32) * 2.0 - 1.0
            })?,
            other => return Err(CaptureError::Format(other)),
        };
        stream.play()?;

        log::info!("capture device: {name} ({sample_rate} Hz, {channels} ch, {format:?})");
        Ok(Self {
            name,
            sample_rate,
            rx,
            pending: VecDeque::with_capacity(8192),
            lost: false,
            _stream: stream,
        })
    }
}

impl AudioSource for CpalSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_chunk(&mut self, out: &mut [f32]) -> Result<(), CaptureError> {
        while self.pending.len() < out.len() {
            if self.lost {
                return Err(CaptureError::DeviceLost);
            }
            match self.rx.recv_timeout(STALL_TIMEOUT) {
                Ok(Packet::Samples(samples)) => self.pending.extend(samples),
                Ok(Packet::Lost) => self.lost = true,
                Err(RecvTimeoutError::Timeout) => return Err(CaptureError::Stalled(STALL_TIMEOUT)),
                Err(RecvTimeoutError::Disconnected) => return Err(CaptureError::Closed),
            }
        }
        let n = out.len();
        for (slot, s) in out.iter_mut().zip(self.pending.drain(..n)) {
            *slot = s;
        }
        Ok(())
    }

    fn flush(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(Packet::Samples(_)) => {}
                Ok(Packet::Lost) => self.lost = true,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        self.pending.clear();
    }
}

pub struct CpalProvider;

impl SourceProvider for CpalProvider {
    fn open(&self, name: Option<&str>) -> Result<Box<dyn AudioSource>, CaptureError> {
        Ok(Box::new(CpalSource::open(name)?))
    }

    fn list(&self) -> Result<Vec<SourceInfo>, CaptureError> {
        list_sources()
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    tx: SyncSender<Packet>,
    convert: fn(T) -> f32,
) -> Result<cpal::Stream, CaptureError>
where
    T: cpal::SizedSample + Send + 'static,
{
    let lost_tx = tx.clone();
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            // Never block the device thread; a lagging reader loses audio instead.
            let _ = tx.try_send(Packet::Samples(downmix(data, channels, convert)));
        },
        move |err| match err {
            cpal::StreamError::DeviceNotAvailable => {
                let _ = lost_tx.try_send(Packet::Lost);
            }
            other => log::warn!("cpal stream error: {other}"),
        },
        None,
    )?;
    Ok(stream)
}

fn downmix<T: Copy>(data: &[T], channels: usize, convert: fn(T) -> f32) -> Vec<f32> {
    data.chunks(channels)
        .map(|frame| frame.iter().map(|&s| convert(s)).sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Prefers the protocol sample rate in `f32`, else whatever the device defaults to.
fn preferred_config(device: &cpal::Device) -> Result<cpal::SupportedStreamConfig, CaptureError> {
    let wanted = cpal::SampleRate(protocol::SAMPLE_RATE);
    if let Ok(ranges) = device.supported_input_configs() {
        for range in ranges {
            if range.sample_format() == cpal::SampleFormat::F32
                && range.min_sample_rate() <= wanted
                && wanted <= range.max_sample_rate()
            {
                return Ok(range.with_sample_rate(wanted));
            }
        }
    }
    Ok(device.default_input_config()?)
}

/// Input devices of the default host, default device flagged in `desc`.
pub fn list_sources() -> Result<Vec<SourceInfo>, CaptureError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let mut out = Vec::new();
    for device in host.input_devices()? {
        let Ok(name) = device.name() else {
            continue;
        };
        let desc = if default_name.as_deref() == Some(name.as_str()) {
            format!("{name} (default)")
        } else {
            name.clone()
        };
        out.push(SourceInfo { name, desc });
    }
    Ok(out)
}

fn find_device(wanted: &str) -> Result<cpal::Device, CaptureError> {
    for host_id in cpal::available_hosts() {
        let Ok(host) = cpal::host_from_id(host_id) else {
            continue;
        };
        let Ok(devices) = host.input_devices() else {
            continue;
        };
        for d in devices {
            if d.name().map(|n| n == wanted).unwrap_or(false) {
                return Ok(d);
            }
        }
    }
    Err(CaptureError::UnknownDevice(wanted.to_string()))
}

/// Substring weights for ranking capture devices by name. Loopback-style
/// sources score high, microphones and cameras low.
const NAME_WEIGHTS: &[(&str, i32)] = &[
    ("monitor", 200),
    ("loopback", 160),
    ("stereo mix", 120),
    ("what u hear", 120),
    ("output", 40),
    ("sink", 30),
    ("mic", -120),
    ("camera", -80),
    ("webcam", -80),
    ("headset", -50),
];

const HOST_WEIGHTS: &[(&str, i32)] = &[("pipe", 50), ("pulse", 40), ("jack", 10)];

/// Highest-ranked input device over every cpal host; Linux can expose
/// ALSA, JACK and PipeWire at once.
fn best_capture_device() -> Option<cpal::Device> {
    cpal::available_hosts()
        .into_iter()
        .filter_map(|id| {
            let host = cpal::host_from_id(id).ok()?;
            let devices = host.input_devices().ok()?;
            Some((host_score(&format!("{id:?}")), devices))
        })
        .flat_map(|(bonus, devices)| {
            devices.map(move |d| (bonus + device_name_score(&d.name().unwrap_or_default()), d))
        })
        .fold(None, |best: Option<(i32, cpal::Device)>, (score, d)| match best {
            Some((top, _)) if score <= top => best,
            _ => Some((score, d)),
        })
        .map(|(_, d)| d)
}

fn host_score(host_id: &str) -> i32 {
    let id = host_id.to_lowercase();
    HOST_WEIGHTS
        .iter()
        .find(|(needle, _)| id.contains(needle))
        .map_or(0, |&(_, w)| w)
}

fn device_name_score(name: &str) -> i32 {
    let name = name.to_lowercase();
    let mut score: i32 = NAME_WEIGHTS
        .iter()
        .filter(|(needle, _)| name.contains(needle))
        .map(|&(_, w)| w)
        .sum();
    if name.contains("input") && !name.contains("monitor") {
        score -= 40;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_channels() {
        let stereo = [1.0f32, 0.0, 0.5, 0.5, -1.0, 1.0];
        assert_eq!(downmix(&stereo, 2, |s| s), vec![0.5, 0.5, 0.0]);

        let mono = [0.25f32, -0.25];
        assert_eq!(downmix(&mono, 1, |s| s), vec![0.25, -0.25]);
    }

    #[test]
    fn downmix_converts_integer_formats() {
        let pcm = [i16::MAX, i16::MAX, 0, 0];
        let out = downmix(&pcm, 2, |s| s as f32 / i16::MAX as f32);
        assert_eq!(out, vec![1.0, 0.0]);
    }

    #[test]
    fn monitors_beat_microphones() {
        let monitor = device_name_score("Monitor of Built-in Audio Analog Stereo");
        let mic = device_name_score("Built-in Microphone");
        let plain = device_name_score("default");
        assert!(monitor > plain);
        assert!(plain > mic);
        assert_eq!(device_name_score("Line Input"), -40);
        assert_eq!(device_name_score("Monitor of Line Input"), 200);
    }

    #[test]
    fn pipewire_host_is_preferred() {
        assert!(host_score("PipeWire") > host_score("Alsa"));
        assert_eq!(host_score("Alsa"), 0);
    }

    #[test]
    fn sources_serialize_with_short_keys() {
        let info = SourceInfo { name: "hw:0".into(), desc: "Card \"A\"".into() };
        let json = serde_json::to_string(&info).unwrap();
        assert_eq!(json, r#"{"name":"hw:0","desc":"Card \"A\""}"#);
    }
}
