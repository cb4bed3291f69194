use anyhow::{Context, Result};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use crate::app::command::{Ack, Command};
use crate::audio::capture::{AudioSource, SourceProvider};
use crate::audio::spectrum::{SpectrumParams, SpectrumProcessor};
use crate::data::config::Config;
use crate::net::frame;
use crate::net::server::WsServer;

/// Pause between polls while nobody is listening.
const IDLE_SLEEP: Duration = Duration::from_millis(50);
const SOURCE_ERROR: &str = "Failed to connect to source";

/// Capture, analysis and the WebSocket endpoint, driven from one thread.
pub struct Bridge<P: SourceProvider> {
    config: Config,
    provider: P,
    source: Box<dyn AudioSource>,
    processor: SpectrumProcessor,
    server: WsServer,
    commands: Receiver<String>,
    chunk: Vec<f32>,
    idle: bool,
    last_send: Instant,
}

impl<P: SourceProvider> Bridge<P> {
    pub fn new(config: Config, provider: P) -> Result<Self> {
        let source = provider
            .open(config.source.as_deref())
            .context("open capture source")?;
        let processor = SpectrumProcessor::new(spectrum_params(&config, source.sample_rate()))
            .context("configure spectrum processor")?;
        let (tx, commands) = mpsc::channel();
        let server = WsServer::bind(&config.bind_addr, config.port, tx)
            .with_context(|| format!("bind {}:{}", config.bind_addr, config.port))?;

        Ok(Self {
            chunk: vec![0.0; processor.params().frame_samples],
            config,
            provider,
            source,
            processor,
            server,
            commands,
            idle: true,
            last_send: Instant::now(),
        })
    }

    /// Iterates until `running` turns false. Capture failures end the loop.
    pub fn run(&mut self, running: impl Fn() -> bool) -> Result<()> {
        while running() {
            self.step()?;
        }
        log::info!("shutting down");
        Ok(())
    }

    /// One pass: network, commands, then at most one analysed chunk.
    pub fn step(&mut self) -> Result<()> {
        self.server.poll();
        while let Ok(msg) = self.commands.try_recv() {
            match Command::parse(&msg) {
                Some(cmd) => self.apply(cmd),
                None => log::debug!("ignoring command {msg:?}"),
            }
        }

        if !self.server.has_client() {
            if !self.idle {
                log::debug!("client gone, sensitivity was {:.3}", self.processor.sensitivity());
            }
            self.idle = true;
            thread::sleep(IDLE_SLEEP);
            return Ok(());
        }
        if self.idle {
            // Start every session from fresh audio and fresh adaptive state.
            self.idle = false;
            self.source.flush();
            self.reset_processor();
            self.last_send = Instant::now();
        }

        let interval = self.send_interval();
        self.source.read_chunk(&mut self.chunk).context("audio capture failed")?;
        let bars = self.processor.process_frame(&self.chunk)?;
        if self.last_send.elapsed() >= interval {
            let payload = frame::encode_bars(bars);
            self.server.send_binary(&payload);
            self.last_send = Instant::now();
        }
        Ok(())
    }

    fn send_interval(&self) -> Duration {
        Duration::from_millis(self.config.send_interval_ms())
    }

    fn reset_processor(&mut self) {
        let params = *self.processor.params();
        if let Err(e) = self.processor.reinit(params) {
            log::warn!("spectrum reset failed: {e}");
        }
    }

    fn apply(&mut self, cmd: Command) {
        log::debug!("command: {cmd:?}");
        match cmd {
            Command::GetSources => {
                let sources = self.provider.list().unwrap_or_else(|e| {
                    log::warn!("listing sources failed: {e}");
                    Vec::new()
                });
                self.ack(Ack::Sources(sources));
            }
            Command::SetSource(name) => self.switch_source(name),
            Command::SetFps(fps) => {
                self.config.send_fps = fps;
                self.ack(Ack::FpsChanged(fps));
            }
            Command::SetFreqMax(hz) => {
                let mut next = self.config.clone();
                next.freq_max = hz as f32;
                if self.reconfigure(next) {
                    self.ack(Ack::FreqMaxChanged(hz));
                }
            }
            Command::SetBarCount(count) => {
                let mut next = self.config.clone();
                next.bar_count = count;
                if self.reconfigure(next) {
                    self.ack(Ack::BarCountChanged(count));
                }
            }
        }
    }

    /// Rebuilds the processor for `next`; keeps the old one on failure.
    fn reconfigure(&mut self, next: Config) -> bool {
        let params = spectrum_params(&next, self.source.sample_rate());
        match self.processor.reinit(params) {
            Ok(()) => {
                self.config = next;
                self.chunk.resize(params.frame_samples, 0.0);
                log::info!(
                    "spectrum: {} bars, {}-{} Hz",
                    params.bar_count,
                    params.freq_min,
                    params.freq_max
                );
                true
            }
            Err(e) => {
                log::warn!("spectrum reconfiguration rejected: {e}");
                false
            }
        }
    }

    fn switch_source(&mut self, name: String) {
        if name == self.source.name() {
            return;
        }
        let opened = self.provider.open(Some(&name)).map_err(anyhow::Error::from).and_then(|source| {
            let params = spectrum_params(&self.config, source.sample_rate());
            let processor = SpectrumProcessor::new(params)?;
            Ok((source, processor))
        });
        match opened {
            Ok((mut source, processor)) => {
                source.flush();
                self.chunk = vec![0.0; processor.params().frame_samples];
                self.source = source;
                self.processor = processor;
                self.config.source = Some(name.clone());
                log::info!("switched source to {name}");
                self.ack(Ack::SourceChanged(name));
            }
            Err(e) => {
                log::warn!("cannot switch source to {name}: {e:#}");
                self.ack(Ack::SourceError(SOURCE_ERROR.to_string()));
            }
        }
    }

    fn ack(&mut self, ack: Ack) {
        self.server.send_text(&ack.to_json());
    }
}

/// Clamps the upper band edge to Nyquist so low-rate devices stay usable.
fn spectrum_params(config: &Config, sample_rate: u32) -> SpectrumParams {
    let nyquist = sample_rate as f32 / 2.0;
    SpectrumParams {
        fft_size: config.fft_size,
        ..SpectrumParams::new(sample_rate, config.bar_count, config.freq_min, config.freq_max.min(nyquist))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::{CaptureError, SourceInfo};
    use crate::net::frame::{read_frame, Frame, Opcode};
    use std::io::{Read, Write};
    use std::net::TcpStream;

    struct ToneSource {
        name: String,
        sample_rate: u32,
        phase: f32,
        chunks_left: Option<usize>,
    }

    impl AudioSource for ToneSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn read_chunk(&mut self, out: &mut [f32]) -> Result<(), CaptureError> {
            if let Some(left) = self.chunks_left.as_mut() {
                if *left == 0 {
                    return Err(CaptureError::DeviceLost);
                }
                *left -= 1;
            }
            let step = 2.0 * std::f32::consts::PI * 1000.0 / self.sample_rate as f32;
            for s in out.iter_mut() {
                *s = 0.5 * self.phase.sin();
                self.phase = (self.phase + step) % (2.0 * std::f32::consts::PI);
            }
            Ok(())
        }

        fn flush(&mut self) {}
    }

    struct FakeProvider {
        names: Vec<&'static str>,
        chunk_limit: Option<usize>,
    }

    impl FakeProvider {
        fn new(names: &[&'static str]) -> Self {
            Self { names: names.to_vec(), chunk_limit: None }
        }
    }

    impl SourceProvider for FakeProvider {
        fn open(&self, name: Option<&str>) -> Result<Box<dyn AudioSource>, CaptureError> {
            let name = match name {
                None => self.names.first().copied().ok_or(CaptureError::NoDevice)?,
                Some(n) => self
                    .names
                    .iter()
                    .copied()
                    .find(|&known| known == n)
                    .ok_or_else(|| CaptureError::UnknownDevice(n.to_string()))?,
            };
            Ok(Box::new(ToneSource {
                name: name.to_string(),
                sample_rate: 44_100,
                phase: 0.0,
                chunks_left: self.chunk_limit,
            }))
        }

        fn list(&self) -> Result<Vec<SourceInfo>, CaptureError> {
            Ok(self
                .names
                .iter()
                .map(|n| SourceInfo { name: n.to_string(), desc: n.to_uppercase() })
                .collect())
        }
    }

    fn test_config() -> Config {
        Config { port: 0, ..Config::default() }
    }

    fn connect(bridge: &mut Bridge<FakeProvider>) -> (TcpStream, Receiver<Frame>) {
        let addr = bridge.server.local_addr().unwrap();
        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .write_all(
                b"GET / HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
                  Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
            )
            .unwrap();
        for _ in 0..100 {
            bridge.step().unwrap();
            if bridge.server.has_client() {
                break;
            }
        }
        assert!(bridge.server.has_client());

        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            stream.read_exact(&mut byte).unwrap();
            head.push(byte[0]);
        }
        assert!(head.starts_with(b"HTTP/1.1 101"));

        let mut reader = stream.try_clone().unwrap();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            while let Ok(f) = read_frame(&mut reader, usize::MAX) {
                if tx.send(f).is_err() {
                    break;
                }
            }
        });
        (stream, rx)
    }

    fn step_until(bridge: &mut Bridge<FakeProvider>, rx: &Receiver<Frame>, want: impl Fn(&Frame) -> bool) -> Frame {
        for _ in 0..1000 {
            bridge.step().unwrap();
            while let Ok(f) = rx.try_recv() {
                if want(&f) {
                    return f;
                }
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("expected frame never arrived");
    }

    fn command(stream: &mut TcpStream, text: &str) {
        stream
            .write_all(&frame::client_frame(Opcode::Text, text.as_bytes(), [1, 2, 3, 4]))
            .unwrap();
    }

    fn is_text(f: &Frame) -> bool {
        f.opcode == Opcode::Text
    }

    fn text(f: &Frame) -> String {
        String::from_utf8(f.payload.clone()).unwrap()
    }

    fn bars(f: &Frame) -> Vec<f32> {
        f.payload
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    #[test]
    fn streams_bar_frames_to_a_client() {
        let mut bridge = Bridge::new(test_config(), FakeProvider::new(&["monitor"])).unwrap();
        let (_stream, rx) = connect(&mut bridge);

        let f = step_until(&mut bridge, &rx, |f| f.opcode == Opcode::Binary);
        let levels = bars(&f);
        assert_eq!(levels.len(), crate::protocol::BAR_COUNT);
        assert!(levels.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn bar_count_change_is_acked_and_resizes_frames() {
        let mut bridge = Bridge::new(test_config(), FakeProvider::new(&["monitor"])).unwrap();
        let (mut stream, rx) = connect(&mut bridge);

        command(&mut stream, "SET_BAR_COUNT:24");
        let ack = step_until(&mut bridge, &rx, is_text);
        assert_eq!(text(&ack), r#"{"barCountChanged":24}"#);
        let f = step_until(&mut bridge, &rx, |f| f.opcode == Opcode::Binary);
        assert_eq!(f.payload.len(), 24 * 4);
    }

    #[test]
    fn fps_and_freq_max_are_acked() {
        let mut bridge = Bridge::new(test_config(), FakeProvider::new(&["monitor"])).unwrap();
        let (mut stream, rx) = connect(&mut bridge);

        command(&mut stream, "SET_FPS:60");
        assert_eq!(text(&step_until(&mut bridge, &rx, is_text)), r#"{"fpsChanged":60}"#);
        assert_eq!(bridge.config.send_interval_ms(), 16);

        command(&mut stream, "SET_FREQ_MAX:12000");
        assert_eq!(text(&step_until(&mut bridge, &rx, is_text)), r#"{"freqMaxChanged":12000}"#);
        assert_eq!(bridge.processor.params().freq_max, 12_000.0);
    }

    #[test]
    fn source_listing_and_switching() {
        let mut bridge = Bridge::new(test_config(), FakeProvider::new(&["monitor", "line-in"])).unwrap();
        let (mut stream, rx) = connect(&mut bridge);

        command(&mut stream, "GET_SOURCES");
        let listing = text(&step_until(&mut bridge, &rx, is_text));
        assert!(listing.starts_with(r#"{"sources":[{"name":"monitor""#));

        command(&mut stream, "SET_SOURCE:nowhere");
        assert_eq!(
            text(&step_until(&mut bridge, &rx, is_text)),
            r#"{"sourceError":"Failed to connect to source"}"#
        );
        assert_eq!(bridge.source.name(), "monitor");

        command(&mut stream, "SET_SOURCE:line-in");
        assert_eq!(text(&step_until(&mut bridge, &rx, is_text)), r#"{"sourceChanged":"line-in"}"#);
        assert_eq!(bridge.source.name(), "line-in");
        assert_eq!(bridge.config.source.as_deref(), Some("line-in"));
    }

    #[test]
    fn unknown_commands_are_ignored() {
        let mut bridge = Bridge::new(test_config(), FakeProvider::new(&["monitor"])).unwrap();
        let (mut stream, rx) = connect(&mut bridge);

        command(&mut stream, "SET_BAR_COUNT:13");
        command(&mut stream, "HELLO");
        command(&mut stream, "SET_FPS:30");
        // the first text reply belongs to the only valid command
        assert_eq!(text(&step_until(&mut bridge, &rx, is_text)), r#"{"fpsChanged":30}"#);
        assert_eq!(bridge.processor.params().bar_count, crate::protocol::BAR_COUNT);
    }

    #[test]
    fn idle_bridge_does_not_touch_capture() {
        let provider = FakeProvider { names: vec!["monitor"], chunk_limit: Some(0) };
        let mut bridge = Bridge::new(test_config(), provider).unwrap();
        for _ in 0..3 {
            bridge.step().unwrap();
        }
        assert!(bridge.idle);
    }

    #[test]
    fn capture_failure_ends_the_loop() {
        let provider = FakeProvider { names: vec!["monitor"], chunk_limit: Some(3) };
        let mut bridge = Bridge::new(test_config(), provider).unwrap();
        let (_stream, _rx) = connect(&mut bridge);

        let err = (0..10).find_map(|_| bridge.step().err()).expect("capture should fail");
        assert!(format!("{err:#}").contains("audio capture failed"));
    }

    #[test]
    fn low_rate_sources_clamp_freq_max() {
        let params = spectrum_params(&Config::default(), 22_050);
        assert_eq!(params.freq_max, 11_025.0);
        assert!(SpectrumProcessor::new(params).is_ok());
    }

    #[test]
    fn configured_fft_size_is_used() {
        let config = Config { fft_size: 2048, ..Config::default() };
        let params = spectrum_params(&config, 44_100);
        assert_eq!(params.fft_size, 2048);
        assert_eq!(params.frame_samples, 735);

        let bad = Config { fft_size: 3000, ..Config::default() };
        assert!(SpectrumProcessor::new(spectrum_params(&bad, 44_100)).is_err());
    }
}
