//! Values the daemon and the viewer must agree on.

pub const WS_PORT: u16 = 7700;
pub const BIND_ADDR: &str = "127.0.0.1";

pub const FFT_SIZE: usize = 4096;
pub const BAR_COUNT: usize = 70;
pub const SAMPLE_RATE: u32 = 44_100;
/// Spectrum snapshots computed per second; one capture chunk per snapshot.
pub const PROCESS_RATE: u32 = 60;
pub const FREQ_MIN: f32 = 50.0;
pub const FREQ_MAX: f32 = 16_000.0;
pub const SEND_FPS: u32 = 30;

/// Incoming frames larger than this are treated as a protocol violation.
pub const MAX_COMMAND_PAYLOAD: usize = 4096;

pub const ACCEPTED_FPS: [u32; 3] = [24, 30, 60];
pub const ACCEPTED_FREQ_MAX: [u32; 5] = [10_000, 12_000, 14_000, 16_000, 18_000];
pub const ACCEPTED_BAR_COUNTS: [usize; 8] = [8, 16, 24, 36, 70, 72, 100, 144];

pub fn frame_samples(sample_rate: u32) -> usize {
    (sample_rate / PROCESS_RATE).max(1) as usize
}
