/// Per-bar FFT bin ranges and EQ weights.
///
/// Ranges are closed (`lo..=hi`), cover the first half-spectrum only and
/// every bar owns at least one bin no other bar starts on.
#[derive(Debug, Clone, PartialEq)]
pub struct BinTable {
    lo: Vec<usize>,
    hi: Vec<usize>,
    eq: Vec<f32>,
}

impl BinTable {
    /// Returns `None` when `bar_count` bars cannot each get a unique bin
    /// below `fft_size / 2`.
    pub fn new(
        sample_rate: u32,
        fft_size: usize,
        bar_count: usize,
        freq_min: f32,
        freq_max: f32,
    ) -> Option<Self> {
        let half = fft_size / 2;
        if bar_count == 0 || half < 2 {
            return None;
        }

        let ratio = freq_max / freq_min;
        let mut cutoffs = Vec::with_capacity(bar_count + 1);
        for i in 0..=bar_count {
            let freq = freq_min * ratio.powf(i as f32 / bar_count as f32);
            let mut bin = ((freq * fft_size as f32 / sample_rate as f32).round() as usize).max(1);
            if let Some(&prev) = cutoffs.last() {
                if bin <= prev {
                    bin = prev + 1;
                }
            }
            cutoffs.push(bin);
        }

        let mut lo = Vec::with_capacity(bar_count);
        let mut hi = Vec::with_capacity(bar_count);
        for pair in cutoffs.windows(2) {
            let start = pair[0];
            if start > half - 1 {
                return None;
            }
            let end = (pair[1] - 1).clamp(start, half - 1);
            lo.push(start);
            hi.push(end);
        }

        let bin_hz = sample_rate as f32 / fft_size as f32;
        let eq = lo
            .iter()
            .zip(&hi)
            .map(|(&l, &h)| {
                let center = (l + h) as f32 * 0.5 * bin_hz;
                (center / freq_min).sqrt()
            })
            .collect();

        Some(Self { lo, hi, eq })
    }

    pub fn len(&self) -> usize {
        self.lo.len()
    }

    pub fn range(&self, bar: usize) -> (usize, usize) {
        (self.lo[bar], self.hi[bar])
    }

    pub fn eq(&self, bar: usize) -> f32 {
        self.eq[bar]
    }

    /// Center frequency in Hz of a bar's bin range.
    #[cfg(test)]
    pub fn center_hz(&self, bar: usize, sample_rate: u32, fft_size: usize) -> f32 {
        (self.lo[bar] + self.hi[bar]) as f32 * 0.5 * sample_rate as f32 / fft_size as f32
    }

    /// Mean magnitude per bar.
    pub fn average(&self, mags: &[f32], out: &mut [f32]) {
        for (bar, slot) in out.iter_mut().enumerate().take(self.len()) {
            let (lo, hi) = self.range(bar);
            let count = hi + 1 - lo;
            let sum: f32 = mags[lo..=hi].iter().sum();
            *slot = if count > 0 { sum / count as f32 } else { 0.0 };
        }
    }
}
