use rustfft::num_complex::Complex;

/// In-place iterative radix-2 Cooley-Tukey transform.
///
/// The size is fixed at construction and must be a power of two. Twiddle
/// factors are computed once in double precision; stage `len` reads every
/// `n / len`-th entry of the table.
pub struct Radix2Fft {
    n: usize,
    twiddles: Vec<Complex<f32>>,
}

impl Radix2Fft {
    pub fn new(n: usize) -> Self {
        assert!(n.is_power_of_two(), "fft size must be a power of two, got {n}");
        let twiddles = (0..n / 2)
            .map(|k| {
                let angle = -2.0 * std::f64::consts::PI * k as f64 / n as f64;
                Complex::new(angle.cos() as f32, angle.sin() as f32)
            })
            .collect();
        Self { n, twiddles }
    }

    pub fn process(&self, buf: &mut [Complex<f32>]) {
        assert_eq!(buf.len(), self.n, "buffer length does not match fft size");
        bit_reverse(buf);

        let n = self.n;
        let mut len = 2;
        while len <= n {
            let half = len / 2;
            let stride = n / len;
            for start in (0..n).step_by(len) {
                for j in 0..half {
                    let w = self.twiddles[j * stride];
                    let u = buf[start + j];
                    let v = buf[start + j + half] * w;
                    buf[start + j] = u + v;
                    buf[start + j + half] = u - v;
                }
            }
            len <<= 1;
        }
    }
}

fn bit_reverse(buf: &mut [Complex<f32>]) {
    let n = buf.len();
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j ^= bit;
        if i < j {
            buf.swap(i, j);
        }
    }
}

/// Window + transform + half-spectrum magnitudes with buffers sized once.
pub struct FftEngine {
    fft_size: usize,
    window: Vec<f32>,
    fft: Radix2Fft,
    buf: Vec<Complex<f32>>,
    mags: Vec<f32>,
}

impl FftEngine {
    pub fn new(fft_size: usize) -> Self {
        Self {
            fft_size,
            window: hann_window(fft_size),
            fft: Radix2Fft::new(fft_size),
            buf: vec![Complex::new(0.0, 0.0); fft_size],
            mags: vec![0.0; fft_size / 2],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// `input` must hold exactly `fft_size` samples.
    pub fn magnitudes(&mut self, input: &[f32]) -> &[f32] {
        for ((slot, &x), &w) in self.buf.iter_mut().zip(input).zip(&self.window) {
            *slot = Complex::new(x * w, 0.0);
        }

        self.fft.process(&mut self.buf);

        for (m, c) in self.mags.iter_mut().zip(&self.buf) {
            *m = c.norm();
        }
        &self.mags
    }
}

fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 - 0.5 * ((2.0 * std::f32::consts::PI * i as f32) / n as f32).cos())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustfft::FftPlanner;

    fn pseudo_random(n: usize) -> Vec<f32> {
        let mut state = 0x2545_f491_u32;
        (0..n)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state as f32 / u32::MAX as f32) * 2.0 - 1.0
            })
            .collect()
    }

    #[test]
    fn matches_reference_transform() {
        for &n in &[1usize, 2, 8, 64, 1024, 4096] {
            let input = pseudo_random(n);
            let mut ours: Vec<Complex<f32>> = input.iter().map(|&x| Complex::new(x, 0.0)).collect();
            let mut reference = ours.clone();

            Radix2Fft::new(n).process(&mut ours);
            FftPlanner::<f32>::new().plan_fft_forward(n).process(&mut reference);

            let tol = 1e-4 * n as f32;
            for (a, b) in ours.iter().zip(&reference) {
                assert!((a - b).norm() <= tol, "n={n}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn impulse_is_flat() {
        let mut buf = vec![Complex::new(0.0f32, 0.0); 16];
        buf[0] = Complex::new(1.0, 0.0);
        Radix2Fft::new(16).process(&mut buf);
        for c in &buf {
            assert!((c.re - 1.0).abs() < 1e-6);
            assert!(c.im.abs() < 1e-6);
        }
    }

    #[test]
    fn sine_peaks_at_its_bin() {
        let n = 1024;
        let k = 37;
        let input: Vec<f32> = (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * k as f32 * i as f32 / n as f32).sin())
            .collect();
        let mut engine = FftEngine::new(n);
        let mags = engine.magnitudes(&input);
        assert_eq!(mags.len(), n / 2);
        let peak = mags
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(peak, Some(k));
        // Hann-windowed unit sine peaks at n/4.
        assert!((mags[k] - n as f32 / 4.0).abs() < 1.0);
    }

    #[test]
    #[should_panic]
    fn rejects_non_power_of_two() {
        let _ = Radix2Fft::new(1000);
    }
}
