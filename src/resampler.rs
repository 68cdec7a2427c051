// Linear Resampler
// Zero-latency, zero-lookahead linear interpolation between device and protocol rates.
// Output length is round(n * out / in), so every capture tick maps to a
// deterministic frame size.

/// Rate converter for one direction of the pipeline
/// (device -> 16kHz on capture, 24kHz -> device on playback).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearResampler {
    input_rate: u32,
    output_rate: u32,
    /// Input samples advanced per output sample
    /// e.g., 48000/16000 = 3.0
    step: f64,
}

impl LinearResampler {
    pub fn new(input_rate: u32, output_rate: u32) -> Self {
        let step = if output_rate == 0 {
            1.0
        } else {
            input_rate as f64 / output_rate as f64
        };
        tracing::debug!(input_rate, output_rate, step, "linear resampler created");
        Self {
            input_rate,
            output_rate,
            step,
        }
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    pub fn is_identity(&self) -> bool {
        self.input_rate == self.output_rate
    }

    /// Number of samples `process` yields for `input_len` samples.
    pub fn output_len(&self, input_len: usize) -> usize {
        if self.is_identity() {
            return input_len;
        }
        if self.input_rate == 0 {
            return 0;
        }
        (input_len as f64 * self.output_rate as f64 / self.input_rate as f64).round() as usize
    }

    /// Resample one block. No clamping here; that happens at the codec boundary.
    pub fn process(&self, input: &[f32]) -> Vec<f32> {
        if self.is_identity() {
            return input.to_vec();
        }
        let out_len = self.output_len(input.len());
        if input.is_empty() || out_len == 0 {
            return Vec::new();
        }

        let last = input.len() - 1;
        let mut output = Vec::with_capacity(out_len);
        for i in 0..out_len {
            let pos = i as f64 * self.step;
            let idx = (pos.floor() as usize).min(last);
            let frac = (pos - idx as f64).clamp(0.0, 1.0) as f32;

            let sample_a = input[idx];
            let sample_b = input[(idx + 1).min(last)];

            // a + frac * (b - a)
            output.push(sample_a + frac * (sample_b - sample_a));
        }
        output
    }
}

/// One-shot helper for a block at `input_rate` -> `output_rate`.
pub fn resample(input: &[f32], input_rate: u32, output_rate: u32) -> Vec<f32> {
    LinearResampler::new(input_rate, output_rate).process(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_when_rates_match() {
        let input: Vec<f32> = (0..100).map(|i| (i as f32 / 50.0) - 1.0).collect();
        assert_eq!(resample(&input, 16_000, 16_000), input);
    }

    #[test]
    fn test_output_length_is_rounded_ratio() {
        let cases = [
            (2048usize, 48_000u32, 16_000u32),
            (2048, 44_100, 16_000),
            (1000, 24_000, 48_000),
            (4096, 24_000, 44_100),
            (7, 22_050, 16_000),
            (1, 48_000, 16_000),
        ];
        for (n, rin, rout) in cases {
            let input = vec![0.25f32; n];
            let expected = (n as f64 * rout as f64 / rin as f64).round() as usize;
            let output = resample(&input, rin, rout);
            assert_eq!(output.len(), expected, "{n} samples {rin}->{rout}");
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(resample(&[], 48_000, 16_000).is_empty());
    }

    #[test]
    fn test_downsample_3x_picks_every_third() {
        let input: Vec<f32> = (0..48).map(|i| i as f32 / 48.0).collect();
        let output = resample(&input, 48_000, 16_000);
        assert_eq!(output.len(), 16);
        for (i, &s) in output.iter().enumerate() {
            assert!((s - input[i * 3]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_upsample_interpolates_between_neighbours() {
        let output = resample(&[0.0, 1.0], 24_000, 48_000);
        assert_eq!(output.len(), 4);
        assert!((output[0] - 0.0).abs() < 1e-6);
        assert!((output[1] - 0.5).abs() < 1e-6);
        assert!((output[2] - 1.0).abs() < 1e-6);
        // past the last input: held
        assert!((output[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_never_exceeds_input_envelope() {
        let input: Vec<f32> = (0..441).map(|i| ((i as f32) * 0.37).sin()).collect();
        let output = resample(&input, 44_100, 16_000);
        let max_in = input.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(output.iter().all(|s| s.abs() <= max_in + 1e-6));
    }
}
