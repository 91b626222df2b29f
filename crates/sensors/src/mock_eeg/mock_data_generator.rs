use std::f64::consts::PI;

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Largest positive 24-bit count.
pub const COUNT_MAX: i32 = (1 << 23) - 1;
/// Most negative 24-bit count.
pub const COUNT_MIN: i32 = -(1 << 23);

/// Counts per unit of band weight. About 12 uV at gain 24.
const AMPLITUDE_COUNTS: f64 = 1000.0;

const TWO_PI: f64 = 2.0 * PI;

// Broadband noise, in units of band weight
const NOISE_SIGMA: f64 = 0.06;

// Format: [delta, theta, alpha, beta, gamma]
const BASE_CHANNEL_WEIGHTS: [[f64; 5]; 8] = [
    [3.0, 1.5, 0.8, 0.4, 0.1], // Frontal left (Fp1) - more delta/theta
    [3.0, 1.5, 0.8, 0.4, 0.1], // Frontal right (Fp2)
    [2.0, 1.2, 1.5, 0.6, 0.1], // Central left (C3) - mix
    [2.0, 1.2, 1.5, 0.6, 0.1], // Central right (C4)
    [1.5, 1.0, 2.5, 0.7, 0.1], // Parietal left (P3) - stronger alpha
    [1.5, 1.0, 2.5, 0.7, 0.1], // Parietal right (P4)
    [1.2, 0.8, 3.0, 0.5, 0.1], // Occipital left (O1) - strongest alpha
    [1.2, 0.8, 3.0, 0.5, 0.1], // Occipital right (O2)
];

// Centre frequency of each band, in Hz
const BAND_FREQS: [f64; 5] = [2.5, 6.0, 10.0, 20.0, 40.0];

#[derive(Debug, Clone)]
struct ChannelOscillators {
    band_phase: [f64; 5],
    weights: [f64; 5],
    line_50hz_phase: f64,
    line_60hz_phase: f64,
    line_noise_amplitude: f64,
}

/// Synthetic EEG with delta, theta, alpha, beta and gamma components plus
/// 50/60 Hz line noise, produced as raw 24-bit counts.
#[derive(Debug, Clone)]
pub struct EegGenerator {
    sample_rate: u32,
    channels: Vec<ChannelOscillators>,
    rng: StdRng,
}

impl EegGenerator {
    pub fn new(sample_rate: u32, num_channels: usize, seed: u64) -> Self {
        debug!("Initializing EEG generator with {} Hz sample rate", sample_rate);
        let mut rng = StdRng::seed_from_u64(seed);

        let channels = (0..num_channels)
            .map(|i| ChannelOscillators {
                band_phase: [(); 5].map(|_| rng.gen::<f64>() * TWO_PI),
                weights: BASE_CHANNEL_WEIGHTS[i % BASE_CHANNEL_WEIGHTS.len()],
                line_50hz_phase: rng.gen::<f64>() * TWO_PI,
                line_60hz_phase: rng.gen::<f64>() * TWO_PI,
                // Different channels pick up different amounts of line noise
                line_noise_amplitude: rng.gen_range(0.2..0.7),
            })
            .collect();

        Self {
            sample_rate: sample_rate.max(1),
            channels,
            rng,
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1);
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Advances `channel` by one sample period and returns its count.
    pub fn generate_sample(&mut self, channel: usize) -> i32 {
        let rate = self.sample_rate as f64;
        let noise = self.rng.sample::<f64, _>(StandardNormal) * NOISE_SIGMA;
        let Some(osc) = self.channels.get_mut(channel) else {
            return 0;
        };

        let mut signal = 0.0;
        for (band, freq) in BAND_FREQS.iter().enumerate() {
            osc.band_phase[band] = (osc.band_phase[band] + TWO_PI * freq / rate) % TWO_PI;
            signal += osc.band_phase[band].sin() * osc.weights[band];
        }

        osc.line_50hz_phase = (osc.line_50hz_phase + TWO_PI * 50.0 / rate) % TWO_PI;
        osc.line_60hz_phase = (osc.line_60hz_phase + TWO_PI * 60.0 / rate) % TWO_PI;
        signal += osc.line_50hz_phase.sin() * osc.line_noise_amplitude * 0.7;
        signal += osc.line_60hz_phase.sin() * osc.line_noise_amplitude * 0.3;

        ((signal + noise) * AMPLITUDE_COUNTS).clamp(COUNT_MIN as f64, COUNT_MAX as f64) as i32
    }

    /// Gaussian noise around zero, as seen on a shorted input.
    pub fn shorted_noise(&mut self, sigma_counts: f64) -> i32 {
        let sample: f64 = self.rng.sample::<f64, _>(StandardNormal) * sigma_counts;
        sample.round() as i32
    }
}
