//! Synthetic telemetry generation
//!
//! Baseline signals are slow sinusoids of the sample counter `t` plus
//! uniform jitter; the active profile adds its disturbance on top.
//!
//! | Channel     | Baseline                                   |
//! |-------------|--------------------------------------------|
//! | temperature | 25 + sin(t/20) + U(-0.5, 0.5)              |
//! | humidity    | 50 + 5 sin(t/30) + U(-1, 1)                |
//! | moisture    | 55 - 10 sin(t/40) + U(-2, 2)               |
//! | ph          | 7.0 + 0.2 sin(t/50) + U(-0.1, 0.1)         |
//! | cps         | floor(250 + 50 sin(t/15) + U(-10, 10))     |
//!
//! Nutrient, conductivity, energy and activity channels are independent
//! uniform draws.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::profile::SimulationProfile;
use crate::config::defaults::SPIKE_PERIOD;
use crate::types::TelemetryRecord;

/// True when `profile` injects a spike at counter value `t`.
pub fn is_spike_tick(profile: SimulationProfile, t: u64) -> bool {
    profile == SimulationProfile::Spike && t > 0 && t % SPIKE_PERIOD == 0
}

/// Random draws that make up one sample before any profile term.
struct Jitter {
    temperature: f64,
    humidity: f64,
    moisture: f64,
    ph: f64,
    cps: f64,
    ec: f64,
    nitrogen: f64,
    phosphorus: f64,
    potassium: f64,
    energy: f64,
    activity: f64,
}

/// Per-client sample source. Owns its RNG; the counter lives in
/// [`super::SimulationState`].
pub struct SampleGenerator {
    rng: StdRng,
    source_label: String,
}

impl SampleGenerator {
    /// Seeded generators are reproducible; `None` draws from OS entropy.
    pub fn new(seed: Option<u64>, source_label: impl Into<String>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            source_label: source_label.into(),
        }
    }

    pub fn generate(&mut self, profile: SimulationProfile, t: u64) -> TelemetryRecord {
        self.generate_at(profile, t, Utc::now())
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn generate_at(
        &mut self,
        profile: SimulationProfile,
        t: u64,
        timestamp: DateTime<Utc>,
    ) -> TelemetryRecord {
        let tf = t as f64;
        // Every baseline draw happens before the profile terms, so profile
        // disturbances are purely additive.
        let j = self.draw();

        let mut temperature = 25.0 + (tf / 20.0).sin() + j.temperature;
        let humidity = 50.0 + (tf / 30.0).sin() * 5.0 + j.humidity;
        let mut moisture = 55.0 - (tf / 40.0).sin() * 10.0 + j.moisture;
        let ph = 7.0 + (tf / 50.0).sin() * 0.2 + j.ph;
        let mut cps = 250.0 + (tf / 15.0).sin() * 50.0 + j.cps;

        match profile {
            SimulationProfile::Spike if is_spike_tick(profile, t) => {
                cps += f64::from(self.rng.gen_range(250_u32..=300));
                temperature += self.rng.gen_range(5.0..10.0);
            }
            SimulationProfile::Drift => temperature += tf * 0.05,
            SimulationProfile::Periodic => moisture += tf.sin() * 15.0,
            _ => {}
        }

        TelemetryRecord {
            timestamp,
            temperature,
            humidity,
            moisture,
            ph,
            ec: j.ec,
            nitrogen: j.nitrogen,
            phosphorus: j.phosphorus,
            potassium: j.potassium,
            source_name: self.source_label.clone(),
            energy: j.energy,
            cps: cps.floor() as i64,
            activity: j.activity,
        }
    }

    fn draw(&mut self) -> Jitter {
        let rng = &mut self.rng;
        Jitter {
            temperature: rng.gen_range(-0.5..0.5),
            humidity: rng.gen_range(-1.0..1.0),
            moisture: rng.gen_range(-2.0..2.0),
            ph: rng.gen_range(-0.1..0.1),
            cps: rng.gen_range(-10.0..10.0),
            // Field stations report these as whole numbers
            ec: rng.gen_range(500.0_f64..1000.0).round(),
            nitrogen: rng.gen_range(100.0_f64..200.0).round(),
            phosphorus: rng.gen_range(50.0_f64..100.0).round(),
            potassium: rng.gen_range(50.0_f64..150.0).round(),
            energy: rng.gen_range(1170.0..1330.0),
            activity: rng.gen_range(1.0..2.5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(profile: SimulationProfile, t: u64) -> (TelemetryRecord, TelemetryRecord) {
        let now = Utc::now();
        let baseline = SampleGenerator::new(Some(7), "Co-60").generate_at(SimulationProfile::Normal, t, now);
        let disturbed = SampleGenerator::new(Some(7), "Co-60").generate_at(profile, t, now);
        (baseline, disturbed)
    }

    #[test]
    fn test_normal_ranges() {
        let mut gen = SampleGenerator::new(Some(42), "Co-60");
        for t in 0..500 {
            let r = gen.generate(SimulationProfile::Normal, t);
            assert!((23.5..=26.5).contains(&r.temperature), "temperature {}", r.temperature);
            assert!((44.0..=56.0).contains(&r.humidity));
            assert!((43.0..=67.0).contains(&r.moisture));
            assert!((6.7..=7.3).contains(&r.ph));
            assert!((190..=310).contains(&r.cps), "cps {}", r.cps);
            assert!((500.0..=1000.0).contains(&r.ec));
            assert!((1170.0..=1330.0).contains(&r.energy));
            assert!((1.0..=2.5).contains(&r.activity));
            assert_eq!(r.source_name, "Co-60");
            assert!(r.is_finite());
        }
    }

    #[test]
    fn test_spike_is_additive_on_spike_ticks() {
        let (base, spiked) = pair(SimulationProfile::Spike, 30);
        let delta = spiked.cps - base.cps;
        assert!((250..=300).contains(&delta), "delta {delta}");
        let dt = spiked.temperature - base.temperature;
        assert!((5.0..10.0).contains(&dt), "dt {dt}");
        assert_eq!(spiked.humidity, base.humidity);
    }

    #[test]
    fn test_spike_profile_quiet_off_cadence() {
        for t in [0, 1, 29, 31] {
            let (base, spiked) = pair(SimulationProfile::Spike, t);
            assert_eq!(base.cps, spiked.cps, "t = {t}");
            assert_eq!(base.temperature, spiked.temperature);
        }
        assert!(is_spike_tick(SimulationProfile::Spike, 60));
        assert!(!is_spike_tick(SimulationProfile::Normal, 60));
    }

    #[test]
    fn test_drift_and_periodic() {
        let (base, drifted) = pair(SimulationProfile::Drift, 100);
        assert!((drifted.temperature - base.temperature - 5.0).abs() < 1e-9);

        let (base, periodic) = pair(SimulationProfile::Periodic, 2);
        assert!((periodic.moisture - base.moisture - 2.0_f64.sin() * 15.0).abs() < 1e-9);
    }
}
