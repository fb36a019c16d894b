//! Metric sources
//!
//! Nothing here measures a person. `RandomWalkSource` perturbs the previous
//! reading with bounded noise; `SignalHeuristicSource` maps a coarse
//! loudness/movement pair onto the metric fields with fixed thresholds.
//! The two sources do not agree on what a field means (deception is a
//! drifting score in one and "fidgeting while quiet" in the other).

use crate::metrics::{MetricField, MetricVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

pub const HIGH_ANXIETY_TRIGGER: &str = "High Anxiety";
pub const DECEPTION_TRIGGER: &str = "Deception Hint";

/// Supplies one reading per tick
pub trait MetricSource: Send {
    fn next_sample(&mut self, previous: &MetricVector, timestamp: f64) -> MetricVector;

    /// Label of a snapshot worth keeping for this sample, if any
    fn snapshot_trigger(&mut self, _sample: &MetricVector) -> Option<&'static str> {
        None
    }

    /// Reference to a captured frame (data URL or path) for a snapshot
    fn capture_frame(&mut self) -> Option<String> {
        None
    }
}

/// Resting reading used before the first tick
pub fn initial_sample() -> MetricVector {
    MetricVector {
        confidence: 50.0,
        empathy: 50.0,
        pupil_dilation: 50.0,
        blink_rate: 20.0,
        ..Default::default()
    }
}

/// Full width of the uniform step applied to each field per tick
fn step_width(field: MetricField) -> f64 {
    match field {
        MetricField::Anxiety => 10.0,
        MetricField::Excitement => 10.0,
        MetricField::Deception => 5.0,
        MetricField::Confidence => 8.0,
        MetricField::Stress => 12.0,
        MetricField::Aggression => 6.0,
        MetricField::Boredom => 6.0,
        MetricField::Empathy => 6.0,
        MetricField::GazeDeviation => 10.0,
        MetricField::PupilDilation => 6.0,
        MetricField::BlinkRate => 8.0,
    }
}

pub struct RandomWalkSource {
    rng: StdRng,
}

impl RandomWalkSource {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Reproducible walk for tests and demos
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomWalkSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for RandomWalkSource {
    fn next_sample(&mut self, previous: &MetricVector, timestamp: f64) -> MetricVector {
        let mut next = MetricVector {
            timestamp,
            ..Default::default()
        };
        for field in MetricField::ALL {
            let noise = (self.rng.random::<f64>() - 0.5) * step_width(field);
            next.set(field, previous.get(field) + noise);
        }
        next
    }

    fn snapshot_trigger(&mut self, sample: &MetricVector) -> Option<&'static str> {
        if sample.anxiety > 80.0 && self.rng.random::<f64>() > 0.9 {
            return Some(HIGH_ANXIETY_TRIGGER);
        }
        if sample.deception > 70.0 && self.rng.random::<f64>() > 0.95 {
            return Some(DECEPTION_TRIGGER);
        }
        None
    }
}

/// One frame's worth of coarse signal, both values in [0, 100]
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SignalFrame {
    pub volume: f64,
    pub movement: f64,
}

/// Threshold matrix over loudness and movement
pub fn heuristic_metrics(frame: SignalFrame, timestamp: f64) -> MetricVector {
    let vol = frame.volume.clamp(0.0, 100.0);
    let mov = frame.movement.clamp(0.0, 100.0);

    MetricVector {
        timestamp,
        aggression: if vol > 60.0 && mov > 50.0 { (vol + mov) / 2.0 } else { 0.0 },
        excitement: if vol > 40.0 && mov > 40.0 { (vol + mov) / 2.0 } else { 0.0 },
        boredom: if vol < 20.0 && mov < 20.0 { 100.0 - (vol + mov) } else { 0.0 },
        anxiety: if vol > 50.0 && mov < 30.0 { vol } else { 0.0 },
        confidence: if vol > 30.0 && vol < 70.0 { 80.0 } else { 40.0 },
        stress: if vol > 80.0 { 90.0 } else { 20.0 },
        deception: if mov > 80.0 && vol < 20.0 { 75.0 } else { 10.0 },
        empathy: 50.0,
        gaze_deviation: 0.0,
        pupil_dilation: 50.0,
        blink_rate: 20.0,
    }
    .clamped()
}

/// Replays a prepared sequence of signal frames, holding the last one
pub struct SignalHeuristicSource {
    frames: Vec<SignalFrame>,
    position: usize,
}

impl SignalHeuristicSource {
    pub fn new(frames: Vec<SignalFrame>) -> Self {
        Self { frames, position: 0 }
    }

    /// Frames from a JSON array such as `[{"volume": 55, "movement": 20}]`
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let frames: Vec<SignalFrame> = serde_json::from_str(json)?;
        Ok(Self::new(frames))
    }
}

impl MetricSource for SignalHeuristicSource {
    fn next_sample(&mut self, previous: &MetricVector, timestamp: f64) -> MetricVector {
        let frame = match self.frames.get(self.position).or_else(|| self.frames.last()) {
            Some(frame) => *frame,
            None => return MetricVector { timestamp, ..*previous },
        };
        self.position += 1;
        heuristic_metrics(frame, timestamp)
    }
}
