use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Samples kept for trend computation
pub const HISTORY_CAPACITY: usize = 120;
/// Window used for short-term slopes
pub const SLOPE_WINDOW: usize = 5;
/// Weight of a new sample in the running baseline
pub const BASELINE_SMOOTHING: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricField {
    Anxiety,
    Excitement,
    Deception,
    Confidence,
    Stress,
    Aggression,
    Boredom,
    Empathy,
    GazeDeviation,
    PupilDilation,
    BlinkRate,
}

impl MetricField {
    pub const ALL: [MetricField; 11] = [
        MetricField::Anxiety,
        MetricField::Excitement,
        MetricField::Deception,
        MetricField::Confidence,
        MetricField::Stress,
        MetricField::Aggression,
        MetricField::Boredom,
        MetricField::Empathy,
        MetricField::GazeDeviation,
        MetricField::PupilDilation,
        MetricField::BlinkRate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricField::Anxiety => "anxiety",
            MetricField::Excitement => "excitement",
            MetricField::Deception => "deception",
            MetricField::Confidence => "confidence",
            MetricField::Stress => "stress",
            MetricField::Aggression => "aggression",
            MetricField::Boredom => "boredom",
            MetricField::Empathy => "empathy",
            MetricField::GazeDeviation => "gazeDeviation",
            MetricField::PupilDilation => "pupilDilation",
            MetricField::BlinkRate => "blinkRate",
        }
    }

    /// Human-readable label used in exports and prompts
    pub fn label(&self) -> &'static str {
        match self {
            MetricField::Anxiety => "Anxiety",
            MetricField::Excitement => "Excitement",
            MetricField::Deception => "Deception",
            MetricField::Confidence => "Confidence",
            MetricField::Stress => "Stress",
            MetricField::Aggression => "Aggression",
            MetricField::Boredom => "Boredom",
            MetricField::Empathy => "Empathy",
            MetricField::GazeDeviation => "GazeDeviation",
            MetricField::PupilDilation => "PupilDilation",
            MetricField::BlinkRate => "BlinkRate",
        }
    }
}

/// One instantaneous reading. Every field is kept in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricVector {
    pub timestamp: f64,
    pub anxiety: f64,
    pub excitement: f64,
    pub deception: f64,
    pub confidence: f64,
    pub stress: f64,
    pub aggression: f64,
    pub boredom: f64,
    pub empathy: f64,
    pub gaze_deviation: f64,
    pub pupil_dilation: f64,
    pub blink_rate: f64,
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

impl MetricVector {
    pub fn get(&self, field: MetricField) -> f64 {
        match field {
            MetricField::Anxiety => self.anxiety,
            MetricField::Excitement => self.excitement,
            MetricField::Deception => self.deception,
            MetricField::Confidence => self.confidence,
            MetricField::Stress => self.stress,
            MetricField::Aggression => self.aggression,
            MetricField::Boredom => self.boredom,
            MetricField::Empathy => self.empathy,
            MetricField::GazeDeviation => self.gaze_deviation,
            MetricField::PupilDilation => self.pupil_dilation,
            MetricField::BlinkRate => self.blink_rate,
        }
    }

    /// Set a field, clamping it into [0, 100]
    pub fn set(&mut self, field: MetricField, value: f64) {
        let value = clamp_percent(value);
        match field {
            MetricField::Anxiety => self.anxiety = value,
            MetricField::Excitement => self.excitement = value,
            MetricField::Deception => self.deception = value,
            MetricField::Confidence => self.confidence = value,
            MetricField::Stress => self.stress = value,
            MetricField::Aggression => self.aggression = value,
            MetricField::Boredom => self.boredom = value,
            MetricField::Empathy => self.empathy = value,
            MetricField::GazeDeviation => self.gaze_deviation = value,
            MetricField::PupilDilation => self.pupil_dilation = value,
            MetricField::BlinkRate => self.blink_rate = value,
        }
    }

    pub fn with(mut self, field: MetricField, value: f64) -> Self {
        self.set(field, value);
        self
    }

    /// Copy of this vector with every field clamped into [0, 100]
    pub fn clamped(&self) -> Self {
        let mut out = *self;
        for field in MetricField::ALL {
            out.set(field, self.get(field));
        }
        out
    }
}

/// Exponentially smoothed "resting state" used for deviation checks
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    values: MetricVector,
}

impl Baseline {
    pub fn seed(first: &MetricVector) -> Self {
        Self { values: first.clamped() }
    }

    /// Blend a new sample in: 0.95 old, 0.05 new
    pub fn update(&mut self, sample: &MetricVector) {
        for field in MetricField::ALL {
            let blended = self.values.get(field) * (1.0 - BASELINE_SMOOTHING)
                + sample.get(field) * BASELINE_SMOOTHING;
            self.values.set(field, blended);
        }
        self.values.timestamp = sample.timestamp;
    }

    pub fn get(&self, field: MetricField) -> f64 {
        self.values.get(field)
    }

    /// `current - baseline` for one field
    pub fn deviation(&self, current: &MetricVector, field: MetricField) -> f64 {
        current.get(field) - self.values.get(field)
    }

    pub fn values(&self) -> &MetricVector {
        &self.values
    }
}

/// Bounded, append-only sample buffer; the oldest entry is evicted at capacity
#[derive(Debug, Clone)]
pub struct SampleHistory {
    samples: VecDeque<MetricVector>,
    capacity: usize,
}

impl Default for SampleHistory {
    fn default() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }
}

impl SampleHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: MetricVector) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&MetricVector> {
        self.samples.back()
    }

    /// The most recent `n` samples, oldest first
    pub fn recent(&self, n: usize) -> Vec<MetricVector> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).copied().collect()
    }

    /// Change of `field` across the last `SLOPE_WINDOW` samples
    pub fn slope(&self, field: MetricField) -> Option<f64> {
        let recent = self.recent(SLOPE_WINDOW);
        window_slope(&recent, field)
    }
}

/// `last.X - window_start.X` where the window is the final `SLOPE_WINDOW` entries
pub fn window_slope(recent: &[MetricVector], field: MetricField) -> Option<f64> {
    if recent.len() < SLOPE_WINDOW {
        return None;
    }
    let start = &recent[recent.len() - SLOPE_WINDOW];
    let last = recent.last()?;
    Some(last.get(field) - start.get(field))
}

/// Per-field integer means of a session timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Averages {
    pub anxiety: u8,
    pub excitement: u8,
    pub deception: u8,
    pub confidence: u8,
    pub stress: u8,
    pub aggression: u8,
    pub boredom: u8,
    pub empathy: u8,
    pub gaze_deviation: u8,
    pub pupil_dilation: u8,
    pub blink_rate: u8,
}

impl Averages {
    pub fn from_timeline(timeline: &[MetricVector]) -> Self {
        let mut averages = Averages::default();
        if timeline.is_empty() {
            return averages;
        }
        let count = timeline.len() as f64;
        for field in MetricField::ALL {
            let sum: f64 = timeline.iter().map(|s| s.get(field)).sum();
            averages.set(field, (sum / count).round().clamp(0.0, 100.0) as u8);
        }
        averages
    }

    pub fn get(&self, field: MetricField) -> u8 {
        match field {
            MetricField::Anxiety => self.anxiety,
            MetricField::Excitement => self.excitement,
            MetricField::Deception => self.deception,
            MetricField::Confidence => self.confidence,
            MetricField::Stress => self.stress,
            MetricField::Aggression => self.aggression,
            MetricField::Boredom => self.boredom,
            MetricField::Empathy => self.empathy,
            MetricField::GazeDeviation => self.gaze_deviation,
            MetricField::PupilDilation => self.pupil_dilation,
            MetricField::BlinkRate => self.blink_rate,
        }
    }

    fn set(&mut self, field: MetricField, value: u8) {
        match field {
            MetricField::Anxiety => self.anxiety = value,
            MetricField::Excitement => self.excitement = value,
            MetricField::Deception => self.deception = value,
            MetricField::Confidence => self.confidence = value,
            MetricField::Stress => self.stress = value,
            MetricField::Aggression => self.aggression = value,
            MetricField::Boredom => self.boredom = value,
            MetricField::Empathy => self.empathy = value,
            MetricField::GazeDeviation => self.gaze_deviation = value,
            MetricField::PupilDilation => self.pupil_dilation = value,
            MetricField::BlinkRate => self.blink_rate = value,
        }
    }
}
