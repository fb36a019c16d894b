use crate::classifier::{self, Conclusion, INSUFFICIENT_DATA};
use crate::logging;
use crate::metrics::{Averages, Baseline, MetricVector, SampleHistory, SLOPE_WINDOW};
use crate::simulator::{initial_sample, MetricSource};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const TICK_PERIOD: Duration = Duration::from_secs(1);
/// Every Nth timeline entry is included in prompt summaries
pub const SUMMARY_STRIDE: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameSnapshot {
    pub id: String,
    pub timestamp: f64,
    pub image_url: Option<String>,
    pub trigger_type: String,
}

/// A finished, saved session. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub date: String,
    pub duration: u64,
    pub timeline: Vec<MetricVector>,
    pub snapshots: Vec<FrameSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub averages: Averages,
}

/// What one tick produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub elapsed: u64,
    pub sample: MetricVector,
    pub conclusion: Conclusion,
    pub snapshot: Option<FrameSnapshot>,
}

/// State advanced once per tick while a session is recording
pub struct SessionTracker {
    id: String,
    current: MetricVector,
    history: SampleHistory,
    baseline: Option<Baseline>,
    timeline: Vec<MetricVector>,
    snapshots: Vec<FrameSnapshot>,
    elapsed: u64,
    conclusion: Conclusion,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTracker {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            current: initial_sample(),
            history: SampleHistory::default(),
            baseline: None,
            timeline: Vec::new(),
            snapshots: Vec::new(),
            elapsed: 0,
            conclusion: INSUFFICIENT_DATA,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn elapsed(&self) -> u64 {
        self.elapsed
    }

    pub fn current(&self) -> &MetricVector {
        &self.current
    }

    pub fn conclusion(&self) -> Conclusion {
        self.conclusion
    }

    pub fn baseline(&self) -> Option<&Baseline> {
        self.baseline.as_ref()
    }

    pub fn timeline(&self) -> &[MetricVector] {
        &self.timeline
    }

    pub fn snapshots(&self) -> &[FrameSnapshot] {
        &self.snapshots
    }

    /// Advance one tick: sample, record, update the baseline, then classify
    /// against the updated baseline.
    pub fn tick(&mut self, source: &mut dyn MetricSource) -> TickReport {
        let sample = source
            .next_sample(&self.current, self.elapsed as f64)
            .clamped();
        self.elapsed += 1;
        self.record(sample, source)
    }

    /// Ingest an externally produced sample
    pub fn ingest(&mut self, sample: MetricVector) -> TickReport {
        self.elapsed += 1;
        let sample = sample.clamped();
        self.current = sample;
        self.history.push(sample);
        self.timeline.push(sample);
        self.update_and_classify(sample, None)
    }

    fn record(&mut self, sample: MetricVector, source: &mut dyn MetricSource) -> TickReport {
        self.current = sample;
        self.history.push(sample);
        self.timeline.push(sample);

        let snapshot = source.snapshot_trigger(&sample).map(|trigger| FrameSnapshot {
            id: Uuid::new_v4().to_string(),
            timestamp: sample.timestamp,
            image_url: source.capture_frame(),
            trigger_type: trigger.to_string(),
        });

        self.update_and_classify(sample, snapshot)
    }

    fn update_and_classify(
        &mut self,
        sample: MetricVector,
        snapshot: Option<FrameSnapshot>,
    ) -> TickReport {
        match self.baseline.as_mut() {
            Some(baseline) => baseline.update(&sample),
            None => self.baseline = Some(Baseline::seed(&sample)),
        }

        let recent = self.history.recent(SLOPE_WINDOW);
        let conclusion = classifier::classify(&sample, &recent, self.baseline.as_ref());
        if conclusion != self.conclusion {
            logging::log_classifier(
                Some(&self.id),
                &format!("t={}s {} -> {}", self.elapsed, self.conclusion.rule, conclusion.rule),
            );
        }
        self.conclusion = conclusion;

        if let Some(snap) = &snapshot {
            logging::log_session(
                Some(&self.id),
                &format!("Snapshot at {}s: {}", snap.timestamp, snap.trigger_type),
            );
            self.snapshots.push(snap.clone());
        }

        TickReport {
            elapsed: self.elapsed,
            sample,
            conclusion,
            snapshot,
        }
    }

    /// Summary of the data recorded so far, for chat prompts
    pub fn summary(&self) -> SessionSummary {
        SessionSummary::from_timeline(self.elapsed, &self.timeline)
    }

    /// Stop recording and produce the persisted session record
    pub fn finish(self, user_id: &str, title: Option<String>, notes: Option<String>) -> Session {
        let averages = Averages::from_timeline(&self.timeline);
        logging::log_session(
            Some(&self.id),
            &format!("Session finished: {}s, {} samples", self.elapsed, self.timeline.len()),
        );
        Session {
            id: self.id,
            user_id: user_id.to_string(),
            date: Utc::now().to_rfc3339(),
            duration: self.elapsed,
            timeline: self.timeline,
            snapshots: self.snapshots,
            user_notes: notes.filter(|n| !n.trim().is_empty()),
            title: title.filter(|t| !t.trim().is_empty()),
            averages,
        }
    }
}

/// The slice of a session that goes into an insight prompt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub duration: u64,
    pub averages: Averages,
    pub sampled_timeline: Vec<MetricVector>,
}

impl SessionSummary {
    pub fn from_timeline(duration: u64, timeline: &[MetricVector]) -> Self {
        Self {
            duration,
            averages: Averages::from_timeline(timeline),
            sampled_timeline: timeline.iter().step_by(SUMMARY_STRIDE).copied().collect(),
        }
    }

    pub fn from_session(session: &Session) -> Self {
        Self {
            duration: session.duration,
            averages: session.averages,
            sampled_timeline: session
                .timeline
                .iter()
                .step_by(SUMMARY_STRIDE)
                .copied()
                .collect(),
        }
    }
}

/// A tracker driven by a periodic timer on its own task
pub struct LiveSession {
    cancel_token: CancellationToken,
    reports: watch::Receiver<Option<TickReport>>,
    handle: JoinHandle<SessionTracker>,
}

impl LiveSession {
    pub fn start(source: Box<dyn MetricSource>) -> Self {
        Self::start_with_period(source, TICK_PERIOD)
    }

    pub fn start_with_period(mut source: Box<dyn MetricSource>, period: Duration) -> Self {
        let cancel_token = CancellationToken::new();
        let (tx, rx) = watch::channel(None);
        let token = cancel_token.clone();

        let handle = tokio::spawn(async move {
            let mut tracker = SessionTracker::new();
            logging::log_session(Some(tracker.id()), "Session started");

            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first interval tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = tracker.tick(source.as_mut());
                        let _ = tx.send(Some(report));
                    }
                    _ = token.cancelled() => {
                        logging::log_session(Some(tracker.id()), "Session stopped");
                        break;
                    }
                }
            }
            tracker
        });

        Self {
            cancel_token,
            reports: rx,
            handle,
        }
    }

    /// Receiver for per-tick reports
    pub fn subscribe(&self) -> watch::Receiver<Option<TickReport>> {
        self.reports.clone()
    }

    /// Clear the timer and hand back the recorded state
    pub async fn stop(self) -> Result<SessionTracker, String> {
        self.cancel_token.cancel();
        self.handle.await.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricField;
    use crate::simulator::RandomWalkSource;

    struct Scripted {
        samples: Vec<MetricVector>,
        trigger_every: Option<usize>,
        calls: usize,
    }

    impl MetricSource for Scripted {
        fn next_sample(&mut self, previous: &MetricVector, timestamp: f64) -> MetricVector {
            let sample = self.samples.get(self.calls).copied().unwrap_or(*previous);
            self.calls += 1;
            MetricVector { timestamp, ..sample }
        }

        fn snapshot_trigger(&mut self, _sample: &MetricVector) -> Option<&'static str> {
            match self.trigger_every {
                Some(n) if self.calls % n == 0 => Some("Test Trigger"),
                _ => None,
            }
        }
    }

    fn steady(n: usize) -> Scripted {
        Scripted {
            samples: vec![initial_sample().with(MetricField::Anxiety, 10.0); n],
            trigger_every: None,
            calls: 0,
        }
    }

    #[test]
    fn test_first_ticks_are_insufficient() {
        let mut tracker = SessionTracker::new();
        let mut source = steady(10);
        for _ in 0..4 {
            let report = tracker.tick(&mut source);
            assert_eq!(report.conclusion, INSUFFICIENT_DATA);
        }
        assert!(tracker.baseline().is_some());
        let report = tracker.tick(&mut source);
        assert_eq!(report.conclusion.rule, "stable_baseline");
        assert_eq!(report.elapsed, 5);
    }

    #[test]
    fn test_baseline_updated_before_classification() {
        let mut tracker = SessionTracker::new();
        let calm = initial_sample();
        for _ in 0..5 {
            tracker.ingest(calm);
        }
        // A pupil jump of 17 leaves a deviation of 16.15 after smoothing
        let report = tracker.ingest(calm.with(MetricField::PupilDilation, 67.0));
        assert!((tracker.baseline().unwrap().get(MetricField::PupilDilation) - 50.85).abs() < 1e-9);
        assert_eq!(report.conclusion.rule, "heightened_arousal");

        // A jump of 15.5 is absorbed to 14.725 and does not trigger
        let mut tracker = SessionTracker::new();
        for _ in 0..5 {
            tracker.ingest(calm);
        }
        let report = tracker.ingest(calm.with(MetricField::PupilDilation, 65.5));
        assert_ne!(report.conclusion.rule, "heightened_arousal");
    }

    #[test]
    fn test_finish_computes_averages() {
        let mut tracker = SessionTracker::new();
        tracker.ingest(initial_sample().with(MetricField::Stress, 10.0));
        tracker.ingest(initial_sample().with(MetricField::Stress, 21.0));
        let session = tracker.finish("user-1", Some("Interview".into()), Some("  ".into()));
        assert_eq!(session.averages.stress, 16);
        assert_eq!(session.averages.confidence, 50);
        assert_eq!(session.duration, 2);
        assert_eq!(session.timeline.len(), 2);
        assert_eq!(session.title.as_deref(), Some("Interview"));
        assert_eq!(session.user_notes, None);
    }

    #[test]
    fn test_snapshots_recorded() {
        let mut tracker = SessionTracker::new();
        let mut source = Scripted {
            samples: vec![initial_sample(); 6],
            trigger_every: Some(3),
            calls: 0,
        };
        for _ in 0..6 {
            tracker.tick(&mut source);
        }
        assert_eq!(tracker.snapshots().len(), 2);
        assert_eq!(tracker.snapshots()[0].trigger_type, "Test Trigger");
    }

    #[test]
    fn test_summary_samples_every_fifth_entry() {
        let timeline: Vec<MetricVector> = (0..12)
            .map(|i| MetricVector { timestamp: i as f64, ..initial_sample() })
            .collect();
        let summary = SessionSummary::from_timeline(12, &timeline);
        let stamps: Vec<f64> = summary.sampled_timeline.iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![0.0, 5.0, 10.0]);
    }

    #[test]
    fn test_session_json_uses_journal_field_names() {
        let session = SessionTracker::new().finish("u", None, Some("note".into()));
        let json = serde_json::to_value(&session).unwrap();
        assert!(json.get("userId").is_some());
        assert!(json.get("userNotes").is_some());
        assert!(json.get("title").is_none());
    }

    #[tokio::test]
    async fn test_live_session_ticks_until_stopped() {
        let live = LiveSession::start_with_period(
            Box::new(RandomWalkSource::seeded(9)),
            Duration::from_millis(5),
        );
        let mut reports = live.subscribe();
        for _ in 0..3 {
            reports.changed().await.unwrap();
        }
        let tracker = live.stop().await.unwrap();
        assert!(tracker.elapsed() >= 3);
        assert_eq!(tracker.timeline().len() as u64, tracker.elapsed());
    }
}
