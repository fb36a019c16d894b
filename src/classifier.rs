//! Rule-based state interpreter
//!
//! Maps the current reading, its short history and the running baseline to a
//! single conclusion. Rule groups are evaluated top to bottom; the first
//! group whose guard holds picks one of its variants and evaluation stops.

use crate::metrics::{Baseline, MetricField, MetricVector, SLOPE_WINDOW};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Conclusion {
    pub rule: &'static str,
    pub text: &'static str,
}

pub const INSUFFICIENT_DATA: Conclusion = Conclusion {
    rule: "insufficient_data",
    text: "Insufficient data: collecting baseline readings before drawing conclusions.",
};

/// Derived inputs every rule reads from
#[derive(Debug, Clone, Copy)]
pub struct Signals {
    pub current: MetricVector,
    pub slope_anxiety: f64,
    pub slope_stress: f64,
    pub slope_confidence: f64,
    pub dev_anxiety: f64,
    pub dev_deception: f64,
    pub dev_pupil: f64,
    pub dev_blink: f64,
}

impl Signals {
    /// `None` when there are fewer than `SLOPE_WINDOW` samples or no baseline
    pub fn derive(
        current: &MetricVector,
        recent: &[MetricVector],
        baseline: Option<&Baseline>,
    ) -> Option<Self> {
        let baseline = baseline?;
        if recent.len() < SLOPE_WINDOW {
            return None;
        }
        // Slopes are taken against `current`, which may differ from the
        // last history entry when a caller passes an unsynchronised window.
        let start = &recent[recent.len() - SLOPE_WINDOW];
        Some(Signals {
            current: *current,
            slope_anxiety: current.anxiety - start.anxiety,
            slope_stress: current.stress - start.stress,
            slope_confidence: current.confidence - start.confidence,
            dev_anxiety: baseline.deviation(current, MetricField::Anxiety),
            dev_deception: baseline.deviation(current, MetricField::Deception),
            dev_pupil: baseline.deviation(current, MetricField::PupilDilation),
            dev_blink: baseline.deviation(current, MetricField::BlinkRate),
        })
    }
}

type Predicate = fn(&Signals) -> bool;

struct Variant {
    when: Predicate,
    rule: &'static str,
    text: &'static str,
}

struct RuleGroup {
    name: &'static str,
    applies: Predicate,
    /// The last variant of each group is unconditional
    variants: &'static [Variant],
}

fn always(_: &Signals) -> bool {
    true
}

static RULES: &[RuleGroup] = &[
    RuleGroup {
        name: "deception",
        applies: |s| s.current.deception > 70.0,
        variants: &[
            Variant {
                when: |s| s.current.stress < 30.0 && s.current.confidence > 60.0,
                rule: "calculated_manipulation",
                text: "Calculated manipulation: strong deception cues with low stress and high confidence suggest a rehearsed, controlled narrative.",
            },
            Variant {
                when: |s| s.current.stress > 60.0 || s.slope_stress > 5.0,
                rule: "anxious_deception",
                text: "Anxious deception: deception cues paired with rising stress point to discomfort with what is being said.",
            },
            Variant {
                when: always,
                rule: "possible_concealment",
                text: "Possible concealment: deception cues are elevated; the subject may be withholding information.",
            },
        ],
    },
    RuleGroup {
        name: "pupil",
        applies: |s| s.dev_pupil.abs() > 15.0,
        variants: &[
            Variant {
                when: |s| s.dev_pupil > 0.0 && s.current.excitement > 60.0,
                rule: "engaged_interest",
                text: "Engaged interest: pupils are dilating alongside high excitement, a sign of strong interest in the topic.",
            },
            Variant {
                when: |s| s.dev_pupil > 0.0 && s.current.stress > 60.0,
                rule: "cognitive_load",
                text: "Cognitive load: pupil dilation under stress indicates heavy mental effort.",
            },
            Variant {
                when: |s| s.dev_pupil > 0.0,
                rule: "heightened_arousal",
                text: "Heightened arousal: pupils are dilating above the resting baseline.",
            },
            Variant {
                when: |s| s.current.aggression > 50.0,
                rule: "hostile_evaluation",
                text: "Hostile evaluation: pupil constriction with aggression suggests a negative judgement of the topic.",
            },
            Variant {
                when: always,
                rule: "aversion",
                text: "Aversion: pupils are constricting below baseline, a possible sign of disinterest or dislike.",
            },
        ],
    },
    RuleGroup {
        name: "gaze",
        applies: |s| s.current.gaze_deviation > 75.0,
        variants: &[
            Variant {
                when: |s| s.current.anxiety > 60.0,
                rule: "gaze_discomfort",
                text: "Discomfort: gaze aversion with high anxiety suggests unease or embarrassment around the current topic.",
            },
            Variant {
                when: |s| s.current.deception > 50.0 || s.dev_deception > 15.0,
                rule: "gaze_evasive",
                text: "Evasiveness: the subject avoids eye contact while deception cues are rising.",
            },
            Variant {
                when: always,
                rule: "gaze_recall",
                text: "Memory recall: frequent gaze shifts suggest the subject is retrieving or constructing information.",
            },
        ],
    },
    RuleGroup {
        name: "rapid_blinking",
        applies: |s| s.current.blink_rate > 80.0 || s.dev_blink > 20.0,
        variants: &[Variant {
            when: always,
            rule: "rapid_blinking",
            text: "Rapid blinking: blink rate is well above normal, typical of stress or heavy cognitive load.",
        }],
    },
    RuleGroup {
        name: "suppressed_blinking",
        applies: |s| s.current.blink_rate < 10.0 && s.dev_blink < -10.0,
        variants: &[Variant {
            when: always,
            rule: "suppressed_blinking",
            text: "Suppressed blinking: an unusually low blink rate points to intense focus or deliberate self-control.",
        }],
    },
    RuleGroup {
        name: "aggression",
        applies: |s| s.current.aggression > 70.0,
        variants: &[
            Variant {
                when: |s| s.current.stress > 60.0,
                rule: "defensive_hostility",
                text: "Defensive hostility: aggression under stress suggests the subject feels threatened.",
            },
            Variant {
                when: |s| s.current.confidence > 60.0,
                rule: "dominance_display",
                text: "Dominance display: confident aggression signals an attempt to take control of the exchange.",
            },
            Variant {
                when: always,
                rule: "frustration",
                text: "Frustration: aggression is building without a clear source of confidence or stress.",
            },
        ],
    },
    RuleGroup {
        name: "boredom",
        applies: |s| s.current.boredom > 75.0,
        variants: &[Variant {
            when: always,
            rule: "disengagement",
            text: "Disengagement: the subject appears bored and mentally checked out.",
        }],
    },
    RuleGroup {
        name: "empathy",
        applies: |s| s.current.empathy > 75.0,
        variants: &[Variant {
            when: always,
            rule: "empathic_engagement",
            text: "Empathic engagement: the subject is emotionally attuned to the conversation.",
        }],
    },
    RuleGroup {
        name: "distress",
        applies: |s| s.current.anxiety > 75.0 || s.current.stress > 75.0,
        variants: &[
            Variant {
                when: |s| s.slope_confidence < -5.0,
                rule: "collapsing_confidence",
                text: "Collapsing confidence: rising anxiety is eroding the subject's composure.",
            },
            Variant {
                when: |s| s.current.excitement > 60.0,
                rule: "nervous_excitement",
                text: "Nervous excitement: high arousal here may reflect anticipation rather than distress.",
            },
            Variant {
                when: always,
                rule: "acute_stress",
                text: "Acute stress response: anxiety and stress are well above comfortable levels.",
            },
        ],
    },
    RuleGroup {
        name: "confidence",
        applies: |s| s.current.confidence > 80.0,
        variants: &[
            Variant {
                when: |s| s.current.excitement > 60.0,
                rule: "enthusiastic_confidence",
                text: "Enthusiastic confidence: the subject is assured and energised.",
            },
            Variant {
                when: |s| s.dev_anxiety > 10.0,
                rule: "masked_nervousness",
                text: "Masked nervousness: outward confidence while anxiety sits above the subject's baseline.",
            },
            Variant {
                when: always,
                rule: "calm_confidence",
                text: "Calm confidence: the subject appears self-assured and in control.",
            },
        ],
    },
    RuleGroup {
        name: "trend",
        applies: always,
        variants: &[
            Variant {
                when: |s| s.slope_anxiety.abs() < 2.0 && s.slope_stress.abs() < 2.0,
                rule: "stable_baseline",
                text: "Established baseline: the subject's state is stable with no significant deviations.",
            },
            Variant {
                when: always,
                rule: "gathering_data",
                text: "Gathering data: signals are shifting but no clear pattern has emerged yet.",
            },
        ],
    },
];

/// Select the conclusion for the current tick
pub fn classify(
    current: &MetricVector,
    recent: &[MetricVector],
    baseline: Option<&Baseline>,
) -> Conclusion {
    match Signals::derive(current, recent, baseline) {
        Some(signals) => evaluate(&signals),
        None => INSUFFICIENT_DATA,
    }
}

/// Run the rule table over already-derived signals
pub fn evaluate(signals: &Signals) -> Conclusion {
    for group in RULES {
        if !(group.applies)(signals) {
            continue;
        }
        if let Some(variant) = group.variants.iter().find(|v| (v.when)(signals)) {
            return Conclusion {
                rule: variant.rule,
                text: variant.text,
            };
        }
    }
    // The trend group always applies and ends with an unconditional variant.
    INSUFFICIENT_DATA
}

/// Names of the rule groups in evaluation order
pub fn rule_groups() -> Vec<&'static str> {
    RULES.iter().map(|g| g.name).collect()
}

/// Every conclusion text a group can produce
pub fn group_texts(group: &str) -> Vec<&'static str> {
    RULES
        .iter()
        .find(|g| g.name == group)
        .map(|g| g.variants.iter().map(|v| v.text).collect())
        .unwrap_or_default()
}
