//! Efficacy Reporter: how well a person's samples are likely to match.

use crate::types::Sample;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Flat bonus for having at least `min_samples` samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountBonus {
    pub min_samples: usize,
    pub points: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EfficacyPolicy {
    /// Scores strictly above this are `High`.
    pub high_above: u32,
    /// Scores strictly above this (and not `High`) are `Medium`.
    pub medium_above: u32,
    #[serde(default)]
    pub bonuses: Vec<CountBonus>,
}

impl EfficacyPolicy {
    /// Redundancy bonuses, >90 / >70 cut-points.
    pub fn with_bonuses() -> Self {
        Self {
            high_above: 90,
            medium_above: 70,
            bonuses: vec![
                CountBonus { min_samples: 3, points: 5 },
                CountBonus { min_samples: 5, points: 5 },
            ],
        }
    }

    /// Plain mean score, >85 / >60 cut-points.
    pub fn plain() -> Self {
        Self {
            high_above: 85,
            medium_above: 60,
            bonuses: Vec::new(),
        }
    }

    pub fn evaluate(&self, samples: &[Sample]) -> Efficacy {
        if samples.is_empty() {
            return Efficacy { score: 0, tier: Tier::Low };
        }

        let mean = samples.iter().map(|s| s.score).sum::<f32>() / samples.len() as f32;
        let base = (mean * 100.0).round().max(0.0) as u32;
        let bonus: u32 = self
            .bonuses
            .iter()
            .filter(|b| samples.len() >= b.min_samples)
            .map(|b| b.points)
            .fold(0, u32::saturating_add);
        let score = base.saturating_add(bonus).min(100);

        let tier = if score > self.high_above {
            Tier::High
        } else if score > self.medium_above {
            Tier::Medium
        } else {
            Tier::Low
        };

        Efficacy { score, tier }
    }
}

impl Default for EfficacyPolicy {
    fn default() -> Self {
        Self::with_bonuses()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Low,
    Medium,
    High,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tier::Low => "poor",
            Tier::Medium => "good",
            Tier::High => "excellent",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Efficacy {
    /// 0..=100.
    pub score: u32,
    pub tier: Tier,
}

impl Efficacy {
    pub fn label(&self) -> String {
        format!("efficacy {}% ({})", self.score, self.tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Descriptor;

    fn samples(scores: &[f32]) -> Vec<Sample> {
        scores
            .iter()
            .map(|&score| Sample {
                descriptor: Descriptor::new(vec![0.0]),
                score,
                enrolled_at: None,
            })
            .collect()
    }

    #[test]
    fn test_single_sample_plain_policy_is_high() {
        let e = EfficacyPolicy::plain().evaluate(&samples(&[0.9]));
        assert_eq!(e, Efficacy { score: 90, tier: Tier::High });
    }

    #[test]
    fn test_single_sample_bonus_policy_is_medium() {
        // 90 is not strictly above 90.
        let e = EfficacyPolicy::with_bonuses().evaluate(&samples(&[0.9]));
        assert_eq!(e, Efficacy { score: 90, tier: Tier::Medium });
        assert_eq!(e.label(), "efficacy 90% (good)");
    }

    #[test]
    fn test_empty_is_zero_low_under_both_policies() {
        for policy in [EfficacyPolicy::plain(), EfficacyPolicy::with_bonuses()] {
            assert_eq!(policy.evaluate(&[]), Efficacy { score: 0, tier: Tier::Low });
        }
    }

    #[test]
    fn test_bonuses_accumulate_and_clamp() {
        let policy = EfficacyPolicy::with_bonuses();
        assert_eq!(policy.evaluate(&samples(&[0.8; 3])).score, 85);
        assert_eq!(policy.evaluate(&samples(&[0.8; 5])).score, 90);
        assert_eq!(policy.evaluate(&samples(&[0.97; 5])).score, 100);
    }

    #[test]
    fn test_huge_bonus_clamps_to_100() {
        let policy = EfficacyPolicy {
            high_above: 90,
            medium_above: 70,
            bonuses: vec![
                CountBonus { min_samples: 1, points: u32::MAX },
                CountBonus { min_samples: 1, points: u32::MAX },
            ],
        };
        let e = policy.evaluate(&samples(&[0.9]));
        assert_eq!(e, Efficacy { score: 100, tier: Tier::High });
    }

    #[test]
    fn test_plain_policy_ignores_count() {
        assert_eq!(EfficacyPolicy::plain().evaluate(&samples(&[0.8; 5])).score, 80);
    }

    #[test]
    fn test_rounding() {
        let e = EfficacyPolicy::plain().evaluate(&samples(&[0.555, 0.555]));
        assert_eq!(e.score, 56);
    }

    #[test]
    fn test_tier_boundaries() {
        let policy = EfficacyPolicy::plain();
        assert_eq!(policy.evaluate(&samples(&[0.86])).tier, Tier::High);
        assert_eq!(policy.evaluate(&samples(&[0.85])).tier, Tier::Medium);
        assert_eq!(policy.evaluate(&samples(&[0.61])).tier, Tier::Medium);
        assert_eq!(policy.evaluate(&samples(&[0.60])).tier, Tier::Low);
    }

    #[test]
    fn test_monotonic_in_each_sample_score() {
        for policy in [EfficacyPolicy::plain(), EfficacyPolicy::with_bonuses()] {
            let base = [0.3f32, 0.6, 0.9];
            for idx in 0..base.len() {
                let mut prev = 0u32;
                for step in 0..=100 {
                    let mut scores = base;
                    scores[idx] = step as f32 / 100.0;
                    let e = policy.evaluate(&samples(&scores));
                    assert!(e.score >= prev, "score dropped at sample {idx}, step {step}");
                    prev = e.score;
                }
            }
        }
    }
}
