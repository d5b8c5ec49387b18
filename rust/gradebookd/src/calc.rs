use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Allowed drift of the weight sum away from 1.0.
pub const WEIGHT_SUM_TOLERANCE: f64 = 0.001;

pub const DEFAULT_SCALE: f64 = 20.0;
pub const DEFAULT_PASSING_THRESHOLD: f64 = 10.5;

/// Two-decimal rounding used for every number that leaves the sidecar.
pub fn round_2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeEntry {
    pub label: String,
    pub score: f64,
    pub weight: f64,
}

impl GradeEntry {
    pub fn new(label: impl Into<String>, score: f64, weight: f64) -> Self {
        Self {
            label: label.into(),
            score,
            weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("at least one grade entry is required")]
    NoEntries,
    #[error("grading scale must be a positive number (got {0})")]
    InvalidScale(f64),
    #[error("passing threshold {threshold} must be within 0..={scale}")]
    ThresholdOutOfRange { threshold: f64, scale: f64 },
    #[error("entry {index} has an empty label")]
    EmptyLabel { index: usize },
    #[error("score {score} for '{label}' is outside the valid range 0..={scale}")]
    ScoreOutOfRange { label: String, score: f64, scale: f64 },
    #[error("weight {weight} for '{label}' must be between 0 and 1")]
    WeightOutOfRange { label: String, weight: f64 },
    #[error("weights must sum to 1.0 (got {sum})")]
    WeightSum { sum: f64 },
    #[error("score at position {index} is not a number")]
    NotANumber { index: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BandConfigError {
    #[error("at least one category band is required")]
    NoBands,
    #[error("failing label must not be empty")]
    EmptyFailingLabel,
    #[error("band {index} has an empty label")]
    EmptyLabel { index: usize },
    #[error("first band must start at 0 (got {0})")]
    FirstBandNotZero(f64),
    #[error("band {index} minFraction {value} must be within [0, 1)")]
    FractionOutOfRange { index: usize, value: f64 },
    #[error("band {index} must start above the previous band")]
    NotIncreasing { index: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryBand {
    pub label: String,
    /// Lower bound of the band as a fraction of the grading scale.
    pub min_fraction: f64,
}

/// Scale-relative category policy.
///
/// A failing result always maps to `failing_label`. Passing results map to the
/// last band whose lower bound is at or below the final score. Bands start at 0
/// and increase strictly, so every score in `[0, scale]` falls in exactly one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryBands {
    failing_label: String,
    bands: Vec<CategoryBand>,
}

impl CategoryBands {
    pub fn new(
        failing_label: impl Into<String>,
        bands: Vec<CategoryBand>,
    ) -> Result<Self, BandConfigError> {
        let failing_label = failing_label.into().trim().to_string();
        if failing_label.is_empty() {
            return Err(BandConfigError::EmptyFailingLabel);
        }
        let Some(first) = bands.first() else {
            return Err(BandConfigError::NoBands);
        };
        if first.min_fraction != 0.0 {
            return Err(BandConfigError::FirstBandNotZero(first.min_fraction));
        }
        let mut prev: Option<f64> = None;
        for (index, band) in bands.iter().enumerate() {
            if band.label.trim().is_empty() {
                return Err(BandConfigError::EmptyLabel { index });
            }
            if !(0.0..1.0).contains(&band.min_fraction) {
                return Err(BandConfigError::FractionOutOfRange {
                    index,
                    value: band.min_fraction,
                });
            }
            if let Some(p) = prev {
                if band.min_fraction <= p {
                    return Err(BandConfigError::NotIncreasing { index });
                }
            }
            prev = Some(band.min_fraction);
        }
        Ok(Self {
            failing_label,
            bands,
        })
    }

    pub fn failing_label(&self) -> &str {
        &self.failing_label
    }

    pub fn bands(&self) -> &[CategoryBand] {
        &self.bands
    }

    pub fn categorize(&self, final_score: f64, scale: f64, passed: bool) -> &str {
        if !passed {
            return &self.failing_label;
        }
        let mut label = self.failing_label.as_str();
        for band in &self.bands {
            if band.min_fraction * scale <= final_score {
                label = band.label.as_str();
            } else {
                break;
            }
        }
        label
    }
}

impl Default for CategoryBands {
    /// Vigesimal bands: 13, 16 and 18 out of 20.
    fn default() -> Self {
        let band = |label: &str, min_fraction: f64| CategoryBand {
            label: label.to_string(),
            min_fraction,
        };
        Self {
            failing_label: "Desaprobado".to_string(),
            bands: vec![
                band("Aprobado", 0.0),
                band("Bueno", 0.65),
                band("Muy Bueno", 0.80),
                band("Excelente", 0.90),
            ],
        }
    }
}

/// Per-workspace grading configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct GradingPolicy {
    pub scale: f64,
    pub passing_threshold: f64,
    pub bands: CategoryBands,
}

impl Default for GradingPolicy {
    fn default() -> Self {
        Self {
            scale: DEFAULT_SCALE,
            passing_threshold: DEFAULT_PASSING_THRESHOLD,
            bands: CategoryBands::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationRequest {
    pub entries: Vec<GradeEntry>,
    pub scale: f64,
    pub passing_threshold: f64,
}

impl SimulationRequest {
    pub fn run(&self, bands: &CategoryBands) -> Result<SimulationResult, ValidationError> {
        simulate(&self.entries, self.scale, self.passing_threshold, bands)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryBreakdown {
    pub label: String,
    pub score: f64,
    pub weight: f64,
    pub contribution: f64,
    pub contribution_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationDetails {
    pub evaluation_count: usize,
    pub highest_score: f64,
    pub lowest_score: f64,
    pub std_deviation: f64,
    pub weight_sum: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub simple_average: f64,
    pub weighted_average: f64,
    pub final_score: f64,
    pub passed: bool,
    pub category: String,
    pub details: SimulationDetails,
    pub entries: Vec<EntryBreakdown>,
}

fn validate_entries(
    entries: &[GradeEntry],
    scale: f64,
    passing_threshold: f64,
) -> Result<f64, ValidationError> {
    if entries.is_empty() {
        return Err(ValidationError::NoEntries);
    }
    if !scale.is_finite() || scale <= 0.0 {
        return Err(ValidationError::InvalidScale(scale));
    }
    if !(0.0..=scale).contains(&passing_threshold) {
        return Err(ValidationError::ThresholdOutOfRange {
            threshold: passing_threshold,
            scale,
        });
    }

    let mut weight_sum = 0.0;
    for (index, e) in entries.iter().enumerate() {
        if e.label.trim().is_empty() {
            return Err(ValidationError::EmptyLabel { index });
        }
        // NaN fails both range checks.
        if !(0.0..=scale).contains(&e.score) {
            return Err(ValidationError::ScoreOutOfRange {
                label: e.label.clone(),
                score: e.score,
                scale,
            });
        }
        if !(0.0..=1.0).contains(&e.weight) {
            return Err(ValidationError::WeightOutOfRange {
                label: e.label.clone(),
                weight: e.weight,
            });
        }
        weight_sum += e.weight;
    }

    if (weight_sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(ValidationError::WeightSum { sum: weight_sum });
    }
    Ok(weight_sum)
}

/// Runs the weighted grade simulation.
///
/// The weighted average is `Σ score × weight` and doubles as the final score;
/// the pass check is inclusive of the threshold.
pub fn simulate(
    entries: &[GradeEntry],
    scale: f64,
    passing_threshold: f64,
    bands: &CategoryBands,
) -> Result<SimulationResult, ValidationError> {
    let weight_sum = validate_entries(entries, scale, passing_threshold)?;

    let n = entries.len() as f64;
    let simple_average = entries.iter().map(|e| e.score).sum::<f64>() / n;
    let weighted_average: f64 = entries.iter().map(|e| e.score * e.weight).sum();
    let final_score = weighted_average;
    let passed = final_score >= passing_threshold;
    let category = bands.categorize(final_score, scale, passed).to_string();

    let variance = entries
        .iter()
        .map(|e| (e.score - simple_average).powi(2))
        .sum::<f64>()
        / n;
    let highest_score = entries.iter().map(|e| e.score).fold(f64::MIN, f64::max);
    let lowest_score = entries.iter().map(|e| e.score).fold(f64::MAX, f64::min);

    let breakdown = entries
        .iter()
        .map(|e| {
            let contribution = e.score * e.weight;
            let contribution_percent = if final_score > 0.0 {
                100.0 * contribution / final_score
            } else {
                0.0
            };
            EntryBreakdown {
                label: e.label.trim().to_string(),
                score: e.score,
                weight: e.weight,
                contribution,
                contribution_percent,
            }
        })
        .collect();

    Ok(SimulationResult {
        simple_average,
        weighted_average,
        final_score,
        passed,
        category,
        details: SimulationDetails {
            evaluation_count: entries.len(),
            highest_score,
            lowest_score,
            std_deviation: variance.sqrt(),
            weight_sum,
        },
        entries: breakdown,
    })
}

/// Converts percentage weights (summing to 100) into fractions.
pub fn weights_from_percent(entries: Vec<GradeEntry>) -> Vec<GradeEntry> {
    entries
        .into_iter()
        .map(|e| GradeEntry {
            weight: e.weight / 100.0,
            ..e
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleMean {
    pub mean: f64,
    pub passed: bool,
    pub count: usize,
}

/// Unweighted mean of raw scores; no scale check.
pub fn simple_mean(scores: &[f64], passing_threshold: f64) -> Result<SimpleMean, ValidationError> {
    if scores.is_empty() {
        return Err(ValidationError::NoEntries);
    }
    if let Some(index) = scores.iter().position(|s| !s.is_finite()) {
        return Err(ValidationError::NotANumber { index });
    }
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    Ok(SimpleMean {
        mean,
        passed: mean >= passing_threshold,
        count: scores.len(),
    })
}
