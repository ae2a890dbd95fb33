//! Sliding-window message density analysis
//!
//! Counts messages in overlapping windows, derives an adaptive threshold from the mean
//! window count, and keeps windows whose count is a strict local maximum at or above it.

use chrono::{DateTime, Utc};
use dmk_common::config::AnalysisSettings;
use thiserror::Error;
use tracing::debug;

use super::peak_ranker::{build_peak, rank};
use crate::models::{Message, Peak};

/// Density analysis errors
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Window, step, threshold or cap out of range
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Largest elapsed time needs more windows than allowed
    #[error("Recording spans {max_elapsed}s, which needs {required} windows (limit {limit})")]
    TooManyWindows {
        max_elapsed: f64,
        required: f64,
        limit: usize,
    },
}

/// Density analysis parameters
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    /// Window length in seconds
    pub window_size: f64,
    /// Stride between window starts in seconds
    pub step_size: f64,
    /// Lowest threshold regardless of the mean
    pub threshold_floor: usize,
    /// Mean window count is scaled by this before rounding
    pub threshold_multiplier: f64,
    /// Peaks kept after ranking
    pub max_peaks: usize,
    /// Upper bound on the window table
    pub max_window_samples: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_size: 30.0,
            step_size: 5.0,
            threshold_floor: 3,
            threshold_multiplier: 1.5,
            max_peaks: 10,
            max_window_samples: 100_000,
        }
    }
}

impl From<&AnalysisSettings> for AnalysisConfig {
    fn from(settings: &AnalysisSettings) -> Self {
        Self {
            window_size: settings.window_size_secs,
            step_size: settings.step_size_secs,
            threshold_floor: settings.threshold_floor,
            threshold_multiplier: settings.threshold_multiplier,
            max_peaks: settings.max_peaks,
            max_window_samples: settings.max_window_samples,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !self.window_size.is_finite() || self.window_size <= 0.0 {
            return Err(AnalysisError::InvalidParameters(format!(
                "window size must be > 0, got {}",
                self.window_size
            )));
        }
        if !self.step_size.is_finite() || self.step_size <= 0.0 {
            return Err(AnalysisError::InvalidParameters(format!(
                "step size must be > 0, got {}",
                self.step_size
            )));
        }
        if !self.threshold_multiplier.is_finite() || self.threshold_multiplier < 0.0 {
            return Err(AnalysisError::InvalidParameters(format!(
                "threshold multiplier must be >= 0, got {}",
                self.threshold_multiplier
            )));
        }
        if self.max_peaks == 0 {
            return Err(AnalysisError::InvalidParameters(
                "max peaks must be >= 1".to_string(),
            ));
        }
        if self.max_window_samples < 3 {
            return Err(AnalysisError::InvalidParameters(format!(
                "max window samples must be >= 3, got {}",
                self.max_window_samples
            )));
        }
        Ok(())
    }
}

/// One window of the sliding table
#[derive(Debug, Clone, Copy)]
pub struct WindowSample<'a> {
    /// Window start in seconds since recording start
    pub window_start: f64,
    /// Messages with `elapsed_seconds` in `[window_start, window_start + window_size)`
    pub members: &'a [Message],
}

impl WindowSample<'_> {
    pub fn count(&self) -> usize {
        self.members.len()
    }
}

/// Density analyzer
#[derive(Debug, Clone, Default)]
pub struct DensityAnalyzer {
    config: AnalysisConfig,
}

impl DensityAnalyzer {
    /// Create analyzer with defaults (30 s window, 5 s step)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Set window and step size in seconds
    pub fn with_window(mut self, window_size: f64, step_size: f64) -> Result<Self, AnalysisError> {
        let config = AnalysisConfig {
            window_size,
            step_size,
            ..self.config.clone()
        };
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Cap the number of returned peaks
    pub fn with_max_peaks(mut self, max_peaks: usize) -> Result<Self, AnalysisError> {
        if max_peaks == 0 {
            return Err(AnalysisError::InvalidParameters(
                "max peaks must be >= 1".to_string(),
            ));
        }
        self.config.max_peaks = max_peaks;
        Ok(self)
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Build the window table over messages sorted by elapsed time
    ///
    /// One sample per `t = i * step_size` while `t <= max elapsed`. Fails before allocating
    /// when that exceeds `max_window_samples`.
    pub fn window_samples<'a>(
        &self,
        sorted: &'a [Message],
    ) -> Result<Vec<WindowSample<'a>>, AnalysisError> {
        let Some(last) = sorted.last() else {
            return Ok(Vec::new());
        };
        let max_elapsed = last.elapsed_seconds;

        let required = (max_elapsed / self.config.step_size).floor() + 1.0;
        if !required.is_finite() || required > self.config.max_window_samples as f64 {
            return Err(AnalysisError::TooManyWindows {
                max_elapsed,
                required,
                limit: self.config.max_window_samples,
            });
        }

        let mut samples = Vec::with_capacity(required as usize);
        let mut index = 0usize;
        loop {
            let window_start = index as f64 * self.config.step_size;
            if window_start > max_elapsed {
                break;
            }
            let window_end = window_start + self.config.window_size;
            let lo = sorted.partition_point(|m| m.elapsed_seconds < window_start);
            let hi = sorted.partition_point(|m| m.elapsed_seconds < window_end);
            samples.push(WindowSample {
                window_start,
                members: &sorted[lo..hi],
            });
            index += 1;
        }
        Ok(samples)
    }

    /// `max(floor, round(mean count * multiplier))`
    pub fn threshold(&self, samples: &[WindowSample<'_>]) -> usize {
        if samples.is_empty() {
            return self.config.threshold_floor;
        }
        let total: usize = samples.iter().map(WindowSample::count).sum();
        let mean = total as f64 / samples.len() as f64;
        let scaled = (mean * self.config.threshold_multiplier).round() as usize;
        scaled.max(self.config.threshold_floor)
    }

    /// Detect and rank density peaks
    ///
    /// `recording_start` is only used for the absolute span of a window without members.
    pub fn analyze(
        &self,
        messages: &[Message],
        recording_start: Option<DateTime<Utc>>,
    ) -> Result<Vec<Peak>, AnalysisError> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let mut sorted = messages.to_vec();
        sorted.sort_by(|a, b| a.elapsed_seconds.total_cmp(&b.elapsed_seconds));

        let samples = self.window_samples(&sorted)?;
        if samples.len() < 3 {
            return Ok(Vec::new());
        }

        let threshold = self.threshold(&samples);
        let counts: Vec<usize> = samples.iter().map(WindowSample::count).collect();

        let peaks: Vec<Peak> = (1..counts.len() - 1)
            .filter(|&i| {
                counts[i] > counts[i - 1] && counts[i] > counts[i + 1] && counts[i] >= threshold
            })
            .map(|i| build_peak(&samples[i], self.config.window_size, recording_start))
            .collect();

        debug!(
            samples = samples.len(),
            threshold = threshold,
            candidates = peaks.len(),
            "Density analysis complete"
        );

        Ok(rank(peaks, self.config.max_peaks))
    }
}

/// Analyze with default threshold settings and the given window geometry
pub fn analyze(
    messages: &[Message],
    window_size: f64,
    step_size: f64,
    recording_start: Option<DateTime<Utc>>,
) -> Result<Vec<Peak>, AnalysisError> {
    let analyzer = DensityAnalyzer::new().with_window(window_size, step_size)?;
    analyzer.analyze(messages, recording_start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Position;
    use dmk_common::time::epoch_seconds_to_utc;

    const BASE_EPOCH: f64 = 1_700_000_000.0;

    fn msg(elapsed: f64) -> Message {
        Message {
            elapsed_seconds: elapsed,
            absolute_time: epoch_seconds_to_utc(BASE_EPOCH + elapsed).unwrap(),
            user_id: None,
            content: "888".to_string(),
            color: None,
            font_size: None,
            position: Position::Scroll,
        }
    }

    /// `counts[i]` messages inside `[i, i + 1)`
    fn with_counts(counts: &[usize]) -> Vec<Message> {
        let mut messages = Vec::new();
        for (i, &n) in counts.iter().enumerate() {
            for k in 0..n {
                messages.push(msg(i as f64 + k as f64 / (n as f64 + 1.0)));
            }
        }
        messages
    }

    fn unit_analyzer() -> DensityAnalyzer {
        DensityAnalyzer::with_config(AnalysisConfig {
            window_size: 1.0,
            step_size: 1.0,
            ..AnalysisConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert!(DensityAnalyzer::new().with_window(0.0, 5.0).is_err());
        assert!(DensityAnalyzer::new().with_window(30.0, -1.0).is_err());
        assert!(DensityAnalyzer::new().with_window(f64::NAN, 5.0).is_err());
        assert!(DensityAnalyzer::new().with_max_peaks(0).is_err());
        assert!(DensityAnalyzer::with_config(AnalysisConfig {
            threshold_multiplier: -0.5,
            ..AnalysisConfig::default()
        })
        .is_err());
    }

    #[test]
    fn test_empty_input() {
        assert!(DensityAnalyzer::new().analyze(&[], None).unwrap().is_empty());
    }

    #[test]
    fn test_fewer_than_three_samples() {
        // max elapsed 5 -> samples at 0 and 5 only
        let messages: Vec<Message> = (0..10).map(|_| msg(5.0)).collect();
        assert!(DensityAnalyzer::new().analyze(&messages, None).unwrap().is_empty());
    }

    #[test]
    fn test_window_table_half_open() {
        let messages = vec![msg(0.0), msg(4.9), msg(5.0), msg(10.0)];
        let analyzer = DensityAnalyzer::new().with_window(5.0, 5.0).unwrap();
        let samples = analyzer.window_samples(&messages).unwrap();
        let counts: Vec<usize> = samples.iter().map(WindowSample::count).collect();
        assert_eq!(counts, vec![2, 1, 1]);
        assert_eq!(samples[2].window_start, 10.0);
    }

    #[test]
    fn test_strict_local_maximum() {
        // mean 2.25 * 1.5 -> 3
        let peaks = unit_analyzer().analyze(&with_counts(&[1, 6, 1, 1]), None).unwrap();
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].start_time, 1.0);
        assert_eq!(peaks[0].end_time, 2.0);
        assert_eq!(peaks[0].count, 6);
    }

    #[test]
    fn test_plateau_never_qualifies() {
        assert!(unit_analyzer().analyze(&with_counts(&[1, 6, 6, 1]), None).unwrap().is_empty());
    }

    #[test]
    fn test_threshold_floor_applies() {
        // 2 is a local max but below the floor of 3
        let messages = with_counts(&[1, 2, 1, 1]);
        assert!(unit_analyzer().analyze(&messages, None).unwrap().is_empty());

        let lenient = DensityAnalyzer::with_config(AnalysisConfig {
            window_size: 1.0,
            step_size: 1.0,
            threshold_floor: 0,
            ..AnalysisConfig::default()
        })
        .unwrap();
        assert_eq!(lenient.analyze(&messages, None).unwrap().len(), 1);
    }

    #[test]
    fn test_threshold_rounds_scaled_mean() {
        let messages = with_counts(&[1, 4, 1, 9, 1, 7, 1, 9, 1]);
        let analyzer = unit_analyzer();
        let samples = analyzer.window_samples(&messages).unwrap();
        // 34 / 9 * 1.5 ~ 5.67 -> 6
        assert_eq!(analyzer.threshold(&samples), 6);
    }

    #[test]
    fn test_sorted_by_count_and_capped() {
        let messages = with_counts(&[1, 4, 1, 9, 1, 7, 1, 9, 1]);

        let all = unit_analyzer().analyze(&messages, None).unwrap();
        let starts: Vec<f64> = all.iter().map(|p| p.start_time).collect();
        assert_eq!(starts, vec![3.0, 7.0, 5.0]);

        let capped = unit_analyzer().with_max_peaks(2).unwrap().analyze(&messages, None).unwrap();
        let starts: Vec<f64> = capped.iter().map(|p| p.start_time).collect();
        assert_eq!(starts, vec![3.0, 7.0]);
    }

    #[test]
    fn test_unsorted_input_is_handled() {
        let mut messages = with_counts(&[1, 6, 1, 1]);
        messages.reverse();
        let peaks = unit_analyzer().analyze(&messages, None).unwrap();
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].count, 6);
    }

    #[test]
    fn test_burst_over_baseline() {
        let mut messages: Vec<Message> = (0..10).map(|i| msg(i as f64 * 30.0)).collect();
        messages.extend((0..10).map(|i| msg(150.0 + i as f64 * 3.0)));

        let peaks = analyze(&messages, 30.0, 5.0, None).unwrap();
        assert_eq!(peaks.len(), 1);
        let peak = &peaks[0];
        assert_eq!(peak.start_time, 150.0);
        assert_eq!(peak.end_time, 180.0);
        assert_eq!(peak.count, 11);
        assert_eq!(peak.span(), 30.0);
        assert_eq!(peak.start_absolute_time, epoch_seconds_to_utc(BASE_EPOCH + 150.0).unwrap());
        assert_eq!(peak.end_absolute_time, epoch_seconds_to_utc(BASE_EPOCH + 177.0).unwrap());
    }

    #[test]
    fn test_epoch_sized_elapsed_fails_without_allocating() {
        // Epoch seconds written into the elapsed field
        let messages = vec![msg(1.0), msg(2_000_000_000.0)];
        match DensityAnalyzer::new().analyze(&messages, None) {
            Err(AnalysisError::TooManyWindows { limit, .. }) => assert_eq!(limit, 100_000),
            other => panic!("expected TooManyWindows, got {:?}", other),
        }
    }

    #[test]
    fn test_window_limit_is_configurable() {
        let messages = with_counts(&[1, 6, 1, 1]);
        let tight = DensityAnalyzer::with_config(AnalysisConfig {
            window_size: 1.0,
            step_size: 1.0,
            max_window_samples: 3,
            ..AnalysisConfig::default()
        })
        .unwrap();
        assert!(matches!(
            tight.analyze(&messages, None),
            Err(AnalysisError::TooManyWindows { .. })
        ));
        assert!(DensityAnalyzer::with_config(AnalysisConfig {
            max_window_samples: 2,
            ..AnalysisConfig::default()
        })
        .is_err());
    }
}
