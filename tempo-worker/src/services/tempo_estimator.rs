//! Tempo estimation engine
//!
//! Combines two independent estimates of the same excerpt:
//! - a global tempo from `aubio tempo` (one scalar)
//! - beat timestamps from `aubio beat`, reduced to a BPM and a confidence
//!   through the median and median absolute deviation of the beat intervals
//!
//! Beat detectors often lock onto half or double the perceived tempo. The
//! beat BPM is therefore snapped to whichever of `x`, `2x`, `x/2` sits
//! closest to the global estimate, and confidence is discounted whenever
//! the answer had to move.
//!
//! The constants are tuned values; tests pin them.

use std::path::Path;
use tracing::{debug, info};

use super::JobContext;
use crate::error::{JobError, JobResult};

/// Fewer beat events than this cannot be analyzed
pub const MIN_BEAT_EVENTS: usize = 8;
/// Fewer usable intervals than this cannot be analyzed
pub const MIN_INTERVALS: usize = 6;
/// Shortest plausible beat interval (300 BPM), exclusive
pub const MIN_INTERVAL_SECS: f64 = 0.2;
/// Longest plausible beat interval (30 BPM), exclusive
pub const MAX_INTERVAL_SECS: f64 = 2.0;
/// Lower bound of the reported tempo range
pub const MIN_PLAUSIBLE_BPM: f64 = 60.0;
/// Upper bound of the reported tempo range
pub const MAX_PLAUSIBLE_BPM: f64 = 220.0;
/// Score penalty for an octave candidate outside the plausible range
pub const OUT_OF_RANGE_PENALTY: f64 = 50.0;
/// Moving further than this from the beat BPM counts as an octave snap
pub const OCTAVE_SNAP_THRESHOLD_BPM: f64 = 5.0;
/// Confidence multiplier after an octave snap
pub const OCTAVE_SNAP_DISCOUNT: f64 = 0.75;
/// Clamping by more than this counts as an implausible estimate
pub const CLAMP_TOLERANCE_BPM: f64 = 0.1;
/// Confidence multiplier after clamping
pub const CLAMP_DISCOUNT: f64 = 0.7;

/// Final analysis result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoEstimate {
    pub bpm: f64,
    /// In [0, 1]
    pub confidence: f64,
}

/// Run the full analysis pipeline for one track
///
/// Downloads the source into a scratch directory, normalizes a
/// representative excerpt, and estimates its tempo. The scratch directory is
/// removed on every exit path, including cancellation.
pub async fn analyze_track(ctx: &JobContext<'_>, source_key: &str) -> JobResult<TempoEstimate> {
    let scratch = ctx.scratch_dir("analysis-")?;
    let source = ctx.fetch_source(source_key, scratch.path()).await?;

    let working = scratch.path().join("working.wav");
    let excerpt = (ctx.settings.excerpt_offset_secs, ctx.settings.excerpt_secs);
    ctx.normalize(&source, &working, Some(excerpt)).await?;

    estimate_tempo(ctx, &working).await
}

/// Estimate the tempo of a normalized WAV file
pub async fn estimate_tempo(ctx: &JobContext<'_>, wav: &Path) -> JobResult<TempoEstimate> {
    let tempo_bpm = global_tempo(ctx, wav).await?;
    let beats = beat_times(ctx, wav).await?;

    debug!(tempo_bpm, beat_events = beats.len(), "Estimators finished");

    let estimate = resolve_tempo(&beats, tempo_bpm)?;

    info!(
        bpm = estimate.bpm,
        confidence = estimate.confidence,
        tempo_bpm,
        "Tempo estimated"
    );

    Ok(estimate)
}

async fn global_tempo(ctx: &JobContext<'_>, wav: &Path) -> JobResult<f64> {
    let args = vec!["tempo".to_string(), "-i".to_string(), wav.display().to_string()];
    let output = ctx
        .tools
        .run_tool(&ctx.settings.aubio_bin, &args, ctx.tool_timeout)
        .await?;
    parse_tempo_output(&output.stdout)
}

async fn beat_times(ctx: &JobContext<'_>, wav: &Path) -> JobResult<Vec<f64>> {
    let args = vec!["beat".to_string(), "-i".to_string(), wav.display().to_string()];
    let output = ctx
        .tools
        .run_tool(&ctx.settings.aubio_bin, &args, ctx.tool_timeout)
        .await?;
    Ok(parse_beat_output(&output.stdout))
}

/// Parse the global tempo printed by the estimator, e.g. `"131.72 bpm"`
pub fn parse_tempo_output(text: &str) -> JobResult<f64> {
    let cleaned = text.trim().to_lowercase().replace("bpm", "");
    let token = cleaned
        .split_whitespace()
        .next()
        .ok_or_else(|| JobError::tool("aubio tempo", format!("empty output: {:?}", text)))?;

    let bpm: f64 = token
        .parse()
        .map_err(|e| JobError::tool("aubio tempo", format!("failed to parse {:?}: {}", token, e)))?;

    if !bpm.is_finite() {
        return Err(JobError::tool("aubio tempo", format!("non-finite tempo {:?}", token)));
    }

    Ok(bpm)
}

/// Parse beat timestamps, one event per line
///
/// Only the first token of a line is used (some builds append a
/// confidence column). Blank, unparseable and non-positive lines are skipped.
pub fn parse_beat_output(text: &str) -> Vec<f64> {
    text.lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|token| token.parse::<f64>().ok())
        .filter(|t| t.is_finite() && *t > 0.0)
        .collect()
}

/// Consecutive beat intervals inside the plausible range
pub fn beat_intervals(beats: &[f64]) -> Vec<f64> {
    beats
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .filter(|d| *d > MIN_INTERVAL_SECS && *d < MAX_INTERVAL_SECS)
        .collect()
}

/// BPM and confidence derived from beat timestamps alone
///
/// `bpm = 60 / median(intervals)`;
/// `confidence = clamp(1 - MAD(intervals) / median(intervals), 0, 1)`.
pub fn bpm_and_confidence(beats: &[f64]) -> JobResult<TempoEstimate> {
    let mut intervals = beat_intervals(beats);
    if beats.len() < MIN_BEAT_EVENTS || intervals.len() < MIN_INTERVALS {
        return Err(JobError::InsufficientBeats {
            beats: beats.len(),
            intervals: intervals.len(),
        });
    }

    intervals.sort_by(f64::total_cmp);
    let med = median(&intervals);

    let mut deviations: Vec<f64> = intervals.iter().map(|d| (d - med).abs()).collect();
    deviations.sort_by(f64::total_cmp);
    let mad = median(&deviations);

    Ok(TempoEstimate {
        bpm: 60.0 / med,
        confidence: (1.0 - mad / med).clamp(0.0, 1.0),
    })
}

/// Snap the beat BPM to the octave closest to the global tempo estimate
///
/// Candidates are `beat_bpm`, `2 * beat_bpm` and `beat_bpm / 2`, scored by
/// distance to `tempo_bpm` plus [`OUT_OF_RANGE_PENALTY`] when outside
/// [[`MIN_PLAUSIBLE_BPM`], [`MAX_PLAUSIBLE_BPM`]]. Ties keep the earlier
/// candidate.
pub fn choose_best_tempo(beat_bpm: f64, beat_confidence: f64, tempo_bpm: f64) -> TempoEstimate {
    let candidates = [beat_bpm, beat_bpm * 2.0, beat_bpm * 0.5];

    let mut best = candidates[0];
    let mut best_score = f64::INFINITY;
    for candidate in candidates {
        let mut score = (candidate - tempo_bpm).abs();
        if !(MIN_PLAUSIBLE_BPM..=MAX_PLAUSIBLE_BPM).contains(&candidate) {
            score += OUT_OF_RANGE_PENALTY;
        }
        if score < best_score {
            best_score = score;
            best = candidate;
        }
    }

    let mut confidence = beat_confidence;
    if (best - beat_bpm).abs() > OCTAVE_SNAP_THRESHOLD_BPM {
        confidence *= OCTAVE_SNAP_DISCOUNT;
    }

    TempoEstimate {
        bpm: best,
        confidence: confidence.clamp(0.0, 1.0),
    }
}

/// Clamp into the plausible range, discounting confidence if that moved it
pub fn clamp_to_plausible(chosen: TempoEstimate) -> TempoEstimate {
    let bpm = chosen.bpm.clamp(MIN_PLAUSIBLE_BPM, MAX_PLAUSIBLE_BPM);
    let mut confidence = chosen.confidence;
    if (bpm - chosen.bpm).abs() > CLAMP_TOLERANCE_BPM {
        confidence = (confidence * CLAMP_DISCOUNT).clamp(0.0, 1.0);
    }
    TempoEstimate { bpm, confidence }
}

/// Combine beat events and the global tempo into the final estimate
pub fn resolve_tempo(beats: &[f64], tempo_bpm: f64) -> JobResult<TempoEstimate> {
    let from_beats = bpm_and_confidence(beats)?;
    let chosen = choose_best_tempo(from_beats.bpm, from_beats.confidence, tempo_bpm);
    Ok(clamp_to_plausible(chosen))
}

/// Median of an ascending, non-empty slice
fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}
