//! Render engine
//!
//! Time-stretches a track from its detected tempo to a target tempo while
//! preserving pitch. The transcoder's `atempo` filter is only accurate for
//! factors in [0.5, 2.0], so larger ratios are applied as a cascade of
//! bounded stages whose product is the requested ratio.

use tempo_common::db::{AnalysisJob, JobStatus};
use tracing::{debug, info};
use uuid::Uuid;

use super::JobContext;
use crate::error::{JobError, JobResult};
use crate::storage::RENDER_CONTENT_TYPE;

/// Smallest per-stage stretch factor
pub const MIN_STAGE_FACTOR: f64 = 0.5;
/// Largest per-stage stretch factor
pub const MAX_STAGE_FACTOR: f64 = 2.0;
/// Object key prefix for rendered artifacts
pub const RENDER_KEY_PREFIX: &str = "renders";

/// What to render
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub source_key: &'a str,
    pub detected_bpm: f64,
    pub target_bpm: f64,
    pub preserve_pitch: bool,
}

/// Result persisted on the render job
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutcome {
    pub tempo_ratio: f64,
    pub chain: Vec<f64>,
    pub output_key: String,
}

/// Detected BPM of a track, if its analysis can seed a render
///
/// # Errors
/// - `NotFound` if the track was never analyzed
/// - `AnalysisNotReady` unless the analysis is `done` with a positive BPM
pub fn detected_bpm(analysis: Option<&AnalysisJob>) -> JobResult<f64> {
    let analysis = analysis.ok_or_else(|| JobError::NotFound("missing analysis for track".to_string()))?;

    match analysis.bpm {
        Some(bpm) if analysis.status == JobStatus::Done && bpm.is_finite() && bpm > 0.0 => Ok(bpm),
        bpm => Err(JobError::AnalysisNotReady {
            status: analysis.status.to_string(),
            bpm,
        }),
    }
}

/// `target / detected`, rejecting ratios that cannot be rendered
pub fn tempo_ratio(target_bpm: f64, detected_bpm: f64) -> JobResult<f64> {
    let ratio = target_bpm / detected_bpm;
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(JobError::InvalidRatio(ratio));
    }
    Ok(ratio)
}

/// Split `ratio` into stage factors within [0.5, 2.0]
///
/// Whole factors of 2.0 (or 0.5) are pulled out first, then the remainder is
/// appended; e.g. 5.0 becomes `[2.0, 2.0, 1.25]` and 0.2 becomes
/// `[0.5, 0.5, 0.8]`.
pub fn stretch_chain(ratio: f64) -> JobResult<Vec<f64>> {
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(JobError::InvalidRatio(ratio));
    }

    let mut factors = Vec::new();
    let mut remaining = ratio;

    while remaining > MAX_STAGE_FACTOR {
        factors.push(MAX_STAGE_FACTOR);
        remaining /= MAX_STAGE_FACTOR;
    }
    while remaining < MIN_STAGE_FACTOR {
        factors.push(MIN_STAGE_FACTOR);
        remaining /= MIN_STAGE_FACTOR;
    }
    factors.push(remaining);

    Ok(factors)
}

/// Transcoder filter expression for a stage chain
pub fn atempo_filter(chain: &[f64]) -> String {
    chain
        .iter()
        .map(|factor| format!("atempo={:.6}", factor))
        .collect::<Vec<_>>()
        .join(",")
}

/// Run the full render pipeline
///
/// The ratio is validated before anything is downloaded. Scratch files are
/// removed on every exit path; only the uploaded artifact survives.
pub async fn render_track(ctx: &JobContext<'_>, request: RenderRequest<'_>) -> JobResult<RenderOutcome> {
    let ratio = tempo_ratio(request.target_bpm, request.detected_bpm)?;
    let chain = stretch_chain(ratio)?;
    let filter = atempo_filter(&chain);

    debug!(
        ratio,
        stages = chain.len(),
        filter = %filter,
        "Stretch chain built"
    );
    if !request.preserve_pitch {
        // atempo always preserves pitch; there is no pitch-shifting path yet
        debug!("preserve_pitch=false requested, rendering with pitch preserved");
    }

    let scratch = ctx.scratch_dir("render-")?;
    let source = ctx.fetch_source(request.source_key, scratch.path()).await?;

    let working = scratch.path().join("working.wav");
    ctx.normalize(&source, &working, None).await?;

    let artifact_id = Uuid::new_v4();
    let rendered = scratch.path().join(format!("{}.mp3", artifact_id));
    let args = vec![
        "-y".to_string(),
        "-i".to_string(),
        working.display().to_string(),
        "-filter:a".to_string(),
        filter,
        "-codec:a".to_string(),
        "libmp3lame".to_string(),
        "-q:a".to_string(),
        "2".to_string(),
        rendered.display().to_string(),
    ];
    ctx.tools
        .run_tool(&ctx.settings.ffmpeg_bin, &args, ctx.tool_timeout)
        .await?;

    if !rendered.exists() {
        return Err(JobError::tool(
            &ctx.settings.ffmpeg_bin,
            format!("reported success but wrote no output at {}", rendered.display()),
        ));
    }

    let output_key = format!("{}/{}.mp3", RENDER_KEY_PREFIX, artifact_id);
    ctx.storage
        .upload(&output_key, &rendered, RENDER_CONTENT_TYPE)
        .await?;

    info!(ratio, output_key = %output_key, "Render uploaded");

    Ok(RenderOutcome {
        tempo_ratio: ratio,
        chain,
        output_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const EPS: f64 = 1e-9;

    fn analysis(status: JobStatus, bpm: Option<f64>) -> AnalysisJob {
        AnalysisJob {
            id: "a1".to_string(),
            track_id: "t1".to_string(),
            status,
            bpm,
            confidence: bpm.map(|_| 0.9),
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    fn assert_chain(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len(), "chain {:?}", actual);
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < EPS, "chain {:?} expected {:?}", actual, expected);
        }
    }

    #[test]
    fn test_chain_for_large_ratio() {
        let chain = stretch_chain(5.0).unwrap();
        assert_chain(&chain, &[2.0, 2.0, 1.25]);
        assert!((chain.iter().product::<f64>() - 5.0).abs() < EPS);
    }

    #[test]
    fn test_chain_for_small_ratio() {
        let chain = stretch_chain(0.2).unwrap();
        assert_chain(&chain, &[0.5, 0.5, 0.8]);
        assert!((chain.iter().product::<f64>() - 0.2).abs() < EPS);
    }

    #[test]
    fn test_chain_within_bounds_is_single_stage() {
        assert_chain(&stretch_chain(1.25).unwrap(), &[1.25]);
        assert_chain(&stretch_chain(2.0).unwrap(), &[2.0]);
        assert_chain(&stretch_chain(0.5).unwrap(), &[0.5]);
    }

    #[test]
    fn test_chain_factors_stay_bounded() {
        for ratio in [0.01, 0.13, 0.49, 0.51, 1.0, 1.99, 2.01, 3.7, 6.5, 40.0] {
            let chain = stretch_chain(ratio).unwrap();
            assert!(chain
                .iter()
                .all(|f| (MIN_STAGE_FACTOR..=MAX_STAGE_FACTOR).contains(f)));
            let product: f64 = chain.iter().product();
            assert!((product - ratio).abs() < 1e-9 * ratio.max(1.0), "ratio {}", ratio);
        }
    }

    #[test]
    fn test_invalid_ratios_rejected() {
        assert!(matches!(stretch_chain(0.0), Err(JobError::InvalidRatio(_))));
        assert!(matches!(stretch_chain(-1.5), Err(JobError::InvalidRatio(_))));
        assert!(matches!(stretch_chain(f64::NAN), Err(JobError::InvalidRatio(_))));
        assert!(matches!(tempo_ratio(-120.0, 120.0), Err(JobError::InvalidRatio(_))));
        assert!(matches!(tempo_ratio(120.0, 0.0), Err(JobError::InvalidRatio(_))));
    }

    #[test]
    fn test_tempo_ratio() {
        assert!((tempo_ratio(150.0, 120.0).unwrap() - 1.25).abs() < EPS);
    }

    #[test]
    fn test_atempo_filter_format() {
        assert_eq!(atempo_filter(&[1.25]), "atempo=1.250000");
        assert_eq!(
            atempo_filter(&[2.0, 2.0, 1.25]),
            "atempo=2.000000,atempo=2.000000,atempo=1.250000"
        );
    }

    #[test]
    fn test_detected_bpm_requires_done_analysis() {
        assert_eq!(detected_bpm(Some(&analysis(JobStatus::Done, Some(120.0)))).unwrap(), 120.0);

        assert!(matches!(detected_bpm(None), Err(JobError::NotFound(_))));
        assert!(matches!(
            detected_bpm(Some(&analysis(JobStatus::Running, None))),
            Err(JobError::AnalysisNotReady { .. })
        ));
        assert!(matches!(
            detected_bpm(Some(&analysis(JobStatus::Failed, None))),
            Err(JobError::AnalysisNotReady { .. })
        ));
        assert!(matches!(
            detected_bpm(Some(&analysis(JobStatus::Done, Some(0.0)))),
            Err(JobError::AnalysisNotReady { .. })
        ));
    }
}
