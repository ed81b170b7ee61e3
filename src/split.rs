use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use indicatif::{MultiProgress, ProgressBar, ProgressIterator};
use log::{debug, info};

use crate::{
    error::SplitError,
    metadata::{TiltAngleSequence, parse_angles, parse_metadata, round_angle},
    read::{FrameSource, MrcStack},
    scrape::SeriesFiles,
    write::write_mrc_slice,
};

/// Index of the first angle equal to `start_angle`, both rounded to one decimal.
pub fn locate_pivot(angles: &[f64], start_angle: f64) -> Result<usize, SplitError> {
    let start_angle = round_angle(start_angle);
    angles
        .iter()
        .position(|&angle| round_angle(angle) == start_angle)
        .ok_or(SplitError::SequenceMismatch { start_angle })
}

/// `pivot + 1, ..., n - 1, 0, ..., pivot`: the frame after the start tilt comes
/// first, and the start tilt itself last.
pub fn compute_order(n: usize, pivot: usize) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    assert!(pivot < n, "pivot {pivot} out of range for {n} frames");
    (pivot + 1..n).chain(0..=pivot).collect()
}

pub fn output_file_name(basename: &str, order_idx: usize, angle: f64) -> String {
    format!("{basename}_{order_idx:03}[{angle:.1}]_fractions.mrc")
}

/// Prepares writing every frame of `stack` as its own file in `target_dir`.
///
/// Frame `z` is written in storage order, named by `order[z]` and `angles[z]`.
/// Nothing is written until the returned iterator is advanced; each item is the
/// absolute path of one file written. Checks on the frame count and the start
/// angle happen up front, so a failure here leaves `target_dir` untouched.
pub fn split<'a, S>(
    stack: &'a S,
    angles: &'a TiltAngleSequence,
    start_angle: f64,
    basename: &'a str,
    target_dir: &Path,
) -> Result<impl Iterator<Item = Result<PathBuf, SplitError>> + 'a, SplitError>
where
    S: FrameSource + 'a,
{
    let layout = stack.layout();
    let nz = stack.num_frames();
    if nz != angles.len() {
        return Err(SplitError::Bounds {
            frames: nz,
            angles: angles.len(),
        });
    }

    let order = if angles.is_empty() {
        Vec::new()
    } else {
        let pivot = locate_pivot(angles.as_slice(), start_angle)?;
        debug!("start angle {start_angle} at frame {pivot}");
        compute_order(angles.len(), pivot)
    };
    debug!("order: {order:?}");

    let target_dir = std::path::absolute(target_dir)?;

    Ok(order
        .into_iter()
        .zip(angles.as_slice().iter().copied())
        .enumerate()
        .map(move |(z, (order_idx, angle))| {
            let out_path = target_dir.join(output_file_name(basename, order_idx, angle));
            let slice = stack.get_slice(z)?;
            write_mrc_slice(&out_path, slice, &layout)?;
            Ok(out_path)
        }))
}

/// Parses the metadata of one tilt series and splits its stack into `target_dir`.
pub fn split_series(
    files: &SeriesFiles,
    series_basename: &str,
    target_dir: &Path,
    multi_progress: &MultiProgress,
) -> Result<Vec<PathBuf>, SplitError> {
    let t0 = Instant::now();

    let params = parse_metadata(&files.parameters)?;
    let angles = parse_angles(&files.angles)?;

    let stack = MrcStack::open(&files.stack)?;
    let layout = stack.layout();
    info!(
        "{}: dimensions: {}x{}x{}, {:?}",
        stack.path().display(),
        layout.nz,
        layout.ny,
        layout.nx,
        layout.mode
    );

    let frames = split(&stack, &angles, params.start_angle, series_basename, target_dir)?;

    let progress = multi_progress.add(ProgressBar::new(angles.len() as u64));
    let written: Result<Vec<PathBuf>, SplitError> = frames
        .progress_with(progress.clone())
        .map(|res| {
            let out_path = res?;
            info!("wrote {}", out_path.display());
            Ok(out_path)
        })
        .collect();
    progress.finish();
    multi_progress.remove(&progress);
    let written = written?;

    info!(
        "{series_basename}: split {} frames in {:?}",
        written.len(),
        t0.elapsed()
    );

    Ok(written)
}
