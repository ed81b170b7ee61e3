use std::{
    fs,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use log::debug;
use regex::Regex;

use crate::error::SplitError;

/// Rounds a tilt angle to one decimal place of degrees.
///
/// Both sides of the pivot lookup go through this function, so a start angle of
/// `3.45` in the parameters file must appear as `3.5` in the angle list. Rounding
/// goes through the decimal representation, ties resolving to the even digit of
/// the exact binary value.
pub fn round_angle(angle: f64) -> f64 {
    format!("{angle:.1}").parse().unwrap_or(angle)
}

/// The labeled values the acquisition software writes into its parameters file.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionParameters {
    pub start_angle: f64,
    pub min_angle: Option<f64>,
    pub max_angle: Option<f64>,
    pub low_tilt_step: Option<f64>,
    pub high_tilt_step: Option<f64>,
}

fn field_pattern(label: &str) -> Regex {
    Regex::new(&format!(r"{}.*?([+-]?\d+\.\d+)", regex::escape(label)))
        .unwrap_or_else(|e| panic!("invalid pattern for {label:?}: {e}"))
}

static START_ANGLE: LazyLock<Regex> = LazyLock::new(|| field_pattern("Start tilt angle"));
static MIN_ANGLE: LazyLock<Regex> = LazyLock::new(|| field_pattern("Max negative tilt"));
static MAX_ANGLE: LazyLock<Regex> = LazyLock::new(|| field_pattern("Max positive tilt"));
static LOW_TILT_STEP: LazyLock<Regex> = LazyLock::new(|| field_pattern("Low tilt step"));
static HIGH_TILT_STEP: LazyLock<Regex> = LazyLock::new(|| field_pattern("High tilt step"));

/// First number following `pattern`'s label, scanning line by line.
fn first_match(text: &str, pattern: &Regex) -> Option<f64> {
    text.lines()
        .filter_map(|line| pattern.captures(line))
        .find_map(|caps| caps.get(1)?.as_str().parse().ok())
}

pub fn parse_start_angle(text: &str) -> Option<f64> {
    first_match(text, &START_ANGLE)
}

pub fn parse_min_angle(text: &str) -> Option<f64> {
    first_match(text, &MIN_ANGLE)
}

pub fn parse_max_angle(text: &str) -> Option<f64> {
    first_match(text, &MAX_ANGLE)
}

pub fn parse_low_tilt_step(text: &str) -> Option<f64> {
    first_match(text, &LOW_TILT_STEP)
}

pub fn parse_high_tilt_step(text: &str) -> Option<f64> {
    first_match(text, &HIGH_TILT_STEP)
}

/// Reads a whole file, replacing bytes that are not valid UTF-8.
fn read_lossy(path: &Path) -> Result<String, SplitError> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Parses the contents of a parameters file. `path` is only used for error reporting.
pub fn parse_metadata_text(text: &str, path: &Path) -> Result<AcquisitionParameters, SplitError> {
    let start_angle = parse_start_angle(text).ok_or_else(|| SplitError::MissingField {
        path: path.to_owned(),
        field: "Start tilt angle",
    })?;

    Ok(AcquisitionParameters {
        start_angle,
        min_angle: parse_min_angle(text),
        max_angle: parse_max_angle(text),
        low_tilt_step: parse_low_tilt_step(text),
        high_tilt_step: parse_high_tilt_step(text),
    })
}

pub fn parse_metadata(params_path: &Path) -> Result<AcquisitionParameters, SplitError> {
    let text = read_lossy(params_path)?;
    let params = parse_metadata_text(&text, params_path)?;
    debug!("{}: {params:?}", params_path.display());
    Ok(params)
}

/// Tilt angles in acquisition order, each rounded with [`round_angle`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TiltAngleSequence {
    angles: Vec<f64>,
}

impl TiltAngleSequence {
    pub fn new(angles: impl IntoIterator<Item = f64>) -> Self {
        Self {
            angles: angles.into_iter().map(round_angle).collect(),
        }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.angles
    }

    pub fn len(&self) -> usize {
        self.angles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.angles.is_empty()
    }
}

pub fn parse_angles_text(text: &str, path: &Path) -> Result<TiltAngleSequence, SplitError> {
    let angles = text
        .lines()
        .enumerate()
        .map(|(idx, line)| {
            let trimmed = line.trim();
            trimmed.parse::<f64>().map_err(|_| SplitError::AngleParse {
                path: PathBuf::from(path),
                line: idx + 1,
                text: trimmed.to_owned(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TiltAngleSequence::new(angles))
}

pub fn parse_angles(tilt_path: &Path) -> Result<TiltAngleSequence, SplitError> {
    let text = read_lossy(tilt_path)?;
    parse_angles_text(&text, tilt_path)
}
