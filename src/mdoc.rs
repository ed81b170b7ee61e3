use std::{
    collections::BTreeMap,
    fmt::Write as _,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use log::{info, warn};
use regex::Regex;

use crate::error::SplitError;

static FRAME_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<series>.+)_(?P<order>\d{3,})\[(?P<angle>[+-]?\d+\.\d)\]_fractions\.mrc$")
        .unwrap_or_else(|e| panic!("invalid frame name pattern: {e}"))
});

/// Seconds between the synthetic timestamps of consecutive frames.
const FRAME_INTERVAL_SECS: usize = 60;

/// One split frame, recovered from its file name.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameEntry {
    pub series: String,
    pub order_idx: usize,
    pub angle: f64,
    pub file_name: String,
}

pub fn parse_frame_name(file_name: &str) -> Option<FrameEntry> {
    let caps = FRAME_NAME.captures(file_name)?;
    Some(FrameEntry {
        series: caps["series"].to_owned(),
        order_idx: caps["order"].parse().ok()?,
        angle: caps["angle"].parse().ok()?,
        file_name: file_name.to_owned(),
    })
}

/// All split frames in `dir`, grouped by series and sorted by order index.
pub fn collect_frames(dir: &Path) -> Result<BTreeMap<String, Vec<FrameEntry>>, SplitError> {
    let mut series: BTreeMap<String, Vec<FrameEntry>> = BTreeMap::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(frame) = name.to_str().and_then(parse_frame_name) else {
            continue;
        };
        series.entry(frame.series.clone()).or_default().push(frame);
    }
    for frames in series.values_mut() {
        frames.sort_by_key(|f| f.order_idx);
    }
    Ok(series)
}

/// `DD-Mon-YY  HH:MM:SS`, counting from the first of January.
fn timestamp(secs: usize) -> String {
    let day = 1 + secs / 86_400;
    let hours = secs / 3600 % 24;
    let minutes = secs / 60 % 60;
    let seconds = secs % 60;
    format!("{day:02}-Jan-00  {hours:02}:{minutes:02}:{seconds:02}")
}

pub fn render_mdoc(series: &str, frames: &[FrameEntry], dose_per_image: f64) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "ImageFile = {series}.mrc");
    let _ = writeln!(out);
    let _ = writeln!(out, "[T = Tilt series {series}, one frame file per tilt]");
    for (z, frame) in frames.iter().enumerate() {
        let _ = writeln!(out);
        let _ = writeln!(out, "[ZValue = {z}]");
        let _ = writeln!(out, "TiltAngle = {:.1}", frame.angle);
        let _ = writeln!(out, "ExposureDose = {dose_per_image}");
        let _ = writeln!(out, "SubFramePath = {}", frame.file_name);
        let _ = writeln!(
            out,
            "DateTime = {}",
            timestamp(frame.order_idx * FRAME_INTERVAL_SECS)
        );
    }
    out
}

/// Writes one `{series}.mdoc` per tilt series found in `target_dir`.
pub fn synthesize(target_dir: &Path, dose_per_image: f64) -> Result<Vec<PathBuf>, SplitError> {
    let series = collect_frames(target_dir)?;
    if series.is_empty() {
        warn!("no split frames found in {}", target_dir.display());
    }

    let mut written = Vec::with_capacity(series.len());
    for (name, frames) in &series {
        let path = target_dir.join(format!("{name}.mdoc"));
        let mut file = File::create_new(&path)?;
        file.write_all(render_mdoc(name, frames, dose_per_image).as_bytes())?;
        info!("wrote {} ({} frames)", path.display(), frames.len());
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_name() {
        assert_eq!(
            parse_frame_name("grid1_TS_000_004[-10.0]_fractions.mrc"),
            Some(FrameEntry {
                series: "grid1_TS_000".to_owned(),
                order_idx: 4,
                angle: -10.0,
                file_name: "grid1_TS_000_004[-10.0]_fractions.mrc".to_owned(),
            })
        );
        assert_eq!(
            parse_frame_name("g_TS_001_1000[3.5]_fractions.mrc").map(|f| f.order_idx),
            Some(1000)
        );
        assert_eq!(parse_frame_name("grid1_TS_000.mdoc"), None);
        assert_eq!(parse_frame_name("grid1_TS_000_04[1.0]_fractions.mrc"), None);
        assert_eq!(parse_frame_name("grid1_TS_000_004[1.0]_fractions.tif"), None);
    }

    #[test]
    fn test_timestamp() {
        assert_eq!(timestamp(0), "01-Jan-00  00:00:00");
        assert_eq!(timestamp(3 * 60), "01-Jan-00  00:03:00");
        assert_eq!(timestamp(90_061), "02-Jan-00  01:01:01");
    }

    #[test]
    fn test_render_mdoc() {
        let frames = [
            parse_frame_name("ts_000[20.0]_fractions.mrc").unwrap(),
            parse_frame_name("ts_001[0.0]_fractions.mrc").unwrap(),
        ];
        let mdoc = render_mdoc("ts", &frames, 3.5);
        let expected = "\
ImageFile = ts.mrc

[T = Tilt series ts, one frame file per tilt]

[ZValue = 0]
TiltAngle = 20.0
ExposureDose = 3.5
SubFramePath = ts_000[20.0]_fractions.mrc
DateTime = 01-Jan-00  00:00:00

[ZValue = 1]
TiltAngle = 0.0
ExposureDose = 3.5
SubFramePath = ts_001[0.0]_fractions.mrc
DateTime = 01-Jan-00  00:01:00
";
        assert_eq!(mdoc, expected);
    }

    #[test]
    fn test_synthesize_groups_series() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "a_TS_000_001[0.0]_fractions.mrc",
            "a_TS_000_000[3.0]_fractions.mrc",
            "a_TS_000_002[-3.0]_fractions.mrc",
            "a_TS_001_000[6.0]_fractions.mrc",
            "unrelated.txt",
        ] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let written = synthesize(dir.path(), 2.0).unwrap();
        assert_eq!(
            written,
            vec![
                dir.path().join("a_TS_000.mdoc"),
                dir.path().join("a_TS_001.mdoc")
            ]
        );

        let first = fs::read_to_string(&written[0]).unwrap();
        let angles: Vec<&str> = first
            .lines()
            .filter_map(|l| l.strip_prefix("TiltAngle = "))
            .collect();
        assert_eq!(angles, vec!["3.0", "0.0", "-3.0"]);
        assert_eq!(first.matches("ExposureDose = 2\n").count(), 3);
    }

    #[test]
    fn test_synthesize_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(synthesize(dir.path(), 1.0).unwrap().is_empty());
    }
}
