use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, warn};
use regex::Regex;

use crate::error::SplitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Stack,
    Parameters,
    TiltAngles,
}

impl FileKind {
    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "mrc" => Some(Self::Stack),
            "txt" => Some(Self::Parameters),
            "rawtlt" => Some(Self::TiltAngles),
            _ => None,
        }
    }
}

/// The input files belonging to one tilt series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesFiles {
    pub index: usize,
    pub stack: PathBuf,
    pub parameters: PathBuf,
    pub angles: PathBuf,
}

/// Input files of a directory, by kind, each list sorted by path.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DirListing {
    pub stacks: Vec<PathBuf>,
    pub parameters: Vec<PathBuf>,
    pub angles: Vec<PathBuf>,
}

impl DirListing {
    /// Pairs the n-th stack with the n-th parameters and n-th angle file.
    pub fn into_series(self) -> Vec<SeriesFiles> {
        let counts = [self.stacks.len(), self.parameters.len(), self.angles.len()];
        if counts.iter().any(|&c| c != counts[0]) {
            warn!(
                "found {} stacks, {} parameter files and {} angle files, ignoring the surplus",
                counts[0], counts[1], counts[2]
            );
        }

        self.stacks
            .into_iter()
            .zip(self.parameters)
            .zip(self.angles)
            .enumerate()
            .map(|(index, ((stack, parameters), angles))| SeriesFiles {
                index,
                stack,
                parameters,
                angles,
            })
            .collect()
    }
}

fn name_pattern(basename: &str) -> Result<Regex, SplitError> {
    Regex::new(&format!(
        r"^{}(?:_\d)?\.(mrc|txt|rawtlt)$",
        regex::escape(basename)
    ))
    .map_err(|e| SplitError::Configuration(format!("invalid basename {basename:?}: {e}")))
}

/// Classifies a file name, `None` if it does not belong to `basename`.
pub fn classify(pattern: &Regex, file_name: &str) -> Option<FileKind> {
    let caps = pattern.captures(file_name)?;
    FileKind::from_extension(caps.get(1)?.as_str())
}

pub fn list_dir(dir: &Path, basename: &str) -> Result<DirListing, SplitError> {
    let pattern = name_pattern(basename)?;
    let mut listing = DirListing::default();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match classify(&pattern, name) {
            Some(FileKind::Stack) => listing.stacks.push(path),
            Some(FileKind::Parameters) => listing.parameters.push(path),
            Some(FileKind::TiltAngles) => listing.angles.push(path),
            None => debug!("skipping {}", path.display()),
        }
    }

    listing.stacks.sort();
    listing.parameters.sort();
    listing.angles.sort();
    Ok(listing)
}

/// Finds the (stack, parameters, angles) triples for `basename` in `dir`.
pub fn scrape_dir(dir: &Path, basename: &str) -> Result<Vec<SeriesFiles>, SplitError> {
    Ok(list_dir(dir, basename)?.into_series())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            fs::write(dir.join(name), b"").unwrap();
        }
    }

    #[test]
    fn test_classify() {
        let pattern = name_pattern("grid1").unwrap();
        assert_eq!(classify(&pattern, "grid1.mrc"), Some(FileKind::Stack));
        assert_eq!(classify(&pattern, "grid1_2.txt"), Some(FileKind::Parameters));
        assert_eq!(classify(&pattern, "grid1_3.rawtlt"), Some(FileKind::TiltAngles));
        assert_eq!(classify(&pattern, "grid1_12.mrc"), None);
        assert_eq!(classify(&pattern, "grid10.mrc"), None);
        assert_eq!(classify(&pattern, "xgrid1.mrc"), None);
        assert_eq!(classify(&pattern, "grid1.mrc.mdoc"), None);
        assert_eq!(classify(&pattern, "grid1.tif"), None);
    }

    #[test]
    fn test_basename_is_literal() {
        let pattern = name_pattern("a.b").unwrap();
        assert_eq!(classify(&pattern, "a.b.mrc"), Some(FileKind::Stack));
        assert_eq!(classify(&pattern, "axb.mrc"), None);
    }

    #[test]
    fn test_scrape_dir_zips_sorted_lists() {
        let dir = tempfile::tempdir().unwrap();
        touch(
            dir.path(),
            &[
                "grid1_2.mrc",
                "grid1.mrc",
                "grid1_2.txt",
                "grid1.txt",
                "grid1.rawtlt",
                "grid1_2.rawtlt",
                "other.mrc",
                "notes.md",
            ],
        );
        fs::create_dir(dir.path().join("grid1_3.mrc")).unwrap();

        let series = scrape_dir(dir.path(), "grid1").unwrap();
        assert_eq!(
            series,
            vec![
                SeriesFiles {
                    index: 0,
                    stack: dir.path().join("grid1.mrc"),
                    parameters: dir.path().join("grid1.txt"),
                    angles: dir.path().join("grid1.rawtlt"),
                },
                SeriesFiles {
                    index: 1,
                    stack: dir.path().join("grid1_2.mrc"),
                    parameters: dir.path().join("grid1_2.txt"),
                    angles: dir.path().join("grid1_2.rawtlt"),
                },
            ]
        );
    }

    #[test]
    fn test_scrape_dir_drops_surplus() {
        let dir = tempfile::tempdir().unwrap();
        touch(
            dir.path(),
            &["g.mrc", "g_1.mrc", "g.txt", "g_1.txt", "g.rawtlt"],
        );

        let series = scrape_dir(dir.path(), "g").unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].stack, dir.path().join("g.mrc"));
    }

    #[test]
    fn test_scrape_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            scrape_dir(&dir.path().join("nope"), "g"),
            Err(SplitError::Io(_))
        ));
    }
}
