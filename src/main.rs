mod error;
mod mdoc;
mod metadata;
mod read;
mod scrape;
mod split;
mod write;

use std::{
    error::Error,
    fs,
    path::{Path, PathBuf},
};

use clap::Parser;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use log::{error, info, warn};

use crate::error::SplitError;

const DEFAULT_OUTPUT_SUBDIR: &str = "tiltstack-split";

/// Split tilt series stacks into one file per tilt, numbered in acquisition order.
#[derive(Parser, Debug)]
struct Args {
    /// Directory containing the stacks (.mrc), parameter files (.txt) and angle lists (.rawtlt)
    #[arg(short, long, default_value = ".")]
    input_dir: PathBuf,

    /// Base name of the input files; defaults to the name of the input directory
    #[arg(short, long)]
    basename: Option<String>,

    /// Output directory; defaults to a "tiltstack-split" subdirectory of the input directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Dose per image (electrons per square angstrom)
    #[arg(short, long)]
    dose_per_image: Option<f64>,

    /// Base name of the output files; defaults to the input base name
    #[arg(short, long)]
    target_basename: Option<String>,
}

#[derive(Debug, PartialEq)]
struct RunConfig {
    input_dir: PathBuf,
    basename: String,
    output_dir: PathBuf,
    dose_per_image: f64,
    target_basename: String,
}

fn dir_name(dir: &Path) -> Option<String> {
    let dir = std::path::absolute(dir).ok()?;
    let dir = fs::canonicalize(&dir).unwrap_or(dir);
    Some(dir.file_name()?.to_str()?.to_owned())
}

impl RunConfig {
    /// Checks everything that can be checked before any series is touched.
    fn from_args(args: Args) -> Result<Self, SplitError> {
        if !args.input_dir.is_dir() {
            return Err(SplitError::Configuration(format!(
                "{} is not a directory",
                args.input_dir.display()
            )));
        }

        let dose_per_image = match args.dose_per_image {
            None => {
                return Err(SplitError::Configuration(
                    "a dose per image is required (--dose-per-image)".to_owned(),
                ));
            }
            Some(dose) if !dose.is_finite() || dose < 0.0 => {
                return Err(SplitError::Configuration(format!(
                    "invalid dose per image: {dose}"
                )));
            }
            Some(dose) => dose,
        };

        let basename = match args.basename {
            Some(basename) => basename,
            None => dir_name(&args.input_dir).ok_or_else(|| {
                SplitError::Configuration(format!(
                    "cannot derive a base name from {}, use --basename",
                    args.input_dir.display()
                ))
            })?,
        };

        let output_dir = args
            .output_dir
            .unwrap_or_else(|| args.input_dir.join(DEFAULT_OUTPUT_SUBDIR));
        let target_basename = args.target_basename.unwrap_or_else(|| basename.clone());

        Ok(Self {
            input_dir: args.input_dir,
            basename,
            output_dir,
            dose_per_image,
            target_basename,
        })
    }
}

fn run(config: &RunConfig, multi_progress: &MultiProgress) -> Result<(), SplitError> {
    fs::create_dir_all(&config.output_dir)?;

    let series = scrape::scrape_dir(&config.input_dir, &config.basename)?;
    if series.is_empty() {
        warn!(
            "no tilt series named {:?} found in {}",
            config.basename,
            config.input_dir.display()
        );
    }

    for files in &series {
        let series_basename = format!("{}_TS_{:03}", config.target_basename, files.index);
        info!("splitting {} into {series_basename}", files.stack.display());
        split::split_series(files, &series_basename, &config.output_dir, multi_progress)?;
    }

    info!("writing mdoc files");
    mdoc::synthesize(&config.output_dir, config.dose_per_image)?;

    info!(
        "done, output is in {}",
        std::path::absolute(&config.output_dir)?.display()
    );
    Ok(())
}

fn main() -> Result<(), Box<dyn Error + Sync + Send>> {
    let env = env_logger::Env::default().filter_or("RUST_LOG", "info");
    let logger = env_logger::Builder::from_env(env).build();
    let level = logger.filter();
    let multi_progress = MultiProgress::new();
    LogWrapper::new(multi_progress.clone(), logger).try_init()?;
    log::set_max_level(level);

    let args = Args::parse();

    let res = RunConfig::from_args(args).and_then(|config| run(&config, &multi_progress));
    if let Err(e) = &res {
        error!("{e}");
    }
    res?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli() {
        Args::command().debug_assert();
    }

    fn args(input_dir: &Path) -> Args {
        Args {
            input_dir: input_dir.to_owned(),
            basename: Some("grid1".to_owned()),
            output_dir: None,
            dose_per_image: Some(3.0),
            target_basename: None,
        }
    }

    #[test]
    fn test_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig::from_args(args(dir.path())).unwrap();
        assert_eq!(
            config,
            RunConfig {
                input_dir: dir.path().to_owned(),
                basename: "grid1".to_owned(),
                output_dir: dir.path().join(DEFAULT_OUTPUT_SUBDIR),
                dose_per_image: 3.0,
                target_basename: "grid1".to_owned(),
            }
        );
    }

    #[test]
    fn test_config_basename_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("session7");
        fs::create_dir(&input).unwrap();

        let config = RunConfig::from_args(Args {
            basename: None,
            target_basename: Some("out".to_owned()),
            ..args(&input)
        })
        .unwrap();
        assert_eq!(config.basename, "session7");
        assert_eq!(config.target_basename, "out");
    }

    #[test]
    fn test_config_requires_dose() {
        let dir = tempfile::tempdir().unwrap();
        for dose in [None, Some(-1.0), Some(f64::NAN)] {
            let res = RunConfig::from_args(Args {
                dose_per_image: dose,
                ..args(dir.path())
            });
            assert!(matches!(res, Err(SplitError::Configuration(_))));
        }
    }

    #[test]
    fn test_config_requires_input_dir() {
        let dir = tempfile::tempdir().unwrap();
        let res = RunConfig::from_args(args(&dir.path().join("missing")));
        assert!(matches!(res, Err(SplitError::Configuration(_))));
    }

    #[test]
    fn test_run_end_to_end() {
        let input = tempfile::tempdir().unwrap();
        for (suffix, angles) in [("", "0.0\n-3.0\n3.0\n"), ("_2", "1.0\n-2.0\n4.0\n")] {
            let stack = read::InMemoryStack::numbered(2, 2, 3);
            write::write_mrc(
                &input.path().join(format!("grid1{suffix}.mrc")),
                &stack.data,
                &stack.layout,
            )
            .unwrap();
            let start = angles.lines().next().unwrap();
            fs::write(
                input.path().join(format!("grid1{suffix}.txt")),
                format!("Start tilt angle: {start}\n"),
            )
            .unwrap();
            fs::write(input.path().join(format!("grid1{suffix}.rawtlt")), angles).unwrap();
        }

        let config = RunConfig::from_args(Args {
            target_basename: Some("ts".to_owned()),
            ..args(input.path())
        })
        .unwrap();
        let multi = MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden());
        run(&config, &multi).unwrap();

        let mut names: Vec<String> = fs::read_dir(&config.output_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "ts_TS_000.mdoc",
                "ts_TS_000_000[3.0]_fractions.mrc",
                "ts_TS_000_001[0.0]_fractions.mrc",
                "ts_TS_000_002[-3.0]_fractions.mrc",
                "ts_TS_001.mdoc",
                "ts_TS_001_000[4.0]_fractions.mrc",
                "ts_TS_001_001[1.0]_fractions.mrc",
                "ts_TS_001_002[-2.0]_fractions.mrc",
            ]
        );
    }
}
