//! Environment-driven configuration for SpaceSaver: CLI flags (via
//! `clap`, `env` fallback) and `.env` loading (via `dotenvy`), composed
//! into an immutable, already-validated [`Config`].
//!
//! Grounded in the teacher's `ferrex-config`/`ferrex-server::infra::config`
//! loader: parse environment, fall back to `.env`, then run guard-rail
//! validation before anything downstream ever sees the values.

pub mod args;
pub mod error;
pub mod validate;

pub use args::Args;
pub use error::ConfigLoadError;

use spacesaver_core::Category;
use std::path::PathBuf;
use std::time::Duration;

/// One configured media root and the category every file beneath it is
/// assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRootConfig {
    pub path: PathBuf,
    pub category: Category,
}

/// The fully composed, validated configuration a running instance uses.
/// Every field here has already passed the guard rails in
/// [`crate::validate`]; nothing downstream re-checks these invariants.
#[derive(Debug, Clone)]
pub struct Config {
    pub tv_crf: u8,
    pub movie_crf: u8,
    pub tv_res_cap: u32,
    pub movie_res_cap: u32,
    pub bitrate_floor_tv: i64,
    pub bitrate_floor_movie: i64,
    pub rescan_interval: Duration,
    pub media_roots: Vec<MediaRootConfig>,
    pub workdir: PathBuf,
    pub salvage_duration_tolerance_s: f64,
    pub bind_addr: String,
    /// Grace period between `SIGTERM` and `SIGKILL` for an in-flight
    /// encoder subprocess (§5).
    pub encoder_grace_period: Duration,
    /// `ffmpeg`/`ffprobe` both target this codec name; an input already
    /// in this codec is classified `SKIP` (§4.1).
    pub target_codec: &'static str,
}

const DEFAULT_TV_CRF: u8 = 28;
const DEFAULT_MOVIE_CRF: u8 = 20;
const DEFAULT_TV_RES_CAP: u32 = 1080;
const DEFAULT_MOVIE_RES_CAP: u32 = 2160;
const DEFAULT_BITRATE_FLOOR_TV: i64 = 1_500_000;
const DEFAULT_BITRATE_FLOOR_MOVIE: i64 = 3_000_000;
const DEFAULT_RESCAN_INTERVAL_S: u64 = 600;
const DEFAULT_SALVAGE_TOLERANCE_S: f64 = 1.0;
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_ENCODER_GRACE_PERIOD: Duration = Duration::from_secs(10);

impl Config {
    /// Loads a `.env` file (if present; an explicit path that is missing
    /// is an error, an implicit default that is missing is not), then
    /// composes and validates a [`Config`] from `args`.
    pub fn load(args: Args) -> Result<Self, ConfigLoadError> {
        Self::load_dotenv(&args)?;
        Self::from_args(args)
    }

    fn load_dotenv(args: &Args) -> Result<(), ConfigLoadError> {
        let result = match &args.env_file {
            Some(path) => dotenvy::from_path(path).map_err(|source| {
                ConfigLoadError::DotenvIo {
                    path: path.clone(),
                    source,
                }
            }),
            None => dotenvy::dotenv().map(|_| PathBuf::new()).or_else(|err| {
                match err {
                    dotenvy::Error::Io(_) => Ok(PathBuf::new()),
                    other => Err(ConfigLoadError::DotenvIo {
                        path: PathBuf::from(".env"),
                        source: other,
                    }),
                }
            }),
        };
        result.map(|_| ())
    }

    fn from_args(args: Args) -> Result<Self, ConfigLoadError> {
        let tv_crf = args.tv_crf.unwrap_or(DEFAULT_TV_CRF);
        validate::validate_crf("TV_CRF", tv_crf)?;

        let movie_crf = args.movie_crf.unwrap_or(DEFAULT_MOVIE_CRF);
        validate::validate_crf("MOVIE_CRF", movie_crf)?;

        let tv_res_cap = args.tv_res_cap.unwrap_or(DEFAULT_TV_RES_CAP);
        validate::validate_res_cap("TV_RES_CAP", tv_res_cap)?;

        let movie_res_cap = args.movie_res_cap.unwrap_or(DEFAULT_MOVIE_RES_CAP);
        validate::validate_res_cap("MOVIE_RES_CAP", movie_res_cap)?;

        let bitrate_floor_tv = args.bitrate_floor_tv.unwrap_or(DEFAULT_BITRATE_FLOOR_TV);
        validate::validate_bitrate_floor("BITRATE_FLOOR_TV", bitrate_floor_tv)?;

        let bitrate_floor_movie = args
            .bitrate_floor_movie
            .unwrap_or(DEFAULT_BITRATE_FLOOR_MOVIE);
        validate::validate_bitrate_floor("BITRATE_FLOOR_MOVIE", bitrate_floor_movie)?;

        let rescan_interval_s = args.rescan_interval.unwrap_or(DEFAULT_RESCAN_INTERVAL_S);
        validate::validate_rescan_interval(rescan_interval_s)?;

        let media_dirs = args.media_dirs.ok_or(ConfigLoadError::MissingVar {
            var: "MEDIA_DIRS",
        })?;
        let media_roots = validate::parse_media_dirs(&media_dirs)?;
        validate::validate_disjoint_roots(&media_roots)?;

        let encoder_grace_period = match args.encoder_grace_period {
            Some(raw) => humantime::parse_duration(&raw).map_err(|_| {
                ConfigLoadError::InvalidValue {
                    var: "ENCODER_GRACE_PERIOD",
                    value: raw.clone(),
                    expected: "a duration like '10s' or '1m'",
                }
            })?,
            None => DEFAULT_ENCODER_GRACE_PERIOD,
        };

        let workdir = args.workdir.ok_or(ConfigLoadError::MissingVar { var: "WORKDIR" })?;
        for root in &media_roots {
            if workdir.starts_with(&root.path) || root.path.starts_with(&workdir) {
                return Err(ConfigLoadError::OverlappingMediaRoots {
                    a: workdir.clone(),
                    b: root.path.clone(),
                });
            }
        }

        Ok(Config {
            tv_crf,
            movie_crf,
            tv_res_cap,
            movie_res_cap,
            bitrate_floor_tv,
            bitrate_floor_movie,
            rescan_interval: Duration::from_secs(rescan_interval_s),
            media_roots,
            workdir,
            salvage_duration_tolerance_s: args
                .salvage_duration_tolerance_s
                .unwrap_or(DEFAULT_SALVAGE_TOLERANCE_S),
            bind_addr: args.bind_addr.unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            encoder_grace_period,
            target_codec: "hevc",
        })
    }
}
