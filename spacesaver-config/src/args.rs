use clap::Parser;
use std::path::PathBuf;

/// CLI flags, each mirrored by an environment variable of the same
/// effective meaning (§6). A flag always wins over its environment
/// variable, and an explicit environment variable always wins over the
/// built-in default. Grounded in the teacher's `ferrex-server::main::Args`.
#[derive(Parser, Debug)]
#[command(name = "spacesaver")]
#[command(about = "Background service that progressively re-encodes a media library to HEVC/MKV")]
pub struct Args {
    /// CRF passed to the encoder for files under a `tv` root.
    #[arg(long, env = "TV_CRF")]
    pub tv_crf: Option<u8>,

    /// CRF passed to the encoder for files under a `movie` root.
    #[arg(long, env = "MOVIE_CRF")]
    pub movie_crf: Option<u8>,

    /// Maximum output resolution (long side, pixels) for `tv` entries.
    #[arg(long, env = "TV_RES_CAP")]
    pub tv_res_cap: Option<u32>,

    /// Maximum output resolution (long side, pixels) for `movie` entries.
    #[arg(long, env = "MOVIE_RES_CAP")]
    pub movie_res_cap: Option<u32>,

    /// Minimum bitrate (bits/sec) below which a `tv` file is classified SKIP.
    #[arg(long, env = "BITRATE_FLOOR_TV")]
    pub bitrate_floor_tv: Option<i64>,

    /// Minimum bitrate (bits/sec) below which a `movie` file is classified SKIP.
    #[arg(long, env = "BITRATE_FLOOR_MOVIE")]
    pub bitrate_floor_movie: Option<i64>,

    /// Seconds between scanner passes.
    #[arg(long, env = "RESCAN_INTERVAL")]
    pub rescan_interval: Option<u64>,

    /// Colon-separated `<path>=<category>` entries, e.g.
    /// `/mnt/media/tv=tv:/mnt/media/movies=movie`.
    #[arg(long, env = "MEDIA_DIRS")]
    pub media_dirs: Option<String>,

    /// Scratch directory for in-flight encoder output and the catalog
    /// database file. Must not be inside any media root.
    #[arg(long, env = "WORKDIR")]
    pub workdir: Option<PathBuf>,

    /// Duration tolerance (seconds) accepted when salvaging an in-flight
    /// encode during recovery (§4.2 step 3).
    #[arg(long, env = "SALVAGE_DURATION_TOLERANCE_S")]
    pub salvage_duration_tolerance_s: Option<f64>,

    /// Address the HTTP surface (§6) binds to.
    #[arg(long, env = "BIND_ADDR")]
    pub bind_addr: Option<String>,

    /// Grace period between `SIGTERM` and `SIGKILL` when stopping an
    /// in-flight encoder subprocess, e.g. `10s` (§5). Parsed with
    /// `humantime`.
    #[arg(long, env = "ENCODER_GRACE_PERIOD")]
    pub encoder_grace_period: Option<String>,

    /// Path to a `.env` file to load before parsing the above, mirroring
    /// the teacher's `dotenvy` bootstrap in `ferrex-server::main`.
    #[arg(long, env = "ENV_FILE")]
    pub env_file: Option<PathBuf>,
}
