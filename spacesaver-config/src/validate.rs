//! Guard-rail checks applied to a composed [`crate::Config`], in the
//! style of the teacher's `ferrex-config::cli::validation` module: small,
//! independently testable functions returning a structured error rather
//! than panicking on a bad environment.

use crate::error::ConfigLoadError;
use crate::MediaRootConfig;
use std::path::Path;

/// CRF is meaningful in roughly 0-51 for the encoders this service
/// targets; reject anything outside that so a typo doesn't silently
/// produce a useless or enormous output file.
pub fn validate_crf(var: &'static str, value: u8) -> Result<(), ConfigLoadError> {
    if value > 51 {
        return Err(ConfigLoadError::OutOfRange {
            var,
            value: value.to_string(),
            constraint: "between 0 and 51",
        });
    }
    Ok(())
}

/// A resolution cap below 144p or above 8K is almost certainly a
/// misconfiguration rather than an intentional target.
pub fn validate_res_cap(var: &'static str, value: u32) -> Result<(), ConfigLoadError> {
    if !(144..=7680).contains(&value) {
        return Err(ConfigLoadError::OutOfRange {
            var,
            value: value.to_string(),
            constraint: "between 144 and 7680",
        });
    }
    Ok(())
}

pub fn validate_bitrate_floor(var: &'static str, value: i64) -> Result<(), ConfigLoadError> {
    if value < 0 {
        return Err(ConfigLoadError::OutOfRange {
            var,
            value: value.to_string(),
            constraint: "non-negative",
        });
    }
    Ok(())
}

pub fn validate_rescan_interval(value: u64) -> Result<(), ConfigLoadError> {
    if value == 0 {
        return Err(ConfigLoadError::OutOfRange {
            var: "RESCAN_INTERVAL",
            value: value.to_string(),
            constraint: "greater than 0",
        });
    }
    Ok(())
}

/// Parses `MEDIA_DIRS` into root/category pairs. Entries are
/// colon-separated; each entry is `<absolute-path>=<category>`. Resolves
/// the Open Question left by `spec.md` §3 ("category derived from path
/// prefix, configurable mapping") in favor of an explicit mapping in the
/// same variable, rather than a second variable or a naming convention.
pub fn parse_media_dirs(raw: &str) -> Result<Vec<MediaRootConfig>, ConfigLoadError> {
    let mut roots = Vec::new();
    for entry in raw.split(':').map(str::trim).filter(|e| !e.is_empty()) {
        let (path, category) = entry.split_once('=').ok_or_else(|| {
            ConfigLoadError::InvalidMediaRoot {
                path: entry.to_string(),
            }
        })?;
        if !Path::new(path).is_absolute() {
            return Err(ConfigLoadError::InvalidMediaRoot {
                path: entry.to_string(),
            });
        }
        let category = category.parse().map_err(|_| ConfigLoadError::UnknownCategory {
            category: category.to_string(),
        })?;
        roots.push(MediaRootConfig {
            path: path.into(),
            category,
        });
    }
    if roots.is_empty() {
        return Err(ConfigLoadError::NoMediaRoots);
    }
    Ok(roots)
}

/// Enforces that media roots are disjoint, per the Open Question in
/// `spec.md` §9: "the specification treats roots as disjoint and requires
/// configuration to ensure this."
pub fn validate_disjoint_roots(roots: &[MediaRootConfig]) -> Result<(), ConfigLoadError> {
    for (i, a) in roots.iter().enumerate() {
        for b in &roots[i + 1..] {
            if a.path.starts_with(&b.path) || b.path.starts_with(&a.path) {
                return Err(ConfigLoadError::OverlappingMediaRoots {
                    a: a.path.clone(),
                    b: b.path.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use spacesaver_core::Category;

    #[test]
    fn parses_valid_media_dirs() {
        let roots = parse_media_dirs("/mnt/media/tv=tv:/mnt/media/movies=movie").unwrap();
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].category, Category::Tv);
        assert_eq!(roots[1].category, Category::Movie);
    }

    #[test]
    fn rejects_relative_path() {
        assert!(parse_media_dirs("media/tv=tv").is_err());
    }

    #[test]
    fn rejects_unknown_category() {
        assert!(parse_media_dirs("/mnt/media=documentary").is_err());
    }

    #[test]
    fn rejects_empty() {
        assert!(parse_media_dirs("").is_err());
    }

    #[test]
    fn detects_overlap() {
        let roots = vec![
            MediaRootConfig {
                path: "/mnt/media".into(),
                category: Category::Tv,
            },
            MediaRootConfig {
                path: "/mnt/media/movies".into(),
                category: Category::Movie,
            },
        ];
        assert!(validate_disjoint_roots(&roots).is_err());
    }

    #[test]
    fn accepts_disjoint_roots() {
        let roots = vec![
            MediaRootConfig {
                path: "/mnt/media/tv".into(),
                category: Category::Tv,
            },
            MediaRootConfig {
                path: "/mnt/media/movies".into(),
                category: Category::Movie,
            },
        ];
        assert!(validate_disjoint_roots(&roots).is_ok());
    }

    #[test]
    fn rejects_crf_out_of_range() {
        assert!(validate_crf("TV_CRF", 60).is_ok() == false);
        assert!(validate_crf("TV_CRF", 23).is_ok());
    }
}
