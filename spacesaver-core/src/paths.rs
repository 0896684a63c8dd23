//! Path arithmetic shared by the worker's verify-and-replace step and
//! Recovery's salvage path (§4.4 step 4): both need to decide where an
//! encoded `workdir/<id>.mkv` file ultimately belongs once it replaces a
//! source file whose extension may not already be the target container.

use std::path::{Path, PathBuf};

/// The container extension every encode output uses (`workdir/<id>.mkv`,
/// §6 persisted-state table).
pub const TARGET_CONTAINER_EXTENSION: &str = "mkv";

/// Where the encoded output should land: `source` itself if it is already
/// `.mkv` (case-insensitive), otherwise `source` with its extension
/// swapped to [`TARGET_CONTAINER_EXTENSION`]. When this differs from
/// `source`, the caller renames the workdir file here and then unlinks the
/// stale `source` as a separate durable step, per §4.4 step 4: "if the
/// replacement filename differs in extension, the original is unlinked as
/// a separate durable step after the new file is in place."
pub fn replacement_path(source: &Path) -> PathBuf {
    let already_target = source
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(TARGET_CONTAINER_EXTENSION))
        .unwrap_or(false);
    if already_target {
        source.to_path_buf()
    } else {
        source.with_extension(TARGET_CONTAINER_EXTENSION)
    }
}
