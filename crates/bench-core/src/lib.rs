pub mod config;
pub mod error;
pub mod layout;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use layout::{DirInfo, DirectoryLayout, EnvironmentMode, ModePaths};

use std::fs;
use std::path::Path;

pub const CONTAINER_EXPERIMENT_DIR: &str = "/experiment";
pub const DISCARD_LOG_PATH: &str = "/dev/null";
pub const DEFAULT_IMAGE_TAG: &str = "latest";
pub const DEFAULT_IMAGE_PREFIX: &str = "cerberus";
pub const OUTPUT_LOG_SUFFIX: &str = "-output.log";
pub const LOG_TIMESTAMP_FORMAT: &str = "%a %d %b %Y %H:%M:%S %p";

/// Exit status reported for a SIGKILL-terminated process (128 + 9).
pub const EXIT_CODE_KILLED: i32 = 137;

pub const DIR_KEY_EXPERIMENT: &str = "experiment";
pub const DIR_KEY_LOGS: &str = "logs";
pub const DIR_KEY_INSTRUMENTATION: &str = "instrumentation";
pub const DIR_KEY_SETUP: &str = "setup";
pub const DIR_KEY_ARTIFACTS: &str = "artifacts";

pub fn ensure_dir(path: &Path) -> EngineResult<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

/// Decodes bytes as ISO-8859-1: every byte becomes exactly one char, so
/// arbitrary tool output never fails to decode.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Formats a driver message the way every collaborator prints it:
/// `[abstraction][concrete] message`.
pub fn driver_message(abstraction: &str, concrete: &str, message: &str) -> String {
    format!("[{}][{}] {}", abstraction, concrete, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin1_decoding_accepts_invalid_utf8() {
        let decoded = decode_latin1(&[b'h', b'i', 0xff, 0xe9]);
        assert_eq!(decoded.chars().count(), 4);
        assert!(decoded.starts_with("hi"));
        assert_eq!(decoded.chars().nth(2), Some('\u{ff}'));
    }

    #[test]
    fn driver_message_brackets_both_names() {
        assert_eq!(
            driver_message("container", "docker", "pulled image"),
            "[container][docker] pulled image"
        );
    }
}
