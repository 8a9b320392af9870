//! Path utilities.
//!
//! Platform directories used by mcpdock for configuration and state.

use std::path::PathBuf;

/// Application directory name used under the platform roots.
pub const APP_DIR: &str = "mcpdock";

/// Get the mcpdock configuration directory.
///
/// This follows XDG conventions on Linux/macOS:
/// - `$XDG_CONFIG_HOME/mcpdock` if set
/// - `~/.config/mcpdock` otherwise
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_DIR))
}

/// Get the mcpdock data directory.
///
/// Server records and OAuth credentials live here.
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|p| p.join(APP_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir() {
        let dir = config_dir();
        assert!(dir.is_some());
        assert!(dir.unwrap().ends_with("mcpdock"));
    }

    #[test]
    fn test_data_dir_is_app_scoped() {
        if let Some(dir) = data_dir() {
            assert!(dir.ends_with(APP_DIR));
        }
    }

}
