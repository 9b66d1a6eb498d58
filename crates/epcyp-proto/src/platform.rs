use std::path::PathBuf;

const APP_DIR: &str = "epcyp";

pub fn data_dir() -> PathBuf {
    // On macOS and Linux, use ~/.local/share/epcyp/ (XDG standard)
    // instead of macOS Application Support for consistency
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join(APP_DIR)
    }
    #[cfg(windows)]
    {
        // Portable install: data/ next to the executable wins
        if let Some(dir) = portable_dir("data") {
            return dir;
        }

        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                if exe_dir.join("config.toml").exists() {
                    return exe_dir.to_path_buf();
                }
            }
        }
    }

    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join(APP_DIR)
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

#[cfg(windows)]
fn portable_dir(name: &str) -> Option<PathBuf> {
    let exe_path = std::env::current_exe().ok()?;
    let dir = exe_path.parent()?.join(name);
    dir.exists().then_some(dir)
}

/// True when external apps must be launched through `open -a`.
pub fn launches_via_open() -> bool {
    cfg!(target_os = "macos")
}
