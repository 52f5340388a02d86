//! Cross-platform endpoint and configuration paths
//!
//! Unix/macOS: each task runtime process listens on its own Unix domain
//! socket under $XDG_RUNTIME_DIR/hwtask or /tmp/hwtask-<uid>
//! Windows: named pipes at \\.\pipe\hwtask-<username>-<task>-<pid>

use std::io;
use std::path::PathBuf;

/// Name used for socket directories, pipes and project directories
const APP_NAME: &str = "hwtask";

/// Get the directory holding inspection sockets
///
/// - Unix: `$XDG_RUNTIME_DIR/hwtask` or `/tmp/hwtask-<uid>`
#[cfg(unix)]
pub fn socket_dir() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_NAME);
    }

    // Fallback to /tmp with uid for security
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/{}-{}", APP_NAME, uid))
}

/// Keep only characters that are safe in a socket file or pipe name
pub(crate) fn safe_name(task: &str) -> String {
    task.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(48)
        .collect()
}

/// Get the inspection endpoint name for one runtime process
///
/// Returns a string suitable for use with interprocess crate's local socket API
#[cfg(unix)]
pub fn endpoint_name(task: &str, pid: u32) -> String {
    socket_dir()
        .join(format!("{}-{}.sock", safe_name(task), pid))
        .to_string_lossy()
        .into_owned()
}

#[cfg(windows)]
pub fn endpoint_name(task: &str, pid: u32) -> String {
    let username = std::env::var("USERNAME").unwrap_or_else(|_| "default".to_string());
    format!("{}-{}-{}-{}", APP_NAME, username, safe_name(task), pid)
}

/// Ensure the socket directory exists with proper permissions
///
/// On Unix, creates the directory with mode 0700 for security
#[cfg(unix)]
pub fn ensure_socket_dir() -> io::Result<PathBuf> {
    let dir = socket_dir();

    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
    }

    Ok(dir)
}

#[cfg(windows)]
pub fn ensure_socket_dir() -> io::Result<PathBuf> {
    // Named pipes don't need a directory on Windows
    Ok(PathBuf::new())
}

/// Remove an endpoint's socket file if it exists
#[cfg(unix)]
pub fn remove_endpoint(endpoint: &str) -> io::Result<()> {
    let path = PathBuf::from(endpoint);
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    Ok(())
}

#[cfg(windows)]
pub fn remove_endpoint(_endpoint: &str) -> io::Result<()> {
    // Named pipes are automatically cleaned up on Windows
    Ok(())
}

/// Get the configuration directory path
///
/// - Linux: `~/.config/hwtask/`
/// - macOS: `~/Library/Application Support/hwtask/`
/// - Windows: `%APPDATA%\hwtask\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
///
/// `HWTASK_CONFIG` takes precedence over the platform location.
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("HWTASK_CONFIG") {
        return Some(PathBuf::from(path));
    }
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("logs"))
}
