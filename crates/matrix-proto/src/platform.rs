use std::path::PathBuf;

pub const CONTROL_TCP_PORT: u16 = 9877;

/// IPC endpoint name for one player session.  Every session gets its own
/// player process, so the name carries the session id.
#[cfg(unix)]
pub fn mpv_socket_name(session: u64) -> String {
    format!(
        "{}/rtspmatrix-mpv-{}-{}.sock",
        std::env::temp_dir().display(),
        std::process::id(),
        session
    )
}

#[cfg(windows)]
pub fn mpv_socket_name(session: u64) -> String {
    format!("rtspmatrix-mpv-{}-{}", std::process::id(), session)
}

#[cfg(unix)]
pub fn mpv_socket_arg(session: u64) -> String {
    format!("--input-ipc-server={}", mpv_socket_name(session))
}

#[cfg(windows)]
pub fn mpv_socket_arg(session: u64) -> String {
    format!("--input-ipc-server=\\\\.\\pipe\\{}", mpv_socket_name(session))
}

pub fn data_dir() -> PathBuf {
    // XDG layout on macOS too, for consistency with Linux.
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("rtspmatrix")
    }
    #[cfg(windows)]
    {
        if let Some(dir) = portable_dir("data") {
            return dir;
        }
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rtspmatrix")
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
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rtspmatrix")
    }

    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("rtspmatrix")
    }
}

#[cfg(windows)]
fn portable_dir(name: &str) -> Option<PathBuf> {
    let exe_path = std::env::current_exe().ok()?;
    let dir = exe_path.parent()?.join(name);
    dir.exists().then_some(dir)
}

#[cfg(unix)]
fn mpv_binary_names() -> &'static [&'static str] {
    &["mpv"]
}

#[cfg(windows)]
fn mpv_binary_names() -> &'static [&'static str] {
    &["mpv.exe", "mpv.com"]
}

fn find_beside_exe(names: &[&str]) -> Option<PathBuf> {
    let current_exe = std::env::current_exe().ok()?;
    let dir = current_exe.parent()?;
    for name in names {
        let p = dir.join(name);
        if p.exists() {
            return Some(p);
        }
        let p = dir.join("external").join(name);
        if p.exists() {
            return Some(p);
        }
    }
    None
}

fn find_on_path(names: &[&str]) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        for name in names {
            let p = dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }
    None
}

/// Find the mpv binary.
///
/// Searches in order:
/// 1. MPV_PATH environment variable
/// 2. Beside the current executable (or its `external/` folder)
/// 3. PATH
pub fn find_mpv_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("MPV_PATH") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    if let Some(p) = find_beside_exe(mpv_binary_names()) {
        return Some(p);
    }

    find_on_path(mpv_binary_names())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_names_are_per_session() {
        assert_ne!(mpv_socket_name(1), mpv_socket_name(2));
        assert!(mpv_socket_arg(3).starts_with("--input-ipc-server="));
    }
}
