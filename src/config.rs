//! Config file, startup file, and batch file parsing.
//!
//! All three share the same line format: `#`-prefixed comment lines are
//! skipped, blank lines are skipped, everything else is either a bare
//! command line (startup/batch files) or a `key=value` pair scoped to a
//! server/control name (config files). Search order and key sets follow
//! the upstream server/control implementations exactly, since the
//! distilled behavior description doesn't spell out every precedence rule.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Overrides a `pshell-server.conf` entry can supply, one struct per
/// `<serverName>.key=value` line matching this server's name.
#[derive(Debug, Clone, Default)]
pub struct ServerConfigOverrides {
    pub title: Option<String>,
    pub banner: Option<String>,
    pub prompt: Option<String>,
    pub host: Option<String>,
    pub port: Option<String>,
    pub server_type: Option<String>,
    /// `None` means "use the default timeout"; `Some(None)` means the file
    /// explicitly said `timeout=none` (no idle timeout at all).
    pub timeout: Option<Option<u64>>,
}

/// Overrides a `pshell-control.conf` entry can supply.
#[derive(Debug, Clone, Default)]
pub struct ControlConfigOverrides {
    /// Destination host for a UDP control destination.
    pub udp: Option<String>,
    /// Remote UNIX server name to connect to; presence of this key forces
    /// `port` to the literal `"unix"`, per spec §6.
    pub unix: Option<String>,
    pub port: Option<String>,
    /// Timeout in milliseconds; `none` in the file maps to `Some(0)`
    /// (`NO_WAIT`), per spec §6 ("timeout ... `none`=0").
    pub timeout: Option<u64>,
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    Ok(contents.lines().map(str::to_string).collect())
}

fn parse_key_value(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    line.split_once('=').map(|(k, v)| (k.trim(), v.trim()))
}

/// Search order for server config files: `$PSHELL_CONFIG_DIR/pshell-server.conf`,
/// then `/etc/pshell/pshell-server.conf`.
pub fn server_config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(dir) = std::env::var("PSHELL_CONFIG_DIR") {
        paths.push(PathBuf::from(dir).join("pshell-server.conf"));
    }
    paths.push(PathBuf::from("/etc/pshell/pshell-server.conf"));
    paths
}

/// Search order for control config files: `$PSHELL_CONFIG_DIR/pshell-control.conf`,
/// then `/etc/pshell/pshell-control.conf`, then the current working
/// directory — a control client additionally checks cwd, unlike a server.
pub fn control_config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(dir) = std::env::var("PSHELL_CONFIG_DIR") {
        paths.push(PathBuf::from(dir).join("pshell-control.conf"));
    }
    paths.push(PathBuf::from("/etc/pshell/pshell-control.conf"));
    paths.push(PathBuf::from("pshell-control.conf"));
    paths
}

/// Loads and parses the first server config file found for `server_name`,
/// returning `Ok(None)` (not an error) if none of the search paths exist —
/// a missing config file is the common case, not a failure.
pub fn load_server_config(server_name: &str) -> Result<Option<ServerConfigOverrides>> {
    for path in server_config_search_paths() {
        if !path.exists() {
            continue;
        }
        let lines = read_lines(&path)?;
        let mut overrides = ServerConfigOverrides::default();
        for line in &lines {
            let Some((key, value)) = parse_key_value(line) else { continue };
            let Some((name, key)) = key.split_once('.') else { continue };
            if name != server_name {
                continue;
            }
            match key {
                "title" => overrides.title = Some(value.to_string()),
                "banner" => overrides.banner = Some(value.to_string()),
                "prompt" => overrides.prompt = Some(value.to_string()),
                "host" => overrides.host = Some(value.to_string()),
                "port" => overrides.port = Some(value.to_string()),
                "type" => overrides.server_type = Some(value.to_string()),
                "timeout" => {
                    overrides.timeout = Some(if value.eq_ignore_ascii_case("none") {
                        None
                    } else {
                        value.parse::<u64>().ok()
                    })
                }
                other => warn!("unrecognized server config key '{other}' in {}", path.display()),
            }
        }
        return Ok(Some(overrides));
    }
    Ok(None)
}

/// Loads and parses the first control config file found for
/// `control_name`, same not-found-is-ok contract as
/// [`load_server_config`].
pub fn load_control_config(control_name: &str) -> Result<Option<ControlConfigOverrides>> {
    for path in control_config_search_paths() {
        if !path.exists() {
            continue;
        }
        let lines = read_lines(&path)?;
        let mut overrides = ControlConfigOverrides::default();
        let mut unix_seen = false;
        for line in &lines {
            let Some((key, value)) = parse_key_value(line) else { continue };
            let Some((name, key)) = key.split_once('.') else { continue };
            if name != control_name {
                continue;
            }
            match key {
                "udp" => overrides.udp = Some(value.to_string()),
                "unix" => {
                    overrides.unix = Some(value.to_string());
                    unix_seen = true;
                }
                "port" => overrides.port = Some(value.to_string()),
                "timeout" => {
                    overrides.timeout = Some(if value.eq_ignore_ascii_case("none") {
                        0
                    } else {
                        value.parse::<u64>().unwrap_or(0)
                    })
                }
                other => warn!("unrecognized control config key '{other}' in {}", path.display()),
            }
        }
        // A `unix` key always wins over a `port` key, even if both are
        // present and uncommented.
        if unix_seen {
            overrides.port = Some("unix".to_string());
        }
        return Ok(Some(overrides));
    }
    Ok(None)
}

/// Search order for startup files: `$PSHELL_STARTUP_DIR`, then
/// `/etc/pshell/startup`, then the current working directory.
pub fn startup_file_search_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(dir) = std::env::var("PSHELL_STARTUP_DIR") {
        dirs.push(PathBuf::from(dir));
    }
    dirs.push(PathBuf::from("/etc/pshell/startup"));
    dirs.push(PathBuf::from("."));
    dirs
}

/// Loads `<server_name>.startup` from the startup search path, returning
/// the command lines to run at server start (comments/blanks filtered).
pub fn load_startup_file(server_name: &str) -> Result<Vec<String>> {
    for dir in startup_file_search_dirs() {
        let path = dir.join(format!("{server_name}.startup"));
        if path.exists() {
            let lines = read_lines(&path)?;
            return Ok(lines
                .into_iter()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .collect());
        }
    }
    Ok(Vec::new())
}

/// Directories searched for `.psh`/`.batch` batch files: cwd,
/// `$PSHELL_BATCH_DIR`, then `/etc/pshell/batch`.
pub fn batch_file_search_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from(".")];
    if let Ok(dir) = std::env::var("PSHELL_BATCH_DIR") {
        dirs.push(PathBuf::from(dir));
    }
    dirs.push(PathBuf::from("/etc/pshell/batch"));
    dirs
}

/// Finds every `.psh`/`.batch` file across the batch search directories.
pub fn find_batch_files() -> Vec<PathBuf> {
    let mut found = Vec::new();
    for dir in batch_file_search_dirs() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if matches!(path.extension().and_then(|e| e.to_str()), Some("psh") | Some("batch")) {
                found.push(path);
            }
        }
    }
    found
}

/// Resolves a batch-file argument (a bare index into [`find_batch_files`],
/// or a filename/prefix) to its full path.
pub fn resolve_batch_file(arg: &str) -> Result<Option<PathBuf>> {
    let files = find_batch_files();
    if let Ok(index) = arg.parse::<usize>() {
        return Ok(files.get(index.wrapping_sub(1)).cloned());
    }
    let matches: Vec<&PathBuf> = files
        .iter()
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(arg))
                .unwrap_or(false)
        })
        .collect();
    match matches.len() {
        1 => Ok(Some(matches[0].clone())),
        _ => Ok(None),
    }
}

/// Reads a batch file into runnable command lines (comments/blanks
/// filtered), same filter rules as a startup file.
pub fn load_batch_file(path: &Path) -> Result<Vec<String>> {
    let lines = read_lines(path)?;
    Ok(lines
        .into_iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// `PSHELL_CONFIG_DIR` is process-global; serialize the tests that set
    /// it so they don't race each other under cargo's parallel test runner.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn parses_key_value_skips_comments_and_blanks() {
        assert_eq!(parse_key_value("# comment"), None);
        assert_eq!(parse_key_value(""), None);
        assert_eq!(parse_key_value("demo.host = 127.0.0.1"), Some(("demo.host", "127.0.0.1")));
    }

    #[test]
    fn loads_server_overrides_scoped_by_name() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("PSHELL_CONFIG_DIR", dir.path());
        std::fs::write(
            dir.path().join("pshell-server.conf"),
            "demo.title=Demo Server\ndemo.timeout=none\nother.title=Ignored\n",
        )
        .unwrap();
        let overrides = load_server_config("demo").unwrap().unwrap();
        assert_eq!(overrides.title.as_deref(), Some("Demo Server"));
        assert_eq!(overrides.timeout, Some(None));
        std::env::remove_var("PSHELL_CONFIG_DIR");
    }

    #[test]
    fn missing_config_file_is_not_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("PSHELL_CONFIG_DIR");
        assert!(load_server_config("definitely-not-a-real-server").unwrap().is_none());
    }

    #[test]
    fn unix_key_overrides_port_key() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("PSHELL_CONFIG_DIR", dir.path());
        std::fs::write(
            dir.path().join("pshell-control.conf"),
            "demo.port=6002\ndemo.unix=remoteServer\n",
        )
        .unwrap();
        let overrides = load_control_config("demo").unwrap().unwrap();
        assert_eq!(overrides.port.as_deref(), Some("unix"));
        assert_eq!(overrides.unix.as_deref(), Some("remoteServer"));
        std::env::remove_var("PSHELL_CONFIG_DIR");
    }

    #[test]
    fn control_timeout_none_maps_to_zero() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("PSHELL_CONFIG_DIR", dir.path());
        std::fs::write(dir.path().join("pshell-control.conf"), "demo.udp=192.168.1.5\ndemo.timeout=none\n").unwrap();
        let overrides = load_control_config("demo").unwrap().unwrap();
        assert_eq!(overrides.udp.as_deref(), Some("192.168.1.5"));
        assert_eq!(overrides.timeout, Some(0));
        std::env::remove_var("PSHELL_CONFIG_DIR");
    }

    #[test]
    fn batch_file_filters_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.psh");
        std::fs::write(&path, "# header\nstatus\n\nset foo=1\n").unwrap();
        assert_eq!(load_batch_file(&path).unwrap(), vec!["status", "set foo=1"]);
    }
}
