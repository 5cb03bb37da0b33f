//! `adb` command wrapper.
//!
//! Each call spawns a fresh `adb` process, so one client can be shared by
//! every pool worker.

use super::CommandExecutor;
use crate::config::DeviceConfig;
use crate::BackupError;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// A device reported by `adb devices -l`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub serial: String,
    pub state: String,
    pub model: Option<String>,
}

impl Device {
    /// Connected and authorized
    pub fn is_online(&self) -> bool {
        self.state == "device"
    }
}

#[derive(Debug, Clone)]
pub struct AdbClient {
    path: PathBuf,
    serial: Option<String>,
}

impl AdbClient {
    /// Find the adb executable, either the configured one or the first on `PATH`.
    pub fn locate(configured: Option<&Path>) -> crate::Result<Self> {
        let path = match configured {
            Some(path) if path.is_file() => path.to_path_buf(),
            Some(path) => {
                return Err(BackupError::AdbUnavailable(format!(
                    "{} does not exist",
                    path.display()
                )))
            }
            None => adb_on_path(std::env::var_os("PATH"))?,
        };

        debug!("Using adb at {}", path.display());
        Ok(Self { path, serial: None })
    }

    /// Locate adb and bind to a connected device.
    ///
    /// Fails when adb is missing or no matching device is online, before
    /// anything touches the device or the backup root.
    pub async fn connect(config: &DeviceConfig) -> crate::Result<Self> {
        let mut client = Self::locate(config.adb_path.as_deref())?;
        let devices = client.devices().await?;

        let device = match &config.serial {
            Some(serial) => devices
                .into_iter()
                .find(|d| &d.serial == serial && d.is_online()),
            None => devices.into_iter().find(Device::is_online),
        }
        .ok_or(BackupError::NoDevice)?;

        info!(
            "Connected to {} ({})",
            device.model.as_deref().unwrap_or("unknown model"),
            device.serial
        );
        client.serial = Some(device.serial);
        Ok(client)
    }

    /// Run an adb command and return its trimmed stdout.
    pub async fn run<I, S>(&self, args: I) -> crate::Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut argv: Vec<OsString> = Vec::new();
        if let Some(serial) = &self.serial {
            argv.push("-s".into());
            argv.push(serial.into());
        }
        argv.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));

        let command_line = argv
            .iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        debug!("adb {}", command_line);

        let output = Command::new(&self.path)
            .args(&argv)
            .kill_on_drop(true)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackupError::Command {
                command: command_line,
                message: format!("{}; stderr: {}", output.status, stderr.trim()),
                stdout,
            });
        }

        Ok(stdout)
    }

    /// Devices known to the adb server
    pub async fn devices(&self) -> crate::Result<Vec<Device>> {
        let output = self.run(["devices", "-l"]).await?;
        Ok(parse_devices(&output))
    }

    /// Stop the adb server so no daemon lingers after the run
    pub async fn kill_server(&self) -> crate::Result<()> {
        self.run(["kill-server"]).await.map(|_| ())
    }
}

impl CommandExecutor for AdbClient {
    async fn list_recursive(&self, path: &str) -> crate::Result<String> {
        // `adb shell` re-joins its arguments into one remote command line
        let quoted = shell_quote(path);
        self.run(["shell", "ls", "-R", "-l", quoted.as_str()]).await
    }

    async fn push(&self, local: &Path, remote: &str) -> crate::Result<()> {
        self.run([OsStr::new("push"), local.as_os_str(), OsStr::new(remote)])
            .await
            .map(|_| ())
    }

    async fn pull(&self, remote: &str, local: &Path) -> crate::Result<()> {
        self.run([OsStr::new("pull"), OsStr::new(remote), local.as_os_str()])
            .await
            .map(|_| ())
    }
}

/// Parse `adb devices -l`:
///
/// ```text
/// List of devices attached
/// RFCW40XXXX     device usb:1-1 product:a52q model:SM_A525F device:a52q
/// ```
pub fn parse_devices(output: &str) -> Vec<Device> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of devices attached"))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 2 {
                return None;
            }
            let model = parts
                .iter()
                .find_map(|p| p.strip_prefix("model:"))
                .map(str::to_string);
            Some(Device {
                serial: parts[0].to_string(),
                state: parts[1].to_string(),
                model,
            })
        })
        .collect()
}

/// Single-quote a path for the device shell.
fn shell_quote(path: &str) -> String {
    format!("'{}'", path.replace('\'', r"'\''"))
}

/// Resolve `adb` against a search path (PATHEXT applies on Windows).
fn adb_on_path(paths: Option<OsString>) -> crate::Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    which::which_in("adb", paths, cwd)
        .map_err(|e| BackupError::AdbUnavailable(format!("adb not found in PATH: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_devices() {
        let output = "List of devices attached
RFCW40XXXX             device usb:1-1 product:a52qnsxx model:SM_A525F device:a52q transport_id:1
emulator-5554          offline
";
        let devices = parse_devices(output);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].serial, "RFCW40XXXX");
        assert_eq!(devices[0].model.as_deref(), Some("SM_A525F"));
        assert!(devices[0].is_online());
        assert_eq!(devices[1].state, "offline");
        assert!(devices[1].model.is_none());
        assert!(!devices[1].is_online());
    }

    #[test]
    fn test_parse_devices_empty() {
        assert!(parse_devices("List of devices attached\n\n").is_empty());
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/sdcard/My Photos"), "'/sdcard/My Photos'");
        assert_eq!(shell_quote("/sdcard/it's"), r"'/sdcard/it'\''s'");
    }

    #[test]
    fn test_locate_missing_configured_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("adb");
        match AdbClient::locate(Some(&missing)) {
            Err(BackupError::AdbUnavailable(msg)) => assert!(msg.contains("does not exist")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_locate_configured_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let adb = dir.path().join("adb");
        std::fs::write(&adb, b"").unwrap();
        let client = AdbClient::locate(Some(&adb)).unwrap();
        assert_eq!(client.path, adb);
        assert!(client.serial.is_none());
    }

    #[test]
    fn test_adb_missing_from_search_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = Some(dir.path().as_os_str().to_os_string());
        match adb_on_path(paths) {
            Err(BackupError::AdbUnavailable(msg)) => assert!(msg.contains("not found in PATH")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_adb_found_on_search_path() {
        use std::os::unix::fs::PermissionsExt;

        let empty = tempfile::TempDir::new().unwrap();
        let tools = tempfile::TempDir::new().unwrap();
        let adb = tools.path().join("adb");
        std::fs::write(&adb, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&adb, std::fs::Permissions::from_mode(0o755)).unwrap();

        let paths = std::env::join_paths([empty.path(), tools.path()]).unwrap();
        let found = adb_on_path(Some(paths)).unwrap();
        assert_eq!(found.file_name().unwrap(), "adb");
        assert_eq!(found.parent().unwrap().canonicalize().unwrap(), tools.path().canonicalize().unwrap());
    }
}
