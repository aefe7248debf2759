//! Detached launch of the gateway
//!
//! Re-executes the current binary with the `serve` subcommand in its own
//! process group, so the server outlives the terminal (or parent process)
//! that started it. Output goes to `<log-dir>/out.log`.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::info;

use crate::config::{GatewayConfig, LaunchArgs, ServerArgs};

pub const LOG_FILE_NAME: &str = "out.log";

/// Arguments that make the child run `serve` with the same settings
pub fn serve_args(args: &ServerArgs) -> Vec<String> {
    let mut argv = vec![
        "serve".to_string(),
        format!("--port={}", args.port),
        format!("--sso={}", args.sso_endpoint),
        format!("--api={}", args.api_endpoint),
        format!("--path={}", args.base_path),
        format!("--host={}", args.host),
        format!("--token-max-age={}", args.token_max_age_secs),
        format!("--timeout={}", args.timeout_secs),
    ];
    if let Some(param) = &args.token_param {
        argv.push(format!("--token-param={}", param));
    }
    argv
}

/// Open `<dir>/out.log` for appending, creating the directory if needed
pub fn open_log(dir: &Path) -> io::Result<File> {
    fs::create_dir_all(dir)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))
}

/// Start the server in the background and return the confirmation line
///
/// The configuration is validated here first so a bad endpoint is reported
/// to the caller instead of only landing in the log file.
pub fn launch(args: &LaunchArgs) -> anyhow::Result<String> {
    let config = GatewayConfig::from_args(&args.server)?;

    let log = open_log(&args.log_dir)?;
    let log_err = log.try_clone()?;

    let exe = std::env::current_exe()?;
    let mut command = Command::new(exe);
    command
        .args(serve_args(&args.server))
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let child = command.spawn()?;
    info!(
        "[OK] Spawned server process {} logging to {}",
        child.id(),
        args.log_dir.join(LOG_FILE_NAME).display()
    );

    Ok(format!("Okapi server has been launched at port {}", config.port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn server_args() -> ServerArgs {
        ServerArgs {
            port: 9001,
            sso_endpoint: "https://sso.example.com".to_string(),
            api_endpoint: "https://gw.example.com".to_string(),
            base_path: String::new(),
            host: "127.0.0.1".to_string(),
            token_max_age_secs: 1800,
            timeout_secs: 30,
            token_param: None,
        }
    }

    #[test]
    fn test_serve_args() {
        let argv = serve_args(&server_args());

        assert_eq!(argv[0], "serve");
        assert!(argv.contains(&"--port=9001".to_string()));
        assert!(argv.contains(&"--sso=https://sso.example.com".to_string()));
        assert!(argv.contains(&"--path=".to_string()));
        assert!(!argv.iter().any(|a| a.starts_with("--token-param")));

        let mut with_param = server_args();
        with_param.token_param = Some("apikey".to_string());
        assert!(serve_args(&with_param).contains(&"--token-param=apikey".to_string()));
    }

    #[test]
    fn test_open_log_creates_and_appends() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("logs");

        writeln!(open_log(&dir).unwrap(), "first").unwrap();
        writeln!(open_log(&dir).unwrap(), "second").unwrap();

        let content = fs::read_to_string(dir.join(LOG_FILE_NAME)).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[test]
    fn test_launch_rejects_invalid_config() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut server = server_args();
        server.sso_endpoint = "not a url".to_string();
        let args = LaunchArgs {
            server,
            log_dir: temp_dir.path().join("logs"),
        };

        assert!(launch(&args).is_err());
        assert!(!temp_dir.path().join("logs").exists());
    }
}
