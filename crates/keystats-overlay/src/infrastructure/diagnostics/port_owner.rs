//! Identifies the process listening on a TCP port.
//!
//! Windows: `netstat -ano` gives the PID, `tasklist` gives its image name.
//! Linux: `ss -ltnpH` gives both at once.  Elsewhere nothing is attempted.
//!
//! Every external call goes through [`CommandRunner`] so the parsing can be
//! tested against captured output.

use std::fmt;
use std::io;
use std::process::Command;

use tracing::debug;

/// Runs an external program and returns its stdout.
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[String]) -> io::Result<String>;
}

/// [`CommandRunner`] backed by [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[String]) -> io::Result<String> {
        let output = Command::new(program).args(args).output()?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "{program} exited with {}",
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Linux,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortOwner {
    pub pid: u32,
    /// Image name, when it could be resolved.
    pub name: Option<String>,
}

impl fmt::Display for PortOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} (pid {})", self.pid),
            None => write!(f, "pid {}", self.pid),
        }
    }
}

/// What is known about an occupied port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortConflict {
    /// Another instance of this program holds the port.
    AlreadyRunning { port: u16, owner: PortOwner },
    OtherProcess { port: u16, owner: PortOwner },
    Unknown { port: u16 },
}

impl fmt::Display for PortConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortConflict::AlreadyRunning { port, owner } => {
                write!(f, "port {port} is in use: already running as {owner}")
            }
            PortConflict::OtherProcess { port, owner } => {
                write!(f, "port {port} is in use by {owner}")
            }
            PortConflict::Unknown { port } => {
                write!(f, "port {port} is in use by an unidentified process")
            }
        }
    }
}

/// Classifies `owner` against `app_name` (case-insensitive substring).
pub fn describe_conflict(port: u16, owner: Option<PortOwner>, app_name: &str) -> PortConflict {
    let Some(owner) = owner else {
        return PortConflict::Unknown { port };
    };
    let ours = owner
        .name
        .as_deref()
        .is_some_and(|n| n.to_lowercase().contains(&app_name.to_lowercase()));
    if ours {
        PortConflict::AlreadyRunning { port, owner }
    } else {
        PortConflict::OtherProcess { port, owner }
    }
}

/// Looks up the listener on `port`.  Any command failure yields `None`.
pub fn find_port_owner(
    platform: Platform,
    runner: &dyn CommandRunner,
    port: u16,
) -> Option<PortOwner> {
    match platform {
        Platform::Windows => {
            let netstat = runner
                .run("netstat", &["-ano".to_string()])
                .map_err(|e| debug!("netstat failed: {e}"))
                .ok()?;
            let pid = parse_netstat(&netstat, port)?;
            let args = [
                "/FI".to_string(),
                format!("PID eq {pid}"),
                "/FO".to_string(),
                "CSV".to_string(),
                "/NH".to_string(),
            ];
            let name = runner
                .run("tasklist", &args)
                .map_err(|e| debug!("tasklist failed: {e}"))
                .ok()
                .and_then(|out| parse_tasklist_csv(&out));
            Some(PortOwner { pid, name })
        }
        Platform::Linux => {
            let ss = runner
                .run("ss", &["-ltnpH".to_string()])
                .map_err(|e| debug!("ss failed: {e}"))
                .ok()?;
            parse_ss(&ss, port)
        }
        Platform::Other => None,
    }
}

// ── Output parsers ────────────────────────────────────────────────────────────

fn local_port_matches(local: &str, port: u16) -> bool {
    local
        .rsplit_once(':')
        .and_then(|(_, p)| p.parse::<u16>().ok())
        == Some(port)
}

/// PID of the `LISTENING` row whose local address ends in `:port`.
pub fn parse_netstat(output: &str, port: u16) -> Option<u32> {
    output.lines().find_map(|line| {
        if !line.contains("LISTENING") {
            return None;
        }
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 5 || !local_port_matches(cols[1], port) {
            return None;
        }
        cols.last()?.parse().ok()
    })
}

/// Image name from the first field of `tasklist /FO CSV /NH` output.
pub fn parse_tasklist_csv(output: &str) -> Option<String> {
    let line = output.lines().map(str::trim).find(|l| l.starts_with('"'))?;
    let name = line.trim_start_matches('"').split('"').next()?;
    (!name.is_empty()).then(|| name.to_string())
}

/// Owner of the `LISTEN` row for `port` in `ss -ltnpH` output.
pub fn parse_ss(output: &str, port: u16) -> Option<PortOwner> {
    output.lines().find_map(|line| {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.first() != Some(&"LISTEN") || cols.len() < 4 || !local_port_matches(cols[3], port) {
            return None;
        }
        // users:(("name",pid=1234,fd=5))
        let users = line.split_once("users:((")?.1;
        let name = users
            .strip_prefix('"')
            .and_then(|s| s.split('"').next())
            .map(str::to_string);
        let pid = users
            .split_once("pid=")?
            .1
            .split(|c: char| !c.is_ascii_digit())
            .next()?
            .parse()
            .ok()?;
        Some(PortOwner { pid, name })
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
