//! In-memory fakes of the host capability traits
//!
//! `FakeHost` simulates the account database and the init system well enough
//! for the orchestrator's precondition checks to behave as on a real host.
//! `FakeRemote` serves scripted responses. Both record every call.

use crate::error::{InstallError, IoContext, Result};
use crate::executor::{CommandOutput, CommandSpec, Executor};
use crate::fsutil::path_exists;
use crate::remote::{Remote, RemoteProbe};
use crate::space::SpaceProbe;
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Default)]
struct HostState {
    users: BTreeSet<String>,
    groups: BTreeSet<String>,
    /// Units systemd knows about without a file in the unit dir (rsyslog etc.)
    builtin_units: BTreeSet<String>,
    enabled: BTreeSet<String>,
    active: BTreeSet<String>,
    failures: Vec<(String, i32)>,
    commands: Vec<String>,
}

/// Recording executor with a simulated account database and init system
#[derive(Debug, Default)]
pub struct FakeHost {
    unit_dir: Option<PathBuf>,
    state: Mutex<HostState>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Units whose file exists in `unit_dir` are known to the fake systemd
    pub fn with_unit_dir(mut self, unit_dir: &Path) -> Self {
        self.unit_dir = Some(unit_dir.to_path_buf());
        self
    }

    pub fn with_user(self, user: &str) -> Self {
        {
            let mut state = lock(&self.state);
            state.users.insert(user.to_string());
            state.groups.insert(user.to_string());
        }
        self
    }

    pub fn with_builtin_unit(self, unit: &str) -> Self {
        lock(&self.state).builtin_units.insert(unit.to_string());
        self
    }

    pub fn with_enabled(self, unit: &str) -> Self {
        lock(&self.state).enabled.insert(unit.to_string());
        self
    }

    pub fn with_active(self, unit: &str) -> Self {
        lock(&self.state).active.insert(unit.to_string());
        self
    }

    /// Any command whose display starts with `prefix` exits with `code`
    pub fn fail_on(self, prefix: &str, code: i32) -> Self {
        lock(&self.state).failures.push((prefix.to_string(), code));
        self
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.clone()
    }

    /// Whether any recorded command starts with `prefix`
    pub fn ran(&self, prefix: &str) -> bool {
        lock(&self.state)
            .commands
            .iter()
            .any(|c| c.starts_with(prefix))
    }

    pub fn count(&self, prefix: &str) -> usize {
        lock(&self.state)
            .commands
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn has_user(&self, user: &str) -> bool {
        lock(&self.state).users.contains(user)
    }

    pub fn is_enabled(&self, unit: &str) -> bool {
        lock(&self.state).enabled.contains(unit)
    }

    pub fn is_active(&self, unit: &str) -> bool {
        lock(&self.state).active.contains(unit)
    }

    fn unit_exists(&self, state: &HostState, unit: &str) -> bool {
        state.builtin_units.contains(unit)
            || self
                .unit_dir
                .as_ref()
                .map(|dir| dir.join(unit).exists())
                .unwrap_or(false)
    }

    fn systemctl(&self, state: &mut HostState, args: &[String]) -> i32 {
        let verb = args.first().map(String::as_str).unwrap_or("");
        let unit = args.last().cloned().unwrap_or_default();
        let exists = self.unit_exists(state, &unit);
        let code = |ok: bool| if ok { 0 } else { 1 };
        match verb {
            "cat" => code(exists),
            "is-active" => code(exists && state.active.contains(&unit)),
            "is-enabled" => code(exists && state.enabled.contains(&unit)),
            "daemon-reload" | "reset-failed" => 0,
            "enable" => {
                if exists {
                    state.enabled.insert(unit);
                }
                code(exists)
            }
            "disable" => {
                state.enabled.remove(&unit);
                0
            }
            "stop" => {
                state.active.remove(&unit);
                0
            }
            "restart" | "start" => {
                if exists {
                    state.active.insert(unit);
                }
                code(exists)
            }
            _ => 0,
        }
    }
}

impl Executor for FakeHost {
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
        let line = cmd.display();
        let mut state = lock(&self.state);
        state.commands.push(line.clone());

        if let Some((_, code)) = state.failures.iter().find(|(p, _)| line.starts_with(p.as_str())) {
            let code = *code;
            return Ok(CommandOutput {
                exit_code: code,
                stdout: String::new(),
                stderr: format!("simulated failure of `{}`", line),
            });
        }

        let arg = |i: usize| cmd.args.get(i).cloned().unwrap_or_default();
        let exit_code = match cmd.program.as_str() {
            "id" => i32::from(!state.users.contains(&arg(cmd.args.len().saturating_sub(1)))),
            "getent" => {
                if state.groups.contains(&arg(1)) {
                    0
                } else {
                    2
                }
            }
            "addgroup" => {
                state.groups.insert(arg(0));
                0
            }
            "adduser" => {
                // adduser --system <user> --home ... --ingroup <group>
                let user = arg(1);
                let known_group = cmd
                    .args
                    .iter()
                    .position(|a| a == "--ingroup")
                    .map(|i| state.groups.contains(&arg(i + 1)))
                    .unwrap_or(true);
                if known_group {
                    state.users.insert(user);
                    0
                } else {
                    1
                }
            }
            "chown" => {
                let target = cmd.args.last().map(PathBuf::from).unwrap_or_default();
                i32::from(!path_exists(&target))
            }
            "systemctl" => {
                let args = cmd.args.clone();
                self.systemctl(&mut state, &args)
            }
            _ => 0,
        };

        Ok(CommandOutput::with_code(exit_code))
    }
}

#[derive(Debug, Clone)]
struct FakeResource {
    status: u16,
    body: Vec<u8>,
    reported_length: Option<u64>,
    unreachable: bool,
}

/// Scripted remote; unknown URLs answer 404
#[derive(Debug, Default)]
pub struct FakeRemote {
    resources: Mutex<HashMap<String, FakeResource>>,
    probes: Mutex<Vec<String>>,
    fetches: Mutex<Vec<String>>,
    downloads: Mutex<Vec<String>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) -> &Self {
        lock(&self.resources).insert(
            url.to_string(),
            FakeResource {
                status: 200,
                body: body.into(),
                reported_length: None,
                unreachable: false,
            },
        );
        self
    }

    pub fn serve_status(&self, url: &str, status: u16) -> &Self {
        lock(&self.resources).insert(
            url.to_string(),
            FakeResource {
                status,
                body: Vec::new(),
                reported_length: None,
                unreachable: false,
            },
        );
        self
    }

    /// Override the Content-Length a probe reports for `url`
    pub fn report_length(&self, url: &str, length: u64) -> &Self {
        if let Some(resource) = lock(&self.resources).get_mut(url) {
            resource.reported_length = Some(length);
        }
        self
    }

    /// Requests to `url` fail at the transport level
    pub fn unreachable(&self, url: &str) -> &Self {
        lock(&self.resources).insert(
            url.to_string(),
            FakeResource {
                status: 0,
                body: Vec::new(),
                reported_length: None,
                unreachable: true,
            },
        );
        self
    }

    pub fn probes(&self) -> Vec<String> {
        lock(&self.probes).clone()
    }

    pub fn fetches(&self) -> Vec<String> {
        lock(&self.fetches).clone()
    }

    pub fn downloads(&self) -> Vec<String> {
        lock(&self.downloads).clone()
    }

    fn lookup(&self, url: &str) -> Result<Option<FakeResource>> {
        let resource = lock(&self.resources).get(url).cloned();
        match resource {
            Some(r) if r.unreachable => Err(InstallError::Network {
                url: url.to_string(),
                reason: "simulated connection failure".to_string(),
            }),
            other => Ok(other),
        }
    }

    fn served(&self, url: &str) -> Result<Vec<u8>> {
        match self.lookup(url)? {
            Some(r) if (200..300).contains(&r.status) => Ok(r.body),
            Some(r) => Err(InstallError::HttpStatus {
                url: url.to_string(),
                status: r.status,
            }),
            None => Err(InstallError::HttpStatus {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}

impl Remote for FakeRemote {
    fn probe(&self, url: &str) -> Result<RemoteProbe> {
        lock(&self.probes).push(url.to_string());
        Ok(match self.lookup(url)? {
            Some(r) => RemoteProbe {
                status: r.status,
                content_length: r.reported_length.or(Some(r.body.len() as u64)),
            },
            None => RemoteProbe {
                status: 404,
                content_length: None,
            },
        })
    }

    fn fetch_text(&self, url: &str) -> Result<String> {
        lock(&self.fetches).push(url.to_string());
        let body = self.served(url)?;
        Ok(String::from_utf8_lossy(&body).to_string())
    }

    fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        lock(&self.downloads).push(url.to_string());
        let body = self.served(url)?;
        let existing = fs::metadata(dest).map(|m| m.len() as usize).unwrap_or(0);
        if existing > 0 && existing <= body.len() {
            let mut file = OpenOptions::new().append(true).open(dest).at(dest)?;
            file.write_all(&body[existing..]).at(dest)?;
        } else {
            fs::write(dest, &body).at(dest)?;
        }
        Ok(body.len() as u64)
    }
}

/// Space probe reporting a fixed number of free bytes
#[derive(Debug, Clone, Copy)]
pub struct FixedSpace(pub u64);

impl SpaceProbe for FixedSpace {
    fn available_bytes(&self, _path: &Path) -> Result<u64> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_account_database() {
        let host = FakeHost::new();
        let id = CommandSpec::new("id").args(["-u", "cheqd"]);
        assert!(!host.run(&id).unwrap().success());

        host.run(&CommandSpec::new("addgroup").args(["cheqd", "--quiet", "--system"]))
            .unwrap();
        host.run(&CommandSpec::new("adduser").args([
            "--system", "cheqd", "--home", "/home/cheqd", "--ingroup", "cheqd",
        ]))
        .unwrap();
        assert!(host.run(&id).unwrap().success());
    }

    #[test]
    fn test_fake_systemd_needs_unit_file() {
        let dir = tempfile::tempdir().unwrap();
        let host = FakeHost::new().with_unit_dir(dir.path());
        let enable = CommandSpec::new("systemctl").args(["enable", "--quiet", "x.service"]);

        assert!(!host.run(&enable).unwrap().success());
        fs::write(dir.path().join("x.service"), "[Unit]").unwrap();
        assert!(host.run(&enable).unwrap().success());
        assert!(host.is_enabled("x.service"));
    }

    #[test]
    fn test_fake_remote_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("archive");
        fs::write(&dest, b"hello ").unwrap();

        let remote = FakeRemote::new();
        remote.serve("https://x/archive", b"hello world".to_vec());
        remote.download("https://x/archive", &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"hello world");
    }
}
