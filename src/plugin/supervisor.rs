use super::packet::{PacketReader, PluginPacket, PLUGIN_FD};
use super::timer::Timer;
use log::{error, info, warn};
use std::fs::File;
use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus};

const SHELL: &str = "/bin/sh";

///
/// How a plugin is run.  Timeouts are in seconds; a zero `timeout`
/// means the plugin may stay silent forever.
///
#[derive(Debug, Clone, PartialEq)]
pub struct PluginParams {
    pub name: String,
    pub cmd: String,
    pub timeout: u64,
    pub start_retry: u64,
    pub shutdown_wait: u64,
}

///
/// Where a plugin is in its life.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    NotStarted,
    /// Running, nothing received yet.
    Starting,
    Running,
    /// SIGTERM sent.
    Terminating,
    /// SIGKILL sent.
    Killed,
    /// Exited and reaped; waiting to be restarted.
    Reaped,
}

fn set_flags(fd: RawFd) -> io::Result<()> {
    unsafe {
        if libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
        let fl = libc::fcntl(fd, libc::F_GETFL);
        if fl < 0 || libc::fcntl(fd, libc::F_SETFL, fl | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

///
/// Create the pipe: a non blocking read end for us and the write
/// end the child gets as PLUGIN_FD.
///
fn plugin_pipe() -> io::Result<(File, RawFd)> {
    let mut fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
        return Err(io::Error::last_os_error());
    }
    let read = unsafe { File::from_raw_fd(fds[0]) };
    if let Err(e) = set_flags(fds[0]) {
        unsafe {
            libc::close(fds[1]);
        }
        return Err(e);
    }
    Ok((read, fds[1]))
}

fn describe_exit(name: &str, status: ExitStatus) {
    if let Some(sig) = status.signal() {
        warn!("[{}] terminated on signal {}", name, sig);
    } else if let Some(code) = status.code().filter(|c| *c != 0) {
        warn!("[{}] terminated with error status {}", name, code);
    } else {
        info!("[{}] terminated", name);
    }
}

///
/// One acquisition plugin: a shell command run as a child process
/// that writes framed packets on descriptor PLUGIN_FD.
///
/// service() does all the work and never blocks: it reads whatever
/// the pipe holds, reaps the child when it exits, escalates a
/// shutdown to SIGKILL once `shutdown_wait` has passed, and
/// restarts the plugin `start_retry` seconds after it went away.
/// A plugin that stays silent for longer than `timeout`, closes the
/// pipe, or sends a malformed packet is shut down and restarted the
/// same way.
///
#[derive(Debug)]
pub struct Plugin {
    params: PluginParams,
    child: Option<Child>,
    pipe: Option<File>,
    reader: PacketReader,
    read_timer: Timer,
    start_retry_timer: Timer,
    shutdown_timer: Timer,
    started: bool,
    data_available: bool,
    shutdown_requested: bool,
    restart_requested: bool,
    sigkill_sent: bool,
    terminating: bool,
}

impl Plugin {
    pub fn new(params: PluginParams) -> Plugin {
        Plugin {
            read_timer: Timer::from_secs(params.timeout),
            start_retry_timer: Timer::from_secs(params.start_retry),
            shutdown_timer: Timer::from_secs(params.shutdown_wait),
            params,
            child: None,
            pipe: None,
            reader: PacketReader::new(),
            started: false,
            data_available: false,
            shutdown_requested: false,
            restart_requested: false,
            sigkill_sent: false,
            terminating: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.params.name
    }
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(|c| c.id())
    }
    /// True while there is a child process to wait for.
    pub fn running(&self) -> bool {
        self.child.is_some()
    }
    /// Descriptor to poll for input, if the pipe is open.
    pub fn fd(&self) -> Option<RawFd> {
        self.pipe.as_ref().map(|p| p.as_raw_fd())
    }

    pub fn state(&self) -> PluginState {
        match &self.child {
            None if !self.started => PluginState::NotStarted,
            None => PluginState::Reaped,
            Some(_) if self.sigkill_sent => PluginState::Killed,
            Some(_) if self.shutdown_requested => PluginState::Terminating,
            Some(_) if self.data_available => PluginState::Running,
            Some(_) => PluginState::Starting,
        }
    }
    ///
    /// Run the plugin: `/bin/sh -c "<cmd> <name>"` with the pipe on
    /// PLUGIN_FD.  Failure is logged; the restart timer retries.
    ///
    pub fn start(&mut self) {
        self.started = true;
        self.start_retry_timer.reset();
        if let Err(e) = self.spawn() {
            error!("[{}] cannot start plugin: {}", self.params.name, e);
            return;
        }
        self.read_timer.reset();
        self.reader.clear();
        self.data_available = false;
        self.shutdown_requested = false;
        self.restart_requested = false;
        self.sigkill_sent = false;
    }

    fn spawn(&mut self) -> io::Result<()> {
        let (read, write) = plugin_pipe()?;
        let cmdline = format!("{} {}", self.params.cmd, self.params.name);
        let mut command = Command::new(SHELL);
        command.arg("-c").arg(&cmdline);
        unsafe {
            command.pre_exec(move || {
                if write == PLUGIN_FD {
                    libc::fcntl(write, libc::F_SETFD, 0);
                } else {
                    if libc::dup2(write, PLUGIN_FD) < 0 {
                        return Err(io::Error::last_os_error());
                    }
                    libc::close(write);
                }
                libc::signal(libc::SIGPIPE, libc::SIG_DFL);
                libc::signal(libc::SIGHUP, libc::SIG_DFL);
                Ok(())
            });
        }
        info!("[{}] starting shell", self.params.name);
        let spawned = command.spawn();
        unsafe {
            libc::close(write);
        }
        self.child = Some(spawned?);
        self.pipe = Some(read);
        Ok(())
    }

    fn signal(&self, sig: libc::c_int) {
        if let Some(pid) = self.pid() {
            unsafe {
                libc::kill(pid as libc::pid_t, sig);
            }
        }
    }
    ///
    /// Ask the plugin to exit.  With `restart` it is started again
    /// as soon as it has gone, otherwise after `start_retry`.
    ///
    pub fn shutdown(&mut self, restart: bool) {
        if self.child.is_some() && !self.shutdown_requested {
            self.signal(libc::SIGTERM);
        }
        self.shutdown_timer.reset();
        self.shutdown_requested = self.child.is_some();
        self.restart_requested = restart;
    }
    ///
    /// Stop the plugin for good.
    ///
    pub fn terminate(&mut self) {
        self.terminating = true;
        self.shutdown(false);
    }

    fn close_pipe(&mut self) {
        self.pipe = None;
        self.reader.clear();
    }

    // Drain the pipe into the reader.  False once it is unusable.
    fn read_pipe(&mut self, out: &mut Vec<PluginPacket>) -> bool {
        let mut buf = [0u8; 8192];
        loop {
            let pipe = match self.pipe.as_mut() {
                Some(p) => p,
                None => return false,
            };
            match pipe.read(&mut buf) {
                Ok(0) => {
                    if self.data_available && !self.shutdown_requested && !self.sigkill_sent {
                        warn!("[{}] unexpected eof", self.params.name);
                    }
                    return false;
                }
                Ok(n) => {
                    self.read_timer.reset();
                    if !self.data_available {
                        info!("[{}] data is available", self.params.name);
                        self.data_available = true;
                    }
                    self.reader.feed(&buf[..n]);
                    loop {
                        match self.reader.next_packet() {
                            Ok(Some(p)) => out.push(p),
                            Ok(None) => break,
                            Err(e) => {
                                error!("[{}] {}", self.params.name, e);
                                return false;
                            }
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("[{}] read error ({})", self.params.name, e);
                    return false;
                }
            }
        }
    }

    fn check_child(&mut self) {
        let status = match self.child.as_mut().map(|c| c.try_wait()) {
            Some(Ok(Some(status))) => status,
            Some(Ok(None)) | None => return,
            Some(Err(e)) => {
                error!("[{}] waitpid: {}", self.params.name, e);
                self.child = None;
                return;
            }
        };
        describe_exit(&self.params.name, status);
        self.child = None;
        self.close_pipe();
        self.start_retry_timer.reset();
    }
    ///
    /// Do everything the plugin needs; packets read are appended to
    /// `out`.  Call when its descriptor is readable and at least
    /// once a second.
    ///
    pub fn service(&mut self, out: &mut Vec<PluginPacket>) {
        if self.pipe.is_some() && !self.read_pipe(out) {
            self.close_pipe();
            if !self.shutdown_requested {
                self.shutdown(false);
            }
        }
        self.check_child();

        if self.child.is_some() {
            if self.shutdown_requested {
                if !self.sigkill_sent && self.shutdown_timer.expired() {
                    warn!("[{}] shutdown time expired", self.params.name);
                    self.signal(libc::SIGKILL);
                    self.sigkill_sent = true;
                }
            } else if self.params.timeout > 0 && self.read_timer.expired() {
                warn!("[{}] timeout", self.params.name);
                self.shutdown(false);
            }
            return;
        }

        if self.terminating {
            return;
        }
        if self.restart_requested || !self.started || self.start_retry_timer.expired() {
            self.start();
        }
    }
}

impl Drop for Plugin {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(test)]
mod supervisor_test {
    use super::*;
    use crate::plugin::packet::Payload;
    use std::fs;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn params(name: &str, cmd: &str) -> PluginParams {
        PluginParams {
            name: name.to_string(),
            cmd: cmd.to_string(),
            timeout: 0,
            start_retry: 60,
            shutdown_wait: 2,
        }
    }

    // Service the plugin until `done` says so or the time runs out.
    fn run_until<F>(p: &mut Plugin, out: &mut Vec<PluginPacket>, secs: u64, done: F) -> bool
    where
        F: Fn(&Plugin, &Vec<PluginPacket>) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(secs);
        while Instant::now() < deadline {
            p.service(out);
            if done(p, out) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn packets_from_child() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("packets");
        let packets: Vec<PluginPacket> = (0..3)
            .map(|n| PluginPacket {
                station: "APE".to_string(),
                channel: "Z".to_string(),
                payload: Payload::Raw(vec![n; 50]),
            })
            .collect();
        let bytes: Vec<u8> = packets.iter().flat_map(|p| p.encode()).collect();
        fs::write(&data, bytes).unwrap();

        let cmd = format!("cat {} >&63; exec sleep 30 #", data.display());
        let mut p = Plugin::new(params("test", &cmd));
        assert_eq!(p.state(), PluginState::NotStarted);
        let mut out = Vec::new();
        assert!(run_until(&mut p, &mut out, 10, |_, out| out.len() == 3));
        assert_eq!(out, packets);
        assert_eq!(p.state(), PluginState::Running);

        p.terminate();
        assert_eq!(p.state(), PluginState::Terminating);
        assert!(run_until(&mut p, &mut out, 10, |p, _| !p.running()));
        assert_eq!(p.state(), PluginState::Reaped);
        // never restarted
        p.service(&mut out);
        assert!(!p.running());
    }

    #[test]
    fn stubborn_child_killed() {
        let mut pp = params("stubborn", "trap '' TERM; while true; do sleep 1; done #");
        pp.shutdown_wait = 1;
        let mut p = Plugin::new(pp);
        let mut out = Vec::new();
        p.service(&mut out);
        assert!(p.running());
        std::thread::sleep(Duration::from_millis(200));
        p.terminate();
        assert!(run_until(&mut p, &mut out, 10, |p, _| !p.running()));
    }

    #[test]
    fn restart_after_exit() {
        let mut pp = params("quitter", "exit 3 #");
        pp.start_retry = 0;
        let mut p = Plugin::new(pp);
        let mut out = Vec::new();
        p.service(&mut out);
        let first = p.pid();
        assert!(first.is_some());
        assert!(run_until(&mut p, &mut out, 10, |p, _| p.pid().is_some() && p.pid() != first));
        p.terminate();
        run_until(&mut p, &mut out, 10, |p, _| !p.running());
    }

    #[test]
    fn garbage_shuts_down() {
        let mut pp = params("garbage", "printf 'xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx' >&63; exec sleep 30 #");
        pp.shutdown_wait = 1;
        let mut p = Plugin::new(pp);
        let mut out = Vec::new();
        assert!(run_until(&mut p, &mut out, 10, |p, _| p.state() == PluginState::Terminating
            || p.state() == PluginState::Killed
            || p.state() == PluginState::Reaped));
        assert!(out.is_empty());
        p.terminate();
        assert!(run_until(&mut p, &mut out, 10, |p, _| !p.running()));
    }
}
