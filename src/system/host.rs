//! Best-effort Linux implementation of the system collaborator
//!
//! Idle time comes from `xprintidle` (X11); power requests and the shutdown
//! block are held as `systemd-inhibit` child processes that die with us; the
//! terminal shutdown goes through `systemctl`. Hosts with a different
//! integration supply their own [`SystemService`].

use std::{
    collections::HashMap,
    process::{Child, Command, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::Instant,
};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::{
    require_priority, require_reason, PowerRequestHandle, PowerRequestKind, ShutdownBlock,
    SystemService,
};

/// System collaborator backed by stock Linux tooling.
pub struct HostSystem {
    epoch: Instant,
    probe_warned: AtomicBool,
}

impl HostSystem {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            probe_warned: AtomicBool::new(false),
        }
    }

    fn spawn_inhibit(what: &str, mode: &str, why: &str) -> Result<Option<Child>> {
        // The child holds the inhibitor lock for as long as it lives.
        let spawned = Command::new("systemd-inhibit")
            .arg(format!("--what={what}"))
            .arg("--who=last-call")
            .arg(format!("--why={why}"))
            .arg(format!("--mode={mode}"))
            .args(["sleep", "infinity"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            Ok(child) => Ok(Some(child)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("systemd-inhibit not found; {} inhibitor is a no-op", what);
                Ok(None)
            }
            Err(e) => Err(Error::native("systemd-inhibit", e.raw_os_error().unwrap_or(-1))),
        }
    }
}

impl Default for HostSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SystemService for HostSystem {
    fn ticks(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    async fn last_input(&self) -> Result<u64> {
        // xprintidle prints milliseconds since the last input event.
        let output = tokio::process::Command::new("xprintidle")
            .output()
            .await
            .map_err(|e| Error::native("xprintidle", e.raw_os_error().unwrap_or(-1)))?;

        if !output.status.success() {
            if !self.probe_warned.swap(true, Ordering::Relaxed) {
                warn!("xprintidle failed; idle time is unavailable until it succeeds");
            }
            return Ok(0);
        }

        let idle: u64 = String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .map_err(|_| Error::native("xprintidle", -1))?;

        // Idle spans reaching back past our epoch clamp to just after it;
        // 0 stays reserved for "unknown".
        Ok(self.ticks().saturating_sub(idle).max(1))
    }

    fn create_power_request(&self, reason: &str) -> Result<Box<dyn PowerRequestHandle>> {
        require_reason(reason)?;

        info!("creating power request: {}", reason);
        Ok(Box::new(InhibitPowerRequest {
            why: reason.to_string(),
            children: Mutex::new(HashMap::new()),
        }))
    }

    fn block_shutdown(&self, _window: isize, reason: &str) -> Result<Box<dyn ShutdownBlock>> {
        require_reason(reason)?;

        // Window handles only matter on hosts whose registration is
        // window-scoped; logind inhibitors are process-scoped.
        let child = Self::spawn_inhibit("shutdown", "delay", reason)?;
        info!("shutdown block registered: {}", reason);
        Ok(Box::new(InhibitShutdownBlock { child }))
    }

    fn set_shutdown_priority(&self, priority: i32) -> Result<()> {
        require_priority(priority)?;

        // No Linux counterpart; the contract makes this best-effort anyway.
        debug!("shutdown priority {:#x} requested; not supported on this host", priority);
        Ok(())
    }

    async fn shutdown(&self, restart: bool) -> Result<()> {
        let verb = if restart { "reboot" } else { "poweroff" };
        info!("requesting system {}", verb);

        let output = tokio::process::Command::new("systemctl")
            .arg(verb)
            .output()
            .await
            .map_err(|e| Error::native("systemctl", e.raw_os_error().unwrap_or(-1)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("systemctl {} failed: {}", verb, stderr.trim());
            return Err(Error::native("systemctl", output.status.code().unwrap_or(-1)));
        }

        Ok(())
    }
}

/// Power request held as one `systemd-inhibit` child per requirement kind.
struct InhibitPowerRequest {
    why: String,
    children: Mutex<HashMap<PowerRequestKind, Option<Child>>>,
}

impl InhibitPowerRequest {
    fn what(kind: PowerRequestKind) -> &'static str {
        match kind {
            PowerRequestKind::DisplayRequired => "idle",
            PowerRequestKind::SystemRequired => "sleep:idle",
        }
    }
}

impl PowerRequestHandle for InhibitPowerRequest {
    fn set(&self, kind: PowerRequestKind) -> Result<()> {
        let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        if children.contains_key(&kind) {
            return Ok(());
        }

        let child = HostSystem::spawn_inhibit(Self::what(kind), "block", &self.why)?;
        children.insert(kind, child);
        debug!("power requirement {:?} set", kind);
        Ok(())
    }

    fn clear(&self, kind: PowerRequestKind) -> Result<()> {
        let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(child) = children.remove(&kind).flatten() {
            release(child);
        }
        debug!("power requirement {:?} cleared", kind);
        Ok(())
    }
}

impl Drop for InhibitPowerRequest {
    fn drop(&mut self) {
        let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        for (_, child) in children.drain() {
            if let Some(child) = child {
                release(child);
            }
        }
    }
}

/// Shutdown-block token backed by a delay-mode inhibitor child.
struct InhibitShutdownBlock {
    child: Option<Child>,
}

impl ShutdownBlock for InhibitShutdownBlock {}

impl Drop for InhibitShutdownBlock {
    fn drop(&mut self) {
        if let Some(child) = self.child.take() {
            release(child);
        }
    }
}

fn release(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}
