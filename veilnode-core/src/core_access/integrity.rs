//! Environment integrity auditing
//!
//! An [`IntegrityAuditor`] turns raw probe signals into a [`SecurityStatus`].
//! The status is a policy input only; acting on it is the session's job.

use crate::config::IntegrityConfig;
use crate::core_crypto::KeystoreError;
use crate::core_store::model::Timestamp;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Platform strings that indicate an emulator or simulator
pub const EMULATOR_MARKERS: [&str; 4] = ["android emulator", "google-sdk", "google_sdk", "simulator"];

/// Raw signals sampled from the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvironmentSignals {
    pub emulator_suspected: bool,
    pub debugger_suspected: bool,
    pub tampered: bool,
}

/// Source of environment signals
pub trait EnvironmentProbe: Send + Sync {
    fn sample(&self, debugger_threshold_px: u32) -> EnvironmentSignals;
}

/// Process-wide tamper marker. Once raised it stays raised.
#[derive(Debug, Clone, Default)]
pub struct TamperFlag(Arc<AtomicBool>);

impl TamperFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        if !self.0.swap(true, Ordering::SeqCst) {
            warn!("tamper flag raised");
        }
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outer and inner window dimensions reported by the host UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowMetrics {
    pub outer_width: u32,
    pub outer_height: u32,
    pub inner_width: u32,
    pub inner_height: u32,
}

impl WindowMetrics {
    /// A docked inspector shrinks the inner area well below the outer one
    pub fn suggests_debugger(&self, threshold_px: u32) -> bool {
        self.outer_width.saturating_sub(self.inner_width) > threshold_px
            || self.outer_height.saturating_sub(self.inner_height) > threshold_px
    }
}

/// Probe backed by the running host
pub struct HostProbe {
    descriptor: String,
    check_tracer: bool,
    window: watch::Sender<Option<WindowMetrics>>,
    tamper: TamperFlag,
}

impl HostProbe {
    /// Describe the platform from DMI data and `VEILNODE_PLATFORM`
    pub fn new(tamper: TamperFlag) -> Self {
        let mut parts = Vec::new();
        for path in [
            "/sys/class/dmi/id/product_name",
            "/sys/class/dmi/id/sys_vendor",
        ] {
            if let Ok(value) = fs::read_to_string(path) {
                parts.push(value.trim().to_string());
            }
        }
        if let Ok(value) = std::env::var("VEILNODE_PLATFORM") {
            parts.push(value);
        }
        let mut probe = Self::with_descriptor(parts.join(" "), tamper);
        probe.check_tracer = true;
        probe
    }

    /// Probe with an explicit platform description and no tracer check
    pub fn with_descriptor(descriptor: impl Into<String>, tamper: TamperFlag) -> Self {
        let (window, _) = watch::channel(None);
        Self {
            descriptor: descriptor.into().to_lowercase(),
            check_tracer: false,
            window,
            tamper,
        }
    }

    /// Latest window dimensions from the UI layer
    pub fn update_window(&self, metrics: WindowMetrics) {
        self.window.send_replace(Some(metrics));
    }

    pub fn tamper_flag(&self) -> &TamperFlag {
        &self.tamper
    }
}

impl EnvironmentProbe for HostProbe {
    fn sample(&self, debugger_threshold_px: u32) -> EnvironmentSignals {
        let emulator_suspected = EMULATOR_MARKERS
            .iter()
            .any(|marker| self.descriptor.contains(marker));
        let window_debugger = self
            .window
            .borrow()
            .map(|m| m.suggests_debugger(debugger_threshold_px))
            .unwrap_or(false);
        let tracer = self.check_tracer && tracer_attached();

        EnvironmentSignals {
            emulator_suspected,
            debugger_suspected: window_debugger || tracer,
            tampered: self.tamper.is_raised(),
        }
    }
}

/// Non-zero `TracerPid` means something is ptrace-attached
fn tracer_attached() -> bool {
    fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| {
            status
                .lines()
                .find_map(|line| line.strip_prefix("TracerPid:"))
                .map(|pid| pid.trim() != "0")
        })
        .unwrap_or(false)
}

/// Probe returning signals set by the caller
pub struct StaticProbe {
    signals: watch::Sender<EnvironmentSignals>,
}

impl StaticProbe {
    pub fn new(signals: EnvironmentSignals) -> Self {
        let (tx, _) = watch::channel(signals);
        Self { signals: tx }
    }

    /// A clean environment
    pub fn clean() -> Self {
        Self::new(EnvironmentSignals::default())
    }

    pub fn set(&self, signals: EnvironmentSignals) {
        self.signals.send_replace(signals);
    }
}

impl EnvironmentProbe for StaticProbe {
    fn sample(&self, _debugger_threshold_px: u32) -> EnvironmentSignals {
        *self.signals.borrow()
    }
}

/// Stable per-device identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DeviceFingerprint(String);

impl DeviceFingerprint {
    pub const PREFIX: &'static str = "dev_";

    fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::RngCore::fill_bytes(&mut rand::rng(), &mut bytes);
        DeviceFingerprint(format!("{}{}", Self::PREFIX, hex::encode(bytes)))
    }

    /// Read the fingerprint stored at `path`, creating it on first use
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, KeystoreError> {
        let path = path.as_ref();
        if path.exists() {
            let stored = fs::read_to_string(path)?.trim().to_string();
            if !stored.starts_with(Self::PREFIX) || stored.len() <= Self::PREFIX.len() {
                return Err(KeystoreError::Corrupted(format!(
                    "device fingerprint at {}",
                    path.display()
                )));
            }
            return Ok(DeviceFingerprint(stored));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let fingerprint = Self::generate();
        fs::write(path, &fingerprint.0)?;
        debug!(path = %path.display(), "device fingerprint created");
        Ok(fingerprint)
    }

    /// Fresh fingerprint that is never persisted
    pub fn ephemeral() -> Self {
        Self::generate()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of one audit. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStatus {
    pub emulator_suspected: bool,
    pub debugger_suspected: bool,
    pub tampered: bool,
    pub integrity_ok: bool,
    pub last_audit_time: Timestamp,
    pub device_fingerprint: DeviceFingerprint,
}

/// Samples the environment and derives a [`SecurityStatus`]
pub struct IntegrityAuditor {
    probe: Arc<dyn EnvironmentProbe>,
    config: IntegrityConfig,
    fingerprint: DeviceFingerprint,
}

impl IntegrityAuditor {
    pub fn new(
        probe: Arc<dyn EnvironmentProbe>,
        config: IntegrityConfig,
        fingerprint: DeviceFingerprint,
    ) -> Self {
        Self {
            probe,
            config,
            fingerprint,
        }
    }

    pub fn fingerprint(&self) -> &DeviceFingerprint {
        &self.fingerprint
    }

    pub fn audit(&self) -> SecurityStatus {
        let signals = self.probe.sample(self.config.debugger_threshold_px);
        let debugger_counts = self.config.debugger_fails_integrity && signals.debugger_suspected;
        let integrity_ok = !signals.emulator_suspected && !signals.tampered && !debugger_counts;

        if !integrity_ok {
            warn!(
                emulator = signals.emulator_suspected,
                debugger = signals.debugger_suspected,
                tampered = signals.tampered,
                "integrity audit failed"
            );
        }

        SecurityStatus {
            emulator_suspected: signals.emulator_suspected,
            debugger_suspected: signals.debugger_suspected,
            tampered: signals.tampered,
            integrity_ok,
            last_audit_time: Timestamp::now(),
            device_fingerprint: self.fingerprint.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn auditor(probe: Arc<dyn EnvironmentProbe>, config: IntegrityConfig) -> IntegrityAuditor {
        IntegrityAuditor::new(probe, config, DeviceFingerprint::ephemeral())
    }

    #[test]
    fn test_emulator_markers() {
        let probe = HostProbe::with_descriptor("Android Emulator x86_64", TamperFlag::new());
        assert!(probe.sample(180).emulator_suspected);

        let probe = HostProbe::with_descriptor("ThinkPad X1 LENOVO", TamperFlag::new());
        assert!(!probe.sample(180).emulator_suspected);
    }

    #[test]
    fn test_window_heuristic() {
        let probe = HostProbe::with_descriptor("", TamperFlag::new());
        assert!(!probe.sample(180).debugger_suspected);

        probe.update_window(WindowMetrics {
            outer_width: 1600,
            outer_height: 900,
            inner_width: 1400,
            inner_height: 880,
        });
        assert!(probe.sample(180).debugger_suspected);
        assert!(!probe.sample(250).debugger_suspected);
    }

    #[test]
    fn test_debugger_ignored_by_default() {
        let probe = Arc::new(StaticProbe::new(EnvironmentSignals {
            debugger_suspected: true,
            ..Default::default()
        }));
        let status = auditor(probe.clone(), IntegrityConfig::default()).audit();
        assert!(status.debugger_suspected);
        assert!(status.integrity_ok);

        let strict = IntegrityConfig {
            debugger_fails_integrity: true,
            ..Default::default()
        };
        assert!(!auditor(probe, strict).audit().integrity_ok);
    }

    #[test]
    fn test_tamper_fails_integrity() {
        let tamper = TamperFlag::new();
        let probe = Arc::new(HostProbe::with_descriptor("", tamper.clone()));
        let auditor = auditor(probe, IntegrityConfig::default());
        assert!(auditor.audit().integrity_ok);

        tamper.raise();
        let status = auditor.audit();
        assert!(status.tampered);
        assert!(!status.integrity_ok);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("device").join("fingerprint");
        let first = DeviceFingerprint::load_or_create(&path).unwrap();
        let second = DeviceFingerprint::load_or_create(&path).unwrap();
        assert_eq!(first, second);
        assert!(first.as_str().starts_with("dev_"));
        assert_eq!(first.as_str().len(), 4 + 32);
    }

    #[test]
    fn test_corrupted_fingerprint_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fingerprint");
        fs::write(&path, "garbage").unwrap();
        assert!(DeviceFingerprint::load_or_create(&path).is_err());
    }
}
