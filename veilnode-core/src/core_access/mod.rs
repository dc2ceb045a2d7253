//! Access control: authentication, integrity auditing and session state

pub mod access_gate;
pub mod integrity;
pub mod session;

pub use access_gate::{AccessGate, AccessGrant};
pub use integrity::{
    DeviceFingerprint, EnvironmentProbe, EnvironmentSignals, HostProbe, IntegrityAuditor,
    SecurityStatus, StaticProbe, TamperFlag, WindowMetrics,
};
pub use session::{LockReason, OperatingMode, SessionContext, SessionWatchers};
