//! Capability gate consulted before a countdown may start.

use async_trait::async_trait;

/// Asks the user (or policy) for the capability a countdown needs, such as
/// permission to post a completion notification.
#[async_trait]
pub trait CapabilityGate: Send + Sync {
    /// Resolve to `true` when the capability is granted.
    async fn request(&self) -> bool;
}

/// A gate with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct StaticGate {
    granted: bool,
}

impl StaticGate {
    pub fn granted() -> Self {
        Self { granted: true }
    }

    pub fn denied() -> Self {
        Self { granted: false }
    }
}

#[async_trait]
impl CapabilityGate for StaticGate {
    async fn request(&self) -> bool {
        self.granted
    }
}
