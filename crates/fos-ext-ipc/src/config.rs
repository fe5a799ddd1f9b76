//! IPC configuration

use std::time::Duration;

/// Renderer/host IPC settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcConfig {
    /// How long `runtime.connect` waits for the host to allocate a port
    pub request_timeout: Duration,
    /// Default wait used by [`IpcRenderer::pump_wait`](crate::IpcRenderer::pump_wait)
    pub pump_timeout: Duration,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            pump_timeout: Duration::from_secs(1),
        }
    }
}

impl IpcConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_pump_timeout(mut self, timeout: Duration) -> Self {
        self.pump_timeout = timeout;
        self
    }
}
