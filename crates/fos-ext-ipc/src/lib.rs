//! fOS Extension IPC
//!
//! Connects extension contexts (renderers) to a privileged host over
//! in-process channels. The host routes ports and one-shot messages between
//! background pages and content scripts; each renderer is a
//! [`fos_extensions::Transport`].

mod config;
mod host;
mod protocol;
mod renderer;

pub use config::IpcConfig;
pub use host::{HostHandle, HostProcess, ScriptRunner};
pub use protocol::{ContextId, Delivery};
pub use renderer::IpcRenderer;
