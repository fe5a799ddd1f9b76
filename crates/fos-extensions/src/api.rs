//! Extension API injection
//!
//! Assembles the namespaces an extension context sees.

use std::rc::Rc;

use crate::ids::IdGenerator;
use crate::runtime::Runtime;
use crate::tabs::Tabs;
use crate::transport::Transport;
use crate::ContextKind;

/// Extension API bound to one context
#[derive(Debug, Clone)]
pub struct ExtensionApi {
    pub runtime: Runtime,
    pub tabs: Tabs,
}

impl ExtensionApi {
    /// Install the API for `extension_id` running as `context`
    pub fn inject(extension_id: &str, context: ContextKind, transport: Rc<dyn Transport>) -> Self {
        tracing::debug!("Injecting extension API for {} ({:?})", extension_id, context);

        let request_ids = Rc::new(IdGenerator::new());
        Self {
            runtime: Runtime::install(extension_id, context, Rc::clone(&transport)),
            tabs: Tabs::install(extension_id, context, transport, request_ids),
        }
    }

    /// `chrome.extension`: `getURL`, `connect`, `onConnect`, `sendMessage`
    /// and `onMessage` are the runtime's own
    pub fn extension(&self) -> &Runtime {
        &self.runtime
    }

    pub fn id(&self) -> &str {
        self.runtime.id()
    }
}
