//! Message sender identity

use serde::{Deserialize, Serialize};

use crate::TabId;

/// URL scheme of extension origins
pub const EXTENSION_SCHEME: &str = "chrome-extension";

/// Tab reference handed to listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tab {
    pub id: TabId,
}

impl Tab {
    pub fn new(id: TabId) -> Self {
        Self { id }
    }
}

/// Who sent a message or opened a port
///
/// `tab` is absent when the sender is not tab-scoped (a background page).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSender {
    pub tab: Option<Tab>,
    pub id: String,
    pub url: String,
}

impl MessageSender {
    pub fn new(tab_id: Option<TabId>, extension_id: &str) -> Self {
        Self {
            tab: tab_id.map(Tab::new),
            id: extension_id.to_string(),
            url: format!("{EXTENSION_SCHEME}://{extension_id}"),
        }
    }
}
