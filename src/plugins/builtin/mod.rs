//! Format-agnostic plugins shipped with the binary.

mod file_hashes;
mod file_inventory;

use std::sync::Arc;

pub use file_hashes::FileHashes;
pub use file_inventory::FileInventory;

use crate::plugins::{EntryPoints, PluginCandidate, PluginInfo};

pub const FILE_INVENTORY: &str = "file_inventory";
pub const FILE_HASHES: &str = "file_hashes";
pub const FILE_SYSTEM_CATEGORY: &str = "File System";

/// Entry points manifests can refer to by `function` name.
pub fn entry_points() -> EntryPoints {
    let mut entry_points = EntryPoints::new();
    entry_points
        .register(FILE_INVENTORY, Arc::new(FileInventory))
        .register(FILE_HASHES, Arc::new(FileHashes::default()));
    entry_points
}

/// Descriptors for the built-in plugins, run when no manifest is given.
pub fn candidates() -> Vec<PluginCandidate> {
    let mut inventory =
        PluginCandidate::named(FILE_INVENTORY, FILE_SYSTEM_CATEGORY, &["*"], FILE_INVENTORY);
    inventory.name = "File Inventory".to_string();
    inventory.info = PluginInfo {
        description: "Timeline of modification and creation times of every file".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ..PluginInfo::default()
    };

    let mut hashes = PluginCandidate::named(FILE_HASHES, FILE_SYSTEM_CATEGORY, &["*"], FILE_HASHES);
    hashes.name = "File Hashes".to_string();
    hashes.info = PluginInfo {
        description: "SHA-256 manifest of every file".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ..PluginInfo::default()
    };

    vec![inventory, hashes]
}
