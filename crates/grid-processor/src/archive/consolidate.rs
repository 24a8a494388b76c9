//! Consolidated metadata for the archive root.
//!
//! The root `zarr.json` carries an inline `consolidated_metadata` object with
//! the metadata of every group and array below it, so readers can open the
//! whole hierarchy with a single read.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{GridProcessorError, Result};

const METADATA_FILE: &str = "zarr.json";

fn is_hidden_or_journal(name: &str) -> bool {
    name.starts_with('.') || name.ends_with(".prev") || name.ends_with(".next")
}

/// Collect the metadata of every node below `root`, keyed by its path
/// relative to the root.
pub fn collect_node_metadata(root: &Path) -> Result<BTreeMap<String, Value>> {
    let mut nodes = BTreeMap::new();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir() && is_hidden_or_journal(&e.file_name().to_string_lossy()))
        });

    for entry in walker {
        let entry = entry.map_err(|e| GridProcessorError::store_write(e.to_string()))?;
        if !entry.file_type().is_file() || entry.file_name() != METADATA_FILE {
            continue;
        }
        let node_dir = match entry.path().parent() {
            Some(p) if p != root => p,
            _ => continue,
        };
        let key = node_dir
            .strip_prefix(root)
            .map_err(|e| GridProcessorError::store_write(e.to_string()))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        let text = fs::read_to_string(entry.path())?;
        let mut meta: Value = serde_json::from_str(&text)?;
        // Nested consolidation is not meaningful inside an inline block
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("consolidated_metadata");
        }
        nodes.insert(key, meta);
    }

    Ok(nodes)
}

/// Rewrite the root group metadata with an inline consolidated block.
///
/// The new document is written to a temporary file and renamed over
/// `zarr.json`, so readers never observe a partial write.
pub fn consolidate(root: &Path) -> Result<usize> {
    let nodes = collect_node_metadata(root)?;
    let root_meta_path = root.join(METADATA_FILE);

    let attributes = match fs::read_to_string(&root_meta_path) {
        Ok(text) => serde_json::from_str::<Value>(&text)?
            .get("attributes")
            .cloned()
            .unwrap_or_else(|| json!({})),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => json!({}),
        Err(e) => return Err(e.into()),
    };

    let count = nodes.len();
    let doc = json!({
        "zarr_format": 3,
        "node_type": "group",
        "attributes": attributes,
        "consolidated_metadata": {
            "kind": "inline",
            "must_understand": false,
            "metadata": nodes,
        },
    });

    let tmp = root.join(format!(".{}.{}.tmp", METADATA_FILE, uuid::Uuid::new_v4()));
    fs::write(&tmp, serde_json::to_vec_pretty(&doc)?)?;
    if let Err(e) = fs::rename(&tmp, &root_meta_path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }

    debug!(root = %root.display(), nodes = count, "Consolidated archive metadata");
    Ok(count)
}

/// Read the consolidated block of the root group, if present.
pub fn read_consolidated(root: &Path) -> Result<Option<BTreeMap<String, Value>>> {
    let text = match fs::read_to_string(root.join(METADATA_FILE)) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(GridProcessorError::archive_unavailable(e.to_string())),
    };
    let doc: Value = serde_json::from_str(&text)
        .map_err(|e| GridProcessorError::archive_unavailable(e.to_string()))?;
    match doc.pointer("/consolidated_metadata/metadata") {
        Some(meta) => Ok(Some(
            serde_json::from_value(meta.clone())
                .map_err(|e| GridProcessorError::archive_unavailable(e.to_string()))?,
        )),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(dir: &Path, node_type: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join(METADATA_FILE),
            json!({"zarr_format": 3, "node_type": node_type}).to_string(),
        )
        .unwrap();
    }

    #[test]
    fn test_consolidate_lists_nodes_and_skips_journal() {
        let root = tempfile::tempdir().unwrap();
        node(&root.path().join("nside_8"), "group");
        node(&root.path().join("nside_8/t"), "array");
        node(&root.path().join("nside_8/time"), "array");
        node(&root.path().join("nside_8/time.next"), "array");
        node(&root.path().join("nside_16.prev"), "group");
        node(&root.path().join(".staging/nside_16.abc"), "group");

        assert_eq!(consolidate(root.path()).unwrap(), 3);

        let meta = read_consolidated(root.path()).unwrap().unwrap();
        let keys: Vec<&str> = meta.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["nside_8", "nside_8/t", "nside_8/time"]);
        assert_eq!(meta["nside_8/t"]["node_type"], "array");

        let root_doc: Value =
            serde_json::from_str(&fs::read_to_string(root.path().join(METADATA_FILE)).unwrap())
                .unwrap();
        assert_eq!(root_doc["node_type"], "group");
        assert_eq!(root_doc["consolidated_metadata"]["kind"], "inline");
        assert_eq!(root_doc["consolidated_metadata"]["must_understand"], false);
    }

    #[test]
    fn test_consolidate_preserves_root_attributes() {
        let root = tempfile::tempdir().unwrap();
        fs::write(
            root.path().join(METADATA_FILE),
            json!({"zarr_format": 3, "node_type": "group", "attributes": {"title": "era5"}})
                .to_string(),
        )
        .unwrap();
        node(&root.path().join("nside_8"), "group");

        consolidate(root.path()).unwrap();
        consolidate(root.path()).unwrap();

        let doc: Value =
            serde_json::from_str(&fs::read_to_string(root.path().join(METADATA_FILE)).unwrap())
                .unwrap();
        assert_eq!(doc["attributes"]["title"], "era5");
        assert_eq!(
            doc["consolidated_metadata"]["metadata"]
                .as_object()
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_read_consolidated_absent() {
        let root = tempfile::tempdir().unwrap();
        assert!(read_consolidated(root.path()).unwrap().is_none());
    }
}
