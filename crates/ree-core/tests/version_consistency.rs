//! Ensures all workspace crates use `version.workspace = true` and that
//! the workspace version is consistent across all Cargo.toml files.

use std::path::{Path, PathBuf};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(Path::parent)
        .unwrap()
        .to_path_buf()
}

fn read_toml(path: &Path) -> toml::Value {
    let raw = std::fs::read_to_string(path).unwrap();
    raw.parse().unwrap()
}

#[test]
fn all_crates_use_workspace_version() {
    let root = workspace_root();
    let ws = read_toml(&root.join("Cargo.toml"));
    let members = ws["workspace"]["members"].as_array().unwrap();
    assert!(!members.is_empty());

    for member in members {
        let member = member.as_str().unwrap();
        let doc = read_toml(&root.join(member).join("Cargo.toml"));
        let inherited = doc["package"]["version"]
            .as_table()
            .and_then(|t| t.get("workspace"))
            .and_then(|v| v.as_bool());
        assert_eq!(
            inherited,
            Some(true),
            "{member} should use version.workspace = true"
        );
    }
}

#[test]
fn workspace_version_matches_cargo_pkg() {
    let ws = read_toml(&workspace_root().join("Cargo.toml"));
    let ws_version = ws["workspace"]["package"]["version"].as_str().unwrap();
    assert_eq!(ws_version, env!("CARGO_PKG_VERSION"));
}

#[test]
fn internal_dependency_pins_match_workspace_version() {
    let ws = read_toml(&workspace_root().join("Cargo.toml"));
    let deps = ws["workspace"]["dependencies"].as_table().unwrap();
    for name in ["ree-store", "ree-core"] {
        let pinned = deps[name]["version"].as_str().unwrap();
        assert_eq!(pinned, env!("CARGO_PKG_VERSION"), "{name}");
    }
}
