#![allow(dead_code)]

use metascope_core::image::{
    Attribute, AttributeValue, ModuleIdentity, ModuleImage, ModuleVersion, TypeDef, TypeFlags,
    TypeRef,
};
use metascope_core::{CacheableRecord, DiscoveryConfig, TypeDefinition, TypeDiscovery};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

pub const HOST: &str = "Host.Core";
pub const BASE_PLUGIN: &str = "Host.BasePlugin";
pub const PLUGIN_INFO: &str = "Host.PluginInfoAttribute";

/// Record produced by [`plugin_selector`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRecord {
    pub type_name: String,
    pub guid: Option<String>,
}

impl CacheableRecord for PluginRecord {
    const SCHEMA: &'static str = "tests.plugin";
}

/// Selects concrete types deriving from the host plugin base, through any number of
/// intermediate bases. Unresolvable chains are treated as non-matching.
pub fn plugin_selector(def: &TypeDefinition<'_>) -> Option<PluginRecord> {
    if def.is_abstract() || !def.derives_from(BASE_PLUGIN).unwrap_or(false) {
        return None;
    }
    let guid = def
        .attribute(PLUGIN_INFO)
        .and_then(|a| a.args.first())
        .and_then(AttributeValue::as_str)
        .map(str::to_string);
    Some(PluginRecord {
        type_name: def.full_name(),
        guid,
    })
}

pub fn v(major: u16) -> ModuleVersion {
    ModuleVersion::new(major, 0, 0, 0)
}

/// The host module: an abstract plugin base and the plugin metadata attribute.
pub fn host_image() -> ModuleImage {
    ModuleImage::new(ModuleIdentity::new(HOST, v(1)))
        .with_type(TypeDef::new("Host", "BasePlugin").with_flags(TypeFlags::PUBLIC | TypeFlags::ABSTRACT))
        .with_type(TypeDef::new("Host", "PluginInfoAttribute"))
}

pub fn write_host(dir: &Path) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(format!("{HOST}.dll"));
    host_image().write_to(&path).unwrap();
    path
}

/// A module whose `plugins` derive directly from the host base and whose `others`
/// derive from nothing. Types are declared plugins first, in the given order.
pub fn plugin_image(name: &str, plugins: &[&str], others: &[&str]) -> ModuleImage {
    let mut image = ModuleImage::new(ModuleIdentity::new(name, v(1)));
    let host = image.add_reference(ModuleIdentity::new(HOST, v(1)));
    for plugin in plugins {
        image.add_type(
            TypeDef::new("Mods", *plugin)
                .with_base(TypeRef::external(host, "Host", "BasePlugin"))
                .with_attribute(
                    Attribute::new(TypeRef::external(host, "Host", "PluginInfoAttribute"))
                        .with_arg(AttributeValue::Str(format!("com.mods.{}", plugin.to_lowercase()))),
                ),
        );
    }
    for other in others {
        image.add_type(TypeDef::new("Mods", *other));
    }
    image
}

pub fn write_plugin(dir: &Path, name: &str, plugins: &[&str], others: &[&str]) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(format!("{name}.dll"));
    plugin_image(name, plugins, others).write_to(&path).unwrap();
    path
}

pub fn write_garbage(dir: &Path, file: &str) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(file);
    std::fs::write(&path, b"MZ\x90\x00 this is not a module image").unwrap();
    path
}

/// Move the file's modification time forward without touching its contents.
pub fn touch(path: &Path) {
    let current = std::fs::metadata(path).unwrap().modified().unwrap();
    let later = current.max(SystemTime::now()) + Duration::from_secs(5);
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(later)
        .unwrap();
}

/// Engine with the cache under `cache_dir` and the given runtime directory.
pub fn engine(cache_dir: &Path, runtime_dir: Option<&Path>) -> TypeDiscovery {
    let mut config = DiscoveryConfig::default().with_cache_dir(cache_dir);
    config.paths.runtime_dir = runtime_dir.map(Path::to_path_buf);
    TypeDiscovery::new(config)
}

/// Type names in a result, in key then declaration order.
pub fn names<T>(types: &metascope_core::TypeMap<T>, f: impl Fn(&T) -> &str) -> Vec<String> {
    types
        .values()
        .flat_map(|items| items.iter().map(|i| f(i).to_string()))
        .collect()
}
