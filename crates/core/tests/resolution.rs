//! Cross-module resolution during discovery.

mod common;

use common::*;
use metascope_core::image::{ModuleIdentity, ModuleImage, TypeDef, TypeFlags, TypeRef};
use metascope_core::{DiscoveryConfig, HostPaths, Module, ModuleHandle, TypeDiscovery};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A host variant where `Host.Middle` either derives from the plugin base or not.
fn host_with_middle(middle_is_plugin: bool) -> ModuleImage {
    let middle = TypeDef::new("Host", "Middle").with_flags(TypeFlags::PUBLIC | TypeFlags::ABSTRACT);
    let middle = if middle_is_plugin {
        middle.with_base(TypeRef::local("Host", "BasePlugin"))
    } else {
        middle
    };
    host_image().with_type(middle)
}

/// A plugin module whose only type derives from `Host.Middle`.
fn write_indirect_plugin(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    let mut image = ModuleImage::new(ModuleIdentity::new("Indirect", v(1)));
    let host = image.add_reference(ModuleIdentity::new(HOST, v(1)));
    image.add_type(TypeDef::new("Mods", "ViaMiddle").with_base(TypeRef::external(host, "Host", "Middle")));
    image.write_to(&dir.join("Indirect.dll")).unwrap();
}

fn counting_hook(
    calls: Arc<AtomicUsize>,
    image: Option<ModuleImage>,
) -> impl Fn(&ModuleIdentity) -> Option<ModuleHandle> + Send + Sync {
    move |id: &ModuleIdentity| {
        calls.fetch_add(1, Ordering::SeqCst);
        image
            .as_ref()
            .filter(|i| i.identity.name == id.name)
            .map(|i| Arc::new(Module::from_image("/virtual/Host.Core.dll", i.clone())))
    }
}

#[test]
fn test_runtime_directory_wins_over_plugin_directory() {
    let temp = tempfile::tempdir().unwrap();
    let runtime = temp.path().join("runtime");
    let plugins = temp.path().join("plugins");
    let mods = temp.path().join("mods");
    std::fs::create_dir_all(&runtime).unwrap();
    std::fs::create_dir_all(&plugins).unwrap();
    host_with_middle(true)
        .write_to(&runtime.join("Host.Core.dll"))
        .unwrap();
    host_with_middle(false)
        .write_to(&plugins.join("Host.Core.dll"))
        .unwrap();
    write_indirect_plugin(&mods);

    let calls = Arc::new(AtomicUsize::new(0));
    let config = DiscoveryConfig::default()
        .with_cache_dir(temp.path().join("cache"))
        .with_paths(HostPaths {
            runtime_dir: Some(runtime),
            plugin_dir: Some(plugins),
            ..HostPaths::default()
        });
    let engine = TypeDiscovery::builder(config)
        .fallback(counting_hook(calls.clone(), None))
        .build();

    let types = engine.find_types(&mods, plugin_selector, None).unwrap();
    assert_eq!(types.len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_plugin_directory_used_when_runtime_lacks_module() {
    let temp = tempfile::tempdir().unwrap();
    let runtime = temp.path().join("runtime");
    let plugins = temp.path().join("plugins").join("nested");
    let mods = temp.path().join("mods");
    std::fs::create_dir_all(&runtime).unwrap();
    std::fs::create_dir_all(&plugins).unwrap();
    host_with_middle(true)
        .write_to(&plugins.join("host.core.DLL"))
        .unwrap();
    write_indirect_plugin(&mods);

    let config = DiscoveryConfig::default()
        .with_cache_dir(temp.path().join("cache"))
        .with_paths(HostPaths {
            runtime_dir: Some(runtime),
            plugin_dir: Some(temp.path().join("plugins")),
            ..HostPaths::default()
        });
    let types = TypeDiscovery::new(config)
        .find_types(&mods, plugin_selector, None)
        .unwrap();
    assert_eq!(types.len(), 1);
}

#[test]
fn test_fallback_hook_consulted_once_per_pass() {
    let temp = tempfile::tempdir().unwrap();
    let mods = temp.path().join("mods");
    write_indirect_plugin(&mods);
    std::fs::rename(mods.join("Indirect.dll"), mods.join("One.dll")).unwrap();
    write_indirect_plugin(&mods);

    let calls = Arc::new(AtomicUsize::new(0));
    let engine = TypeDiscovery::builder(
        DiscoveryConfig::default().with_cache_dir(temp.path().join("cache")),
    )
    .fallback(counting_hook(calls.clone(), Some(host_with_middle(true))))
    .build();

    let types = engine.find_types(&mods, plugin_selector, None).unwrap();
    assert_eq!(types.len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    engine.find_types(&mods, plugin_selector, None).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_unresolvable_base_is_left_to_selector() {
    let temp = tempfile::tempdir().unwrap();
    let mods = temp.path().join("mods");
    write_indirect_plugin(&mods);

    let engine = engine(&temp.path().join("cache"), None);
    let outcome = engine.scan(&mods, plugin_selector, None).unwrap();
    assert!(outcome.types.is_empty());
    assert_eq!(outcome.report.extracted, 1);
    assert_eq!(outcome.report.failed, 0);

    let errors = engine
        .find_types(
            &mods,
            |def: &metascope_core::TypeDefinition<'_>| def.derives_from(BASE_PLUGIN).err(),
            None,
        )
        .unwrap();
    let all: Vec<_> = errors.values().flatten().collect();
    assert_eq!(all.len(), 1);
    assert!(matches!(
        all[0],
        metascope_core::ResolveError::Unresolved(id) if id.name == HOST
    ));
}
