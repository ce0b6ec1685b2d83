//! Ready-made module-level filters for discovery passes.
//!
//! A filter sees the opened module before any type is visited; returning `false`
//! skips the module entirely.

use crate::module::Module;

pub type ModuleFilter = Box<dyn Fn(&Module) -> bool + Send + Sync>;

/// Keep modules that declare a reference to `name` (ASCII case-insensitive).
///
/// Plugin scans typically use this to skip every module that cannot possibly derive
/// from a host type.
pub fn references_module(name: impl Into<String>) -> ModuleFilter {
    let name = name.into();
    Box::new(move |module: &Module| {
        module
            .references()
            .iter()
            .any(|r| r.name.eq_ignore_ascii_case(&name))
    })
}

/// Skip modules whose own identity name is one of `names`.
pub fn not_named<I, S>(names: I) -> ModuleFilter
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let names: Vec<String> = names.into_iter().map(Into::into).collect();
    Box::new(move |module: &Module| {
        let own = &module.identity().name;
        !names.iter().any(|n| n.eq_ignore_ascii_case(own))
    })
}

/// Keep modules accepted by at least one of `filters`.
pub fn any_of(filters: Vec<ModuleFilter>) -> ModuleFilter {
    Box::new(move |module: &Module| filters.iter().any(|f| f(module)))
}

/// Keep modules accepted by every one of `filters`.
pub fn all_of(filters: Vec<ModuleFilter>) -> ModuleFilter {
    Box::new(move |module: &Module| filters.iter().all(|f| f(module)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use metascope_image::{ModuleIdentity, ModuleImage};

    fn module(name: &str, references: &[&str]) -> Module {
        let mut image = ModuleImage::new(ModuleIdentity::named(name));
        for r in references {
            image.add_reference(ModuleIdentity::named(*r));
        }
        Module::from_image(format!("/virtual/{name}.dll"), image)
    }

    #[test]
    fn test_references_module() {
        let filter = references_module("Host.Core");
        assert!(filter(&module("Plugin", &["System", "host.core"])));
        assert!(!filter(&module("Tool", &["System"])));
    }

    #[test]
    fn test_not_named() {
        let filter = not_named(["Host.Core", "System"]);
        assert!(!filter(&module("host.core", &[])));
        assert!(filter(&module("Plugin", &["Host.Core"])));
    }

    #[test]
    fn test_combinators() {
        let either = any_of(vec![references_module("A"), references_module("B")]);
        assert!(either(&module("X", &["B"])));
        assert!(!either(&module("X", &["C"])));

        let both = all_of(vec![references_module("A"), not_named(["Skip"])]);
        assert!(both(&module("Keep", &["A"])));
        assert!(!both(&module("Skip", &["A"])));
        assert!(all_of(vec![])(&module("Any", &[])));
    }
}
