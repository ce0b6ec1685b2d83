//! Read-only inspection views over parsed modules.
//!
//! A [`Module`] is an opened image plus the path it came from. Selectors never see
//! the raw image tables directly; they get a [`TypeDefinition`], which borrows the
//! module for the duration of one selector call and can follow references into
//! other modules through a [`ModuleResolver`].

use crate::resolver::{ModuleResolver, ResolveError};
use metascope_image::{
    Attribute, ImageError, Member, ModuleIdentity, ModuleImage, TypeDef, TypeFlags, TypeRef,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Maximum number of base types followed by [`TypeDefinition::derives_from`].
pub const MAX_BASE_DEPTH: usize = 64;

/// An opened module image.
#[derive(Debug)]
pub struct Module {
    path: PathBuf,
    image: ModuleImage,
}

/// Shared handle to an opened module. Dropping the last handle releases it.
pub type ModuleHandle = Arc<Module>;

impl Module {
    /// Open the image at `path` in structure-only mode.
    pub fn open(path: &Path) -> Result<Self, ImageError> {
        let image = ModuleImage::open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            image,
        })
    }

    /// Open the image at `path` and wrap it in a handle.
    pub fn open_handle(path: &Path) -> Result<ModuleHandle, ImageError> {
        Self::open(path).map(Arc::new)
    }

    /// Wrap an already-parsed image, e.g. one produced by a fallback resolver.
    pub fn from_image(path: impl Into<PathBuf>, image: ModuleImage) -> Self {
        Self {
            path: path.into(),
            image,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn image(&self) -> &ModuleImage {
        &self.image
    }

    pub fn identity(&self) -> &ModuleIdentity {
        &self.image.identity
    }

    pub fn references(&self) -> &[ModuleIdentity] {
        &self.image.references
    }

    pub fn type_count(&self) -> usize {
        self.image.types.len()
    }
}

/// Iterate the top-level type table of `module` as inspection views.
pub fn type_definitions<'a>(
    module: &'a ModuleHandle,
    resolver: &'a dyn ModuleResolver,
) -> impl Iterator<Item = TypeDefinition<'a>> + 'a {
    module
        .image
        .types
        .iter()
        .map(move |def| TypeDefinition::new(module, def, None, resolver))
}

/// Inspection view of one type definition.
#[derive(Clone)]
pub struct TypeDefinition<'a> {
    module: &'a ModuleHandle,
    def: &'a TypeDef,
    /// Full name of the declaring type for nested definitions.
    outer: Option<String>,
    resolver: &'a dyn ModuleResolver,
}

impl<'a> TypeDefinition<'a> {
    pub fn new(
        module: &'a ModuleHandle,
        def: &'a TypeDef,
        outer: Option<String>,
        resolver: &'a dyn ModuleResolver,
    ) -> Self {
        Self {
            module,
            def,
            outer,
            resolver,
        }
    }

    pub fn module(&self) -> &'a Module {
        self.module
    }

    pub fn definition(&self) -> &'a TypeDef {
        self.def
    }

    pub fn namespace(&self) -> &'a str {
        &self.def.namespace
    }

    pub fn name(&self) -> &'a str {
        &self.def.name
    }

    /// `Namespace.Name`, or `Outer+Name` for nested types.
    pub fn full_name(&self) -> String {
        match &self.outer {
            Some(outer) => format!("{outer}+{}", self.def.name),
            None => self.def.full_name(),
        }
    }

    pub fn is_nested(&self) -> bool {
        self.outer.is_some()
    }

    pub fn flags(&self) -> TypeFlags {
        self.def.flags
    }

    pub fn is_public(&self) -> bool {
        self.def.flags.contains(TypeFlags::PUBLIC)
    }

    pub fn is_abstract(&self) -> bool {
        self.def.flags.contains(TypeFlags::ABSTRACT)
    }

    pub fn is_interface(&self) -> bool {
        self.def.flags.contains(TypeFlags::INTERFACE)
    }

    pub fn base(&self) -> Option<&'a TypeRef> {
        self.def.base.as_ref()
    }

    pub fn interfaces(&self) -> &'a [TypeRef] {
        &self.def.interfaces
    }

    pub fn attributes(&self) -> &'a [Attribute] {
        &self.def.attributes
    }

    pub fn members(&self) -> &'a [Member] {
        &self.def.members
    }

    pub fn nested_types(&self) -> Vec<TypeDefinition<'a>> {
        let outer = self.full_name();
        self.def
            .nested
            .iter()
            .map(|def| TypeDefinition::new(self.module, def, Some(outer.clone()), self.resolver))
            .collect()
    }

    /// First attribute whose type has the given full name. Matching is by name only.
    pub fn attribute(&self, full_name: &str) -> Option<&'a Attribute> {
        self.def
            .attributes
            .iter()
            .find(|a| a.attribute_type.full_name() == full_name)
    }

    pub fn has_attribute(&self, full_name: &str) -> bool {
        self.attribute(full_name).is_some()
    }

    /// Whether the type directly lists an interface with the given full name.
    pub fn implements(&self, full_name: &str) -> bool {
        self.def
            .interfaces
            .iter()
            .any(|i| i.full_name() == full_name)
    }

    /// Identity of the module an external reference of this type points into.
    pub fn reference_of(&self, type_ref: &TypeRef) -> Option<&'a ModuleIdentity> {
        self.module.image.reference_of(type_ref)
    }

    /// Resolve a type reference declared by this type's module.
    pub fn resolve(&self, type_ref: &TypeRef) -> Result<ResolvedType, ResolveError> {
        resolve_type_ref(self.module, type_ref, self.resolver)
    }

    /// Resolve the direct base type, if any.
    pub fn resolve_base(&self) -> Result<Option<ResolvedType>, ResolveError> {
        self.def
            .base
            .as_ref()
            .map(|base| self.resolve(base))
            .transpose()
    }

    /// Whether `full_name` appears anywhere in this type's base chain.
    ///
    /// Each base reference is compared by name before it is resolved, so a match
    /// never requires the module declaring the matched type to be loadable.
    pub fn derives_from(&self, full_name: &str) -> Result<bool, ResolveError> {
        let Some(mut current) = self.def.base.clone() else {
            return Ok(false);
        };
        let mut context = Arc::clone(self.module);

        for _ in 0..MAX_BASE_DEPTH {
            if current.full_name() == full_name {
                return Ok(true);
            }
            let resolved = resolve_type_ref(&context, &current, self.resolver)?;
            let next = resolved.definition().base.clone();
            context = Arc::clone(resolved.module());
            match next {
                Some(base) => current = base,
                None => return Ok(false),
            }
        }

        Err(ResolveError::ChainTooDeep {
            type_name: self.full_name(),
            limit: MAX_BASE_DEPTH,
        })
    }
}

impl std::fmt::Debug for TypeDefinition<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDefinition")
            .field("full_name", &self.full_name())
            .field("module", &self.module.identity().name)
            .finish()
    }
}

/// A type definition located through a reference, owning a handle to its module.
#[derive(Debug, Clone)]
pub struct ResolvedType {
    module: ModuleHandle,
    index: usize,
}

impl ResolvedType {
    pub fn module(&self) -> &ModuleHandle {
        &self.module
    }

    pub fn definition(&self) -> &TypeDef {
        &self.module.image.types[self.index]
    }

    pub fn full_name(&self) -> String {
        self.definition().full_name()
    }

    /// Inspection view of the resolved type.
    pub fn view<'r>(&'r self, resolver: &'r dyn ModuleResolver) -> TypeDefinition<'r> {
        TypeDefinition::new(&self.module, self.definition(), None, resolver)
    }
}

/// Resolve `type_ref` as declared by `module`.
pub fn resolve_type_ref(
    module: &ModuleHandle,
    type_ref: &TypeRef,
    resolver: &dyn ModuleResolver,
) -> Result<ResolvedType, ResolveError> {
    let target = match type_ref {
        TypeRef::Local { .. } => Arc::clone(module),
        TypeRef::External { reference, .. } => {
            let identity = module.image.reference(*reference).ok_or_else(|| {
                ResolveError::InvalidReference {
                    index: *reference,
                    module: module.identity().name.clone(),
                }
            })?;
            resolver.resolve(identity)?
        }
    };

    let (index, _) = target
        .image
        .find_type(type_ref.namespace(), type_ref.name())
        .ok_or_else(|| ResolveError::TypeNotFound {
            type_name: type_ref.full_name(),
            module: target.identity().name.clone(),
        })?;

    Ok(ResolvedType {
        module: target,
        index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::NullResolver;
    use metascope_image::{AttributeValue, ModuleVersion};

    fn handle(image: ModuleImage) -> ModuleHandle {
        Arc::new(Module::from_image("/virtual/module.dll", image))
    }

    #[test]
    fn test_local_base_chain() {
        let image = ModuleImage::new(ModuleIdentity::named("Local"))
            .with_type(TypeDef::new("App", "Root"))
            .with_type(TypeDef::new("App", "Middle").with_base(TypeRef::local("App", "Root")))
            .with_type(TypeDef::new("App", "Leaf").with_base(TypeRef::local("App", "Middle")));
        let module = handle(image);
        let resolver = NullResolver;

        let types: Vec<_> = type_definitions(&module, &resolver).collect();
        assert_eq!(types.len(), 3);

        let leaf = &types[2];
        assert!(leaf.derives_from("App.Root").unwrap());
        assert!(leaf.derives_from("App.Middle").unwrap());
        assert!(!leaf.derives_from("App.Other").unwrap());
        assert!(!types[0].derives_from("App.Root").unwrap());

        let base = leaf.resolve_base().unwrap().unwrap();
        assert_eq!(base.full_name(), "App.Middle");
    }

    #[test]
    fn test_external_base_matches_by_name_without_resolving() {
        let mut image = ModuleImage::new(ModuleIdentity::named("Plugin"));
        let host = image.add_reference(ModuleIdentity::new("Host", ModuleVersion::new(1, 0, 0, 0)));
        image.add_type(TypeDef::new("P", "Main").with_base(TypeRef::external(host, "Host", "Base")));
        let module = handle(image);
        let resolver = NullResolver;

        let main = type_definitions(&module, &resolver).next().unwrap();
        assert!(main.derives_from("Host.Base").unwrap());

        // Anything deeper needs the host module, which cannot be found.
        let err = main.derives_from("Host.Deeper").unwrap_err();
        assert!(matches!(err, ResolveError::Unresolved(ref id) if id.name == "Host"));
    }

    #[test]
    fn test_nested_names_and_attributes() {
        let image = ModuleImage::new(ModuleIdentity::named("N")).with_type(
            TypeDef::new("Outer.Ns", "Outer")
                .with_attribute(
                    metascope_image::Attribute::new(TypeRef::local("Meta", "Tag"))
                        .with_arg(AttributeValue::Str("x".into())),
                )
                .with_nested(TypeDef::new("", "Inner")),
        );
        let module = handle(image);
        let resolver = NullResolver;

        let outer = type_definitions(&module, &resolver).next().unwrap();
        let nested = outer.nested_types();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].full_name(), "Outer.Ns.Outer+Inner");
        assert!(nested[0].is_nested());

        let tag = outer.attribute("Meta.Tag").unwrap();
        assert_eq!(tag.args[0].as_str(), Some("x"));
        assert!(!outer.has_attribute("Meta.Other"));
    }

    #[test]
    fn test_cyclic_base_chain_is_bounded() {
        let image = ModuleImage::new(ModuleIdentity::named("Cycle"))
            .with_type(TypeDef::new("C", "A").with_base(TypeRef::local("C", "B")))
            .with_type(TypeDef::new("C", "B").with_base(TypeRef::local("C", "A")));
        let module = handle(image);
        let resolver = NullResolver;

        let a = type_definitions(&module, &resolver).next().unwrap();
        assert!(matches!(
            a.derives_from("C.Missing"),
            Err(ResolveError::ChainTooDeep { .. })
        ));
    }
}
