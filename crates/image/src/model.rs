//! In-memory model of a module image.
//!
//! Everything here is plain data: a parsed image holds no file handles and no
//! executable state, so it can be inspected freely and dropped at any time.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==================== Identity ====================

/// Four-part module version (`major.minor.build.revision`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ModuleVersion {
    pub major: u16,
    pub minor: u16,
    pub build: u16,
    pub revision: u16,
}

impl ModuleVersion {
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

/// Error returned when a version string is not `N[.N[.N[.N]]]`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid module version: {0:?}")]
pub struct ParseVersionError(pub String);

impl FromStr for ModuleVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = [0u16; 4];
        let mut count = 0;
        for part in s.trim().split('.') {
            if count == 4 {
                return Err(ParseVersionError(s.to_string()));
            }
            parts[count] = part
                .parse()
                .map_err(|_| ParseVersionError(s.to_string()))?;
            count += 1;
        }
        Ok(Self::new(parts[0], parts[1], parts[2], parts[3]))
    }
}

/// Declared identity of a module: logical name plus version.
///
/// The same shape is used for a module's own identity and for the references
/// it declares to other modules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleIdentity {
    pub name: String,
    pub version: ModuleVersion,
}

impl ModuleIdentity {
    pub fn new(name: impl Into<String>, version: ModuleVersion) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Identity with version `0.0.0.0`, which any candidate version satisfies.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, ModuleVersion::default())
    }

    /// Whether a module declaring `self` can stand in for a reference to `requested`.
    ///
    /// Names compare ASCII case-insensitively; the candidate version must be at
    /// least the requested one.
    pub fn satisfies(&self, requested: &ModuleIdentity) -> bool {
        self.name.eq_ignore_ascii_case(&requested.name) && self.version >= requested.version
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Version={}", self.name, self.version)
    }
}

// ==================== Types ====================

bitflags! {
    /// Declaration flags of a type definition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TypeFlags: u32 {
        const PUBLIC = 1 << 0;
        const ABSTRACT = 1 << 1;
        const INTERFACE = 1 << 2;
        const SEALED = 1 << 3;
        const ENUM = 1 << 4;
        const VALUE_TYPE = 1 << 5;
    }
}

/// Reference to a type, either in the same module or in a referenced one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Local {
        namespace: String,
        name: String,
    },
    External {
        /// Index into the owning image's reference table.
        reference: u32,
        namespace: String,
        name: String,
    },
}

impl TypeRef {
    pub fn local(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TypeRef::Local {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn external(reference: u32, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TypeRef::External {
            reference,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            TypeRef::Local { namespace, .. } | TypeRef::External { namespace, .. } => namespace,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TypeRef::Local { name, .. } | TypeRef::External { name, .. } => name,
        }
    }

    pub fn full_name(&self) -> String {
        join_full_name(self.namespace(), self.name())
    }

    pub fn is_external(&self) -> bool {
        matches!(self, TypeRef::External { .. })
    }
}

/// Constant argument of an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttributeValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Type(TypeRef),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

/// An attribute applied to a type or member: the attribute's type plus its constant arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Attribute {
    pub attribute_type: TypeRef,
    pub args: Vec<AttributeValue>,
}

impl Attribute {
    pub fn new(attribute_type: TypeRef) -> Self {
        Self {
            attribute_type,
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: AttributeValue) -> Self {
        self.args.push(arg);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Field,
    Method,
    Property,
    Event,
}

impl MemberKind {
    pub(crate) fn tag(self) -> u8 {
        match self {
            MemberKind::Field => 0,
            MemberKind::Method => 1,
            MemberKind::Property => 2,
            MemberKind::Event => 3,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(MemberKind::Field),
            1 => Some(MemberKind::Method),
            2 => Some(MemberKind::Property),
            3 => Some(MemberKind::Event),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Member {
    pub kind: MemberKind,
    pub name: String,
    pub flags: u32,
    pub attributes: Vec<Attribute>,
}

impl Member {
    pub fn new(kind: MemberKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            flags: 0,
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }
}

/// A type definition as declared in a module's type table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeDef {
    pub namespace: String,
    pub name: String,
    pub flags: TypeFlags,
    pub base: Option<TypeRef>,
    pub interfaces: Vec<TypeRef>,
    pub attributes: Vec<Attribute>,
    pub members: Vec<Member>,
    pub nested: Vec<TypeDef>,
}

impl TypeDef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            flags: TypeFlags::PUBLIC,
            base: None,
            interfaces: Vec::new(),
            attributes: Vec::new(),
            members: Vec::new(),
            nested: Vec::new(),
        }
    }

    pub fn with_flags(mut self, flags: TypeFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_base(mut self, base: TypeRef) -> Self {
        self.base = Some(base);
        self
    }

    pub fn with_interface(mut self, interface: TypeRef) -> Self {
        self.interfaces.push(interface);
        self
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_member(mut self, member: Member) -> Self {
        self.members.push(member);
        self
    }

    pub fn with_nested(mut self, nested: TypeDef) -> Self {
        self.nested.push(nested);
        self
    }

    pub fn full_name(&self) -> String {
        join_full_name(&self.namespace, &self.name)
    }
}

// ==================== Image ====================

/// A parsed module image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleImage {
    pub identity: ModuleIdentity,
    pub flags: u16,
    pub references: Vec<ModuleIdentity>,
    pub types: Vec<TypeDef>,
    /// Compiled code section. Carried through verbatim and never interpreted.
    pub code: Vec<u8>,
}

impl ModuleImage {
    pub fn new(identity: ModuleIdentity) -> Self {
        Self {
            identity,
            flags: 0,
            references: Vec::new(),
            types: Vec::new(),
            code: Vec::new(),
        }
    }

    /// Append a reference and return its index for use in [`TypeRef::External`].
    pub fn add_reference(&mut self, identity: ModuleIdentity) -> u32 {
        self.references.push(identity);
        (self.references.len() - 1) as u32
    }

    pub fn add_type(&mut self, def: TypeDef) -> &mut Self {
        self.types.push(def);
        self
    }

    pub fn with_type(mut self, def: TypeDef) -> Self {
        self.types.push(def);
        self
    }

    pub fn with_code(mut self, code: Vec<u8>) -> Self {
        self.code = code;
        self
    }

    pub fn reference(&self, index: u32) -> Option<&ModuleIdentity> {
        self.references.get(index as usize)
    }

    /// Identity of the module an external type reference points into.
    pub fn reference_of(&self, type_ref: &TypeRef) -> Option<&ModuleIdentity> {
        match type_ref {
            TypeRef::External { reference, .. } => self.reference(*reference),
            TypeRef::Local { .. } => None,
        }
    }

    /// Whether this image declares a reference to a module with the given name.
    pub fn references_module(&self, name: &str) -> bool {
        self.references
            .iter()
            .any(|r| r.name.eq_ignore_ascii_case(name))
    }

    /// Find a top-level type by namespace and name.
    pub fn find_type(&self, namespace: &str, name: &str) -> Option<(usize, &TypeDef)> {
        self.types
            .iter()
            .enumerate()
            .find(|(_, t)| t.namespace == namespace && t.name == name)
    }

    /// Find a top-level type by `Namespace.Name`.
    pub fn find_type_by_full_name(&self, full_name: &str) -> Option<(usize, &TypeDef)> {
        let (namespace, name) = split_full_name(full_name);
        self.find_type(namespace, name)
    }
}

pub(crate) fn join_full_name(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    }
}

/// Split `A.B.C` into (`A.B`, `C`). A name without dots has an empty namespace.
pub fn split_full_name(full_name: &str) -> (&str, &str) {
    match full_name.rfind('.') {
        Some(idx) => (&full_name[..idx], &full_name[idx + 1..]),
        None => ("", full_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse_and_display() {
        let v: ModuleVersion = "1.2".parse().unwrap();
        assert_eq!(v, ModuleVersion::new(1, 2, 0, 0));
        assert_eq!(v.to_string(), "1.2.0.0");

        assert!("1.2.3.4.5".parse::<ModuleVersion>().is_err());
        assert!("1.x".parse::<ModuleVersion>().is_err());
    }

    #[test]
    fn test_identity_satisfies() {
        let candidate = ModuleIdentity::new("Host.Core", ModuleVersion::new(2, 1, 0, 0));

        assert!(candidate.satisfies(&ModuleIdentity::named("host.core")));
        assert!(candidate.satisfies(&ModuleIdentity::new(
            "Host.Core",
            ModuleVersion::new(2, 0, 5, 0)
        )));
        assert!(!candidate.satisfies(&ModuleIdentity::new(
            "Host.Core",
            ModuleVersion::new(3, 0, 0, 0)
        )));
        assert!(!candidate.satisfies(&ModuleIdentity::named("Host.Other")));
    }

    #[test]
    fn test_find_type_by_full_name() {
        let image = ModuleImage::new(ModuleIdentity::named("A"))
            .with_type(TypeDef::new("Game.Plugins", "Alpha"))
            .with_type(TypeDef::new("", "Loose"));

        let (idx, def) = image.find_type_by_full_name("Game.Plugins.Alpha").unwrap();
        assert_eq!(idx, 0);
        assert_eq!(def.name, "Alpha");

        let (idx, _) = image.find_type_by_full_name("Loose").unwrap();
        assert_eq!(idx, 1);
        assert!(image.find_type_by_full_name("Game.Alpha").is_none());
    }
}
