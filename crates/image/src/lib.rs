//! Module image format.
//!
//! A module image is a binary container of compiled type definitions. This crate
//! reads such images structurally (identity, reference table, type table) without
//! ever interpreting the code section, and writes them back for tooling and tests.
//!
//! ## Layout
//!
//! ```text
//! "MSMI" | format u16 | flags u16 | identity
//!        | references (u32 count + identities)
//!        | types      (u32 count + type definitions)
//!        | code       (u32 length + opaque bytes)
//! ```
//!
//! All integers are little-endian, strings are a `u32` byte length followed by UTF-8.

pub mod error;
pub mod model;
mod reader;
mod writer;

pub use error::{ImageError, Result};
pub use model::{
    Attribute, AttributeValue, Member, MemberKind, ModuleIdentity, ModuleImage, ModuleVersion,
    ParseVersionError, TypeDef, TypeFlags, TypeRef, split_full_name,
};
pub use reader::peek_identity;

use std::path::Path;

/// File signature of every module image.
pub const MAGIC: [u8; 4] = *b"MSMI";
/// The only container version this crate reads and writes.
pub const FORMAT_VERSION: u16 = 1;
/// Maximum depth of nested type definitions.
pub const MAX_NESTING: usize = 32;

impl ModuleImage {
    /// Parse an image from memory.
    pub fn parse(data: &[u8]) -> Result<Self> {
        reader::parse_image(data)
    }

    /// Read and parse the image at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::parse(&data)
    }

    /// Encode this image.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        writer::encode_image(self)
    }

    /// Encode this image and write it to `path`, replacing any existing file.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_image() -> ModuleImage {
        let mut image = ModuleImage::new(ModuleIdentity::new(
            "Sample.Plugin",
            ModuleVersion::new(1, 4, 0, 0),
        ));
        let host = image.add_reference(ModuleIdentity::new(
            "Host.Core",
            ModuleVersion::new(5, 0, 0, 0),
        ));

        image.add_type(
            TypeDef::new("Sample", "MainPlugin")
                .with_base(TypeRef::external(host, "Host", "BasePlugin"))
                .with_attribute(
                    Attribute::new(TypeRef::external(host, "Host", "PluginInfo"))
                        .with_arg(AttributeValue::Str("com.sample".into()))
                        .with_arg(AttributeValue::Int(-3))
                        .with_arg(AttributeValue::Bool(true)),
                )
                .with_member(
                    Member::new(MemberKind::Method, "Awake")
                        .with_attribute(Attribute::new(TypeRef::local("Sample", "Hook"))),
                )
                .with_nested(
                    TypeDef::new("", "Settings")
                        .with_flags(TypeFlags::SEALED | TypeFlags::from_bits_retain(1 << 20)),
                ),
        );
        image.add_type(
            TypeDef::new("Sample", "Hook")
                .with_flags(TypeFlags::empty())
                .with_interface(TypeRef::local("Sample", "IHook")),
        );
        image.with_code(vec![0xde, 0xad, 0xbe, 0xef])
    }

    #[test]
    fn test_image_survives_encoding() {
        let image = sample_image();
        let bytes = image.to_bytes().unwrap();
        assert_eq!(&bytes[..4], b"MSMI");

        let parsed = ModuleImage::parse(&bytes).unwrap();
        assert_eq!(parsed, image);
        assert!(parsed.types[0].nested[0].flags.bits() & (1 << 20) != 0);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = sample_image().to_bytes().unwrap();
        bytes.push(0);
        assert!(matches!(
            ModuleImage::parse(&bytes),
            Err(ImageError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_truncation_anywhere_is_an_error() {
        let bytes = sample_image().to_bytes().unwrap();
        for len in 0..bytes.len() {
            assert!(
                ModuleImage::parse(&bytes[..len]).is_err(),
                "prefix of length {len} parsed"
            );
        }
    }

    #[test]
    fn test_reference_out_of_range_rejected() {
        let image = ModuleImage::new(ModuleIdentity::named("Broken"))
            .with_type(TypeDef::new("X", "Y").with_base(TypeRef::external(3, "Host", "Base")));
        let bytes = image.to_bytes().unwrap();
        assert!(matches!(
            ModuleImage::parse(&bytes),
            Err(ImageError::ReferenceOutOfRange { index: 3, count: 0 })
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let mut def = TypeDef::new("", "Leaf");
        for i in 0..=MAX_NESTING {
            def = TypeDef::new("", format!("Level{i}")).with_nested(def);
        }
        let image = ModuleImage::new(ModuleIdentity::named("Deep")).with_type(def);
        let bytes = image.to_bytes().unwrap();
        assert!(matches!(
            ModuleImage::parse(&bytes),
            Err(ImageError::NestingTooDeep(_))
        ));
    }

    #[test]
    fn test_peek_identity_reads_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Sample.Plugin.dll");
        sample_image().write_to(&path).unwrap();

        let identity = peek_identity(&path).unwrap();
        assert_eq!(identity.name, "Sample.Plugin");
        assert_eq!(identity.version, ModuleVersion::new(1, 4, 0, 0));

        std::fs::write(&path, b"not an image").unwrap();
        assert!(matches!(
            peek_identity(&path),
            Err(ImageError::BadMagic { .. })
        ));
    }
}
