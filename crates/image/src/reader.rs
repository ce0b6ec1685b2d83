//! Structural reader for module images.
//!
//! Reading never evaluates anything inside the image: the code section is copied
//! out as opaque bytes, and every count and index is bounds-checked against the
//! input before it is used.

use crate::error::{ImageError, Result};
use crate::model::{
    Attribute, AttributeValue, Member, MemberKind, ModuleIdentity, ModuleImage, ModuleVersion,
    TypeDef, TypeFlags, TypeRef,
};
use crate::{FORMAT_VERSION, MAGIC, MAX_NESTING};
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ImageError::Truncated {
                offset: self.pos,
                needed: n,
            });
        }
        let data = self.data;
        let slice = &data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i64(&mut self) -> Result<i64> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(i64::from_le_bytes(buf))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let offset = self.pos;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| ImageError::InvalidUtf8(offset))
    }

    /// Read an element count, rejecting counts the remaining input cannot possibly hold
    /// when every element takes at least `min_bytes`.
    fn count(&mut self, kind: &'static str, min_bytes: usize) -> Result<usize> {
        let offset = self.pos;
        let count = self.u32()?;
        let needed = (count as usize).checked_mul(min_bytes);
        if needed.is_none_or(|needed| needed > self.remaining()) {
            return Err(ImageError::CountOverflow {
                kind,
                count,
                offset,
            });
        }
        Ok(count as usize)
    }
}

// Smallest encodings of each table element, used to bound declared counts.
const MIN_IDENTITY: usize = 4 + 8;
const MIN_TYPE_REF: usize = 1 + 4 + 4;
const MIN_VALUE: usize = 1 + 1;
const MIN_ATTRIBUTE: usize = MIN_TYPE_REF + 4;
const MIN_MEMBER: usize = 1 + 4 + 4 + 4;
const MIN_TYPE_DEF: usize = 4 + 4 + 4 + 1 + 4 * 4;

// ==================== Header ====================

fn read_header(r: &mut ByteReader<'_>) -> Result<(u16, ModuleIdentity)> {
    let magic = r.take(4).map_err(|_| ImageError::BadMagic {
        found: prefix4(r.data),
    })?;
    if magic != &MAGIC[..] {
        return Err(ImageError::BadMagic {
            found: prefix4(magic),
        });
    }
    let version = r.u16()?;
    if version != FORMAT_VERSION {
        return Err(ImageError::UnsupportedVersion(version));
    }
    let flags = r.u16()?;
    let identity = read_identity(r)?;
    Ok((flags, identity))
}

fn prefix4(data: &[u8]) -> [u8; 4] {
    let mut found = [0u8; 4];
    let n = data.len().min(4);
    found[..n].copy_from_slice(&data[..n]);
    found
}

fn read_identity(r: &mut ByteReader<'_>) -> Result<ModuleIdentity> {
    let name = r.string()?;
    let version = ModuleVersion::new(r.u16()?, r.u16()?, r.u16()?, r.u16()?);
    Ok(ModuleIdentity { name, version })
}

// ==================== Body ====================

struct BodyReader<'a, 'b> {
    r: &'b mut ByteReader<'a>,
    reference_count: usize,
}

impl BodyReader<'_, '_> {
    fn type_def(&mut self, depth: usize) -> Result<TypeDef> {
        if depth > MAX_NESTING {
            return Err(ImageError::NestingTooDeep(MAX_NESTING));
        }

        let namespace = self.r.string()?;
        let name = self.r.string()?;
        let flags = TypeFlags::from_bits_retain(self.r.u32()?);
        let base = self.type_ref_opt()?;

        let n = self.r.count("interface", MIN_TYPE_REF)?;
        let mut interfaces = Vec::with_capacity(n);
        for _ in 0..n {
            interfaces.push(self.type_ref()?);
        }

        let attributes = self.attributes()?;

        let n = self.r.count("member", MIN_MEMBER)?;
        let mut members = Vec::with_capacity(n);
        for _ in 0..n {
            members.push(self.member()?);
        }

        let n = self.r.count("nested type", MIN_TYPE_DEF)?;
        let mut nested = Vec::with_capacity(n);
        for _ in 0..n {
            nested.push(self.type_def(depth + 1)?);
        }

        Ok(TypeDef {
            namespace,
            name,
            flags,
            base,
            interfaces,
            attributes,
            members,
            nested,
        })
    }

    fn type_ref_opt(&mut self) -> Result<Option<TypeRef>> {
        let offset = self.r.pos;
        let tag = self.r.u8()?;
        if tag == 0 {
            return Ok(None);
        }
        self.type_ref_body(tag, offset).map(Some)
    }

    fn type_ref(&mut self) -> Result<TypeRef> {
        let offset = self.r.pos;
        let tag = self.r.u8()?;
        self.type_ref_body(tag, offset)
    }

    fn type_ref_body(&mut self, tag: u8, offset: usize) -> Result<TypeRef> {
        match tag {
            1 => Ok(TypeRef::Local {
                namespace: self.r.string()?,
                name: self.r.string()?,
            }),
            2 => {
                let reference = self.r.u32()?;
                if reference as usize >= self.reference_count {
                    return Err(ImageError::ReferenceOutOfRange {
                        index: reference,
                        count: self.reference_count,
                    });
                }
                Ok(TypeRef::External {
                    reference,
                    namespace: self.r.string()?,
                    name: self.r.string()?,
                })
            }
            _ => Err(ImageError::UnknownTag {
                kind: "type reference",
                tag,
                offset,
            }),
        }
    }

    fn attributes(&mut self) -> Result<Vec<Attribute>> {
        let n = self.r.count("attribute", MIN_ATTRIBUTE)?;
        let mut attributes = Vec::with_capacity(n);
        for _ in 0..n {
            let attribute_type = self.type_ref()?;
            let argc = self.r.count("attribute argument", MIN_VALUE)?;
            let mut args = Vec::with_capacity(argc);
            for _ in 0..argc {
                args.push(self.value()?);
            }
            attributes.push(Attribute {
                attribute_type,
                args,
            });
        }
        Ok(attributes)
    }

    fn value(&mut self) -> Result<AttributeValue> {
        let offset = self.r.pos;
        match self.r.u8()? {
            0 => Ok(AttributeValue::Str(self.r.string()?)),
            1 => Ok(AttributeValue::Int(self.r.i64()?)),
            2 => Ok(AttributeValue::Bool(self.r.u8()? != 0)),
            3 => Ok(AttributeValue::Type(self.type_ref()?)),
            tag => Err(ImageError::UnknownTag {
                kind: "attribute value",
                tag,
                offset,
            }),
        }
    }

    fn member(&mut self) -> Result<Member> {
        let offset = self.r.pos;
        let tag = self.r.u8()?;
        let kind = MemberKind::from_tag(tag).ok_or(ImageError::UnknownTag {
            kind: "member",
            tag,
            offset,
        })?;
        let name = self.r.string()?;
        let flags = self.r.u32()?;
        let attributes = self.attributes()?;
        Ok(Member {
            kind,
            name,
            flags,
            attributes,
        })
    }
}

pub(crate) fn parse_image(data: &[u8]) -> Result<ModuleImage> {
    let mut r = ByteReader::new(data);
    let (flags, identity) = read_header(&mut r)?;

    let n = r.count("reference", MIN_IDENTITY)?;
    let mut references = Vec::with_capacity(n);
    for _ in 0..n {
        references.push(read_identity(&mut r)?);
    }

    let n = r.count("type", MIN_TYPE_DEF)?;
    let mut body = BodyReader {
        r: &mut r,
        reference_count: references.len(),
    };
    let mut types = Vec::with_capacity(n);
    for _ in 0..n {
        types.push(body.type_def(0)?);
    }

    let len = r.count("code byte", 1)?;
    let code = r.take(len)?.to_vec();

    if r.remaining() > 0 {
        return Err(ImageError::TrailingBytes(r.remaining()));
    }

    Ok(ModuleImage {
        identity,
        flags,
        references,
        types,
        code,
    })
}

/// Upper bound on the header size read by [`peek_identity`]: magic, version,
/// flags, a name length, and the version quad.
const HEADER_FIXED: usize = 4 + 2 + 2 + 4 + 8;
const MAX_PEEK_NAME: usize = 4096;

/// Read only the declared identity of the image at `path`.
///
/// The type tables are not touched, so this is cheap enough to run against every
/// candidate file during reference resolution.
pub fn peek_identity(path: &Path) -> Result<ModuleIdentity> {
    let file = File::open(path)?;
    let mut buf = Vec::with_capacity(HEADER_FIXED + 64);
    file.take((HEADER_FIXED + MAX_PEEK_NAME) as u64)
        .read_to_end(&mut buf)?;

    let mut r = ByteReader::new(&buf);
    let (_, identity) = read_header(&mut r)?;
    Ok(identity)
}
