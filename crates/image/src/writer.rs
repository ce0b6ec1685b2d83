use crate::error::{ImageError, Result};
use crate::model::{Attribute, AttributeValue, Member, ModuleIdentity, ModuleImage, TypeDef, TypeRef};
use crate::{FORMAT_VERSION, MAGIC};

struct ByteWriter {
    out: Vec<u8>,
}

impl ByteWriter {
    fn u8(&mut self, v: u8) {
        self.out.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    fn len(&mut self, len: usize, what: &'static str) -> Result<()> {
        let len = u32::try_from(len).map_err(|_| ImageError::TooLarge(what))?;
        self.u32(len);
        Ok(())
    }

    fn string(&mut self, s: &str) -> Result<()> {
        self.len(s.len(), "string")?;
        self.out.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn identity(&mut self, id: &ModuleIdentity) -> Result<()> {
        self.string(&id.name)?;
        self.u16(id.version.major);
        self.u16(id.version.minor);
        self.u16(id.version.build);
        self.u16(id.version.revision);
        Ok(())
    }

    fn type_ref(&mut self, r: &TypeRef) -> Result<()> {
        match r {
            TypeRef::Local { namespace, name } => {
                self.u8(1);
                self.string(namespace)?;
                self.string(name)
            }
            TypeRef::External {
                reference,
                namespace,
                name,
            } => {
                self.u8(2);
                self.u32(*reference);
                self.string(namespace)?;
                self.string(name)
            }
        }
    }

    fn attributes(&mut self, attributes: &[Attribute]) -> Result<()> {
        self.len(attributes.len(), "attribute table")?;
        for attribute in attributes {
            self.type_ref(&attribute.attribute_type)?;
            self.len(attribute.args.len(), "attribute arguments")?;
            for arg in &attribute.args {
                match arg {
                    AttributeValue::Str(s) => {
                        self.u8(0);
                        self.string(s)?;
                    }
                    AttributeValue::Int(v) => {
                        self.u8(1);
                        self.out.extend_from_slice(&v.to_le_bytes());
                    }
                    AttributeValue::Bool(v) => {
                        self.u8(2);
                        self.u8(u8::from(*v));
                    }
                    AttributeValue::Type(r) => {
                        self.u8(3);
                        self.type_ref(r)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn member(&mut self, member: &Member) -> Result<()> {
        self.u8(member.kind.tag());
        self.string(&member.name)?;
        self.u32(member.flags);
        self.attributes(&member.attributes)
    }

    fn type_def(&mut self, def: &TypeDef) -> Result<()> {
        self.string(&def.namespace)?;
        self.string(&def.name)?;
        self.u32(def.flags.bits());
        match &def.base {
            Some(base) => self.type_ref(base)?,
            None => self.u8(0),
        }
        self.len(def.interfaces.len(), "interface table")?;
        for interface in &def.interfaces {
            self.type_ref(interface)?;
        }
        self.attributes(&def.attributes)?;
        self.len(def.members.len(), "member table")?;
        for member in &def.members {
            self.member(member)?;
        }
        self.len(def.nested.len(), "nested type table")?;
        for nested in &def.nested {
            self.type_def(nested)?;
        }
        Ok(())
    }
}

pub(crate) fn encode_image(image: &ModuleImage) -> Result<Vec<u8>> {
    let mut w = ByteWriter {
        out: Vec::with_capacity(256 + image.code.len()),
    };

    w.out.extend_from_slice(&MAGIC);
    w.u16(FORMAT_VERSION);
    w.u16(image.flags);
    w.identity(&image.identity)?;

    w.len(image.references.len(), "reference table")?;
    for reference in &image.references {
        w.identity(reference)?;
    }

    w.len(image.types.len(), "type table")?;
    for def in &image.types {
        w.type_def(def)?;
    }

    w.len(image.code.len(), "code section")?;
    w.out.extend_from_slice(&image.code);

    Ok(w.out)
}
