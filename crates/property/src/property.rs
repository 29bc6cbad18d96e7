use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Identifier of a property within an entity, chunk or light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyId(pub i16);

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Type tag of a property's raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyKind {
    Int,
    Float,
    Bool,
    Vec2,
    String,
    Color,
    Bytes,
}

/// RGBA colour, one byte per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgba(255, 255, 255, 255);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

/// Decoded view of a property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Int(i32),
    Float(f32),
    Bool(bool),
    Vec2(Vec2),
    String(String),
    Color(Color),
    Bytes(Vec<u8>),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            Self::Int(_) => PropertyKind::Int,
            Self::Float(_) => PropertyKind::Float,
            Self::Bool(_) => PropertyKind::Bool,
            Self::Vec2(_) => PropertyKind::Vec2,
            Self::String(_) => PropertyKind::String,
            Self::Color(_) => PropertyKind::Color,
            Self::Bytes(_) => PropertyKind::Bytes,
        }
    }

    /// Little-endian wire form.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Int(v) => v.to_le_bytes().to_vec(),
            Self::Float(v) => v.to_le_bytes().to_vec(),
            Self::Bool(v) => vec![u8::from(*v)],
            Self::Vec2(v) => {
                let mut out = Vec::with_capacity(8);
                out.extend_from_slice(&v.x.to_le_bytes());
                out.extend_from_slice(&v.y.to_le_bytes());
                out
            }
            Self::String(s) => s.as_bytes().to_vec(),
            Self::Color(c) => vec![c.r, c.g, c.b, c.a],
            Self::Bytes(b) => b.clone(),
        }
    }

    pub fn decode(kind: PropertyKind, bytes: &[u8]) -> Result<Self, PropertyError> {
        let fixed = |len: usize| -> Result<(), PropertyError> {
            if bytes.len() == len {
                Ok(())
            } else {
                Err(PropertyError::BadLength {
                    kind,
                    expected: len,
                    actual: bytes.len(),
                })
            }
        };
        let word = |at: usize| [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]];
        Ok(match kind {
            PropertyKind::Int => {
                fixed(4)?;
                Self::Int(i32::from_le_bytes(word(0)))
            }
            PropertyKind::Float => {
                fixed(4)?;
                Self::Float(f32::from_le_bytes(word(0)))
            }
            PropertyKind::Bool => {
                fixed(1)?;
                Self::Bool(bytes[0] != 0)
            }
            PropertyKind::Vec2 => {
                fixed(8)?;
                Self::Vec2(Vec2::new(
                    f32::from_le_bytes(word(0)),
                    f32::from_le_bytes(word(4)),
                ))
            }
            PropertyKind::String => Self::String(
                String::from_utf8(bytes.to_vec()).map_err(|_| PropertyError::InvalidUtf8)?,
            ),
            PropertyKind::Color => {
                fixed(4)?;
                Self::Color(Color::rgba(bytes[0], bytes[1], bytes[2], bytes[3]))
            }
            PropertyKind::Bytes => Self::Bytes(bytes.to_vec()),
        })
    }
}

/// Errors from property access.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PropertyError {
    #[error("property {id} holds {actual:?}, not {expected:?}")]
    KindMismatch {
        id: PropertyId,
        expected: PropertyKind,
        actual: PropertyKind,
    },
    #[error("{kind:?} value needs {expected} bytes, got {actual}")]
    BadLength {
        kind: PropertyKind,
        expected: usize,
        actual: usize,
    },
    #[error("string property is not valid UTF-8")]
    InvalidUtf8,
    #[error("property {0} was never declared")]
    Undeclared(PropertyId),
}

/// A typed, dirty-tracked value cell.
///
/// The raw bytes are authoritative; the typed value is decoded on first read
/// and dropped on every effective write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    id: PropertyId,
    kind: PropertyKind,
    raw: Vec<u8>,
    dirty: bool,
    dirtyable: bool,
    #[serde(skip)]
    decoded: OnceLock<PropertyValue>,
}

impl Property {
    /// A clean, dirtyable property holding `value`.
    pub fn new(id: PropertyId, value: PropertyValue) -> Self {
        let decoded = OnceLock::new();
        let raw = value.encode();
        let kind = value.kind();
        let _ = decoded.set(value);
        Self {
            id,
            kind,
            raw,
            dirty: false,
            dirtyable: true,
            decoded,
        }
    }

    /// A clean property built from raw bytes, validated against `kind`.
    pub fn from_raw(id: PropertyId, kind: PropertyKind, raw: Vec<u8>) -> Result<Self, PropertyError> {
        let value = PropertyValue::decode(kind, &raw)?;
        let decoded = OnceLock::new();
        let _ = decoded.set(value);
        Ok(Self {
            id,
            kind,
            raw,
            dirty: false,
            dirtyable: true,
            decoded,
        })
    }

    pub fn id(&self) -> PropertyId {
        self.id
    }

    pub fn kind(&self) -> PropertyKind {
        self.kind
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_dirtyable(&self) -> bool {
        self.dirtyable
    }

    /// Non-dirtyable properties never report changes for replication.
    pub fn set_dirtyable(&mut self, dirtyable: bool) {
        self.dirtyable = dirtyable;
        if !dirtyable {
            self.dirty = false;
        }
    }

    /// Reset after the value has been transmitted.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn mark_dirty(&mut self) {
        if self.dirtyable {
            self.dirty = true;
        }
    }

    /// Write raw bytes. Returns `Ok(true)` when the stored value changed.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<bool, PropertyError> {
        if self.raw == bytes {
            return Ok(false);
        }
        let value = PropertyValue::decode(self.kind, bytes)?;
        self.store(bytes.to_vec(), value);
        Ok(true)
    }

    /// Write a typed value. Returns `Ok(true)` when the stored value changed.
    pub fn set(&mut self, value: PropertyValue) -> Result<bool, PropertyError> {
        if value.kind() != self.kind {
            return Err(PropertyError::KindMismatch {
                id: self.id,
                expected: self.kind,
                actual: value.kind(),
            });
        }
        let raw = value.encode();
        if raw == self.raw {
            return Ok(false);
        }
        self.store(raw, value);
        Ok(true)
    }

    fn store(&mut self, raw: Vec<u8>, value: PropertyValue) {
        self.raw = raw;
        self.decoded = OnceLock::new();
        let _ = self.decoded.set(value);
        self.mark_dirty();
    }

    /// Typed view of the raw bytes, decoded on first access.
    pub fn value(&self) -> Result<&PropertyValue, PropertyError> {
        if let Some(v) = self.decoded.get() {
            return Ok(v);
        }
        let v = PropertyValue::decode(self.kind, &self.raw)?;
        Ok(self.decoded.get_or_init(|| v))
    }

    fn mismatch(&self, expected: PropertyKind) -> PropertyError {
        PropertyError::KindMismatch {
            id: self.id,
            expected,
            actual: self.kind,
        }
    }

    pub fn as_int(&self) -> Result<i32, PropertyError> {
        match self.value()? {
            PropertyValue::Int(v) => Ok(*v),
            _ => Err(self.mismatch(PropertyKind::Int)),
        }
    }

    pub fn as_float(&self) -> Result<f32, PropertyError> {
        match self.value()? {
            PropertyValue::Float(v) => Ok(*v),
            _ => Err(self.mismatch(PropertyKind::Float)),
        }
    }

    pub fn as_bool(&self) -> Result<bool, PropertyError> {
        match self.value()? {
            PropertyValue::Bool(v) => Ok(*v),
            _ => Err(self.mismatch(PropertyKind::Bool)),
        }
    }

    pub fn as_vec2(&self) -> Result<Vec2, PropertyError> {
        match self.value()? {
            PropertyValue::Vec2(v) => Ok(*v),
            _ => Err(self.mismatch(PropertyKind::Vec2)),
        }
    }

    pub fn as_string(&self) -> Result<&str, PropertyError> {
        match self.value()? {
            PropertyValue::String(v) => Ok(v),
            _ => Err(self.mismatch(PropertyKind::String)),
        }
    }

    pub fn as_color(&self) -> Result<Color, PropertyError> {
        match self.value()? {
            PropertyValue::Color(v) => Ok(*v),
            _ => Err(self.mismatch(PropertyKind::Color)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health() -> Property {
        Property::new(PropertyId(3), PropertyValue::Int(100))
    }

    #[test]
    fn new_property_is_clean() {
        let p = health();
        assert!(!p.is_dirty());
        assert_eq!(p.as_int().unwrap(), 100);
    }

    #[test]
    fn identical_write_is_noop() {
        let mut p = health();
        let same = 100i32.to_le_bytes();
        assert!(!p.write_bytes(&same).unwrap());
        assert!(!p.is_dirty());
        assert!(!p.set(PropertyValue::Int(100)).unwrap());
        assert!(!p.is_dirty());
    }

    #[test]
    fn changed_write_sets_dirty_and_refreshes_value() {
        let mut p = health();
        assert!(p.write_bytes(&42i32.to_le_bytes()).unwrap());
        assert!(p.is_dirty());
        assert_eq!(p.as_int().unwrap(), 42);

        p.clear_dirty();
        assert!(!p.is_dirty());
        assert!(p.set(PropertyValue::Int(7)).unwrap());
        assert_eq!(p.as_int().unwrap(), 7);
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let mut p = health();
        let err = p.set(PropertyValue::Float(1.0)).unwrap_err();
        assert!(matches!(err, PropertyError::KindMismatch { .. }));
        assert!(p.as_vec2().is_err());
        assert!(!p.is_dirty());
    }

    #[test]
    fn bad_length_is_rejected() {
        let mut p = health();
        assert!(matches!(
            p.write_bytes(&[1, 2]),
            Err(PropertyError::BadLength { expected: 4, actual: 2, .. })
        ));
        assert_eq!(p.as_int().unwrap(), 100);
    }

    #[test]
    fn non_dirtyable_never_reports_dirty() {
        let mut p = health();
        p.set_dirtyable(false);
        assert!(p.set(PropertyValue::Int(1)).unwrap());
        assert!(!p.is_dirty());
    }

    #[test]
    fn typed_encodings() {
        let v = PropertyValue::Vec2(Vec2::new(1.5, -2.0));
        assert_eq!(v.encode().len(), 8);
        assert_eq!(PropertyValue::decode(PropertyKind::Vec2, &v.encode()).unwrap(), v);

        let c = Property::new(PropertyId(1), PropertyValue::Color(Color::WHITE));
        assert_eq!(c.as_color().unwrap(), Color::WHITE);

        let s = Property::new(PropertyId(2), PropertyValue::String("crate".into()));
        assert_eq!(s.as_string().unwrap(), "crate");
        assert_eq!(s.raw(), b"crate");
    }

    #[test]
    fn value_decodes_lazily_after_deserialize() {
        let p = Property::from_raw(PropertyId(9), PropertyKind::Bool, vec![1]).unwrap();
        let copy = Property {
            decoded: OnceLock::new(),
            ..p
        };
        assert!(copy.as_bool().unwrap());
    }
}
