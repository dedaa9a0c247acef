use crate::backend::container;
use std::ops::Deref;

/// A compiled shader container.
///
/// Never empty: a backend that hands back zero bytes is reported as a compile error instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    bytes: Box<[u8]>,
}

impl Object {
    pub(crate) fn new(bytes: Vec<u8>) -> Option<Self> {
        if bytes.is_empty() {
            None
        } else {
            Some(Self {
                bytes: bytes.into_boxed_slice(),
            })
        }
    }

    /// Data of the container part with `fourcc`, such as `b"DXIL"`, if the object is a DXBC
    /// container holding one.
    pub fn part(&self, fourcc: &[u8; 4]) -> Option<&[u8]> {
        container::find_part(&self.bytes, *fourcc)
    }

    /// Whether the container digest matches its contents.
    pub fn is_signed(&self) -> bool {
        mach_siegbert_vogt_dxcsa::verify(&self.bytes)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes.into_vec()
    }
}

impl Deref for Object {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.bytes
    }
}

impl AsRef<[u8]> for Object {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}
