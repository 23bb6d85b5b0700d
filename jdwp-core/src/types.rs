// JDWP type definitions
//
// Identifier types and the connection-negotiated identifier widths

use crate::error::JdwpError;
use serde::{Deserialize, Serialize};

// Identifiers travel at a negotiated width but are held as u64 locally
pub type ObjectId = u64;
pub type ThreadId = ObjectId;
pub type ReferenceTypeId = u64;
pub type MethodId = u64;
pub type FieldId = u64;
pub type FrameId = u64;

/// Width of an identifier on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum IdSize {
    Two,
    Four,
    Eight,
}

impl IdSize {
    pub fn bytes(self) -> usize {
        match self {
            IdSize::Two => 2,
            IdSize::Four => 4,
            IdSize::Eight => 8,
        }
    }
}

impl TryFrom<i32> for IdSize {
    type Error = JdwpError;

    fn try_from(width: i32) -> Result<Self, Self::Error> {
        match width {
            2 => Ok(IdSize::Two),
            4 => Ok(IdSize::Four),
            8 => Ok(IdSize::Eight),
            other => Err(JdwpError::WireFormat(format!(
                "Unsupported identifier width: {}",
                other
            ))),
        }
    }
}

impl From<IdSize> for i32 {
    fn from(size: IdSize) -> i32 {
        size.bytes() as i32
    }
}

/// ID sizes used by the VM (VirtualMachine.IDSizes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdSizes {
    pub field: IdSize,
    pub method: IdSize,
    pub object: IdSize,
    pub reference_type: IdSize,
    pub frame: IdSize,
}

impl Default for IdSizes {
    fn default() -> Self {
        Self {
            field: IdSize::Eight,
            method: IdSize::Eight,
            object: IdSize::Eight,
            reference_type: IdSize::Eight,
            frame: IdSize::Eight,
        }
    }
}

// Location identifies a code position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub type_tag: u8, // 1=class, 2=interface, 3=array
    pub class_id: ReferenceTypeId,
    pub method_id: MethodId,
    pub index: u64, // bytecode index (PC)
}
