// JDWP error taxonomy and reply error translation
//
// Every fault surfaced by the engine is a JdwpError. Non-zero reply error codes
// are categorised by ProtocolFault::translate.

use crate::reader::read_string;
use std::fmt;
use thiserror::Error;

pub type JdwpResult<T> = Result<T, JdwpError>;

#[derive(Debug, Error)]
pub enum JdwpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or truncated frame. Local and not retriable.
    #[error("Wire format error: {0}")]
    WireFormat(String),

    /// The debuggee answered with a non-zero error code
    #[error(transparent)]
    Protocol(#[from] ProtocolFault),

    /// The connection is gone. Terminal for the connection.
    #[error("VM disconnected")]
    Disconnected,

    /// Misuse of the engine, e.g. waiting for a reply on the dispatcher task
    #[error("Programmer error: {0}")]
    Programmer(String),

    #[error("Invalid handshake")]
    InvalidHandshake,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl JdwpError {
    /// True for a lost connection, including a VM_DEAD reply
    pub fn is_disconnect(&self) -> bool {
        match self {
            JdwpError::Disconnected => true,
            JdwpError::Protocol(fault) => fault.kind == FaultKind::VmDead,
            _ => false,
        }
    }

    /// Raw JDWP error code, if this error came from a reply
    pub fn error_code(&self) -> Option<u16> {
        match self {
            JdwpError::Protocol(fault) => Some(fault.code),
            _ => None,
        }
    }
}

/// Fault category a reply error code maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    ObjectCollected,
    InvalidModule,
    VmDead,
    OutOfMemory,
    ClassNotPrepared,
    InvalidStackFrame,
    OpaqueFrame,
    Unsupported,
    IndexOutOfBounds,
    TypeMismatch,
    InvalidThreadState,
    Internal,
}

impl FaultKind {
    fn describe(self) -> &'static str {
        match self {
            FaultKind::ObjectCollected => "object has been collected",
            FaultKind::InvalidModule => "invalid module",
            FaultKind::VmDead => "VM is dead",
            FaultKind::OutOfMemory => "VM out of memory",
            FaultKind::ClassNotPrepared => "class not prepared",
            FaultKind::InvalidStackFrame => "invalid stack frame",
            FaultKind::OpaqueFrame => "opaque frame",
            FaultKind::Unsupported => "operation not implemented",
            FaultKind::IndexOutOfBounds => "index out of bounds",
            FaultKind::TypeMismatch => "inconsistent debug info",
            FaultKind::InvalidThreadState => "illegal thread state",
            FaultKind::Internal => "internal error",
        }
    }
}

/// A non-zero reply error code, categorised
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolFault {
    pub code: u16,
    pub kind: FaultKind,
    /// Remote diagnostic string, only ever set for INTERNAL
    pub detail: Option<String>,
}

impl ProtocolFault {
    /// Map a reply error code (and its payload) onto the fault taxonomy
    pub fn translate(code: u16, data: &[u8]) -> Self {
        let kind = match code {
            error_codes::INVALID_OBJECT => FaultKind::ObjectCollected,
            error_codes::INVALID_MODULE => FaultKind::InvalidModule,
            error_codes::VM_DEAD => FaultKind::VmDead,
            error_codes::OUT_OF_MEMORY => FaultKind::OutOfMemory,
            error_codes::CLASS_NOT_PREPARED => FaultKind::ClassNotPrepared,
            error_codes::INVALID_FRAMEID | error_codes::NOT_CURRENT_FRAME => {
                FaultKind::InvalidStackFrame
            }
            error_codes::NOT_IMPLEMENTED => FaultKind::Unsupported,
            error_codes::INVALID_INDEX | error_codes::INVALID_LENGTH => {
                FaultKind::IndexOutOfBounds
            }
            error_codes::TYPE_MISMATCH => FaultKind::TypeMismatch,
            error_codes::INVALID_THREAD => FaultKind::InvalidThreadState,
            error_codes::OPAQUE_FRAME => FaultKind::OpaqueFrame,
            _ => FaultKind::Internal,
        };

        let detail = if code == error_codes::INTERNAL && !data.is_empty() {
            let mut buf = data;
            read_string(&mut buf).ok()
        } else {
            None
        };

        Self { code, kind, detail }
    }

    pub fn name(&self) -> &'static str {
        error_name(self.code)
    }
}

impl fmt::Display for ProtocolFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "JDWP error code {} ({}): {}",
            self.code,
            self.name(),
            self.kind.describe()
        )?;
        if let Some(detail) = &self.detail {
            write!(f, " (remote exception) {}", detail)?;
        }
        Ok(())
    }
}

impl std::error::Error for ProtocolFault {}

// Reply error codes
pub mod error_codes {
    pub const NONE: u16 = 0;
    pub const INVALID_THREAD: u16 = 10;
    pub const THREAD_NOT_SUSPENDED: u16 = 13;
    pub const INVALID_OBJECT: u16 = 20;
    pub const INVALID_CLASS: u16 = 21;
    pub const CLASS_NOT_PREPARED: u16 = 22;
    pub const INVALID_FRAMEID: u16 = 30;
    pub const OPAQUE_FRAME: u16 = 32;
    pub const NOT_CURRENT_FRAME: u16 = 33;
    pub const TYPE_MISMATCH: u16 = 34;
    pub const INVALID_MODULE: u16 = 42;
    pub const NOT_IMPLEMENTED: u16 = 99;
    pub const OUT_OF_MEMORY: u16 = 110;
    pub const VM_DEAD: u16 = 112;
    pub const INTERNAL: u16 = 113;
    pub const INVALID_INDEX: u16 = 503;
    pub const INVALID_LENGTH: u16 = 504;
}

/// Symbolic name of a reply error code
pub fn error_name(code: u16) -> &'static str {
    match code {
        0 => "NONE",
        10 => "INVALID_THREAD",
        11 => "INVALID_THREAD_GROUP",
        12 => "INVALID_PRIORITY",
        13 => "THREAD_NOT_SUSPENDED",
        14 => "THREAD_SUSPENDED",
        15 => "THREAD_NOT_ALIVE",
        20 => "INVALID_OBJECT",
        21 => "INVALID_CLASS",
        22 => "CLASS_NOT_PREPARED",
        23 => "INVALID_METHODID",
        24 => "INVALID_LOCATION",
        25 => "INVALID_FIELDID",
        30 => "INVALID_FRAMEID",
        31 => "NO_MORE_FRAMES",
        32 => "OPAQUE_FRAME",
        33 => "NOT_CURRENT_FRAME",
        34 => "TYPE_MISMATCH",
        35 => "INVALID_SLOT",
        40 => "DUPLICATE",
        41 => "NOT_FOUND",
        42 => "INVALID_MODULE",
        50 => "INVALID_MONITOR",
        51 => "NOT_MONITOR_OWNER",
        52 => "INTERRUPT",
        60 => "INVALID_CLASS_FORMAT",
        61 => "CIRCULAR_CLASS_DEFINITION",
        62 => "FAILS_VERIFICATION",
        63 => "ADD_METHOD_NOT_IMPLEMENTED",
        64 => "SCHEMA_CHANGE_NOT_IMPLEMENTED",
        65 => "INVALID_TYPESTATE",
        66 => "HIERARCHY_CHANGE_NOT_IMPLEMENTED",
        67 => "DELETE_METHOD_NOT_IMPLEMENTED",
        68 => "UNSUPPORTED_VERSION",
        69 => "NAMES_DONT_MATCH",
        70 => "CLASS_MODIFIERS_CHANGE_NOT_IMPLEMENTED",
        71 => "METHOD_MODIFIERS_CHANGE_NOT_IMPLEMENTED",
        99 => "NOT_IMPLEMENTED",
        100 => "NULL_POINTER",
        101 => "ABSENT_INFORMATION",
        102 => "INVALID_EVENT_TYPE",
        103 => "ILLEGAL_ARGUMENT",
        110 => "OUT_OF_MEMORY",
        111 => "ACCESS_DENIED",
        112 => "VM_DEAD",
        113 => "INTERNAL",
        115 => "UNATTACHED_THREAD",
        500 => "INVALID_TAG",
        502 => "ALREADY_INVOKING",
        503 => "INVALID_INDEX",
        504 => "INVALID_LENGTH",
        506 => "INVALID_STRING",
        507 => "INVALID_CLASS_LOADER",
        508 => "INVALID_ARRAY",
        509 => "TRANSPORT_LOAD",
        510 => "TRANSPORT_INIT",
        511 => "NATIVE_METHOD",
        512 => "INVALID_COUNT",
        _ => "UNKNOWN_ERROR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::write_string;

    #[test]
    fn test_known_codes_map_to_categories() {
        let cases = [
            (20, FaultKind::ObjectCollected),
            (112, FaultKind::VmDead),
            (110, FaultKind::OutOfMemory),
            (503, FaultKind::IndexOutOfBounds),
            (504, FaultKind::IndexOutOfBounds),
            (10, FaultKind::InvalidThreadState),
            (30, FaultKind::InvalidStackFrame),
            (33, FaultKind::InvalidStackFrame),
            (32, FaultKind::OpaqueFrame),
            (99, FaultKind::Unsupported),
            (34, FaultKind::TypeMismatch),
        ];

        for (code, kind) in cases {
            assert_eq!(ProtocolFault::translate(code, &[]).kind, kind, "code {}", code);
        }
    }

    #[test]
    fn test_unknown_code_keeps_raw_value() {
        let fault = ProtocolFault::translate(4242, &[]);
        assert_eq!(fault.kind, FaultKind::Internal);
        assert_eq!(fault.code, 4242);
        assert!(fault.detail.is_none());
        assert_eq!(fault.name(), "UNKNOWN_ERROR");
    }

    #[test]
    fn test_internal_carries_remote_diagnostic() {
        let mut data = Vec::new();
        write_string(&mut data, "java.lang.NullPointerException");

        let fault = ProtocolFault::translate(error_codes::INTERNAL, &data);
        assert_eq!(fault.kind, FaultKind::Internal);
        assert_eq!(fault.detail.as_deref(), Some("java.lang.NullPointerException"));
        assert!(fault.to_string().contains("NullPointerException"));
    }

    #[test]
    fn test_vm_dead_counts_as_disconnect() {
        let err = JdwpError::from(ProtocolFault::translate(error_codes::VM_DEAD, &[]));
        assert!(err.is_disconnect());
        assert_eq!(err.error_code(), Some(112));
        assert!(JdwpError::Disconnected.is_disconnect());
        assert!(!JdwpError::WireFormat("x".into()).is_disconnect());
    }
}
