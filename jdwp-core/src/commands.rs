// JDWP command identifiers used by the engine
//
// Command Sets:
// 1 = VirtualMachine
// 3 = ClassType
// 5 = InterfaceType
// 9 = ObjectReference
// 11 = ThreadReference
// 16 = StackFrame
// 64 = Event (debuggee -> debugger)

// Command set IDs
pub mod command_sets {
    pub const VIRTUAL_MACHINE: u8 = 1;
    pub const CLASS_TYPE: u8 = 3;
    pub const INTERFACE_TYPE: u8 = 5;
    pub const OBJECT_REFERENCE: u8 = 9;
    pub const THREAD_REFERENCE: u8 = 11;
    pub const STACK_FRAME: u8 = 16;
    pub const EVENT: u8 = 64;
}

// VirtualMachine commands (set 1)
pub mod vm_commands {
    pub const VERSION: u8 = 1;
    pub const DISPOSE: u8 = 6;
    pub const ID_SIZES: u8 = 7;
    pub const SUSPEND: u8 = 8;
    pub const RESUME: u8 = 9;
    pub const EXIT: u8 = 10;
    pub const DISPOSE_OBJECTS: u8 = 14;
    pub const HOLD_EVENTS: u8 = 15;
    pub const RELEASE_EVENTS: u8 = 16;
    pub const REDEFINE_CLASSES: u8 = 18;
}

// ClassType commands (set 3)
pub mod class_type_commands {
    pub const INVOKE_METHOD: u8 = 3;
    pub const NEW_INSTANCE: u8 = 4;
}

// InterfaceType commands (set 5)
pub mod interface_type_commands {
    pub const INVOKE_METHOD: u8 = 1;
}

// ObjectReference commands (set 9)
pub mod object_reference_commands {
    pub const INVOKE_METHOD: u8 = 6;
}

// ThreadReference commands (set 11)
pub mod thread_commands {
    pub const SUSPEND: u8 = 2;
    pub const RESUME: u8 = 3;
}

// StackFrame commands (set 16)
pub mod stack_frame_commands {
    pub const POP_FRAMES: u8 = 4;
}

// Event commands (set 64)
pub mod event_commands {
    pub const COMPOSITE: u8 = 100;
}

// Event kinds carried in a composite event
pub mod event_kinds {
    pub const SINGLE_STEP: u8 = 1;
    pub const BREAKPOINT: u8 = 2;
    pub const EXCEPTION: u8 = 4;
    pub const THREAD_START: u8 = 6;
    pub const THREAD_DEATH: u8 = 7;
    pub const CLASS_PREPARE: u8 = 8;
    pub const METHOD_ENTRY: u8 = 40;
    pub const METHOD_EXIT: u8 = 41;
    pub const VM_START: u8 = 90;
    pub const VM_DEATH: u8 = 99;
}

// Suspend policies
pub mod suspend_policy {
    pub const NONE: u8 = 0;
    pub const EVENT_THREAD: u8 = 1;
    pub const ALL: u8 = 2;
}

/// Whether a command lets the debuggee run. Issuing one ends the suspend scope
/// immediately, before any reply.
pub fn resumes_debuggee(command_set: u8, command: u8) -> bool {
    matches!(
        (command_set, command),
        (command_sets::VIRTUAL_MACHINE, vm_commands::RESUME)
            | (command_sets::VIRTUAL_MACHINE, vm_commands::REDEFINE_CLASSES)
            | (command_sets::THREAD_REFERENCE, thread_commands::RESUME)
            | (command_sets::CLASS_TYPE, class_type_commands::INVOKE_METHOD)
            | (command_sets::CLASS_TYPE, class_type_commands::NEW_INSTANCE)
            | (command_sets::INTERFACE_TYPE, interface_type_commands::INVOKE_METHOD)
            | (command_sets::OBJECT_REFERENCE, object_reference_commands::INVOKE_METHOD)
            | (command_sets::STACK_FRAME, stack_frame_commands::POP_FRAMES)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_class_commands() {
        assert!(resumes_debuggee(command_sets::VIRTUAL_MACHINE, vm_commands::RESUME));
        assert!(resumes_debuggee(command_sets::THREAD_REFERENCE, thread_commands::RESUME));
        assert!(resumes_debuggee(
            command_sets::OBJECT_REFERENCE,
            object_reference_commands::INVOKE_METHOD
        ));

        assert!(!resumes_debuggee(command_sets::VIRTUAL_MACHINE, vm_commands::SUSPEND));
        assert!(!resumes_debuggee(command_sets::VIRTUAL_MACHINE, vm_commands::HOLD_EVENTS));
        assert!(!resumes_debuggee(command_sets::THREAD_REFERENCE, thread_commands::SUSPEND));
    }
}
