// VirtualMachine command implementations
//
// These are the fundamental commands for interacting with the JVM

use crate::commands::{command_sets, thread_commands, vm_commands};
use crate::connection::JdwpConnection;
use crate::error::JdwpResult;
use crate::reader::{read_i32, read_string};
use crate::types::{IdSize, IdSizes, ObjectId, ThreadId};
use crate::writer::write_id;
use bytes::BufMut;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// JVM version information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmVersion {
    pub description: String,
    pub jdwp_major: i32,
    pub jdwp_minor: i32,
    pub vm_version: String,
    pub vm_name: String,
}

/// Payload of VirtualMachine.DisposeObjects: a count, then (object, refCnt) pairs
pub fn encode_dispose_objects(objects: &[(ObjectId, u32)], object_size: IdSize) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + objects.len() * (object_size.bytes() + 4));
    data.put_i32(objects.len() as i32);
    for &(id, count) in objects {
        write_id(&mut data, object_size, id);
        data.put_i32(count.min(i32::MAX as u32) as i32);
    }
    data
}

impl JdwpConnection {
    /// Get JVM version information (VirtualMachine.Version command)
    pub async fn get_version(&self) -> JdwpResult<VmVersion> {
        let reply = self
            .send_command(command_sets::VIRTUAL_MACHINE, vm_commands::VERSION, Vec::new())
            .await?;
        let mut data = reply.as_slice();

        let description = read_string(&mut data)?;
        let jdwp_major = read_i32(&mut data)?;
        let jdwp_minor = read_i32(&mut data)?;
        let vm_version = read_string(&mut data)?;
        let vm_name = read_string(&mut data)?;

        Ok(VmVersion {
            description,
            jdwp_major,
            jdwp_minor,
            vm_version,
            vm_name,
        })
    }

    /// Ask the VM for its identifier widths (VirtualMachine.IDSizes command)
    /// and use them for every later payload on this connection
    pub async fn negotiate_id_sizes(&self) -> JdwpResult<IdSizes> {
        let reply = self
            .send_command(command_sets::VIRTUAL_MACHINE, vm_commands::ID_SIZES, Vec::new())
            .await?;
        let mut data = reply.as_slice();

        let sizes = IdSizes {
            field: IdSize::try_from(read_i32(&mut data)?)?,
            method: IdSize::try_from(read_i32(&mut data)?)?,
            object: IdSize::try_from(read_i32(&mut data)?)?,
            reference_type: IdSize::try_from(read_i32(&mut data)?)?,
            frame: IdSize::try_from(read_i32(&mut data)?)?,
        };

        debug!("Negotiated ID sizes: {:?}", sizes);
        self.set_id_sizes(sizes);
        Ok(sizes)
    }

    /// Suspend every thread (VirtualMachine.Suspend command).
    /// The suspend scope becomes active once the VM acknowledges.
    pub async fn suspend_all(&self) -> JdwpResult<()> {
        self.send_command(command_sets::VIRTUAL_MACHINE, vm_commands::SUSPEND, Vec::new())
            .await?;
        self.notify_suspend();
        Ok(())
    }

    /// Resume every thread (VirtualMachine.Resume command).
    /// A VM that died or dropped the connection meanwhile counts as resumed.
    pub async fn resume_all(&self) -> JdwpResult<()> {
        match self
            .send_command(command_sets::VIRTUAL_MACHINE, vm_commands::RESUME, Vec::new())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_disconnect() => {
                debug!("Resume ignored: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Suspend a single thread (ThreadReference.Suspend command)
    pub async fn suspend_thread(&self, thread: ThreadId) -> JdwpResult<()> {
        let mut data = Vec::new();
        write_id(&mut data, self.id_sizes().object, thread);
        self.send_command(command_sets::THREAD_REFERENCE, thread_commands::SUSPEND, data)
            .await?;
        Ok(())
    }

    /// Resume a single thread (ThreadReference.Resume command)
    pub async fn resume_thread(&self, thread: ThreadId) -> JdwpResult<()> {
        let mut data = Vec::new();
        write_id(&mut data, self.id_sizes().object, thread);
        self.send_command(command_sets::THREAD_REFERENCE, thread_commands::RESUME, data)
            .await?;
        Ok(())
    }

    /// Detach from the VM (VirtualMachine.Dispose command) and close
    pub async fn dispose(&self) -> JdwpResult<()> {
        info!("Disposing VM connection");
        let result = self
            .send_command(command_sets::VIRTUAL_MACHINE, vm_commands::DISPOSE, Vec::new())
            .await;
        self.close();
        match result {
            Err(e) if !e.is_disconnect() => Err(e),
            _ => Ok(()),
        }
    }

    /// Terminate the VM with `exit_code` (VirtualMachine.Exit command)
    pub async fn exit(&self, exit_code: i32) -> JdwpResult<()> {
        info!("Requesting VM exit with code {}", exit_code);
        let mut data = Vec::new();
        data.put_i32(exit_code);
        let result = self
            .send_command(command_sets::VIRTUAL_MACHINE, vm_commands::EXIT, data)
            .await;
        self.close();
        match result {
            Err(e) if !e.is_disconnect() => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{read_id, read_u32};

    #[test]
    fn test_dispose_objects_payload() {
        let data = encode_dispose_objects(&[(0x11, 2), (0x22, 1)], IdSize::Four);
        assert_eq!(data.len(), 4 + 2 * (4 + 4));

        let mut buf = data.as_slice();
        assert_eq!(read_i32(&mut buf).unwrap(), 2);
        assert_eq!(read_id(&mut buf, IdSize::Four).unwrap(), 0x11);
        assert_eq!(read_u32(&mut buf).unwrap(), 2);
        assert_eq!(read_id(&mut buf, IdSize::Four).unwrap(), 0x22);
        assert_eq!(read_u32(&mut buf).unwrap(), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_dispose_payload() {
        assert_eq!(encode_dispose_objects(&[], IdSize::Eight), vec![0, 0, 0, 0]);
    }
}
