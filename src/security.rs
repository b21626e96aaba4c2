//! Builds the fixed security descriptor returned from `get_security`
//! (§6): owner and group set to the world SID, one access rule granting
//! `ReadAndExecute` to the world SID. Every mounted path answers with
//! the same descriptor; there is no per-entry ACL in the archive
//! formats this crate reads.

use std::ptr;

use windows_sys::Win32::Foundation::PSID;
use windows_sys::Win32::Security::{
    AddAccessAllowedAce, AllocateAndInitializeSid, FreeSid, InitializeAcl,
    InitializeSecurityDescriptor, SetSecurityDescriptorDacl, SetSecurityDescriptorGroup,
    SetSecurityDescriptorOwner, ACL, ACL_REVISION, SECURITY_DESCRIPTOR,
    SECURITY_DESCRIPTOR_REVISION, SECURITY_WORLD_RID, SECURITY_WORLD_SID_AUTHORITY,
};
use windows_sys::Win32::Storage::FileSystem::FILE_GENERIC_READ;
use windows_sys::Win32::System::SystemServices::GENERIC_EXECUTE;

/// `ReadAndExecute`, the single access right granted to the world SID.
const READ_AND_EXECUTE: u32 = FILE_GENERIC_READ | GENERIC_EXECUTE;

/// Owns the world SID, the ACL buffer, and the security descriptor
/// built around them, all for the lifetime of the mount.
pub struct WorldSecurityDescriptor {
    world_sid: PSID,
    acl: Vec<u8>,
    descriptor: SECURITY_DESCRIPTOR,
}

// SAFETY: none of the fields are borrowed across threads mutably; the
// descriptor is read-only once constructed and handed out by `&self`.
unsafe impl Send for WorldSecurityDescriptor {}
unsafe impl Sync for WorldSecurityDescriptor {}

impl WorldSecurityDescriptor {
    pub fn new() -> std::io::Result<Self> {
        unsafe {
            let mut world_sid: PSID = ptr::null_mut();
            let ok = AllocateAndInitializeSid(
                &SECURITY_WORLD_SID_AUTHORITY as *const _ as *mut _,
                1,
                SECURITY_WORLD_RID as u32,
                0,
                0,
                0,
                0,
                0,
                0,
                0,
                &mut world_sid,
            );
            if ok == 0 {
                return Err(std::io::Error::last_os_error());
            }

            // Room for the ACL header plus a single access-allowed ACE
            // sized for the world SID.
            let acl_size = std::mem::size_of::<ACL>() + 64;
            let mut acl = vec![0u8; acl_size];
            if InitializeAcl(acl.as_mut_ptr() as *mut ACL, acl_size as u32, ACL_REVISION) == 0 {
                FreeSid(world_sid);
                return Err(std::io::Error::last_os_error());
            }
            if AddAccessAllowedAce(
                acl.as_mut_ptr() as *mut ACL,
                ACL_REVISION,
                READ_AND_EXECUTE,
                world_sid,
            ) == 0
            {
                FreeSid(world_sid);
                return Err(std::io::Error::last_os_error());
            }

            let mut descriptor: SECURITY_DESCRIPTOR = std::mem::zeroed();
            InitializeSecurityDescriptor(
                &mut descriptor as *mut _ as *mut _,
                SECURITY_DESCRIPTOR_REVISION,
            );
            SetSecurityDescriptorOwner(&mut descriptor as *mut _ as *mut _, world_sid, 0);
            SetSecurityDescriptorGroup(&mut descriptor as *mut _ as *mut _, world_sid, 0);
            SetSecurityDescriptorDacl(
                &mut descriptor as *mut _ as *mut _,
                1,
                acl.as_mut_ptr() as *mut ACL,
                0,
            );

            Ok(Self { world_sid, acl, descriptor })
        }
    }

    /// Pointer to the descriptor, valid for the lifetime of `self`. The
    /// bridge copies out of it synchronously inside a single
    /// dispatcher call.
    pub fn as_ptr(&self) -> *const SECURITY_DESCRIPTOR {
        &self.descriptor
    }
}

impl Drop for WorldSecurityDescriptor {
    fn drop(&mut self) {
        unsafe {
            FreeSid(self.world_sid);
        }
    }
}
