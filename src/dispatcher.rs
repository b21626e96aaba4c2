//! Filesystem Callback Dispatcher (component G): implements the
//! surface consumed by the kernel bridge (`dokan::FileSystemHandler`),
//! mapping each callback onto components A–F and translating our own
//! `ArchiveFsError`/`Status` vocabulary into the bridge's `NTSTATUS`.

use std::sync::{Arc, Mutex};

use dokan::{
    CreateFileInfo, DiskSpaceInfo, FileInfo as DokanFileInfo, FileSystemHandler, FileTimeOperation,
    FillDataError, FindData, OperationError, OperationInfo, OperationResult,
    VolumeInfo as DokanVolumeInfo, FILE_ATTRIBUTE_ARCHIVE, FILE_ATTRIBUTE_DIRECTORY,
    FILE_ATTRIBUTE_READONLY,
};
use dokan_sys::win32::{
    FILE_CREATE, FILE_OPEN, FILE_OPEN_IF, FILE_OVERWRITE, FILE_OVERWRITE_IF, FILE_SUPERSEDE,
};
use widestring::{U16CStr, U16CString};
use windows_sys::Win32::Foundation::{
    STATUS_ACCESS_DENIED, STATUS_DISK_FULL, STATUS_INVALID_PARAMETER, STATUS_NOT_IMPLEMENTED,
    STATUS_OBJECT_NAME_COLLISION, STATUS_OBJECT_NAME_NOT_FOUND, STATUS_SUCCESS,
    STATUS_UNSUCCESSFUL,
};

use crate::archive::ArchiveReader;
use crate::cache::HybridEntryCache;
use crate::catalog::Catalog;
use crate::error::{ArchiveFsError, Status};
use crate::executable::{AccessIntent, ExecutableRedirector};
use crate::handle::{self, CreationDisposition, HandleContext, OpenHandle};
use crate::namespace::{Attributes, NamespaceView};
use crate::path::CanonicalPath;
use crate::security::WorldSecurityDescriptor;

/// Shared, immutable-after-construction state handed to every callback.
/// The catalog needs no lock of its own (invariant 1); only the decoder
/// shared with the cache and redirector does.
pub struct ArchiveFsDispatcher {
    catalog: Catalog,
    cache: HybridEntryCache,
    redirector: ExecutableRedirector,
    decoder: Arc<Mutex<Box<dyn ArchiveReader>>>,
    security: WorldSecurityDescriptor,
    archive_byte_length: Option<u64>,
}

impl ArchiveFsDispatcher {
    pub fn new(
        catalog: Catalog,
        cache: HybridEntryCache,
        redirector: ExecutableRedirector,
        decoder: Arc<Mutex<Box<dyn ArchiveReader>>>,
        archive_byte_length: Option<u64>,
    ) -> std::io::Result<Self> {
        Ok(Self {
            catalog,
            cache,
            redirector,
            decoder,
            security: WorldSecurityDescriptor::new()?,
            archive_byte_length,
        })
    }

    fn namespace(&self) -> NamespaceView<'_> {
        NamespaceView::new(&self.catalog, self.archive_byte_length)
    }
}

/// Per-handle context stored in the kernel bridge's opaque slot. `None`
/// once `close_file` has run, so a stray read after close fails loudly
/// instead of touching freed state.
#[derive(Default)]
pub struct HandleSlot(Mutex<Option<OpenHandle>>);

fn to_disposition(raw: u32) -> CreationDisposition {
    match raw {
        FILE_SUPERSEDE => CreationDisposition::Create,
        FILE_CREATE => CreationDisposition::CreateNew,
        FILE_OPEN => CreationDisposition::Open,
        FILE_OPEN_IF => CreationDisposition::OpenIf,
        FILE_OVERWRITE => CreationDisposition::Truncate,
        FILE_OVERWRITE_IF => CreationDisposition::Append,
        _ => CreationDisposition::Open,
    }
}

fn status_to_ntstatus(status: Status) -> i32 {
    match status {
        Status::Success => STATUS_SUCCESS,
        Status::FileExists => STATUS_OBJECT_NAME_COLLISION,
        Status::PathNotFound => STATUS_OBJECT_NAME_NOT_FOUND,
        Status::AccessDenied => STATUS_ACCESS_DENIED,
        Status::InvalidParameter => STATUS_INVALID_PARAMETER,
        Status::DiskFull => STATUS_DISK_FULL,
        Status::NotReady => STATUS_UNSUCCESSFUL,
        Status::NotImplemented => STATUS_NOT_IMPLEMENTED,
        Status::Error => STATUS_UNSUCCESSFUL,
    }
}

fn to_operation_error(e: ArchiveFsError) -> OperationError {
    if !e.is_user_error() {
        log::error!("internal filesystem error: {e}");
    } else {
        log::warn!("request failed: {e}");
    }
    OperationError::NtStatus(status_to_ntstatus(e.status()))
}

fn path_from_wide(file_name: &U16CStr) -> CanonicalPath {
    CanonicalPath::normalize(&file_name.to_string_lossy())
}

impl<'c, 'h: 'c> FileSystemHandler<'c, 'h> for ArchiveFsDispatcher {
    type Context = HandleSlot;

    fn create_file(
        &'h self,
        file_name: &U16CStr,
        _security_context: &dokan::IO_SECURITY_CONTEXT,
        desired_access: dokan_sys::win32::ACCESS_MASK,
        _file_attributes: u32,
        _share_access: u32,
        create_disposition: u32,
        _create_options: u32,
        _info: &mut OperationInfo<'c, 'h, Self>,
    ) -> OperationResult<CreateFileInfo<Self::Context>> {
        let path = path_from_wide(file_name);
        let disposition = to_disposition(create_disposition);
        let access = AccessIntent {
            execute: desired_access & dokan_sys::win32::FILE_EXECUTE != 0,
            read_data: desired_access & dokan_sys::win32::FILE_READ_DATA != 0,
            write_data: desired_access & dokan_sys::win32::FILE_WRITE_DATA != 0,
            append_data: desired_access & dokan_sys::win32::FILE_APPEND_DATA != 0,
            generic_other: desired_access
                & !(dokan_sys::win32::FILE_READ_DATA
                    | dokan_sys::win32::SYNCHRONIZE
                    | dokan_sys::win32::FILE_READ_ATTRIBUTES)
                != 0,
        };

        let opened = handle::create_handle(
            &self.catalog,
            &self.cache,
            &self.redirector,
            &self.decoder,
            &path,
            disposition,
            access,
        )
        .map_err(to_operation_error)?;

        let is_dir = matches!(opened.context, HandleContext::Directory);
        Ok(CreateFileInfo {
            context: HandleSlot(Mutex::new(Some(opened))),
            is_dir,
            new_file_created: false,
        })
    }

    fn read_file(
        &'h self,
        _file_name: &U16CStr,
        offset: i64,
        buffer: &mut [u8],
        _info: &OperationInfo<'c, 'h, Self>,
        context: &Self::Context,
    ) -> OperationResult<u32> {
        let mut slot = context.0.lock().unwrap();
        let handle = slot
            .as_mut()
            .ok_or_else(|| to_operation_error(ArchiveFsError::Internal("read after close".into())))?;
        let bytes = handle::read_handle(handle, offset, buffer.len()).map_err(to_operation_error)?;
        buffer[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len() as u32)
    }

    fn write_file(
        &'h self,
        _file_name: &U16CStr,
        _offset: i64,
        _buffer: &[u8],
        _info: &OperationInfo<'c, 'h, Self>,
        _context: &Self::Context,
    ) -> OperationResult<u32> {
        Err(to_operation_error(ArchiveFsError::AccessDenied))
    }

    fn flush_file_buffers(
        &'h self,
        _file_name: &U16CStr,
        _info: &OperationInfo<'c, 'h, Self>,
        _context: &Self::Context,
    ) -> OperationResult<()> {
        Ok(())
    }

    fn get_file_information(
        &'h self,
        file_name: &U16CStr,
        _info: &OperationInfo<'c, 'h, Self>,
        _context: &Self::Context,
    ) -> OperationResult<DokanFileInfo> {
        let path = path_from_wide(file_name);
        let info = self.namespace().get_info(&path).map_err(to_operation_error)?;
        Ok(to_dokan_file_info(&info))
    }

    fn find_files(
        &'h self,
        file_name: &U16CStr,
        mut fill_find_data: impl FnMut(&FindData) -> Result<(), FillDataError>,
        _info: &OperationInfo<'c, 'h, Self>,
        _context: &Self::Context,
    ) -> OperationResult<()> {
        let path = path_from_wide(file_name);
        let listing = self.namespace().list(&path).map_err(to_operation_error)?;
        for entry in listing {
            let data = to_find_data(&entry.name, &entry.info);
            match fill_find_data(&data) {
                Ok(()) => {}
                Err(e) => return Err(to_operation_error(ArchiveFsError::Internal(e.to_string()))),
            }
        }
        Ok(())
    }

    fn find_files_with_pattern(
        &'h self,
        file_name: &U16CStr,
        pattern: &U16CStr,
        mut fill_find_data: impl FnMut(&FindData) -> Result<(), FillDataError>,
        _info: &OperationInfo<'c, 'h, Self>,
        _context: &Self::Context,
    ) -> OperationResult<()> {
        let path = path_from_wide(file_name);
        let pattern = pattern.to_string_lossy();
        let listing = self
            .namespace()
            .list_pattern(&path, &pattern)
            .map_err(to_operation_error)?;
        for entry in listing {
            let data = to_find_data(&entry.name, &entry.info);
            let _ = fill_find_data(&data);
        }
        Ok(())
    }

    fn set_file_attributes(
        &'h self,
        _file_name: &U16CStr,
        _attributes: u32,
        _info: &OperationInfo<'c, 'h, Self>,
        _context: &Self::Context,
    ) -> OperationResult<()> {
        Err(to_operation_error(ArchiveFsError::AccessDenied))
    }

    fn set_file_time(
        &'h self,
        _file_name: &U16CStr,
        _creation_time: FileTimeOperation,
        _last_access_time: FileTimeOperation,
        _last_write_time: FileTimeOperation,
        _info: &OperationInfo<'c, 'h, Self>,
        _context: &Self::Context,
    ) -> OperationResult<()> {
        Err(to_operation_error(ArchiveFsError::AccessDenied))
    }

    fn delete_file(
        &'h self,
        _file_name: &U16CStr,
        _info: &OperationInfo<'c, 'h, Self>,
        _context: &Self::Context,
    ) -> OperationResult<()> {
        Err(to_operation_error(ArchiveFsError::AccessDenied))
    }

    fn delete_directory(
        &'h self,
        _file_name: &U16CStr,
        _info: &OperationInfo<'c, 'h, Self>,
        _context: &Self::Context,
    ) -> OperationResult<()> {
        Err(to_operation_error(ArchiveFsError::AccessDenied))
    }

    fn move_file(
        &'h self,
        _file_name: &U16CStr,
        _new_file_name: &U16CStr,
        _replace_if_existing: bool,
        _info: &OperationInfo<'c, 'h, Self>,
        _context: &Self::Context,
    ) -> OperationResult<()> {
        Err(to_operation_error(ArchiveFsError::AccessDenied))
    }

    fn set_end_of_file(
        &'h self,
        _file_name: &U16CStr,
        _offset: i64,
        _info: &OperationInfo<'c, 'h, Self>,
        _context: &Self::Context,
    ) -> OperationResult<()> {
        Err(to_operation_error(ArchiveFsError::AccessDenied))
    }

    fn set_allocation_size(
        &'h self,
        _file_name: &U16CStr,
        _alloc_size: i64,
        _info: &OperationInfo<'c, 'h, Self>,
        _context: &Self::Context,
    ) -> OperationResult<()> {
        Err(to_operation_error(ArchiveFsError::AccessDenied))
    }

    fn lock_file(
        &'h self,
        _file_name: &U16CStr,
        _offset: i64,
        _length: i64,
        _info: &OperationInfo<'c, 'h, Self>,
        _context: &Self::Context,
    ) -> OperationResult<()> {
        Ok(())
    }

    fn unlock_file(
        &'h self,
        _file_name: &U16CStr,
        _offset: i64,
        _length: i64,
        _info: &OperationInfo<'c, 'h, Self>,
        _context: &Self::Context,
    ) -> OperationResult<()> {
        Ok(())
    }

    fn get_disk_free_space(
        &'h self,
        _info: &OperationInfo<'c, 'h, Self>,
    ) -> OperationResult<DiskSpaceInfo> {
        let (free, total) = self.namespace().free_space();
        Ok(DiskSpaceInfo {
            byte_count: total,
            free_byte_count: free,
            available_byte_count: free,
        })
    }

    fn get_volume_information(
        &'h self,
        _info: &OperationInfo<'c, 'h, Self>,
    ) -> OperationResult<DokanVolumeInfo> {
        let vol = self.namespace().volume_info();
        Ok(DokanVolumeInfo {
            name: U16CString::from_str(vol.label).unwrap_or_default(),
            serial_number: 0x5A49_5046, // "ZIPF"
            max_component_length: vol.max_component_length,
            fs_flags: dokan_sys::win32::FILE_READ_ONLY_VOLUME
                | dokan_sys::win32::FILE_CASE_PRESERVED_NAMES
                | dokan_sys::win32::FILE_UNICODE_ON_DISK,
            fs_name: U16CString::from_str(vol.filesystem_name).unwrap_or_default(),
        })
    }

    fn get_file_security(
        &'h self,
        _file_name: &U16CStr,
        _security_information: u32,
        security_descriptor: dokan_sys::win32::PSECURITY_DESCRIPTOR,
        buffer_length: u32,
        _info: &OperationInfo<'c, 'h, Self>,
        _context: &Self::Context,
    ) -> OperationResult<u32> {
        // Every path answers with the same fixed, read-execute-only
        // descriptor; there's no per-entry ACL to look up.
        use windows_sys::Win32::Security::GetSecurityDescriptorLength;

        let src = self.security.as_ptr();
        let needed = unsafe { GetSecurityDescriptorLength(src as *mut _) };
        if buffer_length < needed {
            return Ok(needed);
        }
        unsafe {
            std::ptr::copy_nonoverlapping(src as *const u8, security_descriptor as *mut u8, needed as usize);
        }
        Ok(needed)
    }

    fn set_file_security(
        &'h self,
        _file_name: &U16CStr,
        _security_information: u32,
        _security_descriptor: dokan_sys::win32::PSECURITY_DESCRIPTOR,
        _buffer_length: u32,
        _info: &OperationInfo<'c, 'h, Self>,
        _context: &Self::Context,
    ) -> OperationResult<()> {
        Err(to_operation_error(ArchiveFsError::AccessDenied))
    }

    fn find_streams(
        &'h self,
        _file_name: &U16CStr,
        _fill_find_stream_data: impl FnMut(&dokan::FindStreamData) -> Result<(), FillDataError>,
        _info: &OperationInfo<'c, 'h, Self>,
        _context: &Self::Context,
    ) -> OperationResult<()> {
        Err(OperationError::NtStatus(STATUS_NOT_IMPLEMENTED))
    }

    fn cleanup(&'h self, _file_name: &U16CStr, _info: &OperationInfo<'c, 'h, Self>, context: &Self::Context) {
        if let Some(handle) = context.0.lock().unwrap().as_ref() {
            handle::cleanup_handle(handle);
        }
    }

    fn close_file(&'h self, _file_name: &U16CStr, _info: &OperationInfo<'c, 'h, Self>, context: &Self::Context) {
        if let Some(handle) = context.0.lock().unwrap().take() {
            handle::close_handle(handle);
        }
    }

    fn mounted(&'h self, mount_point: &U16CStr, _info: &OperationInfo<'c, 'h, Self>) -> OperationResult<()> {
        log::info!("mounted at {}", mount_point.to_string_lossy());
        Ok(())
    }

    fn unmounted(&'h self, _info: &OperationInfo<'c, 'h, Self>) -> OperationResult<()> {
        log::info!("unmounted");
        Ok(())
    }
}

fn to_dokan_file_info(info: &crate::namespace::FileInfo) -> DokanFileInfo {
    let attributes = match info.attributes {
        Attributes::Directory => FILE_ATTRIBUTE_DIRECTORY,
        Attributes::ArchiveReadOnly => FILE_ATTRIBUTE_ARCHIVE | FILE_ATTRIBUTE_READONLY,
    };
    DokanFileInfo {
        attributes,
        creation_time: info.created.unwrap_or(info.modified),
        last_access_time: info.accessed.unwrap_or(info.modified),
        last_write_time: info.modified,
        file_size: info.size,
        number_of_links: 1,
        file_index: 0,
    }
}

fn to_find_data(name: &str, info: &crate::namespace::FileInfo) -> FindData {
    FindData {
        attributes: match info.attributes {
            Attributes::Directory => FILE_ATTRIBUTE_DIRECTORY,
            Attributes::ArchiveReadOnly => FILE_ATTRIBUTE_ARCHIVE | FILE_ATTRIBUTE_READONLY,
        },
        creation_time: info.created.unwrap_or(info.modified),
        last_access_time: info.accessed.unwrap_or(info.modified),
        last_write_time: info.modified,
        file_size: info.size,
        file_name: U16CString::from_str(name).unwrap_or_default(),
    }
}
