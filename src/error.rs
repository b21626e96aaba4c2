//! Crate-wide error type and its mapping onto the status codes returned
//! to the kernel filesystem bridge.

use std::fmt;

/// Every error kind the core can produce, per the error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveFsError {
    #[error("archive central structure could not be located: {0}")]
    ArchiveFormat(String),

    #[error("password required or incorrect for encrypted entry")]
    Password,

    #[error("archive source is unreadable: {0}")]
    SourceIo(#[source] std::io::Error),

    #[error("insufficient free space on temp drive: needed {needed} bytes")]
    DiskFull { needed: u64 },

    #[error("path exceeds the maximum supported length")]
    PathTooLong,

    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("access denied")]
    AccessDenied,

    #[error("path already exists: {0}")]
    AlreadyExists(String),

    #[error("drive letter {0}: is already in use")]
    DriveInUse(char),

    #[error("invalid parameter")]
    InvalidParameter,

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

/// The status vocabulary returned across the dispatcher boundary (§6).
///
/// This is deliberately smaller and plainer than the kernel bridge's own
/// status type; `dispatcher` is the only module that translates between
/// the two.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Status {
    Success,
    FileExists,
    PathNotFound,
    AccessDenied,
    InvalidParameter,
    DiskFull,
    NotReady,
    NotImplemented,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl ArchiveFsError {
    /// Maps an error kind onto the status returned to the bridge. Total
    /// over the enum so every new variant must be classified here.
    pub fn status(&self) -> Status {
        match self {
            ArchiveFsError::ArchiveFormat(_) => Status::Error,
            ArchiveFsError::Password => Status::Error,
            ArchiveFsError::SourceIo(_) => Status::Error,
            ArchiveFsError::DiskFull { .. } => Status::DiskFull,
            ArchiveFsError::PathTooLong => Status::Error,
            ArchiveFsError::PathNotFound(_) => Status::PathNotFound,
            ArchiveFsError::AccessDenied => Status::AccessDenied,
            ArchiveFsError::AlreadyExists(_) => Status::FileExists,
            ArchiveFsError::DriveInUse(_) => Status::Error,
            ArchiveFsError::InvalidParameter => Status::InvalidParameter,
            ArchiveFsError::Internal(_) => Status::Error,
        }
    }

    /// User errors are informational: logged locally, never forwarded to
    /// the (out-of-scope) remote error reporter. Everything else is
    /// eligible for remote reporting by that collaborator.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ArchiveFsError::ArchiveFormat(_)
                | ArchiveFsError::Password
                | ArchiveFsError::SourceIo(_)
                | ArchiveFsError::PathNotFound(_)
                | ArchiveFsError::DiskFull { .. }
                | ArchiveFsError::DriveInUse(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ArchiveFsError>;

impl From<std::io::Error> for ArchiveFsError {
    fn from(e: std::io::Error) -> Self {
        ArchiveFsError::SourceIo(e)
    }
}

impl From<zip::result::ZipError> for ArchiveFsError {
    fn from(e: zip::result::ZipError) -> Self {
        match e {
            zip::result::ZipError::InvalidPassword => ArchiveFsError::Password,
            other => ArchiveFsError::ArchiveFormat(other.to_string()),
        }
    }
}

impl From<sevenz_rust::Error> for ArchiveFsError {
    fn from(e: sevenz_rust::Error) -> Self {
        match e {
            sevenz_rust::Error::PasswordRequired | sevenz_rust::Error::MaybeBadPassword(_) => {
                ArchiveFsError::Password
            }
            other => ArchiveFsError::ArchiveFormat(other.to_string()),
        }
    }
}

impl From<unrar::error::UnrarError> for ArchiveFsError {
    fn from(e: unrar::error::UnrarError) -> Self {
        use unrar::error::UnrarError as E;
        match e {
            E::MissingPassword | E::BadPassword => ArchiveFsError::Password,
            other => ArchiveFsError::ArchiveFormat(other.to_string()),
        }
    }
}
