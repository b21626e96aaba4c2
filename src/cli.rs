//! Argument parsing and usage text for the command line in §6.
//! Hand-rolled against `std::env::args()`, the way the teacher's own
//! `main.rs` does it, rather than with a derive-based parser: the
//! grammar is small and entirely positional.

use std::path::PathBuf;

use crate::archive::ArchiveFormat;

pub enum MountTarget {
    /// A single drive letter, e.g. `M`.
    Drive(char),
    /// A fully-qualified directory, created if it doesn't exist yet.
    Directory(PathBuf),
}

pub enum MountMode {
    /// `app <archive-path> <mount-point>`.
    Explicit { archive: PathBuf, target: MountTarget },
    /// `app <archive-path>`: iterate `M:\`..`Q:\` until one mounts.
    DragAndDrop { archive: PathBuf, format: ArchiveFormat },
}

pub fn usage(program: &str) -> String {
    format!(
        "usage:\n  {program} <archive-path> <mount-point>\n  {program} <archive-path>\n\n\
         <mount-point> is a drive letter (e.g. M) or a directory path.\n\
         With no mount point, the archive's extension (.zip, .7z, .rar) is\n\
         required and the drive is chosen automatically from M:\\ through Q:\\."
    )
}

pub fn parse_args(args: &[String]) -> Result<MountMode, String> {
    match args {
        [archive] => {
            let path = PathBuf::from(archive);
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .ok_or_else(|| "drag-and-drop mode requires a .zip, .7z, or .rar extension".to_string())?;
            let format = ArchiveFormat::from_extension(ext)
                .ok_or_else(|| format!("unrecognised archive extension: .{ext}"))?;
            Ok(MountMode::DragAndDrop { archive: path, format })
        }
        [archive, mount_point] => {
            let archive = PathBuf::from(archive);
            let target = parse_mount_target(mount_point);
            Ok(MountMode::Explicit { archive, target })
        }
        [] => Err("no arguments given".to_string()),
        _ => Err("too many arguments".to_string()),
    }
}

fn parse_mount_target(raw: &str) -> MountTarget {
    let trimmed = raw.trim_end_matches([':', '\\', '/']);
    if trimmed.len() == 1 {
        if let Some(letter) = trimmed.chars().next().filter(|c| c.is_ascii_alphabetic()) {
            return MountTarget::Drive(letter.to_ascii_uppercase());
        }
    }
    MountTarget::Directory(PathBuf::from(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_args_is_an_error() {
        assert!(parse_args(&[]).is_err());
    }

    #[test]
    fn single_letter_mount_point_is_a_drive() {
        let args = vec!["archive.zip".to_string(), "M:".to_string()];
        match parse_args(&args).unwrap() {
            MountMode::Explicit { target: MountTarget::Drive('M'), .. } => {}
            _ => panic!("expected a drive target"),
        }
    }

    #[test]
    fn directory_mount_point_is_a_directory() {
        let args = vec!["archive.zip".to_string(), "C:\\mnt\\archive".to_string()];
        match parse_args(&args).unwrap() {
            MountMode::Explicit { target: MountTarget::Directory(_), .. } => {}
            _ => panic!("expected a directory target"),
        }
    }

    #[test]
    fn drag_and_drop_requires_recognised_extension() {
        let args = vec!["archive.bin".to_string()];
        assert!(parse_args(&args).is_err());

        let args = vec!["archive.rar".to_string()];
        assert!(matches!(parse_args(&args), Ok(MountMode::DragAndDrop { .. })));
    }
}
