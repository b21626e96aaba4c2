//! # SimpleZipDrive
//!
//! Mounts a ZIP, 7Z, or RAR archive as a read-only drive via the Dokan
//! user-mode filesystem driver, so any application can browse and open
//! archive contents without a separate extraction step.
//!
//! ## Usage
//!
//! ```text
//! simplezipdrive <archive-path> <mount-point>
//! simplezipdrive <archive-path>
//! ```
//!
//! The first form mounts at an explicit drive letter or directory. The
//! second iterates drive letters `M:\` through `Q:\` until one succeeds,
//! the way a drag-and-drop launcher would invoke this binary.

use std::env;
use std::io::{IsTerminal, Read, Write};
use std::path::Path;
use std::process::ExitCode;

use simplezipdrive::archive::ArchiveFormat;
use simplezipdrive::cli::{self, MountMode, MountTarget};
use simplezipdrive::mount::{self, SessionTempDir};

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let program = env::args().next().unwrap_or_else(|| "simplezipdrive".to_string());

    let mode = match cli::parse_args(&args) {
        Ok(mode) => mode,
        Err(message) => {
            eprintln!("{message}\n");
            eprintln!("{}", cli::usage(&program));
            return fail();
        }
    };

    let result = match mode {
        MountMode::Explicit { archive, target } => run_explicit(&archive, target),
        MountMode::DragAndDrop { archive, format } => run_drag_and_drop(&archive, format),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            log::error!("{message}");
            eprintln!("error: {message}");
            fail()
        }
    }
}

fn fail() -> ExitCode {
    pause_unless_redirected();
    ExitCode::FAILURE
}

/// Waits for a keypress before the console window closes, but only
/// when stdin is an interactive terminal (§6: "pause for a keypress
/// unless input is redirected").
fn pause_unless_redirected() {
    if std::io::stdin().is_terminal() {
        print!("Press Enter to continue...");
        let _ = std::io::stdout().flush();
        let mut buf = [0u8; 1];
        let _ = std::io::stdin().read(&mut buf);
    }
}

fn run_explicit(archive: &Path, target: MountTarget) -> Result<(), String> {
    let extension = archive.extension().and_then(|e| e.to_str());
    let formats = mount::format_attempt_order(extension);

    let mount_point = match &target {
        MountTarget::Drive(letter) => mount::drive_mount_point(*letter),
        MountTarget::Directory(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| format!("could not create mount point {}: {e}", dir.display()))?;
            widestring::U16CString::from_os_str(dir.as_os_str()).map_err(|e| e.to_string())?
        }
    };

    run_one_mount(archive, &formats, &mount_point)
}

fn run_drag_and_drop(archive: &Path, format: ArchiveFormat) -> Result<(), String> {
    let formats = [format];
    let mut last_error = None;
    for &letter in mount::DRAG_AND_DROP_DRIVES {
        let mount_point = mount::drive_mount_point(letter);
        match run_one_mount(archive, &formats, &mount_point) {
            Ok(()) => return Ok(()),
            Err(message) => {
                log::warn!("drive {letter}: {message}");
                last_error = Some(message);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| "no drive letter from M: through Q: was available".to_string()))
}

fn run_one_mount(
    archive: &Path,
    formats: &[ArchiveFormat],
    mount_point: &widestring::U16CString,
) -> Result<(), String> {
    let session = SessionTempDir::create().map_err(|e| e.to_string())?;

    let password_provider = || prompt_password();

    let dispatcher = match mount::prepare_dispatcher(archive, formats, session.path(), &password_provider) {
        Ok(d) => d,
        Err(e) => {
            session.teardown();
            return Err(e.to_string());
        }
    };

    // Mounting blocks the calling thread until the drive is unmounted
    // (console interrupt, explicit unmount, or a fatal driver error);
    // the actual Dokan driver call lives behind this module boundary so
    // `prepare_dispatcher` can be tested on its own, off Windows.
    mount_and_wait(dispatcher, mount_point, session)
}

#[cfg(windows)]
fn mount_and_wait(
    dispatcher: simplezipdrive::dispatcher::ArchiveFsDispatcher,
    mount_point: &widestring::U16CString,
    session: SessionTempDir,
) -> Result<(), String> {
    use dokan::{init, shutdown, MountFlags, MountOptions};

    init();
    mount::signal::install(mount_point);
    let options = MountOptions {
        mount_point,
        flags: MountFlags::WRITE_PROTECT,
        ..Default::default()
    };
    let outcome = dokan::mount(&dispatcher, &options).map_err(|e| format!("mount failed: {e:?}"));
    shutdown();
    session.teardown();
    outcome
}

#[cfg(not(windows))]
fn mount_and_wait(
    _dispatcher: simplezipdrive::dispatcher::ArchiveFsDispatcher,
    _mount_point: &widestring::U16CString,
    session: SessionTempDir,
) -> Result<(), String> {
    session.teardown();
    Err("the Dokan kernel bridge is only available on Windows".to_string())
}

fn prompt_password() -> String {
    eprint!("password (leave empty if none): ");
    let _ = std::io::stderr().flush();
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);
    line.trim_end_matches(['\r', '\n']).to_string()
}
