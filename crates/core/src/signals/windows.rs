//! Windows delivery through `SetConsoleCtrlHandler`.
//!
//! The console control handler already runs on a thread the OS creates for
//! it, so the adapter is invoked directly from there.

use std::sync::atomic::{AtomicBool, Ordering};

use windows_sys::Win32::Foundation::BOOL;
use windows_sys::Win32::System::Console::{
    SetConsoleCtrlHandler, CTRL_BREAK_EVENT, CTRL_CLOSE_EVENT, CTRL_C_EVENT, CTRL_LOGOFF_EVENT,
    CTRL_SHUTDOWN_EVENT,
};

use super::{dispatch, ConsoleEvent};
use crate::errors::SignalError;

static INSTALLED: AtomicBool = AtomicBool::new(false);

unsafe extern "system" fn console_ctrl_handler(ctrl_type: u32) -> BOOL {
    let event = match ctrl_type {
        CTRL_C_EVENT => ConsoleEvent::Interrupt,
        CTRL_BREAK_EVENT => ConsoleEvent::Break,
        CTRL_CLOSE_EVENT => ConsoleEvent::Close,
        CTRL_LOGOFF_EVENT => ConsoleEvent::LogOff,
        CTRL_SHUTDOWN_EVENT => ConsoleEvent::Shutdown,
        _ => return 0,
    };
    BOOL::from(dispatch(event, None))
}

pub(super) fn install() -> Result<(), SignalError> {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }
    // SAFETY: the handler is a plain function with the signature the API
    // expects and only touches process-wide synchronised state.
    let ok = unsafe { SetConsoleCtrlHandler(Some(console_ctrl_handler), 1) };
    if ok == 0 {
        INSTALLED.store(false, Ordering::SeqCst);
        return Err(SignalError::RegistrationFailed(
            std::io::Error::last_os_error().to_string(),
        ));
    }
    Ok(())
}

pub(super) fn uninstall() {
    if INSTALLED.swap(false, Ordering::SeqCst) {
        // SAFETY: removes the handler added in `install`.
        unsafe {
            SetConsoleCtrlHandler(Some(console_ctrl_handler), 0);
        }
    }
}
