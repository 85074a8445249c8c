#![cfg(target_os = "windows")]

//! Native Windows HID handles.
//!
//! [`WinHidOpener`] opens a device-interface path with `CreateFileW` and
//! `FILE_FLAG_OVERLAPPED`, which gives us two things hidapi can't:
//! - a real share mode (`0` for exclusive, read|write for shared)
//! - reads bounded by a timeout that don't block concurrent feature writes
//!
//! Reads return the raw report including the leading report-ID byte, which is
//! what [`split_report`](crate::report::split_report) expects.
//!
//! ## Dependencies
//! Requires `windows-sys` with HID, FileSystem, IO and Threading features.

use core::ffi::c_void;
use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;
use std::ptr::{null, null_mut};
use std::time::Duration;

use crate::device::{HidHandle, HidOpener, ReadStatus, ShareMode};
use crate::error::DeviceError;

use windows_sys::Win32::Devices::HumanInterfaceDevice::{
    HidD_FreePreparsedData, HidD_GetPreparsedData, HidD_SetFeature, HidP_GetCaps, HIDP_CAPS,
    HIDP_STATUS_SUCCESS, PHIDP_PREPARSED_DATA,
};
use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_DEVICE_NOT_CONNECTED, ERROR_INVALID_HANDLE,
    ERROR_IO_PENDING, ERROR_OPERATION_ABORTED, GENERIC_READ, GENERIC_WRITE, HANDLE,
    INVALID_HANDLE_VALUE, WAIT_OBJECT_0, WAIT_TIMEOUT, WIN32_ERROR,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, ReadFile, FILE_FLAG_OVERLAPPED, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows_sys::Win32::System::Threading::{CreateEventW, WaitForSingleObject};
use windows_sys::Win32::System::IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED};

/// Fallback when the descriptor can't be queried: report ID + 20-byte payload.
const DEFAULT_INPUT_LEN: usize = 21;

/// Opens HID paths with native share modes.
#[derive(Clone, Copy, Debug, Default)]
pub struct WinHidOpener;

impl HidOpener for WinHidOpener {
    fn open(&self, path: &str, mode: ShareMode) -> Result<Box<dyn HidHandle>, DeviceError> {
        let wide: Vec<u16> = OsStr::new(path).encode_wide().chain(Some(0)).collect();
        let share = match mode {
            ShareMode::Exclusive => 0,
            ShareMode::Shared => FILE_SHARE_READ | FILE_SHARE_WRITE,
        };

        // SAFETY: `wide` is NUL-terminated and outlives the call.
        let handle = unsafe {
            CreateFileW(
                wide.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                share,
                null(),
                OPEN_EXISTING,
                FILE_FLAG_OVERLAPPED,
                null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            let code = unsafe { GetLastError() };
            return Err(DeviceError::Open {
                path: path.to_string(),
                reason: format!("CreateFileW ({mode}) failed with error {code}"),
            });
        }

        let input_len = input_report_len(handle).unwrap_or(DEFAULT_INPUT_LEN);
        Ok(Box::new(WinHidHandle { handle, input_len }))
    }
}

/// `InputReportByteLength` from the device's HIDP caps.
fn input_report_len(handle: HANDLE) -> Option<usize> {
    let mut ppd: PHIDP_PREPARSED_DATA = 0;
    // SAFETY: `handle` is a valid open HID handle; `ppd` is freed below.
    unsafe {
        if HidD_GetPreparsedData(handle, &mut ppd) == 0 {
            return None;
        }
        let mut caps: HIDP_CAPS = core::mem::zeroed();
        let status = HidP_GetCaps(ppd, &mut caps);
        HidD_FreePreparsedData(ppd);
        if status != HIDP_STATUS_SUCCESS || caps.InputReportByteLength == 0 {
            return None;
        }
        Some(usize::from(caps.InputReportByteLength))
    }
}

/// Manual-reset event used for one overlapped operation.
struct Event(HANDLE);

impl Event {
    fn new() -> Result<Self, DeviceError> {
        // SAFETY: no attributes, unnamed event.
        let handle = unsafe { CreateEventW(null(), 1, 0, null()) };
        if handle.is_null() {
            let code = unsafe { GetLastError() };
            return Err(DeviceError::Read(format!("CreateEventW failed with error {code}")));
        }
        Ok(Self(handle))
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.0);
        }
    }
}

fn io_error(code: WIN32_ERROR, what: &str) -> DeviceError {
    match code {
        ERROR_DEVICE_NOT_CONNECTED | ERROR_INVALID_HANDLE | ERROR_OPERATION_ABORTED => {
            DeviceError::Closed
        }
        _ => DeviceError::Read(format!("{what} failed with error {code}")),
    }
}

/// One open overlapped HID handle.
pub struct WinHidHandle {
    handle: HANDLE,
    input_len: usize,
}

// SAFETY: the handle is opened for overlapped I/O; every operation brings its
// own OVERLAPPED + event, so concurrent use from several threads is allowed.
unsafe impl Send for WinHidHandle {}
unsafe impl Sync for WinHidHandle {}

impl WinHidHandle {
    /// Cancel `ov` and wait until the kernel is done with the buffer.
    ///
    /// Returns the byte count if the read completed before the cancel landed.
    fn cancel(&self, ov: &OVERLAPPED) -> Option<usize> {
        let mut n = 0u32;
        // SAFETY: `ov` belongs to an operation issued on `self.handle`.
        let done = unsafe {
            CancelIoEx(self.handle, ov);
            GetOverlappedResult(self.handle, ov, &mut n, 1)
        };
        (done != 0 && n > 0).then_some(n as usize)
    }
}

impl HidHandle for WinHidHandle {
    fn read_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<ReadStatus, DeviceError> {
        let len = buf.len().min(self.input_len);
        let event = Event::new()?;
        // SAFETY: OVERLAPPED is plain data; all-zero is its documented initial state.
        let mut ov: OVERLAPPED = unsafe { core::mem::zeroed() };
        ov.hEvent = event.0;

        // SAFETY: `buf` and `ov` stay alive until the operation completes or
        // `cancel` has waited for it.
        let issued = unsafe {
            ReadFile(
                self.handle,
                buf.as_mut_ptr(),
                len as u32,
                null_mut(),
                &mut ov,
            )
        };
        if issued == 0 {
            let code = unsafe { GetLastError() };
            if code != ERROR_IO_PENDING {
                return Err(io_error(code, "ReadFile"));
            }
        }

        // never pass INFINITE (u32::MAX); the read must stay bounded
        let millis = u32::try_from(timeout.as_millis())
            .unwrap_or(u32::MAX - 1)
            .min(u32::MAX - 1);
        let wait = unsafe { WaitForSingleObject(event.0, millis) };

        if wait == WAIT_TIMEOUT {
            return Ok(match self.cancel(&ov) {
                Some(n) => ReadStatus::Data(n),
                None => ReadStatus::TimedOut,
            });
        }
        if wait != WAIT_OBJECT_0 {
            let code = unsafe { GetLastError() };
            self.cancel(&ov);
            return Err(io_error(code, "WaitForSingleObject"));
        }

        let mut n = 0u32;
        // SAFETY: the event is signalled, the operation has completed.
        let ok = unsafe { GetOverlappedResult(self.handle, &ov, &mut n, 0) };
        if ok == 0 {
            let code = unsafe { GetLastError() };
            return Err(io_error(code, "GetOverlappedResult"));
        }
        Ok(ReadStatus::Data(n as usize))
    }

    fn send_feature_report(&self, data: &[u8]) -> Result<(), DeviceError> {
        // SAFETY: `data` is valid for `data.len()` bytes for the whole call.
        let ok = unsafe {
            HidD_SetFeature(self.handle, data.as_ptr() as *const c_void, data.len() as u32)
        };
        if ok == 0 {
            let code = unsafe { GetLastError() };
            return Err(match io_error(code, "HidD_SetFeature") {
                DeviceError::Read(msg) => DeviceError::Write(msg),
                other => other,
            });
        }
        Ok(())
    }
}

impl Drop for WinHidHandle {
    fn drop(&mut self) {
        unsafe {
            CancelIoEx(self.handle, null());
            CloseHandle(self.handle);
        }
    }
}
