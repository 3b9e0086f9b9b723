//! Helpers for writing Flick extensions.
//!
//! An extension is a `cdylib` exporting two C symbols:
//!
//! - `run() -> *mut c_char`: performs the action. Returns an empty string on
//!   success or an error message on failure.
//! - `free_string(*mut c_char)`: releases the string returned by `run`.
//!
//! [`extension_entry!`](crate::extension_entry) generates both:
//!
//! ```ignore
//! flick::extension_entry!(|| {
//!     let password = generate_password(24);
//!     copy_to_clipboard(&password).map_err(|e| e.to_string())
//! });
//! ```

use std::ffi::{c_char, CString};
use std::ptr;

/// Hand `message` to the host as an owned C string.
pub fn into_c_string(message: String) -> *mut c_char {
    match CString::new(message.replace('\0', " ")) {
        Ok(s) => s.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Release a string produced by [`into_c_string`].
///
/// # Safety
///
/// `ptr` must be null or come from [`into_c_string`] in the same module, and
/// must not be used afterwards.
pub unsafe fn free_c_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

/// Export the extension ABI around an action of type
/// `fn() -> Result<(), String>`.
#[macro_export]
macro_rules! extension_entry {
    ($action:expr) => {
        #[no_mangle]
        pub extern "C" fn run() -> *mut ::std::ffi::c_char {
            let action: fn() -> ::std::result::Result<(), ::std::string::String> = $action;
            let message = match ::std::panic::catch_unwind(action) {
                Ok(Ok(())) => ::std::string::String::new(),
                Ok(Err(message)) => message,
                Err(_) => ::std::string::String::from("extension panicked"),
            };
            $crate::sdk::into_c_string(message)
        }

        /// # Safety
        ///
        /// `ptr` must come from this module's `run`.
        #[no_mangle]
        pub unsafe extern "C" fn free_string(ptr: *mut ::std::ffi::c_char) {
            $crate::sdk::free_c_string(ptr)
        }
    };
}
