//! Sample module exporting the Flick extension ABI.
//!
//! Build with `--features fail` to report an error, or `--features abort`
//! to kill the process that loaded it.

#[cfg(not(any(feature = "fail", feature = "abort")))]
flick::extension_entry!(|| Ok(()));

#[cfg(feature = "fail")]
flick::extension_entry!(|| Err("clipboard unavailable".to_string()));

#[cfg(feature = "abort")]
flick::extension_entry!(|| std::process::abort());
