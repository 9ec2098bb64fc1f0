//! Thin owned wrappers over the Win32 registry calls used for autologon
//! preparation and service discovery.

use windows::core::{HSTRING, PCWSTR, PWSTR};
use windows::Win32::Foundation::{ERROR_FILE_NOT_FOUND, ERROR_NO_MORE_ITEMS, WIN32_ERROR};
use windows::Win32::System::Registry::{
  RegCloseKey, RegCreateKeyExW, RegEnumKeyExW, RegOpenKeyExW, HKEY, KEY_READ, KEY_WRITE,
  REG_CREATED_NEW_KEY, REG_CREATE_KEY_DISPOSITION, REG_OPTION_NON_VOLATILE,
};

pub use windows::Win32::System::Registry::{HKEY_LOCAL_MACHINE, HKEY_USERS};

/// Longest key name the registry allows, plus the terminator.
const MAX_KEY_NAME: usize = 256;

pub struct RegKey(HKEY);

impl Drop for RegKey {
  fn drop(&mut self) {
    // SAFETY: the handle was produced by RegOpenKeyExW/RegCreateKeyExW and is closed once.
    unsafe {
      let _ = RegCloseKey(self.0);
    }
  }
}

impl RegKey {
  /// `Ok(None)` when the key does not exist.
  pub fn open(root: HKEY, path: &str) -> anyhow::Result<Option<Self>> {
    let mut key = HKEY::default();
    let subkey = HSTRING::from(path);
    let subkey = if path.is_empty() {
      PCWSTR::null()
    } else {
      PCWSTR(subkey.as_ptr())
    };
    // SAFETY: `subkey` outlives the call and `key` is a valid out pointer.
    let status = unsafe { RegOpenKeyExW(root, subkey, 0, KEY_READ, &mut key) };
    if status == ERROR_FILE_NOT_FOUND {
      return Ok(None);
    }
    check(status, || format!("open registry key `{path}`"))?;
    Ok(Some(Self(key)))
  }

  /// Opens or creates `path` below `root`; the flag reports whether it was created.
  pub fn create(root: HKEY, path: &str) -> anyhow::Result<(Self, bool)> {
    let mut key = HKEY::default();
    let mut disposition = REG_CREATE_KEY_DISPOSITION::default();
    let subkey = HSTRING::from(path);
    // SAFETY: all pointers reference locals that outlive the call.
    let status = unsafe {
      RegCreateKeyExW(
        root,
        &subkey,
        0,
        PCWSTR::null(),
        REG_OPTION_NON_VOLATILE,
        KEY_READ | KEY_WRITE,
        None,
        &mut key,
        Some(&mut disposition),
      )
    };
    check(status, || format!("create registry key `{path}`"))?;
    Ok((Self(key), disposition == REG_CREATED_NEW_KEY))
  }

  pub fn subkey_names(&self) -> anyhow::Result<Vec<String>> {
    let mut out = Vec::new();
    let mut index = 0u32;
    loop {
      let mut buf = [0u16; MAX_KEY_NAME];
      let mut len = buf.len() as u32;
      // SAFETY: `buf` and `len` describe a writable buffer for the duration of the call.
      let status = unsafe {
        RegEnumKeyExW(
          self.0,
          index,
          PWSTR(buf.as_mut_ptr()),
          &mut len,
          None,
          PWSTR::null(),
          None,
          None,
        )
      };
      if status == ERROR_NO_MORE_ITEMS {
        break;
      }
      check(status, || format!("enumerate registry subkey #{index}"))?;
      out.push(String::from_utf16_lossy(&buf[..len as usize]));
      index += 1;
    }
    Ok(out)
  }
}

fn check(status: WIN32_ERROR, what: impl FnOnce() -> String) -> anyhow::Result<()> {
  status
    .ok()
    .map_err(|e| anyhow::anyhow!("{}: {e}", what()))
}
