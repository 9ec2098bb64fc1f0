use super::{AutologonHost, LogonAccount};
use crate::registry::{RegKey, HKEY_USERS};
use crate::types::Secret;
use anyhow::Context;
use windows::core::{HSTRING, PCWSTR, PWSTR};
use windows::Win32::Foundation::{CloseHandle, LocalFree, HANDLE, HLOCAL};
use windows::Win32::Security::Authorization::ConvertSidToStringSidW;
use windows::Win32::Security::{
  LogonUserW, LookupAccountNameW, LOGON32_LOGON_INTERACTIVE, LOGON32_PROVIDER_DEFAULT, PSID,
  SID_NAME_USE,
};
use windows::Win32::UI::Shell::{LoadUserProfileW, UnloadUserProfile, PROFILEINFOW};

// PI_NOUI: never show profile error dialogs in a container.
const PROFILE_NO_UI: u32 = 1;

pub struct WindowsHost;

impl AutologonHost for WindowsHost {
  fn resolve_sid(&self, account: &LogonAccount) -> anyhow::Result<String> {
    let name = HSTRING::from(account.to_string());
    let mut sid_len = 0u32;
    let mut domain_len = 0u32;
    let mut use_ = SID_NAME_USE::default();

    // SAFETY: the sizing call passes null buffers with zero lengths, as documented.
    let _ = unsafe {
      LookupAccountNameW(
        PCWSTR::null(),
        &name,
        PSID::default(),
        &mut sid_len,
        PWSTR::null(),
        &mut domain_len,
        &mut use_,
      )
    };
    if sid_len == 0 {
      anyhow::bail!("account `{account}` not found");
    }

    let mut sid = vec![0u8; sid_len as usize];
    let mut domain = vec![0u16; domain_len.max(1) as usize];
    // SAFETY: buffers are sized from the previous call and outlive this one.
    unsafe {
      LookupAccountNameW(
        PCWSTR::null(),
        &name,
        PSID(sid.as_mut_ptr() as _),
        &mut sid_len,
        PWSTR(domain.as_mut_ptr()),
        &mut domain_len,
        &mut use_,
      )
    }
    .with_context(|| format!("LookupAccountNameW({account})"))?;

    let mut text = PWSTR::null();
    // SAFETY: `sid` holds a valid SID; the returned string is freed with LocalFree below.
    unsafe { ConvertSidToStringSidW(PSID(sid.as_mut_ptr() as _), &mut text) }
      .context("ConvertSidToStringSidW")?;
    // SAFETY: `text` was allocated by ConvertSidToStringSidW.
    let out = unsafe { text.to_string() };
    unsafe {
      let _ = LocalFree(HLOCAL(text.0 as _));
    }
    out.context("SID string is not valid UTF-16")
  }

  fn materialize_profile(&self, account: &LogonAccount, password: &Secret) -> anyhow::Result<()> {
    let user = HSTRING::from(account.user.as_str());
    let domain = HSTRING::from(account.domain.as_str());
    let pw = HSTRING::from(password.expose());
    let mut token = HANDLE::default();

    // SAFETY: all string parameters outlive the call; `token` is a valid out pointer.
    unsafe {
      LogonUserW(
        &user,
        &domain,
        &pw,
        LOGON32_LOGON_INTERACTIVE,
        LOGON32_PROVIDER_DEFAULT,
        &mut token,
      )
    }
    .with_context(|| format!("LogonUserW({account})"))?;

    let mut user_buf: Vec<u16> = account.user.encode_utf16().chain(Some(0)).collect();
    let mut profile = PROFILEINFOW {
      dwSize: std::mem::size_of::<PROFILEINFOW>() as u32,
      dwFlags: PROFILE_NO_UI,
      lpUserName: PWSTR(user_buf.as_mut_ptr()),
      ..Default::default()
    };

    // SAFETY: `token` is a live logon token and `profile` is initialised with its size.
    let loaded = unsafe { LoadUserProfileW(token, &mut profile) };
    if loaded.is_ok() {
      // SAFETY: the profile handle came from LoadUserProfileW for this token.
      if let Err(e) = unsafe { UnloadUserProfile(token, profile.hProfile) } {
        tracing::debug!(error = %e, "UnloadUserProfile failed");
      }
    }
    // SAFETY: the token is owned here and closed once.
    unsafe {
      let _ = CloseHandle(token);
    }

    loaded.with_context(|| format!("LoadUserProfileW({account})"))
  }

  fn open_user_hives(&self) -> anyhow::Result<()> {
    RegKey::open(HKEY_USERS, "")?
      .map(|_| ())
      .ok_or_else(|| anyhow::anyhow!("HKEY_USERS is not available"))
  }

  fn hive_present(&self, sid: &str) -> anyhow::Result<bool> {
    Ok(RegKey::open(HKEY_USERS, sid)?.is_some())
  }

  fn ensure_key(&self, sid: &str, path: &str) -> anyhow::Result<bool> {
    let (_key, created) = RegKey::create(HKEY_USERS, &format!("{sid}\\{path}"))?;
    Ok(created)
  }
}
