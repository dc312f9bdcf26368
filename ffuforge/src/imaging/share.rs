//! Temporary SMB share and local account for guest capture.

use rand::Rng;
use rand::distr::Alphanumeric;
use std::path::Path;

/// Local account the capture environment logs in with.
pub const CAPTURE_USER: &str = "ffu_user";

/// Share name the guest maps.
pub const CAPTURE_SHARE: &str = "FFUCaptureShare";

const PASSWORD_LEN: usize = 24;

/// Random alphanumeric password for the capture account.
pub fn generate_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LEN)
        .map(char::from)
        .collect()
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn new_local_user(name: &str, password: &str) -> String {
    format!(
        "$ErrorActionPreference = 'Stop'; \
         $pw = ConvertTo-SecureString {password} -AsPlainText -Force; \
         New-LocalUser -Name {name} -Password $pw -AccountNeverExpires -PasswordNeverExpires \
         -Description 'Temporary FFU capture account' | Out-Null",
        name = quote(name),
        password = quote(password),
    )
}

pub fn remove_local_user(name: &str) -> String {
    format!(
        "$ErrorActionPreference = 'Stop'; Remove-LocalUser -Name {}",
        quote(name)
    )
}

pub fn new_smb_share(name: &str, path: &Path, user: &str) -> String {
    format!(
        "$ErrorActionPreference = 'Stop'; \
         New-SmbShare -Name {name} -Path {path} -FullAccess {user} | Out-Null",
        name = quote(name),
        path = quote(&path.display().to_string()),
        user = quote(user),
    )
}

pub fn remove_smb_share(name: &str) -> String {
    format!(
        "$ErrorActionPreference = 'Stop'; Remove-SmbShare -Name {} -Force",
        quote(name)
    )
}

/// True when PowerShell reported the user or share as missing.
pub fn is_missing(detail: &str) -> bool {
    let lower = detail.to_lowercase();
    lower.contains("was not found") || lower.contains("no msft_smbshare objects found")
}

/// `\\host\share`.
pub fn unc_path(host: &str, share: &str) -> String {
    format!("\\\\{host}\\{share}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_password_shape() {
        let a = generate_password();
        let b = generate_password();
        assert_eq!(a.len(), PASSWORD_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_scripts_quote_values() {
        let script = new_smb_share("FFU", &PathBuf::from("C:\\FFU\\O'Neil"), CAPTURE_USER);
        assert!(script.contains("-Path 'C:\\FFU\\O''Neil'"));
        assert!(script.contains("-FullAccess 'ffu_user'"));
        assert!(remove_local_user("ffu_user").contains("Remove-LocalUser -Name 'ffu_user'"));
    }

    #[test]
    fn test_missing_detection() {
        assert!(is_missing("User ffu_user was not found."));
        assert!(is_missing("No MSFT_SMBShare objects found with property 'Name' equal to 'FFU'"));
        assert!(!is_missing("Access is denied."));
    }

    #[test]
    fn test_unc_path() {
        assert_eq!(unc_path("BUILD01", "FFUCaptureShare"), "\\\\BUILD01\\FFUCaptureShare");
    }
}
