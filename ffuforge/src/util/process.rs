//! Process liveness checks and forced termination.

/// Kill a process and, where the platform allows, its descendants.
///
/// # Returns
/// * `true` - Process was killed or doesn't exist
/// * `false` - Failed to kill (permission denied)
pub fn kill_process_tree(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // Runner children lead their own group; signal the group first.
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL) == 0
                || libc::kill(pid as i32, libc::SIGKILL) == 0
                || !is_process_alive(pid)
        }
    }

    #[cfg(windows)]
    {
        // taskkill /T walks the tree: powershell.exe -> dism.exe
        let status = std::process::Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .output();
        matches!(status, Ok(ref out) if out.status.success()) || !is_process_alive(pid)
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        false
    }
}

/// Check if a process with the given PID exists.
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }

    #[cfg(windows)]
    {
        match std::process::Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid), "/NH"])
            .output()
        {
            Ok(output) => {
                output.status.success()
                    && String::from_utf8_lossy(&output.stdout).contains(&pid.to_string())
            }
            Err(_) => false,
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        false
    }
}
