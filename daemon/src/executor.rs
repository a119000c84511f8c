//! Priority correction (setpriority, escalated renice)

use crate::collector::ProviderError;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Sets the nice value of `pid` directly. Fails for processes owned by
/// another user unless the daemon itself is privileged.
pub fn set_priority(pid: u32, priority: i32) -> Result<(), ProviderError> {
    let result = unsafe { libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, priority) };
    if result == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Err(ProviderError::NotFound(pid)),
        Some(libc::EPERM) | Some(libc::EACCES) => Err(ProviderError::PermissionDenied(pid)),
        _ => Err(err.into()),
    }
}

/// Builds `<prefix...> renice --priority <priority> -p <pid>`. Newer
/// util-linux treats `-n` as an increment; `--priority` is always absolute.
pub fn renice_command(prefix: &[String], pid: u32, priority: i32) -> Vec<String> {
    let mut argv: Vec<String> = prefix.to_vec();
    argv.extend([
        "renice".to_string(),
        "--priority".to_string(),
        priority.to_string(),
        "-p".to_string(),
        pid.to_string(),
    ]);
    argv
}

/// Runs renice through the escalation prefix (`sudo -n` by default). The child
/// is killed if it outlives `timeout`.
pub async fn renice_escalated(
    prefix: &[String],
    pid: u32,
    priority: i32,
    timeout: Duration,
) -> Result<(), ProviderError> {
    let argv = renice_command(prefix, pid, priority);
    let (program, args) = argv.split_first().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty renice command")
    })?;

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => return Err(ProviderError::Timeout(timeout)),
    };
    if output.status.success() {
        return Ok(());
    }
    Err(ProviderError::CommandFailed {
        command: argv.join(" "),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_escalated_command() {
        let prefix = vec!["sudo".to_string(), "-n".to_string()];
        assert_eq!(
            renice_command(&prefix, 812, 19),
            ["sudo", "-n", "renice", "--priority", "19", "-p", "812"]
        );
    }

    #[test]
    fn setting_current_priority_is_harmless() {
        let pid = std::process::id();
        let current = unsafe { libc::getpriority(libc::PRIO_PROCESS, pid as libc::id_t) };
        set_priority(pid, current).unwrap();
        let after = unsafe { libc::getpriority(libc::PRIO_PROCESS, pid as libc::id_t) };
        assert_eq!(current, after);
    }

    #[test]
    fn missing_pid_is_not_found() {
        let err = set_priority(999_999_999, 10).unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let prefix: Vec<String> = ["sh", "-c", "sleep 5", "x"].map(String::from).to_vec();
        let started = std::time::Instant::now();
        let err = renice_escalated(&prefix, 1, 0, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(d) if d == Duration::from_millis(200)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn failing_command_reports_status() {
        let prefix = vec!["false".to_string()];
        let err = renice_escalated(&prefix, 1, 0, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::CommandFailed { .. }));
    }
}
