//! Camera capability check before any device is touched.

use std::ffi::CString;
use std::io::{BufRead, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    Granted,
    Denied,
}

pub trait CapabilityGate {
    fn has_capability(&self) -> bool;

    /// Ask once. A denial is final for the session.
    fn request_capability(&mut self) -> Grant;

    fn resolve(&mut self) -> Grant {
        if self.has_capability() {
            return Grant::Granted;
        }
        let grant = self.request_capability();
        if grant == Grant::Denied {
            log::error!("camera permission denied; restart after changing device access");
        }
        grant
    }
}

/// Yes/no question put to the user.
pub trait Prompt {
    fn confirm(&mut self, question: &str) -> bool;
}

/// Reads the answer from stdin.
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn confirm(&mut self, question: &str) -> bool {
        eprint!("{} [y/N] ", question);
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(_) => matches!(line.trim(), "y" | "Y" | "yes" | "Yes"),
            Err(e) => {
                log::warn!("could not read answer: {}", e);
                false
            }
        }
    }
}

pub struct AssumeYes;

impl Prompt for AssumeYes {
    fn confirm(&mut self, _question: &str) -> bool {
        true
    }
}

/// Capability = read/write access to the selected camera node.
pub struct DeviceGate<P: Prompt> {
    device: PathBuf,
    prompt: P,
}

impl<P: Prompt> DeviceGate<P> {
    pub fn new(device: impl Into<PathBuf>, prompt: P) -> Self {
        Self {
            device: device.into(),
            prompt,
        }
    }
}

impl<P: Prompt> CapabilityGate for DeviceGate<P> {
    fn has_capability(&self) -> bool {
        device_accessible(&self.device)
    }

    fn request_capability(&mut self) -> Grant {
        let question = format!(
            "Camera {} is not accessible. Grant access (for example via the video group), then continue?",
            self.device.display()
        );
        if !self.prompt.confirm(&question) {
            return Grant::Denied;
        }
        if self.has_capability() {
            Grant::Granted
        } else {
            log::warn!(
                "{} is still not accessible; is the user in the video group?",
                self.device.display()
            );
            Grant::Denied
        }
    }
}

pub fn device_accessible(path: &Path) -> bool {
    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    unsafe { libc::access(c_path.as_ptr(), libc::R_OK | libc::W_OK) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Answer(bool, usize);

    impl Prompt for Answer {
        fn confirm(&mut self, _question: &str) -> bool {
            self.1 += 1;
            self.0
        }
    }

    fn writable_file(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("smartdoor-gate-{}-{}", std::process::id(), name));
        std::fs::write(&path, b"").unwrap();
        path
    }

    #[test]
    fn test_accessible_device_skips_prompt() {
        let mut gate = DeviceGate::new(writable_file("ok"), Answer(false, 0));
        assert!(gate.has_capability());
        assert_eq!(gate.resolve(), Grant::Granted);
        assert_eq!(gate.prompt.1, 0);
    }

    #[test]
    fn test_refusal_denies() {
        let mut gate = DeviceGate::new("/nonexistent/video9", Answer(false, 0));
        assert!(!gate.has_capability());
        assert_eq!(gate.resolve(), Grant::Denied);
        assert_eq!(gate.prompt.1, 1);
    }

    #[test]
    fn test_consent_without_access_denies() {
        let mut gate = DeviceGate::new("/nonexistent/video9", AssumeYes);
        assert_eq!(gate.resolve(), Grant::Denied);
    }

    #[test]
    fn test_only_selected_device_counts() {
        let _other = writable_file("other");
        let mut gate = DeviceGate::new("/nonexistent/video9", Answer(true, 0));
        assert_eq!(gate.resolve(), Grant::Denied);
        assert_eq!(gate.prompt.1, 1);
    }
}
