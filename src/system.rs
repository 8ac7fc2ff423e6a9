// Process and host identity queries, behind a port so lease logic can be
// exercised without touching the real OS.

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::{gethostname, Pid, Uid, User};

use crate::{Error, Result};

/// Outcome of a zero-signal probe against a process id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessProbe {
    Alive,
    /// The process exists but belongs to another principal.
    PermissionDenied,
    NotFound,
}

impl ProcessProbe {
    pub fn is_alive(self) -> bool {
        !matches!(self, ProcessProbe::NotFound)
    }
}

pub trait SystemIdentity: Send + Sync + std::fmt::Debug {
    fn username(&self) -> Result<String>;
    fn hostname(&self) -> Result<String>;
    fn process_id(&self) -> u32;
    fn probe_process(&self, pid: u32) -> ProcessProbe;
}

/// Identity of the running process as reported by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsIdentity;

impl SystemIdentity for OsIdentity {
    fn username(&self) -> Result<String> {
        match User::from_uid(Uid::current()) {
            Ok(Some(user)) => Ok(user.name),
            Ok(None) => Err(Error::missing("no passwd entry for the current user")),
            Err(errno) => Err(Error::Io(errno.into())),
        }
    }

    fn hostname(&self) -> Result<String> {
        let name = gethostname().map_err(|errno| Error::Io(errno.into()))?;
        Ok(name.to_string_lossy().into_owned())
    }

    fn process_id(&self) -> u32 {
        std::process::id()
    }

    fn probe_process(&self, pid: u32) -> ProcessProbe {
        let Ok(raw) = i32::try_from(pid) else {
            return ProcessProbe::NotFound;
        };
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => ProcessProbe::Alive,
            Err(Errno::EPERM) => ProcessProbe::PermissionDenied,
            Err(_) => ProcessProbe::NotFound,
        }
    }
}
