//! Advisory lock next to the database.
//!
//! Every process holds the lock shared for as long as it runs. A process
//! that gets it exclusively at startup is the only one using the database,
//! so anything still in flight was left behind by a dead process.

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::Path;

pub struct InstanceLock {
    held: Flock<File>,
    exclusive: bool,
}

impl InstanceLock {
    /// Takes the lock exclusively when no other process holds it, otherwise
    /// waits for a shared hold.
    pub fn acquire(path: &Path) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(held) => Ok(Self { held, exclusive: true }),
            Err((file, errno)) if errno == Errno::EWOULDBLOCK => {
                let held = Flock::lock(file, FlockArg::LockShared).map_err(|(_, errno)| errno)?;
                Ok(Self { held, exclusive: false })
            }
            Err((_, errno)) => Err(errno.into()),
        }
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Downgrades an exclusive hold so other processes can start.
    pub fn share(self) -> anyhow::Result<Self> {
        if !self.exclusive {
            return Ok(self);
        }
        let file = self.held.unlock().map_err(|(_, errno)| errno)?;
        let held = Flock::lock(file, FlockArg::LockShared).map_err(|(_, errno)| errno)?;
        Ok(Self { held, exclusive: false })
    }
}
