//! Naming of the shared resources.
//!
//! Every resource is `<prefix><suffix>` inside one directory. The prefix is
//! agreed out of band; the suffixes are fixed.

use std::path::{Path, PathBuf};

use crate::error::IpcError;

/// Every shared resource used by one server/client pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// Rung by the client when a request is ready.
    RequestDoorbell,
    /// Rung by the server when the response is ready.
    ResponseDoorbell,
    /// Return-code buffer.
    ReturnCode,
    /// Server-info buffer.
    ServerInfo,
    /// Instruction buffer.
    Instruction,
    /// Observation buffer.
    Observation,
    /// Info buffer.
    Info,
    /// Reward buffer.
    Reward,
    /// Action buffer.
    Action,
    /// Termination buffer.
    Termination,
}

impl Resource {
    /// All resources in suffix order.
    pub const ALL: [Resource; 10] = [
        Resource::RequestDoorbell,
        Resource::ResponseDoorbell,
        Resource::ReturnCode,
        Resource::ServerInfo,
        Resource::Instruction,
        Resource::Observation,
        Resource::Info,
        Resource::Reward,
        Resource::Action,
        Resource::Termination,
    ];

    /// Fixed one-character suffix appended to the prefix.
    pub const fn suffix(self) -> char {
        match self {
            Resource::RequestDoorbell => 'a',
            Resource::ResponseDoorbell => 'b',
            Resource::ReturnCode => '0',
            Resource::ServerInfo => '1',
            Resource::Instruction => '2',
            Resource::Observation => '3',
            Resource::Info => '4',
            Resource::Reward => '5',
            Resource::Action => '6',
            Resource::Termination => '7',
        }
    }
}

/// Where and under which prefix the resources live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    prefix: String,
    dir: PathBuf,
}

impl ResourceNames {
    /// Longest accepted prefix, leaving room for the suffix.
    pub const MAX_PREFIX_LEN: usize = 255;

    /// Validate `prefix` and bind it to `dir`.
    pub fn new(prefix: impl Into<String>, dir: impl Into<PathBuf>) -> Result<Self, IpcError> {
        let prefix = prefix.into();
        let reason = if prefix.is_empty() {
            Some("prefix is empty")
        } else if prefix.len() > Self::MAX_PREFIX_LEN {
            Some("prefix is too long")
        } else if prefix.contains(['/', '\\', '\0']) {
            Some("prefix contains a path separator")
        } else if prefix == "." || prefix == ".." {
            Some("prefix names a directory")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(IpcError::InvalidPrefix { prefix, reason });
        }

        Ok(Self {
            prefix,
            dir: dir.into(),
        })
    }

    /// Agreed prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Directory holding the backing files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full resource name.
    pub fn name(&self, resource: Resource) -> String {
        let mut name = String::with_capacity(self.prefix.len() + 1);
        name.push_str(&self.prefix);
        name.push(resource.suffix());
        name
    }

    /// Path of the backing file.
    pub fn path(&self, resource: Resource) -> PathBuf {
        self.dir.join(self.name(resource))
    }
}

/// `/dev/shm` when the host has it, otherwise the temp directory.
pub fn default_shm_dir() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}
