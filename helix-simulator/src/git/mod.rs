//! Git-hosted content: references, working copies and local emulation

pub mod emulator;
pub mod reference;
pub mod service;
pub mod working_copy;

pub use emulator::{EmulatorState, LocalRepoEmulator, LocalRepoMapping, GIT_LOCAL_HOST};
pub use reference::{GitReference, PartialGitReference, DEFAULT_REF, LOCAL_HOST};
pub use service::{GitService, VirtualRepo, WorkingCopyService, GIT_LOCAL_OWNER};
pub use working_copy::{current_branch, find_working_copy};

#[cfg(test)]
pub use service::MockGitService;
