//! Query modules, one per table group, mirroring the repository split in
//! spec §4.2: the application DB (`workflows`, `events`, `token_usage`) and
//! the checkpoint store (`checkpoints`).

pub mod checkpoints;
pub mod events;
pub mod token_usage;
pub mod workflows;
