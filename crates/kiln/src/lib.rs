pub mod bootstrap;
pub mod buffer;
pub mod command;
pub mod config;
pub mod fatal;
pub mod fresh;
pub mod log;
pub mod os;
pub mod proc;
pub mod region;
pub mod scratch;
pub mod seq;

pub use bootstrap::{
    rebuild_self_or_die, Bootstrap, BootstrapConfig, BootstrapHost, BootstrapOutcome,
    BootstrapState, OsHost, ResumeMode,
};
pub use buffer::WriteBuffer;
pub use command::Command;
pub use config::RuntimeConfig;
pub use fresh::{file_exists, needs_rebuild, needs_rebuild1, Existence, Freshness};
pub use log::Level;
pub use os::{close, mkdir_if_not_exists, open_for_write, rename};
pub use proc::{run_sync, spawn_async, wait_all, Proc};
pub use region::{Mark, Region, RegionId, Zeroable};
pub use scratch::{release_scratch_pool, with_scratch, ScratchPool};
pub use seq::Seq;
