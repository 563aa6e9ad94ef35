//! Start-up diagnostics.
//!
//! When the listener port is taken, [`port_owner`] works out which process
//! holds it so the error message can say "already running" instead of a
//! bare `AddrInUse`.

pub mod port_owner;

pub use port_owner::{
    describe_conflict, find_port_owner, CommandRunner, Platform, PortConflict, PortOwner,
    SystemCommandRunner,
};
