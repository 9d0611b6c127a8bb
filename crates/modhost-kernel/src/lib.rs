//! Modhost Kernel
//!
//! Shared contracts of the module runtime:
//! - [`descriptor`]: the type definition format stored inside module packages
//! - [`error`]: the error taxonomy of every runtime subsystem
//! - [`module`]: module lifecycle states, events and listener contract
//! - [`config`]: runtime configuration loading

// config module
pub mod config;

// descriptor module
pub mod descriptor;
pub use descriptor::*;

// error module
pub mod error;
pub use error::*;

// module lifecycle module
pub mod module;
pub use module::*;
