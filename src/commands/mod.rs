//! CLI command implementations

pub mod age;
pub mod attributions;
pub mod graph;
pub mod init;
pub mod rescore;
pub mod run;
pub mod status;

pub use age::*;
pub use attributions::*;
pub use graph::*;
pub use init::*;
pub use rescore::*;
pub use run::*;
pub use status::*;
