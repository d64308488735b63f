//! Git plumbing shared by every protocol
//!
//! Read-only queries go through libgit2 ([`GitRepo`]); anything that mutates a
//! repository runs as a bounded subprocess ([`command::GitCommand`]).

pub mod command;
mod repo;
mod url;

pub use command::{GitCommand, GitOutput};
pub use repo::GitRepo;
pub use url::{RepoUrl, UrlKind};
