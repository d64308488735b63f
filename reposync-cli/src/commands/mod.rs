//! CLI command implementations

pub mod commit;
pub mod merge;
pub mod pointer;
pub mod pull;
pub mod push;
pub mod sync;

pub use commit::CommitAndPushArgs;
pub use merge::MergeArgs;
pub use pointer::UpdateSubmodulePointerArgs;
pub use pull::PullArgs;
pub use push::PushArgs;
pub use sync::SyncArgs;
