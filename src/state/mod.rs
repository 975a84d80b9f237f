//! Deployment state.
//!
//! The state maps every cluster name of the manifest to the id of the remote
//! cluster created for it, its lifecycle phase and its last snapshot. It is
//! stored locally or in S3 and guarded by an expiring lock.

mod local;
mod lock;
mod s3;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use s3::S3StateStore;
pub use store::{Document, StateStore, decode_state, encode_state};
pub use types::{
    DeploymentHistoryEntry, DeploymentOperation, DeploymentState, LifecyclePhase, ResourceRecord,
    STATE_VERSION,
};
