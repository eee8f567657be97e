pub mod address;
pub mod container_id;
pub mod error;
pub mod fingerprint;
pub mod state;
pub mod super_features;
pub mod token;

pub use address::{IndexRecord, StorageAddress};
pub use container_id::ContainerId;
pub use fingerprint::{Fingerprint, FINGERPRINT_SIZE};
pub use state::DedupState;
pub use super_features::{SuperFeatures, SF_NUM};
pub use token::IndexToken;
