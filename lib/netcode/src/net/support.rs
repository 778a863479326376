//! Re-exports the shared network error and manual-serialization contract from `flux` under the
//! path the rest of this module expects (`crate::net::support::*`).

pub use flux::error::{
    Deserialize, ErrorType, ErrorUtils, NetworkError, NetworkResult, PayloadBatch, Serialize, SizedRead,
    SizedWrite,
};
pub use flux::UserId;
