pub mod amount;
pub mod capability;
pub mod error;
pub mod hash;

pub use amount::{parse_minimal_units, Amount, AmountParseError};
pub use capability::{Capabilities, DefaultCapabilities, HashCapability, MerkleCapability, SignatureCapability};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use hash::Hash256;
