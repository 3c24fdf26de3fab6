mod node_id;
mod value;
mod engine;
mod memory;
mod validation;

pub use node_id::{NodeId, NodeIdError, HASH_LEN};
pub use value::{
    type_filter, Payload, Value, ValueError, ValueFilter, ValueId, ValueType, ValueTypeId,
    CERTIFICATE_TYPE, USER_DATA_TYPE,
};
pub use engine::{DhtEngine, DoneCallback, GetCallback};
pub use memory::{MemoryDht, DEFAULT_BATCH_SIZE};
pub use validation::validate_node_id;

/*
 * DHT collaborator for SecureDht
 *
 * Routing, transport and raw value storage belong to the engine behind
 * `DhtEngine`. This module defines the identifiers and values exchanged
 * with it, plus an in-process engine for demos and tests.
 */
