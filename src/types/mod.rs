//! Wire and domain types.

pub mod command;
pub mod metadata;
pub mod protocol;
pub mod task;
pub mod value;

pub use command::CommandRequest;
pub use metadata::{
    ConfigEntry, DeviceMetadata, FieldSpec, ProtocolMetadata, ServiceMetadata, ValueType,
    WireFormat,
};
pub use protocol::{Envelope, InvalidEnvelope, ProtocolMessage, ProtocolPart};
pub use task::{Task, TaskOutput, TaskVariable};
pub use value::{VarMap, VarValue};
