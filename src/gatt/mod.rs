//! GATT service discovery over an external GATT client

pub mod client;
pub mod discovery;
pub mod types;

pub use client::{GattClient, GattClientError, StackLock};
pub use discovery::{GattDiscovery, GattDiscoveryError};
pub use types::{
    CharacteristicEntry, CharacteristicInformation, CharacteristicProperties, ConnectionId,
    DescriptorEntry, DiscoveryEvent, DiscoveryHandler, DiscoveryStatus, GattClientEvent,
    GattConnectionEvent, GattUuid, ServiceDiscoveryIndication, ServiceEntry, StackId,
    SubscriptionId, TransactionId,
};
