//! GATT identifiers, attribute entries and discovery events

use core::ops::Range;

use bitflags::bitflags;
use heapless::Vec;

use crate::config::gatt::{MAX_CHARACTERISTICS, MAX_EVENT_DESCRIPTORS};

/// Top of the attribute handle space
pub const MAX_HANDLE: u16 = 0xFFFF;

/// ATT error code ending a discovery sub-procedure
pub const ATT_ERROR_ATTRIBUTE_NOT_FOUND: u8 = 0x0A;

/// Bluetooth Base UUID 00000000-0000-1000-8000-00805F9B34FB, big-endian
const BASE_UUID: [u8; 16] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0x80, 0x5F, 0x9B, 0x34, 0xFB,
];

/// Protocol stack instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackId(pub u32);

/// GATT connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionId(pub u32);

/// Outstanding GATT client request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionId(pub u32);

/// Connection event registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(pub u32);

/// Attribute type
///
/// 128-bit values are stored big-endian, in the order they are written out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattUuid {
    Uuid16(u16),
    Uuid128([u8; 16]),
}

impl GattUuid {
    /// Expand to the full 128-bit form.
    pub fn to_uuid128(self) -> [u8; 16] {
        match self {
            GattUuid::Uuid16(short) => {
                let mut full = BASE_UUID;
                full[2..4].copy_from_slice(&short.to_be_bytes());
                full
            }
            GattUuid::Uuid128(full) => full,
        }
    }

    /// Compare two UUIDs, treating a 16-bit UUID as its base expansion.
    pub fn matches(&self, other: &GattUuid) -> bool {
        match (self, other) {
            (GattUuid::Uuid16(a), GattUuid::Uuid16(b)) => a == b,
            _ => self.to_uuid128() == other.to_uuid128(),
        }
    }
}

bitflags! {
    /// Characteristic properties from the declaration
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CharacteristicProperties: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

/// Primary service from a service discovery response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceEntry {
    pub uuid: GattUuid,
    pub start_handle: u16,
    pub end_handle: u16,
}

/// Characteristic from a characteristic discovery response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicEntry {
    pub uuid: GattUuid,
    pub value_handle: u16,
    pub properties: CharacteristicProperties,
}

/// Descriptor from a descriptor discovery response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorEntry {
    pub uuid: GattUuid,
    pub handle: u16,
}

/// Responses delivered by the GATT client for a discovery transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattClientEvent<'a> {
    Services(&'a [ServiceEntry]),
    Characteristics(&'a [CharacteristicEntry]),
    Descriptors(&'a [DescriptorEntry]),
    /// The server answered with an ATT error
    ErrorResponse { error_code: u8 },
    /// No response arrived in time
    ResponseTimeout,
}

/// Connection level events from the GATT layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattConnectionEvent {
    Connected(ConnectionId),
    Disconnected(ConnectionId),
}

/// Final state of a discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DiscoveryStatus {
    Success = 0x00,
    ResponseError = 0x01,
    ResponseTimeout = 0x02,
    DeviceDisconnected = 0x03,
    UnknownError = 0x04,
}

/// One resolved characteristic in a service indication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInformation {
    pub uuid: GattUuid,
    pub value_handle: u16,
    pub properties: CharacteristicProperties,
    /// Slice of the indication's descriptor pool
    pub descriptors: Range<usize>,
}

/// A fully resolved service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDiscoveryIndication {
    pub connection_id: ConnectionId,
    pub service: ServiceEntry,
    pub number_of_characteristics: usize,
    /// `None` when the service did not fit in the event buffers
    pub characteristics: Option<Vec<CharacteristicInformation, MAX_CHARACTERISTICS>>,
    descriptors: Vec<DescriptorEntry, MAX_EVENT_DESCRIPTORS>,
}

impl ServiceDiscoveryIndication {
    pub(crate) fn new(
        connection_id: ConnectionId,
        service: ServiceEntry,
        number_of_characteristics: usize,
    ) -> Self {
        Self {
            connection_id,
            service,
            number_of_characteristics,
            characteristics: None,
            descriptors: Vec::new(),
        }
    }

    pub(crate) fn set_contents(
        &mut self,
        characteristics: Vec<CharacteristicInformation, MAX_CHARACTERISTICS>,
        descriptors: Vec<DescriptorEntry, MAX_EVENT_DESCRIPTORS>,
    ) {
        self.characteristics = Some(characteristics);
        self.descriptors = descriptors;
    }

    /// Descriptors belonging to `characteristic`.
    pub fn descriptors_of(&self, characteristic: &CharacteristicInformation) -> &[DescriptorEntry] {
        self.descriptors
            .get(characteristic.descriptors.clone())
            .unwrap_or(&[])
    }

    /// Descriptor count over all characteristics.
    pub fn number_of_descriptors(&self) -> usize {
        self.descriptors.len()
    }
}

/// Events delivered to a discovery handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryEvent<'a> {
    ServiceDiscoveryIndication(&'a ServiceDiscoveryIndication),
    ServiceDiscoveryComplete {
        connection_id: ConnectionId,
        status: DiscoveryStatus,
    },
}

/// Receives discovery results
pub trait DiscoveryHandler {
    fn on_event(&mut self, stack: StackId, event: &DiscoveryEvent<'_>, callback_parameter: u32);
}
