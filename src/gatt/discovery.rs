//! Per-connection GATT service discovery
//!
//! A discovery walks the remote attribute database in three phases:
//! primary services, then for the head service its characteristics, then
//! the descriptors of each of those characteristics. A service is reported
//! and removed from the head of the queue once its last characteristic is
//! described, after which the next service starts its characteristic phase.
//!
//! Only one GATT request is outstanding per discovery. Its response comes
//! back through [`GattDiscovery::handle_client_event`].

use heapless::{Deque, Vec};
use log::{debug, info, warn};

use super::client::{GattClient, GattClientError, StackLock};
use super::types::{
    CharacteristicEntry, CharacteristicInformation, CharacteristicProperties, ConnectionId,
    DescriptorEntry, DiscoveryEvent, DiscoveryHandler, DiscoveryStatus, GattClientEvent,
    GattConnectionEvent, GattUuid, ServiceDiscoveryIndication, ServiceEntry, StackId,
    SubscriptionId, TransactionId, ATT_ERROR_ATTRIBUTE_NOT_FOUND, MAX_HANDLE,
};
use crate::config::gatt::{
    MAX_CHARACTERISTICS, MAX_DESCRIPTORS, MAX_DISCOVERIES, MAX_EVENT_DESCRIPTORS,
    MAX_FILTER_UUIDS, MAX_SERVICES, MAX_STACKS,
};

/// First handle of a full-range service search
const FIRST_HANDLE: u16 = 0x0001;

/// Discovery API errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattDiscoveryError {
    InvalidParameter,
    NotInitialized,
    InvalidBluetoothStackId,
    InsufficientResources,
    InternalError,
    ServiceDiscoveryOutstanding,
    DiscoveryNotOutstanding,
}

impl GattDiscoveryError {
    /// Numeric error code exposed to C-style callers
    pub fn code(self) -> i32 {
        match self {
            GattDiscoveryError::InvalidParameter => -1000,
            GattDiscoveryError::NotInitialized => -1001,
            GattDiscoveryError::InvalidBluetoothStackId => -1002,
            GattDiscoveryError::InsufficientResources => -1003,
            GattDiscoveryError::InternalError => -1004,
            GattDiscoveryError::ServiceDiscoveryOutstanding => -1009,
            GattDiscoveryError::DiscoveryNotOutstanding => -1000,
        }
    }
}

impl From<GattClientError> for GattDiscoveryError {
    fn from(error: GattClientError) -> Self {
        match error {
            GattClientError::InvalidStackId => GattDiscoveryError::InvalidBluetoothStackId,
            GattClientError::InsufficientResources => GattDiscoveryError::InsufficientResources,
            GattClientError::Rejected(_) => GattDiscoveryError::InternalError,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Services,
    Characteristics,
    Descriptors,
}

/// Where the state machine stands after handling an event
enum Progress {
    /// A request is outstanding
    Pending,
    Finished(DiscoveryStatus),
}

struct CharacteristicInfo {
    uuid: GattUuid,
    value_handle: u16,
    properties: CharacteristicProperties,
    descriptors: Vec<DescriptorEntry, MAX_DESCRIPTORS>,
}

struct ServiceInfo {
    entry: ServiceEntry,
    characteristics: Vec<CharacteristicInfo, MAX_CHARACTERISTICS>,
    descriptor_count: usize,
    /// Characteristic whose descriptors are being requested
    current: usize,
    /// Value handle of the first characteristic that did not fit
    truncated_at: Option<u16>,
}

struct DiscoveryInfo<H> {
    connection: ConnectionId,
    transaction: Option<TransactionId>,
    phase: Phase,
    filter: Vec<GattUuid, MAX_FILTER_UUIDS>,
    services: Deque<ServiceInfo, MAX_SERVICES>,
    /// Start handle to search again from once the queue drains
    resume_services: Option<u16>,
    handler: H,
    callback_parameter: u32,
}

impl<H> DiscoveryInfo<H> {
    fn accepts(&self, uuid: &GattUuid) -> bool {
        self.filter.is_empty() || self.filter.iter().any(|wanted| wanted.matches(uuid))
    }
}

struct StackContext<H> {
    stack: StackId,
    subscription: SubscriptionId,
    discoveries: Vec<DiscoveryInfo<H>, MAX_DISCOVERIES>,
}

/// Discovery contexts for every initialised stack
///
/// Exclusive access to the context list comes from `&mut self`. The stack
/// lock of the [`GattClient`] is held around each operation that issues
/// requests or dispatches events.
pub struct GattDiscovery<H: DiscoveryHandler> {
    contexts: Vec<StackContext<H>, MAX_STACKS>,
}

impl<H: DiscoveryHandler> Default for GattDiscovery<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: DiscoveryHandler> GattDiscovery<H> {
    pub const fn new() -> Self {
        Self {
            contexts: Vec::new(),
        }
    }

    pub fn is_initialized(&self, stack: StackId) -> bool {
        self.context_index(stack).is_some()
    }

    /// Whether a discovery is running on `connection`
    pub fn is_outstanding(&self, stack: StackId, connection: ConnectionId) -> bool {
        self.context_index(stack)
            .map(|ctx| {
                self.contexts[ctx]
                    .discoveries
                    .iter()
                    .any(|info| info.connection == connection)
            })
            .unwrap_or(false)
    }

    /// Set up discovery for `stack` and subscribe to its connection events.
    pub fn initialize<C: GattClient>(
        &mut self,
        client: &mut C,
        stack: StackId,
    ) -> Result<(), GattDiscoveryError> {
        if stack.0 == 0 {
            return Err(GattDiscoveryError::InvalidParameter);
        }
        let mut client = StackLock::acquire(client, stack)
            .map_err(|_| GattDiscoveryError::InvalidBluetoothStackId)?;

        if self.is_initialized(stack) || self.contexts.is_full() {
            return Err(GattDiscoveryError::InsufficientResources);
        }

        let subscription = client
            .register_connection_events(stack)
            .map_err(|_| GattDiscoveryError::InsufficientResources)?;

        let context = StackContext {
            stack,
            subscription,
            discoveries: Vec::new(),
        };
        if self.contexts.push(context).is_err() {
            client.unregister_connection_events(stack, subscription);
            return Err(GattDiscoveryError::InsufficientResources);
        }

        debug!("GATT discovery initialised on stack {}", stack.0);
        Ok(())
    }

    /// Release `stack`: outstanding requests are cancelled without callbacks.
    pub fn cleanup<C: GattClient>(
        &mut self,
        client: &mut C,
        stack: StackId,
    ) -> Result<(), GattDiscoveryError> {
        if stack.0 == 0 {
            return Err(GattDiscoveryError::InvalidParameter);
        }
        let Some(index) = self.context_index(stack) else {
            return Err(GattDiscoveryError::NotInitialized);
        };
        let mut client = StackLock::acquire(client, stack)
            .map_err(|_| GattDiscoveryError::InvalidBluetoothStackId)?;

        let context = self.contexts.swap_remove(index);
        release_context(&mut *client, context);
        Ok(())
    }

    /// Drop every context.
    ///
    /// With `force` the client is not touched, for use when the stacks
    /// themselves are already gone.
    pub fn cleanup_all<C: GattClient>(&mut self, client: &mut C, force: bool) {
        while let Some(context) = self.contexts.pop() {
            if force {
                continue;
            }
            let stack = context.stack;
            match StackLock::acquire(&mut *client, stack) {
                Ok(mut client) => release_context(&mut *client, context),
                Err(_) => warn!("stack {} could not be locked for cleanup", stack.0),
            }
        }
    }

    /// Start discovering `connection`.
    ///
    /// With a `filter`, only services whose UUID is in it are reported. The
    /// search still covers the whole handle range.
    pub fn start<C: GattClient>(
        &mut self,
        client: &mut C,
        stack: StackId,
        connection: ConnectionId,
        filter: Option<&[GattUuid]>,
        handler: H,
        callback_parameter: u32,
    ) -> Result<(), GattDiscoveryError> {
        if stack.0 == 0 || connection.0 == 0 {
            return Err(GattDiscoveryError::InvalidParameter);
        }
        let mut client = StackLock::acquire(client, stack)
            .map_err(|_| GattDiscoveryError::InvalidBluetoothStackId)?;

        let Some(ctx) = self.context_index(stack) else {
            return Err(GattDiscoveryError::NotInitialized);
        };
        let context = &mut self.contexts[ctx];

        if context
            .discoveries
            .iter()
            .any(|info| info.connection == connection)
        {
            return Err(GattDiscoveryError::ServiceDiscoveryOutstanding);
        }
        if context.discoveries.is_full() {
            return Err(GattDiscoveryError::InsufficientResources);
        }

        let filter = match filter {
            Some([]) => return Err(GattDiscoveryError::InvalidParameter),
            Some(uuids) => Vec::from_slice(uuids)
                .map_err(|_| GattDiscoveryError::InsufficientResources)?,
            None => Vec::new(),
        };

        let transaction = client.discover_services(stack, connection, FIRST_HANDLE, MAX_HANDLE)?;

        let info = DiscoveryInfo {
            connection,
            transaction: Some(transaction),
            phase: Phase::Services,
            filter,
            services: Deque::new(),
            resume_services: None,
            handler,
            callback_parameter,
        };
        if context.discoveries.push(info).is_err() {
            client.cancel_transaction(stack, transaction);
            return Err(GattDiscoveryError::InsufficientResources);
        }

        info!("service discovery started on connection {}", connection.0);
        Ok(())
    }

    /// Abandon the discovery on `connection` without a completion event.
    pub fn stop<C: GattClient>(
        &mut self,
        client: &mut C,
        stack: StackId,
        connection: ConnectionId,
    ) -> Result<(), GattDiscoveryError> {
        if stack.0 == 0 || connection.0 == 0 {
            return Err(GattDiscoveryError::InvalidParameter);
        }
        let mut client = StackLock::acquire(client, stack)
            .map_err(|_| GattDiscoveryError::InvalidBluetoothStackId)?;

        let Some(ctx) = self.context_index(stack) else {
            return Err(GattDiscoveryError::NotInitialized);
        };
        let context = &mut self.contexts[ctx];
        let Some(index) = context
            .discoveries
            .iter()
            .position(|info| info.connection == connection)
        else {
            return Err(GattDiscoveryError::DiscoveryNotOutstanding);
        };

        let info = context.discoveries.remove(index);
        if let Some(transaction) = info.transaction {
            client.cancel_transaction(stack, transaction);
        }
        debug!("service discovery stopped on connection {}", connection.0);
        Ok(())
    }

    /// Feed a GATT client response for `transaction` on `connection`.
    ///
    /// Responses to anything but the outstanding transaction are ignored.
    pub fn handle_client_event<C: GattClient>(
        &mut self,
        client: &mut C,
        stack: StackId,
        connection: ConnectionId,
        transaction: TransactionId,
        event: &GattClientEvent<'_>,
    ) {
        let Some((ctx, index)) = self.discovery_index(stack, connection) else {
            debug!("response for connection {} without discovery", connection.0);
            return;
        };
        let Ok(mut client) = StackLock::acquire(client, stack) else {
            return;
        };

        let info = &mut self.contexts[ctx].discoveries[index];
        if info.transaction != Some(transaction) {
            debug!("stale transaction {} ignored", transaction.0);
            return;
        }
        info.transaction = None;

        let progress = match *event {
            GattClientEvent::Services(services) => on_services(&mut *client, stack, info, services),
            GattClientEvent::Characteristics(characteristics) => {
                on_characteristics(&mut *client, stack, info, characteristics)
            }
            GattClientEvent::Descriptors(descriptors) => {
                on_descriptors(&mut *client, stack, info, descriptors)
            }
            GattClientEvent::ErrorResponse { error_code } if error_code == ATT_ERROR_ATTRIBUTE_NOT_FOUND => {
                on_not_found(&mut *client, stack, info)
            }
            GattClientEvent::ErrorResponse { error_code } => {
                warn!(
                    "discovery on connection {} failed: ATT error 0x{:02X}",
                    connection.0, error_code
                );
                Progress::Finished(DiscoveryStatus::ResponseError)
            }
            GattClientEvent::ResponseTimeout => {
                warn!("discovery on connection {} timed out", connection.0);
                Progress::Finished(DiscoveryStatus::ResponseTimeout)
            }
        };

        if let Progress::Finished(status) = progress {
            self.complete(stack, ctx, index, status);
        }
    }

    /// Feed a connection event. A disconnect ends the discovery on that link.
    pub fn handle_connection_event<C: GattClient>(
        &mut self,
        client: &mut C,
        stack: StackId,
        event: &GattConnectionEvent,
    ) {
        let GattConnectionEvent::Disconnected(connection) = *event else {
            return;
        };
        let Some((ctx, index)) = self.discovery_index(stack, connection) else {
            return;
        };
        let Ok(_lock) = StackLock::acquire(client, stack) else {
            return;
        };

        info!("connection {} dropped during discovery", connection.0);
        self.complete(stack, ctx, index, DiscoveryStatus::DeviceDisconnected);
    }

    fn context_index(&self, stack: StackId) -> Option<usize> {
        self.contexts.iter().position(|context| context.stack == stack)
    }

    fn discovery_index(&self, stack: StackId, connection: ConnectionId) -> Option<(usize, usize)> {
        let ctx = self.context_index(stack)?;
        let index = self.contexts[ctx]
            .discoveries
            .iter()
            .position(|info| info.connection == connection)?;
        Some((ctx, index))
    }

    /// Remove a discovery and report its final status.
    fn complete(&mut self, stack: StackId, ctx: usize, index: usize, status: DiscoveryStatus) {
        let mut info = self.contexts[ctx].discoveries.remove(index);
        debug!(
            "discovery on connection {} complete: {:?}",
            info.connection.0, status
        );
        let event = DiscoveryEvent::ServiceDiscoveryComplete {
            connection_id: info.connection,
            status,
        };
        info.handler.on_event(stack, &event, info.callback_parameter);
    }
}

fn release_context<C: GattClient, H>(client: &mut C, context: StackContext<H>) {
    for info in context.discoveries.iter() {
        if let Some(transaction) = info.transaction {
            client.cancel_transaction(context.stack, transaction);
        }
    }
    client.unregister_connection_events(context.stack, context.subscription);
    debug!("GATT discovery released stack {}", context.stack.0);
}

fn on_services<C: GattClient, H: DiscoveryHandler>(
    client: &mut C,
    stack: StackId,
    info: &mut DiscoveryInfo<H>,
    services: &[ServiceEntry],
) -> Progress {
    if info.phase != Phase::Services {
        warn!("service response outside the service phase");
        return Progress::Finished(DiscoveryStatus::UnknownError);
    }

    for service in services {
        if !info.accepts(&service.uuid) {
            continue;
        }
        let queued = info.services.push_back(ServiceInfo {
            entry: *service,
            characteristics: Vec::new(),
            descriptor_count: 0,
            current: 0,
            truncated_at: None,
        });
        if queued.is_err() {
            debug!(
                "service queue full, searching again from 0x{:04X} later",
                service.start_handle
            );
            info.resume_services = Some(service.start_handle);
            break;
        }
    }

    let highest_end = services.iter().map(|service| service.end_handle).max();
    match highest_end {
        Some(end) if end < MAX_HANDLE && info.resume_services.is_none() => {
            match client.discover_services(stack, info.connection, end + 1, MAX_HANDLE) {
                Ok(transaction) => {
                    info.transaction = Some(transaction);
                    Progress::Pending
                }
                Err(_) => Progress::Finished(DiscoveryStatus::UnknownError),
            }
        }
        _ => next_service(client, stack, info),
    }
}

fn on_characteristics<C: GattClient, H: DiscoveryHandler>(
    client: &mut C,
    stack: StackId,
    info: &mut DiscoveryInfo<H>,
    characteristics: &[CharacteristicEntry],
) -> Progress {
    let connection = info.connection;
    let Some(service) = info.services.front_mut() else {
        return Progress::Finished(DiscoveryStatus::UnknownError);
    };
    if info.phase != Phase::Characteristics {
        warn!("characteristic response outside the characteristic phase");
        return Progress::Finished(DiscoveryStatus::UnknownError);
    }

    for characteristic in characteristics {
        let added = service.characteristics.push(CharacteristicInfo {
            uuid: characteristic.uuid,
            value_handle: characteristic.value_handle,
            properties: characteristic.properties,
            descriptors: Vec::new(),
        });
        if added.is_err() {
            warn!(
                "service 0x{:04X} truncated at characteristic 0x{:04X}",
                service.entry.start_handle, characteristic.value_handle
            );
            service.truncated_at = Some(characteristic.value_handle);
            break;
        }
    }

    let end = service.entry.end_handle;
    match characteristics.last().map(|c| c.value_handle) {
        Some(last) if last < end && service.truncated_at.is_none() => {
            match client.discover_characteristics(stack, connection, last + 1, end) {
                Ok(transaction) => {
                    info.transaction = Some(transaction);
                    Progress::Pending
                }
                Err(_) => Progress::Finished(DiscoveryStatus::UnknownError),
            }
        }
        _ => begin_descriptors(client, stack, info),
    }
}

fn on_descriptors<C: GattClient, H: DiscoveryHandler>(
    client: &mut C,
    stack: StackId,
    info: &mut DiscoveryInfo<H>,
    descriptors: &[DescriptorEntry],
) -> Progress {
    let Some(service) = info.services.front_mut() else {
        return Progress::Finished(DiscoveryStatus::UnknownError);
    };
    if info.phase != Phase::Descriptors {
        warn!("descriptor response outside the descriptor phase");
        return Progress::Finished(DiscoveryStatus::UnknownError);
    }
    let current = service.current;
    let Some(characteristic) = service.characteristics.get_mut(current) else {
        return Progress::Finished(DiscoveryStatus::UnknownError);
    };

    for descriptor in descriptors {
        if characteristic.descriptors.push(*descriptor).is_ok() {
            service.descriptor_count += 1;
        } else {
            warn!("descriptor 0x{:04X} dropped", descriptor.handle);
        }
    }

    match descriptors.last().and_then(|d| d.handle.checked_add(1)) {
        Some(resume) => request_descriptors(client, stack, info, current, Some(resume)),
        None => request_descriptors(client, stack, info, current + 1, None),
    }
}

/// "Attribute not found" closes the current sub-procedure.
fn on_not_found<C: GattClient, H: DiscoveryHandler>(
    client: &mut C,
    stack: StackId,
    info: &mut DiscoveryInfo<H>,
) -> Progress {
    match info.phase {
        Phase::Services => next_service(client, stack, info),
        Phase::Characteristics => begin_descriptors(client, stack, info),
        Phase::Descriptors => {
            let next = info.services.front().map(|s| s.current + 1).unwrap_or(0);
            request_descriptors(client, stack, info, next, None)
        }
    }
}

/// Start the characteristic phase for the head service, resume an
/// interrupted service search, or finish.
fn next_service<C: GattClient, H: DiscoveryHandler>(
    client: &mut C,
    stack: StackId,
    info: &mut DiscoveryInfo<H>,
) -> Progress {
    let Some(service) = info.services.front() else {
        let Some(start) = info.resume_services.take() else {
            return Progress::Finished(DiscoveryStatus::Success);
        };
        info.phase = Phase::Services;
        return match client.discover_services(stack, info.connection, start, MAX_HANDLE) {
            Ok(transaction) => {
                info.transaction = Some(transaction);
                Progress::Pending
            }
            Err(_) => Progress::Finished(DiscoveryStatus::UnknownError),
        };
    };

    info.phase = Phase::Characteristics;
    let ServiceEntry {
        start_handle,
        end_handle,
        ..
    } = service.entry;
    match client.discover_characteristics(stack, info.connection, start_handle, end_handle) {
        Ok(transaction) => {
            info.transaction = Some(transaction);
            Progress::Pending
        }
        Err(_) => Progress::Finished(DiscoveryStatus::UnknownError),
    }
}

fn begin_descriptors<C: GattClient, H: DiscoveryHandler>(
    client: &mut C,
    stack: StackId,
    info: &mut DiscoveryInfo<H>,
) -> Progress {
    info.phase = Phase::Descriptors;
    request_descriptors(client, stack, info, 0, None)
}

/// Issue the next descriptor request of the head service, starting at
/// characteristic `index`.
///
/// `resume` overrides the lower bound for a characteristic whose earlier
/// descriptors are already known. Characteristics with an empty range are
/// skipped. When none remain the service is reported and the next one
/// begins.
fn request_descriptors<C: GattClient, H: DiscoveryHandler>(
    client: &mut C,
    stack: StackId,
    info: &mut DiscoveryInfo<H>,
    mut index: usize,
    mut resume: Option<u16>,
) -> Progress {
    let connection = info.connection;
    let Some(service) = info.services.front_mut() else {
        return Progress::Finished(DiscoveryStatus::UnknownError);
    };

    while index < service.characteristics.len() {
        if let Some((start, end)) = descriptor_range(service, index, resume) {
            service.current = index;
            return match client.discover_characteristic_descriptors(stack, connection, start, end) {
                Ok(transaction) => {
                    info.transaction = Some(transaction);
                    Progress::Pending
                }
                Err(_) => Progress::Finished(DiscoveryStatus::UnknownError),
            };
        }
        index += 1;
        resume = None;
    }

    dispatch_head_service(stack, info);
    next_service(client, stack, info)
}

/// Handles that may hold descriptors of characteristic `index`.
///
/// The range runs from after the value handle (or `resume`) to just below
/// the next characteristic's value handle, or to the service end for the
/// last one. When the service was cut short, the last kept characteristic
/// stops before the declaration of the first one that did not fit.
fn descriptor_range(service: &ServiceInfo, index: usize, resume: Option<u16>) -> Option<(u16, u16)> {
    let characteristic = service.characteristics.get(index)?;
    let end = match (service.characteristics.get(index + 1), service.truncated_at) {
        (Some(next), _) => next.value_handle.checked_sub(1)?,
        (None, Some(cut)) => cut.checked_sub(2)?,
        (None, None) => service.entry.end_handle,
    };
    let start = match resume {
        Some(handle) => handle,
        None => characteristic.value_handle.checked_add(1)?,
    };
    (start <= end).then_some((start, end))
}

/// Pop the head service and hand it to the discovery's handler.
fn dispatch_head_service<H: DiscoveryHandler>(stack: StackId, info: &mut DiscoveryInfo<H>) {
    let Some(service) = info.services.pop_front() else {
        return;
    };

    let mut indication = ServiceDiscoveryIndication::new(
        info.connection,
        service.entry,
        service.characteristics.len(),
    );

    if service.descriptor_count <= MAX_EVENT_DESCRIPTORS {
        let mut characteristics: Vec<CharacteristicInformation, MAX_CHARACTERISTICS> = Vec::new();
        let mut descriptors: Vec<DescriptorEntry, MAX_EVENT_DESCRIPTORS> = Vec::new();
        let mut fits = true;

        for characteristic in service.characteristics.iter() {
            let first = descriptors.len();
            fits &= descriptors
                .extend_from_slice(&characteristic.descriptors)
                .is_ok();
            fits &= characteristics
                .push(CharacteristicInformation {
                    uuid: characteristic.uuid,
                    value_handle: characteristic.value_handle,
                    properties: characteristic.properties,
                    descriptors: first..descriptors.len(),
                })
                .is_ok();
        }

        if fits {
            indication.set_contents(characteristics, descriptors);
        }
    } else {
        warn!(
            "service 0x{:04X}: {} descriptors exceed the event buffer",
            service.entry.start_handle, service.descriptor_count
        );
    }

    let event = DiscoveryEvent::ServiceDiscoveryIndication(&indication);
    info.handler.on_event(stack, &event, info.callback_parameter);
}
