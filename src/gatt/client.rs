//! GATT client operations used by service discovery

use core::ops::{Deref, DerefMut};

use super::types::{ConnectionId, StackId, SubscriptionId, TransactionId};

/// Errors reported by the GATT client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattClientError {
    InvalidStackId,
    InsufficientResources,
    /// Request refused by the stack with its own status code
    Rejected(i32),
}

/// GATT client of one or more protocol stacks
///
/// Responses to the discovery requests arrive later through
/// [`GattDiscovery::handle_client_event`](super::GattDiscovery::handle_client_event)
/// tagged with the returned transaction id.
pub trait GattClient {
    /// Take the stack lock. Held while discovery state is touched.
    fn lock_stack(&mut self, stack: StackId) -> Result<(), GattClientError>;

    fn unlock_stack(&mut self, stack: StackId);

    /// Discover primary services in `start..=end`.
    fn discover_services(
        &mut self,
        stack: StackId,
        connection: ConnectionId,
        start: u16,
        end: u16,
    ) -> Result<TransactionId, GattClientError>;

    /// Discover characteristics in `start..=end`.
    fn discover_characteristics(
        &mut self,
        stack: StackId,
        connection: ConnectionId,
        start: u16,
        end: u16,
    ) -> Result<TransactionId, GattClientError>;

    /// Discover characteristic descriptors in `start..=end`.
    fn discover_characteristic_descriptors(
        &mut self,
        stack: StackId,
        connection: ConnectionId,
        start: u16,
        end: u16,
    ) -> Result<TransactionId, GattClientError>;

    fn cancel_transaction(&mut self, stack: StackId, transaction: TransactionId);

    /// Subscribe to connect and disconnect events.
    fn register_connection_events(&mut self, stack: StackId) -> Result<SubscriptionId, GattClientError>;

    fn unregister_connection_events(&mut self, stack: StackId, subscription: SubscriptionId);
}

/// Stack lock released on drop
pub struct StackLock<'c, C: GattClient> {
    client: &'c mut C,
    stack: StackId,
}

impl<'c, C: GattClient> StackLock<'c, C> {
    pub fn acquire(client: &'c mut C, stack: StackId) -> Result<Self, GattClientError> {
        client.lock_stack(stack)?;
        Ok(Self { client, stack })
    }
}

impl<C: GattClient> Deref for StackLock<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.client
    }
}

impl<C: GattClient> DerefMut for StackLock<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.client
    }
}

impl<C: GattClient> Drop for StackLock<'_, C> {
    fn drop(&mut self) {
        self.client.unlock_stack(self.stack);
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use heapless::Vec;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum RequestKind {
        Services,
        Characteristics,
        Descriptors,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Request {
        pub kind: RequestKind,
        pub connection: ConnectionId,
        pub start: u16,
        pub end: u16,
        pub transaction: TransactionId,
    }

    /// Records every request and hands out sequential transaction ids
    #[derive(Default)]
    pub struct MockGattClient {
        requests: Vec<Request, 64>,
        cancelled: Vec<TransactionId, 16>,
        subscriptions: Vec<(StackId, SubscriptionId), 4>,
        next_transaction: u32,
        lock_depth: u32,
        lock_count: u32,
        next_request_error: Option<GattClientError>,
        next_register_error: Option<GattClientError>,
    }

    impl MockGattClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_next_request_error(&mut self, error: GattClientError) {
            self.next_request_error = Some(error);
        }

        pub fn set_next_register_error(&mut self, error: GattClientError) {
            self.next_register_error = Some(error);
        }

        pub fn requests(&self) -> &[Request] {
            &self.requests
        }

        pub fn last_request(&self) -> Option<Request> {
            self.requests.last().copied()
        }

        pub fn cancelled(&self) -> &[TransactionId] {
            &self.cancelled
        }

        pub fn is_registered(&self, stack: StackId) -> bool {
            self.subscriptions.iter().any(|(id, _)| *id == stack)
        }

        pub fn is_locked(&self) -> bool {
            self.lock_depth > 0
        }

        /// Number of times the stack lock was taken
        pub fn lock_count(&self) -> u32 {
            self.lock_count
        }

        fn record(
            &mut self,
            kind: RequestKind,
            connection: ConnectionId,
            start: u16,
            end: u16,
        ) -> Result<TransactionId, GattClientError> {
            assert!(self.is_locked(), "request issued without the stack lock");
            if let Some(error) = self.next_request_error.take() {
                return Err(error);
            }
            self.next_transaction += 1;
            let transaction = TransactionId(self.next_transaction);
            let _ = self.requests.push(Request {
                kind,
                connection,
                start,
                end,
                transaction,
            });
            Ok(transaction)
        }
    }

    impl GattClient for MockGattClient {
        fn lock_stack(&mut self, stack: StackId) -> Result<(), GattClientError> {
            if stack.0 == 0 {
                return Err(GattClientError::InvalidStackId);
            }
            self.lock_depth += 1;
            self.lock_count += 1;
            Ok(())
        }

        fn unlock_stack(&mut self, _stack: StackId) {
            assert!(self.lock_depth > 0, "unbalanced stack unlock");
            self.lock_depth -= 1;
        }

        fn discover_services(
            &mut self,
            _stack: StackId,
            connection: ConnectionId,
            start: u16,
            end: u16,
        ) -> Result<TransactionId, GattClientError> {
            self.record(RequestKind::Services, connection, start, end)
        }

        fn discover_characteristics(
            &mut self,
            _stack: StackId,
            connection: ConnectionId,
            start: u16,
            end: u16,
        ) -> Result<TransactionId, GattClientError> {
            self.record(RequestKind::Characteristics, connection, start, end)
        }

        fn discover_characteristic_descriptors(
            &mut self,
            _stack: StackId,
            connection: ConnectionId,
            start: u16,
            end: u16,
        ) -> Result<TransactionId, GattClientError> {
            self.record(RequestKind::Descriptors, connection, start, end)
        }

        fn cancel_transaction(&mut self, _stack: StackId, transaction: TransactionId) {
            let _ = self.cancelled.push(transaction);
        }

        fn register_connection_events(
            &mut self,
            stack: StackId,
        ) -> Result<SubscriptionId, GattClientError> {
            if let Some(error) = self.next_register_error.take() {
                return Err(error);
            }
            let subscription = SubscriptionId(100 + stack.0);
            let _ = self.subscriptions.push((stack, subscription));
            Ok(subscription)
        }

        fn unregister_connection_events(&mut self, stack: StackId, subscription: SubscriptionId) {
            self.subscriptions
                .retain(|entry| *entry != (stack, subscription));
        }
    }
}
