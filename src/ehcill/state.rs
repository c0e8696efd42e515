//! eHCILL sleep/wake state machine
//!
//! Pure bookkeeping: the machine never touches the UART. It reports which
//! control byte the transport has to send, and the transport confirms with
//! [`Ehcill::action_taken`] once the byte is on the wire.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use log::{debug, trace};

/// eHCILL control bytes exchanged in place of an HCI packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlByte {
    SleepIndication = 0x30,
    SleepAcknowledge = 0x31,
    WakeIndication = 0x32,
    WakeAcknowledge = 0x33,
}

impl ControlByte {
    /// Classify a byte seen where a packet type was expected.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x30 => Some(Self::SleepIndication),
            0x31 => Some(Self::SleepAcknowledge),
            0x32 => Some(Self::WakeIndication),
            0x33 => Some(Self::WakeAcknowledge),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Link state as seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EhcillState {
    Awake,
    /// Controller asked to sleep, our acknowledgement is not out yet
    WaitSendSleepAck,
    /// We woke the controller and wait for its indication
    HostInitWakeup,
    /// Controller is waking us and waits for our acknowledgement
    ControllerInitWakeup,
    Sleep,
}

/// A control byte the transport owes the controller.
///
/// Deliberately not `Clone`: an action is confirmed exactly once by handing it
/// back to [`Ehcill::action_taken`].
#[derive(Debug, PartialEq, Eq)]
pub enum PendingAction {
    SendSleepAck,
    SendWakeAck,
}

impl PendingAction {
    /// Byte to transmit for this action.
    pub fn control_byte(&self) -> ControlByte {
        match self {
            PendingAction::SendSleepAck => ControlByte::SleepAcknowledge,
            PendingAction::SendWakeAck => ControlByte::WakeAcknowledge,
        }
    }
}

struct Inner {
    state: EhcillState,
    lock_count: u32,
}

/// eHCILL context shared between the UART interrupts and the foreground loop
pub struct Ehcill {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Inner>>,
}

impl Ehcill {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                state: EhcillState::Awake,
                lock_count: 0,
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }

    /// Reset to `Awake` with no power locks held.
    pub fn init(&self) {
        self.with(|inner| {
            inner.state = EhcillState::Awake;
            inner.lock_count = 0;
        });
    }

    pub fn deinit(&self) {
        self.init();
    }

    pub fn state(&self) -> EhcillState {
        self.with(|inner| inner.state)
    }

    /// Host wants to transmit while the link sleeps.
    ///
    /// Returns true when the caller must now send a wake indication.
    pub fn host_init_wakeup(&self) -> bool {
        self.with(|inner| {
            if inner.state == EhcillState::Sleep {
                inner.state = EhcillState::HostInitWakeup;
                debug!("eHCILL: host initiated wakeup");
                true
            } else {
                false
            }
        })
    }

    /// Controller pulled CTS while the link sleeps.
    ///
    /// Returns true when a controller-initiated wakeup started.
    pub fn controller_init_wakeup(&self) -> bool {
        self.with(|inner| {
            if inner.state == EhcillState::Sleep {
                inner.state = EhcillState::ControllerInitWakeup;
                true
            } else {
                false
            }
        })
    }

    /// Feed one received control byte through the state machine.
    pub fn process_control_byte(&self, byte: ControlByte) -> Option<PendingAction> {
        trace!("eHCILL: received {:?}", byte);
        self.with(|inner| match byte {
            ControlByte::SleepIndication => {
                if inner.state == EhcillState::Awake {
                    inner.state = EhcillState::WaitSendSleepAck;
                    Some(PendingAction::SendSleepAck)
                } else {
                    None
                }
            }
            ControlByte::WakeIndication => match inner.state {
                EhcillState::HostInitWakeup => {
                    inner.state = EhcillState::Awake;
                    None
                }
                EhcillState::ControllerInitWakeup => Some(PendingAction::SendWakeAck),
                _ => None,
            },
            ControlByte::WakeAcknowledge => {
                inner.state = EhcillState::Awake;
                None
            }
            // The controller never acknowledges our sleep, nothing to do
            ControlByte::SleepAcknowledge => None,
        })
    }

    /// Confirm that the control byte for `action` has been transmitted.
    ///
    /// Returns true when the state advanced.
    pub fn action_taken(&self, action: PendingAction) -> bool {
        self.with(|inner| match (action, inner.state) {
            (PendingAction::SendSleepAck, EhcillState::WaitSendSleepAck) => {
                inner.state = EhcillState::Sleep;
                debug!("eHCILL: link asleep");
                true
            }
            (PendingAction::SendWakeAck, EhcillState::ControllerInitWakeup) => {
                inner.state = EhcillState::Awake;
                debug!("eHCILL: controller woke the link");
                true
            }
            _ => false,
        })
    }

    /// Take a power lock, keeping the MCU out of low power mode.
    pub fn lock(&self) {
        self.with(|inner| inner.lock_count = inner.lock_count.saturating_add(1));
    }

    pub fn unlock(&self) {
        self.unlock_by(1);
    }

    /// Release `count` power locks, stopping at zero.
    pub fn unlock_by(&self, count: u32) {
        self.with(|inner| inner.lock_count = inner.lock_count.saturating_sub(count));
    }

    pub fn lock_count(&self) -> u32 {
        self.with(|inner| inner.lock_count)
    }

    /// Whether the MCU may drop into its low power mode.
    ///
    /// Requires an idle stack, a sleeping link and no power locks.
    pub fn low_power_permitted(&self, stack_idle: bool) -> bool {
        stack_idle
            && self.with(|inner| inner.state == EhcillState::Sleep && inner.lock_count == 0)
    }
}

impl Default for Ehcill {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asleep() -> Ehcill {
        let ehcill = Ehcill::new();
        let action = ehcill.process_control_byte(ControlByte::SleepIndication);
        assert!(ehcill.action_taken(action.unwrap()));
        ehcill
    }

    #[test]
    fn test_sleep_indication_requests_ack() {
        let ehcill = Ehcill::new();

        let action = ehcill.process_control_byte(ControlByte::SleepIndication);
        assert_eq!(action, Some(PendingAction::SendSleepAck));
        assert_eq!(ehcill.state(), EhcillState::WaitSendSleepAck);

        assert!(ehcill.action_taken(PendingAction::SendSleepAck));
        assert_eq!(ehcill.state(), EhcillState::Sleep);
    }

    #[test]
    fn test_sleep_indication_ignored_unless_awake() {
        let ehcill = asleep();
        assert_eq!(ehcill.process_control_byte(ControlByte::SleepIndication), None);
        assert_eq!(ehcill.state(), EhcillState::Sleep);
    }

    #[test]
    fn test_host_wakeup_only_once() {
        let ehcill = asleep();
        assert!(ehcill.host_init_wakeup());
        assert_eq!(ehcill.state(), EhcillState::HostInitWakeup);
        assert!(!ehcill.host_init_wakeup());
    }

    #[test]
    fn test_host_wakeup_completes_on_wake_indication() {
        let ehcill = asleep();
        ehcill.host_init_wakeup();

        assert_eq!(ehcill.process_control_byte(ControlByte::WakeIndication), None);
        assert_eq!(ehcill.state(), EhcillState::Awake);
    }

    #[test]
    fn test_controller_wakeup_needs_ack() {
        let ehcill = asleep();
        assert!(ehcill.controller_init_wakeup());
        assert!(!ehcill.controller_init_wakeup());

        let action = ehcill.process_control_byte(ControlByte::WakeIndication);
        assert_eq!(action, Some(PendingAction::SendWakeAck));
        assert_eq!(ehcill.state(), EhcillState::ControllerInitWakeup);

        assert!(ehcill.action_taken(PendingAction::SendWakeAck));
        assert_eq!(ehcill.state(), EhcillState::Awake);
    }

    #[test]
    fn test_wake_ack_forces_awake() {
        let ehcill = asleep();
        ehcill.host_init_wakeup();
        ehcill.process_control_byte(ControlByte::WakeAcknowledge);
        assert_eq!(ehcill.state(), EhcillState::Awake);
    }

    #[test]
    fn test_stale_action_does_not_advance() {
        let ehcill = Ehcill::new();
        assert!(!ehcill.action_taken(PendingAction::SendSleepAck));
        assert!(!ehcill.action_taken(PendingAction::SendWakeAck));
        assert_eq!(ehcill.state(), EhcillState::Awake);
    }

    #[test]
    fn test_power_lock_counting() {
        let ehcill = Ehcill::new();
        ehcill.lock();
        ehcill.lock();
        ehcill.lock();
        assert_eq!(ehcill.lock_count(), 3);

        ehcill.unlock_by(5);
        assert_eq!(ehcill.lock_count(), 0);

        ehcill.unlock();
        assert_eq!(ehcill.lock_count(), 0);
    }

    #[test]
    fn test_low_power_gate() {
        let ehcill = Ehcill::new();
        assert!(!ehcill.low_power_permitted(true));

        let ehcill = asleep();
        assert!(ehcill.low_power_permitted(true));
        assert!(!ehcill.low_power_permitted(false));

        ehcill.lock();
        assert!(!ehcill.low_power_permitted(true));
    }

    #[test]
    fn test_init_resets() {
        let ehcill = asleep();
        ehcill.lock();
        ehcill.init();
        assert_eq!(ehcill.state(), EhcillState::Awake);
        assert_eq!(ehcill.lock_count(), 0);
    }

    #[test]
    fn test_control_byte_classification() {
        assert_eq!(ControlByte::from_byte(0x32), Some(ControlByte::WakeIndication));
        assert_eq!(ControlByte::from_byte(0x04), None);
        assert_eq!(ControlByte::WakeAcknowledge.as_byte(), 0x33);
    }
}
