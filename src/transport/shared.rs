//! Interrupt side of the UART transport
//!
//! Everything the UART and CTS interrupt handlers touch lives here, behind a
//! single critical-section mutex. The foreground handle in
//! [`super::driver`] reaches the same state through short `&self` calls, so
//! no critical section ever spans a delay or a callback.

use core::cell::RefCell;

use bitflags::bitflags;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_hal::digital::OutputPin;
use log::{debug, warn};

use crate::config::uart::{RX_BUFFER_SIZE, TX_BUFFER_SIZE, XOFF_LIMIT, XON_LIMIT};
use crate::ehcill::{Ehcill, EhcillState, PendingAction};
use crate::hal::{CtsInterrupt, Edge, HalError, UartInterrupt, UartPeripheral};
use crate::transport::ring_buffer::RingBuffer;

bitflags! {
    /// Transport state bits shared with the interrupt handlers
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TransportFlags: u16 {
        const OPEN = 1 << 0;
        /// RX flow may be on as far as the ring buffer is concerned
        const FLOW_ENABLED = 1 << 1;
        /// eHCILL holds RX flow off while the link sleeps
        const EHCILL_FLOW_OFF = 1 << 2;
        /// RTS forced high by a reconfiguration
        const RTS_HIGH = 1 << 3;
        /// A received byte was dropped; sticky until close
        const RX_OVERRUN = 1 << 4;
        const TRANSMIT_ENABLED = 1 << 5;
        /// CTS is low, the controller accepts data
        const TX_FLOW_ENABLED = 1 << 6;
        /// TX interrupt chain is running
        const TX_PRIMED = 1 << 7;
    }
}

struct SharedInner<U, Rts, Cts> {
    uart: U,
    rts: Rts,
    cts: Cts,
    rx: RingBuffer<RX_BUFFER_SIZE>,
    tx: RingBuffer<TX_BUFFER_SIZE>,
    flags: TransportFlags,
    cts_edge: Edge,
    pending: Option<PendingAction>,
}

impl<U, Rts, Cts> SharedInner<U, Rts, Cts>
where
    U: UartPeripheral,
    Rts: OutputPin,
    Cts: CtsInterrupt,
{
    /// Assert RTS unless one of the three vetoes is present.
    fn flow_on(&mut self) {
        let vetoes =
            TransportFlags::FLOW_ENABLED | TransportFlags::RTS_HIGH | TransportFlags::EHCILL_FLOW_OFF;
        if self.flags.intersection(vetoes) == TransportFlags::FLOW_ENABLED {
            let _ = self.rts.set_low();
        }
    }

    fn flow_off(&mut self) {
        let _ = self.rts.set_high();
    }

    fn arm_cts(&mut self, edge: Edge) {
        self.cts_edge = edge;
        self.cts.listen(edge);
    }

    fn on_rx_ready(&mut self) {
        let Some(byte) = self.uart.read_byte() else {
            return;
        };

        if self.rx.push_byte(byte) {
            if self.flags.contains(TransportFlags::FLOW_ENABLED) && self.rx.bytes_free() <= XOFF_LIMIT
            {
                self.flags.remove(TransportFlags::FLOW_ENABLED);
                self.flow_off();
            }
        } else {
            self.flags.insert(TransportFlags::RX_OVERRUN);
            self.flags.remove(TransportFlags::FLOW_ENABLED);
            self.flow_off();
        }
    }

    /// Send the next queued byte, or stop the TX interrupt chain.
    fn transmit_next(&mut self) {
        if self.flags.contains(TransportFlags::TX_FLOW_ENABLED) {
            if let Some(byte) = self.tx.pop_byte() {
                self.uart.write_byte(byte);
                self.flags.insert(TransportFlags::TX_PRIMED);
                return;
            }
        }

        self.uart.set_tx_interrupt(false);
        self.flags.remove(TransportFlags::TX_PRIMED);
    }

    fn start_transmit(&mut self) {
        self.uart.set_tx_interrupt(true);
        self.transmit_next();
    }

    fn disable_transmitter(&mut self) {
        self.flags.remove(TransportFlags::TRANSMIT_ENABLED);
        self.uart.set_tx_interrupt(false);
    }

    fn enable_transmitter(&mut self) {
        self.flags.insert(TransportFlags::TRANSMIT_ENABLED);
        if self.flags.contains(TransportFlags::TX_FLOW_ENABLED) {
            self.start_transmit();
        }
    }

    fn reset_context(&mut self) {
        self.rx.clear();
        self.tx.clear();
        self.flags = TransportFlags::empty();
        self.pending = None;
    }
}

/// UART transport state reachable from interrupt context
pub struct UartShared<U, Rts, Cts> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<SharedInner<U, Rts, Cts>>>,
    ehcill: Ehcill,
}

impl<U, Rts, Cts> UartShared<U, Rts, Cts>
where
    U: UartPeripheral,
    Rts: OutputPin,
    Cts: CtsInterrupt,
{
    /// Take ownership of the UART and its flow control lines.
    pub fn new(uart: U, rts: Rts, cts: Cts) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(SharedInner {
                uart,
                rts,
                cts,
                rx: RingBuffer::new(),
                tx: RingBuffer::new(),
                flags: TransportFlags::empty(),
                cts_edge: Edge::Falling,
                pending: None,
            })),
            ehcill: Ehcill::new(),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut SharedInner<U, Rts, Cts>) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }

    /// Sleep protocol state for this link
    pub fn ehcill(&self) -> &Ehcill {
        &self.ehcill
    }

    pub fn flags(&self) -> TransportFlags {
        self.with(|inner| inner.flags)
    }

    /// True once a received byte has been dropped since open.
    pub fn rx_overrun(&self) -> bool {
        self.flags().contains(TransportFlags::RX_OVERRUN)
    }

    /// UART interrupt entry point.
    pub fn on_uart_interrupt(&self, source: UartInterrupt) {
        self.with(|inner| {
            if !inner.flags.contains(TransportFlags::OPEN) {
                return;
            }
            match source {
                UartInterrupt::RxReady => inner.on_rx_ready(),
                UartInterrupt::TxReady => inner.transmit_next(),
            }
        });
    }

    /// CTS edge interrupt entry point.
    ///
    /// Returns true when the controller started waking the link, so the
    /// application can leave its low power mode.
    pub fn on_cts_interrupt(&self) -> bool {
        self.with(|inner| {
            if !inner.flags.contains(TransportFlags::OPEN) {
                return false;
            }

            match inner.cts_edge {
                Edge::Falling => {
                    inner.arm_cts(Edge::Rising);
                    inner.flags.insert(TransportFlags::TX_FLOW_ENABLED);
                    if inner.flags.contains(TransportFlags::TRANSMIT_ENABLED) && !inner.tx.is_empty()
                    {
                        inner.start_transmit();
                    }
                    if self.ehcill.state() == EhcillState::ControllerInitWakeup {
                        inner.flags.remove(TransportFlags::EHCILL_FLOW_OFF);
                        inner.flow_on();
                    }
                    false
                }
                Edge::Rising => {
                    inner.arm_cts(Edge::Falling);
                    inner
                        .flags
                        .remove(TransportFlags::TX_FLOW_ENABLED | TransportFlags::TX_PRIMED);
                    self.ehcill.state() != EhcillState::Awake && self.ehcill.controller_init_wakeup()
                }
            }
        })
    }

    /// Clear the context, hold RX flow off and program the UART.
    pub(crate) fn start(&self, baud_rate: u32) -> Result<(), HalError> {
        self.with(|inner| {
            inner.reset_context();
            inner.flow_off();
            inner.uart.configure(baud_rate)?;
            inner.flags.insert(TransportFlags::FLOW_ENABLED);
            Ok(())
        })
    }

    /// Bring flow control up after the controller left reset.
    pub(crate) fn begin(&self) {
        self.with(|inner| {
            inner.flow_on();

            if inner.cts.is_high().unwrap_or(true) {
                inner.flags.remove(TransportFlags::TX_FLOW_ENABLED);
                inner.arm_cts(Edge::Falling);
            } else {
                inner.flags.insert(TransportFlags::TX_FLOW_ENABLED);
                inner.arm_cts(Edge::Rising);
            }

            inner.uart.flush_rx();
            inner.uart.set_rx_interrupt(true);
            inner
                .flags
                .insert(TransportFlags::TRANSMIT_ENABLED | TransportFlags::OPEN);
        });
    }

    /// Stop all interrupt activity and forget buffered data.
    pub(crate) fn shutdown(&self) {
        self.with(|inner| {
            inner.uart.set_rx_interrupt(false);
            inner.uart.set_tx_interrupt(false);
            inner.reset_context();
            inner.flow_off();
        });
    }

    pub(crate) fn rx_len(&self) -> usize {
        self.with(|inner| inner.rx.len())
    }

    /// Move the next contiguous run of received bytes into `buf`.
    ///
    /// Credits the freed space and turns RX flow back on once the buffer has
    /// drained to the high-water mark.
    pub(crate) fn take_rx_chunk(&self, buf: &mut [u8]) -> usize {
        self.with(|inner| {
            let chunk = inner.rx.contiguous();
            let count = chunk.len().min(buf.len());
            buf[..count].copy_from_slice(&chunk[..count]);
            inner.rx.consume(count);

            if count > 0
                && !inner.flags.contains(TransportFlags::FLOW_ENABLED)
                && inner.rx.bytes_free() >= XON_LIMIT
            {
                inner.flags.insert(TransportFlags::FLOW_ENABLED);
                inner.flow_on();
            }
            count
        })
    }

    /// Queue as much of `data` as fits and kick the transmitter.
    pub(crate) fn load_tx(&self, data: &[u8]) -> usize {
        self.with(|inner| {
            let count = inner.tx.push(data);
            let ready = TransportFlags::TRANSMIT_ENABLED | TransportFlags::TX_FLOW_ENABLED;
            if count > 0
                && inner.flags.contains(ready)
                && !inner.flags.contains(TransportFlags::TX_PRIMED)
            {
                inner.start_transmit();
            }
            count
        })
    }

    pub(crate) fn has_pending_control(&self) -> bool {
        self.with(|inner| inner.pending.is_some())
    }

    pub(crate) fn is_transmitting(&self) -> bool {
        self.with(|inner| inner.uart.is_transmitting())
    }

    /// Put a control byte on the wire, or park it while the UART is busy.
    ///
    /// Returns true when the byte went out now.
    pub(crate) fn send_control(&self, action: PendingAction) -> bool {
        let byte = action.control_byte().as_byte();
        let sent = self.with(|inner| {
            if action == PendingAction::SendSleepAck {
                inner.flags.insert(TransportFlags::EHCILL_FLOW_OFF);
                inner.flow_off();
            }

            if inner.uart.is_transmitting() {
                debug!("UART busy, deferring eHCILL byte 0x{:02X}", byte);
                inner.pending = Some(action);
                None
            } else {
                inner.uart.write_byte(byte);
                Some(action)
            }
        });

        match sent {
            Some(action) => {
                self.ehcill.action_taken(action);
                true
            }
            None => false,
        }
    }

    /// Send a parked control byte unless a byte is still being shifted out.
    ///
    /// Returns true when a byte went out.
    pub(crate) fn flush_pending_control(&self) -> bool {
        let sent = self.with(|inner| {
            if inner.pending.is_none() || inner.uart.is_transmitting() {
                return None;
            }
            let action = inner.pending.take()?;
            inner.uart.write_byte(action.control_byte().as_byte());
            Some(action)
        });

        match sent {
            Some(action) => {
                self.ehcill.action_taken(action);
                true
            }
            None => false,
        }
    }

    /// Drop the eHCILL flow veto after waking the controller.
    pub(crate) fn release_ehcill_flow(&self) {
        self.with(|inner| {
            inner.flags.remove(TransportFlags::EHCILL_FLOW_OFF);
            inner.flow_on();
        });
    }

    pub(crate) fn disable_tx_rx(&self) {
        self.with(|inner| {
            inner.flow_off();
            inner.flags.insert(TransportFlags::RTS_HIGH);
            inner.disable_transmitter();
        });
    }

    pub(crate) fn enable_tx_rx(&self) {
        self.with(|inner| {
            inner.flags.remove(TransportFlags::RTS_HIGH);
            inner.enable_transmitter();
            inner.flow_on();
        });
    }

    /// Reprogram the UART with the receive interrupt masked.
    pub(crate) fn set_baud_rate(&self, baud_rate: u32) -> Result<(), HalError> {
        self.with(|inner| {
            inner.uart.set_rx_interrupt(false);
            let result = inner.uart.configure(baud_rate);
            inner.uart.set_rx_interrupt(true);
            if result.is_err() {
                warn!("UART rejected baud rate {}", baud_rate);
            }
            result
        })
    }
}
