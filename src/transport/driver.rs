//! Foreground half of the UART transport
//!
//! Owns the controller reset line, the delay provider and the upward data
//! sink. All waiting happens here, outside any critical section.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use log::{debug, info, warn};

use crate::config::{ehcill, uart};
use crate::ehcill::{ControlByte, EhcillState};
use crate::hal::{CtsInterrupt, UartPeripheral};
use crate::hci::framing::{ByteClass, PacketFramer};
use crate::transport::shared::UartShared;
use crate::transport::traits::{
    HciDataSink, ReconfigureCommand, TransportConfig, TransportError, TransportId, TRANSPORT_ID,
};

/// HCI UART transport for a CC256x controller
///
/// Generic over the UART, the RTS/CTS lines, the nSHUTD reset line, a delay
/// provider and the sink that receives HCI bytes.
pub struct UartTransport<'a, U, Rts, Cts, Rst, D, S> {
    shared: &'a UartShared<U, Rts, Cts>,
    reset: Rst,
    delay: D,
    sink: Option<S>,
    framer: PacketFramer,
    config: TransportConfig,
    open: bool,
}

impl<'a, U, Rts, Cts, Rst, D, S> UartTransport<'a, U, Rts, Cts, Rst, D, S>
where
    U: UartPeripheral,
    Rts: OutputPin,
    Cts: CtsInterrupt,
    Rst: OutputPin,
    D: DelayNs,
    S: HciDataSink,
{
    /// Create a closed transport. The controller is held in reset.
    pub fn new(shared: &'a UartShared<U, Rts, Cts>, mut reset: Rst, delay: D) -> Self {
        let _ = reset.set_low();
        Self {
            shared,
            reset,
            delay,
            sink: None,
            framer: PacketFramer::new(),
            config: TransportConfig::default(),
            open: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn shared(&self) -> &'a UartShared<U, Rts, Cts> {
        self.shared
    }

    /// Open the transport, resetting the controller.
    pub fn open(&mut self, config: TransportConfig, sink: S) -> Result<TransportId, TransportError> {
        if self.open {
            return Err(TransportError::AlreadyOpen);
        }
        if config.baud_rate == 0 {
            return Err(TransportError::InvalidConfig);
        }

        self.shared.ehcill().init();
        self.shared.start(config.baud_rate)?;

        let _ = self.reset.set_low();
        self.delay.delay_ms(uart::RESET_PULSE_MS);
        let _ = self.reset.set_high();

        self.shared.begin();

        if config.init_delay_ms > 0 {
            self.delay.delay_ms(config.init_delay_ms);
        }

        info!("HCI UART open at {} baud", config.baud_rate);
        self.framer.reset();
        self.sink = Some(sink);
        self.config = config;
        self.open = true;
        Ok(TRANSPORT_ID)
    }

    /// Close the transport and hold the controller in reset.
    ///
    /// The sink receives one final zero-length call.
    pub fn close(&mut self) {
        if !self.open {
            return;
        }

        self.shared.shutdown();
        let _ = self.reset.set_low();
        self.shared.ehcill().deinit();
        self.framer.reset();
        self.open = false;

        if let Some(mut sink) = self.sink.take() {
            sink.on_data(TRANSPORT_ID, &[]);
        }
        info!("HCI UART closed");
    }

    /// Number of received bytes not yet handed to the sink.
    pub fn rx_bytes_ready(&self) -> usize {
        if self.open {
            self.shared.rx_len()
        } else {
            0
        }
    }

    /// Deliver the next contiguous run of received bytes.
    ///
    /// With nothing received, sends a deferred eHCILL byte if the UART is
    /// idle.
    pub fn process(&mut self) {
        if !self.open {
            return;
        }

        let mut chunk = [0u8; uart::RX_BUFFER_SIZE];
        let count = self.shared.take_rx_chunk(&mut chunk);
        if count > 0 {
            self.dispatch(&chunk[..count]);
        } else if self.shared.flush_pending_control() {
            let _ = self.wait_transmit_idle();
        }
    }

    /// Queue `data` for transmission, waking the controller first if needed.
    ///
    /// On [`TransportError::WakeTimeout`] the data has still been queued.
    pub fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        if data.is_empty() {
            return Ok(());
        }

        let mut result = Ok(());
        let shared = self.shared;
        let ehcill = shared.ehcill();
        if ehcill.state() == EhcillState::Sleep || shared.has_pending_control() {
            self.wait_transmit_idle()?;
            if shared.flush_pending_control() {
                self.wait_transmit_idle()?;
            }

            if ehcill.state() == EhcillState::Sleep {
                self.wake_controller()?;
            }
            if ehcill.state() != EhcillState::Awake {
                warn!("controller did not acknowledge wakeup, writing anyway");
                result = Err(TransportError::WakeTimeout);
            }
        }

        self.load_transmit_buffer(data)?;
        result
    }

    /// Driver level reconfiguration.
    pub fn reconfigure(&mut self, command: ReconfigureCommand) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }

        match command {
            ReconfigureCommand::DisableTxRx => {
                self.shared.disable_tx_rx();
                self.wait_transmit_idle()?;
            }
            ReconfigureCommand::EnableTxRx => self.shared.enable_tx_rx(),
            ReconfigureCommand::ChangeBaudRate(0) => return Err(TransportError::InvalidConfig),
            ReconfigureCommand::ChangeBaudRate(baud_rate) => {
                self.shared.disable_tx_rx();
                let result = match self.wait_transmit_idle() {
                    Ok(()) => self.shared.set_baud_rate(baud_rate).map_err(TransportError::from),
                    Err(error) => Err(error),
                };
                self.delay.delay_ms(uart::BAUD_SETTLE_MS);
                self.shared.enable_tx_rx();
                result?;
                self.config.baud_rate = baud_rate;
                info!("HCI UART now at {} baud", baud_rate);
            }
        }
        Ok(())
    }

    /// Split a received chunk into HCI runs and eHCILL control bytes.
    fn dispatch(&mut self, bytes: &[u8]) {
        let mut run_start = None;

        for (index, &byte) in bytes.iter().enumerate() {
            match self.framer.feed(byte) {
                ByteClass::Hci => {
                    run_start.get_or_insert(index);
                }
                class => {
                    if let Some(start) = run_start.take() {
                        self.deliver(&bytes[start..index]);
                    }
                    if let ByteClass::Control(control) = class {
                        self.handle_control(control);
                    }
                }
            }
        }

        if let Some(start) = run_start {
            self.deliver(&bytes[start..]);
        }
    }

    fn deliver(&mut self, bytes: &[u8]) {
        if let Some(sink) = self.sink.as_mut() {
            sink.on_data(TRANSPORT_ID, bytes);
        }
    }

    fn handle_control(&mut self, control: ControlByte) {
        if let Some(action) = self.shared.ehcill().process_control_byte(control) {
            if self.shared.send_control(action) {
                let _ = self.wait_transmit_idle();
            }
        }
    }

    /// Host initiated wakeup: send a wake indication and poll for the answer.
    fn wake_controller(&mut self) -> Result<(), TransportError> {
        if !self.shared.ehcill().host_init_wakeup() {
            return Ok(());
        }

        self.load_transmit_buffer(&[ControlByte::WakeIndication.as_byte()])?;
        self.shared.release_ehcill_flow();

        let mut waited_ms = 0;
        loop {
            self.process();
            if self.shared.ehcill().state() == EhcillState::Awake {
                debug!("controller awake after {} ms", waited_ms);
                return Ok(());
            }
            if waited_ms >= self.config.wake_ack_timeout_ms {
                return Ok(());
            }
            self.delay.delay_ms(ehcill::WAKE_POLL_MS);
            waited_ms += ehcill::WAKE_POLL_MS;
        }
    }

    /// Wait a bounded time for the UART to finish shifting out.
    fn wait_transmit_idle(&mut self) -> Result<(), TransportError> {
        let limit_us = uart::TX_SPACE_TIMEOUT_MS * 1000;
        let mut waited_us = 0;

        while self.shared.is_transmitting() {
            if waited_us >= limit_us {
                warn!("UART still transmitting after {} ms", uart::TX_SPACE_TIMEOUT_MS);
                return Err(TransportError::TransmitTimeout);
            }
            self.delay.delay_us(uart::POLL_INTERVAL_US);
            waited_us += uart::POLL_INTERVAL_US;
        }
        Ok(())
    }

    /// Copy `data` into the TX ring, waiting a bounded time for room.
    fn load_transmit_buffer(&mut self, mut data: &[u8]) -> Result<(), TransportError> {
        let limit_us = uart::TX_SPACE_TIMEOUT_MS * 1000;
        let mut waited_us = 0;

        while !data.is_empty() {
            let count = self.shared.load_tx(data);
            data = &data[count..];

            if count > 0 {
                waited_us = 0;
            } else if waited_us >= limit_us {
                warn!("TX buffer stalled, {} bytes not queued", data.len());
                return Err(TransportError::TransmitTimeout);
            } else {
                self.delay.delay_us(uart::POLL_INTERVAL_US);
                waited_us += uart::POLL_INTERVAL_US;
            }
        }
        Ok(())
    }
}
