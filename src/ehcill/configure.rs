//! Controller side eHCILL configuration

use crate::config::ehcill::{
    CTS_PULSE_WIDTH, INACTIVITY_TIMEOUT_MS, MIN_TIMEOUT_MS, RETRANSMIT_TIMEOUT_MS,
};
use crate::config::hci::VENDOR_OGF;
use crate::hci::command::{HciCommandSink, HciError, RawCommandResponse};
use log::{info, warn};

/// HCI_VS_HCILL_Parameters
const HCILL_PARAMETERS_OCF: u16 = 0x012B;
/// HCI_VS_Sleep_Mode_Configurations
const SLEEP_MODE_CONFIGURATIONS_OCF: u16 = 0x010C;

/// Errors from configuring eHCILL on the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EhcillError {
    /// The command could not be exchanged with the controller
    Hci(HciError),
    /// The controller returned a non-zero status byte
    CommandFailed(u8),
    /// The response did not carry exactly one return byte
    UnexpectedResponse,
}

impl From<HciError> for EhcillError {
    fn from(error: HciError) -> Self {
        EhcillError::Hci(error)
    }
}

/// Sleep protocol settings pushed to the controller
#[derive(Debug, Clone)]
pub struct EhcillConfig {
    /// Idle time before the controller requests sleep, 0 keeps its default
    pub inactivity_timeout_ms: u16,
    /// Wake indication retransmit period, 0 keeps its default
    pub retransmit_timeout_ms: u16,
    /// Allow the controller to enter deep sleep
    pub deep_sleep: bool,
}

impl Default for EhcillConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_ms: INACTIVITY_TIMEOUT_MS,
            retransmit_timeout_ms: RETRANSMIT_TIMEOUT_MS,
            deep_sleep: true,
        }
    }
}

/// Convert milliseconds to 1.25 ms baseband frames.
fn ms_to_frames(ms: u16) -> u16 {
    (u32::from(ms) * 4 / 5) as u16
}

fn check_response(response: RawCommandResponse) -> Result<(), EhcillError> {
    match response.return_params.as_slice() {
        [0] => Ok(()),
        [status] => Err(EhcillError::CommandFailed(*status)),
        _ => Err(EhcillError::UnexpectedResponse),
    }
}

/// Program the controller's sleep protocol parameters.
///
/// The timeout command is only sent when both timeouts are non-zero; the
/// sleep mode command is always sent.
pub async fn configure<H: HciCommandSink>(
    hci: &mut H,
    config: &EhcillConfig,
) -> Result<(), EhcillError> {
    if config.inactivity_timeout_ms != 0 && config.retransmit_timeout_ms != 0 {
        let inactivity = ms_to_frames(config.inactivity_timeout_ms.max(MIN_TIMEOUT_MS));
        let retransmit = ms_to_frames(config.retransmit_timeout_ms.max(MIN_TIMEOUT_MS));

        let mut params = [0u8; 5];
        params[0..2].copy_from_slice(&inactivity.to_le_bytes());
        params[2..4].copy_from_slice(&retransmit.to_le_bytes());
        params[4] = CTS_PULSE_WIDTH;

        let response = hci
            .send_raw_command(VENDOR_OGF, HCILL_PARAMETERS_OCF, &params)
            .await?;
        check_response(response).inspect_err(|e| warn!("eHCILL parameters rejected: {:?}", e))?;
    }

    let params: [u8; 9] = [
        1,
        u8::from(config.deep_sleep),
        0,
        0xFF,
        0xFF,
        0xFF,
        0xFF,
        0x00,
        0x00,
    ];
    let response = hci
        .send_raw_command(VENDOR_OGF, SLEEP_MODE_CONFIGURATIONS_OCF, &params)
        .await?;
    check_response(response).inspect_err(|e| warn!("sleep mode configuration rejected: {:?}", e))?;

    info!(
        "eHCILL configured (deep sleep {})",
        if config.deep_sleep { "on" } else { "off" }
    );
    Ok(())
}
