//! High-level Sapp session: one call per protocol command, with address
//! validation and automatic reconnect-and-retry.
//!
//! The [`Sapp`] session owns the transport and executor and serializes all
//! command executions - no two commands are ever in flight on the same
//! connection. Every operation:
//!
//! 1. validates its address range up front (no I/O on rejection),
//! 2. executes through the [`SappExecutor`](crate::SappExecutor),
//! 3. on any failure refreshes the connection and retries, up to
//!    [`RETRY_NUM`] additional attempts.
//!
//! Differential reads additionally retry while the decoded map comes back
//! empty: right after connecting, the device may report "nothing changed"
//! for a dropped response, which must not be confused with a legitimately
//! quiet bank.
//!
//! # Example
//!
//! ```no_run
//! use picnet_sapp::Sapp;
//! use std::time::Duration;
//!
//! let mut sapp = Sapp::connect("192.168.1.100", 7001, Duration::from_secs(5))?;
//! let value = sapp.read_virtual(120)?;
//! sapp.write_virtual(121, value + 1)?;
//! # Ok::<(), picnet_sapp::SappError>(())
//! ```

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use crate::command::SappCommand;
use crate::error::{Result, SappError};
use crate::executor::SappExecutor;
use crate::response::SappResponse;
use crate::transport::SappTransport;

/// Number of additional attempts after the initial one.
pub const RETRY_NUM: u32 = 3;

/// Highest valid input/output module address.
pub const MAX_MODULE_ADDR: u16 = 250;

/// Highest valid virtual variable address.
pub const MAX_VIRTUAL_ADDR: u16 = 2500;

/// A connected Sapp session to one MAS.
#[derive(Debug)]
pub struct Sapp {
    transport: SappTransport,
    executor: SappExecutor,
}

impl Sapp {
    /// Opens a session to the MAS at `host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`SappError::Unreachable`] if the connection budget is
    /// exhausted before the stream opens.
    pub fn connect(host: impl Into<String>, port: u16, timeout: Duration) -> Result<Self> {
        let mut transport = SappTransport::new(host, port, timeout);
        transport.connect()?;
        Ok(Self {
            transport,
            executor: SappExecutor::new(),
        })
    }

    /// Creates a session over an existing transport (connected or not).
    pub fn with_transport(transport: SappTransport) -> Self {
        Self {
            transport,
            executor: SappExecutor::new(),
        }
    }

    /// Reads the current word of one input module.
    pub fn read_input(&mut self, addr: u16) -> Result<u16> {
        validate_module_addr("input", addr)?;
        Ok(self.try_run(SappCommand::ReadInput(addr as u8))?.as_word())
    }

    /// Reads the current word of one output module.
    pub fn read_output(&mut self, addr: u16) -> Result<u16> {
        validate_module_addr("output", addr)?;
        Ok(self.try_run(SappCommand::ReadOutput(addr as u8))?.as_word())
    }

    /// Reads the current value of one virtual variable.
    pub fn read_virtual(&mut self, addr: u16) -> Result<u16> {
        validate_virtual_addr(addr)?;
        Ok(self.try_run(SappCommand::ReadVirtual(addr))?.as_word())
    }

    /// Sets a virtual variable, retrying while the device reports failure
    /// and attempts remain.
    pub fn write_virtual(&mut self, addr: u16, value: u16) -> Result<()> {
        validate_virtual_addr(addr)?;
        self.try_run(SappCommand::WriteVirtual {
            address: addr,
            value,
        })?;
        Ok(())
    }

    /// Reads every input word changed since the last differential read.
    pub fn read_changed_inputs(&mut self) -> Result<HashMap<u16, u16>> {
        self.try_run_until_non_empty(SappCommand::ReadChangedInputs, SappResponse::as_byte_word_map)
    }

    /// Reads every output word changed since the last differential read.
    pub fn read_changed_outputs(&mut self) -> Result<HashMap<u16, u16>> {
        self.try_run_until_non_empty(SappCommand::ReadChangedOutputs, SappResponse::as_byte_word_map)
    }

    /// Reads every virtual variable changed since the last differential read.
    pub fn read_changed_virtuals(&mut self) -> Result<HashMap<u16, u16>> {
        self.try_run_until_non_empty(SappCommand::ReadChangedVirtuals, SappResponse::as_word_word_map)
    }

    /// Reads the status word of one user-defined alarm.
    pub fn read_user_alarm(&mut self, alarm: u8) -> Result<u16> {
        Ok(self.try_run(SappCommand::ReadUserAlarm(alarm))?.as_word())
    }

    /// Reads the status of up to 32 user-defined alarms starting at `start`.
    pub fn read_user_alarms32(&mut self, start: u8, count: u8) -> Result<Vec<u8>> {
        Ok(self
            .try_run(SappCommand::ReadUserAlarms32 { start, count })?
            .as_byte_array())
    }

    /// Returns whether the transport has exhausted its connection budget.
    ///
    /// Callers use this to transition the owning engine to an offline state.
    pub fn is_dead(&self) -> bool {
        self.transport.is_unreachable()
    }

    /// Drops and reopens the connection.
    pub fn refresh(&mut self) -> Result<()> {
        self.transport.refresh()
    }

    /// Closes the underlying connection.
    pub fn close(&mut self) {
        self.transport.disconnect();
    }

    /// Executes a command with the refresh-and-retry policy: on any error -
    /// line corruption, I/O failure or a device failure status - refresh
    /// the connection and try again while attempts remain.
    fn try_run(&mut self, command: SappCommand) -> Result<SappResponse> {
        let mut attempts = 0;
        loop {
            let result = self
                .executor
                .execute(&command, &mut self.transport)
                .and_then(|response| {
                    response.check_status()?;
                    Ok(response)
                });

            match result {
                Ok(response) => return Ok(response),
                Err(e) => {
                    attempts += 1;
                    warn!(
                        opcode = format_args!("0x{:02X}", command.opcode()),
                        attempts,
                        error = %e,
                        "command failed"
                    );
                    if let Err(refresh_err) = self.transport.refresh() {
                        debug!(error = %refresh_err, "refresh failed");
                    }
                    if attempts > RETRY_NUM {
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Runs a differential read, additionally retrying while the decoded
    /// map is empty. An empty result after the retry budget is a legitimate
    /// "nothing changed" and is returned as such.
    fn try_run_until_non_empty(
        &mut self,
        command: SappCommand,
        decode: fn(&SappResponse) -> HashMap<u16, u16>,
    ) -> Result<HashMap<u16, u16>> {
        let mut retries = 0;
        loop {
            let map = decode(&self.try_run(command)?);
            if !map.is_empty() || retries >= RETRY_NUM {
                return Ok(map);
            }
            retries += 1;
        }
    }
}

fn validate_module_addr(kind: &'static str, addr: u16) -> Result<()> {
    if addr > MAX_MODULE_ADDR {
        warn!("invalid {kind} module address: {addr}");
        return Err(SappError::invalid_address(
            kind,
            u32::from(addr),
            u32::from(MAX_MODULE_ADDR),
        ));
    }
    Ok(())
}

fn validate_virtual_addr(addr: u16) -> Result<()> {
    if addr > MAX_VIRTUAL_ADDR {
        warn!("invalid virtual variable address: {addr}");
        return Err(SappError::invalid_address(
            "virtual",
            u32::from(addr),
            u32::from(MAX_VIRTUAL_ADDR),
        ));
    }
    Ok(())
}
