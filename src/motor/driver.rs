// High-level motor driver
//
// Resolves motors through the registry, encodes commands, hands frames to the
// shared bus and interprets responses. A status read that reports a fault
// clears the bus queue and resets every motor before the fault is returned.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, trace, warn};

use crate::bus::{BusError, Transport};

use super::command::{self, JogDirection, Simple, opcode};
use super::error::{MotorError, Result};
use super::registry::{Motor, MotorRef, Registry};
use super::settings::{Setting, SettingsUpdate, encode_settings_frame};
use super::status::{
    Fault, MISC_STATE_TAG, STATUS_LEN, Status, TEST_POSITION_TAG, fault_bits, fault_code,
    signed_position,
};

/// Protocol front end for every motor on one bus
pub struct MotorDriver {
    registry: Registry,
    bus: Arc<dyn Transport>,
}

impl MotorDriver {
    pub fn new(registry: Registry, bus: Arc<dyn Transport>) -> Self {
        Self { registry, bus }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn resolve(&self, motor: impl Into<MotorRef>) -> Result<&Motor> {
        self.registry.resolve(&motor.into())
    }

    async fn send(&self, motor: &Motor, frame: &[u8]) -> Result<()> {
        debug!("Motor {} (0x{:02X}) <- {:02X?}", motor.name, motor.address, frame);
        self.bus.write(motor.address, frame).await?;
        Ok(())
    }

    async fn read_response(&self, motor: &Motor) -> Result<[u8; STATUS_LEN]> {
        let response = self.bus.read(motor.address, STATUS_LEN).await?;
        Self::to_status_bytes(motor, response)
    }

    /// Write a query and read its answer with nothing in between
    async fn query(&self, motor: &Motor, query: u8) -> Result<[u8; STATUS_LEN]> {
        let response = self.bus.write_read(motor.address, &[query], STATUS_LEN).await?;
        Self::to_status_bytes(motor, response)
    }

    fn to_status_bytes(motor: &Motor, response: Vec<u8>) -> Result<[u8; STATUS_LEN]> {
        response.try_into().map_err(|response: Vec<u8>| {
            MotorError::Bus(BusError::InvalidResponse {
                address: motor.address,
                reason: format!("Expected {} status bytes, got {}", STATUS_LEN, response.len()),
            })
        })
    }

    // === Settings ===

    /// Send a sparse settings update. On success the motor's cached settings
    /// take exactly the values present in `update`.
    pub async fn send_settings(
        &self,
        motor: impl Into<MotorRef>,
        update: &SettingsUpdate,
    ) -> Result<()> {
        let motor = self.resolve(motor)?;
        let frame = encode_settings_frame(&motor.settings(), update)?;
        self.send(motor, &frame).await?;
        motor.apply_settings(update);
        Ok(())
    }

    // === Single byte commands ===

    pub async fn simple(&self, motor: impl Into<MotorRef>, command: Simple) -> Result<()> {
        let motor = self.resolve(motor)?;
        self.send(motor, &command.frame()).await
    }

    pub async fn home(&self, motor: impl Into<MotorRef>) -> Result<()> {
        self.simple(motor, Simple::Home).await
    }

    pub async fn fake_home(&self, motor: impl Into<MotorRef>) -> Result<()> {
        self.simple(motor, Simple::FakeHome).await
    }

    pub async fn stop(&self, motor: impl Into<MotorRef>) -> Result<()> {
        self.simple(motor, Simple::Stop).await
    }

    pub async fn stop_reset(&self, motor: impl Into<MotorRef>) -> Result<()> {
        self.simple(motor, Simple::StopReset).await
    }

    pub async fn reset(&self, motor: impl Into<MotorRef>) -> Result<()> {
        self.simple(motor, Simple::Reset).await
    }

    pub async fn motor_on(&self, motor: impl Into<MotorRef>) -> Result<()> {
        self.simple(motor, Simple::MotorOn).await
    }

    // === Motion ===

    /// Short move. `pos` must stay within `0..=0x7FFF`.
    pub async fn move_to(&self, motor: impl Into<MotorRef>, pos: i32) -> Result<()> {
        let motor = self.resolve(motor)?;
        self.send(motor, &command::move_frame(pos)).await
    }

    pub async fn move_with_speed(
        &self,
        motor: impl Into<MotorRef>,
        pos: i16,
        speed: u16,
    ) -> Result<()> {
        let motor = self.resolve(motor)?;
        self.send(motor, &command::speed_move_frame(pos, speed)).await
    }

    pub async fn move_with_accel(
        &self,
        motor: impl Into<MotorRef>,
        pos: i16,
        speed: u16,
        accel: u8,
    ) -> Result<()> {
        let motor = self.resolve(motor)?;
        self.send(motor, &command::accel_speed_move_frame(pos, speed, accel)).await
    }

    pub async fn jog_short(
        &self,
        motor: impl Into<MotorRef>,
        direction: JogDirection,
        dist: i32,
    ) -> Result<()> {
        let motor = self.resolve(motor)?;
        self.send(motor, &command::jog_short_frame(direction, dist)).await
    }

    pub async fn jog_relative(&self, motor: impl Into<MotorRef>, dist: i32) -> Result<()> {
        let motor = self.resolve(motor)?;
        self.send(motor, &command::jog_relative_frame(dist)).await
    }

    pub async fn jog_absolute(&self, motor: impl Into<MotorRef>, pos: i32) -> Result<()> {
        let motor = self.resolve(motor)?;
        self.send(motor, &command::jog_absolute_frame(pos)).await
    }

    pub async fn set_position(&self, motor: impl Into<MotorRef>, pos: i16) -> Result<()> {
        let motor = self.resolve(motor)?;
        self.send(motor, &command::set_position_frame(pos)).await
    }

    /// Reboot every controller, one after the other
    pub async fn reboot(&self) -> Result<()> {
        for &address in self.registry.controllers() {
            info!("Rebooting controller 0x{:02X}", address);
            self.bus.write(address, &command::reboot_frame()).await?;
        }
        Ok(())
    }

    // === Status ===

    /// Read a motor's status. A reported fault resets every motor and is
    /// returned as an error carrying the decoded status.
    pub async fn get_status(&self, motor: impl Into<MotorRef>) -> Result<Status> {
        let motor = self.resolve(motor)?;
        let response = self.read_response(motor).await?;
        let status = Status::decode(&motor.name, &response);

        if fault_bits(response[0]) != 0 {
            return Err(self.recover(motor, response[0], status).await);
        }
        trace!("Motor {} status: {:?}", motor.name, status);
        Ok(status)
    }

    /// Put the whole bus in a safe state after `motor` reported a fault
    async fn recover(&self, motor: &Motor, state: u8, status: Status) -> MotorError {
        warn!(
            "Motor {} reported fault state 0x{:02X}, resetting all motors",
            motor.name, state
        );

        let dropped = self.bus.clear_queue();
        if dropped > 0 {
            debug!("Dropped {} pending bus operations", dropped);
        }
        self.reset_all().await;

        match Fault::from_code(fault_code(state)) {
            Some(fault) => MotorError::MotorFault {
                motor: motor.index,
                name: motor.name.clone(),
                fault,
                status,
            },
            None => MotorError::UnknownFault {
                motor: motor.index,
                name: motor.name.clone(),
                controller: motor.controller,
                status,
            },
        }
    }

    async fn reset_all(&self) {
        let frame = Simple::Reset.frame();
        let results = join_all(self.registry.motors().iter().map(|m| self.send(m, &frame))).await;

        for (motor, result) in self.registry.motors().iter().zip(results) {
            if let Err(e) = result {
                warn!("Failed to reset motor {}: {}", motor.name, e);
            }
        }
    }

    /// Position reported by the test query, shifted by the home offset
    pub async fn get_test_pos(&self, motor: impl Into<MotorRef>) -> Result<i32> {
        let motor = self.resolve(motor)?;
        let response = self.query(motor, opcode::GET_TEST_POSITION).await?;
        Self::expect_tag(motor, "getTestPos", TEST_POSITION_TAG, &response)?;

        let pos = signed_position(response[1], response[2]) as i32;
        Ok(pos + motor.settings().get(Setting::HomeOfs))
    }

    pub async fn get_misc_state(&self, motor: impl Into<MotorRef>) -> Result<u16> {
        let motor = self.resolve(motor)?;
        let response = self.query(motor, opcode::GET_MISC_STATE).await?;
        Self::expect_tag(motor, "getMiscState", MISC_STATE_TAG, &response)?;

        Ok(u16::from_be_bytes([response[1], response[2]]))
    }

    /// Limit switch state, bit 0 of the misc state
    pub async fn get_limit(&self, motor: impl Into<MotorRef>) -> Result<bool> {
        Ok(self.get_misc_state(motor).await? & 0x01 == 1)
    }

    fn expect_tag(
        motor: &Motor,
        query: &'static str,
        expected: u8,
        response: &[u8; STATUS_LEN],
    ) -> Result<()> {
        let state = response[0];
        if state & 0x0F != expected {
            return Err(MotorError::ProtocolMismatch {
                name: motor.name.clone(),
                query,
                state,
                expected,
                response: response.to_vec(),
            });
        }
        Ok(())
    }

    // === Synchronization ===

    /// Poll the given motors until none of them is busy.
    ///
    /// Rounds follow each other without delay. A fault aborts the wait.
    pub async fn not_busy(&self, motors: &[MotorRef]) -> Result<()> {
        let mut rounds = 0u64;
        loop {
            rounds += 1;
            let statuses = first_error(join_all(motors.iter().map(|m| self.get_status(m))).await)?;
            if statuses.iter().all(|status| !status.busy) {
                trace!("Motors idle after {} poll rounds", rounds);
                return Ok(());
            }
        }
    }

    // === Initialization ===

    /// Read every motor's status and send it its full settings.
    ///
    /// A fault latched from a previous session goes through the usual
    /// recovery and is returned.
    pub async fn initialize(&self) -> Result<()> {
        info!("Initializing {} motors", self.registry.motors().len());

        let operations = self.registry.motors().iter().map(|motor| async move {
            let full = SettingsUpdate::full(&motor.settings());
            let (status, sent) = futures::join!(
                self.get_status(MotorRef::Index(motor.index)),
                self.send_settings(MotorRef::Index(motor.index), &full),
            );
            status.and(sent)
        });
        first_error(join_all(operations).await)?;

        info!("Motors initialized successfully");
        Ok(())
    }
}

/// Collect joined results, preferring a motor fault over other errors.
/// After a fault clears the queue, the other operations fail with `Cancelled`.
fn first_error<T>(results: Vec<Result<T>>) -> Result<Vec<T>> {
    let mut values = Vec::with_capacity(results.len());
    let mut error: Option<MotorError> = None;

    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(e) => match &error {
                Some(existing) if existing.is_fault() || !e.is_fault() => {}
                _ => error = Some(e),
            },
        }
    }

    match error {
        Some(e) => Err(e),
        None => Ok(values),
    }
}
