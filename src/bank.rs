//! Per-bank DRAM state machine: state transitions, issuance, and
//! completion bookkeeping. Scheduling of the actual completion event (i.e.
//! tracking "cycle + delay") is done by the controller, to avoid a bank ->
//! controller pointer cycle; the bank only computes how long a
//! just-issued command takes and applies state transitions when told a
//! command has completed.

use serde::{Deserialize, Serialize};

use crate::command::{BankCommand, CommandKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BankState {
    Closed,
    Opening,
    Open,
    Closing,
    Reading,
    Writing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankGeometry {
    pub num_rows: u32,
    pub num_columns: u32,
    pub column_element_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankTiming {
    pub delay_open: u32,
    pub delay_close: u32,
    pub delay_read: u32,
    pub delay_write: u32,
    pub burst_length: u16,
}

impl Default for BankTiming {
    fn default() -> Self {
        Self {
            delay_open: 50,
            delay_close: 50,
            delay_read: 20,
            delay_write: 20,
            burst_length: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bank {
    pub id: u32,
    pub geometry: BankGeometry,
    pub timing: BankTiming,
    state: BankState,
    current_row: Option<u32>,
    pub opens: u64,
    pub closes: u64,
    pub reads: u64,
    pub writes: u64,
}

impl Bank {
    pub fn new(id: u32, geometry: BankGeometry, timing: BankTiming) -> Self {
        Self {
            id,
            geometry,
            timing,
            state: BankState::Closed,
            current_row: None,
            opens: 0,
            closes: 0,
            reads: 0,
            writes: 0,
        }
    }

    pub fn state(&self) -> BankState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, BankState::Open | BankState::Closed)
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, BankState::Open)
    }

    /// Valid only while `state` is OPEN/READING/WRITING/CLOSING; `None`
    /// once PRECHARGE completes or the bank is CLOSED.
    pub fn open_row(&self) -> Option<u32> {
        self.current_row
    }

    /// Issues `cmd` to this bank, transitioning to the matching transient
    /// state and returning the delay (in cycles) until completion.
    /// `burst_factor` models a request wider than the native transfer
    /// width (`ceil(request_size / 32)`); it scales READ/WRITE delay only.
    pub fn issue(&mut self, cmd: &BankCommand, burst_factor: u32) -> u32 {
        debug_assert!(
            self.preconditions_hold(cmd),
            "bank {}: command {:?} issued while state is {:?}",
            self.id,
            cmd.kind,
            self.state
        );
        let burst_factor = burst_factor.max(1);
        match cmd.kind {
            CommandKind::Activate => {
                self.state = BankState::Opening;
                self.opens += 1;
                self.timing.delay_open
            }
            CommandKind::Precharge => {
                self.state = BankState::Closing;
                self.closes += 1;
                self.timing.delay_close
            }
            CommandKind::Read => {
                self.state = BankState::Reading;
                self.reads += 1;
                self.timing.delay_read * burst_factor
            }
            CommandKind::Write => {
                self.state = BankState::Writing;
                self.writes += 1;
                self.timing.delay_write * burst_factor
            }
        }
    }

    /// Applies the terminal state transition for a command that has just
    /// completed. Called by the controller when a previously-scheduled
    /// completion event fires.
    pub fn complete(&mut self, cmd: &BankCommand) {
        debug_assert!(
            self.transient_state_matches(cmd.kind),
            "bank {}: completion of {:?} while state is {:?}",
            self.id,
            cmd.kind,
            self.state
        );
        match cmd.kind {
            CommandKind::Activate => {
                self.state = BankState::Open;
                self.current_row = Some(cmd.value);
            }
            CommandKind::Precharge => {
                self.state = BankState::Closed;
                self.current_row = None;
            }
            CommandKind::Read | CommandKind::Write => {
                self.state = BankState::Open;
            }
        }
    }

    /// ACTIVATE requires CLOSED, PRECHARGE requires OPEN, READ/WRITE
    /// require OPEN. Row-hit is enforced by the request scheduler before a
    /// READ/WRITE command is ever constructed (it holds the request's row,
    /// which a bare `BankCommand` does not carry); this only re-checks
    /// what a bank can know about itself.
    fn preconditions_hold(&self, cmd: &BankCommand) -> bool {
        match cmd.kind {
            CommandKind::Activate => self.state == BankState::Closed,
            CommandKind::Precharge => self.state == BankState::Open,
            CommandKind::Read | CommandKind::Write => self.state == BankState::Open,
        }
    }

    fn transient_state_matches(&self, kind: CommandKind) -> bool {
        matches!(
            (self.state, kind),
            (BankState::Opening, CommandKind::Activate)
                | (BankState::Closing, CommandKind::Precharge)
                | (BankState::Reading, CommandKind::Read)
                | (BankState::Writing, CommandKind::Write)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::BankCommand;

    fn bank() -> Bank {
        Bank::new(0, BankGeometry { num_rows: 65536, num_columns: 1024, column_element_size: 8 }, BankTiming::default())
    }

    #[test]
    fn activate_then_read_round_trip() {
        let mut b = bank();
        let act = BankCommand::activate(0, 1, 7);
        let delay = b.issue(&act, 1);
        assert_eq!(delay, b.timing.delay_open);
        assert_eq!(b.state(), BankState::Opening);
        b.complete(&act);
        assert_eq!(b.state(), BankState::Open);
        assert_eq!(b.open_row(), Some(7));
    }

    #[test]
    fn precharge_clears_current_row() {
        let mut b = bank();
        let act = BankCommand::activate(0, 1, 7);
        b.issue(&act, 1);
        b.complete(&act);
        let pre = BankCommand::precharge(0, 1);
        b.issue(&pre, 1);
        b.complete(&pre);
        assert_eq!(b.state(), BankState::Closed);
        assert_eq!(b.open_row(), None);
    }

    #[test]
    fn read_delay_scales_with_burst_factor() {
        let mut b = bank();
        let act = BankCommand::activate(0, 1, 0);
        b.issue(&act, 1);
        b.complete(&act);
        let read = BankCommand::read(0, 1, 0);
        let delay = b.issue(&read, 2);
        assert_eq!(delay, b.timing.delay_read * 2);
    }

    #[test]
    #[should_panic]
    fn activate_on_open_bank_asserts() {
        let mut b = bank();
        let act = BankCommand::activate(0, 1, 0);
        b.issue(&act, 1);
        b.complete(&act);
        // still closed-only precondition violated: issuing ACTIVATE again
        b.issue(&BankCommand::activate(0, 2, 1), 1);
    }
}
