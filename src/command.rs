//! BankCommand plus the command scheduler: four pluggable reordering
//! policies over the ready-to-issue command pool.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::timing::{TimingChecker, TimingLedger, TimingTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    Activate,
    Precharge,
    Read,
    Write,
}

impl CommandKind {
    pub fn is_read_or_write(self) -> bool {
        matches!(self, CommandKind::Read | CommandKind::Write)
    }
}

/// One DRAM-level operation, produced by the request scheduler and
/// consumed by the command scheduler and the bank state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankCommand {
    pub kind: CommandKind,
    pub bank: u32,
    /// Row id for ACTIVATE, column id for READ/WRITE; unused otherwise.
    pub value: u32,
    pub request_id: u64,
    /// Set by the greedy request-ordering policy to jump this command
    /// ahead of normal-priority traffic in `FifoWithPriorities`.
    pub priority: bool,
    /// Whether this command is the terminal command of its request; set by
    /// `completes_request` in the request scheduler and consumed by
    /// `react_to_completion` when the command finishes.
    pub completes_request: bool,
    /// Copied from the destination bank's configured `burst_length` at
    /// creation time so the timing checker can evaluate turnaround rules
    /// without a back-reference to the bank array.
    pub burst_length: u16,
    /// Copied from the owning request's `mem_op_latency_factor` at
    /// creation time so the bank state machine can scale READ/WRITE
    /// delay without a back-reference to the request.
    pub burst_factor: u32,
}

impl BankCommand {
    pub fn activate(bank: u32, request_id: u64, value: u32) -> Self {
        Self {
            kind: CommandKind::Activate,
            bank,
            value,
            request_id,
            priority: false,
            completes_request: false,
            burst_length: 0,
            burst_factor: 1,
        }
    }

    pub fn precharge(bank: u32, request_id: u64) -> Self {
        Self {
            kind: CommandKind::Precharge,
            bank,
            value: 0,
            request_id,
            priority: false,
            completes_request: false,
            burst_length: 0,
            burst_factor: 1,
        }
    }

    pub fn read(bank: u32, request_id: u64, value: u32) -> Self {
        Self {
            kind: CommandKind::Read,
            bank,
            value,
            request_id,
            priority: false,
            completes_request: false,
            burst_length: 0,
            burst_factor: 1,
        }
    }

    pub fn write(bank: u32, request_id: u64, value: u32) -> Self {
        Self {
            kind: CommandKind::Write,
            bank,
            value,
            request_id,
            priority: false,
            completes_request: false,
            burst_length: 0,
            burst_factor: 1,
        }
    }
}

/// Contract shared by every command-reordering policy.
trait CommandQueue {
    fn add(&mut self, cmd: BankCommand);
    fn has_commands(&self) -> bool;
    fn next_command(
        &mut self,
        checker: &TimingChecker<'_>,
        ledger: &mut TimingLedger,
        cycle: u64,
    ) -> Option<BankCommand>;
}

#[derive(Debug, Default)]
struct FifoQueue {
    queue: VecDeque<BankCommand>,
}

impl CommandQueue for FifoQueue {
    fn add(&mut self, cmd: BankCommand) {
        self.queue.push_back(cmd);
    }

    fn has_commands(&self) -> bool {
        !self.queue.is_empty()
    }

    fn next_command(
        &mut self,
        checker: &TimingChecker<'_>,
        ledger: &mut TimingLedger,
        cycle: u64,
    ) -> Option<BankCommand> {
        let head = self.queue.front()?;
        if checker.is_satisfied(ledger, head, cycle) {
            let cmd = self.queue.pop_front().unwrap();
            ledger.record_issue(&cmd, cycle);
            Some(cmd)
        } else {
            None
        }
    }
}

/// Scans for the first timing-ready command regardless of position. Ties
/// are broken by arrival order implicitly, via `VecDeque` push order: the
/// scan always finds the earliest-enqueued ready command first.
#[derive(Debug, Default)]
struct OldestReadyQueue {
    queue: VecDeque<BankCommand>,
}

impl CommandQueue for OldestReadyQueue {
    fn add(&mut self, cmd: BankCommand) {
        self.queue.push_back(cmd);
    }

    fn has_commands(&self) -> bool {
        !self.queue.is_empty()
    }

    fn next_command(
        &mut self,
        checker: &TimingChecker<'_>,
        ledger: &mut TimingLedger,
        cycle: u64,
    ) -> Option<BankCommand> {
        let idx = self
            .queue
            .iter()
            .position(|c| checker.is_satisfied(ledger, c, cycle))?;
        let cmd = self.queue.remove(idx).unwrap();
        ledger.record_issue(&cmd, cycle);
        Some(cmd)
    }
}

/// Two FIFOs, one of READ/WRITE, one of ACTIVATE/PRECHARGE. R/W always
/// considered first; only its head is inspected (no scanning), matching
/// the head-only variant rather than scanning each sub-queue oldest-first.
#[derive(Debug, Default)]
struct ReadWriteOverPrechargeQueue {
    rw: VecDeque<BankCommand>,
    ap: VecDeque<BankCommand>,
}

impl CommandQueue for ReadWriteOverPrechargeQueue {
    fn add(&mut self, cmd: BankCommand) {
        if cmd.kind.is_read_or_write() {
            self.rw.push_back(cmd);
        } else {
            self.ap.push_back(cmd);
        }
    }

    fn has_commands(&self) -> bool {
        !self.rw.is_empty() || !self.ap.is_empty()
    }

    fn next_command(
        &mut self,
        checker: &TimingChecker<'_>,
        ledger: &mut TimingLedger,
        cycle: u64,
    ) -> Option<BankCommand> {
        let queue = if !self.rw.is_empty() {
            &mut self.rw
        } else if !self.ap.is_empty() {
            &mut self.ap
        } else {
            return None;
        };
        let head = queue.front()?;
        if checker.is_satisfied(ledger, head, cycle) {
            let cmd = queue.pop_front().unwrap();
            ledger.record_issue(&cmd, cycle);
            Some(cmd)
        } else {
            None
        }
    }
}

/// Two FIFOs, priority and normal. Priority commands are emitted out of
/// global arrival order whenever they are timing-ready.
#[derive(Debug, Default)]
struct FifoWithPrioritiesQueue {
    priority: VecDeque<BankCommand>,
    normal: VecDeque<BankCommand>,
}

impl CommandQueue for FifoWithPrioritiesQueue {
    fn add(&mut self, cmd: BankCommand) {
        if cmd.priority {
            self.priority.push_back(cmd);
        } else {
            self.normal.push_back(cmd);
        }
    }

    fn has_commands(&self) -> bool {
        !self.priority.is_empty() || !self.normal.is_empty()
    }

    fn next_command(
        &mut self,
        checker: &TimingChecker<'_>,
        ledger: &mut TimingLedger,
        cycle: u64,
    ) -> Option<BankCommand> {
        if let Some(head) = self.priority.front() {
            if checker.is_satisfied(ledger, head, cycle) {
                let cmd = self.priority.pop_front().unwrap();
                ledger.record_issue(&cmd, cycle);
                return Some(cmd);
            }
        }
        let head = self.normal.front()?;
        if checker.is_satisfied(ledger, head, cycle) {
            let cmd = self.normal.pop_front().unwrap();
            ledger.record_issue(&cmd, cycle);
            Some(cmd)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandReorderingPolicy {
    Fifo,
    OldestReady,
    FifoWithPriorities,
    ReadWriteOverPrecharge,
}

impl CommandReorderingPolicy {
    pub fn from_str_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "fifo" => CommandReorderingPolicy::Fifo,
            "oldest_ready" => CommandReorderingPolicy::OldestReady,
            "fifo_with_priorities" => CommandReorderingPolicy::FifoWithPriorities,
            "oldest_rw_over_precharge" => CommandReorderingPolicy::ReadWriteOverPrecharge,
            _ => return None,
        })
    }
}

enum Inner {
    Fifo(FifoQueue),
    OldestReady(OldestReadyQueue),
    FifoWithPriorities(FifoWithPrioritiesQueue),
    ReadWriteOverPrecharge(ReadWriteOverPrechargeQueue),
}

/// Command Scheduler: holds ready commands and a private `TimingLedger`,
/// behind a fixed, closed set of reordering policies (static dispatch;
/// the variant set never grows at runtime).
pub struct CommandScheduler {
    inner: Inner,
    table: TimingTable,
    ledger: TimingLedger,
}

impl CommandScheduler {
    pub fn new(policy: CommandReorderingPolicy, table: TimingTable, num_banks: usize) -> Self {
        let inner = match policy {
            CommandReorderingPolicy::Fifo => Inner::Fifo(FifoQueue::default()),
            CommandReorderingPolicy::OldestReady => Inner::OldestReady(OldestReadyQueue::default()),
            CommandReorderingPolicy::FifoWithPriorities => {
                Inner::FifoWithPriorities(FifoWithPrioritiesQueue::default())
            }
            CommandReorderingPolicy::ReadWriteOverPrecharge => {
                Inner::ReadWriteOverPrecharge(ReadWriteOverPrechargeQueue::default())
            }
        };
        Self {
            inner,
            table,
            ledger: TimingLedger::new(num_banks),
        }
    }

    pub fn add(&mut self, cmd: BankCommand) {
        tracing::debug!(bank = cmd.bank, kind = ?cmd.kind, priority = cmd.priority, "command enqueued");
        match &mut self.inner {
            Inner::Fifo(q) => q.add(cmd),
            Inner::OldestReady(q) => q.add(cmd),
            Inner::FifoWithPriorities(q) => q.add(cmd),
            Inner::ReadWriteOverPrecharge(q) => q.add(cmd),
        }
    }

    pub fn has_commands(&self) -> bool {
        match &self.inner {
            Inner::Fifo(q) => q.has_commands(),
            Inner::OldestReady(q) => q.has_commands(),
            Inner::FifoWithPriorities(q) => q.has_commands(),
            Inner::ReadWriteOverPrecharge(q) => q.has_commands(),
        }
    }

    pub fn next_command(&mut self, cycle: u64) -> Option<BankCommand> {
        let checker = TimingChecker::new(&self.table);
        let cmd = match &mut self.inner {
            Inner::Fifo(q) => q.next_command(&checker, &mut self.ledger, cycle),
            Inner::OldestReady(q) => q.next_command(&checker, &mut self.ledger, cycle),
            Inner::FifoWithPriorities(q) => q.next_command(&checker, &mut self.ledger, cycle),
            Inner::ReadWriteOverPrecharge(q) => q.next_command(&checker, &mut self.ledger, cycle),
        };
        if let Some(cmd) = &cmd {
            tracing::debug!(bank = cmd.bank, kind = ?cmd.kind, cycle, "command issued");
        }
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TimingTable {
        TimingTable::default()
    }

    #[test]
    fn fifo_blocks_on_unready_head() {
        let mut t = TimingTable::default();
        t.rc = 10;
        let mut s = CommandScheduler::new(CommandReorderingPolicy::Fifo, t, 1);
        s.add(BankCommand::activate(0, 0, 0));
        assert!(s.next_command(0).is_some());
        s.add(BankCommand::activate(0, 1, 0));
        assert!(s.next_command(5).is_none());
        assert!(s.next_command(10).is_some());
    }

    #[test]
    fn oldest_ready_skips_blocked_head() {
        let mut t = TimingTable::default();
        t.rc = 100;
        let mut s = CommandScheduler::new(CommandReorderingPolicy::OldestReady, t, 2);
        s.add(BankCommand::activate(0, 0, 0));
        s.next_command(0); // bank 0 now blocked until cycle 100
        s.add(BankCommand::activate(0, 1, 0)); // blocked
        s.add(BankCommand::activate(1, 2, 0)); // different bank, free
        let cmd = s.next_command(1).expect("bank 1 activate should be ready");
        assert_eq!(cmd.bank, 1);
    }

    #[test]
    fn fifo_with_priorities_prefers_priority_queue() {
        let mut s = CommandScheduler::new(
            CommandReorderingPolicy::FifoWithPriorities,
            table(),
            1,
        );
        let mut normal = BankCommand::precharge(0, 1);
        normal.priority = false;
        let mut prio = BankCommand::precharge(0, 2);
        prio.priority = true;
        s.add(normal);
        s.add(prio);
        let cmd = s.next_command(0).unwrap();
        assert_eq!(cmd.request_id, 2);
    }

    #[test]
    fn rw_over_precharge_prefers_rw_head() {
        let mut s = CommandScheduler::new(
            CommandReorderingPolicy::ReadWriteOverPrecharge,
            table(),
            1,
        );
        s.add(BankCommand::precharge(0, 1));
        s.add(BankCommand::read(0, 2, 0));
        let cmd = s.next_command(0).unwrap();
        assert_eq!(cmd.kind, CommandKind::Read);
    }
}
