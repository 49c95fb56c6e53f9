//! Request scheduler: per-bank request queues and the translation of a
//! head request into the next command it needs, under one of three
//! pluggable ordering policies.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::bank::Bank;
use crate::command::{BankCommand, CommandKind};
use crate::request::{AccessType, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestReorderingPolicy {
    FifoRr,
    FifoRrAccessTypePriority,
    Greedy,
}

impl RequestReorderingPolicy {
    pub fn from_str_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "fifo" => RequestReorderingPolicy::FifoRr,
            "access_type" => RequestReorderingPolicy::FifoRrAccessTypePriority,
            "greedy" => RequestReorderingPolicy::Greedy,
            _ => return None,
        })
    }
}

/// Whether the head request of a bank's queue is a row hit against that
/// bank's currently open row.
fn is_row_hit(bank: &Bank, row: u32) -> bool {
    bank.is_open() && bank.open_row() == Some(row)
}

/// Builds the next command the head request of a bank needs, given the
/// bank's current state. Shared by every policy.
fn command_for_head(bank: &Bank, req: &Request, write_allocate: bool) -> BankCommand {
    if !bank.is_ready() {
        // Transient states (OPENING/CLOSING/READING/WRITING) never reach
        // here: a bank leaves `banks_to_schedule` the moment a command is
        // generated for it and only returns once that command completes.
        unreachable!("command_for called on a bank with a command already in flight");
    }
    let cmd = if !bank.is_open() {
        BankCommand::activate(bank.id, req.id, req.row)
    } else if !is_row_hit(bank, req.row) {
        BankCommand::precharge(bank.id, req.id)
    } else {
        match req.kind {
            AccessType::Store if write_allocate && !req.write_allocate_fill_done => {
                BankCommand::read(bank.id, req.id, req.col)
            }
            AccessType::Store | AccessType::Writeback => {
                BankCommand::write(bank.id, req.id, req.col)
            }
            AccessType::Fetch | AccessType::Load => BankCommand::read(bank.id, req.id, req.col),
        }
    };
    let mut cmd = cmd;
    cmd.burst_length = bank.timing.burst_length;
    cmd.burst_factor = req.mem_op_latency_factor;
    cmd.completes_request = completes_request(&cmd, req, write_allocate);
    cmd
}

/// Whether `cmd` is the terminal command of `req`. A STORE's only READ is
/// always its write-allocate fill (`command_for_head` never emits a bare
/// READ for a STORE), so READ only ever terminates a FETCH/LOAD; WRITE
/// terminates every STORE/WRITEBACK that reaches it. The result is
/// stamped onto `cmd.completes_request` and later consumed by
/// `react_to_completion` instead of being re-derived there.
fn completes_request(cmd: &BankCommand, req: &Request, _write_allocate: bool) -> bool {
    match cmd.kind {
        CommandKind::Read => matches!(req.kind, AccessType::Fetch | AccessType::Load),
        CommandKind::Write => matches!(req.kind, AccessType::Store | AccessType::Writeback),
        CommandKind::Activate | CommandKind::Precharge => false,
    }
}

/// Result of reacting to a completed command: whether the head request
/// finished (and should be acknowledged) plus whether its bank still has
/// work to re-enqueue.
pub struct CompletionOutcome {
    pub completed: Option<Request>,
    pub bank_has_more_work: bool,
}

struct BankQueues {
    queues: Vec<VecDeque<Request>>,
}

impl BankQueues {
    fn new(num_banks: usize) -> Self {
        Self {
            queues: (0..num_banks).map(|_| VecDeque::new()).collect(),
        }
    }

    fn push(&mut self, bank: u32, req: Request) -> bool {
        let q = &mut self.queues[bank as usize];
        let was_empty = q.is_empty();
        q.push_back(req);
        was_empty
    }

    fn front(&self, bank: u32) -> Option<&Request> {
        self.queues[bank as usize].front()
    }

    fn front_mut(&mut self, bank: u32) -> Option<&mut Request> {
        self.queues[bank as usize].front_mut()
    }

    fn pop_front(&mut self, bank: u32) -> Option<Request> {
        self.queues[bank as usize].pop_front()
    }

    fn has_pending(&self, bank: u32) -> bool {
        !self.queues[bank as usize].is_empty()
    }

    fn occupancy(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }
}

/// FIFO-per-bank queue with round-robin bank selection (base policy that
/// `Greedy` extends).
struct FifoRrScheduler {
    queues: BankQueues,
    banks_to_schedule: VecDeque<u32>,
}

impl FifoRrScheduler {
    fn new(num_banks: usize) -> Self {
        Self {
            queues: BankQueues::new(num_banks),
            banks_to_schedule: VecDeque::new(),
        }
    }

    fn put(&mut self, req: Request, bank: u32) {
        if self.queues.push(bank, req) {
            self.banks_to_schedule.push_back(bank);
        }
    }

    fn reschedule(&mut self, bank: u32, _bank_state: &Bank, front_pushed: bool) {
        if front_pushed {
            self.banks_to_schedule.push_front(bank);
        } else {
            self.banks_to_schedule.push_back(bank);
        }
    }
}

/// Three FIFOs per bank: fetch > load > store/writeback.
struct AccessTypePriorityScheduler {
    fetch: BankQueues,
    load: BankQueues,
    store: BankQueues,
    banks_to_schedule: VecDeque<u32>,
}

impl AccessTypePriorityScheduler {
    fn new(num_banks: usize) -> Self {
        Self {
            fetch: BankQueues::new(num_banks),
            load: BankQueues::new(num_banks),
            store: BankQueues::new(num_banks),
            banks_to_schedule: VecDeque::new(),
        }
    }

    fn queue_for(&self, kind: AccessType) -> &BankQueues {
        match kind {
            AccessType::Fetch => &self.fetch,
            AccessType::Load => &self.load,
            AccessType::Store | AccessType::Writeback => &self.store,
        }
    }

    fn queue_for_mut(&mut self, kind: AccessType) -> &mut BankQueues {
        match kind {
            AccessType::Fetch => &mut self.fetch,
            AccessType::Load => &mut self.load,
            AccessType::Store | AccessType::Writeback => &mut self.store,
        }
    }

    fn has_pending(&self, bank: u32) -> bool {
        self.fetch.has_pending(bank) || self.load.has_pending(bank) || self.store.has_pending(bank)
    }

    /// Highest-priority non-empty queue for this bank: fetch, then load,
    /// then store/writeback.
    fn head_kind(&self, bank: u32) -> Option<AccessType> {
        if self.fetch.has_pending(bank) {
            Some(AccessType::Fetch)
        } else if self.load.has_pending(bank) {
            Some(AccessType::Load)
        } else if self.store.has_pending(bank) {
            // front() tells us whether it's a Store or Writeback entry.
            self.store.front(bank).map(|r| r.kind)
        } else {
            None
        }
    }

    fn put(&mut self, req: Request, bank: u32) {
        let was_empty = !self.has_pending(bank);
        self.queue_for_mut(req.kind).push(bank, req);
        if was_empty {
            self.banks_to_schedule.push_back(bank);
        }
    }
}

/// Dispatches to one of three fixed request-ordering policies via a
/// closed enum (no trait objects — the variant set never grows at
/// runtime).
pub enum RequestScheduler {
    FifoRr(FifoRrScheduler),
    AccessTypePriority(AccessTypePriorityScheduler),
    Greedy {
        base: FifoRrScheduler,
        /// Banks whose next command is a row-miss the greedy policy has
        /// already promised to prioritize; cleared once that bank reaches
        /// a row hit. Drives the `priority` flag on ACTIVATE/PRECHARGE.
        priority_banks: std::collections::HashSet<u32>,
    },
}

impl RequestScheduler {
    pub fn new(policy: RequestReorderingPolicy, num_banks: usize) -> Self {
        match policy {
            RequestReorderingPolicy::FifoRr => RequestScheduler::FifoRr(FifoRrScheduler::new(num_banks)),
            RequestReorderingPolicy::FifoRrAccessTypePriority => {
                RequestScheduler::AccessTypePriority(AccessTypePriorityScheduler::new(num_banks))
            }
            RequestReorderingPolicy::Greedy => RequestScheduler::Greedy {
                base: FifoRrScheduler::new(num_banks),
                priority_banks: std::collections::HashSet::new(),
            },
        }
    }

    pub fn put(&mut self, req: Request, bank: u32) {
        match self {
            RequestScheduler::FifoRr(s) => s.put(req, bank),
            RequestScheduler::AccessTypePriority(s) => s.put(req, bank),
            RequestScheduler::Greedy { base, .. } => base.put(req, bank),
        }
    }

    pub fn has_banks_to_schedule(&self) -> bool {
        match self {
            RequestScheduler::FifoRr(s) => !s.banks_to_schedule.is_empty(),
            RequestScheduler::AccessTypePriority(s) => !s.banks_to_schedule.is_empty(),
            RequestScheduler::Greedy { base, .. } => !base.banks_to_schedule.is_empty(),
        }
    }

    /// Pops the next bank id eligible for command generation this cycle.
    pub fn next_bank(&mut self) -> Option<u32> {
        match self {
            RequestScheduler::FifoRr(s) => s.banks_to_schedule.pop_front(),
            RequestScheduler::AccessTypePriority(s) => s.banks_to_schedule.pop_front(),
            RequestScheduler::Greedy { base, .. } => base.banks_to_schedule.pop_front(),
        }
    }

    pub fn queue_occupancy(&self) -> usize {
        match self {
            RequestScheduler::FifoRr(s) => s.queues.occupancy(),
            RequestScheduler::AccessTypePriority(s) => {
                s.fetch.occupancy() + s.load.occupancy() + s.store.occupancy()
            }
            RequestScheduler::Greedy { base, .. } => base.queues.occupancy(),
        }
    }

    /// Builds the next command the head request of `bank` needs.
    pub fn command_for(&self, bank: &Bank, write_allocate: bool) -> BankCommand {
        match self {
            RequestScheduler::FifoRr(s) => {
                let req = s.queues.front(bank.id).expect("scheduled bank has a head request");
                command_for_head(bank, req, write_allocate)
            }
            RequestScheduler::AccessTypePriority(s) => {
                let kind = s.head_kind(bank.id).expect("scheduled bank has a head request");
                let req = s
                    .queue_for(kind)
                    .front(bank.id)
                    .expect("scheduled bank has a head request");
                command_for_head(bank, req, write_allocate)
            }
            RequestScheduler::Greedy { base, priority_banks } => {
                let req = base
                    .queues
                    .front(bank.id)
                    .expect("scheduled bank has a head request");
                let mut cmd = command_for_head(bank, req, write_allocate);
                if priority_banks.contains(&bank.id) && matches!(cmd.kind, CommandKind::Activate | CommandKind::Precharge) {
                    cmd.priority = true;
                }
                cmd
            }
        }
    }

    /// Reacts to a command completing on `bank`; returns the serviced
    /// request if the command was terminal for it.
    pub fn on_command_completed(&mut self, cmd: &BankCommand, bank: &Bank) -> Option<Request> {
        match self {
            RequestScheduler::FifoRr(s) => {
                let completed = react_to_completion(&mut s.queues, cmd);
                if s.queues.has_pending(cmd.bank) {
                    s.reschedule(cmd.bank, bank, false);
                }
                completed
            }
            RequestScheduler::AccessTypePriority(s) => {
                let kind = s.head_kind(cmd.bank);
                let completed = if let Some(kind) = kind {
                    react_to_completion(s.queue_for_mut(kind), cmd)
                } else {
                    None
                };
                if s.has_pending(cmd.bank) {
                    s.banks_to_schedule.push_back(cmd.bank);
                }
                completed
            }
            RequestScheduler::Greedy { base, priority_banks } => {
                let completed = react_to_completion(&mut base.queues, cmd);
                if base.queues.has_pending(cmd.bank) {
                    let next_req = base.queues.front(cmd.bank).unwrap();
                    let row_miss = !bank.is_open() || bank.open_row() != Some(next_req.row);
                    if row_miss {
                        priority_banks.insert(cmd.bank);
                    } else {
                        priority_banks.remove(&cmd.bank);
                    }
                    base.reschedule(cmd.bank, bank, row_miss);
                } else {
                    priority_banks.remove(&cmd.bank);
                }
                completed
            }
        }
    }

    /// Marks `closes_row`/`misses_row` statistics flags and stamps
    /// `first_command_issued` the first time a command is generated for
    /// this request. Called by the controller right after `command_for`.
    pub fn annotate_issue(&mut self, cmd: &BankCommand, cycle: u64) {
        let req = match self {
            RequestScheduler::FifoRr(s) => s.queues.front_mut(cmd.bank),
            RequestScheduler::AccessTypePriority(s) => {
                let kind = s.head_kind(cmd.bank);
                kind.and_then(|k| s.queue_for_mut(k).front_mut(cmd.bank))
            }
            RequestScheduler::Greedy { base, .. } => base.queues.front_mut(cmd.bank),
        };
        if let Some(req) = req {
            match cmd.kind {
                CommandKind::Precharge => req.closes_row = true,
                CommandKind::Activate => req.misses_row = true,
                _ => {}
            }
            if req.first_command_issued.is_none() {
                req.first_command_issued = Some(cycle);
            }
        }
    }
}

/// Shared `on_command_completed` logic operating on whichever per-access-
/// type queue the command's bank head request lives in. Defers entirely
/// to `cmd.completes_request`, stamped by `command_for_head` at issue
/// time, rather than re-deriving the terminal-command judgment here.
fn react_to_completion(queues: &mut BankQueues, cmd: &BankCommand) -> Option<Request> {
    if !cmd.kind.is_read_or_write() {
        return None;
    }
    if cmd.completes_request {
        queues.pop_front(cmd.bank)
    } else {
        // Write-allocate fill READ: mark it done and leave the request
        // queued for the WRITE that actually completes it.
        if let Some(req) = queues.front_mut(cmd.bank) {
            req.write_allocate_fill_done = true;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::{BankGeometry, BankTiming};
    use crate::request::RequestDescriptor;

    fn bank(id: u32) -> Bank {
        Bank::new(
            id,
            BankGeometry { num_rows: 65536, num_columns: 1024, column_element_size: 8 },
            BankTiming::default(),
        )
    }

    fn req(id: u64, kind: AccessType, row: u32, col: u32) -> Request {
        let mut r = Request::new(id, RequestDescriptor::new(0, kind), 0);
        r.row = row;
        r.col = col;
        r
    }

    #[test]
    fn fifo_rr_cold_load_activates_then_reads() {
        let mut s = RequestScheduler::new(RequestReorderingPolicy::FifoRr, 1);
        s.put(req(1, AccessType::Load, 0, 0), 0);
        assert!(s.has_banks_to_schedule());
        let b = bank(0);
        let bank_id = s.next_bank().unwrap();
        assert_eq!(bank_id, 0);
        let cmd = s.command_for(&b, true);
        assert_eq!(cmd.kind, CommandKind::Activate);
    }

    #[test]
    fn store_with_write_allocate_reads_before_writing() {
        let mut s = RequestScheduler::new(RequestReorderingPolicy::FifoRr, 1);
        s.put(req(1, AccessType::Store, 0, 3), 0);
        let mut b = bank(0);
        s.next_bank();
        let activate = s.command_for(&b, true);
        assert_eq!(activate.kind, CommandKind::Activate);
        b.issue(&activate, 1);
        b.complete(&activate);

        let first = s.command_for(&b, true);
        assert_eq!(first.kind, CommandKind::Read, "allocate fill must come first");
        b.issue(&first, 1);
        b.complete(&first);
        let completed = s.on_command_completed(&first, &b);
        assert!(completed.is_none(), "allocate READ must not ack the request");

        let second = s.command_for(&b, true);
        assert_eq!(second.kind, CommandKind::Write);
        b.issue(&second, 1);
        b.complete(&second);
        let completed = s.on_command_completed(&second, &b);
        assert!(completed.is_some(), "WRITE must ack the store");
    }

    #[test]
    fn store_without_write_allocate_writes_directly() {
        let mut s = RequestScheduler::new(RequestReorderingPolicy::FifoRr, 1);
        s.put(req(1, AccessType::Store, 0, 3), 0);
        let mut b = bank(0);
        s.next_bank();
        let activate = s.command_for(&b, false);
        b.issue(&activate, 1);
        b.complete(&activate);
        let cmd = s.command_for(&b, false);
        assert_eq!(cmd.kind, CommandKind::Write);
    }

    #[test]
    fn access_type_priority_orders_fetch_before_load_before_store() {
        let mut s = RequestScheduler::new(RequestReorderingPolicy::FifoRrAccessTypePriority, 1);
        s.put(req(1, AccessType::Store, 5, 0), 0);
        s.put(req(2, AccessType::Load, 5, 0), 0);
        s.put(req(3, AccessType::Fetch, 5, 0), 0);
        let mut b = bank(0);
        // Open the row once up front.
        let act = BankCommand::activate(0, 0, 5);
        b.issue(&act, 1);
        b.complete(&act);
        s.next_bank();

        let cmd = s.command_for(&b, true);
        assert_eq!(cmd.kind, CommandKind::Read);
        assert_eq!(cmd.request_id, 3, "fetch must be served first");
    }

    #[test]
    fn greedy_marks_row_miss_as_priority() {
        let mut s = RequestScheduler::new(RequestReorderingPolicy::Greedy, 2);
        let mut b0 = bank(0);
        let act0 = BankCommand::activate(0, 1, 5);
        b0.issue(&act0, 1);
        b0.complete(&act0);

        s.put(req(1, AccessType::Load, 5, 0), 0);
        s.put(req(2, AccessType::Load, 9, 0), 0); // row conflict once req 1 finishes
        s.next_bank();
        let read = s.command_for(&b0, true);
        b0.issue(&read, 1);
        b0.complete(&read);
        s.on_command_completed(&read, &b0);

        // Bank is re-scheduled; the next head request misses the open row,
        // so greedy should mark its PRECHARGE as priority.
        s.next_bank();
        let precharge = s.command_for(&b0, true);
        assert_eq!(precharge.kind, CommandKind::Precharge);
        assert!(precharge.priority, "row-miss PRECHARGE should be prioritized");
    }
}
