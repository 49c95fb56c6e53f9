//! The controller tick: the single cooperative unit of progress. Owns
//! every other component and drives them one cycle at a time. The bank
//! state machine does not call back into the controller directly — this
//! module tracks each bank's in-flight completion itself and resolves it
//! when the tick's cycle reaches it, avoiding a bank -> controller
//! pointer cycle.

use std::collections::VecDeque;

use crate::bank::Bank;
use crate::command::{BankCommand, CommandKind, CommandReorderingPolicy, CommandScheduler};
use crate::decode::AddressDecoder;
use crate::request::{Ack, Request, RequestDescriptor};
use crate::scheduler::{RequestReorderingPolicy, RequestScheduler};
use crate::stats::{StatsCollector, StatsSnapshot};
use crate::timing::TimingTable;

/// Result of a single `tick`: zero or one acknowledgement (at most one
/// ack per cycle).
#[derive(Debug, Default)]
pub struct TickResult {
    pub acks: Vec<Ack>,
}

impl TickResult {
    fn empty() -> Self {
        Self { acks: Vec::new() }
    }
}

/// The controller: owns the banks, the address decoder, both schedulers,
/// and the statistics collector.
pub struct Controller {
    banks: Vec<Bank>,
    decoder: AddressDecoder,
    request_scheduler: RequestScheduler,
    command_scheduler: CommandScheduler,
    stats: StatsCollector,
    write_allocate: bool,
    next_request_id: u64,
    /// At most one in-flight command per bank; `None` means the bank has
    /// nothing outstanding.
    pending_completions: Vec<Option<(BankCommand, u64)>>,
    /// Completed requests awaiting a free acknowledgement slot.
    pending_acks: VecDeque<(Request, u64)>,
    /// Earliest cycle the command bus may issue again; ACTIVATE holds it
    /// for two cycles, every other command for one.
    command_bus_ready_at: u64,
    idle: bool,
}

impl Controller {
    pub fn new(
        banks: Vec<Bank>,
        decoder: AddressDecoder,
        timing_table: TimingTable,
        request_policy: RequestReorderingPolicy,
        command_policy: CommandReorderingPolicy,
        write_allocate: bool,
    ) -> Self {
        let num_banks = banks.len();
        Self {
            banks,
            decoder,
            request_scheduler: RequestScheduler::new(request_policy, num_banks),
            command_scheduler: CommandScheduler::new(command_policy, timing_table, num_banks),
            stats: StatsCollector::new(),
            write_allocate,
            next_request_id: 0,
            pending_completions: vec![None; num_banks],
            pending_acks: VecDeque::new(),
            command_bus_ready_at: 0,
            idle: true,
        }
    }

    /// True once a run has drained every request and acknowledgement and
    /// nothing is scheduled to happen on a future cycle. Driven purely by
    /// bookkeeping; the driver may use it to decide when to stop ticking.
    pub fn is_idle(&self) -> bool {
        self.idle
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Entry point for an arriving request: decode, timestamp, enqueue.
    /// Returns the assigned request id for trace correlation.
    pub fn on_request(&mut self, desc: RequestDescriptor, cycle: u64) -> u64 {
        let decoded = self.decoder.decode(desc.address);
        let id = self.next_request_id;
        self.next_request_id += 1;

        let mut req = Request::new(id, desc, cycle);
        req.rank = decoded.rank;
        req.bank = decoded.bank;
        req.row = decoded.row;
        req.col = decoded.col;

        tracing::debug!(
            request_id = id,
            bank = decoded.bank,
            row = decoded.row,
            col = decoded.col,
            kind = ?req.kind,
            cycle,
            "request decoded and enqueued"
        );

        self.request_scheduler.put(req, decoded.bank);
        self.idle = false;
        id
    }

    /// Folded into `tick`: resolves every bank completion due exactly at
    /// `cycle`, in bank-id order for reproducibility.
    fn resolve_completions(&mut self, cycle: u64) {
        for bank_id in 0..self.banks.len() {
            let due = matches!(&self.pending_completions[bank_id], Some((_, at)) if *at == cycle);
            if !due {
                continue;
            }
            let (cmd, _) = self.pending_completions[bank_id].take().unwrap();
            self.banks[bank_id].complete(&cmd);
            tracing::debug!(bank = bank_id, kind = ?cmd.kind, cycle, "command completed");
            if let Some(completed) = self
                .request_scheduler
                .on_command_completed(&cmd, &self.banks[bank_id])
            {
                self.pending_acks.push_back((completed, cycle));
            }
        }
    }

    /// Advances the controller by exactly one cycle and returns whatever
    /// acknowledgement fired. Driven by the demo driver's trivial cycle
    /// loop, the stand-in for an external discrete-event framework that
    /// would otherwise call this once per scheduled tick.
    pub fn tick(&mut self, cycle: u64) -> TickResult {
        let mut result = TickResult::empty();

        // Bank -> controller notification, modeled as a queue drain
        // rather than a direct callback.
        self.resolve_completions(cycle);

        // Step 1: at most one ack per cycle; excess stays queued FIFO.
        if let Some((req, completed_cycle)) = self.pending_acks.pop_front() {
            let ack = Ack::new(req, completed_cycle);
            tracing::info!(
                request_id = ack.request.id,
                kind = ?ack.request.kind,
                service_latency = ack.service_latency,
                queue_latency = ack.queue_latency,
                cycle,
                "acknowledgement emitted"
            );
            self.stats.record_ack(&ack);
            result.acks.push(ack);
        }

        // Step 2: queue-occupancy sampling.
        self.stats
            .sample_queue_occupancy(cycle, self.request_scheduler.queue_occupancy());

        // Step 3: drain every schedulable bank's head request into a
        // command and hand it to the command scheduler.
        while self.request_scheduler.has_banks_to_schedule() {
            let bank_id = self
                .request_scheduler
                .next_bank()
                .expect("has_banks_to_schedule just returned true");
            let bank = &self.banks[bank_id as usize];
            let cmd = self.request_scheduler.command_for(bank, self.write_allocate);
            self.request_scheduler.annotate_issue(&cmd, cycle);
            self.command_scheduler.add(cmd);
        }

        // Step 4: issue at most one command, gated by the command bus.
        if cycle >= self.command_bus_ready_at && self.command_scheduler.has_commands() {
            if let Some(cmd) = self.command_scheduler.next_command(cycle) {
                let bank_id = cmd.bank as usize;
                let delay = self.banks[bank_id].issue(&cmd, cmd.burst_factor);
                let is_activate = matches!(cmd.kind, CommandKind::Activate);
                self.pending_completions[bank_id] = Some((cmd, cycle + delay as u64));
                self.command_bus_ready_at = cycle + if is_activate { 2 } else { 1 };
            }
        }

        // Step 5: re-arm / idle.
        let more_commands_or_banks = self.command_scheduler.has_commands()
            || self.request_scheduler.has_banks_to_schedule();
        let more_acks = !self.pending_acks.is_empty();
        let more_completions = self.pending_completions.iter().any(Option::is_some);
        self.idle = !(more_commands_or_banks || more_acks || more_completions);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::{BankGeometry, BankTiming};
    use crate::command::CommandReorderingPolicy;
    use crate::decode::AddressPolicy;
    use crate::request::AccessType;
    use crate::timing::TimingTable;

    fn controller(num_banks: u32, request_policy: RequestReorderingPolicy, command_policy: CommandReorderingPolicy) -> Controller {
        let decoder = AddressDecoder::new(AddressPolicy::OpenPage, num_banks, 4, 65536, 1024, 1, 5).unwrap();
        let geometry = BankGeometry { num_rows: 65536, num_columns: 1024, column_element_size: 8 };
        // Bank-level FSM delays are configured consistent with the timing
        // table below (delay_open == RCDRD, delay_close kept small so RP
        // governs PRECHARGE->ACTIVATE instead): the FSM's OPEN/CLOSED
        // transition and the timing ledger's RCDRD/RP gates are two
        // independent mechanisms that a real `mem_spec` is expected to
        // keep mutually consistent.
        let timing = BankTiming { delay_open: 12, delay_close: 2, delay_read: 20, delay_write: 20, burst_length: 4 };
        let banks = (0..num_banks).map(|id| Bank::new(id, geometry.clone(), timing.clone())).collect();
        let mut table = TimingTable::default();
        table.rcdrd = 12;
        table.rcdwr = 12;
        table.ccds = 2;
        table.rc = 39;
        table.rp = 13;
        table.ras = 28;
        table.rtp = 6;
        table.rrds = 4;
        table.wr = 12;
        table.wl = 10;
        table.wtrl = 9;
        table.rtw = 5;
        Controller::new(banks, decoder, table, request_policy, command_policy, true)
    }

    fn run_until_idle(c: &mut Controller, max_cycles: u64) -> Vec<Ack> {
        let mut acks = Vec::new();
        for cycle in 0..max_cycles {
            let mut res = c.tick(cycle);
            acks.append(&mut res.acks);
            if c.is_idle() {
                break;
            }
        }
        acks
    }

    #[test]
    fn s1_cold_load_activates_then_reads_then_acks() {
        let mut c = controller(1, RequestReorderingPolicy::FifoRr, CommandReorderingPolicy::Fifo);
        c.on_request(RequestDescriptor::new(0x0, AccessType::Load), 0);
        let acks = run_until_idle(&mut c, 200);
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].request.kind, AccessType::Load);
        // ACTIVATE@0 -> READ@RCDRD(12) -> completes @12+delay_read(20)=32.
        assert_eq!(acks[0].completed_cycle, 32);
        assert_eq!(acks[0].service_latency, 32);
    }

    #[test]
    fn s4_write_allocate_store_sequences_read_then_write() {
        let mut c = controller(1, RequestReorderingPolicy::FifoRr, CommandReorderingPolicy::Fifo);
        c.on_request(RequestDescriptor::new(0x0, AccessType::Store), 0);
        let acks = run_until_idle(&mut c, 300);
        assert_eq!(acks.len(), 1, "store must ack exactly once");
        assert_eq!(acks[0].request.kind, AccessType::Store);
    }

    #[test]
    fn ack_count_matches_request_count_across_mixed_traffic() {
        let mut c = controller(2, RequestReorderingPolicy::FifoRrAccessTypePriority, CommandReorderingPolicy::Fifo);
        c.on_request(RequestDescriptor::new(0x0, AccessType::Fetch), 0);
        c.on_request(RequestDescriptor::new(0x20, AccessType::Load), 0);
        c.on_request(RequestDescriptor::new(0x40, AccessType::Store), 0);
        c.on_request(RequestDescriptor::new(0x10000, AccessType::Writeback), 0);
        let acks = run_until_idle(&mut c, 500);
        assert_eq!(acks.len(), 4);
    }

    #[test]
    fn at_most_one_ack_per_cycle() {
        let mut c = controller(4, RequestReorderingPolicy::FifoRr, CommandReorderingPolicy::Fifo);
        // OpenPage places bank bits right above the 10 column bits, so
        // `i << 15` lands request i on bank i while keeping row/col at 0
        // (5 unused + 10 column bits = shift 15) -- this spreads the four
        // requests across four independent banks whose ACTIVATEs can
        // complete in the same cycle, which is exactly what this test
        // wants to exercise.
        for i in 0..4u64 {
            c.on_request(RequestDescriptor::new(i << 15, AccessType::Load), 0);
        }
        let mut total_acks = 0;
        for cycle in 0..500u64 {
            let res = c.tick(cycle);
            assert!(res.acks.len() <= 1, "at most one ack may fire per cycle");
            total_acks += res.acks.len();
            if c.is_idle() {
                break;
            }
        }
        assert_eq!(total_acks, 4);
    }
}
