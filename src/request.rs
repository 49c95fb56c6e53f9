//! Request/acknowledgement data model and the external inbound/outbound
//! port types.

use serde::{Deserialize, Serialize};

/// The four access types the controller distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessType {
    Fetch,
    Load,
    Store,
    Writeback,
}

impl AccessType {
    /// Whether this access type is serviced purely by a READ (no write-back).
    pub fn is_read_only(self) -> bool {
        matches!(self, AccessType::Fetch | AccessType::Load)
    }
}

/// Inbound descriptor as delivered by the upstream port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub address: u64,
    pub kind: AccessType,
    pub size: u32,
    pub core_id: u32,
    pub pc: u64,
    /// Burst-width multiplier supplied by the upstream source; a request
    /// wider than the native 32B transfer sets this above 1.
    pub mem_op_latency_factor: u32,
}

impl RequestDescriptor {
    pub fn new(address: u64, kind: AccessType) -> Self {
        Self {
            address,
            kind,
            size: 32,
            core_id: 0,
            pc: 0,
            mem_op_latency_factor: 1,
        }
    }
}

/// A cache-line access once it has reached the controller: decoded,
/// timestamped, and tracked through the commands that serve it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub address: u64,
    pub kind: AccessType,
    pub size: u32,
    pub core_id: u32,
    pub pc: u64,
    pub mem_op_latency_factor: u32,

    pub rank: u32,
    pub bank: u32,
    pub row: u32,
    pub col: u32,

    pub reached_controller: u64,
    pub first_command_issued: Option<u64>,

    pub closes_row: bool,
    pub misses_row: bool,

    /// Set once the write-allocate fill READ has completed for a STORE
    /// under `write_allocate`; distinguishes the allocate-READ from the
    /// terminal WRITE when re-inspecting the same head request. See
    /// DESIGN.md for why this replaces the source's bank-level
    /// `last_completed` bookkeeping.
    pub(crate) write_allocate_fill_done: bool,
}

impl Request {
    pub fn new(id: u64, desc: RequestDescriptor, reached_controller: u64) -> Self {
        Self {
            id,
            address: desc.address,
            kind: desc.kind,
            size: desc.size,
            core_id: desc.core_id,
            pc: desc.pc,
            mem_op_latency_factor: desc.mem_op_latency_factor.max(1),
            rank: 0,
            bank: 0,
            row: 0,
            col: 0,
            reached_controller,
            first_command_issued: None,
            closes_row: false,
            misses_row: false,
            write_allocate_fill_done: false,
        }
    }
}

/// An outbound acknowledgement: the completed request plus its latencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub request: Request,
    pub completed_cycle: u64,
    /// Cycles from arrival at the controller to acknowledgement.
    pub service_latency: u64,
    /// Cycles from arrival at the controller to its first issued command.
    pub queue_latency: u64,
}

impl Ack {
    pub fn new(request: Request, completed_cycle: u64) -> Self {
        let service_latency = completed_cycle.saturating_sub(request.reached_controller);
        let queue_latency = request
            .first_command_issued
            .unwrap_or(request.reached_controller)
            .saturating_sub(request.reached_controller);
        Self {
            request,
            completed_cycle,
            service_latency,
            queue_latency,
        }
    }
}
