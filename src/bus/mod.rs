//
// iidc-driver - IEEE 1394 IIDC camera driver
// Copyright (c) 2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! IEEE 1394 bus transport interface.
//!
//! The driver does not talk to host adapters itself; it is given an implementation of `Bus`
//! which performs asynchronous register transactions and provides isochronous receive channels.
//!

pub mod simulator;

use std::sync::Arc;

/// Start of the CSR address space of every node.
pub const CSR_SPACE_BASE: u64 = 0xFFFF_F000_0000;

/// Duration of one isochronous cycle.
pub const ISO_CYCLE: std::time::Duration = std::time::Duration::from_micros(125);

pub type NodeId = u16;

#[derive(Debug)]
pub enum BusError {
    NoSuchNode(NodeId),
    /// Asynchronous transaction failed (no ack, address error, bus reset etc.).
    Transaction(String),
    ChannelUnavailable,
    InvalidRequest(String)
}

impl std::fmt::Display for BusError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            BusError::NoSuchNode(node) => write!(f, "no such node: {}", node),
            BusError::Transaction(msg) => write!(f, "transaction failed: {}", msg),
            BusError::ChannelUnavailable => write!(f, "no isochronous channel available"),
            BusError::InvalidRequest(msg) => write!(f, "invalid isochronous request: {}", msg)
        }
    }
}

impl std::error::Error for BusError {}

/// Isochronous transmission speed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IsoSpeed {
    S100,
    S200,
    S400,
    S800
}

impl IsoSpeed {
    /// Speed code as used in the ISO_Channel register.
    pub fn code(&self) -> u32 {
        match self {
            IsoSpeed::S100 => 0,
            IsoSpeed::S200 => 1,
            IsoSpeed::S400 => 2,
            IsoSpeed::S800 => 3
        }
    }

    pub fn from_code(code: u32) -> Option<IsoSpeed> {
        match code {
            0 => Some(IsoSpeed::S100),
            1 => Some(IsoSpeed::S200),
            2 => Some(IsoSpeed::S400),
            3 => Some(IsoSpeed::S800),
            _ => None
        }
    }

    pub fn from_mbps(mbps: u32) -> Option<IsoSpeed> {
        match mbps {
            100 => Some(IsoSpeed::S100),
            200 => Some(IsoSpeed::S200),
            400 => Some(IsoSpeed::S400),
            800 => Some(IsoSpeed::S800),
            _ => None
        }
    }

    /// Maximum isochronous packet payload in bytes.
    pub fn max_payload(&self) -> u32 {
        1024 << self.code()
    }
}

/// Bus transport.
///
/// Implementations are responsible for their own synchronization; the driver may use
/// a single `Bus` from several threads (one per opened camera).
pub trait Bus: Send + Sync {
    /// Returns ids of all nodes currently present on the bus.
    fn nodes(&self) -> Result<Vec<NodeId>, BusError>;

    /// Reads `length` bytes starting at absolute `address` of `node`.
    fn read_block(&self, node: NodeId, address: u64, length: usize) -> Result<Vec<u8>, BusError>;

    /// Writes `data` starting at absolute `address` of `node`.
    fn write_block(&self, node: NodeId, address: u64, data: &[u8]) -> Result<(), BusError>;

    /// Allocates an isochronous receive channel.
    ///
    /// # Parameters
    ///
    /// * `payload_size` - Maximum payload of a single packet (bytes).
    /// * `allowed_subchannels` - Bit `n` set means subchannel `n` may be used.
    ///
    fn allocate_iso_read_channel(
        &self,
        payload_size: u32,
        allowed_subchannels: u64
    ) -> Result<Box<dyn IsoChannel>, BusError>;

    fn read_quadlet(&self, node: NodeId, address: u64) -> Result<u32, BusError> {
        let bytes = self.read_block(node, address, 4)?;
        if bytes.len() != 4 {
            return Err(BusError::Transaction(format!("short quadlet read at 0x{:012X}", address)));
        }
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn write_quadlet(&self, node: NodeId, address: u64, value: u32) -> Result<(), BusError> {
        self.write_block(node, address, &value.to_be_bytes())
    }
}

/// Isochronous receive channel.
///
/// Requests are completed in the order they were queued.
pub trait IsoChannel: Send {
    fn subchannel(&self) -> u8;

    fn queue(&mut self, request: IsoRequest) -> Result<(), BusError>;

    /// Returns up to `count` finished (completed or failed) requests, oldest first.
    ///
    /// Returns fewer than `count` requests if `timeout` expires first. `None` waits indefinitely.
    fn dequeue(
        &mut self,
        count: usize,
        timeout: Option<std::time::Duration>
    ) -> Result<Vec<IsoRequest>, BusError>;

    /// Aborts all queued requests; they will be returned by `dequeue` with status `Failed`.
    fn cancel(&mut self) -> Result<(), BusError>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Completed,
    Failed
}

/// Size of an isochronous packet header stored for each received packet.
pub const ISO_HEADER_SIZE: usize = 4;

/// Isochronous receive request: `packet_count` packets of `payload_size` bytes each.
///
/// Payload of packet `i` is stored at `buffer[i * payload_size..]`, its header at `headers[i]`.
/// A request with zero packets completes immediately.
#[derive(Debug)]
pub struct IsoRequest {
    tag: usize,
    subchannel: u8,
    packet_count: usize,
    payload_size: usize,
    buffer: Vec<u8>,
    headers: Vec<u32>,
    status: RequestStatus,
    received_packets: usize
}

impl IsoRequest {
    /// Creates a request.
    ///
    /// # Parameters
    ///
    /// * `tag` - Caller-defined value returned unchanged with the finished request.
    /// * `buffer` - Receives the payload; must hold at least `packet_count * payload_size` bytes.
    ///
    pub fn new(
        tag: usize,
        subchannel: u8,
        packet_count: usize,
        payload_size: usize,
        buffer: Vec<u8>
    ) -> Result<IsoRequest, BusError> {
        if buffer.len() < packet_count * payload_size {
            return Err(BusError::InvalidRequest(format!(
                "buffer of {} bytes cannot hold {} packets of {} bytes",
                buffer.len(), packet_count, payload_size
            )));
        }

        Ok(IsoRequest{
            tag,
            subchannel,
            packet_count,
            payload_size,
            buffer,
            headers: vec![0; packet_count],
            status: RequestStatus::Pending,
            received_packets: 0
        })
    }

    pub fn tag(&self) -> usize { self.tag }

    pub fn subchannel(&self) -> u8 { self.subchannel }

    pub fn packet_count(&self) -> usize { self.packet_count }

    pub fn header_size(&self) -> usize { ISO_HEADER_SIZE }

    pub fn payload_size(&self) -> usize { self.payload_size }

    pub fn buffer(&self) -> &[u8] { &self.buffer }

    pub fn headers(&self) -> &[u32] { &self.headers }

    pub fn status(&self) -> RequestStatus { self.status }

    pub fn received_packets(&self) -> usize { self.received_packets }

    pub fn buffer_mut(&mut self) -> &mut [u8] { &mut self.buffer }

    /// Returns the payload buffer, consuming the request.
    pub fn into_buffer(self) -> Vec<u8> { self.buffer }

    /// Prepares a finished request to be queued again; the payload buffer is kept as is.
    pub fn reset(&mut self) {
        self.status = RequestStatus::Pending;
        self.received_packets = 0;
        for header in self.headers.iter_mut() { *header = 0; }
    }

    /// Stores a received packet; used by transport implementations.
    pub fn store_packet(&mut self, header: u32, payload: &[u8]) -> Result<(), BusError> {
        if self.received_packets >= self.packet_count || payload.len() > self.payload_size {
            return Err(BusError::InvalidRequest("packet does not fit the request".to_string()));
        }
        let start = self.received_packets * self.payload_size;
        self.buffer[start..start + payload.len()].copy_from_slice(payload);
        self.headers[self.received_packets] = header;
        self.received_packets += 1;
        if self.received_packets == self.packet_count {
            self.status = RequestStatus::Completed;
        }

        Ok(())
    }

    /// Marks the request as finished; used by transport implementations.
    pub fn finish(&mut self, status: RequestStatus) {
        self.status = status;
    }
}

/// Performs quadlet accesses to one node.
#[derive(Clone)]
pub struct RegisterAccessor {
    bus: Arc<dyn Bus>,
    node: NodeId
}

impl RegisterAccessor {
    pub fn new(bus: Arc<dyn Bus>, node: NodeId) -> RegisterAccessor {
        RegisterAccessor{ bus, node }
    }

    pub fn node(&self) -> NodeId { self.node }

    pub fn bus(&self) -> &Arc<dyn Bus> { &self.bus }

    pub fn read(&self, address: u64) -> Result<u32, BusError> {
        let value = self.bus.read_quadlet(self.node, address)?;
        log::trace!("node {}: read  0x{:012X} -> 0x{:08X}", self.node, address, value);
        Ok(value)
    }

    pub fn write(&self, address: u64, value: u32) -> Result<(), BusError> {
        log::trace!("node {}: write 0x{:012X} <- 0x{:08X}", self.node, address, value);
        self.bus.write_quadlet(self.node, address, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_speed_report_max_payload() {
        assert_eq!(1024, IsoSpeed::S100.max_payload());
        assert_eq!(4096, IsoSpeed::S400.max_payload());
        assert_eq!(8192, IsoSpeed::S800.max_payload());
    }

    #[test]
    fn given_too_small_buffer_fail_request_creation() {
        assert!(IsoRequest::new(0, 0, 4, 100, vec![0; 399]).is_err());
        assert!(IsoRequest::new(0, 0, 4, 100, vec![0; 400]).is_ok());
    }

    #[test]
    fn given_all_packets_stored_request_completes() {
        let mut request = IsoRequest::new(3, 0, 2, 4, vec![0; 8]).unwrap();
        request.store_packet(0x11, &[1, 2, 3, 4]).unwrap();
        assert_eq!(RequestStatus::Pending, request.status());
        request.store_packet(0x22, &[5, 6]).unwrap();
        assert_eq!(RequestStatus::Completed, request.status());
        assert_eq!(&[0x11, 0x22], request.headers());
        assert_eq!(vec![1, 2, 3, 4, 5, 6, 0, 0], request.into_buffer());
    }

    #[test]
    fn given_reset_request_can_be_filled_again() {
        let mut request = IsoRequest::new(7, 0, 1, 4, vec![0; 4]).unwrap();
        request.store_packet(0x11, &[1, 2, 3, 4]).unwrap();
        request.reset();
        assert_eq!(RequestStatus::Pending, request.status());
        assert_eq!(0, request.received_packets());
        assert_eq!(&[0], request.headers());
        request.store_packet(0x22, &[5, 6, 7, 8]).unwrap();
        assert_eq!(RequestStatus::Completed, request.status());
        assert_eq!(7, request.tag());
    }

    #[test]
    fn given_extra_packet_fail() {
        let mut request = IsoRequest::new(0, 0, 1, 4, vec![0; 4]).unwrap();
        request.store_packet(0, &[0; 4]).unwrap();
        assert!(request.store_packet(0, &[0; 4]).is_err());
    }
}
