//! Packet I/O boundary
//!
//! The engine only ever sees [`PacketIo`]: pull a burst off a port/queue,
//! push a burst back. Neither call reports errors. An empty queue yields zero
//! packets, a full transmit ring accepts fewer than offered and the rest are
//! freed.
//!
//! [`RingIo`] is an in-process backend built on bounded crossbeam channels.
//! Each port/queue pair gets one receive ring and one transmit ring; the
//! far side of both rings is a [`WireEnd`], which plays the part of the NIC.

use crossbeam::channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};

use crate::buffer::Packet;
use crate::{PortId, QueueId};

/// Burst receive / transmit against port and queue pairs
pub trait PacketIo: Send {
    /// Move up to `capacity` packets from the receive queue into `burst`.
    ///
    /// Returns the number appended. Zero on an empty or unknown queue.
    fn rx_burst(
        &mut self,
        port: PortId,
        queue: QueueId,
        burst: &mut Vec<Packet>,
        capacity: usize,
    ) -> usize;

    /// Offer every packet in `burst` to the transmit queue, leaving `burst` empty.
    ///
    /// Returns the number accepted. Packets that did not fit are dropped.
    fn tx_burst(&mut self, port: PortId, queue: QueueId, burst: &mut Vec<Packet>) -> usize;

    /// Number of ports served
    fn nb_ports(&self) -> u16;
}

/// Host side of one port/queue
struct QueueRings {
    rx: Receiver<Packet>,
    tx: Sender<Packet>,
}

/// Channel-backed packet I/O
pub struct RingIo {
    /// Indexed `[port][queue]`
    ports: Vec<Vec<QueueRings>>,
}

impl RingIo {
    /// Create `nb_ports` ports with `nb_queues` queues each. Every ring holds
    /// `ring_size` packets.
    ///
    /// Returns the host side and one [`WireEnd`] per port.
    pub fn new(nb_ports: u16, nb_queues: u16, ring_size: usize) -> (Self, Vec<WireEnd>) {
        let mut ports = Vec::with_capacity(nb_ports as usize);
        let mut wires = Vec::with_capacity(nb_ports as usize);

        for port in 0..nb_ports {
            let mut host = Vec::with_capacity(nb_queues as usize);
            let mut wire = WireEnd {
                port,
                rx_inject: Vec::with_capacity(nb_queues as usize),
                tx_drain: Vec::with_capacity(nb_queues as usize),
            };

            for _ in 0..nb_queues {
                let (rx_in, rx_out) = bounded(ring_size);
                let (tx_in, tx_out) = bounded(ring_size);
                host.push(QueueRings { rx: rx_out, tx: tx_in });
                wire.rx_inject.push(rx_in);
                wire.tx_drain.push(tx_out);
            }

            ports.push(host);
            wires.push(wire);
        }

        (Self { ports }, wires)
    }

    fn rings(&self, port: PortId, queue: QueueId) -> Option<&QueueRings> {
        self.ports.get(port as usize)?.get(queue as usize)
    }
}

impl PacketIo for RingIo {
    fn rx_burst(
        &mut self,
        port: PortId,
        queue: QueueId,
        burst: &mut Vec<Packet>,
        capacity: usize,
    ) -> usize {
        let Some(rings) = self.rings(port, queue) else {
            return 0;
        };

        let mut received = 0;
        while received < capacity {
            match rings.rx.try_recv() {
                Ok(pkt) => {
                    burst.push(pkt);
                    received += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        received
    }

    fn tx_burst(&mut self, port: PortId, queue: QueueId, burst: &mut Vec<Packet>) -> usize {
        let Some(rings) = self.rings(port, queue) else {
            burst.clear();
            return 0;
        };

        let mut sent = 0;
        for pkt in burst.drain(..) {
            match rings.tx.try_send(pkt) {
                Ok(()) => sent += 1,
                // Ring full: the rest of the burst is freed unsent
                Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => break,
            }
        }
        burst.clear();
        sent
    }

    fn nb_ports(&self) -> u16 {
        self.ports.len() as u16
    }
}

/// Wire side of one port: feeds its receive rings and empties its transmit rings
pub struct WireEnd {
    port: PortId,
    rx_inject: Vec<Sender<Packet>>,
    tx_drain: Vec<Receiver<Packet>>,
}

impl WireEnd {
    /// Port this end belongs to
    pub fn port(&self) -> PortId {
        self.port
    }

    /// Number of queues on this port
    pub fn nb_queues(&self) -> u16 {
        self.rx_inject.len() as u16
    }

    /// Place a packet on a receive ring. Returns false if the ring is full,
    /// closed, or the queue does not exist.
    pub fn inject(&self, queue: QueueId, pkt: Packet) -> bool {
        self.rx_inject
            .get(queue as usize)
            .map(|ring| ring.try_send(pkt).is_ok())
            .unwrap_or(false)
    }

    /// Take everything currently waiting on a transmit ring
    pub fn drain(&self, queue: QueueId) -> Vec<Packet> {
        self.tx_drain
            .get(queue as usize)
            .map(|ring| ring.try_iter().collect())
            .unwrap_or_default()
    }

    /// Take everything waiting on all transmit rings of this port
    pub fn drain_all(&self) -> Vec<Packet> {
        self.tx_drain.iter().flat_map(|ring| ring.try_iter()).collect()
    }
}
