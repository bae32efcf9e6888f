//! TCP connection state machine (RFC 793, reduced to the segment-driven
//! core: no user socket API, no retransmission queue, no congestion
//! control).
//!
//! Layout mirrors the processing pipeline: [`seq`] holds the modular
//! sequence arithmetic, [`pcb`] the control block, [`input`] the segment
//! processing and handshake, [`output`] the flag-segment builder.

pub mod input;
pub mod output;
pub mod pcb;
pub mod seq;

pub use input::tcp_input;
pub use pcb::{TcpConnState, TcpPcb, TcpSignal, TcpState};
