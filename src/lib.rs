//! RUDP-FT is a protocol for transferring a single file reliably and in order over plain UDP
//!  datagrams, tolerating (and, for experiments, injecting) datagram loss.
//!
//! ## Design goals
//!
//! * Reliability and ordering at datagram granularity, without relying on TCP
//!   * the file is split into fixed-size *segments* with zero-based sequence numbers
//!   * the sender keeps a sliding window of unacknowledged segments and re-sends each of them
//!      individually when its retransmission timeout expires (selective repeat)
//!   * acknowledgements are cumulative: ACK for segment N covers everything up to N
//!   * the receiver buffers out-of-order segments and asks for a missing one through NACK,
//!      bypassing the sender's timeout
//! * One transfer at a time per receiver
//!   * a receiver binds to the first sender that sends START, and replies BUSY to everybody
//!      else until that session completes or goes idle
//!   * senders that get BUSY back off exponentially and try again
//! * Static tuning: window size and timeouts come from one of two presets (LAN or WAN), there is
//!    no congestion control
//! * No checksum, encryption or authentication - datagrams that can not be parsed are dropped
//!
//! ## Wire format
//!
//! Every datagram is a single frame with a fixed header, all numbers in network byte order:
//!
//! ```ascii
//!  0: kind (u8): START=1, DATA=2, FIN=3, ACK=4, NACK=5, START_OK=6, BUSY=7
//!  1: sequence (u32) - segment number for DATA, ACK, NACK and FIN
//!  5: length (u32) - payload length for DATA, name length for START
//!  9: file size (u64) - authoritative on START and FIN
//! 17: payload (up to 1360 bytes) - file data for DATA, destination file name for START
//! ```
//!
//! ## Session flow
//!
//! ```ascii
//! sender                          receiver
//!   START(name, size)  ------->
//!                      <-------   START_OK      (or BUSY while serving someone else)
//!   DATA #0..#n        ------->
//!                      <-------   ACK #k / NACK #m
//!   FIN(#n, size)      ------->                 (finalizes once all bytes are written)
//! ```
//!
//! The crate also contains a plain TCP file copy in [tcp_baseline] for throughput comparison.

pub mod util;
pub mod config;
pub mod frame;
pub mod send_socket;
pub mod storage;
pub mod sender;
pub mod receiver;
pub mod tcp_baseline;
pub mod test_util;
