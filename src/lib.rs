
//! Host-side IGMPv3 (RFC 3376): wire codecs, per-group source filters,
//! report generation and inbound classification.

pub mod addr;
pub mod config;
pub mod group;
pub mod handler;
pub mod igmp;
pub mod interface;
pub mod ip;
pub mod report;
