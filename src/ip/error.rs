//! Errors raised while planning addresses and labels.

use ipnetwork::IpNetwork;
use std::net::IpAddr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("label suffix '{suffix}' derived from {address} is longer than the label length {label_len}")]
    LabelOverflow {
        address: IpAddr,
        suffix: String,
        label_len: usize,
    },

    #[error("word index {index} is out of range for address {address}")]
    InvalidWordIndex { address: IpAddr, index: usize },

    #[error("no address words selected to derive a label from {address}")]
    NoWordsSelected { address: IpAddr },

    #[error("address space exhausted: {address} is outside the management network {block}")]
    AddressSpaceExhausted { address: IpAddr, block: IpNetwork },

    #[error("cannot advance {address} by {step}: end of the address family")]
    AddressOverflow { address: IpAddr, step: u64 },

    #[error("address {address} for node {label} is already assigned to node {owner}")]
    DuplicateAddress {
        address: IpAddr,
        label: String,
        owner: String,
    },

    #[error("SDN node {label} has no port on its first connection to derive a cluster port from")]
    MissingBasePort { label: String },

    #[error("derived port for SDN node {label} overflows: {base} + {offset}")]
    PortOverflow {
        label: String,
        base: u16,
        offset: usize,
    },
}
