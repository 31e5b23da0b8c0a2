//! Label derivation and address cursor arithmetic.
//!
//! A label is a short fixed-length identifier built from selected words of
//! an address: octets for IPv4, 16-bit segments for IPv6. The first selected
//! word is written in plain decimal and every following word is zero-padded
//! to its full decimal width, so two addresses that differ in any selected
//! word never share a label. The suffix is then left-padded with `'0'`.

use super::error::PlanError;
use ipnetwork::IpNetwork;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Label length expected by the forwarding engine
pub const DEFAULT_LABEL_LEN: usize = 8;

/// Words used for address-consuming hosts (the low 16 bits of an IPv4 address)
pub const HOST_LABEL_WORDS: [usize; 2] = [2, 3];

/// Words used for switches that share the cluster anchor address
pub const SWITCH_LABEL_WORDS: [usize; 1] = [3];

/// IPv6 host words: the low 32 bits
pub const HOST_LABEL_WORDS_V6: [usize; 2] = [6, 7];

/// IPv6 switch word: the last segment
pub const SWITCH_LABEL_WORDS_V6: [usize; 1] = [7];

/// Host label words for the family of `address`
pub fn host_label_words(address: &IpAddr) -> &'static [usize] {
    match address {
        IpAddr::V4(_) => &HOST_LABEL_WORDS,
        IpAddr::V6(_) => &HOST_LABEL_WORDS_V6,
    }
}

/// Switch label words for the family of `address`
pub fn switch_label_words(address: &IpAddr) -> &'static [usize] {
    match address {
        IpAddr::V4(_) => &SWITCH_LABEL_WORDS,
        IpAddr::V6(_) => &SWITCH_LABEL_WORDS_V6,
    }
}

/// Decimal width of the largest value of one address word
fn word_width(address: &IpAddr) -> usize {
    match address {
        IpAddr::V4(_) => 3,
        IpAddr::V6(_) => 5,
    }
}

/// Split an address into its words: octets for IPv4, segments for IPv6
pub fn address_words(address: &IpAddr) -> Vec<u32> {
    match address {
        IpAddr::V4(v4) => v4.octets().iter().map(|octet| u32::from(*octet)).collect(),
        IpAddr::V6(v6) => v6.segments().iter().map(|segment| u32::from(*segment)).collect(),
    }
}

/// Derive a label from the words of `address` at the given positions.
///
/// # Examples
/// ```
/// use icnsim::ip::label::label_from_address;
///
/// let address = "10.0.0.3".parse().unwrap();
/// assert_eq!(label_from_address(address, &[2, 3], 8).unwrap(), "00000003");
///
/// let cluster = "192.168.1.10".parse().unwrap();
/// assert_eq!(label_from_address(cluster, &[3], 8).unwrap(), "00000010");
/// ```
pub fn label_from_address(
    address: IpAddr,
    words: &[usize],
    label_len: usize,
) -> Result<String, PlanError> {
    if words.is_empty() {
        return Err(PlanError::NoWordsSelected { address });
    }

    let available = address_words(&address);
    let width = word_width(&address);
    let mut suffix = String::new();
    for (position, &index) in words.iter().enumerate() {
        let word = *available
            .get(index)
            .ok_or(PlanError::InvalidWordIndex { address, index })?;
        if position == 0 {
            suffix.push_str(&word.to_string());
        } else {
            suffix.push_str(&format!("{:0width$}", word, width = width));
        }
    }

    if suffix.len() > label_len {
        return Err(PlanError::LabelOverflow {
            address,
            suffix,
            label_len,
        });
    }

    log::trace!("label suffix {} from {}", suffix, address);
    Ok(format!("{:0>len$}", suffix, len = label_len))
}

/// Return `address + step`
pub fn advance(address: IpAddr, step: u64) -> Result<IpAddr, PlanError> {
    let overflow = PlanError::AddressOverflow { address, step };
    match address {
        IpAddr::V4(v4) => {
            let next = u64::from(u32::from(v4))
                .checked_add(step)
                .and_then(|value| u32::try_from(value).ok())
                .ok_or(overflow)?;
            Ok(IpAddr::V4(Ipv4Addr::from(next)))
        }
        IpAddr::V6(v6) => {
            let next = u128::from(v6)
                .checked_add(u128::from(step))
                .ok_or(overflow)?;
            Ok(IpAddr::V6(Ipv6Addr::from(next)))
        }
    }
}

/// First address of `block` that may be handed to a node.
///
/// A block written with a host address (`10.0.0.1/24`) starts there; a block
/// written as its network address (`10.0.0.0/24`) starts one past it.
pub fn first_assignable(block: &IpNetwork) -> Result<IpAddr, PlanError> {
    let max_prefix = match block {
        IpNetwork::V4(_) => 32,
        IpNetwork::V6(_) => 128,
    };
    if block.ip() == block.network() && block.prefix() < max_prefix {
        advance(block.ip(), 1)
    } else {
        Ok(block.ip())
    }
}
