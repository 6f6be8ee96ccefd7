//! Binary search tree mapping networks to data section offsets.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use log::debug;

use crate::error::MmdbError;

/// Size of the zero-filled gap between the search tree and the data section.
pub const DATA_SECTION_SEPARATOR_SIZE: usize = 16;

/// Address family of a database's search tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    /// IPv6 tree; IPv4 networks live under `::/96`.
    #[default]
    V6,
}

impl IpVersion {
    /// Value stored in the `ip_version` metadata field.
    pub fn number(self) -> u16 {
        match self {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }
}

impl TryFrom<u16> for IpVersion {
    type Error = MmdbError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            4 => Ok(IpVersion::V4),
            6 => Ok(IpVersion::V6),
            v => Err(MmdbError::invalid_input(format!(
                "ip version must be 4 or 6, got {v}"
            ))),
        }
    }
}

/// Number of bits used for each of a node's two records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordSize {
    Bits24,
    #[default]
    Bits28,
    Bits32,
}

impl RecordSize {
    pub fn bits(self) -> u16 {
        match self {
            RecordSize::Bits24 => 24,
            RecordSize::Bits28 => 28,
            RecordSize::Bits32 => 32,
        }
    }

    fn node_bytes(self) -> usize {
        usize::from(self.bits()) / 4
    }

    fn max_value(self) -> u64 {
        (1_u64 << self.bits()) - 1
    }
}

impl TryFrom<u16> for RecordSize {
    type Error = MmdbError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            24 => Ok(RecordSize::Bits24),
            28 => Ok(RecordSize::Bits28),
            32 => Ok(RecordSize::Bits32),
            s => Err(MmdbError::invalid_input(format!(
                "record size must be 24, 28 or 32, got {s}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IpInt {
    V4(u32),
    V6(u128),
}

impl IpInt {
    #[inline(always)]
    fn get_bit(&self, index: usize) -> bool {
        match self {
            IpInt::V4(ip) => (ip >> (31 - index)) & 1 == 1,
            IpInt::V6(ip) => (ip >> (127 - index)) & 1 == 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Record {
    Empty,
    Node(usize),
    Data(usize),
}

/// Search tree under construction. Node 0 is the root.
#[derive(Debug)]
pub struct SearchTree {
    ip_version: IpVersion,
    nodes: Vec<[Record; 2]>,
}

impl SearchTree {
    pub fn new(ip_version: IpVersion) -> SearchTree {
        SearchTree {
            ip_version,
            nodes: vec![[Record::Empty; 2]],
        }
    }

    pub fn ip_version(&self) -> IpVersion {
        self.ip_version
    }

    fn path(&self, network: IpNetwork) -> Result<(IpInt, usize), MmdbError> {
        let prefix_len = usize::from(network.prefix());
        match (self.ip_version, network.network()) {
            (IpVersion::V4, IpAddr::V4(ip)) => Ok((IpInt::V4(ip.into()), prefix_len)),
            (IpVersion::V4, IpAddr::V6(_)) => Err(MmdbError::invalid_input(format!(
                "cannot insert IPv6 network {network} into an IPv4 database"
            ))),
            (IpVersion::V6, IpAddr::V4(ip)) => {
                Ok((IpInt::V6(u32::from(ip).into()), prefix_len + 96))
            }
            (IpVersion::V6, IpAddr::V6(ip)) => Ok((IpInt::V6(ip.into()), prefix_len)),
        }
    }

    /// Checks that `network` belongs in this tree.
    pub fn check(&self, network: IpNetwork) -> Result<(), MmdbError> {
        self.path(network).map(|_| ())
    }

    /// Splits `first..=last` into the networks an insert would cover.
    pub fn range_networks(
        &self,
        first: IpAddr,
        last: IpAddr,
    ) -> Result<Vec<IpNetwork>, MmdbError> {
        let networks = range_to_networks(first, last)?;
        for network in &networks {
            self.check(*network)?;
        }
        Ok(networks)
    }

    /// Points `network` at `data_offset`.
    ///
    /// The covered part of any earlier insert is replaced; a data record
    /// that only partly overlaps is split so the remainder keeps its data.
    pub fn insert(&mut self, network: IpNetwork, data_offset: usize) -> Result<(), MmdbError> {
        let (ip_int, prefix_len) = self.path(network)?;

        if prefix_len == 0 {
            self.nodes[0] = [Record::Data(data_offset); 2];
            return Ok(());
        }

        let mut node = 0_usize;
        for depth in 0..prefix_len - 1 {
            let bit = ip_int.get_bit(depth) as usize;
            node = match self.nodes[node][bit] {
                Record::Node(child) => child,
                record => {
                    let child = self.nodes.len();
                    self.nodes.push([record; 2]);
                    self.nodes[node][bit] = Record::Node(child);
                    child
                }
            };
        }

        let bit = ip_int.get_bit(prefix_len - 1) as usize;
        self.nodes[node][bit] = Record::Data(data_offset);
        Ok(())
    }

    /// Points every address in `first..=last` at `data_offset`.
    ///
    /// Returns the number of networks the range was split into.
    pub fn insert_range(
        &mut self,
        first: IpAddr,
        last: IpAddr,
        data_offset: usize,
    ) -> Result<usize, MmdbError> {
        let networks = self.range_networks(first, last)?;
        for network in &networks {
            self.insert(*network, data_offset)?;
        }
        Ok(networks.len())
    }

    #[cfg(test)]
    fn find(&self, address: IpAddr) -> Option<usize> {
        let network = IpNetwork::from(address);
        let (ip_int, bit_count) = self.path(network).ok()?;
        let mut node = 0_usize;
        for depth in 0..bit_count {
            match self.nodes[node][ip_int.get_bit(depth) as usize] {
                Record::Node(child) => node = child,
                Record::Data(offset) => return Some(offset),
                Record::Empty => return None,
            }
        }
        None
    }

    // Reachable nodes in pre-order; nodes orphaned by later inserts are left out.
    fn reachable(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![0_usize];
        while let Some(node) = stack.pop() {
            order.push(node);
            for record in self.nodes[node].iter().rev() {
                if let Record::Node(child) = record {
                    stack.push(*child);
                }
            }
        }
        order
    }

    /// Serializes the tree and returns it together with its node count.
    pub fn write_nodes(&self, record_size: RecordSize) -> Result<(Vec<u8>, u32), MmdbError> {
        let order = self.reachable();
        let node_count = order.len();

        let mut numbering = vec![usize::MAX; self.nodes.len()];
        for (new, &old) in order.iter().enumerate() {
            numbering[old] = new;
        }

        let resolve = |record: Record| -> Result<u32, MmdbError> {
            let value = match record {
                Record::Node(child) => numbering[child],
                Record::Empty => node_count,
                Record::Data(offset) => node_count + DATA_SECTION_SEPARATOR_SIZE + offset,
            };
            if value as u64 > record_size.max_value() {
                return Err(MmdbError::invalid_input(format!(
                    "record size {} cannot address {value} ({node_count} nodes)",
                    record_size.bits()
                )));
            }
            Ok(value as u32)
        };

        let mut out = Vec::with_capacity(node_count * record_size.node_bytes());
        for &old in &order {
            let [left, right] = self.nodes[old];
            pack_node(&mut out, record_size, resolve(left)?, resolve(right)?);
        }

        debug!(
            "search tree: {node_count} nodes ({} allocated), {} bytes",
            self.nodes.len(),
            out.len()
        );
        let node_count = u32::try_from(node_count)
            .map_err(|_| MmdbError::invalid_input("search tree has too many nodes"))?;
        Ok((out, node_count))
    }
}

fn pack_node(out: &mut Vec<u8>, record_size: RecordSize, left: u32, right: u32) {
    let (l, r) = (left.to_be_bytes(), right.to_be_bytes());
    match record_size {
        RecordSize::Bits24 => {
            out.extend_from_slice(&l[1..]);
            out.extend_from_slice(&r[1..]);
        }
        RecordSize::Bits28 => {
            out.extend_from_slice(&l[1..]);
            out.push(((l[0] & 0x0F) << 4) | (r[0] & 0x0F));
            out.extend_from_slice(&r[1..]);
        }
        RecordSize::Bits32 => {
            out.extend_from_slice(&l);
            out.extend_from_slice(&r);
        }
    }
}

fn block_last(start: u128, host_bits: u32) -> u128 {
    if host_bits >= 128 {
        u128::MAX
    } else {
        start | ((1_u128 << host_bits) - 1)
    }
}

// Largest aligned blocks covering start..=end, as (network, prefix length).
fn split_range(mut start: u128, end: u128, bits: u32) -> Vec<(u128, u8)> {
    let mut out = Vec::new();
    loop {
        let mut host_bits = start.trailing_zeros().min(bits);
        while host_bits > 0 && block_last(start, host_bits) > end {
            host_bits -= 1;
        }
        out.push((start, (bits - host_bits) as u8));

        let last = block_last(start, host_bits);
        if last >= end {
            break;
        }
        start = last + 1;
    }
    out
}

/// Splits an inclusive address range into the smallest set of networks.
pub fn range_to_networks(first: IpAddr, last: IpAddr) -> Result<Vec<IpNetwork>, MmdbError> {
    match (first, last) {
        (IpAddr::V4(a), IpAddr::V4(b)) if a <= b => {
            split_range(u32::from(a).into(), u32::from(b).into(), 32)
                .into_iter()
                .map(|(start, prefix)| -> Result<IpNetwork, MmdbError> {
                    Ok(IpNetwork::V4(Ipv4Network::new(
                        Ipv4Addr::from(start as u32),
                        prefix,
                    )?))
                })
                .collect()
        }
        (IpAddr::V6(a), IpAddr::V6(b)) if a <= b => {
            split_range(a.into(), b.into(), 128)
                .into_iter()
                .map(|(start, prefix)| -> Result<IpNetwork, MmdbError> {
                    Ok(IpNetwork::V6(Ipv6Network::new(
                        Ipv6Addr::from(start),
                        prefix,
                    )?))
                })
                .collect()
        }
        (IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_)) => Err(
            MmdbError::invalid_input(format!("range start {first} is after range end {last}")),
        ),
        _ => Err(MmdbError::invalid_input(format!(
            "range {first} - {last} mixes address families"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNetwork {
        s.parse().unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_insert_and_find() {
        let mut tree = SearchTree::new(IpVersion::V4);
        tree.insert(net("1.2.3.0/24"), 7).unwrap();

        assert_eq!(tree.find(ip("1.2.3.4")), Some(7));
        assert_eq!(tree.find(ip("1.2.3.255")), Some(7));
        assert_eq!(tree.find(ip("1.2.4.0")), None);
        assert_eq!(tree.find(ip("0.0.0.0")), None);

        let (bytes, node_count) = tree.write_nodes(RecordSize::Bits24).unwrap();
        assert_eq!(node_count, 24);
        assert_eq!(bytes.len(), 24 * 6);
    }

    #[test]
    fn test_more_specific_insert_splits_data() {
        let mut tree = SearchTree::new(IpVersion::V4);
        tree.insert(net("10.0.0.0/8"), 1).unwrap();
        tree.insert(net("10.1.0.0/16"), 2).unwrap();

        assert_eq!(tree.find(ip("10.1.2.3")), Some(2));
        assert_eq!(tree.find(ip("10.2.0.0")), Some(1));
        assert_eq!(tree.find(ip("10.255.255.255")), Some(1));
        assert_eq!(tree.find(ip("11.0.0.0")), None);
    }

    #[test]
    fn test_less_specific_insert_replaces_subtree() {
        let mut tree = SearchTree::new(IpVersion::V4);
        tree.insert(net("10.0.0.0/24"), 1).unwrap();
        tree.insert(net("10.0.0.0/8"), 2).unwrap();

        assert_eq!(tree.find(ip("10.0.0.1")), Some(2));

        // Only the root and the path down to the /8 survive.
        let (_, node_count) = tree.write_nodes(RecordSize::Bits24).unwrap();
        assert_eq!(node_count, 8);
    }

    #[test]
    fn test_default_route_fills_both_halves() {
        let mut tree = SearchTree::new(IpVersion::V4);
        tree.insert(net("0.0.0.0/0"), 3).unwrap();

        assert_eq!(tree.find(ip("0.0.0.1")), Some(3));
        assert_eq!(tree.find(ip("200.1.1.1")), Some(3));

        let (bytes, node_count) = tree.write_nodes(RecordSize::Bits24).unwrap();
        assert_eq!(node_count, 1);
        // node_count (1) + separator (16) + offset (3)
        assert_eq!(bytes, vec![0, 0, 20, 0, 0, 20]);
    }

    #[test]
    fn test_ipv4_in_ipv6_tree() {
        let mut tree = SearchTree::new(IpVersion::V6);
        tree.insert(net("1.2.3.0/24"), 4).unwrap();
        tree.insert(net("2001:db8::/32"), 5).unwrap();

        assert_eq!(tree.find(ip("1.2.3.4")), Some(4));
        assert_eq!(tree.find(ip("::1.2.3.4")), Some(4));
        assert_eq!(tree.find(ip("2001:db8::1")), Some(5));
        assert_eq!(tree.find(ip("2001:db9::1")), None);
    }

    #[test]
    fn test_ipv6_network_in_ipv4_tree_is_rejected() {
        let mut tree = SearchTree::new(IpVersion::V4);
        assert!(matches!(
            tree.insert(net("2001:db8::/32"), 0),
            Err(MmdbError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_empty_tree() {
        let tree = SearchTree::new(IpVersion::V4);
        let (bytes, node_count) = tree.write_nodes(RecordSize::Bits32).unwrap();
        assert_eq!(node_count, 1);
        assert_eq!(bytes, vec![0, 0, 0, 1, 0, 0, 0, 1]);
    }

    #[test]
    fn test_pack_node() {
        let mut out = Vec::new();
        pack_node(&mut out, RecordSize::Bits24, 0x01_0203, 0x04_0506);
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6]);

        let mut out = Vec::new();
        pack_node(&mut out, RecordSize::Bits28, 0x0A_BC_DE_F0, 0x01_23_45_67);
        assert_eq!(out, vec![0xBC, 0xDE, 0xF0, 0xA1, 0x23, 0x45, 0x67]);

        let mut out = Vec::new();
        pack_node(&mut out, RecordSize::Bits32, 0x0102_0304, 0x0506_0708);
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_range_to_networks() {
        let nets = range_to_networks(ip("1.0.0.0"), ip("1.0.0.255")).unwrap();
        assert_eq!(nets, vec![net("1.0.0.0/24")]);

        let nets = range_to_networks(ip("1.0.0.1"), ip("1.0.0.6")).unwrap();
        assert_eq!(
            nets,
            vec![
                net("1.0.0.1/32"),
                net("1.0.0.2/31"),
                net("1.0.0.4/31"),
                net("1.0.0.6/32"),
            ]
        );

        let nets = range_to_networks(ip("0.0.0.0"), ip("255.255.255.255")).unwrap();
        assert_eq!(nets, vec![net("0.0.0.0/0")]);

        // The top of the address space must not wrap around.
        let nets = range_to_networks(ip("255.255.255.254"), ip("255.255.255.255")).unwrap();
        assert_eq!(nets, vec![net("255.255.255.254/31")]);

        let nets = range_to_networks(ip("::"), ip("ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff"))
            .unwrap();
        assert_eq!(nets, vec![net("::/0")]);

        let nets = range_to_networks(ip("2001:db8::"), ip("2001:db8::1:0")).unwrap();
        assert_eq!(nets, vec![net("2001:db8::/112"), net("2001:db8::1:0/128")]);
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(matches!(
            range_to_networks(ip("1.0.0.1"), ip("1.0.0.0")),
            Err(MmdbError::InvalidInput { .. })
        ));
        assert!(matches!(
            range_to_networks(ip("1.0.0.0"), ip("::1")),
            Err(MmdbError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_insert_range() {
        let mut tree = SearchTree::new(IpVersion::V4);
        let count = tree
            .insert_range(ip("1.0.0.1"), ip("1.0.0.6"), 9)
            .unwrap();
        assert_eq!(count, 4);
        assert_eq!(tree.find(ip("1.0.0.0")), None);
        assert_eq!(tree.find(ip("1.0.0.3")), Some(9));
        assert_eq!(tree.find(ip("1.0.0.6")), Some(9));
        assert_eq!(tree.find(ip("1.0.0.7")), None);
    }

    #[test]
    fn test_parse_sizes() {
        assert_eq!(RecordSize::try_from(28).unwrap(), RecordSize::Bits28);
        assert!(RecordSize::try_from(20).is_err());
        assert_eq!(IpVersion::try_from(4).unwrap(), IpVersion::V4);
        assert!(IpVersion::try_from(5).is_err());
    }
}
