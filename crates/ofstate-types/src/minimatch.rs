//! Compact match criteria.
//!
//! A [`Minimatch`] stores only the fields a rule actually constrains, each as a
//! value/mask pair, plus the rule priority. Values are kept normalized
//! (`value & mask`, fully wildcarded fields dropped) so that two rules which
//! match the same packets compare and hash equal. That equality is what the
//! flow table's strict-match index is keyed on.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Match fields understood by the flow table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    InPort,
    Metadata,
    EthDst,
    EthSrc,
    EthType,
    VlanVid,
    VlanPcp,
    IpDscp,
    IpProto,
    Ipv4Src,
    Ipv4Dst,
    TcpSrc,
    TcpDst,
    UdpSrc,
    UdpDst,
    Ipv6Src,
    Ipv6Dst,
    TunnelId,
}

impl MatchField {
    /// Width of the field in bits.
    pub const fn width_bits(&self) -> u32 {
        match self {
            MatchField::InPort => 32,
            MatchField::Metadata | MatchField::TunnelId => 64,
            MatchField::EthDst | MatchField::EthSrc => 48,
            MatchField::EthType => 16,
            MatchField::VlanVid => 13,
            MatchField::VlanPcp => 3,
            MatchField::IpDscp => 6,
            MatchField::IpProto => 8,
            MatchField::Ipv4Src | MatchField::Ipv4Dst => 32,
            MatchField::TcpSrc | MatchField::TcpDst | MatchField::UdpSrc | MatchField::UdpDst => {
                16
            }
            MatchField::Ipv6Src | MatchField::Ipv6Dst => 128,
        }
    }

    /// Mask with every bit of the field set.
    pub const fn full_mask(&self) -> u128 {
        let width = self.width_bits();
        if width >= 128 {
            u128::MAX
        } else {
            (1u128 << width) - 1
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            MatchField::InPort => "in_port",
            MatchField::Metadata => "metadata",
            MatchField::EthDst => "eth_dst",
            MatchField::EthSrc => "eth_src",
            MatchField::EthType => "eth_type",
            MatchField::VlanVid => "vlan_vid",
            MatchField::VlanPcp => "vlan_pcp",
            MatchField::IpDscp => "ip_dscp",
            MatchField::IpProto => "ip_proto",
            MatchField::Ipv4Src => "ipv4_src",
            MatchField::Ipv4Dst => "ipv4_dst",
            MatchField::TcpSrc => "tcp_src",
            MatchField::TcpDst => "tcp_dst",
            MatchField::UdpSrc => "udp_src",
            MatchField::UdpDst => "udp_dst",
            MatchField::Ipv6Src => "ipv6_src",
            MatchField::Ipv6Dst => "ipv6_dst",
            MatchField::TunnelId => "tunnel_id",
        }
    }

    const ALL: [MatchField; 18] = [
        MatchField::InPort,
        MatchField::Metadata,
        MatchField::EthDst,
        MatchField::EthSrc,
        MatchField::EthType,
        MatchField::VlanVid,
        MatchField::VlanPcp,
        MatchField::IpDscp,
        MatchField::IpProto,
        MatchField::Ipv4Src,
        MatchField::Ipv4Dst,
        MatchField::TcpSrc,
        MatchField::TcpDst,
        MatchField::UdpSrc,
        MatchField::UdpDst,
        MatchField::Ipv6Src,
        MatchField::Ipv6Dst,
        MatchField::TunnelId,
    ];
}

impl fmt::Display for MatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for MatchField {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MatchField::ALL
            .iter()
            .copied()
            .find(|field| field.name() == s)
            .ok_or_else(|| ParseError::InvalidMatchField(s.to_string()))
    }
}

/// A field value with its mask. Mask bits set to 1 are significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MaskedValue {
    pub value: u128,
    pub mask: u128,
}

impl MaskedValue {
    /// Exact match on `value`.
    pub const fn exact(value: u128) -> Self {
        Self {
            value,
            mask: u128::MAX,
        }
    }

    pub const fn masked(value: u128, mask: u128) -> Self {
        Self { value, mask }
    }

    /// Returns true if every bit is wildcarded.
    pub const fn is_wildcard(&self) -> bool {
        self.mask == 0
    }

    fn normalized(self, field: MatchField) -> Self {
        let mask = self.mask & field.full_mask();
        Self {
            value: self.value & mask,
            mask,
        }
    }

    /// Returns true if every packet matched by `self` is also matched by
    /// `general`.
    pub const fn is_subsumed_by(&self, general: &MaskedValue) -> bool {
        self.mask & general.mask == general.mask && self.value & general.mask == general.value
    }
}

fn parse_u128(s: &str) -> Result<u128, ParseError> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u128::from_str_radix(hex, 16),
        None => s.parse::<u128>(),
    };
    parsed.map_err(|_| ParseError::InvalidMaskedValue(s.to_string()))
}

impl FromStr for MaskedValue {
    type Err = ParseError;

    /// Parses `"value"` or `"value/mask"`, each decimal or `0x` hex.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((value, mask)) => Ok(MaskedValue::masked(parse_u128(value)?, parse_u128(mask)?)),
            None => Ok(MaskedValue::exact(parse_u128(s)?)),
        }
    }
}

/// Compact match criteria: priority plus the constrained fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Minimatch {
    priority: u16,
    fields: BTreeMap<MatchField, MaskedValue>,
}

impl Minimatch {
    /// Creates a match-everything criteria at the given priority.
    pub fn new(priority: u16) -> Self {
        Self {
            priority,
            fields: BTreeMap::new(),
        }
    }

    /// Adds a field constraint, normalizing it.
    pub fn with_field(mut self, field: MatchField, value: MaskedValue) -> Self {
        self.set_field(field, value);
        self
    }

    /// Sets a field constraint, normalizing it. A fully wildcarded value
    /// removes the constraint.
    pub fn set_field(&mut self, field: MatchField, value: MaskedValue) {
        let value = value.normalized(field);
        if value.is_wildcard() {
            self.fields.remove(&field);
        } else {
            self.fields.insert(field, value);
        }
    }

    pub fn priority(&self) -> u16 {
        self.priority
    }

    pub fn field(&self, field: MatchField) -> Option<&MaskedValue> {
        self.fields.get(&field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (MatchField, &MaskedValue)> {
        self.fields.iter().map(|(field, value)| (*field, value))
    }

    /// Number of constrained fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if no field is constrained (matches every packet).
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Re-applies normalization to every field.
    ///
    /// Values built through [`Minimatch::set_field`] are already normalized;
    /// this exists for values that arrived through deserialization.
    pub fn normalize(&mut self) {
        let fields = std::mem::take(&mut self.fields);
        for (field, value) in fields {
            self.set_field(field, value);
        }
    }

    /// Returns a normalized copy.
    pub fn normalized(&self) -> Self {
        let mut copy = self.clone();
        copy.normalize();
        copy
    }

    /// Non-strict comparison: true if every packet matched by `self` is also
    /// matched by `general`. Priority is not considered.
    pub fn is_subsumed_by(&self, general: &Minimatch) -> bool {
        general.fields.iter().all(|(field, general_value)| {
            self.fields
                .get(field)
                .is_some_and(|value| value.is_subsumed_by(general_value))
        })
    }
}

impl fmt::Display for Minimatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "priority={}", self.priority)?;
        for (field, value) in &self.fields {
            if value.mask == field.full_mask() {
                write!(f, ",{}={:#x}", field, value.value)?;
            } else {
                write!(f, ",{}={:#x}/{:#x}", field, value.value, value.mask)?;
            }
        }
        Ok(())
    }
}
