//! Per-port layout restrictions supplied by the graph compiler.

use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::memory::{ArgPort, LayoutTag, MemoryDescArgs};

/// Narrows which physical layouts are acceptable on each port.
///
/// An empty set places no restriction. A port without an entry is unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutConstraints {
    ports: BTreeMap<ArgPort, SmallVec<[LayoutTag; 4]>>,
}

impl LayoutConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts `port` to `layouts`, extending any restriction already recorded.
    pub fn allow<I>(mut self, port: ArgPort, layouts: I) -> Self
    where
        I: IntoIterator<Item = LayoutTag>,
    {
        let allowed = self.ports.entry(port).or_default();
        for layout in layouts {
            if !allowed.contains(&layout) {
                allowed.push(layout);
            }
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn allowed(&self, port: ArgPort) -> Option<&[LayoutTag]> {
        self.ports.get(&port).map(|layouts| layouts.as_slice())
    }

    pub fn allows(&self, port: ArgPort, layout: LayoutTag) -> bool {
        self.allowed(port)
            .is_none_or(|layouts| layouts.is_empty() || layouts.contains(&layout))
    }

    /// Whether every descriptor in `descs` satisfies its port's restriction.
    pub fn admits(&self, descs: &MemoryDescArgs) -> bool {
        descs
            .iter()
            .all(|(port, desc)| self.allows(*port, desc.layout()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{DType, MemoryDesc};

    #[test]
    fn unconstrained_ports_accept_any_layout() {
        let constraints =
            LayoutConstraints::new().allow(ArgPort::SRC, [LayoutTag::ChannelsLast]);

        assert!(constraints.allows(ArgPort::DST, LayoutTag::NCHW8C));
        assert!(constraints.allows(ArgPort::SRC, LayoutTag::ChannelsLast));
        assert!(!constraints.allows(ArgPort::SRC, LayoutTag::Planar));

        let mut descs = MemoryDescArgs::new();
        descs.insert(ArgPort::SRC, MemoryDesc::planar(DType::F32, [1, 2, 2, 2]));
        assert!(!constraints.admits(&descs));
        assert!(LayoutConstraints::default().admits(&descs));
    }
}
