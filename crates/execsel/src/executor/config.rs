//! Configurations handed to implementation predicates.

use crate::memory::{ArgPort, LayoutTag, MemoryDesc, MemoryDescArgs};

/// Attributes and operand descriptors evaluated together by an implementation predicate.
///
/// Built on the fly whenever a capability must be checked and never stored.
#[derive(Debug)]
pub struct ExecutorConfig<'a, A> {
    pub descs: &'a MemoryDescArgs,
    pub attrs: &'a A,
}

impl<A> Clone for ExecutorConfig<'_, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A> Copy for ExecutorConfig<'_, A> {}

impl<'a, A> ExecutorConfig<'a, A> {
    pub fn new(descs: &'a MemoryDescArgs, attrs: &'a A) -> Self {
        ExecutorConfig { descs, attrs }
    }

    pub fn desc(&self, port: ArgPort) -> Option<&'a MemoryDesc> {
        self.descs.get(&port)
    }

    /// Iterates over the descriptors of every bound port.
    pub fn all_descs(&self) -> impl Iterator<Item = (ArgPort, &'a MemoryDesc)> {
        self.descs.iter().map(|(port, desc)| (*port, desc))
    }

    /// Whether every bound port uses `layout`.
    pub fn all_in_layout(&self, layout: LayoutTag) -> bool {
        self.descs.values().all(|desc| desc.layout() == layout)
    }
}

/// Descriptor set an implementation can consume in place of the one it was offered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackConfig {
    pub descs: MemoryDescArgs,
}

impl FallbackConfig {
    pub fn new(descs: MemoryDescArgs) -> Self {
        FallbackConfig { descs }
    }

    /// Re-lays out every port through `layout_for`, keeping dtype and shape.
    ///
    /// Returns `None` when no port would change, i.e. when no fallback is needed.
    pub fn relayout<F>(descs: &MemoryDescArgs, mut layout_for: F) -> Option<Self>
    where
        F: FnMut(ArgPort, &MemoryDesc) -> LayoutTag,
    {
        let mut changed = false;
        let relaid = descs
            .iter()
            .map(|(port, desc)| {
                let layout = layout_for(*port, desc);
                changed |= layout != desc.layout();
                (*port, desc.with_layout(layout))
            })
            .collect();
        changed.then(|| FallbackConfig::new(relaid))
    }

    /// Ports whose descriptor differs from the one in `actual`.
    pub fn differing_ports<'a>(
        &'a self,
        actual: &'a MemoryDescArgs,
    ) -> impl Iterator<Item = ArgPort> + 'a {
        self.descs.iter().filter_map(move |(port, desc)| match actual.get(port) {
            Some(current) if current != desc => Some(*port),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::DType;

    #[test]
    fn relayout_reports_only_real_changes() {
        let mut descs = MemoryDescArgs::new();
        descs.insert(ArgPort::SRC, MemoryDesc::planar(DType::F32, [1, 4, 2, 2]));
        descs.insert(
            ArgPort::DST,
            MemoryDesc::new(DType::F32, [1, 4, 2, 2], LayoutTag::ChannelsLast),
        );

        assert!(FallbackConfig::relayout(&descs, |_, desc| desc.layout()).is_none());

        let fallback = FallbackConfig::relayout(&descs, |_, _| LayoutTag::ChannelsLast)
            .expect("src must be relaid out");
        let differing: Vec<_> = fallback.differing_ports(&descs).collect();
        assert_eq!(differing, vec![ArgPort::SRC]);
    }
}
