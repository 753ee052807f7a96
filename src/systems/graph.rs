//! Registration of the system tree.

use std::fmt;

use super::{SignalKind, System, SystemId, SystemKind};
use crate::bitset::BitSet256;
use crate::error::{LockstepError, SystemIndexReason};
use crate::frame_state::FrameState;
use crate::Config;

struct SystemNode<T: Config> {
    system: Box<dyn System<T>>,
    name: String,
    kind: SystemKind,
    parent: Option<SystemId>,
    children: Vec<SystemId>,
}

/// The system tree of a session.
///
/// Indices are handed out in registration order and become the systems' bit
/// positions. After [`Self::seal`] the tree is frozen; further registration
/// fails with [`SystemIndexReason::GraphSealed`].
pub struct SystemGraph<T: Config> {
    nodes: Vec<SystemNode<T>>,
    roots: Vec<SystemId>,
    signal_tables: [Vec<SystemId>; SignalKind::COUNT],
    sealed: bool,
}

impl<T: Config> Default for SystemGraph<T> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            roots: Vec::new(),
            signal_tables: Default::default(),
            sealed: false,
        }
    }
}

impl<T: Config> SystemGraph<T> {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a top-level system.
    pub fn add_root(&mut self, system: impl System<T> + 'static) -> Result<SystemId, LockstepError> {
        self.add(None, Box::new(system))
    }

    /// Registers `system` as the last child of `parent`.
    pub fn add_child(
        &mut self,
        parent: SystemId,
        system: impl System<T> + 'static,
    ) -> Result<SystemId, LockstepError> {
        self.add(Some(parent), Box::new(system))
    }

    fn add(
        &mut self,
        parent: Option<SystemId>,
        system: Box<dyn System<T>>,
    ) -> Result<SystemId, LockstepError> {
        if self.sealed {
            return Err(SystemIndexReason::GraphSealed.into());
        }
        if self.nodes.len() >= BitSet256::CAPACITY {
            return Err(SystemIndexReason::TooManySystems {
                count: self.nodes.len() + 1,
                capacity: BitSet256::CAPACITY,
            }
            .into());
        }
        if let Some(parent) = parent {
            let node = self.nodes.get(parent.index()).ok_or(SystemIndexReason::OutOfRange {
                index: parent.index(),
                capacity: self.nodes.len(),
            })?;
            if !node.kind.can_own_children() {
                return Err(SystemIndexReason::NotAGroup {
                    parent: parent.index(),
                }
                .into());
            }
        }
        let name = system.name().to_owned();
        if self.nodes.iter().any(|n| n.name == name) {
            return Err(SystemIndexReason::DuplicateName { name }.into());
        }

        let id = SystemId::new(self.nodes.len());
        match parent {
            Some(parent) => self.nodes[parent.index()].children.push(id),
            None => self.roots.push(id),
        }
        self.nodes.push(SystemNode {
            kind: system.kind(),
            system,
            name,
            parent,
            children: Vec::new(),
        });
        Ok(id)
    }

    /// Freezes indices and builds the per-signal dispatch tables.
    ///
    /// Dispatch order is the tree's pre-order, the same order updates run in.
    /// Sealing twice is a no-op.
    pub fn seal(&mut self) {
        if self.sealed {
            return;
        }
        let order = self.preorder();
        for kind in SignalKind::ALL {
            self.signal_tables[kind.index()] = order
                .iter()
                .copied()
                .filter(|id| self.nodes[id.index()].system.signals().contains(kind))
                .collect();
        }
        self.sealed = true;
    }

    /// Whether indices are frozen.
    #[must_use]
    pub const fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Number of systems.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no system is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Top-level systems in declaration order.
    #[must_use]
    pub fn roots(&self) -> &[SystemId] {
        &self.roots
    }

    /// Children of `id` in declaration order.
    #[must_use]
    pub fn children(&self, id: SystemId) -> &[SystemId] {
        self.nodes
            .get(id.index())
            .map_or(&[], |n| n.children.as_slice())
    }

    /// Parent of `id`.
    #[must_use]
    pub fn parent(&self, id: SystemId) -> Option<SystemId> {
        self.nodes.get(id.index()).and_then(|n| n.parent)
    }

    /// Registered name of `id`.
    #[must_use]
    pub fn name(&self, id: SystemId) -> Option<&str> {
        self.nodes.get(id.index()).map(|n| n.name.as_str())
    }

    /// Scheduling role of `id`.
    #[must_use]
    pub fn kind(&self, id: SystemId) -> Option<SystemKind> {
        self.nodes.get(id.index()).map(|n| n.kind)
    }

    /// Looks a system up by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<SystemId> {
        self.nodes
            .iter()
            .position(|n| n.name == name)
            .map(SystemId::new)
    }

    /// The system registered as `id`.
    #[must_use]
    pub fn system(&self, id: SystemId) -> Option<&dyn System<T>> {
        self.nodes.get(id.index()).map(|n| n.system.as_ref())
    }

    /// Systems handling `kind`, in dispatch order. Empty until sealed.
    #[must_use]
    pub fn signal_table(&self, kind: SignalKind) -> &[SystemId] {
        &self.signal_tables[kind.index()]
    }

    /// Every system in pre-order: parents before children, siblings in declaration order.
    #[must_use]
    pub fn preorder(&self) -> Vec<SystemId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<SystemId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id.index()].children.iter().rev().copied());
        }
        order
    }

    /// Whether `id` and all of its ancestors are enabled in `frame`.
    #[must_use]
    pub fn is_active(&self, id: SystemId, frame: &FrameState<T>) -> bool {
        let mut current = Some(id);
        while let Some(id) = current {
            if !frame.is_system_enabled(id) {
                return false;
            }
            current = self.parent(id);
        }
        true
    }

    /// Sets each system's bit in `frame` from [`System::start_enabled`].
    pub fn init_frame(&self, frame: &mut FrameState<T>) -> Result<(), LockstepError> {
        if frame.system_count() != self.nodes.len() {
            return Err(LockstepError::invalid_request(format!(
                "frame tracks {} systems but the graph has {}",
                frame.system_count(),
                self.nodes.len()
            )));
        }
        for (index, node) in self.nodes.iter().enumerate() {
            frame.init_system_enabled(SystemId::new(index), node.system.start_enabled())?;
        }
        Ok(())
    }
}

impl<T: Config> fmt::Debug for SystemGraph<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemGraph")
            .field(
                "systems",
                &self.nodes.iter().map(|n| n.name.as_str()).collect::<Vec<_>>(),
            )
            .field("roots", &self.roots)
            .field("sealed", &self.sealed)
            .finish()
    }
}
