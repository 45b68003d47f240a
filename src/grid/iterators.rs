use std::rc::Rc;

use fixedbitset as fb;

use super::{AdaptiveGrid, Entity};
use crate::{
    marker::MarkerVector,
    reference,
    traverse::{fill_el_info, ElInfo, PartitionType, TraverseMode, TraverseStack},
};

/// Iterator over the entities of one codimension in a level or leaf view.
///
/// Elements are emitted in traversal order.
/// Sub-entities are emitted through the first element that contains them,
/// so that each one is visited exactly once.
#[derive(Debug)]
pub struct EntityIter<'g, const DIM: usize, const WDIM: usize> {
    grid: &'g AdaptiveGrid<DIM, WDIM>,
    stack: TraverseStack<'g, DIM, WDIM>,
    codim: usize,
    /// owner lookup for full views;
    /// partial views track visited indices themselves
    /// because the owner of a sub-entity may be outside of the partition
    marker: Option<&'g MarkerVector>,
    visited: fb::FixedBitSet,
    current: Option<Rc<ElInfo<WDIM>>>,
    next_local: usize,
}

impl<'g, const DIM: usize, const WDIM: usize> EntityIter<'g, DIM, WDIM> {
    pub(super) fn new(
        grid: &'g AdaptiveGrid<DIM, WDIM>,
        mode: TraverseMode,
        partition: PartitionType,
        codim: usize,
        marker: Option<&'g MarkerVector>,
    ) -> Self {
        let visited = if codim > 0 && marker.is_none() {
            fb::FixedBitSet::with_capacity(grid.mesh.index_managers[codim].size())
        } else {
            fb::FixedBitSet::new()
        };
        Self {
            grid,
            stack: TraverseStack::new(&grid.mesh, mode, partition, grid.rank()),
            codim,
            marker,
            visited,
            current: None,
            next_local: 0,
        }
    }

    /// Check whether the sub-entity with the given index is emitted through `element`.
    fn emits(&mut self, element: usize, index: usize) -> bool {
        if self.codim == 0 {
            return true;
        }
        match self.marker {
            Some(marker) => !marker.not_on_element(self.codim, element, index),
            None => !self.visited.put(index),
        }
    }
}

impl<'g, const DIM: usize, const WDIM: usize> Iterator for EntityIter<'g, DIM, WDIM> {
    type Item = Entity<'g, DIM, WDIM>;

    fn next(&mut self) -> Option<Self::Item> {
        let count = reference::sub_entity_count(DIM, self.codim);
        loop {
            if let Some(info) = self.current.clone() {
                while self.next_local < count {
                    let local = self.next_local;
                    self.next_local += 1;
                    let index = self.grid.mesh.element(info.element).indices[self.codim][local];
                    if self.emits(info.element, index) {
                        return Some(Entity {
                            grid: self.grid,
                            info,
                            mode: self.stack.mode(),
                            codim: self.codim,
                            local,
                        });
                    }
                }
            }

            let next = self.stack.go_next_el_info()?.clone();
            self.current = Some(Rc::new(next));
            self.next_local = 0;
        }
    }
}

/// Iterator over the descendants of an element, in depth-first order,
/// down to a maximum level.
#[derive(Debug)]
pub struct HierarchicIter<'g, const DIM: usize, const WDIM: usize> {
    grid: &'g AdaptiveGrid<DIM, WDIM>,
    max_level: usize,
    /// frames still to be emitted, the next one last
    pending: Vec<ElInfo<WDIM>>,
}

impl<'g, const DIM: usize, const WDIM: usize> HierarchicIter<'g, DIM, WDIM> {
    pub(super) fn new(root: &Entity<'g, DIM, WDIM>, max_level: usize) -> Self {
        let mut iter = Self {
            grid: root.grid,
            max_level,
            pending: Vec::new(),
        };
        if root.codim == 0 {
            iter.push_children(&root.info);
        }
        iter
    }

    fn push_children(&mut self, info: &ElInfo<WDIM>) {
        if info.level >= self.max_level || self.grid.mesh.element(info.element).is_leaf() {
            return;
        }
        let mode = TraverseMode::Level(self.max_level);
        // child 0 goes on top so that it's emitted first
        for ichild in [1, 0] {
            self.pending
                .push(fill_el_info(&self.grid.mesh, info, ichild, mode));
        }
    }
}

impl<'g, const DIM: usize, const WDIM: usize> Iterator for HierarchicIter<'g, DIM, WDIM> {
    type Item = Entity<'g, DIM, WDIM>;

    fn next(&mut self) -> Option<Self::Item> {
        let info = self.pending.pop()?;
        self.push_children(&info);
        Some(Entity {
            grid: self.grid,
            info: Rc::new(info),
            mode: TraverseMode::Level(self.max_level),
            codim: 0,
            local: 0,
        })
    }
}
