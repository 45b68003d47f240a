use std::collections::HashSet;

use super::HierarchicalMesh;
use crate::{reference, GridError};

/// Recursion depth after which the conformity closure is considered divergent.
const MAX_CLOSURE_DEPTH: usize = 64;
/// Number of neighbour refinements tolerated around a single edge.
const MAX_CLOSURE_STEPS: usize = 256;

impl<const DIM: usize, const WDIM: usize> HierarchicalMesh<DIM, WDIM> {
    /// Mark a leaf element for refinement (`ref_count > 0`)
    /// or coarsening (`ref_count < 0`).
    ///
    /// Returns whether the mark was accepted.
    /// Non-leaf elements can't be marked and have their mark cleared,
    /// and an element marked for refinement can't be re-marked for coarsening.
    pub fn mark(&mut self, element: usize, ref_count: i8) -> Result<bool, GridError> {
        self.try_element(element)?;
        let el = self.element_mut(element);

        if !el.is_leaf() {
            log::warn!("tried to mark element {element}, which is not a leaf");
            el.mark = 0;
            return Ok(false);
        }
        if ref_count < 0 && el.mark > 0 {
            log::warn!(
                "element {element} is marked for refinement and can't be marked for coarsening"
            );
            return Ok(false);
        }

        el.mark = ref_count;
        Ok(ref_count != 0)
    }

    /// The current refinement mark of an element.
    pub fn get_mark(&self, element: usize) -> Result<i8, GridError> {
        Ok(self.try_element(element)?.mark)
    }

    /// Check whether any leaf is marked for coarsening.
    pub fn has_coarsening_marks(&self) -> bool {
        self.elements
            .iter()
            .flatten()
            .any(|el| el.is_leaf() && el.mark < 0)
    }

    /// Reset every refinement mark.
    pub(crate) fn clear_marks(&mut self) {
        for el in self.elements.iter_mut().flatten() {
            el.mark = 0;
        }
    }

    /// Forget which elements were created in the last adaptation.
    pub(crate) fn clear_new_flags(&mut self) {
        for el in self.elements.iter_mut().flatten() {
            el.is_new = false;
        }
    }

    /// Bisect every leaf marked for refinement,
    /// repeating on the children as long as marks remain.
    ///
    /// Neighbouring elements are refined as needed to keep the mesh conforming.
    /// Returns the number of bisections performed.
    pub fn refine(&mut self) -> Result<usize, GridError> {
        let mut queue: Vec<usize> = self
            .elements
            .iter()
            .flatten()
            .filter(|el| el.is_leaf() && el.mark > 0)
            .map(|el| el.index())
            .collect();
        let mut bisections = 0;

        while let Some(id) = queue.pop() {
            if !self.contains_element(id) {
                continue;
            }
            let el = self.element(id);
            if !el.is_leaf() || el.mark <= 0 {
                // already refined as part of some other element's closure
                continue;
            }

            let new_children = self.bisect_with_closure(id, 0)?;
            bisections += new_children.len() / 2;
            queue.extend(
                new_children
                    .into_iter()
                    .filter(|&c| self.element(c).mark > 0),
            );
        }

        if bisections > 0 {
            log::debug!(
                "refined {bisections} elements, max level is now {}",
                self.max_level
            );
        }
        Ok(bisections)
    }

    /// Bisect an element along its refinement edge together with every other leaf
    /// sharing that edge, refining incompatible leaves around the edge first.
    ///
    /// Returns every child created, including those of the recursive refinements.
    fn bisect_with_closure(&mut self, id: usize, depth: usize) -> Result<Vec<usize>, GridError> {
        let edge = self.element(id).refinement_edge();
        if depth > MAX_CLOSURE_DEPTH {
            return Err(GridError::RefinementClosure(edge[0], edge[1]));
        }

        let mut new_children = Vec::new();
        for _ in 0..MAX_CLOSURE_STEPS {
            if !self.element(id).is_leaf() {
                // a recursive closure step took care of this one
                return Ok(new_children);
            }

            let patch = self.leaf_patch(edge);
            let incompatible = patch
                .iter()
                .copied()
                .find(|&e| !same_edge(self.element(e).refinement_edge(), edge));

            match incompatible {
                Some(nb) => {
                    log::trace!(
                        "refining element {nb} first to make edge ({}, {}) compatible",
                        edge[0],
                        edge[1]
                    );
                    new_children.extend(self.bisect_with_closure(nb, depth + 1)?);
                }
                None => {
                    let mid = self.midpoint(edge);
                    for e in patch {
                        new_children.extend(self.bisect(e, mid));
                    }
                    return Ok(new_children);
                }
            }
        }

        Err(GridError::RefinementClosure(edge[0], edge[1]))
    }

    /// Leaves that contain both endpoints of an edge.
    fn leaf_patch(&self, edge: [usize; 2]) -> Vec<usize> {
        self.vertices.elements[edge[0]]
            .iter()
            .copied()
            .filter(|&e| {
                let el = self.element(e);
                el.is_leaf() && el.vertices().contains(&edge[1])
            })
            .collect()
    }

    /// The midpoint vertex of an edge, created if the edge wasn't bisected yet.
    fn midpoint(&mut self, edge: [usize; 2]) -> usize {
        let key = if edge[0] < edge[1] {
            edge
        } else {
            [edge[1], edge[0]]
        };
        if let Some(&mid) = self.vertices.midpoints.get(&key) {
            return mid;
        }

        let coords = (self.vertices.coords[key[0]] + self.vertices.coords[key[1]]) * 0.5;
        let mid = self.add_vertex(coords);
        self.vertices.edge_of[mid] = Some(key);
        self.vertices.midpoints.insert(key, mid);
        mid
    }

    /// Split a single leaf into two children at the given midpoint vertex.
    fn bisect(&mut self, id: usize, mid: usize) -> [usize; 2] {
        let (vertices, level, macro_index, el_type, mark) = {
            let el = self.element(id);
            (
                el.vertices().to_vec(),
                el.level,
                el.macro_index,
                el.el_type,
                el.mark,
            )
        };
        let new = reference::new_vertex(DIM);
        let child_type = reference::child_type(DIM, el_type);

        let mut children = [0; 2];
        for (child_no, child) in children.iter_mut().enumerate() {
            let child_verts: Vec<usize> = reference::child_vertices(DIM, el_type, child_no)
                .iter()
                .map(|&l| if l == new { mid } else { vertices[l] })
                .collect();
            *child = self.insert_element(child_verts, Some(id), level + 1, macro_index, child_type);
            let c = self.element_mut(*child);
            c.mark = mark.saturating_sub(1).max(0);
            c.is_new = true;
        }

        let el = self.element_mut(id);
        el.children = Some(children);
        el.mark = 0;
        self.max_level = self.max_level.max(level + 1);
        children
    }

    /// Undo bisections whose children are all marked for coarsening.
    ///
    /// All elements bisected at the same midpoint are coarsened together,
    /// and only if every one of them has two leaf children marked for coarsening.
    /// Returns the number of elements whose children were removed.
    pub fn coarsen(&mut self) -> usize {
        let mut coarsened = 0;

        loop {
            let candidates: Vec<usize> = self
                .elements
                .iter()
                .flatten()
                .filter(|el| el.is_leaf() && el.mark < 0)
                .filter_map(|el| el.parent)
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();

            let mut round = 0;
            for parent in candidates {
                if !self.contains_element(parent) {
                    continue;
                }
                let Some([child, _]) = self.element(parent).children else {
                    // collapsed earlier in this round as part of another patch
                    continue;
                };
                let mid = self.element(child).vertices()[DIM];
                let patch = self.coarsening_patch(mid);

                if !patch.iter().all(|&p| self.can_collapse(p)) {
                    log::debug!(
                        "skipping coarsening around vertex {mid}, its patch isn't fully marked"
                    );
                    continue;
                }
                for p in patch {
                    self.collapse(p);
                    round += 1;
                }
            }

            if round == 0 {
                break;
            }
            coarsened += round;
        }

        if coarsened > 0 {
            self.update_max_level();
            log::debug!(
                "coarsened {coarsened} elements, max level is now {}",
                self.max_level
            );
        }
        coarsened
    }

    /// Every element that was bisected to create the vertex `mid`.
    fn coarsening_patch(&self, mid: usize) -> Vec<usize> {
        let mut patch: Vec<usize> = self.vertices.elements[mid]
            .iter()
            .filter_map(|&e| self.element(e).parent)
            .filter(|&p| !self.element(p).vertices().contains(&mid))
            .collect();
        patch.sort_unstable();
        patch.dedup();
        patch
    }

    fn can_collapse(&self, parent: usize) -> bool {
        match self.element(parent).children {
            Some(children) => children.iter().all(|&c| {
                let child = self.element(c);
                child.is_leaf() && child.mark < 0
            }),
            None => false,
        }
    }

    /// Remove both children of an element, making it a leaf again.
    fn collapse(&mut self, parent: usize) {
        let Some(children) = self.element(parent).children else {
            return;
        };
        let child_mark = children
            .iter()
            .map(|&c| self.element(c).mark)
            .max()
            .unwrap_or(0);
        for c in children {
            self.remove_element(c);
        }
        let el = self.element_mut(parent);
        el.children = None;
        el.mark = (child_mark + 1).min(0);
    }
}

#[inline]
fn same_edge(a: [usize; 2], b: [usize; 2]) -> bool {
    a == b || (a[0] == b[1] && a[1] == b[0])
}
