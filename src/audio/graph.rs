// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Gain nodes and their wiring.
//!
//! Every node has a settable scalar and a fixed destination: either another node or,
//! for the terminal node owned by a backend, the device output. Gains are read live
//! by the renderer, so changing a node affects voices that are already sounding.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Global node ID counter.
static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// A gain stage in the output signal graph.
pub struct GainNode {
    id: u64,
    /// The gain, stored as f32 bits so it can be changed while rendering.
    gain: AtomicU32,
    /// Where this node's signal goes. None means the device output.
    destination: Option<Arc<GainNode>>,
}

impl GainNode {
    /// Creates a new node with the given gain, wired to the given destination.
    pub fn new(gain: f32, destination: Option<Arc<GainNode>>) -> Arc<GainNode> {
        Arc::new(GainNode {
            id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
            gain: AtomicU32::new(gain.to_bits()),
            destination,
        })
    }

    /// Creates a node wired to another node.
    pub fn connected_to(gain: f32, destination: &Arc<GainNode>) -> Arc<GainNode> {
        GainNode::new(gain, Some(destination.clone()))
    }

    /// Returns the unique ID of this node.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns this node's own gain.
    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    /// Sets this node's own gain. No clamping is applied.
    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain.to_bits(), Ordering::Relaxed);
    }

    /// Returns the node this one feeds, if any.
    pub fn destination(&self) -> Option<&Arc<GainNode>> {
        self.destination.as_ref()
    }

    /// Returns the product of the gains from this node down to the output.
    pub fn effective_gain(&self) -> f32 {
        let mut gain = self.gain();
        let mut next = self.destination.as_ref();
        while let Some(node) = next {
            gain *= node.gain();
            next = node.destination.as_ref();
        }
        gain
    }

    /// Returns true if the signal from this node passes through the given node.
    pub fn routes_through(&self, node: &GainNode) -> bool {
        if self.id == node.id {
            return true;
        }
        let mut next = self.destination.as_ref();
        while let Some(current) = next {
            if current.id == node.id {
                return true;
            }
            next = current.destination.as_ref();
        }
        false
    }
}

impl fmt::Debug for GainNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GainNode")
            .field("id", &self.id)
            .field("gain", &self.gain())
            .field("destination", &self.destination.as_ref().map(|d| d.id))
            .finish()
    }
}
