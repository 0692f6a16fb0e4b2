//! Force-directed ("sprung") layout.
//!
//! Iterative relaxation over node bounding regions: spring attraction along
//! edges with a constant directional bias toward the flow direction,
//! zero-length alignment springs between partnered nodes, repulsion
//! between all region pairs falling off with an inverse fourth-power law
//! so influence stays local, and a weak constant tide pulling everything
//! toward the drawing center so disconnected components do not drift
//! apart forever. Velocities are damped each step.
//!
//! The canvas drives this once per layout timer tick with a wall-clock
//! derived number of sub-steps; each step is idempotent on a settled graph
//! (forces cancel, damping kills residual velocity).

use glam::DVec2;

/// Repelling charge constant.
const CHARGE_KE: f64 = 200_000_000.0;

/// Gravitational constant for the tide force.
const TIDE_G: f64 = 0.000_000_000_066_7;

/// Tuning constants for the relaxation.
#[derive(Debug, Clone, Copy)]
pub struct ForceOptions {
    /// Spring rest length along edges.
    pub spring_length: f64,
    /// Hooke constant for edge springs.
    pub spring_k: f64,
    /// Constant directional pull applied to edge heads, aligning the graph
    /// with the flow direction.
    pub flow_bias: f64,
    /// Tide strength (mass product in the gravity analogy).
    pub tide_power: f64,
    /// Velocity retained per step, in (0, 1).
    pub damping: f64,
    /// Integration time step.
    pub time_step: f64,
}

impl Default for ForceOptions {
    fn default() -> Self {
        ForceOptions {
            spring_length: 100.0,
            spring_k: 16.0,
            flow_bias: 600.0,
            tide_power: 4_000_000_000_000.0,
            damping: 0.3,
            time_step: 0.02,
        }
    }
}

/// A node as the simulation sees it: center position and region extent.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    pub pos: DVec2,
    pub area: DVec2,
}

/// Mutable per-node simulation state.
#[derive(Debug, Clone, Copy)]
pub struct ForceNode {
    pub region: Region,
    pub velocity: DVec2,
    /// Pinned nodes (being dragged) accumulate no movement.
    pub pinned: bool,
}

impl ForceNode {
    pub fn new(pos: DVec2, area: DVec2) -> ForceNode {
        ForceNode {
            region: Region { pos, area },
            velocity: DVec2::ZERO,
            pinned: false,
        }
    }
}

/// Hooke's law spring between two points. Returns the force acting on
/// `b`: toward `a` when stretched past `length`, away when compressed.
pub fn spring_force(a: DVec2, b: DVec2, length: f64, k: f64) -> DVec2 {
    let vec = b - a;
    let mag = vec.length();
    if mag <= f64::EPSILON {
        return DVec2::ZERO;
    }
    let displacement = length - mag;
    vec * (k * displacement * 0.5 / mag)
}

/// Force an edge exerts on the endpoint at `pos`: the spring pull toward
/// `other` plus the constant directional bias along the flow axis.
pub fn edge_force(dir: DVec2, pos: DVec2, other: DVec2, length: f64, k: f64) -> DVec2 {
    dir + spring_force(other, pos, length, k)
}

/// Constant-magnitude tide toward `b`, independent of distance beyond the
/// 1/mag normalization.
pub fn tide_force(a: DVec2, b: DVec2, power: f64) -> DVec2 {
    let vec = a - b;
    let mag = vec.length();
    if mag <= f64::EPSILON {
        return DVec2::ZERO;
    }
    vec * (TIDE_G * power / mag)
}

/// Repelling charge between two regions.
///
/// Inverse fourth-power falloff (not Coulomb's square law) so the
/// influence drops off quickly with distance; combined with the tide this
/// keeps the layout compact. Scaled per-axis by the region extents so big
/// boxes push harder than small ports.
pub fn repel_force(a: &Region, b: &Region) -> DVec2 {
    let vec = a.pos - b.pos;
    let mag = vec.length();
    if mag <= f64::EPSILON {
        return DVec2::ZERO;
    }
    let force = vec * (CHARGE_KE * 0.5 / (mag * mag * mag * mag * mag));
    DVec2::new(
        force.x * (a.area.x * b.area.x),
        force.y * (a.area.y * b.area.y),
    )
}

/// One relaxation step. `edges` are (tail, head) indices into `nodes`,
/// `partners` are pairs held side by side with a zero-length spring, and
/// `flow_dir` is the unit flow direction. Returns the total distance
/// moved, so callers can detect settling.
pub fn step(
    nodes: &mut [ForceNode],
    edges: &[(usize, usize)],
    partners: &[(usize, usize)],
    flow_dir: DVec2,
    opts: &ForceOptions,
) -> f64 {
    let n = nodes.len();
    if n == 0 {
        return 0.0;
    }

    let mut forces = vec![DVec2::ZERO; n];

    // Pairwise repulsion and shared tide toward the centroid.
    let centroid = nodes.iter().map(|f| f.region.pos).sum::<DVec2>() / n as f64;
    for i in 0..n {
        forces[i] -= tide_force(nodes[i].region.pos, centroid, opts.tide_power);
        for j in (i + 1)..n {
            let f = repel_force(&nodes[i].region, &nodes[j].region);
            forces[i] += f;
            forces[j] -= f;
        }
    }

    // Springs with flow bias: the head is pushed along the flow, the tail
    // against it.
    let bias = flow_dir * opts.flow_bias;
    for &(tail, head) in edges {
        if tail == head || tail >= n || head >= n {
            continue;
        }
        let head_pos = nodes[head].region.pos;
        let tail_pos = nodes[tail].region.pos;
        forces[head] += edge_force(bias, head_pos, tail_pos, opts.spring_length, opts.spring_k);
        forces[tail] += edge_force(-bias, tail_pos, head_pos, opts.spring_length, opts.spring_k);
    }

    // Partner pairs relax toward each other with a zero-length spring and
    // no flow bias, so they settle side by side.
    for &(a, b) in partners {
        if a == b || a >= n || b >= n {
            continue;
        }
        let pa = nodes[a].region.pos;
        let pb = nodes[b].region.pos;
        forces[b] += spring_force(pa, pb, 0.0, opts.spring_k);
        forces[a] += spring_force(pb, pa, 0.0, opts.spring_k);
    }

    // Damped Euler integration.
    let mut moved = 0.0;
    for (node, force) in nodes.iter_mut().zip(&forces) {
        if node.pinned {
            node.velocity = DVec2::ZERO;
            continue;
        }
        node.velocity = (node.velocity + *force * opts.time_step) * opts.damping;
        let delta = node.velocity * opts.time_step;
        node.region.pos += delta;
        moved += delta.length();
    }
    moved
}
