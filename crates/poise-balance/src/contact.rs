//! Contact geometry: per-limb sole polygons, the combined support polygon,
//! and the Coulomb friction cone.

use nalgebra::{Rotation2, Vector2, Vector3};

use crate::error::ConfigError;
use crate::types::LimbId;

const HULL_EPS: f64 = 1e-9;

// ---------------------------------------------------------------------------
// ContactModel
// ---------------------------------------------------------------------------

/// Sole polygon and friction of one limb, plus where it currently rests.
#[derive(Clone, Debug, PartialEq)]
pub struct ContactModel {
    limb: LimbId,
    /// Sole-local vertices, counter-clockwise.
    vertices: Vec<Vector2<f64>>,
    friction: f64,
    active: bool,
    anchor: Vector2<f64>,
    yaw: f64,
}

impl ContactModel {
    /// Build an inactive contact. Clockwise input is reordered to CCW.
    pub fn new(limb: LimbId, vertices: Vec<Vector2<f64>>, friction: f64) -> Result<Self, ConfigError> {
        if vertices.len() < 3 {
            return Err(ConfigError::invalid(
                "sole_vertices",
                format!("limb {limb} needs at least 3 vertices"),
            ));
        }
        if !(friction >= 0.0 && friction.is_finite()) {
            return Err(ConfigError::invalid(
                "friction",
                format!("limb {limb} friction must be non-negative, got {friction}"),
            ));
        }
        let mut vertices = vertices;
        if signed_area(&vertices) < 0.0 {
            vertices.reverse();
        }
        Ok(Self {
            limb,
            vertices,
            friction,
            active: false,
            anchor: Vector2::zeros(),
            yaw: 0.0,
        })
    }

    pub const fn limb(&self) -> LimbId {
        self.limb
    }

    pub const fn is_active(&self) -> bool {
        self.active
    }

    pub const fn friction(&self) -> f64 {
        self.friction
    }

    pub const fn anchor(&self) -> Vector2<f64> {
        self.anchor
    }

    pub const fn yaw(&self) -> f64 {
        self.yaw
    }

    pub fn sole_vertices(&self) -> &[Vector2<f64>] {
        &self.vertices
    }

    /// Place the sole at `anchor` with heading `yaw` and mark it supporting.
    pub fn activate(&mut self, anchor: Vector2<f64>, yaw: f64) {
        self.anchor = anchor;
        self.yaw = yaw;
        self.active = true;
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Sole vertices in the world frame at the current anchor.
    pub fn world_vertices(&self) -> impl Iterator<Item = Vector2<f64>> + '_ {
        let rot = Rotation2::new(self.yaw);
        self.vertices.iter().map(move |v| self.anchor + rot * v)
    }
}

fn signed_area(vertices: &[Vector2<f64>]) -> f64 {
    let n = vertices.len();
    (0..n)
        .map(|i| cross(&vertices[i], &vertices[(i + 1) % n]))
        .sum::<f64>()
        * 0.5
}

fn cross(a: &Vector2<f64>, b: &Vector2<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

// ---------------------------------------------------------------------------
// SupportPolygon
// ---------------------------------------------------------------------------

/// Convex hull of every active contact's sole, counter-clockwise.
///
/// Buffers are reused by [`rebuild`](Self::rebuild) so a polygon owned by the
/// optimizer does not allocate once it has reached its working size.
#[derive(Clone, Debug, Default)]
pub struct SupportPolygon {
    points: Vec<Vector2<f64>>,
    hull: Vec<Vector2<f64>>,
}

impl SupportPolygon {
    pub fn with_capacity(max_vertices: usize) -> Self {
        Self {
            points: Vec::with_capacity(max_vertices),
            hull: Vec::with_capacity(max_vertices + 1),
        }
    }

    pub fn from_contacts(contacts: &[ContactModel]) -> Self {
        let mut polygon = Self::default();
        polygon.rebuild(contacts);
        polygon
    }

    /// Recompute the hull from the active contacts (Andrew's monotone chain).
    pub fn rebuild(&mut self, contacts: &[ContactModel]) {
        self.points.clear();
        self.hull.clear();
        for contact in contacts.iter().filter(|c| c.is_active()) {
            self.points.extend(contact.world_vertices());
        }
        if self.points.is_empty() {
            return;
        }
        self.points
            .sort_unstable_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
        self.points
            .dedup_by(|a, b| (a.x - b.x).abs() < HULL_EPS && (a.y - b.y).abs() < HULL_EPS);

        if self.points.len() < 3 {
            self.hull.extend_from_slice(&self.points);
            return;
        }

        // Lower hull.
        for p in &self.points {
            while self.hull.len() >= 2 && turn(&self.hull, p) <= HULL_EPS {
                self.hull.pop();
            }
            self.hull.push(*p);
        }
        // Upper hull.
        let lower_len = self.hull.len() + 1;
        for p in self.points.iter().rev().skip(1) {
            while self.hull.len() >= lower_len && turn(&self.hull, p) <= HULL_EPS {
                self.hull.pop();
            }
            self.hull.push(*p);
        }
        self.hull.pop();
    }

    pub fn vertices(&self) -> &[Vector2<f64>] {
        &self.hull
    }

    pub fn len(&self) -> usize {
        self.hull.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hull.is_empty()
    }

    /// True when the hull encloses an area (three or more vertices).
    pub fn has_area(&self) -> bool {
        self.hull.len() >= 3
    }

    /// Point-in-polygon test, boundary inclusive.
    pub fn contains(&self, p: &Vector2<f64>) -> bool {
        if !self.has_area() {
            return false;
        }
        self.halfspaces().all(|(n, b)| n.dot(p) <= b + HULL_EPS)
    }

    /// Area-weighted centroid, or the vertex mean for degenerate hulls.
    pub fn centroid(&self) -> Option<Vector2<f64>> {
        if self.hull.is_empty() {
            return None;
        }
        let n = self.hull.len();
        let mut area = 0.0;
        let mut c = Vector2::zeros();
        for i in 0..n {
            let a = self.hull[i];
            let b = self.hull[(i + 1) % n];
            let w = cross(&a, &b);
            area += w;
            c += (a + b) * w;
        }
        if area.abs() < HULL_EPS {
            let sum: Vector2<f64> = self.hull.iter().sum();
            return Some(sum / n as f64);
        }
        Some(c / (3.0 * area))
    }

    /// Edge constraints `n·p ≤ b` with `n` the outward unit normal.
    pub fn halfspaces(&self) -> impl Iterator<Item = (Vector2<f64>, f64)> + '_ {
        let n = self.hull.len();
        (0..n).filter_map(move |i| {
            let a = self.hull[i];
            let d = self.hull[(i + 1) % n] - a;
            let normal = Vector2::new(d.y, -d.x).try_normalize(HULL_EPS)?;
            Some((normal, normal.dot(&a)))
        })
    }
}

fn turn(hull: &[Vector2<f64>], p: &Vector2<f64>) -> f64 {
    let o = hull[hull.len() - 2];
    let a = hull[hull.len() - 1];
    cross(&(a - o), &(p - o))
}

// ---------------------------------------------------------------------------
// Friction cone
// ---------------------------------------------------------------------------

/// Project a contact force into the Coulomb cone `|f_t| ≤ mu f_z`, `f_z ≥ 0`.
pub fn clamp_to_friction_cone(force: &Vector3<f64>, mu: f64) -> Vector3<f64> {
    let fz = force.z.max(0.0);
    let tangential = force.xy();
    let limit = mu * fz;
    let norm = tangential.norm();
    let t = if norm > limit && norm > 0.0 {
        tangential * (limit / norm)
    } else {
        tangential
    };
    Vector3::new(t.x, t.y, fz)
}
