use serde::Deserialize;

use base::defs::{Error, ErrorKind::*, Result};

use crate::misc::{Matrix4, Point3, Vector3};

fn default_fov_deg() -> f64 {
    60.0
}

/// A camera viewpoint. The ordered list of views in the run configuration
/// is immutable once generation starts; a view's position in that list is
/// its index.
#[derive(Clone, Debug, Deserialize)]
pub struct View {
    pub eye: [f64; 3],
    pub target: [f64; 3],
    #[serde(default = "default_fov_deg")]
    pub fov_deg: f64,
    #[serde(default)]
    pub prompt: Option<String>,
}

impl View {
    pub fn eye_point(&self) -> Point3 {
        Point3::new(self.eye[0], self.eye[1], self.eye[2])
    }

    pub fn target_point(&self) -> Point3 {
        Point3::new(self.target[0], self.target[1], self.target[2])
    }

    /// World-to-view transform. Z-up world, right-handed look-at.
    pub fn view_matrix(&self) -> Matrix4 {
        let eye = self.eye_point();
        let target = self.target_point();
        let dir = target - eye;

        // Fall back when looking straight along the up axis.
        let up = if dir.cross(&Vector3::z()).norm() < 1e-9 {
            Vector3::y()
        } else {
            Vector3::z()
        };

        Matrix4::look_at_rh(&eye, &target, &up)
    }

    pub fn tan_half_fov(&self) -> f64 {
        (self.fov_deg.to_radians() / 2.0).tan()
    }
}

/// Resolves the order in which views are visited. The optional custom
/// order must be a permutation of all view indices.
pub fn resolve_view_order(
    view_count: usize,
    custom_order: Option<&[usize]>,
) -> Result<Vec<usize>> {
    let order = match custom_order {
        Some(order) => order.to_vec(),
        None => (0..view_count).collect(),
    };

    let mut seen = vec![false; view_count];
    for &idx in &order {
        if idx >= view_count || seen[idx] {
            let desc = format!(
                "custom view order is not a permutation of 0..{}",
                view_count
            );
            return Err(Error::new(Configuration, desc));
        }
        seen[idx] = true;
    }
    if order.len() != view_count {
        let desc = format!(
            "custom view order has {} entries, expected {}",
            order.len(),
            view_count
        );
        return Err(Error::new(Configuration, desc));
    }

    Ok(order)
}
