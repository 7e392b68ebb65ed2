//! The warp mesh: the source rectangle split into a fan of four triangles
//! around a single free vertex.

use viewfx_core::{PointD, RectD, RenderScale, ViewFxError, ViewFxResult};

/// Which side of the mapping the displacement is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WarpDirection {
    /// Move the mesh geometry; texture coordinates stay put.
    #[default]
    Forward,
    /// Keep the geometry; offset the texture coordinates by the inverse displacement.
    Backward,
}

impl WarpDirection {
    pub const OPTIONS: [&'static str; 2] = ["forward", "backward"];

    pub fn from_index(index: usize) -> ViewFxResult<Self> {
        match index {
            0 => Ok(WarpDirection::Forward),
            1 => Ok(WarpDirection::Backward),
            n => Err(ViewFxError::param("direction", format!("no option at index {}", n))),
        }
    }

    pub fn index(&self) -> usize {
        match self {
            WarpDirection::Forward => 0,
            WarpDirection::Backward => 1,
        }
    }
}

/// One textured triangle. `uv` is in the same space as the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshTriangle {
    pub pos: [PointD; 3],
    pub uv: [PointD; 3],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WarpMesh {
    /// Pinned corners, counter-clockwise from `(x1, y1)`.
    corners: [PointD; 4],
    free_pos: PointD,
    free_uv: PointD,
}

impl WarpMesh {
    /// Build the mesh over `bounds` (the source extent) moving `from` to `to`.
    pub fn new(bounds: RectD, from: PointD, to: PointD, direction: WarpDirection) -> Self {
        let corners = [
            PointD::new(bounds.x1, bounds.y1),
            PointD::new(bounds.x2, bounds.y1),
            PointD::new(bounds.x2, bounds.y2),
            PointD::new(bounds.x1, bounds.y2),
        ];
        let (free_pos, free_uv) = match direction {
            WarpDirection::Forward => (to, from),
            WarpDirection::Backward => (from, from.sub(to.sub(from))),
        };
        Self {
            corners,
            free_pos,
            free_uv,
        }
    }

    /// Geometry and texture coordinate of the free vertex.
    pub fn free_vertex(&self) -> (PointD, PointD) {
        (self.free_pos, self.free_uv)
    }

    /// Triangles in draw order. Corners map onto themselves.
    pub fn triangles(&self) -> [MeshTriangle; 4] {
        std::array::from_fn(|i| {
            let a = self.corners[i];
            let b = self.corners[(i + 1) % 4];
            MeshTriangle {
                pos: [a, b, self.free_pos],
                uv: [a, b, self.free_uv],
            }
        })
    }

    /// Rescale from canonical to pixel coordinates.
    pub fn to_pixel(&self, scale: RenderScale) -> WarpMesh {
        WarpMesh {
            corners: self.corners.map(|c| c.scale(scale)),
            free_pos: self.free_pos.scale(scale),
            free_uv: self.free_uv.scale(scale),
        }
    }
}
