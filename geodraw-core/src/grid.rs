//! 将多边形细分为规则网格，供按单元贴合地形使用。

use std::collections::HashMap;

use glam::{DVec2, DVec3};

use crate::geometry::{Ellipsoid, TangentPlane, point_in_polygon};

/// 网格单元共享角点；`cells` 中每个单元按逆时针保存 4 个角点索引。
#[derive(Debug, Clone, Default)]
pub struct GridLayout {
    pub corners: Vec<DVec3>,
    pub cells: Vec<[usize; 4]>,
    pub cell_size: f64,
}

impl GridLayout {
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell_positions(&self, cell: usize) -> Option<[DVec3; 4]> {
        let indices = self.cells.get(cell)?;
        let mut out = [DVec3::ZERO; 4];
        for (slot, index) in out.iter_mut().zip(indices) {
            *slot = *self.corners.get(*index)?;
        }
        Some(out)
    }
}

/// 在多边形的切平面上按 `cell_size` 划分网格，只保留中心落在多边形内的单元。
/// 单元数超过 `max_cells` 时放大单元尺寸。
pub fn subdivide(
    positions: &[DVec3],
    ellipsoid: &Ellipsoid,
    cell_size: f64,
    max_cells: usize,
) -> Option<GridLayout> {
    if positions.len() < 3 || max_cells == 0 {
        return None;
    }
    let plane = TangentPlane::from_points(positions, ellipsoid)?;
    let projected = positions
        .iter()
        .map(|p| plane.project_point(*p))
        .collect::<Option<Vec<DVec2>>>()?;

    let (min, max) = projected.iter().fold(
        (DVec2::splat(f64::MAX), DVec2::splat(f64::MIN)),
        |(min, max), p| (min.min(*p), max.max(*p)),
    );
    let extent = max - min;
    if extent.x <= 0.0 || extent.y <= 0.0 {
        return None;
    }

    let mut size = cell_size.max(1e-3);
    let (mut cols, mut rows) = dimensions(extent, size);
    while cols * rows > max_cells {
        size *= ((cols * rows) as f64 / max_cells as f64).sqrt().max(1.01);
        (cols, rows) = dimensions(extent, size);
    }
    let step = DVec2::new(extent.x / cols as f64, extent.y / rows as f64);

    let mut layout = GridLayout {
        cell_size: size,
        ..GridLayout::default()
    };
    let mut corner_index: HashMap<(usize, usize), usize> = HashMap::new();
    for row in 0..rows {
        for col in 0..cols {
            let center = min + DVec2::new((col as f64 + 0.5) * step.x, (row as f64 + 0.5) * step.y);
            if !point_in_polygon(center, &projected) {
                continue;
            }
            let mut cell = [0usize; 4];
            for (slot, key) in cell
                .iter_mut()
                .zip([(col, row), (col + 1, row), (col + 1, row + 1), (col, row + 1)])
            {
                *slot = match corner_index.get(&key) {
                    Some(index) => *index,
                    None => {
                        let planar = min + DVec2::new(key.0 as f64 * step.x, key.1 as f64 * step.y);
                        let position = plane.lift_to_ellipsoid(planar)?;
                        layout.corners.push(position);
                        let index = layout.corners.len() - 1;
                        corner_index.insert(key, index);
                        index
                    }
                };
            }
            layout.cells.push(cell);
        }
    }
    Some(layout)
}

fn dimensions(extent: DVec2, size: f64) -> (usize, usize) {
    // 投影误差可能让整倍数的边长略微超出
    let cols = (extent.x / size - 1e-6).ceil().max(1.0) as usize;
    let rows = (extent.y / size - 1e-6).ceil().max(1.0) as usize;
    (cols, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Cartographic;

    fn polygon(points: &[(f64, f64)]) -> (Ellipsoid, Vec<DVec3>) {
        let ellipsoid = Ellipsoid::wgs84();
        let origin = ellipsoid.cartographic_to_cartesian(Cartographic::from_degrees(139.69, 35.68, 0.0));
        let frame = ellipsoid.east_north_up(origin);
        let corners = points
            .iter()
            .map(|(e, n)| frame.to_world(DVec3::new(*e, *n, 0.0)))
            .collect();
        (ellipsoid, corners)
    }

    fn square(side: f64) -> (Ellipsoid, Vec<DVec3>) {
        polygon(&[(0.0, 0.0), (side, 0.0), (side, side), (0.0, side)])
    }

    #[test]
    fn square_is_split_into_shared_corner_cells() {
        let (ellipsoid, positions) = square(30.0);
        let layout = subdivide(&positions, &ellipsoid, 10.0, 2500).unwrap();
        assert_eq!(layout.cell_count(), 9);
        // 3x3 单元共享 4x4 个角点
        assert_eq!(layout.corners.len(), 16);
        let cell = layout.cell_positions(0).unwrap();
        assert!((cell[0].distance(cell[1]) - 10.0).abs() < 0.01);
    }

    #[test]
    fn triangle_keeps_only_inner_cells() {
        let (ellipsoid, triangle) = polygon(&[(0.0, 0.0), (30.0, 0.0), (30.0, 15.0)]);
        let layout = subdivide(&triangle, &ellipsoid, 10.0, 2500).unwrap();
        // 3x2 的网格中只有斜边下方的 3 个单元中心在内部
        assert_eq!(layout.cell_count(), 3);
    }

    #[test]
    fn cell_budget_enlarges_cells() {
        let (ellipsoid, positions) = square(100.0);
        let layout = subdivide(&positions, &ellipsoid, 1.0, 50).unwrap();
        assert!(layout.cell_count() <= 50);
        assert!(layout.cell_size > 1.0);
        assert!(!layout.is_empty());
    }

    #[test]
    fn degenerate_input_yields_none() {
        let (ellipsoid, positions) = square(10.0);
        assert!(subdivide(&positions[..2], &ellipsoid, 1.0, 100).is_none());
        assert!(subdivide(&positions, &ellipsoid, 1.0, 0).is_none());
    }
}
