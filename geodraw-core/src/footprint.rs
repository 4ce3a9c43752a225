//! 从建筑要素推导地面轮廓。

use glam::{DVec2, DVec3};

use crate::geometry::{Ellipsoid, OrientedBox};

/// 网格顶点与最低点高差不超过该值时视为底面顶点（米）。
pub const FOOTPRINT_HEIGHT_TOLERANCE: f64 = 0.5;

/// 取包围盒中最低的 4 个角点，按绕中心的角度排序。
pub fn footprint_from_box(obb: &OrientedBox, ellipsoid: &Ellipsoid) -> Option<Vec<DVec3>> {
    let mut corners = Vec::with_capacity(8);
    for corner in obb.corners() {
        let height = ellipsoid.cartesian_to_cartographic(corner)?.height;
        corners.push((corner, height));
    }
    corners.sort_by(|a, b| a.1.total_cmp(&b.1));
    let lowest: Vec<DVec3> = corners.into_iter().take(4).map(|(p, _)| p).collect();
    Some(order_around_centroid(lowest, ellipsoid))
}

/// 取接近最低高度的网格顶点，在局部平面求凸包作为轮廓。
pub fn footprint_from_triangles(
    triangles: &[[DVec3; 3]],
    ellipsoid: &Ellipsoid,
) -> Option<Vec<DVec3>> {
    let vertices: Vec<(DVec3, f64)> = triangles
        .iter()
        .flatten()
        .filter_map(|p| {
            ellipsoid
                .cartesian_to_cartographic(*p)
                .map(|c| (*p, c.height))
        })
        .collect();
    let min_height = vertices
        .iter()
        .map(|(_, h)| *h)
        .min_by(|a, b| a.total_cmp(b))?;
    let base: Vec<DVec3> = vertices
        .into_iter()
        .filter(|(_, h)| *h <= min_height + FOOTPRINT_HEIGHT_TOLERANCE)
        .map(|(p, _)| p)
        .collect();

    let center = base.iter().copied().sum::<DVec3>() / base.len() as f64;
    let frame = ellipsoid.east_north_up(center);
    let planar: Vec<(DVec2, DVec3)> = base
        .into_iter()
        .map(|p| (frame.to_local(p).truncate(), p))
        .collect();
    let hull = convex_hull(planar);
    (hull.len() >= 3).then_some(hull)
}

fn order_around_centroid(points: Vec<DVec3>, ellipsoid: &Ellipsoid) -> Vec<DVec3> {
    if points.is_empty() {
        return points;
    }
    let center = points.iter().copied().sum::<DVec3>() / points.len() as f64;
    let frame = ellipsoid.east_north_up(center);
    let mut keyed: Vec<(f64, DVec3)> = points
        .into_iter()
        .map(|p| {
            let local = frame.to_local(p);
            (local.y.atan2(local.x), p)
        })
        .collect();
    keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
    keyed.into_iter().map(|(_, p)| p).collect()
}

/// Andrew 单调链，返回逆时针顺序的凸包顶点。
fn convex_hull(mut points: Vec<(DVec2, DVec3)>) -> Vec<DVec3> {
    points.sort_by(|a, b| a.0.x.total_cmp(&b.0.x).then(a.0.y.total_cmp(&b.0.y)));
    points.dedup_by(|a, b| (a.0 - b.0).length_squared() < 1e-12);
    if points.len() < 3 {
        return points.into_iter().map(|(_, p)| p).collect();
    }

    fn cross(o: DVec2, a: DVec2, b: DVec2) -> f64 {
        (a - o).perp_dot(b - o)
    }

    let mut lower: Vec<(DVec2, DVec3)> = Vec::new();
    for point in &points {
        while lower.len() >= 2 && cross(lower[lower.len() - 2].0, lower[lower.len() - 1].0, point.0) <= 0.0 {
            lower.pop();
        }
        lower.push(*point);
    }
    let mut upper: Vec<(DVec2, DVec3)> = Vec::new();
    for point in points.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2].0, upper[upper.len() - 1].0, point.0) <= 0.0 {
            upper.pop();
        }
        upper.push(*point);
    }
    lower.pop();
    upper.pop();
    lower.into_iter().chain(upper).map(|(_, p)| p).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Cartographic, LocalFrame};
    use glam::DMat3;

    fn frame() -> (Ellipsoid, LocalFrame) {
        let ellipsoid = Ellipsoid::wgs84();
        let origin = ellipsoid.cartographic_to_cartesian(Cartographic::from_degrees(2.35, 48.85, 0.0));
        (ellipsoid, ellipsoid.east_north_up(origin))
    }

    #[test]
    fn box_footprint_uses_lowest_corners_counter_clockwise() {
        let (ellipsoid, frame) = frame();
        let center = frame.to_world(DVec3::new(0.0, 0.0, 15.0));
        let half_axes = DMat3::from_cols(frame.east * 8.0, frame.north * 5.0, frame.up * 15.0);
        let footprint = footprint_from_box(&OrientedBox::new(center, half_axes), &ellipsoid).unwrap();
        assert_eq!(footprint.len(), 4);

        let local: Vec<DVec3> = footprint.iter().map(|p| frame.to_local(*p)).collect();
        for p in &local {
            assert!(p.z.abs() < 0.01, "corner should sit on the ground: {p:?}");
            assert!((p.x.abs() - 8.0).abs() < 0.01);
            assert!((p.y.abs() - 5.0).abs() < 0.01);
        }
        let planar: Vec<DVec2> = local.iter().map(|p| p.truncate()).collect();
        let (area, _) = crate::geometry::polygon_area_centroid(&planar).unwrap();
        assert!((area - 160.0).abs() < 0.1);
        // 逆时针顺序时有向面积为正
        let signed: f64 = (0..4)
            .map(|i| planar[i].perp_dot(planar[(i + 1) % 4]))
            .sum();
        assert!(signed > 0.0);
    }

    #[test]
    fn mesh_footprint_is_hull_of_base_vertices() {
        let (ellipsoid, frame) = frame();
        let at = |e: f64, n: f64, u: f64| frame.to_world(DVec3::new(e, n, u));
        // 底面 L 形的四个外角加一个内部点，屋顶在 10 米高
        let triangles = [
            [at(0.0, 0.0, 0.0), at(10.0, 0.0, 0.0), at(10.0, 6.0, 0.0)],
            [at(0.0, 0.0, 0.0), at(10.0, 6.0, 0.0), at(0.0, 6.0, 0.0)],
            [at(4.0, 3.0, 0.1), at(4.0, 3.0, 10.0), at(10.0, 6.0, 10.0)],
        ];
        let footprint = footprint_from_triangles(&triangles, &ellipsoid).unwrap();
        assert_eq!(footprint.len(), 4);
        for p in &footprint {
            assert!(frame.to_local(*p).z.abs() < 0.2);
        }
    }

    #[test]
    fn empty_mesh_has_no_footprint() {
        let (ellipsoid, _) = frame();
        assert!(footprint_from_triangles(&[], &ellipsoid).is_none());
    }
}
