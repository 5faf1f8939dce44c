//! Contour geometry: bounding boxes, convex hulls, and the fingertip
//! heuristics built on top of them.

use crate::contour::Point;

/// Axis-aligned box in pixel space with a detection confidence.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2, self.y + self.height / 2)
    }

    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }

    /// Intersection over union with another box, in [0, 1].
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) as i64 * (y2 - y1) as i64;
        let union = self.area() + other.area() - intersection;
        intersection as f32 / union.max(1) as f32
    }
}

/// Min/max box around a contour. Note the width/height are coordinate spans.
pub fn bounding_box(contour: &[Point]) -> BoundingBox {
    let Some(first) = contour.first() else {
        return BoundingBox::default();
    };

    let (mut min_x, mut max_x) = (first.x, first.x);
    let (mut min_y, mut max_y) = (first.y, first.y);
    for p in contour {
        min_x = min_x.min(p.x);
        max_x = max_x.max(p.x);
        min_y = min_y.min(p.y);
        max_y = max_y.max(p.y);
    }

    BoundingBox {
        x: min_x,
        y: min_y,
        width: max_x - min_x,
        height: max_y - min_y,
        confidence: 0.8,
    }
}

/// Integer-truncated arithmetic mean of the contour points.
pub fn centroid(contour: &[Point]) -> Point {
    if contour.is_empty() {
        return Point::default();
    }
    let (mut sum_x, mut sum_y) = (0i64, 0i64);
    for p in contour {
        sum_x += p.x as i64;
        sum_y += p.y as i64;
    }
    let n = contour.len() as i64;
    Point::new((sum_x / n) as i32, (sum_y / n) as i32)
}

fn cross(o: &Point, a: &Point, b: &Point) -> i64 {
    let dx1 = (a.x - o.x) as i64;
    let dy1 = (a.y - o.y) as i64;
    let dx2 = (b.x - o.x) as i64;
    let dy2 = (b.y - o.y) as i64;
    dx1 * dy2 - dy1 * dx2
}

/// Convex hull via Andrew's monotone chain. Input points are deduplicated;
/// the result is in counterclockwise order without the duplicate closing
/// vertex, and collinear runs are removed.
pub fn convex_hull(points: &[Point]) -> Vec<Point> {
    let mut pts = points.to_vec();
    if pts.len() < 3 {
        return pts;
    }
    pts.sort_unstable_by(|a, b| a.x.cmp(&b.x).then(a.y.cmp(&b.y)));
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    let mut lower: Vec<Point> = Vec::with_capacity(pts.len());
    for p in &pts {
        while lower.len() >= 2 && cross(&lower[lower.len() - 2], &lower[lower.len() - 1], p) <= 0 {
            lower.pop();
        }
        lower.push(*p);
    }

    let mut upper: Vec<Point> = Vec::with_capacity(pts.len());
    for p in pts.iter().rev() {
        while upper.len() >= 2 && cross(&upper[upper.len() - 2], &upper[upper.len() - 1], p) <= 0 {
            upper.pop();
        }
        upper.push(*p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Interior angle in degrees at hull vertex `i`, formed with its hull
/// neighbors. Degenerate arms read as flat (180).
fn angle_at(hull: &[Point], i: usize) -> f64 {
    let n = hull.len();
    let prev = &hull[(i + n - 1) % n];
    let next = &hull[(i + 1) % n];
    let ax = (prev.x - hull[i].x) as f64;
    let ay = (prev.y - hull[i].y) as f64;
    let bx = (next.x - hull[i].x) as f64;
    let by = (next.y - hull[i].y) as f64;
    let mag_a = (ax * ax + ay * ay).sqrt();
    let mag_b = (bx * bx + by * by).sqrt();
    if mag_a < 1e-3 || mag_b < 1e-3 {
        return 180.0;
    }
    let cos = ((ax * bx + ay * by) / (mag_a * mag_b)).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

/// Hull vertices that protrude far enough from the center and form a sharp
/// wedge, sorted by distance descending and spatially de-duplicated, capped
/// at five. Returns `(tips, avg_dist, max_dist)`.
fn tip_candidates(hull: &[Point], center: &Point) -> (Vec<Point>, f64, f64) {
    let mut dists = Vec::with_capacity(hull.len());
    let mut avg = 0.0f64;
    let mut maxd = 0.0f64;
    for p in hull {
        let d = p.distance(center);
        avg += d;
        maxd = maxd.max(d);
        dists.push(d);
    }
    avg /= hull.len() as f64;

    let dist_threshold = avg + (maxd - avg) * 0.35;

    let mut candidates: Vec<Point> = hull
        .iter()
        .enumerate()
        .filter(|&(i, _)| dists[i] >= dist_threshold && angle_at(hull, i) <= 85.0)
        .map(|(_, p)| *p)
        .collect();

    candidates.sort_by(|a, b| {
        b.distance(center)
            .partial_cmp(&a.distance(center))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let min_sep = (maxd * 0.14).max(10.0);
    let mut tips = Vec::new();
    for p in candidates {
        if tips.iter().all(|q: &Point| p.distance(q) >= min_sep) {
            tips.push(p);
        }
        if tips.len() >= 5 {
            break;
        }
    }

    (tips, avg, maxd)
}

/// Count extended fingers from hull geometry. Sharp protruding hull vertices
/// are counted directly; the spread ratio `max_dist / avg_dist` then nudges
/// the count for open poses where the hull-angle test misses fingers.
/// Result is clamped to [0, 5].
pub fn finger_count(contour: &[Point], center: &Point) -> i32 {
    if contour.len() < 15 {
        return 0;
    }
    let hull = convex_hull(contour);
    if hull.len() < 5 {
        return 0;
    }

    let (tips, avg, maxd) = tip_candidates(&hull, center);
    let mut count = tips.len() as i32;

    let spread_ratio = maxd / avg.max(1.0);
    if count <= 2 && spread_ratio > 1.45 {
        count = (count + 2).min(5);
    } else if count == 3 && spread_ratio > 1.55 {
        count = (count + 1).min(5);
    } else if count == 4 && spread_ratio > 1.65 {
        count = 5;
    } else if count == 0 && spread_ratio < 1.2 {
        count = 0;
    } else if count == 1 && spread_ratio > 1.4 {
        count = (count + 1).min(5);
    }

    count.clamp(0, 5)
}

/// Fingertip positions: the raw candidate set of [`finger_count`] without the
/// spread-ratio refinement.
pub fn fingertips(contour: &[Point], center: &Point) -> Vec<Point> {
    if contour.len() < 20 {
        return Vec::new();
    }
    let hull = convex_hull(contour);
    if hull.len() < 5 {
        return Vec::new();
    }
    tip_candidates(&hull, center).0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill_circle(cx: i32, cy: i32, r: i32) -> Vec<Point> {
        let mut pts = Vec::new();
        for y in cy - r..=cy + r {
            for x in cx - r..=cx + r {
                if (x - cx).pow(2) + (y - cy).pow(2) <= r * r {
                    pts.push(Point::new(x, y));
                }
            }
        }
        pts
    }

    fn fill_triangle(a: (i32, i32), b: (i32, i32), c: (i32, i32)) -> Vec<Point> {
        let verts = [a, b, c];
        let min_y = verts.iter().map(|v| v.1).min().unwrap() - 1;
        let max_y = verts.iter().map(|v| v.1).max().unwrap() + 1;
        let mut pts = Vec::new();
        for y in min_y..=max_y {
            let mut xs = Vec::new();
            for i in 0..3 {
                let (ax, ay) = verts[i];
                let (bx, by) = verts[(i + 1) % 3];
                if (ay <= y && y < by) || (by <= y && y < ay) {
                    let t = (y - ay) as f64 / (by - ay) as f64;
                    xs.push(ax as f64 + t * (bx - ax) as f64);
                }
            }
            xs.sort_by(|p, q| p.partial_cmp(q).unwrap());
            for pair in xs.chunks(2) {
                if let [x0, x1] = pair {
                    for x in (x0.ceil() as i32)..=(x1.floor() as i32) {
                        pts.push(Point::new(x, y));
                    }
                }
            }
        }
        pts
    }

    fn merge(shapes: &[Vec<Point>]) -> Vec<Point> {
        let mut set = std::collections::BTreeSet::new();
        for shape in shapes {
            for p in shape {
                set.insert((p.x, p.y));
            }
        }
        set.into_iter().map(|(x, y)| Point::new(x, y)).collect()
    }

    #[test]
    fn bounding_box_spans() {
        let pts = [
            Point::new(10, 20),
            Point::new(4, 25),
            Point::new(16, 8),
            Point::new(12, 30),
        ];
        let bb = bounding_box(&pts);
        assert_eq!((bb.x, bb.y, bb.width, bb.height), (4, 8, 12, 22));
        assert_eq!(bb.center(), Point::new(10, 19));
        assert_eq!(bb.area(), 12 * 22);
    }

    #[test]
    fn centroid_truncates() {
        let pts = [Point::new(0, 0), Point::new(3, 3), Point::new(4, 4)];
        assert_eq!(centroid(&pts), Point::new(2, 2));
    }

    #[test]
    fn iou_properties() {
        let a = BoundingBox {
            x: 0,
            y: 0,
            width: 10,
            height: 10,
            confidence: 1.0,
        };
        let b = BoundingBox {
            x: 20,
            y: 20,
            width: 10,
            height: 10,
            confidence: 1.0,
        };
        let c = BoundingBox {
            x: 5,
            y: 0,
            width: 10,
            height: 10,
            confidence: 1.0,
        };
        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&b), 0.0);
        let overlap = a.iou(&c);
        assert!(overlap > 0.0 && overlap < 1.0);
        assert!((overlap - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn hull_contains_all_points_ccw_no_collinear() {
        let pts = merge(&[fill_circle(50, 50, 20), fill_triangle((50, 10), (40, 40), (60, 40))]);
        let hull = convex_hull(&pts);
        assert!(hull.len() >= 3);

        // every consecutive triple turns the same (counterclockwise) way
        let n = hull.len();
        for i in 0..n {
            let c = cross(&hull[i], &hull[(i + 1) % n], &hull[(i + 2) % n]);
            assert!(c > 0, "collinear or clockwise triple at {i}");
        }

        // closure: all input points on or inside every hull edge
        for p in &pts {
            for i in 0..n {
                assert!(cross(&hull[i], &hull[(i + 1) % n], p) >= 0);
            }
        }
    }

    #[test]
    fn hull_of_star_is_its_tips() {
        // 5-spike star: hull keeps only the outer apexes
        let mut verts = Vec::new();
        for i in 0..5 {
            let a_out = (90.0 + 72.0 * i as f64).to_radians();
            let a_in = (90.0 + 72.0 * i as f64 + 36.0).to_radians();
            verts.push((
                (150.0 + 100.0 * a_out.cos()).round() as i32,
                (150.0 - 100.0 * a_out.sin()).round() as i32,
            ));
            verts.push((
                (150.0 + 30.0 * a_in.cos()).round() as i32,
                (150.0 - 30.0 * a_in.sin()).round() as i32,
            ));
        }
        let outline: Vec<Point> = (0..verts.len())
            .flat_map(|i| {
                let (ax, ay) = verts[i];
                let (bx, by) = verts[(i + 1) % verts.len()];
                (0..40).map(move |t| {
                    let t = t as f64 / 40.0;
                    Point::new(
                        (ax as f64 + t * (bx - ax) as f64).round() as i32,
                        (ay as f64 + t * (by - ay) as f64).round() as i32,
                    )
                })
            })
            .collect();
        let hull = convex_hull(&outline);
        assert_eq!(hull.len(), 5);
    }

    #[test]
    fn circle_counts_no_fingers() {
        let circle = fill_circle(100, 100, 60);
        let c = centroid(&circle);
        assert_eq!(finger_count(&circle, &c), 0);
        assert!(fingertips(&circle, &c).is_empty());
    }

    #[test]
    fn tapered_spike_is_a_fingertip() {
        // palm disc with one sharp tapered spike: the apex passes the
        // hull-angle gate, and the spread ratio lifts the count
        let shape = merge(&[
            fill_circle(150, 170, 45),
            fill_triangle((150, 50), (133, 145), (167, 145)),
        ]);
        let c = centroid(&shape);

        let tips = fingertips(&shape, &c);
        assert_eq!(tips.len(), 1);
        assert!(tips[0].distance(&Point::new(150, 50)) < 10.0);

        assert_eq!(finger_count(&shape, &c), 3);
    }

    #[test]
    fn two_spread_spikes_count_two() {
        let shape = merge(&[
            fill_circle(150, 180, 45),
            fill_triangle((105, 60), (128, 160), (152, 150)),
            fill_triangle((195, 60), (148, 150), (172, 160)),
        ]);
        let c = centroid(&shape);
        assert_eq!(finger_count(&shape, &c), 2);
    }
}
