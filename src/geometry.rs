use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f32, dy: f32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub width: f32,
    pub height: f32,
}

impl Bounds {
    pub fn clamp(&self, point: Point) -> Point {
        Point {
            x: point.x.clamp(0.0, self.width),
            y: point.y.clamp(0.0, self.height),
        }
    }

    pub fn contains(&self, point: Point) -> bool {
        (0.0..=self.width).contains(&point.x) && (0.0..=self.height).contains(&point.y)
    }
}

/// Even-odd ray casting. A horizontal ray is cast from `point` and every polygon
/// edge it crosses flips the result. Points exactly on an edge or vertex may land
/// on either side.
pub fn point_in_polygon(point: Point, vertices: &[Point]) -> bool {
    if vertices.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let vi = vertices[i];
        let vj = vertices[j];
        if (vi.y > point.y) != (vj.y > point.y) {
            let cross_x = (vj.x - vi.x) * (point.y - vi.y) / (vj.y - vi.y) + vi.x;
            if point.x < cross_x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

pub fn distance(a: Point, b: Point) -> f32 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    (dx * dx + dy * dy).sqrt()
}

pub fn midpoint(a: Point, b: Point) -> Point {
    Point::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
}

/// Vertex average, not the area centroid.
pub fn centroid(vertices: &[Point]) -> Option<Point> {
    if vertices.is_empty() {
        return None;
    }
    let count = vertices.len() as f32;
    let (sum_x, sum_y) = vertices
        .iter()
        .fold((0.0, 0.0), |(sx, sy), v| (sx + v.x, sy + v.y));
    Some(Point::new(sum_x / count, sum_y / count))
}

pub fn translate(vertices: &[Point], origin: Point) -> Vec<Point> {
    vertices.iter().map(|v| v.offset(origin.x, origin.y)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: f32, y: f32, size: f32) -> Vec<Point> {
        vec![
            Point::new(x, y),
            Point::new(x + size, y),
            Point::new(x + size, y + size),
            Point::new(x, y + size),
        ]
    }

    #[test]
    fn centroid_of_square_is_inside() {
        let poly = square(100.0, 100.0, 50.0);
        let center = centroid(&poly).unwrap();
        assert_eq!(center, Point::new(125.0, 125.0));
        assert!(point_in_polygon(center, &poly));
    }

    #[test]
    fn far_point_is_outside() {
        let poly = square(100.0, 100.0, 50.0);
        assert!(!point_in_polygon(Point::new(1000.0, 1000.0), &poly));
        assert!(!point_in_polygon(Point::new(-20.0, 125.0), &poly));
        assert!(!point_in_polygon(Point::new(125.0, 5.0), &poly));
    }

    #[test]
    fn concave_notch_is_outside() {
        // U shape opening upwards
        let poly = vec![
            Point::new(0.0, 0.0),
            Point::new(30.0, 0.0),
            Point::new(30.0, 30.0),
            Point::new(20.0, 30.0),
            Point::new(20.0, 10.0),
            Point::new(10.0, 10.0),
            Point::new(10.0, 30.0),
            Point::new(0.0, 30.0),
        ];
        assert!(point_in_polygon(Point::new(5.0, 20.0), &poly));
        assert!(point_in_polygon(Point::new(25.0, 20.0), &poly));
        assert!(!point_in_polygon(Point::new(15.0, 20.0), &poly));
        assert!(point_in_polygon(Point::new(15.0, 5.0), &poly));
    }

    #[test]
    fn triangle_containment() {
        let poly = vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(50.0, 80.0),
        ];
        assert!(point_in_polygon(centroid(&poly).unwrap(), &poly));
        assert!(!point_in_polygon(Point::new(5.0, 70.0), &poly));
    }

    #[test]
    fn degenerate_polygon_contains_nothing() {
        let line = vec![Point::new(0.0, 0.0), Point::new(10.0, 10.0)];
        assert!(!point_in_polygon(Point::new(5.0, 5.0), &line));
        assert!(!point_in_polygon(Point::new(0.0, 0.0), &[]));
    }

    #[test]
    fn translated_polygon_keeps_its_shape() {
        let local = vec![
            Point::new(-10.0, -10.0),
            Point::new(10.0, -10.0),
            Point::new(0.0, 20.0),
        ];
        let placed = translate(&local, Point::new(100.0, 50.0));
        assert_eq!(placed[0], Point::new(90.0, 40.0));
        assert_eq!(placed[2], Point::new(100.0, 70.0));
        assert_eq!(centroid(&placed), Some(Point::new(100.0, 50.0)));
        assert!(point_in_polygon(Point::new(100.0, 50.0), &placed));
        assert!(!point_in_polygon(Point::new(0.0, 0.0), &placed));
        assert_eq!(centroid(&[]), None);
    }

    #[test]
    fn clamp_keeps_points_on_canvas() {
        let bounds = Bounds {
            width: 800.0,
            height: 600.0,
        };
        assert_eq!(bounds.clamp(Point::new(-5.0, 700.0)), Point::new(0.0, 600.0));
        assert_eq!(bounds.clamp(Point::new(400.0, 300.0)), Point::new(400.0, 300.0));
        assert!(bounds.contains(Point::new(800.0, 0.0)));
        assert!(!bounds.contains(Point::new(800.1, 0.0)));
    }
}
