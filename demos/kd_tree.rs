use ikd_tree::geometry::Point3D;
use ikd_tree::kd_tree::KdTree;

fn main() {
    println!("--- Bulk build ---");
    let mut tree: KdTree<Point3D> = KdTree::new(0.5, 0.7).unwrap();
    tree.build(vec![
        Point3D::new(10.0, 20.0, 30.0),
        Point3D::new(80.0, 30.0, 40.0),
        Point3D::new(45.0, 70.0, 50.0),
    ]);

    let query = Point3D::new(12.0, 22.0, 32.0);
    let nearest = tree.nearest_search(&query, 2).unwrap();
    println!("2 nearest neighbors to {query:?}: {nearest:?}");

    println!("\n--- Incremental insertion ---");
    tree.add_points(vec![Point3D::new(11.0, 21.0, 31.0)]);
    let nearest = tree.nearest_search(&query, 2).unwrap();
    println!("2 nearest neighbors to {query:?} after insert: {nearest:?}");

    println!("\n--- Deletion ---");
    let deleted = tree.delete_points(&[Point3D::new(11.0, 21.0, 31.0)]);
    println!("Deletion result: {deleted:?}");
    println!("Live points remaining: {}", tree.len());
    println!("Rebuilds performed so far: {}", tree.rebuild_count());
}
