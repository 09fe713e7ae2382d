use ndarray::Array2;

/// Label the 4-connected regions of `mask` with two-pass union-find.
///
/// Returns the label image, 0 for background and regions numbered from 1 in
/// order of their first pixel, together with the number of regions.
pub fn label_regions(mask: &Array2<bool>) -> (Array2<u32>, usize) {
    let (h, w) = mask.dim();
    let mut labels = Array2::<u32>::zeros((h, w));
    // Index 0 is the background; provisional labels start at 1.
    let mut parent: Vec<u32> = vec![0];

    // Pass 1: provisional labels from the upper and left neighbours.
    for row in 0..h {
        for col in 0..w {
            if !mask[[row, col]] {
                continue;
            }
            let up = if row > 0 { labels[[row - 1, col]] } else { 0 };
            let left = if col > 0 { labels[[row, col - 1]] } else { 0 };
            labels[[row, col]] = match (up, left) {
                (0, 0) => {
                    let label = parent.len() as u32;
                    parent.push(label);
                    label
                }
                (label, 0) | (0, label) => label,
                (a, b) => {
                    union(&mut parent, a, b);
                    a.min(b)
                }
            };
        }
    }

    // Pass 2: every provisional label maps to its root's compact number.
    // Roots are the smallest label of their set, so they come first.
    let mut compact = vec![0u32; parent.len()];
    let mut count = 0u32;
    for label in 1..parent.len() {
        let root = find(&parent, label as u32) as usize;
        if root == label {
            count += 1;
            compact[label] = count;
        } else {
            compact[label] = compact[root];
        }
    }
    labels.mapv_inplace(|l| compact[l as usize]);
    (labels, count as usize)
}

fn find(parent: &[u32], mut x: u32) -> u32 {
    while parent[x as usize] != x {
        x = parent[x as usize];
    }
    x
}

fn union(parent: &mut [u32], a: u32, b: u32) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        let (small, big) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parent[big as usize] = small;
    }
}
