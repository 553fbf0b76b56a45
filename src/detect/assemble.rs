//! Grid-graph board assembly.
//!
//! The assembler recovers checkerboard topology from loose corners:
//! 1. estimate the base square size from nearest-neighbor distances,
//! 2. estimate the two global grid axes from the neighbor directions,
//! 3. link every corner to up to four neighbors lying along those axes at
//!    roughly the base spacing,
//! 4. breadth-first walk each connected component, assigning integer grid
//!    coordinates,
//! 5. emit one board per component that spans at least a 2x2 grid.

use crate::board::{Board, BoardAssembler, Corner};
use image::RgbImage;
use nalgebra::Vector2;
use std::collections::{HashMap, VecDeque};
use std::f64::consts::FRAC_PI_2;

/// Neighbor slots, in the order right / left / down / up.
const SLOT_DELTAS: [(i32, i32); 4] = [(0, 1), (0, -1), (1, 0), (-1, 0)];

/// Nearest-neighbor grid-graph assembler.
pub struct GridBoardAssembler {
    /// Acceptance half-cone around a grid axis, in radians.
    pub max_direction_deviation: f64,
    /// Accepted neighbor distances relative to the estimated spacing.
    pub min_spacing_ratio: f64,
    pub max_spacing_ratio: f64,
}

impl Default for GridBoardAssembler {
    fn default() -> Self {
        GridBoardAssembler {
            max_direction_deviation: 25.0_f64.to_radians(),
            min_spacing_ratio: 0.55,
            max_spacing_ratio: 1.6,
        }
    }
}

impl BoardAssembler for GridBoardAssembler {
    fn assemble(&self, _image: &RgbImage, corners: &[Corner]) -> Vec<Board> {
        if corners.len() < 4 {
            return Vec::new();
        }

        let spacing = match estimate_spacing(corners) {
            Some(s) => s,
            None => return Vec::new(),
        };
        let axis = estimate_axis_angle(corners, spacing, self.max_spacing_ratio);
        let links = self.link_neighbors(corners, spacing, axis);

        self.grow_components(corners, &links)
    }
}

impl GridBoardAssembler {
    /// For every corner, the best neighbor per slot.
    fn link_neighbors(
        &self,
        corners: &[Corner],
        spacing: f64,
        axis: f64,
    ) -> Vec<[Option<usize>; 4]> {
        let u = Vector2::new(axis.cos(), axis.sin());
        let v = Vector2::new(-u.y, u.x);
        let min_dist = spacing * self.min_spacing_ratio;
        let max_dist = spacing * self.max_spacing_ratio;
        let min_alignment = self.max_direction_deviation.cos();

        let mut links = vec![[None; 4]; corners.len()];

        for (i, corner) in corners.iter().enumerate() {
            let mut best = [(f64::INFINITY, None); 4];

            for (j, other) in corners.iter().enumerate() {
                if i == j {
                    continue;
                }
                let dir = other.position - corner.position;
                let dist = dir.norm();
                if dist < min_dist || dist > max_dist {
                    continue;
                }

                let du = dir.dot(&u) / dist;
                let dv = dir.dot(&v) / dist;
                let (slot, alignment) = if du.abs() >= dv.abs() {
                    (if du > 0.0 { 0 } else { 1 }, du.abs())
                } else {
                    (if dv > 0.0 { 2 } else { 3 }, dv.abs())
                };
                if alignment < min_alignment {
                    continue;
                }

                if dist < best[slot].0 {
                    best[slot] = (dist, Some(j));
                }
            }

            for slot in 0..4 {
                links[i][slot] = best[slot].1;
            }
        }

        links
    }

    /// Walks connected components and converts each into a board.
    fn grow_components(&self, corners: &[Corner], links: &[[Option<usize>; 4]]) -> Vec<Board> {
        let mut visited = vec![false; corners.len()];
        let mut boards = Vec::new();

        for seed in 0..corners.len() {
            if visited[seed] {
                continue;
            }

            let mut coords: HashMap<usize, (i32, i32)> = HashMap::new();
            coords.insert(seed, (0, 0));
            visited[seed] = true;

            let mut queue = VecDeque::from([seed]);
            while let Some(current) = queue.pop_front() {
                let (ci, cj) = coords[&current];
                for (slot, &(di, dj)) in SLOT_DELTAS.iter().enumerate() {
                    let Some(neighbor) = links[current][slot] else {
                        continue;
                    };
                    if visited[neighbor] {
                        continue;
                    }
                    visited[neighbor] = true;
                    coords.insert(neighbor, (ci + di, cj + dj));
                    queue.push_back(neighbor);
                }
            }

            if let Some(board) = board_from_coords(&coords) {
                boards.push(board);
            }
        }

        boards
    }
}

/// Median nearest-neighbor distance over all corners.
fn estimate_spacing(corners: &[Corner]) -> Option<f64> {
    let mut distances: Vec<f64> = corners
        .iter()
        .enumerate()
        .filter_map(|(i, corner)| {
            corners
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, other)| (other.position - corner.position).norm())
                .min_by(|a, b| a.partial_cmp(b).expect("distances are finite"))
        })
        .filter(|d| *d > 1e-9)
        .collect();

    if distances.is_empty() {
        return None;
    }
    distances.sort_by(|a, b| a.partial_cmp(b).expect("distances are finite"));
    Some(distances[distances.len() / 2])
}

/// Dominant neighbor direction folded into [0, pi/2).
///
/// A 1-degree histogram over the folded angles of all close neighbor pairs
/// is enough to separate the grid axes from diagonal pairs.
fn estimate_axis_angle(corners: &[Corner], spacing: f64, max_spacing_ratio: f64) -> f64 {
    const BINS: usize = 90;
    let mut histogram = [0usize; BINS];
    let max_dist = spacing * max_spacing_ratio;

    for (i, corner) in corners.iter().enumerate() {
        for other in corners.iter().skip(i + 1) {
            let dir = other.position - corner.position;
            let dist = dir.norm();
            if dist < 1e-9 || dist > max_dist {
                continue;
            }
            let folded = dir.y.atan2(dir.x).rem_euclid(FRAC_PI_2);
            let bin = ((folded / FRAC_PI_2) * BINS as f64) as usize % BINS;
            histogram[bin] += 1;
        }
    }

    let peak = histogram
        .iter()
        .enumerate()
        .max_by_key(|(_, count)| **count)
        .map(|(bin, _)| bin)
        .unwrap_or(0);

    (peak as f64 + 0.5) / BINS as f64 * FRAC_PI_2
}

/// Builds a board from BFS grid coordinates; `None` when the component does
/// not span at least 2x2 cells.
fn board_from_coords(coords: &HashMap<usize, (i32, i32)>) -> Option<Board> {
    let min_i = coords.values().map(|(i, _)| *i).min()?;
    let max_i = coords.values().map(|(i, _)| *i).max()?;
    let min_j = coords.values().map(|(_, j)| *j).min()?;
    let max_j = coords.values().map(|(_, j)| *j).max()?;

    let height = (max_i - min_i + 1) as usize;
    let width = (max_j - min_j + 1) as usize;
    if width < 2 || height < 2 || coords.len() < 4 {
        return None;
    }

    let mut board = Board::new(width, height);
    for (&index, &(i, j)) in coords {
        let row = (i - min_i) as usize;
        let col = (j - min_j) as usize;
        if board.get(row, col) < 0 {
            board.set(row, col, index as i32);
        }
    }
    Some(board)
}
