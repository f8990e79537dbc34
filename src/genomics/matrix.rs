//! Column synchronisation of the reference row and all realigned reads.

use std::iter;

use super::realign::{Cell, RealignedRead};
use super::ReferenceWindow;

/// Pre-flank, core and post-flank cells of one matrix row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixRow {
    /// Pre-flank cells.
    pub pre: Vec<Cell>,
    /// Core cells.
    pub core: Vec<Cell>,
    /// Post-flank cells.
    pub post: Vec<Cell>,
}

impl MatrixRow {
    fn segment_mut(&mut self, segment: usize) -> &mut Vec<Cell> {
        match segment {
            0 => &mut self.pre,
            1 => &mut self.core,
            _ => &mut self.post,
        }
    }

    fn segment(&self, segment: usize) -> &[Cell] {
        match segment {
            0 => &self.pre,
            1 => &self.core,
            _ => &self.post,
        }
    }

    /// Number of non-gap core cells.
    pub fn allele_length(&self) -> usize {
        self.core.iter().filter(|cell| !cell.is_gap()).count()
    }
}

/// Reference row followed by one row per read, with equal segment widths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentMatrix {
    rows: Vec<MatrixRow>,
}

impl AlignmentMatrix {
    /// Build the matrix for `reads` against `window` with a flank of `flank` cells.
    pub fn build(window: &ReferenceWindow, flank: usize, reads: &[RealignedRead]) -> Self {
        let mut rows = Vec::with_capacity(reads.len() + 1);
        rows.push(reference_row(window, flank));
        rows.extend(reads.iter().map(|read| {
            let [pre, core, post] = read.spliced();
            MatrixRow { pre, core, post }
        }));

        for segment in 0..3 {
            open_insertion_columns(&mut rows, segment);
        }
        migrate_trailing_gaps(&mut rows);

        Self { rows }
    }

    /// The reference row.
    pub fn reference(&self) -> &MatrixRow {
        &self.rows[0]
    }

    /// Read rows in input order.
    pub fn reads(&self) -> &[MatrixRow] {
        &self.rows[1..]
    }

    /// Common (pre, core, post) widths.
    pub fn widths(&self) -> (usize, usize, usize) {
        let reference = self.reference();
        (reference.pre.len(), reference.core.len(), reference.post.len())
    }
}

fn reference_row(window: &ReferenceWindow, flank: usize) -> MatrixRow {
    let bases = |seq: &[u8]| seq.iter().map(|&b| Cell::Base(b)).collect::<Vec<_>>();
    let mut pre: Vec<Cell> = iter::repeat(Cell::OutOfBounds)
        .take(flank.saturating_sub(window.left_flank.len()))
        .collect();
    pre.extend(bases(&window.left_flank));
    let mut post = bases(&window.right_flank);
    post.resize(flank.max(post.len()), Cell::OutOfBounds);
    MatrixRow {
        pre,
        core: bases(&window.core),
        post,
    }
}

/// Reveal pending insertions column by column, opening a gap column in every
/// row that has no pending base there. The scan bound grows with the rows.
fn open_insertion_columns(rows: &mut [MatrixRow], segment: usize) {
    let mut column = 0;
    loop {
        let width = rows
            .iter()
            .map(|row| row.segment(segment).len())
            .max()
            .unwrap_or(0);
        if column >= width {
            break;
        }

        let pending_here = rows
            .iter()
            .any(|row| matches!(row.segment(segment).get(column), Some(Cell::Pending(_))));
        if pending_here {
            for row in rows.iter_mut() {
                let cells = row.segment_mut(segment);
                match cells.get(column).copied() {
                    Some(Cell::Pending(base)) => cells[column] = Cell::Inserted(base),
                    _ => cells.insert(column.min(cells.len()), Cell::Gap),
                }
            }
        }
        column += 1;
    }
}

/// Gap columns opening the reference post-flank belong to the allele.
fn migrate_trailing_gaps(rows: &mut [MatrixRow]) {
    let shift = rows
        .first()
        .map(|reference| reference.post.iter().take_while(|cell| cell.is_gap()).count())
        .unwrap_or(0);
    if shift == 0 {
        return;
    }
    for row in rows.iter_mut() {
        let moved = shift.min(row.post.len());
        let cells: Vec<Cell> = row.post.drain(..moved).collect();
        row.core.extend(cells);
    }
}
